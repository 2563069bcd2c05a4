// SPDX-License-Identifier: GPL-3.0-only

//! ResultRouter: the HAL-callback-side demultiplexer. Must stay fast and
//! non-blocking — it only inserts metadata into the ring and forwards
//! returned buffers to the processing worker's queue.

use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;

use tracing::{error, warn};

use crate::frame::FrameMetadata;
use crate::hal::{HalEvent, HalNotify, ReturnedBuffer};
use crate::frame::FormatCode;

use super::PipelineShared;

/// One buffer handed off to the processing worker, with its sequence number
/// so it can be joined against metadata.
pub struct QueuedBuffer {
    pub sequence: u64,
    pub buffer: ReturnedBuffer,
}

pub fn run(shared: Arc<PipelineShared>, event_rx: Receiver<HalEvent>, buffer_tx: Sender<QueuedBuffer>) {
    loop {
        let event = match event_rx.recv_timeout(std::time::Duration::from_millis(100)) {
            Ok(event) => event,
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                if shared.should_stop() {
                    break;
                }
                continue;
            }
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
        };

        match event {
            HalEvent::MetadataPartial(meta) => {
                let metadata = FrameMetadata::new(
                    meta.sequence,
                    meta.timestamp_ns,
                    meta.gain,
                    meta.exposure_ns,
                    FormatCode::Raw8,
                    0,
                    0,
                    0,
                    0,
                    shared.config.frame_rate,
                );
                shared.metadata_ring.insert(meta.sequence, metadata);
            }
            HalEvent::BufferReturn { sequence, buffer } => {
                if buffer_tx.send(QueuedBuffer { sequence, buffer }).is_err() {
                    break;
                }
            }
            HalEvent::Notify(notify) => match notify {
                HalNotify::Device(msg) => {
                    error!(camera = %shared.config.name, %msg, "HAL device error; triggering emergency stop");
                    shared.signal_emergency_stop();
                }
                HalNotify::Request(msg) => warn!(camera = %shared.config.name, %msg, "HAL request error"),
                HalNotify::Result(msg) => warn!(camera = %shared.config.name, %msg, "HAL result error"),
                HalNotify::Buffer(msg) => warn!(camera = %shared.config.name, %msg, "HAL buffer error"),
            },
        }

        if shared.should_stop() {
            break;
        }
    }
}
