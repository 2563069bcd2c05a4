// SPDX-License-Identifier: GPL-3.0-only

//! A deterministic, in-process HAL used by tests and by the `validate` CLI
//! path. Produces synthetic frames on its own thread at a fixed rate,
//! mirroring the request/result split of a real HAL without any hardware.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use super::{CameraHal, CompletedMetadata, HalEvent, NewRequest, ReturnedBuffer, StreamConfig};
use crate::errors::HalError;
use crate::frame::StreamKind;

/// Builds deterministic payloads and timestamps for a [`MockHal`].
#[derive(Debug, Clone)]
pub struct MockHalOptions {
    pub frame_rate: u32,
    /// If true, `submit_request` fails after this many requests, simulating
    /// a device error.
    pub fail_after: Option<u64>,
}

impl Default for MockHalOptions {
    fn default() -> Self {
        Self {
            frame_rate: 30,
            fail_after: None,
        }
    }
}

struct Shared {
    next_sequence: AtomicU64,
    start_ns: AtomicU64,
    stopped: AtomicBool,
}

/// A HAL implementation backed entirely by an in-process synthetic sensor.
pub struct MockHal {
    options: MockHalOptions,
    streams: Vec<StreamConfig>,
    shared: Arc<Shared>,
    event_tx: Option<Sender<HalEvent>>,
    request_tx: Option<Sender<(u64, Vec<StreamKind>, super::RequestMetadata)>>,
}

impl MockHal {
    pub fn new(options: MockHalOptions) -> Self {
        Self {
            options,
            streams: Vec::new(),
            shared: Arc::new(Shared {
                next_sequence: AtomicU64::new(0),
                start_ns: AtomicU64::new(0),
                stopped: AtomicBool::new(false),
            }),
            event_tx: None,
            request_tx: None,
        }
    }
}

impl CameraHal for MockHal {
    fn configure_streams(&mut self, streams: &[StreamConfig]) -> Result<(), HalError> {
        self.streams = streams.to_vec();
        Ok(())
    }

    fn start(&mut self) -> Result<Receiver<HalEvent>, HalError> {
        let (event_tx, event_rx) = mpsc::channel();
        let (request_tx, request_rx) = mpsc::channel::<(u64, Vec<StreamKind>, super::RequestMetadata)>();

        self.shared.stopped.store(false, Ordering::SeqCst);
        let shared = self.shared.clone();
        let streams = self.streams.clone();
        let event_tx_worker = event_tx.clone();
        let frame_period = Duration::from_secs_f64(1.0 / self.options.frame_rate.max(1) as f64);

        thread::spawn(move || {
            let mut elapsed_ns: u64 = 0;
            while let Ok((sequence, requested_streams, request_metadata)) = request_rx.recv() {
                if shared.stopped.load(Ordering::SeqCst) {
                    break;
                }
                elapsed_ns += frame_period.as_nanos() as u64;

                // A real sensor reports the exposure/gain it actually applied,
                // which may differ slightly from the request; this mock just
                // echoes the request back when given an override (ISP/off-AE
                // requests carry none, so the synthetic default stands in for
                // whatever the ISP chose).
                let metadata = CompletedMetadata {
                    sequence,
                    timestamp_ns: elapsed_ns,
                    exposure_ns: request_metadata.exposure_ns.unwrap_or(5_259_763),
                    gain: request_metadata.gain.unwrap_or(1.0),
                };
                if event_tx_worker.send(HalEvent::MetadataPartial(metadata)).is_err() {
                    break;
                }

                for kind in requested_streams {
                    let cfg = streams.iter().find(|s| s.kind == kind);
                    let (w, h) = cfg.map(|c| (c.width, c.height)).unwrap_or((640, 480));
                    let size = (w * h) as usize;
                    let buffer = ReturnedBuffer {
                        stream: kind,
                        data: vec![0x42u8; size],
                        bytes_used: size,
                    };
                    if event_tx_worker
                        .send(HalEvent::BufferReturn { sequence, buffer })
                        .is_err()
                    {
                        return;
                    }
                }
            }
        });

        self.event_tx = Some(event_tx);
        self.request_tx = Some(request_tx);
        Ok(event_rx)
    }

    fn submit_request(&mut self, request: NewRequest) -> Result<u64, HalError> {
        let sequence = self.shared.next_sequence.fetch_add(1, Ordering::SeqCst);
        if let Some(fail_after) = self.options.fail_after {
            if sequence >= fail_after {
                return Err(HalError::DeviceError("mock HAL injected failure".to_string()));
            }
        }
        if let Some(tx) = &self.request_tx {
            let _ = tx.send((sequence, request.streams, request.metadata));
        }
        Ok(sequence)
    }

    fn stop(&mut self) -> Result<(), HalError> {
        self.shared.stopped.store(true, Ordering::SeqCst);
        self.request_tx = None;
        Ok(())
    }
}

impl Drop for MockHal {
    fn drop(&mut self) {
        self.shared.stopped.store(true, Ordering::SeqCst);
    }
}
