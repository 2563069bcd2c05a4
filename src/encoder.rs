// SPDX-License-Identifier: GPL-3.0-only

//! Hardware-encoder feeder: forwards YUV frames to an external encoder sink
//! with drop-on-backpressure, and a separate output worker that publishes
//! encoded packets as they complete.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::warn;

use crate::constants::metadata::CODEC_PARAMETER_SEQUENCE;
use crate::frame::{Frame, FrameData, FrameMetadata, FormatCode};
use crate::publisher::Publisher;

/// One frame queued for encoding.
pub struct EncodeInput {
    pub sequence: u64,
    pub timestamp_ns: u64,
    pub width: u32,
    pub height: u32,
    pub y: FrameData,
    pub uv: Option<FrameData>,
}

/// One packet produced by the encoder.
pub struct EncodedPacket {
    /// `CODEC_PARAMETER_SEQUENCE` for SPS/PPS-style parameter sets that do
    /// not correspond to an input frame.
    pub sequence: u64,
    pub data: Vec<u8>,
    pub codec: FormatCode,
}

/// The external hardware encoder, abstracted as a typed sink. A real
/// implementation drains `submit`ted frames on its own hardware queue and
/// pushes completed packets to the channel returned by `take_output`.
pub trait EncoderSink: Send {
    fn submit(&mut self, input: EncodeInput) -> Result<(), EncodeInput>;
    fn pending(&self) -> usize;
    fn take_output(&mut self) -> Receiver<EncodedPacket>;

    /// Give the sink a chance to move completed work onto its output
    /// channel. Real hardware drives its output channel from its own
    /// completion interrupt and has no use for this; the loopback stand-in
    /// overrides it to simulate hardware completing the oldest queued frame.
    fn drain_tick(&mut self) {}
}

/// Forwards frames to an [`EncoderSink`], dropping on backpressure, and runs
/// a background worker that republishes completed packets.
///
/// The sink is shared with the output worker thread behind a mutex: `feed`
/// and the worker's periodic `drain_tick` both need mutable access, and for
/// a sink like [`LoopbackEncoder`] whose completion is simulated rather than
/// interrupt-driven, something has to actually call `drain_tick` or queued
/// frames sit forever and `pending()` never comes back down.
pub struct EncoderFeeder {
    sink: Arc<Mutex<Box<dyn EncoderSink>>>,
    pending_threshold: usize,
    dropped: AtomicUsize,
}

impl EncoderFeeder {
    pub fn new(sink: Box<dyn EncoderSink>, pending_threshold: usize) -> Self {
        Self {
            sink: Arc::new(Mutex::new(sink)),
            pending_threshold,
            dropped: AtomicUsize::new(0),
        }
    }

    /// Attempt to feed one frame. Returns `true` if it was submitted,
    /// `false` if it was dropped due to backpressure.
    pub fn feed(&mut self, input: EncodeInput) -> bool {
        let mut sink = self.sink.lock().unwrap();
        if sink.pending() > self.pending_threshold {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(
                sequence = input.sequence,
                pending = sink.pending(),
                threshold = self.pending_threshold,
                "dropping frame: encoder backpressure"
            );
            return false;
        }
        if sink.submit(input).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        true
    }

    pub fn dropped_count(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Spawn the output worker: drains completed packets and republishes
    /// them, stamping frame metadata from `sequence` where the packet
    /// carries a real frame, or a sentinel for codec-parameter packets.
    pub fn spawn_output_worker(
        &mut self,
        publisher: Arc<dyn Publisher>,
        width: u32,
        height: u32,
        framerate: u32,
        shutdown: Arc<AtomicBool>,
    ) -> JoinHandle<()> {
        let output_rx = self.sink.lock().unwrap().take_output();
        let sink = Arc::clone(&self.sink);
        std::thread::spawn(move || {
            output_worker_loop(sink, output_rx, publisher, width, height, framerate, shutdown);
        })
    }
}

fn output_worker_loop(
    sink: Arc<Mutex<Box<dyn EncoderSink>>>,
    rx: Receiver<EncodedPacket>,
    publisher: Arc<dyn Publisher>,
    width: u32,
    height: u32,
    framerate: u32,
    shutdown: Arc<AtomicBool>,
) {
    loop {
        sink.lock().unwrap().drain_tick();

        let packet = match rx.recv_timeout(Duration::from_millis(20)) {
            Ok(packet) => packet,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if shutdown.load(Ordering::SeqCst) {
                    return;
                }
                continue;
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => return,
        };

        let frame_id = if packet.sequence == CODEC_PARAMETER_SEQUENCE {
            CODEC_PARAMETER_SEQUENCE
        } else {
            packet.sequence
        };
        let metadata = FrameMetadata::new(
            frame_id,
            0,
            0.0,
            0,
            packet.codec,
            width,
            height,
            0,
            packet.data.len() as u32,
            framerate,
        );
        publisher.publish(Frame::new(metadata, vec![FrameData::from(packet.data)]));

        if shutdown.load(Ordering::SeqCst) {
            return;
        }
    }
}

/// An in-memory [`EncoderSink`] that accepts every frame up to a configured
/// queue depth and echoes it back unmodified as the "encoded" output. The
/// real hardware encoder is out of scope (§1); this loopback stands in for
/// it the same way [`MockHal`](crate::hal::mock::MockHal) stands in for the
/// camera HAL, both for tests and for the pipeline's default wiring.
pub struct LoopbackEncoder {
    queue: std::collections::VecDeque<EncodeInput>,
    output_tx: Sender<EncodedPacket>,
    output_rx: Option<Receiver<EncodedPacket>>,
}

impl LoopbackEncoder {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            queue: std::collections::VecDeque::new(),
            output_tx: tx,
            output_rx: Some(rx),
        }
    }

    /// Drain one queued input straight to the output channel, simulating
    /// hardware completing a frame.
    pub fn complete_one(&mut self) {
        if let Some(input) = self.queue.pop_front() {
            let _ = self.output_tx.send(EncodedPacket {
                sequence: input.sequence,
                data: input.y.as_ref().to_vec(),
                codec: FormatCode::H264,
            });
        }
    }
}

impl Default for LoopbackEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl EncoderSink for LoopbackEncoder {
    fn submit(&mut self, input: EncodeInput) -> Result<(), EncodeInput> {
        self.queue.push_back(input);
        Ok(())
    }

    fn pending(&self) -> usize {
        self.queue.len()
    }

    fn take_output(&mut self) -> Receiver<EncodedPacket> {
        self.output_rx.take().expect("output receiver already taken")
    }

    fn drain_tick(&mut self) {
        self.complete_one();
    }
}
