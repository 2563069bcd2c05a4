// SPDX-License-Identifier: GPL-3.0-only

//! Camera HAL abstraction.
//!
//! The real camera HAL and its request/result callback machinery are
//! platform-specific and out of scope here; this module defines the trait
//! boundary the rest of the pipeline is built against, plus a deterministic
//! [`MockHal`] used by tests and by the `validate` CLI path.

pub mod mock;

use crate::errors::HalError;
use crate::frame::StreamKind;
use std::sync::mpsc;

/// A stream the HAL was asked to configure.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub kind: StreamKind,
    pub width: u32,
    pub height: u32,
}

/// Per-request override applied on top of whatever the sensor is currently
/// doing; `None` fields mean "leave as-is" (used for ISP-driven AE).
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestMetadata {
    pub exposure_ns: Option<u64>,
    pub gain: Option<f32>,
}

/// A request not yet submitted to the HAL.
#[derive(Debug, Clone)]
pub struct NewRequest {
    pub streams: Vec<StreamKind>,
    pub metadata: RequestMetadata,
}

impl NewRequest {
    pub fn new(streams: Vec<StreamKind>, metadata: RequestMetadata) -> Self {
        Self { streams, metadata }
    }
}

/// One returned buffer for a completed request.
#[derive(Debug, Clone)]
pub struct ReturnedBuffer {
    pub stream: StreamKind,
    pub data: Vec<u8>,
    pub bytes_used: usize,
}

/// Sensor-reported ground truth for a completed request: actual exposure and
/// gain applied (which may differ slightly from what was requested), and the
/// sensor timestamp.
#[derive(Debug, Clone, Copy)]
pub struct CompletedMetadata {
    pub sequence: u64,
    pub timestamp_ns: u64,
    pub exposure_ns: u64,
    pub gain: f32,
}

/// A HAL result event. The HAL may deliver these in either order for the
/// same sequence number; the metadata ring exists to correlate them.
#[derive(Debug, Clone)]
pub enum HalEvent {
    MetadataPartial(CompletedMetadata),
    BufferReturn { sequence: u64, buffer: ReturnedBuffer },
    Notify(HalNotify),
}

/// Out-of-band error classification from the HAL's notify callback.
#[derive(Debug, Clone)]
pub enum HalNotify {
    Device(String),
    Request(String),
    Result(String),
    Buffer(String),
}

/// The capability interface the rest of the pipeline is built against.
/// Implementations must treat their result-delivery path as a fast,
/// non-blocking callback boundary: enqueue and return, never block inside it.
pub trait CameraHal: Send {
    /// Open and configure the named streams. Called once before `start`.
    fn configure_streams(&mut self, streams: &[StreamConfig]) -> Result<(), HalError>;

    /// Begin streaming. Returns a receiver the caller polls for
    /// [`HalEvent`]s; this stands in for the HAL's completion callback.
    fn start(&mut self) -> Result<mpsc::Receiver<HalEvent>, HalError>;

    /// Submit one capture request. Returns the sequence number assigned to
    /// it; sequence numbers are dense and strictly increasing.
    fn submit_request(&mut self, request: NewRequest) -> Result<u64, HalError>;

    /// Stop streaming and release HAL-side resources. Buffers still
    /// outstanding to the HAL at this point are not recovered.
    fn stop(&mut self) -> Result<(), HalError>;
}
