// SPDX-License-Identifier: GPL-3.0-only

//! Pixel format repacking used by [`ProcessingWorker`](crate::pipeline::processing_worker).
//!
//! The RAW10-to-RAW8 conversion here is the same 5-bytes-per-4-pixels
//! packing shape used elsewhere for Y10B unpacking: each group of 5 bytes
//! holds four 10-bit samples, with the last byte carrying the low two bits
//! of each of the preceding four. Producing RAW8 only needs the top 8 bits
//! of each sample, so the fifth byte of every group is simply dropped.

/// Convert a RAW10-packed (5 bytes / 4 pixels) buffer to RAW8 by dropping
/// every fifth byte. `data` must be a whole number of 5-byte groups.
pub fn raw10_to_raw8(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() * 4 / 5);
    for chunk in data.chunks_exact(5) {
        out.extend_from_slice(&chunk[0..4]);
    }
    out
}

/// Heuristic bit-depth detection: examine the tail row of the first frame.
/// On this platform, a sensor that is genuinely streaming 10-bit RAW leaves
/// non-zero padding bits in the tail row's packing byte; a sensor that is
/// actually only 8-bit (despite being configured RAW10) leaves it zeroed.
/// This decision is made once, from the first frame only, and persisted for
/// the pipeline's lifetime — later frames are not re-examined.
pub fn detect_truly_10bit(first_frame_tail_row: &[u8]) -> bool {
    first_frame_tail_row
        .chunks_exact(5)
        .any(|chunk| chunk[4] != 0)
}

/// Tracks the RAW10/RAW8 decision for one stream across its pipeline
/// lifetime.
pub struct Raw10Detector {
    decision: Option<bool>,
}

impl Raw10Detector {
    pub fn new() -> Self {
        Self { decision: None }
    }

    /// Feed the first frame's tail row once; subsequent calls are no-ops.
    pub fn observe_first_frame(&mut self, tail_row: &[u8]) {
        if self.decision.is_none() {
            self.decision = Some(detect_truly_10bit(tail_row));
        }
    }

    /// Whether conversion is needed, given the decision made from the first
    /// frame. Defaults to `false` (pass-through) if no frame has been
    /// observed yet.
    pub fn needs_conversion(&self) -> bool {
        self.decision.unwrap_or(false)
    }

    /// Convert (or pass through) one frame according to the persisted
    /// decision.
    pub fn process(&self, data: &[u8]) -> Vec<u8> {
        if self.needs_conversion() {
            raw10_to_raw8(data)
        } else {
            data.to_vec()
        }
    }
}

impl Default for Raw10Detector {
    fn default() -> Self {
        Self::new()
    }
}

/// NV12 semi-planar passthrough: split a packed `(Y, UV)` buffer into its
/// two planes for scatter publication. `y_size` is `width * height`.
pub fn split_nv12(data: &[u8], y_size: usize) -> Option<(&[u8], &[u8])> {
    if data.len() < y_size {
        return None;
    }
    Some(data.split_at(y_size))
}
