// SPDX-License-Identifier: GPL-3.0-only

//! Tuning constants shared across the pipeline implementation.

/// Buffer pool sizing.
pub mod pool {
    /// Number of buffers allocated per stream, regardless of stream kind.
    pub const BUFFERS_PER_STREAM: usize = 16;
}

/// Request-loop admission control.
pub mod request_loop {
    use std::time::Duration;

    /// Sleep interval when every selected stream's pool is exhausted.
    pub const ADMISSION_BACKOFF: Duration = Duration::from_millis(10);
}

/// Stereo pairing.
pub mod stereo {
    /// Fraction of one frame period a master/slave pair may differ by before
    /// being treated as desynchronized and the stale side discarded.
    pub const MAX_SKEW_FRACTION: f64 = 0.9;

    /// Frame period in nanoseconds for a given frame rate.
    pub fn frame_period_ns(frame_rate: u32) -> u64 {
        1_000_000_000u64 / frame_rate.max(1) as u64
    }

    /// Maximum allowed timestamp skew, in nanoseconds, for a given frame rate.
    pub fn max_skew_ns(frame_rate: u32) -> u64 {
        (frame_period_ns(frame_rate) as f64 * MAX_SKEW_FRACTION) as u64
    }
}

/// Encoder feeder backpressure thresholds.
pub mod encoder {
    /// Maximum pending frames before drop for the small-video encoder.
    pub const SMALL_VIDEO_PENDING_THRESHOLD: usize = 1;
    /// Maximum pending frames before drop for the large-video encoder.
    pub const LARGE_VIDEO_PENDING_THRESHOLD: usize = 2;
}

/// Depth/ToF rescaling ranges.
pub mod depth {
    /// Maximum raw grayscale value reported by the depth bridge (12-bit range
    /// observed on the reference platform, not the full 0..4095 span).
    pub const IR_MAX_RAW: f32 = 2895.0;
    /// Depth clamp range in meters before 8-bit rescale.
    pub const DEPTH_CLAMP_METERS: f32 = 5.0;
}

/// Application build information.
pub mod app_info {
    /// Build-time version stamped by `build.rs` from `git describe`.
    pub fn version() -> &'static str {
        env!("GIT_VERSION")
    }
}

/// Metadata wire format.
pub mod metadata {
    /// Magic number stamped on every serialized `FrameMetadata`.
    pub const MAGIC: u32 = 0x564f_584c; // "VOXL"
    /// Sentinel sequence number used for encoder packets carrying codec
    /// parameters (e.g. H.264 SPS/PPS) rather than an actual frame.
    pub const CODEC_PARAMETER_SEQUENCE: u64 = u64::MAX;
}
