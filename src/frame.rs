// SPDX-License-Identifier: GPL-3.0-only

//! Frame payloads and the wire metadata format published alongside them.

use bytemuck::{Pod, Zeroable};
use std::sync::Arc;

use crate::constants::metadata::MAGIC;

/// Which logical stream a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Preview,
    SmallVideo,
    LargeVideo,
    Snapshot,
}

/// Wire-level pixel/payload format tag, stamped into [`FrameMetadata::format_code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum FormatCode {
    Raw8 = 0,
    Nv12 = 1,
    Nv21 = 2,
    H264 = 3,
    H265 = 4,
    Jpg = 5,
    StereoRaw8 = 6,
    StereoNv12 = 7,
}

/// Frame payload storage. `Copied` is the common case (a buffer-pool slot
/// copied out for publication); `Shared` lets a single allocation be handed
/// to more than one publisher (e.g. a stereo pair's two halves) without a
/// second copy.
#[derive(Clone)]
pub enum FrameData {
    Copied(Arc<[u8]>),
    Shared(Arc<Vec<u8>>),
}

impl FrameData {
    pub fn len(&self) -> usize {
        match self {
            FrameData::Copied(data) => data.len(),
            FrameData::Shared(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for FrameData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameData::Copied(data) => write!(f, "FrameData::Copied({} bytes)", data.len()),
            FrameData::Shared(data) => write!(f, "FrameData::Shared({} bytes)", data.len()),
        }
    }
}

impl AsRef<[u8]> for FrameData {
    fn as_ref(&self) -> &[u8] {
        match self {
            FrameData::Copied(data) => data.as_ref(),
            FrameData::Shared(data) => data.as_slice(),
        }
    }
}

impl std::ops::Deref for FrameData {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_ref()
    }
}

impl From<Vec<u8>> for FrameData {
    fn from(data: Vec<u8>) -> Self {
        FrameData::Copied(Arc::from(data.into_boxed_slice()))
    }
}

/// Packed, versioned metadata header that precedes every published frame's
/// payload segments.
///
/// Field order is chosen so every `u64` precedes every `u32`/`f32`: with the
/// 8-byte fields grouped first, the struct needs no inter-field padding
/// (3 * 8 + 8 * 4 = 56 bytes, evenly divisible by the 8-byte alignment),
/// which `#[derive(Pod)]` requires to hold.
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct FrameMetadata {
    pub frame_id: u64,
    pub timestamp_ns: u64,
    pub exposure_ns: u64,
    pub magic: u32,
    pub format_code: u32,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub size_bytes: u32,
    pub framerate: u32,
    pub gain: f32,
}

impl FrameMetadata {
    pub fn new(
        frame_id: u64,
        timestamp_ns: u64,
        gain: f32,
        exposure_ns: u64,
        format: FormatCode,
        width: u32,
        height: u32,
        stride: u32,
        size_bytes: u32,
        framerate: u32,
    ) -> Self {
        Self {
            magic: MAGIC,
            frame_id,
            timestamp_ns,
            gain,
            exposure_ns,
            format_code: format as u32,
            width,
            height,
            stride,
            size_bytes,
            framerate,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

/// A frame ready for publication: metadata header plus one or more payload
/// segments (e.g. `[Y]`, `[Y, UV]`, `[master_Y, slave_Y]`).
#[derive(Debug, Clone)]
pub struct Frame {
    pub metadata: FrameMetadata,
    pub segments: Vec<FrameData>,
}

impl Frame {
    pub fn new(metadata: FrameMetadata, segments: Vec<FrameData>) -> Self {
        Self { metadata, segments }
    }

    /// Total published length: header plus every segment.
    pub fn total_len(&self) -> usize {
        std::mem::size_of::<FrameMetadata>() + self.segments.iter().map(FrameData::len).sum::<usize>()
    }

    /// Scatter the metadata header and every payload segment into one
    /// contiguous buffer, in order. Used by transports that cannot write
    /// scatter-gather segments directly.
    pub fn to_contiguous(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.total_len());
        out.extend_from_slice(self.metadata.as_bytes());
        for seg in &self.segments {
            out.extend_from_slice(seg.as_ref());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scatter_write_round_trips_into_contiguous_buffer() {
        let meta = FrameMetadata::new(1, 100, 1.0, 5_000, FormatCode::Nv12, 4, 2, 4, 12, 30);
        let y = FrameData::from(vec![1u8, 2, 3, 4, 5, 6, 7, 8]);
        let uv = FrameData::from(vec![9u8, 10, 11, 12]);
        let frame = Frame::new(meta, vec![y.clone(), uv.clone()]);

        let contiguous = frame.to_contiguous();
        let header_len = std::mem::size_of::<FrameMetadata>();
        assert_eq!(&contiguous[..header_len], meta.as_bytes());
        assert_eq!(&contiguous[header_len..header_len + y.len()], y.as_ref());
        assert_eq!(&contiguous[header_len + y.len()..], uv.as_ref());
    }

    #[test]
    fn frame_metadata_stamps_magic() {
        let meta = FrameMetadata::new(0, 0, 1.0, 0, FormatCode::Raw8, 1, 1, 1, 1, 30);
        assert_eq!(meta.magic, MAGIC);
    }
}
