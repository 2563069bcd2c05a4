// SPDX-License-Identifier: GPL-3.0-only

//! Bounded metadata ring keyed by frame sequence number.
//!
//! The HAL may deliver a request's metadata and its buffers on separate
//! callbacks, in either order. [`ResultRouter`](crate::pipeline::result_router)
//! inserts metadata as it arrives; [`ProcessingWorker`](crate::pipeline::processing_worker)
//! looks it up by sequence when a buffer shows up. The ring must be sized at
//! least as large as the HAL's maximum in-flight request depth (in practice,
//! the owning stream's buffer pool size) or metadata for a still-outstanding
//! request can be evicted before its buffer returns.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::frame::FrameMetadata;

struct Entry {
    sequence: u64,
    metadata: FrameMetadata,
}

struct RingInner {
    entries: VecDeque<Entry>,
    capacity: usize,
}

/// Single-producer/single-consumer bounded ring, internally synchronized so
/// it can be shared between the result-router thread (producer) and the
/// processing-worker thread (consumer) without an external lock.
pub struct MetadataRing {
    inner: Mutex<RingInner>,
}

impl MetadataRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(RingInner {
                entries: VecDeque::with_capacity(capacity),
                capacity,
            }),
        }
    }

    /// Insert metadata for `sequence`, evicting the oldest entry if the ring
    /// is full.
    pub fn insert(&self, sequence: u64, metadata: FrameMetadata) {
        let mut inner = self.inner.lock().unwrap();
        if inner.entries.len() >= inner.capacity {
            inner.entries.pop_front();
        }
        inner.entries.push_back(Entry { sequence, metadata });
    }

    /// Remove and return the metadata for `sequence`, if still present.
    /// Entries older than `sequence` are dropped as a side effect, since the
    /// ring only needs to serve buffers in roughly capture order.
    pub fn take(&self, sequence: u64) -> Option<FrameMetadata> {
        let mut inner = self.inner.lock().unwrap();
        let pos = inner.entries.iter().position(|e| e.sequence == sequence)?;
        let entry = inner.entries.remove(pos)?;
        Some(entry.metadata)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FormatCode;

    fn meta(seq: u64) -> FrameMetadata {
        FrameMetadata::new(seq, seq * 1000, 1.0, 5000, FormatCode::Raw8, 640, 480, 640, 640 * 480, 30)
    }

    #[test]
    fn insert_then_take_round_trips() {
        let ring = MetadataRing::new(4);
        ring.insert(1, meta(1));
        let m = ring.take(1).unwrap();
        assert_eq!(m.frame_id, 1);
        assert!(ring.take(1).is_none());
    }

    #[test]
    fn evicts_oldest_when_full() {
        let ring = MetadataRing::new(2);
        ring.insert(1, meta(1));
        ring.insert(2, meta(2));
        ring.insert(3, meta(3));
        assert!(ring.take(1).is_none());
        assert!(ring.take(2).is_some());
        assert!(ring.take(3).is_some());
    }

    #[test]
    fn missing_sequence_returns_none() {
        let ring = MetadataRing::new(4);
        assert!(ring.take(42).is_none());
    }
}
