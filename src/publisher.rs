// SPDX-License-Identifier: GPL-3.0-only

//! Typed IPC publisher abstraction.
//!
//! A `Publisher` is a named output channel with observable subscriber
//! presence: components upstream (the request loop, the encoder feeder)
//! decide whether to do work at all based on whether anyone is listening,
//! the same way the capture thread only requests a stream when a recording
//! sender has been attached.

use std::any::Any;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::frame::Frame;

/// A named, multi-subscriber output channel for [`Frame`]s.
pub trait Publisher: Send + Sync {
    /// Channel name as it appears to subscribers (e.g. `front_grey`).
    fn name(&self) -> &str;

    /// Broadcast a frame to all current subscribers. Never blocks; if there
    /// are no subscribers the frame is simply dropped.
    fn publish(&self, frame: Frame);

    /// Number of currently-subscribed clients.
    fn num_clients(&self) -> usize;

    /// Downcast support for callers (tests, the in-process transport) that
    /// need the concrete publisher behind the trait object — e.g. to
    /// `subscribe()` a [`BroadcastPublisher`] directly.
    fn as_any(&self) -> &dyn Any;
}

/// Default publisher backed by `tokio::sync::broadcast`, usable from plain
/// OS threads — `send` does not require the async runtime to be entered.
pub struct BroadcastPublisher {
    name: String,
    tx: broadcast::Sender<Arc<Frame>>,
}

impl BroadcastPublisher {
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { name: name.into(), tx }
    }

    /// Subscribe to this publisher's frames. Intended for tests and for the
    /// in-process transport; a real IPC transport instead drains this
    /// receiver and forwards onto the wire.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Frame>> {
        self.tx.subscribe()
    }
}

impl Publisher for BroadcastPublisher {
    fn name(&self) -> &str {
        &self.name
    }

    fn publish(&self, frame: Frame) {
        // A broadcast send fails only when there are zero receivers, which
        // is exactly the "nobody is subscribed" case this publisher is
        // allowed to drop silently.
        let _ = self.tx.send(Arc::new(frame));
    }

    fn num_clients(&self) -> usize {
        self.tx.receiver_count()
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
