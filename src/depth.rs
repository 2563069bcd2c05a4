// SPDX-License-Identifier: GPL-3.0-only

//! Depth/ToF post-processing fan-out.
//!
//! The depth bridge is an abstracted capability interface: it delivers a
//! batch of points per callback, and this module rescales and fans them out
//! to whichever of the five depth publishers currently has subscribers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;

use crate::constants::depth::{DEPTH_CLAMP_METERS, IR_MAX_RAW};
use crate::frame::{Frame, FrameData, FormatCode, FrameMetadata};
use crate::publisher::Publisher;

/// One point delivered by the depth bridge.
#[derive(Debug, Clone, Copy)]
pub struct DepthPoint {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub gray_value: f32,
    pub depth_confidence: f32,
    pub noise: f32,
}

/// One post-processed depth-bridge callback: a batch of points plus the
/// frame they belong to.
pub struct DepthCallback {
    pub points: Vec<DepthPoint>,
    pub timestamp_ns: u64,
    pub frame_id: u64,
}

/// The external depth-sensor bridge, abstracted as a capability interface.
/// A real implementation hands the raw ToF buffer to vendor post-processing
/// on its own thread and delivers `DepthCallback`s asynchronously via the
/// channel returned from `take_output`; `submit` must return quickly, the
/// same non-blocking-callback discipline the HAL boundary follows.
pub trait DepthBridge: Send {
    /// Number of points in one frame (width * height for a structured
    /// point-cloud sensor).
    fn point_count(&self) -> usize;

    /// Hand one raw ToF buffer to the bridge for post-processing.
    fn submit(&mut self, raw: Vec<u8>, timestamp_ns: u64, frame_id: u64);

    /// Take ownership of the callback receiver. Called once, when the
    /// pipeline's depth worker thread starts.
    fn take_output(&mut self) -> Receiver<DepthCallback>;
}

/// A deterministic, in-process [`DepthBridge`] used by tests and the
/// `validate` CLI path. Synthesizes one point per pixel from the raw
/// buffer's bytes rather than running real vendor post-processing.
pub struct MockDepthBridge {
    width: u32,
    height: u32,
    output_tx: Sender<DepthCallback>,
    output_rx: Option<Receiver<DepthCallback>>,
}

impl MockDepthBridge {
    pub fn new(width: u32, height: u32) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            width,
            height,
            output_tx: tx,
            output_rx: Some(rx),
        }
    }
}

impl DepthBridge for MockDepthBridge {
    fn point_count(&self) -> usize {
        (self.width * self.height) as usize
    }

    fn submit(&mut self, raw: Vec<u8>, timestamp_ns: u64, frame_id: u64) {
        let points: Vec<DepthPoint> = raw
            .iter()
            .map(|&byte| {
                let normalized = byte as f32 / 255.0;
                DepthPoint {
                    x: 0.0,
                    y: 0.0,
                    z: normalized * DEPTH_CLAMP_METERS,
                    gray_value: normalized * IR_MAX_RAW,
                    depth_confidence: 1.0,
                    noise: 0.0,
                }
            })
            .collect();
        let _ = self.output_tx.send(DepthCallback { points, timestamp_ns, frame_id });
    }

    fn take_output(&mut self) -> Receiver<DepthCallback> {
        self.output_rx.take().expect("output receiver already taken")
    }
}

/// Which depth-derived publishers currently have subscribers, gating work
/// DepthAdapter would otherwise do unconditionally.
pub struct DepthPublishers {
    pub ir: std::sync::Arc<dyn Publisher>,
    pub depth: std::sync::Arc<dyn Publisher>,
    pub confidence: std::sync::Arc<dyn Publisher>,
    pub point_cloud: std::sync::Arc<dyn Publisher>,
    pub composite: std::sync::Arc<dyn Publisher>,
}

/// Fans out one batch of depth-bridge points into up to five packets, gated
/// by a standby decimator and per-publisher subscriber presence.
pub struct DepthAdapter {
    width: u32,
    height: u32,
    standby_enabled: bool,
    decimator: u32,
    frame_counter: u64,
}

impl DepthAdapter {
    pub fn new(width: u32, height: u32, standby_enabled: bool, decimator: u32) -> Self {
        Self {
            width,
            height,
            standby_enabled,
            decimator: decimator.max(1),
            frame_counter: 0,
        }
    }

    /// Whether this frame should be forwarded at all, given the standby
    /// decimator. Call once per incoming depth-bridge callback before doing
    /// any rescale work.
    pub fn should_process(&mut self) -> bool {
        let index = self.frame_counter;
        self.frame_counter += 1;
        if !self.standby_enabled {
            return true;
        }
        index % self.decimator as u64 == 0
    }

    /// Rescale and publish every packet whose publisher currently has at
    /// least one subscriber.
    pub fn process(&self, points: &[DepthPoint], timestamp_ns: u64, frame_id: u64, publishers: &DepthPublishers) {
        if publishers.ir.num_clients() > 0 {
            let ir = ir_8bit(points);
            publishers.ir.publish(self.build_frame(frame_id, timestamp_ns, FormatCode::Raw8, ir));
        }
        if publishers.depth.num_clients() > 0 {
            let depth = depth_8bit(points);
            publishers
                .depth
                .publish(self.build_frame(frame_id, timestamp_ns, FormatCode::Raw8, depth));
        }
        if publishers.confidence.num_clients() > 0 {
            let conf = confidence_8bit(points);
            publishers
                .confidence
                .publish(self.build_frame(frame_id, timestamp_ns, FormatCode::Raw8, conf));
        }
        if publishers.point_cloud.num_clients() > 0 {
            let pc = point_cloud_bytes(points);
            publishers
                .point_cloud
                .publish(self.build_frame(frame_id, timestamp_ns, FormatCode::Raw8, pc));
        }
        if publishers.composite.num_clients() > 0 {
            let mut composite = ir_8bit(points);
            composite.extend(depth_8bit(points));
            composite.extend(confidence_8bit(points));
            composite.extend(point_cloud_bytes(points));
            publishers
                .composite
                .publish(self.build_frame(frame_id, timestamp_ns, FormatCode::Raw8, composite));
        }
    }

    fn build_frame(&self, frame_id: u64, timestamp_ns: u64, format: FormatCode, data: Vec<u8>) -> Frame {
        let metadata = FrameMetadata::new(
            frame_id,
            timestamp_ns,
            0.0,
            0,
            format,
            self.width,
            self.height,
            self.width,
            data.len() as u32,
            0,
        );
        Frame::new(metadata, vec![FrameData::from(data)])
    }
}

/// 12-bit raw grayscale rescaled to 8-bit.
pub fn ir_8bit(points: &[DepthPoint]) -> Vec<u8> {
    points
        .iter()
        .map(|p| ((p.gray_value.clamp(0.0, IR_MAX_RAW) / IR_MAX_RAW) * 255.0) as u8)
        .collect()
}

/// z clamped to `[0, DEPTH_CLAMP_METERS]` rescaled to 8-bit.
pub fn depth_8bit(points: &[DepthPoint]) -> Vec<u8> {
    points
        .iter()
        .map(|p| ((p.z.clamp(0.0, DEPTH_CLAMP_METERS) / DEPTH_CLAMP_METERS) * 255.0) as u8)
        .collect()
}

/// Confidence is already a [0, 1] normalized value from the bridge.
pub fn confidence_8bit(points: &[DepthPoint]) -> Vec<u8> {
    points.iter().map(|p| (p.depth_confidence.clamp(0.0, 1.0) * 255.0) as u8).collect()
}

/// Depth worker thread body: drains post-processed callbacks from the
/// bridge and fans each one out through `adapter`. The standby-decimator
/// gate runs upstream, at submission time, so every callback that reaches
/// here is already one the pipeline decided to forward.
pub fn run_depth_worker(
    adapter: Arc<std::sync::Mutex<DepthAdapter>>,
    rx: Receiver<DepthCallback>,
    publishers: DepthPublishers,
    shutdown: Arc<AtomicBool>,
) {
    loop {
        let callback = match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(callback) => callback,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if shutdown.load(Ordering::SeqCst) {
                    return;
                }
                continue;
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => return,
        };

        adapter
            .lock()
            .unwrap()
            .process(&callback.points, callback.timestamp_ns, callback.frame_id, &publishers);

        if shutdown.load(Ordering::SeqCst) {
            return;
        }
    }
}

/// Interleaved (x, y, z) float32 triples.
pub fn point_cloud_bytes(points: &[DepthPoint]) -> Vec<u8> {
    let mut out = Vec::with_capacity(points.len() * 12);
    for p in points {
        out.extend_from_slice(&p.x.to_le_bytes());
        out.extend_from_slice(&p.y.to_le_bytes());
        out.extend_from_slice(&p.z.to_le_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(z: f32, gray: f32, conf: f32) -> DepthPoint {
        DepthPoint {
            x: 0.0,
            y: 0.0,
            z,
            gray_value: gray,
            depth_confidence: conf,
            noise: 0.0,
        }
    }

    #[test]
    fn ir_rescale_clamps_at_max_raw() {
        let points = vec![point(0.0, IR_MAX_RAW * 2.0, 1.0)];
        assert_eq!(ir_8bit(&points), vec![255]);
    }

    #[test]
    fn depth_rescale_clamps_beyond_five_meters() {
        let points = vec![point(10.0, 0.0, 1.0)];
        assert_eq!(depth_8bit(&points), vec![255]);
    }

    #[test]
    fn depth_rescale_zero_is_zero() {
        let points = vec![point(0.0, 0.0, 1.0)];
        assert_eq!(depth_8bit(&points), vec![0]);
    }

    #[test]
    fn decimator_passes_every_nth_frame_only_in_standby() {
        let mut adapter = DepthAdapter::new(8, 8, true, 5);
        let results: Vec<bool> = (0..10).map(|_| adapter.should_process()).collect();
        assert_eq!(
            results,
            vec![true, false, false, false, false, true, false, false, false, false]
        );
    }

    #[test]
    fn no_decimation_when_standby_disabled() {
        let mut adapter = DepthAdapter::new(8, 8, false, 5);
        for _ in 0..10 {
            assert!(adapter.should_process());
        }
    }

    #[test]
    fn point_cloud_bytes_length_matches_triples() {
        let points = vec![point(1.0, 1.0, 1.0); 4];
        assert_eq!(point_cloud_bytes(&points).len(), 4 * 12);
    }

    #[test]
    fn composite_packet_concatenates_all_four_components() {
        use crate::publisher::BroadcastPublisher;

        let composite_pub = Arc::new(BroadcastPublisher::new("composite", 4));
        let rx = composite_pub.subscribe();
        let publishers = DepthPublishers {
            ir: Arc::new(BroadcastPublisher::new("ir", 4)),
            depth: Arc::new(BroadcastPublisher::new("depth", 4)),
            confidence: Arc::new(BroadcastPublisher::new("confidence", 4)),
            point_cloud: Arc::new(BroadcastPublisher::new("point_cloud", 4)),
            composite: composite_pub,
        };

        let points = vec![point(1.0, 1.0, 1.0); 6];
        let adapter = DepthAdapter::new(3, 2, false, 1);
        adapter.process(&points, 1000, 1, &publishers);

        let frame = rx.try_recv().unwrap();
        let expected_len = ir_8bit(&points).len() + depth_8bit(&points).len() + confidence_8bit(&points).len() + point_cloud_bytes(&points).len();
        assert_eq!(frame.segments[0].len(), expected_len);
    }

    #[test]
    fn mock_bridge_submit_produces_one_point_per_byte() {
        let mut bridge = MockDepthBridge::new(4, 2);
        let rx = bridge.take_output();
        bridge.submit(vec![0u8, 255, 128, 64, 0, 0, 0, 0], 123, 7);

        let callback = rx.recv().unwrap();
        assert_eq!(callback.points.len(), 8);
        assert_eq!(callback.timestamp_ns, 123);
        assert_eq!(callback.frame_id, 7);
        assert_eq!(callback.points[1].gray_value, IR_MAX_RAW);
    }
}
