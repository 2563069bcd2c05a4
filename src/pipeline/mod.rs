// SPDX-License-Identifier: GPL-3.0-only

//! Per-camera streaming pipeline: owns the HAL handle, buffer pools,
//! metadata ring, exposure state, and the worker threads that drive them
//! through their lifecycle.

pub mod processing_worker;
pub mod request_loop;
pub mod result_router;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use tracing::info;

use crate::buffer_pool::{BufferHandle, SharedBufferPool};
use crate::config::{AeMode, CameraConfig};
use crate::constants::pool::BUFFERS_PER_STREAM;
use crate::constants::encoder::{LARGE_VIDEO_PENDING_THRESHOLD, SMALL_VIDEO_PENDING_THRESHOLD};
use crate::control::{self, ControlCommand};
use crate::depth::{DepthAdapter, DepthBridge, DepthPublishers, MockDepthBridge};
use crate::encoder::{EncoderFeeder, LoopbackEncoder};
use crate::errors::PipelineError;
use crate::exposure::{AeController, ExposureState, HistogramAe, MeanSampleValueAe};
use crate::frame::StreamKind;
use crate::hal::{CameraHal, StreamConfig as HalStreamConfig};
use crate::metadata_ring::MetadataRing;
use crate::publisher::{BroadcastPublisher, Publisher};
use crate::stereo::StereoRendezvous;

/// Pipeline lifecycle state, per §4.10.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Init,
    Configuring,
    Running,
    Stopping,
    Stopped,
}

/// Pending snapshot destinations, popped one per snapshot frame.
pub struct SnapshotQueue {
    paths: Mutex<std::collections::VecDeque<Option<String>>>,
    pending: AtomicU64,
}

impl SnapshotQueue {
    pub fn new() -> Self {
        Self {
            paths: Mutex::new(std::collections::VecDeque::new()),
            pending: AtomicU64::new(0),
        }
    }

    /// Queue a snapshot request. `path` is `None` for `snapshot_no_save`.
    pub fn enqueue(&self, path: Option<String>) {
        self.paths.lock().unwrap().push_back(path);
        self.pending.fetch_add(1, Ordering::SeqCst);
    }

    pub fn pending_count(&self) -> u64 {
        self.pending.load(Ordering::SeqCst)
    }

    /// Called by the request loop when it admits a snapshot request;
    /// decrements the pending count so a second request isn't issued for
    /// the same destination.
    pub fn decrement_pending(&self) {
        self.pending.fetch_sub(1, Ordering::SeqCst);
    }

    /// Called by the processing worker when the snapshot frame actually
    /// arrives; pops the next destination (if any).
    pub fn pop_destination(&self) -> Option<String> {
        self.paths.lock().unwrap().pop_front().flatten()
    }
}

impl Default for SnapshotQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// All publishers for one camera, indexed by logical channel name.
pub struct PipelinePublishers {
    pub channels: HashMap<String, Arc<dyn Publisher>>,
}

impl PipelinePublishers {
    pub fn get(&self, name: &str) -> Arc<dyn Publisher> {
        self.channels
            .get(name)
            .cloned()
            .unwrap_or_else(|| panic!("no publisher registered for channel {name}"))
    }
}

/// Per-video-stream encoder feeder, keyed by stream kind, plus the channel
/// name its encoded output republishes on.
pub struct EncoderSlot {
    pub feeder: Mutex<EncoderFeeder>,
    pub encoded_channel: &'static str,
}

/// ToF-only depth bridge plumbing: the bridge itself (submission side), the
/// decimator/rescale adapter (shared with the depth worker thread), and the
/// five depth publishers.
pub struct DepthPipeline {
    pub bridge: Mutex<Box<dyn DepthBridge>>,
    pub adapter: Arc<Mutex<DepthAdapter>>,
}

/// Shared, cross-thread pipeline state. Every worker thread holds an `Arc`
/// to one of these.
pub struct PipelineShared {
    pub config: CameraConfig,
    pub pools: HashMap<StreamKind, SharedBufferPool>,
    pub metadata_ring: MetadataRing,
    pub exposure: Arc<ExposureState>,
    pub ae: Option<AeController>,
    /// Whether the configured software AE algorithm is currently applying
    /// updates. Toggled by `stop_ae`/`start_ae`; independent of `ae` being
    /// `Some`, which reflects the *configured* mode and never changes.
    pub ae_enabled: AtomicBool,
    pub publishers: PipelinePublishers,
    pub snapshots: SnapshotQueue,
    pub stereo: Option<Arc<StereoRendezvous>>,
    pub is_stereo_slave: bool,
    pub stop: AtomicBool,
    pub emergency_stop: AtomicBool,
    /// Mirrors `stop || emergency_stop` in a form that's cheap to hand to
    /// the encoder/depth output worker threads as an `Arc`, so they can
    /// unblock from their `recv_timeout` loop without reaching back through
    /// `Arc<PipelineShared>` (those threads only ever need "time to exit",
    /// never the drain-vs-abort distinction).
    pub shutdown: Arc<AtomicBool>,
    pub terminal_sequence: AtomicU64,
    pub encoders: HashMap<StreamKind, EncoderSlot>,
    pub depth: Option<DepthPipeline>,
    /// Buffers acquired by the request loop for a submitted-but-not-yet-fully-
    /// processed request, keyed by `(sequence, stream)`. Holding the real
    /// [`BufferHandle`] here (rather than dropping it the instant the
    /// admission check passes) is what makes the free/outstanding/in-processing
    /// invariant in §8 actually observable: the pool slot stays unavailable
    /// for the whole HAL round trip, not just for the acquire call. The
    /// processing worker drops the entry (releasing the slot) once it is
    /// done with that buffer.
    pub outstanding: Mutex<HashMap<(u64, StreamKind), BufferHandle>>,
}

impl PipelineShared {
    pub fn should_stop(&self) -> bool {
        self.stop.load(Ordering::SeqCst) || self.emergency_stop.load(Ordering::SeqCst)
    }

    /// Graceful stop: request drain-to-terminal-sequence behavior.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn signal_emergency_stop(&self) {
        self.emergency_stop.store(true, Ordering::SeqCst);
        self.stop.store(true, Ordering::SeqCst);
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(stereo) = &self.stereo {
            stereo.stop();
        }
    }

    /// Whether the configured AE mode is one of the software algorithms
    /// (irrespective of whether it is currently enabled via the control
    /// channel) — used by the request loop to decide if the preview stream
    /// is needed for statistics (§4.1).
    pub fn ae_is_software(&self) -> bool {
        matches!(self.config.ae.mode, AeMode::LmeHist | AeMode::LmeMsv)
    }

    /// Whether AE should actually evaluate and apply an update this frame.
    pub fn ae_active(&self) -> bool {
        self.ae.is_some() && self.ae_enabled.load(Ordering::SeqCst)
    }

    /// Apply one parsed control command (§4.9). Mirrors exposure to the
    /// stereo slave when this pipeline is a non-independent-exposure master.
    pub fn apply_control_command(&self, cmd: ControlCommand) {
        match cmd {
            ControlCommand::SetExpGain { exposure_ns, gain } => {
                self.ae_enabled.store(false, Ordering::SeqCst);
                self.exposure.set(exposure_ns, gain);
                self.mirror_exposure_if_master();
            }
            ControlCommand::SetExp { exposure_ns } => {
                self.ae_enabled.store(false, Ordering::SeqCst);
                self.exposure.set(exposure_ns, self.exposure.gain());
                self.mirror_exposure_if_master();
            }
            ControlCommand::SetGain { gain } => {
                self.ae_enabled.store(false, Ordering::SeqCst);
                self.exposure.set(self.exposure.exposure_ns(), gain);
                self.mirror_exposure_if_master();
            }
            ControlCommand::StartAe => {
                self.ae_enabled.store(true, Ordering::SeqCst);
            }
            ControlCommand::StopAe => {
                self.ae_enabled.store(false, Ordering::SeqCst);
            }
            ControlCommand::Snapshot { path } => {
                self.snapshots.enqueue(Some(path));
            }
            ControlCommand::SnapshotNoSave => {
                self.snapshots.enqueue(None);
            }
        }
    }

    /// Record a buffer as outstanding to the HAL for `(sequence, kind)`.
    /// Called by the request loop right after a successful `submit_request`.
    pub fn track_outstanding(&self, sequence: u64, kind: StreamKind, handle: BufferHandle) {
        self.outstanding.lock().unwrap().insert((sequence, kind), handle);
    }

    /// Release the pool slot for `(sequence, kind)` back to its free set.
    /// Called by the processing worker once it is finished with a buffer,
    /// whether or not it actually published anything from it.
    pub fn release_outstanding(&self, sequence: u64, kind: StreamKind) {
        self.outstanding.lock().unwrap().remove(&(sequence, kind));
    }

    fn mirror_exposure_if_master(&self) {
        if !self.is_stereo_slave && !self.config.independent_exposure {
            if let Some(stereo) = &self.stereo {
                stereo.mirror_to_slave(self.exposure.exposure_ns(), self.exposure.gain());
            }
        }
    }
}

fn default_publishers(name: &str, sensor_is_color: bool, is_tof: bool) -> PipelinePublishers {
    let mut channels: HashMap<String, Arc<dyn Publisher>> = HashMap::new();
    let mut add = |suffix: &str| {
        let channel_name = if suffix.is_empty() {
            name.to_string()
        } else {
            format!("{name}_{suffix}")
        };
        channels.insert(
            suffix.to_string(),
            Arc::new(BroadcastPublisher::new(channel_name, 8)) as Arc<dyn Publisher>,
        );
    };

    if is_tof {
        add("ir");
        add("depth");
        add("conf");
        add("pc");
        add("");
    } else {
        add("grey");
        if sensor_is_color {
            add("color");
        }
        add("small_grey");
        add("small_h264");
        add("large_grey");
        add("large_h264");
        if sensor_is_color {
            add("small_color");
            add("large_color");
        }
        add("snapshot");
    }

    PipelinePublishers { channels }
}

/// A single camera's streaming pipeline. Owns the worker threads and the
/// state they share; `start`/`stop` drive the lifecycle state machine.
pub struct CameraPipeline {
    state: Mutex<PipelineState>,
    shared: Arc<PipelineShared>,
    hal: Arc<Mutex<Box<dyn CameraHal>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl CameraPipeline {
    /// Construct a pipeline (Init state) for `config`, backed by `hal`.
    /// `stereo` is `Some` for both members of a stereo pair, built by the
    /// owning [`Server`](crate::server::Server) so master and slave share
    /// one rendezvous.
    pub fn new(
        config: CameraConfig,
        hal: Box<dyn CameraHal>,
        stereo: Option<Arc<StereoRendezvous>>,
        is_stereo_slave: bool,
    ) -> Result<Self, PipelineError> {
        let mut pools = HashMap::new();
        for (kind, stream_cfg) in [
            (StreamKind::Preview, &config.preview),
            (StreamKind::SmallVideo, &config.small_video),
            (StreamKind::LargeVideo, &config.large_video),
            (StreamKind::Snapshot, &config.snapshot),
        ] {
            if stream_cfg.enabled {
                let capacity = if kind == StreamKind::Snapshot {
                    crate::buffer_pool::snapshot_buffer_capacity(stream_cfg.width, stream_cfg.height)
                } else {
                    (stream_cfg.width * stream_cfg.height * 2) as usize
                };
                pools.insert(kind, SharedBufferPool::new(BUFFERS_PER_STREAM, capacity));
            }
        }

        let ae: Option<AeController> = match config.ae.mode {
            AeMode::Off | AeMode::Isp => None,
            AeMode::LmeHist => Some(AeController::new(Box::new(HistogramAe::new(config.ae.clone())))),
            AeMode::LmeMsv => Some(AeController::new(Box::new(MeanSampleValueAe::new(config.ae.clone())))),
        };
        let ae_enabled = ae.is_some();

        let publishers = default_publishers(&config.name, config.sensor_kind.is_color(), config.sensor_kind.is_depth());

        let exposure = Arc::new(ExposureState::new(config.ae.exposure_min_ns, config.ae.gain_min));
        if is_stereo_slave {
            if let Some(stereo) = &stereo {
                stereo.bind_slave_exposure(exposure.clone());
            }
        }

        let mut encoders = HashMap::new();
        for (kind, stream_cfg, channel, threshold) in [
            (
                StreamKind::SmallVideo,
                &config.small_video,
                "small_h264",
                SMALL_VIDEO_PENDING_THRESHOLD,
            ),
            (
                StreamKind::LargeVideo,
                &config.large_video,
                "large_h264",
                LARGE_VIDEO_PENDING_THRESHOLD,
            ),
        ] {
            if stream_cfg.enabled && stream_cfg.bitrate_bps.is_some() {
                encoders.insert(
                    kind,
                    EncoderSlot {
                        feeder: Mutex::new(EncoderFeeder::new(Box::new(LoopbackEncoder::new()), threshold)),
                        encoded_channel: channel,
                    },
                );
            }
        }

        let depth = if config.sensor_kind.is_depth() && config.preview.enabled {
            Some(DepthPipeline {
                bridge: Mutex::new(Box::new(MockDepthBridge::new(config.preview.width, config.preview.height))),
                adapter: Arc::new(Mutex::new(DepthAdapter::new(
                    config.preview.width,
                    config.preview.height,
                    config.standby_enabled,
                    config.decimator,
                ))),
            })
        } else {
            None
        };

        let shared = Arc::new(PipelineShared {
            exposure,
            pools,
            metadata_ring: MetadataRing::new(BUFFERS_PER_STREAM * 4),
            ae,
            ae_enabled: AtomicBool::new(ae_enabled),
            publishers,
            snapshots: SnapshotQueue::new(),
            stereo,
            is_stereo_slave,
            stop: AtomicBool::new(false),
            emergency_stop: AtomicBool::new(false),
            shutdown: Arc::new(AtomicBool::new(false)),
            terminal_sequence: AtomicU64::new(u64::MAX),
            encoders,
            depth,
            outstanding: Mutex::new(HashMap::new()),
            config,
        });

        Ok(Self {
            state: Mutex::new(PipelineState::Init),
            shared,
            hal: Arc::new(Mutex::new(hal)),
            workers: Mutex::new(Vec::new()),
        })
    }

    /// Parse and apply one control-channel command line (§4.9). Malformed
    /// or unrecognized lines are logged and ignored by the parser.
    pub fn submit_control_command(&self, line: &str) {
        if let Some(cmd) = control::parse_command_or_log(line, &self.shared.config.ae) {
            self.shared.apply_control_command(cmd);
        }
    }

    pub fn state(&self) -> PipelineState {
        *self.state.lock().unwrap()
    }

    /// Whether this pipeline's emergency-stop flag has been raised, by a
    /// worker thread reacting to a HAL device error or by an explicit
    /// `emergency_stop()` call. The owning [`Server`](crate::server::Server)
    /// polls this on every pipeline so a fatal error in one camera's worker
    /// threads (which only hold `Arc<PipelineShared>`, not the pipeline
    /// itself) is still observed promptly, without waiting for `state()` to
    /// reach `Stopped` — that transition only happens once `stop()` has
    /// joined every worker thread, which the server must itself trigger in
    /// reaction to this flag.
    pub fn emergency_stop_requested(&self) -> bool {
        self.shared.emergency_stop.load(Ordering::SeqCst)
    }

    pub fn shared(&self) -> Arc<PipelineShared> {
        self.shared.clone()
    }

    /// Open the HAL, configure streams, and start the worker threads.
    pub fn start(&self) -> Result<(), PipelineError> {
        *self.state.lock().unwrap() = PipelineState::Configuring;

        let stream_configs: Vec<HalStreamConfig> = self
            .shared
            .pools
            .keys()
            .map(|kind| {
                let (w, h) = match kind {
                    StreamKind::Preview => (self.shared.config.preview.width, self.shared.config.preview.height),
                    StreamKind::SmallVideo => (self.shared.config.small_video.width, self.shared.config.small_video.height),
                    StreamKind::LargeVideo => (self.shared.config.large_video.width, self.shared.config.large_video.height),
                    StreamKind::Snapshot => (self.shared.config.snapshot.width, self.shared.config.snapshot.height),
                };
                HalStreamConfig { kind: *kind, width: w, height: h }
            })
            .collect();

        let event_rx = {
            let mut hal = self.hal.lock().unwrap();
            hal.configure_streams(&stream_configs)
                .map_err(|e| PipelineError::StreamConfigFailed(e.to_string()))?;
            hal.start()
                .map_err(|e| PipelineError::StreamConfigFailed(e.to_string()))?
        };

        let (buffer_tx, buffer_rx) = std::sync::mpsc::channel();

        let mut workers = Vec::new();

        let router_shared = self.shared.clone();
        workers.push(std::thread::spawn(move || {
            result_router::run(router_shared, event_rx, buffer_tx);
        }));

        let worker_shared = self.shared.clone();
        workers.push(std::thread::spawn(move || {
            processing_worker::run(worker_shared, buffer_rx);
        }));

        let request_shared = self.shared.clone();
        let request_hal = self.hal.clone();
        workers.push(std::thread::spawn(move || {
            request_loop::run(request_shared, request_hal);
        }));

        for (kind, slot) in &self.shared.encoders {
            let (width, height) = match kind {
                StreamKind::SmallVideo => (self.shared.config.small_video.width, self.shared.config.small_video.height),
                StreamKind::LargeVideo => (self.shared.config.large_video.width, self.shared.config.large_video.height),
                _ => continue,
            };
            let publisher = self.shared.publishers.get(slot.encoded_channel);
            let handle = slot.feeder.lock().unwrap().spawn_output_worker(
                publisher,
                width,
                height,
                self.shared.config.frame_rate,
                self.shared.shutdown.clone(),
            );
            workers.push(handle);
        }

        if let Some(depth) = &self.shared.depth {
            let output_rx = depth.bridge.lock().unwrap().take_output();
            let adapter = depth.adapter.clone();
            let publishers = DepthPublishers {
                ir: self.shared.publishers.get("ir"),
                depth: self.shared.publishers.get("depth"),
                confidence: self.shared.publishers.get("conf"),
                point_cloud: self.shared.publishers.get("pc"),
                composite: self.shared.publishers.get(""),
            };
            let shutdown = self.shared.shutdown.clone();
            workers.push(std::thread::spawn(move || {
                crate::depth::run_depth_worker(adapter, output_rx, publishers, shutdown);
            }));
        }

        *self.workers.lock().unwrap() = workers;
        *self.state.lock().unwrap() = PipelineState::Running;
        info!(camera = %self.shared.config.name, "pipeline running");
        Ok(())
    }

    /// Graceful stop: signal workers, join, and release the HAL.
    pub fn stop(&self) {
        *self.state.lock().unwrap() = PipelineState::Stopping;
        self.shared.request_stop();
        if let Some(stereo) = &self.shared.stereo {
            stereo.stop();
        }

        let handles = std::mem::take(&mut *self.workers.lock().unwrap());
        for handle in handles {
            let _ = handle.join();
        }

        let _ = self.hal.lock().unwrap().stop();
        *self.state.lock().unwrap() = PipelineState::Stopped;
        info!(camera = %self.shared.config.name, "pipeline stopped");
    }

    /// Immediate, no-drain stop, propagated across the whole server.
    pub fn emergency_stop(&self) {
        self.shared.signal_emergency_stop();
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AeConfig, SensorKind, StreamConfig};
    use crate::hal::mock::{MockHal, MockHalOptions};

    fn camera(name: &str, sensor_kind: SensorKind, camera_id: i32, camera_id_second: Option<i32>) -> CameraConfig {
        CameraConfig {
            name: name.to_string(),
            sensor_kind,
            camera_id,
            camera_id_second,
            enabled: true,
            frame_rate: 30,
            preview: StreamConfig {
                enabled: true,
                width: 16,
                height: 8,
                bitrate_bps: None,
            },
            small_video: StreamConfig::default(),
            large_video: StreamConfig::default(),
            snapshot: StreamConfig::default(),
            ae: AeConfig::default(),
            independent_exposure: false,
            standby_enabled: false,
            decimator: 1,
        }
    }

    fn hal() -> Box<dyn CameraHal> {
        Box::new(MockHal::new(MockHalOptions {
            frame_rate: 30,
            fail_after: None,
        }))
    }

    #[test]
    fn submit_control_command_applies_set_exp_gain() {
        let pipeline = CameraPipeline::new(camera("front", SensorKind::Ov7251, 0, None), hal(), None, false).unwrap();
        pipeline.submit_control_command("set_exp_gain 5 2.0");
        assert_eq!(pipeline.shared.exposure.exposure_ns(), 5_000_000);
        assert_eq!(pipeline.shared.exposure.gain(), 2.0);
        assert!(!pipeline.shared.ae_active());
    }

    #[test]
    fn submit_control_command_ignores_malformed_line() {
        let pipeline = CameraPipeline::new(camera("front", SensorKind::Ov7251, 0, None), hal(), None, false).unwrap();
        let before = pipeline.shared.exposure.exposure_ns();
        pipeline.submit_control_command("not_a_command");
        assert_eq!(pipeline.shared.exposure.exposure_ns(), before);
    }

    #[test]
    fn submit_control_command_snapshot_queues_destination() {
        let pipeline = CameraPipeline::new(camera("front", SensorKind::Ov7251, 0, None), hal(), None, false).unwrap();
        pipeline.submit_control_command("snapshot /tmp/out.jpg");
        assert_eq!(pipeline.shared.snapshots.pending_count(), 1);
        assert_eq!(pipeline.shared.snapshots.pop_destination(), Some("/tmp/out.jpg".to_string()));
    }

    #[test]
    fn non_independent_master_mirrors_exposure_into_slave() {
        let rendezvous = Arc::new(StereoRendezvous::new(1_000_000));
        let mut master_cfg = camera("left", SensorKind::Ov7251, 0, Some(1));
        master_cfg.independent_exposure = false;
        let mut slave_cfg = camera("right", SensorKind::Ov7251, 1, None);
        slave_cfg.independent_exposure = false;

        let master = CameraPipeline::new(master_cfg, hal(), Some(rendezvous.clone()), false).unwrap();
        let _slave = CameraPipeline::new(slave_cfg, hal(), Some(rendezvous), true).unwrap();

        master.submit_control_command("set_exp_gain 12 3.5");

        // the slave pipeline's own exposure state, not the master's, is what
        // bind_slave_exposure wired to the rendezvous.
        assert_eq!(_slave.shared.exposure.exposure_ns(), 12_000_000);
        assert_eq!(_slave.shared.exposure.gain(), 3.5);
    }

    #[test]
    fn independent_slave_exposure_is_unaffected_by_master_command() {
        let rendezvous = Arc::new(StereoRendezvous::new(1_000_000));
        let mut master_cfg = camera("left", SensorKind::Ov7251, 0, Some(1));
        master_cfg.independent_exposure = true;
        let mut slave_cfg = camera("right", SensorKind::Ov7251, 1, None);
        slave_cfg.independent_exposure = true;

        let master = CameraPipeline::new(master_cfg, hal(), Some(rendezvous.clone()), false).unwrap();
        let slave = CameraPipeline::new(slave_cfg, hal(), Some(rendezvous), true).unwrap();
        let slave_initial = slave.shared.exposure.exposure_ns();

        master.submit_control_command("set_exp_gain 12 3.5");

        assert_eq!(slave.shared.exposure.exposure_ns(), slave_initial);
    }

    #[test]
    fn encoder_slots_built_only_when_bitrate_configured() {
        let mut cfg = camera("front", SensorKind::Imx214, 0, None);
        cfg.small_video = StreamConfig {
            enabled: true,
            width: 32,
            height: 16,
            bitrate_bps: Some(1_000_000),
        };
        cfg.large_video = StreamConfig {
            enabled: true,
            width: 64,
            height: 32,
            bitrate_bps: None,
        };
        let pipeline = CameraPipeline::new(cfg, hal(), None, false).unwrap();
        assert!(pipeline.shared.encoders.contains_key(&StreamKind::SmallVideo));
        assert!(!pipeline.shared.encoders.contains_key(&StreamKind::LargeVideo));
    }

    #[test]
    fn depth_pipeline_built_only_for_depth_sensor_with_preview_enabled() {
        let cfg = camera("tof", SensorKind::PmdTof, 4, None);
        let pipeline = CameraPipeline::new(cfg, hal(), None, false).unwrap();
        assert!(pipeline.shared.depth.is_some());

        let mut no_preview = camera("tof2", SensorKind::PmdTof, 5, None);
        no_preview.preview.enabled = false;
        let pipeline2 = CameraPipeline::new(no_preview, hal(), None, false).unwrap();
        assert!(pipeline2.shared.depth.is_none());
    }

    #[test]
    fn buffer_pool_invariant_holds_across_a_running_pipeline() {
        let pipeline = CameraPipeline::new(camera("front", SensorKind::Ov7251, 0, None), hal(), None, false).unwrap();
        let preview_pool = pipeline.shared.pools.get(&StreamKind::Preview).unwrap();
        assert_eq!(preview_pool.free_count(), BUFFERS_PER_STREAM);

        pipeline.start().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(100));

        // every buffer the request loop acquired for a frame that has
        // finished processing must have made it back to the free set: no
        // outstanding entries should accumulate past what is genuinely
        // in-flight, and nothing should be left stuck once requests have had
        // time to round-trip through the mock HAL.
        assert_eq!(
            preview_pool.free_count() + preview_pool.outstanding_count(),
            BUFFERS_PER_STREAM,
            "free + outstanding must always equal the configured pool size"
        );
        assert_eq!(
            preview_pool.free_count(),
            BUFFERS_PER_STREAM,
            "buffers must be released back to the pool once processed"
        );

        pipeline.stop();
        assert!(
            pipeline.shared.outstanding.lock().unwrap().is_empty(),
            "no buffer should remain tracked as outstanding after a graceful stop"
        );
    }

    #[test]
    fn start_and_stop_round_trip_with_encoder_and_depth() {
        let mut color_cfg = camera("color", SensorKind::Imx214, 2, None);
        color_cfg.small_video = StreamConfig {
            enabled: true,
            width: 32,
            height: 16,
            bitrate_bps: Some(2_000_000),
        };
        let pipeline = CameraPipeline::new(color_cfg, hal(), None, false).unwrap();
        pipeline.start().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(50));
        pipeline.stop();
        assert_eq!(pipeline.state(), PipelineState::Stopped);
    }
}
