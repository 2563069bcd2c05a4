// SPDX-License-Identifier: GPL-3.0-only

//! Top-level server: owns every configured camera's pipeline, installs the
//! signal handler, and propagates emergency-stop across the whole process.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{error, info};

use crate::config::ServerConfig;
use crate::errors::ServerError;
use crate::hal::mock::{MockHal, MockHalOptions};
use crate::pipeline::CameraPipeline;
use crate::stereo::StereoRendezvous;

/// Find the first pipeline that either raised its emergency-stop flag or
/// fell into `Stopped` on its own (a worker thread exited unexpectedly).
/// Either case is fatal per §7 and must tear down the whole server.
fn find_failed_pipeline(pipelines: &HashMap<String, Arc<CameraPipeline>>) -> Option<String> {
    for (name, pipeline) in pipelines {
        if pipeline.emergency_stop_requested() || matches!(pipeline.state(), crate::pipeline::PipelineState::Stopped) {
            return Some(name.clone());
        }
    }
    None
}

/// Owns every camera pipeline for one server process.
pub struct Server {
    pipelines: HashMap<String, Arc<CameraPipeline>>,
    stop_requested: Arc<AtomicBool>,
}

impl Server {
    /// Build (but do not start) every configured pipeline.
    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        let mut pipelines = HashMap::new();

        // Build every stereo rendezvous up front, keyed by the slave's
        // camera_id, so pairing does not depend on the master appearing
        // before its slave in the config file.
        let mut rendezvous_by_slave: HashMap<i32, Arc<StereoRendezvous>> = HashMap::new();
        for camera in &config.cameras {
            if camera.enabled && camera.is_stereo_master() {
                let max_skew = crate::constants::stereo::max_skew_ns(camera.frame_rate);
                let rendezvous = Arc::new(StereoRendezvous::new(max_skew));
                rendezvous_by_slave.insert(camera.camera_id_second.unwrap(), rendezvous);
            }
        }

        for camera in &config.cameras {
            if !camera.enabled {
                continue;
            }

            let stereo = if camera.is_stereo_master() {
                rendezvous_by_slave.get(&camera.camera_id_second.unwrap()).cloned()
            } else {
                rendezvous_by_slave.get(&camera.camera_id).cloned()
            };
            let is_slave = stereo.is_some() && !camera.is_stereo_master();

            let hal = Box::new(MockHal::new(MockHalOptions {
                frame_rate: camera.frame_rate,
                fail_after: None,
            }));

            let pipeline = CameraPipeline::new(camera.clone(), hal, stereo, is_slave)
                .map_err(ServerError::Pipeline)?;
            pipelines.insert(camera.name.clone(), Arc::new(pipeline));
        }

        Ok(Self {
            pipelines,
            stop_requested: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Start every pipeline and install the `ctrlc` signal handler that
    /// flips the cooperative stop flag.
    pub fn run(&self) -> Result<(), ServerError> {
        for (name, pipeline) in &self.pipelines {
            info!(camera = %name, "starting pipeline");
            pipeline.start().map_err(ServerError::Pipeline)?;
        }

        let stop_requested = self.stop_requested.clone();
        ctrlc::set_handler(move || {
            stop_requested.store(true, Ordering::SeqCst);
        })
        .map_err(|e| ServerError::Other(format!("failed to install signal handler: {e}")))?;

        let mut emergency: Option<String> = None;
        while !self.stop_requested.load(Ordering::SeqCst) && emergency.is_none() {
            emergency = find_failed_pipeline(&self.pipelines);
            if let Some(name) = &emergency {
                error!(camera = %name, "pipeline raised emergency stop; shutting down server");
            } else {
                std::thread::sleep(std::time::Duration::from_millis(200));
            }
        }

        // A fatal HAL error on one camera is not locally recoverable (§7):
        // propagate emergency-stop to every other pipeline before joining,
        // rather than only tearing down the one that raised it.
        if let Some(name) = &emergency {
            for pipeline in self.pipelines.values() {
                pipeline.emergency_stop();
            }
            return Err(ServerError::Other(format!(
                "camera {name} triggered an emergency stop; server exiting"
            )));
        }

        self.shutdown();
        Ok(())
    }

    /// Stop every pipeline and join their worker threads.
    pub fn shutdown(&self) {
        for (name, pipeline) in &self.pipelines {
            info!(camera = %name, "stopping pipeline");
            pipeline.stop();
        }
    }

    pub fn pipeline_names(&self) -> Vec<&str> {
        self.pipelines.keys().map(String::as_str).collect()
    }

    /// Route one control-channel line (§4.9) to the named camera's pipeline.
    /// Unknown camera names are logged and ignored, the same log-and-ignore
    /// policy the line parser itself uses for malformed commands.
    pub fn submit_control_command(&self, camera: &str, line: &str) {
        match self.pipelines.get(camera) {
            Some(pipeline) => pipeline.submit_control_command(line),
            None => tracing::warn!(camera, line, "control command for unknown camera"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AeConfig, CameraConfig, SensorKind, StreamConfig};

    fn minimal_config() -> ServerConfig {
        ServerConfig {
            cameras: vec![CameraConfig {
                name: "tracking".to_string(),
                sensor_kind: SensorKind::Ov7251,
                camera_id: 0,
                camera_id_second: None,
                enabled: true,
                frame_rate: 30,
                preview: StreamConfig {
                    enabled: true,
                    width: 64,
                    height: 48,
                    bitrate_bps: None,
                },
                small_video: StreamConfig::default(),
                large_video: StreamConfig::default(),
                snapshot: StreamConfig::default(),
                ae: AeConfig::default(),
                independent_exposure: false,
                standby_enabled: false,
                decimator: 1,
            }],
        }
    }

    #[test]
    fn builds_one_pipeline_per_enabled_camera() {
        let server = Server::new(minimal_config()).unwrap();
        assert_eq!(server.pipeline_names(), vec!["tracking"]);
    }

    #[test]
    fn submit_control_command_routes_to_named_camera() {
        let server = Server::new(minimal_config()).unwrap();
        server.submit_control_command("tracking", "set_exp_gain 8 2.0");
        let pipeline = server.pipelines.get("tracking").unwrap();
        assert_eq!(pipeline.shared().exposure.exposure_ns(), 8_000_000);
    }

    #[test]
    fn submit_control_command_ignores_unknown_camera() {
        let server = Server::new(minimal_config()).unwrap();
        // must not panic even though "nonexistent" has no pipeline.
        server.submit_control_command("nonexistent", "start_ae");
    }

    #[test]
    fn start_and_shutdown_round_trip() {
        let server = Server::new(minimal_config()).unwrap();
        for pipeline in server.pipelines.values() {
            pipeline.start().unwrap();
        }
        std::thread::sleep(std::time::Duration::from_millis(50));
        server.shutdown();
        for pipeline in server.pipelines.values() {
            assert_eq!(pipeline.state(), crate::pipeline::PipelineState::Stopped);
        }
    }

    #[test]
    fn find_failed_pipeline_is_none_while_everything_is_healthy() {
        let server = Server::new(minimal_config()).unwrap();
        for pipeline in server.pipelines.values() {
            pipeline.start().unwrap();
        }
        assert_eq!(find_failed_pipeline(&server.pipelines), None);
        server.shutdown();
    }

    #[test]
    fn find_failed_pipeline_detects_an_emergency_stop_on_any_camera() {
        let server = Server::new(minimal_config()).unwrap();
        for pipeline in server.pipelines.values() {
            pipeline.start().unwrap();
        }
        server.pipelines.get("tracking").unwrap().shared().signal_emergency_stop();

        assert_eq!(find_failed_pipeline(&server.pipelines), Some("tracking".to_string()));
        server.shutdown();
    }

    /// A fatal error on one camera must not leave siblings running: this
    /// exercises the same `emergency_stop()` broadcast `run()` performs,
    /// without going through `run()` itself (which installs a process-wide
    /// `ctrlc` handler that can only be registered once per test binary).
    #[test]
    fn emergency_stop_propagates_to_every_pipeline() {
        let mut two_camera_config = minimal_config();
        two_camera_config.cameras.push(CameraConfig {
            name: "second".to_string(),
            sensor_kind: SensorKind::Ov7251,
            camera_id: 1,
            camera_id_second: None,
            enabled: true,
            frame_rate: 30,
            preview: StreamConfig {
                enabled: true,
                width: 64,
                height: 48,
                bitrate_bps: None,
            },
            small_video: StreamConfig::default(),
            large_video: StreamConfig::default(),
            snapshot: StreamConfig::default(),
            ae: AeConfig::default(),
            independent_exposure: false,
            standby_enabled: false,
            decimator: 1,
        });
        let server = Server::new(two_camera_config).unwrap();
        for pipeline in server.pipelines.values() {
            pipeline.start().unwrap();
        }

        server.pipelines.get("tracking").unwrap().shared().signal_emergency_stop();
        for pipeline in server.pipelines.values() {
            pipeline.emergency_stop();
        }

        for pipeline in server.pipelines.values() {
            assert_eq!(pipeline.state(), crate::pipeline::PipelineState::Stopped);
        }
    }
}
