// SPDX-License-Identifier: GPL-3.0-only

//! Server configuration: schema, defaults, and a TOML-backed loader.
//!
//! The pipeline itself never touches this module directly — `CameraPipeline::new`
//! takes an already-parsed [`CameraConfig`]. This file is the ambient
//! convenience layer that turns a file on disk into that value.

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Sensor kind, driving default stream capabilities and the HAL driver chosen
/// at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SensorKind {
    /// Monochrome global-shutter tracking sensor.
    Ov7251,
    /// Color wide-angle sensor.
    Ov9782,
    /// Color high-resolution sensor.
    Imx214,
    Imx412,
    Imx678,
    /// Time-of-flight depth sensor.
    PmdTof,
}

impl SensorKind {
    /// Whether this sensor kind produces depth/ToF output rather than image planes.
    pub fn is_depth(&self) -> bool {
        matches!(self, SensorKind::PmdTof)
    }

    /// Whether this sensor kind produces a color (not monochrome) preview.
    pub fn is_color(&self) -> bool {
        matches!(
            self,
            SensorKind::Ov9782 | SensorKind::Imx214 | SensorKind::Imx412 | SensorKind::Imx678
        )
    }
}

/// Software/ISP auto-exposure mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AeMode {
    Off,
    Isp,
    LmeHist,
    LmeMsv,
}

fn default_ae_mode() -> AeMode {
    AeMode::Off
}

/// Tuning parameters for the software AE algorithms. Fields unused by the
/// selected [`AeMode`] are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AeConfig {
    #[serde(default = "default_ae_mode")]
    pub mode: AeMode,
    #[serde(default = "default_exposure_min_ns")]
    pub exposure_min_ns: u64,
    #[serde(default = "default_exposure_max_ns")]
    pub exposure_max_ns: u64,
    #[serde(default = "default_gain_min")]
    pub gain_min: f32,
    #[serde(default = "default_gain_max")]
    pub gain_max: f32,
    #[serde(default = "default_desired_msv")]
    pub desired_msv: f32,
    #[serde(default = "default_k_p")]
    pub k_p: f32,
    #[serde(default = "default_k_i")]
    pub k_i: f32,
    #[serde(default = "default_max_i")]
    pub max_i: f32,
    /// Frames between exposure updates. The histogram algorithm uses this as
    /// its single update period; the MSV algorithm tracks it separately from
    /// `gain_update_period_frames`.
    #[serde(default = "default_exposure_update_period_frames")]
    pub exposure_update_period_frames: u32,
    /// Frames between gain updates (MSV only; the histogram algorithm moves
    /// exposure and gain together on `exposure_update_period_frames`).
    #[serde(default = "default_gain_update_period_frames")]
    pub gain_update_period_frames: u32,
}

fn default_exposure_min_ns() -> u64 {
    100_000
}
fn default_exposure_max_ns() -> u64 {
    33_000_000
}
fn default_gain_min() -> f32 {
    1.0
}
fn default_gain_max() -> f32 {
    8.0
}
fn default_desired_msv() -> f32 {
    0.5
}
fn default_k_p() -> f32 {
    0.05
}
fn default_k_i() -> f32 {
    0.01
}
fn default_max_i() -> f32 {
    2.0
}
fn default_exposure_update_period_frames() -> u32 {
    1
}
fn default_gain_update_period_frames() -> u32 {
    1
}

impl Default for AeConfig {
    fn default() -> Self {
        Self {
            mode: default_ae_mode(),
            exposure_min_ns: default_exposure_min_ns(),
            exposure_max_ns: default_exposure_max_ns(),
            gain_min: default_gain_min(),
            gain_max: default_gain_max(),
            desired_msv: default_desired_msv(),
            k_p: default_k_p(),
            k_i: default_k_i(),
            max_i: default_max_i(),
            exposure_update_period_frames: default_exposure_update_period_frames(),
            gain_update_period_frames: default_gain_update_period_frames(),
        }
    }
}

/// One enableable stream within a camera (preview, small video, large video,
/// snapshot).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    /// Target bitrate in bits/sec; only meaningful for video streams.
    #[serde(default)]
    pub bitrate_bps: Option<u32>,
}

fn default_width() -> u32 {
    640
}
fn default_height() -> u32 {
    480
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            width: default_width(),
            height: default_height(),
            bitrate_bps: None,
        }
    }
}

/// Configuration for a single camera pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub sensor_kind: SensorKind,
    pub camera_id: i32,
    #[serde(default)]
    pub camera_id_second: Option<i32>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_frame_rate")]
    pub frame_rate: u32,
    #[serde(default)]
    pub preview: StreamConfig,
    #[serde(default)]
    pub small_video: StreamConfig,
    #[serde(default)]
    pub large_video: StreamConfig,
    #[serde(default)]
    pub snapshot: StreamConfig,
    #[serde(default)]
    pub ae: AeConfig,
    #[serde(default)]
    pub independent_exposure: bool,
    #[serde(default)]
    pub standby_enabled: bool,
    #[serde(default = "default_decimator")]
    pub decimator: u32,
}

fn default_enabled() -> bool {
    true
}
fn default_frame_rate() -> u32 {
    30
}
fn default_decimator() -> u32 {
    1
}

impl CameraConfig {
    /// Whether this camera is a stereo master (a second sensor id is paired to it).
    pub fn is_stereo_master(&self) -> bool {
        self.camera_id_second.is_some()
    }
}

/// Top-level server configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServerConfig {
    #[serde(default)]
    pub cameras: Vec<CameraConfig>,
}

impl ServerConfig {
    /// Load and validate a configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: ServerConfig = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Semantic validation beyond what serde's types already enforce.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cameras.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one camera must be configured".to_string(),
            ));
        }

        let mut seen_names = std::collections::HashSet::new();
        for cam in &self.cameras {
            if cam.name.is_empty() {
                return Err(ConfigError::Invalid("camera name must not be empty".to_string()));
            }
            if !seen_names.insert(cam.name.clone()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate camera name: {}",
                    cam.name
                )));
            }
            if cam.frame_rate == 0 {
                return Err(ConfigError::Invalid(format!(
                    "camera {}: frame_rate must be positive",
                    cam.name
                )));
            }
            if cam.decimator == 0 {
                return Err(ConfigError::Invalid(format!(
                    "camera {}: decimator must be positive",
                    cam.name
                )));
            }
            if cam.sensor_kind.is_depth() && cam.camera_id_second.is_some() {
                return Err(ConfigError::Invalid(format!(
                    "camera {}: depth sensors cannot be a stereo master",
                    cam.name
                )));
            }
            if cam.ae.exposure_min_ns >= cam.ae.exposure_max_ns {
                return Err(ConfigError::Invalid(format!(
                    "camera {}: exposure_min_ns must be less than exposure_max_ns",
                    cam.name
                )));
            }
            if cam.ae.gain_min >= cam.ae.gain_max {
                return Err(ConfigError::Invalid(format!(
                    "camera {}: gain_min must be less than gain_max",
                    cam.name
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_camera_list() {
        let config = ServerConfig::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_duplicate_names() {
        let cam = |name: &str| CameraConfig {
            name: name.to_string(),
            sensor_kind: SensorKind::Ov7251,
            camera_id: 0,
            camera_id_second: None,
            enabled: true,
            frame_rate: 30,
            preview: StreamConfig::default(),
            small_video: StreamConfig::default(),
            large_video: StreamConfig::default(),
            snapshot: StreamConfig::default(),
            ae: AeConfig::default(),
            independent_exposure: false,
            standby_enabled: false,
            decimator: 1,
        };
        let config = ServerConfig {
            cameras: vec![cam("front"), cam("front")],
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn depth_master_rejected() {
        let cam = CameraConfig {
            name: "tof".to_string(),
            sensor_kind: SensorKind::PmdTof,
            camera_id: 4,
            camera_id_second: Some(5),
            enabled: true,
            frame_rate: 5,
            preview: StreamConfig::default(),
            small_video: StreamConfig::default(),
            large_video: StreamConfig::default(),
            snapshot: StreamConfig::default(),
            ae: AeConfig::default(),
            independent_exposure: false,
            standby_enabled: true,
            decimator: 5,
        };
        let config = ServerConfig { cameras: vec![cam] };
        assert!(config.validate().is_err());
    }

    #[test]
    fn loads_minimal_toml() {
        let toml_text = r#"
            [[cameras]]
            name = "tracking"
            type = "ov7251"
            camera_id = 0

            [cameras.preview]
            enabled = true
            width = 640
            height = 480
        "#;
        let config: ServerConfig = toml::from_str(toml_text).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.cameras[0].frame_rate, 30);
        assert_eq!(config.cameras[0].ae.mode, AeMode::Off);
    }
}
