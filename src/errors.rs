// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the camera streaming server.

use std::fmt;

/// Result type alias using `ServerError`.
pub type ServerResult<T> = Result<T, ServerError>;

/// Top-level process error.
#[derive(Debug, Clone)]
pub enum ServerError {
    /// A pipeline failed to start or hit a fatal condition at runtime.
    Pipeline(PipelineError),
    /// The HAL rejected an open/configure/request call.
    Hal(HalError),
    /// The configuration file failed to load or validate.
    Config(ConfigError),
    /// Generic error with message.
    Other(String),
}

/// Errors local to a single camera pipeline.
#[derive(Debug, Clone)]
pub enum PipelineError {
    /// Stream configuration was rejected by the HAL.
    StreamConfigFailed(String),
    /// Buffer pool could not be allocated at the configured size.
    PoolAllocationFailed { stream: String, size: usize },
    /// The encoder sink failed to initialize.
    EncoderInitFailed(String),
    /// The depth bridge failed to initialize.
    DepthBridgeInitFailed(String),
    /// A worker thread panicked or exited unexpectedly.
    WorkerFailed(String),
}

/// Errors surfaced by the camera HAL abstraction.
#[derive(Debug, Clone)]
pub enum HalError {
    /// No such camera id on this platform.
    DeviceNotFound(i32),
    /// Device-level failure; not locally recoverable, triggers emergency stop.
    DeviceError(String),
    /// A single request failed; locally recoverable.
    RequestError(String),
    /// A result/buffer callback reported an inconsistency.
    ResultError(String),
}

/// Errors from loading or validating a configuration file.
#[derive(Debug, Clone)]
pub enum ConfigError {
    /// The file could not be read.
    Io(String),
    /// The file did not parse as valid TOML.
    Parse(String),
    /// The parsed config failed semantic validation.
    Invalid(String),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerError::Pipeline(e) => write!(f, "pipeline error: {e}"),
            ServerError::Hal(e) => write!(f, "HAL error: {e}"),
            ServerError::Config(e) => write!(f, "configuration error: {e}"),
            ServerError::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::StreamConfigFailed(msg) => write!(f, "stream configuration failed: {msg}"),
            PipelineError::PoolAllocationFailed { stream, size } => {
                write!(f, "failed to allocate {size} buffers for stream {stream}")
            }
            PipelineError::EncoderInitFailed(msg) => write!(f, "encoder init failed: {msg}"),
            PipelineError::DepthBridgeInitFailed(msg) => write!(f, "depth bridge init failed: {msg}"),
            PipelineError::WorkerFailed(msg) => write!(f, "worker failed: {msg}"),
        }
    }
}

impl fmt::Display for HalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HalError::DeviceNotFound(id) => write!(f, "camera id {id} not found"),
            HalError::DeviceError(msg) => write!(f, "device error: {msg}"),
            HalError::RequestError(msg) => write!(f, "request error: {msg}"),
            HalError::ResultError(msg) => write!(f, "result error: {msg}"),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(msg) => write!(f, "could not read config file: {msg}"),
            ConfigError::Parse(msg) => write!(f, "could not parse config file: {msg}"),
            ConfigError::Invalid(msg) => write!(f, "invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for ServerError {}
impl std::error::Error for PipelineError {}
impl std::error::Error for HalError {}
impl std::error::Error for ConfigError {}

impl From<PipelineError> for ServerError {
    fn from(err: PipelineError) -> Self {
        ServerError::Pipeline(err)
    }
}

impl From<HalError> for ServerError {
    fn from(err: HalError) -> Self {
        ServerError::Hal(err)
    }
}

impl From<ConfigError> for ServerError {
    fn from(err: ConfigError) -> Self {
        ServerError::Config(err)
    }
}

impl From<String> for ServerError {
    fn from(msg: String) -> Self {
        ServerError::Other(msg)
    }
}

impl From<&str> for ServerError {
    fn from(msg: &str) -> Self {
        ServerError::Other(msg.to_string())
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err.to_string())
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}
