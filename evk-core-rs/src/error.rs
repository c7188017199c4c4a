//! Error types for the EVK kernel
//!
//! Control loops never surface these from their update step; port failures
//! are folded into `Option` readings and status enums on the published
//! outputs. Errors only escape from init, configuration and the kernel itself.

use thiserror::Error;

use crate::types::ChannelId;

/// Failure reported by a sensor or actuator port
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PortError {
    #[error("port used before init")]
    NotInitialized,

    #[error("invalid port configuration: {0}")]
    InvalidConfig(String),

    #[error("read failed on channel {channel}")]
    ReadFailed { channel: ChannelId },

    #[error("value {value:.2} out of range (max {max:.2})")]
    WriteRejected { value: f32, max: f32 },
}

/// Result type for port operations
pub type PortResult<T> = Result<T, PortError>;

/// Failure of a control loop's one-time init
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{port} init failed: {source}")]
pub struct InitError {
    pub port: &'static str,
    #[source]
    pub source: PortError,
}

impl InitError {
    pub fn new(port: &'static str, source: PortError) -> Self {
        Self { port, source }
    }

    /// The loop's own calibration was rejected before any port was touched
    pub fn calibration(err: ConfigError) -> Self {
        Self::new("calibration", PortError::InvalidConfig(err.to_string()))
    }
}

/// Configuration loading and validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Kernel lifecycle errors
#[derive(Debug, Error)]
pub enum KernelError {
    #[error("task '{name}' failed: {reason}")]
    TaskFailed { name: &'static str, reason: String },

    #[error("kernel has no control loops registered")]
    NoLoops,
}
