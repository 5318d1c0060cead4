//! Error types for device enumeration and streaming
//!
//! The public façade (`Context`, `DefaultDeviceManager`, `StreamingEngine`)
//! reports failures as `false` / `None` and logs the underlying `HalError`.
//! Backends and internal helpers propagate `HalResult` with `?`.

use thiserror::Error;

use crate::model::Direction;

/// Errors that can occur inside the abstraction layer
#[derive(Error, Debug)]
pub enum HalError {
    /// Direction code outside {Output = 0, Input = 1}
    #[error("Invalid direction code: {0}")]
    InvalidDirection(i64),

    /// Format request or description is malformed
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// Format is well-formed but the device/backend cannot use it
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Device has no stream in the requested direction
    #[error("Device '{device}' has no {direction} stream")]
    UnsupportedDirection { device: String, direction: Direction },

    /// Device not found in the backend
    #[error("Audio device not found: {0}")]
    DeviceNotFound(String),

    /// Backend named by a device is not registered
    #[error("Audio backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Backend failed to list its devices
    #[error("Failed to enumerate devices: {0}")]
    Enumeration(String),

    /// Failed to build a native stream
    #[error("Failed to build audio stream: {0}")]
    StreamBuild(String),

    /// Failed to start a native stream
    #[error("Failed to start audio stream: {0}")]
    StreamPlay(String),

    /// Error reported by a running stream
    #[error("Audio stream error: {0}")]
    Stream(String),

    /// The device stopped moving data
    #[error("Audio stream stalled for {0} ms")]
    Stall(u64),

    /// A session is already active for this device and direction
    #[error("Session already active: {device} ({direction})")]
    SessionActive { device: String, direction: Direction },

    /// The session was stopped before it finished starting
    #[error("{direction} session on '{device}' was stopped while starting")]
    StartCancelled { device: String, direction: Direction },

    /// Failed to spawn the session I/O thread
    #[error("Failed to spawn I/O thread: {0}")]
    ThreadSpawn(String),

    /// Failed to read or parse configuration
    #[error("Config error: {0}")]
    Config(String),
}

/// Result type for audiohal operations
pub type HalResult<T> = Result<T, HalError>;
