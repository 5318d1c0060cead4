//! audiohal-core: cross-platform audio hardware abstraction
//!
//! Enumerates audio devices from every native audio service on the host,
//! describes their streams and formats in one data model, and runs
//! callback-driven playback/recording sessions on dedicated I/O threads.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────── Context ─────────────────────────────┐
//! │                                                                   │
//! │  DeviceRegistry ──► DeviceSnapshot ──► Device ──► DeviceStream    │
//! │        │                                              │           │
//! │        │ enumerate()                  AudioFormatDescription      │
//! │        ▼                                                          │
//! │  [AudioBackend] ◄── open() ── StreamingEngine ── DefaultDevice    │
//! │   CpalBackend                   │  one I/O thread    Manager      │
//! │   MemoryBackend                 │  per session                    │
//! └─────────────────────────────────┼─────────────────────────────────┘
//!                                   ▼
//!                         caller's playback / recording callback
//! ```
//!
//! # Modules
//!
//! - [`model`]: devices, streams, formats and snapshots
//! - [`registry`]: builds snapshots from the backends
//! - [`defaults`]: default devices and direction-support queries
//! - [`engine`]: session start/stop and buffer exchange
//! - [`backend`]: the native backend interface and its implementations
//! - [`context`]: initialize/terminate and log level
//! - [`config`]: YAML configuration

pub mod backend;
pub mod config;
pub mod context;
pub mod defaults;
pub mod engine;
pub mod error;
pub mod model;
pub mod print;
pub mod registry;

pub use config::{default_config_path, load_config, save_config, HalConfig, LogLevel};
pub use context::{set_log_level, Context, LifecycleState};
pub use defaults::{supports_direction, DefaultDeviceManager};
pub use engine::{FormatRequest, SessionInfo, SessionState, StreamFormat, StreamingEngine};
pub use error::{HalError, HalResult};
pub use model::{
    free, AudioFormatDescription, AudioFormatId, Device, DeviceSnapshot, DeviceStream, Direction,
    FormatFlags, SampleRateRange,
};
pub use print::{print_device, print_format, print_snapshot, print_stream};
pub use registry::DeviceRegistry;

/// Library name used in the version string
pub const LIBRARY_NAME: &str = "audiohal";

pub const VERSION_MAJOR: u8 = 1;
pub const VERSION_MINOR: u8 = 0;

/// Version encoded as `(major << 8) | minor`
pub fn get_version() -> u16 {
    (u16::from(VERSION_MAJOR) << 8) | u16::from(VERSION_MINOR)
}

/// Version as text, e.g. `audiohal v01.00`
pub fn get_version_string() -> String {
    format!("{} v{:02}.{:02}", LIBRARY_NAME, VERSION_MAJOR, VERSION_MINOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(get_version(), 256);
        assert_eq!(get_version() >> 8, 1);
        assert_eq!(get_version() & 0xFF, 0);
        assert_eq!(get_version_string(), "audiohal v01.00");
    }
}
