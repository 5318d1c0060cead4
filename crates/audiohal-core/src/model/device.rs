//! Devices, their streams and direction codes

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use super::format::{AudioFormatDescription, SampleRateRange};
use crate::error::HalError;

/// Handle of a device or stream, unique within one snapshot
pub type Handle = u32;

/// Whether a stream carries data out of (Output) or into (Input) the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Direction {
    /// Playback
    Output = 0,
    /// Recording
    Input = 1,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::Output, Direction::Input];

    /// Numeric direction code
    pub fn code(self) -> u32 {
        self as u32
    }

    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Output => f.write_str("output"),
            Direction::Input => f.write_str("input"),
        }
    }
}

impl TryFrom<u32> for Direction {
    type Error = HalError;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Direction::Output),
            1 => Ok(Direction::Input),
            other => Err(HalError::InvalidDirection(i64::from(other))),
        }
    }
}

impl TryFrom<i32> for Direction {
    type Error = HalError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        u32::try_from(code)
            .map_err(|_| HalError::InvalidDirection(i64::from(code)))
            .and_then(Direction::try_from)
    }
}

/// Which directions of a device currently have an active session
///
/// One cell exists per physical device and is shared by every snapshot
/// that contains it, so `is_running` stays truthful across snapshots.
#[derive(Debug, Default)]
pub struct DeviceActivity {
    directions: AtomicU8,
}

impl DeviceActivity {
    pub(crate) fn set(&self, direction: Direction, active: bool) {
        if active {
            self.directions.fetch_or(direction.bit(), Ordering::AcqRel);
        } else {
            self.directions.fetch_and(!direction.bit(), Ordering::AcqRel);
        }
    }

    pub fn is_active(&self, direction: Direction) -> bool {
        self.directions.load(Ordering::Acquire) & direction.bit() != 0
    }

    pub fn any(&self) -> bool {
        self.directions.load(Ordering::Acquire) != 0
    }
}

/// One direction-bound data path of a device
#[derive(Debug, Clone)]
pub struct DeviceStream {
    pub handle: Handle,
    pub direction: Direction,
    pub preferred_format: AudioFormatDescription,
    pub supported_formats: Vec<AudioFormatDescription>,
}

impl DeviceStream {
    /// Supported format at `index`, `None` past the end
    pub fn format(&self, index: usize) -> Option<&AudioFormatDescription> {
        self.supported_formats.get(index)
    }
}

/// An audio endpoint as seen at enumeration time
#[derive(Debug, Clone)]
pub struct Device {
    pub handle: Handle,
    pub device_name: String,
    pub model: Option<String>,
    pub manufacturer: Option<String>,
    pub serial_number: Option<String>,
    pub version: Option<String>,
    /// Stable identifier: `<host>:<native id>`
    pub device_uid: String,
    pub model_uid: Option<String>,
    pub preferred_sample_rate: f64,
    pub preferred_number_of_channels: u32,
    pub is_alive: bool,
    pub supported_sample_rates: Vec<SampleRateRange>,
    pub device_streams: Vec<DeviceStream>,
    /// Backend (host) that reported this device
    pub host: String,
    pub(crate) native_id: String,
    pub(crate) activity: Arc<DeviceActivity>,
}

impl Device {
    /// True while any session targets this device
    pub fn is_running(&self) -> bool {
        self.activity.any()
    }

    /// True while a session in `direction` targets this device
    pub fn is_running_in(&self, direction: Direction) -> bool {
        self.activity.is_active(direction)
    }

    /// Identifier the owning backend uses for this device
    pub fn native_id(&self) -> &str {
        &self.native_id
    }

    /// Stream at `index`, `None` past the end
    pub fn stream(&self, index: usize) -> Option<&DeviceStream> {
        self.device_streams.get(index)
    }

    /// Sample rate range at `index`, `None` past the end
    pub fn sample_rate_range(&self, index: usize) -> Option<&SampleRateRange> {
        self.supported_sample_rates.get(index)
    }

    /// First stream carrying data in `direction`
    pub fn stream_for(&self, direction: Direction) -> Option<&DeviceStream> {
        self.device_streams.iter().find(|s| s.direction == direction)
    }

    pub fn supports_direction(&self, direction: Direction) -> bool {
        self.stream_for(direction).is_some()
    }
}
