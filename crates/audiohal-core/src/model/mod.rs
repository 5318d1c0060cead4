//! Device, stream and format data model
//!
//! ```text
//! DeviceSnapshot
//!   └── Device ─────────── supported_sample_rates: [SampleRateRange]
//!         └── DeviceStream (Input | Output)
//!               ├── preferred_format
//!               └── supported_formats: [AudioFormatDescription]
//! ```

mod device;
mod format;
mod snapshot;

pub use device::{Device, DeviceActivity, DeviceStream, Direction, Handle};
pub use format::{
    AudioFormatDescription, AudioFormatId, FormatFlags, SampleRateRange, VALID_BIT_DEPTHS,
};
pub(crate) use format::validate_layout;
pub use snapshot::{free, DeviceSnapshot};
