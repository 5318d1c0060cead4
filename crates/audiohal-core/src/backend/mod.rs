//! Native audio backends
//!
//! A backend adapts one native audio service to the layer's data model:
//!
//! ```text
//!   DeviceRegistry ──enumerate()──► AudioBackend ──► Vec<RawDevice>
//!   Session thread ──open()───────► AudioBackend ──► Box<dyn BackendStream>
//!                                                      │ read / write / close
//!                                                      ▼
//!                                               native service
//! ```
//!
//! - **CpalBackend**: one instance per available cpal host (ALSA, JACK,
//!   PulseAudio, WASAPI, CoreAudio...). cpal picks the hosts at build time.
//! - **MemoryBackend**: virtual devices with generated input and captured
//!   output, used by tests and by headless tooling.
//!
//! Streams are opened on the session's I/O thread and never leave it, so
//! `BackendStream` does not need to be `Send`.

mod cpal_backend;
mod memory;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub use cpal_backend::CpalBackend;
pub use memory::{pattern_byte, MemoryBackend, MemoryDevice};

use crate::config::HalConfig;
use crate::engine::StreamFormat;
use crate::error::HalResult;
use crate::model::{AudioFormatDescription, Direction, SampleRateRange};

/// Device as reported by a backend, before the registry assigns handles
#[derive(Debug, Clone, Default)]
pub struct RawDevice {
    /// Identifier the backend resolves again in `open`
    pub native_id: String,
    pub name: String,
    pub model: Option<String>,
    pub manufacturer: Option<String>,
    pub serial_number: Option<String>,
    pub version: Option<String>,
    pub model_uid: Option<String>,
    pub preferred_sample_rate: f64,
    pub preferred_channels: u32,
    pub is_alive: bool,
    pub sample_rates: Vec<SampleRateRange>,
    pub streams: Vec<RawStream>,
}

/// Stream as reported by a backend
#[derive(Debug, Clone)]
pub struct RawStream {
    pub direction: Direction,
    pub preferred_format: Option<AudioFormatDescription>,
    pub formats: Vec<AudioFormatDescription>,
}

/// Everything a backend needs to open a native stream
#[derive(Debug, Clone)]
pub struct OpenRequest {
    pub native_id: String,
    /// Device name, for log messages
    pub device_name: String,
    pub direction: Direction,
    pub format: StreamFormat,
    /// Bytes exchanged per `read`/`write` call
    pub buffer_bytes: usize,
    /// Buffers the backend may queue ahead
    pub buffer_count: usize,
    pub stall_timeout: Duration,
    /// Raised when the session is stopping; blocking waits return early
    pub cancel: Arc<AtomicBool>,
}

impl OpenRequest {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }
}

/// A native audio service
pub trait AudioBackend: Send + Sync {
    /// Display name, also stored as `Device::host`
    fn name(&self) -> &str;

    /// List every device this backend can see
    fn enumerate(&self) -> HalResult<Vec<RawDevice>>;

    /// Open a stream on one device in one direction
    fn open(&self, request: &OpenRequest) -> HalResult<Box<dyn BackendStream>>;
}

/// An open native stream, driven by a session's I/O thread
pub trait BackendStream {
    /// Fill `buffer` with captured bytes, returning how many were written.
    /// Returns `Ok(0)` when the session was cancelled while waiting.
    fn read(&mut self, buffer: &mut [u8]) -> HalResult<usize>;

    /// Queue `buffer` for playback, blocking while the queue is full
    fn write(&mut self, buffer: &[u8]) -> HalResult<()>;

    /// Stop the native stream and release it
    fn close(&mut self) -> HalResult<()>;
}

/// Build the platform backends selected by `config`
pub fn create_backends(config: &HalConfig) -> Vec<Arc<dyn AudioBackend>> {
    let backends: Vec<Arc<dyn AudioBackend>> = CpalBackend::available(config)
        .into_iter()
        .map(|b| Arc::new(b) as Arc<dyn AudioBackend>)
        .collect();

    let names: Vec<&str> = backends.iter().map(|b| b.name()).collect();
    log::info!("Audio backends: [{}]", names.join(", "));
    backends
}
