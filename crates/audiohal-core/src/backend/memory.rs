//! In-memory backend
//!
//! Virtual devices that never touch audio hardware:
//!
//! - Input streams produce a deterministic byte sequence (see `pattern_byte`),
//!   continuing across reads and across sessions of the same device.
//! - Output streams append everything written to a per-device capture
//!   buffer, readable through `MemoryBackend::captured`.
//! - Faults can be injected per device: refuse to open, fail after a number
//!   of exchanged buffers, or take a while to open or close. The whole
//!   backend can refuse to enumerate.
//!
//! Streams are paced in real time: each exchanged buffer takes as long as
//! the audio it carries, so a playback session captures at the rate a real
//! device would consume. `unpaced` lifts that for tests that only look at
//! a few buffers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use super::{AudioBackend, BackendStream, OpenRequest, RawDevice, RawStream};
use crate::error::{HalError, HalResult};
use crate::model::{AudioFormatDescription, Direction, FormatFlags, SampleRateRange};

/// Byte produced by memory input streams at absolute `offset`
pub fn pattern_byte(offset: u64) -> u8 {
    (offset % 251) as u8
}

/// Configuration of one virtual device
#[derive(Debug, Clone)]
pub struct MemoryDevice {
    name: String,
    input: bool,
    output: bool,
    formats: Vec<AudioFormatDescription>,
    fail_open: bool,
    fail_after: Option<usize>,
    open_delay: Duration,
    close_delay: Duration,
}

impl MemoryDevice {
    fn new(name: &str, input: bool, output: bool) -> Self {
        Self {
            name: name.to_string(),
            input,
            output,
            formats: default_formats(),
            fail_open: false,
            fail_after: None,
            open_delay: Duration::ZERO,
            close_delay: Duration::ZERO,
        }
    }

    /// Device with both an input and an output stream
    pub fn duplex(name: &str) -> Self {
        Self::new(name, true, true)
    }

    pub fn input_only(name: &str) -> Self {
        Self::new(name, true, false)
    }

    pub fn output_only(name: &str) -> Self {
        Self::new(name, false, true)
    }

    /// Replace the advertised formats (the first one is preferred)
    pub fn with_formats(mut self, formats: Vec<AudioFormatDescription>) -> Self {
        self.formats = formats;
        self
    }

    /// Every `open` on this device fails
    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    /// Streams fail once `buffers` buffers have been exchanged
    pub fn failing_after(mut self, buffers: usize) -> Self {
        self.fail_after = Some(buffers);
        self
    }

    /// `open` takes `delay` before it answers
    pub fn slow_open(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    /// `close` takes `delay` before it returns
    pub fn slow_close(mut self, delay: Duration) -> Self {
        self.close_delay = delay;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn raw(&self) -> RawDevice {
        let mut streams = Vec::new();
        for (enabled, direction) in [(self.output, Direction::Output), (self.input, Direction::Input)] {
            if enabled {
                streams.push(RawStream {
                    direction,
                    preferred_format: self.formats.first().cloned(),
                    formats: self.formats.clone(),
                });
            }
        }

        let preferred = self.formats.first();
        let mut sample_rates: Vec<SampleRateRange> = Vec::new();
        for format in &self.formats {
            if !sample_rates.contains(&format.sample_rate_range) {
                sample_rates.push(format.sample_rate_range);
            }
        }

        RawDevice {
            native_id: self.name.clone(),
            name: self.name.clone(),
            model: Some("Virtual Device".to_string()),
            manufacturer: Some("audiohal".to_string()),
            serial_number: None,
            version: Some(crate::get_version_string()),
            model_uid: Some(format!("memory:{}", self.name)),
            preferred_sample_rate: preferred
                .map(|f| f.sample_rate_range.minimum_rate().max(44100.0).min(f.sample_rate_range.maximum_rate()))
                .unwrap_or(44100.0),
            preferred_channels: preferred.map(|f| f.number_of_channels).unwrap_or(2),
            is_alive: true,
            sample_rates,
            streams,
        }
    }
}

fn default_formats() -> Vec<AudioFormatDescription> {
    let mut formats = Vec::new();
    let Ok(range) = SampleRateRange::new(8000.0, 192000.0) else {
        return formats;
    };
    for channels in [2, 1] {
        for (bits, flags) in [
            (16, FormatFlags::SIGNED_INTEGER | FormatFlags::PACKED),
            (32, FormatFlags::SIGNED_INTEGER | FormatFlags::PACKED),
            (32, FormatFlags::FLOAT | FormatFlags::PACKED),
        ] {
            if let Ok(format) = AudioFormatDescription::linear_pcm(channels, bits, range, flags) {
                formats.push(format);
            }
        }
    }
    formats
}

/// Backend made of virtual devices
pub struct MemoryBackend {
    name: String,
    devices: Vec<MemoryDevice>,
    fail_enumerate: bool,
    paced: bool,
    /// Bytes written to each output, by device name
    sinks: Mutex<HashMap<String, Arc<Mutex<Vec<u8>>>>>,
    /// Next input offset of each device, by device name
    sources: Mutex<HashMap<String, Arc<AtomicU64>>>,
    opened: AtomicUsize,
    /// Streams currently open, and the most ever open at once
    live: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl MemoryBackend {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            devices: Vec::new(),
            fail_enumerate: false,
            paced: true,
            sinks: Mutex::new(HashMap::new()),
            sources: Mutex::new(HashMap::new()),
            opened: AtomicUsize::new(0),
            live: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_device(mut self, device: MemoryDevice) -> Self {
        self.devices.push(device);
        self
    }

    /// Enumeration fails with an error
    pub fn failing_enumerate(mut self) -> Self {
        self.fail_enumerate = true;
        self
    }

    /// Exchange buffers as fast as they are asked for
    ///
    /// Playback captures grow without bound, so only use this where a
    /// session exchanges a known number of buffers.
    pub fn unpaced(mut self) -> Self {
        self.paced = false;
        self
    }

    /// Copy of everything written to the named output so far
    pub fn captured(&self, device_name: &str) -> Vec<u8> {
        match self.sinks.lock() {
            Ok(sinks) => sinks
                .get(device_name)
                .and_then(|sink| sink.lock().ok().map(|bytes| bytes.clone()))
                .unwrap_or_default(),
            Err(_) => Vec::new(),
        }
    }

    /// Discard captured output of the named device
    pub fn clear_captured(&self, device_name: &str) {
        if let Ok(sinks) = self.sinks.lock() {
            if let Some(sink) = sinks.get(device_name) {
                if let Ok(mut bytes) = sink.lock() {
                    bytes.clear();
                }
            }
        }
    }

    /// Number of streams successfully opened
    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::Relaxed)
    }

    /// Most streams that were open at the same time
    pub fn peak_open_streams(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn sink(&self, device_name: &str) -> HalResult<Arc<Mutex<Vec<u8>>>> {
        let mut sinks = self
            .sinks
            .lock()
            .map_err(|_| HalError::StreamBuild("capture table poisoned".into()))?;
        Ok(sinks.entry(device_name.to_string()).or_default().clone())
    }

    fn source(&self, device_name: &str) -> HalResult<Arc<AtomicU64>> {
        let mut sources = self
            .sources
            .lock()
            .map_err(|_| HalError::StreamBuild("source table poisoned".into()))?;
        Ok(sources.entry(device_name.to_string()).or_default().clone())
    }
}

impl AudioBackend for MemoryBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn enumerate(&self) -> HalResult<Vec<RawDevice>> {
        if self.fail_enumerate {
            return Err(HalError::Enumeration(format!("{} refused to enumerate", self.name)));
        }
        Ok(self.devices.iter().map(MemoryDevice::raw).collect())
    }

    fn open(&self, request: &OpenRequest) -> HalResult<Box<dyn BackendStream>> {
        let device = self
            .devices
            .iter()
            .find(|d| d.name == request.native_id)
            .ok_or_else(|| HalError::DeviceNotFound(request.native_id.clone()))?;

        if !device.open_delay.is_zero() {
            thread::sleep(device.open_delay);
        }
        if device.fail_open {
            return Err(HalError::StreamBuild(format!("{} refused to open", device.name)));
        }

        let supported = match request.direction {
            Direction::Input => device.input,
            Direction::Output => device.output,
        };
        if !supported {
            return Err(HalError::UnsupportedDirection {
                device: device.name.clone(),
                direction: request.direction,
            });
        }

        let format = &request.format;
        if !device.formats.iter().any(|f| {
            f.matches(format.channels, format.bit_depth, f64::from(format.sample_rate), format.flags)
        }) {
            return Err(HalError::UnsupportedFormat(format.to_string()));
        }

        let stream = MemoryStream {
            request: request.clone(),
            sink: self.sink(&device.name)?,
            source: self.source(&device.name)?,
            fail_after: device.fail_after,
            exchanged: 0,
            pace: self.paced.then(Instant::now),
            close_delay: device.close_delay,
            live: self.live.clone(),
        };
        let open_now = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(open_now, Ordering::SeqCst);
        self.opened.fetch_add(1, Ordering::Relaxed);
        log::debug!(
            "[{}] Opened {} stream on '{}' ({})",
            self.name,
            request.direction,
            device.name,
            format
        );
        Ok(Box::new(stream))
    }
}

struct MemoryStream {
    request: OpenRequest,
    sink: Arc<Mutex<Vec<u8>>>,
    source: Arc<AtomicU64>,
    fail_after: Option<usize>,
    exchanged: usize,
    /// Deadline of the next buffer when pacing
    pace: Option<Instant>,
    close_delay: Duration,
    live: Arc<AtomicUsize>,
}

impl MemoryStream {
    fn check_fault(&mut self) -> HalResult<()> {
        if let Some(limit) = self.fail_after {
            if self.exchanged >= limit {
                return Err(HalError::Stream(format!(
                    "injected failure after {} buffers",
                    limit
                )));
            }
        }
        self.exchanged += 1;
        Ok(())
    }

    /// Sleep until this buffer's slot; false if cancelled meanwhile
    fn wait_for_slot(&mut self, bytes: usize) -> bool {
        let Some(deadline) = self.pace else {
            return !self.request.is_cancelled();
        };
        while Instant::now() < deadline {
            if self.request.is_cancelled() {
                return false;
            }
            thread::sleep(Duration::from_millis(1).min(deadline.saturating_duration_since(Instant::now())));
        }
        self.pace = Some(deadline + self.request.format.duration_of(bytes));
        !self.request.is_cancelled()
    }
}

impl BackendStream for MemoryStream {
    fn read(&mut self, buffer: &mut [u8]) -> HalResult<usize> {
        if !self.wait_for_slot(buffer.len()) {
            return Ok(0);
        }
        self.check_fault()?;
        let start = self.source.fetch_add(buffer.len() as u64, Ordering::Relaxed);
        for (i, byte) in buffer.iter_mut().enumerate() {
            *byte = pattern_byte(start + i as u64);
        }
        Ok(buffer.len())
    }

    fn write(&mut self, buffer: &[u8]) -> HalResult<()> {
        if !self.wait_for_slot(buffer.len()) {
            return Ok(());
        }
        self.check_fault()?;
        let mut sink = self
            .sink
            .lock()
            .map_err(|_| HalError::Stream("capture buffer poisoned".into()))?;
        sink.extend_from_slice(buffer);
        Ok(())
    }

    fn close(&mut self) -> HalResult<()> {
        if !self.close_delay.is_zero() {
            thread::sleep(self.close_delay);
        }
        log::debug!(
            "Closed {} stream on '{}' after {} buffers",
            self.request.direction,
            self.request.device_name,
            self.exchanged
        );
        Ok(())
    }
}

impl Drop for MemoryStream {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::StreamFormat;
    use crate::model::AudioFormatId;
    use std::sync::atomic::AtomicBool;

    fn request(name: &str, direction: Direction, bits: u32) -> OpenRequest {
        OpenRequest {
            native_id: name.to_string(),
            device_name: name.to_string(),
            direction,
            format: StreamFormat {
                format_id: AudioFormatId::LinearPcm,
                channels: 2,
                sample_rate: 44100,
                bit_depth: bits,
                flags: FormatFlags::SIGNED_INTEGER | FormatFlags::PACKED,
            },
            buffer_bytes: 64,
            buffer_count: 3,
            stall_timeout: Duration::from_millis(500),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    #[test]
    fn test_enumerate_reports_directions() {
        let backend = MemoryBackend::new("Memory")
            .with_device(MemoryDevice::duplex("Loopback"))
            .with_device(MemoryDevice::input_only("Mic"));
        let devices = backend.enumerate().unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].streams.len(), 2);
        assert_eq!(devices[1].streams.len(), 1);
        assert_eq!(devices[1].streams[0].direction, Direction::Input);
    }

    #[test]
    fn test_input_pattern_continues_across_reads() {
        let backend = MemoryBackend::new("Memory").with_device(MemoryDevice::duplex("Loopback"));
        let mut stream = backend.open(&request("Loopback", Direction::Input, 16)).unwrap();
        let mut first = vec![0u8; 300];
        let mut second = vec![0u8; 300];
        assert_eq!(stream.read(&mut first).unwrap(), 300);
        assert_eq!(stream.read(&mut second).unwrap(), 300);
        assert_eq!(first[250], 250);
        assert_eq!(first[251], 0);
        assert_eq!(second[0], pattern_byte(300));
    }

    #[test]
    fn test_output_is_captured() {
        let backend = MemoryBackend::new("Memory").with_device(MemoryDevice::output_only("Speakers"));
        let mut stream = backend.open(&request("Speakers", Direction::Output, 16)).unwrap();
        stream.write(&[1, 2, 3]).unwrap();
        stream.write(&[4]).unwrap();
        stream.close().unwrap();
        assert_eq!(backend.captured("Speakers"), vec![1, 2, 3, 4]);
        backend.clear_captured("Speakers");
        assert!(backend.captured("Speakers").is_empty());
    }

    #[test]
    fn test_open_rejections() {
        let backend = MemoryBackend::new("Memory")
            .with_device(MemoryDevice::output_only("Speakers"))
            .with_device(MemoryDevice::duplex("Broken").failing_open());

        assert!(matches!(
            backend.open(&request("Speakers", Direction::Input, 16)),
            Err(HalError::UnsupportedDirection { .. })
        ));
        assert!(matches!(
            backend.open(&request("Speakers", Direction::Output, 8)),
            Err(HalError::UnsupportedFormat(_))
        ));
        assert!(matches!(
            backend.open(&request("Broken", Direction::Output, 16)),
            Err(HalError::StreamBuild(_))
        ));
        assert!(matches!(
            backend.open(&request("Missing", Direction::Output, 16)),
            Err(HalError::DeviceNotFound(_))
        ));
        assert_eq!(backend.open_count(), 0);
    }

    #[test]
    fn test_injected_stream_failure() {
        let backend =
            MemoryBackend::new("Memory").with_device(MemoryDevice::duplex("Flaky").failing_after(2));
        let mut stream = backend.open(&request("Flaky", Direction::Output, 16)).unwrap();
        assert!(stream.write(&[0; 8]).is_ok());
        assert!(stream.write(&[0; 8]).is_ok());
        assert!(matches!(stream.write(&[0; 8]), Err(HalError::Stream(_))));
    }

    #[test]
    fn test_cancelled_read_returns_nothing() {
        let backend = MemoryBackend::new("Memory").with_device(MemoryDevice::duplex("Loopback"));
        let req = request("Loopback", Direction::Input, 16);
        req.cancel.store(true, Ordering::Relaxed);
        let mut stream = backend.open(&req).unwrap();
        let mut buf = [0u8; 64];
        assert_eq!(stream.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_playback_is_paced_by_default() {
        let backend = MemoryBackend::new("Memory").with_device(MemoryDevice::output_only("Speakers"));
        let mut stream = backend.open(&request("Speakers", Direction::Output, 16)).unwrap();
        // 441 frames of 16-bit stereo at 44.1 kHz is 10 ms of audio
        let buffer = [0u8; 1764];
        let started = Instant::now();
        for _ in 0..10 {
            stream.write(&buffer).unwrap();
        }
        assert!(started.elapsed() >= Duration::from_millis(90));
        assert_eq!(backend.captured("Speakers").len(), 10 * buffer.len());
    }

    #[test]
    fn test_unpaced_streams_do_not_wait() {
        let backend = MemoryBackend::new("Memory")
            .with_device(MemoryDevice::output_only("Speakers"))
            .unpaced();
        let mut stream = backend.open(&request("Speakers", Direction::Output, 16)).unwrap();
        let started = Instant::now();
        for _ in 0..100 {
            stream.write(&[0u8; 1764]).unwrap();
        }
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn test_open_stream_tracking() {
        let backend = MemoryBackend::new("Memory").with_device(MemoryDevice::duplex("Loopback"));
        let first = backend.open(&request("Loopback", Direction::Input, 16)).unwrap();
        let second = backend.open(&request("Loopback", Direction::Output, 16)).unwrap();
        assert_eq!(backend.peak_open_streams(), 2);
        drop(first);
        drop(second);
        let _third = backend.open(&request("Loopback", Direction::Input, 16)).unwrap();
        assert_eq!(backend.peak_open_streams(), 2);
        assert_eq!(backend.open_count(), 3);
    }

    #[test]
    fn test_enumerate_failure() {
        let backend = MemoryBackend::new("Dead").failing_enumerate();
        assert!(matches!(backend.enumerate(), Err(HalError::Enumeration(_))));
    }
}
