//! CPAL backend
//!
//! One `CpalBackend` wraps one cpal host. Enumeration reports every device of
//! the host with an input and/or output stream built from its supported
//! configurations. Opening a stream bridges cpal's callback model to the
//! blocking read/write the session thread expects:
//!
//! ```text
//! ┌──────────────────┐   write()   ┌─────────────────┐  pop   ┌───────────────────┐
//! │ Session I/O      │────────────►│ Byte ring       │───────►│ cpal output       │
//! │ thread           │             │ (SPSC, rtrb)    │        │ callback          │
//! └──────────────────┘             └─────────────────┘        └───────────────────┘
//!
//! ┌───────────────────┐  push  ┌─────────────────┐   read()  ┌──────────────────┐
//! │ cpal input        │───────►│ Byte ring       │──────────►│ Session I/O      │
//! │ callback          │        │ (SPSC, rtrb)    │           │ thread           │
//! └───────────────────┘        └─────────────────┘           └──────────────────┘
//! ```
//!
//! The ring holds `buffer_count` buffers. The output callback plays silence
//! when the ring runs dry; the input callback drops (and counts) bytes when
//! the ring is full. Neither callback blocks or allocates.
//!
//! cpal exposes no stable device identifier, so a device's native id is its
//! name, with a `#n` suffix for the n-th device sharing that name in host
//! order. Hot-plug is not tracked: if devices with the same name come or go
//! between `enumerate` and `open`, a suffixed id can resolve to a different
//! physical device than the one in the snapshot. Re-enumerate after the
//! device set changes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{
    BufferSize as CpalBufferSize, HostId, SampleFormat, SampleRate, Stream, StreamConfig,
    SupportedStreamConfigRange,
};
use rtrb::{Consumer, Producer, RingBuffer};

use super::{AudioBackend, BackendStream, OpenRequest, RawDevice, RawStream};
use crate::config::HalConfig;
use crate::engine::StreamFormat;
use crate::error::{HalError, HalResult};
use crate::model::{AudioFormatDescription, Direction, FormatFlags, SampleRateRange};

/// Poll interval while waiting on the ring
const RING_POLL: Duration = Duration::from_millis(1);

/// Get a human-readable name for a host ID
fn host_name(host_id: HostId) -> String {
    let name = format!("{:?}", host_id);
    match name.as_str() {
        "Alsa" => "ALSA".to_string(),
        "Jack" => "JACK".to_string(),
        "Wasapi" => "WASAPI".to_string(),
        "Asio" => "ASIO".to_string(),
        _ => name,
    }
}

/// Flags describing a cpal sample format in native byte order
fn flags_for(format: SampleFormat) -> Option<FormatFlags> {
    let mut flags = if format.is_float() {
        FormatFlags::FLOAT | FormatFlags::PACKED
    } else if format.is_int() {
        FormatFlags::SIGNED_INTEGER | FormatFlags::PACKED
    } else if format.is_uint() {
        FormatFlags::PACKED
    } else {
        return None;
    };
    if cfg!(target_endian = "big") {
        flags |= FormatFlags::BIG_ENDIAN;
    }
    Some(flags)
}

/// cpal sample format matching a negotiated stream format
fn sample_format_for(format: &StreamFormat) -> HalResult<SampleFormat> {
    let float = format.flags.contains(FormatFlags::FLOAT);
    let signed = format.flags.contains(FormatFlags::SIGNED_INTEGER);
    let sample_format = match (format.bit_depth, float, signed) {
        (32, true, _) => SampleFormat::F32,
        (64, true, _) => SampleFormat::F64,
        (8, false, true) => SampleFormat::I8,
        (16, false, true) => SampleFormat::I16,
        (32, false, true) => SampleFormat::I32,
        (64, false, true) => SampleFormat::I64,
        (8, false, false) => SampleFormat::U8,
        (16, false, false) => SampleFormat::U16,
        (32, false, false) => SampleFormat::U32,
        (64, false, false) => SampleFormat::U64,
        _ => return Err(HalError::UnsupportedFormat(format.to_string())),
    };
    Ok(sample_format)
}

fn describe_range(range: &SupportedStreamConfigRange) -> Option<AudioFormatDescription> {
    let flags = flags_for(range.sample_format())?;
    let rates = SampleRateRange::new(
        f64::from(range.min_sample_rate().0),
        f64::from(range.max_sample_rate().0),
    )
    .ok()?;
    AudioFormatDescription::linear_pcm(
        u32::from(range.channels()),
        (range.sample_format().sample_size() * 8) as u32,
        rates,
        flags,
    )
    .ok()
}

/// Native id for each name in host order; the n-th repeat of a name is `name#n`
fn native_ids<S: AsRef<str>>(names: &[S]) -> Vec<String> {
    let mut ids = Vec::with_capacity(names.len());
    for (i, name) in names.iter().enumerate() {
        let name = name.as_ref();
        let repeats = names[..i].iter().filter(|n| n.as_ref() == name).count();
        ids.push(if repeats == 0 {
            name.to_string()
        } else {
            format!("{}#{}", name, repeats + 1)
        });
    }
    ids
}

/// Pair devices with their native ids, skipping devices without a name
fn with_native_ids<I>(devices: I) -> Vec<(String, cpal::Device)>
where
    I: Iterator<Item = cpal::Device>,
{
    let (names, devices): (Vec<String>, Vec<cpal::Device>) = devices
        .filter_map(|device| device.name().ok().map(|name| (name, device)))
        .unzip();
    native_ids(&names).into_iter().zip(devices).collect()
}

/// Backend for one cpal host
pub struct CpalBackend {
    host_id: HostId,
    name: String,
}

impl CpalBackend {
    pub fn new(host_id: HostId) -> Self {
        Self {
            host_id,
            name: host_name(host_id),
        }
    }

    /// One backend per available host, filtered by `config.hosts`
    pub fn available(config: &HalConfig) -> Vec<CpalBackend> {
        cpal::available_hosts()
            .into_iter()
            .map(CpalBackend::new)
            .filter(|b| {
                let enabled = config.host_enabled(&b.name);
                if !enabled {
                    log::debug!("Skipping host {} (not in config)", b.name);
                }
                enabled
            })
            .collect()
    }

    fn host(&self) -> HalResult<cpal::Host> {
        cpal::host_from_id(self.host_id)
            .map_err(|e| HalError::BackendUnavailable(format!("{}: {}", self.name, e)))
    }

    fn find_device(&self, native_id: &str) -> HalResult<cpal::Device> {
        let host = self.host()?;
        let devices = host
            .devices()
            .map_err(|e| HalError::Enumeration(e.to_string()))?;
        with_native_ids(devices)
            .into_iter()
            .find(|(id, _)| id == native_id)
            .map(|(_, device)| device)
            .ok_or_else(|| HalError::DeviceNotFound(native_id.to_string()))
    }

    fn describe_device(&self, native_id: String, device: &cpal::Device) -> Option<RawDevice> {
        let name = device.name().ok()?;

        let outputs: Vec<SupportedStreamConfigRange> = device
            .supported_output_configs()
            .map(|c| c.collect())
            .unwrap_or_default();
        let inputs: Vec<SupportedStreamConfigRange> = device
            .supported_input_configs()
            .map(|c| c.collect())
            .unwrap_or_default();

        let default_output = device.default_output_config().ok();
        let default_input = device.default_input_config().ok();

        let mut streams = Vec::new();
        for (direction, ranges, default) in [
            (Direction::Output, &outputs, &default_output),
            (Direction::Input, &inputs, &default_input),
        ] {
            let formats: Vec<AudioFormatDescription> = ranges.iter().filter_map(describe_range).collect();
            if formats.is_empty() {
                continue;
            }
            let preferred_format = default.as_ref().and_then(|config| {
                let rate = f64::from(config.sample_rate().0);
                let flags = flags_for(config.sample_format())?;
                let bits = (config.sample_format().sample_size() * 8) as u32;
                formats
                    .iter()
                    .find(|f| f.matches(u32::from(config.channels()), bits, rate, flags))
                    .cloned()
            });
            streams.push(RawStream {
                direction,
                preferred_format,
                formats,
            });
        }

        if streams.is_empty() {
            log::debug!("[{}] Skipping '{}': no usable configurations", self.name, name);
            return None;
        }

        let mut sample_rates: Vec<SampleRateRange> = Vec::new();
        for range in outputs.iter().chain(inputs.iter()) {
            if let Ok(rates) = SampleRateRange::new(
                f64::from(range.min_sample_rate().0),
                f64::from(range.max_sample_rate().0),
            ) {
                if !sample_rates.contains(&rates) {
                    sample_rates.push(rates);
                }
            }
        }

        let preferred = default_output.as_ref().or(default_input.as_ref());

        Some(RawDevice {
            native_id,
            name,
            model: None,
            manufacturer: None,
            serial_number: None,
            version: None,
            model_uid: None,
            preferred_sample_rate: preferred.map(|c| f64::from(c.sample_rate().0)).unwrap_or(0.0),
            preferred_channels: preferred.map(|c| u32::from(c.channels())).unwrap_or(0),
            is_alive: true,
            sample_rates,
            streams,
        })
    }
}

impl AudioBackend for CpalBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn enumerate(&self) -> HalResult<Vec<RawDevice>> {
        let host = self.host()?;
        let devices = host
            .devices()
            .map_err(|e| HalError::Enumeration(format!("{}: {}", self.name, e)))?;

        let raw: Vec<RawDevice> = with_native_ids(devices)
            .into_iter()
            .filter_map(|(id, device)| self.describe_device(id, &device))
            .collect();

        log::debug!("[{}] Enumerated {} devices", self.name, raw.len());
        Ok(raw)
    }

    fn open(&self, request: &OpenRequest) -> HalResult<Box<dyn BackendStream>> {
        let device = self.find_device(&request.native_id)?;
        let format = &request.format;
        let sample_format = sample_format_for(format)?;
        let channels = u16::try_from(format.channels)
            .map_err(|_| HalError::UnsupportedFormat(format.to_string()))?;

        let supported: Vec<SupportedStreamConfigRange> = match request.direction {
            Direction::Output => device.supported_output_configs().map(|c| c.collect()),
            Direction::Input => device.supported_input_configs().map(|c| c.collect()),
        }
        .map_err(|e| HalError::StreamBuild(e.to_string()))?;

        let usable = supported.iter().any(|range| {
            range.channels() == channels
                && range.sample_format() == sample_format
                && range.min_sample_rate().0 <= format.sample_rate
                && range.max_sample_rate().0 >= format.sample_rate
        });
        if !usable {
            return Err(HalError::UnsupportedFormat(format!(
                "{} on '{}'",
                format, request.device_name
            )));
        }

        let stream_config = StreamConfig {
            channels,
            sample_rate: SampleRate(format.sample_rate),
            buffer_size: CpalBufferSize::Default,
        };

        let capacity = request.buffer_bytes * request.buffer_count.max(2);
        let (producer, consumer) = RingBuffer::<u8>::new(capacity);
        let failure: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
        let dropped = Arc::new(AtomicU64::new(0));

        let error_slot = failure.clone();
        let label = format!("{} {}", request.direction, request.device_name);
        let err_fn = move |err: cpal::StreamError| {
            log::error!("[{}] Stream error: {}", label, err);
            if let Ok(mut slot) = error_slot.lock() {
                slot.get_or_insert_with(|| err.to_string());
            }
        };

        let (stream, ring) = match request.direction {
            Direction::Output => {
                let mut consumer = consumer;
                let silence = SilencePattern::new(format);
                let stream = device
                    .build_output_stream_raw(
                        &stream_config,
                        sample_format,
                        move |data: &mut cpal::Data, _: &cpal::OutputCallbackInfo| {
                            let out = data.bytes_mut();
                            let n = consumer.slots().min(out.len());
                            if let Ok(chunk) = consumer.read_chunk(n) {
                                let (a, b) = chunk.as_slices();
                                out[..a.len()].copy_from_slice(a);
                                out[a.len()..a.len() + b.len()].copy_from_slice(b);
                                chunk.commit_all();
                            }
                            silence.fill(&mut out[n..], n);
                        },
                        err_fn,
                        None,
                    )
                    .map_err(|e| HalError::StreamBuild(e.to_string()))?;
                (stream, Ring::Output(producer))
            }
            Direction::Input => {
                let mut producer = producer;
                let overflow = dropped.clone();
                let stream = device
                    .build_input_stream_raw(
                        &stream_config,
                        sample_format,
                        move |data: &cpal::Data, _: &cpal::InputCallbackInfo| {
                            let input = data.bytes();
                            let n = producer.slots().min(input.len());
                            if let Ok(mut chunk) = producer.write_chunk(n) {
                                let (a, b) = chunk.as_mut_slices();
                                let split = a.len();
                                a.copy_from_slice(&input[..split]);
                                b.copy_from_slice(&input[split..n]);
                                chunk.commit_all();
                            }
                            if n < input.len() {
                                overflow.fetch_add((input.len() - n) as u64, Ordering::Relaxed);
                            }
                        },
                        err_fn,
                        None,
                    )
                    .map_err(|e| HalError::StreamBuild(e.to_string()))?;
                (stream, Ring::Input(consumer))
            }
        };

        stream
            .play()
            .map_err(|e| HalError::StreamPlay(e.to_string()))?;

        log::info!(
            "[{}] Opened {} stream on '{}': {} ({} byte ring)",
            self.name,
            request.direction,
            request.device_name,
            format,
            capacity
        );

        Ok(Box::new(CpalStream {
            stream,
            ring,
            failure,
            dropped,
            request: request.clone(),
        }))
    }
}

/// Silence bytes for a stream format, repeated per sample
struct SilencePattern {
    sample: Vec<u8>,
}

impl SilencePattern {
    fn new(format: &StreamFormat) -> Self {
        let mut sample = vec![0u8; format.bytes_per_sample().max(1)];
        format.fill_silence(&mut sample, 0);
        Self { sample }
    }

    /// Fill `out`, which starts `offset` bytes into the callback buffer
    fn fill(&self, out: &mut [u8], offset: usize) {
        let len = self.sample.len();
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = self.sample[(offset + i) % len];
        }
    }
}

enum Ring {
    Output(Producer<u8>),
    Input(Consumer<u8>),
}

struct CpalStream {
    stream: Stream,
    ring: Ring,
    failure: Arc<Mutex<Option<String>>>,
    dropped: Arc<AtomicU64>,
    request: OpenRequest,
}

impl CpalStream {
    fn check_failure(&self) -> HalResult<()> {
        match self.failure.lock() {
            Ok(mut slot) => match slot.take() {
                Some(message) => Err(HalError::Stream(message)),
                None => Ok(()),
            },
            Err(_) => Err(HalError::Stream("error slot poisoned".into())),
        }
    }

    fn check_stall(&self, last_progress: Instant) -> HalResult<()> {
        if last_progress.elapsed() > self.request.stall_timeout {
            return Err(HalError::Stall(self.request.stall_timeout.as_millis() as u64));
        }
        Ok(())
    }
}

impl BackendStream for CpalStream {
    fn read(&mut self, buffer: &mut [u8]) -> HalResult<usize> {
        let mut last_progress = Instant::now();
        let mut last_slots = 0;
        loop {
            if self.request.is_cancelled() {
                return Ok(0);
            }
            self.check_failure()?;

            let Ring::Input(consumer) = &mut self.ring else {
                return Err(HalError::UnsupportedDirection {
                    device: self.request.device_name.clone(),
                    direction: Direction::Input,
                });
            };

            let slots = consumer.slots();
            if slots >= buffer.len() {
                let chunk = consumer
                    .read_chunk(buffer.len())
                    .map_err(|e| HalError::Stream(e.to_string()))?;
                let (a, b) = chunk.as_slices();
                buffer[..a.len()].copy_from_slice(a);
                buffer[a.len()..a.len() + b.len()].copy_from_slice(b);
                chunk.commit_all();
                return Ok(buffer.len());
            }
            if slots != last_slots {
                last_slots = slots;
                last_progress = Instant::now();
            }
            self.check_stall(last_progress)?;
            thread::sleep(RING_POLL);
        }
    }

    fn write(&mut self, buffer: &[u8]) -> HalResult<()> {
        let mut written = 0;
        let mut last_progress = Instant::now();
        while written < buffer.len() {
            if self.request.is_cancelled() {
                return Ok(());
            }
            self.check_failure()?;

            let Ring::Output(producer) = &mut self.ring else {
                return Err(HalError::UnsupportedDirection {
                    device: self.request.device_name.clone(),
                    direction: Direction::Output,
                });
            };

            let n = producer.slots().min(buffer.len() - written);
            if n > 0 {
                let mut chunk = producer
                    .write_chunk(n)
                    .map_err(|e| HalError::Stream(e.to_string()))?;
                let (a, b) = chunk.as_mut_slices();
                let split = a.len();
                a.copy_from_slice(&buffer[written..written + split]);
                b.copy_from_slice(&buffer[written + split..written + n]);
                chunk.commit_all();
                written += n;
                last_progress = Instant::now();
                continue;
            }
            self.check_stall(last_progress)?;
            thread::sleep(RING_POLL);
        }
        Ok(())
    }

    fn close(&mut self) -> HalResult<()> {
        let dropped = self.dropped.load(Ordering::Relaxed);
        if dropped > 0 {
            log::warn!(
                "[{} {}] Dropped {} captured bytes (ring full)",
                self.request.direction,
                self.request.device_name,
                dropped
            );
        }
        self.stream
            .pause()
            .map_err(|e| HalError::Stream(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AudioFormatId;

    fn stream_format(bits: u32, flags: FormatFlags) -> StreamFormat {
        StreamFormat {
            format_id: AudioFormatId::LinearPcm,
            channels: 2,
            sample_rate: 48000,
            bit_depth: bits,
            flags,
        }
    }

    #[test]
    fn test_sample_format_mapping() {
        let signed = FormatFlags::SIGNED_INTEGER | FormatFlags::PACKED;
        assert_eq!(sample_format_for(&stream_format(16, signed)).unwrap(), SampleFormat::I16);
        assert_eq!(sample_format_for(&stream_format(32, signed)).unwrap(), SampleFormat::I32);
        assert_eq!(
            sample_format_for(&stream_format(32, FormatFlags::FLOAT)).unwrap(),
            SampleFormat::F32
        );
        assert_eq!(
            sample_format_for(&stream_format(8, FormatFlags::PACKED)).unwrap(),
            SampleFormat::U8
        );
        assert!(sample_format_for(&stream_format(24, signed)).is_err());
    }

    #[test]
    fn test_flags_round_trip_through_sample_format() {
        for sample_format in [SampleFormat::I16, SampleFormat::I32, SampleFormat::F32, SampleFormat::U8] {
            let flags = flags_for(sample_format).unwrap();
            let bits = (sample_format.sample_size() * 8) as u32;
            assert_eq!(sample_format_for(&stream_format(bits, flags)).unwrap(), sample_format);
        }
    }

    #[test]
    fn test_unsigned_silence_is_midpoint() {
        let silence = SilencePattern::new(&stream_format(8, FormatFlags::PACKED));
        let mut out = [0u8; 4];
        silence.fill(&mut out, 0);
        assert_eq!(out, [0x80; 4]);

        let silence = SilencePattern::new(&stream_format(16, FormatFlags::SIGNED_INTEGER));
        let mut out = [0xFFu8; 3];
        silence.fill(&mut out, 1);
        assert_eq!(out, [0; 3]);
    }

    #[test]
    fn test_native_ids_follow_host_order() {
        let ids = native_ids(&["USB Audio", "HDMI", "USB Audio", "USB Audio"]);
        assert_eq!(ids, vec!["USB Audio", "HDMI", "USB Audio#2", "USB Audio#3"]);

        // The same physical device gets another id once an earlier namesake vanishes
        let after_unplug = native_ids(&["HDMI", "USB Audio", "USB Audio"]);
        assert_eq!(after_unplug[2], "USB Audio#2");
        assert_ne!(after_unplug[2], ids[3]);
        assert!(native_ids::<&str>(&[]).is_empty());
    }

    #[test]
    fn test_host_enumeration() {
        // Hosts without devices (CI) enumerate to an empty list or an error
        for backend in CpalBackend::available(&HalConfig::default()) {
            match backend.enumerate() {
                Ok(devices) => {
                    println!("{}: {} devices", backend.name(), devices.len());
                    for device in &devices {
                        assert!(!device.streams.is_empty());
                    }
                }
                Err(e) => println!("{}: {}", backend.name(), e),
            }
        }
    }
}
