//! Format requests and negotiated stream formats

use std::fmt;
use std::time::Duration;

use crate::error::{HalError, HalResult};
use crate::model::{validate_layout, AudioFormatDescription, AudioFormatId, DeviceStream, FormatFlags};

/// What a caller asks for when starting a session
#[derive(Debug, Clone, PartialEq)]
pub struct FormatRequest {
    pub format_id: AudioFormatId,
    pub number_of_channels: u32,
    pub sample_rate: u32,
    pub bit_depth: u32,
    pub flags: FormatFlags,
    /// Buffers queued ahead in the backend; 0 uses the configured default
    pub buffer_count: u32,
}

impl FormatRequest {
    pub fn linear_pcm(number_of_channels: u32, sample_rate: u32, bit_depth: u32, flags: FormatFlags) -> Self {
        Self {
            format_id: AudioFormatId::LinearPcm,
            number_of_channels,
            sample_rate,
            bit_depth,
            flags,
            buffer_count: 0,
        }
    }

    pub fn with_buffer_count(mut self, buffer_count: u32) -> Self {
        self.buffer_count = buffer_count;
        self
    }

    /// Validate the request against `stream` and produce the format to open
    ///
    /// The request must fall within one advertised format. The negotiated
    /// format takes its layout flags (packing, byte order, alignment) from
    /// that format, preferring the stream's preferred format when it matches.
    pub fn negotiate(&self, stream: &DeviceStream) -> HalResult<StreamFormat> {
        if !self.format_id.is_streamable() {
            return Err(HalError::UnsupportedFormat(format!(
                "{} is not a constant bit rate format",
                self.format_id
            )));
        }
        if self.sample_rate == 0 {
            return Err(HalError::InvalidFormat("sample rate must be positive".into()));
        }
        validate_layout(self.number_of_channels, self.bit_depth, self.flags)?;

        let covers = |f: &&AudioFormatDescription| {
            f.matches(
                self.number_of_channels,
                self.bit_depth,
                f64::from(self.sample_rate),
                self.flags,
            )
        };
        let native = Some(&stream.preferred_format)
            .filter(covers)
            .or_else(|| stream.supported_formats.iter().find(covers))
            .ok_or_else(|| {
                HalError::UnsupportedFormat(format!(
                    "stream {} does not offer {}ch/{}bit/{}Hz [{}]",
                    stream.handle,
                    self.number_of_channels,
                    self.bit_depth,
                    self.sample_rate,
                    self.flags
                ))
            })?;

        Ok(StreamFormat {
            format_id: self.format_id,
            channels: self.number_of_channels,
            sample_rate: self.sample_rate,
            bit_depth: self.bit_depth,
            flags: native.flags,
        })
    }
}

/// Format a session actually runs with
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamFormat {
    pub format_id: AudioFormatId,
    pub channels: u32,
    pub sample_rate: u32,
    pub bit_depth: u32,
    pub flags: FormatFlags,
}

impl StreamFormat {
    pub fn bytes_per_sample(&self) -> usize {
        (self.bit_depth / 8) as usize
    }

    pub fn bytes_per_frame(&self) -> usize {
        self.bytes_per_sample() * self.channels as usize
    }

    /// Frames in one buffer of `duration`, at least one
    pub fn frames_per_buffer(&self, duration: Duration) -> usize {
        let frames = (u128::from(self.sample_rate) * duration.as_micros() / 1_000_000) as usize;
        frames.max(1)
    }

    /// Bytes in one buffer of `duration`
    pub fn buffer_bytes(&self, duration: Duration) -> usize {
        self.frames_per_buffer(duration) * self.bytes_per_frame()
    }

    /// Playing time of `bytes` bytes
    pub fn duration_of(&self, bytes: usize) -> Duration {
        let bytes_per_second = self.bytes_per_frame() as u64 * u64::from(self.sample_rate);
        if bytes_per_second == 0 {
            return Duration::ZERO;
        }
        Duration::from_micros(bytes as u64 * 1_000_000 / bytes_per_second)
    }

    /// Write silence into `buffer`, which starts `offset` bytes into a
    /// sample-aligned stream. Unsigned samples rest at their midpoint.
    pub fn fill_silence(&self, buffer: &mut [u8], offset: usize) {
        let unsigned = !self.flags.intersects(FormatFlags::FLOAT | FormatFlags::SIGNED_INTEGER);
        let width = self.bytes_per_sample();
        if !unsigned || width == 0 {
            buffer.fill(0);
            return;
        }
        let big_endian = self.flags.contains(FormatFlags::BIG_ENDIAN);
        for (i, byte) in buffer.iter_mut().enumerate() {
            let position = (offset + i) % width;
            let most_significant = if big_endian { position == 0 } else { position == width - 1 };
            *byte = if most_significant { 0x80 } else { 0x00 };
        }
    }
}

impl fmt::Display for StreamFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}ch {}bit {}Hz [{}]",
            self.format_id, self.channels, self.bit_depth, self.sample_rate, self.flags
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Direction, SampleRateRange};

    fn stream() -> DeviceStream {
        let range = SampleRateRange::new(8000.0, 96000.0).unwrap();
        let signed = FormatFlags::SIGNED_INTEGER | FormatFlags::PACKED;
        let formats: Vec<AudioFormatDescription> = [(2, 32), (2, 16), (1, 16)]
            .into_iter()
            .map(|(channels, bits)| AudioFormatDescription::linear_pcm(channels, bits, range, signed).unwrap())
            .collect();
        DeviceStream {
            handle: 2,
            direction: Direction::Input,
            preferred_format: formats[0].clone(),
            supported_formats: formats,
        }
    }

    fn format(channels: u32, bits: u32, flags: FormatFlags) -> StreamFormat {
        StreamFormat {
            format_id: AudioFormatId::LinearPcm,
            channels,
            sample_rate: 8000,
            bit_depth: bits,
            flags,
        }
    }

    #[test]
    fn test_negotiate_valid_request() {
        let request =
            FormatRequest::linear_pcm(2, 44100, 32, FormatFlags::SIGNED_INTEGER | FormatFlags::PACKED);
        let format = request.negotiate(&stream()).unwrap();
        assert_eq!(format.bytes_per_frame(), 8);
        assert_eq!(format.sample_rate, 44100);
    }

    #[test]
    fn test_negotiate_rejects_bad_requests() {
        let flags = FormatFlags::SIGNED_INTEGER;
        let s = stream();
        assert!(FormatRequest::linear_pcm(0, 44100, 16, flags).negotiate(&s).is_err());
        assert!(FormatRequest::linear_pcm(2, 0, 16, flags).negotiate(&s).is_err());
        assert!(FormatRequest::linear_pcm(2, 44100, 20, flags).negotiate(&s).is_err());
        assert!(FormatRequest::linear_pcm(2, 44100, 32, flags | FormatFlags::FLOAT)
            .negotiate(&s)
            .is_err());

        let mut mp3 = FormatRequest::linear_pcm(2, 44100, 16, flags);
        mp3.format_id = AudioFormatId::MpegLayer3;
        assert!(matches!(mp3.negotiate(&s), Err(HalError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_negotiate_requires_an_advertised_format() {
        let s = stream();
        let signed = FormatFlags::SIGNED_INTEGER;
        // Rate outside every advertised range
        assert!(matches!(
            FormatRequest::linear_pcm(2, 192000, 32, signed).negotiate(&s),
            Err(HalError::UnsupportedFormat(_))
        ));
        // Channel count nobody offers
        assert!(FormatRequest::linear_pcm(6, 44100, 16, signed).negotiate(&s).is_err());
        // Unsigned samples when only signed ones are offered
        assert!(FormatRequest::linear_pcm(1, 44100, 16, FormatFlags::PACKED).negotiate(&s).is_err());

        // Layout flags come from the native format
        let format = FormatRequest::linear_pcm(1, 44100, 16, signed).negotiate(&s).unwrap();
        assert_eq!(format.flags, FormatFlags::SIGNED_INTEGER | FormatFlags::PACKED);
        assert_eq!(format.channels, 1);
    }

    #[test]
    fn test_buffer_sizing() {
        let format = FormatRequest::linear_pcm(2, 44100, 16, FormatFlags::SIGNED_INTEGER)
            .negotiate(&stream())
            .unwrap();
        assert_eq!(format.frames_per_buffer(Duration::from_millis(20)), 882);
        assert_eq!(format.buffer_bytes(Duration::from_millis(20)), 882 * 4);
        assert_eq!(format.frames_per_buffer(Duration::ZERO), 1);
        assert_eq!(format.duration_of(44100 * 4), Duration::from_secs(1));
    }

    #[test]
    fn test_silence_patterns() {
        let signed = format(1, 16, FormatFlags::SIGNED_INTEGER);
        let mut buf = [0xAAu8; 4];
        signed.fill_silence(&mut buf, 0);
        assert_eq!(buf, [0; 4]);

        let unsigned = format(1, 16, FormatFlags::PACKED);
        let mut buf = [0u8; 4];
        unsigned.fill_silence(&mut buf, 0);
        assert_eq!(buf, [0x00, 0x80, 0x00, 0x80]);
        let mut buf = [0u8; 3];
        unsigned.fill_silence(&mut buf, 1);
        assert_eq!(buf, [0x80, 0x00, 0x80]);

        let big_endian = format(1, 16, FormatFlags::PACKED | FormatFlags::BIG_ENDIAN);
        let mut buf = [0xFFu8; 2];
        big_endian.fill_silence(&mut buf, 0);
        assert_eq!(buf, [0x80, 0x00]);
    }
}
