//! Format identifiers, flag bits and format descriptions

use bitflags::bitflags;

use crate::error::{HalError, HalResult};

/// Bit depths a format description may carry
pub const VALID_BIT_DEPTHS: [u32; 5] = [8, 16, 24, 32, 64];

const fn fourcc(code: &[u8; 4]) -> u32 {
    u32::from_be_bytes(*code)
}

/// Closed interval of supported sample rates
///
/// Immutable once built: the only constructors check `0 < min <= max`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleRateRange {
    minimum_rate: f64,
    maximum_rate: f64,
}

impl SampleRateRange {
    /// Build a range, rejecting non-positive or inverted bounds
    pub fn new(minimum_rate: f64, maximum_rate: f64) -> HalResult<Self> {
        if !(minimum_rate > 0.0 && minimum_rate.is_finite() && maximum_rate.is_finite()) {
            return Err(HalError::InvalidFormat(format!(
                "sample rate range {} - {} must be positive",
                minimum_rate, maximum_rate
            )));
        }
        if minimum_rate > maximum_rate {
            return Err(HalError::InvalidFormat(format!(
                "sample rate range {} - {} is inverted",
                minimum_rate, maximum_rate
            )));
        }
        Ok(Self {
            minimum_rate,
            maximum_rate,
        })
    }

    /// Range containing a single rate
    pub fn fixed(rate: f64) -> HalResult<Self> {
        Self::new(rate, rate)
    }

    pub fn minimum_rate(&self) -> f64 {
        self.minimum_rate
    }

    pub fn maximum_rate(&self) -> f64 {
        self.maximum_rate
    }

    pub fn contains(&self, rate: f64) -> bool {
        rate >= self.minimum_rate && rate <= self.maximum_rate
    }
}

/// Audio data format identifier
///
/// Codes are four-character codes, so they match what native services
/// hand out and survive a trip through a binding as plain integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioFormatId {
    LinearPcm,
    Ac3,
    Ac3Iec60958,
    AppleIma4,
    Mpeg4Aac,
    Mpeg4Celp,
    Mpeg4Hvxc,
    Mpeg4TwinVq,
    Mace3,
    Mace6,
    ULaw,
    ALaw,
    QDesign,
    QDesign2,
    Qualcomm,
    MpegLayer1,
    MpegLayer2,
    MpegLayer3,
    TimeCode,
    MidiStream,
    ParameterValueStream,
    AppleLossless,
    Mpeg4AacHe,
    Mpeg4AacLd,
    Mpeg4AacEld,
    Mpeg4AacEldSbr,
    Mpeg4AacEldV2,
    Mpeg4AacHeV2,
    Mpeg4AacSpatial,
    Amr,
    Audible,
    Ilbc,
    DviIntelIma,
    MicrosoftGsm,
    Aes3,
}

impl AudioFormatId {
    /// Every known identifier, in code-table order
    pub const ALL: [AudioFormatId; 35] = [
        AudioFormatId::LinearPcm,
        AudioFormatId::Ac3,
        AudioFormatId::Ac3Iec60958,
        AudioFormatId::AppleIma4,
        AudioFormatId::Mpeg4Aac,
        AudioFormatId::Mpeg4Celp,
        AudioFormatId::Mpeg4Hvxc,
        AudioFormatId::Mpeg4TwinVq,
        AudioFormatId::Mace3,
        AudioFormatId::Mace6,
        AudioFormatId::ULaw,
        AudioFormatId::ALaw,
        AudioFormatId::QDesign,
        AudioFormatId::QDesign2,
        AudioFormatId::Qualcomm,
        AudioFormatId::MpegLayer1,
        AudioFormatId::MpegLayer2,
        AudioFormatId::MpegLayer3,
        AudioFormatId::TimeCode,
        AudioFormatId::MidiStream,
        AudioFormatId::ParameterValueStream,
        AudioFormatId::AppleLossless,
        AudioFormatId::Mpeg4AacHe,
        AudioFormatId::Mpeg4AacLd,
        AudioFormatId::Mpeg4AacEld,
        AudioFormatId::Mpeg4AacEldSbr,
        AudioFormatId::Mpeg4AacEldV2,
        AudioFormatId::Mpeg4AacHeV2,
        AudioFormatId::Mpeg4AacSpatial,
        AudioFormatId::Amr,
        AudioFormatId::Audible,
        AudioFormatId::Ilbc,
        AudioFormatId::DviIntelIma,
        AudioFormatId::MicrosoftGsm,
        AudioFormatId::Aes3,
    ];

    /// Numeric code for this identifier
    pub const fn code(self) -> u32 {
        match self {
            AudioFormatId::LinearPcm => fourcc(b"lpcm"),
            AudioFormatId::Ac3 => fourcc(b"ac-3"),
            AudioFormatId::Ac3Iec60958 => fourcc(b"cac3"),
            AudioFormatId::AppleIma4 => fourcc(b"ima4"),
            AudioFormatId::Mpeg4Aac => fourcc(b"aac "),
            AudioFormatId::Mpeg4Celp => fourcc(b"celp"),
            AudioFormatId::Mpeg4Hvxc => fourcc(b"hvxc"),
            AudioFormatId::Mpeg4TwinVq => fourcc(b"twvq"),
            AudioFormatId::Mace3 => fourcc(b"MAC3"),
            AudioFormatId::Mace6 => fourcc(b"MAC6"),
            AudioFormatId::ULaw => fourcc(b"ulaw"),
            AudioFormatId::ALaw => fourcc(b"alaw"),
            AudioFormatId::QDesign => fourcc(b"QDMC"),
            AudioFormatId::QDesign2 => fourcc(b"QDM2"),
            AudioFormatId::Qualcomm => fourcc(b"Qclp"),
            AudioFormatId::MpegLayer1 => fourcc(b".mp1"),
            AudioFormatId::MpegLayer2 => fourcc(b".mp2"),
            AudioFormatId::MpegLayer3 => fourcc(b".mp3"),
            AudioFormatId::TimeCode => fourcc(b"time"),
            AudioFormatId::MidiStream => fourcc(b"midi"),
            AudioFormatId::ParameterValueStream => fourcc(b"apvs"),
            AudioFormatId::AppleLossless => fourcc(b"alac"),
            AudioFormatId::Mpeg4AacHe => fourcc(b"aach"),
            AudioFormatId::Mpeg4AacLd => fourcc(b"aacl"),
            AudioFormatId::Mpeg4AacEld => fourcc(b"aace"),
            AudioFormatId::Mpeg4AacEldSbr => fourcc(b"aacf"),
            AudioFormatId::Mpeg4AacEldV2 => fourcc(b"aacg"),
            AudioFormatId::Mpeg4AacHeV2 => fourcc(b"aacp"),
            AudioFormatId::Mpeg4AacSpatial => fourcc(b"aacs"),
            AudioFormatId::Amr => fourcc(b"samr"),
            AudioFormatId::Audible => fourcc(b"AUDB"),
            AudioFormatId::Ilbc => fourcc(b"ilbc"),
            AudioFormatId::DviIntelIma => 0x6D73_0011,
            AudioFormatId::MicrosoftGsm => 0x6D73_0031,
            AudioFormatId::Aes3 => fourcc(b"aes3"),
        }
    }

    /// Look up an identifier by numeric code
    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|id| id.code() == code)
    }

    /// Human-readable name
    pub const fn name(self) -> &'static str {
        match self {
            AudioFormatId::LinearPcm => "Linear PCM",
            AudioFormatId::Ac3 => "AC3",
            AudioFormatId::Ac3Iec60958 => "60958 AC3",
            AudioFormatId::AppleIma4 => "Apple IMA4",
            AudioFormatId::Mpeg4Aac => "MPEG4 AAC",
            AudioFormatId::Mpeg4Celp => "MPEG4 CELP",
            AudioFormatId::Mpeg4Hvxc => "MPEG4 HVXC",
            AudioFormatId::Mpeg4TwinVq => "MPEG4 TwinVQ",
            AudioFormatId::Mace3 => "MACE 3:1",
            AudioFormatId::Mace6 => "MACE 6:1",
            AudioFormatId::ULaw => "uLaw",
            AudioFormatId::ALaw => "aLaw",
            AudioFormatId::QDesign => "QDesign",
            AudioFormatId::QDesign2 => "QDesign2",
            AudioFormatId::Qualcomm => "QUALCOMM PureVoice",
            AudioFormatId::MpegLayer1 => "MPEG Layer 1",
            AudioFormatId::MpegLayer2 => "MPEG Layer 2",
            AudioFormatId::MpegLayer3 => "MPEG Layer 3",
            AudioFormatId::TimeCode => "Time Code",
            AudioFormatId::MidiStream => "MIDI Stream",
            AudioFormatId::ParameterValueStream => "Parameter Value Stream",
            AudioFormatId::AppleLossless => "Apple Lossless",
            AudioFormatId::Mpeg4AacHe => "MPEG4 AAC HE",
            AudioFormatId::Mpeg4AacLd => "MPEG4 AAC LD",
            AudioFormatId::Mpeg4AacEld => "MPEG4 AAC ELD",
            AudioFormatId::Mpeg4AacEldSbr => "MPEG4 AAC ELD SBR",
            AudioFormatId::Mpeg4AacEldV2 => "MPEG4 AAC ELD V2",
            AudioFormatId::Mpeg4AacHeV2 => "MPEG4 AAC HE V2",
            AudioFormatId::Mpeg4AacSpatial => "MPEG4 AAC Spatial",
            AudioFormatId::Amr => "AMR",
            AudioFormatId::Audible => "Audible",
            AudioFormatId::Ilbc => "iLBC",
            AudioFormatId::DviIntelIma => "DVI Intel IMA",
            AudioFormatId::MicrosoftGsm => "Microsoft GSM",
            AudioFormatId::Aes3 => "AES3",
        }
    }

    /// Constant bit rate formats the streaming engine can size buffers for
    pub fn is_streamable(self) -> bool {
        matches!(self, AudioFormatId::LinearPcm)
    }
}

impl std::fmt::Display for AudioFormatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

bitflags! {
    /// Sample layout flags attached to a format description
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FormatFlags: u32 {
        const FLOAT = 1 << 0;
        const BIG_ENDIAN = 1 << 1;
        const SIGNED_INTEGER = 1 << 2;
        const PACKED = 1 << 3;
        const ALIGNED_HIGH = 1 << 4;
        const NON_INTERLEAVED = 1 << 5;
        const NON_MIXABLE = 1 << 6;
        const ALL_CLEAR = 1 << 31;
    }
}

const FLAG_NAMES: [(FormatFlags, &str); 8] = [
    (FormatFlags::FLOAT, "Float"),
    (FormatFlags::BIG_ENDIAN, "BigEndian"),
    (FormatFlags::SIGNED_INTEGER, "SignedInteger"),
    (FormatFlags::PACKED, "Packed"),
    (FormatFlags::ALIGNED_HIGH, "AlignedHigh"),
    (FormatFlags::NON_INTERLEAVED, "NonInterleaved"),
    (FormatFlags::NON_MIXABLE, "NonMixable"),
    (FormatFlags::ALL_CLEAR, "AllClear"),
];

impl FormatFlags {
    /// Float and signed integer are mutually exclusive, and all-clear
    /// cannot be combined with anything
    pub fn is_consistent(self) -> bool {
        if self.contains(FormatFlags::FLOAT | FormatFlags::SIGNED_INTEGER) {
            return false;
        }
        !(self.contains(FormatFlags::ALL_CLEAR) && self != FormatFlags::ALL_CLEAR)
    }

    /// Names of the set flags, in bit order
    pub fn names(self) -> Vec<&'static str> {
        FLAG_NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect()
    }
}

impl std::fmt::Display for FormatFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names = self.names();
        if names.is_empty() {
            f.write_str("None")
        } else {
            f.write_str(&names.join(" | "))
        }
    }
}

/// One concrete encoding a stream can produce or accept
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFormatDescription {
    pub format_id: AudioFormatId,
    pub number_of_channels: u32,
    pub bit_depth: u32,
    pub sample_rate_range: SampleRateRange,
    pub flags: FormatFlags,
}

impl AudioFormatDescription {
    /// Build and validate a description
    pub fn new(
        format_id: AudioFormatId,
        number_of_channels: u32,
        bit_depth: u32,
        sample_rate_range: SampleRateRange,
        flags: FormatFlags,
    ) -> HalResult<Self> {
        let description = Self {
            format_id,
            number_of_channels,
            bit_depth,
            sample_rate_range,
            flags,
        };
        description.validate()?;
        Ok(description)
    }

    /// Linear PCM description
    pub fn linear_pcm(
        number_of_channels: u32,
        bit_depth: u32,
        sample_rate_range: SampleRateRange,
        flags: FormatFlags,
    ) -> HalResult<Self> {
        Self::new(
            AudioFormatId::LinearPcm,
            number_of_channels,
            bit_depth,
            sample_rate_range,
            flags,
        )
    }

    /// Check channel count, bit depth and flag consistency
    pub fn validate(&self) -> HalResult<()> {
        validate_layout(self.number_of_channels, self.bit_depth, self.flags)
    }

    pub fn bytes_per_frame(&self) -> usize {
        (self.bit_depth / 8) as usize * self.number_of_channels as usize
    }

    /// Whether this description covers the given layout at `sample_rate`
    pub fn matches(&self, channels: u32, bit_depth: u32, sample_rate: f64, flags: FormatFlags) -> bool {
        self.format_id == AudioFormatId::LinearPcm
            && self.number_of_channels == channels
            && self.bit_depth == bit_depth
            && self.sample_rate_range.contains(sample_rate)
            && self.flags.contains(FormatFlags::FLOAT) == flags.contains(FormatFlags::FLOAT)
            && self.flags.contains(FormatFlags::SIGNED_INTEGER)
                == flags.contains(FormatFlags::SIGNED_INTEGER)
    }
}

/// Shared validation for descriptions and stream requests
pub(crate) fn validate_layout(channels: u32, bit_depth: u32, flags: FormatFlags) -> HalResult<()> {
    if channels == 0 {
        return Err(HalError::InvalidFormat("channel count must be at least 1".into()));
    }
    if !VALID_BIT_DEPTHS.contains(&bit_depth) {
        return Err(HalError::InvalidFormat(format!("unsupported bit depth {}", bit_depth)));
    }
    if !flags.is_consistent() {
        return Err(HalError::InvalidFormat(format!("inconsistent flags: {}", flags)));
    }
    if flags.contains(FormatFlags::FLOAT) && bit_depth != 32 && bit_depth != 64 {
        return Err(HalError::InvalidFormat(format!(
            "float samples need 32 or 64 bits, got {}",
            bit_depth
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_rate_range_bounds() {
        let range = SampleRateRange::new(8000.0, 48000.0).unwrap();
        assert!(range.contains(44100.0));
        assert!(!range.contains(96000.0));
        assert!(SampleRateRange::new(48000.0, 8000.0).is_err());
        assert!(SampleRateRange::new(0.0, 8000.0).is_err());
        assert!(SampleRateRange::new(-1.0, 8000.0).is_err());
        assert!(SampleRateRange::new(f64::NAN, 8000.0).is_err());
        assert_eq!(SampleRateRange::fixed(44100.0).unwrap().maximum_rate(), 44100.0);
    }

    #[test]
    fn test_format_codes_are_unique() {
        for (i, a) in AudioFormatId::ALL.iter().enumerate() {
            for b in &AudioFormatId::ALL[i + 1..] {
                assert_ne!(a.code(), b.code(), "{} and {} share a code", a, b);
            }
            assert_eq!(AudioFormatId::from_code(a.code()), Some(*a));
        }
        assert_eq!(AudioFormatId::LinearPcm.code(), 0x6C70_636D);
        assert_eq!(AudioFormatId::from_code(0), None);
    }

    #[test]
    fn test_flag_consistency() {
        assert!((FormatFlags::SIGNED_INTEGER | FormatFlags::PACKED).is_consistent());
        assert!((FormatFlags::FLOAT | FormatFlags::PACKED).is_consistent());
        assert!(!(FormatFlags::FLOAT | FormatFlags::SIGNED_INTEGER).is_consistent());
        assert!(FormatFlags::ALL_CLEAR.is_consistent());
        assert!(!(FormatFlags::ALL_CLEAR | FormatFlags::PACKED).is_consistent());
        assert!(FormatFlags::empty().is_consistent());
    }

    #[test]
    fn test_flag_display() {
        let flags = FormatFlags::SIGNED_INTEGER | FormatFlags::PACKED;
        assert_eq!(flags.to_string(), "SignedInteger | Packed");
        assert_eq!(FormatFlags::empty().to_string(), "None");
    }

    #[test]
    fn test_description_validation() {
        let range = SampleRateRange::new(44100.0, 48000.0).unwrap();
        let ok = AudioFormatDescription::linear_pcm(2, 16, range, FormatFlags::SIGNED_INTEGER);
        assert_eq!(ok.unwrap().bytes_per_frame(), 4);

        assert!(AudioFormatDescription::linear_pcm(0, 16, range, FormatFlags::empty()).is_err());
        assert!(AudioFormatDescription::linear_pcm(2, 12, range, FormatFlags::empty()).is_err());
        assert!(AudioFormatDescription::linear_pcm(2, 16, range, FormatFlags::FLOAT).is_err());
        assert!(AudioFormatDescription::linear_pcm(
            2,
            32,
            range,
            FormatFlags::FLOAT | FormatFlags::SIGNED_INTEGER
        )
        .is_err());
    }

    #[test]
    fn test_description_matches() {
        let range = SampleRateRange::new(8000.0, 96000.0).unwrap();
        let desc = AudioFormatDescription::linear_pcm(
            2,
            32,
            range,
            FormatFlags::SIGNED_INTEGER | FormatFlags::PACKED,
        )
        .unwrap();
        assert!(desc.matches(2, 32, 44100.0, FormatFlags::SIGNED_INTEGER));
        assert!(!desc.matches(2, 32, 44100.0, FormatFlags::FLOAT));
        assert!(!desc.matches(1, 32, 44100.0, FormatFlags::SIGNED_INTEGER));
        assert!(!desc.matches(2, 32, 192000.0, FormatFlags::SIGNED_INTEGER));
    }
}
