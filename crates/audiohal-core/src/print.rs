//! Human-readable dumps of devices, streams and formats
//!
//! Every entity implements `Display` with a tab-indented multi-line layout.
//! The `print_*` functions emit that text through `log::info!` and ignore
//! `None`, so they can be called on the result of any accessor directly.

use std::fmt;

use crate::model::{
    AudioFormatDescription, Device, DeviceSnapshot, DeviceStream, SampleRateRange,
};

/// Write `body` with every line prefixed by one tab
fn write_nested(f: &mut fmt::Formatter<'_>, body: &str) -> fmt::Result {
    for line in body.lines() {
        writeln!(f, "\t{}", line)?;
    }
    Ok(())
}

fn or_unknown(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("(unknown)")
}

impl fmt::Display for SampleRateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.minimum_rate() == self.maximum_rate() {
            write!(f, "{} Hz", self.minimum_rate())
        } else {
            write!(f, "{} - {} Hz", self.minimum_rate(), self.maximum_rate())
        }
    }
}

impl fmt::Display for AudioFormatDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Format: {}", self.format_id)?;
        writeln!(f, "\tChannels: {}", self.number_of_channels)?;
        writeln!(f, "\tBit depth: {}", self.bit_depth)?;
        writeln!(f, "\tSample rates: {}", self.sample_rate_range)?;
        writeln!(f, "\tFlags: {}", self.flags)
    }
}

impl fmt::Display for DeviceStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Stream {} ({})", self.handle, self.direction)?;
        writeln!(f, "\tPreferred:")?;
        write_nested(f, &format!("\t{}", self.preferred_format))?;
        writeln!(f, "\tSupported formats: {}", self.supported_formats.len())?;
        for format in &self.supported_formats {
            write_nested(f, &format!("\t{}", format))?;
        }
        Ok(())
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Device {}: {}", self.handle, self.device_name)?;
        writeln!(f, "\tHost: {}", self.host)?;
        writeln!(f, "\tUID: {}", self.device_uid)?;
        writeln!(f, "\tModel: {}", or_unknown(&self.model))?;
        writeln!(f, "\tModel UID: {}", or_unknown(&self.model_uid))?;
        writeln!(f, "\tManufacturer: {}", or_unknown(&self.manufacturer))?;
        writeln!(f, "\tSerial number: {}", or_unknown(&self.serial_number))?;
        writeln!(f, "\tVersion: {}", or_unknown(&self.version))?;
        writeln!(f, "\tPreferred sample rate: {}", self.preferred_sample_rate)?;
        writeln!(f, "\tPreferred channels: {}", self.preferred_number_of_channels)?;
        writeln!(f, "\tAlive: {}", self.is_alive)?;
        writeln!(f, "\tRunning: {}", self.is_running())?;
        let rates: Vec<String> = self.supported_sample_rates.iter().map(|r| r.to_string()).collect();
        writeln!(f, "\tSample rates: [{}]", rates.join(", "))?;
        for stream in &self.device_streams {
            write_nested(f, &stream.to_string())?;
        }
        Ok(())
    }
}

impl fmt::Display for DeviceSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} device(s)", self.len())?;
        for device in self {
            write!(f, "{}", device)?;
        }
        Ok(())
    }
}

/// Log a device dump; `None` does nothing
pub fn print_device(device: Option<&Device>) {
    if let Some(device) = device {
        log::info!("{}", device);
    }
}

/// Log a stream dump; `None` does nothing
pub fn print_stream(stream: Option<&DeviceStream>) {
    if let Some(stream) = stream {
        log::info!("{}", stream);
    }
}

/// Log a format dump; `None` does nothing
pub fn print_format(format: Option<&AudioFormatDescription>) {
    if let Some(format) = format {
        log::info!("{}", format);
    }
}

/// Log every device of a snapshot; `None` does nothing
pub fn print_snapshot(snapshot: Option<&DeviceSnapshot>) {
    if let Some(snapshot) = snapshot {
        log::info!("{}", snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FormatFlags;

    #[test]
    fn test_print_none_is_noop() {
        print_device(None);
        print_stream(None);
        print_format(None);
        print_snapshot(None);
    }

    #[test]
    fn test_format_rendering() {
        let format = AudioFormatDescription::linear_pcm(
            2,
            16,
            SampleRateRange::new(44100.0, 48000.0).unwrap(),
            FormatFlags::SIGNED_INTEGER | FormatFlags::PACKED,
        )
        .unwrap();
        let text = format.to_string();
        assert!(text.starts_with("Format: Linear PCM\n"));
        assert!(text.contains("\tSample rates: 44100 - 48000 Hz"));
        assert!(text.contains("\tFlags: SignedInteger | Packed"));
        print_format(Some(&format));
    }
}
