//! audiohal command-line tool
//!
//! Lists devices, records from an input into a WAV file and plays a WAV file
//! to an output, all through the audiohal-core context.
//!
//! ```text
//! audiohal list
//! audiohal record --device "USB Audio" --seconds 5 take.wav
//! audiohal play --device "USB Audio" take.wav
//! ```

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{bail, Context as _};
use audiohal_core::{
    default_config_path, get_version, get_version_string, load_config, save_config, Context,
    Device, DeviceSnapshot, Direction, FormatFlags, FormatRequest, LogLevel,
};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured log level (off, error, warn, info, debug, trace)
    #[arg(short, long)]
    log_level: Option<LogLevel>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List every device with its streams and formats
    List,

    /// Print the library version
    Version,

    /// Print the effective configuration, optionally writing it to the config file
    Config {
        #[arg(long)]
        write: bool,
    },

    /// Record from an input device into a WAV file
    Record {
        /// Device name or uid (first input device when omitted)
        #[arg(short, long)]
        device: Option<String>,

        #[arg(short, long, default_value_t = 5)]
        seconds: u64,

        #[arg(long, default_value_t = 2)]
        channels: u32,

        #[arg(long, default_value_t = 44100)]
        rate: u32,

        /// 16 or 32
        #[arg(long, default_value_t = 16)]
        bits: u32,

        /// Record 32-bit float samples
        #[arg(long)]
        float: bool,

        output: PathBuf,
    },

    /// Play a WAV file to an output device
    Play {
        /// Device name or uid (first output device when omitted)
        #[arg(short, long)]
        device: Option<String>,

        input: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let mut config = load_config(&config_path);
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }

    let filter = format!("{:?}", config.log_level).to_lowercase();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter))
        .format_timestamp_millis()
        .init();

    match cli.command {
        Command::Version => {
            println!("{} ({:#06x})", get_version_string(), get_version());
            Ok(())
        }
        Command::Config { write } => {
            print!("{}", serde_yaml::to_string(&config).context("Failed to serialize config")?);
            if write {
                save_config(&config, &config_path)?;
                println!("# written to {}", config_path.display());
            }
            Ok(())
        }
        Command::List => {
            let ctx = Context::with_config(config);
            let snapshot = ctx.enumerate();
            if snapshot.is_empty() {
                println!("No audio devices found");
            }
            for device in &snapshot {
                println!("{}", device);
            }
            ctx.free(Some(snapshot));
            ctx.terminate();
            Ok(())
        }
        Command::Record {
            device,
            seconds,
            channels,
            rate,
            bits,
            float,
            output,
        } => {
            let ctx = Context::with_config(config);
            let result = record(&ctx, device.as_deref(), seconds, channels, rate, bits, float, &output);
            ctx.terminate();
            result
        }
        Command::Play { device, input } => {
            let ctx = Context::with_config(config);
            let result = play(&ctx, device.as_deref(), &input);
            ctx.terminate();
            result
        }
    }
}

/// Find a device by name or uid, or the first one supporting `direction`
fn pick_device<'a>(
    snapshot: &'a DeviceSnapshot,
    wanted: Option<&str>,
    direction: Direction,
) -> anyhow::Result<&'a Device> {
    let device = match wanted {
        Some(name) => snapshot
            .find_by_name(name)
            .or_else(|| snapshot.find_by_uid(name)),
        None => snapshot.iter().find(|d| d.supports_direction(direction)),
    };
    match device {
        Some(device) if device.supports_direction(direction) => Ok(device),
        Some(device) => bail!("'{}' has no {} stream", device.device_name, direction),
        None => bail!("No {} device found", direction),
    }
}

fn sample_flags(bits: u32, float: bool) -> anyhow::Result<FormatFlags> {
    match (bits, float) {
        (32, true) => Ok(FormatFlags::FLOAT | FormatFlags::PACKED),
        (16 | 32, false) => Ok(FormatFlags::SIGNED_INTEGER | FormatFlags::PACKED),
        _ => bail!("Unsupported sample layout: {} bits{}", bits, if float { " float" } else { "" }),
    }
}

#[allow(clippy::too_many_arguments)]
fn record(
    ctx: &Context,
    device: Option<&str>,
    seconds: u64,
    channels: u32,
    rate: u32,
    bits: u32,
    float: bool,
    output: &Path,
) -> anyhow::Result<()> {
    let snapshot = ctx.enumerate();
    let device = pick_device(&snapshot, device, Direction::Input)?;
    let flags = sample_flags(bits, float)?;

    let spec = hound::WavSpec {
        channels: u16::try_from(channels).context("Too many channels")?,
        sample_rate: rate,
        bits_per_sample: bits as u16,
        sample_format: if float {
            hound::SampleFormat::Float
        } else {
            hound::SampleFormat::Int
        },
    };
    let mut writer = hound::WavWriter::create(output, spec)
        .with_context(|| format!("Failed to create {:?}", output))?;

    let (tx, rx) = crossbeam::channel::unbounded::<Vec<u8>>();
    let request = FormatRequest::linear_pcm(channels, rate, bits, flags);
    if !ctx.start_recording(Some(device), &request, move |_device: &Device, data: &[u8]| {
        tx.send(data.to_vec()).is_ok()
    }) {
        bail!("Could not start recording on '{}'", device.device_name);
    }
    println!("Recording {}s from '{}' into {:?}", seconds, device.device_name, output);

    let deadline = Instant::now() + Duration::from_secs(seconds);
    let mut frames = 0usize;
    while Instant::now() < deadline {
        if let Ok(buffer) = rx.recv_timeout(Duration::from_millis(50)) {
            frames += write_samples(&mut writer, &buffer, bits, float)? / channels as usize;
        }
    }
    ctx.stop_recording();
    for buffer in rx.try_iter() {
        frames += write_samples(&mut writer, &buffer, bits, float)? / channels as usize;
    }

    writer.finalize().context("Failed to finalize WAV file")?;
    println!("Wrote {} frames", frames);
    ctx.free(Some(snapshot));
    Ok(())
}

/// Append native-endian samples to the WAV writer, returning the sample count
fn write_samples<W>(writer: &mut hound::WavWriter<W>, bytes: &[u8], bits: u32, float: bool) -> anyhow::Result<usize>
where
    W: std::io::Write + std::io::Seek,
{
    let width = (bits / 8) as usize;
    for sample in bytes.chunks_exact(width) {
        match (bits, float) {
            (16, false) => writer.write_sample(i16::from_ne_bytes([sample[0], sample[1]]))?,
            (32, false) => writer.write_sample(i32::from_ne_bytes([sample[0], sample[1], sample[2], sample[3]]))?,
            (32, true) => writer.write_sample(f32::from_ne_bytes([sample[0], sample[1], sample[2], sample[3]]))?,
            _ => bail!("Unsupported sample layout: {} bits", bits),
        }
    }
    Ok(bytes.len() / width)
}

fn play(ctx: &Context, device: Option<&str>, input: &Path) -> anyhow::Result<()> {
    let mut reader =
        hound::WavReader::open(input).with_context(|| format!("Failed to open {:?}", input))?;
    let spec = reader.spec();
    let bits = u32::from(spec.bits_per_sample);
    let float = spec.sample_format == hound::SampleFormat::Float;
    let flags = sample_flags(bits, float)?;

    let mut bytes: Vec<u8> = Vec::new();
    match (bits, float) {
        (16, false) => {
            for sample in reader.samples::<i16>() {
                bytes.extend_from_slice(&sample?.to_ne_bytes());
            }
        }
        (32, false) => {
            for sample in reader.samples::<i32>() {
                bytes.extend_from_slice(&sample?.to_ne_bytes());
            }
        }
        _ => {
            for sample in reader.samples::<f32>() {
                bytes.extend_from_slice(&sample?.to_ne_bytes());
            }
        }
    }

    let snapshot = ctx.enumerate();
    let device = pick_device(&snapshot, device, Direction::Output)?;
    let channels = u32::from(spec.channels);
    let request = FormatRequest::linear_pcm(channels, spec.sample_rate, bits, flags);
    let seconds = bytes.len() as f64 / (f64::from(spec.sample_rate) * f64::from(channels) * f64::from(bits / 8));

    let (done_tx, done_rx) = crossbeam::channel::bounded::<()>(1);
    let mut offset = 0usize;
    if !ctx.start_playback(Some(device), &request, move |_device: &Device, len: usize| {
        let end = (offset + len).min(bytes.len());
        let chunk = bytes[offset..end].to_vec();
        offset = end;
        if chunk.is_empty() {
            let _ = done_tx.try_send(());
        }
        chunk
    }) {
        bail!("Could not start playback on '{}'", device.device_name);
    }
    println!("Playing {:?} ({:.1}s) on '{}'", input, seconds, device.device_name);

    let limit = Duration::from_secs_f64(seconds) + Duration::from_secs(5);
    if done_rx.recv_timeout(limit).is_err() {
        log::warn!("Playback did not finish within {:?}", limit);
    }
    // Let the queued buffers drain
    let config = ctx.config();
    std::thread::sleep(config.buffer_duration() * config.default_buffer_count.max(1));
    ctx.stop_playback();
    ctx.free(Some(snapshot));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_cli_parses() {
        let cli = Cli::parse_from(["audiohal", "--log-level", "debug", "record", "--seconds", "2", "out.wav"]);
        assert_eq!(cli.log_level, Some(LogLevel::Debug));
        match cli.command {
            Command::Record { seconds, bits, output, .. } => {
                assert_eq!(seconds, 2);
                assert_eq!(bits, 16);
                assert_eq!(output, PathBuf::from("out.wav"));
            }
            _ => panic!("expected record"),
        }
    }

    #[test]
    fn test_sample_flags() {
        assert!(sample_flags(16, false).unwrap().contains(FormatFlags::SIGNED_INTEGER));
        assert!(sample_flags(32, true).unwrap().contains(FormatFlags::FLOAT));
        assert!(sample_flags(24, false).is_err());
        assert!(sample_flags(16, true).is_err());
    }

    #[test]
    fn test_write_samples_round_trip() {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 44100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            let samples: Vec<u8> = [1i16, -1, 300, -300].iter().flat_map(|s| s.to_ne_bytes()).collect();
            assert_eq!(write_samples(&mut writer, &samples, 16, false).unwrap(), 4);
            writer.finalize().unwrap();
        }
        cursor.set_position(0);
        let mut reader = hound::WavReader::new(cursor).unwrap();
        let read: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(read, vec![1, -1, 300, -300]);
    }
}
