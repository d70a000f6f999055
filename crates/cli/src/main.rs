use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use serde::Serialize;

use rawbridge_core::engine::domain::decode_engine::DecodeEngine;
use rawbridge_core::engine::infrastructure::ffmpeg_engine::FfmpegEngine;
use rawbridge_core::engine::infrastructure::synthetic_engine::{
    SyntheticEngine, SyntheticEngineConfig,
};
use rawbridge_core::session::clip_session::ClipSession;
use rawbridge_core::session::session_config::SessionConfig;
use rawbridge_core::shared::clip_properties::ClipProperties;
use rawbridge_core::shared::resource_format::ResourceFormat;

/// Sample frames per audio read.
const AUDIO_CHUNK_SAMPLES: u32 = 4800;

/// Engine worker threads for the ffmpeg engine.
const FFMPEG_WORKERS: usize = 2;

/// Pull frames and audio synchronously from a clip through rawbridge.
#[derive(Parser)]
#[command(name = "rawbridge")]
struct Cli {
    /// Input clip (ignored by the synthetic engine except as a name).
    input: String,

    /// Output bit depth: 8 (BGRA), 16 (planar RGB u16) or 32 (planar RGB f32).
    #[arg(long, default_value = "8")]
    bit_depth: u32,

    /// First frame to read.
    #[arg(long, default_value = "0")]
    start: u64,

    /// Number of frames to read (defaults to the rest of the clip).
    #[arg(long)]
    count: Option<u64>,

    /// Directory to write frames into. Frames are only decoded when omitted.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Write the whole audio track as raw interleaved PCM to this file.
    #[arg(long)]
    audio_out: Option<PathBuf>,

    /// Decode engine: ffmpeg or synthetic.
    #[arg(long, default_value = "ffmpeg")]
    engine: String,

    /// Per-frame wait limit in milliseconds.
    #[arg(long, default_value = "10000")]
    timeout_ms: u64,

    /// Reject requests beyond this many jobs in flight.
    #[arg(long)]
    max_in_flight: Option<usize>,

    /// Print clip properties as JSON and exit.
    #[arg(long)]
    info: bool,
}

#[derive(Serialize)]
struct ClipInfo<'a> {
    source: &'a str,
    width: u32,
    height: u32,
    frame_count: u64,
    frame_rate_numerator: u32,
    frame_rate_denominator: u32,
    frame_rate: f32,
    format: String,
    bit_depth: u32,
    frame_size_bytes: usize,
    audio: AudioInfo,
}

#[derive(Serialize)]
struct AudioInfo {
    sample_count: u64,
    bit_depth: u32,
    channel_count: u32,
    sample_rate: u32,
}

impl<'a> From<&'a ClipProperties> for ClipInfo<'a> {
    fn from(props: &'a ClipProperties) -> Self {
        Self {
            source: &props.source,
            width: props.width,
            height: props.height,
            frame_count: props.frame_count,
            frame_rate_numerator: props.frame_rate.numerator,
            frame_rate_denominator: props.frame_rate.denominator,
            frame_rate: props.raw_frame_rate,
            format: props.format.to_string(),
            bit_depth: props.format.bit_depth(),
            frame_size_bytes: props.frame_size_bytes(),
            audio: AudioInfo {
                sample_count: props.audio.sample_count,
                bit_depth: props.audio.bit_depth,
                channel_count: props.audio.channel_count,
                sample_rate: props.audio.sample_rate,
            },
        }
    }
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    validate(&cli)?;

    let engine = build_engine(&cli.engine)?;
    let mut config =
        SessionConfig::default().with_frame_timeout(Duration::from_millis(cli.timeout_ms));
    if let Some(limit) = cli.max_in_flight {
        config = config.with_max_jobs_in_flight(limit);
    }
    let mut session = ClipSession::open(engine, &cli.input, cli.bit_depth, config)?;

    if cli.info {
        let info = ClipInfo::from(session.properties());
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    if let Some(dir) = &cli.output {
        fs::create_dir_all(dir)?;
    }
    read_frames(&session, cli.start, cli.count, cli.output.as_deref())?;

    if let Some(path) = &cli.audio_out {
        write_audio(&session, path)?;
    }

    session.close();
    Ok(())
}

fn build_engine(name: &str) -> Result<Arc<dyn DecodeEngine>, Box<dyn std::error::Error>> {
    match name {
        "synthetic" => Ok(Arc::new(SyntheticEngine::new(SyntheticEngineConfig::default()))),
        _ => Ok(Arc::new(FfmpegEngine::new(FFMPEG_WORKERS)?)),
    }
}

fn read_frames(
    session: &ClipSession,
    start: u64,
    count: Option<u64>,
    output: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let frame_count = session.properties().frame_count;
    if start >= frame_count {
        return Err(format!(
            "Start frame {start} is past the end of the clip ({frame_count} frames)"
        )
        .into());
    }
    let end = count.map_or(frame_count, |n| start.saturating_add(n).min(frame_count));

    let started = Instant::now();
    let mut buffer = vec![0u8; session.frame_size_bytes()];
    for index in start..end {
        eprint!("\rReading frame {}/{end}", index + 1);
        let written = session.read_frame(index, &mut buffer)?;
        if let Some(dir) = output {
            write_frame(session, dir, index, &buffer[..written])?;
        }
    }
    eprintln!();

    let frames = end - start;
    let elapsed = started.elapsed().as_secs_f64();
    log::info!(
        "Read {frames} frames in {elapsed:.2}s ({:.1} fps)",
        if elapsed > 0.0 { frames as f64 / elapsed } else { 0.0 }
    );
    Ok(())
}

fn frame_path(dir: &Path, index: u64, format: ResourceFormat) -> PathBuf {
    let extension = match format {
        ResourceFormat::BgraU8 => "png",
        ResourceFormat::RgbU16Planar => "rgb16",
        ResourceFormat::RgbF32Planar => "rgbf32",
    };
    dir.join(format!("frame_{index:06}.{extension}"))
}

fn write_frame(
    session: &ClipSession,
    dir: &Path,
    index: u64,
    pixels: &[u8],
) -> Result<(), Box<dyn std::error::Error>> {
    let props = session.properties();
    let path = frame_path(dir, index, props.format);
    match props.format {
        ResourceFormat::BgraU8 => {
            let rgba = bgra_to_rgba(pixels);
            let image = image::RgbaImage::from_raw(props.width, props.height, rgba)
                .ok_or("Frame buffer does not match the clip dimensions")?;
            image.save(&path)?;
        }
        ResourceFormat::RgbU16Planar | ResourceFormat::RgbF32Planar => fs::write(&path, pixels)?,
    }
    log::debug!("Wrote {}", path.display());
    Ok(())
}

fn bgra_to_rgba(bgra: &[u8]) -> Vec<u8> {
    let mut rgba = bgra.to_vec();
    for px in rgba.chunks_exact_mut(4) {
        px.swap(0, 2);
    }
    rgba
}

fn write_audio(session: &ClipSession, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let audio = session.properties().audio;
    if !audio.has_audio() {
        log::warn!("Clip has no audio, skipping {}", path.display());
        return Ok(());
    }

    let mut writer = BufWriter::new(fs::File::create(path)?);
    let mut buffer = vec![0u8; audio.bytes_for(AUDIO_CHUNK_SAMPLES)];
    let mut start = 0u64;
    while start < audio.sample_count {
        let count = (audio.sample_count - start).min(AUDIO_CHUNK_SAMPLES as u64) as u32;
        let bytes = audio.bytes_for(count);
        session.fetch_audio_samples(&mut buffer[..bytes], start, count)?;
        writer.write_all(&buffer[..bytes])?;
        start += count as u64;
    }
    writer.flush()?;

    log::info!(
        "Wrote {} samples ({} ch, {} bit, {} Hz) to {}",
        audio.sample_count,
        audio.channel_count,
        audio.bit_depth,
        audio.sample_rate,
        path.display()
    );
    Ok(())
}

fn validate(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    if cli.engine != "ffmpeg" && cli.engine != "synthetic" {
        return Err(format!(
            "Engine must be 'ffmpeg' or 'synthetic', got '{}'",
            cli.engine
        )
        .into());
    }
    if cli.engine == "ffmpeg" && !Path::new(&cli.input).exists() {
        return Err(format!("Input file not found: {}", cli.input).into());
    }
    if ![8, 16, 32].contains(&cli.bit_depth) {
        return Err(format!("Bit depth must be 8, 16 or 32, got {}", cli.bit_depth).into());
    }
    if cli.count == Some(0) {
        return Err("Count must be at least 1".into());
    }
    if cli.timeout_ms == 0 {
        return Err("Timeout must be at least 1 ms".into());
    }
    if cli.max_in_flight == Some(0) {
        return Err("Max in flight must be at least 1".into());
    }
    Ok(())
}
