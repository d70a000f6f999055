use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};

use crate::engine::domain::decode_callback::DecodeCallback;
use crate::engine::domain::decode_engine::{AudioRead, Clip, ClipAudio, DecodeEngine, EngineError};
use crate::engine::domain::job::{Job, RawFrame};
use crate::engine::infrastructure::engine_core::{
    Completion, EngineCore, EngineStats, JobQueue, OwnedImage,
};
use crate::shared::constants::FFMPEG_AUDIO_BIT_DEPTH;
use crate::shared::resource_format::ResourceFormat;

/// Bytes per pixel of the intermediate RGB48LE frames.
const RGB48_BYTES_PER_PIXEL: usize = 6;

/// Decode engine backed by ffmpeg-next (libavformat + libavcodec).
///
/// Each opened clip gets its own decoder thread that owns every ffmpeg object
/// for that clip. Read jobs ask that thread for a frame as RGB48; decode jobs
/// convert it to the requested resource format on the engine's worker pool.
pub struct FfmpegEngine {
    core: EngineCore,
}

impl FfmpegEngine {
    pub fn new(worker_threads: usize) -> Result<Self, EngineError> {
        ffmpeg_next::init().map_err(|e| EngineError::Unavailable(e.to_string()))?;
        Ok(Self {
            core: EngineCore::new(worker_threads, "ffmpeg-engine"),
        })
    }

    pub fn stats(&self) -> EngineStats {
        self.core.stats()
    }
}

impl DecodeEngine for FfmpegEngine {
    fn open_clip(&self, source: &str) -> Result<Box<dyn Clip>, EngineError> {
        let (requests, requests_rx) = crossbeam_channel::unbounded::<DecodeRequest>();
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);

        let path = source.to_string();
        let worker = std::thread::Builder::new()
            .name("ffmpeg-decoder".to_string())
            .spawn(move || decoder_loop(path, ready_tx, requests_rx))
            .map_err(|e| EngineError::Unavailable(format!("failed to spawn decoder: {e}")))?;

        let info = match ready_rx.recv() {
            Ok(Ok(info)) => info,
            Ok(Err(e)) => {
                let _ = worker.join();
                return Err(e);
            }
            Err(_) => {
                let _ = worker.join();
                return Err(EngineError::ClipOpen {
                    clip: source.to_string(),
                    reason: "decoder thread exited during open".to_string(),
                });
            }
        };

        log::info!(
            "ffmpeg opened {source}: {}x{}, {} frames at {} fps",
            info.width,
            info.height,
            info.frame_count,
            info.frame_rate
        );

        Ok(Box::new(FfmpegClip {
            source: source.to_string(),
            info,
            requests: Some(requests),
            worker: Some(worker),
            queue: self.core.queue(),
        }))
    }

    fn set_callback(&self, callback: Arc<dyn DecodeCallback>) -> Result<(), EngineError> {
        self.core.set_callback(callback)
    }

    fn flush_jobs(&self) {
        self.core.flush();
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct VideoInfo {
    stream_index: usize,
    width: u32,
    height: u32,
    frame_rate: f32,
    frame_count: u64,
}

struct DecodeRequest {
    frame_index: u64,
    reply: Sender<Result<Vec<u8>, EngineError>>,
}

fn decoder_loop(
    path: String,
    ready: Sender<Result<VideoInfo, EngineError>>,
    requests: Receiver<DecodeRequest>,
) {
    let mut decoder = match ClipDecoder::open(path) {
        Ok(decoder) => decoder,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    if ready.send(Ok(decoder.info)).is_err() {
        return;
    }

    for request in requests {
        let result = decoder.frame(request.frame_index);
        if request.reply.send(result).is_err() {
            log::debug!("Frame {} decoded after its job went away", request.frame_index);
        }
    }
    log::debug!("Decoder for {} stopped", decoder.path);
}

/// Sequential decoder state for one clip. Lives on the decoder thread.
struct ClipDecoder {
    path: String,
    info: VideoInfo,
    input: ffmpeg_next::format::context::Input,
    decoder: ffmpeg_next::decoder::Video,
    scaler: ffmpeg_next::software::scaling::Context,
    next_index: u64,
    eof: bool,
    cached: Option<(u64, Vec<u8>)>,
}

impl ClipDecoder {
    fn open(path: String) -> Result<Self, EngineError> {
        let (input, decoder, info) = open_video(&path)?;
        let scaler = ffmpeg_next::software::scaling::Context::get(
            decoder.format(),
            info.width,
            info.height,
            ffmpeg_next::format::Pixel::RGB48LE,
            info.width,
            info.height,
            ffmpeg_next::software::scaling::Flags::BILINEAR,
        )
        .map_err(|e| clip_error(&path, e))?;

        Ok(Self {
            path,
            info,
            input,
            decoder,
            scaler,
            next_index: 0,
            eof: false,
            cached: None,
        })
    }

    /// Returns frame `index` as tightly packed RGB48LE.
    fn frame(&mut self, index: u64) -> Result<Vec<u8>, EngineError> {
        if let Some((cached_index, pixels)) = &self.cached {
            if *cached_index == index {
                return Ok(pixels.clone());
            }
        }
        if index < self.next_index {
            self.rewind()?;
        }

        loop {
            let Some(decoded) = self.next_decoded() else {
                return Err(EngineError::Read(format!(
                    "frame {index} is past the end of {}, {} frames decoded",
                    self.path, self.next_index
                )));
            };
            let current = self.next_index;
            self.next_index += 1;
            if current != index {
                continue;
            }

            let mut rgb = ffmpeg_next::util::frame::video::Video::empty();
            self.scaler
                .run(&decoded, &mut rgb)
                .map_err(|e| EngineError::Read(format!("frame {index}: {e}")))?;
            let pixels = extract_rgb48_pixels(&rgb, self.info.width, self.info.height);
            self.cached = Some((index, pixels.clone()));
            return Ok(pixels);
        }
    }

    fn next_decoded(&mut self) -> Option<ffmpeg_next::util::frame::video::Video> {
        let mut decoded = ffmpeg_next::util::frame::video::Video::empty();
        loop {
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                return Some(decoded);
            }
            if self.eof {
                return None;
            }

            match self.input.packets().next() {
                Some((stream, packet)) => {
                    if stream.index() != self.info.stream_index {
                        continue;
                    }
                    if let Err(e) = self.decoder.send_packet(&packet) {
                        log::warn!("Skipping undecodable packet in {}: {e}", self.path);
                    }
                }
                None => {
                    self.eof = true;
                    let _ = self.decoder.send_eof();
                }
            }
        }
    }

    /// Restarts decoding from the first frame.
    fn rewind(&mut self) -> Result<(), EngineError> {
        log::debug!("Rewinding {} from frame {}", self.path, self.next_index);
        let (input, decoder, _) = open_video(&self.path)?;
        self.input = input;
        self.decoder = decoder;
        self.next_index = 0;
        self.eof = false;
        Ok(())
    }
}

fn clip_error(path: &str, e: impl std::fmt::Display) -> EngineError {
    EngineError::ClipOpen {
        clip: path.to_string(),
        reason: e.to_string(),
    }
}

fn open_video(
    path: &str,
) -> Result<
    (
        ffmpeg_next::format::context::Input,
        ffmpeg_next::decoder::Video,
        VideoInfo,
    ),
    EngineError,
> {
    let input = ffmpeg_next::format::input(&path).map_err(|e| clip_error(path, e))?;

    let (decoder, stream_index, frame_rate, stream_frames) = {
        let stream = input
            .streams()
            .best(ffmpeg_next::media::Type::Video)
            .ok_or_else(|| clip_error(path, "no video stream found"))?;
        let codec_ctx = ffmpeg_next::codec::context::Context::from_parameters(stream.parameters())
            .map_err(|e| clip_error(path, e))?;
        let decoder = codec_ctx.decoder().video().map_err(|e| clip_error(path, e))?;

        let mut rate = stream.avg_frame_rate();
        if rate.denominator() == 0 || rate.numerator() == 0 {
            rate = stream.rate();
        }
        let fps = if rate.denominator() != 0 {
            rate.numerator() as f64 / rate.denominator() as f64
        } else {
            0.0
        };
        (decoder, stream.index(), fps, stream.frames())
    };

    let frame_count = if stream_frames > 0 {
        stream_frames as u64
    } else {
        let seconds = input.duration().max(0) as f64 / f64::from(ffmpeg_next::ffi::AV_TIME_BASE);
        (seconds * frame_rate).round() as u64
    };

    let info = VideoInfo {
        stream_index,
        width: decoder.width(),
        height: decoder.height(),
        frame_rate: frame_rate as f32,
        frame_count,
    };
    Ok((input, decoder, info))
}

/// Copies an RGB48 frame into a contiguous buffer, dropping row padding.
fn extract_rgb48_pixels(
    frame: &ffmpeg_next::util::frame::video::Video,
    width: u32,
    height: u32,
) -> Vec<u8> {
    let stride = frame.stride(0);
    let data = frame.data(0);
    let row_bytes = width as usize * RGB48_BYTES_PER_PIXEL;

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let row_start = row * stride;
        pixels.extend_from_slice(&data[row_start..row_start + row_bytes]);
    }
    pixels
}

/// Converts packed RGB48LE into the given resource format.
fn convert_rgb48(rgb48: &[u8], width: u32, height: u32, format: ResourceFormat) -> Vec<u8> {
    let pixel_count = width as usize * height as usize;
    let channel = |pixel: usize, c: usize| {
        let offset = pixel * RGB48_BYTES_PER_PIXEL + c * 2;
        u16::from_le_bytes([rgb48[offset], rgb48[offset + 1]])
    };

    let mut out = Vec::with_capacity(format.frame_size_bytes(width, height));
    match format {
        ResourceFormat::BgraU8 => {
            for p in 0..pixel_count {
                out.push((channel(p, 2) >> 8) as u8);
                out.push((channel(p, 1) >> 8) as u8);
                out.push((channel(p, 0) >> 8) as u8);
                out.push(u8::MAX);
            }
        }
        ResourceFormat::RgbU16Planar => {
            for c in 0..3 {
                for p in 0..pixel_count {
                    out.extend_from_slice(&channel(p, c).to_le_bytes());
                }
            }
        }
        ResourceFormat::RgbF32Planar => {
            for c in 0..3 {
                for p in 0..pixel_count {
                    let value = channel(p, c) as f32 / u16::MAX as f32;
                    out.extend_from_slice(&value.to_le_bytes());
                }
            }
        }
    }
    out
}

struct FfmpegClip {
    source: String,
    info: VideoInfo,
    requests: Option<Sender<DecodeRequest>>,
    worker: Option<JoinHandle<()>>,
    queue: JobQueue,
}

impl Clip for FfmpegClip {
    fn width(&self) -> u32 {
        self.info.width
    }

    fn height(&self) -> u32 {
        self.info.height
    }

    fn frame_rate(&self) -> f32 {
        self.info.frame_rate
    }

    fn frame_count(&self) -> u64 {
        self.info.frame_count
    }

    fn create_read_job(&self, frame_index: u64) -> Result<Box<dyn Job>, EngineError> {
        if frame_index >= self.info.frame_count {
            return Err(EngineError::JobCreation(format!(
                "frame {frame_index} is past the end of {}",
                self.source
            )));
        }
        let requests = self
            .requests
            .clone()
            .ok_or_else(|| EngineError::JobCreation("clip is closed".to_string()))?;

        let (width, height) = (self.info.width, self.info.height);
        let queue = self.queue.clone();
        let job = self.queue.create_job(Box::new(move || {
            let (reply, reply_rx) = crossbeam_channel::bounded(1);
            let stopped = || EngineError::Read("decoder thread has stopped".to_string());
            let result = requests
                .send(DecodeRequest { frame_index, reply })
                .map_err(|_| stopped())
                .and_then(|()| reply_rx.recv().map_err(|_| stopped())?);

            Completion::Read(result.map(|rgb48| {
                Box::new(FfmpegFrame {
                    frame_index,
                    width,
                    height,
                    rgb48,
                    format: None,
                    queue,
                }) as Box<dyn RawFrame>
            }))
        }));
        Ok(job)
    }

    fn audio(&self) -> Result<Box<dyn ClipAudio>, EngineError> {
        Ok(Box::new(decode_audio(&self.source)?))
    }
}

impl Drop for FfmpegClip {
    fn drop(&mut self) {
        self.requests = None;
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("Decoder thread for {} panicked", self.source);
            }
        }
    }
}

struct FfmpegFrame {
    frame_index: u64,
    width: u32,
    height: u32,
    rgb48: Vec<u8>,
    format: Option<ResourceFormat>,
    queue: JobQueue,
}

impl RawFrame for FfmpegFrame {
    fn frame_index(&self) -> u64 {
        self.frame_index
    }

    fn set_resource_format(&mut self, format: ResourceFormat) -> Result<(), EngineError> {
        self.format = Some(format);
        Ok(())
    }

    fn create_decode_and_process_job(self: Box<Self>) -> Result<Box<dyn Job>, EngineError> {
        let Self {
            frame_index,
            width,
            height,
            rgb48,
            format,
            queue,
        } = *self;
        let format = format.ok_or_else(|| {
            EngineError::JobCreation(format!("frame {frame_index} has no resource format set"))
        })?;

        let job = queue.create_job(Box::new(move || {
            let pixels = convert_rgb48(&rgb48, width, height, format);
            Completion::Process(Ok(Box::new(OwnedImage::new(width, height, format, pixels))))
        }));
        Ok(job)
    }
}

/// Whole audio track decoded up front to interleaved signed 16-bit PCM.
#[derive(Debug, Default)]
struct FfmpegAudio {
    channel_count: u32,
    sample_rate: u32,
    pcm: Vec<u8>,
}

impl FfmpegAudio {
    fn bytes_per_sample_frame(&self) -> usize {
        self.channel_count as usize * FFMPEG_AUDIO_BIT_DEPTH as usize / 8
    }
}

impl ClipAudio for FfmpegAudio {
    fn sample_count(&self) -> u64 {
        match self.bytes_per_sample_frame() {
            0 => 0,
            frame_bytes => (self.pcm.len() / frame_bytes) as u64,
        }
    }

    fn bit_depth(&self) -> u32 {
        FFMPEG_AUDIO_BIT_DEPTH
    }

    fn channel_count(&self) -> u32 {
        self.channel_count
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn read_samples(
        &self,
        start: u64,
        buffer: &mut [u8],
        max_samples: u32,
    ) -> Result<AudioRead, EngineError> {
        let frame_bytes = self.bytes_per_sample_frame();
        let available = self.sample_count().saturating_sub(start);
        if available == 0 {
            return Ok(AudioRead {
                samples: 0,
                bytes: 0,
            });
        }
        let samples = (max_samples as u64).min(available) as u32;
        let bytes = samples as usize * frame_bytes;
        if buffer.len() < bytes {
            return Err(EngineError::Audio(format!(
                "buffer holds {} bytes, {bytes} needed",
                buffer.len()
            )));
        }
        // start < sample_count here, so the offset lies inside `pcm`.
        let offset = usize::try_from(start)
            .ok()
            .and_then(|start| start.checked_mul(frame_bytes))
            .ok_or_else(|| EngineError::Audio(format!("sample {start} is out of range")))?;
        buffer[..bytes].copy_from_slice(&self.pcm[offset..offset + bytes]);
        Ok(AudioRead { samples, bytes })
    }
}

fn audio_error(e: impl std::fmt::Display) -> EngineError {
    EngineError::Audio(e.to_string())
}

/// Decodes the best audio stream of `path`. A clip without audio yields an
/// empty track.
fn decode_audio(path: &str) -> Result<FfmpegAudio, EngineError> {
    let mut input = ffmpeg_next::format::input(&path).map_err(audio_error)?;

    let (stream_index, mut decoder) = {
        let Some(stream) = input.streams().best(ffmpeg_next::media::Type::Audio) else {
            log::info!("{path} has no audio stream");
            return Ok(FfmpegAudio::default());
        };
        let codec_ctx = ffmpeg_next::codec::context::Context::from_parameters(stream.parameters())
            .map_err(audio_error)?;
        (stream.index(), codec_ctx.decoder().audio().map_err(audio_error)?)
    };

    let channels = decoder.channels();
    let mut layout = decoder.channel_layout();
    if layout.is_empty() {
        layout = ffmpeg_next::ChannelLayout::default(channels as i32);
    }
    let mut resampler = ffmpeg_next::software::resampling::Context::get(
        decoder.format(),
        layout,
        decoder.rate(),
        ffmpeg_next::format::Sample::I16(ffmpeg_next::format::sample::Type::Packed),
        layout,
        decoder.rate(),
    )
    .map_err(audio_error)?;

    let mut audio = FfmpegAudio {
        channel_count: channels as u32,
        sample_rate: decoder.rate(),
        pcm: Vec::new(),
    };
    let mut decoded = ffmpeg_next::util::frame::audio::Audio::empty();
    let mut resampled = ffmpeg_next::util::frame::audio::Audio::empty();

    for (stream, packet) in input.packets() {
        if stream.index() != stream_index {
            continue;
        }
        decoder.send_packet(&packet).map_err(audio_error)?;
        while decoder.receive_frame(&mut decoded).is_ok() {
            resampler.run(&decoded, &mut resampled).map_err(audio_error)?;
            append_pcm(&resampled, &mut audio);
        }
    }

    decoder.send_eof().map_err(audio_error)?;
    while decoder.receive_frame(&mut decoded).is_ok() {
        resampler.run(&decoded, &mut resampled).map_err(audio_error)?;
        append_pcm(&resampled, &mut audio);
    }
    if let Ok(Some(delay)) = resampler.flush(&mut resampled) {
        if delay.output > 0 {
            append_pcm(&resampled, &mut audio);
        }
    }

    log::debug!(
        "Decoded {} audio samples from {path}",
        audio.sample_count()
    );
    Ok(audio)
}

fn append_pcm(frame: &ffmpeg_next::util::frame::audio::Audio, audio: &mut FfmpegAudio) {
    let bytes = frame.samples() * audio.bytes_per_sample_frame();
    if bytes == 0 {
        return;
    }
    let data = frame.data(0);
    audio.pcm.extend_from_slice(&data[..bytes.min(data.len())]);
}
