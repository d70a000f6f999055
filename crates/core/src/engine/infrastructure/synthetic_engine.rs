use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::engine::domain::decode_callback::DecodeCallback;
use crate::engine::domain::decode_engine::{AudioRead, Clip, ClipAudio, DecodeEngine, EngineError};
use crate::engine::domain::job::{Job, RawFrame};
use crate::engine::infrastructure::engine_core::{
    Completion, EngineCore, EngineStats, JobQueue, OwnedImage,
};
use crate::shared::clip_properties::AudioProperties;
use crate::shared::constants::DEFAULT_SYNTHETIC_WORKERS;
use crate::shared::resource_format::ResourceFormat;

/// Where an injected failure hits a frame request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FailureStage {
    CreateReadJob,
    SubmitRead,
    Read,
    SetFormat,
    CreateProcessJob,
    SubmitProcess,
    Process,
    /// The processed image reports more bytes than it holds.
    TruncatedImage,
    /// The engine drops the read job without calling back.
    LoseReadJob,
    /// The engine drops the decode job without calling back.
    LoseProcessJob,
}

/// Failures the synthetic engine injects.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FailurePlan {
    unavailable: bool,
    callback_registration: bool,
    audio_read: bool,
    frames: HashMap<u64, FailureStage>,
}

impl FailurePlan {
    pub fn engine_unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    pub fn callback_registration(mut self) -> Self {
        self.callback_registration = true;
        self
    }

    pub fn audio_read(mut self) -> Self {
        self.audio_read = true;
        self
    }

    pub fn fail_frame(mut self, frame_index: u64, stage: FailureStage) -> Self {
        self.frames.insert(frame_index, stage);
        self
    }

    pub fn stage_for(&self, frame_index: u64) -> Option<FailureStage> {
        self.frames.get(&frame_index).copied()
    }
}

/// Audio track of a synthetic clip.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SyntheticAudio {
    pub sample_count: u64,
    pub bit_depth: u32,
    pub channel_count: u32,
    pub sample_rate: u32,
}

impl Default for SyntheticAudio {
    fn default() -> Self {
        Self {
            sample_count: 96_000,
            bit_depth: 24,
            channel_count: 2,
            sample_rate: 48_000,
        }
    }
}

impl SyntheticAudio {
    pub fn properties(&self) -> AudioProperties {
        AudioProperties {
            sample_count: self.sample_count,
            bit_depth: self.bit_depth,
            channel_count: self.channel_count,
            sample_rate: self.sample_rate,
        }
    }

    fn bytes_per_sample_frame(&self) -> usize {
        self.properties().bytes_for(1)
    }

    /// PCM bytes the engine produces for `count` samples from `start`.
    pub fn expected_bytes(&self, start: u64, count: u32) -> Vec<u8> {
        let frame_bytes = self.bytes_per_sample_frame() as u64;
        let offset = start * frame_bytes;
        (0..count as u64 * frame_bytes)
            .map(|i| ((offset + i) % 251) as u8)
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SyntheticEngineConfig {
    pub width: u32,
    pub height: u32,
    pub frame_rate: f32,
    pub frame_count: u64,
    pub worker_threads: usize,
    /// Artificial latency added to every job.
    pub job_delay: Duration,
    /// `None` makes the audio query fail.
    pub audio: Option<SyntheticAudio>,
    pub failures: FailurePlan,
}

impl Default for SyntheticEngineConfig {
    fn default() -> Self {
        Self {
            width: 320,
            height: 180,
            frame_rate: 23.976,
            frame_count: 48,
            worker_threads: DEFAULT_SYNTHETIC_WORKERS,
            job_delay: Duration::ZERO,
            audio: Some(SyntheticAudio::default()),
            failures: FailurePlan::default(),
        }
    }
}

/// In-process engine that renders a deterministic test pattern per frame.
///
/// Jobs run on a small worker pool and complete through the registered
/// callback exactly like a hardware engine would, with optional failures
/// injected at any stage of a request.
pub struct SyntheticEngine {
    config: Arc<SyntheticEngineConfig>,
    core: EngineCore,
}

impl SyntheticEngine {
    pub fn new(config: SyntheticEngineConfig) -> Self {
        let core = EngineCore::new(config.worker_threads, "synthetic-engine");
        Self {
            config: Arc::new(config),
            core,
        }
    }

    pub fn config(&self) -> &SyntheticEngineConfig {
        &self.config
    }

    pub fn stats(&self) -> EngineStats {
        self.core.stats()
    }

    /// Pixels this engine produces for `frame_index` in `format`.
    pub fn expected_frame(&self, frame_index: u64, format: ResourceFormat) -> Vec<u8> {
        test_pattern(frame_index, self.config.width, self.config.height, format)
    }
}

impl Default for SyntheticEngine {
    fn default() -> Self {
        Self::new(SyntheticEngineConfig::default())
    }
}

impl DecodeEngine for SyntheticEngine {
    fn open_clip(&self, source: &str) -> Result<Box<dyn Clip>, EngineError> {
        if self.config.failures.unavailable {
            return Err(EngineError::Unavailable(
                "synthetic engine configured as unavailable".to_string(),
            ));
        }
        if source.trim().is_empty() {
            return Err(EngineError::ClipOpen {
                clip: source.to_string(),
                reason: "empty clip name".to_string(),
            });
        }
        log::debug!("Synthetic clip {source} opened");
        Ok(Box::new(SyntheticClip {
            config: self.config.clone(),
            queue: self.core.queue(),
        }))
    }

    fn set_callback(&self, callback: Arc<dyn DecodeCallback>) -> Result<(), EngineError> {
        if self.config.failures.callback_registration {
            return Err(EngineError::Callback(
                "synthetic engine refused the callback".to_string(),
            ));
        }
        self.core.set_callback(callback)
    }

    fn flush_jobs(&self) {
        self.core.flush();
    }
}

struct SyntheticClip {
    config: Arc<SyntheticEngineConfig>,
    queue: JobQueue,
}

impl Clip for SyntheticClip {
    fn width(&self) -> u32 {
        self.config.width
    }

    fn height(&self) -> u32 {
        self.config.height
    }

    fn frame_rate(&self) -> f32 {
        self.config.frame_rate
    }

    fn frame_count(&self) -> u64 {
        self.config.frame_count
    }

    fn create_read_job(&self, frame_index: u64) -> Result<Box<dyn Job>, EngineError> {
        let stage = self.config.failures.stage_for(frame_index);
        if stage == Some(FailureStage::CreateReadJob) {
            return Err(EngineError::JobCreation(format!(
                "injected read job failure for frame {frame_index}"
            )));
        }
        if frame_index >= self.config.frame_count {
            return Err(EngineError::JobCreation(format!(
                "frame {frame_index} is past the end of the clip"
            )));
        }

        let frame = SyntheticFrame {
            frame_index,
            format: None,
            stage,
            config: self.config.clone(),
            queue: self.queue.clone(),
        };
        let delay = self.config.job_delay;
        let job = self.queue.create_job(Box::new(move || {
            std::thread::sleep(delay);
            match frame.stage {
                Some(FailureStage::Read) => Completion::Read(Err(EngineError::Read(format!(
                    "injected read failure for frame {}",
                    frame.frame_index
                )))),
                Some(FailureStage::LoseReadJob) => Completion::Discard,
                _ => Completion::Read(Ok(Box::new(frame))),
            }
        }));

        if stage == Some(FailureStage::SubmitRead) {
            return Ok(job.reject_with(EngineError::Submission(format!(
                "injected read submission failure for frame {frame_index}"
            ))));
        }
        Ok(job)
    }

    fn audio(&self) -> Result<Box<dyn ClipAudio>, EngineError> {
        let audio = self
            .config
            .audio
            .ok_or_else(|| EngineError::Audio("clip has no audio track".to_string()))?;
        Ok(Box::new(SyntheticClipAudio {
            audio,
            fail_reads: self.config.failures.audio_read,
        }))
    }
}

struct SyntheticFrame {
    frame_index: u64,
    format: Option<ResourceFormat>,
    stage: Option<FailureStage>,
    config: Arc<SyntheticEngineConfig>,
    queue: JobQueue,
}

impl RawFrame for SyntheticFrame {
    fn frame_index(&self) -> u64 {
        self.frame_index
    }

    fn set_resource_format(&mut self, format: ResourceFormat) -> Result<(), EngineError> {
        if self.stage == Some(FailureStage::SetFormat) {
            return Err(EngineError::UnsupportedFormat(format));
        }
        self.format = Some(format);
        Ok(())
    }

    fn create_decode_and_process_job(self: Box<Self>) -> Result<Box<dyn Job>, EngineError> {
        let frame_index = self.frame_index;
        if self.stage == Some(FailureStage::CreateProcessJob) {
            return Err(EngineError::JobCreation(format!(
                "injected decode job failure for frame {frame_index}"
            )));
        }
        let format = self.format.ok_or_else(|| {
            EngineError::JobCreation(format!("frame {frame_index} has no resource format set"))
        })?;

        let (width, height) = (self.config.width, self.config.height);
        let stage = self.stage;
        let delay = self.config.job_delay;
        let job = self.queue.create_job(Box::new(move || {
            std::thread::sleep(delay);
            match stage {
                Some(FailureStage::Process) => Completion::Process(Err(EngineError::Decode(
                    format!("injected decode failure for frame {frame_index}"),
                ))),
                Some(FailureStage::LoseProcessJob) => Completion::Discard,
                _ => {
                    let pixels = test_pattern(frame_index, width, height, format);
                    let mut image = OwnedImage::new(width, height, format, pixels);
                    if stage == Some(FailureStage::TruncatedImage) {
                        image.pixels.truncate(image.pixels.len() / 2);
                    }
                    Completion::Process(Ok(Box::new(image)))
                }
            }
        }));

        if stage == Some(FailureStage::SubmitProcess) {
            return Ok(job.reject_with(EngineError::Submission(format!(
                "injected decode submission failure for frame {frame_index}"
            ))));
        }
        Ok(job)
    }
}

struct SyntheticClipAudio {
    audio: SyntheticAudio,
    fail_reads: bool,
}

impl ClipAudio for SyntheticClipAudio {
    fn sample_count(&self) -> u64 {
        self.audio.sample_count
    }

    fn bit_depth(&self) -> u32 {
        self.audio.bit_depth
    }

    fn channel_count(&self) -> u32 {
        self.audio.channel_count
    }

    fn sample_rate(&self) -> u32 {
        self.audio.sample_rate
    }

    fn read_samples(
        &self,
        start: u64,
        buffer: &mut [u8],
        max_samples: u32,
    ) -> Result<AudioRead, EngineError> {
        if self.fail_reads {
            return Err(EngineError::Audio("injected audio read failure".to_string()));
        }
        let available = self.audio.sample_count.saturating_sub(start);
        let samples = (max_samples as u64).min(available) as u32;
        let bytes = samples as usize * self.audio.bytes_per_sample_frame();
        if buffer.len() < bytes {
            return Err(EngineError::Audio(format!(
                "buffer holds {} bytes, {bytes} needed",
                buffer.len()
            )));
        }
        buffer[..bytes].copy_from_slice(&self.audio.expected_bytes(start, samples));
        Ok(AudioRead { samples, bytes })
    }
}

/// Deterministic pixels for one frame. Every frame differs from its
/// neighbours in every pixel, and 8-bit frames stay distinct across wraps of
/// the low index byte.
pub fn test_pattern(frame_index: u64, width: u32, height: u32, format: ResourceFormat) -> Vec<u8> {
    let (w, h) = (width as usize, height as usize);
    let n = frame_index as usize;
    let mut out = Vec::with_capacity(format.frame_size_bytes(width, height));

    match format {
        ResourceFormat::BgraU8 => {
            let high = n >> 8;
            for y in 0..h {
                for x in 0..w {
                    out.push((x + n) as u8);
                    out.push((y + 3 * n + high) as u8);
                    out.push((x + y + 7 * n) as u8);
                    out.push(0xff);
                }
            }
        }
        ResourceFormat::RgbU16Planar => {
            for channel in 0..3usize {
                for y in 0..h {
                    for x in 0..w {
                        let value = (x * 257 + y * 31 + channel * 4099 + n * 13) as u16;
                        out.extend_from_slice(&value.to_le_bytes());
                    }
                }
            }
        }
        ResourceFormat::RgbF32Planar => {
            for channel in 0..3usize {
                for y in 0..h {
                    for x in 0..w {
                        let value = (x + y * w) as f32 / (w * h) as f32
                            + channel as f32 * 0.25
                            + n as f32 * 0.001;
                        out.extend_from_slice(&value.to_le_bytes());
                    }
                }
            }
        }
    }
    out
}
