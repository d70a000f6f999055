use std::sync::Arc;

use thiserror::Error;

use crate::engine::domain::decode_callback::DecodeCallback;
use crate::engine::domain::job::Job;
use crate::shared::resource_format::ResourceFormat;

/// Failure reported by a decode engine, either synchronously or as the status
/// of a completed job.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("decode engine unavailable: {0}")]
    Unavailable(String),
    #[error("failed to open clip {clip}: {reason}")]
    ClipOpen { clip: String, reason: String },
    #[error("failed to create job: {0}")]
    JobCreation(String),
    #[error("job submission rejected: {0}")]
    Submission(String),
    #[error("frame read failed: {0}")]
    Read(String),
    #[error("decode and process failed: {0}")]
    Decode(String),
    #[error("resource format {0} is not supported by this engine")]
    UnsupportedFormat(ResourceFormat),
    #[error("audio unavailable: {0}")]
    Audio(String),
    #[error("callback registration failed: {0}")]
    Callback(String),
}

/// Connection to an asynchronous decode engine.
///
/// The engine owns its worker threads. Completed jobs are reported to the
/// single callback registered through [`DecodeEngine::set_callback`], on
/// whichever engine thread finished the job.
pub trait DecodeEngine: Send + Sync {
    fn open_clip(&self, source: &str) -> Result<Box<dyn Clip>, EngineError>;

    /// Replaces the active callback target.
    fn set_callback(&self, callback: Arc<dyn DecodeCallback>) -> Result<(), EngineError>;

    /// Blocks until no submitted job is queued, running or awaiting its callback.
    fn flush_jobs(&self);
}

/// An opened clip. Properties are fixed for the lifetime of the handle.
pub trait Clip: Send + Sync {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn frame_rate(&self) -> f32;
    fn frame_count(&self) -> u64;

    fn create_read_job(&self, frame_index: u64) -> Result<Box<dyn Job>, EngineError>;

    fn audio(&self) -> Result<Box<dyn ClipAudio>, EngineError>;
}

/// Result of a synchronous audio read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AudioRead {
    pub samples: u32,
    pub bytes: usize,
}

/// Audio track of a clip, read synchronously as interleaved little-endian PCM.
pub trait ClipAudio: Send + Sync {
    fn sample_count(&self) -> u64;
    fn bit_depth(&self) -> u32;
    fn channel_count(&self) -> u32;
    fn sample_rate(&self) -> u32;

    /// Reads up to `max_samples` sample frames starting at `start` into `buffer`.
    fn read_samples(
        &self,
        start: u64,
        buffer: &mut [u8],
        max_samples: u32,
    ) -> Result<AudioRead, EngineError>;
}
