use std::sync::Arc;

use thiserror::Error;

use crate::engine::domain::decode_engine::{Clip, ClipAudio, DecodeEngine, EngineError};
use crate::request::completion_signal::CompletionSignal;
use crate::request::decode_callback_handler::DecodeCallbackHandler;
use crate::request::frame_error::{DispatchError, FrameError};
use crate::request::frame_request_dispatcher::FrameRequestDispatcher;
use crate::session::session_config::SessionConfig;
use crate::shared::clip_properties::{AudioProperties, ClipProperties};
use crate::shared::frame_rate::{FrameRate, FrameRateError};
use crate::shared::resource_format::{ResourceFormat, UnsupportedBitDepth};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("decode engine unavailable: {0}")]
    EngineUnavailable(#[source] EngineError),
    #[error(transparent)]
    UnsupportedBitDepth(#[from] UnsupportedBitDepth),
    #[error("failed to open clip {clip}: {source}")]
    ClipOpen {
        clip: String,
        #[source]
        source: EngineError,
    },
    #[error("clip {clip} has unusable dimensions {width}x{height}")]
    InvalidDimensions { clip: String, width: u32, height: u32 },
    #[error("clip {clip} reports an unusable frame rate: {source}")]
    InvalidFrameRate {
        clip: String,
        #[source]
        source: FrameRateError,
    },
    #[error("could not initialise the audio reader: {0}")]
    AudioUnavailable(#[source] EngineError),
    #[error("failed to register the decode callback: {0}")]
    CallbackRegistration(#[source] EngineError),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AudioError {
    #[error("session is closed")]
    SessionClosed,
    #[error("audio buffer holds {actual} bytes but {needed} are required")]
    BufferTooSmall { needed: usize, actual: usize },
    #[error("failed to read audio samples: {0}")]
    Engine(#[source] EngineError),
    #[error("audio under-read at sample {start}: requested {requested} samples, got {read}")]
    UnderRead { start: u64, requested: u32, read: u32 },
}

/// One opened source and its negotiated output format.
///
/// The session is the host-facing surface: clip properties, synchronous frame
/// reads, audio passthrough. Closing (or dropping) it waits for every
/// submitted job before releasing engine handles.
pub struct ClipSession {
    properties: ClipProperties,
    config: SessionConfig,
    dispatcher: FrameRequestDispatcher,
    // Released in this order by `close`: audio, clip, engine.
    audio: Option<Box<dyn ClipAudio>>,
    clip: Option<Box<dyn Clip>>,
    engine: Option<Arc<dyn DecodeEngine>>,
}

impl ClipSession {
    /// Opens `source` on `engine` with output at `bit_depth` (8, 16 or 32).
    ///
    /// Fails without leaving anything open if any step fails.
    pub fn open(
        engine: Arc<dyn DecodeEngine>,
        source: &str,
        bit_depth: u32,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        let format = ResourceFormat::from_bit_depth(bit_depth)?;

        let clip = engine.open_clip(source).map_err(|e| match e {
            EngineError::Unavailable(_) => SessionError::EngineUnavailable(e),
            other => SessionError::ClipOpen {
                clip: source.to_string(),
                source: other,
            },
        })?;

        let (width, height) = (clip.width(), clip.height());
        if width == 0 || height == 0 {
            return Err(SessionError::InvalidDimensions {
                clip: source.to_string(),
                width,
                height,
            });
        }

        let raw_frame_rate = clip.frame_rate();
        let frame_rate =
            FrameRate::from_decimal(raw_frame_rate).map_err(|e| SessionError::InvalidFrameRate {
                clip: source.to_string(),
                source: e,
            })?;

        let audio = clip.audio().map_err(SessionError::AudioUnavailable)?;
        let audio_properties = AudioProperties {
            sample_count: audio.sample_count(),
            bit_depth: audio.bit_depth(),
            channel_count: audio.channel_count(),
            sample_rate: audio.sample_rate(),
        };

        engine
            .set_callback(Arc::new(DecodeCallbackHandler::new()))
            .map_err(SessionError::CallbackRegistration)?;

        let properties = ClipProperties {
            source: source.to_string(),
            width,
            height,
            frame_count: clip.frame_count(),
            frame_rate,
            raw_frame_rate,
            format,
            audio: audio_properties,
        };
        let dispatcher = FrameRequestDispatcher::new(
            format,
            width,
            height,
            properties.frame_count,
            config.max_jobs_in_flight,
        );

        log::info!(
            "Opened {source}: {width}x{height}, {} frames at {frame_rate} fps, output {format}",
            properties.frame_count
        );

        Ok(Self {
            properties,
            config,
            dispatcher,
            audio: Some(audio),
            clip: Some(clip),
            engine: Some(engine),
        })
    }

    pub fn properties(&self) -> &ClipProperties {
        &self.properties
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn format(&self) -> ResourceFormat {
        self.properties.format
    }

    /// Bytes a destination buffer needs to hold one frame.
    pub fn frame_size_bytes(&self) -> usize {
        self.dispatcher.frame_size()
    }

    pub fn jobs_in_flight(&self) -> usize {
        self.dispatcher.jobs_in_flight()
    }

    pub fn is_open(&self) -> bool {
        self.engine.is_some()
    }

    /// Starts decoding `frame_index` into `buffer` and returns immediately.
    pub fn fetch_frame(
        &self,
        frame_index: u64,
        buffer: Vec<u8>,
    ) -> Result<CompletionSignal, DispatchError> {
        match self.clip.as_deref() {
            Some(clip) => self.dispatcher.fetch_frame(clip, frame_index, buffer),
            None => Err(DispatchError::new(FrameError::SessionClosed, buffer)),
        }
    }

    /// Decodes `frame_index` into `buffer`, blocking until it is filled.
    ///
    /// The vector's allocation is lent to the engine for the duration of the
    /// request and put back before returning. On timeout the request is still
    /// running and keeps the allocation, so `buffer` is left empty.
    pub fn read_frame(&self, frame_index: u64, buffer: &mut Vec<u8>) -> Result<usize, FrameError> {
        let lent = std::mem::take(buffer);
        let signal = match self.fetch_frame(frame_index, lent) {
            Ok(signal) => signal,
            Err(e) => {
                let (error, returned) = e.into_parts();
                *buffer = returned;
                return Err(error);
            }
        };

        let timeout = self.config.frame_timeout;
        match signal.wait_timeout(timeout) {
            Ok(outcome) => {
                *buffer = outcome.buffer;
                outcome.result
            }
            Err(_pending) => {
                log::warn!("Frame {frame_index} not ready after {timeout:?}");
                Err(FrameError::Timeout {
                    frame_index,
                    timeout,
                })
            }
        }
    }

    /// Reads `count` audio sample frames starting at `start` into `buffer`.
    pub fn fetch_audio_samples(
        &self,
        buffer: &mut [u8],
        start: u64,
        count: u32,
    ) -> Result<(), AudioError> {
        let audio = self.audio.as_deref().ok_or(AudioError::SessionClosed)?;
        let needed = self.properties.audio.bytes_for(count);
        if buffer.len() < needed {
            return Err(AudioError::BufferTooSmall {
                needed,
                actual: buffer.len(),
            });
        }

        if count > 0 && start >= self.properties.audio.sample_count {
            return Err(AudioError::UnderRead {
                start,
                requested: count,
                read: 0,
            });
        }

        let read = audio
            .read_samples(start, &mut buffer[..needed], count)
            .map_err(AudioError::Engine)?;
        if read.samples < count {
            return Err(AudioError::UnderRead {
                start,
                requested: count,
                read: read.samples,
            });
        }
        Ok(())
    }

    /// Waits for in-flight jobs, then releases audio, clip and engine.
    /// Safe to call more than once.
    pub fn close(&mut self) {
        let Some(engine) = self.engine.take() else {
            return;
        };
        engine.flush_jobs();
        self.audio = None;
        self.clip = None;
        drop(engine);
        log::info!("Closed {}", self.properties.source);
    }
}

impl Drop for ClipSession {
    fn drop(&mut self) {
        self.close();
    }
}
