use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::engine::domain::decode_engine::EngineError;

/// Why a frame request did not deliver pixels.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FrameError {
    #[error("frame {frame_index} is out of range, clip has {frame_count} frames")]
    FrameOutOfRange { frame_index: u64, frame_count: u64 },
    #[error("frame {frame_index} needs {needed} bytes but the buffer holds {actual}")]
    BufferTooSmall {
        frame_index: u64,
        needed: usize,
        actual: usize,
    },
    #[error("{in_flight} jobs already in flight, limit is {limit}")]
    Backpressure { in_flight: usize, limit: usize },
    #[error("failed to create read job for frame {frame_index}: {source}")]
    JobCreation {
        frame_index: u64,
        #[source]
        source: EngineError,
    },
    #[error("job for frame {frame_index} was rejected: {source}")]
    Submission {
        frame_index: u64,
        #[source]
        source: EngineError,
    },
    #[error("reading frame {frame_index} failed: {source}")]
    Read {
        frame_index: u64,
        #[source]
        source: EngineError,
    },
    #[error("decoding frame {frame_index} failed: {source}")]
    Process {
        frame_index: u64,
        #[source]
        source: EngineError,
    },
    #[error("frame {frame_index} was dropped by the engine before completing")]
    Abandoned { frame_index: u64 },
    #[error("timed out after {timeout:?} waiting for frame {frame_index}")]
    Timeout { frame_index: u64, timeout: Duration },
    #[error("session is closed")]
    SessionClosed,
}

/// A request that never reached the engine. The destination buffer is handed
/// back untouched.
#[derive(Error)]
#[error("{error}")]
pub struct DispatchError {
    #[source]
    error: FrameError,
    buffer: Vec<u8>,
}

impl DispatchError {
    pub fn new(error: FrameError, buffer: Vec<u8>) -> Self {
        Self { error, buffer }
    }

    pub fn error(&self) -> &FrameError {
        &self.error
    }

    pub fn into_parts(self) -> (FrameError, Vec<u8>) {
        (self.error, self.buffer)
    }
}

impl fmt::Debug for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchError")
            .field("error", &self.error)
            .field("buffer_len", &self.buffer.len())
            .finish()
    }
}
