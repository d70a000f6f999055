use crate::engine::domain::decode_engine::Clip;
use crate::engine::domain::job::Rejected;
use crate::request::completion_signal::{completion_channel, CompletionSignal};
use crate::request::frame_error::{DispatchError, FrameError};
use crate::request::frame_request_context::FrameRequestContext;
use crate::request::job_throttle::JobThrottle;
use crate::shared::resource_format::ResourceFormat;

/// Turns "fetch frame N into this buffer" into a submitted read job.
///
/// Never blocks: it returns as soon as the engine has accepted the read job.
pub struct FrameRequestDispatcher {
    format: ResourceFormat,
    frame_count: u64,
    frame_size: usize,
    throttle: JobThrottle,
}

impl FrameRequestDispatcher {
    pub fn new(
        format: ResourceFormat,
        width: u32,
        height: u32,
        frame_count: u64,
        max_jobs_in_flight: Option<usize>,
    ) -> Self {
        Self {
            format,
            frame_count,
            frame_size: format.frame_size_bytes(width, height),
            throttle: JobThrottle::new(max_jobs_in_flight),
        }
    }

    pub fn format(&self) -> ResourceFormat {
        self.format
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn jobs_in_flight(&self) -> usize {
        self.throttle.in_flight()
    }

    /// Submits a read job for `frame_index`, moving `buffer` into the request.
    ///
    /// The buffer comes back through the returned signal, or through the error
    /// if the request never reached the engine.
    pub fn fetch_frame(
        &self,
        clip: &dyn Clip,
        frame_index: u64,
        buffer: Vec<u8>,
    ) -> Result<CompletionSignal, DispatchError> {
        if frame_index >= self.frame_count {
            let error = FrameError::FrameOutOfRange {
                frame_index,
                frame_count: self.frame_count,
            };
            return Err(DispatchError::new(error, buffer));
        }
        if buffer.len() < self.frame_size {
            let error = FrameError::BufferTooSmall {
                frame_index,
                needed: self.frame_size,
                actual: buffer.len(),
            };
            return Err(DispatchError::new(error, buffer));
        }

        let permit = match self.throttle.try_acquire() {
            Ok(permit) => permit,
            Err(in_flight) => {
                let error = FrameError::Backpressure {
                    in_flight,
                    limit: self.throttle.limit().unwrap_or(in_flight),
                };
                return Err(DispatchError::new(error, buffer));
            }
        };

        let mut read_job = match clip.create_read_job(frame_index) {
            Ok(job) => job,
            Err(source) => {
                let error = FrameError::JobCreation {
                    frame_index,
                    source,
                };
                return Err(DispatchError::new(error, buffer));
            }
        };

        let (notifier, signal) = completion_channel(frame_index);
        let context =
            FrameRequestContext::new(frame_index, self.format, buffer, notifier, permit);
        read_job.set_user_data(Box::new(context));

        match read_job.submit() {
            Ok(()) => {
                log::debug!("Frame {frame_index}: read job submitted");
                Ok(signal)
            }
            Err(Rejected { mut job, error }) => {
                let buffer = match FrameRequestContext::take_from(job.as_mut()) {
                    Some(context) => context.into_buffer(),
                    None => {
                        log::error!("Rejected read job for frame {frame_index} lost its request");
                        Vec::new()
                    }
                };
                let error = FrameError::Submission {
                    frame_index,
                    source: error,
                };
                Err(DispatchError::new(error, buffer))
            }
        }
    }
}
