use crate::engine::domain::decode_callback::DecodeCallback;
use crate::engine::domain::decode_engine::EngineError;
use crate::engine::domain::job::{Job, ProcessedImage, RawFrame, Rejected};
use crate::request::frame_error::FrameError;
use crate::request::frame_request_context::FrameRequestContext;

/// Drives each frame request from read completion to pixel delivery.
///
/// Stateless: every job carries its own [`FrameRequestContext`], output format
/// included, so one handler routes any number of concurrent requests from any
/// number of sessions sharing an engine.
#[derive(Debug, Default)]
pub struct DecodeCallbackHandler;

impl DecodeCallbackHandler {
    pub fn new() -> Self {
        Self
    }

    fn context_of(job: &mut dyn Job, stage: &str) -> Option<Box<FrameRequestContext>> {
        let context = FrameRequestContext::take_from(job);
        if context.is_none() {
            log::error!("{stage} completion without a frame request attached, ignoring");
        }
        context
    }

    /// Second hop: format the frame, create the decode job, hand the context on.
    fn submit_process_job(
        &self,
        mut context: Box<FrameRequestContext>,
        mut frame: Box<dyn RawFrame>,
    ) {
        let frame_index = context.frame_index();
        let process_error = |source: EngineError| FrameError::Process {
            frame_index,
            source,
        };

        if let Err(e) = frame.set_resource_format(context.format()) {
            context.fail(process_error(e));
            return;
        }

        let mut process_job = match frame.create_decode_and_process_job() {
            Ok(job) => job,
            Err(e) => {
                context.fail(process_error(e));
                return;
            }
        };

        context.mark_awaiting_process();
        process_job.set_user_data(context);

        if let Err(Rejected { mut job, error }) = process_job.submit() {
            match FrameRequestContext::take_from(job.as_mut()) {
                Some(context) => context.fail(FrameError::Submission {
                    frame_index,
                    source: error,
                }),
                None => log::error!("Rejected decode job for frame {frame_index} lost its request"),
            }
        } else {
            log::debug!("Frame {frame_index}: decode job submitted");
        }
    }
}

impl DecodeCallback for DecodeCallbackHandler {
    fn read_complete(&self, mut job: Box<dyn Job>, result: Result<Box<dyn RawFrame>, EngineError>) {
        let Some(context) = Self::context_of(job.as_mut(), "Read") else {
            return;
        };
        let frame_index = context.frame_index();

        match result {
            Ok(frame) => {
                log::debug!("Frame {frame_index}: read complete");
                self.submit_process_job(context, frame);
            }
            Err(source) => context.fail(FrameError::Read {
                frame_index,
                source,
            }),
        }
        // `job` (the read job) is released here on every path.
    }

    fn process_complete(
        &self,
        mut job: Box<dyn Job>,
        result: Result<Box<dyn ProcessedImage>, EngineError>,
    ) {
        let Some(context) = Self::context_of(job.as_mut(), "Process") else {
            return;
        };
        let frame_index = context.frame_index();

        match result {
            Ok(image) if image.resource_format() != context.format() => {
                context.fail(FrameError::Process {
                    frame_index,
                    source: EngineError::UnsupportedFormat(image.resource_format()),
                });
            }
            Ok(image) => {
                log::debug!(
                    "Frame {frame_index}: process complete, {} bytes",
                    image.resource_size_bytes()
                );
                context.deliver(image.as_ref());
            }
            Err(source) => context.fail(FrameError::Process {
                frame_index,
                source,
            }),
        }
    }

    fn sidecar_metadata_parse_warning(&self, file: &str, line: u32, message: &str) {
        log::warn!("Sidecar {file}:{line}: {message}");
    }

    fn sidecar_metadata_parse_error(&self, file: &str, line: u32, message: &str) {
        log::warn!("Sidecar {file}:{line} could not be parsed: {message}");
    }
}
