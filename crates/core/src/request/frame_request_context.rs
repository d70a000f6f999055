use std::fmt;

use crate::engine::domain::decode_engine::EngineError;
use crate::engine::domain::job::{Job, ProcessedImage};
use crate::request::completion_signal::CompletionNotifier;
use crate::request::frame_error::FrameError;
use crate::request::job_throttle::ThrottlePermit;
use crate::shared::resource_format::ResourceFormat;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestState {
    AwaitingRead,
    AwaitingProcess,
    Done,
    Failed,
}

/// Everything one frame request carries through the engine.
///
/// Travels as the user data of the read job and then of the decode job, along
/// with the output format the owning session negotiated. The stage that ends
/// the chain consumes it; if an engine drops it instead, the request completes
/// as abandoned so the caller is never left waiting.
pub struct FrameRequestContext {
    frame_index: u64,
    format: ResourceFormat,
    buffer: Vec<u8>,
    notifier: Option<CompletionNotifier>,
    state: RequestState,
    permit: Option<ThrottlePermit>,
}

impl FrameRequestContext {
    pub(crate) fn new(
        frame_index: u64,
        format: ResourceFormat,
        buffer: Vec<u8>,
        notifier: CompletionNotifier,
        permit: ThrottlePermit,
    ) -> Self {
        Self {
            frame_index,
            format,
            buffer,
            notifier: Some(notifier),
            state: RequestState::AwaitingRead,
            permit: Some(permit),
        }
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn format(&self) -> ResourceFormat {
        self.format
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    pub(crate) fn mark_awaiting_process(&mut self) {
        debug_assert_eq!(self.state, RequestState::AwaitingRead);
        self.state = RequestState::AwaitingProcess;
    }

    /// Takes the context out of a job's user data.
    ///
    /// Returns `None` when the job carries nothing or something that is not a
    /// frame request; foreign data is put back on the job.
    pub(crate) fn take_from(job: &mut dyn Job) -> Option<Box<Self>> {
        let data = job.take_user_data()?;
        match data.downcast::<Self>() {
            Ok(context) => Some(context),
            Err(foreign) => {
                job.set_user_data(foreign);
                None
            }
        }
    }

    /// Copies the processed image into the destination buffer and completes
    /// the request. Nothing is written unless the whole image fits.
    pub(crate) fn deliver(mut self: Box<Self>, image: &dyn ProcessedImage) {
        let size = image.resource_size_bytes();
        let resource = image.resource();

        if resource.len() < size {
            let source = EngineError::Decode(format!(
                "resource holds {} bytes but reports {size}",
                resource.len()
            ));
            let error = FrameError::Process {
                frame_index: self.frame_index,
                source,
            };
            self.fail(error);
            return;
        }
        if self.buffer.len() < size {
            let error = FrameError::BufferTooSmall {
                frame_index: self.frame_index,
                needed: size,
                actual: self.buffer.len(),
            };
            self.fail(error);
            return;
        }

        self.buffer[..size].copy_from_slice(&resource[..size]);
        self.finish(Ok(size));
    }

    pub(crate) fn fail(mut self: Box<Self>, error: FrameError) {
        log::warn!("Frame {} failed: {error}", self.frame_index);
        self.finish(Err(error));
    }

    /// Withdraws a request that never reached the engine and returns its
    /// untouched buffer. The caller's signal is dropped without an outcome.
    pub(crate) fn into_buffer(mut self: Box<Self>) -> Vec<u8> {
        self.notifier = None;
        self.state = RequestState::Failed;
        std::mem::take(&mut self.buffer)
    }

    fn finish(&mut self, result: Result<usize, FrameError>) {
        let Some(notifier) = self.notifier.take() else {
            return;
        };
        self.state = if result.is_ok() {
            RequestState::Done
        } else {
            RequestState::Failed
        };
        // Free the admission slot before the caller can observe the outcome.
        self.permit = None;
        notifier.complete(std::mem::take(&mut self.buffer), result);
    }
}

impl Drop for FrameRequestContext {
    fn drop(&mut self) {
        if self.notifier.is_some() {
            log::warn!(
                "Frame {} dropped in state {:?} without completing",
                self.frame_index,
                self.state
            );
            let frame_index = self.frame_index;
            self.finish(Err(FrameError::Abandoned { frame_index }));
        }
    }
}

impl fmt::Debug for FrameRequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameRequestContext")
            .field("frame_index", &self.frame_index)
            .field("format", &self.format)
            .field("state", &self.state)
            .field("buffer_len", &self.buffer.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::domain::job::{Rejected, UserData};
    use crate::request::completion_signal::{completion_channel, CompletionSignal};
    use crate::request::job_throttle::JobThrottle;

    struct FakeImage {
        data: Vec<u8>,
        reported: usize,
    }

    impl ProcessedImage for FakeImage {
        fn width(&self) -> u32 {
            2
        }
        fn height(&self) -> u32 {
            1
        }
        fn resource_format(&self) -> ResourceFormat {
            ResourceFormat::BgraU8
        }
        fn resource(&self) -> &[u8] {
            &self.data
        }
        fn resource_size_bytes(&self) -> usize {
            self.reported
        }
    }

    #[derive(Default)]
    struct FakeJob {
        data: Option<UserData>,
    }

    impl Job for FakeJob {
        fn set_user_data(&mut self, data: UserData) {
            self.data = Some(data);
        }
        fn take_user_data(&mut self) -> Option<UserData> {
            self.data.take()
        }
        fn submit(self: Box<Self>) -> Result<(), Rejected> {
            Ok(())
        }
    }

    fn context(
        frame_index: u64,
        buffer: Vec<u8>,
    ) -> (Box<FrameRequestContext>, CompletionSignal, JobThrottle) {
        let throttle = JobThrottle::new(None);
        let (notifier, signal) = completion_channel(frame_index);
        let permit = throttle.try_acquire().unwrap();
        let ctx = FrameRequestContext::new(
            frame_index,
            ResourceFormat::BgraU8,
            buffer,
            notifier,
            permit,
        );
        (Box::new(ctx), signal, throttle)
    }

    #[test]
    fn test_deliver_copies_exact_size() {
        let (ctx, signal, throttle) = context(1, vec![0u8; 10]);
        let image = FakeImage {
            data: vec![5u8; 8],
            reported: 8,
        };
        ctx.deliver(&image);
        let outcome = signal.wait();
        assert_eq!(outcome.result, Ok(8));
        assert_eq!(&outcome.buffer[..8], &[5u8; 8]);
        assert_eq!(&outcome.buffer[8..], &[0u8; 2]);
        assert_eq!(throttle.in_flight(), 0);
    }

    #[test]
    fn test_deliver_rejects_small_buffer_without_writing() {
        let (ctx, signal, _throttle) = context(2, vec![1u8; 4]);
        let image = FakeImage {
            data: vec![5u8; 8],
            reported: 8,
        };
        ctx.deliver(&image);
        let outcome = signal.wait();
        assert_eq!(
            outcome.result,
            Err(FrameError::BufferTooSmall {
                frame_index: 2,
                needed: 8,
                actual: 4
            })
        );
        assert_eq!(outcome.buffer, vec![1u8; 4]);
    }

    #[test]
    fn test_deliver_rejects_short_resource() {
        let (ctx, signal, _throttle) = context(3, vec![0u8; 16]);
        let image = FakeImage {
            data: vec![5u8; 4],
            reported: 8,
        };
        ctx.deliver(&image);
        let outcome = signal.wait();
        assert!(matches!(outcome.result, Err(FrameError::Process { .. })));
        assert_eq!(outcome.buffer, vec![0u8; 16]);
    }

    #[test]
    fn test_drop_completes_as_abandoned_and_frees_slot() {
        let (ctx, signal, throttle) = context(4, vec![3u8; 4]);
        assert_eq!(throttle.in_flight(), 1);
        drop(ctx);
        let outcome = signal.wait();
        assert_eq!(outcome.result, Err(FrameError::Abandoned { frame_index: 4 }));
        assert_eq!(outcome.buffer, vec![3u8; 4]);
        assert_eq!(throttle.in_flight(), 0);
    }

    #[test]
    fn test_into_buffer_withdraws_silently() {
        let (ctx, signal, throttle) = context(5, vec![8u8; 4]);
        let buffer = ctx.into_buffer();
        assert_eq!(buffer, vec![8u8; 4]);
        assert_eq!(throttle.in_flight(), 0);
        // The notifier was dropped, so the signal reports the request as gone.
        assert_eq!(
            signal.wait().result,
            Err(FrameError::Abandoned { frame_index: 5 })
        );
    }

    #[test]
    fn test_take_from_job_roundtrip() {
        let (ctx, _signal, _throttle) = context(6, vec![]);
        let mut job = FakeJob::default();
        job.set_user_data(ctx);
        let taken = FrameRequestContext::take_from(&mut job).unwrap();
        assert_eq!(taken.frame_index(), 6);
        assert_eq!(taken.format(), ResourceFormat::BgraU8);
        assert_eq!(taken.state(), RequestState::AwaitingRead);
        assert!(FrameRequestContext::take_from(&mut job).is_none());
        taken.into_buffer();
    }

    #[test]
    fn test_take_from_leaves_foreign_data() {
        let mut job = FakeJob::default();
        job.set_user_data(Box::new(17u32));
        assert!(FrameRequestContext::take_from(&mut job).is_none());
        let data = job.take_user_data().unwrap();
        assert_eq!(*data.downcast::<u32>().unwrap(), 17);
    }

    #[test]
    fn test_state_transitions() {
        let (mut ctx, signal, _throttle) = context(7, vec![0u8; 2]);
        ctx.mark_awaiting_process();
        assert_eq!(ctx.state(), RequestState::AwaitingProcess);
        ctx.fail(FrameError::Abandoned { frame_index: 7 });
        assert!(signal.wait().result.is_err());
    }
}
