use std::any::Any;
use std::fmt;

use crate::engine::domain::decode_engine::EngineError;
use crate::shared::resource_format::ResourceFormat;

/// Opaque per-job payload. The engine carries it from submission to callback
/// without looking inside.
pub type UserData = Box<dyn Any + Send>;

/// One asynchronous engine operation.
///
/// Dropping a job releases it. Submitting moves the job into the engine, which
/// hands it back through the matching callback once the work is done.
pub trait Job: Send {
    fn set_user_data(&mut self, data: UserData);

    fn take_user_data(&mut self) -> Option<UserData>;

    fn submit(self: Box<Self>) -> Result<(), Rejected>;
}

/// A submission the engine refused. The job comes back so its user data can
/// be recovered before it is released.
pub struct Rejected {
    pub job: Box<dyn Job>,
    pub error: EngineError,
}

impl fmt::Debug for Rejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rejected")
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

/// Compressed frame delivered by a completed read job.
pub trait RawFrame: Send {
    fn frame_index(&self) -> u64;

    /// Must be called before creating the decode job; engines do not default
    /// to a layout the host can consume.
    fn set_resource_format(&mut self, format: ResourceFormat) -> Result<(), EngineError>;

    fn create_decode_and_process_job(self: Box<Self>) -> Result<Box<dyn Job>, EngineError>;
}

/// Decoded, processed pixels delivered by a completed decode-and-process job.
pub trait ProcessedImage: Send {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn resource_format(&self) -> ResourceFormat;
    fn resource(&self) -> &[u8];
    fn resource_size_bytes(&self) -> usize;
}
