use crate::engine::domain::decode_engine::EngineError;
use crate::engine::domain::job::{Job, ProcessedImage, RawFrame};

/// Completion notifications from a decode engine.
///
/// Invoked on engine worker threads. The job is handed back by value; it is
/// released when the implementation drops it. Only the read and process
/// notifications are required, the rest default to no-ops.
pub trait DecodeCallback: Send + Sync {
    fn read_complete(&self, job: Box<dyn Job>, result: Result<Box<dyn RawFrame>, EngineError>);

    fn process_complete(
        &self,
        job: Box<dyn Job>,
        result: Result<Box<dyn ProcessedImage>, EngineError>,
    );

    fn decode_complete(&self, _job: &dyn Job, _result: Result<(), EngineError>) {}

    fn trim_progress(&self, _job: &dyn Job, _progress: f32) {}

    fn trim_complete(&self, _job: &dyn Job, _result: Result<(), EngineError>) {}

    fn sidecar_metadata_parse_warning(&self, _file: &str, _line: u32, _message: &str) {}

    fn sidecar_metadata_parse_error(&self, _file: &str, _line: u32, _message: &str) {}

    fn prepare_pipeline_complete(&self, _result: Result<(), EngineError>) {}
}
