//! Synchronous, pull-based frame source over asynchronous decode engines.
//!
//! A [`session::clip_session::ClipSession`] opens a clip on a
//! [`engine::domain::decode_engine::DecodeEngine`] and turns each
//! "give me frame N" into a read job and a decode job whose completions are
//! routed back to the blocked caller.

pub mod engine {
    pub mod domain {
        pub mod decode_callback;
        pub mod decode_engine;
        pub mod job;
    }
    pub mod infrastructure;
}

pub mod request {
    pub mod completion_signal;
    pub mod decode_callback_handler;
    pub mod frame_error;
    pub mod frame_request_context;
    pub mod frame_request_dispatcher;
    pub mod job_throttle;
}

pub mod session {
    pub mod clip_session;
    pub mod session_config;
}

pub mod shared {
    pub mod clip_properties;
    pub mod constants;
    pub mod frame_rate;
    pub mod resource_format;
}
