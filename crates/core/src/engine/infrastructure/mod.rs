pub mod engine_core;
pub mod ffmpeg_engine;
pub mod synthetic_engine;
