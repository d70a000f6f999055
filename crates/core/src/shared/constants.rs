use std::time::Duration;

/// Upper bound on fractional digits used when reducing a decimal frame rate.
pub const MAX_FRAME_RATE_FRACTION_DIGITS: usize = 6;

/// How long a synchronous frame read waits before giving up.
pub const DEFAULT_FRAME_TIMEOUT: Duration = Duration::from_secs(10);

/// Suggested jobs-in-flight limit for hosts that opt into admission control.
pub const SUGGESTED_MAX_JOBS_IN_FLIGHT: usize = 3;

/// Worker threads the synthetic engine spawns when none are configured.
pub const DEFAULT_SYNTHETIC_WORKERS: usize = 2;

/// Bit depth of the interleaved PCM exposed by the ffmpeg engine.
pub const FFMPEG_AUDIO_BIT_DEPTH: u32 = 16;
