use std::time::Duration;

use crate::shared::constants::DEFAULT_FRAME_TIMEOUT;

/// Tunables for a [`ClipSession`](crate::session::clip_session::ClipSession).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    /// Upper bound on how long [`read_frame`] blocks for one frame.
    ///
    /// [`read_frame`]: crate::session::clip_session::ClipSession::read_frame
    pub frame_timeout: Duration,
    /// Hard cap on concurrent requests. `None` only counts them.
    pub max_jobs_in_flight: Option<usize>,
}

impl SessionConfig {
    pub fn with_frame_timeout(mut self, timeout: Duration) -> Self {
        self.frame_timeout = timeout;
        self
    }

    pub fn with_max_jobs_in_flight(mut self, limit: usize) -> Self {
        self.max_jobs_in_flight = Some(limit);
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            frame_timeout: DEFAULT_FRAME_TIMEOUT,
            max_jobs_in_flight: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::constants::SUGGESTED_MAX_JOBS_IN_FLIGHT;

    #[test]
    fn test_default_is_unlimited_with_timeout() {
        let config = SessionConfig::default();
        assert_eq!(config.frame_timeout, DEFAULT_FRAME_TIMEOUT);
        assert_eq!(config.max_jobs_in_flight, None);
    }

    #[test]
    fn test_builders() {
        let config = SessionConfig::default()
            .with_frame_timeout(Duration::from_millis(250))
            .with_max_jobs_in_flight(SUGGESTED_MAX_JOBS_IN_FLIGHT);
        assert_eq!(config.frame_timeout, Duration::from_millis(250));
        assert_eq!(config.max_jobs_in_flight, Some(SUGGESTED_MAX_JOBS_IN_FLIGHT));
    }
}
