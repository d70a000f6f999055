use std::fmt;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::request::frame_error::FrameError;

/// Final state of one frame request.
///
/// The destination buffer always comes back, filled on success and untouched
/// on failure. A buffer is only missing when the engine lost the request
/// entirely.
pub struct FrameOutcome {
    pub frame_index: u64,
    pub buffer: Vec<u8>,
    /// Bytes written into `buffer` on success.
    pub result: Result<usize, FrameError>,
}

impl FrameOutcome {
    fn abandoned(frame_index: u64) -> Self {
        Self {
            frame_index,
            buffer: Vec::new(),
            result: Err(FrameError::Abandoned { frame_index }),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

impl fmt::Debug for FrameOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameOutcome")
            .field("frame_index", &self.frame_index)
            .field("buffer_len", &self.buffer.len())
            .field("result", &self.result)
            .finish()
    }
}

/// Creates the two halves of a request's completion channel.
pub(crate) fn completion_channel(frame_index: u64) -> (CompletionNotifier, CompletionSignal) {
    let (tx, rx) = crossbeam_channel::bounded(1);
    (
        CompletionNotifier { frame_index, tx },
        CompletionSignal {
            frame_index,
            rx,
            outcome: None,
        },
    )
}

/// Writer half, owned by the request context. Completing consumes it, so a
/// request can be completed at most once.
#[derive(Debug)]
pub(crate) struct CompletionNotifier {
    frame_index: u64,
    tx: Sender<FrameOutcome>,
}

impl CompletionNotifier {
    pub(crate) fn complete(self, buffer: Vec<u8>, result: Result<usize, FrameError>) {
        let outcome = FrameOutcome {
            frame_index: self.frame_index,
            buffer,
            result,
        };
        if self.tx.send(outcome).is_err() {
            log::debug!(
                "Frame {} completed after its caller stopped waiting",
                self.frame_index
            );
        }
    }
}

/// Caller half of a frame request.
///
/// Returned by the dispatcher as soon as the read job is submitted. The caller
/// either polls it or blocks on it; the outcome becomes visible only after the
/// engine thread has finished writing the buffer.
pub struct CompletionSignal {
    frame_index: u64,
    rx: Receiver<FrameOutcome>,
    outcome: Option<FrameOutcome>,
}

impl CompletionSignal {
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Non-blocking check. Once this returns `true` it keeps returning `true`.
    pub fn poll(&mut self) -> bool {
        if self.outcome.is_some() {
            return true;
        }
        match self.rx.try_recv() {
            Ok(outcome) => {
                self.outcome = Some(outcome);
                true
            }
            Err(TryRecvError::Empty) => false,
            Err(TryRecvError::Disconnected) => {
                self.outcome = Some(FrameOutcome::abandoned(self.frame_index));
                true
            }
        }
    }

    /// Blocks until the request finishes. No timeout.
    pub fn wait(mut self) -> FrameOutcome {
        if let Some(outcome) = self.outcome.take() {
            return outcome;
        }
        self.rx
            .recv()
            .unwrap_or_else(|_| FrameOutcome::abandoned(self.frame_index))
    }

    /// Blocks for at most `timeout`. On expiry the still-pending signal is
    /// handed back so the caller can keep waiting or give up.
    pub fn wait_timeout(mut self, timeout: Duration) -> Result<FrameOutcome, CompletionSignal> {
        if let Some(outcome) = self.outcome.take() {
            return Ok(outcome);
        }
        match self.rx.recv_timeout(timeout) {
            Ok(outcome) => Ok(outcome),
            Err(RecvTimeoutError::Disconnected) => Ok(FrameOutcome::abandoned(self.frame_index)),
            Err(RecvTimeoutError::Timeout) => Err(self),
        }
    }
}

impl fmt::Debug for CompletionSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionSignal")
            .field("frame_index", &self.frame_index)
            .field("ready", &self.outcome.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_poll_before_completion_is_false() {
        let (_notifier, mut signal) = completion_channel(3);
        assert!(!signal.poll());
        assert!(!signal.poll());
        assert_eq!(signal.frame_index(), 3);
    }

    #[test]
    fn test_poll_sticks_after_completion() {
        let (notifier, mut signal) = completion_channel(3);
        notifier.complete(vec![1, 2, 3], Ok(3));
        assert!(signal.poll());
        assert!(signal.poll());
        let outcome = signal.wait();
        assert_eq!(outcome.frame_index, 3);
        assert_eq!(outcome.buffer, vec![1, 2, 3]);
        assert_eq!(outcome.result, Ok(3));
    }

    #[test]
    fn test_wait_sees_write_from_other_thread() {
        let (notifier, signal) = completion_channel(9);
        let writer = thread::spawn(move || {
            let mut buffer = vec![0u8; 4096];
            buffer.iter_mut().for_each(|b| *b = 0xAB);
            notifier.complete(buffer, Ok(4096));
        });
        let outcome = signal.wait();
        writer.join().unwrap();
        assert_eq!(outcome.result, Ok(4096));
        assert!(outcome.buffer.iter().all(|&b| b == 0xAB));
    }

    #[test]
    fn test_dropped_notifier_reports_abandoned() {
        let (notifier, signal) = completion_channel(5);
        drop(notifier);
        let outcome = signal.wait();
        assert_eq!(outcome.result, Err(FrameError::Abandoned { frame_index: 5 }));
        assert!(outcome.buffer.is_empty());
    }

    #[test]
    fn test_wait_timeout_returns_signal_on_expiry() {
        let (notifier, signal) = completion_channel(1);
        let signal = signal
            .wait_timeout(Duration::from_millis(10))
            .expect_err("nothing was sent");
        notifier.complete(vec![0u8; 2], Ok(2));
        let outcome = signal.wait_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(outcome.result, Ok(2));
    }

    #[test]
    fn test_completing_after_caller_left_does_not_panic() {
        let (notifier, signal) = completion_channel(2);
        drop(signal);
        notifier.complete(vec![0u8; 8], Ok(8));
    }

    #[test]
    fn test_failure_outcome_carries_buffer_back() {
        let (notifier, mut signal) = completion_channel(4);
        notifier.complete(
            vec![9u8; 4],
            Err(FrameError::Abandoned { frame_index: 4 }),
        );
        assert!(signal.poll());
        let outcome = signal.wait();
        assert!(!outcome.is_ok());
        assert_eq!(outcome.buffer, vec![9u8; 4]);
    }
}
