//! Cancellation and deadlines for remote-issuing operations

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Cancellation signal passed explicitly to every remote-issuing operation
///
/// Clones share the cancel flag, so a token handed to an operation can be
/// cancelled from another thread. A token may also carry a deadline, after
/// which it reads as cancelled.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    /// A token that never expires on its own
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            flag: Arc::default(),
            deadline: Some(deadline),
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether the token was cancelled or its deadline has passed
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst) || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, if there is one
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Same flag, with `timeout` applied when the token has no deadline yet
    pub(crate) fn or_timeout(&self, timeout: Option<Duration>) -> Self {
        match (self.deadline, timeout) {
            (None, Some(timeout)) => Self {
                flag: Arc::clone(&self.flag),
                deadline: Some(Instant::now() + timeout),
            },
            _ => self.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_is_shared_between_clones() {
        let token = CancelToken::new();
        let handed_out = token.clone();
        assert!(!handed_out.is_cancelled());
        token.cancel();
        assert!(handed_out.is_cancelled());
    }

    #[test]
    fn test_expired_deadline_reads_as_cancelled() {
        let token = CancelToken::with_deadline(Instant::now());
        assert!(token.is_cancelled());
        assert_eq!(token.remaining(), Some(Duration::ZERO));

        let token = CancelToken::with_timeout(Duration::from_secs(3600));
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_or_timeout_keeps_existing_deadline() {
        let deadline = Instant::now() + Duration::from_secs(5);
        let token = CancelToken::with_deadline(deadline);
        assert_eq!(
            token.or_timeout(Some(Duration::from_secs(60))).deadline(),
            Some(deadline)
        );

        let token = CancelToken::new();
        let bounded = token.or_timeout(Some(Duration::from_secs(60)));
        assert!(bounded.deadline().is_some());
        token.cancel();
        assert!(bounded.is_cancelled());
    }
}
