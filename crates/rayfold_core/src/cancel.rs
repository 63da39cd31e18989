use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rayfold_error::{DbError, Result};

/// Default poll interval, check once every 64 iterations.
pub const DEFAULT_POLL_INTERVAL: PollInterval = PollInterval(63);

/// Shared, one-way cancellation signal.
///
/// Cloning produces a handle to the same signal. Once canceled, a token stays
/// canceled.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

#[derive(Debug, Default)]
struct TokenInner {
    canceled: AtomicBool,
    /// Cancellation of the parent is observed by this token, but not the other
    /// way around.
    parent: Option<CancellationToken>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a token that is canceled when either it or this token is
    /// canceled.
    pub fn child_token(&self) -> Self {
        CancellationToken {
            inner: Arc::new(TokenInner {
                canceled: AtomicBool::new(false),
                parent: Some(self.clone()),
            }),
        }
    }

    pub fn cancel(&self) {
        self.inner.canceled.store(true, Ordering::Release);
    }

    pub fn is_canceled(&self) -> bool {
        if self.inner.canceled.load(Ordering::Acquire) {
            return true;
        }
        match &self.inner.parent {
            Some(parent) => parent.is_canceled(),
            None => false,
        }
    }
}

/// Bitmask controlling how often hot loops check for cancellation.
///
/// Always one less than a power of two. A loop checks on every iteration `i`
/// where `i & mask == 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollInterval(usize);

impl PollInterval {
    pub fn try_new(mask: usize) -> Result<Self> {
        match mask.checked_add(1) {
            Some(n) if n.is_power_of_two() => Ok(PollInterval(mask)),
            _ => Err(DbError::new("Poll interval must be one less than a power of two")
                .with_field("poll_interval", mask)),
        }
    }

    pub const fn mask(&self) -> usize {
        self.0
    }
}

impl Default for PollInterval {
    fn default() -> Self {
        DEFAULT_POLL_INTERVAL
    }
}

/// Token plus the interval to check it at.
#[derive(Debug, Clone, Default)]
pub struct CancellationState {
    token: CancellationToken,
    poll_interval: PollInterval,
}

impl CancellationState {
    pub fn new(token: CancellationToken, poll_interval: PollInterval) -> Self {
        CancellationState {
            token,
            poll_interval,
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn poll_interval(&self) -> PollInterval {
        self.poll_interval
    }

    /// If iteration `iteration` of a loop should check for cancellation.
    #[inline]
    pub fn should_poll(&self, iteration: usize) -> bool {
        iteration & self.poll_interval.0 == 0
    }

    /// Errors if the token has been canceled.
    #[inline]
    pub fn check_if_canceled(&self) -> Result<()> {
        if self.token.is_canceled() {
            return Err(DbError::canceled());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rayfold_error::ErrorKind;

    use super::*;

    #[test]
    fn token_transitions_once() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_canceled());

        token.cancel();
        assert!(clone.is_canceled());

        token.cancel();
        assert!(token.is_canceled());
    }

    #[test]
    fn child_observes_parent() {
        let parent = CancellationToken::new();
        let child = parent.child_token();

        parent.cancel();
        assert!(child.is_canceled());
    }

    #[test]
    fn parent_does_not_observe_child() {
        let parent = CancellationToken::new();
        let child = parent.child_token();

        child.cancel();
        assert!(child.is_canceled());
        assert!(!parent.is_canceled());
    }

    #[test]
    fn poll_interval_validation() {
        assert_eq!(255, PollInterval::try_new(255).unwrap().mask());
        assert_eq!(0, PollInterval::try_new(0).unwrap().mask());
        PollInterval::try_new(100).unwrap_err();
        PollInterval::try_new(256).unwrap_err();
        PollInterval::try_new(usize::MAX).unwrap_err();
    }

    #[test]
    fn should_poll_uses_mask() {
        let state = CancellationState::new(
            CancellationToken::new(),
            PollInterval::try_new(3).unwrap(),
        );
        let polled: Vec<_> = (0..10).filter(|&i| state.should_poll(i)).collect();
        assert_eq!(vec![0, 4, 8], polled);
    }

    #[test]
    fn check_if_canceled() {
        let token = CancellationToken::new();
        let state = CancellationState::new(token.clone(), PollInterval::default());
        state.check_if_canceled().unwrap();

        token.cancel();
        let err = state.check_if_canceled().unwrap_err();
        assert_eq!(ErrorKind::Canceled, err.kind());
    }
}
