use crate::error::{RateLimitError, Result};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Cancellation and deadline carried into every store and limiter call
///
/// The check happens on entry only. Store operations are O(1) apart from
/// cleanup, so there is no mid-operation preemption.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl RequestContext {
    /// A context that is never cancelled and has no deadline
    pub fn background() -> Self {
        Self::default()
    }

    /// Create a context bound to an existing cancellation token
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Set a deadline `timeout` from now, keeping any earlier deadline
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        });
        self
    }

    /// Derive a child context: cancelled with the parent, same deadline
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Cancel this context (and any children)
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Fail fast if the context has already been cancelled or has expired
    pub fn check(&self) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(RateLimitError::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(RateLimitError::Timeout);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_background_context_is_live() {
        let ctx = RequestContext::background();
        assert!(ctx.check().is_ok());
        assert!(ctx.deadline().is_none());
    }

    #[test]
    fn test_cancelled_context() {
        let ctx = RequestContext::background();
        ctx.cancel();
        assert!(matches!(ctx.check(), Err(RateLimitError::Cancelled)));
    }

    #[test]
    fn test_parent_cancellation_reaches_child() {
        let parent = RequestContext::background();
        let child = parent.child();
        parent.cancel();
        assert!(matches!(child.check(), Err(RateLimitError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expires() {
        let ctx = RequestContext::background().with_timeout(Duration::from_millis(100));
        assert!(ctx.check().is_ok());

        tokio::time::advance(Duration::from_millis(150)).await;
        assert!(matches!(ctx.check(), Err(RateLimitError::Timeout)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_keeps_earlier_deadline() {
        let ctx = RequestContext::background()
            .with_timeout(Duration::from_secs(1))
            .with_timeout(Duration::from_secs(10));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(matches!(ctx.check(), Err(RateLimitError::Timeout)));
    }

    #[test]
    fn test_cancellation_wins_over_deadline() {
        let ctx = RequestContext::background().with_timeout(Duration::ZERO);
        ctx.cancel();
        assert!(matches!(ctx.check(), Err(RateLimitError::Cancelled)));
    }
}
