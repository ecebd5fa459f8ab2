//! Scheduled waits.

use tokio::time::{sleep_until, Instant};

use super::{CancelToken, Cancelled};

/// A pending timer with a deadline and a cancellation token.
///
/// Created through [`TeardownScope::schedule`](super::TeardownScope::schedule)
/// so the owning scope can invalidate it; consumed when it fires.
#[derive(Debug)]
pub struct ScheduledWait {
    deadline: Instant,
    token: CancelToken,
    scope: CancelToken,
}

impl ScheduledWait {
    pub(crate) fn new(deadline: Instant, token: CancelToken, scope: CancelToken) -> Self {
        Self {
            deadline,
            token,
            scope,
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled() || self.scope.is_cancelled()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Suspend until the deadline. A cancelled wait never reports `Ok`.
    pub async fn fired(self) -> Result<(), Cancelled> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(Cancelled),
            _ = self.scope.cancelled() => Err(Cancelled),
            _ = sleep_until(self.deadline) => {
                if self.is_cancelled() {
                    return Err(Cancelled);
                }
                // Fired waits are spent; release the registration.
                self.token.cancel();
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::TeardownScope;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn wait_fires_at_deadline() {
        let scope = TeardownScope::new("test");
        let start = Instant::now();
        let wait = scope.schedule(Duration::from_millis(1500));
        assert_eq!(wait.deadline(), start + Duration::from_millis(1500));
        wait.fired().await.unwrap();
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(1500));
        assert!(elapsed <= Duration::from_millis(1501));
        assert_eq!(scope.live_tokens(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn nested_sequential_waits_accumulate() {
        let scope = TeardownScope::new("test");
        let start = Instant::now();
        scope.after(Duration::from_millis(500)).await.unwrap();
        scope.after(Duration::from_millis(2000)).await.unwrap();
        scope.after(Duration::from_millis(1500)).await.unwrap();
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(4000));
        assert!(elapsed <= Duration::from_millis(4003));
    }

    #[tokio::test(start_paused = true)]
    async fn individually_cancelled_wait_errors() {
        let scope = TeardownScope::new("test");
        let wait = scope.schedule(Duration::from_secs(1));
        wait.cancel();
        assert!(wait.is_cancelled());
        assert_eq!(wait.fired().await, Err(Cancelled));
        assert!(!scope.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_wins_over_simultaneous_deadline() {
        let scope = TeardownScope::new("test");
        let wait = scope.schedule(Duration::from_millis(100));
        tokio::time::sleep(Duration::from_millis(100)).await;
        scope.close();
        assert_eq!(wait.fired().await, Err(Cancelled));
    }
}
