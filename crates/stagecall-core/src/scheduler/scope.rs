//! Teardown scopes.
//!
//! A scope owns every wait, cue trigger, tick loop and helper task spawned on
//! behalf of one stage (or one script). Closing the scope cancels all of them
//! synchronously, so nothing spawned by an exited stage can fire into its
//! successor. Dropping the last handle closes the scope as well.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use super::{CancelToken, Cancelled, ScheduledWait};
use crate::lock;

#[derive(Debug, Clone)]
pub struct TeardownScope {
    inner: Arc<ScopeInner>,
}

#[derive(Debug)]
struct ScopeInner {
    label: String,
    token: CancelToken,
    registry: Mutex<Registry>,
}

#[derive(Debug, Default)]
struct Registry {
    tokens: Vec<CancelToken>,
    tasks: Vec<JoinHandle<()>>,
    children: Vec<TeardownScope>,
}

impl Registry {
    fn teardown(&mut self) -> usize {
        let mut cancelled = 0;
        for token in self.tokens.drain(..) {
            if !token.is_cancelled() {
                token.cancel();
                cancelled += 1;
            }
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
        for child in self.children.drain(..) {
            cancelled += child.close();
        }
        cancelled
    }
}

impl TeardownScope {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                label: label.into(),
                token: CancelToken::new(),
                registry: Mutex::new(Registry::default()),
            }),
        }
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// The scope-wide token, cancelled when the scope closes.
    pub fn token(&self) -> &CancelToken {
        &self.inner.token
    }

    pub fn is_closed(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Resolves once the scope is closed.
    pub async fn cancelled(&self) {
        self.inner.token.cancelled().await
    }

    /// Create a nested scope that is closed together with this one.
    pub fn child(&self, label: impl Into<String>) -> TeardownScope {
        let child = TeardownScope::new(label);
        let mut registry = lock(&self.inner.registry);
        if self.is_closed() {
            drop(registry);
            child.close();
        } else {
            registry.children.retain(|c| !c.is_closed());
            registry.children.push(child.clone());
        }
        child
    }

    /// Attach an externally created token. A closed scope cancels it at once.
    pub fn register(&self, token: CancelToken) -> CancelToken {
        let mut registry = lock(&self.inner.registry);
        if self.is_closed() {
            token.cancel();
        } else {
            registry.tokens.retain(|t| !t.is_cancelled());
            registry.tokens.push(token.clone());
        }
        token
    }

    pub fn new_token(&self) -> CancelToken {
        self.register(CancelToken::new())
    }

    /// Spawn a task owned by this scope.
    ///
    /// The task stops at its next suspension point when either the returned
    /// token or the scope is cancelled.
    pub fn spawn<F>(&self, fut: F) -> CancelToken
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = self.new_token();
        let task_token = token.clone();
        let scope_token = self.inner.token.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = task_token.cancelled() => {}
                _ = scope_token.cancelled() => {}
                _ = fut => {}
            }
        });

        let mut registry = lock(&self.inner.registry);
        if self.is_closed() {
            handle.abort();
        } else {
            registry.tasks.retain(|h| !h.is_finished());
            registry.tasks.push(handle);
        }
        token
    }

    /// Arm a wait that fires `duration` from now unless the scope closes first.
    pub fn schedule(&self, duration: Duration) -> ScheduledWait {
        ScheduledWait::new(
            Instant::now() + duration,
            self.new_token(),
            self.inner.token.clone(),
        )
    }

    /// Suspend for `duration`. Returns `Err(Cancelled)` if the scope closed.
    pub async fn after(&self, duration: Duration) -> Result<(), Cancelled> {
        self.schedule(duration).fired().await
    }

    /// Number of registered tokens that are still live.
    pub fn live_tokens(&self) -> usize {
        let registry = lock(&self.inner.registry);
        registry.tokens.iter().filter(|t| !t.is_cancelled()).count()
            + registry.children.iter().map(TeardownScope::live_tokens).sum::<usize>()
    }

    /// Cancel everything owned by this scope, including nested scopes.
    ///
    /// Returns the number of tokens that were still live.
    pub fn close(&self) -> usize {
        self.inner.token.cancel();
        let mut registry = std::mem::take(&mut *lock(&self.inner.registry));
        let cancelled = registry.teardown();
        debug!(scope = %self.inner.label, cancelled, "scope closed");
        cancelled
    }
}

impl Drop for ScopeInner {
    fn drop(&mut self) {
        self.token.cancel();
        let registry = self
            .registry
            .get_mut()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        registry.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn close_cancels_pending_waits() {
        let scope = TeardownScope::new("stage");
        let waiter = {
            let scope = scope.clone();
            tokio::spawn(async move { scope.after(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(scope.live_tokens(), 1);

        assert_eq!(scope.close(), 1);
        assert_eq!(waiter.await.unwrap(), Err(Cancelled));
        assert_eq!(scope.live_tokens(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_scope_never_runs_spawned_continuations() {
        let scope = TeardownScope::new("stage");
        let hits = Arc::new(AtomicUsize::new(0));
        {
            let hits = Arc::clone(&hits);
            scope.spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                hits.fetch_add(1, Ordering::SeqCst);
            });
        }
        scope.close();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn parent_close_reaches_nested_scopes() {
        let root = TeardownScope::new("script");
        let stage = root.child("stage");
        let token = stage.new_token();
        root.close();
        assert!(stage.is_closed());
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn registering_on_closed_scope_cancels_immediately() {
        let scope = TeardownScope::new("stage");
        scope.close();
        let token = scope.new_token();
        assert!(token.is_cancelled());
        assert!(scope.child("late").is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_last_handle_tears_down() {
        let scope = TeardownScope::new("stage");
        let token = scope.new_token();
        drop(scope);
        assert!(token.is_cancelled());
    }
}
