//! Context implementation for operation-scoped cancellation
//!
//! This module provides the Context type which carries an operation's
//! cancellation signal, its deadline and a log id across async boundaries.
//! Every suspension point in the engine races against [`Context::cancelled`].

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{self, Instant};
use uuid::Uuid;

/// Context carries operation-scoped values like cancellation signals and deadlines
/// CRITICAL: Pass this as first parameter to ALL async trait methods
/// This enables proper cancellation and timeout handling
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    log_id: String,
    deadline: Option<Instant>,
    done: watch::Receiver<bool>,
    done_tx: watch::Sender<bool>,
}

impl Context {
    pub fn new() -> Self {
        let (done_tx, done_rx) = watch::channel(false);

        Self {
            inner: Arc::new(ContextInner {
                log_id: Uuid::new_v4().to_string(),
                deadline: None,
                done: done_rx,
                done_tx,
            }),
        }
    }

    /// Derive a child context that is cancelled when `timeout` elapses or
    /// when this context is cancelled, whichever comes first.
    ///
    /// Must be called from within a tokio runtime.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let mut deadline = Instant::now() + timeout;
        if let Some(parent) = self.inner.deadline {
            deadline = deadline.min(parent);
        }

        let (done_tx, done_rx) = watch::channel(*self.inner.done.borrow());

        let child_tx = done_tx.clone();
        let parent = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = time::sleep_until(deadline) => {}
                _ = parent.cancelled() => {}
                _ = child_tx.closed() => return,
            }
            let _ = child_tx.send(true);
        });

        Self {
            inner: Arc::new(ContextInner {
                log_id: self.inner.log_id.clone(),
                deadline: Some(deadline),
                done: done_rx,
                done_tx,
            }),
        }
    }

    /// Identifier attached to every log line emitted on behalf of this context.
    pub fn log_id(&self) -> &str {
        &self.inner.log_id
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.done.borrow()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Returns a channel that flips to `true` when work done on behalf of
    /// this context should be cancelled
    pub fn done(&self) -> watch::Receiver<bool> {
        self.inner.done.clone()
    }

    /// Completes once this context has been cancelled or its deadline passed.
    pub async fn cancelled(&self) {
        let mut done = self.done();
        // The sender lives in `inner`, so the channel cannot close while `self` is alive.
        let _ = done.wait_for(|cancelled| *cancelled).await;
    }

    pub fn cancel(&self) {
        let _ = self.inner.done_tx.send(true);
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("log_id", &self.inner.log_id)
            .field("deadline", &self.inner.deadline)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
