//! State polling until a remote resource settles
//!
//! The poller is state-agnostic: it repeatedly fetches the current lifecycle
//! state and classifies it against the caller's failure, target and pending
//! sets. Failure membership is checked before target membership, so a state
//! listed in both is treated as a failure.

use crate::context::Context;
use crate::error::{ConvergeError, Result};
use crate::state::LifecycleState;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// One observation of a remote resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation<S> {
    Present(S),
    Absent,
}

/// Terminal, non-error outcome of a poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<S> {
    Reached(S),
    /// Only returned with [`OnAbsent::Outcome`].
    Absent,
}

/// What an "absent" observation means for the waiting operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnAbsent {
    /// Absence is an expected end state, e.g. while waiting for deletion.
    Outcome,
    /// Absence fails the poll with [`ConvergeError::NotFound`].
    Error,
    /// Keep polling through up to `n` consecutive absent observations before
    /// failing, for read-after-create lag.
    Tolerate(u32),
}

#[derive(Debug, thiserror::Error)]
#[error("resource disappeared while waiting for {waiting_for}")]
struct Disappeared {
    waiting_for: String,
}

/// Governs one polling loop. Built per wait and discarded afterwards.
#[derive(Debug, Clone)]
pub struct PollSpec<S> {
    pub target: Vec<S>,
    pub failure: Vec<S>,
    /// When non-empty, any state outside pending, target and failure aborts the poll.
    pub pending: Vec<S>,
    pub interval: Duration,
    pub timeout: Duration,
    /// Wait before the first fetch.
    pub delay: Duration,
    pub on_absent: OnAbsent,
}

impl<S: LifecycleState> PollSpec<S> {
    pub fn new(target: impl Into<Vec<S>>, timeout: Duration) -> Self {
        Self {
            target: target.into(),
            failure: Vec::new(),
            pending: Vec::new(),
            interval: Duration::from_secs(3),
            timeout,
            delay: Duration::ZERO,
            on_absent: OnAbsent::Error,
        }
    }

    pub fn with_failure(mut self, failure: impl Into<Vec<S>>) -> Self {
        self.failure = failure.into();
        self
    }

    pub fn with_pending(mut self, pending: impl Into<Vec<S>>) -> Self {
        self.pending = pending.into();
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn on_absent(mut self, on_absent: OnAbsent) -> Self {
        self.on_absent = on_absent;
        self
    }

    fn describe_target(&self) -> String {
        if self.target.is_empty() {
            return "absence".to_string();
        }
        self.target
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("|")
    }

    /// Poll `fetch` until a terminal decision.
    ///
    /// Errors from `fetch` end the poll and are returned unchanged.
    pub async fn poll<F, Fut>(&self, ctx: &Context, mut fetch: F) -> Result<PollOutcome<S>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Observation<S>>>,
    {
        let start = Instant::now();
        let mut polls: u32 = 0;
        let mut absent_streak: u32 = 0;
        let mut last: Option<S> = None;

        if !self.delay.is_zero() {
            sleep_or_cancel(ctx, self.delay).await?;
        }

        loop {
            if ctx.is_cancelled() {
                return Err(ConvergeError::Cancelled);
            }

            polls += 1;
            let observation = tokio::select! {
                biased;
                _ = ctx.cancelled() => return Err(ConvergeError::Cancelled),
                observation = fetch() => observation?,
            };

            match observation {
                Observation::Absent => match self.on_absent {
                    OnAbsent::Outcome => {
                        tracing::debug!(log_id = ctx.log_id(), "Resource is absent after {} polls", polls);
                        return Ok(PollOutcome::Absent);
                    }
                    OnAbsent::Error => return Err(self.disappeared()),
                    OnAbsent::Tolerate(limit) => {
                        absent_streak += 1;
                        if absent_streak > limit {
                            return Err(self.disappeared());
                        }
                        tracing::debug!(
                            log_id = ctx.log_id(),
                            "Resource not visible yet ({}/{})",
                            absent_streak,
                            limit
                        );
                    }
                },
                Observation::Present(state) => {
                    absent_streak = 0;
                    if let Some(prev) = &last {
                        if !prev.can_transition_to(&state) {
                            tracing::warn!(
                                log_id = ctx.log_id(),
                                "Undocumented state transition {} -> {}",
                                prev,
                                state
                            );
                        }
                    }

                    if self.failure.contains(&state) {
                        tracing::info!(log_id = ctx.log_id(), "Resource reached failure state {}", state);
                        return Err(ConvergeError::DeclaredFailure {
                            state: state.to_string(),
                        });
                    }
                    if self.target.contains(&state) {
                        tracing::debug!(
                            log_id = ctx.log_id(),
                            "Resource reached {} after {} polls",
                            state,
                            polls
                        );
                        return Ok(PollOutcome::Reached(state));
                    }
                    if !self.pending.is_empty() && !self.pending.contains(&state) {
                        return Err(ConvergeError::UnexpectedState {
                            state: state.to_string(),
                        });
                    }

                    tracing::debug!(
                        log_id = ctx.log_id(),
                        "Resource is {}, waiting for {}",
                        state,
                        self.describe_target()
                    );
                    last = Some(state);
                }
            }

            let elapsed = start.elapsed();
            let remaining = self.timeout.saturating_sub(elapsed);
            if remaining.is_zero() {
                return Err(ConvergeError::Timeout {
                    elapsed,
                    attempts: polls,
                    last_error: None,
                });
            }

            sleep_or_cancel(ctx, self.interval.min(remaining)).await?;
        }
    }

    fn disappeared(&self) -> ConvergeError {
        ConvergeError::NotFound(Box::new(Disappeared {
            waiting_for: self.describe_target(),
        }))
    }
}

async fn sleep_or_cancel(ctx: &Context, duration: Duration) -> Result<()> {
    tokio::select! {
        biased;
        _ = ctx.cancelled() => Err(ConvergeError::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}
