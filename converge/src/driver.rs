//! Create/read/update/delete orchestration for one declared resource
//!
//! A [`ResourceKind`] describes how to talk to one kind of remote resource.
//! [`Driver`] sequences its calls through the retry executor, the handle codec
//! and the state poller, moving each resource through
//! `Absent -> Creating -> Present -> (Updating -> Present)* -> Deleting -> Absent`.
//!
//! Not-found is interpreted per operation: read reports the resource as
//! [`ReadOutcome::Absent`], delete treats it as success, update fails with it.
//!
//! Updates are not transactional. Each changed attribute group is a separate
//! remote call; if one fails the earlier ones stay applied and the next read
//! reconciles declared state with whatever actually landed.

use crate::context::Context;
use crate::error::{Classify, ConvergeError, Result};
use crate::handle::ResourceHandle;
use crate::lock::{ActionGuard, ActionLock, NoopLock};
use crate::poll::{Observation, OnAbsent, PollOutcome, PollSpec};
use crate::retry::{execute, Backoff, RetryPolicy, READ_RETRY_TIMEOUT, WRITE_RETRY_TIMEOUT};
use crate::state::LifecycleState;
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Budgets applied by the driver to every remote call and wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Retry budget for calls that only observe remote state.
    pub read: Duration,
    /// Retry budget for mutating calls, and the budget of every convergence wait.
    pub write: Duration,
    pub poll_interval: Duration,
    pub backoff: Backoff,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            read: READ_RETRY_TIMEOUT,
            write: WRITE_RETRY_TIMEOUT,
            poll_interval: Duration::from_secs(3),
            backoff: Backoff::default(),
        }
    }
}

/// Lifecycle states a kind waits on. Empty sets disable the corresponding wait.
#[derive(Debug, Clone)]
pub struct Lifecycle<S> {
    /// States in which a created or asynchronously updated resource is usable.
    pub ready: Vec<S>,
    /// Provisioning states that end a wait with [`ConvergeError::DeclaredFailure`].
    /// A resource in one of them is deleted without quiescing.
    pub failed: Vec<S>,
    /// States a resource must reach before it can be deleted. Non-empty means
    /// delete calls [`ResourceKind::quiesce`] first.
    pub quiesced: Vec<S>,
    /// States that already count as deleted while the record is still visible.
    pub deleted: Vec<S>,
    /// Whether delete returns before the resource is gone.
    pub deletes_async: bool,
    /// Consecutive not-found observations tolerated right after create.
    pub absent_tolerance: u32,
    /// Wait before the first status poll after create or an asynchronous
    /// update, while the control plane may still report the previous state.
    pub settle: Duration,
}

impl<S> Default for Lifecycle<S> {
    fn default() -> Self {
        Self {
            ready: Vec::new(),
            failed: Vec::new(),
            quiesced: Vec::new(),
            deleted: Vec::new(),
            deletes_async: false,
            absent_tolerance: 0,
            settle: Duration::ZERO,
        }
    }
}

/// Outcome of [`Driver::read`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome<T> {
    Present(T),
    /// The resource was deleted out-of-band; drop it from declared state.
    Absent,
}

impl<T> ReadOutcome<T> {
    pub fn is_absent(&self) -> bool {
        matches!(self, ReadOutcome::Absent)
    }

    pub fn present(self) -> Option<T> {
        match self {
            ReadOutcome::Present(value) => Some(value),
            ReadOutcome::Absent => None,
        }
    }
}

/// Desired attributes plus the handle of the remote resource, if created.
#[derive(Debug, Clone)]
pub struct DeclaredResource<D> {
    pub desired: D,
    pub handle: Option<String>,
}

impl<D> DeclaredResource<D> {
    pub fn new(desired: D) -> Self {
        Self {
            desired,
            handle: None,
        }
    }

    pub fn with_handle(mut self, handle: impl Into<String>) -> Self {
        self.handle = Some(handle.into());
        self
    }
}

/// One kind of remote resource, as seen by the driver.
///
/// Methods perform exactly one remote call each; retries, waits and
/// not-found interpretation are the driver's job.
#[async_trait]
pub trait ResourceKind: Send + Sync {
    /// Declared attributes.
    type Desired: Send + Sync;
    /// Attributes reported by the control plane.
    type Observed: Send;
    type State: LifecycleState;
    /// Independently mutable attribute group, one remote call each.
    type Group: Debug + Send + Sync;
    type Error: std::error::Error + Classify + Send + Sync + 'static;

    /// Type name should be constant (e.g. "cloud_instance"). Also the action lock key.
    fn type_name(&self) -> &str;

    /// Number of parts in this kind's handle.
    fn handle_parts(&self) -> usize;

    fn lifecycle(&self) -> Lifecycle<Self::State> {
        Lifecycle::default()
    }

    /// Whether create, update and delete must hold the kind's action lock.
    fn serialized(&self) -> bool {
        false
    }

    /// Look up a remote resource equivalent to `desired`, before any handle exists.
    async fn find_existing(
        &self,
        ctx: Context,
        desired: &Self::Desired,
    ) -> std::result::Result<Option<Vec<String>>, Self::Error>;

    /// Issue the create call and return the server-assigned handle parts.
    ///
    /// `client_token` is the same for every retry of one driver create, so
    /// the control plane can deduplicate a create that landed despite an error.
    async fn create(
        &self,
        ctx: Context,
        desired: &Self::Desired,
        client_token: &str,
    ) -> std::result::Result<Vec<String>, Self::Error>;

    /// `Ok(None)` and a not-found error both mean the resource is gone.
    async fn read(
        &self,
        ctx: Context,
        handle: &ResourceHandle,
    ) -> std::result::Result<Option<Self::Observed>, Self::Error>;

    /// Current lifecycle state, used by every wait.
    async fn status(
        &self,
        ctx: Context,
        handle: &ResourceHandle,
    ) -> std::result::Result<Observation<Self::State>, Self::Error>;

    /// Attribute groups whose observed value differs from the declared one.
    fn changed_groups(&self, observed: &Self::Observed, desired: &Self::Desired)
        -> Vec<Self::Group>;

    /// Create-only attributes that `desired` would change.
    fn immutable_changes(
        &self,
        _observed: &Self::Observed,
        _desired: &Self::Desired,
    ) -> Vec<&'static str> {
        Vec::new()
    }

    /// Whether applying `group` starts an asynchronous remote transition.
    fn group_is_async(&self, _group: &Self::Group) -> bool {
        false
    }

    async fn apply(
        &self,
        ctx: Context,
        handle: &ResourceHandle,
        group: &Self::Group,
        desired: &Self::Desired,
    ) -> std::result::Result<(), Self::Error>;

    /// Veto deletion with a fatal error, e.g. while protection is enabled.
    async fn check_deletable(
        &self,
        _ctx: Context,
        _handle: &ResourceHandle,
    ) -> std::result::Result<(), Self::Error> {
        Ok(())
    }

    /// Put the resource into a deletable state (disable, isolate, detach).
    async fn quiesce(
        &self,
        _ctx: Context,
        _handle: &ResourceHandle,
    ) -> std::result::Result<(), Self::Error> {
        Ok(())
    }

    async fn delete(
        &self,
        ctx: Context,
        handle: &ResourceHandle,
    ) -> std::result::Result<(), Self::Error>;
}

#[derive(Debug, thiserror::Error)]
#[error("resource {handle} no longer exists")]
struct Gone {
    handle: String,
}

/// Logs how long a driver operation took when dropped.
struct Elapsed {
    label: String,
    log_id: String,
    start: Instant,
}

impl Elapsed {
    fn start(ctx: &Context, type_name: &str, op: &str) -> Self {
        Self {
            label: format!("resource.{}.{}", type_name, op),
            log_id: ctx.log_id().to_string(),
            start: Instant::now(),
        }
    }
}

impl Drop for Elapsed {
    fn drop(&mut self) {
        tracing::debug!(
            log_id = %self.log_id,
            "[ELAPSED] {} elapsed {}ms",
            self.label,
            self.start.elapsed().as_millis()
        );
    }
}

/// Drives one [`ResourceKind`] through its lifecycle.
pub struct Driver<K> {
    kind: K,
    timeouts: Timeouts,
    lock: Arc<dyn ActionLock>,
}

impl<K: ResourceKind> Driver<K> {
    pub fn new(kind: K) -> Self {
        Self {
            kind,
            timeouts: Timeouts::default(),
            lock: Arc::new(NoopLock),
        }
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_lock(mut self, lock: Arc<dyn ActionLock>) -> Self {
        self.lock = lock;
        self
    }

    pub fn kind(&self) -> &K {
        &self.kind
    }

    pub fn timeouts(&self) -> &Timeouts {
        &self.timeouts
    }

    fn read_policy(&self) -> RetryPolicy<K::Error> {
        RetryPolicy::classified(self.timeouts.read).with_backoff(self.timeouts.backoff)
    }

    fn write_policy(&self) -> RetryPolicy<K::Error> {
        RetryPolicy::classified(self.timeouts.write).with_backoff(self.timeouts.backoff)
    }

    fn parse(&self, handle: &str) -> Result<ResourceHandle> {
        ResourceHandle::parse(handle, self.kind.handle_parts())
    }

    /// Take the kind's action lock, if it is serialized. Waiting for the
    /// lock ends early when `ctx` is cancelled.
    async fn acquire(&self, ctx: &Context) -> Result<ActionGuard> {
        if !self.kind.serialized() {
            return Ok(ActionGuard::unlocked());
        }
        tokio::select! {
            biased;
            _ = ctx.cancelled() => Err(ConvergeError::Cancelled),
            guard = self.lock.acquire(self.kind.type_name()) => Ok(guard),
        }
    }

    /// Poll the kind's status under `spec`, each fetch under the read policy.
    /// A not-found status read counts as an absent observation.
    async fn wait(
        &self,
        ctx: &Context,
        handle: &ResourceHandle,
        spec: PollSpec<K::State>,
    ) -> Result<PollOutcome<K::State>> {
        let kind = &self.kind;
        let read = &self.read_policy();
        spec.poll(ctx, move || async move {
            match execute(ctx, read, move || kind.status(ctx.clone(), handle)).await {
                Err(e) if e.is_not_found() => Ok(Observation::Absent),
                other => other,
            }
        })
        .await
    }

    /// Create the remote resource and wait until it is ready.
    ///
    /// Fails with [`ConvergeError::AlreadyExists`] when an equivalent resource
    /// is already present. If the resource was created but never became ready
    /// the error is [`ConvergeError::NotReady`], which carries the handle so
    /// the caller can still delete it.
    pub async fn create(&self, ctx: &Context, desired: &K::Desired) -> Result<ResourceHandle> {
        let _elapsed = Elapsed::start(ctx, self.kind.type_name(), "create");
        let _guard = self.acquire(ctx).await?;
        let kind = &self.kind;

        let existing = execute(ctx, &self.read_policy(), move || {
            kind.find_existing(ctx.clone(), desired)
        })
        .await;
        match existing {
            Ok(Some(parts)) => {
                let handle = ResourceHandle::new(parts)?;
                return Err(ConvergeError::AlreadyExists {
                    handle: handle.to_string(),
                });
            }
            Ok(None) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        let client_token = uuid::Uuid::new_v4().to_string();
        let token = client_token.as_str();
        tracing::debug!(
            log_id = ctx.log_id(),
            "Creating {} with client token {}",
            kind.type_name(),
            token
        );
        let parts = execute(ctx, &self.write_policy(), move || {
            kind.create(ctx.clone(), desired, token)
        })
        .await?;

        let handle = ResourceHandle::new(parts)?;
        if handle.len() != kind.handle_parts() {
            return Err(ConvergeError::MalformedHandle {
                handle: handle.to_string(),
                expected: kind.handle_parts(),
                found: handle.len(),
            });
        }
        tracing::info!(log_id = ctx.log_id(), "Created {} {}", kind.type_name(), handle);

        let lifecycle = kind.lifecycle();
        if !lifecycle.ready.is_empty() {
            let spec = PollSpec::new(lifecycle.ready, self.timeouts.write)
                .with_failure(lifecycle.failed)
                .with_interval(self.timeouts.poll_interval)
                .with_delay(lifecycle.settle)
                .on_absent(OnAbsent::Tolerate(lifecycle.absent_tolerance));

            if let Err(e) = self.wait(ctx, &handle, spec).await {
                tracing::warn!(
                    log_id = ctx.log_id(),
                    "{} {} was created but did not become ready: {}",
                    kind.type_name(),
                    handle,
                    e
                );
                return Err(ConvergeError::NotReady {
                    handle: handle.to_string(),
                    source: Box::new(e),
                });
            }
        }

        Ok(handle)
    }

    /// Read the observed attributes. A resource deleted out-of-band is
    /// [`ReadOutcome::Absent`], never an error.
    pub async fn read(&self, ctx: &Context, handle: &str) -> Result<ReadOutcome<K::Observed>> {
        let _elapsed = Elapsed::start(ctx, self.kind.type_name(), "read");
        let handle = self.parse(handle)?;
        let kind = &self.kind;
        let handle_ref = &handle;

        match execute(ctx, &self.read_policy(), move || {
            kind.read(ctx.clone(), handle_ref)
        })
        .await
        {
            Ok(Some(observed)) => Ok(ReadOutcome::Present(observed)),
            Ok(None) => {
                tracing::info!(
                    log_id = ctx.log_id(),
                    "{} {} not found, removing from state",
                    kind.type_name(),
                    handle
                );
                Ok(ReadOutcome::Absent)
            }
            Err(e) if e.is_not_found() => {
                tracing::info!(
                    log_id = ctx.log_id(),
                    "{} {} not found, removing from state",
                    kind.type_name(),
                    handle
                );
                Ok(ReadOutcome::Absent)
            }
            Err(e) => Err(e),
        }
    }

    /// Apply every changed attribute group, waiting after asynchronous ones.
    pub async fn update(&self, ctx: &Context, handle: &str, desired: &K::Desired) -> Result<()> {
        let _elapsed = Elapsed::start(ctx, self.kind.type_name(), "update");
        let handle = self.parse(handle)?;
        let _guard = self.acquire(ctx).await?;
        let kind = &self.kind;
        let handle_ref = &handle;

        let observed = match execute(ctx, &self.read_policy(), move || {
            kind.read(ctx.clone(), handle_ref)
        })
        .await?
        {
            Some(observed) => observed,
            None => {
                return Err(ConvergeError::NotFound(Box::new(Gone {
                    handle: handle.to_string(),
                })))
            }
        };

        let immutable = kind.immutable_changes(&observed, desired);
        if !immutable.is_empty() {
            return Err(ConvergeError::Invalid(format!(
                "{} do not support change",
                immutable.join(", ")
            )));
        }

        let groups = kind.changed_groups(&observed, desired);
        let total = groups.len();
        let write = self.write_policy();

        for (applied, group) in groups.iter().enumerate() {
            tracing::debug!(
                log_id = ctx.log_id(),
                "Applying {:?} to {} {}",
                group,
                kind.type_name(),
                handle
            );

            let result = execute(ctx, &write, move || {
                kind.apply(ctx.clone(), handle_ref, group, desired)
            })
            .await;

            if let Err(e) = result {
                if applied > 0 {
                    tracing::warn!(
                        log_id = ctx.log_id(),
                        "{} {} partially updated: {} of {} groups applied before {:?} failed",
                        kind.type_name(),
                        handle,
                        applied,
                        total,
                        group
                    );
                }
                return Err(e);
            }

            if kind.group_is_async(group) {
                let lifecycle = kind.lifecycle();
                if !lifecycle.ready.is_empty() {
                    let spec = PollSpec::new(lifecycle.ready, self.timeouts.write)
                        .with_failure(lifecycle.failed)
                        .with_interval(self.timeouts.poll_interval)
                        .with_delay(lifecycle.settle);
                    self.wait(ctx, &handle, spec).await?;
                }
            }
        }

        if total > 0 {
            tracing::info!(
                log_id = ctx.log_id(),
                "Updated {} {} ({} groups)",
                kind.type_name(),
                handle,
                total
            );
        }
        Ok(())
    }

    /// Delete the remote resource. Deleting an already-gone resource succeeds.
    pub async fn delete(&self, ctx: &Context, handle: &str) -> Result<()> {
        let _elapsed = Elapsed::start(ctx, self.kind.type_name(), "delete");
        let handle = self.parse(handle)?;
        let _guard = self.acquire(ctx).await?;
        let kind = &self.kind;
        let handle_ref = &handle;
        let lifecycle = kind.lifecycle();

        match execute(ctx, &self.read_policy(), move || {
            kind.check_deletable(ctx.clone(), handle_ref)
        })
        .await
        {
            Err(e) if e.is_not_found() => {
                self.already_gone(ctx, &handle);
                return Ok(());
            }
            other => other?,
        }

        if !lifecycle.quiesced.is_empty()
            && self.quiesce(ctx, &handle, &lifecycle).await? == PollOutcome::Absent
        {
            self.already_gone(ctx, &handle);
            return Ok(());
        }

        match execute(ctx, &self.write_policy(), move || {
            kind.delete(ctx.clone(), handle_ref)
        })
        .await
        {
            Err(e) if e.is_not_found() => {
                self.already_gone(ctx, &handle);
                return Ok(());
            }
            other => other?,
        }

        if lifecycle.deletes_async {
            let spec = PollSpec::new(lifecycle.deleted, self.timeouts.write)
                .with_interval(self.timeouts.poll_interval)
                .on_absent(OnAbsent::Outcome);
            self.wait(ctx, &handle, spec).await?;
        }

        tracing::info!(log_id = ctx.log_id(), "Deleted {} {}", kind.type_name(), handle);
        Ok(())
    }

    /// Bring the resource into a quiesced state. Returns `Absent` when it
    /// disappeared on the way. A resource that failed provisioning is left
    /// as is.
    async fn quiesce(
        &self,
        ctx: &Context,
        handle: &ResourceHandle,
        lifecycle: &Lifecycle<K::State>,
    ) -> Result<PollOutcome<K::State>> {
        let kind = &self.kind;

        let current = match execute(ctx, &self.read_policy(), move || {
            kind.status(ctx.clone(), handle)
        })
        .await
        {
            Err(e) if e.is_not_found() => Observation::Absent,
            other => other?,
        };

        match current {
            Observation::Absent => return Ok(PollOutcome::Absent),
            Observation::Present(state) if lifecycle.quiesced.contains(&state) => {
                return Ok(PollOutcome::Reached(state));
            }
            Observation::Present(state) if lifecycle.failed.contains(&state) => {
                tracing::debug!(
                    log_id = ctx.log_id(),
                    "Skipping quiesce of {} {} in failed state {}",
                    kind.type_name(),
                    handle,
                    state
                );
                return Ok(PollOutcome::Reached(state));
            }
            Observation::Present(state) => {
                tracing::debug!(
                    log_id = ctx.log_id(),
                    "Quiescing {} {} from {}",
                    kind.type_name(),
                    handle,
                    state
                );
            }
        }

        match execute(ctx, &self.write_policy(), move || {
            kind.quiesce(ctx.clone(), handle)
        })
        .await
        {
            Err(e) if e.is_not_found() => return Ok(PollOutcome::Absent),
            other => other?,
        }

        let spec = PollSpec::new(lifecycle.quiesced.clone(), self.timeouts.write)
            .with_interval(self.timeouts.poll_interval)
            .on_absent(OnAbsent::Outcome);
        self.wait(ctx, handle, spec).await
    }

    fn already_gone(&self, ctx: &Context, handle: &ResourceHandle) {
        tracing::info!(
            log_id = ctx.log_id(),
            "{} {} already deleted",
            self.kind.type_name(),
            handle
        );
    }

    /// Converge a declared resource: create it when it has no handle or its
    /// remote counterpart has vanished, update it otherwise. Returns the
    /// handle the caller should persist.
    pub async fn reconcile(
        &self,
        ctx: &Context,
        declared: &DeclaredResource<K::Desired>,
    ) -> Result<ResourceHandle> {
        let Some(handle) = declared.handle.as_deref() else {
            return self.create(ctx, &declared.desired).await;
        };

        if self.read(ctx, handle).await?.is_absent() {
            tracing::info!(
                log_id = ctx.log_id(),
                "{} {} vanished, recreating",
                self.kind.type_name(),
                handle
            );
            return self.create(ctx, &declared.desired).await;
        }

        self.update(ctx, handle, &declared.desired).await?;
        self.parse(handle)
    }
}
