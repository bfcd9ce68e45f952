//! converge - Convergence engine for declarative cloud resources
//!
//! Drives remote resources on an eventually-consistent control plane from a
//! declared configuration to their desired state: retries transient failures
//! within bounded budgets, encodes multi-part identifiers into one opaque
//! handle, waits for asynchronous lifecycle transitions, and interprets
//! not-found per operation.

// Core modules
pub mod context;
pub mod error;
pub mod handle;

// Convergence primitives
pub mod lock;
pub mod poll;
pub mod retry;
pub mod state;

// Orchestration
pub mod driver;

// Re-exports for convenience
pub use context::Context;
pub use driver::{DeclaredResource, Driver, Lifecycle, ReadOutcome, ResourceKind, Timeouts};
pub use error::{BoxError, Classify, ConvergeError, ErrorClass, ErrorKind, Result};
pub use handle::{HandleCodec, ResourceHandle, COMMA_SEP, FIELD_SEP};
pub use lock::{ActionGuard, ActionLock, KeyedLock, NoopLock};
pub use poll::{Observation, OnAbsent, PollOutcome, PollSpec};
pub use retry::{execute, Backoff, RetryPolicy, READ_RETRY_TIMEOUT, WRITE_RETRY_TIMEOUT};
pub use state::{LifecycleState, Synchronous, UnknownState};
