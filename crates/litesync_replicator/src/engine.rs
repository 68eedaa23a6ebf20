//! Boundary with the external sync engine.

use crate::config::ReplicationConfiguration;
use crate::status::ActivityLevel;
use std::fmt;
use std::sync::Arc;

/// Opaque identifier of an engine session.
///
/// Not `Clone`: the replicator that receives it is its only holder.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct SessionHandle(u64);

impl SessionHandle {
    /// Wraps an engine-assigned session ID.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the engine-assigned session ID.
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Native engine error: code plus message, passed through unmodified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineFailure {
    /// Native error code; never 0.
    pub code: i32,
    /// Native error message.
    pub message: String,
}

impl EngineFailure {
    /// Creates a new failure.
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Raw status as reported by the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineStatus {
    /// Current activity.
    pub activity: ActivityLevel,
    /// Fraction complete; engines may report values outside `[0, 1]`.
    pub complete: f32,
    /// Documents processed in the current run.
    pub document_count: u64,
    /// Last error, if any.
    pub error: Option<EngineFailure>,
}

/// A sync engine the replicator drives.
///
/// All network I/O, checkpointing, and callback dispatch happen inside the
/// engine. `start` and `stop` are requests and must not block on the
/// network; `query_status` must be cheap and safe to call from any thread.
pub trait SyncEngine: Send + Sync {
    /// Allocates a session bound to `config`.
    fn create_session(
        &self,
        config: Arc<ReplicationConfiguration>,
    ) -> Result<SessionHandle, EngineFailure>;

    /// Requests that the session start; `reset_checkpoint` discards progress.
    ///
    /// The session must no longer report `Stopped` once this returns.
    fn start(&self, handle: &SessionHandle, reset_checkpoint: bool);

    /// Requests that the session stop.
    fn stop(&self, handle: &SessionHandle);

    /// Reads the session's current status.
    fn query_status(&self, handle: &SessionHandle) -> EngineStatus;

    /// Releases the session. Called exactly once per handle.
    fn dispose(&self, handle: &SessionHandle);
}
