//! Replicator lifecycle.
//!
//! A [`Replicator`] owns one engine session. Its local state records what
//! the caller asked for (`Created`, `Running`, `Stopped`); what the engine is
//! actually doing is only ever read through [`Replicator::status`].

use crate::config::ReplicationConfiguration;
use crate::engine::{SessionHandle, SyncEngine};
use crate::error::{EngineError, ReplicatorResult};
use crate::status::StatusSnapshot;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Interval between polls in [`Replicator::wait_for`].
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// What the caller last asked the replicator to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Session allocated, never started.
    Created,
    /// Start requested.
    Running,
    /// Stop requested.
    Stopped,
}

/// An engine session released when dropped.
struct Session {
    engine: Arc<dyn SyncEngine>,
    handle: SessionHandle,
}

impl Drop for Session {
    fn drop(&mut self) {
        self.engine.dispose(&self.handle);
        debug!(session = %self.handle, "released engine session");
    }
}

/// A replication session against one remote endpoint.
///
/// `status()` may be called from any number of threads at once; `start()`
/// and `stop()` are requests whose effect is observed through `status()`.
/// The engine session is released by [`dispose`](Self::dispose) or, failing
/// that, when the replicator is dropped.
pub struct Replicator {
    session: Session,
    config: Arc<ReplicationConfiguration>,
    state: Mutex<LifecycleState>,
}

impl Replicator {
    /// Creates a replicator, allocating one engine session for `config`.
    pub fn create(
        engine: Arc<dyn SyncEngine>,
        config: ReplicationConfiguration,
    ) -> ReplicatorResult<Self> {
        let config = Arc::new(config);
        let handle = engine
            .create_session(Arc::clone(&config))
            .map_err(|failure| {
                warn!(
                    code = failure.code,
                    message = %failure.message,
                    "engine rejected replicator"
                );
                EngineError::CreationFailed {
                    code: failure.code,
                    message: failure.message,
                }
            })?;

        info!(
            session = %handle,
            endpoint = %config.endpoint(),
            database = config.database().name(),
            "created replicator"
        );

        Ok(Self {
            session: Session { engine, handle },
            config,
            state: Mutex::new(LifecycleState::Created),
        })
    }

    /// Returns the local lifecycle state.
    pub fn state(&self) -> LifecycleState {
        *self.state.lock()
    }

    /// Returns the configuration the session was created from.
    pub fn configuration(&self) -> &ReplicationConfiguration {
        &self.config
    }

    /// Requests that replication start.
    ///
    /// Ignored while running, unless the engine already reports the session
    /// as stopped (it finished or hit a fatal error), in which case the
    /// request is forwarded again. Returns without waiting for a connection.
    pub fn start(&self, reset_checkpoint: bool) {
        let mut state = self.state.lock();
        if *state == LifecycleState::Running {
            if !self.status().is_stopped() {
                debug!(session = %self.session.handle, "start ignored, already running");
                return;
            }
            debug!(session = %self.session.handle, "engine reports stopped, restarting");
        }

        self.session.engine.start(&self.session.handle, reset_checkpoint);
        *state = LifecycleState::Running;
        info!(session = %self.session.handle, reset_checkpoint, "replicator started");
    }

    /// Requests that replication stop.
    ///
    /// The engine drains in-flight work asynchronously; poll
    /// [`status`](Self::status) until it reports `Stopped`. Ignored unless
    /// running.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        if *state != LifecycleState::Running {
            debug!(session = %self.session.handle, state = ?*state, "stop ignored, not running");
            return;
        }

        self.session.engine.stop(&self.session.handle);
        *state = LifecycleState::Stopped;
        info!(session = %self.session.handle, "replicator stop requested");
    }

    /// Returns a fresh status snapshot.
    pub fn status(&self) -> StatusSnapshot {
        self.session
            .engine
            .query_status(&self.session.handle)
            .into()
    }

    /// Returns true if caught up and waiting for changes.
    pub fn is_idle(&self) -> bool {
        self.status().is_idle()
    }

    /// Returns true if transferring data.
    pub fn is_busy(&self) -> bool {
        self.status().is_busy()
    }

    /// Returns true if stopped.
    pub fn is_stopped(&self) -> bool {
        self.status().is_stopped()
    }

    /// Returns true if the remote is unreachable.
    pub fn is_offline(&self) -> bool {
        self.status().is_offline()
    }

    /// Returns true if connecting.
    pub fn is_connecting(&self) -> bool {
        self.status().is_connecting()
    }

    /// Polls `status()` until `predicate` holds or `timeout` elapses.
    ///
    /// Returns the first matching snapshot, or `None` on timeout. A timeout
    /// too large to represent as an instant waits without a deadline.
    pub fn wait_for<P>(&self, predicate: P, timeout: Duration) -> Option<StatusSnapshot>
    where
        P: Fn(&StatusSnapshot) -> bool,
    {
        let deadline = Instant::now().checked_add(timeout);
        loop {
            let status = self.status();
            if predicate(&status) {
                return Some(status);
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return None;
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    /// Releases the engine session.
    ///
    /// Should follow a confirmed `Stopped` activity; disposing a live session
    /// is accepted but callbacks already in flight may still complete.
    pub fn dispose(self) {
        let status = self.status();
        if !status.is_stopped() {
            warn!(
                session = %self.session.handle,
                activity = %status.activity,
                "disposing replicator whose session is still active"
            );
        }
        info!(session = %self.session.handle, "replicator disposed");
    }
}

impl fmt::Debug for Replicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Replicator")
            .field("session", &self.session.handle)
            .field("state", &self.state())
            .field("endpoint", &self.config.endpoint().to_string())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineFailure, EngineStatus};
    use crate::error::ReplicatorError;
    use crate::memory::MemoryDatabase;
    use crate::status::ActivityLevel;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Engine that records calls and reports a scripted activity.
    #[derive(Default)]
    struct RecordingEngine {
        reject: Option<EngineFailure>,
        activity: Mutex<Option<ActivityLevel>>,
        creates: AtomicU32,
        starts: AtomicU32,
        resets: AtomicU32,
        stops: AtomicU32,
        disposes: AtomicU32,
    }

    impl RecordingEngine {
        fn set_activity(&self, activity: ActivityLevel) {
            *self.activity.lock() = Some(activity);
        }
    }

    impl SyncEngine for RecordingEngine {
        fn create_session(
            &self,
            _config: Arc<ReplicationConfiguration>,
        ) -> Result<SessionHandle, EngineFailure> {
            if let Some(failure) = &self.reject {
                return Err(failure.clone());
            }
            let id = self.creates.fetch_add(1, Ordering::SeqCst);
            Ok(SessionHandle::new(u64::from(id)))
        }

        fn start(&self, _handle: &SessionHandle, reset_checkpoint: bool) {
            self.starts.fetch_add(1, Ordering::SeqCst);
            if reset_checkpoint {
                self.resets.fetch_add(1, Ordering::SeqCst);
            }
            self.set_activity(ActivityLevel::Connecting);
        }

        fn stop(&self, _handle: &SessionHandle) {
            self.stops.fetch_add(1, Ordering::SeqCst);
            self.set_activity(ActivityLevel::Stopped);
        }

        fn query_status(&self, _handle: &SessionHandle) -> EngineStatus {
            EngineStatus {
                activity: self.activity.lock().unwrap_or(ActivityLevel::Stopped),
                complete: 0.0,
                document_count: 0,
                error: None,
            }
        }

        fn dispose(&self, _handle: &SessionHandle) {
            self.disposes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn config() -> ReplicationConfiguration {
        ReplicationConfiguration::builder(
            Arc::new(MemoryDatabase::new("local")),
            "ws://localhost:4984/db",
        )
        .build()
        .unwrap()
    }

    fn create(engine: &Arc<RecordingEngine>) -> Replicator {
        Replicator::create(Arc::clone(engine) as Arc<dyn SyncEngine>, config()).unwrap()
    }

    #[test]
    fn initial_state() {
        let engine = Arc::new(RecordingEngine::default());
        let replicator = create(&engine);
        assert_eq!(replicator.state(), LifecycleState::Created);
        assert!(replicator.is_stopped());
        assert_eq!(engine.creates.load(Ordering::SeqCst), 1);
        assert_eq!(engine.starts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn creation_failure_passes_engine_error_through() {
        let engine = Arc::new(RecordingEngine {
            reject: Some(EngineFailure::new(19, "database is closed")),
            ..RecordingEngine::default()
        });
        let err = Replicator::create(Arc::clone(&engine) as Arc<dyn SyncEngine>, config())
            .unwrap_err();
        match err {
            ReplicatorError::Engine(EngineError::CreationFailed { code, message }) => {
                assert_eq!(code, 19);
                assert_eq!(message, "database is closed");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(engine.disposes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn start_is_idempotent_while_running() {
        let engine = Arc::new(RecordingEngine::default());
        let replicator = create(&engine);

        replicator.start(false);
        replicator.start(true);
        assert_eq!(replicator.state(), LifecycleState::Running);
        assert_eq!(engine.starts.load(Ordering::SeqCst), 1);
        assert_eq!(engine.resets.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn start_forwards_again_after_engine_stopped() {
        let engine = Arc::new(RecordingEngine::default());
        let replicator = create(&engine);

        replicator.start(false);
        engine.set_activity(ActivityLevel::Stopped);
        replicator.start(true);
        assert_eq!(engine.starts.load(Ordering::SeqCst), 2);
        assert_eq!(engine.resets.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stop_is_idempotent() {
        let engine = Arc::new(RecordingEngine::default());
        let replicator = create(&engine);

        replicator.stop();
        assert_eq!(replicator.state(), LifecycleState::Created);
        assert_eq!(engine.stops.load(Ordering::SeqCst), 0);

        replicator.start(false);
        replicator.stop();
        replicator.stop();
        assert_eq!(replicator.state(), LifecycleState::Stopped);
        assert_eq!(engine.stops.load(Ordering::SeqCst), 1);

        replicator.start(false);
        assert_eq!(replicator.state(), LifecycleState::Running);
        assert_eq!(engine.starts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn dispose_releases_once() {
        let engine = Arc::new(RecordingEngine::default());
        let replicator = create(&engine);
        replicator.start(false);
        replicator.stop();
        replicator.dispose();
        assert_eq!(engine.disposes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_releases_session() {
        let engine = Arc::new(RecordingEngine::default());
        {
            let replicator = create(&engine);
            replicator.start(false);
        }
        assert_eq!(engine.disposes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn wait_for_times_out() {
        let engine = Arc::new(RecordingEngine::default());
        let replicator = create(&engine);
        assert!(replicator
            .wait_for(|s| s.is_busy(), Duration::from_millis(30))
            .is_none());
        let snap = replicator
            .wait_for(|s| s.is_stopped(), Duration::from_millis(30))
            .unwrap();
        assert_eq!(snap.activity, ActivityLevel::Stopped);
    }

    #[test]
    fn wait_for_accepts_unbounded_timeout() {
        let engine = Arc::new(RecordingEngine::default());
        let replicator = Arc::new(create(&engine));
        replicator.start(false);

        let waiter = {
            let r = Arc::clone(&replicator);
            std::thread::spawn(move || r.wait_for(|s| s.is_stopped(), Duration::MAX))
        };
        std::thread::sleep(Duration::from_millis(20));
        replicator.stop();

        let snap = waiter.join().unwrap().unwrap();
        assert_eq!(snap.activity, ActivityLevel::Stopped);
        assert!(replicator
            .wait_for(|s| s.is_stopped(), Duration::MAX)
            .is_some());
    }

    #[test]
    fn status_from_many_threads() {
        let engine = Arc::new(RecordingEngine::default());
        let replicator = Arc::new(create(&engine));
        replicator.start(false);

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let r = Arc::clone(&replicator);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        let _ = r.status();
                    }
                })
            })
            .collect();
        replicator.stop();
        for reader in readers {
            reader.join().unwrap();
        }
        assert!(replicator.is_stopped());
    }
}
