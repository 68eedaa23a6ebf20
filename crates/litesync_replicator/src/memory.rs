//! In-process reference engine.
//!
//! [`MemoryEngine`] implements [`SyncEngine`] between a [`MemoryDatabase`]
//! and [`MemoryRemote`]s registered under endpoint URLs. It runs one worker
//! thread per started session and follows a pull-then-push model:
//!
//! 1. Connect (reachability, pinned certificate, credentials)
//! 2. Pull remote revisions the checkpoint has not seen
//! 3. Push local revisions the checkpoint has not seen
//! 4. Idle (continuous) and look for new changes, or stop
//!
//! Checkpoints are kept per (database, endpoint) by the engine, so a new
//! session resumes where an earlier one left off unless it starts with
//! `reset_checkpoint`.

use crate::config::{Credentials, ReplicationConfiguration};
use crate::document::{Database, Document};
use crate::endpoint::Endpoint;
use crate::engine::{EngineFailure, EngineStatus, SessionHandle, SyncEngine};
use crate::error::ConfigurationError;
use crate::status::ActivityLevel;
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Error codes reported by [`MemoryEngine`].
pub mod codes {
    /// The local database is closed.
    pub const DATABASE_NOT_OPEN: i32 = 11;
    /// The database is not a `MemoryDatabase`.
    pub const UNSUPPORTED_DATABASE: i32 = 12;
    /// The handle does not name a live session.
    pub const UNKNOWN_SESSION: i32 = 13;
    /// The worker thread could not be started.
    pub const WORKER_SPAWN_FAILED: i32 = 14;
    /// A filter or conflict resolver panicked.
    pub const CALLBACK_PANICKED: i32 = 15;
    /// No reachable remote at the endpoint.
    pub const HOST_UNREACHABLE: i32 = 111;
    /// The remote rejected the credentials.
    pub const UNAUTHORIZED: i32 = 401;
    /// The remote's certificate is not among the pinned certificates.
    pub const CERTIFICATE_UNTRUSTED: i32 = 495;
}

/// A stored revision; deleted revisions are kept as tombstones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRevision {
    /// The revision.
    pub document: Document,
    /// True for a tombstone.
    pub deleted: bool,
}

impl StoredRevision {
    fn live(&self) -> Option<&Document> {
        (!self.deleted).then_some(&self.document)
    }
}

/// Thread-safe document map shared by local and remote stores.
#[derive(Debug, Default)]
pub struct DocumentStore {
    entries: RwLock<BTreeMap<String, StoredRevision>>,
}

impl DocumentStore {
    /// Stores a live revision.
    pub fn put(&self, document: Document) {
        self.store(StoredRevision {
            document,
            deleted: false,
        });
    }

    /// Replaces a document with a tombstone. Returns false if it is unknown.
    pub fn delete(&self, id: &str, revision: impl Into<String>) -> bool {
        let mut entries = self.entries.write();
        match entries.get_mut(id) {
            Some(entry) => {
                entry.document.revision = revision.into();
                entry.document.body.clear();
                entry.deleted = true;
                true
            }
            None => false,
        }
    }

    /// Returns a live document.
    pub fn get(&self, id: &str) -> Option<Document> {
        self.entries.read().get(id).and_then(|e| e.live().cloned())
    }

    /// Returns the current revision, including tombstones.
    pub fn revision(&self, id: &str) -> Option<StoredRevision> {
        self.entries.read().get(id).cloned()
    }

    /// Returns the number of live documents.
    pub fn len(&self) -> usize {
        self.entries.read().values().filter(|e| !e.deleted).count()
    }

    /// Returns true if no live documents exist.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns all revisions ordered by document ID.
    pub fn snapshot(&self) -> Vec<StoredRevision> {
        self.entries.read().values().cloned().collect()
    }

    fn store(&self, revision: StoredRevision) {
        self.entries
            .write()
            .insert(revision.document.id.clone(), revision);
    }
}

/// An in-memory local database.
#[derive(Debug)]
pub struct MemoryDatabase {
    name: String,
    open: AtomicBool,
    documents: DocumentStore,
}

impl MemoryDatabase {
    /// Creates an open, empty database.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            open: AtomicBool::new(true),
            documents: DocumentStore::default(),
        }
    }

    /// Returns the document store.
    pub fn documents(&self) -> &DocumentStore {
        &self.documents
    }

    /// Closes the database; engines refuse closed databases.
    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

impl Database for MemoryDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// An in-memory remote peer.
#[derive(Debug)]
pub struct MemoryRemote {
    reachable: AtomicBool,
    credentials: Option<Credentials>,
    certificate: Option<Vec<u8>>,
    documents: DocumentStore,
}

impl MemoryRemote {
    /// Creates a reachable remote that accepts anyone.
    pub fn new() -> Self {
        Self {
            reachable: AtomicBool::new(true),
            credentials: None,
            certificate: None,
            documents: DocumentStore::default(),
        }
    }

    /// Requires these credentials from clients.
    #[must_use]
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Presents this certificate to TLS clients.
    #[must_use]
    pub fn with_certificate(mut self, certificate: impl Into<Vec<u8>>) -> Self {
        self.certificate = Some(certificate.into());
        self
    }

    /// Returns the document store.
    pub fn documents(&self) -> &DocumentStore {
        &self.documents
    }

    /// Makes the remote reachable or unreachable.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Returns true if the remote is reachable.
    pub fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

/// Timing knobs for [`MemoryEngine`].
#[derive(Debug, Clone, Copy)]
pub struct MemoryEngineConfig {
    /// Pause after each transferred document.
    pub step_delay: Duration,
    /// Interval between change checks while idle.
    pub idle_poll: Duration,
    /// Upper bound on the reconnect wait, whatever the retry policy says.
    pub retry_sleep_cap: Duration,
}

impl MemoryEngineConfig {
    /// Sets the per-document pause.
    #[must_use]
    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    /// Sets the idle change-check interval.
    #[must_use]
    pub fn with_idle_poll(mut self, interval: Duration) -> Self {
        self.idle_poll = interval;
        self
    }

    /// Sets the reconnect wait cap.
    #[must_use]
    pub fn with_retry_sleep_cap(mut self, cap: Duration) -> Self {
        self.retry_sleep_cap = cap;
        self
    }
}

impl Default for MemoryEngineConfig {
    fn default() -> Self {
        Self {
            step_delay: Duration::from_millis(1),
            idle_poll: Duration::from_millis(5),
            retry_sleep_cap: Duration::from_millis(20),
        }
    }
}

type CheckpointKey = (String, String);

/// Revisions already exchanged with one remote.
///
/// `pulled` and `pushed` include revisions a filter rejected; `synced` only
/// holds the last revision both sides agreed on.
#[derive(Debug, Default)]
struct Checkpoint {
    pulled: HashMap<String, String>,
    pushed: HashMap<String, String>,
    synced: HashMap<String, String>,
}

impl Checkpoint {
    fn mark_synced(&mut self, id: &str, revision: &str) {
        self.pulled.insert(id.to_string(), revision.to_string());
        self.pushed.insert(id.to_string(), revision.to_string());
        self.synced.insert(id.to_string(), revision.to_string());
    }
}

struct SessionShared {
    id: u64,
    config: Arc<ReplicationConfiguration>,
    status: RwLock<EngineStatus>,
    stop_requested: AtomicBool,
}

struct SessionSlot {
    shared: Arc<SessionShared>,
    key: CheckpointKey,
    worker: Option<JoinHandle<()>>,
}

/// In-process sync engine.
pub struct MemoryEngine {
    config: MemoryEngineConfig,
    remotes: Arc<RwLock<HashMap<String, Arc<MemoryRemote>>>>,
    checkpoints: Arc<Mutex<HashMap<CheckpointKey, Checkpoint>>>,
    sessions: RwLock<HashMap<u64, SessionSlot>>,
    next_id: AtomicU64,
}

impl MemoryEngine {
    /// Creates an engine with default timing.
    pub fn new() -> Self {
        Self::with_config(MemoryEngineConfig::default())
    }

    /// Creates an engine with the given timing.
    pub fn with_config(config: MemoryEngineConfig) -> Self {
        Self {
            config,
            remotes: Arc::new(RwLock::new(HashMap::new())),
            checkpoints: Arc::new(Mutex::new(HashMap::new())),
            sessions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Serves `remote` at `url`.
    pub fn add_remote(&self, url: &str, remote: Arc<MemoryRemote>) -> Result<(), ConfigurationError> {
        let endpoint = Endpoint::parse(url)?;
        self.remotes.write().insert(endpoint.to_string(), remote);
        Ok(())
    }

    /// Returns the number of sessions not yet disposed.
    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    fn spawn_worker(&self, shared: &Arc<SessionShared>, key: &CheckpointKey) -> Option<JoinHandle<()>> {
        let worker = Worker {
            shared: Arc::clone(shared),
            remotes: Arc::clone(&self.remotes),
            checkpoints: Arc::clone(&self.checkpoints),
            config: self.config,
            key: key.clone(),
        };
        let spawned = std::thread::Builder::new()
            .name(format!("litesync-session-{}", shared.id))
            .spawn(move || worker.run());
        match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(session = shared.id, error = %e, "failed to spawn replication worker");
                let mut status = shared.status.write();
                status.activity = ActivityLevel::Stopped;
                status.error = Some(EngineFailure::new(codes::WORKER_SPAWN_FAILED, e.to_string()));
                None
            }
        }
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncEngine for MemoryEngine {
    fn create_session(
        &self,
        config: Arc<ReplicationConfiguration>,
    ) -> Result<SessionHandle, EngineFailure> {
        let database = config.database();
        if database.as_any().downcast_ref::<MemoryDatabase>().is_none() {
            return Err(EngineFailure::new(
                codes::UNSUPPORTED_DATABASE,
                format!("database '{}' is not managed by this engine", database.name()),
            ));
        }
        if !database.is_open() {
            return Err(EngineFailure::new(
                codes::DATABASE_NOT_OPEN,
                format!("database '{}' is not open", database.name()),
            ));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let key = (database.name().to_string(), config.endpoint().to_string());
        let shared = Arc::new(SessionShared {
            id,
            config,
            status: RwLock::new(EngineStatus {
                activity: ActivityLevel::Stopped,
                complete: 0.0,
                document_count: 0,
                error: None,
            }),
            stop_requested: AtomicBool::new(false),
        });
        self.sessions.write().insert(
            id,
            SessionSlot {
                shared,
                key,
                worker: None,
            },
        );
        debug!(session = id, "created memory session");
        Ok(SessionHandle::new(id))
    }

    fn start(&self, handle: &SessionHandle, reset_checkpoint: bool) {
        let (shared, key, previous) = {
            let mut sessions = self.sessions.write();
            let Some(slot) = sessions.get_mut(&handle.id()) else {
                warn!(session = handle.id(), "start on unknown session");
                return;
            };
            if let Some(worker) = &slot.worker {
                let draining = slot.shared.stop_requested.load(Ordering::SeqCst);
                if !worker.is_finished() && !draining {
                    debug!(session = handle.id(), "start ignored, worker running");
                    return;
                }
            }
            (Arc::clone(&slot.shared), slot.key.clone(), slot.worker.take())
        };

        // Joined without the sessions lock: a callback may be reading status.
        if let Some(worker) = previous {
            shared.stop_requested.store(true, Ordering::SeqCst);
            join_worker(shared.id, worker);
        }

        if reset_checkpoint {
            self.checkpoints.lock().remove(&key);
        }

        *shared.status.write() = EngineStatus {
            activity: ActivityLevel::Connecting,
            complete: 0.0,
            document_count: 0,
            error: None,
        };
        shared.stop_requested.store(false, Ordering::SeqCst);
        let worker = self.spawn_worker(&shared, &key);

        let orphan = match self.sessions.write().get_mut(&handle.id()) {
            Some(slot) => {
                slot.worker = worker;
                None
            }
            None => worker,
        };
        if let Some(worker) = orphan {
            shared.stop_requested.store(true, Ordering::SeqCst);
            join_worker(shared.id, worker);
        }
    }

    fn stop(&self, handle: &SessionHandle) {
        if let Some(slot) = self.sessions.read().get(&handle.id()) {
            slot.shared.stop_requested.store(true, Ordering::SeqCst);
        }
    }

    fn query_status(&self, handle: &SessionHandle) -> EngineStatus {
        match self.sessions.read().get(&handle.id()) {
            Some(slot) => slot.shared.status.read().clone(),
            None => EngineStatus {
                activity: ActivityLevel::Stopped,
                complete: 0.0,
                document_count: 0,
                error: Some(EngineFailure::new(codes::UNKNOWN_SESSION, "unknown session")),
            },
        }
    }

    fn dispose(&self, handle: &SessionHandle) {
        let slot = self.sessions.write().remove(&handle.id());
        if let Some(slot) = slot {
            slot.shared.stop_requested.store(true, Ordering::SeqCst);
            if let Some(worker) = slot.worker {
                join_worker(handle.id(), worker);
            }
            debug!(session = handle.id(), "disposed memory session");
        }
    }
}

enum Outcome {
    Done,
    Disconnected,
    Fatal(EngineFailure),
}

enum ConnectError {
    Unreachable(EngineFailure),
    Fatal(EngineFailure),
}

struct Worker {
    shared: Arc<SessionShared>,
    remotes: Arc<RwLock<HashMap<String, Arc<MemoryRemote>>>>,
    checkpoints: Arc<Mutex<HashMap<CheckpointKey, Checkpoint>>>,
    config: MemoryEngineConfig,
    key: CheckpointKey,
}

impl Worker {
    fn run(self) {
        let session = self.shared.id;
        let error = match panic::catch_unwind(AssertUnwindSafe(|| self.run_until_done())) {
            Ok(error) => error,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(session, %message, "replication callback panicked");
                Some(EngineFailure::new(
                    codes::CALLBACK_PANICKED,
                    format!("callback panicked: {message}"),
                ))
            }
        };

        let mut status = self.shared.status.write();
        status.activity = ActivityLevel::Stopped;
        status.error = error;
        debug!(session, error = ?status.error, "replication worker finished");
    }

    /// Connects and replicates until stopped or a fatal error occurs.
    fn run_until_done(&self) -> Option<EngineFailure> {
        let session = self.shared.id;
        let policy = self.shared.config.retry_policy().clone();
        let mut attempt: u32 = 0;

        loop {
            if self.stop_requested() {
                return None;
            }
            self.set_activity(ActivityLevel::Connecting);
            attempt += 1;

            match self.connect() {
                Ok(remote) => {
                    attempt = 0;
                    self.shared.status.write().error = None;
                    match self.replicate(&remote) {
                        Outcome::Done => return None,
                        Outcome::Disconnected => continue,
                        Outcome::Fatal(failure) => return Some(failure),
                    }
                }
                Err(ConnectError::Fatal(failure)) => return Some(failure),
                Err(ConnectError::Unreachable(failure)) => {
                    warn!(session, attempt, "remote unreachable");
                    if !policy.allows_attempt(attempt + 1) {
                        return Some(failure);
                    }
                    {
                        let mut status = self.shared.status.write();
                        status.activity = ActivityLevel::Offline;
                        status.error = Some(failure);
                    }
                    let delay = policy
                        .delay_for_attempt(attempt)
                        .min(self.config.retry_sleep_cap);
                    self.pause(delay);
                }
            }
        }
    }

    fn connect(&self) -> Result<Arc<MemoryRemote>, ConnectError> {
        let config = &self.shared.config;
        let endpoint = config.endpoint();
        let remote = self.remotes.read().get(&endpoint.to_string()).cloned();
        let remote = match remote {
            Some(remote) if remote.is_reachable() => remote,
            _ => {
                return Err(ConnectError::Unreachable(EngineFailure::new(
                    codes::HOST_UNREACHABLE,
                    format!("cannot reach {endpoint}"),
                )))
            }
        };

        if let Some(presented) = &remote.certificate {
            let pinned = &config.trust().pinned_server_certificates;
            if endpoint.is_secure() && !pinned.is_empty() && !pinned.contains(presented) {
                return Err(ConnectError::Fatal(EngineFailure::new(
                    codes::CERTIFICATE_UNTRUSTED,
                    "server certificate does not match the pinned certificate",
                )));
            }
        }

        if let Some(required) = &remote.credentials {
            if config.credentials() != Some(required) {
                return Err(ConnectError::Fatal(EngineFailure::new(
                    codes::UNAUTHORIZED,
                    "remote rejected credentials",
                )));
            }
        }

        Ok(remote)
    }

    fn replicate(&self, remote: &MemoryRemote) -> Outcome {
        let config = Arc::clone(&self.shared.config);
        let Some(local) = config.database().as_any().downcast_ref::<MemoryDatabase>() else {
            return Outcome::Fatal(EngineFailure::new(
                codes::UNSUPPORTED_DATABASE,
                "database is not managed by this engine",
            ));
        };

        loop {
            if self.stop_requested() {
                return Outcome::Done;
            }
            if !local.is_open() {
                return Outcome::Fatal(EngineFailure::new(
                    codes::DATABASE_NOT_OPEN,
                    format!("database '{}' was closed", local.name()),
                ));
            }
            if !remote.is_reachable() {
                return Outcome::Disconnected;
            }

            let pulls = if config.replicator_type().pulls() {
                self.pending_pulls(remote)
            } else {
                Vec::new()
            };
            let pulled: HashSet<&str> = pulls.iter().map(|r| r.document.id.as_str()).collect();
            let pushes: Vec<StoredRevision> = if config.replicator_type().pushes() {
                self.pending_pushes(local)
                    .into_iter()
                    .filter(|r| !pulled.contains(r.document.id.as_str()))
                    .collect()
            } else {
                Vec::new()
            };

            let total = pulls.len() + pushes.len();
            if total > 0 {
                self.set_activity(ActivityLevel::Busy);
                self.shared.status.write().complete = 0.0;

                let work = pulls
                    .iter()
                    .map(|r| (true, r))
                    .chain(pushes.iter().map(|r| (false, r)));
                for (done, (is_pull, revision)) in work.enumerate() {
                    if self.stop_requested() {
                        return Outcome::Done;
                    }
                    let counted = if is_pull {
                        self.apply_pull(local, revision)
                    } else {
                        self.apply_push(local, remote, revision)
                    };
                    {
                        let mut status = self.shared.status.write();
                        if counted {
                            status.document_count += 1;
                        }
                        status.complete = (done + 1) as f32 / total as f32;
                    }
                    if !self.config.step_delay.is_zero() {
                        std::thread::sleep(self.config.step_delay);
                    }
                }
                continue;
            }

            self.shared.status.write().complete = 1.0;
            if !config.continuous() {
                return Outcome::Done;
            }
            self.set_activity(ActivityLevel::Idle);
            self.pause(self.config.idle_poll);
        }
    }

    fn pending_pulls(&self, remote: &MemoryRemote) -> Vec<StoredRevision> {
        let scope = self.shared.config.scope();
        let checkpoints = self.checkpoints.lock();
        let checkpoint = checkpoints.get(&self.key);
        remote
            .documents()
            .snapshot()
            .into_iter()
            .filter(|r| scope.admits_id(&r.document.id))
            .filter(|r| r.deleted || scope.admits_channels(&r.document))
            .filter(|r| {
                checkpoint.and_then(|c| c.pulled.get(&r.document.id)) != Some(&r.document.revision)
            })
            .collect()
    }

    fn pending_pushes(&self, local: &MemoryDatabase) -> Vec<StoredRevision> {
        let scope = self.shared.config.scope();
        let checkpoints = self.checkpoints.lock();
        let checkpoint = checkpoints.get(&self.key);
        local
            .documents()
            .snapshot()
            .into_iter()
            .filter(|r| scope.admits_id(&r.document.id))
            .filter(|r| {
                checkpoint.and_then(|c| c.pushed.get(&r.document.id)) != Some(&r.document.revision)
            })
            .collect()
    }

    fn with_checkpoint<R>(&self, f: impl FnOnce(&mut Checkpoint) -> R) -> R {
        let mut checkpoints = self.checkpoints.lock();
        f(checkpoints.entry(self.key.clone()).or_default())
    }

    /// Applies one remote revision locally. Returns false if filtered out.
    fn apply_pull(&self, local: &MemoryDatabase, incoming: &StoredRevision) -> bool {
        let config = &self.shared.config;
        let id = incoming.document.id.as_str();
        let remote_rev = incoming.document.revision.as_str();

        if !config.should_pull(&incoming.document, incoming.deleted) {
            self.with_checkpoint(|c| c.pulled.insert(id.to_string(), remote_rev.to_string()));
            return false;
        }

        let existing = local.documents().revision(id);
        let conflicting = existing.as_ref().filter(|e| {
            let local_rev = e.document.revision.as_str();
            local_rev != remote_rev
                && self.with_checkpoint(|c| c.pushed.get(id).map(String::as_str) != Some(local_rev))
        });

        let Some(current) = conflicting else {
            local.documents().store(incoming.clone());
            self.with_checkpoint(|c| c.mark_synced(id, remote_rev));
            return true;
        };

        debug!(session = self.shared.id, document = id, "resolving conflict");
        let resolution = config.resolve_conflict(id, current.live(), incoming.live());
        match resolution {
            None => {
                local.documents().store(incoming.clone());
                self.with_checkpoint(|c| c.mark_synced(id, remote_rev));
            }
            Some(Some(winner)) if winner.revision == remote_rev => {
                local.documents().store(incoming.clone());
                self.with_checkpoint(|c| c.mark_synced(id, remote_rev));
            }
            Some(resolved) => {
                let revision = next_revision(&current.document.revision, remote_rev);
                let merged = match resolved {
                    Some(mut doc) => {
                        doc.id = id.to_string();
                        doc.revision = revision;
                        StoredRevision {
                            document: doc,
                            deleted: false,
                        }
                    }
                    None => StoredRevision {
                        document: Document {
                            id: id.to_string(),
                            revision,
                            body: Vec::new(),
                            channels: incoming.document.channels.clone(),
                        },
                        deleted: true,
                    },
                };
                local.documents().store(merged);
                self.with_checkpoint(|c| {
                    c.pulled.insert(id.to_string(), remote_rev.to_string());
                    c.synced.insert(id.to_string(), remote_rev.to_string());
                });
            }
        }
        true
    }

    /// Sends one local revision to the remote. Returns false if nothing was sent.
    ///
    /// A remote revision that changed since the last agreed one is a
    /// conflict. Without a resolver the remote copy stays and the local one
    /// is not pushed.
    fn apply_push(
        &self,
        local: &MemoryDatabase,
        remote: &MemoryRemote,
        outgoing: &StoredRevision,
    ) -> bool {
        let id = outgoing.document.id.as_str();
        let revision = outgoing.document.revision.as_str();

        if !self
            .shared
            .config
            .should_push(&outgoing.document, outgoing.deleted)
        {
            self.with_checkpoint(|c| c.pushed.insert(id.to_string(), revision.to_string()));
            return false;
        }

        let current = remote.documents().revision(id);
        let diverged = current.as_ref().filter(|c| {
            let remote_rev = c.document.revision.as_str();
            let agreed = self.with_checkpoint(|cp| cp.synced.get(id).cloned());
            remote_rev != revision && agreed.as_deref() != Some(remote_rev)
        });
        let Some(current) = diverged else {
            remote.documents().store(outgoing.clone());
            self.with_checkpoint(|c| c.mark_synced(id, revision));
            return true;
        };

        debug!(session = self.shared.id, document = id, "resolving push conflict");
        let remote_rev = current.document.revision.as_str();
        let resolution = self
            .shared
            .config
            .resolve_conflict(id, outgoing.live(), current.live());
        match resolution {
            // Remote keeps its revision; the local edit stays local.
            None => {
                self.with_checkpoint(|c| c.pushed.insert(id.to_string(), revision.to_string()));
                false
            }
            Some(Some(winner)) if winner.revision == remote_rev => {
                self.with_checkpoint(|c| c.pushed.insert(id.to_string(), revision.to_string()));
                false
            }
            Some(Some(winner)) if winner.revision == revision => {
                remote.documents().store(outgoing.clone());
                self.with_checkpoint(|c| c.mark_synced(id, revision));
                true
            }
            Some(resolved) => {
                let merged_rev = next_revision(revision, remote_rev);
                let merged = match resolved {
                    Some(mut doc) => {
                        doc.id = id.to_string();
                        doc.revision = merged_rev.clone();
                        StoredRevision {
                            document: doc,
                            deleted: false,
                        }
                    }
                    None => StoredRevision {
                        document: Document {
                            id: id.to_string(),
                            revision: merged_rev.clone(),
                            body: Vec::new(),
                            channels: outgoing.document.channels.clone(),
                        },
                        deleted: true,
                    },
                };
                local.documents().store(merged.clone());
                remote.documents().store(merged);
                self.with_checkpoint(|c| c.mark_synced(id, &merged_rev));
                true
            }
        }
    }

    fn stop_requested(&self) -> bool {
        self.shared.stop_requested.load(Ordering::SeqCst)
    }

    fn set_activity(&self, activity: ActivityLevel) {
        self.shared.status.write().activity = activity;
    }

    /// Sleeps for `duration`, waking early if a stop is requested.
    fn pause(&self, duration: Duration) {
        let deadline = Instant::now().checked_add(duration);
        let slice = self.config.idle_poll.max(Duration::from_millis(1));
        while !self.stop_requested() {
            let now = Instant::now();
            let remaining = match deadline {
                Some(deadline) if now >= deadline => break,
                Some(deadline) => deadline - now,
                None => slice,
            };
            std::thread::sleep(slice.min(remaining));
        }
    }
}

fn join_worker(session: u64, worker: JoinHandle<()>) {
    if let Err(payload) = worker.join() {
        warn!(
            session,
            message = %panic_message(payload.as_ref()),
            "replication worker panicked"
        );
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Revision ID for a merge of two revisions: one generation past both.
fn next_revision(local: &str, remote: &str) -> String {
    let generation = |rev: &str| {
        rev.split_once('-')
            .and_then(|(g, _)| g.parse::<u64>().ok())
            .unwrap_or(0)
    };
    format!("{}-merged", generation(local).max(generation(remote)) + 1)
}
