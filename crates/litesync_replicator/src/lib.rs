//! # LiteSync Replicator
//!
//! Client-side facade over an embedded peer-to-peer sync engine.
//!
//! This crate provides:
//! - A validating builder for immutable replication configurations
//! - A replicator lifecycle (create → start/stop → dispose) over one engine session
//! - Point-in-time status snapshots with activity predicates
//! - The [`SyncEngine`] boundary trait and an in-process [`MemoryEngine`]
//!
//! ## Usage
//!
//! ```no_run
//! use litesync_replicator::{
//!     MemoryDatabase, MemoryEngine, ReplicationConfiguration, Replicator, SyncEngine,
//! };
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let engine: Arc<dyn SyncEngine> = Arc::new(MemoryEngine::new());
//! let db = Arc::new(MemoryDatabase::new("local"));
//! let config = ReplicationConfiguration::builder(db, "wss://sync.example.com/db")
//!     .max_attempt_wait_secs(5)
//!     .build()?;
//!
//! let replicator = Replicator::create(engine, config)?;
//! replicator.start(false);
//! replicator.wait_for(|s| s.is_idle(), Duration::from_secs(5));
//! replicator.stop();
//! replicator.wait_for(|s| s.is_stopped(), Duration::from_secs(5));
//! replicator.dispose();
//! # Ok(())
//! # }
//! ```
//!
//! ## Key Invariants
//!
//! - Configurations are immutable once built
//! - Each replicator owns exactly one engine session, released exactly once
//! - Activity is only ever reported by the engine, never inferred
//! - Runtime failures surface through `StatusSnapshot::error_code`, not `Err`

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod document;
mod endpoint;
mod engine;
mod error;
mod memory;
mod replicator;
mod status;

pub use config::{
    Credentials, ProxySettings, ProxyType, ReplicationConfiguration,
    ReplicationConfigurationBuilder, ReplicatorType, RetryPolicy, ScopeFilters, TrustSettings,
    DEFAULT_MAX_ATTEMPT_WAIT_SECS,
};
pub use document::{
    ConflictResolver, Database, DatabaseRef, Document, ReplicationContext, ReplicationFilter,
};
pub use endpoint::{Endpoint, Scheme};
pub use engine::{EngineFailure, EngineStatus, SessionHandle, SyncEngine};
pub use error::{ConfigurationError, EngineError, ReplicatorError, ReplicatorResult};
pub use memory::{
    codes, DocumentStore, MemoryDatabase, MemoryEngine, MemoryEngineConfig, MemoryRemote,
    StoredRevision,
};
pub use replicator::{LifecycleState, Replicator, POLL_INTERVAL};
pub use status::{ActivityLevel, StatusSnapshot};
