//! Replication configuration and its validating builder.

use crate::document::{
    ConflictResolver, DatabaseRef, Document, ReplicationContext, ReplicationFilter,
};
use crate::endpoint::Endpoint;
use crate::error::ConfigurationError;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Default cap on the wait between reconnect attempts, in seconds.
pub const DEFAULT_MAX_ATTEMPT_WAIT_SECS: u32 = 30;

/// Direction of replication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ReplicatorType {
    /// Push and pull.
    #[default]
    PushPull,
    /// Push local changes only.
    Push,
    /// Pull remote changes only.
    Pull,
}

impl ReplicatorType {
    /// Returns true if local changes are sent.
    pub fn pushes(&self) -> bool {
        matches!(self, ReplicatorType::PushPull | ReplicatorType::Push)
    }

    /// Returns true if remote changes are received.
    pub fn pulls(&self) -> bool {
        matches!(self, ReplicatorType::PushPull | ReplicatorType::Pull)
    }
}

/// Reconnect behavior handed to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum connection attempts; 0 means unlimited.
    pub max_attempts: u32,
    /// Upper bound on the wait between attempts.
    pub max_attempt_wait: Duration,
    /// Heartbeat interval; zero means the engine default.
    pub heartbeat: Duration,
}

impl RetryPolicy {
    /// Returns true if attempt number `attempt` (1-based) may be made.
    pub fn allows_attempt(&self, attempt: u32) -> bool {
        self.max_attempts == 0 || attempt <= self.max_attempts
    }

    /// Calculates the wait before a given attempt (0-indexed).
    ///
    /// Doubles from one second and never exceeds `max_attempt_wait`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exp = attempt.saturating_sub(1).min(31);
        let delay = Duration::from_secs(1u64 << exp);
        delay.min(self.max_attempt_wait)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            max_attempt_wait: Duration::from_secs(u64::from(DEFAULT_MAX_ATTEMPT_WAIT_SECS)),
            heartbeat: Duration::ZERO,
        }
    }
}

/// Credentials presented to the remote.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// HTTP basic authentication.
    Password {
        /// User name.
        username: String,
        /// Password.
        password: String,
    },
    /// Session token issued by an external identity provider.
    Token(String),
}

impl Credentials {
    /// Creates username/password credentials.
    pub fn password(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Password {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Creates token credentials.
    pub fn token(token: impl Into<String>) -> Self {
        Self::Token(token.into())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Password { username, .. } => f
                .debug_struct("Password")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Credentials::Token(_) => f.debug_tuple("Token").field(&"<redacted>").finish(),
        }
    }
}

/// Certificates used to authenticate the remote.
///
/// Empty sequences mean the system trust store applies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrustSettings {
    /// Certificates the server must present, raw bytes in order.
    pub pinned_server_certificates: Vec<Vec<u8>>,
    /// Additional root certificates, raw bytes in order.
    pub trusted_root_certificates: Vec<Vec<u8>>,
}

impl TrustSettings {
    /// Returns true if the default trust policy applies.
    pub fn uses_default_trust(&self) -> bool {
        self.pinned_server_certificates.is_empty() && self.trusted_root_certificates.is_empty()
    }
}

/// Proxy kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyType {
    /// HTTP proxy.
    Http,
    /// HTTPS proxy.
    Https,
}

/// Proxy used to reach the remote.
#[derive(Clone, PartialEq, Eq)]
pub struct ProxySettings {
    /// Proxy kind.
    pub proxy_type: ProxyType,
    /// Proxy host.
    pub host: String,
    /// Proxy port.
    pub port: u16,
    /// Optional proxy user name.
    pub username: Option<String>,
    /// Optional proxy password.
    pub password: Option<String>,
}

impl fmt::Debug for ProxySettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxySettings")
            .field("proxy_type", &self.proxy_type)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Restricts which documents replicate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeFilters {
    /// Channels to pull from; `None` means all.
    pub channels: Option<BTreeSet<String>>,
    /// Document IDs to replicate; `None` means all.
    pub document_ids: Option<BTreeSet<String>>,
}

impl ScopeFilters {
    /// Returns true if the document ID is in scope.
    pub fn admits_id(&self, id: &str) -> bool {
        self.document_ids.as_ref().map_or(true, |ids| ids.contains(id))
    }

    /// Returns true if the document is routed to an accepted channel.
    pub fn admits_channels(&self, document: &Document) -> bool {
        match &self.channels {
            None => true,
            Some(channels) => document.channels.iter().any(|c| channels.contains(c)),
        }
    }
}

/// An immutable replication configuration.
///
/// Built through [`ReplicationConfiguration::builder`]. To change a setting,
/// build a new configuration and create a new replicator from it.
#[derive(Clone)]
pub struct ReplicationConfiguration {
    database: DatabaseRef,
    endpoint: Endpoint,
    replicator_type: ReplicatorType,
    continuous: bool,
    auto_purge_disabled: bool,
    retry_policy: RetryPolicy,
    credentials: Option<Credentials>,
    trust: TrustSettings,
    proxy: Option<ProxySettings>,
    headers: BTreeMap<String, String>,
    scope: ScopeFilters,
    push_filter: Option<Arc<dyn ReplicationFilter>>,
    pull_filter: Option<Arc<dyn ReplicationFilter>>,
    conflict_resolver: Option<Arc<dyn ConflictResolver>>,
    context: ReplicationContext,
}

impl ReplicationConfiguration {
    /// Starts building a configuration for `database` replicating with `url`.
    #[must_use]
    pub fn builder(database: DatabaseRef, url: impl Into<String>) -> ReplicationConfigurationBuilder {
        ReplicationConfigurationBuilder::new(database, url)
    }

    /// Returns the local database reference.
    pub fn database(&self) -> &DatabaseRef {
        &self.database
    }

    /// Returns the remote endpoint.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Returns the replication direction.
    pub fn replicator_type(&self) -> ReplicatorType {
        self.replicator_type
    }

    /// Returns true if the session keeps running after catching up.
    pub fn continuous(&self) -> bool {
        self.continuous
    }

    /// Returns true if documents that lose access are kept locally.
    pub fn auto_purge_disabled(&self) -> bool {
        self.auto_purge_disabled
    }

    /// Returns the retry policy.
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Returns the credentials, if any.
    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// Returns the trust settings.
    pub fn trust(&self) -> &TrustSettings {
        &self.trust
    }

    /// Returns the proxy, if any.
    pub fn proxy(&self) -> Option<&ProxySettings> {
        self.proxy.as_ref()
    }

    /// Returns extra HTTP headers.
    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    /// Returns the scope filters.
    pub fn scope(&self) -> &ScopeFilters {
        &self.scope
    }

    /// Returns the caller context.
    pub fn context(&self) -> &ReplicationContext {
        &self.context
    }

    /// Returns true if a push filter is set.
    pub fn has_push_filter(&self) -> bool {
        self.push_filter.is_some()
    }

    /// Returns true if a pull filter is set.
    pub fn has_pull_filter(&self) -> bool {
        self.pull_filter.is_some()
    }

    /// Returns true if a conflict resolver is set.
    pub fn has_conflict_resolver(&self) -> bool {
        self.conflict_resolver.is_some()
    }

    /// Runs the push filter; documents pass when none is set.
    pub fn should_push(&self, document: &Document, is_deleted: bool) -> bool {
        self.push_filter
            .as_ref()
            .map_or(true, |f| f.allow(&self.context, document, is_deleted))
    }

    /// Runs the pull filter; documents pass when none is set.
    pub fn should_pull(&self, document: &Document, is_deleted: bool) -> bool {
        self.pull_filter
            .as_ref()
            .map_or(true, |f| f.allow(&self.context, document, is_deleted))
    }

    /// Runs the conflict resolver.
    ///
    /// Returns `None` when no resolver is set, so the engine applies its own
    /// default; otherwise the resolver's answer.
    pub fn resolve_conflict(
        &self,
        document_id: &str,
        local: Option<&Document>,
        remote: Option<&Document>,
    ) -> Option<Option<Document>> {
        self.conflict_resolver
            .as_ref()
            .map(|r| r.resolve(&self.context, document_id, local, remote))
    }
}

fn same_callback<T: ?Sized>(a: &Option<Arc<T>>, b: &Option<Arc<T>>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        _ => false,
    }
}

impl PartialEq for ReplicationConfiguration {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.database, &other.database)
            && self.endpoint == other.endpoint
            && self.replicator_type == other.replicator_type
            && self.continuous == other.continuous
            && self.auto_purge_disabled == other.auto_purge_disabled
            && self.retry_policy == other.retry_policy
            && self.credentials == other.credentials
            && self.trust == other.trust
            && self.proxy == other.proxy
            && self.headers == other.headers
            && self.scope == other.scope
            && same_callback(&self.push_filter, &other.push_filter)
            && same_callback(&self.pull_filter, &other.pull_filter)
            && same_callback(&self.conflict_resolver, &other.conflict_resolver)
            && self.context.same_as(&other.context)
    }
}

impl fmt::Debug for ReplicationConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplicationConfiguration")
            .field("database", &self.database.name())
            .field("endpoint", &self.endpoint.to_string())
            .field("replicator_type", &self.replicator_type)
            .field("continuous", &self.continuous)
            .field("auto_purge_disabled", &self.auto_purge_disabled)
            .field("retry_policy", &self.retry_policy)
            .field("credentials", &self.credentials)
            .field("pinned_certificates", &self.trust.pinned_server_certificates.len())
            .field("trusted_roots", &self.trust.trusted_root_certificates.len())
            .field("proxy", &self.proxy)
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .field("scope", &self.scope)
            .field("push_filter", &self.push_filter.is_some())
            .field("pull_filter", &self.pull_filter.is_some())
            .field("conflict_resolver", &self.conflict_resolver.is_some())
            .finish_non_exhaustive()
    }
}

/// Builder for [`ReplicationConfiguration`].
///
/// Direction, continuity, auto-purge, attempt count and heartbeat are fixed
/// by the facade and cannot be overridden here.
pub struct ReplicationConfigurationBuilder {
    database: DatabaseRef,
    url: String,
    push_filter: Option<Arc<dyn ReplicationFilter>>,
    pull_filter: Option<Arc<dyn ReplicationFilter>>,
    conflict_resolver: Option<Arc<dyn ConflictResolver>>,
    credentials: Option<Credentials>,
    pinned_certificate_path: Option<PathBuf>,
    trusted_root_path: Option<PathBuf>,
    max_attempt_wait_secs: u32,
    proxy: Option<ProxySettings>,
    headers: BTreeMap<String, String>,
    channels: Option<BTreeSet<String>>,
    document_ids: Option<BTreeSet<String>>,
    context: ReplicationContext,
}

impl ReplicationConfigurationBuilder {
    /// Creates a builder with the facade defaults.
    #[must_use]
    pub fn new(database: DatabaseRef, url: impl Into<String>) -> Self {
        Self {
            database,
            url: url.into(),
            push_filter: None,
            pull_filter: None,
            conflict_resolver: None,
            credentials: None,
            pinned_certificate_path: None,
            trusted_root_path: None,
            max_attempt_wait_secs: DEFAULT_MAX_ATTEMPT_WAIT_SECS,
            proxy: None,
            headers: BTreeMap::new(),
            channels: None,
            document_ids: None,
            context: ReplicationContext::empty(),
        }
    }

    /// Sets the push filter.
    #[must_use]
    pub fn push_filter<F>(self, filter: F) -> Self
    where
        F: Fn(&ReplicationContext, &Document, bool) -> bool + Send + Sync + 'static,
    {
        self.shared_push_filter(Arc::new(filter))
    }

    /// Sets a push filter shared with other configurations.
    #[must_use]
    pub fn shared_push_filter(mut self, filter: Arc<dyn ReplicationFilter>) -> Self {
        self.push_filter = Some(filter);
        self
    }

    /// Sets the pull filter.
    #[must_use]
    pub fn pull_filter<F>(self, filter: F) -> Self
    where
        F: Fn(&ReplicationContext, &Document, bool) -> bool + Send + Sync + 'static,
    {
        self.shared_pull_filter(Arc::new(filter))
    }

    /// Sets a pull filter shared with other configurations.
    #[must_use]
    pub fn shared_pull_filter(mut self, filter: Arc<dyn ReplicationFilter>) -> Self {
        self.pull_filter = Some(filter);
        self
    }

    /// Sets the conflict resolver.
    #[must_use]
    pub fn conflict_resolver<F>(self, resolver: F) -> Self
    where
        F: Fn(&ReplicationContext, &str, Option<&Document>, Option<&Document>) -> Option<Document>
            + Send
            + Sync
            + 'static,
    {
        self.shared_conflict_resolver(Arc::new(resolver))
    }

    /// Sets a conflict resolver shared with other configurations.
    #[must_use]
    pub fn shared_conflict_resolver(mut self, resolver: Arc<dyn ConflictResolver>) -> Self {
        self.conflict_resolver = Some(resolver);
        self
    }

    /// Sets the credentials.
    #[must_use]
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Pins the server certificate stored at `path`.
    #[must_use]
    pub fn pinned_certificate_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.pinned_certificate_path = Some(path.into());
        self
    }

    /// Trusts the root certificate stored at `path`.
    #[must_use]
    pub fn trusted_root_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.trusted_root_path = Some(path.into());
        self
    }

    /// Sets the cap on the wait between reconnect attempts.
    #[must_use]
    pub fn max_attempt_wait_secs(mut self, secs: u32) -> Self {
        self.max_attempt_wait_secs = secs;
        self
    }

    /// Sets the proxy.
    #[must_use]
    pub fn proxy(mut self, proxy: ProxySettings) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Adds an HTTP header sent with the connection request.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Restricts pulls to the given channels.
    #[must_use]
    pub fn channels<I, S>(mut self, channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.channels = Some(channels.into_iter().map(Into::into).collect());
        self
    }

    /// Restricts replication to the given document IDs.
    #[must_use]
    pub fn document_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.document_ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    /// Sets the value handed to every callback.
    #[must_use]
    pub fn context(mut self, context: ReplicationContext) -> Self {
        self.context = context;
        self
    }

    /// Validates the inputs and builds the configuration.
    ///
    /// Reads certificate files; makes no engine or network calls.
    pub fn build(self) -> Result<ReplicationConfiguration, ConfigurationError> {
        let endpoint = Endpoint::parse(&self.url)?;

        if self.max_attempt_wait_secs == 0 {
            return Err(ConfigurationError::InvalidRetryPolicy(
                "max attempt wait must be at least one second".into(),
            ));
        }

        let mut trust = TrustSettings::default();
        if let Some(path) = &self.pinned_certificate_path {
            trust.pinned_server_certificates.push(read_certificate(path)?);
        }
        if let Some(path) = &self.trusted_root_path {
            trust.trusted_root_certificates.push(read_certificate(path)?);
        }

        debug!(
            endpoint = %endpoint,
            database = self.database.name(),
            pinned = trust.pinned_server_certificates.len(),
            "built replication configuration"
        );

        Ok(ReplicationConfiguration {
            database: self.database,
            endpoint,
            replicator_type: ReplicatorType::PushPull,
            continuous: true,
            auto_purge_disabled: true,
            retry_policy: RetryPolicy {
                max_attempts: 0,
                max_attempt_wait: Duration::from_secs(u64::from(self.max_attempt_wait_secs)),
                heartbeat: Duration::ZERO,
            },
            credentials: self.credentials,
            trust,
            proxy: self.proxy,
            headers: self.headers,
            scope: ScopeFilters {
                channels: self.channels,
                document_ids: self.document_ids,
            },
            push_filter: self.push_filter,
            pull_filter: self.pull_filter,
            conflict_resolver: self.conflict_resolver,
            context: self.context,
        })
    }
}

fn read_certificate(path: &Path) -> Result<Vec<u8>, ConfigurationError> {
    let unreadable = |source: std::io::Error| ConfigurationError::CertificateUnreadable {
        path: path.to_path_buf(),
        source,
    };
    let bytes = std::fs::read(path).map_err(unreadable)?;
    if bytes.is_empty() {
        return Err(unreadable(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "certificate file is empty",
        )));
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryDatabase;
    use std::io::Write;

    fn db() -> DatabaseRef {
        Arc::new(MemoryDatabase::new("local"))
    }

    #[test]
    fn fixed_defaults() {
        let config = ReplicationConfiguration::builder(db(), "wss://sync.example.com/db")
            .build()
            .unwrap();

        assert_eq!(config.replicator_type(), ReplicatorType::PushPull);
        assert!(config.continuous());
        assert!(config.auto_purge_disabled());
        assert_eq!(config.retry_policy().max_attempts, 0);
        assert_eq!(config.retry_policy().heartbeat, Duration::ZERO);
        assert_eq!(
            config.retry_policy().max_attempt_wait,
            Duration::from_secs(30)
        );
        assert!(config.trust().uses_default_trust());
        assert!(config.credentials().is_none());
        assert!(!config.has_push_filter());
        assert!(!config.has_conflict_resolver());
    }

    #[test]
    fn invalid_endpoint() {
        let err = ReplicationConfiguration::builder(db(), "not a url")
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidEndpoint { .. }));
    }

    #[test]
    fn missing_certificate() {
        let dir = tempfile::tempdir().unwrap();
        let err = ReplicationConfiguration::builder(db(), "wss://host/db")
            .pinned_certificate_path(dir.path().join("missing.cer"))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::CertificateUnreadable { .. }));
    }

    #[test]
    fn empty_certificate_is_unreadable() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let err = ReplicationConfiguration::builder(db(), "wss://host/db")
            .pinned_certificate_path(file.path())
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::CertificateUnreadable { .. }));
    }

    #[test]
    fn certificates_are_loaded() {
        let mut pinned = tempfile::NamedTempFile::new().unwrap();
        pinned.write_all(b"pinned-cert-bytes").unwrap();
        let mut root = tempfile::NamedTempFile::new().unwrap();
        root.write_all(b"root-cert-bytes").unwrap();

        let config = ReplicationConfiguration::builder(db(), "wss://host/db")
            .pinned_certificate_path(pinned.path())
            .trusted_root_path(root.path())
            .build()
            .unwrap();

        assert_eq!(
            config.trust().pinned_server_certificates,
            vec![b"pinned-cert-bytes".to_vec()]
        );
        assert_eq!(
            config.trust().trusted_root_certificates,
            vec![b"root-cert-bytes".to_vec()]
        );
        assert!(!config.trust().uses_default_trust());
    }

    #[test]
    fn zero_max_wait_rejected() {
        let err = ReplicationConfiguration::builder(db(), "wss://host/db")
            .max_attempt_wait_secs(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidRetryPolicy(_)));
    }

    #[test]
    fn identical_inputs_build_equal_configurations() {
        let mut cert = tempfile::NamedTempFile::new().unwrap();
        cert.write_all(b"cert").unwrap();

        let database = db();
        let filter: Arc<dyn ReplicationFilter> =
            Arc::new(|_: &ReplicationContext, _: &Document, deleted: bool| !deleted);
        let build = || {
            ReplicationConfiguration::builder(Arc::clone(&database), "wss://host:4984/db")
                .shared_push_filter(Arc::clone(&filter))
                .credentials(Credentials::password("alice", "secret"))
                .pinned_certificate_path(cert.path())
                .max_attempt_wait_secs(5)
                .channels(["a", "b"])
                .build()
                .unwrap()
        };

        assert_eq!(build(), build());

        let other_filter =
            ReplicationConfiguration::builder(Arc::clone(&database), "wss://host:4984/db")
                .push_filter(|_, _, deleted| !deleted)
                .credentials(Credentials::password("alice", "secret"))
                .pinned_certificate_path(cert.path())
                .max_attempt_wait_secs(5)
                .channels(["a", "b"])
                .build()
                .unwrap();
        assert_ne!(build(), other_filter);
    }

    #[test]
    fn transport_overrides_are_carried() {
        let proxy = ProxySettings {
            proxy_type: ProxyType::Https,
            host: "proxy.internal".into(),
            port: 3128,
            username: Some("relay".into()),
            password: Some("proxy-secret".into()),
        };
        let database = db();
        let build = || {
            ReplicationConfiguration::builder(Arc::clone(&database), "wss://host/db")
                .proxy(proxy.clone())
                .header("X-Tenant", "acme")
                .header("Authorization", "Bearer header-secret")
                .build()
                .unwrap()
        };

        let config = build();
        assert_eq!(config.proxy(), Some(&proxy));
        let headers: Vec<_> = config.headers().iter().collect();
        assert_eq!(
            headers,
            vec![
                (&"Authorization".to_string(), &"Bearer header-secret".to_string()),
                (&"X-Tenant".to_string(), &"acme".to_string()),
            ]
        );
        assert_eq!(config, build());

        let other_header = ReplicationConfiguration::builder(Arc::clone(&database), "wss://host/db")
            .proxy(proxy.clone())
            .header("X-Tenant", "other")
            .header("Authorization", "Bearer header-secret")
            .build()
            .unwrap();
        assert_ne!(config, other_header);

        let out = format!("{config:?}");
        assert!(out.contains("proxy.internal"));
        assert!(out.contains("X-Tenant"));
        assert!(!out.contains("proxy-secret"));
        assert!(!out.contains("header-secret"));
    }

    #[test]
    fn filters_and_resolver_run_with_context() {
        let config = ReplicationConfiguration::builder(db(), "ws://host/db")
            .context(ReplicationContext::new(String::from("user:")))
            .push_filter(|ctx, doc, _| {
                ctx.get::<String>()
                    .map_or(false, |prefix| doc.id.starts_with(prefix.as_str()))
            })
            .conflict_resolver(|_, _, local, _| local.cloned())
            .build()
            .unwrap();

        let doc = Document::new("user:1", "1-a", Vec::new());
        let other = Document::new("order:1", "1-a", Vec::new());
        assert!(config.should_push(&doc, false));
        assert!(!config.should_push(&other, false));
        assert!(config.should_pull(&other, true));
        assert_eq!(
            config.resolve_conflict("user:1", Some(&doc), None),
            Some(Some(doc.clone()))
        );
    }

    #[test]
    fn scope_filters() {
        let scope = ScopeFilters {
            channels: Some(["public".to_string()].into_iter().collect()),
            document_ids: Some(["a".to_string()].into_iter().collect()),
        };
        assert!(scope.admits_id("a"));
        assert!(!scope.admits_id("b"));
        let doc = Document::new("a", "1-x", Vec::new()).with_channels(["public"]);
        assert!(scope.admits_channels(&doc));
        assert!(!scope.admits_channels(&Document::new("a", "1-x", Vec::new())));
        assert!(ScopeFilters::default().admits_id("anything"));
    }

    #[test]
    fn retry_delay_calculation() {
        let policy = RetryPolicy {
            max_attempt_wait: Duration::from_secs(5),
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempt(100), Duration::from_secs(5));
        assert!(policy.allows_attempt(1_000));

        let limited = RetryPolicy {
            max_attempts: 2,
            ..RetryPolicy::default()
        };
        assert!(limited.allows_attempt(2));
        assert!(!limited.allows_attempt(3));
    }

    #[test]
    fn debug_redacts_secrets() {
        let creds = Credentials::password("alice", "hunter2");
        let out = format!("{creds:?}");
        assert!(out.contains("alice"));
        assert!(!out.contains("hunter2"));
        assert!(!format!("{:?}", Credentials::token("tok-123")).contains("tok-123"));
    }
}
