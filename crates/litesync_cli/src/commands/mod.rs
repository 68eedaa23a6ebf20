//! CLI command implementations.

pub mod check;
pub mod simulate;

use clap::Args;
use litesync_replicator::{
    Credentials, DatabaseRef, ReplicationConfiguration, ReplicationConfigurationBuilder,
};
use std::path::PathBuf;

/// Flags describing the remote endpoint and how to reach it.
#[derive(Debug, Clone, Args)]
pub struct ConnectionArgs {
    /// Remote endpoint (ws:// or wss://)
    #[arg(short, long)]
    pub url: String,

    /// User name for basic authentication
    #[arg(long, requires = "password", conflicts_with = "token")]
    pub username: Option<String>,

    /// Password for basic authentication
    #[arg(long, requires = "username")]
    pub password: Option<String>,

    /// Session token
    #[arg(long)]
    pub token: Option<String>,

    /// Pinned server certificate file
    #[arg(long)]
    pub cert: Option<PathBuf>,

    /// Maximum wait between reconnect attempts, in seconds
    #[arg(long, default_value = "30")]
    pub max_wait: u32,

    /// Channel to pull from (repeatable)
    #[arg(long = "channel")]
    pub channels: Vec<String>,

    /// Document ID to replicate (repeatable)
    #[arg(long = "doc-id")]
    pub document_ids: Vec<String>,
}

impl ConnectionArgs {
    /// Returns the credentials the flags describe.
    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.username, &self.password, &self.token) {
            (Some(username), Some(password), _) => {
                Some(Credentials::password(username.as_str(), password.as_str()))
            }
            (_, _, Some(token)) => Some(Credentials::token(token.as_str())),
            _ => None,
        }
    }

    /// Maps the flags onto a configuration builder for `database`.
    pub fn builder(&self, database: DatabaseRef) -> ReplicationConfigurationBuilder {
        let mut builder = ReplicationConfiguration::builder(database, self.url.as_str())
            .max_attempt_wait_secs(self.max_wait);
        if let Some(credentials) = self.credentials() {
            builder = builder.credentials(credentials);
        }
        if let Some(cert) = &self.cert {
            builder = builder.pinned_certificate_path(cert.clone());
        }
        if !self.channels.is_empty() {
            builder = builder.channels(self.channels.iter().cloned());
        }
        if !self.document_ids.is_empty() {
            builder = builder.document_ids(self.document_ids.iter().cloned());
        }
        builder
    }
}
