//! Check command implementation.

use super::ConnectionArgs;
use litesync_replicator::{Credentials, MemoryDatabase, ReplicationConfiguration, ReplicatorType};
use serde::Serialize;
use std::sync::Arc;

/// Resolved settings of a configuration.
#[derive(Debug, Serialize)]
pub struct CheckResult {
    /// Normalized endpoint URL.
    pub url: String,
    /// Endpoint scheme.
    pub scheme: &'static str,
    /// Endpoint host.
    pub host: String,
    /// Port actually used.
    pub port: u16,
    /// Remote database name.
    pub database: String,
    /// Replication direction.
    pub replicator_type: &'static str,
    /// Continuous mode.
    pub continuous: bool,
    /// Auto-purge disabled.
    pub auto_purge_disabled: bool,
    /// Maximum connection attempts; 0 is unlimited.
    pub max_attempts: u32,
    /// Maximum wait between attempts, in seconds.
    pub max_attempt_wait_secs: u64,
    /// Authentication kind.
    pub authentication: &'static str,
    /// Number of pinned certificates.
    pub pinned_certificates: usize,
    /// Number of extra trusted roots.
    pub trusted_roots: usize,
    /// Channel filter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channels: Option<Vec<String>>,
    /// Document ID filter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_ids: Option<Vec<String>>,
}

impl CheckResult {
    /// Summarizes `config`.
    pub fn describe(config: &ReplicationConfiguration) -> Self {
        let endpoint = config.endpoint();
        let scope = config.scope();
        Self {
            url: endpoint.to_string(),
            scheme: endpoint.scheme().as_str(),
            host: endpoint.host().to_string(),
            port: endpoint.effective_port(),
            database: endpoint.database_name().to_string(),
            replicator_type: match config.replicator_type() {
                ReplicatorType::PushPull => "push-pull",
                ReplicatorType::Push => "push",
                ReplicatorType::Pull => "pull",
            },
            continuous: config.continuous(),
            auto_purge_disabled: config.auto_purge_disabled(),
            max_attempts: config.retry_policy().max_attempts,
            max_attempt_wait_secs: config.retry_policy().max_attempt_wait.as_secs(),
            authentication: match config.credentials() {
                None => "none",
                Some(Credentials::Password { .. }) => "password",
                Some(Credentials::Token(_)) => "token",
            },
            pinned_certificates: config.trust().pinned_server_certificates.len(),
            trusted_roots: config.trust().trusted_root_certificates.len(),
            channels: scope.channels.as_ref().map(|c| c.iter().cloned().collect()),
            document_ids: scope.document_ids.as_ref().map(|d| d.iter().cloned().collect()),
        }
    }
}

/// Runs the check command.
pub fn run(args: &ConnectionArgs, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let database = Arc::new(MemoryDatabase::new("local"));
    let config = args.builder(database).build()?;
    let result = CheckResult::describe(&config);

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => print_text_output(&result),
    }

    Ok(())
}

fn print_text_output(result: &CheckResult) {
    println!("Configuration OK");
    println!();
    println!("Endpoint:");
    println!("  URL:           {}", result.url);
    println!("  Host:          {}:{}", result.host, result.port);
    println!("  Database:      {}", result.database);
    println!("  Secure:        {}", result.scheme == "wss");
    println!();
    println!("Replication:");
    println!("  Type:          {}", result.replicator_type);
    println!("  Continuous:    {}", result.continuous);
    println!(
        "  Auto-purge:    {}",
        if result.auto_purge_disabled {
            "disabled"
        } else {
            "enabled"
        }
    );
    let attempts = match result.max_attempts {
        0 => "unlimited".to_string(),
        n => n.to_string(),
    };
    println!("  Max attempts:  {}", attempts);
    println!("  Max wait:      {}s", result.max_attempt_wait_secs);
    println!();
    println!("Security:");
    println!("  Auth:          {}", result.authentication);
    println!("  Pinned certs:  {}", result.pinned_certificates);
    println!("  Trusted roots: {}", result.trusted_roots);

    if let Some(channels) = &result.channels {
        println!();
        println!("Channels: {}", channels.join(", "));
    }
    if let Some(ids) = &result.document_ids {
        println!("Document IDs: {}", ids.join(", "));
    }
}
