//! Simulate command implementation.

use super::ConnectionArgs;
use litesync_replicator::{
    Document, MemoryDatabase, MemoryEngine, MemoryRemote, Replicator, StatusSnapshot, SyncEngine,
    POLL_INTERVAL,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

/// Runs the simulate command.
pub fn run(
    args: &ConnectionArgs,
    documents: usize,
    timeout_secs: u64,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let local = Arc::new(MemoryDatabase::new("local"));
    let config = args.builder(local.clone()).build()?;

    let mut remote = MemoryRemote::new();
    if let Some(credentials) = config.credentials() {
        remote = remote.with_credentials(credentials.clone());
    }
    if let Some(pinned) = config.trust().pinned_server_certificates.first() {
        remote = remote.with_certificate(pinned.clone());
    }
    let remote = Arc::new(remote);
    seed(&local, &remote, documents, &args.channels);

    let engine = Arc::new(MemoryEngine::new());
    engine.add_remote(&args.url, Arc::clone(&remote))?;
    let replicator = Replicator::create(engine as Arc<dyn SyncEngine>, config)?;
    info!(documents, "starting simulated replication");
    replicator.start(false);

    let timeout = Duration::from_secs(timeout_secs);
    let mut last: Option<StatusSnapshot> = None;
    let outcome = poll_until_settled(&replicator, timeout, |status| {
        last = Some(*status);
        print_status(status, format)
    })?;

    replicator.stop();
    let stopped = replicator.wait_for(|s| s.is_stopped(), timeout);
    if let Some(status) = stopped.filter(|s| last != Some(*s)) {
        print_status(&status, format)?;
    }
    replicator.dispose();

    if outcome.has_error() {
        return Err(format!("replication failed with error code {}", outcome.error_code).into());
    }
    if !outcome.is_idle() {
        return Err(format!("replication did not go idle within {}s", timeout_secs).into());
    }

    if format != "json" {
        println!();
        println!("Local documents:  {}", local.documents().len());
        println!("Remote documents: {}", remote.documents().len());
    }
    Ok(())
}

/// Polls until the session is idle or stopped, or `timeout` elapses.
///
/// `on_change` sees every snapshot that differs from the previous one.
/// Returns the last snapshot read.
fn poll_until_settled<F, E>(
    replicator: &Replicator,
    timeout: Duration,
    mut on_change: F,
) -> Result<StatusSnapshot, E>
where
    F: FnMut(&StatusSnapshot) -> Result<(), E>,
{
    let deadline = Instant::now().checked_add(timeout);
    let mut last: Option<StatusSnapshot> = None;
    loop {
        let status = replicator.status();
        if last != Some(status) {
            on_change(&status)?;
            last = Some(status);
        }
        if status.is_idle() || status.is_stopped() {
            return Ok(status);
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Ok(status);
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

fn seed(local: &MemoryDatabase, remote: &MemoryRemote, count: usize, channels: &[String]) {
    for i in 0..count {
        let body = format!("{{\"n\":{i}}}");
        local
            .documents()
            .put(Document::new(format!("local-{i}"), "1-local", body.clone()));
        remote.documents().put(
            Document::new(format!("remote-{i}"), "1-remote", body)
                .with_channels(channels.iter().cloned()),
        );
    }
}

fn print_status(status: &StatusSnapshot, format: &str) -> Result<(), serde_json::Error> {
    match format {
        "json" => println!("{}", serde_json::to_string(status)?),
        _ => println!("{}", status),
    }
    Ok(())
}
