//! Redis password propagation.
//!
//! When a redis password is generated for a local redis, the running server
//! and its config file are both updated so that neither a restart nor the
//! next connection loses track of the new password. Redis runs without
//! persistence here, so restarting it to pick up the password is avoided.

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Connect timeout for the live reconfiguration call.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of a live configuration change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveUpdate {
    /// The running server accepted the change.
    Applied,
    /// The server could not be reached; the change takes effect from the
    /// config file on next restart.
    Unreachable,
    /// The server already requires a password we do not have; the change
    /// takes effect from the config file on next restart.
    AuthRequired,
}

/// A queue service that can be reconfigured while running.
pub trait QueueClient {
    /// Set a server configuration key (`CONFIG SET key value`).
    ///
    /// Connection failures are reported as [`LiveUpdate::Unreachable`] and
    /// authentication failures as [`LiveUpdate::AuthRequired`]; any other
    /// failure is an error.
    fn config_set(&mut self, key: &str, value: &str) -> Result<LiveUpdate>;
}

/// [`QueueClient`] backed by a blocking, unauthenticated redis connection.
#[derive(Debug, Clone)]
pub struct RedisQueueClient {
    url: String,
    timeout: Duration,
}

impl RedisQueueClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout: CONNECT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Failures that leave the live server unchanged without being fatal.
fn not_applied(err: &redis::RedisError) -> Option<LiveUpdate> {
    if err.is_io_error() || err.is_connection_refusal() || err.is_timeout() {
        Some(LiveUpdate::Unreachable)
    } else if err.kind() == redis::ErrorKind::AuthenticationFailed
        || err.code() == Some("NOAUTH")
    {
        Some(LiveUpdate::AuthRequired)
    } else {
        None
    }
}

impl QueueClient for RedisQueueClient {
    fn config_set(&mut self, key: &str, value: &str) -> Result<LiveUpdate> {
        let client = redis::Client::open(self.url.as_str())
            .with_context(|| format!("Invalid redis URL: {}", self.url))?;

        let mut conn = match client.get_connection_with_timeout(self.timeout) {
            Ok(conn) => conn,
            Err(e) => {
                if let Some(outcome) = not_applied(&e) {
                    tracing::warn!(url = %self.url, error = %e, ?outcome, "skipping live CONFIG SET");
                    return Ok(outcome);
                }
                return Err(e).with_context(|| format!("Failed to connect to redis: {}", self.url))
            }
        };

        let result: redis::RedisResult<()> = redis::cmd("CONFIG")
            .arg("SET")
            .arg(key)
            .arg(value)
            .query(&mut conn);

        match result {
            Ok(()) => Ok(LiveUpdate::Applied),
            Err(e) => match not_applied(&e) {
                Some(outcome) => {
                    tracing::warn!(url = %self.url, error = %e, ?outcome, "live CONFIG SET not applied");
                    Ok(outcome)
                }
                None => Err(e).with_context(|| format!("redis rejected CONFIG SET {}", key)),
            },
        }
    }
}

/// Append a `requirepass` directive to the first existing file in `candidates`.
///
/// Returns the path written to, or `None` when no candidate exists (the
/// administrator manages redis config some other way).
///
/// # Errors
///
/// Returns an error if the chosen file cannot be opened or written.
pub fn append_requirepass(candidates: &[PathBuf], password: &str) -> Result<Option<PathBuf>> {
    let Some(path) = candidates.iter().find(|p| p.exists()) else {
        tracing::debug!("no redis config file found, skipping requirepass");
        return Ok(None);
    };

    write_requirepass(path, password)?;
    tracing::info!(path = %path.display(), "added requirepass to redis config");

    Ok(Some(path.clone()))
}

fn write_requirepass(path: &Path, password: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open redis config: {}", path.display()))?;

    write!(
        file,
        "# Set a Redis password based on zulip-secrets.conf\nrequirepass '{}'\n",
        password
    )
    .with_context(|| format!("Failed to write redis config: {}", path.display()))?;

    Ok(())
}
