//! Secret provisioning: fill in every missing secret, never touch existing ones.
//!
//! A run loads the secrets file, decides which known secrets are missing for
//! the selected [`Mode`], generates them, and appends the new entries in one
//! write. Re-running with nothing missing performs no write at all.

use anyhow::{Context, Result};
use indexmap::IndexMap;
use std::path::PathBuf;

use crate::config::{Mode, RunConfig, Settings, SettingsContext};
use crate::generators::Generator;
use crate::queue::{append_requirepass, LiveUpdate, QueueClient, RedisQueueClient};
use crate::secrets_file::{format_entry, SecretsFile, SECTION};

/// Standard 64-character tokens required in every environment.
pub const AUTOGENERATED_SECRETS: [&str; 4] = [
    "avatar_salt",
    "rabbitmq_password",
    "shared_secret",
    "thumbor_key",
];

/// Only used to bootstrap the development database. Production uses peer
/// authentication for postgres.
pub const DEVELOPMENT_SECRETS: [&str; 2] = ["initial_password_salt", "local_database_password"];

pub const SECRET_KEY: &str = "secret_key";
pub const CAMO_KEY: &str = "camo_key";
pub const MEMCACHED_PASSWORD: &str = "memcached_password";
pub const REDIS_PASSWORD: &str = "redis_password";
pub const ZULIP_ORG_KEY: &str = "zulip_org_key";
pub const ZULIP_ORG_ID: &str = "zulip_org_id";
pub const POSTGRES_PASSWORD: &str = "postgres_password";

/// Environment variable holding the external database password.
pub const POSTGRES_PASSWORD_ENV: &str = "REMOTE_POSTGRES_PASSWORD";

/// memcached location for which this tool owns the password.
pub const MEMCACHED_LOOPBACK: &str = "127.0.0.1:11211";

/// redis host for which this tool owns the password.
pub const REDIS_LOOPBACK: &str = "127.0.0.1";

/// Builds a queue client from the settings, called only if one is needed.
pub type QueueConnector<'a> = dyn FnMut(&Settings) -> Box<dyn QueueClient> + 'a;

/// What a run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionReport {
    /// Secrets file that was inspected
    pub path: PathBuf,
    /// Names of the secrets appended by this run, in file order
    pub added: Vec<String>,
    /// Result of the live redis update, if one was attempted
    pub redis_live_update: Option<LiveUpdate>,
}

impl ProvisionReport {
    pub fn is_noop(&self) -> bool {
        self.added.is_empty()
    }

    /// The one-line summary printed by the CLI.
    pub fn message(&self) -> String {
        if self.is_noop() {
            "generate_secrets: No new secrets to generate.".to_string()
        } else {
            format!("Generated new secrets in {}.", self.path.display())
        }
    }
}

/// In-memory view of a run: what exists and what will be appended.
struct Merge {
    current: IndexMap<String, String>,
    lines: Vec<String>,
    added: Vec<String>,
}

impl Merge {
    fn new(current: IndexMap<String, String>) -> Self {
        Self {
            current,
            lines: Vec::new(),
            added: Vec::new(),
        }
    }

    fn need(&self, name: &str) -> bool {
        !self.current.contains_key(name)
    }

    fn add(&mut self, name: &str, value: String) {
        tracing::debug!(secret = name, "generated secret");
        self.lines.push(format_entry(name, &value));
        self.added.push(name.to_string());
        self.current.insert(name.to_string(), value);
    }

    /// Generate `name` if missing. Returns the new value when one was made.
    fn ensure(&mut self, name: &str, generator: Generator) -> Result<Option<String>> {
        if !self.need(name) {
            return Ok(None);
        }

        let value = generator
            .generate()
            .with_context(|| format!("Failed to generate secret '{}'", name))?;
        self.add(name, value.clone());

        Ok(Some(value))
    }
}

/// Run with the default redis client and lazily loaded settings, printing
/// the summary line.
pub fn run(config: &RunConfig) -> Result<ProvisionReport> {
    let mut settings = SettingsContext::new(&config.settings_path, None);
    let mut connect = |s: &Settings| -> Box<dyn QueueClient> {
        Box::new(RedisQueueClient::new(s.redis_url()))
    };

    let report = generate_secrets(config, &mut settings, &mut connect)?;
    println!("{}", report.message());

    Ok(report)
}

/// Provision every missing secret for `config.mode`.
///
/// `settings` is consulted only for production-only secrets; if the secrets
/// file already holds a `secret_key` and `settings` has none, it is seeded
/// from the file. A freshly generated `secret_key` is patched into
/// `settings` before any later step reads it. `connect` is invoked at most
/// once, and only when a redis password is generated.
///
/// Every value is decided before redis is touched, so a failure in any
/// generation step leaves the redis server and its config file unchanged.
///
/// # Errors
///
/// Returns an error if:
/// - The secrets file cannot be read or parsed
/// - A generator fails (including a missing `REMOTE_POSTGRES_PASSWORD`)
/// - The settings file is needed and cannot be loaded
/// - The redis config file or the secrets file cannot be written
/// - redis refuses the live update for a reason other than connectivity
pub fn generate_secrets(
    config: &RunConfig,
    settings: &mut SettingsContext,
    connect: &mut QueueConnector<'_>,
) -> Result<ProvisionReport> {
    let file = SecretsFile::load(&config.secrets_path)?;
    let development = config.mode.is_development();

    if settings.secret_key().is_none() {
        if let Some(key) = file.get(SECRET_KEY) {
            settings.set_secret_key(key.to_string());
        }
    }

    let mut merge = Merge::new(file.all().clone());
    let mut redis_live_update = None;
    let mut redis_password = None;

    // Step 1: tokens needed everywhere
    for name in AUTOGENERATED_SECRETS {
        merge.ensure(name, Generator::Token)?;
    }

    // Step 2: development database bootstrap
    if development {
        for name in DEVELOPMENT_SECRETS {
            merge.ensure(name, Generator::Token)?;
        }
    }

    // Step 3: web framework secret key; rotating it logs every user out
    if let Some(key) = merge.ensure(SECRET_KEY, Generator::SecretKey)? {
        settings.set_secret_key(key);
    }

    // Step 4: camo HTTPS proxy key
    merge.ensure(CAMO_KEY, Generator::RandomString)?;

    // Step 5: service passwords, only for services running on this host
    if config.mode == Mode::Production {
        if merge.need(MEMCACHED_PASSWORD)
            && settings.get()?.memcached_location == MEMCACHED_LOOPBACK
        {
            merge.ensure(MEMCACHED_PASSWORD, Generator::Token)?;
        }

        if merge.need(REDIS_PASSWORD) && settings.get()?.redis_host == REDIS_LOOPBACK {
            // Applied to redis only once everything else has been decided.
            redis_password = merge.ensure(REDIS_PASSWORD, Generator::Token)?;
        }
    }

    // Step 6: mobile push notification service identity
    merge.ensure(ZULIP_ORG_KEY, Generator::RandomString)?;
    merge.ensure(ZULIP_ORG_ID, Generator::Uuid)?;

    // Step 7: externally managed database password
    merge.ensure(POSTGRES_PASSWORD, Generator::Env(POSTGRES_PASSWORD_ENV))?;

    // Redis keeps no persistent data here, so the password is set on the
    // running server and in its config file instead of restarting it.
    if let Some(password) = redis_password {
        append_requirepass(&config.redis_conf_candidates, &password)?;

        let mut client = connect(settings.get()?);
        let outcome = client.config_set("requirepass", &password)?;
        if outcome != LiveUpdate::Applied {
            tracing::warn!(?outcome, "redis password recorded but not applied to the running server");
        }
        redis_live_update = Some(outcome);
    }

    if merge.lines.is_empty() {
        tracing::info!(path = %file.path().display(), "no new secrets to generate");
        return Ok(ProvisionReport {
            path: file.path().to_path_buf(),
            added: Vec::new(),
            redis_live_update,
        });
    }

    let mut lines = Vec::with_capacity(merge.lines.len() + 1);
    if !file.has_section() {
        lines.push(format!("[{}]\n", SECTION));
    }
    lines.append(&mut merge.lines);

    file.append(&lines)?;
    tracing::info!(
        path = %file.path().display(),
        count = merge.added.len(),
        "appended new secrets"
    );

    Ok(ProvisionReport {
        path: file.path().to_path_buf(),
        added: merge.added,
        redis_live_update,
    })
}
