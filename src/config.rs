// generate-secrets Configuration Module
//
// This module resolves where the tool reads and writes (RunConfig) and loads
// the application settings it consults for production-only secrets.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Overrides the secrets file path.
pub const OUTPUT_ENV: &str = "GENERATE_SECRETS_OUTPUT";

/// Overrides the application settings file path.
pub const SETTINGS_ENV: &str = "GENERATE_SECRETS_SETTINGS";

pub const DEV_SECRETS_PATH: &str = "zproject/dev-secrets.conf";
pub const PROD_SECRETS_PATH: &str = "/etc/zulip/zulip-secrets.conf";
pub const DEFAULT_SETTINGS_PATH: &str = "/etc/zulip/settings.yaml";

/// Redis config files that may receive a `requirepass` line, in priority order.
pub const REDIS_CONF_CANDIDATES: [&str; 2] =
    ["/etc/redis/zuli-redis.conf", "/etc/redis/zulip-redis.conf"];

/// Which environment secrets are provisioned for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Development,
    Production,
}

impl Mode {
    pub fn is_development(self) -> bool {
        self == Mode::Development
    }

    /// Default secrets file location for this mode.
    pub fn default_secrets_path(self) -> &'static str {
        match self {
            Mode::Development => DEV_SECRETS_PATH,
            Mode::Production => PROD_SECRETS_PATH,
        }
    }
}

/// Everything a provisioning run needs to know about its surroundings.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub mode: Mode,
    /// Secrets file to read and append to
    pub secrets_path: PathBuf,
    /// Application settings (YAML)
    pub settings_path: PathBuf,
    /// Redis config files checked for the `requirepass` append
    pub redis_conf_candidates: Vec<PathBuf>,
}

impl RunConfig {
    /// Build the configuration for `mode`, honouring the environment overrides.
    pub fn from_env(mode: Mode) -> Self {
        let secrets_path = std::env::var_os(OUTPUT_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(mode.default_secrets_path()));

        let settings_path = std::env::var_os(SETTINGS_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_PATH));

        Self {
            mode,
            secrets_path,
            settings_path,
            redis_conf_candidates: REDIS_CONF_CANDIDATES.iter().map(PathBuf::from).collect(),
        }
    }
}

/// Application settings consulted for production-only secrets.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Settings {
    /// `host:port` of memcached
    #[serde(default = "default_memcached_location")]
    pub memcached_location: String,

    /// Hostname or address of redis
    #[serde(default = "default_redis_host")]
    pub redis_host: String,

    #[serde(default = "default_redis_port")]
    pub redis_port: u16,
}

fn default_memcached_location() -> String {
    "127.0.0.1:11211".to_string()
}

fn default_redis_host() -> String {
    "127.0.0.1".to_string()
}

fn default_redis_port() -> u16 {
    6379
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            memcached_location: default_memcached_location(),
            redis_host: default_redis_host(),
            redis_port: default_redis_port(),
        }
    }
}

impl Settings {
    /// Load settings from a YAML file. A missing file yields the defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "settings file absent, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file: {:?}", path))?;

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let settings: Settings = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse settings file: {:?}", path))?;

        Ok(settings)
    }

    /// Validate the settings
    pub fn validate(&self) -> Result<()> {
        if self.memcached_location.is_empty() {
            anyhow::bail!("memcached_location cannot be empty");
        }
        if self.redis_host.is_empty() {
            anyhow::bail!("redis_host cannot be empty");
        }
        if self.redis_port == 0 {
            anyhow::bail!("redis_port cannot be 0");
        }
        Ok(())
    }

    /// Connection URL for an unauthenticated redis client.
    pub fn redis_url(&self) -> String {
        format!("redis://{}:{}/", self.redis_host, self.redis_port)
    }
}

/// Lazily loaded settings plus the one field a run may patch in place.
///
/// The settings file is only read on the first [`SettingsContext::get`],
/// so runs that need no production-only secret never touch it. Reading
/// requires a secret key: either the one already on disk or the one
/// generated earlier in the same run via [`SettingsContext::set_secret_key`].
#[derive(Debug)]
pub struct SettingsContext {
    path: PathBuf,
    secret_key: Option<String>,
    loaded: Option<Settings>,
}

impl SettingsContext {
    pub fn new(path: impl Into<PathBuf>, secret_key: Option<String>) -> Self {
        Self {
            path: path.into(),
            secret_key,
            loaded: None,
        }
    }

    /// Build a context around already-loaded settings.
    pub fn with_settings(settings: Settings, secret_key: Option<String>) -> Self {
        Self {
            path: PathBuf::new(),
            secret_key,
            loaded: Some(settings),
        }
    }

    pub fn secret_key(&self) -> Option<&str> {
        self.secret_key.as_deref()
    }

    /// Replace the secret key for the rest of this run.
    pub fn set_secret_key(&mut self, key: String) {
        self.secret_key = Some(key);
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.is_some()
    }

    /// Load (once) and return the settings.
    ///
    /// # Errors
    ///
    /// Fails if no secret key is known yet, or if the file cannot be read,
    /// parsed or validated.
    pub fn get(&mut self) -> Result<&Settings> {
        if self.secret_key.as_deref().map_or(true, str::is_empty) {
            anyhow::bail!("Improperly configured: secret_key must be set before reading settings");
        }

        if self.loaded.is_none() {
            let settings = Settings::from_file(&self.path)?;
            settings
                .validate()
                .with_context(|| format!("Invalid settings in {:?}", self.path))?;
            self.loaded = Some(settings);
        }

        self.loaded
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("Settings were not loaded"))
    }
}
