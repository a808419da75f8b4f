//! Common testing utilities for generate-secrets integration tests.

#![allow(dead_code)]

use generate_secrets::config::{Mode, RunConfig, Settings, SettingsContext};
use generate_secrets::provision::{generate_secrets, ProvisionReport, POSTGRES_PASSWORD_ENV};
use generate_secrets::queue::{LiveUpdate, QueueClient};
use std::cell::RefCell;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::rc::Rc;
use tempfile::TempDir;

/// Value every test process uses for `REMOTE_POSTGRES_PASSWORD`.
pub const DB_PASSWORD: &str = "integration-db-password";

/// Test context that manages temporary files and directories.
pub struct TestContext {
    /// Path to temporary directory
    pub temp_path: PathBuf,
    /// The temporary directory (kept to prevent early deletion)
    _temp_dir: TempDir,
}

impl TestContext {
    /// Create a new test context with a temporary directory.
    pub fn new() -> anyhow::Result<Self> {
        let temp_dir = TempDir::new()?;
        let temp_path = temp_dir.path().to_path_buf();

        Ok(Self {
            temp_path,
            _temp_dir: temp_dir,
        })
    }

    /// Create a test file with content.
    pub fn create_file(&self, name: &str, content: &str) -> anyhow::Result<PathBuf> {
        let file_path = self.temp_path.join(name);
        let mut file = fs::File::create(&file_path)?;
        file.write_all(content.as_bytes())?;
        Ok(file_path)
    }

    /// Get the path to a file in the temp directory.
    pub fn path(&self, name: &str) -> PathBuf {
        self.temp_path.join(name)
    }

    /// Run configuration rooted in the temp directory.
    pub fn run_config(&self, mode: Mode) -> RunConfig {
        RunConfig {
            mode,
            secrets_path: self.path("zulip-secrets.conf"),
            settings_path: self.path("settings.yaml"),
            redis_conf_candidates: vec![self.path("zuli-redis.conf"), self.path("zulip-redis.conf")],
        }
    }

    /// Write the application settings file.
    pub fn write_settings(&self, memcached_location: &str, redis_host: &str) -> anyhow::Result<PathBuf> {
        self.create_file(
            "settings.yaml",
            &format!(
                "memcached_location: \"{}\"\nredis_host: \"{}\"\n",
                memcached_location, redis_host
            ),
        )
    }

    pub fn read_secrets(&self) -> String {
        fs::read_to_string(self.path("zulip-secrets.conf")).unwrap_or_default()
    }
}

/// Calls recorded by a [`FakeQueue`].
pub type Calls = Rc<RefCell<Vec<(String, String)>>>;

/// In-memory queue service answering every CONFIG SET with a fixed outcome.
pub struct FakeQueue {
    pub outcome: LiveUpdate,
    pub calls: Calls,
}

impl QueueClient for FakeQueue {
    fn config_set(&mut self, key: &str, value: &str) -> anyhow::Result<LiveUpdate> {
        self.calls
            .borrow_mut()
            .push((key.to_string(), value.to_string()));
        Ok(self.outcome)
    }
}

/// Provision with a fake queue that answers with `outcome`.
pub fn provision_with(
    config: &RunConfig,
    outcome: LiveUpdate,
) -> anyhow::Result<(ProvisionReport, Vec<(String, String)>)> {
    std::env::set_var(POSTGRES_PASSWORD_ENV, DB_PASSWORD);
    provision_with_current_env(config, outcome)
}

/// Provision with a fake queue, leaving the process environment as it is.
pub fn provision_with_current_env(
    config: &RunConfig,
    outcome: LiveUpdate,
) -> anyhow::Result<(ProvisionReport, Vec<(String, String)>)> {
    let calls: Calls = Rc::new(RefCell::new(Vec::new()));
    let recorded = Rc::clone(&calls);
    let mut connect = move |_: &Settings| -> Box<dyn QueueClient> {
        Box::new(FakeQueue {
            outcome,
            calls: Rc::clone(&recorded),
        })
    };
    let mut settings = SettingsContext::new(&config.settings_path, None);

    let report = generate_secrets(config, &mut settings, &mut connect)?;
    let calls = calls.borrow().clone();
    Ok((report, calls))
}

/// Provision with a queue that accepts every change.
pub fn provision(config: &RunConfig) -> anyhow::Result<(ProvisionReport, Vec<(String, String)>)> {
    provision_with(config, LiveUpdate::Applied)
}
