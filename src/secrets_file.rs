//! Loader and append-only writer for the `[secrets]` configuration file.
//!
//! # File Format
//!
//! ```text
//! [secrets]
//! avatar_salt = 5f0c...
//! secret_key = q8w(...
//! ```
//!
//! Only the `secrets` section is read. Values are taken verbatim (no
//! interpolation), keys are lower-cased. The file is never rewritten in
//! place: new entries are only ever appended.

use anyhow::{Context, Result};
use indexmap::IndexMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Name of the only section this tool reads and writes.
pub const SECTION: &str = "secrets";

/// Secrets loaded from disk, in file order.
#[derive(Debug, Clone)]
pub struct SecretsFile {
    path: PathBuf,
    pub(crate) entries: IndexMap<String, String>,
    has_section: bool,
}

impl SecretsFile {
    /// Load the secrets file at `path`.
    ///
    /// A missing or zero-length file yields an empty mapping.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file exists but cannot be read
    /// - The file is not valid UTF-8
    /// - The file does not parse (see [`parse_secrets`])
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let empty = match fs::metadata(path) {
            Ok(meta) => meta.len() == 0,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to stat secrets file: {}", path.display()))
            }
        };

        if empty {
            tracing::debug!(path = %path.display(), "secrets file absent or empty");
            return Ok(Self {
                path: path.to_path_buf(),
                entries: IndexMap::new(),
                has_section: false,
            });
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read secrets file: {}", path.display()))?;

        let (entries, has_section) = parse_secrets(&content)
            .with_context(|| format!("Failed to parse secrets file: {}", path.display()))?;

        if !has_section {
            return Err(anyhow::anyhow!(
                "No [{}] section in secrets file: {}",
                SECTION,
                path.display()
            ));
        }

        tracing::debug!(path = %path.display(), count = entries.len(), "loaded secrets");

        Ok(Self {
            path: path.to_path_buf(),
            entries,
            has_section,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether a `[secrets]` header is already on disk.
    pub fn has_section(&self) -> bool {
        self.has_section
    }

    /// All secrets as a read-only ordered map.
    pub fn all(&self) -> &IndexMap<String, String> {
        &self.entries
    }

    /// Append `lines` to the file, creating it if needed.
    ///
    /// A newline is written first in case the existing file was hand-edited
    /// and lost its trailing newline. Each line must already end in `\n`.
    pub fn append(&self, lines: &[String]) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| {
                format!("Failed to open secrets file for append: {}", self.path.display())
            })?;

        let mut buf = String::from("\n");
        for line in lines {
            buf.push_str(line);
        }

        file.write_all(buf.as_bytes())
            .with_context(|| format!("Failed to write secrets file: {}", self.path.display()))?;

        Ok(())
    }
}

/// Format one `name = value` line as appended to the file.
pub fn format_entry(name: &str, value: &str) -> String {
    format!("{} = {}\n", name, value)
}

/// Parse INI-style content and return the `[secrets]` entries plus whether
/// the section header was present.
///
/// # Errors
///
/// Fails on a key/value line before any section header, on a line that is
/// neither a comment, a header nor `key = value` / `key: value`, on a
/// section header seen twice, and on a key repeated inside `[secrets]`.
pub fn parse_secrets(content: &str) -> Result<(IndexMap<String, String>, bool)> {
    let mut entries = IndexMap::new();
    let mut has_section = false;
    let mut section: Option<String> = None;
    let mut seen_sections: Vec<String> = Vec::new();

    for (idx, raw) in content.lines().enumerate() {
        let lineno = idx + 1;
        let line = raw.trim();

        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if line.starts_with('[') {
            let name = line
                .strip_prefix('[')
                .and_then(|rest| rest.strip_suffix(']'))
                .ok_or_else(|| anyhow::anyhow!("Malformed section header on line {}", lineno))?;
            if seen_sections.iter().any(|seen| seen == name) {
                return Err(anyhow::anyhow!(
                    "Duplicate section [{}] on line {}",
                    name,
                    lineno
                ));
            }
            seen_sections.push(name.to_string());
            if name == SECTION {
                has_section = true;
            }
            section = Some(name.to_string());
            continue;
        }

        let Some(current) = section.as_deref() else {
            return Err(anyhow::anyhow!(
                "Entry before any section header on line {}",
                lineno
            ));
        };

        let split_at = line
            .find(|c| c == '=' || c == ':')
            .ok_or_else(|| anyhow::anyhow!("Expected 'key = value' on line {}", lineno))?;

        let key = line[..split_at].trim().to_lowercase();
        let value = line[split_at + 1..].trim().to_string();

        if key.is_empty() {
            return Err(anyhow::anyhow!("Empty key on line {}", lineno));
        }

        if current != SECTION {
            continue;
        }

        if entries.contains_key(&key) {
            return Err(anyhow::anyhow!(
                "Duplicate secret '{}' on line {}",
                key,
                lineno
            ));
        }
        entries.insert(key, value);
    }

    Ok((entries, has_section))
}
