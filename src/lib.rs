//! generate-secrets - idempotent provisioning of installation secrets.
//!
//! This library fills the `[secrets]` configuration file with every secret
//! the deployment needs, generating only the ones that are missing.

pub mod config;
pub mod generators;
pub mod provision;
pub mod queue;
pub mod secrets_file;
