use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_API_URL: &str = "https://trove.dev";
pub const API_URL_ENV: &str = "TROVE_API_URL";

/// Token pair stored after `trove login`. Field names match the config file
/// on disk, so existing files keep parsing across releases.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Access-token expiry, milliseconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(default, rename = "apiUrl", skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
}

/// On-disk credential store. Constructed with an explicit path so commands
/// receive it by injection; nothing in the crate reads it as a global.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing or unparseable file reads as "not logged in" rather than an
    /// error, so the caller can re-prompt login.
    pub fn read(&self) -> Option<Credentials> {
        let raw = std::fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(creds) => Some(creds),
            Err(err) => {
                tracing::debug!(
                    path = %self.path.display(),
                    "ignoring unparseable credential file: {err}"
                );
                None
            }
        }
    }

    pub fn write(&self, creds: &Credentials) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create config directory {}", parent.display())
            })?;
        }
        let content = serde_json::to_string_pretty(creds)?;
        std::fs::write(&self.path, content)
            .with_context(|| format!("failed to write credentials to {}", self.path.display()))?;
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| {
                format!("failed to remove credentials at {}", self.path.display())
            }),
        }
    }

    /// Registry base URL: environment override, then the stored `apiUrl`,
    /// then the public default.
    pub fn api_url(&self) -> String {
        resolve_api_url(
            std::env::var(API_URL_ENV).ok(),
            self.read().and_then(|c| c.api_url).as_deref(),
        )
    }
}

fn resolve_api_url(env_override: Option<String>, stored: Option<&str>) -> String {
    env_override
        .filter(|v| !v.trim().is_empty())
        .or_else(|| stored.map(str::to_string))
        .unwrap_or_else(|| DEFAULT_API_URL.to_string())
}
