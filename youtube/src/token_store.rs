//! The on-disk OAuth credentials file.

use eyre::Context;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Authorized-user credentials as persisted between runs.
///
/// The layout matches the credentials files written by Google's own client libraries, so an
/// existing file keeps working. `expiry` is optional because such files may not carry it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCredentials {
    /// The current access token.
    pub token: String,
    pub refresh_token: Option<String>,
    pub token_uri: String,
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    /// When the access token stops being usable, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<Timestamp>,
}

impl StoredCredentials {
    /// Whether the access token is known to have expired.
    ///
    /// Credentials without a recorded expiry are assumed valid until the API says otherwise.
    pub fn is_expired(&self) -> bool {
        self.expiry.is_some_and(|expiry| expiry <= Timestamp::now())
    }
}

/// Reads and writes [`StoredCredentials`] at a fixed path.
///
/// The file is read once before an authorized sequence and overwritten once after it. There is
/// no cross-process locking.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn exists(&self) -> eyre::Result<bool> {
        tokio::fs::try_exists(&self.path)
            .await
            .with_context(|| format!("check for token file {}", self.path.display()))
    }

    /// Loads the stored credentials, or `None` if the user has not authorized yet.
    pub async fn load(&self) -> eyre::Result<Option<StoredCredentials>> {
        if !self.exists().await? {
            return Ok(None);
        }
        let json = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("read token file {}", self.path.display()))?;
        let credentials = serde_json::from_str(&json)
            .with_context(|| format!("parse token file {}", self.path.display()))?;
        Ok(Some(credentials))
    }

    pub async fn save(&self, credentials: &StoredCredentials) -> eyre::Result<()> {
        let json = serde_json::to_string(credentials).context("serialize credentials")?;
        tokio::fs::write(&self.path, json)
            .await
            .with_context(|| format!("write token file {}", self.path.display()))?;
        tracing::debug!(path = %self.path.display(), "saved OAuth credentials");
        Ok(())
    }

    /// Deletes the stored credentials. Returns whether there was anything to delete.
    pub async fn clear(&self) -> eyre::Result<bool> {
        if !self.exists().await? {
            return Ok(false);
        }
        tokio::fs::remove_file(&self.path)
            .await
            .with_context(|| format!("remove token file {}", self.path.display()))?;
        Ok(true)
    }
}
