//! Start-up configuration, read from the process environment.

use eyre::Context;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Everything the service needs to know about its environment.
///
/// Built once at start-up and shared read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub client_secrets_file: PathBuf,
    pub oauth_token_file: PathBuf,
    pub scopes: Vec<String>,
    pub data_api_key: String,
    pub channel_id: String,
    pub service_account_file: PathBuf,
    pub spreadsheet_key: String,
    pub database_file: PathBuf,
    /// The single user allowed through `/login`.
    pub username: String,
    pub password: String,
    pub bind_addr: SocketAddr,
    /// Externally visible base URL, used to build the OAuth redirect URL.
    pub public_url: String,
    pub data_dir: PathBuf,
    pub keys_dir: PathBuf,
    /// Whether the video refresh also writes the fused dataset as JSON into `data_dir`.
    pub dump_channel_json: bool,
    /// Period of the background retention refresh, if enabled.
    pub retention_refresh_interval: Option<Duration>,
}

impl Config {
    pub fn from_env() -> eyre::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> eyre::Result<Self> {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| eyre::eyre!("missing required setting {key}"))
        };
        let optional = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let bind_addr = optional("BIND_ADDR")
            .unwrap_or_else(|| "127.0.0.1:8080".to_string())
            .parse::<SocketAddr>()
            .context("parse BIND_ADDR")?;
        let dump_channel_json = match optional("DUMP_CHANNEL_JSON") {
            None => false,
            Some(v) => parse_flag(&v).context("parse DUMP_CHANNEL_JSON")?,
        };
        let retention_refresh_interval = optional("RETENTION_REFRESH_INTERVAL_SECS")
            .map(|v| v.parse::<u64>().context("parse RETENTION_REFRESH_INTERVAL_SECS"))
            .transpose()?
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        Ok(Self {
            client_secrets_file: required("CLIENT_SECRETS_FILE")?.into(),
            oauth_token_file: required("OAUTH_TOKEN_FILE")?.into(),
            scopes: required("SCOPES")?
                .split(';')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
            data_api_key: required("YT_DATA_API_KEY")?,
            channel_id: required("CHANNEL_ID")?,
            service_account_file: required("SERVICE_ACCOUNT_FILE")?.into(),
            spreadsheet_key: required("SPREADSHEET_KEY")?,
            database_file: required("YOUTUBE_DB")?.into(),
            username: required("USERNAME")?,
            password: required("PASSWORD")?,
            bind_addr,
            public_url: optional("PUBLIC_URL")
                .unwrap_or_else(|| "http://localhost:8080".to_string())
                .trim_end_matches('/')
                .to_string(),
            data_dir: optional("DATA_DIR").unwrap_or_else(|| "data".to_string()).into(),
            keys_dir: optional("KEYS_DIR").unwrap_or_else(|| "keys".to_string()).into(),
            dump_channel_json,
            retention_refresh_interval,
        })
    }

    /// Where Google sends the user back to after consent.
    pub fn redirect_url(&self) -> String {
        format!("{}/oauth2callback", self.public_url)
    }

    /// Creates the data and keys directories if they do not exist yet.
    pub fn create_dirs(&self) -> eyre::Result<()> {
        for dir in [&self.data_dir, &self.keys_dir] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create directory {}", dir.display()))?;
        }
        Ok(())
    }
}

fn parse_flag(value: &str) -> eyre::Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => eyre::bail!("expected a boolean, got {other:?}"),
    }
}
