//! The two refresh flows the service runs: channel/video data and audience retention.

use crate::config::Config;
use crate::oauth::{ClientSecrets, OAuthManager};
use crate::retention::{self, RETENTION_START_DATE};
use crate::sheets::{CHANNEL_STATISTICS_SHEET, RETENTION_SHEET, SheetsPublisher, VIDEO_DATA_SHEET};
use crate::stats::{self, YtStats};
use crate::store::{CHANNEL_STATISTICS_TABLE, RETENTION_TABLE, SqliteStore, VIDEO_DATA_TABLE};
use crate::table::{self, Table};
use crate::token_store::TokenStore;
use crate::youtube_api::{AnalyticsClient, DataApiClient};
use eyre::Context;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::instrument;

/// Outcome of a retention refresh that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionOutcome {
    /// The retention table was rewritten with this many rows.
    Updated { rows: usize },
    /// There are no stored OAuth credentials yet.
    NotAuthorized,
}

/// Summary of a finished video data refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoDataSummary {
    pub videos: usize,
    pub dump_file: Option<PathBuf>,
}

/// Long-lived collaborators shared by the HTTP handlers and the background refresh.
#[derive(Debug)]
pub struct Services {
    pub config: Arc<Config>,
    pub data_api: DataApiClient,
    pub oauth: Arc<OAuthManager>,
    pub tokens: TokenStore,
    pub sheets: SheetsPublisher,
    http: reqwest::Client,
    /// Held for the whole of a refresh, so refreshes never overlap and the token file has a
    /// single writer.
    refresh_lock: Mutex<()>,
}

impl Services {
    pub fn new(config: Arc<Config>) -> eyre::Result<Self> {
        let secrets = ClientSecrets::load(&config.client_secrets_file)?;
        let oauth = OAuthManager::new(secrets, config.scopes.clone(), config.redirect_url())
            .context("set up OAuth manager")?;
        let http = reqwest::Client::builder()
            .build()
            .context("build HTTP client")?;

        Ok(Self {
            data_api: DataApiClient::new(config.data_api_key.clone(), http.clone()),
            oauth: Arc::new(oauth),
            tokens: TokenStore::new(config.oauth_token_file.clone()),
            sheets: SheetsPublisher::new(
                config.service_account_file.clone(),
                config.spreadsheet_key.clone(),
            ),
            http,
            refresh_lock: Mutex::new(()),
            config,
        })
    }

    async fn write_tables(&self, tables: Vec<(&'static str, Table)>) -> eyre::Result<()> {
        let path = self.config.database_file.clone();
        tokio::task::spawn_blocking(move || {
            let mut store = SqliteStore::open(&path)?;
            for (name, table) in &tables {
                store.write_table(name, table)?;
            }
            Ok::<_, eyre::Report>(())
        })
        .await
        .context("join SQLite writer")?
    }

    /// Fetches channel statistics and all video data, then replaces the stored and published
    /// copies.
    #[instrument(skip(self), fields(channel_id = %self.config.channel_id))]
    pub async fn refresh_video_data(&self) -> eyre::Result<VideoDataSummary> {
        let _guard = self.refresh_lock.lock().await;

        let mut yt_stats = YtStats::new(self.data_api.clone(), self.config.channel_id.clone());
        yt_stats.fetch_channel_statistics().await;
        yt_stats.fetch_channel_video_data().await?;
        let Some(dataset) = yt_stats.fuse() else {
            eyre::bail!(
                "channel data for {} is not ready; the channel statistics could not be fetched",
                self.config.channel_id
            );
        };

        let dump_file = if self.config.dump_channel_json {
            Some(stats::write_dataset(&dataset, &self.config.data_dir).await?)
        } else {
            None
        };

        let channel_statistics =
            table::channel_statistics_table(&dataset.channel_id, &dataset.channel_statistics);
        let video_data = table::video_data_table(&dataset.video_data);

        self.write_tables(vec![
            (CHANNEL_STATISTICS_TABLE, channel_statistics.clone()),
            (VIDEO_DATA_TABLE, video_data.clone()),
        ])
        .await?;
        self.sheets
            .publish(&[
                (CHANNEL_STATISTICS_SHEET, &channel_statistics),
                (VIDEO_DATA_SHEET, &video_data),
            ])
            .await
            .context("publish channel data")?;

        Ok(VideoDataSummary {
            videos: dataset.video_data.len(),
            dump_file,
        })
    }

    /// Collects audience retention for every stored video, then replaces the stored and
    /// published copies.
    ///
    /// Credentials are written back to the token file even when the collection fails, so a
    /// refreshed access token is never lost.
    #[instrument(skip(self))]
    pub async fn refresh_retention(&self) -> eyre::Result<RetentionOutcome> {
        let _guard = self.refresh_lock.lock().await;

        let Some(credentials) = self.tokens.load().await? else {
            return Ok(RetentionOutcome::NotAuthorized);
        };

        let path = self.config.database_file.clone();
        let videos = tokio::task::spawn_blocking(move || SqliteStore::open(&path)?.read_videos())
            .await
            .context("join SQLite reader")?
            .context("read stored videos; refresh the video data first")?;

        let analytics =
            AnalyticsClient::new(credentials, Arc::clone(&self.oauth), self.http.clone());
        let today = jiff::Zoned::now().date().to_string();
        let collected = retention::collect_retention(&videos, |video_id| {
            let analytics = &analytics;
            let today = &today;
            async move {
                analytics
                    .retention_report(&video_id, RETENTION_START_DATE, today)
                    .await
            }
        })
        .await;

        self.tokens
            .save(&analytics.credentials().await)
            .await
            .context("persist OAuth credentials")?;
        let retention = collected.context("collect retention reports")?;
        let rows = retention.len();

        self.write_tables(vec![(RETENTION_TABLE, retention.clone())]).await?;
        self.sheets
            .publish(&[(RETENTION_SHEET, &retention)])
            .await
            .context("publish retention")?;

        Ok(RetentionOutcome::Updated { rows })
    }
}
