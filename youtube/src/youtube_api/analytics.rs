//! OAuth-authenticated client for the YouTube Analytics API v2.

use crate::oauth::OAuthManager;
use crate::token_store::StoredCredentials;
use eyre::Context;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::instrument;

/// Base URL of the YouTube Analytics API v2.
pub const ANALYTICS_API_URL: &str = "https://youtubeanalytics.googleapis.com/v2";

/// Response structure for the `reports.query` API call.
///
/// See: <https://developers.google.com/youtube/analytics/reference/reports/query>
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportResponse {
    /// Describes the columns of each row, in order.
    #[serde(default)]
    pub column_headers: Vec<ColumnHeader>,
    /// Absent when the query matched no data.
    pub rows: Option<Vec<Vec<Value>>>,
}

impl ReportResponse {
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.column_headers.iter().map(|h| h.name.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnHeader {
    pub name: String,
    /// `DIMENSION` or `METRIC`.
    pub column_type: Option<String>,
    pub data_type: Option<String>,
}

/// Client for the YouTube Analytics API.
///
/// The client owns the user's credentials for the duration of one authorized sequence. Access
/// tokens are refreshed before a request when they are known to have expired, and once more if
/// the API still answers 401. Callers persist [`Self::credentials`] afterwards.
#[derive(Debug)]
pub struct AnalyticsClient {
    credentials: Mutex<StoredCredentials>,
    oauth_manager: Arc<OAuthManager>,
    base_url: String,
    client: reqwest::Client,
}

impl AnalyticsClient {
    pub fn new(
        credentials: StoredCredentials,
        oauth_manager: Arc<OAuthManager>,
        client: reqwest::Client,
    ) -> Self {
        Self {
            credentials: Mutex::new(credentials),
            oauth_manager,
            base_url: ANALYTICS_API_URL.to_string(),
            client,
        }
    }

    /// Points the client at a different API root, e.g. a local stand-in server.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Returns a clone of the current, possibly refreshed, credentials.
    pub async fn credentials(&self) -> StoredCredentials {
        self.credentials.lock().await.clone()
    }

    /// Returns an access token, refreshing it first if it is expired or `force` is set.
    async fn access_token(&self, force: bool) -> eyre::Result<String> {
        let mut credentials = self.credentials.lock().await;
        if force || credentials.is_expired() {
            tracing::debug!(force, "refreshing access token");
            match self
                .oauth_manager
                .refresh(&credentials)
                .await
                .context("refresh OAuth token")?
            {
                Some(fresh) => *credentials = fresh,
                None => {
                    tracing::error!("access token refresh failed, re-authorization required");
                    eyre::bail!("unable to refresh access token; authorize again");
                }
            }
        }
        Ok(credentials.token.clone())
    }

    async fn send_report_query(
        &self,
        query_params: &[(&str, &str)],
        access_token: &str,
    ) -> eyre::Result<reqwest::Response> {
        let url = format!("{}/reports", self.base_url);
        self.client
            .get(&url)
            .bearer_auth(access_token)
            .query(query_params)
            .send()
            .await
            .context("send request to YouTube Analytics API")
    }

    /// Runs an analytics report query.
    ///
    /// # API Reference
    ///
    /// <https://developers.google.com/youtube/analytics/reference/reports/query>
    #[instrument(skip(self), level = tracing::Level::DEBUG)]
    pub async fn query_report(&self, query_params: &[(&str, &str)]) -> eyre::Result<ReportResponse> {
        let access_token = self.access_token(false).await?;
        let mut response = self.send_report_query(query_params, &access_token).await?;

        if response.status() == http::StatusCode::UNAUTHORIZED {
            tracing::debug!("access token rejected, refreshing and retrying once");
            let access_token = self.access_token(true).await?;
            response = self.send_report_query(query_params, &access_token).await?;
        }

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            eyre::bail!(
                "YouTube Analytics API request failed with status {}: {}",
                status,
                error_text
            );
        }

        response
            .json()
            .await
            .context("parse YouTube Analytics API report")
    }

    /// Fetches the audience retention curve of one of the authorized channel's videos.
    #[instrument(skip(self))]
    pub async fn retention_report(
        &self,
        video_id: &str,
        start_date: &str,
        end_date: &str,
    ) -> eyre::Result<ReportResponse> {
        let filters = format!("video=={video_id}");
        let query_params = [
            ("ids", "channel==MINE"),
            ("startDate", start_date),
            ("endDate", end_date),
            ("dimensions", crate::retention::RETENTION_DIMENSION),
            ("metrics", crate::retention::RETENTION_METRICS),
            ("filters", filters.as_str()),
        ];
        self.query_report(&query_params).await
    }
}
