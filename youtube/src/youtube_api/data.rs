//! API-key client for the public parts of the YouTube Data API v3.

use crate::youtube_api::types::{
    FieldMap, PagedStream, ResourceListResponse, SearchListResponse, SearchPage,
};
use eyre::Context;
use serde::de::DeserializeOwned;
use std::fmt;
use tokio_stream::Stream;
use tracing::instrument;

/// Base URL of the YouTube Data API v3.
pub const DATA_API_URL: &str = "https://www.googleapis.com/youtube/v3";

/// A named subset of a video's fields, as accepted by the `part` parameter of `videos.list`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VideoPart {
    Snippet,
    Statistics,
    ContentDetails,
}

impl VideoPart {
    /// Every part collected for a video, in merge order.
    pub const ALL: [VideoPart; 3] = [
        VideoPart::Snippet,
        VideoPart::Statistics,
        VideoPart::ContentDetails,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            VideoPart::Snippet => "snippet",
            VideoPart::Statistics => "statistics",
            VideoPart::ContentDetails => "contentDetails",
        }
    }
}

impl fmt::Display for VideoPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client for the key-authenticated endpoints of the YouTube Data API.
///
/// Failed requests never abort a collection. Responses with an error status still carry a JSON
/// body, which then simply lacks the expected `items` and is defaulted. Transport failures and
/// bodies that are not the expected JSON are logged and treated as an empty response in the
/// same way.
#[derive(Debug, Clone)]
pub struct DataApiClient {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl DataApiClient {
    pub fn new(api_key: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DATA_API_URL.to_string(),
            client,
        }
    }

    /// Points the client at a different API root, e.g. a local stand-in server.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query_params: &[(&str, &str)],
    ) -> eyre::Result<T> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let response = self
            .client
            .get(&url)
            .query(&[("key", self.api_key.as_str())])
            .query(query_params)
            .send()
            .await
            .with_context(|| format!("send request to YouTube Data API: {endpoint}"))?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(%status, endpoint, "YouTube Data API returned an error status");
        }

        response
            .json()
            .await
            .with_context(|| format!("parse YouTube Data API {endpoint} response as JSON"))
    }

    /// Like [`Self::get_json`], but a failed request is logged and yields an empty response.
    async fn get_json_or_default<T: DeserializeOwned + Default>(
        &self,
        endpoint: &str,
        query_params: &[(&str, &str)],
    ) -> T {
        match self.get_json(endpoint, query_params).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(endpoint, "YouTube Data API request failed: {e:?}");
                T::default()
            }
        }
    }

    /// Fetches one page of a channel's videos from `search.list`, newest first.
    ///
    /// # API Reference
    ///
    /// <https://developers.google.com/youtube/v3/docs/search/list>
    #[instrument(skip(self))]
    pub async fn search_channel_videos(
        &self,
        channel_id: &str,
        max_results: Option<u32>,
        page_token: Option<&str>,
    ) -> SearchPage {
        let max_results_string = max_results.map(|n| n.to_string());
        let mut query_params = vec![
            ("channelId", channel_id),
            ("part", "id"),
            ("order", "date"),
        ];
        if let Some(ref max_results) = max_results_string {
            query_params.push(("maxResults", max_results.as_str()));
        }
        if let Some(token) = page_token {
            query_params.push(("pageToken", token));
        }

        let response: SearchListResponse = self.get_json_or_default("search", &query_params).await;
        let page = SearchPage::from(response);

        tracing::debug!(
            returned_videos = page.video_ids.len(),
            has_next_page = page.next_page_token.is_some(),
            "fetched search page"
        );

        page
    }

    /// Returns a paginated stream of the IDs of every video on a channel.
    ///
    /// Pages are requested one at a time and only as the stream is consumed. A page without
    /// results ends the stream.
    pub fn list_channel_video_ids<'a>(
        &'a self,
        channel_id: &str,
        max_results: Option<u32>,
    ) -> impl Stream<Item = eyre::Result<String>> + use<'a> {
        let channel_id = channel_id.to_string();
        PagedStream::new(move |page_token| {
            let channel_id = channel_id.clone();
            async move {
                let page = self
                    .search_channel_videos(&channel_id, max_results, page_token.as_deref())
                    .await;
                Ok((page.video_ids, page.next_page_token))
            }
        })
    }

    /// Fetches the fields of one part of one video.
    ///
    /// Returns an empty map, and logs an error, if the request failed or the provider returned no
    /// matching video.
    ///
    /// # API Reference
    ///
    /// <https://developers.google.com/youtube/v3/docs/videos/list>
    #[instrument(skip(self))]
    pub async fn get_video_part(&self, video_id: &str, part: VideoPart) -> FieldMap {
        let query_params = [("part", part.as_str()), ("id", video_id)];
        let response: ResourceListResponse =
            self.get_json_or_default("videos", &query_params).await;

        response.first_part(part.as_str()).unwrap_or_else(|| {
            tracing::error!(video_id, %part, "video part missing from response");
            FieldMap::new()
        })
    }

    /// Fetches the statistics block of a channel.
    ///
    /// Returns `None` if the request failed or the provider returned no such channel, e.g. because
    /// the ID is invalid or the channel was deleted.
    ///
    /// # API Reference
    ///
    /// <https://developers.google.com/youtube/v3/docs/channels/list>
    #[instrument(skip(self))]
    pub async fn get_channel_statistics(&self, channel_id: &str) -> Option<FieldMap> {
        let query_params = [("part", "statistics"), ("id", channel_id)];
        let response: ResourceListResponse =
            self.get_json_or_default("channels", &query_params).await;

        let statistics = response.first_part("statistics");
        if statistics.is_none() {
            tracing::warn!(channel_id, "channel statistics missing from response");
        }
        statistics
    }
}
