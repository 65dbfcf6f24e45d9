//! Shared response shapes and pagination infrastructure for the YouTube API clients.

use serde::Deserialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};
use tokio_stream::Stream;

/// A flat mapping of provider field name to value, as returned inside one API resource part.
pub type FieldMap = serde_json::Map<String, Value>;

/// The `id.kind` value that marks a search result as a video.
pub const VIDEO_KIND: &str = "youtube#video";

type OneFuturePage<'a, F, T> =
    Pin<Box<dyn Future<Output = eyre::Result<(F, (VecDeque<T>, Option<String>))>> + 'a + Send>>;

/// A paginated stream that fetches subsequent pages from a YouTube API list endpoint on demand.
///
/// Pages are requested strictly one after another: the next page is only requested once every
/// item of the current page has been yielded. Only forward pagination is supported.
pub struct PagedStream<'a, T, F> {
    /// Current batch of items from the most recent API response
    current_items: VecDeque<T>,
    /// Future representing the currently pending API request, if any
    pending_request: Option<OneFuturePage<'a, F, T>>,
    /// Whether we've reached the end of all available data
    is_done: bool,
}

impl<'a, T, F> PagedStream<'a, T, F> {
    /// Create a new PagedStream whose first page is fetched with no page token.
    pub fn new<Fut>(fetcher: F) -> Self
    where
        F: Fn(Option<String>) -> Fut,
        F: Send + 'a,
        Fut: Future<Output = eyre::Result<(VecDeque<T>, Option<String>)>> + Send + 'a,
    {
        let first_page = async move {
            let results = fetcher(None).await?;
            Ok((fetcher, results))
        };
        Self {
            pending_request: Some(Box::pin(first_page)),
            current_items: VecDeque::new(),
            is_done: false,
        }
    }
}

impl<'a, T: Unpin, F> Unpin for PagedStream<'a, T, F> {}

impl<'a, T: Unpin, F, Fut> Stream for PagedStream<'a, T, F>
where
    F: Fn(Option<String>) -> Fut,
    F: Send + 'a,
    Fut: Future<Output = eyre::Result<(VecDeque<T>, Option<String>)>> + Send + 'a,
{
    type Item = eyre::Result<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if let Some(item) = self.current_items.pop_front() {
                return Poll::Ready(Some(Ok(item)));
            }

            if self.is_done {
                return Poll::Ready(None);
            }

            let Some(pending) = self.pending_request.as_mut() else {
                self.is_done = true;
                return Poll::Ready(None);
            };

            match pending.as_mut().poll(cx) {
                Poll::Ready(Ok((fetcher, (items, next_token)))) => {
                    self.current_items.extend(items);

                    if let Some(next_token) = next_token {
                        // set up the next page, but don't poll it until this one is drained
                        self.pending_request = Some(Box::pin(async move {
                            let results = fetcher(Some(next_token)).await?;
                            Ok((fetcher, results))
                        }));
                    } else {
                        self.is_done = true;
                        self.pending_request = None;
                    }
                }
                Poll::Ready(Err(e)) => {
                    self.pending_request = None;
                    self.is_done = true;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Response structure for the `search.list` API call.
///
/// Every field is optional: error payloads and otherwise malformed responses still deserialize,
/// and are then treated as an empty final page.
///
/// See: <https://developers.google.com/youtube/v3/docs/search/list>
#[derive(Debug, Default, Deserialize)]
pub struct SearchListResponse {
    pub items: Option<Vec<SearchResult>>,
    /// Token for the next page; absent on the last page.
    #[serde(rename = "nextPageToken")]
    pub next_page_token: Option<String>,
}

/// A single search result. Only its resource identifier is requested (`part=id`).
#[derive(Debug, Default, Deserialize)]
pub struct SearchResult {
    pub id: Option<ResourceId>,
}

/// Identifies the resource a search result points at.
///
/// See: <https://developers.google.com/youtube/v3/docs/search#id>
#[derive(Debug, Default, Deserialize)]
pub struct ResourceId {
    pub kind: Option<String>,
    #[serde(rename = "videoId")]
    pub video_id: Option<String>,
}

/// One page of search results reduced to the video IDs it carries.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SearchPage {
    pub video_ids: VecDeque<String>,
    pub next_page_token: Option<String>,
}

impl From<SearchListResponse> for SearchPage {
    fn from(response: SearchListResponse) -> Self {
        let Some(items) = response.items else {
            tracing::warn!("search response has no items; treating it as the final page");
            return Self::default();
        };

        let mut video_ids = VecDeque::with_capacity(items.len());
        for (index, item) in items.into_iter().enumerate() {
            let Some(ResourceId { kind, video_id }) = item.id else {
                tracing::warn!(index, "search result has no id, skipping");
                continue;
            };
            let Some(kind) = kind else {
                tracing::warn!(index, "search result has no id.kind, skipping");
                continue;
            };
            if kind != VIDEO_KIND {
                continue;
            }
            match video_id {
                Some(video_id) => video_ids.push_back(video_id),
                None => tracing::warn!(index, "video search result has no id.videoId, skipping"),
            }
        }

        Self {
            video_ids,
            next_page_token: response.next_page_token,
        }
    }
}

/// Response structure for `videos.list` and `channels.list` when the requested parts are
/// consumed as free-form field maps.
#[derive(Debug, Default, Deserialize)]
pub struct ResourceListResponse {
    pub items: Option<Vec<FieldMap>>,
}

impl ResourceListResponse {
    /// Returns the fields of `part` on the first returned resource, if there is one.
    pub fn first_part(mut self, part: &str) -> Option<FieldMap> {
        let first = self.items.as_mut()?.first_mut()?;
        match first.remove(part)? {
            Value::Object(fields) => Some(fields),
            _ => None,
        }
    }
}
