//! Collection and fusion of a channel's statistics and per-video data.
//!
//! [`YtStats`] walks the channel's video listing, fetches every [`VideoPart`] of every listed
//! video one request at a time, and merges the parts into one record per video. Together with
//! the channel's own statistics this forms a [`FusedDataset`].

use crate::youtube_api::{DataApiClient, FieldMap, VideoPart};
use eyre::Context;
use indexmap::IndexMap;
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use std::future::Future;
use std::path::{Path, PathBuf};
use tokio_stream::{Stream, StreamExt};
use tracing::instrument;

/// Page size used when listing a channel's videos.
pub const VIDEO_PAGE_SIZE: u32 = 50;

/// All fields collected for one video, across every part.
pub type VideoRecord = FieldMap;

/// Merges a fetched fragment into a record. Existing fields are overwritten on collision and
/// never removed.
pub fn merge_fields(record: &mut VideoRecord, fragment: FieldMap) {
    record.extend(fragment);
}

/// Drains a stream of video IDs into a mapping of ID to empty record, in listing order.
///
/// IDs that are listed more than once keep their first position.
pub async fn collect_video_ids<S>(video_ids: S) -> eyre::Result<IndexMap<String, VideoRecord>>
where
    S: Stream<Item = eyre::Result<String>>,
{
    let mut video_ids = std::pin::pin!(video_ids);
    let mut records = IndexMap::new();
    while let Some(video_id) = video_ids.next().await {
        let video_id = video_id.context("list channel videos")?;
        records.entry(video_id).or_insert_with(VideoRecord::new);
    }
    Ok(records)
}

/// Fetches every part of every video in `records` and merges it into that video's record.
///
/// `fetch` yields an empty map for a part it could not get, which leaves the record as is.
pub async fn fill_video_records<F, Fut>(records: &mut IndexMap<String, VideoRecord>, mut fetch: F)
where
    F: FnMut(String, VideoPart) -> Fut,
    Fut: Future<Output = FieldMap>,
{
    for (video_id, record) in records.iter_mut() {
        for part in VideoPart::ALL {
            let fragment = fetch(video_id.clone(), part).await;
            merge_fields(record, fragment);
        }
    }
}

/// Channel statistics and per-video records of one channel, keyed by the channel ID when
/// serialized:
///
/// ```json
/// { "<channel id>": { "channel_statistics": { .. }, "video_data": { "<video id>": { .. } } } }
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct FusedDataset {
    pub channel_id: String,
    pub channel_statistics: FieldMap,
    pub video_data: IndexMap<String, VideoRecord>,
}

impl FusedDataset {
    /// Name of the file [`YtStats::dump`] writes, derived from the channel's title as reported
    /// on its most recent video record.
    pub fn dump_file_name(&self) -> String {
        let title = self
            .video_data
            .last()
            .and_then(|(_, record)| record.get("channelTitle"))
            .and_then(|title| title.as_str())
            .unwrap_or(&self.channel_id);
        let title = title.replace([' ', '/', '\\'], "_").to_lowercase();
        format!("{title}_channel_data.json")
    }
}

impl Serialize for FusedDataset {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct ChannelData<'a> {
            channel_statistics: &'a FieldMap,
            video_data: &'a IndexMap<String, VideoRecord>,
        }

        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(
            &self.channel_id,
            &ChannelData {
                channel_statistics: &self.channel_statistics,
                video_data: &self.video_data,
            },
        )?;
        map.end()
    }
}

/// Collects the statistics of one channel and the data of all its videos.
#[derive(Debug)]
pub struct YtStats {
    client: DataApiClient,
    channel_id: String,
    channel_statistics: Option<FieldMap>,
    video_data: Option<IndexMap<String, VideoRecord>>,
}

impl YtStats {
    pub fn new(client: DataApiClient, channel_id: impl Into<String>) -> Self {
        Self {
            client,
            channel_id: channel_id.into(),
            channel_statistics: None,
            video_data: None,
        }
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    /// Fetches and keeps the channel's statistics.
    ///
    /// Leaves them unset if the request failed or the provider did not return the channel.
    #[instrument(skip(self), fields(channel_id = %self.channel_id))]
    pub async fn fetch_channel_statistics(&mut self) -> Option<&FieldMap> {
        self.channel_statistics = self.client.get_channel_statistics(&self.channel_id).await;
        self.channel_statistics.as_ref()
    }

    /// Lists every video of the channel and fetches all parts of each, one request at a time.
    #[instrument(skip(self), fields(channel_id = %self.channel_id))]
    pub async fn fetch_channel_video_data(&mut self) -> eyre::Result<&IndexMap<String, VideoRecord>> {
        let client = &self.client;
        let mut records = collect_video_ids(
            client.list_channel_video_ids(&self.channel_id, Some(VIDEO_PAGE_SIZE)),
        )
        .await?;
        tracing::info!(videos = records.len(), "listed channel videos");

        fill_video_records(&mut records, |video_id, part| async move {
            client.get_video_part(&video_id, part).await
        })
        .await;

        Ok(self.video_data.insert(records))
    }

    /// Combines channel statistics and video data, if both have been fetched.
    pub fn fuse(&self) -> Option<FusedDataset> {
        let (Some(channel_statistics), Some(video_data)) =
            (&self.channel_statistics, &self.video_data)
        else {
            tracing::warn!(
                has_channel_statistics = self.channel_statistics.is_some(),
                has_video_data = self.video_data.is_some(),
                "channel data is not ready"
            );
            return None;
        };

        Some(FusedDataset {
            channel_id: self.channel_id.clone(),
            channel_statistics: channel_statistics.clone(),
            video_data: video_data.clone(),
        })
    }

    /// Writes the fused dataset as indented JSON into `dir`, returning the written path.
    ///
    /// Returns `None` without writing anything if the data is not ready.
    pub async fn dump(&self, dir: &Path) -> eyre::Result<Option<PathBuf>> {
        let Some(dataset) = self.fuse() else {
            return Ok(None);
        };
        write_dataset(&dataset, dir).await.map(Some)
    }
}

/// Writes `dataset` as 4-space indented JSON into `dir`, returning the written path.
pub async fn write_dataset(dataset: &FusedDataset, dir: &Path) -> eyre::Result<PathBuf> {
    let mut json = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut json, formatter);
    dataset
        .serialize(&mut serializer)
        .context("serialize channel data")?;

    let path = dir.join(dataset.dump_file_name());
    tokio::fs::write(&path, json)
        .await
        .with_context(|| format!("write channel data to {}", path.display()))?;
    tracing::info!(path = %path.display(), "dumped channel data");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};

    fn fields(value: Value) -> FieldMap {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    fn stats(statistics: Option<FieldMap>, videos: Option<IndexMap<String, VideoRecord>>) -> YtStats {
        YtStats {
            client: DataApiClient::new("key", reqwest::Client::new()),
            channel_id: "UC123".to_string(),
            channel_statistics: statistics,
            video_data: videos,
        }
    }

    #[test]
    fn merge_is_additive_and_last_write_wins() {
        let mut record = fields(json!({ "title": "old", "viewCount": "1" }));
        merge_fields(&mut record, fields(json!({ "title": "new", "duration": "PT1M" })));
        merge_fields(&mut record, FieldMap::new());

        assert_eq!(
            Value::Object(record),
            json!({ "title": "new", "viewCount": "1", "duration": "PT1M" })
        );
    }

    #[tokio::test]
    async fn collect_deduplicates_in_listing_order() {
        let ids = tokio_stream::iter(["b", "a", "b", "c"].map(|id| Ok(id.to_string())));
        let records = collect_video_ids(ids).await.unwrap();
        assert_eq!(records.keys().collect::<Vec<_>>(), ["b", "a", "c"]);
        assert!(records.values().all(|r| r.is_empty()));
    }

    #[tokio::test]
    async fn fill_merges_every_part() {
        let mut records = IndexMap::from([
            ("a".to_string(), VideoRecord::new()),
            ("b".to_string(), VideoRecord::new()),
        ]);
        let mut requests = Vec::new();
        fill_video_records(&mut records, |video_id, part| {
            requests.push((video_id.clone(), part));
            async move {
                match (video_id.as_str(), part) {
                    (_, VideoPart::Snippet) => fields(json!({ "title": video_id.clone() })),
                    ("a", VideoPart::Statistics) => fields(json!({ "viewCount": "5" })),
                    // b has no statistics
                    (_, VideoPart::Statistics) => FieldMap::new(),
                    (_, VideoPart::ContentDetails) => fields(json!({ "duration": "PT2M" })),
                }
            }
        })
        .await;

        assert_eq!(requests.len(), 6);
        assert_eq!(
            Value::Object(records["a"].clone()),
            json!({ "title": "a", "viewCount": "5", "duration": "PT2M" })
        );
        assert_eq!(
            Value::Object(records["b"].clone()),
            json!({ "title": "b", "duration": "PT2M" })
        );
    }

    #[test]
    fn fuse_requires_both_parts() {
        let videos = IndexMap::from([("a".to_string(), VideoRecord::new())]);
        assert_eq!(stats(None, Some(videos.clone())).fuse(), None);
        assert_eq!(stats(Some(FieldMap::new()), None).fuse(), None);
        assert!(stats(Some(FieldMap::new()), Some(videos)).fuse().is_some());
    }

    #[test]
    fn fused_dataset_is_keyed_by_channel() {
        let videos = IndexMap::from([(
            "a".to_string(),
            fields(json!({ "title": "A", "channelTitle": "My Channel" })),
        )]);
        let fused = stats(Some(fields(json!({ "viewCount": "9" }))), Some(videos))
            .fuse()
            .unwrap();

        assert_eq!(
            serde_json::to_value(&fused).unwrap(),
            json!({
                "UC123": {
                    "channel_statistics": { "viewCount": "9" },
                    "video_data": { "a": { "title": "A", "channelTitle": "My Channel" } }
                }
            })
        );
        assert_eq!(fused.dump_file_name(), "my_channel_channel_data.json");
    }

    #[tokio::test]
    async fn dump_writes_indented_json() {
        let dir = tempfile::tempdir().unwrap();

        let not_ready = stats(None, None);
        assert_eq!(not_ready.dump(dir.path()).await.unwrap(), None);

        let videos = IndexMap::from([("a".to_string(), VideoRecord::new())]);
        let ready = stats(Some(FieldMap::new()), Some(videos));
        let path = ready.dump(dir.path()).await.unwrap().unwrap();

        // no channelTitle anywhere, so the channel ID names the file
        assert_eq!(path, dir.path().join("uc123_channel_data.json"));
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.starts_with("{\n    \"UC123\": {\n        \"channel_statistics\""));
    }
}
