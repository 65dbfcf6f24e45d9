mod common;

use http::StatusCode;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use tokio_stream::StreamExt;
use youtube_stats::YtStats;
use youtube_stats::youtube_api::{DataApiClient, VideoPart};

const API_KEY: &str = "test-key";

fn search(req: &common::Recorded) -> Value {
    match req.param("pageToken") {
        None => json!({
            "items": [
                { "id": { "kind": "youtube#video", "videoId": "A" } },
                { "id": { "kind": "youtube#playlist", "playlistId": "PL1" } }
            ],
            "nextPageToken": "page-2"
        }),
        Some("page-2") => json!({
            "items": [
                { "id": { "kind": "youtube#video", "videoId": "B" } },
                { "id": { "kind": "youtube#video", "videoId": "A" } }
            ]
        }),
        Some(other) => panic!("unexpected page token {other}"),
    }
}

fn videos(req: &common::Recorded) -> Value {
    let id = req.param("id").unwrap();
    match (req.param("part").unwrap(), id) {
        ("snippet", _) => json!({
            "items": [{ "snippet": { "title": format!("Video {id}"), "channelTitle": "My Channel" } }]
        }),
        ("statistics", "A") => json!({ "items": [{ "statistics": { "viewCount": "10" } }] }),
        // B's statistics are hidden
        ("statistics", _) => json!({ "items": [] }),
        ("contentDetails", _) => json!({ "items": [{ "contentDetails": { "duration": "PT1M" } }] }),
        (part, _) => panic!("unexpected part {part}"),
    }
}

fn channels(req: &common::Recorded) -> Value {
    match req.param("id") {
        Some("UC_good") => json!({ "items": [{ "statistics": { "subscriberCount": "3" } }] }),
        _ => json!({ "kind": "youtube#channelListResponse", "pageInfo": { "totalResults": 0 } }),
    }
}

async fn fake_data_api() -> (DataApiClient, Arc<Mutex<Vec<common::Recorded>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let base_url = common::serve({
        let seen = Arc::clone(&seen);
        move |req| {
            assert_eq!(req.param("key"), Some(API_KEY));
            let body = match req.path.as_str() {
                "/search" => search(&req),
                "/videos" => videos(&req),
                "/channels" => channels(&req),
                "/quota/search" => {
                    return (
                        StatusCode::FORBIDDEN,
                        json!({ "error": { "code": 403, "message": "quota exceeded" } }),
                    );
                }
                other => panic!("unexpected path {other}"),
            };
            seen.lock().unwrap().push(req);
            (StatusCode::OK, body)
        }
    })
    .await;
    let client = DataApiClient::new(API_KEY, reqwest::Client::new()).with_base_url(base_url);
    (client, seen)
}

#[tokio::test]
async fn lists_videos_across_pages() {
    let (client, seen) = fake_data_api().await;

    let ids: Vec<String> = client
        .list_channel_video_ids("UC_good", Some(50))
        .collect::<eyre::Result<_>>()
        .await
        .unwrap();
    // the playlist is skipped, the repeat of A is still listed
    assert_eq!(ids, ["A", "B", "A"]);

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    for req in seen.iter() {
        assert_eq!(req.param("channelId"), Some("UC_good"));
        assert_eq!(req.param("part"), Some("id"));
        assert_eq!(req.param("order"), Some("date"));
        assert_eq!(req.param("maxResults"), Some("50"));
    }
}

#[tokio::test]
async fn error_status_is_an_empty_page() {
    let (client, _) = fake_data_api().await;
    let quota_url = format!("{}/quota", client.base_url());
    let client = client.with_base_url(quota_url);

    let page = client.search_channel_videos("UC_good", None, None).await;
    assert!(page.video_ids.is_empty());
    assert_eq!(page.next_page_token, None);
}

#[tokio::test]
async fn missing_part_is_empty() {
    let (client, _) = fake_data_api().await;
    let statistics = client.get_video_part("B", VideoPart::Statistics).await;
    assert!(statistics.is_empty());
}

#[tokio::test]
async fn collects_and_fuses_channel_data() {
    let (client, seen) = fake_data_api().await;
    let mut stats = YtStats::new(client, "UC_good");

    let statistics = stats.fetch_channel_statistics().await.cloned();
    assert_eq!(
        statistics.map(Value::Object),
        Some(json!({ "subscriberCount": "3" }))
    );

    let video_data = stats.fetch_channel_video_data().await.unwrap();
    assert_eq!(video_data.keys().collect::<Vec<_>>(), ["A", "B"]);
    assert_eq!(
        Value::Object(video_data["A"].clone()),
        json!({
            "title": "Video A",
            "channelTitle": "My Channel",
            "viewCount": "10",
            "duration": "PT1M"
        })
    );
    assert_eq!(
        Value::Object(video_data["B"].clone()),
        json!({ "title": "Video B", "channelTitle": "My Channel", "duration": "PT1M" })
    );

    // one channel lookup, two search pages, three parts for each of two videos
    assert_eq!(seen.lock().unwrap().len(), 1 + 2 + 6);

    let dataset = stats.fuse().unwrap();
    assert_eq!(dataset.dump_file_name(), "my_channel_channel_data.json");

    let dir = tempfile::tempdir().unwrap();
    let path = stats.dump(dir.path()).await.unwrap().unwrap();
    let written: Value = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
    assert_eq!(written["UC_good"]["video_data"]["B"]["title"], "Video B");
}

#[tokio::test]
async fn unknown_channel_is_never_ready() {
    let (client, _) = fake_data_api().await;
    let mut stats = YtStats::new(client, "UC_gone");

    assert_eq!(stats.fetch_channel_statistics().await, None);
    stats.fetch_channel_video_data().await.unwrap();
    assert_eq!(stats.fuse(), None);

    let dir = tempfile::tempdir().unwrap();
    assert_eq!(stats.dump(dir.path()).await.unwrap(), None);
}

#[tokio::test]
async fn failed_part_leaves_the_rest_of_the_batch() {
    let base_url = common::serve(|req| {
        let id = req.param("id").unwrap_or_default().to_string();
        let part = req.param("part").unwrap_or_default().to_string();
        match (req.path.as_str(), part.as_str(), id.as_str()) {
            ("/search", _, _) => (StatusCode::OK, search(&req)),
            ("/videos", "statistics", "B") => {
                (StatusCode::SERVICE_UNAVAILABLE, json!("backend error"))
            }
            ("/videos", _, _) => (StatusCode::OK, videos(&req)),
            (other, _, _) => panic!("unexpected path {other}"),
        }
    })
    .await;
    let client = DataApiClient::new(API_KEY, reqwest::Client::new()).with_base_url(base_url);

    assert!(client.get_video_part("B", VideoPart::Statistics).await.is_empty());

    let mut stats = YtStats::new(client, "UC_good");
    let video_data = stats.fetch_channel_video_data().await.unwrap();
    assert_eq!(video_data.keys().collect::<Vec<_>>(), ["A", "B"]);
    assert_eq!(video_data["A"]["viewCount"], "10");
    assert_eq!(
        Value::Object(video_data["B"].clone()),
        json!({ "title": "Video B", "channelTitle": "My Channel", "duration": "PT1M" })
    );
}

#[tokio::test]
async fn unreachable_api_yields_nothing() {
    // nothing listens on the discard port
    let client =
        DataApiClient::new(API_KEY, reqwest::Client::new()).with_base_url("http://127.0.0.1:9");

    assert_eq!(client.get_channel_statistics("UC_good").await, None);
    assert!(client.get_video_part("A", VideoPart::Snippet).await.is_empty());
    let ids: Vec<String> = client
        .list_channel_video_ids("UC_good", Some(50))
        .collect::<eyre::Result<_>>()
        .await
        .unwrap();
    assert!(ids.is_empty());
}
