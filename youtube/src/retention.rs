//! Audience retention collection for the stored videos.

use crate::table::Table;
use crate::youtube_api::ReportResponse;
use serde_json::Value;
use std::future::Future;

/// Earliest date analytics are requested for. Reports always cover the full lifetime of a video.
pub const RETENTION_START_DATE: &str = "2011-03-01";

pub const RETENTION_DIMENSION: &str = "elapsedVideoTimeRatio";
pub const RETENTION_METRICS: &str = "audienceWatchRatio,relativeRetentionPerformance";

/// Columns of the retention table when no video had any retention data.
pub const DEFAULT_RETENTION_COLUMNS: [&str; 5] = [
    "elapsedVideoTimeRatio",
    "audienceWatchRatio",
    "relativeRetentionPerformance",
    "video_id",
    "title",
];

/// A stored video that retention is collected for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoRef {
    pub video_id: String,
    pub title: String,
}

/// Turns one video's report into table rows tagged with the video's ID and title.
///
/// Returns `None` if the report has no rows.
pub fn report_table(report: ReportResponse, video: &VideoRef) -> Option<Table> {
    let rows = report.rows.filter(|rows| !rows.is_empty())?;

    let mut table = Table::new(
        report
            .column_headers
            .iter()
            .map(|h| h.name.as_str())
            .chain(["video_id", "title"]),
    );
    let width = report.column_headers.len();
    for mut row in rows {
        row.resize(width, Value::Null);
        row.push(Value::String(video.video_id.clone()));
        row.push(Value::String(video.title.clone()));
        // width is fixed above, so this cannot fail
        table.push_row(row).ok()?;
    }
    Some(table)
}

/// Fetches the retention report of every video in turn and concatenates the results.
///
/// Videos whose report has no rows are skipped. The first failed fetch aborts the whole batch,
/// so a partial table is never produced.
pub async fn collect_retention<F, Fut>(videos: &[VideoRef], mut fetch: F) -> eyre::Result<Table>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = eyre::Result<ReportResponse>>,
{
    let mut tables = Vec::new();
    for video in videos {
        let report = fetch(video.video_id.clone()).await?;
        match report_table(report, video) {
            Some(table) => {
                tracing::debug!(video_id = %video.video_id, rows = table.len(), "collected retention");
                tables.push(table);
            }
            None => {
                tracing::info!(video_id = %video.video_id, "no retention data for video, skipping");
            }
        }
    }

    if tables.is_empty() {
        return Ok(Table::new(DEFAULT_RETENTION_COLUMNS));
    }
    Ok(Table::concat(tables))
}
