//! Collects a YouTube channel's statistics, per-video data, and audience retention, and keeps
//! them in a local SQLite database and a Google Sheets spreadsheet.
//!
//! The service is driven through a handful of HTTP actions (see [`server`]):
//!
//! * `/video-data` lists every video of the configured channel through the YouTube Data API,
//!   fetches each video's snippet, statistics and content details, fuses them with the
//!   channel's statistics, and replaces the `channel_statistics` and `video_data` tables and
//!   worksheets.
//! * `/retention` reads the stored videos back and fetches an audience retention report for
//!   each through the YouTube Analytics API, which requires the channel owner's consent via
//!   `/authorize`.
//!
//! Requests are issued strictly one after another; there is no retry or rate limiting.

pub mod background;
pub mod config;
pub mod flows;
pub mod oauth;
pub mod retention;
pub mod server;
pub mod sheets;
pub mod stats;
pub mod store;
pub mod table;
pub mod token_store;
pub mod youtube_api;

pub use config::Config;
pub use flows::{RetentionOutcome, Services, VideoDataSummary};
pub use stats::{FusedDataset, YtStats};
pub use table::Table;
