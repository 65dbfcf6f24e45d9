//! Clients for the YouTube Data API v3 and the YouTube Analytics API v2.
//!
//! The Data API is used with an API key and only for public information: the video listing of a
//! channel, per-video parts, and channel statistics. The Analytics API requires the channel
//! owner's OAuth credentials and is used for audience retention reports.
//!
//! Neither client retries or paces requests.

pub mod analytics;
pub mod data;
pub mod types;

pub use analytics::{AnalyticsClient, ColumnHeader, ReportResponse};
pub use data::{DataApiClient, VideoPart};
pub use types::{FieldMap, PagedStream, SearchPage};
