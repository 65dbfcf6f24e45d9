//! Publishing tables to worksheets of a Google Sheets spreadsheet.

use crate::table::Table;
use eyre::Context;
use google_sheets4::api::{ClearValuesRequest, ValueRange};
use google_sheets4::hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use google_sheets4::{Sheets, yup_oauth2};
use hyper_util::client::legacy::connect::HttpConnector;
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use tokio::sync::OnceCell;
use tracing::instrument;

type SheetsHub = Sheets<HttpsConnector<HttpConnector>>;

const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";

pub const CHANNEL_STATISTICS_SHEET: usize = 0;
pub const VIDEO_DATA_SHEET: usize = 1;
pub const RETENTION_SHEET: usize = 2;

/// Converts one table cell to the value sent to the spreadsheet.
///
/// Scalars are kept, nulls become empty cells, and nested values are written as JSON text.
pub fn cell_value(value: &Value) -> Value {
    match value {
        Value::Null => Value::String(String::new()),
        Value::Array(_) | Value::Object(_) => Value::String(value.to_string()),
        scalar => scalar.clone(),
    }
}

/// The header row followed by every data row, ready to be written at `A1`.
pub fn sheet_values(table: &Table) -> Vec<Vec<Value>> {
    std::iter::once(
        table
            .columns()
            .iter()
            .map(|c| Value::String(c.clone()))
            .collect(),
    )
    .chain(
        table
            .rows()
            .iter()
            .map(|row| row.iter().map(cell_value).collect()),
    )
    .collect()
}

/// A1 notation for a whole worksheet, quoted so that any title is accepted.
fn sheet_range(title: &str) -> String {
    format!("'{}'", title.replace('\'', "''"))
}

/// Overwrites worksheets of one spreadsheet, authenticating as a service account.
///
/// The API client is set up on first use, so a missing key file only fails the publish.
pub struct SheetsPublisher {
    service_account_file: PathBuf,
    spreadsheet_key: String,
    hub: OnceCell<SheetsHub>,
}

impl fmt::Debug for SheetsPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SheetsPublisher")
            .field("service_account_file", &self.service_account_file)
            .field("spreadsheet_key", &self.spreadsheet_key)
            .field("connected", &self.hub.initialized())
            .finish()
    }
}

impl SheetsPublisher {
    pub fn new(
        service_account_file: impl Into<PathBuf>,
        spreadsheet_key: impl Into<String>,
    ) -> Self {
        Self {
            service_account_file: service_account_file.into(),
            spreadsheet_key: spreadsheet_key.into(),
            hub: OnceCell::new(),
        }
    }

    async fn connect(&self) -> eyre::Result<SheetsHub> {
        let key = yup_oauth2::read_service_account_key(&self.service_account_file)
            .await
            .with_context(|| {
                format!(
                    "read service account key {}",
                    self.service_account_file.display()
                )
            })?;
        let auth = yup_oauth2::ServiceAccountAuthenticator::builder(key)
            .build()
            .await
            .context("build service account authenticator")?;

        let connector = HttpsConnectorBuilder::new()
            .with_native_roots()
            .context("load native TLS roots")?
            .https_only()
            .enable_http1()
            .build();
        let client = hyper_util::client::legacy::Client::builder(
            hyper_util::rt::TokioExecutor::new(),
        )
        .build(connector);

        Ok(Sheets::new(client, auth))
    }

    async fn hub(&self) -> eyre::Result<&SheetsHub> {
        self.hub.get_or_try_init(|| self.connect()).await
    }

    async fn worksheet_titles(&self, hub: &SheetsHub) -> eyre::Result<Vec<String>> {
        let (_, spreadsheet) = hub
            .spreadsheets()
            .get(&self.spreadsheet_key)
            .param("fields", "sheets.properties")
            .add_scope(SHEETS_SCOPE)
            .doit()
            .await
            .context("fetch spreadsheet metadata")?;
        Ok(spreadsheet
            .sheets
            .unwrap_or_default()
            .into_iter()
            .map(|sheet| {
                sheet
                    .properties
                    .and_then(|p| p.title)
                    .unwrap_or_default()
            })
            .collect())
    }

    async fn overwrite(&self, hub: &SheetsHub, title: &str, table: &Table) -> eyre::Result<()> {
        let range = sheet_range(title);
        hub.spreadsheets()
            .values_clear(ClearValuesRequest::default(), &self.spreadsheet_key, &range)
            .add_scope(SHEETS_SCOPE)
            .doit()
            .await
            .with_context(|| format!("clear worksheet {title}"))?;

        let start = format!("{range}!A1");
        let values = ValueRange {
            major_dimension: Some("ROWS".to_string()),
            range: Some(start.clone()),
            values: Some(sheet_values(table)),
        };
        hub.spreadsheets()
            .values_update(values, &self.spreadsheet_key, &start)
            .value_input_option("RAW")
            .add_scope(SHEETS_SCOPE)
            .doit()
            .await
            .with_context(|| format!("write worksheet {title}"))?;
        Ok(())
    }

    /// Replaces the contents of each worksheet, given by position, with the paired table.
    #[instrument(skip_all, fields(spreadsheet = %self.spreadsheet_key))]
    pub async fn publish(&self, updates: &[(usize, &Table)]) -> eyre::Result<()> {
        let hub = self.hub().await?;
        let titles = self.worksheet_titles(hub).await?;

        for (index, table) in updates {
            let title = titles.get(*index).ok_or_else(|| {
                eyre::eyre!(
                    "spreadsheet has {} worksheets, no worksheet at index {}",
                    titles.len(),
                    index
                )
            })?;
            self.overwrite(hub, title, table)
                .await
                .with_context(|| format!("publish to worksheet {title}"))?;
            tracing::info!(worksheet = %title, rows = table.len(), "published worksheet");
        }
        Ok(())
    }
}
