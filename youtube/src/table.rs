//! A minimal column/row table shared by the SQLite store and the spreadsheet publisher.

use crate::youtube_api::FieldMap;
use indexmap::IndexMap;
use serde_json::Value;

/// Video fields that are never stored or published.
pub const DROPPED_VIDEO_COLUMNS: [&str; 4] = ["thumbnails", "tags", "localized", "contentRating"];

/// Ordered column names plus rows of JSON values, one value per column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<Value>) -> eyre::Result<()> {
        if row.len() != self.columns.len() {
            eyre::bail!(
                "row has {} values but the table has {} columns",
                row.len(),
                self.columns.len()
            );
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// The value in `column` of row `row`, if both exist.
    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let column = self.column_index(column)?;
        self.rows.get(row)?.get(column)
    }

    /// Builds a table with one row per record.
    ///
    /// The first column holds each record's key under the name `index_column`. The remaining
    /// columns are the union of all record fields in first-seen order; fields a record lacks are
    /// null.
    pub fn from_records<'a, I>(index_column: &str, records: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a FieldMap)>,
    {
        let records: Vec<_> = records.into_iter().collect();

        let mut columns: IndexMap<&str, ()> = IndexMap::new();
        columns.insert(index_column, ());
        for (_, fields) in &records {
            for name in fields.keys() {
                columns.entry(name.as_str()).or_default();
            }
        }

        let rows = records
            .iter()
            .map(|(key, fields)| {
                columns
                    .keys()
                    .enumerate()
                    .map(|(i, name)| {
                        if i == 0 {
                            Value::String(key.to_string())
                        } else {
                            fields.get(*name).cloned().unwrap_or(Value::Null)
                        }
                    })
                    .collect()
            })
            .collect();

        Self {
            columns: columns.keys().map(|c| c.to_string()).collect(),
            rows,
        }
    }

    /// Removes the named columns, ignoring names the table does not have.
    pub fn drop_columns(&mut self, names: &[&str]) {
        let keep: Vec<bool> = self
            .columns
            .iter()
            .map(|c| !names.contains(&c.as_str()))
            .collect();
        if keep.iter().all(|k| *k) {
            return;
        }

        fn retain<T>(values: &mut Vec<T>, keep: &[bool]) {
            let mut keep = keep.iter();
            values.retain(|_| keep.next().copied().unwrap_or(true));
        }
        retain(&mut self.columns, &keep);
        for row in &mut self.rows {
            retain(row, &keep);
        }
    }

    /// Stacks tables on top of each other.
    ///
    /// Columns are the union of all tables' columns in first-seen order, and cells a table has
    /// no column for are null.
    pub fn concat<I>(tables: I) -> Self
    where
        I: IntoIterator<Item = Table>,
    {
        let tables: Vec<_> = tables.into_iter().collect();

        let mut columns: IndexMap<String, ()> = IndexMap::new();
        for table in &tables {
            for column in &table.columns {
                columns.entry(column.clone()).or_default();
            }
        }

        let mut rows = Vec::with_capacity(tables.iter().map(Table::len).sum());
        for table in tables {
            let positions: Vec<usize> = table
                .columns
                .iter()
                .filter_map(|c| columns.get_index_of(c))
                .collect();
            for row in table.rows {
                let mut out = vec![Value::Null; columns.len()];
                for (value, position) in row.into_iter().zip(&positions) {
                    out[*position] = value;
                }
                rows.push(out);
            }
        }

        Self {
            columns: columns.into_keys().collect(),
            rows,
        }
    }
}

/// Channel statistics as a single row, led by the channel ID.
pub fn channel_statistics_table(channel_id: &str, statistics: &FieldMap) -> Table {
    Table::from_records("channel_id", [(channel_id, statistics)])
}

/// One row per video, led by the video ID, without the columns that are never stored.
pub fn video_data_table(video_data: &IndexMap<String, FieldMap>) -> Table {
    let mut table = Table::from_records(
        "video_id",
        video_data.iter().map(|(id, record)| (id.as_str(), record)),
    );
    table.drop_columns(&DROPPED_VIDEO_COLUMNS);
    table
}
