//! Local SQLite persistence of the collected tables.
//!
//! Every write fully replaces the target table. Column types are inferred from the values being
//! written, so the schema follows whatever fields the provider returned this time.

use crate::retention::VideoRef;
use crate::table::Table;
use eyre::Context;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{Connection, params_from_iter};
use serde_json::{Number, Value};
use std::path::Path;

pub const CHANNEL_STATISTICS_TABLE: &str = "channel_statistics";
pub const VIDEO_DATA_TABLE: &str = "video_data";
pub const RETENTION_TABLE: &str = "retention";

/// The declared type of one column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnType {
    Integer,
    Real,
    Boolean,
    Text,
    /// Values of more than one kind, e.g. integers next to floats.
    Mixed,
}

impl ColumnType {
    /// Picks the type shared by every non-null value of the column.
    fn infer<'a>(values: impl Iterator<Item = &'a Value>) -> Self {
        let mut inferred = None;
        for value in values {
            let this = match value {
                Value::Null => continue,
                Value::Bool(_) => ColumnType::Boolean,
                Value::Number(n) if n.is_i64() => ColumnType::Integer,
                Value::Number(_) => ColumnType::Real,
                Value::String(_) | Value::Array(_) | Value::Object(_) => ColumnType::Text,
            };
            match inferred {
                None => inferred = Some(this),
                Some(t) if t == this => {}
                Some(_) => return ColumnType::Mixed,
            }
        }
        inferred.unwrap_or(ColumnType::Text)
    }

    fn sql(self) -> &'static str {
        match self {
            ColumnType::Integer | ColumnType::Boolean => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Text => "TEXT",
            // BLOB affinity converts nothing, so 1 and 0.5 both come back as written
            ColumnType::Mixed => "BLOB",
        }
    }
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => n.as_f64().map_or(SqlValue::Null, SqlValue::Real),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        nested @ (Value::Array(_) | Value::Object(_)) => SqlValue::Text(nested.to_string()),
    }
}

fn from_sql_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Number::from_f64(f).map_or(Value::Null, Value::Number),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Value::String(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

/// A connection to the SQLite database holding the collected tables.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> eyre::Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("open SQLite database {}", path.display()))?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> eyre::Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory SQLite database")?;
        Ok(Self { conn })
    }

    /// Replaces table `name` with the contents of `table`, atomically.
    pub fn write_table(&mut self, name: &str, table: &Table) -> eyre::Result<()> {
        if table.columns().is_empty() {
            eyre::bail!("cannot store table {name} without columns");
        }
        let quoted_name = quote_identifier(name);
        let column_defs: Vec<String> = table
            .columns()
            .iter()
            .enumerate()
            .map(|(i, column)| {
                let column_type = ColumnType::infer(table.rows().iter().map(|row| &row[i]));
                format!("{} {}", quote_identifier(column), column_type.sql())
            })
            .collect();

        let tx = self.conn.transaction().context("begin transaction")?;
        tx.execute(&format!("DROP TABLE IF EXISTS {quoted_name}"), [])
            .with_context(|| format!("drop table {name}"))?;
        tx.execute(
            &format!("CREATE TABLE {quoted_name} ({})", column_defs.join(", ")),
            [],
        )
        .with_context(|| format!("create table {name}"))?;

        {
            let placeholders = vec!["?"; table.columns().len()].join(", ");
            let mut insert = tx
                .prepare(&format!("INSERT INTO {quoted_name} VALUES ({placeholders})"))
                .with_context(|| format!("prepare insert into {name}"))?;
            for row in table.rows() {
                insert
                    .execute(params_from_iter(row.iter().map(to_sql_value)))
                    .with_context(|| format!("insert row into {name}"))?;
            }
        }

        tx.commit().with_context(|| format!("commit table {name}"))?;
        tracing::info!(table = name, rows = table.len(), "wrote SQLite table");
        Ok(())
    }

    /// Reads back every row of table `name`, in insertion order.
    pub fn read_table(&self, name: &str) -> eyre::Result<Table> {
        let mut select = self
            .conn
            .prepare(&format!("SELECT * FROM {}", quote_identifier(name)))
            .with_context(|| format!("prepare select from {name}"))?;
        let mut table = Table::new(select.column_names());
        let width = table.columns().len();

        let mut rows = select.query([]).with_context(|| format!("query {name}"))?;
        while let Some(row) = rows.next().with_context(|| format!("read row of {name}"))? {
            let values = (0..width)
                .map(|i| row.get_ref(i).map(from_sql_value))
                .collect::<Result<Vec<_>, _>>()
                .with_context(|| format!("read value of {name}"))?;
            table.push_row(values)?;
        }
        Ok(table)
    }

    /// The IDs and titles of the stored videos, as input for the retention refresh.
    ///
    /// A table without a `title` column, as written for a channel without videos, gives empty
    /// titles.
    pub fn read_videos(&self) -> eyre::Result<Vec<VideoRef>> {
        let mut select = self
            .conn
            .prepare(&format!("SELECT * FROM {}", quote_identifier(VIDEO_DATA_TABLE)))
            .context("prepare video listing")?;
        let id_column = select
            .column_index("video_id")
            .context("stored video data has no video_id column")?;
        let title_column = select.column_index("title").ok();

        let videos = select
            .query_map([], |row| {
                let title = match title_column {
                    Some(i) => row.get::<_, Option<String>>(i)?,
                    None => None,
                };
                Ok(VideoRef {
                    video_id: row.get(id_column)?,
                    title: title.unwrap_or_default(),
                })
            })
            .context("list stored videos")?
            .collect::<Result<Vec<_>, _>>()
            .context("read stored video")?;
        Ok(videos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn infers_column_types() {
        let infer = |values: &[Value]| ColumnType::infer(values.iter());
        assert_eq!(infer(&[json!(1), Value::Null, json!(2)]), ColumnType::Integer);
        assert_eq!(infer(&[json!(2.5), Value::Null, json!(0.5)]), ColumnType::Real);
        assert_eq!(infer(&[json!(true), json!(false)]), ColumnType::Boolean);
        assert_eq!(infer(&[json!("a"), json!({ "b": 1 })]), ColumnType::Text);
        assert_eq!(infer(&[json!(1), json!(2.5)]), ColumnType::Mixed);
        assert_eq!(infer(&[json!(1), json!("1")]), ColumnType::Mixed);
        assert_eq!(infer(&[json!(true), json!(1)]), ColumnType::Mixed);
        assert_eq!(infer(&[Value::Null]), ColumnType::Text);
    }

    #[test]
    fn mixed_columns_keep_each_value() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let mut table = Table::new(["ratio", "label"]);
        table.push_row(vec![json!(1), json!("7")]).unwrap();
        table.push_row(vec![json!(0.5), json!(7)]).unwrap();
        table.push_row(vec![Value::Null, json!("x")]).unwrap();
        store.write_table("t", &table).unwrap();

        assert_eq!(store.read_table("t").unwrap(), table);
    }

    #[test]
    fn write_replaces_previous_contents() {
        let mut store = SqliteStore::open_in_memory().unwrap();

        let mut first = Table::new(["video_id", "views"]);
        first.push_row(vec![json!("a"), json!(1)]).unwrap();
        first.push_row(vec![json!("b"), json!(2)]).unwrap();
        store.write_table("t", &first).unwrap();

        let mut second = Table::new(["video_id", "title"]);
        second.push_row(vec![json!("c"), json!("C")]).unwrap();
        store.write_table("t", &second).unwrap();

        assert_eq!(store.read_table("t").unwrap(), second);
    }

    #[test]
    fn nested_values_are_stored_as_json_text() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let mut table = Table::new(["video_id", "regionRestriction"]);
        table
            .push_row(vec![json!("a"), json!({ "blocked": ["DE"] })])
            .unwrap();
        store.write_table("t", &table).unwrap();

        let read = store.read_table("t").unwrap();
        assert_eq!(read.get(0, "regionRestriction"), Some(&json!(r#"{"blocked":["DE"]}"#)));
    }

    #[test]
    fn awkward_identifiers_are_quoted() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let mut table = Table::new(["video id", "say \"hi\""]);
        table.push_row(vec![json!("a"), json!("b")]).unwrap();
        store.write_table("odd \"name\"", &table).unwrap();
        assert_eq!(store.read_table("odd \"name\"").unwrap(), table);
    }

    #[test]
    fn reads_video_refs() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let mut table = Table::new(["video_id", "title", "viewCount"]);
        table
            .push_row(vec![json!("a"), json!("First"), json!("3")])
            .unwrap();
        table
            .push_row(vec![json!("b"), Value::Null, json!("4")])
            .unwrap();
        store.write_table(VIDEO_DATA_TABLE, &table).unwrap();

        assert_eq!(
            store.read_videos().unwrap(),
            [
                VideoRef {
                    video_id: "a".to_string(),
                    title: "First".to_string()
                },
                VideoRef {
                    video_id: "b".to_string(),
                    title: String::new()
                },
            ]
        );
    }

    #[test]
    fn channel_without_videos_has_no_video_refs() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let empty = crate::table::video_data_table(&indexmap::IndexMap::new());
        assert_eq!(empty.columns(), ["video_id"]);
        store.write_table(VIDEO_DATA_TABLE, &empty).unwrap();

        assert!(store.read_videos().unwrap().is_empty());
    }
}
