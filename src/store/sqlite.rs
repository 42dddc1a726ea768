//! Embedded schedule store using SQLite.
//!
//! Mirrors the hosted `schedules` table closely enough for local runs and
//! tests. `schedule` and `action` are stored as JSON text so every value
//! reads back exactly as written. Plain text written by other tools is read
//! as a string.

use super::ScheduleStore;
use crate::schedule::{ScheduleEntry, ScheduleQuery, ScheduleRow};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use rusqlite::types::{Type, ValueRef};
use rusqlite::{params, Connection, Row};
use serde_json::Value;
use std::sync::{Mutex, MutexGuard};

const SELECT_ACTIVE: &str = "SELECT schedule, action, is_repeat FROM schedules
     WHERE device_id = ?1
       AND (is_repeat = 1 OR (is_repeat = 0 AND last_ran_at IS NULL))
     ORDER BY id ASC";

/// Persists schedule rows in SQLite.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (or creates) the SQLite database and ensures the table exists.
    pub fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open schedule DB at {}", db_path))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_table()?;
        Ok(store)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("schedule DB connection lock poisoned"))
    }

    fn create_table(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schedules (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                device_id   TEXT NOT NULL,
                schedule,
                action,
                is_repeat   INTEGER NOT NULL DEFAULT 0,
                last_ran_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_schedules_device_id ON schedules (device_id);",
        )
        .context("Failed to create schedules table")?;
        Ok(())
    }

    /// Inserts a schedule row. Returns the new row id.
    pub fn insert(&self, entry: &ScheduleEntry) -> Result<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO schedules (device_id, schedule, action, is_repeat, last_ran_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.device_id,
                entry.schedule.to_string(),
                entry.action.to_string(),
                entry.is_repeat,
                entry.last_ran_at.map(|t| t.to_rfc3339()),
            ],
        )
        .context("Failed to insert schedule")?;
        Ok(conn.last_insert_rowid())
    }

    /// Marks a one-shot schedule as executed.
    pub fn mark_ran(&self, id: i64, at: chrono::DateTime<chrono::Utc>) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE schedules SET last_ran_at = ?1 WHERE id = ?2",
            params![at.to_rfc3339(), id],
        )
        .context("Failed to update last_ran_at")?;
        Ok(())
    }
}

#[async_trait]
impl ScheduleStore for SqliteStore {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    async fn fetch_active(&self, query: &ScheduleQuery) -> Result<Vec<ScheduleRow>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(SELECT_ACTIVE)
            .context("Failed to prepare active schedules query")?;
        let rows = stmt
            .query_map(params![query.device_id.as_str()], read_row)
            .context("Failed to query schedules")?;

        let mut schedules = Vec::new();
        for row in rows {
            schedules.push(row.context("Failed to read schedule row")?);
        }
        Ok(schedules)
    }
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<ScheduleRow> {
    Ok(ScheduleRow {
        schedule: column_json(row, 0)?,
        action: column_json(row, 1)?,
        is_repeat: row.get(2)?,
    })
}

fn column_json(row: &Row<'_>, idx: usize) -> rusqlite::Result<Value> {
    match row.get_ref(idx)? {
        ValueRef::Null => Ok(Value::Null),
        ValueRef::Integer(i) => Ok(Value::from(i)),
        ValueRef::Real(f) => Ok(serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null)),
        text @ ValueRef::Text(_) => {
            let text = text
                .as_str()
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))?;
            Ok(text_json(text))
        }
        ValueRef::Blob(_) => Err(rusqlite::Error::InvalidColumnType(
            idx,
            format!("column {}", idx),
            Type::Blob,
        )),
    }
}

/// Column text is JSON written by [`SqliteStore::insert`]; anything that
/// does not parse is passed on as a plain string.
fn text_json(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::extract_device_id;
    use chrono::Utc;
    use serde_json::json;

    fn in_memory_store() -> SqliteStore {
        SqliteStore::new(":memory:").expect("in-memory store failed")
    }

    fn entry(device_id: &str, schedule: &str, is_repeat: bool, ran: bool) -> ScheduleEntry {
        ScheduleEntry {
            device_id: device_id.to_string(),
            schedule: json!(schedule),
            action: json!("ON"),
            is_repeat,
            last_ran_at: ran.then(Utc::now),
        }
    }

    fn query_for(device_id: &str) -> ScheduleQuery {
        let device_id = extract_device_id(&json!({"record": {"device_id": device_id}})).unwrap();
        ScheduleQuery::new(device_id)
    }

    fn schedules_of(rows: &[ScheduleRow]) -> Vec<Value> {
        rows.iter().map(|r| r.schedule.clone()).collect()
    }

    #[tokio::test]
    async fn test_repeating_rows_are_active_regardless_of_last_run() {
        let store = in_memory_store();
        store.insert(&entry("dev-1", "never-ran", true, false)).unwrap();
        store.insert(&entry("dev-1", "already-ran", true, true)).unwrap();

        let rows = store.fetch_active(&query_for("dev-1")).await.unwrap();
        assert_eq!(schedules_of(&rows), vec![json!("never-ran"), json!("already-ran")]);
        assert!(rows.iter().all(|r| r.is_repeat));
    }

    #[tokio::test]
    async fn test_one_shot_rows_are_active_only_until_they_run() {
        let store = in_memory_store();
        store.insert(&entry("dev-1", "pending", false, false)).unwrap();
        store.insert(&entry("dev-1", "done", false, true)).unwrap();

        let rows = store.fetch_active(&query_for("dev-1")).await.unwrap();
        assert_eq!(schedules_of(&rows), vec![json!("pending")]);
    }

    #[tokio::test]
    async fn test_mark_ran_retires_one_shot() {
        let store = in_memory_store();
        let id = store.insert(&entry("dev-1", "once", false, false)).unwrap();
        assert_eq!(store.fetch_active(&query_for("dev-1")).await.unwrap().len(), 1);

        store.mark_ran(id, Utc::now()).unwrap();
        assert!(store.fetch_active(&query_for("dev-1")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rows_are_scoped_to_device() {
        let store = in_memory_store();
        store.insert(&entry("dev-1", "mine", true, false)).unwrap();
        store.insert(&entry("dev-2", "theirs", true, false)).unwrap();

        let rows = store.fetch_active(&query_for("dev-2")).await.unwrap();
        assert_eq!(schedules_of(&rows), vec![json!("theirs")]);
        assert!(store.fetch_active(&query_for("dev-3")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_opaque_values_pass_through() {
        let store = in_memory_store();
        store
            .insert(&ScheduleEntry {
                device_id: "dev-1".to_string(),
                schedule: json!({"cron": "0 7 * * *", "tz": "Asia/Bangkok"}),
                action: json!(["relay", 2]),
                is_repeat: true,
                last_ran_at: None,
            })
            .unwrap();
        store
            .insert(&ScheduleEntry {
                device_id: "dev-1".to_string(),
                schedule: json!(1717000000),
                action: json!(null),
                is_repeat: false,
                last_ran_at: None,
            })
            .unwrap();

        let rows = store.fetch_active(&query_for("dev-1")).await.unwrap();
        assert_eq!(rows[0].schedule, json!({"cron": "0 7 * * *", "tz": "Asia/Bangkok"}));
        assert_eq!(rows[0].action, json!(["relay", 2]));
        assert_eq!(rows[1].schedule, json!(1717000000));
        assert_eq!(rows[1].action, Value::Null);
    }

    #[tokio::test]
    async fn test_json_looking_strings_and_bools_round_trip() {
        let store = in_memory_store();
        store
            .insert(&ScheduleEntry {
                device_id: "dev-1".to_string(),
                schedule: json!("[1,2]"),
                action: json!(true),
                is_repeat: true,
                last_ran_at: None,
            })
            .unwrap();
        store
            .insert(&ScheduleEntry {
                device_id: "dev-1".to_string(),
                schedule: json!("42"),
                action: json!({"relay": 1, "on": false}),
                is_repeat: true,
                last_ran_at: None,
            })
            .unwrap();

        let rows = store.fetch_active(&query_for("dev-1")).await.unwrap();
        assert_eq!(rows[0].schedule, json!("[1,2]"));
        assert_eq!(rows[0].action, json!(true));
        assert_eq!(rows[1].schedule, json!("42"));
        assert_eq!(rows[1].action, json!({"relay": 1, "on": false}));
    }

    #[test]
    fn test_plain_text_from_other_writers_is_a_string() {
        assert_eq!(text_json("0 7 * * *"), json!("0 7 * * *"));
        assert_eq!(text_json("[not json"), json!("[not json"));
        assert_eq!(text_json("\"S1\""), json!("S1"));
    }

    #[tokio::test]
    async fn test_file_backed_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schedules.db");
        let path = path.to_str().unwrap();

        {
            let store = SqliteStore::new(path).unwrap();
            store.insert(&entry("dev-1", "S1", true, false)).unwrap();
        }

        let store = SqliteStore::new(path).unwrap();
        let rows = store.fetch_active(&query_for("dev-1")).await.unwrap();
        assert_eq!(schedules_of(&rows), vec![json!("S1")]);
    }
}
