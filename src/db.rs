use std::str::FromStr;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use crate::allocation::Entry;
use crate::error::StoreError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimesheetRecord {
    pub week_key: String,
    pub entries: Vec<Entry>,
    pub submit_date: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct TimesheetRow {
    week_key: String,
    entries: String,
    submit_date: DateTime<Utc>,
}

impl TryFrom<TimesheetRow> for TimesheetRecord {
    type Error = StoreError;

    fn try_from(row: TimesheetRow) -> Result<Self, Self::Error> {
        Ok(TimesheetRecord {
            week_key: row.week_key,
            entries: serde_json::from_str(&row.entries)?,
            submit_date: row.submit_date,
        })
    }
}

/// Handle on the `timesheets` table. Cloning shares the underlying pool.
///
/// Saves for the same (user, week) are last-write-wins; nothing orders
/// concurrent requests against each other.
#[derive(Debug, Clone)]
pub struct TimesheetStore {
    pool: SqlitePool,
}

impl TimesheetStore {
    pub fn new(pool: SqlitePool) -> Self {
        TimesheetStore { pool }
    }

    /// No connection is opened until the first query.
    pub fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_lazy_with(options);

        Ok(Self::new(pool))
    }

    pub async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS timesheets (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                week_key TEXT NOT NULL,
                entries TEXT NOT NULL,
                submit_date TEXT NOT NULL,
                CONSTRAINT uq_user_week UNIQUE (user_id, week_key)
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Every week the user saved, most recently submitted first.
    #[tracing::instrument(skip(self))]
    pub async fn get_all(&self, user_id: &str) -> Result<IndexMap<String, Vec<Entry>>, StoreError> {
        let rows = sqlx::query_as::<_, TimesheetRow>(
            "SELECT week_key, entries, submit_date FROM timesheets
            WHERE user_id = ?
            ORDER BY submit_date DESC, id DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut weeks = IndexMap::with_capacity(rows.len());
        for row in rows {
            let record = TimesheetRecord::try_from(row)?;
            weeks.insert(record.week_key, record.entries);
        }

        Ok(weeks)
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_week(&self, user_id: &str, week_key: &str) -> Result<Option<TimesheetRecord>, StoreError> {
        let row = sqlx::query_as::<_, TimesheetRow>(
            "SELECT week_key, entries, submit_date FROM timesheets
            WHERE user_id = ? AND week_key = ?",
        )
        .bind(user_id)
        .bind(week_key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TimesheetRecord::try_from).transpose()
    }

    /// Inserts the week or replaces its entries, stamping `submit_date` either way.
    #[tracing::instrument(skip(self, entries), fields(count = entries.len()))]
    pub async fn save(&self, user_id: &str, week_key: &str, entries: &[Entry]) -> Result<(), StoreError> {
        let entries_json = serde_json::to_string(entries)?;

        sqlx::query(
            "INSERT INTO timesheets (user_id, week_key, entries, submit_date)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (user_id, week_key) DO UPDATE
            SET entries = excluded.entries, submit_date = excluded.submit_date",
        )
        .bind(user_id)
        .bind(week_key)
        .bind(entries_json)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Returns whether a row was actually removed.
    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, user_id: &str, week_key: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM timesheets WHERE user_id = ? AND week_key = ?")
            .bind(user_id)
            .bind(week_key)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Safe to call more than once.
    pub async fn close(&self) {
        if !self.pool.is_closed() {
            tracing::info!("closing timesheet store");
        }
        self.pool.close().await;
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }
}
