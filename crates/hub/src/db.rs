use anyhow::{Context, Result};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{FromRow, Pool, Sqlite};
use std::str::FromStr;
use time::macros::format_description;
use time::OffsetDateTime;

use crate::command::{CommandKind, Mode};
use crate::reading::NewReading;

/// The reading store: readings, the pending-command queue and the mode
/// mirror, all in one SQLite database.
#[derive(Clone)]
pub struct Db {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredReading {
    pub id: String,
    pub temperature: f64,
    pub humidity: f64,
    pub ldr_value: f64,
    pub roof_status: Option<String>,
    pub mode: Option<String>,
    /// Unix seconds, server clock.
    pub timestamp: f64,
    pub formatted_time: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingCommand {
    pub id: i64,
    pub kind: String,
    pub source: String,
}

/// Result order for `recent_readings`. The N newest rows are selected
/// either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

#[derive(FromRow)]
struct ReadingRow {
    id: i64,
    temperature: f64,
    humidity: f64,
    ldr_value: f64,
    roof_status: Option<String>,
    mode: Option<String>,
    timestamp: f64,
    status: String,
}

impl From<ReadingRow> for StoredReading {
    fn from(r: ReadingRow) -> Self {
        Self {
            id: r.id.to_string(),
            temperature: r.temperature,
            humidity: r.humidity,
            ldr_value: r.ldr_value,
            roof_status: r.roof_status,
            mode: r.mode,
            formatted_time: format_timestamp(r.timestamp),
            timestamp: r.timestamp,
            status: r.status,
        }
    }
}

/// `DD/MM/YYYY HH:MM:SS`, UTC.
pub fn format_timestamp(ts: f64) -> String {
    let fmt = format_description!("[day]/[month]/[year] [hour]:[minute]:[second]");
    OffsetDateTime::from_unix_timestamp(ts.trunc() as i64)
        .ok()
        .and_then(|t| t.format(&fmt).ok())
        .unwrap_or_default()
}

fn now_unix() -> f64 {
    let now = OffsetDateTime::now_utc();
    now.unix_timestamp() as f64 + f64::from(now.nanosecond()) / 1e9
}

impl Db {
    /// db_url examples:
    /// - "sqlite:/var/lib/canopy/canopy.db?mode=rwc"
    /// - "sqlite::memory:" (tests)
    pub async fn connect(db_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(db_url)
            .with_context(|| format!("invalid sqlite connection string: {db_url}"))?
            .journal_mode(SqliteJournalMode::Wal);

        // Each in-memory connection is its own database.
        let max_connections = if db_url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to connect to sqlite db: {db_url}"))?;

        Ok(Self { pool })
    }

    /// Runs SQLx migrations from ./migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("failed to run migrations")?;
        Ok(())
    }

    // ----------------------------
    // Readings
    // ----------------------------

    pub async fn insert_reading(&self, r: &NewReading) -> Result<StoredReading> {
        let ts = now_unix();
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO readings (temperature, humidity, ldr_value, roof_status, mode, timestamp, status)
            VALUES (?, ?, ?, ?, ?, ?, 'active')
            RETURNING id
            "#,
        )
        .bind(r.temperature)
        .bind(r.humidity)
        .bind(r.ldr_value)
        .bind(&r.roof_status)
        .bind(&r.mode)
        .bind(ts)
        .fetch_one(&self.pool)
        .await
        .context("insert_reading failed")?;

        Ok(StoredReading {
            id: id.to_string(),
            temperature: r.temperature,
            humidity: r.humidity,
            ldr_value: r.ldr_value,
            roof_status: r.roof_status.clone(),
            mode: r.mode.clone(),
            timestamp: ts,
            formatted_time: format_timestamp(ts),
            status: "active".to_string(),
        })
    }

    /// The `limit` most recent readings, returned in `order`.
    pub async fn recent_readings(&self, limit: i64, order: SortOrder) -> Result<Vec<StoredReading>> {
        let rows: Vec<ReadingRow> = sqlx::query_as(
            r#"
            SELECT id, temperature, humidity, ldr_value, roof_status, mode, timestamp, status
            FROM readings
            ORDER BY timestamp DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("recent_readings failed")?;

        let mut readings: Vec<StoredReading> = rows.into_iter().map(StoredReading::from).collect();
        if order == SortOrder::Ascending {
            readings.reverse();
        }
        Ok(readings)
    }

    // ----------------------------
    // Command queue
    // ----------------------------

    pub async fn insert_command(&self, kind: CommandKind, source: &str) -> Result<i64> {
        self.insert_command_at(kind, source, now_unix()).await
    }

    async fn insert_command_at(&self, kind: CommandKind, source: &str, created_at: f64) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO commands (kind, source, status, created_at)
            VALUES (?, ?, 'PENDING', ?)
            RETURNING id
            "#,
        )
        .bind(kind.as_str())
        .bind(source)
        .bind(created_at)
        .fetch_one(&self.pool)
        .await
        .context("insert_command failed")?;
        Ok(id)
    }

    /// Take the newest PENDING command and mark it PROCESSED in one
    /// statement. A command is handed out at most once, and overlapping polls
    /// queue on the write lock instead of failing a read-to-write upgrade.
    pub async fn take_pending_command(&self) -> Result<Option<PendingCommand>> {
        let row: Option<(i64, String, String)> = sqlx::query_as(
            r#"
            UPDATE commands
            SET status = 'PROCESSED'
            WHERE id = (
                SELECT id
                FROM commands
                WHERE status = 'PENDING'
                ORDER BY created_at DESC, id DESC
                LIMIT 1
            )
            RETURNING id, kind, source
            "#,
        )
        .fetch_optional(&self.pool)
        .await
        .context("take_pending_command failed")?;

        Ok(row.map(|(id, kind, source)| PendingCommand { id, kind, source }))
    }

    pub async fn pending_count(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM commands WHERE status = 'PENDING'")
            .fetch_one(&self.pool)
            .await
            .context("pending_count failed")
    }

    // ----------------------------
    // Mode mirror
    // ----------------------------

    /// The stored mode, AUTO until something sets it.
    pub async fn get_mode(&self) -> Result<Mode> {
        let mode: Option<String> = sqlx::query_scalar("SELECT mode FROM control_mode WHERE id = 1")
            .fetch_optional(&self.pool)
            .await
            .context("get_mode failed")?;

        match mode {
            Some(m) => m.parse::<Mode>().map_err(anyhow::Error::msg),
            None => Ok(Mode::Auto),
        }
    }

    pub async fn set_mode(&self, mode: Mode) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO control_mode (id, mode, updated_at) VALUES (1, ?, ?)
            ON CONFLICT(id) DO UPDATE SET mode = excluded.mode, updated_at = excluded.updated_at
            "#,
        )
        .bind(mode.as_str())
        .bind(now_unix())
        .execute(&self.pool)
        .await
        .context("set_mode failed")?;
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
