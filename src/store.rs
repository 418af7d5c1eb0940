//! Persisted settings: the destination root and the two name histories.
//!
//! The engine only sees the [`SettingsStore`] trait. [`SqliteStore`] is what
//! the CLI uses; [`MemoryStore`] is for embedding hosts and tests.

use camino::Utf8Path;
use dashmap::DashMap;
use error_stack::{Report, Result, ResultExt};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Row, SqlitePool};
use std::future::Future;
use std::str::FromStr;
use thiserror::Error;

pub const DESTINATION_PATH_KEY: &str = "destinationPath";
pub const EVENT_HISTORY_KEY: &str = "eventNameHistory";
pub const PHOTOGRAPHER_HISTORY_KEY: &str = "photographerNameHistory";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to connect to settings database")]
    Connection,

    #[error("Failed to run migration")]
    Migration,

    #[error("Failed to read setting")]
    Read,

    #[error("Failed to write setting")]
    Write,

    #[error("Stored setting has an unexpected format")]
    Decode,
}

/// Small key-value interface over whatever persists the host's settings.
///
/// Missing keys read as `None` or an empty list.
pub trait SettingsStore: Send + Sync {
    fn get_string(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<Option<String>, StoreError>> + Send;

    fn set_string(&self, key: &str, value: &str)
    -> impl Future<Output = Result<(), StoreError>> + Send;

    fn get_list(&self, key: &str) -> impl Future<Output = Result<Vec<String>, StoreError>> + Send;

    fn set_list(
        &self,
        key: &str,
        values: &[String],
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

const MIGRATION_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL,
    updated_at INTEGER NOT NULL DEFAULT (unixepoch())
);
"#;

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn open(db_path: &Utf8Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .change_context(StoreError::Connection)
                .attach_printable_lazy(|| {
                    format!("Failed to create settings directory: {}", parent)
                })?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path))
            .change_context(StoreError::Connection)
            .attach_printable_lazy(|| format!("Failed to parse database URL for: {}", db_path))?
            .create_if_missing(true);

        let pool = SqlitePool::connect_with(options)
            .await
            .change_context(StoreError::Connection)
            .attach_printable_lazy(|| format!("db_path={}", db_path))?;

        sqlx::query(MIGRATION_SQL)
            .execute(&pool)
            .await
            .change_context(StoreError::Migration)?;

        Ok(SqliteStore { pool })
    }

    async fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        let row = sqlx::query("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .change_context(StoreError::Read)
            .attach_printable_lazy(|| format!("key={key}"))?;

        Ok(row.map(|row| row.get("value")))
    }

    async fn write(&self, key: &str, value: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO settings (key, value)
            VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = unixepoch()
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .change_context(StoreError::Write)
        .attach_printable_lazy(|| format!("key={key}"))?;

        Ok(())
    }
}

impl SettingsStore for SqliteStore {
    async fn get_string(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.read(key).await
    }

    async fn set_string(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.write(key, value).await
    }

    async fn get_list(&self, key: &str) -> Result<Vec<String>, StoreError> {
        match self.read(key).await? {
            Some(json) => decode_list(key, &json),
            None => Ok(Vec::new()),
        }
    }

    async fn set_list(&self, key: &str, values: &[String]) -> Result<(), StoreError> {
        let json = serde_json::to_string(values)
            .change_context(StoreError::Write)
            .attach_printable_lazy(|| format!("key={key}"))?;
        self.write(key, &json).await
    }
}

fn decode_list(key: &str, json: &str) -> Result<Vec<String>, StoreError> {
    serde_json::from_str(json)
        .change_context(StoreError::Decode)
        .attach_printable_lazy(|| format!("key={key} is not a list of strings"))
}

#[derive(Debug, Clone)]
enum StoredValue {
    Text(String),
    List(Vec<String>),
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    values: DashMap<String, StoredValue>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemoryStore {
    async fn get_string(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.values.get(key).map(|v| v.clone()) {
            None => Ok(None),
            Some(StoredValue::Text(value)) => Ok(Some(value)),
            Some(StoredValue::List(_)) => Err(Report::new(StoreError::Decode)
                .attach_printable(format!("key={key} holds a list, not a string"))),
        }
    }

    async fn set_string(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.values
            .insert(key.to_string(), StoredValue::Text(value.to_string()));
        Ok(())
    }

    async fn get_list(&self, key: &str) -> Result<Vec<String>, StoreError> {
        match self.values.get(key).map(|v| v.clone()) {
            None => Ok(Vec::new()),
            Some(StoredValue::List(values)) => Ok(values),
            Some(StoredValue::Text(_)) => Err(Report::new(StoreError::Decode)
                .attach_printable(format!("key={key} holds a string, not a list"))),
        }
    }

    async fn set_list(&self, key: &str, values: &[String]) -> Result<(), StoreError> {
        self.values
            .insert(key.to_string(), StoredValue::List(values.to_vec()));
        Ok(())
    }
}
