//! SQLite message archive.
//!
//! The sink subscribes to core outbound like any other consumer. Rows are
//! buffered and written in batches:
//! - when `batch_size` rows are pending
//! - when `flush_interval` has elapsed since the last flush, even when idle
//!
//! A failed batch is retried with backoff, then dropped and logged.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use backon::Retryable;
use bytes::Bytes;
use chrono::NaiveDateTime;
use sea_query::{Query, SqliteQueryBuilder};
use serde::Deserialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool};
use sqlx::Acquire;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub mod schema;

use schema::Messages;

use crate::config::deserialize_seconds;
use crate::envelope::{parse_timestamp, Envelope, MessageError};
use crate::stages::Stage;
use crate::transport::{FrameSource, TransportError};
use crate::utils::retry::db_backoff;

/// Longest wait for a message before checking the flush schedule.
const POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// Column layout of [`Messages::Datetime`].
const DATETIME_COLUMN_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Result type for archive operations.
pub type Result<T> = std::result::Result<T, DbError>;

/// Errors raised by the message archive.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Query error: {0}")]
    Query(#[from] sea_query::error::Error),

    #[error(transparent)]
    Message(#[from] MessageError),

    #[error("Invalid timestamp '{0}'")]
    InvalidTimestamp(String),

    #[error("Payload is not valid UTF-8")]
    InvalidPayload,
}

/// The `db` configuration section.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    /// SQLite URL, e.g. `sqlite:/var/lib/reactobus/messages.db`.
    pub url: String,
    pub batch_size: usize,
    #[serde(deserialize_with = "deserialize_seconds")]
    pub flush_interval: Duration,
    /// Attempts per batch before it is dropped.
    pub max_attempts: usize,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:reactobus.db".to_string(),
            batch_size: 1000,
            flush_interval: Duration::from_secs(1),
            max_attempts: 3,
        }
    }
}

/// Open a pool, creating the database file when missing.
pub async fn connect_pool(url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
    Ok(SqlitePool::connect_with(options).await?)
}

/// One archived envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRow {
    pub topic: String,
    pub uuid: String,
    pub datetime: NaiveDateTime,
    pub username: String,
    pub data: String,
}

impl MessageRow {
    /// Validate and convert a relayed envelope.
    pub fn from_frames(frames: &[Bytes]) -> Result<Self> {
        let envelope = Envelope::decode(frames)?;
        let datetime = parse_timestamp(envelope.timestamp())
            .ok_or_else(|| DbError::InvalidTimestamp(envelope.timestamp().to_string()))?;
        let data = std::str::from_utf8(envelope.payload())
            .map_err(|_| DbError::InvalidPayload)?
            .to_string();
        serde_json::from_str::<serde_json::Value>(&data).map_err(MessageError::from)?;

        Ok(Self {
            topic: envelope.topic().to_string(),
            uuid: envelope.uuid().to_string(),
            datetime,
            username: envelope.username().to_string(),
            data,
        })
    }
}

pub struct DbSink {
    pool: SqlitePool,
    config: DbConfig,
    source: Box<dyn FrameSource>,
}

impl DbSink {
    pub fn new(pool: SqlitePool, config: DbConfig, source: Box<dyn FrameSource>) -> Self {
        Self {
            pool,
            config,
            source,
        }
    }

    /// Connect to `config.url` and create the schema.
    pub async fn connect(config: &DbConfig, source: Box<dyn FrameSource>) -> Result<Self> {
        let pool = connect_pool(&config.url).await?;
        let sink = Self::new(pool, config.clone(), source);
        sink.init().await?;
        Ok(sink)
    }

    /// Initialize the database schema.
    pub async fn init(&self) -> Result<()> {
        sqlx::query(&schema::create_table())
            .execute(&self.pool)
            .await?;
        for statement in schema::create_indexes() {
            sqlx::query(&statement).execute(&self.pool).await?;
        }
        info!(url = %self.config.url, "Message archive initialized");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Write every row in one transaction.
    pub async fn insert(&self, rows: &[MessageRow]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        // Statement must not live across an await: sea-query holds Rc internally.
        let query = {
            let mut insert = Query::insert();
            insert.into_table(Messages::Table).columns([
                Messages::Topic,
                Messages::Uuid,
                Messages::Datetime,
                Messages::Username,
                Messages::Data,
            ]);
            for row in rows {
                insert.values([
                    row.topic.as_str().into(),
                    row.uuid.as_str().into(),
                    row.datetime.format(DATETIME_COLUMN_FORMAT).to_string().into(),
                    row.username.as_str().into(),
                    row.data.as_str().into(),
                ])?;
            }
            insert.to_string(SqliteQueryBuilder)
        };

        let mut conn = self.pool.acquire().await?;
        let mut tx = conn.begin().await?;
        sqlx::query(&query).execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Insert with retries. Returns false when the batch was dropped.
    pub async fn save(&self, rows: &[MessageRow]) -> bool {
        let result = (|| self.insert(rows))
            .retry(db_backoff(self.config.max_attempts))
            .notify(|err: &DbError, dur: Duration| {
                warn!(error = %err, delay = ?dur, "Database commit failed, retrying");
            })
            .await;

        match result {
            Ok(()) => {
                debug!(rows = rows.len(), "Saved to database");
                true
            }
            Err(e) => {
                error!(rows = rows.len(), error = %e, "Unable to commit to the database, dropping the messages");
                false
            }
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        let batch_size = self.config.batch_size.max(1);
        let poll = self.config.flush_interval.min(POLL_TIMEOUT).max(Duration::from_millis(1));
        let mut batch = Vec::with_capacity(batch_size.min(1024));
        let mut last_flush = Instant::now();

        info!("Database sink started");
        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => break,
                received = tokio::time::timeout(poll, self.source.recv()) => received,
            };

            match received {
                Ok(Ok(frames)) => match MessageRow::from_frames(&frames) {
                    Ok(row) => batch.push(row),
                    Err(e) => error!(error = %e, "Invalid message"),
                },
                Ok(Err(TransportError::Closed)) => break,
                Ok(Err(e)) => {
                    error!(error = %e, "Database sink receive failed");
                    break;
                }
                Err(_) => {}
            }

            if batch.len() >= batch_size || last_flush.elapsed() >= self.config.flush_interval {
                if !batch.is_empty() {
                    self.save(&batch).await;
                    batch.clear();
                }
                last_flush = Instant::now();
            }
        }

        if !batch.is_empty() {
            self.save(&batch).await;
        }
        info!("Database sink stopped");
    }
}

#[async_trait]
impl Stage for DbSink {
    fn name(&self) -> &str {
        "db"
    }

    async fn run(self: Box<Self>, cancel: CancellationToken) {
        DbSink::run(*self, cancel).await
    }
}
