use async_trait::async_trait;
use chrono::{DateTime, Utc};
use proto::{
    DatabaseError, DeliveryId, DeliveryRecord, DeliveryStatus, DeliveryUpdate, Recipient,
    RecipientId,
};
use sqlx::{
    Row,
    sqlite::{SqlitePool, SqliteRow},
};
use std::str::FromStr;
use tracing::{debug, info};

use crate::store::{DeliveryStore, RecipientDirectory};

/// SQLite-backed delivery store and recipient directory
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the SQLite database and run migrations
    pub async fn open(db_url: &str) -> Result<Self, DatabaseError> {
        // Expand ~ in path
        let url = if db_url.starts_with('~') {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            db_url.replacen('~', &home, 1)
        } else {
            db_url.to_string()
        };

        if let Some(parent) = std::path::Path::new(&url).parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DatabaseError::Sqlx(e.to_string()))?;
        }

        let pool = SqlitePool::connect(&format!("sqlite:{url}?mode=rwc"))
            .await
            .map_err(|e| DatabaseError::Sqlx(e.to_string()))?;

        let migrations_dir =
            std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../../migrations");
        let migrator = sqlx::migrate::Migrator::new(migrations_dir.as_path())
            .await
            .map_err(|e| DatabaseError::Migration(e.to_string()))?;

        migrator
            .run(&pool)
            .await
            .map_err(|e| DatabaseError::Migration(e.to_string()))?;

        info!("SQLite delivery store opened: {url}");
        Ok(Self { pool })
    }

    /// Insert or replace a recipient's contact details
    pub async fn upsert_recipient(&self, recipient: &Recipient) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"INSERT INTO recipients (id, username, email, phone_number, chat_id)
               VALUES (?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                 username = excluded.username,
                 email = excluded.email,
                 phone_number = excluded.phone_number,
                 chat_id = excluded.chat_id"#,
        )
        .bind(recipient.id.as_str())
        .bind(&recipient.username)
        .bind(&recipient.email)
        .bind(&recipient.phone_number)
        .bind(&recipient.chat_id)
        .execute(&self.pool)
        .await
        .map_err(|e| DatabaseError::Sqlx(e.to_string()))?;

        debug!("Saved recipient: {}", recipient.id);
        Ok(())
    }

    async fn status_of(&self, id: &DeliveryId) -> Result<Option<String>, DatabaseError> {
        let row = sqlx::query("SELECT status FROM deliveries WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| DatabaseError::Sqlx(e.to_string()))?;
        Ok(row.map(|r| r.get::<String, _>("status")))
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::Sqlx(format!("invalid timestamp '{raw}': {e}")))
}

fn record_from_row(row: &SqliteRow) -> Result<DeliveryRecord, DatabaseError> {
    let status_str: String = row.get("status");
    let status =
        DeliveryStatus::from_str(&status_str).map_err(|e| DatabaseError::Sqlx(e.to_string()))?;
    let created_at: String = row.get("created_at");
    let sent_at: Option<String> = row.get("sent_at");

    Ok(DeliveryRecord {
        id: DeliveryId::from(row.get::<String, _>("id")),
        recipient_id: RecipientId::from(row.get::<String, _>("recipient_id")),
        subject: row.get("subject"),
        message: row.get("message"),
        status,
        sent_via: row.get("sent_via"),
        created_at: parse_timestamp(&created_at)?,
        sent_at: sent_at.as_deref().map(parse_timestamp).transpose()?,
    })
}

#[async_trait]
impl DeliveryStore for SqliteStore {
    async fn create(&self, record: &DeliveryRecord) -> Result<DeliveryId, DatabaseError> {
        sqlx::query(
            "INSERT INTO deliveries (id, recipient_id, subject, message, status, sent_via, created_at, sent_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.id.as_str())
        .bind(record.recipient_id.as_str())
        .bind(&record.subject)
        .bind(&record.message)
        .bind(record.status.to_string())
        .bind(&record.sent_via)
        .bind(record.created_at.to_rfc3339())
        .bind(record.sent_at.map(|at| at.to_rfc3339()))
        .execute(&self.pool)
        .await
        .map_err(|e| DatabaseError::Sqlx(e.to_string()))?;

        debug!("Created delivery record: {}", record.id);
        Ok(record.id.clone())
    }

    async fn update(&self, id: &DeliveryId, update: &DeliveryUpdate) -> Result<(), DatabaseError> {
        // Single statement so status, sent_via and sent_at change atomically.
        let result = sqlx::query(
            "UPDATE deliveries SET status = ?, sent_via = ?, sent_at = ? WHERE id = ? AND status = 'pending'",
        )
        .bind(update.status().to_string())
        .bind(update.sent_via())
        .bind(update.at().to_rfc3339())
        .bind(id.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| DatabaseError::Sqlx(e.to_string()))?;

        if result.rows_affected() == 0 {
            return match self.status_of(id).await? {
                Some(_) => Err(DatabaseError::AlreadyTerminal(id.to_string())),
                None => Err(DatabaseError::NotFound(id.to_string())),
            };
        }

        debug!("Delivery {id} -> {}", update.status());
        Ok(())
    }

    async fn get(&self, id: &DeliveryId) -> Result<Option<DeliveryRecord>, DatabaseError> {
        let row = sqlx::query(
            "SELECT id, recipient_id, subject, message, status, sent_via, created_at, sent_at FROM deliveries WHERE id = ?",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| DatabaseError::Sqlx(e.to_string()))?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<DeliveryRecord>, DatabaseError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(
            "SELECT id, recipient_id, subject, message, status, sent_via, created_at, sent_at FROM deliveries ORDER BY created_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DatabaseError::Sqlx(e.to_string()))?;

        rows.iter().map(record_from_row).collect()
    }
}

#[async_trait]
impl RecipientDirectory for SqliteStore {
    async fn find(&self, id: &RecipientId) -> Result<Option<Recipient>, DatabaseError> {
        let row = sqlx::query(
            "SELECT id, username, email, phone_number, chat_id FROM recipients WHERE id = ?",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| DatabaseError::Sqlx(e.to_string()))?;

        Ok(row.map(|row| Recipient {
            id: RecipientId::from(row.get::<String, _>("id")),
            username: row.get("username"),
            email: row.get("email"),
            phone_number: row.get("phone_number"),
            chat_id: row.get("chat_id"),
        }))
    }
}
