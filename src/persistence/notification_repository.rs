//! Email outbox.

use super::models::NotificationRecord;
use super::{query_failed, DatabaseError};
use crate::domain::services::notifications::EmailMessage;
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::debug;

pub struct NotificationRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> NotificationRepository<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        Self { conn }
    }

    /// Queue a message for delivery once the surrounding transaction commits.
    pub async fn enqueue(&mut self, message: &EmailMessage, now: DateTime<Utc>) -> Result<i64, DatabaseError> {
        let recipients = serde_json::to_string(&message.recipients).map_err(|e| {
            DatabaseError::QueryError(format!("Failed to encode recipients: {}", e))
        })?;

        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO notifications (kind, subject, body, recipients, status, attempts, created_at, next_attempt_at)
            VALUES (?1, ?2, ?3, ?4, 'pending', 0, ?5, ?5)
            RETURNING id
            "#,
        )
        .bind(message.kind.as_str())
        .bind(&message.subject)
        .bind(&message.body)
        .bind(recipients)
        .bind(now)
        .fetch_one(&mut *self.conn)
        .await
        .map_err(|e| query_failed("Failed to enqueue notification", e))?;

        debug!("Queued {} notification {}", message.kind, id);
        Ok(id)
    }

    /// Pending messages whose next attempt is due, oldest first.
    pub async fn due(&mut self, now: DateTime<Utc>, limit: i64) -> Result<Vec<NotificationRecord>, DatabaseError> {
        sqlx::query_as::<_, NotificationRecord>(
            r#"
            SELECT * FROM notifications
            WHERE status = 'pending' AND julianday(next_attempt_at) <= julianday(?1)
            ORDER BY next_attempt_at, id
            LIMIT ?2
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&mut *self.conn)
        .await
        .map_err(|e| query_failed("Failed to load due notifications", e))
    }

    pub async fn mark_sent(&mut self, id: i64, now: DateTime<Utc>) -> Result<(), DatabaseError> {
        sqlx::query(
            "UPDATE notifications SET status = 'sent', attempts = attempts + 1, sent_at = ?1, last_error = NULL WHERE id = ?2",
        )
        .bind(now)
        .bind(id)
        .execute(&mut *self.conn)
        .await
        .map_err(|e| query_failed("Failed to mark notification sent", e))?;
        Ok(())
    }

    /// Record a failed attempt. `retry_at` of `None` gives up for good.
    pub async fn record_failure(
        &mut self,
        id: i64,
        error: &str,
        retry_at: Option<DateTime<Utc>>,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            UPDATE notifications
            SET attempts = attempts + 1, last_error = ?1,
                status = CASE WHEN ?2 IS NULL THEN 'failed' ELSE 'pending' END,
                next_attempt_at = COALESCE(?2, next_attempt_at)
            WHERE id = ?3
            "#,
        )
        .bind(error)
        .bind(retry_at)
        .bind(id)
        .execute(&mut *self.conn)
        .await
        .map_err(|e| query_failed("Failed to record notification failure", e))?;
        Ok(())
    }

    pub async fn get(&mut self, id: i64) -> Result<Option<NotificationRecord>, DatabaseError> {
        sqlx::query_as::<_, NotificationRecord>("SELECT * FROM notifications WHERE id = ?1")
            .bind(id)
            .fetch_optional(&mut *self.conn)
            .await
            .map_err(|e| query_failed("Failed to get notification", e))
    }

    /// Newest first.
    pub async fn recent(&mut self, limit: i64) -> Result<Vec<NotificationRecord>, DatabaseError> {
        sqlx::query_as::<_, NotificationRecord>("SELECT * FROM notifications ORDER BY id DESC LIMIT ?1")
            .bind(limit)
            .fetch_all(&mut *self.conn)
            .await
            .map_err(|e| query_failed("Failed to list notifications", e))
    }
}
