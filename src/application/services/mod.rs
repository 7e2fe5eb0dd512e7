//! Use cases. Each public function is one transactional operation on
//! behalf of an authenticated caller.

pub mod accounts;
pub mod catalog;
pub mod contracts;
pub mod deal_workflow;

use crate::domain::entities::{Product, User};
use crate::domain::errors::DomainError;
use crate::domain::services::notifications::EmailMessage;
use crate::persistence::notification_repository::NotificationRepository;
use crate::persistence::product_repository::ProductRepository;
use crate::persistence::repository::UserRepository;
use crate::persistence::{query_failed, DatabaseError, DbPool};
use chrono::{DateTime, Utc};
use sqlx::pool::PoolConnection;
use sqlx::{Sqlite, SqliteConnection, Transaction};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Pause before retrying an operation that lost a race.
const RETRY_BACKOFF: Duration = Duration::from_millis(25);

/// Run `operation` again while it fails with a retryable error.
pub(crate) async fn with_retries<T, F, Fut>(
    operation: &str,
    attempts: u32,
    mut run: F,
) -> Result<T, DomainError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DomainError>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match run().await {
            Err(e) if e.is_retryable() && attempt < attempts => {
                warn!("{} attempt {}/{} lost a race: {}", operation, attempt, attempts, e);
                tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}

pub(crate) async fn acquire(pool: &DbPool) -> Result<PoolConnection<Sqlite>, DatabaseError> {
    pool.acquire()
        .await
        .map_err(|e| query_failed("Failed to acquire connection", e))
}

pub(crate) async fn begin(pool: &DbPool) -> Result<Transaction<'static, Sqlite>, DatabaseError> {
    pool.begin()
        .await
        .map_err(|e| query_failed("Failed to begin transaction", e))
}

pub(crate) async fn commit(tx: Transaction<'static, Sqlite>) -> Result<(), DatabaseError> {
    tx.commit()
        .await
        .map_err(|e| query_failed("Failed to commit transaction", e))
}

pub(crate) async fn load_user(conn: &mut SqliteConnection, id: i64) -> Result<User, DomainError> {
    UserRepository::new(conn)
        .get(id)
        .await?
        .ok_or(DomainError::not_found("User"))
}

pub(crate) async fn load_product(conn: &mut SqliteConnection, id: i64) -> Result<Product, DomainError> {
    ProductRepository::new(conn)
        .get(id)
        .await?
        .ok_or(DomainError::not_found("Product"))
}

/// Queue messages in the outbox. Returns how many were queued.
pub(crate) async fn enqueue<I>(
    conn: &mut SqliteConnection,
    messages: I,
    now: DateTime<Utc>,
) -> Result<usize, DatabaseError>
where
    I: IntoIterator<Item = EmailMessage>,
{
    let mut outbox = NotificationRepository::new(conn);
    let mut queued = 0;
    for message in messages {
        outbox.enqueue(&message, now).await?;
        queued += 1;
    }
    Ok(queued)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_with_retries_retries_conflicts_only() {
        let calls = AtomicU32::new(0);
        let result = with_retries("flaky", 3, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(DomainError::Conflict("version".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result, Ok(2));

        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retries("invalid", 3, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(DomainError::invalid("bad")) }
        })
        .await;
        assert!(matches!(result, Err(DomainError::Validation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_with_retries_gives_up() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retries("hopeless", 2, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(DomainError::Conflict("busy".into())) }
        })
        .await;
        assert!(result.unwrap_err().is_retryable());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
