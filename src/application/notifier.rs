//! Outbox delivery.
//!
//! Workflow transactions only insert rows into `notifications`. This module
//! drains that table after commit, hands each message to a [`Mailer`] and
//! records the outcome, backing off between failed attempts.

use crate::config::{MailConfig, NotifierConfig};
use crate::domain::services::notifications::EmailMessage;
use crate::persistence::notification_repository::NotificationRepository;
use crate::persistence::{DatabaseError, DbPool};
use crate::task_runner::{run_with_circuit_breaker, CircuitBreakerConfig, TaskError};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tracing::{debug, error, info, warn};

/// First retry delay; doubles per attempt up to [`MAX_RETRY_DELAY_SECONDS`].
const BASE_RETRY_DELAY_SECONDS: i64 = 30;
const MAX_RETRY_DELAY_SECONDS: i64 = 3600;

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("Failed to create HTTP client: {0}")]
    Client(String),

    #[error("Mail relay request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Mail relay rejected message {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Something that can deliver an email.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<(), MailError>;
}

/// Writes messages to the log instead of sending them.
pub struct LogMailer {
    from: String,
}

impl LogMailer {
    pub fn new(from: impl Into<String>) -> Self {
        Self { from: from.into() }
    }
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), MailError> {
        info!(
            kind = %message.kind,
            from = %self.from,
            to = %message.recipients.join(", "),
            "Email: {}",
            message.subject
        );
        debug!("Email body:\n{}", message.body);
        Ok(())
    }
}

#[derive(Serialize)]
struct RelayPayload<'a> {
    from: &'a str,
    to: &'a [String],
    subject: &'a str,
    body: &'a str,
    kind: &'a str,
}

/// Posts each message as JSON to an HTTP mail relay.
pub struct WebhookMailer {
    client: Client,
    url: String,
    from: String,
}

impl WebhookMailer {
    pub fn new(url: impl Into<String>, from: impl Into<String>) -> Result<Self, MailError> {
        let client = Client::builder()
            .user_agent("agro-broker/0.1.0")
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| MailError::Client(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
            from: from.into(),
        })
    }
}

#[async_trait]
impl Mailer for WebhookMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), MailError> {
        let payload = RelayPayload {
            from: &self.from,
            to: &message.recipients,
            subject: &message.subject,
            body: &message.body,
            kind: message.kind.as_str(),
        };

        let response = self.client.post(&self.url).json(&payload).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(MailError::Rejected { status, body });
        }

        debug!("Relayed {} email to {} recipient(s)", message.kind, message.recipients.len());
        Ok(())
    }
}

/// The webhook relay when configured, otherwise the log.
pub fn mailer_from_config(config: &MailConfig) -> Result<Arc<dyn Mailer>, MailError> {
    match &config.webhook_url {
        Some(url) => {
            info!("Delivering email through relay {}", url);
            Ok(Arc::new(WebhookMailer::new(url.clone(), config.from.clone())?))
        }
        None => {
            warn!("MAIL_WEBHOOK_URL not set, emails will only be logged");
            Ok(Arc::new(LogMailer::new(config.from.clone())))
        }
    }
}

/// Outcome counts of one dispatch pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub sent: usize,
    pub retried: usize,
    pub failed: usize,
}

/// Delay before attempt number `attempts + 1`.
pub fn retry_delay(attempts: u32) -> ChronoDuration {
    let factor = 2i64.saturating_pow(attempts.saturating_sub(1));
    ChronoDuration::seconds(
        BASE_RETRY_DELAY_SECONDS
            .saturating_mul(factor)
            .min(MAX_RETRY_DELAY_SECONDS),
    )
}

#[derive(Clone)]
pub struct OutboxDispatcher {
    pool: DbPool,
    mailer: Arc<dyn Mailer>,
    config: NotifierConfig,
}

impl OutboxDispatcher {
    pub fn new(pool: DbPool, mailer: Arc<dyn Mailer>, config: NotifierConfig) -> Self {
        Self {
            pool,
            mailer,
            config,
        }
    }

    /// Send every due message once.
    ///
    /// The connection is released while the mailer runs so request handlers
    /// are never starved by a slow relay.
    pub async fn dispatch_due(&self, now: DateTime<Utc>) -> Result<DispatchReport, DatabaseError> {
        let due = {
            let mut conn = self.pool.acquire().await?;
            NotificationRepository::new(&mut conn)
                .due(now, self.config.batch_size)
                .await?
        };

        let mut report = DispatchReport::default();
        for record in due {
            let attempts = u32::try_from(record.attempts).unwrap_or(u32::MAX).saturating_add(1);
            let outcome = match record.message() {
                Ok(message) => self.mailer.send(&message).await.map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };

            let mut conn = self.pool.acquire().await?;
            let mut repo = NotificationRepository::new(&mut conn);
            match outcome {
                Ok(()) => {
                    repo.mark_sent(record.id, Utc::now()).await?;
                    report.sent += 1;
                }
                Err(e) if attempts >= self.config.max_attempts => {
                    error!(
                        "Giving up on {} notification {} after {} attempts: {}",
                        record.kind, record.id, attempts, e
                    );
                    repo.record_failure(record.id, &e, None).await?;
                    report.failed += 1;
                }
                Err(e) => {
                    let retry_at = Utc::now() + retry_delay(attempts);
                    warn!(
                        "Notification {} failed (attempt {}/{}), retrying at {}: {}",
                        record.id, attempts, self.config.max_attempts, retry_at, e
                    );
                    repo.record_failure(record.id, &e, Some(retry_at)).await?;
                    report.retried += 1;
                }
            }
        }

        if report != DispatchReport::default() {
            info!(
                "Notifications: {} sent, {} retrying, {} failed",
                report.sent, report.retried, report.failed
            );
        }
        Ok(report)
    }

    /// Poll the outbox until `shutdown` fires.
    pub async fn run(self, shutdown: watch::Receiver<bool>, wake: Arc<Notify>) -> Result<(), TaskError> {
        let breaker = CircuitBreakerConfig {
            max_consecutive_failures: 10,
            initial_retry_delay: Duration::from_secs(1),
            max_retry_delay: Duration::from_secs(60),
            idle_interval: self.config.poll_interval,
        };
        let dispatcher = &self;
        run_with_circuit_breaker("notification_dispatcher", breaker, shutdown, wake, || async move {
            dispatcher
                .dispatch_due(Utc::now())
                .await
                .map(|_| ())
                .map_err(|e| e.to_string())
        })
        .await
    }
}
