use crate::auth::PasswordHasher;
use crate::config::AppConfig;
use crate::domain::services::notifications::NotificationTemplates;
use crate::persistence::DbPool;
use std::sync::Arc;
use tokio::sync::Notify;

/// Shared handles for handlers, middleware and services.
#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub config: Arc<AppConfig>,
    pub hasher: Arc<PasswordHasher>,
    pub templates: Arc<NotificationTemplates>,
    /// Poked after a commit that queued email, so the dispatcher runs early.
    pub outbox_wake: Arc<Notify>,
}

impl AppState {
    pub fn new(pool: DbPool, config: AppConfig) -> Self {
        let hasher = PasswordHasher::new(&config.password_pepper, config.password_hash_iterations);
        let templates =
            NotificationTemplates::new(config.mail.company_name.clone(), config.mail.signature.clone());
        Self {
            pool,
            hasher: Arc::new(hasher),
            templates: Arc::new(templates),
            config: Arc::new(config),
            outbox_wake: Arc::new(Notify::new()),
        }
    }
}

#[cfg(test)]
pub(crate) async fn test_state() -> AppState {
    let pool = crate::persistence::test_pool().await;
    AppState::new(pool, test_config())
}

#[cfg(test)]
pub(crate) fn test_config() -> AppConfig {
    let mut config = AppConfig::with_pepper("test-pepper-0123456789");
    config.password_hash_iterations = 1_000;
    config
}

/// A state over an on-disk database in `dir`, so several connections can
/// run transactions against each other.
#[cfg(test)]
pub(crate) async fn file_backed_state(dir: &std::path::Path, max_connections: u32) -> AppState {
    let mut config = test_config();
    config.database = crate::persistence::DatabaseConfig {
        url: format!("sqlite://{}", dir.join("market.db").display()),
        max_connections,
        log_queries: false,
    };
    config.max_transition_retries = 20;
    let pool = crate::persistence::init_database(&config.database).await.unwrap();
    AppState::new(pool, config)
}
