//! Persistence Layer
//!
//! SQLite storage for accounts, listings, negotiations and contracts,
//! accessed asynchronously through sqlx.
//!
//! # Database Schema
//!
//! ## users / auth_tokens
//! Accounts with role, KYC and account status; bearer sessions stored as
//! SHA-256 digests with an expiry.
//!
//! ## products
//! Listings. `remaining_quantity` is guarded by an optimistic `version`
//! column: every stock write is `UPDATE ... WHERE version = ?`.
//!
//! ## interests
//! Buyer offers with their status and a JSON negotiation history.
//!
//! ## contracts
//! One row per confirmed interest (`interest_id` is unique).
//!
//! ## notifications
//! Outbox of emails written in the same transaction as the change that
//! caused them.
//!
//! ## audit_log
//! Who did what to which entity, with JSON details.
//!
//! Decimal amounts and quantities are stored as canonical text (`"12.50"`).

pub mod contract_repository;
pub mod interest_repository;
pub mod models;
pub mod notification_repository;
pub mod product_repository;
pub mod repository;

use crate::domain::errors::DomainError;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::ConnectOptions;
use std::path::Path;
use std::str::FromStr;
use tracing::{error, info, warn};

/// Database connection pool
pub type DbPool = SqlitePool;

/// Database initialization error
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Database connection error: {0}")]
    ConnectionError(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    MigrationError(String),

    #[error("Query error: {0}")]
    QueryError(String),

    /// SQLite refused a lock or the pool ran dry. Safe to retry.
    #[error("Database busy: {0}")]
    Busy(String),

    #[error("Duplicate value: {0}")]
    Duplicate(String),

    /// A version-checked update matched no row.
    #[error("Stale write: {0}")]
    StaleWrite(String),

    #[error("Corrupt row: {0}")]
    CorruptRow(String),
}

impl From<DatabaseError> for DomainError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::Busy(msg)
            | DatabaseError::Duplicate(msg)
            | DatabaseError::StaleWrite(msg) => DomainError::Conflict(msg),
            other => DomainError::Internal(other.to_string()),
        }
    }
}

/// Classify and log a failed statement.
pub(crate) fn query_failed(context: &str, err: sqlx::Error) -> DatabaseError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            warn!("{}: unique constraint violated: {}", context, db.message());
            return DatabaseError::Duplicate(format!("{}: {}", context, db.message()));
        }
        let busy_code = db
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            .map(|code| matches!(code & 0xff, 5 | 6))
            .unwrap_or(false);
        if busy_code || db.message().contains("database is locked") {
            warn!("{}: database busy: {}", context, db.message());
            return DatabaseError::Busy(format!("{}: {}", context, db.message()));
        }
    }
    if matches!(err, sqlx::Error::PoolTimedOut) {
        warn!("{}: connection pool timed out", context);
        return DatabaseError::Busy(format!("{}: pool timed out", context));
    }
    error!("{}: {}", context, err);
    DatabaseError::QueryError(format!("{}: {}", context, err))
}

/// Initialize the database connection pool and run migrations.
///
/// `sqlite::memory:` URLs get a single long-lived connection so every
/// caller sees the same in-memory database.
pub async fn init_database(config: &DatabaseConfig) -> Result<DbPool, DatabaseError> {
    info!("Initializing database: {}", config.url);

    let in_memory = config.url.contains(":memory:");

    // Ensure data directory exists
    if !in_memory {
        if let Some(db_path) = config.url.strip_prefix("sqlite://") {
            if let Some(parent) = Path::new(db_path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        DatabaseError::ConnectionError(sqlx::Error::Configuration(Box::new(e)))
                    })?;
                }
            }
        }
    }

    let level = if config.log_queries {
        tracing::log::LevelFilter::Debug
    } else {
        tracing::log::LevelFilter::Off
    };
    let options = SqliteConnectOptions::from_str(&config.url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .log_statements(level);

    let pool_options = if in_memory {
        SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(config.max_connections)
    };
    let pool = pool_options.connect_with(options).await?;

    run_migrations(&pool).await?;

    info!("✓ Database initialized successfully");

    Ok(pool)
}

const MIGRATIONS: &[(&str, &str)] = &[
    (
        "users table",
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT NOT NULL UNIQUE,
            email TEXT NOT NULL UNIQUE,
            mobile TEXT NOT NULL UNIQUE,
            full_name TEXT,
            company_name TEXT,
            password_hash TEXT NOT NULL,
            role TEXT NOT NULL CHECK(role IN ('super_admin', 'admin', 'buyer', 'seller', 'transporter', 'both_sellerandbuyer')),
            kyc_status TEXT NOT NULL DEFAULT 'pending' CHECK(kyc_status IN ('pending', 'approved', 'rejected')),
            kyc_rejection_reason TEXT,
            account_status TEXT NOT NULL DEFAULT 'active' CHECK(account_status IN ('active', 'deactive', 'suspended')),
            suspension_reason TEXT,
            buyer_public_id TEXT UNIQUE,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL
        )
        "#,
    ),
    (
        "auth_tokens table",
        r#"
        CREATE TABLE IF NOT EXISTS auth_tokens (
            token_hash TEXT PRIMARY KEY,
            user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            created_at DATETIME NOT NULL,
            expires_at DATETIME NOT NULL,
            revoked_at DATETIME
        )
        "#,
    ),
    (
        "products table",
        r#"
        CREATE TABLE IF NOT EXISTS products (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            seller_id INTEGER NOT NULL REFERENCES users(id),
            title TEXT NOT NULL,
            description TEXT,
            category TEXT NOT NULL,
            amount TEXT NOT NULL,
            amount_unit TEXT NOT NULL CHECK(amount_unit IN ('kg', 'ton', 'qtl')),
            original_quantity TEXT NOT NULL,
            remaining_quantity TEXT NOT NULL,
            quantity_unit TEXT NOT NULL CHECK(quantity_unit IN ('kg', 'ton', 'qtl')),
            loading_from DATE NOT NULL,
            loading_to DATE NOT NULL,
            loading_location TEXT NOT NULL,
            remark TEXT,
            is_active BOOLEAN NOT NULL DEFAULT 1,
            deal_status TEXT NOT NULL,
            status TEXT NOT NULL,
            version INTEGER NOT NULL DEFAULT 0,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL
        )
        "#,
    ),
    (
        "interests table",
        r#"
        CREATE TABLE IF NOT EXISTS interests (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            transaction_id TEXT NOT NULL UNIQUE,
            product_id INTEGER NOT NULL REFERENCES products(id) ON DELETE CASCADE,
            buyer_id INTEGER NOT NULL REFERENCES users(id),
            seller_id INTEGER NOT NULL REFERENCES users(id),
            snapshot_amount TEXT NOT NULL,
            snapshot_quantity TEXT NOT NULL,
            buyer_offered_amount TEXT NOT NULL,
            buyer_required_quantity TEXT NOT NULL,
            loading_from TEXT,
            loading_to TEXT,
            delivery_date DATE NOT NULL,
            buyer_remark TEXT,
            seller_remark TEXT,
            superadmin_remark TEXT,
            is_active BOOLEAN NOT NULL DEFAULT 1,
            status TEXT NOT NULL CHECK(status IN ('interested', 'seller_confirmed', 'deal_confirmed', 'rejected', 'cancelled')),
            deal_confirmed_at DATETIME,
            negotiation_history TEXT NOT NULL DEFAULT '[]',
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL
        )
        "#,
    ),
    (
        "contracts table",
        r#"
        CREATE TABLE IF NOT EXISTS contracts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            contract_id TEXT NOT NULL UNIQUE,
            interest_id INTEGER NOT NULL UNIQUE REFERENCES interests(id),
            product_id INTEGER NOT NULL REFERENCES products(id),
            buyer_id INTEGER NOT NULL REFERENCES users(id),
            seller_id INTEGER NOT NULL REFERENCES users(id),
            deal_amount TEXT NOT NULL,
            deal_quantity TEXT NOT NULL,
            amount_unit TEXT NOT NULL,
            quantity_unit TEXT NOT NULL,
            loading_from TEXT NOT NULL,
            loading_to TEXT NOT NULL,
            buyer_remark TEXT,
            seller_remark TEXT,
            admin_remark TEXT,
            status TEXT NOT NULL DEFAULT 'active' CHECK(status IN ('active', 'completed', 'cancelled')),
            confirmed_at DATETIME NOT NULL,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL
        )
        "#,
    ),
    (
        "notifications table",
        r#"
        CREATE TABLE IF NOT EXISTS notifications (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            kind TEXT NOT NULL,
            subject TEXT NOT NULL,
            body TEXT NOT NULL,
            recipients TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending' CHECK(status IN ('pending', 'sent', 'failed')),
            attempts INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            created_at DATETIME NOT NULL,
            next_attempt_at DATETIME NOT NULL,
            sent_at DATETIME
        )
        "#,
    ),
    (
        "audit_log table",
        r#"
        CREATE TABLE IF NOT EXISTS audit_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            actor_id INTEGER,
            action TEXT NOT NULL,
            entity TEXT NOT NULL,
            entity_id INTEGER,
            details TEXT NOT NULL,
            created_at DATETIME NOT NULL
        )
        "#,
    ),
    (
        "index",
        "CREATE INDEX IF NOT EXISTS idx_auth_tokens_user ON auth_tokens(user_id)",
    ),
    (
        "index",
        "CREATE INDEX IF NOT EXISTS idx_products_seller ON products(seller_id)",
    ),
    (
        "index",
        "CREATE INDEX IF NOT EXISTS idx_products_status ON products(status, deal_status)",
    ),
    (
        "index",
        "CREATE INDEX IF NOT EXISTS idx_interests_product_status ON interests(product_id, status)",
    ),
    (
        "index",
        "CREATE INDEX IF NOT EXISTS idx_interests_buyer_status ON interests(buyer_id, status)",
    ),
    (
        "index",
        "CREATE INDEX IF NOT EXISTS idx_interests_seller_status ON interests(seller_id, status)",
    ),
    (
        "index",
        "CREATE INDEX IF NOT EXISTS idx_contracts_parties ON contracts(seller_id, buyer_id)",
    ),
    (
        "index",
        "CREATE INDEX IF NOT EXISTS idx_contracts_confirmed_at ON contracts(confirmed_at)",
    ),
    (
        "index",
        "CREATE INDEX IF NOT EXISTS idx_notifications_due ON notifications(status, next_attempt_at)",
    ),
    (
        "index",
        "CREATE INDEX IF NOT EXISTS idx_audit_log_entity ON audit_log(entity, entity_id)",
    ),
];

/// Run database migrations
async fn run_migrations(pool: &DbPool) -> Result<(), DatabaseError> {
    info!("Running database migrations...");

    for (name, statement) in MIGRATIONS {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(|e| DatabaseError::MigrationError(format!("Failed to create {}: {}", name, e)))?;
    }

    info!("✓ Database migrations completed successfully");

    Ok(())
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Database URL (e.g., "sqlite://data/agro_broker.db")
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Log every statement at debug level
    pub log_queries: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://data/agro_broker.db".to_string(),
            max_connections: 5,
            log_queries: cfg!(debug_assertions),
        }
    }
}

impl DatabaseConfig {
    /// In-memory database, used by tests.
    pub fn in_memory() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            log_queries: false,
        }
    }

    /// Load from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let url = std::env::var("DATABASE_URL").unwrap_or(defaults.url);

        let max_connections = match std::env::var("DATABASE_MAX_CONNECTIONS") {
            Ok(raw) => match raw.parse::<u32>() {
                Ok(value) if value > 0 => value,
                _ => {
                    warn!(
                        "Invalid DATABASE_MAX_CONNECTIONS '{}', using default: {}",
                        raw, defaults.max_connections
                    );
                    defaults.max_connections
                }
            },
            Err(_) => defaults.max_connections,
        };

        let log_queries = std::env::var("DATABASE_LOG_QUERIES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.log_queries);

        Self {
            url,
            max_connections,
            log_queries,
        }
    }
}

#[cfg(test)]
pub(crate) async fn test_pool() -> DbPool {
    init_database(&DatabaseConfig::in_memory())
        .await
        .expect("in-memory database")
}
