use crate::persistence::DatabaseConfig;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use zeroize::Zeroizing;

/// Minimum pepper length accepted at start-up.
const MIN_PEPPER_LENGTH: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("PASSWORD_PEPPER is not set. Generate one with: openssl rand -base64 32")]
    MissingPepper,

    #[error("PASSWORD_PEPPER must be at least {} characters long (found {0})", MIN_PEPPER_LENGTH)]
    WeakPepper(usize),

    #[error("BOOTSTRAP_ADMIN_{0} is required when any BOOTSTRAP_ADMIN_* variable is set")]
    IncompleteBootstrapAdmin(&'static str),
}

/// Outgoing email settings.
#[derive(Debug, Clone)]
pub struct MailConfig {
    pub from: String,
    /// JSON relay endpoint. Messages are only logged when unset.
    pub webhook_url: Option<String>,
    pub company_name: String,
    pub signature: String,
}

/// Outbox dispatcher settings.
#[derive(Debug, Clone)]
pub struct NotifierConfig {
    pub poll_interval: Duration,
    pub batch_size: i64,
    pub max_attempts: u32,
}

/// Super admin created at start-up when the database has no admin yet.
#[derive(Clone)]
pub struct BootstrapAdmin {
    pub username: String,
    pub email: String,
    pub mobile: String,
    pub password: Zeroizing<String>,
}

impl fmt::Debug for BootstrapAdmin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BootstrapAdmin")
            .field("username", &self.username)
            .field("email", &self.email)
            .field("mobile", &self.mobile)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Server configuration
#[derive(Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub database: DatabaseConfig,
    pub rate_limit_per_minute: u32,
    pub max_body_bytes: usize,
    pub password_pepper: Zeroizing<String>,
    /// PBKDF2 work factor for new password hashes.
    pub password_hash_iterations: u32,
    pub token_ttl_hours: i64,
    pub mail: MailConfig,
    pub notifier: NotifierConfig,
    /// Attempts for a workflow transaction that lost a race.
    pub max_transition_retries: u32,
    pub bootstrap_admin: Option<BootstrapAdmin>,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("bind_addr", &self.bind_addr)
            .field("database", &self.database)
            .field("rate_limit_per_minute", &self.rate_limit_per_minute)
            .field("max_body_bytes", &self.max_body_bytes)
            .field("password_pepper", &"<redacted>")
            .field("password_hash_iterations", &self.password_hash_iterations)
            .field("token_ttl_hours", &self.token_ttl_hours)
            .field("mail", &self.mail)
            .field("notifier", &self.notifier)
            .field("max_transition_retries", &self.max_transition_retries)
            .field("bootstrap_admin", &self.bootstrap_admin)
            .finish()
    }
}

impl AppConfig {
    /// Defaults for everything except the pepper, which has none.
    pub fn with_pepper(pepper: impl Into<String>) -> AppConfig {
        AppConfig {
            bind_addr: "0.0.0.0:8080".to_string(),
            database: DatabaseConfig::default(),
            rate_limit_per_minute: 300,
            max_body_bytes: 64 * 1024,
            password_pepper: Zeroizing::new(pepper.into()),
            password_hash_iterations: 600_000,
            token_ttl_hours: 24,
            mail: MailConfig {
                from: "no-reply@agrobroker.local".to_string(),
                webhook_url: None,
                company_name: "Agro Broker".to_string(),
                signature: "\n\nRegards,\nAgro Broker Team".to_string(),
            },
            notifier: NotifierConfig {
                poll_interval: Duration::from_secs(5),
                batch_size: 20,
                max_attempts: 5,
            },
            max_transition_retries: 3,
            bootstrap_admin: None,
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Invalid values are logged and replaced by defaults. A missing or weak
    /// pepper is fatal: stored password hashes depend on it.
    pub fn from_env() -> Result<AppConfig, ConfigError> {
        let pepper = std::env::var("PASSWORD_PEPPER").map_err(|_| ConfigError::MissingPepper)?;
        let pepper = Zeroizing::new(pepper.trim().to_string());
        if pepper.len() < MIN_PEPPER_LENGTH {
            return Err(ConfigError::WeakPepper(pepper.len()));
        }

        let mut config = AppConfig::with_pepper(String::new());
        config.password_pepper = pepper;
        config.database = DatabaseConfig::from_env();

        if let Ok(addr) = std::env::var("BIND_ADDR") {
            if addr.trim().is_empty() {
                tracing::warn!("Empty BIND_ADDR, using default: {}", config.bind_addr);
            } else {
                config.bind_addr = addr.trim().to_string();
            }
        }

        config.rate_limit_per_minute =
            env_parse("RATE_LIMIT_PER_MINUTE", config.rate_limit_per_minute, |v| *v > 0);
        config.max_body_bytes =
            env_parse("MAX_BODY_BYTES", config.max_body_bytes, |v| *v >= 1024);
        config.password_hash_iterations = env_parse(
            "PASSWORD_HASH_ITERATIONS",
            config.password_hash_iterations,
            |v| (100_000..=10_000_000).contains(v),
        );
        config.token_ttl_hours = env_parse("TOKEN_TTL_HOURS", config.token_ttl_hours, |v| {
            (1..=24 * 90).contains(v)
        });
        config.max_transition_retries = env_parse(
            "MAX_TRANSITION_RETRIES",
            config.max_transition_retries,
            |v| (1..=20).contains(v),
        );

        if let Ok(from) = std::env::var("MAIL_FROM") {
            config.mail.from = from;
        }
        config.mail.webhook_url = std::env::var("MAIL_WEBHOOK_URL")
            .ok()
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty());
        if let Ok(name) = std::env::var("COMPANY_NAME") {
            config.mail.company_name = name;
        }
        if let Ok(signature) = std::env::var("EMAIL_SIGNATURE") {
            // `\n` escapes let a .env line carry a multi-line signature.
            config.mail.signature = signature.replace("\\n", "\n");
        }

        let poll_seconds = env_parse(
            "NOTIFY_POLL_INTERVAL_SECONDS",
            config.notifier.poll_interval.as_secs(),
            |v| (1..=3600).contains(v),
        );
        config.notifier.poll_interval = Duration::from_secs(poll_seconds);
        config.notifier.batch_size =
            env_parse("NOTIFY_BATCH_SIZE", config.notifier.batch_size, |v| {
                (1..=500).contains(v)
            });
        config.notifier.max_attempts =
            env_parse("NOTIFY_MAX_ATTEMPTS", config.notifier.max_attempts, |v| {
                (1..=50).contains(v)
            });

        config.bootstrap_admin = bootstrap_admin_from_env()?;

        Ok(config)
    }
}

/// Parse `name`, keeping `default` (with a warning) when the value is
/// unparsable or rejected by `valid`.
fn env_parse<T>(name: &str, default: T, valid: impl Fn(&T) -> bool) -> T
where
    T: FromStr + fmt::Display,
    T::Err: fmt::Display,
{
    let raw = match std::env::var(name) {
        Ok(raw) => raw,
        Err(_) => return default,
    };
    match raw.trim().parse::<T>() {
        Ok(value) if valid(&value) => value,
        Ok(value) => {
            tracing::warn!("Invalid {} value: {}, using default: {}", name, value, default);
            default
        }
        Err(e) => {
            tracing::warn!(
                "Failed to parse {} '{}': {}, using default: {}",
                name,
                raw,
                e,
                default
            );
            default
        }
    }
}

fn bootstrap_admin_from_env() -> Result<Option<BootstrapAdmin>, ConfigError> {
    let read = |key: &str| {
        std::env::var(format!("BOOTSTRAP_ADMIN_{}", key))
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };
    let username = read("USERNAME");
    let email = read("EMAIL");
    let mobile = read("MOBILE");
    let password = read("PASSWORD").map(Zeroizing::new);

    if username.is_none() && email.is_none() && mobile.is_none() && password.is_none() {
        return Ok(None);
    }

    Ok(Some(BootstrapAdmin {
        username: username.ok_or(ConfigError::IncompleteBootstrapAdmin("USERNAME"))?,
        email: email.ok_or(ConfigError::IncompleteBootstrapAdmin("EMAIL"))?,
        mobile: mobile.ok_or(ConfigError::IncompleteBootstrapAdmin("MOBILE"))?,
        password: password.ok_or(ConfigError::IncompleteBootstrapAdmin("PASSWORD"))?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::with_pepper("0123456789abcdef");
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.token_ttl_hours, 24);
        assert_eq!(config.max_transition_retries, 3);
        assert_eq!(config.notifier.max_attempts, 5);
        assert!(config.mail.webhook_url.is_none());
        assert!(config.bootstrap_admin.is_none());
    }

    #[test]
    fn test_debug_hides_secrets() {
        let mut config = AppConfig::with_pepper("super-secret-pepper-value");
        config.bootstrap_admin = Some(BootstrapAdmin {
            username: "root".into(),
            email: "root@example.com".into(),
            mobile: "9000000000".into(),
            password: Zeroizing::new("hunter2hunter2".into()),
        });
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("super-secret-pepper-value"));
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("root@example.com"));
    }

    #[test]
    fn test_env_parse_keeps_default_on_bad_values() {
        std::env::set_var("AGRO_TEST_RETRIES_BAD", "many");
        assert_eq!(env_parse("AGRO_TEST_RETRIES_BAD", 3u32, |_| true), 3);

        std::env::set_var("AGRO_TEST_RETRIES_RANGE", "0");
        assert_eq!(env_parse("AGRO_TEST_RETRIES_RANGE", 3u32, |v| *v > 0), 3);

        std::env::set_var("AGRO_TEST_RETRIES_OK", " 7 ");
        assert_eq!(env_parse("AGRO_TEST_RETRIES_OK", 3u32, |v| *v > 0), 7);

        assert_eq!(env_parse("AGRO_TEST_RETRIES_UNSET", 3u32, |_| true), 3);
    }
}
