//! Password hashing, bearer sessions and the authentication middleware.
//!
//! Passwords are stored as `pbkdf2_sha256$<iterations>$<salt_hex>$<key_hex>`.
//! The password is first keyed with the server pepper (HMAC-SHA256), then
//! stretched with PBKDF2-HMAC-SHA256. Session tokens are random 32-byte
//! values handed to the client once; only their SHA-256 digest is stored.

use crate::application::error::ApiError;
use crate::application::state::AppState;
use crate::domain::entities::User;
use crate::persistence::repository::{AuthTokenRepository, UserRepository};
use crate::persistence::DatabaseError;
use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::{Digest, Sha256};
use sqlx::SqliteConnection;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

const HASH_SCHEME: &str = "pbkdf2_sha256";
const SALT_BYTES: usize = 16;
const KEY_BYTES: usize = 32;
const TOKEN_BYTES: usize = 32;
/// Upper bound on the work factor read back from a stored hash.
const MAX_HASH_ITERATIONS: u32 = 10_000_000;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Authentication required.")]
    MissingToken,

    #[error("Invalid Authorization header (expected Bearer token).")]
    MalformedHeader,

    #[error("Invalid or expired session.")]
    InvalidToken,

    #[error("Invalid credentials.")]
    InvalidCredentials,

    #[error("{0}")]
    Blocked(String),

    #[error("Password hashing failed")]
    Hashing,

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Peppered PBKDF2 password hashing.
pub struct PasswordHasher {
    pepper: Zeroizing<Vec<u8>>,
    iterations: u32,
    /// Checked against when the account does not exist, so unknown logins
    /// cost the same as wrong passwords.
    dummy: String,
}

impl PasswordHasher {
    pub fn new(pepper: &str, iterations: u32) -> Self {
        let mut hasher = Self {
            pepper: Zeroizing::new(pepper.as_bytes().to_vec()),
            iterations: iterations.clamp(1, MAX_HASH_ITERATIONS),
            dummy: String::new(),
        };
        hasher.dummy = hasher.hash("not-a-real-password").unwrap_or_default();
        hasher
    }

    fn derive(
        &self,
        password: &str,
        salt: &[u8],
        iterations: u32,
    ) -> Result<Zeroizing<[u8; KEY_BYTES]>, AuthError> {
        let mut mac = HmacSha256::new_from_slice(&self.pepper).map_err(|_| AuthError::Hashing)?;
        mac.update(password.as_bytes());
        let mut peppered = Zeroizing::new([0u8; KEY_BYTES]);
        peppered.copy_from_slice(&mac.finalize().into_bytes());

        let mut key = Zeroizing::new([0u8; KEY_BYTES]);
        pbkdf2_hmac::<Sha256>(peppered.as_slice(), salt, iterations, key.as_mut_slice());
        Ok(key)
    }

    pub fn hash(&self, password: &str) -> Result<String, AuthError> {
        let mut salt = [0u8; SALT_BYTES];
        rand::thread_rng().fill_bytes(&mut salt);
        let key = self.derive(password, &salt, self.iterations)?;
        Ok(format!(
            "{}${}${}${}",
            HASH_SCHEME,
            self.iterations,
            hex::encode(salt),
            hex::encode(key.as_slice())
        ))
    }

    /// Constant-time check of `password` against a stored hash. The work
    /// factor comes from the stored string, so raising the configured
    /// iterations keeps older hashes valid.
    pub fn verify(&self, password: &str, stored: &str) -> bool {
        let mut parts = stored.split('$');
        let (Some(HASH_SCHEME), Some(iterations), Some(salt_hex), Some(key_hex), None) = (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) else {
            return false;
        };
        let Ok(iterations) = iterations.parse::<u32>() else {
            return false;
        };
        if !(1..=MAX_HASH_ITERATIONS).contains(&iterations) {
            return false;
        }
        let (Ok(salt), Ok(expected)) = (hex::decode(salt_hex), hex::decode(key_hex)) else {
            return false;
        };
        match self.derive(password, &salt, iterations) {
            Ok(key) => key.as_slice().ct_eq(&expected).into(),
            Err(_) => false,
        }
    }

    /// Like [`verify`](Self::verify), but an unknown account still pays for
    /// a full derivation before failing.
    pub fn verify_account(&self, password: &str, stored: Option<&str>) -> bool {
        match stored {
            Some(stored) => self.verify(password, stored),
            None => {
                self.verify(password, &self.dummy);
                false
            }
        }
    }

    /// [`hash`](Self::hash) on the blocking thread pool.
    pub async fn hash_blocking(self: &Arc<Self>, password: &str) -> Result<String, AuthError> {
        let hasher = Arc::clone(self);
        let password = Zeroizing::new(password.to_string());
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|_| AuthError::Hashing)?
    }

    /// [`verify_account`](Self::verify_account) on the blocking thread pool.
    pub async fn verify_blocking(self: &Arc<Self>, password: &str, stored: Option<String>) -> bool {
        let hasher = Arc::clone(self);
        let password = Zeroizing::new(password.to_string());
        tokio::task::spawn_blocking(move || hasher.verify_account(&password, stored.as_deref()))
            .await
            .unwrap_or(false)
    }
}

/// A freshly minted session token and the digest to store.
pub struct IssuedToken {
    pub token: String,
    pub digest: String,
}

pub fn issue_token() -> IssuedToken {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    let token = URL_SAFE_NO_PAD.encode(bytes);
    let digest = token_digest(&token);
    IssuedToken { token, digest }
}

pub fn token_digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Extract the bearer token from an `Authorization` header.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let header = headers
        .get(AUTHORIZATION)
        .ok_or(AuthError::MissingToken)?
        .to_str()
        .map_err(|_| AuthError::MalformedHeader)?;
    match header.strip_prefix("Bearer ") {
        Some(token) if !token.trim().is_empty() => Ok(token.trim()),
        _ => Err(AuthError::MalformedHeader),
    }
}

/// Resolve a bearer token to the account it belongs to.
///
/// Revoked and expired sessions are refused, and so are sessions of
/// accounts that have since been deactivated or suspended.
pub async fn authenticate(
    conn: &mut SqliteConnection,
    token: &str,
    now: DateTime<Utc>,
) -> Result<User, AuthError> {
    let session = AuthTokenRepository::new(conn)
        .get(&token_digest(token))
        .await?
        .ok_or(AuthError::InvalidToken)?;

    if session.revoked_at.is_some() || session.expires_at <= now {
        tracing::debug!("Refused stale session for user {}", session.user_id);
        return Err(AuthError::InvalidToken);
    }

    let user = UserRepository::new(conn)
        .get(session.user_id)
        .await?
        .ok_or(AuthError::InvalidToken)?;

    user.ensure_can_log_in()
        .map_err(|e| AuthError::Blocked(e.to_string()))?;

    Ok(user)
}

/// The authenticated caller, placed in request extensions by [`require_auth`].
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or(ApiError::Auth(AuthError::MissingToken))
    }
}

/// Middleware to require authentication for protected endpoints
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = match bearer_token(request.headers()) {
        Ok(token) => token.to_string(),
        Err(e) => {
            tracing::warn!("Rejected request to {}: {}", request.uri().path(), e);
            return Err(e.into());
        }
    };

    let user = {
        let mut conn = state.pool.acquire().await.map_err(DatabaseError::from)?;
        authenticate(&mut conn, &token, Utc::now()).await?
    };

    tracing::debug!("Authenticated {} ({})", user.actor_code(), user.role);
    request.extensions_mut().insert(CurrentUser(user));
    Ok(next.run(request).await)
}
