use thiserror::Error;

/// Business-rule failures raised by the domain and application layers.
///
/// Messages are user-facing: handlers return them verbatim in the
/// `message` field of the JSON error body.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DomainError {
    #[error("{entity} not found.")]
    NotFound { entity: &'static str },

    #[error("{0}")]
    PermissionDenied(String),

    #[error("{0}")]
    ActionBlocked(String),

    #[error("{0}")]
    Validation(String),

    #[error("Cannot move {entity} from {from} to {to}.")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    #[error("Only {available} {unit} available.")]
    InsufficientStock { available: String, unit: String },

    #[error("Concurrent update detected: {0}")]
    Conflict(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DomainError {
    pub fn not_found(entity: &'static str) -> Self {
        DomainError::NotFound { entity }
    }

    pub fn denied(message: impl Into<String>) -> Self {
        DomainError::PermissionDenied(message.into())
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        DomainError::Validation(message.into())
    }

    /// Whether retrying the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DomainError::Conflict(_))
    }
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid quantity: {0}")]
    InvalidQuantity(String),

    #[error("Invalid unit: {0}")]
    InvalidUnit(String),

    #[error("Value must be non-negative")]
    MustBeNonNegative,

    #[error("Value must be greater than 0")]
    MustBePositive,
}

impl From<ValidationError> for DomainError {
    fn from(error: ValidationError) -> Self {
        DomainError::Validation(error.to_string())
    }
}
