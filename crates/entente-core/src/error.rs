//! Error types for Entente

use thiserror::Error;

/// Result type alias using Entente's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Entente error types with helpful messages and suggestions
#[derive(Error, Debug)]
pub enum Error {
    // Lookup errors (E001-E099)
    #[error("Conflict '{0}' not found. Run `entente conflicts list` to see all conflicts.")]
    ConflictNotFound(String),

    #[error("Entity '{0}' not found.")]
    EntityNotFound(String),

    #[error("Relationship '{0}' not found.")]
    RelationshipNotFound(String),

    // Authorization errors (E100-E199)
    #[error("Permission denied: user '{user_id}' may not {action}.")]
    PermissionDenied { user_id: String, action: String },

    // State errors (E200-E299)
    #[error("Conflict '{conflict_id}' cannot move from {from} to {to}.")]
    InvalidTransition {
        conflict_id: String,
        from: String,
        to: String,
    },

    #[error("Entity '{0}' is inactive (superseded). Resolve its canonical id first.")]
    EntityInactive(String),

    // Lock errors (E300-E399)
    #[error("Lock timeout: entity '{0}' is being modified by another resolution. Try again later.")]
    LockTimeout(String),

    // Database errors (E400-E499)
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Storage error: {0}")]
    StorageError(String),

    // Network / provider errors (E500-E599)
    #[error("Network error: {0}. Check your internet connection.")]
    NetworkError(#[from] reqwest::Error),

    #[error("LLM API error: {0}. Check that ENTENTE_API_KEY is set and valid.")]
    LLMError(String),

    #[error("Rate limited. Waiting {0} seconds before retry.")]
    RateLimited(u64),

    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    // Config errors (E600-E699)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Input errors (E800-E899)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic errors
    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build a permission error
    pub fn permission_denied(user_id: impl Into<String>, action: impl Into<String>) -> Self {
        Self::PermissionDenied {
            user_id: user_id.into(),
            action: action.into(),
        }
    }

    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConflictNotFound(_) => "E001",
            Self::EntityNotFound(_) => "E002",
            Self::RelationshipNotFound(_) => "E003",
            Self::PermissionDenied { .. } => "E100",
            Self::InvalidTransition { .. } => "E200",
            Self::EntityInactive(_) => "E201",
            Self::LockTimeout(_) => "E300",
            Self::DatabaseError(_) => "E400",
            Self::StorageError(_) => "E401",
            Self::NetworkError(_) => "E500",
            Self::LLMError(_) => "E501",
            Self::RateLimited(_) => "E502",
            Self::EmbeddingFailed(_) => "E503",
            Self::ConfigError(_) => "E600",
            Self::InvalidInput(_) => "E800",
            Self::Serialization(_) => "E801",
            Self::Other(_) | Self::Io(_) => "E9999",
        }
    }

    /// HTTP status an API layer should answer with
    pub fn status_code(&self) -> u16 {
        match self {
            Self::ConflictNotFound(_)
            | Self::EntityNotFound(_)
            | Self::RelationshipNotFound(_) => 404,
            Self::PermissionDenied { .. } => 403,
            Self::InvalidTransition { .. } | Self::EntityInactive(_) | Self::LockTimeout(_) => 409,
            Self::InvalidInput(_) | Self::Serialization(_) => 400,
            Self::RateLimited(_) => 429,
            _ => 500,
        }
    }

    /// Whether this is a lookup failure
    pub fn is_not_found(&self) -> bool {
        self.status_code() == 404
    }

    /// Get suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::ConflictNotFound(_) => Some("entente conflicts list".to_string()),
            Self::PermissionDenied { .. } => {
                Some("entente config set permissions.<user> expert".to_string())
            }
            Self::LockTimeout(_) => Some("retry the resolution".to_string()),
            Self::NetworkError(_) => Some("Check internet connection".to_string()),
            Self::LLMError(_) => Some("export ENTENTE_API_KEY=<key>".to_string()),
            Self::InvalidTransition { .. } => Some("entente conflicts show <id>".to_string()),
            _ => None,
        }
    }
}
