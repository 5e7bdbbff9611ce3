//! Error types for channel-relay.

use uuid::Uuid;

/// Top-level error type for the relay.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Classification error: {0}")]
    Classify(#[from] ClassifyError),

    #[error("Rewrite error: {0}")]
    Rewrite(#[from] RewriteError),

    #[error("Image generation error: {0}")]
    Image(#[from] ImageError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Platform authentication failures. Surfaced to the account owner and
/// never retried automatically; the account is left in a resumable state.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Account {0} has no stored credentials")]
    AccountNotConfigured(Uuid),

    #[error("Platform rejected the stored credentials: {reason}")]
    InvalidCredentials { reason: String },

    #[error("Confirmation code expired or revoked; request a new one")]
    CodeExpired,

    #[error("Confirmation code rejected: {reason}")]
    CodeInvalid { reason: String },

    #[error("Account requires a two-factor password, which is not supported")]
    TwoFactorUnsupported,

    #[error("Sign-in failed: {reason}")]
    SignInFailed { reason: String },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Storage error: {0}")]
    Storage(#[from] DatabaseError),
}

/// Network/platform call failures.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Platform API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Topic classification service failures. Degrade to "no topics assigned".
#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Malformed classifier response: {0}")]
    BadResponse(String),
}

/// Rewrite service failures. Degrade to the unmodified text.
#[derive(Debug, thiserror::Error)]
pub enum RewriteError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Malformed rewrite response: {0}")]
    BadResponse(String),
}

/// Image generation service failures. Degrade to text-only delivery.
#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Malformed image service response: {0}")]
    BadResponse(String),

    #[error("No generation pipeline available")]
    NoPipeline,

    #[error("Generation job failed")]
    Failed,
}

/// Result type alias for the relay.
pub type Result<T> = std::result::Result<T, Error>;
