//! Unified error handling for the client.

use crate::config::ConfigError;

/// Application error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Engine error: {0}")]
    Engine(#[from] magsync_engine::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid site URL: {0}")]
    InvalidSiteUrl(String),

    #[error("Invalid session cookie: {0}")]
    InvalidCookie(#[from] reqwest::header::InvalidHeaderValue),
}

impl AppError {
    /// Whether the pass failed only because the remote was unreachable.
    pub fn is_offline(&self) -> bool {
        matches!(self, AppError::Engine(err) if err.is_offline())
    }
}

/// Result type alias for the client.
pub type Result<T> = std::result::Result<T, AppError>;
