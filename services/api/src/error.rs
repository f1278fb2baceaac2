//! services/api/src/error.rs
//!
//! Errors that stop the storyteller service from starting or serving.
//! Request-level failures never reach this type; handlers answer them with
//! an `ErrorBody` instead.

use crate::config::ConfigError;
use storyteller_core::ports::PortError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// An environment variable held a value the service cannot use.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Story store error: {0}")]
    Port(#[from] PortError),

    /// The Postgres pool could not be opened.
    #[error("Database connection failed: {0}")]
    Database(#[from] sqlx::Error),

    /// The bundled schema could not be applied to the story database.
    #[error("Schema migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Binding the listener or serving connections failed.
    #[error("Server I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Startup wiring that has no dedicated variant, such as a bad CORS origin.
    #[error("Startup failed: {0}")]
    Internal(String),
}
