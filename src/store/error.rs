// =============================================================================
// Store error type
// =============================================================================
//
// Grounded on `AllanBico-zenith/crates/database/src/error.rs`'s `DbError`.
// =============================================================================

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to load environment variables for database connection: {0}")]
    ConnectionConfigError(String),

    #[error("failed to connect to the database: {0}")]
    ConnectionError(#[from] sqlx::Error),

    #[error("database migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("error during JSON serialization/deserialization: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("requested row was not found")]
    NotFound,
}
