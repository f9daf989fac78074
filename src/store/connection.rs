// =============================================================================
// Store connection — Postgres pool + migrations
// =============================================================================
//
// Grounded on `AllanBico-zenith/crates/database/src/connection.rs`. The
// teacher loads a single `DATABASE_URL`; here the connection string is
// assembled from the five discrete variables documented in §6's
// "Configuration (environment)" (`DATABASE`, `DATANAME`, `DATAUSER`,
// `DATAPASS`, `DATEPORT`), mirroring `config/settings.py::Settings.db_conn_str`.
// =============================================================================

use std::env;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use super::error::StoreError;

const MAX_CONNECTIONS: u32 = 10;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Assemble the Postgres connection string from the process environment.
pub fn connection_string() -> Result<String, StoreError> {
    let host = env::var("DATABASE")
        .map_err(|_| StoreError::ConnectionConfigError("DATABASE must be set".into()))?;
    let name = env::var("DATANAME")
        .map_err(|_| StoreError::ConnectionConfigError("DATANAME must be set".into()))?;
    let user = env::var("DATAUSER")
        .map_err(|_| StoreError::ConnectionConfigError("DATAUSER must be set".into()))?;
    let pass = env::var("DATAPASS")
        .map_err(|_| StoreError::ConnectionConfigError("DATAPASS must be set".into()))?;
    let port = env::var("DATEPORT").unwrap_or_else(|_| "5432".into());

    Ok(format!("postgres://{user}:{pass}@{host}:{port}/{name}"))
}

/// Establish a connection pool to Postgres.
pub async fn connect() -> Result<PgPool, StoreError> {
    let url = connection_string()?;

    let pool = PgPoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect(&url)
        .await?;

    Ok(pool)
}

/// Run pending migrations against `pool`.
pub async fn run_migrations(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
