//! Idempotent startup setup of the knowledge base with bounded retries.
//!
//! [`bootstrap`] creates the database file if absent, registers sqlite-vec,
//! and creates the tables and indexes only if they are missing. Transient
//! failures (locking, I/O, pool exhaustion) are retried with a fixed delay;
//! schema and other storage failures abort at once. Nothing here is
//! destructive, so running it against an initialized store changes nothing.

use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

use super::{migrations, open_pool, schema, sqlite_vec_version, DbPool};
use crate::config::{BootstrapConfig, StorageConfig};
use crate::error::{FailureClass, FaqError, FaqResult};

/// Fixed-delay retry budget for bootstrap.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub delay: Duration,
}

impl From<&BootstrapConfig> for RetryPolicy {
    fn from(config: &BootstrapConfig) -> Self {
        Self {
            max_attempts: config.max_retries.max(1),
            delay: config.retry_delay(),
        }
    }
}

/// What bootstrap had to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapReport {
    pub database_created: bool,
    pub schema_created: bool,
    pub attempts: u32,
}

/// Vector settings the store must agree with.
#[derive(Debug, Clone)]
pub struct VectorSpec<'a> {
    pub dimensions: usize,
    pub model: &'a str,
}

/// Run `op` until it succeeds, retrying only transient failures.
///
/// Returns the value and the number of attempts used. Schema and fatal
/// failures become [`FaqError::DatabaseSetup`] immediately, except
/// [`FaqError::DimensionMismatch`], which is passed through unchanged.
pub fn with_retry<T>(
    policy: &RetryPolicy,
    what: &str,
    mut op: impl FnMut(u32) -> FaqResult<T>,
) -> FaqResult<(T, u32)> {
    let mut last_error = None;

    for attempt in 1..=policy.max_attempts {
        match op(attempt) {
            Ok(value) => return Ok((value, attempt)),
            Err(err @ FaqError::DimensionMismatch { .. }) => return Err(err),
            Err(err) => match err.failure_class() {
                FailureClass::Transient => {
                    tracing::warn!(
                        attempt,
                        max_attempts = policy.max_attempts,
                        error = %err,
                        "{what}: transient failure"
                    );
                    if attempt < policy.max_attempts {
                        std::thread::sleep(policy.delay);
                    }
                    last_error = Some(err);
                }
                FailureClass::Schema => {
                    tracing::error!(error = %err, "{what}: schema failure");
                    return Err(FaqError::DatabaseSetup(format!("SQL issue: {err}")));
                }
                FailureClass::Fatal => {
                    tracing::error!(error = %err, "{what}: fatal failure");
                    return Err(FaqError::DatabaseSetup(format!("database issue: {err}")));
                }
            },
        }
    }

    let last = last_error.map(|e| e.to_string()).unwrap_or_default();
    Err(FaqError::DatabaseSetup(format!(
        "{what} failed after {} attempts: {last}",
        policy.max_attempts
    )))
}

/// Create the database file (and its parent directory) if absent.
/// Returns `true` if the file was created.
pub fn create_database_if_not_exists(path: &Path) -> FaqResult<bool> {
    if path.exists() {
        tracing::info!(path = %path.display(), "database already exists");
        return Ok(false);
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            FaqError::DatabaseCreation(format!("failed to create {}: {e}", parent.display()))
        })?;
    }

    Connection::open(path).map_err(|e| {
        FaqError::DatabaseCreation(format!("failed to create {}: {e}", path.display()))
    })?;

    tracing::info!(path = %path.display(), "database created");
    Ok(true)
}

/// Create whatever part of the schema is missing and verify the vector
/// settings. Returns `true` if the schema had to be created.
pub fn setup_schema(conn: &Connection, vectors: &VectorSpec<'_>) -> FaqResult<bool> {
    let vec_version = sqlite_vec_version(conn)?;
    tracing::debug!(sqlite_vec = %vec_version, "vector extension enabled");

    let existed = schema::schema_complete(conn)?;
    if existed {
        tracing::info!("knowledge base schema already present");
    } else {
        schema::init_schema(conn, vectors.dimensions)?;
        tracing::info!(dimensions = vectors.dimensions, "knowledge base schema created");
    }
    migrations::run_migrations(conn)?;

    match migrations::get_embedding_dim(conn)? {
        None => migrations::set_meta(
            conn,
            migrations::META_EMBEDDING_DIM,
            &vectors.dimensions.to_string(),
        )?,
        Some(stored) if stored != vectors.dimensions => {
            return Err(FaqError::DimensionMismatch {
                expected: vectors.dimensions,
                actual: stored,
            });
        }
        Some(_) => {}
    }

    match migrations::get_meta(conn, migrations::META_EMBEDDING_MODEL)? {
        None => migrations::set_meta(conn, migrations::META_EMBEDDING_MODEL, vectors.model)?,
        Some(stored) if stored != vectors.model => {
            tracing::warn!(
                stored = %stored,
                configured = %vectors.model,
                "embedding model changed; stored vectors may not be comparable"
            );
        }
        Some(_) => {}
    }

    Ok(!existed)
}

/// Full startup sequence: create the file, open the pool, set up the schema.
/// Must finish before any query traffic is served.
pub fn bootstrap(
    path: &Path,
    storage: &StorageConfig,
    vectors: &VectorSpec<'_>,
    policy: &RetryPolicy,
) -> FaqResult<(DbPool, BootstrapReport)> {
    let database_created = create_database_if_not_exists(path)?;

    let ((pool, schema_created), attempts) = with_retry(policy, "database setup", |attempt| {
        tracing::debug!(attempt, "setting up database");
        let pool = open_pool(path, storage)?;
        let conn = pool.get()?;
        let created = setup_schema(&conn, vectors)?;
        drop(conn);
        Ok((pool, created))
    })?;

    let report = BootstrapReport {
        database_created,
        schema_created,
        attempts,
    };
    tracing::info!(?report, "bootstrap complete");
    Ok((pool, report))
}
