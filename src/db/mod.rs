//! SQLite storage plumbing: sqlite-vec registration, the bounded connection
//! pool, schema DDL, forward-only migrations, and the bootstrap controller.

pub mod bootstrap;
pub mod migrations;
pub mod schema;

use r2d2::{CustomizeConnection, Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use serde::Serialize;
use sqlite_vec::sqlite3_vec_init;
use std::path::Path;
use std::sync::Once;
use std::time::Duration;

use crate::config::StorageConfig;
use crate::error::FaqResult;

static SQLITE_VEC_INIT: Once = Once::new();

pub type DbPool = Pool<SqliteConnectionManager>;

/// A connection checked out of the pool for one logical operation. It goes
/// back to the pool when dropped, whichever way the operation exits.
pub type UnitOfWork = PooledConnection<SqliteConnectionManager>;

/// Register the sqlite-vec extension globally. Safe to call multiple times.
pub fn load_sqlite_vec() {
    SQLITE_VEC_INIT.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite3_vec_init as *const (),
        )));
    });
}

/// Per-connection settings applied every time the pool hands a connection out.
#[derive(Debug)]
struct ConnectionSettings;

impl CustomizeConnection<Connection, rusqlite::Error> for ConnectionSettings {
    fn on_acquire(&self, conn: &mut Connection) -> Result<(), rusqlite::Error> {
        conn.busy_timeout(Duration::from_millis(5000))?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(())
    }
}

/// Open a bounded pool over the database file at `path`.
///
/// Holds `pool_size` idle connections and allows up to `max_overflow` more
/// under load. Acquisition waits at most `pool_timeout_secs`.
pub fn open_pool(path: impl AsRef<Path>, config: &StorageConfig) -> FaqResult<DbPool> {
    load_sqlite_vec();

    let manager = SqliteConnectionManager::file(path.as_ref()).with_init(|conn| {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Ok(())
    });

    let pool = Pool::builder()
        .max_size(config.pool_size + config.max_overflow)
        .min_idle(Some(config.pool_size))
        .connection_timeout(config.pool_timeout())
        .connection_customizer(Box::new(ConnectionSettings))
        .build(manager)?;

    tracing::debug!(
        path = %path.as_ref().display(),
        pool_size = config.pool_size,
        max_overflow = config.max_overflow,
        "connection pool ready"
    );
    Ok(pool)
}

/// Version string reported by the loaded sqlite-vec extension.
pub fn sqlite_vec_version(conn: &Connection) -> rusqlite::Result<String> {
    conn.query_row("SELECT vec_version()", [], |r| r.get(0))
}

/// Summary produced by [`check_database_health`].
#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub schema_version: u32,
    pub sqlite_vec_version: String,
    pub embedding_model: Option<String>,
    pub embedding_dim: Option<usize>,
    pub entry_count: i64,
    pub collection_count: i64,
    pub integrity_ok: bool,
    pub integrity_details: String,
}

/// Run `PRAGMA integrity_check` and gather row counts.
pub fn check_database_health(conn: &Connection) -> rusqlite::Result<HealthReport> {
    let integrity_details: String =
        conn.query_row("PRAGMA integrity_check", [], |r| r.get(0))?;
    let entry_count: i64 = conn.query_row("SELECT COUNT(*) FROM entries", [], |r| r.get(0))?;
    let collection_count: i64 =
        conn.query_row("SELECT COUNT(*) FROM collections", [], |r| r.get(0))?;

    Ok(HealthReport {
        schema_version: migrations::get_schema_version(conn)?,
        sqlite_vec_version: sqlite_vec_version(conn)?,
        embedding_model: migrations::get_meta(conn, migrations::META_EMBEDDING_MODEL)?,
        embedding_dim: migrations::get_embedding_dim(conn)?,
        entry_count,
        collection_count,
        integrity_ok: integrity_details == "ok",
        integrity_details,
    })
}

/// Open an in-memory database with the full schema, for unit tests.
#[cfg(test)]
pub fn open_memory_database(dimensions: usize) -> Connection {
    load_sqlite_vec();
    let conn = Connection::open_in_memory().expect("in-memory database");
    conn.pragma_update(None, "foreign_keys", "ON").unwrap();
    schema::init_schema(&conn, dimensions).unwrap();
    migrations::run_migrations(&conn).unwrap();
    conn
}
