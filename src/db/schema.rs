//! SQL DDL for the knowledge base.
//!
//! Defines `collections`, `entries`, the `entries_vec` vec0 index, and
//! `schema_meta`. All DDL uses `IF NOT EXISTS` so initialization is idempotent.

use rusqlite::Connection;

const SCHEMA_SQL: &str = r#"
-- Collection registry; a collection may have zero entries
CREATE TABLE IF NOT EXISTS collections (
    name TEXT PRIMARY KEY CHECK(length(name) > 0),
    created_at TEXT NOT NULL
);

-- Question/answer pairs, natural key (content, collection)
CREATE TABLE IF NOT EXISTS entries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    content TEXT NOT NULL CHECK(length(content) > 0),
    embedding BLOB NOT NULL,
    answer TEXT NOT NULL CHECK(length(answer) > 0),
    collection TEXT NOT NULL CHECK(length(collection) > 0),
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(content, collection)
);

CREATE INDEX IF NOT EXISTS idx_entries_collection ON entries(collection);

-- Schema metadata
CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// The vec0 table is the approximate-nearest-neighbor index. Cosine distance,
/// partitioned by collection so a KNN query only scans one collection.
fn vec_table_sql(dimensions: usize) -> String {
    format!(
        "CREATE VIRTUAL TABLE IF NOT EXISTS entries_vec USING vec0(
            embedding float[{dimensions}] distance_metric=cosine,
            collection text partition key
        );"
    )
}

/// Names of every table and index the knowledge base needs.
pub const REQUIRED_TABLES: [&str; 4] = ["collections", "entries", "entries_vec", "schema_meta"];
pub const REQUIRED_INDEXES: [&str; 1] = ["idx_entries_collection"];

/// Initialize all schema tables. Idempotent (uses IF NOT EXISTS).
pub fn init_schema(conn: &Connection, dimensions: usize) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute_batch(&vec_table_sql(dimensions))?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', '1')",
        [],
    )?;

    Ok(())
}

/// Whether `name` exists in `sqlite_master` as a table or index.
pub fn object_exists(conn: &Connection, name: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE name = ?1)",
        [name],
        |row| row.get(0),
    )
}

/// Whether every required table and index is already present.
pub fn schema_complete(conn: &Connection) -> rusqlite::Result<bool> {
    for name in REQUIRED_TABLES.iter().chain(REQUIRED_INDEXES.iter()) {
        if !object_exists(conn, name)? {
            return Ok(false);
        }
    }
    Ok(true)
}
