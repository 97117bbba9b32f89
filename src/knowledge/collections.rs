//! Collection administration: create, list, rename, delete.

use rusqlite::{params, Connection, OptionalExtension};

use super::bytes_to_embedding;
use super::store::{delete_vec, insert_vec};
use super::types::{require_non_empty, Collection};
use crate::error::{FaqError, FaqResult};

/// Register an empty collection. Returns `false` if it already existed.
pub fn create_collection(conn: &Connection, name: &str) -> FaqResult<bool> {
    require_non_empty("collection", name)?;
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO collections (name, created_at) VALUES (?1, ?2)",
        params![name, chrono::Utc::now().to_rfc3339()],
    )?;
    Ok(inserted > 0)
}

pub fn get_collection(conn: &Connection, name: &str) -> FaqResult<Option<Collection>> {
    Ok(conn
        .query_row(
            "SELECT c.name, c.created_at,
                    (SELECT COUNT(*) FROM entries e WHERE e.collection = c.name)
             FROM collections c WHERE c.name = ?1",
            params![name],
            |row| {
                Ok(Collection {
                    name: row.get(0)?,
                    created_at: row.get(1)?,
                    entry_count: row.get(2)?,
                })
            },
        )
        .optional()?)
}

/// Collections with their entry counts, by name.
pub fn list_collections(conn: &Connection, limit: usize) -> FaqResult<Vec<Collection>> {
    let mut stmt = conn.prepare(
        "SELECT c.name, c.created_at, COUNT(e.id)
         FROM collections c LEFT JOIN entries e ON e.collection = c.name
         GROUP BY c.name
         ORDER BY c.name
         LIMIT ?1",
    )?;
    let rows = stmt
        .query_map(params![limit as i64], |row| {
            Ok(Collection {
                name: row.get(0)?,
                created_at: row.get(1)?,
                entry_count: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Move every entry of `from` into the new collection `to`.
///
/// `to` must not exist yet. Vector rows are rebuilt from the stored
/// embeddings because the collection is their partition key. Returns the
/// number of entries moved.
pub fn rename_collection(conn: &mut Connection, from: &str, to: &str) -> FaqResult<usize> {
    require_non_empty("collection", from)?;
    require_non_empty("new collection name", to)?;

    let tx = conn.transaction()?;

    let created_at: String = tx
        .query_row(
            "SELECT created_at FROM collections WHERE name = ?1",
            params![from],
            |row| row.get(0),
        )
        .optional()?
        .ok_or_else(|| FaqError::NotFound(format!("collection {from:?}")))?;

    let taken: bool = tx.query_row(
        "SELECT EXISTS(SELECT 1 FROM collections WHERE name = ?1)",
        params![to],
        |row| row.get(0),
    )?;
    if taken {
        return Err(FaqError::IntegrityViolation(format!(
            "collection {to:?} already exists"
        )));
    }

    tx.execute(
        "INSERT INTO collections (name, created_at) VALUES (?1, ?2)",
        params![to, created_at],
    )?;

    let rows: Vec<(i64, Vec<u8>)> = {
        let mut stmt = tx.prepare("SELECT id, embedding FROM entries WHERE collection = ?1")?;
        let rows = stmt
            .query_map(params![from], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };

    tx.execute(
        "UPDATE entries SET collection = ?1 WHERE collection = ?2",
        params![to, from],
    )
    .map_err(|e| FaqError::from_write(e, format!("rename {from:?} to {to:?}")))?;

    for (id, blob) in &rows {
        delete_vec(&tx, *id)?;
        insert_vec(&tx, *id, &bytes_to_embedding(blob), to)?;
    }

    tx.execute("DELETE FROM collections WHERE name = ?1", params![from])?;
    tx.commit()?;

    tracing::info!(from, to, moved = rows.len(), "collection renamed");
    Ok(rows.len())
}

/// Delete a collection and every entry in it. Returns the number of entries removed.
pub fn delete_collection(conn: &mut Connection, name: &str) -> FaqResult<usize> {
    require_non_empty("collection", name)?;
    let tx = conn.transaction()?;

    let existed: bool = tx.query_row(
        "SELECT EXISTS(SELECT 1 FROM collections WHERE name = ?1)",
        params![name],
        |row| row.get(0),
    )?;
    if !existed {
        return Err(FaqError::NotFound(format!("collection {name:?}")));
    }

    let ids: Vec<i64> = {
        let mut stmt = tx.prepare("SELECT id FROM entries WHERE collection = ?1")?;
        let ids = stmt
            .query_map(params![name], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        ids
    };
    for id in ids {
        delete_vec(&tx, id)?;
    }
    let removed = tx.execute("DELETE FROM entries WHERE collection = ?1", params![name])?;
    tx.execute("DELETE FROM collections WHERE name = ?1", params![name])?;
    tx.commit()?;

    tracing::info!(collection = name, removed, "collection deleted");
    Ok(removed)
}
