//! Entry persistence and nearest-neighbor search.
//!
//! Every entry lives in two places: a row in `entries` (text, answer, raw
//! embedding BLOB) and a row in the `entries_vec` index sharing the same
//! rowid, partitioned by collection. Functions here keep the two in step and
//! expect the caller to supply the transaction when several must commit
//! together.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::types::{require_non_empty, validate_triple, KnowledgeEntry, SimilarityMatch};
use super::{embedding_to_bytes, ensure_dimensions};
use crate::db::migrations;
use crate::error::{FaqError, FaqResult};

/// Initial KNN window fetched before tie-breaking on id.
const TIE_WINDOW: i64 = 4;

/// Largest `k` sqlite-vec accepts in a KNN query.
const MAX_KNN_WINDOW: i64 = 4096;

const ENTRY_COLUMNS: &str = "id, content, answer, collection, created_at, updated_at";

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<KnowledgeEntry> {
    Ok(KnowledgeEntry {
        id: row.get(0)?,
        content: row.get(1)?,
        answer: row.get(2)?,
        collection: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

/// Outcome of [`insert_if_absent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(i64),
    /// An entry with the same `(content, collection)` already existed.
    Skipped,
}

/// Reject vectors whose length differs from the dimension recorded at bootstrap.
fn check_stored_dimension(conn: &Connection, embedding: &[f32]) -> FaqResult<()> {
    match migrations::get_embedding_dim(conn)? {
        Some(expected) => ensure_dimensions(embedding, expected),
        None => Ok(()),
    }
}

/// Find the entry in `collection` most similar to `query`.
///
/// Similarity is `1 - cosine_distance`. Equal distances resolve to the
/// lowest entry id: the KNN window doubles until it holds a row farther than
/// the nearest one, or the whole collection, so every tied row is compared.
/// `None` if the collection has no entries.
pub fn find_most_similar(
    conn: &Connection,
    query: &[f32],
    collection: &str,
) -> FaqResult<Option<SimilarityMatch>> {
    require_non_empty("collection", collection)?;
    check_stored_dimension(conn, query)?;

    let mut stmt = conn.prepare_cached(
        "WITH knn AS (
             SELECT rowid, distance FROM entries_vec
             WHERE embedding MATCH ?1 AND k = ?2 AND collection = ?3
         )
         SELECT e.id, e.content, e.answer, e.collection, knn.distance
         FROM knn JOIN entries e ON e.id = knn.rowid
         ORDER BY knn.distance ASC, e.id ASC",
    )?;

    let mut k = TIE_WINDOW;
    loop {
        let rows = stmt
            .query_map(params![embedding_to_bytes(query), k, collection], |row| {
                Ok((
                    SimilarityMatch {
                        entry_id: row.get(0)?,
                        content: row.get(1)?,
                        answer: row.get(2)?,
                        collection: row.get(3)?,
                        score: 0.0,
                    },
                    row.get::<_, f64>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let Some(&(_, nearest)) = rows.first() else {
            return Ok(None);
        };
        let farthest = rows[rows.len() - 1].1;
        let whole_collection = (rows.len() as i64) < k;
        if farthest > nearest || whole_collection || k >= MAX_KNN_WINDOW {
            if farthest == nearest && !whole_collection {
                tracing::warn!(collection, k, "tied entries exceed the KNN window");
            }
            // sorted by (distance, id): the first row wins
            let mut rows = rows.into_iter();
            return Ok(rows.next().map(|(mut best, distance)| {
                best.score = 1.0 - distance;
                best
            }));
        }
        k = (k * 2).min(MAX_KNN_WINDOW);
    }
}

pub fn entry_exists(conn: &Connection, content: &str, collection: &str) -> FaqResult<bool> {
    Ok(conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM entries WHERE content = ?1 AND collection = ?2)",
        params![content, collection],
        |row| row.get(0),
    )?)
}

pub fn get_entry(
    conn: &Connection,
    content: &str,
    collection: &str,
) -> FaqResult<Option<KnowledgeEntry>> {
    let sql = format!("SELECT {ENTRY_COLUMNS} FROM entries WHERE content = ?1 AND collection = ?2");
    Ok(conn
        .query_row(&sql, params![content, collection], row_to_entry)
        .optional()?)
}

/// Register `collection` if it is not already known.
pub(crate) fn ensure_collection(conn: &Connection, collection: &str) -> FaqResult<()> {
    conn.execute(
        "INSERT OR IGNORE INTO collections (name, created_at) VALUES (?1, ?2)",
        params![collection, chrono::Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

pub(crate) fn insert_vec(
    conn: &Connection,
    id: i64,
    embedding: &[f32],
    collection: &str,
) -> FaqResult<()> {
    conn.execute(
        "INSERT INTO entries_vec (rowid, embedding, collection) VALUES (?1, ?2, ?3)",
        params![id, embedding_to_bytes(embedding), collection],
    )?;
    Ok(())
}

pub(crate) fn delete_vec(conn: &Connection, id: i64) -> FaqResult<()> {
    conn.execute("DELETE FROM entries_vec WHERE rowid = ?1", params![id])?;
    Ok(())
}

/// Insert a new entry. A duplicate `(content, collection)` is an
/// [`FaqError::IntegrityViolation`].
pub fn insert_entry(
    conn: &Connection,
    content: &str,
    answer: &str,
    collection: &str,
    embedding: &[f32],
) -> FaqResult<i64> {
    validate_triple(content, answer, collection)?;
    check_stored_dimension(conn, embedding)?;
    ensure_collection(conn, collection)?;

    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO entries (content, embedding, answer, collection, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
        params![content, embedding_to_bytes(embedding), answer, collection, now],
    )
    .map_err(|e| FaqError::from_write(e, format!("entry {content:?} in {collection:?}")))?;

    let id = conn.last_insert_rowid();
    insert_vec(conn, id, embedding, collection)?;
    Ok(id)
}

/// Insert unless the natural key is taken. Concurrent writers of the same
/// pair leave exactly one row.
pub fn insert_if_absent(
    conn: &Connection,
    content: &str,
    answer: &str,
    collection: &str,
    embedding: &[f32],
) -> FaqResult<InsertOutcome> {
    validate_triple(content, answer, collection)?;
    check_stored_dimension(conn, embedding)?;
    ensure_collection(conn, collection)?;

    let now = chrono::Utc::now().to_rfc3339();
    let changed = conn
        .execute(
            "INSERT INTO entries (content, embedding, answer, collection, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT(content, collection) DO NOTHING",
            params![content, embedding_to_bytes(embedding), answer, collection, now],
        )
        .map_err(|e| FaqError::from_write(e, format!("entry {content:?} in {collection:?}")))?;

    if changed == 0 {
        return Ok(InsertOutcome::Skipped);
    }

    let id = conn.last_insert_rowid();
    insert_vec(conn, id, embedding, collection)?;
    Ok(InsertOutcome::Inserted(id))
}

/// Replace the answer and embedding of entry `id`. The vector row is
/// deleted and re-inserted since vec0 does not update in place.
pub fn update_entry(conn: &Connection, id: i64, answer: &str, embedding: &[f32]) -> FaqResult<()> {
    require_non_empty("answer", answer)?;
    check_stored_dimension(conn, embedding)?;

    let collection: String = conn
        .query_row(
            "SELECT collection FROM entries WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()?
        .ok_or_else(|| FaqError::NotFound(format!("entry {id}")))?;

    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "UPDATE entries SET answer = ?1, embedding = ?2, updated_at = ?3 WHERE id = ?4",
        params![answer, embedding_to_bytes(embedding), now, id],
    )
    .map_err(|e| FaqError::from_write(e, format!("entry {id}")))?;

    delete_vec(conn, id)?;
    insert_vec(conn, id, embedding, &collection)
}

/// Remove the entry keyed by `(content, collection)` and its vector.
pub fn delete_entry(conn: &mut Connection, content: &str, collection: &str) -> FaqResult<()> {
    let tx = conn.transaction()?;
    let id: i64 = tx
        .query_row(
            "SELECT id FROM entries WHERE content = ?1 AND collection = ?2",
            params![content, collection],
            |row| row.get(0),
        )
        .optional()?
        .ok_or_else(|| FaqError::NotFound(format!("entry {content:?} in {collection:?}")))?;

    delete_vec(&tx, id)?;
    tx.execute("DELETE FROM entries WHERE id = ?1", params![id])?;
    tx.commit()?;

    tracing::debug!(id, collection, "entry deleted");
    Ok(())
}

/// Entries of `collection`, oldest first.
pub fn list_entries(
    conn: &Connection,
    collection: &str,
    limit: usize,
) -> FaqResult<Vec<KnowledgeEntry>> {
    let sql = format!(
        "SELECT {ENTRY_COLUMNS} FROM entries WHERE collection = ?1 ORDER BY id ASC LIMIT ?2"
    );
    let mut stmt = conn.prepare(&sql)?;
    let entries = stmt
        .query_map(params![collection, limit as i64], row_to_entry)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_database;

    fn db() -> Connection {
        let conn = open_memory_database(4);
        migrations::set_meta(&conn, migrations::META_EMBEDDING_DIM, "4").unwrap();
        conn
    }

    #[test]
    fn nearest_entry_scores_one_for_identical_vector() {
        let conn = db();
        insert_entry(&conn, "How do I reset my password?", "Use the portal.", "faq", &[1.0, 0.0, 0.0, 0.0]).unwrap();
        insert_entry(&conn, "Where is the office?", "Building 4.", "faq", &[0.0, 1.0, 0.0, 0.0]).unwrap();

        let hit = find_most_similar(&conn, &[1.0, 0.0, 0.0, 0.0], "faq")
            .unwrap()
            .unwrap();
        assert_eq!(hit.content, "How do I reset my password?");
        assert!((hit.score - 1.0).abs() < 1e-5, "score was {}", hit.score);
    }

    #[test]
    fn search_is_scoped_to_collection() {
        let conn = db();
        insert_entry(&conn, "q", "in a", "a", &[1.0, 0.0, 0.0, 0.0]).unwrap();
        insert_entry(&conn, "q", "in b", "b", &[0.0, 1.0, 0.0, 0.0]).unwrap();

        let hit = find_most_similar(&conn, &[1.0, 0.0, 0.0, 0.0], "b")
            .unwrap()
            .unwrap();
        assert_eq!(hit.answer, "in b");
        assert!(hit.score < 0.5);
    }

    #[test]
    fn empty_collection_has_no_match() {
        let conn = db();
        assert!(find_most_similar(&conn, &[1.0, 0.0, 0.0, 0.0], "faq")
            .unwrap()
            .is_none());
    }

    #[test]
    fn ties_resolve_to_lowest_id() {
        let conn = db();
        let first = insert_entry(&conn, "first", "a1", "faq", &[0.0, 0.0, 1.0, 0.0]).unwrap();
        insert_entry(&conn, "second", "a2", "faq", &[0.0, 0.0, 1.0, 0.0]).unwrap();

        let hit = find_most_similar(&conn, &[0.0, 0.0, 1.0, 0.0], "faq")
            .unwrap()
            .unwrap();
        assert_eq!(hit.entry_id, first);
    }

    #[test]
    fn ties_wider_than_the_initial_window_still_pick_lowest_id() {
        let conn = db();
        let tied = [0.0, 0.0, 1.0, 0.0];
        insert_entry(&conn, "closer", "a", "other", &tied).unwrap();
        let ids: Vec<i64> = (0..9)
            .map(|i| insert_entry(&conn, &format!("tie{i}"), "a", "faq", &tied).unwrap())
            .collect();
        insert_entry(&conn, "farther", "a", "faq", &[1.0, 0.0, 0.0, 0.0]).unwrap();

        let hit = find_most_similar(&conn, &tied, "faq").unwrap().unwrap();
        assert_eq!(hit.entry_id, ids[0]);
        assert_eq!(hit.content, "tie0");
        assert!((hit.score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn duplicate_insert_is_integrity_violation() {
        let conn = db();
        insert_entry(&conn, "q", "a", "faq", &[1.0, 0.0, 0.0, 0.0]).unwrap();
        let err = insert_entry(&conn, "q", "other", "faq", &[1.0, 0.0, 0.0, 0.0]).unwrap_err();
        assert!(matches!(err, FaqError::IntegrityViolation(_)), "got {err:?}");
    }

    #[test]
    fn insert_if_absent_skips_existing_pair() {
        let conn = db();
        let v = [1.0, 0.0, 0.0, 0.0];
        assert!(matches!(
            insert_if_absent(&conn, "q", "a", "faq", &v).unwrap(),
            InsertOutcome::Inserted(_)
        ));
        assert_eq!(
            insert_if_absent(&conn, "q", "a2", "faq", &v).unwrap(),
            InsertOutcome::Skipped
        );
        assert_eq!(list_entries(&conn, "faq", 10).unwrap().len(), 1);
        assert_eq!(get_entry(&conn, "q", "faq").unwrap().unwrap().answer, "a");
    }

    #[test]
    fn wrong_dimension_is_rejected() {
        let conn = db();
        let err = insert_entry(&conn, "q", "a", "faq", &[1.0, 0.0]).unwrap_err();
        assert!(matches!(
            err,
            FaqError::DimensionMismatch {
                expected: 4,
                actual: 2
            }
        ));
        let err = find_most_similar(&conn, &[1.0; 5], "faq").unwrap_err();
        assert!(matches!(err, FaqError::DimensionMismatch { .. }));
    }

    #[test]
    fn update_replaces_answer_and_vector() {
        let conn = db();
        let id = insert_entry(&conn, "q", "old", "faq", &[1.0, 0.0, 0.0, 0.0]).unwrap();
        update_entry(&conn, id, "new", &[0.0, 1.0, 0.0, 0.0]).unwrap();

        let hit = find_most_similar(&conn, &[0.0, 1.0, 0.0, 0.0], "faq")
            .unwrap()
            .unwrap();
        assert_eq!(hit.entry_id, id);
        assert_eq!(hit.answer, "new");
        assert!((hit.score - 1.0).abs() < 1e-5);
    }

    #[test]
    fn update_missing_entry_is_not_found() {
        let conn = db();
        let err = update_entry(&conn, 99, "a", &[1.0, 0.0, 0.0, 0.0]).unwrap_err();
        assert!(matches!(err, FaqError::NotFound(_)));
    }

    #[test]
    fn delete_removes_entry_and_vector() {
        let mut conn = db();
        insert_entry(&conn, "q", "a", "faq", &[1.0, 0.0, 0.0, 0.0]).unwrap();
        delete_entry(&mut conn, "q", "faq").unwrap();

        assert!(!entry_exists(&conn, "q", "faq").unwrap());
        let vec_rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM entries_vec", [], |r| r.get(0))
            .unwrap();
        assert_eq!(vec_rows, 0);
        assert!(matches!(
            delete_entry(&mut conn, "q", "faq"),
            Err(FaqError::NotFound(_))
        ));
    }

    #[test]
    fn blank_fields_are_invalid() {
        let conn = db();
        assert!(matches!(
            insert_entry(&conn, "", "a", "faq", &[1.0, 0.0, 0.0, 0.0]),
            Err(FaqError::InvalidArgument(_))
        ));
        assert!(matches!(
            find_most_similar(&conn, &[1.0, 0.0, 0.0, 0.0], " "),
            Err(FaqError::InvalidArgument(_))
        ));
    }
}
