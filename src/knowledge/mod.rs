pub mod collections;
pub mod store;
pub mod types;

use rusqlite::Connection;

use crate::db::{DbPool, UnitOfWork};
use crate::error::{FaqError, FaqResult};
use types::SimilarityMatch;

/// Convert an f32 embedding slice to raw bytes for sqlite-vec.
pub fn embedding_to_bytes(embedding: &[f32]) -> &[u8] {
    unsafe {
        std::slice::from_raw_parts(
            embedding.as_ptr() as *const u8,
            embedding.len() * std::mem::size_of::<f32>(),
        )
    }
}

/// Inverse of [`embedding_to_bytes`].
pub fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(std::mem::size_of::<f32>())
        .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Cosine similarity in `[-1, 1]`; `0.0` if either vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| *x as f64 * *y as f64).sum();
    let norm_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Fail with [`FaqError::DimensionMismatch`] unless `embedding` has `expected` components.
pub fn ensure_dimensions(embedding: &[f32], expected: usize) -> FaqResult<()> {
    if embedding.len() != expected {
        return Err(FaqError::DimensionMismatch {
            expected,
            actual: embedding.len(),
        });
    }
    Ok(())
}

/// Shared handle to the knowledge base: the connection pool plus the
/// configured vector dimension. Cheap to clone.
#[derive(Clone)]
pub struct KnowledgeStore {
    pool: DbPool,
    dimensions: usize,
}

impl KnowledgeStore {
    pub fn new(pool: DbPool, dimensions: usize) -> Self {
        Self { pool, dimensions }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Check a connection out of the pool for one logical operation.
    pub fn unit_of_work(&self) -> FaqResult<UnitOfWork> {
        Ok(self.pool.get()?)
    }

    /// Run blocking storage work on a pooled connection off the async executor.
    pub async fn run<T, F>(&self, f: F) -> FaqResult<T>
    where
        F: FnOnce(&mut Connection) -> FaqResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            f(&mut conn)
        })
        .await
        .map_err(|e| FaqError::Internal(format!("storage task failed: {e}")))?
    }

    /// Nearest-neighbor lookup in `collection`, executed inside SQLite.
    pub async fn find_most_similar(
        &self,
        query: Vec<f32>,
        collection: String,
    ) -> FaqResult<Option<SimilarityMatch>> {
        ensure_dimensions(&query, self.dimensions)?;
        self.run(move |conn| store::find_most_similar(conn, &query, &collection))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_round_trip_preserves_values() {
        let v = vec![0.25f32, -1.5, 3.0];
        assert_eq!(bytes_to_embedding(embedding_to_bytes(&v)), v);
    }

    #[test]
    fn cosine_of_vector_with_itself_is_one() {
        let v = vec![0.3f32, -0.2, 0.9, 0.1];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn cosine_of_orthogonal_vectors_is_zero() {
        let a = vec![1.0f32, 0.0, 0.0];
        let b = vec![0.0f32, 5.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-9);
    }

    #[test]
    fn cosine_with_zero_vector_is_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn dimension_check() {
        assert!(ensure_dimensions(&[0.0; 4], 4).is_ok());
        assert!(matches!(
            ensure_dimensions(&[0.0; 3], 4),
            Err(FaqError::DimensionMismatch {
                expected: 4,
                actual: 3
            })
        ));
    }
}
