//! Core knowledge-base record types.
//!
//! [`KnowledgeEntry`] mirrors a row of `entries`, [`SimilarityMatch`] is the
//! result of a nearest-neighbor query, [`TaskItem`] is the unit of work the
//! write-back pipeline consumes, and [`Source`] says where an answer came from.

use serde::{Deserialize, Serialize};

use crate::error::{FaqError, FaqResult};

/// A stored question/answer pair. Natural key is `(content, collection)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KnowledgeEntry {
    pub id: i64,
    /// The question text, exactly as stored (never truncated).
    pub content: String,
    pub answer: String,
    pub collection: String,
    pub created_at: String,
    pub updated_at: String,
}

/// The best entry for a query vector within one collection.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SimilarityMatch {
    pub entry_id: i64,
    pub content: String,
    pub answer: String,
    pub collection: String,
    /// `1 - cosine_distance`; only comparable within the same collection.
    pub score: f64,
}

/// A named namespace of entries.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Collection {
    pub name: String,
    pub entry_count: i64,
    pub created_at: String,
}

/// One `(content, answer, collection)` triple submitted to the write-back pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskItem {
    pub content: String,
    pub answer: String,
    pub collection: String,
}

impl TaskItem {
    pub fn new(
        content: impl Into<String>,
        answer: impl Into<String>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            content: content.into(),
            answer: answer.into(),
            collection: collection.into(),
        }
    }

    pub fn validate(&self) -> FaqResult<()> {
        validate_triple(&self.content, &self.answer, &self.collection)
    }
}

/// Where an answer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// Matched an existing entry above the similarity threshold.
    Local,
    /// Produced by the generative backend.
    Generative,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Generative => "generative",
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub(crate) fn require_non_empty(field: &str, value: &str) -> FaqResult<()> {
    if value.trim().is_empty() {
        return Err(FaqError::InvalidArgument(format!("{field} must not be empty")));
    }
    Ok(())
}

pub(crate) fn validate_triple(content: &str, answer: &str, collection: &str) -> FaqResult<()> {
    require_non_empty("content", content)?;
    require_non_empty("answer", answer)?;
    require_non_empty("collection", collection)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Source::Local).unwrap(), "\"local\"");
        assert_eq!(
            serde_json::to_string(&Source::Generative).unwrap(),
            "\"generative\""
        );
    }

    #[test]
    fn task_item_rejects_blank_fields() {
        assert!(TaskItem::new("q", "a", "c").validate().is_ok());
        assert!(matches!(
            TaskItem::new("  ", "a", "c").validate(),
            Err(FaqError::InvalidArgument(_))
        ));
        assert!(TaskItem::new("q", "", "c").validate().is_err());
        assert!(TaskItem::new("q", "a", "").validate().is_err());
    }
}
