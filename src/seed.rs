//! Initial population of the knowledge base from an FAQ JSON file.
//!
//! The file looks like `{"faqs": [{"question": "...", "answer": "..."}]}`.
//! Records go through the add pipeline inline, so seeding the same file
//! twice leaves the store unchanged.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{FaqError, FaqResult};
use crate::knowledge::types::TaskItem;
use crate::writeback::{PipelineReport, WritebackPipeline};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FaqRecord {
    pub question: String,
    pub answer: String,
}

#[derive(Debug, Deserialize)]
struct FaqFile {
    faqs: Vec<FaqRecord>,
}

/// Read up to `limit` records from `path` (all of them if `None`).
pub fn load_faq_file(path: &Path, limit: Option<usize>) -> FaqResult<Vec<FaqRecord>> {
    let raw = std::fs::read_to_string(path)?;
    let file: FaqFile = serde_json::from_str(&raw).map_err(|e| {
        FaqError::InvalidArgument(format!("invalid FAQ file {}: {e}", path.display()))
    })?;

    let mut faqs = file.faqs;
    match limit {
        Some(limit) => {
            tracing::info!(limit, available = faqs.len(), "loading FAQ entries");
            faqs.truncate(limit);
        }
        None => tracing::info!(available = faqs.len(), "loading all FAQ entries"),
    }
    Ok(faqs)
}

/// Write `records` into `collection` through the add pipeline.
pub async fn seed_knowledge_base(
    pipeline: &WritebackPipeline,
    records: &[FaqRecord],
    collection: &str,
) -> PipelineReport {
    let items: Vec<TaskItem> = records
        .iter()
        .map(|r| TaskItem::new(r.question.as_str(), r.answer.as_str(), collection))
        .collect();
    let report = pipeline.add_entries(&items).await;
    tracing::info!(
        collection,
        inserted = report.inserted,
        skipped = report.skipped,
        "knowledge base seeded"
    );
    report
}
