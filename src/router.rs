//! Per-question response routing.
//!
//! Each question walks a small state machine:
//!
//! ```text
//! ReceivedQuestion → EmbeddingComputed → Searched → LocalHit ───────────┐
//!                                                 └→ GenerativeFallback ─┴→ Responded
//! ```
//!
//! A match scoring at or above the threshold answers from the knowledge base
//! and schedules an update of that entry; anything else goes to the
//! [`Responder`] and schedules an insert of the new pair. Write-back is
//! fire-and-forget: a failed enqueue is logged, never returned. The request
//! timeout covers only the path up to the answer.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::config::FaqConfig;
use crate::embedding::EmbeddingService;
use crate::error::{FaqError, FaqResult};
use crate::knowledge::types::{SimilarityMatch, Source, TaskItem};
use crate::knowledge::KnowledgeStore;
use crate::responder::Responder;
use crate::writeback::queue::WritebackQueue;
use crate::writeback::TaskKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouterState {
    ReceivedQuestion,
    EmbeddingComputed,
    Searched,
    LocalHit,
    GenerativeFallback,
    Responded,
}

impl RouterState {
    fn can_advance_to(self, next: RouterState) -> bool {
        use RouterState::*;
        matches!(
            (self, next),
            (ReceivedQuestion, EmbeddingComputed)
                | (EmbeddingComputed, Searched)
                | (Searched, LocalHit)
                | (Searched, GenerativeFallback)
                | (LocalHit, Responded)
                | (GenerativeFallback, Responded)
        )
    }
}

/// Records the states one request passes through.
#[derive(Debug)]
struct Flow {
    states: Vec<RouterState>,
}

impl Flow {
    fn start() -> Self {
        Self {
            states: vec![RouterState::ReceivedQuestion],
        }
    }

    fn current(&self) -> RouterState {
        self.states[self.states.len() - 1]
    }

    fn advance(&mut self, next: RouterState) -> FaqResult<()> {
        let current = self.current();
        if !current.can_advance_to(next) {
            return Err(FaqError::Internal(format!(
                "illegal router transition {current:?} -> {next:?}"
            )));
        }
        tracing::trace!(from = ?current, to = ?next, "router transition");
        self.states.push(next);
        Ok(())
    }
}

/// The response to one question.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Answer {
    pub source: Source,
    pub answer: String,
    /// Stored question that matched, for local hits.
    pub matched_question: Option<String>,
    /// Best similarity found in the collection, if it had any entries.
    pub similarity: Option<f64>,
    pub collection: String,
    /// Id of the scheduled write-back task, if enqueueing succeeded.
    pub writeback_task: Option<i64>,
    #[serde(skip)]
    pub states: Vec<RouterState>,
}

/// Routing settings.
#[derive(Debug, Clone)]
pub struct RouterSettings {
    pub similarity_threshold: f64,
    pub default_collection: String,
    pub request_timeout: Duration,
}

impl From<&FaqConfig> for RouterSettings {
    fn from(config: &FaqConfig) -> Self {
        Self {
            similarity_threshold: config.matching.similarity_threshold,
            default_collection: config.matching.default_collection.clone(),
            request_timeout: config.server.request_timeout(),
        }
    }
}

pub struct Router {
    embeddings: Arc<EmbeddingService>,
    store: KnowledgeStore,
    responder: Arc<dyn Responder>,
    queue: WritebackQueue,
    settings: RouterSettings,
}

impl Router {
    pub fn new(
        embeddings: Arc<EmbeddingService>,
        store: KnowledgeStore,
        responder: Arc<dyn Responder>,
        queue: WritebackQueue,
        settings: RouterSettings,
    ) -> Self {
        Self {
            embeddings,
            store,
            responder,
            queue,
            settings,
        }
    }

    pub fn settings(&self) -> &RouterSettings {
        &self.settings
    }

    /// Answer `question` from `collection`, or the default collection.
    pub async fn answer(&self, question: &str, collection: Option<&str>) -> FaqResult<Answer> {
        if question.trim().is_empty() {
            return Err(FaqError::InvalidArgument("question must not be empty".into()));
        }
        let collection = match collection {
            Some(c) if c.trim().is_empty() => {
                return Err(FaqError::InvalidArgument("collection must not be empty".into()))
            }
            Some(c) => c.to_string(),
            None => self.settings.default_collection.clone(),
        };

        let timeout = self.settings.request_timeout;
        let (mut answer, task) =
            tokio::time::timeout(timeout, self.resolve(question, &collection))
                .await
                .map_err(|_| {
                    tracing::warn!(?timeout, collection = %collection, "question timed out");
                    FaqError::Timeout(timeout)
                })??;

        let (kind, item) = task;
        answer.writeback_task = match self.queue.enqueue(kind, vec![item]).await {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::error!(error = %e, kind = kind.as_str(), "failed to schedule write-back");
                None
            }
        };
        Ok(answer)
    }

    /// The synchronous path: embed, search, decide, respond.
    async fn resolve(
        &self,
        question: &str,
        collection: &str,
    ) -> FaqResult<(Answer, (TaskKind, TaskItem))> {
        let mut flow = Flow::start();

        let vector = self.embeddings.compute(question).await?;
        flow.advance(RouterState::EmbeddingComputed)?;

        let best = self
            .store
            .find_most_similar(vector, collection.to_string())
            .await?;
        flow.advance(RouterState::Searched)?;

        let similarity = best.as_ref().map(|m| m.score);
        let (answer, task) = match best {
            Some(hit) if hit.score >= self.settings.similarity_threshold => {
                flow.advance(RouterState::LocalHit)?;
                tracing::info!(
                    score = hit.score,
                    entry_id = hit.entry_id,
                    collection,
                    "answered from knowledge base"
                );
                local_answer(hit, collection)
            }
            best => {
                flow.advance(RouterState::GenerativeFallback)?;
                tracing::info!(
                    best_score = best.as_ref().map(|m| m.score),
                    collection,
                    "no close match; using generative backend"
                );
                let generated = self.responder.respond(question).await?;
                let task = (
                    TaskKind::Add,
                    TaskItem::new(question, generated.clone(), collection),
                );
                let answer = Answer {
                    source: Source::Generative,
                    answer: generated,
                    matched_question: None,
                    similarity,
                    collection: collection.to_string(),
                    writeback_task: None,
                    states: Vec::new(),
                };
                (answer, task)
            }
        };

        flow.advance(RouterState::Responded)?;
        Ok((
            Answer {
                similarity,
                states: flow.states,
                ..answer
            },
            task,
        ))
    }
}

fn local_answer(hit: SimilarityMatch, collection: &str) -> (Answer, (TaskKind, TaskItem)) {
    let task = (
        TaskKind::Update,
        TaskItem::new(hit.content.clone(), hit.answer.clone(), collection),
    );
    let answer = Answer {
        source: Source::Local,
        answer: hit.answer,
        matched_question: Some(hit.content),
        similarity: Some(hit.score),
        collection: collection.to_string(),
        writeback_task: None,
        states: Vec::new(),
    };
    (answer, task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use RouterState::*;

    #[test]
    fn legal_paths() {
        let mut flow = Flow::start();
        for next in [EmbeddingComputed, Searched, LocalHit, Responded] {
            flow.advance(next).unwrap();
        }
        assert_eq!(flow.current(), Responded);

        let mut flow = Flow::start();
        for next in [EmbeddingComputed, Searched, GenerativeFallback, Responded] {
            flow.advance(next).unwrap();
        }
    }

    #[test]
    fn skipping_a_state_is_rejected() {
        let mut flow = Flow::start();
        assert!(flow.advance(Searched).is_err());
        flow.advance(EmbeddingComputed).unwrap();
        flow.advance(Searched).unwrap();
        assert!(flow.advance(Responded).is_err());
    }

    #[test]
    fn answer_serializes_without_states() {
        let answer = Answer {
            source: Source::Local,
            answer: "Use the portal.".into(),
            matched_question: Some("How do I reset my password?".into()),
            similarity: Some(0.93),
            collection: "faq".into(),
            writeback_task: Some(1),
            states: vec![ReceivedQuestion],
        };
        let json = serde_json::to_value(&answer).unwrap();
        assert_eq!(json["source"], "local");
        assert!(json.get("states").is_none());
    }
}
