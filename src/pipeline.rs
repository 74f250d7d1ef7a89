// src/pipeline.rs

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use log::{info, warn};

use crate::classify::{judge, select, JudgeVerdict};
use crate::config::{PipelineConfig, RetryPolicy};
use crate::embedding::{self, ChatCompletionProvider, EmbeddingProvider};
use crate::error::ClassifyError;
use crate::feedback::FeedbackStore;
use crate::index::TaxonomyIndex;
use crate::models::{
    CorrectionRecord, CtiEntry, CtiEntryId, Decision, ExampleSource, FewShotExample,
};

/// The classification core: embed, select, judge, record.
///
/// One instance is shared across concurrent classification runs; the
/// taxonomy index is the only cross-run mutable state. Each `classify` call
/// is a single sequential invocation with the two model calls as its only
/// suspension points — cancelling at either leaves no partial state.
pub struct ClassificationPipeline {
    index: Arc<TaxonomyIndex>,
    feedback: Arc<FeedbackStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    chat: Arc<dyn ChatCompletionProvider>,
    config: PipelineConfig,
}

impl ClassificationPipeline {
    pub fn new(
        index: Arc<TaxonomyIndex>,
        feedback: Arc<FeedbackStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        chat: Arc<dyn ChatCompletionProvider>,
        config: PipelineConfig,
    ) -> Self {
        ClassificationPipeline {
            index,
            feedback,
            embedder,
            chat,
            config,
        }
    }

    pub fn index(&self) -> &Arc<TaxonomyIndex> {
        &self.index
    }

    pub fn feedback(&self) -> &Arc<FeedbackStore> {
        &self.feedback
    }

    /// Classifies one ticket. Single-shot: upstream outages propagate as
    /// retryable errors, while a malformed or hallucinated judge response
    /// degrades to a "no suitable match" decision so ticket intake is never
    /// blocked.
    pub async fn classify(&self, ticket_text: &str) -> Result<Decision, ClassifyError> {
        let started = Instant::now();

        let query = self.embedder.embed(ticket_text).await?;
        let snapshot = self.index.entries_with_vectors().await;
        let candidates = select(
            &query,
            &snapshot,
            self.config.similarity_floor,
            self.config.top_k,
        );

        let candidate_ids: Vec<CtiEntryId> = candidates.iter().map(|c| c.entry.id).collect();
        let global = self.resolve_global_examples(&candidate_ids).await;
        let per_candidate = self.resolve_candidate_examples(&candidate_ids).await;

        let decision = match judge(
            self.chat.as_ref(),
            ticket_text,
            &candidates,
            &global,
            &per_candidate,
        )
        .await
        {
            Ok(JudgeVerdict::Selected {
                id,
                confidence,
                justification,
            }) => Decision {
                selected: Some(id),
                confidence,
                justification,
                candidates,
            },
            Ok(JudgeVerdict::NoMatch {
                confidence,
                justification,
            }) => Decision {
                selected: None,
                confidence,
                justification,
                candidates,
            },
            Err(
                e @ (ClassifyError::JudgeParseError(_)
                | ClassifyError::JudgeInvalidSelection { .. }),
            ) => {
                warn!("Judge response rejected, degrading to no match: {}", e);
                Decision::no_match(format!("Classification degraded: {}", e), candidates)
            }
            Err(e) => return Err(e),
        };

        let decision = self.apply_fallback(decision).await;

        if let Some(id) = decision.selected {
            self.index.note_predicted(id).await;
        }

        info!(
            "Classified ticket in {:.2?}: selected={:?} confidence={:.2}",
            started.elapsed(),
            decision.selected,
            decision.confidence
        );
        Ok(decision)
    }

    /// `classify` wrapped in a caller-owned retry policy. Only upstream
    /// unavailability is retried; degraded results come back as successful
    /// decisions and are never re-run.
    pub async fn classify_with_retry(
        &self,
        ticket_text: &str,
        policy: &RetryPolicy,
    ) -> Result<Decision, ClassifyError> {
        let mut backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(policy.initial_delay)
            .with_max_interval(policy.max_delay)
            .with_max_elapsed_time(None)
            .build();
        let mut attempt: u32 = 0;

        loop {
            match self.classify(ticket_text).await {
                Ok(decision) => return Ok(decision),
                Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                    attempt += 1;
                    let delay = backoff.next_backoff().unwrap_or(policy.max_delay);
                    warn!(
                        "Classification attempt {} failed ({}), retrying in {:.2?}",
                        attempt, e, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    //--------------------------------------------------------------------------
    // Boundary operations (ticket / CTI-admin / correction collaborators)
    //--------------------------------------------------------------------------

    /// A catalog create or edit: recompute-or-accept the entry's vector.
    pub async fn on_taxonomy_entry_changed(&self, entry: CtiEntry) -> Result<(), ClassifyError> {
        self.index.upsert(entry, self.embedder.as_ref()).await
    }

    /// A catalog delete. Rejected while training examples still reference
    /// the entry; returns whether anything was removed.
    pub async fn on_taxonomy_entry_deleted(&self, id: CtiEntryId) -> Result<bool, ClassifyError> {
        if self.feedback.references(id).await {
            return Err(ClassifyError::EntryInUse(id.0));
        }
        Ok(self.index.remove(id).await)
    }

    /// An engineer override of a prediction. Feeds the feedback loop and
    /// bumps the corrected entry's confirmed counter; the returned record is
    /// the caller's to persist.
    pub async fn on_correction(
        &self,
        ticket_text: &str,
        original_decision: &Decision,
        corrected_entry_id: CtiEntryId,
        corrected_by: &str,
    ) -> Result<CorrectionRecord, ClassifyError> {
        let corrected = self
            .index
            .get(corrected_entry_id)
            .await
            .ok_or(ClassifyError::UnknownEntry(corrected_entry_id.0))?;

        let original = match original_decision.selected {
            Some(id) => self.index.get(id).await,
            None => None,
        };

        let record = self
            .feedback
            .record_correction(
                ticket_text,
                original,
                corrected,
                corrected_by,
                Some(original_decision.confidence),
                self.embedder.as_ref(),
            )
            .await;

        self.index.note_confirmed(corrected_entry_id).await;
        let count = self.feedback.example_count(corrected_entry_id).await;
        self.index.set_example_count(corrected_entry_id, count).await;

        Ok(record)
    }

    /// An engineer accepting a prediction as-is: stores the ticket as a
    /// per-entry example without creating a correction.
    pub async fn record_successful(
        &self,
        ticket_text: &str,
        entry_id: CtiEntryId,
        confidence: f64,
        source: ExampleSource,
    ) -> Result<Option<usize>, ClassifyError> {
        let entry = self
            .index
            .get(entry_id)
            .await
            .ok_or(ClassifyError::UnknownEntry(entry_id.0))?;

        let added = self
            .feedback
            .add_few_shot_example(&entry, ticket_text, source, confidence, self.embedder.as_ref())
            .await;

        if added.is_some() {
            let count = self.feedback.example_count(entry_id).await;
            self.index.set_example_count(entry_id, count).await;
        }
        Ok(added)
    }

    //--------------------------------------------------------------------------
    // Index maintenance
    //--------------------------------------------------------------------------

    /// Embeds every indexed entry still missing a vector.
    pub async fn precompute_embeddings(&self) -> usize {
        embedding::precompute_missing(&self.index, self.embedder.as_ref()).await
    }

    /// Atomic whole-index re-embed, required after an embedding-model change.
    pub async fn rebuild_index(&self) -> Result<usize, ClassifyError> {
        self.index.rebuild(self.embedder.as_ref()).await
    }

    /// Replaces an entry's vector with the aggregate of its stored ticket
    /// examples. No-op (returns false) while the entry has too few examples.
    pub async fn refresh_entry_vector(&self, entry_id: CtiEntryId) -> Result<bool, ClassifyError> {
        let entry = self
            .index
            .get(entry_id)
            .await
            .ok_or(ClassifyError::UnknownEntry(entry_id.0))?;

        match self
            .feedback
            .refresh_vector_from_examples(entry_id, self.embedder.as_ref())
            .await
        {
            Some(vector) => {
                self.index.accept(entry, vector).await?;
                info!("Refreshed vector for entry {} from its examples", entry_id);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    //--------------------------------------------------------------------------
    // Few-shot resolution
    //--------------------------------------------------------------------------

    async fn resolve_global_examples(
        &self,
        candidate_ids: &[CtiEntryId],
    ) -> Vec<(crate::models::TrainingExample, CtiEntry)> {
        let examples = self
            .feedback
            .global_examples(candidate_ids, self.config.max_global_examples)
            .await;
        let mut resolved = Vec::with_capacity(examples.len());
        for example in examples {
            // Examples for entries removed from the index since are skipped;
            // the prompt needs the entry's current fields.
            if let Some(entry) = self.index.get(example.entry_id).await {
                resolved.push((example, entry));
            }
        }
        resolved
    }

    async fn resolve_candidate_examples(
        &self,
        candidate_ids: &[CtiEntryId],
    ) -> HashMap<CtiEntryId, Vec<FewShotExample>> {
        let mut map = HashMap::new();
        for id in candidate_ids {
            let examples = self
                .feedback
                .candidate_examples(*id, self.config.max_candidate_examples)
                .await;
            if !examples.is_empty() {
                map.insert(*id, examples);
            }
        }
        map
    }

    async fn apply_fallback(&self, decision: Decision) -> Decision {
        let Some(policy) = &self.config.fallback else {
            return decision;
        };
        let acceptable =
            decision.selected.is_some() && decision.confidence >= policy.min_confidence;
        if acceptable {
            return decision;
        }
        match self.index.get(policy.entry_id).await {
            Some(entry) => {
                info!(
                    "Routing low-confidence decision ({:.2}) to default entry {}",
                    decision.confidence, entry.id
                );
                Decision {
                    selected: Some(policy.entry_id),
                    confidence: 0.5,
                    justification: format!(
                        "Using default entry {} - {}",
                        entry.id, decision.justification
                    ),
                    candidates: decision.candidates,
                }
            }
            None => {
                warn!(
                    "Fallback entry {} is not in the index; keeping decision",
                    policy.entry_id
                );
                decision
            }
        }
    }
}
