// src/feedback/mod.rs

mod audit;

pub use audit::CorrectionLog;

use std::collections::HashMap;

use chrono::Utc;
use log::{info, warn};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::classify::cosine_similarity;
use crate::config::{
    CORRECTION_WEIGHT, DEFAULT_EXAMPLE_WEIGHT, DUPLICATE_EXAMPLE_THRESHOLD,
    EXAMPLE_RECENCY_HALF_LIFE_DAYS, MAX_EXAMPLES_PER_ENTRY, MIN_EXAMPLES_FOR_REFRESH,
};
use crate::embedding::EmbeddingProvider;
use crate::models::{
    CorrectionRecord, CtiEntry, CtiEntryId, ExampleProvenance, ExampleSource, FewShotExample,
    TrainingExample,
};

// Examples aggregated when refreshing an entry vector from its tickets
const MAX_REFRESH_EXAMPLES: usize = 8;

struct StoredFewShot {
    example: FewShotExample,
    /// Cached at insert time so duplicate checks embed only the new text
    embedding: Option<Vec<f32>>,
}

struct FeedbackState {
    training: Vec<TrainingExample>,
    few_shot: HashMap<CtiEntryId, Vec<StoredFewShot>>,
}

/// Corrections, training examples, and per-entry real-ticket examples.
///
/// This is retrieval-based few-shot construction, not gradient learning:
/// weights only bias which examples reach the prompt.
pub struct FeedbackStore {
    inner: RwLock<FeedbackState>,
    log: Option<CorrectionLog>,
}

impl FeedbackStore {
    pub fn new(log: Option<CorrectionLog>) -> Self {
        FeedbackStore {
            inner: RwLock::new(FeedbackState {
                training: Vec::new(),
                few_shot: HashMap::new(),
            }),
            log,
        }
    }

    /// Records an engineer correction: one weighted training example, one
    /// per-entry few-shot example, one audit-log line.
    ///
    /// Audit and example persistence failures are warnings, never errors —
    /// losing one training example is acceptable, losing the user-visible
    /// correction is not.
    pub async fn record_correction(
        &self,
        ticket_content: &str,
        original_prediction: Option<CtiEntry>,
        corrected_to: CtiEntry,
        corrected_by: &str,
        confidence_before: Option<f64>,
        embedder: &dyn EmbeddingProvider,
    ) -> CorrectionRecord {
        self.add_training_example(
            ticket_content,
            corrected_to.id,
            ExampleProvenance::Correction,
            CORRECTION_WEIGHT,
        )
        .await;

        self.add_few_shot_example(
            &corrected_to,
            ticket_content,
            ExampleSource::Corrected,
            confidence_before.unwrap_or(1.0),
            embedder,
        )
        .await;

        let record = CorrectionRecord {
            id: Uuid::new_v4(),
            recorded_at: Utc::now(),
            ticket_content: ticket_content.to_string(),
            original_prediction,
            corrected_to,
            corrected_by: corrected_by.to_string(),
            confidence_before,
        };

        if let Some(log) = &self.log {
            if let Err(e) = log.append(&record) {
                warn!("Failed to append correction to audit log: {:#}", e);
            }
        }

        info!(
            "Recorded correction to entry {} by {}",
            record.corrected_to.id, record.corrected_by
        );
        record
    }

    /// Adds ground truth for future few-shot retrieval. Weight must be a
    /// positive multiplier; anything else falls back to the default.
    pub async fn add_training_example(
        &self,
        ticket_content: &str,
        entry_id: CtiEntryId,
        provenance: ExampleProvenance,
        weight: f64,
    ) {
        let weight = if weight > 0.0 {
            weight
        } else {
            warn!(
                "Ignoring non-positive training weight {} for entry {}",
                weight, entry_id
            );
            DEFAULT_EXAMPLE_WEIGHT
        };

        let mut state = self.inner.write().await;
        state.training.push(TrainingExample {
            ticket_content: ticket_content.to_string(),
            entry_id,
            provenance,
            weight,
            created_at: Utc::now(),
        });
    }

    /// Stores a real ticket as an example for one entry, suppressing
    /// near-duplicates and trimming the per-entry store to its cap
    /// (lowest-confidence, oldest first).
    ///
    /// Returns the entry's new example count, or `None` when suppressed.
    pub async fn add_few_shot_example(
        &self,
        entry: &CtiEntry,
        ticket_content: &str,
        source: ExampleSource,
        confidence: f64,
        embedder: &dyn EmbeddingProvider,
    ) -> Option<usize> {
        let embedding = match embedder.embed(ticket_content).await {
            Ok(v) => Some(v),
            Err(e) => {
                // Without a vector the duplicate check is skipped; the
                // example is still worth keeping.
                warn!("Could not embed example for entry {}: {}", entry.id, e);
                None
            }
        };

        let mut state = self.inner.write().await;
        let examples = state.few_shot.entry(entry.id).or_default();

        if let Some(new_vec) = &embedding {
            let duplicate = examples.iter().any(|stored| {
                stored
                    .embedding
                    .as_ref()
                    .map(|v| cosine_similarity(new_vec, v) >= DUPLICATE_EXAMPLE_THRESHOLD)
                    .unwrap_or(false)
            });
            if duplicate {
                info!("Suppressed near-duplicate example for entry {}", entry.id);
                return None;
            }
        }

        examples.push(StoredFewShot {
            example: FewShotExample {
                entry_id: entry.id,
                ticket_content: ticket_content.to_string(),
                summary: summary_of(ticket_content),
                source,
                confidence,
                created_at: Utc::now(),
            },
            embedding,
        });

        while examples.len() > MAX_EXAMPLES_PER_ENTRY {
            let victim = examples
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| {
                    a.example
                        .confidence
                        .total_cmp(&b.example.confidence)
                        .then_with(|| a.example.created_at.cmp(&b.example.created_at))
                })
                .map(|(i, _)| i);
            if let Some(i) = victim {
                examples.remove(i);
            }
        }

        Some(examples.len())
    }

    /// Few-shot examples for the judge prompt: examples whose entry is a
    /// current candidate come first, then weight descending, then recency
    /// descending, capped.
    pub async fn global_examples(
        &self,
        candidate_ids: &[CtiEntryId],
        max: usize,
    ) -> Vec<TrainingExample> {
        let state = self.inner.read().await;
        let mut examples: Vec<&TrainingExample> = state.training.iter().collect();
        examples.sort_by(|a, b| {
            let a_preferred = candidate_ids.contains(&a.entry_id);
            let b_preferred = candidate_ids.contains(&b.entry_id);
            b_preferred
                .cmp(&a_preferred)
                .then_with(|| b.weight.total_cmp(&a.weight))
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        examples.into_iter().take(max).cloned().collect()
    }

    /// Per-entry real-ticket examples, highest confidence first.
    pub async fn candidate_examples(
        &self,
        entry_id: CtiEntryId,
        max: usize,
    ) -> Vec<FewShotExample> {
        let state = self.inner.read().await;
        let Some(examples) = state.few_shot.get(&entry_id) else {
            return Vec::new();
        };
        let mut sorted: Vec<&StoredFewShot> = examples.iter().collect();
        sorted.sort_by(|a, b| {
            b.example
                .confidence
                .total_cmp(&a.example.confidence)
                .then_with(|| b.example.created_at.cmp(&a.example.created_at))
        });
        sorted
            .into_iter()
            .take(max)
            .map(|stored| stored.example.clone())
            .collect()
    }

    /// Whether any training example references the entry. Removal of a
    /// referenced entry is rejected at the pipeline boundary.
    pub async fn references(&self, entry_id: CtiEntryId) -> bool {
        let state = self.inner.read().await;
        state.training.iter().any(|e| e.entry_id == entry_id)
    }

    pub async fn example_count(&self, entry_id: CtiEntryId) -> usize {
        let state = self.inner.read().await;
        state.few_shot.get(&entry_id).map_or(0, |e| e.len())
    }

    /// Snapshot handed to the persistence collaborator.
    pub async fn training_examples(&self) -> Vec<TrainingExample> {
        let state = self.inner.read().await;
        state.training.clone()
    }

    /// Aggregates an entry's stored ticket examples into a replacement
    /// vector: confidence-weighted mean with a recency half-life. Needs a
    /// minimum number of examples; returns `None` below it so the caller
    /// keeps the field-based vector.
    pub async fn refresh_vector_from_examples(
        &self,
        entry_id: CtiEntryId,
        embedder: &dyn EmbeddingProvider,
    ) -> Option<Vec<f32>> {
        let selected: Vec<(FewShotExample, Option<Vec<f32>>)> = {
            let state = self.inner.read().await;
            let examples = state.few_shot.get(&entry_id)?;
            if examples.len() < MIN_EXAMPLES_FOR_REFRESH {
                return None;
            }
            let mut sorted: Vec<&StoredFewShot> = examples.iter().collect();
            sorted.sort_by(|a, b| {
                b.example
                    .confidence
                    .total_cmp(&a.example.confidence)
                    .then_with(|| b.example.created_at.cmp(&a.example.created_at))
            });
            sorted
                .into_iter()
                .take(MAX_REFRESH_EXAMPLES)
                .map(|stored| (stored.example.clone(), stored.embedding.clone()))
                .collect()
        };

        let now = Utc::now();
        let mut sum: Vec<f64> = Vec::new();
        let mut total_weight = 0.0f64;

        for (example, cached) in selected {
            let vector = match cached {
                Some(v) => v,
                None => match embedder.embed(&example.ticket_content).await {
                    Ok(v) => v,
                    Err(e) => {
                        warn!("Skipping example while refreshing {}: {}", entry_id, e);
                        continue;
                    }
                },
            };
            let age_days = (now - example.created_at).num_days() as f64;
            let recency = 0.5f64.powf(age_days / EXAMPLE_RECENCY_HALF_LIFE_DAYS);
            let weight = example.confidence.max(0.0) * recency;
            if weight == 0.0 {
                continue;
            }
            if sum.is_empty() {
                sum = vec![0.0; vector.len()];
            } else if sum.len() != vector.len() {
                warn!("Inconsistent example vector length for {}", entry_id);
                continue;
            }
            for (acc, x) in sum.iter_mut().zip(vector.iter()) {
                *acc += weight * (*x as f64);
            }
            total_weight += weight;
        }

        if sum.is_empty() || total_weight == 0.0 {
            return None;
        }
        Some(sum.into_iter().map(|x| (x / total_weight) as f32).collect())
    }
}

/// First sentence of the combined ticket text, used as the example summary.
fn summary_of(ticket_content: &str) -> String {
    let summary = ticket_content
        .split_once(". ")
        .map(|(head, _)| head)
        .unwrap_or(ticket_content);
    summary.chars().take(200).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClassifyError;
    use crate::models::{RequestType, SlaPriority};
    use async_trait::async_trait;

    /// Deterministic hash-style embedder: distinct texts get distinct
    /// directions, identical texts collide exactly.
    struct HashEmbedder {
        dim: usize,
    }

    #[async_trait]
    impl EmbeddingProvider for HashEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, ClassifyError> {
            let mut vector = vec![0.0f32; self.dim];
            for (i, b) in text.bytes().enumerate() {
                vector[(i * 7 + b as usize) % self.dim] += 1.0;
            }
            Ok(vector)
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl EmbeddingProvider for FailingEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, ClassifyError> {
            Err(ClassifyError::EmbeddingUnavailable("down".to_string()))
        }
    }

    fn entry(id: i64) -> CtiEntry {
        CtiEntry {
            id: CtiEntryId(id),
            bu_number: "42".to_string(),
            bu_description: String::new(),
            category: "Access Management".to_string(),
            entry_type: "Password Reset".to_string(),
            item: "AD Account".to_string(),
            resolver_group: "IAM-L1".to_string(),
            resolver_group_description: String::new(),
            request_type: RequestType::Incident,
            sla: SlaPriority::P3,
            service_description: String::new(),
            times_predicted: 0,
            times_confirmed: 0,
            example_count: 0,
        }
    }

    #[tokio::test]
    async fn correction_creates_exactly_one_weighted_example() {
        let store = FeedbackStore::new(None);
        let embedder = HashEmbedder { dim: 16 };

        let record = store
            .record_correction(
                "cannot login. forgot password",
                Some(entry(1)),
                entry(2),
                "engineer.a",
                Some(0.7),
                &embedder,
            )
            .await;

        assert_eq!(record.corrected_to.id, CtiEntryId(2));

        let examples = store.training_examples().await;
        assert_eq!(examples.len(), 1);
        assert_eq!(examples[0].entry_id, CtiEntryId(2));
        assert_eq!(examples[0].weight, 1.5);
        assert_eq!(examples[0].provenance, ExampleProvenance::Correction);
        assert_eq!(store.example_count(CtiEntryId(2)).await, 1);
    }

    #[tokio::test]
    async fn near_duplicate_examples_are_suppressed() {
        let store = FeedbackStore::new(None);
        let embedder = HashEmbedder { dim: 16 };
        let target = entry(1);

        let first = store
            .add_few_shot_example(&target, "vpn will not connect", ExampleSource::Ai, 0.8, &embedder)
            .await;
        assert_eq!(first, Some(1));

        // Identical text embeds to the identical vector: cosine 1.0.
        let second = store
            .add_few_shot_example(&target, "vpn will not connect", ExampleSource::Ai, 0.9, &embedder)
            .await;
        assert_eq!(second, None);
        assert_eq!(store.example_count(CtiEntryId(1)).await, 1);
    }

    #[tokio::test]
    async fn embedding_failure_still_stores_the_example() {
        let store = FeedbackStore::new(None);
        let added = store
            .add_few_shot_example(
                &entry(1),
                "printer on fire",
                ExampleSource::Corrected,
                1.0,
                &FailingEmbedder,
            )
            .await;
        assert_eq!(added, Some(1));
    }

    #[tokio::test]
    async fn per_entry_store_trims_lowest_confidence_oldest_first() {
        let store = FeedbackStore::new(None);
        let embedder = HashEmbedder { dim: 64 };
        let target = entry(1);

        // Single-letter texts hash to disjoint slots, so none of them are
        // near-duplicates of each other.
        for i in 0..MAX_EXAMPLES_PER_ENTRY + 1 {
            let confidence = 0.5 + i as f64 * 0.04;
            let text = ((b'a' + i as u8) as char).to_string().repeat(4);
            store
                .add_few_shot_example(&target, &text, ExampleSource::Ai, confidence, &embedder)
                .await
                .expect("distinct texts must not be suppressed");
        }

        assert_eq!(store.example_count(CtiEntryId(1)).await, MAX_EXAMPLES_PER_ENTRY);
        let kept = store.candidate_examples(CtiEntryId(1), MAX_EXAMPLES_PER_ENTRY).await;
        // The lowest-confidence example (i = 0) was trimmed.
        assert!(kept.iter().all(|e| e.confidence > 0.5));
    }

    #[tokio::test]
    async fn global_examples_prefer_candidates_then_weight_then_recency() {
        let store = FeedbackStore::new(None);
        store
            .add_training_example("ticket a", CtiEntryId(1), ExampleProvenance::Manual, 2.0)
            .await;
        store
            .add_training_example("ticket b", CtiEntryId(2), ExampleProvenance::Correction, 1.5)
            .await;
        store
            .add_training_example("ticket c", CtiEntryId(2), ExampleProvenance::Initial, 1.0)
            .await;

        let examples = store.global_examples(&[CtiEntryId(2)], 5).await;
        let order: Vec<(i64, f64)> = examples.iter().map(|e| (e.entry_id.0, e.weight)).collect();
        // Entry 2 examples first (candidate preference), weight descending,
        // then the non-candidate example.
        assert_eq!(order, vec![(2, 1.5), (2, 1.0), (1, 2.0)]);

        let capped = store.global_examples(&[], 2).await;
        assert_eq!(capped.len(), 2);
    }

    #[tokio::test]
    async fn references_tracks_training_examples() {
        let store = FeedbackStore::new(None);
        assert!(!store.references(CtiEntryId(1)).await);
        store
            .add_training_example("ticket", CtiEntryId(1), ExampleProvenance::Initial, 1.0)
            .await;
        assert!(store.references(CtiEntryId(1)).await);
        assert!(!store.references(CtiEntryId(2)).await);
    }

    #[tokio::test]
    async fn refresh_needs_minimum_examples() {
        let store = FeedbackStore::new(None);
        let embedder = HashEmbedder { dim: 64 };
        let target = entry(1);

        store
            .add_few_shot_example(&target, "xxxx", ExampleSource::Ai, 0.9, &embedder)
            .await;
        assert!(store
            .refresh_vector_from_examples(CtiEntryId(1), &embedder)
            .await
            .is_none());

        store
            .add_few_shot_example(&target, "yyyy", ExampleSource::Ai, 0.9, &embedder)
            .await;
        store
            .add_few_shot_example(&target, "zzzz", ExampleSource::Ai, 0.9, &embedder)
            .await;

        let vector = store
            .refresh_vector_from_examples(CtiEntryId(1), &embedder)
            .await
            .expect("three examples suffice");
        assert_eq!(vector.len(), 64);
    }

    #[test]
    fn summary_takes_first_sentence() {
        assert_eq!(summary_of("cannot login. forgot my password"), "cannot login");
        assert_eq!(summary_of("single clause"), "single clause");
    }
}
