// src/index.rs

use std::collections::HashMap;

use log::{debug, info, warn};
use tokio::sync::RwLock;

use crate::embedding::{entry_embedding_text, EmbeddingProvider};
use crate::error::ClassifyError;
use crate::models::{CtiEntry, CtiEntryId, TaxonomyRecord};

struct IndexedEntry {
    entry: CtiEntry,
    vector: Option<Vec<f32>>,
    /// The exact text the vector was computed from; a mismatch against the
    /// entry's current fields marks the vector stale.
    source_text: String,
}

struct IndexState {
    entries: HashMap<CtiEntryId, IndexedEntry>,
    /// Dimensionality established by the first accepted vector. Sticky until
    /// an explicit rebuild; never mixed.
    dimensionality: Option<usize>,
}

impl IndexState {
    fn check_dimensionality(&self, vector: &[f32]) -> Result<(), ClassifyError> {
        if let Some(expected) = self.dimensionality {
            if vector.len() != expected {
                return Err(ClassifyError::TaxonomyInconsistency {
                    expected,
                    actual: vector.len(),
                });
            }
        }
        Ok(())
    }

    /// Usage counters and example counts belong to the feedback loop, not
    /// the catalog, so they survive catalog-driven upserts.
    fn carry_counters(&self, incoming: &mut CtiEntry) {
        if let Some(existing) = self.entries.get(&incoming.id) {
            incoming.times_predicted = existing.entry.times_predicted;
            incoming.times_confirmed = existing.entry.times_confirmed;
            incoming.example_count = existing.entry.example_count;
        }
    }
}

/// Shared in-memory collection of taxonomy entries and their vectors.
///
/// Read-mostly during classification; mutation replaces whole entries under
/// the write lock, so concurrent readers observe either the pre- or
/// post-mutation vector, never a partial one.
pub struct TaxonomyIndex {
    inner: RwLock<IndexState>,
}

impl TaxonomyIndex {
    pub fn new() -> Self {
        TaxonomyIndex {
            inner: RwLock::new(IndexState {
                entries: HashMap::new(),
                dimensionality: None,
            }),
        }
    }

    /// Inserts or replaces an entry, re-embedding only when the embedding
    /// source text changed. An unchanged entry keeps its stored vector.
    pub async fn upsert(
        &self,
        mut entry: CtiEntry,
        provider: &dyn EmbeddingProvider,
    ) -> Result<(), ClassifyError> {
        let text = entry_embedding_text(&entry);

        {
            let mut state = self.inner.write().await;
            state.carry_counters(&mut entry);
            if let Some(existing) = state.entries.get_mut(&entry.id) {
                if existing.source_text == text && existing.vector.is_some() {
                    debug!("Entry {} unchanged for embedding purposes", entry.id);
                    existing.entry = entry;
                    return Ok(());
                }
            }
        }

        // Embed outside the lock; the insert below is the atomic replace.
        let vector = provider.embed(&text).await?;

        let mut state = self.inner.write().await;
        state.check_dimensionality(&vector)?;
        state.carry_counters(&mut entry);
        if state.dimensionality.is_none() {
            state.dimensionality = Some(vector.len());
        }
        let id = entry.id;
        state.entries.insert(
            id,
            IndexedEntry {
                entry,
                vector: Some(vector),
                source_text: text,
            },
        );
        debug!("Upserted entry {} with fresh vector", id);
        Ok(())
    }

    /// Inserts an entry with a precomputed vector, subject to the same
    /// dimensionality guard as `upsert`.
    pub async fn accept(&self, mut entry: CtiEntry, vector: Vec<f32>) -> Result<(), ClassifyError> {
        let mut state = self.inner.write().await;
        state.check_dimensionality(&vector)?;
        state.carry_counters(&mut entry);
        if state.dimensionality.is_none() {
            state.dimensionality = Some(vector.len());
        }
        let text = entry_embedding_text(&entry);
        state.entries.insert(
            entry.id,
            IndexedEntry {
                entry,
                vector: Some(vector),
                source_text: text,
            },
        );
        Ok(())
    }

    /// Registers an entry that has no vector yet. It is invisible to
    /// similarity search until embedded.
    pub async fn insert_pending(&self, mut entry: CtiEntry) {
        let mut state = self.inner.write().await;
        state.carry_counters(&mut entry);
        let text = entry_embedding_text(&entry);
        state.entries.insert(
            entry.id,
            IndexedEntry {
                entry,
                vector: None,
                source_text: text,
            },
        );
    }

    /// Loads serialized records: entries with vectors go through the
    /// dimensionality guard, the rest wait for embedding.
    pub async fn load(&self, records: Vec<TaxonomyRecord>) -> Result<(), ClassifyError> {
        for record in records {
            match record.embedding_vector {
                Some(vector) => self.accept(record.entry, vector).await?,
                None => self.insert_pending(record.entry).await,
            }
        }
        Ok(())
    }

    /// Serializable snapshot of the whole index, id-ordered.
    pub async fn export(&self) -> Vec<TaxonomyRecord> {
        let state = self.inner.read().await;
        let mut records: Vec<TaxonomyRecord> = state
            .entries
            .values()
            .map(|indexed| TaxonomyRecord {
                entry: indexed.entry.clone(),
                embedding_vector: indexed.vector.clone(),
            })
            .collect();
        records.sort_by_key(|r| r.entry.id);
        records
    }

    /// Drops an entry. Referential-integrity checks against training
    /// examples happen at the pipeline boundary, not here.
    pub async fn remove(&self, id: CtiEntryId) -> bool {
        let mut state = self.inner.write().await;
        state.entries.remove(&id).is_some()
    }

    /// Snapshot of every (entry, vector) pair. Entries lacking a vector are
    /// silently skipped; a partially embedded taxonomy is an expected
    /// transient state during data entry.
    pub async fn entries_with_vectors(&self) -> Vec<(CtiEntry, Vec<f32>)> {
        let state = self.inner.read().await;
        state
            .entries
            .values()
            .filter_map(|indexed| {
                indexed
                    .vector
                    .as_ref()
                    .map(|v| (indexed.entry.clone(), v.clone()))
            })
            .collect()
    }

    pub async fn entries_without_vectors(&self) -> Vec<CtiEntry> {
        let state = self.inner.read().await;
        state
            .entries
            .values()
            .filter(|indexed| indexed.vector.is_none())
            .map(|indexed| indexed.entry.clone())
            .collect()
    }

    pub async fn get(&self, id: CtiEntryId) -> Option<CtiEntry> {
        let state = self.inner.read().await;
        state.entries.get(&id).map(|indexed| indexed.entry.clone())
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.entries.is_empty()
    }

    /// Re-embeds the whole index under the current model and swaps the new
    /// vector set in atomically. Required after an embedding-model change;
    /// any failure leaves the old index untouched.
    pub async fn rebuild(&self, provider: &dyn EmbeddingProvider) -> Result<usize, ClassifyError> {
        let entries: Vec<CtiEntry> = {
            let state = self.inner.read().await;
            state
                .entries
                .values()
                .map(|indexed| indexed.entry.clone())
                .collect()
        };

        info!("Rebuilding taxonomy index for {} entries", entries.len());
        let mut rebuilt: HashMap<CtiEntryId, IndexedEntry> = HashMap::with_capacity(entries.len());
        let mut dimensionality: Option<usize> = None;

        for entry in entries {
            let text = entry_embedding_text(&entry);
            let vector = provider.embed(&text).await?;
            match dimensionality {
                None => dimensionality = Some(vector.len()),
                Some(expected) if expected != vector.len() => {
                    return Err(ClassifyError::TaxonomyInconsistency {
                        expected,
                        actual: vector.len(),
                    });
                }
                Some(_) => {}
            }
            rebuilt.insert(
                entry.id,
                IndexedEntry {
                    entry,
                    vector: Some(vector),
                    source_text: text,
                },
            );
        }

        let count = rebuilt.len();
        let mut state = self.inner.write().await;
        state.entries = rebuilt;
        state.dimensionality = dimensionality;
        info!("Index rebuild complete: {} entries", count);
        Ok(count)
    }

    pub async fn note_predicted(&self, id: CtiEntryId) {
        let mut state = self.inner.write().await;
        match state.entries.get_mut(&id) {
            Some(indexed) => indexed.entry.times_predicted += 1,
            None => warn!("note_predicted for unknown entry {}", id),
        }
    }

    pub async fn note_confirmed(&self, id: CtiEntryId) {
        let mut state = self.inner.write().await;
        match state.entries.get_mut(&id) {
            Some(indexed) => indexed.entry.times_confirmed += 1,
            None => warn!("note_confirmed for unknown entry {}", id),
        }
    }

    pub async fn set_example_count(&self, id: CtiEntryId, count: usize) {
        let mut state = self.inner.write().await;
        if let Some(indexed) = state.entries.get_mut(&id) {
            indexed.entry.example_count = count;
        }
    }
}

impl Default for TaxonomyIndex {
    fn default() -> Self {
        TaxonomyIndex::new()
    }
}
