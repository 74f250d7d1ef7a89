// src/embedding/mod.rs

mod openai;

pub use openai::{OpenAiClient, OpenAiConfig};

use async_trait::async_trait;
use futures::{stream, StreamExt};
use log::{info, warn};

use crate::error::ClassifyError;
use crate::index::TaxonomyIndex;
use crate::models::CtiEntry;

// Concurrent embedding requests during batch precompute
const CONCURRENT_REQUESTS: usize = 4;

/// Converts text to a fixed-dimensionality vector.
///
/// Deterministic for a fixed model version. Implementations must not retry
/// internally; a failed call surfaces as `EmbeddingUnavailable` and the
/// caller decides what to do with it.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ClassifyError>;
}

/// Issues one chat-completion call and returns the raw assistant text.
#[async_trait]
pub trait ChatCompletionProvider: Send + Sync {
    async fn complete(
        &self,
        system: &str,
        user: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, ClassifyError>;
}

/// The literal text an entry's vector is computed from. Any change to these
/// fields invalidates a stored vector.
pub fn entry_embedding_text(entry: &CtiEntry) -> String {
    format!(
        "{} {} {} {} {} {} {} {} {}",
        entry.bu_number,
        entry.category,
        entry.entry_type,
        entry.item,
        entry.request_type,
        entry.sla,
        entry.service_description,
        entry.bu_description,
        entry.resolver_group_description,
    )
}

/// Embeds every indexed entry that is missing a vector.
///
/// Entries whose embedding call fails are skipped with a warning; a partial
/// taxonomy is an expected transient state during data entry. Returns the
/// number of vectors computed.
pub async fn precompute_missing(
    index: &TaxonomyIndex,
    provider: &dyn EmbeddingProvider,
) -> usize {
    let pending = index.entries_without_vectors().await;
    if pending.is_empty() {
        return 0;
    }
    info!("Precomputing embeddings for {} entries", pending.len());

    let results: Vec<(CtiEntry, Result<Vec<f32>, ClassifyError>)> = stream::iter(pending)
        .map(|entry| async move {
            let text = entry_embedding_text(&entry);
            let result = provider.embed(&text).await;
            (entry, result)
        })
        .buffer_unordered(CONCURRENT_REQUESTS)
        .collect()
        .await;

    let mut embedded = 0;
    for (entry, result) in results {
        match result {
            Ok(vector) => match index.accept(entry.clone(), vector).await {
                Ok(()) => embedded += 1,
                Err(e) => warn!("Rejected vector for entry {}: {}", entry.id, e),
            },
            Err(e) => warn!("Failed to embed entry {}: {}", entry.id, e),
        }
    }

    info!("Embedded {} entries", embedded);
    embedded
}
