// src/bin/embed_taxonomy.rs
//
// Batch-precomputes embedding vectors for a taxonomy file and writes the
// vectors back, so classification runs start from a fully embedded index.

use anyhow::{Context, Result};
use log::info;

use cti_triage::embedding::{self, OpenAiClient};
use cti_triage::models::TaxonomyRecord;
use cti_triage::TaxonomyIndex;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));
    dotenv::dotenv().ok();

    let taxonomy_path = std::env::args()
        .nth(1)
        .context("Usage: embed_taxonomy <taxonomy.json>")?;

    let contents = std::fs::read_to_string(&taxonomy_path)
        .with_context(|| format!("Failed to read {}", taxonomy_path))?;
    let records: Vec<TaxonomyRecord> =
        serde_json::from_str(&contents).context("Failed to parse taxonomy file")?;
    let total = records.len();

    let index = TaxonomyIndex::new();
    index.load(records).await?;

    let client = OpenAiClient::from_env()?;
    let embedded = embedding::precompute_missing(&index, &client).await;

    let updated = index.export().await;
    std::fs::write(&taxonomy_path, serde_json::to_string_pretty(&updated)?)
        .with_context(|| format!("Failed to write {}", taxonomy_path))?;

    info!(
        "Embedded {} of {} entries; wrote {}",
        embedded, total, taxonomy_path
    );
    Ok(())
}
