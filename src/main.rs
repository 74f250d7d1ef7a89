// src/main.rs
use anyhow::{Context, Result};
use log::info;
use std::sync::Arc;

use cti_triage::embedding::OpenAiClient;
use cti_triage::feedback::{CorrectionLog, FeedbackStore};
use cti_triage::models::{compose_ticket_text, TaxonomyRecord};
use cti_triage::{ClassificationPipeline, PipelineConfig, RetryPolicy, TaxonomyIndex};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));
    dotenv::dotenv().ok();

    let mut args = std::env::args().skip(1);
    let taxonomy_path = args
        .next()
        .context("Usage: triage <taxonomy.json> <summary> [description]")?;
    let summary = args.next().context("missing ticket summary")?;
    let description = args.next().unwrap_or_default();

    let contents = std::fs::read_to_string(&taxonomy_path)
        .with_context(|| format!("Failed to read {}", taxonomy_path))?;
    let records: Vec<TaxonomyRecord> =
        serde_json::from_str(&contents).context("Failed to parse taxonomy file")?;

    let index = Arc::new(TaxonomyIndex::new());
    index.load(records).await?;
    info!("Loaded {} taxonomy entries", index.len().await);

    let client = Arc::new(OpenAiClient::from_env()?);
    let learning_dir =
        std::env::var("TRIAGE_LEARNING_DIR").unwrap_or_else(|_| "learning_data".to_string());
    let feedback = Arc::new(FeedbackStore::new(Some(CorrectionLog::new(learning_dir))));

    let pipeline = ClassificationPipeline::new(
        index,
        feedback,
        client.clone(),
        client,
        PipelineConfig::from_env(),
    );

    let embedded = pipeline.precompute_embeddings().await;
    if embedded > 0 {
        info!("Computed {} missing entry vectors", embedded);
    }

    let ticket_text = compose_ticket_text(&summary, &description);
    let decision = pipeline
        .classify_with_retry(&ticket_text, &RetryPolicy::default())
        .await?;

    println!("{}", serde_json::to_string_pretty(&decision)?);
    Ok(())
}
