// src/lib.rs
pub mod classify;
pub mod config;
pub mod embedding;
pub mod error;
pub mod feedback;
pub mod index;
pub mod models;
pub mod pipeline;

// Re-export common types for easier access
pub use models::{
    ClassificationState, CorrectionRecord, CtiEntry, CtiEntryId, Decision, ExampleProvenance,
    ExampleSource, FewShotExample, RequestType, ScoredCandidate, SlaPriority, TrainingExample,
};

// Re-export important functionality
pub use config::{PipelineConfig, RetryPolicy};
pub use error::ClassifyError;
pub use index::TaxonomyIndex;
pub use pipeline::ClassificationPipeline;
