// src/config.rs

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::models::CtiEntryId;

// Candidate selection
pub const DEFAULT_SIMILARITY_FLOOR: f32 = 0.2;
pub const DEFAULT_TOP_K: usize = 8;

// Entries with at least this many stored examples count as well-trained
// and receive the boost below during selection.
pub const WELL_TRAINED_EXAMPLE_COUNT: usize = 3;
pub const WELL_TRAINED_BOOST: f32 = 1.1;

// Few-shot prompt construction
pub const DEFAULT_MAX_GLOBAL_EXAMPLES: usize = 5;
pub const DEFAULT_MAX_CANDIDATE_EXAMPLES: usize = 2;

// Per-entry example store
pub const MAX_EXAMPLES_PER_ENTRY: usize = 10;
pub const DUPLICATE_EXAMPLE_THRESHOLD: f32 = 0.9;

// Feedback weighting
pub const CORRECTION_WEIGHT: f64 = 1.5;
pub const DEFAULT_EXAMPLE_WEIGHT: f64 = 1.0;

// Judge call shape
pub const JUDGE_TEMPERATURE: f32 = 0.1;
pub const JUDGE_MAX_TOKENS: u32 = 500;

// Example-based vector refresh
pub const MIN_EXAMPLES_FOR_REFRESH: usize = 3;
pub const EXAMPLE_RECENCY_HALF_LIFE_DAYS: f64 = 90.0;

/// Reads an environment variable, falling back to a default when unset or
/// unparseable.
pub fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

/// Replaces null/low-confidence selections with a designated catch-all entry.
#[derive(Debug, Clone)]
pub struct FallbackPolicy {
    /// Entry used when no candidate clears the confidence floor
    pub entry_id: CtiEntryId,
    /// Minimum judge confidence to accept a prediction as-is
    pub min_confidence: f64,
}

/// Tunables of one pipeline instance.
///
/// The floor and top-K defaults mirror the values the source system ran
/// with; neither has a documented derivation, so both stay configurable.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub similarity_floor: f32,
    pub top_k: usize,
    pub max_global_examples: usize,
    pub max_candidate_examples: usize,
    /// Disabled by default; opt-in routing floor
    pub fallback: Option<FallbackPolicy>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            similarity_floor: DEFAULT_SIMILARITY_FLOOR,
            top_k: DEFAULT_TOP_K,
            max_global_examples: DEFAULT_MAX_GLOBAL_EXAMPLES,
            max_candidate_examples: DEFAULT_MAX_CANDIDATE_EXAMPLES,
            fallback: None,
        }
    }
}

impl PipelineConfig {
    /// Builds a config from `TRIAGE_*` environment variables, keeping
    /// defaults for anything unset.
    pub fn from_env() -> Self {
        let fallback_id: i64 = env_or("TRIAGE_FALLBACK_ENTRY_ID", -1);
        let fallback = if fallback_id >= 0 {
            Some(FallbackPolicy {
                entry_id: CtiEntryId(fallback_id),
                min_confidence: env_or("TRIAGE_MIN_CONFIDENCE", 0.3),
            })
        } else {
            None
        };

        PipelineConfig {
            similarity_floor: env_or("TRIAGE_SIMILARITY_FLOOR", DEFAULT_SIMILARITY_FLOOR),
            top_k: env_or("TRIAGE_TOP_K", DEFAULT_TOP_K),
            max_global_examples: env_or("TRIAGE_MAX_GLOBAL_EXAMPLES", DEFAULT_MAX_GLOBAL_EXAMPLES),
            max_candidate_examples: env_or(
                "TRIAGE_MAX_CANDIDATE_EXAMPLES",
                DEFAULT_MAX_CANDIDATE_EXAMPLES,
            ),
            fallback,
        }
    }
}

/// Caller-owned retry policy for `classify_with_retry`.
///
/// The pipeline itself is single-shot; retries live at this boundary so
/// failure semantics stay composable.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 2,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}
