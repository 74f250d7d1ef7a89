// src/error.rs

use thiserror::Error;

/// Failure taxonomy of the classification core.
///
/// Only the two `*Unavailable` variants are retryable; the caller owns the
/// retry policy. `TaxonomyInconsistency` means the index would mix vector
/// spaces and classification must halt until an explicit rebuild.
#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("embedding call failed: {0}")]
    EmbeddingUnavailable(String),

    #[error("judge call failed: {0}")]
    JudgeUnavailable(String),

    #[error("judge response was not parseable: {0}")]
    JudgeParseError(String),

    #[error("judge selected id {selected} which is not among candidates {candidates:?}")]
    JudgeInvalidSelection {
        selected: i64,
        candidates: Vec<i64>,
    },

    #[error("vector dimensionality mismatch: index holds {expected}, got {actual}")]
    TaxonomyInconsistency { expected: usize, actual: usize },

    #[error("entry {0} is still referenced by training examples")]
    EntryInUse(i64),

    #[error("unknown taxonomy entry {0}")]
    UnknownEntry(i64),
}

impl ClassifyError {
    /// Whether the caller may retry the whole classify call.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClassifyError::EmbeddingUnavailable(_) | ClassifyError::JudgeUnavailable(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_upstream_failures_are_retryable() {
        assert!(ClassifyError::EmbeddingUnavailable("timeout".into()).is_retryable());
        assert!(ClassifyError::JudgeUnavailable("503".into()).is_retryable());
        assert!(!ClassifyError::JudgeParseError("bad json".into()).is_retryable());
        assert!(!ClassifyError::JudgeInvalidSelection {
            selected: 9999,
            candidates: vec![1, 2, 3],
        }
        .is_retryable());
        assert!(!ClassifyError::TaxonomyInconsistency {
            expected: 1536,
            actual: 768,
        }
        .is_retryable());
    }
}
