// src/classify/selector.rs

use log::debug;

use crate::config::WELL_TRAINED_BOOST;
use crate::models::{CtiEntry, ScoredCandidate};

/// Cosine similarity between two vectors: `dot(a,b) / (|a| * |b|)`.
///
/// Zero-magnitude input scores 0.0 rather than dividing by zero. Vector
/// lengths are guaranteed equal by the index's dimensionality guard.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Ranks indexed entries against a query vector and returns the top-K
/// candidates at or above the similarity floor, descending by score with a
/// stable id-ascending tie-break.
///
/// Well-trained entries get a small boost before the floor is applied. An
/// empty result is a valid "no embedding-based candidates" outcome, not an
/// error. Linear O(N·D) scan; fine for taxonomies in the low thousands.
pub fn select(
    query: &[f32],
    snapshot: &[(CtiEntry, Vec<f32>)],
    similarity_floor: f32,
    top_k: usize,
) -> Vec<ScoredCandidate> {
    let mut scored: Vec<ScoredCandidate> = snapshot
        .iter()
        .map(|(entry, vector)| {
            let mut similarity = cosine_similarity(query, vector);
            if entry.has_sufficient_examples() {
                similarity *= WELL_TRAINED_BOOST;
            }
            ScoredCandidate {
                entry: entry.clone(),
                similarity,
            }
        })
        .filter(|candidate| candidate.similarity >= similarity_floor)
        .collect();

    scored.sort_by(|a, b| {
        b.similarity
            .total_cmp(&a.similarity)
            .then_with(|| a.entry.id.cmp(&b.entry.id))
    });
    scored.truncate(top_k);

    debug!(
        "Selected {} candidates from {} indexed entries (floor {})",
        scored.len(),
        snapshot.len(),
        similarity_floor
    );
    scored
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CtiEntryId, RequestType, SlaPriority};

    fn entry(id: i64) -> CtiEntry {
        CtiEntry {
            id: CtiEntryId(id),
            bu_number: "1".to_string(),
            bu_description: String::new(),
            category: "Network".to_string(),
            entry_type: "VPN".to_string(),
            item: "Client".to_string(),
            resolver_group: "NET-L2".to_string(),
            resolver_group_description: String::new(),
            request_type: RequestType::Incident,
            sla: SlaPriority::P3,
            service_description: String::new(),
            times_predicted: 0,
            times_confirmed: 0,
            example_count: 0,
        }
    }

    #[test]
    fn cosine_similarity_is_symmetric() {
        let pairs = [
            (vec![1.0, 0.0, 0.5], vec![0.3, 0.7, 0.1]),
            (vec![0.2, 0.2], vec![0.9, 0.1]),
            (vec![-0.5, 1.0], vec![1.0, -0.5]),
        ];
        for (a, b) in &pairs {
            assert!((cosine_similarity(a, b) - cosine_similarity(b, a)).abs() < 1e-6);
        }
    }

    #[test]
    fn identical_vectors_score_one() {
        let v = vec![0.3, 0.5, 0.2];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn zero_vector_scores_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn empty_index_returns_empty_list() {
        let result = select(&[1.0, 0.0], &[], 0.2, 8);
        assert!(result.is_empty());
    }

    #[test]
    fn floor_filters_and_top_k_truncates() {
        let snapshot = vec![
            (entry(1), vec![1.0, 0.0]),  // sim 1.0
            (entry(2), vec![0.0, 1.0]),  // sim 0.0, below floor
            (entry(3), vec![0.7, 0.7]),  // sim ~0.707
            (entry(4), vec![0.9, 0.1]),  // sim ~0.994
        ];
        let query = vec![1.0, 0.0];

        let result = select(&query, &snapshot, 0.2, 8);
        assert_eq!(result.len(), 3);
        assert!(result.iter().all(|c| c.similarity >= 0.2));
        assert_eq!(result[0].entry.id, CtiEntryId(1));

        let truncated = select(&query, &snapshot, 0.2, 2);
        assert_eq!(truncated.len(), 2);
        assert_eq!(truncated[0].entry.id, CtiEntryId(1));
        assert_eq!(truncated[1].entry.id, CtiEntryId(4));
    }

    #[test]
    fn equal_scores_tie_break_by_ascending_id() {
        let shared = vec![0.5, 0.5];
        let snapshot = vec![
            (entry(9), shared.clone()),
            (entry(3), shared.clone()),
            (entry(6), shared.clone()),
        ];
        let result = select(&[1.0, 1.0], &snapshot, 0.2, 8);
        let ids: Vec<i64> = result.iter().map(|c| c.entry.id.0).collect();
        assert_eq!(ids, vec![3, 6, 9]);
    }

    #[test]
    fn well_trained_entries_are_boosted() {
        let mut trained = entry(1);
        trained.example_count = 3;
        let untrained = entry(2);
        let shared = vec![0.6, 0.8];

        let snapshot = vec![(untrained, shared.clone()), (trained, shared.clone())];
        let result = select(&[0.6, 0.8], &snapshot, 0.2, 8);

        assert_eq!(result[0].entry.id, CtiEntryId(1));
        assert!(result[0].similarity > result[1].similarity);
    }
}
