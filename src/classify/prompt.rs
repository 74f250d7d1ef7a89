// src/classify/prompt.rs

use std::collections::HashMap;
use std::fmt::Write;

use crate::models::{CtiEntry, CtiEntryId, FewShotExample, ScoredCandidate, TrainingExample};

pub const JUDGE_SYSTEM_PROMPT: &str =
    "You are an expert IT service desk classifier. Always respond with valid JSON only.";

/// Renders the global few-shot block: each example's ticket text followed by
/// the full field set of its correct taxonomy entry.
fn format_global_examples(examples: &[(TrainingExample, CtiEntry)]) -> String {
    let mut out = String::new();
    for (example, entry) in examples {
        let _ = write!(
            out,
            "\nTICKET: {}\nCORRECT CLASSIFICATION:\n\
             - BU: {}\n\
             - Category: {}\n\
             - Type: {}\n\
             - Item: {}\n\
             - Resolver Group: {}\n\
             - Resolver Group Description: {}\n\
             - Request Type: {}\n\
             - SLA: {}\n\
             - Service Description: {}\n\
             - BU Description: {}\n",
            example.ticket_content,
            entry.bu_number,
            entry.category,
            entry.entry_type,
            entry.item,
            entry.resolver_group,
            entry.resolver_group_description,
            entry.request_type,
            entry.sla,
            entry.service_description,
            entry.bu_description,
        );
    }
    out
}

fn format_candidate_examples(examples: &[FewShotExample]) -> String {
    if examples.is_empty() {
        return "No specific examples available for this category.".to_string();
    }
    let mut out = String::new();
    for (i, example) in examples.iter().enumerate() {
        let _ = write!(
            out,
            "\nExample {}:\n- Summary: {}\n- Source: {}\n- Confidence: {:.2}\n",
            i + 1,
            example.summary,
            example.source.as_str(),
            example.confidence,
        );
    }
    out
}

fn format_candidates(
    candidates: &[ScoredCandidate],
    candidate_examples: &HashMap<CtiEntryId, Vec<FewShotExample>>,
) -> String {
    let mut out = String::new();
    for candidate in candidates {
        let entry = &candidate.entry;
        let examples = candidate_examples
            .get(&entry.id)
            .map(|e| e.as_slice())
            .unwrap_or(&[]);
        let _ = write!(
            out,
            "\nID: {}\n\
             Category: {}\n\
             Type: {}\n\
             Item: {}\n\
             Resolver Group: {}\n\
             Request Type: {}\n\
             SLA: {}\n\
             Similarity Score: {:.3}\n\n\
             REAL TICKET EXAMPLES FOR THIS CATEGORY:\n{}\n---\n",
            entry.id,
            entry.category,
            entry.entry_type,
            entry.item,
            entry.resolver_group,
            entry.request_type,
            entry.sla,
            candidate.similarity,
            format_candidate_examples(examples),
        );
    }
    out
}

/// Assembles the single prompt the judge answers: global few-shot examples,
/// the ticket, every candidate's field set with per-entry real-ticket
/// examples, the selection guidance, and the exact JSON response contract.
pub fn build_judge_prompt(
    ticket_text: &str,
    candidates: &[ScoredCandidate],
    global_examples: &[(TrainingExample, CtiEntry)],
    candidate_examples: &HashMap<CtiEntryId, Vec<FewShotExample>>,
) -> String {
    format!(
        r#"You are an expert IT service desk classifier. Your task is to classify a support ticket into the most appropriate category from the given candidates.

GENERAL CLASSIFICATION EXAMPLES:
{global_examples}

Now classify this ticket:
TICKET: {ticket_text}

CANDIDATE CATEGORIES (each with real ticket examples):
{candidates_text}

Analyze the ticket content and select the MOST APPROPRIATE category ID. Consider:
1. The specific technical issue described
2. The type of request (incident vs request)
3. The service area involved
4. The appropriate resolver group
5. The business unit the ticket belongs to
6. The SLA priority implied by the impact described

Pay special attention to the "REAL TICKET EXAMPLES" for each candidate - these show you exactly what types of tickets belong to each category.

Respond with EXACTLY this JSON format:
{{
    "selected_id": <ID_NUMBER>,
    "confidence": <0.0_to_1.0>,
    "justification": "<brief explanation of why this category was selected>"
}}

If none of the candidates are appropriate, respond with:
{{
    "selected_id": null,
    "confidence": 0.0,
    "justification": "No suitable category found among candidates"
}}"#,
        global_examples = format_global_examples(global_examples),
        ticket_text = ticket_text,
        candidates_text = format_candidates(candidates, candidate_examples),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExampleSource, RequestType, SlaPriority};
    use chrono::Utc;

    fn entry(id: i64, category: &str) -> CtiEntry {
        CtiEntry {
            id: CtiEntryId(id),
            bu_number: "42".to_string(),
            bu_description: "Corporate IT".to_string(),
            category: category.to_string(),
            entry_type: "Password Reset".to_string(),
            item: "AD Account".to_string(),
            resolver_group: "IAM-L1".to_string(),
            resolver_group_description: "Identity team".to_string(),
            request_type: RequestType::Incident,
            sla: SlaPriority::P3,
            service_description: "Password support".to_string(),
            times_predicted: 0,
            times_confirmed: 0,
            example_count: 0,
        }
    }

    #[test]
    fn prompt_contains_candidates_and_response_contract() {
        let candidates = vec![
            ScoredCandidate {
                entry: entry(1, "Access Management"),
                similarity: 0.91,
            },
            ScoredCandidate {
                entry: entry(2, "Network"),
                similarity: 0.44,
            },
        ];
        let prompt = build_judge_prompt(
            "cannot login, forgot password",
            &candidates,
            &[],
            &HashMap::new(),
        );

        assert!(prompt.contains("TICKET: cannot login, forgot password"));
        assert!(prompt.contains("ID: 1"));
        assert!(prompt.contains("ID: 2"));
        assert!(prompt.contains("Similarity Score: 0.910"));
        assert!(prompt.contains("\"selected_id\": null"));
        assert!(prompt.contains("No specific examples available for this category."));
    }

    #[test]
    fn prompt_renders_global_and_candidate_examples() {
        let target = entry(1, "Access Management");
        let global = vec![(
            TrainingExample {
                ticket_content: "locked out of my account".to_string(),
                entry_id: target.id,
                provenance: crate::models::ExampleProvenance::Correction,
                weight: 1.5,
                created_at: Utc::now(),
            },
            target.clone(),
        )];
        let mut per_candidate = HashMap::new();
        per_candidate.insert(
            target.id,
            vec![FewShotExample {
                entry_id: target.id,
                ticket_content: "password expired. need a reset".to_string(),
                summary: "password expired".to_string(),
                source: ExampleSource::Corrected,
                confidence: 0.9,
                created_at: Utc::now(),
            }],
        );

        let candidates = vec![ScoredCandidate {
            entry: target,
            similarity: 0.8,
        }];
        let prompt =
            build_judge_prompt("cannot login", &candidates, &global, &per_candidate);

        assert!(prompt.contains("TICKET: locked out of my account"));
        assert!(prompt.contains("- Resolver Group: IAM-L1"));
        assert!(prompt.contains("- Summary: password expired"));
        assert!(prompt.contains("- Source: corrected"));
    }
}
