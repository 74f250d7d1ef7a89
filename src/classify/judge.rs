// src/classify/judge.rs

use std::collections::HashMap;

use log::debug;
use serde::Deserialize;

use crate::classify::prompt::{build_judge_prompt, JUDGE_SYSTEM_PROMPT};
use crate::config::{JUDGE_MAX_TOKENS, JUDGE_TEMPERATURE};
use crate::embedding::ChatCompletionProvider;
use crate::error::ClassifyError;
use crate::models::{CtiEntry, CtiEntryId, FewShotExample, ScoredCandidate, TrainingExample};

pub const NO_CANDIDATES_JUSTIFICATION: &str = "No suitable category found among candidates";

/// Validated judge outcome. Constructed only after a successful parse and
/// candidate-membership check; the raw model response never travels further
/// down the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum JudgeVerdict {
    Selected {
        id: CtiEntryId,
        confidence: f64,
        justification: String,
    },
    NoMatch {
        confidence: f64,
        justification: String,
    },
}

/// Wire shape of the model's answer.
#[derive(Debug, Deserialize)]
struct RawJudgeResponse {
    selected_id: Option<i64>,
    confidence: f64,
    #[serde(default)]
    justification: String,
}

/// Models sometimes wrap the JSON answer in a markdown code fence despite
/// the instruction not to.
fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let trimmed = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    trimmed.strip_suffix("```").unwrap_or(trimmed).trim()
}

/// Issues the single ranking call and validates the response.
///
/// An empty candidate list short-circuits to `NoMatch` without a model
/// call. Malformed output is `JudgeParseError`; a selected id outside the
/// candidate set is `JudgeInvalidSelection`. Neither is retried here — the
/// caller decides, since retries change nondeterministic output.
pub async fn judge(
    chat: &dyn ChatCompletionProvider,
    ticket_text: &str,
    candidates: &[ScoredCandidate],
    global_examples: &[(TrainingExample, CtiEntry)],
    candidate_examples: &HashMap<CtiEntryId, Vec<FewShotExample>>,
) -> Result<JudgeVerdict, ClassifyError> {
    if candidates.is_empty() {
        return Ok(JudgeVerdict::NoMatch {
            confidence: 0.0,
            justification: NO_CANDIDATES_JUSTIFICATION.to_string(),
        });
    }

    let prompt = build_judge_prompt(ticket_text, candidates, global_examples, candidate_examples);
    let response = chat
        .complete(JUDGE_SYSTEM_PROMPT, &prompt, JUDGE_TEMPERATURE, JUDGE_MAX_TOKENS)
        .await?;

    let cleaned = strip_code_fences(&response);
    let raw: RawJudgeResponse = serde_json::from_str(cleaned)
        .map_err(|e| ClassifyError::JudgeParseError(format!("{}: {}", e, cleaned)))?;

    let confidence = raw.confidence.clamp(0.0, 1.0);
    debug!(
        "Judge answered selected_id={:?} confidence={:.2}",
        raw.selected_id, confidence
    );

    match raw.selected_id {
        Some(id) => {
            let known: Vec<i64> = candidates.iter().map(|c| c.entry.id.0).collect();
            if !known.contains(&id) {
                return Err(ClassifyError::JudgeInvalidSelection {
                    selected: id,
                    candidates: known,
                });
            }
            Ok(JudgeVerdict::Selected {
                id: CtiEntryId(id),
                confidence,
                justification: raw.justification,
            })
        }
        None => Ok(JudgeVerdict::NoMatch {
            confidence,
            justification: raw.justification,
        }),
    }
}
