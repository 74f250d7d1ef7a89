// src/models.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

//------------------------------------------------------------------------------
// IDENTIFIER TYPES
//------------------------------------------------------------------------------
// Using newtype pattern for type safety to prevent mixing different ID types

/// Strongly typed identifier for CTI taxonomy entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CtiEntryId(pub i64);

impl fmt::Display for CtiEntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

//------------------------------------------------------------------------------
// CORE DOMAIN MODELS
//------------------------------------------------------------------------------

/// ITIL request type of a taxonomy entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestType {
    Incident,
    Request,
    Change,
    Problem,
}

impl RequestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestType::Incident => "Incident",
            RequestType::Request => "Request",
            RequestType::Change => "Change",
            RequestType::Problem => "Problem",
        }
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// SLA priority band assigned to a taxonomy entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlaPriority {
    P1,
    P2,
    P3,
    P4,
}

impl SlaPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlaPriority::P1 => "P1",
            SlaPriority::P2 => "P2",
            SlaPriority::P3 => "P3",
            SlaPriority::P4 => "P4",
        }
    }
}

impl fmt::Display for SlaPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One leaf node of the Configuration/Taxonomy/Item service catalog.
///
/// The `(bu_number, category, entry_type, item, resolver_group)` tuple is
/// expected to be unique; duplicates are a data-quality defect owned by the
/// external catalog, and the index tolerates them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CtiEntry {
    /// Stable identifier assigned by the owning catalog
    pub id: CtiEntryId,

    /// Business unit number
    pub bu_number: String,

    /// Business unit description
    #[serde(default)]
    pub bu_description: String,

    /// Service name
    pub category: String,

    /// Service category
    pub entry_type: String,

    pub item: String,

    /// Resolver group this entry routes to
    pub resolver_group: String,

    #[serde(default)]
    pub resolver_group_description: String,

    pub request_type: RequestType,

    pub sla: SlaPriority,

    #[serde(default)]
    pub service_description: String,

    /// Times the judge selected this entry (informational, last-write-wins)
    #[serde(default)]
    pub times_predicted: u64,

    /// Times a correction confirmed this entry (informational, last-write-wins)
    #[serde(default)]
    pub times_confirmed: u64,

    /// Count of stored real-ticket examples for this entry
    #[serde(default)]
    pub example_count: usize,
}

impl CtiEntry {
    /// Entries with enough real-ticket examples are treated as well-trained
    /// and get a small boost during candidate selection.
    pub fn has_sufficient_examples(&self) -> bool {
        self.example_count >= crate::config::WELL_TRAINED_EXAMPLE_COUNT
    }
}

impl fmt::Display for CtiEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {} - {}", self.category, self.entry_type, self.item)
    }
}

/// Builds the ticket text classified by one pipeline run.
pub fn compose_ticket_text(summary: &str, description: &str) -> String {
    format!("{}. {}", summary, description)
}

/// Serialized form of one entry, with its vector when already computed.
/// Exchange format between the catalog, the index, and the embedding bin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaxonomyRecord {
    #[serde(flatten)]
    pub entry: CtiEntry,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_vector: Option<Vec<f32>>,
}

//------------------------------------------------------------------------------
// CLASSIFICATION OUTPUT
//------------------------------------------------------------------------------

/// One candidate considered by the judge, with its similarity score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub entry: CtiEntry,
    pub similarity: f32,
}

/// The output of one classification run.
///
/// Owned by the caller once returned; the pipeline holds no reference to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    /// Selected taxonomy entry, or `None` for "no suitable match"
    pub selected: Option<CtiEntryId>,

    /// Judge confidence in [0.0, 1.0]
    pub confidence: f64,

    pub justification: String,

    /// Candidates the judge saw, ordered by similarity descending
    pub candidates: Vec<ScoredCandidate>,
}

impl Decision {
    pub fn no_match(justification: impl Into<String>, candidates: Vec<ScoredCandidate>) -> Self {
        Decision {
            selected: None,
            confidence: 0.0,
            justification: justification.into(),
            candidates,
        }
    }

    pub fn state(&self) -> ClassificationState {
        ClassificationState::Predicted(self.selected)
    }
}

/// Per-ticket classification lifecycle.
///
/// `Predicted(None)` is the terminal "no suitable match" state pending manual
/// triage. `Corrected` is terminal for that ticket version; only a new
/// explicit correction moves a ticket out of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClassificationState {
    Unclassified,
    Predicted(Option<CtiEntryId>),
    Corrected(CtiEntryId),
}

impl ClassificationState {
    pub fn correct(self, to: CtiEntryId) -> ClassificationState {
        ClassificationState::Corrected(to)
    }
}

//------------------------------------------------------------------------------
// FEEDBACK MODELS
//------------------------------------------------------------------------------

/// Where a training example came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExampleProvenance {
    Initial,
    Correction,
    Manual,
}

impl ExampleProvenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExampleProvenance::Initial => "initial",
            ExampleProvenance::Correction => "correction",
            ExampleProvenance::Manual => "manual",
        }
    }
}

/// One piece of ground truth used when building few-shot prompts.
///
/// Immutable once created; never auto-deleted. The weight is a retrieval
/// preference multiplier, not probability mass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingExample {
    pub ticket_content: String,
    pub entry_id: CtiEntryId,
    pub provenance: ExampleProvenance,
    pub weight: f64,
    pub created_at: DateTime<Utc>,
}

/// How a per-entry real-ticket example was classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExampleSource {
    Ai,
    Confirmed,
    Corrected,
}

impl ExampleSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExampleSource::Ai => "ai",
            ExampleSource::Confirmed => "confirmed",
            ExampleSource::Corrected => "corrected",
        }
    }
}

/// A real ticket stored as an example for one taxonomy entry, shown to the
/// judge alongside that entry when it is a candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FewShotExample {
    pub entry_id: CtiEntryId,
    pub ticket_content: String,
    pub summary: String,
    pub source: ExampleSource,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
}

/// Audit record of one engineer correction, appended to the monthly
/// correction log and handed to the persistence collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectionRecord {
    pub id: Uuid,
    pub recorded_at: DateTime<Utc>,
    pub ticket_content: String,
    pub original_prediction: Option<CtiEntry>,
    pub corrected_to: CtiEntry,
    pub corrected_by: String,
    pub confidence_before: Option<f64>,
}
