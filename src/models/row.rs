//! Row state and the row stage state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::search::{CrawlResults, Decision, SerpData};
use super::value::{FieldConfidence, FieldValue};

/// Position of a row in the enrichment pipeline.
///
/// `PENDING → SERP_FETCHED → DECISION_MADE → CRAWLED → ENRICHED → COMPLETED`,
/// with `FAILED` and `CANCELLED` reachable from any non-terminal stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RowStage {
    Pending,
    SerpFetched,
    DecisionMade,
    Crawled,
    Enriched,
    Completed,
    Failed,
    Cancelled,
}

impl RowStage {
    pub const ALL: [RowStage; 8] = [
        RowStage::Pending,
        RowStage::SerpFetched,
        RowStage::DecisionMade,
        RowStage::Crawled,
        RowStage::Enriched,
        RowStage::Completed,
        RowStage::Failed,
        RowStage::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RowStage::Pending => "PENDING",
            RowStage::SerpFetched => "SERP_FETCHED",
            RowStage::DecisionMade => "DECISION_MADE",
            RowStage::Crawled => "CRAWLED",
            RowStage::Enriched => "ENRICHED",
            RowStage::Completed => "COMPLETED",
            RowStage::Failed => "FAILED",
            RowStage::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RowStage::Completed | RowStage::Failed | RowStage::Cancelled
        )
    }

    /// Position along the happy path, `None` for the failure stages.
    pub fn ordinal(&self) -> Option<u8> {
        match self {
            RowStage::Pending => Some(0),
            RowStage::SerpFetched => Some(1),
            RowStage::DecisionMade => Some(2),
            RowStage::Crawled => Some(3),
            RowStage::Enriched => Some(4),
            RowStage::Completed => Some(5),
            RowStage::Failed | RowStage::Cancelled => None,
        }
    }

    /// Whether the FSM permits moving from `self` to `next`.
    ///
    /// Terminal stages only accept themselves, except that a `FAILED` row may
    /// be finalized as `COMPLETED` (its error stays on record). Failure
    /// stages are reachable from anywhere non-terminal, and happy-path
    /// stages never regress. Restarting a retry goes through
    /// [`can_restart`](Self::can_restart) instead.
    pub fn can_transition_to(&self, next: RowStage) -> bool {
        if self.is_terminal() {
            return *self == next || (*self == RowStage::Failed && next == RowStage::Completed);
        }
        match (self.ordinal(), next.ordinal()) {
            (_, None) => true,
            (Some(from), Some(to)) => to >= from,
            (None, Some(_)) => false,
        }
    }

    /// Whether a retry reset may send the row back to `PENDING`.
    pub fn can_restart(&self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for RowStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RowStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RowStage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| format!("unknown row stage '{}'", s))
    }
}

/// Persisted state of one row within a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowState {
    pub key: String,
    pub stage: RowStage,
    #[serde(default)]
    pub extracted_data: BTreeMap<String, FieldValue>,
    #[serde(default)]
    pub confidence: BTreeMap<String, FieldConfidence>,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serp_data: Option<SerpData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crawl_results: Option<CrawlResults>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RowState {
    /// A fresh `PENDING` row.
    pub fn new(key: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            key: key.into(),
            stage: RowStage::Pending,
            extracted_data: BTreeMap::new(),
            confidence: BTreeMap::new(),
            sources: Vec::new(),
            error: None,
            serp_data: None,
            decision: None,
            crawl_results: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Clear per-attempt stage payloads so a retry starts from `PENDING`.
    ///
    /// Extracted data and confidences are kept; a later attempt overwrites
    /// the columns it re-extracts.
    pub fn reset_for_retry(&mut self) {
        self.stage = RowStage::Pending;
        self.error = None;
        self.serp_data = None;
        self.decision = None;
        self.crawl_results = None;
        self.updated_at = Utc::now();
    }
}

/// Public view of a finished row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentResult {
    pub key: String,
    pub extracted_data: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub confidence: BTreeMap<String, FieldConfidence>,
    pub sources: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&RowState> for EnrichmentResult {
    fn from(row: &RowState) -> Self {
        Self {
            key: row.key.clone(),
            extracted_data: row
                .extracted_data
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
            confidence: row.confidence.clone(),
            sources: row.sources.clone(),
            error: row.error.clone(),
        }
    }
}
