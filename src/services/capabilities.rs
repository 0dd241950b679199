//! External capabilities the pipeline stages call.
//!
//! Each stage depends on exactly one of these traits. Implementations wrap
//! search APIs, crawlers and LLM providers; the core only sees the trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::CapabilityError;
use crate::feedback::EnrichmentFeedback;
use crate::models::{ColumnMetadata, FieldConfidence, SearchResults};

/// Runs a single web search.
#[async_trait]
pub trait WebSearcher: Send + Sync {
    async fn search(&self, query: &str) -> Result<SearchResults, CapabilityError>;
}

/// What a [`DecisionMaker`] concluded from merged search results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CrawlDecision {
    pub urls_to_crawl: Vec<String>,
    /// Values already answerable from the search results, loosely typed.
    #[serde(default)]
    pub extracted_data: serde_json::Map<String, serde_json::Value>,
    /// Per-field confidence, when the decision maker reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<BTreeMap<String, FieldConfidence>>,
    #[serde(default)]
    pub reasoning: String,
}

/// Decides which URLs to crawl and what can already be extracted.
#[async_trait]
pub trait DecisionMaker: Send + Sync {
    async fn make_decision(
        &self,
        results: &SearchResults,
        row_key: &str,
        max_urls: usize,
        columns: &[ColumnMetadata],
    ) -> Result<CrawlDecision, CapabilityError>;
}

/// Fetches page content for a set of URLs.
#[async_trait]
pub trait WebCrawler: Send + Sync {
    /// Returns the concatenated, query-focused content of `urls`.
    async fn crawl(&self, urls: &[String], query: &str) -> Result<String, CapabilityError>;
}

/// Output of a [`ContentExtractor`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    #[serde(default)]
    pub extracted_data: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub confidence: BTreeMap<String, FieldConfidence>,
    #[serde(default)]
    pub reasoning: String,
}

/// Pulls column values out of crawled content.
#[async_trait]
pub trait ContentExtractor: Send + Sync {
    async fn extract(
        &self,
        content: &str,
        row_key: &str,
        columns: &[ColumnMetadata],
    ) -> Result<ExtractionResult, CapabilityError>;
}

/// Produces search query patterns containing the `%entity` placeholder.
#[async_trait]
pub trait QueryPatternGenerator: Send + Sync {
    /// Generate patterns for `columns`. Retry feedback, when given, should
    /// steer away from the patterns it lists.
    async fn generate_patterns(
        &self,
        columns: &[ColumnMetadata],
        feedback: Option<&EnrichmentFeedback>,
    ) -> Result<Vec<String>, CapabilityError>;
}
