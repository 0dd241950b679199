//! Search, decision and crawl payloads produced by pipeline stages.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Entity panel returned alongside organic results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeGraph {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description_link: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrganicResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<u32>,
}

impl OrganicResult {
    pub fn new(title: impl Into<String>, link: impl Into<String>, snippet: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            link: Some(link.into()),
            snippet: Some(snippet.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeopleAlsoAsk {
    pub question: String,
    #[serde(default)]
    pub snippet: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub link: String,
}

/// Results of a single web search.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResults {
    /// The query that produced these results.
    #[serde(default)]
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub knowledge_graph: Option<KnowledgeGraph>,
    #[serde(default)]
    pub organic: Vec<OrganicResult>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub people_also_ask: Vec<PeopleAlsoAsk>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_searches: Vec<String>,
}

impl SearchResults {
    pub fn is_empty(&self) -> bool {
        self.knowledge_graph.is_none()
            && self.organic.is_empty()
            && self.people_also_ask.is_empty()
            && self.related_searches.is_empty()
    }

    /// Merge the results of several queries into one result set.
    ///
    /// The first knowledge graph wins. Organic results are deduplicated by
    /// link, and results without a link are dropped. Question and related
    /// search lists are concatenated. A single input is returned unchanged.
    pub fn merge(results: &[SearchResults]) -> Option<SearchResults> {
        match results {
            [] => None,
            [single] => Some(single.clone()),
            [first, ..] => {
                let mut merged = SearchResults {
                    query: first.query.clone(),
                    ..Default::default()
                };
                let mut seen: HashSet<&str> = HashSet::new();

                for result in results {
                    if merged.knowledge_graph.is_none() {
                        merged.knowledge_graph = result.knowledge_graph.clone();
                    }
                    for organic in &result.organic {
                        let Some(link) = organic.link.as_deref().filter(|l| !l.is_empty()) else {
                            continue;
                        };
                        if seen.insert(link) {
                            merged.organic.push(organic.clone());
                        }
                    }
                    merged
                        .people_also_ask
                        .extend(result.people_also_ask.iter().cloned());
                    merged
                        .related_searches
                        .extend(result.related_searches.iter().cloned());
                }

                Some(merged)
            }
        }
    }
}

/// Search output recorded on a row after the SERP stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SerpData {
    pub queries: Vec<String>,
    pub results: Vec<SearchResults>,
}

/// What the decision maker concluded from the search results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub urls_to_crawl: Vec<String>,
    /// Raw values the decision maker could already extract.
    #[serde(default)]
    pub extracted_data: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub reasoning: String,
    /// Target columns absent or null in `extracted_data`.
    #[serde(default)]
    pub missing_columns: Vec<String>,
}

/// Crawled page content for a row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CrawlResults {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default)]
    pub sources: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn results(query: &str, links: &[&str]) -> SearchResults {
        SearchResults {
            query: query.to_string(),
            organic: links
                .iter()
                .map(|l| OrganicResult::new(*l, *l, "snippet"))
                .collect(),
            related_searches: vec![format!("{} related", query)],
            ..Default::default()
        }
    }

    #[test]
    fn test_merge_empty_and_single() {
        assert!(SearchResults::merge(&[]).is_none());

        let single = results("acme ceo", &["https://a.com"]);
        assert_eq!(SearchResults::merge(&[single.clone()]), Some(single));
    }

    #[test]
    fn test_merge_dedups_organic_by_link() {
        let mut first = results("q1", &["https://a.com", "https://b.com"]);
        first.organic.push(OrganicResult {
            title: Some("no link".to_string()),
            ..Default::default()
        });
        let mut second = results("q2", &["https://b.com", "https://c.com"]);
        second.knowledge_graph = Some(KnowledgeGraph {
            title: Some("Acme".to_string()),
            ..Default::default()
        });

        let merged = SearchResults::merge(&[first, second]).expect("merged");
        let links: Vec<_> = merged
            .organic
            .iter()
            .filter_map(|o| o.link.as_deref())
            .collect();
        assert_eq!(links, vec!["https://a.com", "https://b.com", "https://c.com"]);
        assert_eq!(merged.query, "q1");
        assert_eq!(merged.related_searches.len(), 2);
        assert_eq!(
            merged.knowledge_graph.and_then(|kg| kg.title),
            Some("Acme".to_string())
        );
    }
}
