use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;

use super::{advance, fail};
use crate::error::StageError;
use crate::models::{CrawlResults, RowStage};
use crate::pipeline::events::{row_event, RowOutcome};
use crate::pipeline::message::Message;
use crate::pipeline::stage::Stage;
use crate::services::WebCrawler;
use crate::state::{RowUpdate, StateManager};

/// Crawls the URLs the decision selected. Rows with no URLs move on with
/// empty crawl results.
pub struct CrawlStage {
    crawler: Arc<dyn WebCrawler>,
    state: Arc<StateManager>,
}

impl CrawlStage {
    pub fn new(crawler: Arc<dyn WebCrawler>, state: Arc<StateManager>) -> Self {
        Self { crawler, state }
    }
}

#[async_trait]
impl Stage for CrawlStage {
    fn name(&self) -> &'static str {
        "crawl"
    }

    async fn process(&self, msg: Message) -> Message {
        let started = Instant::now();

        let Some(urls) = msg.row.decision.as_ref().map(|d| d.urls_to_crawl.clone()) else {
            let error = StageError::MissingInput {
                stage: "crawl",
                field: "decision",
            };
            let msg = fail(&self.state, msg, error).await;
            row_event(&msg, self.name(), RowOutcome::Failed, started);
            return msg;
        };

        if urls.is_empty() {
            let update = RowUpdate::new().with_crawl(CrawlResults::default());
            let msg = advance(&self.state, msg, RowStage::Crawled, update).await;
            let outcome = if msg.is_failed() {
                RowOutcome::Failed
            } else {
                RowOutcome::Skipped
            };
            row_event(&msg, self.name(), outcome, started);
            return msg;
        }

        let query = msg
            .row
            .serp_data
            .as_ref()
            .map(|serp| serp.queries.join(" "))
            .unwrap_or_else(|| msg.row_key.clone());

        let msg = match self.crawler.crawl(&urls, &query).await {
            Ok(content) => {
                let update = RowUpdate::new()
                    .with_crawl(CrawlResults {
                        content: Some(content),
                        sources: urls.clone(),
                    })
                    .with_sources(urls);
                advance(&self.state, msg, RowStage::Crawled, update).await
            }
            Err(e) => {
                let error = StageError::Capability {
                    capability: "web_crawler",
                    message: e.to_string(),
                };
                fail(&self.state, msg, error).await
            }
        };

        let outcome = if msg.is_failed() {
            RowOutcome::Failed
        } else {
            RowOutcome::Completed
        };
        row_event(&msg, self.name(), outcome, started);
        msg
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CapabilityError;
    use crate::models::{Decision, SerpData};
    use crate::pipeline::stages::test_support::{message, running_job, set_stage};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct MockCrawler {
        calls: AtomicUsize,
        last_query: Mutex<Option<String>>,
        fail: bool,
    }

    impl MockCrawler {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                last_query: Mutex::new(None),
                fail,
            })
        }
    }

    #[async_trait]
    impl WebCrawler for MockCrawler {
        async fn crawl(&self, urls: &[String], query: &str) -> Result<String, CapabilityError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_query.lock().unwrap() = Some(query.to_string());
            if self.fail {
                return Err(CapabilityError::RequestFailed("connection reset".to_string()));
            }
            Ok(format!("content of {}", urls.join(",")))
        }
    }

    async fn decided_row(urls: &[&str]) -> (Arc<StateManager>, String) {
        let (state, job_id) = running_job(&["Acme"]).await;
        let update = RowUpdate::new().with_serp(SerpData {
            queries: vec!["Acme ceo".to_string(), "Acme staff".to_string()],
            results: vec![],
        });
        set_stage(&state, &job_id, "Acme", RowStage::SerpFetched, update).await;
        let update = RowUpdate::new().with_decision(Decision {
            urls_to_crawl: urls.iter().map(|u| u.to_string()).collect(),
            ..Default::default()
        });
        set_stage(&state, &job_id, "Acme", RowStage::DecisionMade, update).await;
        (state, job_id)
    }

    #[tokio::test]
    async fn test_crawl_records_content_and_sources() {
        let (state, job_id) = decided_row(&["https://a", "https://b"]).await;
        let crawler = MockCrawler::new(false);
        let stage = CrawlStage::new(crawler.clone(), state.clone());

        let out = stage.process(message(&state, &job_id, "Acme").await).await;

        assert!(!out.is_failed());
        assert_eq!(out.row.stage, RowStage::Crawled);
        assert_eq!(out.row.sources, vec!["https://a", "https://b"]);
        let crawl = out.row.crawl_results.expect("crawl results");
        assert_eq!(crawl.content.as_deref(), Some("content of https://a,https://b"));
        assert_eq!(
            crawler.last_query.lock().unwrap().as_deref(),
            Some("Acme ceo Acme staff")
        );
    }

    #[tokio::test]
    async fn test_no_urls_skips_crawler() {
        let (state, job_id) = decided_row(&[]).await;
        let crawler = MockCrawler::new(false);
        let stage = CrawlStage::new(crawler.clone(), state.clone());

        let out = stage.process(message(&state, &job_id, "Acme").await).await;

        assert!(!out.is_failed());
        assert_eq!(crawler.calls.load(Ordering::SeqCst), 0);
        assert_eq!(out.row.stage, RowStage::Crawled);
        assert_eq!(out.row.crawl_results, Some(CrawlResults::default()));
    }

    #[tokio::test]
    async fn test_crawler_error_fails_row() {
        let (state, job_id) = decided_row(&["https://a"]).await;
        let stage = CrawlStage::new(MockCrawler::new(true), state.clone());

        let out = stage.process(message(&state, &job_id, "Acme").await).await;
        assert!(matches!(
            out.error,
            Some(StageError::Capability { capability: "web_crawler", .. })
        ));
        assert_eq!(state.get_row(&job_id, "Acme").await.unwrap().stage, RowStage::Failed);
    }

    #[tokio::test]
    async fn test_missing_decision_fails_row() {
        let (state, job_id) = running_job(&["Acme"]).await;
        let stage = CrawlStage::new(MockCrawler::new(false), state.clone());

        let out = stage.process(message(&state, &job_id, "Acme").await).await;
        assert!(matches!(
            out.error,
            Some(StageError::MissingInput { stage: "crawl", .. })
        ));
    }
}
