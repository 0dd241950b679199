use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use super::{advance, fail};
use crate::error::StageError;
use crate::models::{coerce_row, Decision, FieldConfidence, RowStage, SearchResults};
use crate::pipeline::events::{row_event, RowOutcome};
use crate::pipeline::message::Message;
use crate::pipeline::stage::Stage;
use crate::services::DecisionMaker;
use crate::state::{RowUpdate, StateManager};

/// Confidence given to decision values the decision maker did not score.
pub const SERP_DEFAULT_CONFIDENCE: f64 = 0.8;
const SERP_DEFAULT_REASON: &str = "Extracted from SERP results";

/// Merges the row's search results and asks the decision maker which URLs
/// to crawl and what is already answerable.
pub struct DecisionStage {
    decision_maker: Arc<dyn DecisionMaker>,
    state: Arc<StateManager>,
    max_urls: usize,
}

impl DecisionStage {
    pub fn new(
        decision_maker: Arc<dyn DecisionMaker>,
        state: Arc<StateManager>,
        max_urls: usize,
    ) -> Self {
        Self {
            decision_maker,
            state,
            max_urls,
        }
    }
}

#[async_trait]
impl Stage for DecisionStage {
    fn name(&self) -> &'static str {
        "decision"
    }

    async fn process(&self, msg: Message) -> Message {
        let started = Instant::now();

        let merged = msg
            .row
            .serp_data
            .as_ref()
            .and_then(|serp| SearchResults::merge(&serp.results));
        let Some(merged) = merged else {
            let error = StageError::MissingInput {
                stage: "decision",
                field: "search results",
            };
            let msg = fail(&self.state, msg, error).await;
            row_event(&msg, self.name(), RowOutcome::Failed, started);
            return msg;
        };

        let outcome = self
            .decision_maker
            .make_decision(&merged, &msg.row_key, self.max_urls, &msg.columns)
            .await;

        let msg = match outcome {
            Ok(decided) => {
                let mut confidence: BTreeMap<String, FieldConfidence> =
                    decided.confidence.unwrap_or_default();
                for (key, value) in &decided.extracted_data {
                    if !value.is_null() {
                        confidence.entry(key.clone()).or_insert_with(|| {
                            FieldConfidence::new(SERP_DEFAULT_CONFIDENCE, SERP_DEFAULT_REASON)
                        });
                    }
                }

                let values = coerce_row(&decided.extracted_data, &msg.columns, &mut confidence);
                confidence.retain(|key, _| msg.columns.iter().any(|c| &c.name == key));

                let missing_columns: Vec<String> = msg
                    .columns
                    .iter()
                    .filter(|c| !values.contains_key(&c.name))
                    .map(|c| c.name.clone())
                    .collect();

                let mut urls_to_crawl = decided.urls_to_crawl;
                urls_to_crawl.truncate(self.max_urls);

                let decision = Decision {
                    urls_to_crawl,
                    extracted_data: decided.extracted_data,
                    reasoning: decided.reasoning,
                    missing_columns,
                };
                let update = RowUpdate::new()
                    .with_decision(decision)
                    .with_extracted(values, confidence);
                advance(&self.state, msg, RowStage::DecisionMade, update).await
            }
            Err(e) => {
                let error = StageError::Capability {
                    capability: "decision_maker",
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
    use crate::models::{ColumnMetadata, FieldValue, OrganicResult, SerpData};
    use crate::pipeline::stages::test_support::{message, running_job, set_stage};
    use crate::services::CrawlDecision;
    use serde_json::json;
    use std::sync::Mutex;

    struct MockDecisionMaker {
        response: Result<CrawlDecision, CapabilityError>,
        seen: Mutex<Vec<(usize, usize)>>,
    }

    #[async_trait]
    impl DecisionMaker for MockDecisionMaker {
        async fn make_decision(
            &self,
            results: &SearchResults,
            _row_key: &str,
            max_urls: usize,
            _columns: &[ColumnMetadata],
        ) -> Result<CrawlDecision, CapabilityError> {
            self.seen
                .lock()
                .unwrap()
                .push((results.organic.len(), max_urls));
            self.response.clone()
        }
    }

    fn maker(response: Result<CrawlDecision, CapabilityError>) -> Arc<MockDecisionMaker> {
        Arc::new(MockDecisionMaker {
            response,
            seen: Mutex::new(Vec::new()),
        })
    }

    fn serp() -> SerpData {
        let page = |link: &str| SearchResults {
            organic: vec![OrganicResult::new("t", link, "s")],
            ..Default::default()
        };
        SerpData {
            queries: vec!["Acme ceo".to_string()],
            results: vec![page("https://a"), page("https://b"), page("https://a")],
        }
    }

    #[tokio::test]
    async fn test_decision_coerces_and_computes_missing() {
        let (state, job_id) = running_job(&["Acme"]).await;
        set_stage(&state, &job_id, "Acme", RowStage::SerpFetched, RowUpdate::new().with_serp(serp())).await;

        let mut data = serde_json::Map::new();
        data.insert("ceo".to_string(), json!("Jane Doe"));
        data.insert("employees".to_string(), json!(null));
        data.insert("unrelated".to_string(), json!("x"));
        let decision_maker = maker(Ok(CrawlDecision {
            urls_to_crawl: vec!["u1".into(), "u2".into(), "u3".into(), "u4".into()],
            extracted_data: data,
            confidence: None,
            reasoning: "kg".to_string(),
        }));
        let stage = DecisionStage::new(decision_maker.clone(), state.clone(), 3);

        let out = stage.process(message(&state, &job_id, "Acme").await).await;

        assert!(!out.is_failed());
        assert_eq!(*decision_maker.seen.lock().unwrap(), vec![(2, 3)]);
        assert_eq!(out.row.stage, RowStage::DecisionMade);
        assert_eq!(out.row.extracted_data["ceo"], FieldValue::from("Jane Doe"));
        assert!(!out.row.extracted_data.contains_key("unrelated"));
        assert_eq!(out.row.confidence["ceo"].score, SERP_DEFAULT_CONFIDENCE);
        assert!(!out.row.confidence.contains_key("employees"));

        let decision = out.row.decision.expect("decision");
        assert_eq!(decision.urls_to_crawl.len(), 3);
        assert_eq!(decision.missing_columns, vec!["employees"]);
    }

    #[tokio::test]
    async fn test_reported_confidence_is_kept() {
        let (state, job_id) = running_job(&["Acme"]).await;
        set_stage(&state, &job_id, "Acme", RowStage::SerpFetched, RowUpdate::new().with_serp(serp())).await;

        let mut data = serde_json::Map::new();
        data.insert("employees".to_string(), json!("about 1,200"));
        let mut confidence = BTreeMap::new();
        confidence.insert("employees".to_string(), FieldConfidence::new(0.3, "estimate"));
        let stage = DecisionStage::new(
            maker(Ok(CrawlDecision {
                urls_to_crawl: vec![],
                extracted_data: data,
                confidence: Some(confidence),
                reasoning: String::new(),
            })),
            state.clone(),
            3,
        );

        let out = stage.process(message(&state, &job_id, "Acme").await).await;
        assert_eq!(out.row.extracted_data["employees"], FieldValue::Number(1200.0));
        assert_eq!(out.row.confidence["employees"].score, 0.3);
        assert!(out.row.confidence["employees"].reason.starts_with("estimate"));
    }

    #[tokio::test]
    async fn test_missing_serp_data_fails_row() {
        let (state, job_id) = running_job(&["Acme"]).await;
        let stage = DecisionStage::new(maker(Ok(CrawlDecision::default())), state.clone(), 3);

        let out = stage.process(message(&state, &job_id, "Acme").await).await;
        assert_eq!(
            out.error,
            Some(StageError::MissingInput {
                stage: "decision",
                field: "search results"
            })
        );
        assert_eq!(state.get_row(&job_id, "Acme").await.unwrap().stage, RowStage::Failed);
    }

    #[tokio::test]
    async fn test_decision_error_fails_row() {
        let (state, job_id) = running_job(&["Acme"]).await;
        set_stage(&state, &job_id, "Acme", RowStage::SerpFetched, RowUpdate::new().with_serp(serp())).await;
        let stage = DecisionStage::new(
            maker(Err(CapabilityError::Timeout(30))),
            state.clone(),
            3,
        );

        let out = stage.process(message(&state, &job_id, "Acme").await).await;
        assert!(matches!(
            out.error,
            Some(StageError::Capability { capability: "decision_maker", .. })
        ));
    }
}
