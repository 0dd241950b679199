use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use super::{advance, fail};
use crate::error::StageError;
use crate::models::{coerce_row, ColumnMetadata, FieldConfidence, RowStage};
use crate::pipeline::events::{row_event, RowOutcome};
use crate::pipeline::message::Message;
use crate::pipeline::stage::Stage;
use crate::services::ContentExtractor;
use crate::state::{RowUpdate, StateManager};

const NO_VALUE_REASON: &str = "No value found";

/// Extracts the columns the decision left missing from crawled content.
///
/// Values the decision already produced are never overwritten. Target
/// columns that end up with neither a value nor a confidence entry get a
/// zero confidence so evaluation treats them as weak.
pub struct ExtractStage {
    extractor: Arc<dyn ContentExtractor>,
    state: Arc<StateManager>,
}

impl ExtractStage {
    pub fn new(extractor: Arc<dyn ContentExtractor>, state: Arc<StateManager>) -> Self {
        Self { extractor, state }
    }
}

#[async_trait]
impl Stage for ExtractStage {
    fn name(&self) -> &'static str {
        "extract"
    }

    async fn process(&self, msg: Message) -> Message {
        let started = Instant::now();

        let Some(decision) = msg.row.decision.as_ref() else {
            let error = StageError::MissingInput {
                stage: "extract",
                field: "decision",
            };
            let msg = fail(&self.state, msg, error).await;
            row_event(&msg, self.name(), RowOutcome::Failed, started);
            return msg;
        };

        let missing: Vec<ColumnMetadata> = msg
            .columns
            .iter()
            .filter(|c| decision.missing_columns.contains(&c.name))
            .cloned()
            .collect();
        let content = msg
            .row
            .crawl_results
            .as_ref()
            .and_then(|c| c.content.as_deref())
            .filter(|c| !c.trim().is_empty());

        let mut values = BTreeMap::new();
        let mut confidence: BTreeMap<String, FieldConfidence> = BTreeMap::new();
        let mut skipped = true;

        if let Some(content) = content.filter(|_| !missing.is_empty()) {
            skipped = false;
            match self.extractor.extract(content, &msg.row_key, &missing).await {
                Ok(extracted) => {
                    confidence = extracted.confidence;
                    values = coerce_row(&extracted.extracted_data, &missing, &mut confidence);
                    confidence.retain(|key, _| missing.iter().any(|c| &c.name == key));
                }
                Err(e) => {
                    let error = StageError::Capability {
                        capability: "content_extractor",
                        message: e.to_string(),
                    };
                    let msg = fail(&self.state, msg, error).await;
                    row_event(&msg, self.name(), RowOutcome::Failed, started);
                    return msg;
                }
            }
        }

        for column in msg.columns.iter() {
            let has_value =
                values.contains_key(&column.name) || msg.row.extracted_data.contains_key(&column.name);
            let has_confidence =
                confidence.contains_key(&column.name) || msg.row.confidence.contains_key(&column.name);
            if !has_value && !has_confidence {
                confidence.insert(
                    column.name.clone(),
                    FieldConfidence::new(0.0, NO_VALUE_REASON),
                );
            }
        }

        let update = RowUpdate::new().with_extracted(values, confidence);
        let msg = advance(&self.state, msg, RowStage::Enriched, update).await;

        let outcome = match (msg.is_failed(), skipped) {
            (true, _) => RowOutcome::Failed,
            (false, true) => RowOutcome::Skipped,
            (false, false) => RowOutcome::Completed,
        };
        row_event(&msg, self.name(), outcome, started);
        msg
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CapabilityError;
    use crate::models::{CrawlResults, Decision, FieldValue};
    use crate::pipeline::stages::test_support::{message, running_job, set_stage};
    use crate::services::ExtractionResult;
    use serde_json::json;
    use std::sync::Mutex;

    struct MockExtractor {
        response: Result<ExtractionResult, CapabilityError>,
        requested: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl ContentExtractor for MockExtractor {
        async fn extract(
            &self,
            _content: &str,
            _row_key: &str,
            columns: &[ColumnMetadata],
        ) -> Result<ExtractionResult, CapabilityError> {
            self.requested
                .lock()
                .unwrap()
                .push(columns.iter().map(|c| c.name.clone()).collect());
            self.response.clone()
        }
    }

    fn extractor(response: Result<ExtractionResult, CapabilityError>) -> Arc<MockExtractor> {
        Arc::new(MockExtractor {
            response,
            requested: Mutex::new(Vec::new()),
        })
    }

    /// A crawled row whose decision found `ceo` and left `employees` missing.
    async fn crawled_row(content: Option<&str>) -> (Arc<StateManager>, String) {
        let (state, job_id) = running_job(&["Acme"]).await;
        set_stage(&state, &job_id, "Acme", RowStage::SerpFetched, RowUpdate::new()).await;

        let mut data = BTreeMap::new();
        data.insert("ceo".to_string(), FieldValue::from("Jane Doe"));
        let mut conf = BTreeMap::new();
        conf.insert("ceo".to_string(), FieldConfidence::new(0.8, "serp"));
        let update = RowUpdate::new()
            .with_decision(Decision {
                urls_to_crawl: vec!["https://a".to_string()],
                missing_columns: vec!["employees".to_string()],
                ..Default::default()
            })
            .with_extracted(data, conf);
        set_stage(&state, &job_id, "Acme", RowStage::DecisionMade, update).await;

        let update = RowUpdate::new().with_crawl(CrawlResults {
            content: content.map(str::to_string),
            sources: vec!["https://a".to_string()],
        });
        set_stage(&state, &job_id, "Acme", RowStage::Crawled, update).await;
        (state, job_id)
    }

    #[tokio::test]
    async fn test_extracts_only_missing_columns() {
        let (state, job_id) = crawled_row(Some("Acme employs 1,500 people")).await;
        let mut data = serde_json::Map::new();
        data.insert("employees".to_string(), json!("1,500"));
        data.insert("ceo".to_string(), json!("Someone Else"));
        let mut conf = BTreeMap::new();
        conf.insert("employees".to_string(), FieldConfidence::new(0.9, "stated"));
        let mock = extractor(Ok(ExtractionResult {
            extracted_data: data,
            confidence: conf,
            reasoning: String::new(),
        }));
        let stage = ExtractStage::new(mock.clone(), state.clone());

        let out = stage.process(message(&state, &job_id, "Acme").await).await;

        assert!(!out.is_failed());
        assert_eq!(*mock.requested.lock().unwrap(), vec![vec!["employees".to_string()]]);
        assert_eq!(out.row.stage, RowStage::Enriched);
        assert_eq!(out.row.extracted_data["ceo"], FieldValue::from("Jane Doe"));
        assert_eq!(out.row.extracted_data["employees"], FieldValue::Number(1500.0));
        assert_eq!(out.row.confidence["employees"].score, 0.9);
        assert_eq!(out.row.confidence["ceo"].score, 0.8);
    }

    #[tokio::test]
    async fn test_no_content_marks_missing_columns_zero() {
        let (state, job_id) = crawled_row(None).await;
        let mock = extractor(Ok(ExtractionResult::default()));
        let stage = ExtractStage::new(mock.clone(), state.clone());

        let out = stage.process(message(&state, &job_id, "Acme").await).await;

        assert!(!out.is_failed());
        assert!(mock.requested.lock().unwrap().is_empty());
        let employees = &out.row.confidence["employees"];
        assert_eq!(employees.score, 0.0);
        assert_eq!(employees.reason, NO_VALUE_REASON);
        assert!(!out.row.extracted_data.contains_key("employees"));
    }

    #[tokio::test]
    async fn test_extractor_error_fails_row() {
        let (state, job_id) = crawled_row(Some("page")).await;
        let stage = ExtractStage::new(
            extractor(Err(CapabilityError::InvalidResponse("bad json".to_string()))),
            state.clone(),
        );

        let out = stage.process(message(&state, &job_id, "Acme").await).await;
        assert!(matches!(
            out.error,
            Some(StageError::Capability { capability: "content_extractor", .. })
        ));
        let row = state.get_row(&job_id, "Acme").await.unwrap();
        assert_eq!(row.stage, RowStage::Failed);
        assert_eq!(row.extracted_data["ceo"], FieldValue::from("Jane Doe"));
    }
}
