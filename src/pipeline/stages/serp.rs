use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Instant;

use super::{advance, fail};
use crate::error::StageError;
use crate::models::{RowStage, SerpData};
use crate::pipeline::events::{row_event, RowOutcome};
use crate::pipeline::message::Message;
use crate::pipeline::stage::Stage;
use crate::services::{PatternQueryBuilder, WebSearcher};
use crate::state::{RowUpdate, StateManager};

/// Runs one search per pattern, concurrently, and records every
/// successful result set. The row fails only when every query fails.
pub struct SerpStage {
    searcher: Arc<dyn WebSearcher>,
    state: Arc<StateManager>,
}

impl SerpStage {
    pub fn new(searcher: Arc<dyn WebSearcher>, state: Arc<StateManager>) -> Self {
        Self { searcher, state }
    }
}

#[async_trait]
impl Stage for SerpStage {
    fn name(&self) -> &'static str {
        "serp"
    }

    async fn process(&self, msg: Message) -> Message {
        let started = Instant::now();

        if msg.patterns.is_empty() {
            let error = StageError::MissingInput {
                stage: "serp",
                field: "query patterns",
            };
            let msg = fail(&self.state, msg, error).await;
            row_event(&msg, self.name(), RowOutcome::Failed, started);
            return msg;
        }

        let queries = PatternQueryBuilder::new(msg.patterns.clone()).build(&msg.row_key);
        let outcomes = join_all(queries.iter().map(|q| self.searcher.search(q))).await;

        let mut results = Vec::with_capacity(outcomes.len());
        let mut last_error = None;
        for (query, outcome) in queries.iter().zip(outcomes) {
            match outcome {
                Ok(found) => results.push(found),
                Err(e) => {
                    tracing::debug!(
                        job_id = %msg.job_id,
                        row_key = %msg.row_key,
                        query = %query,
                        error = %e,
                        "Search query failed"
                    );
                    last_error = Some(e);
                }
            }
        }

        let msg = match last_error {
            Some(e) if results.is_empty() => {
                let error = StageError::Capability {
                    capability: "web_searcher",
                    message: e.to_string(),
                };
                fail(&self.state, msg, error).await
            }
            _ => {
                let update = RowUpdate::new().with_serp(SerpData { queries, results });
                advance(&self.state, msg, RowStage::SerpFetched, update).await
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
