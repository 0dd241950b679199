use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;

use super::fail;
use crate::error::StageError;
use crate::pipeline::events::{row_event, RowOutcome};
use crate::pipeline::message::Message;
use crate::pipeline::stage::Stage;
use crate::services::QueryPatternGenerator;
use crate::state::StateManager;

/// Generates the row's search query patterns.
///
/// Patterns live on the message only; the row's persisted stage does not
/// change here.
pub struct PatternStage {
    generator: Arc<dyn QueryPatternGenerator>,
    state: Arc<StateManager>,
}

impl PatternStage {
    pub fn new(generator: Arc<dyn QueryPatternGenerator>, state: Arc<StateManager>) -> Self {
        Self { generator, state }
    }
}

#[async_trait]
impl Stage for PatternStage {
    fn name(&self) -> &'static str {
        "pattern"
    }

    async fn process(&self, mut msg: Message) -> Message {
        let started = Instant::now();

        let generated = self
            .generator
            .generate_patterns(&msg.columns, msg.feedback.as_ref())
            .await;

        let msg = match generated {
            Ok(patterns) if patterns.is_empty() => {
                fail(&self.state, msg, StageError::NoQueries).await
            }
            Ok(patterns) => {
                msg.patterns = patterns;
                msg
            }
            Err(e) => {
                let error = StageError::Capability {
                    capability: "pattern_generator",
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
