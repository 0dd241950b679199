//! The five standard stages: pattern, SERP, decision, crawl, extract.

mod crawl;
mod decision;
mod extract;
mod pattern;
mod serp;

pub use crawl::CrawlStage;
pub use decision::DecisionStage;
pub use extract::ExtractStage;
pub use pattern::PatternStage;
pub use serp::SerpStage;

use std::sync::Arc;

use super::message::Message;
use crate::error::StageError;
use crate::models::RowStage;
use crate::services::{
    ContentExtractor, DecisionMaker, QueryPatternGenerator, WebCrawler, WebSearcher,
};
use crate::state::{RowUpdate, StateManager};

/// The external capabilities the standard stages need, one per stage.
#[derive(Clone)]
pub struct Capabilities {
    pub pattern_generator: Arc<dyn QueryPatternGenerator>,
    pub searcher: Arc<dyn WebSearcher>,
    pub decision_maker: Arc<dyn DecisionMaker>,
    pub crawler: Arc<dyn WebCrawler>,
    pub extractor: Arc<dyn ContentExtractor>,
}

/// Persist `update` as a move to `to_stage` and refresh the message's row
/// snapshot. A failed transition is recorded on the message.
pub(crate) async fn advance(
    state: &StateManager,
    mut msg: Message,
    to_stage: RowStage,
    update: RowUpdate,
) -> Message {
    match state
        .transition(&msg.job_id, &msg.row_key, to_stage, update)
        .await
    {
        Ok(row) => msg.row = row,
        Err(e) => msg.error = Some(StageError::State(e.to_string())),
    }
    msg
}

/// Mark the row `FAILED` with `error` and attach the error to the message
/// so downstream stages pass it through.
pub(crate) async fn fail(state: &StateManager, msg: Message, error: StageError) -> Message {
    let update = RowUpdate::new().with_error(error.to_string());
    let mut msg = advance(state, msg, RowStage::Failed, update).await;
    if msg.error.is_none() {
        msg.error = Some(error);
    }
    msg
}
