use crate::context::SessionContext;
use crate::error::{RecommenderError, Result};
use crate::models::{CandidateMap, ScoredProduct};
use crate::services::recommender::Recommender;
use async_trait::async_trait;
use std::sync::Arc;

/// Strategy failing on every call, to exercise error handling of callers
/// and hybrid compositions.
pub struct MockRecommender {
    context: Arc<SessionContext>,
}

impl MockRecommender {
    pub fn new(context: Arc<SessionContext>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl Recommender for MockRecommender {
    fn suffix(&self) -> &str {
        "Mock"
    }

    fn is_hybrid(&self) -> bool {
        false
    }

    fn score_arity(&self) -> usize {
        1
    }

    fn context(&self) -> &Arc<SessionContext> {
        &self.context
    }

    async fn gather_candidates(&mut self, _min_count: usize) -> Result<CandidateMap> {
        Err(RecommenderError::Mocked("gathering candidates"))
    }

    async fn score_candidates(
        &mut self,
        _candidates: &CandidateMap,
        _target_count: usize,
    ) -> Result<Vec<ScoredProduct>> {
        Err(RecommenderError::Mocked("scoring candidates"))
    }
}
