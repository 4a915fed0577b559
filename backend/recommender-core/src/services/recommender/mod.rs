mod pipeline;

pub use pipeline::{gather_processed_candidates, post_process_scores, recommend};

use crate::context::{FilterStrategy, SessionContext};
use crate::error::Result;
use crate::models::{CandidateMap, ProductId, RecommendationResult, ScoredProduct};
use crate::services::ranking;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;

/// Key of the single candidate set shared by all strategies under the
/// BEFORE_SCORING filter strategy.
pub const PRE_FILTER: &str = "pf";

/// Tag of the tuples given to pre-filtered products that no strategy scored
/// (hybrid recommenders only).
pub const PRE_FILTER_TAG: &str = "PRE-FILTER";

/// Recommendation strategy.
///
/// Each strategy gathers its own candidates and scores them; filtering,
/// decays, ranking and near-identical suppression are shared and driven by
/// [`recommend`](Recommender::recommend).
#[async_trait]
pub trait Recommender: Send + Sync {
    /// Short algorithm name, also the key of this strategy's candidates.
    fn suffix(&self) -> &str;

    /// Hybrid recommenders lead every score tuple with the contributing
    /// algorithm's tag.
    fn is_hybrid(&self) -> bool;

    /// Number of numeric components in the score tuples this strategy emits.
    fn score_arity(&self) -> usize;

    fn context(&self) -> &Arc<SessionContext>;

    /// Candidate products of this strategy, keyed by algorithm suffix.
    /// Should return at least `min_count` products when that many exist.
    async fn gather_candidates(&mut self, min_count: usize) -> Result<CandidateMap>;

    /// Scores this strategy's share of `candidates` (see
    /// [`select_candidates`](Recommender::select_candidates)).
    async fn score_candidates(
        &mut self,
        candidates: &CandidateMap,
        target_count: usize,
    ) -> Result<Vec<ScoredProduct>>;

    /// Picks the pre-filtered set or this strategy's own set, depending on the
    /// filter strategy. Missing entries resolve to an empty set.
    fn select_candidates<'a>(&self, candidates: &'a CandidateMap) -> &'a HashSet<ProductId> {
        let key = match self.context().filter_strategy() {
            FilterStrategy::BeforeScoring => PRE_FILTER,
            FilterStrategy::AfterScoring => self.suffix(),
        };
        candidates.get(key).unwrap_or_else(|| no_candidates())
    }

    fn is_valid(&self, product_id: &str) -> bool {
        self.context().filtered_products().contains(product_id)
    }

    fn has_blocking_activity(&self, product_id: &str) -> bool {
        self.context().blocked_products().contains(product_id)
    }

    fn can_recommend(&self, product_id: &str) -> bool {
        !self.has_blocking_activity(product_id) && self.is_valid(product_id)
    }

    /// Applies decays and boosts; see [`post_process_scores`].
    fn post_process(&self, scored: Vec<ScoredProduct>) -> Vec<ScoredProduct> {
        post_process_scores(self.context(), self.is_hybrid(), scored)
    }

    /// Keeps the `count` best scored products, best first.
    fn rank(&self, scored: Vec<ScoredProduct>, count: usize) -> Vec<ScoredProduct> {
        ranking::top_k(scored, count)
    }

    async fn recommend(&mut self, n_recommendations: usize) -> Result<RecommendationResult> {
        pipeline::recommend(self, n_recommendations).await
    }
}

/// Empty set returned when a strategy has no entry in the candidate map.
pub(crate) fn no_candidates() -> &'static HashSet<ProductId> {
    static EMPTY: std::sync::OnceLock<HashSet<ProductId>> = std::sync::OnceLock::new();
    EMPTY.get_or_init(HashSet::new)
}
