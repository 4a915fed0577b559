mod merge;

pub use merge::{merge_chunks, merge_random, merge_voting, Contributions, WeightedAlgorithm};

use crate::context::SessionContext;
use crate::error::{RecommenderError, Result};
use crate::models::{CandidateMap, ProductId, ScoredProduct};
use crate::services::ranking::top_k;
use crate::services::recommender::Recommender;
use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{error, info, warn};

/// How specialist contributions are merged into one ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergePolicy {
    Chunks,
    Random,
    Voting,
}

impl MergePolicy {
    pub fn suffix(&self) -> &'static str {
        match self {
            MergePolicy::Chunks => "HRChunks",
            MergePolicy::Random => "HRRandom",
            MergePolicy::Voting => "HRVoting",
        }
    }
}

/// A weighted strategy taking part in a hybrid.
pub struct Specialist {
    recommender: Box<dyn Recommender>,
    weight: f64,
    no_bonus: bool,
}

impl Specialist {
    pub fn new(recommender: Box<dyn Recommender>, weight: f64) -> Self {
        Self {
            recommender,
            weight,
            no_bonus: false,
        }
    }

    /// Excludes this specialist from the periodic bonus of the voting policy.
    pub fn without_bonus(mut self) -> Self {
        self.no_bonus = true;
        self
    }
}

/// Hybrid Recommender - 多策略融合
///
/// Runs its specialists concurrently (each bounded by the configured
/// timeout) and merges their rankings with a [`MergePolicy`]. A failing or
/// slow specialist only loses its own contribution. An optional fill-in
/// strategy tops the ranking up when the specialists run short.
///
/// Specialists decay their own scores, so the hybrid's post-processing is
/// the identity and its ranking keeps merge order.
pub struct HybridRecommender {
    context: Arc<SessionContext>,
    policy: MergePolicy,
    specialists: Vec<Specialist>,
    fill_in: Option<Box<dyn Recommender>>,
    fill_in_suffix: Option<String>,
}

impl HybridRecommender {
    pub fn new(context: Arc<SessionContext>, policy: MergePolicy, specialists: Vec<Specialist>) -> Result<Self> {
        if specialists.is_empty() {
            return Err(RecommenderError::configuration(format!(
                "{} needs at least one specialist",
                policy.suffix()
            )));
        }

        for specialist in &specialists {
            if !(specialist.weight.is_finite() && specialist.weight > 0.0) {
                return Err(RecommenderError::Configuration(format!(
                    "specialist {} has a non-positive weight {}",
                    specialist.recommender.suffix(),
                    specialist.weight
                )));
            }
        }

        Ok(Self {
            context,
            policy,
            specialists,
            fill_in: None,
            fill_in_suffix: None,
        })
    }

    /// Sets the fill-in strategy. A strategy that is already a specialist is
    /// not run twice.
    pub fn with_fill_in(mut self, fill_in: Box<dyn Recommender>) -> Self {
        let suffix = fill_in.suffix().to_string();
        let already_specialist = self
            .specialists
            .iter()
            .any(|s| s.recommender.suffix() == suffix);

        self.fill_in = if already_specialist { None } else { Some(fill_in) };
        self.fill_in_suffix = Some(suffix);
        self
    }

    pub fn policy(&self) -> MergePolicy {
        self.policy
    }

    fn specialist_timeout(&self) -> Duration {
        Duration::from_millis(self.context.settings().specialist_timeout_ms)
    }

    /// Specialists followed by the separate fill-in strategy, if any.
    fn members_mut(&mut self) -> Vec<&mut (dyn Recommender + 'static)> {
        let mut members: Vec<&mut (dyn Recommender + 'static)> = Vec::with_capacity(self.specialists.len() + 1);
        for specialist in self.specialists.iter_mut() {
            members.push(specialist.recommender.as_mut());
        }
        if let Some(fill_in) = self.fill_in.as_mut() {
            members.push(fill_in.as_mut());
        }
        members
    }

    fn merge(&self, contributions: &Contributions, n_recommendations: usize) -> Vec<ScoredProduct> {
        let algorithms: Vec<WeightedAlgorithm<'_>> = self
            .specialists
            .iter()
            .map(|s| WeightedAlgorithm {
                suffix: s.recommender.suffix(),
                weight: s.weight,
                no_bonus: s.no_bonus,
            })
            .collect();

        match self.policy {
            MergePolicy::Chunks => merge_chunks(&algorithms, contributions, n_recommendations),
            MergePolicy::Random => {
                merge_random(&algorithms, contributions, n_recommendations, &mut rand::thread_rng())
            }
            MergePolicy::Voting => merge_voting(
                &algorithms,
                contributions,
                n_recommendations,
                self.context.settings().voting_bonus_period,
            ),
        }
    }

    /// Appends unseen fill-in items, tagged with the fill-in suffix, until
    /// `n_recommendations` are reached.
    fn include_fill_in(
        &self,
        recommendations: &mut Vec<ScoredProduct>,
        contributions: &Contributions,
        n_recommendations: usize,
    ) {
        let Some(fill_in_suffix) = self.fill_in_suffix.as_deref() else {
            return;
        };
        let missing = n_recommendations.saturating_sub(recommendations.len());
        if missing == 0 {
            return;
        }

        info!("fill-in items required: {}", missing);
        let Some(items) = contributions.get(fill_in_suffix) else {
            info!("No items were returned by the fill-in algorithm.");
            return;
        };

        let mut seen: HashSet<ProductId> = recommendations.iter().map(|r| r.product_id.clone()).collect();
        let before = recommendations.len();
        for item in items {
            if recommendations.len() >= n_recommendations {
                break;
            }
            if seen.insert(item.product_id.clone()) {
                recommendations.push(ScoredProduct::new(item.score.tagged(fill_in_suffix), item.product_id.clone()));
            }
        }
        info!("fill-in items used: {}", recommendations.len() - before);
    }
}

#[async_trait]
impl Recommender for HybridRecommender {
    fn suffix(&self) -> &str {
        self.policy.suffix()
    }

    fn is_hybrid(&self) -> bool {
        true
    }

    fn score_arity(&self) -> usize {
        1
    }

    fn context(&self) -> &Arc<SessionContext> {
        &self.context
    }

    async fn gather_candidates(&mut self, min_count: usize) -> Result<CandidateMap> {
        let limit = self.specialist_timeout();

        let gathering: Vec<_> = self
            .members_mut()
            .into_iter()
            .map(|recommender| gather_from(recommender, min_count, limit))
            .collect();

        let mut candidates = CandidateMap::new();
        for gathered in join_all(gathering).await {
            candidates.extend(gathered);
        }

        Ok(candidates)
    }

    async fn score_candidates(
        &mut self,
        candidates: &CandidateMap,
        target_count: usize,
    ) -> Result<Vec<ScoredProduct>> {
        let limit = self.specialist_timeout();

        let querying: Vec<_> = self
            .members_mut()
            .into_iter()
            .map(|recommender| query_specialist(recommender, candidates, target_count, limit))
            .collect();
        let contributions: Contributions = join_all(querying).await.into_iter().collect();

        let mut recommendations = self.merge(&contributions, target_count);
        if recommendations.is_empty() {
            warn!("No specialist of {} contributed any item", self.suffix());
        }
        self.include_fill_in(&mut recommendations, &contributions, target_count);

        Ok(recommendations)
    }

    fn post_process(&self, scored: Vec<ScoredProduct>) -> Vec<ScoredProduct> {
        scored
    }

    fn rank(&self, mut scored: Vec<ScoredProduct>, count: usize) -> Vec<ScoredProduct> {
        scored.truncate(count);
        scored
    }
}

/// Candidates of one specialist; failures and timeouts yield an empty set.
async fn gather_from(
    recommender: &mut (dyn Recommender + 'static),
    min_count: usize,
    limit: Duration,
) -> CandidateMap {
    let suffix = recommender.suffix().to_string();
    info!("Gathering candidate products for {}...", suffix);

    match timeout(limit, recommender.gather_candidates(min_count)).await {
        Ok(Ok(candidates)) => candidates,
        Ok(Err(e)) => {
            error!(algorithm = %suffix, error = %e, "Specialist gather_candidates failed");
            HashMap::from([(suffix, HashSet::new())])
        }
        Err(_) => {
            error!(algorithm = %suffix, timeout_ms = limit.as_millis() as u64, "Specialist recommender timed out");
            HashMap::from([(suffix, HashSet::new())])
        }
    }
}

/// Scores, post-processes and sorts (best first) one specialist's share of
/// the candidates; failures and timeouts contribute nothing.
async fn query_specialist(
    recommender: &mut (dyn Recommender + 'static),
    candidates: &CandidateMap,
    target_count: usize,
    limit: Duration,
) -> (String, Vec<ScoredProduct>) {
    let suffix = recommender.suffix().to_string();
    let started = Instant::now();
    info!("Querying [{}]...", suffix);

    let query = async {
        let scored = recommender.score_candidates(candidates, target_count).await?;
        let scored_count = scored.len();
        let processed = recommender.post_process(scored);
        let processed_count = processed.len();
        Ok::<_, RecommenderError>((top_k(processed, processed_count), scored_count))
    };

    let contribution = match timeout(limit, query).await {
        Ok(Ok((sorted, scored_count))) => {
            info!(
                "[{}] returned [{}] scores before post-processing ([{}] after post-processing). Took {} milliseconds.",
                suffix,
                scored_count,
                sorted.len(),
                started.elapsed().as_millis()
            );
            sorted
        }
        Ok(Err(e)) => {
            error!(algorithm = %suffix, error = %e, "Specialist scoring failed");
            Vec::new()
        }
        Err(_) => {
            error!(algorithm = %suffix, timeout_ms = limit.as_millis() as u64, "Specialist recommender timed out");
            Vec::new()
        }
    };

    (suffix, contribution)
}
