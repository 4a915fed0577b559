use crate::context::SessionContext;
use crate::error::Result;
use crate::models::{CandidateMap, ProductId, ScoreTuple, ScoredProduct};
use crate::services::recommender::Recommender;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;

/// Contribution of one (template user, product) pair to the product's score.
pub trait UserScoring: Send + Sync + 'static {
    const SUFFIX: &'static str;

    fn calculate_score(context: &SessionContext, strength: f64, template_user: &str, product_id: &str) -> f64;
}

/// Template strength weighted by the out-boost of the template user's
/// latest activity on the product.
pub struct StrengthTimesOutBoost;

impl UserScoring for StrengthTimesOutBoost {
    const SUFFIX: &'static str = "UBCF";

    fn calculate_score(context: &SessionContext, strength: f64, template_user: &str, product_id: &str) -> f64 {
        strength * context.out_boost(template_user, product_id)
    }
}

pub type UserCfRecommender = UserBasedRecommender<StrengthTimesOutBoost>;

/// User-based Collaborative Filtering Strategy
///
/// Algorithm:
/// 1. Candidates are the products recently consumed by the user's templates
///    (similar users)
/// 2. Each template adds its (boosted) strength to every product it rated
///    at least the minimum recommendable rating
///
/// Anonymous users get nothing.
pub struct UserBasedRecommender<S: UserScoring> {
    context: Arc<SessionContext>,
    _scoring: PhantomData<fn() -> S>,
}

impl<S: UserScoring> UserBasedRecommender<S> {
    pub fn new(context: Arc<SessionContext>) -> Self {
        Self {
            context,
            _scoring: PhantomData,
        }
    }

    /// Products a template user acted on with a recommendable rating.
    fn recommendable_products_of(&self, template_user: &str) -> HashSet<&ProductId> {
        let min_rating = self.context.min_rating();
        self.context
            .recent_activities_of(template_user)
            .iter()
            .filter(|a| {
                self.context
                    .rating_of(&a.activity_type)
                    .map_or(false, |rating| rating >= min_rating)
            })
            .map(|a| &a.product_id)
            .collect()
    }
}

#[async_trait]
impl<S: UserScoring> Recommender for UserBasedRecommender<S> {
    fn suffix(&self) -> &str {
        S::SUFFIX
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
        let mut candidates: HashSet<ProductId> = HashSet::new();

        if !self.context.is_anonymous() {
            for template in self.context.user_templates() {
                candidates.extend(
                    self.context
                        .recent_activities_of(&template.template_id)
                        .iter()
                        .map(|a| a.product_id.clone()),
                );
            }
        }

        Ok(HashMap::from([(S::SUFFIX.to_string(), candidates)]))
    }

    async fn score_candidates(
        &mut self,
        candidates: &CandidateMap,
        _target_count: usize,
    ) -> Result<Vec<ScoredProduct>> {
        if self.context.is_anonymous() {
            debug!("Anonymous user, skipping user-based scoring");
            return Ok(Vec::new());
        }

        let selected = self.select_candidates(candidates);
        let mut score_by_product: HashMap<&ProductId, f64> = HashMap::new();

        for template in self.context.user_templates() {
            for product_id in self.recommendable_products_of(&template.template_id) {
                if !selected.contains(product_id) {
                    continue;
                }

                let increment =
                    S::calculate_score(&self.context, template.strength, &template.template_id, product_id);
                if increment != 0.0 {
                    *score_by_product.entry(product_id).or_insert(0.0) += increment;
                }
            }
        }

        Ok(score_by_product
            .into_iter()
            .map(|(product_id, score)| ScoredProduct::new(ScoreTuple::from_values([score]), product_id.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecommenderSettings;
    use crate::models::{Activity, Template};
    use chrono::Utc;

    fn builder(user_id: &str) -> crate::context::SessionContextBuilder {
        let now = Utc::now();
        SessionContext::builder(user_id, RecommenderSettings::default())
            .user_templates(vec![Template::new(0.8, "t1"), Template::new(0.5, "t2"), Template::new(0.0, "t3")])
            .template_user_activities(
                "t1",
                vec![Activity::new("p1", "buy", now), Activity::new("p2", "view", now)],
            )
            .template_user_activities(
                "t2",
                vec![Activity::new("p1", "buy", now), Activity::new("p3", "unknown", now)],
            )
            .template_user_activities("t3", vec![Activity::new("p4", "buy", now)])
            .rating_by_activity(
                [("buy".to_string(), 5.0), ("view".to_string(), 1.0)]
                    .into_iter()
                    .collect(),
            )
    }

    #[tokio::test]
    async fn test_strengths_add_up_over_templates() {
        let context = builder("u1")
            .out_boost_by_activity([("buy".to_string(), 2.0)].into_iter().collect())
            .build()
            .unwrap();
        let mut recommender = UserCfRecommender::new(Arc::new(context));

        let candidates = recommender.gather_candidates(10).await.unwrap();
        assert_eq!(candidates["UBCF"].len(), 4);

        let scored = recommender.score_candidates(&candidates, 10).await.unwrap();

        // p2 is rated too low, p3 has no known rating, p4 only gets a zero increment
        assert_eq!(scored.len(), 1);
        assert_eq!(scored[0].product_id, "p1");
        let expected = 0.8 * 2.0 + 0.5 * 2.0;
        assert!((scored[0].score.value(0).unwrap() - expected).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_anonymous_user_gets_nothing() {
        let context = builder("hmrtmp-42").build().unwrap();
        let mut recommender = UserCfRecommender::new(Arc::new(context));

        let candidates = recommender.gather_candidates(10).await.unwrap();
        assert!(candidates["UBCF"].is_empty());

        let everything: CandidateMap = HashMap::from([(
            "UBCF".to_string(),
            ["p1".to_string()].into_iter().collect(),
        )]);
        assert!(recommender.score_candidates(&everything, 10).await.unwrap().is_empty());
        assert!(recommender.recommend(5).await.unwrap().is_empty());
    }
}
