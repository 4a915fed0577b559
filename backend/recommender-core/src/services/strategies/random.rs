use crate::context::SessionContext;
use crate::error::Result;
use crate::models::{CandidateMap, ProductId, ScoreTuple, ScoredProduct};
use crate::providers::ProductCatalog;
use crate::services::recommender::Recommender;
use async_trait::async_trait;
use rand::seq::SliceRandom;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::info;

/// Random Strategy
///
/// Samples live catalog products the user has not consumed and scores them
/// in a random order, from 1 down to 0.
pub struct RandomRecommender {
    context: Arc<SessionContext>,
    catalog: Arc<dyn ProductCatalog>,
}

impl RandomRecommender {
    pub fn new(context: Arc<SessionContext>, catalog: Arc<dyn ProductCatalog>) -> Self {
        Self { context, catalog }
    }
}

#[async_trait]
impl Recommender for RandomRecommender {
    fn suffix(&self) -> &str {
        "Random"
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

    async fn gather_candidates(&mut self, min_count: usize) -> Result<CandidateMap> {
        let product_ids = self
            .catalog
            .fetch_all_product_ids(false, self.context.present_date())
            .await?;

        if product_ids.is_empty() {
            info!("Catalog is empty, no random candidates");
            return Ok(HashMap::new());
        }

        let unblocked: Vec<&ProductId> = product_ids
            .iter()
            .filter(|p| !self.context.blocked_products().contains(*p))
            .collect();
        let sampled = sample_products(&unblocked, min_count);

        Ok(HashMap::from([(self.suffix().to_string(), sampled)]))
    }

    async fn score_candidates(
        &mut self,
        candidates: &CandidateMap,
        target_count: usize,
    ) -> Result<Vec<ScoredProduct>> {
        let ordered = shuffled(self.select_candidates(candidates), target_count);

        Ok(ordered
            .into_iter()
            .enumerate()
            .map(|(position, product_id)| {
                ScoredProduct::new(
                    ScoreTuple::from_values([rank_score(position, target_count)]),
                    product_id,
                )
            })
            .collect())
    }
}

/// Uniform sample of at most `count` products.
fn sample_products(products: &[&ProductId], count: usize) -> HashSet<ProductId> {
    // `count` follows the requested page size and may far exceed the catalog
    let count = count.min(products.len());
    products
        .choose_multiple(&mut rand::thread_rng(), count)
        .map(|p| (*p).clone())
        .collect()
}

/// At most `count` of the products, in random order.
fn shuffled(products: &HashSet<ProductId>, count: usize) -> Vec<ProductId> {
    let mut ordered: Vec<ProductId> = products.iter().cloned().collect();
    ordered.shuffle(&mut rand::thread_rng());
    ordered.truncate(count);
    ordered
}

/// `1 - position / (count - 1)`: 1 for the first product, 0 for the last.
fn rank_score(position: usize, count: usize) -> f64 {
    if count <= 1 {
        return 1.0;
    }
    1.0 - position as f64 / (count - 1) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecommenderSettings;
    use crate::providers::memory::InMemoryCatalog;
    use chrono::{Duration, Utc};

    #[tokio::test]
    async fn test_random_cannot_exceed_available_pool() {
        let yesterday = Utc::now() - Duration::days(1);
        let catalog = InMemoryCatalog::new()
            .with_product("p1", yesterday)
            .with_product("consumed", yesterday)
            .with_deleted_product("gone", yesterday);
        let context = SessionContext::builder("u1", RecommenderSettings::default())
            .blocked_products(["consumed"])
            .build()
            .unwrap();
        let mut recommender = RandomRecommender::new(Arc::new(context), Arc::new(catalog));

        let result = recommender.recommend(3).await.unwrap();

        assert_eq!(result.product_ids(), vec!["p1"]);
        assert_eq!(result.items[0].score, ScoreTuple::from_values([1.0]));
    }

    #[tokio::test]
    async fn test_random_empty_catalog() {
        let context = SessionContext::builder("u1", RecommenderSettings::default())
            .build()
            .unwrap();
        let mut recommender =
            RandomRecommender::new(Arc::new(context), Arc::new(InMemoryCatalog::new()));

        let result = recommender.recommend(3).await.unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_rank_score_spans_one_to_zero() {
        assert_eq!(rank_score(0, 5), 1.0);
        assert_eq!(rank_score(2, 5), 0.5);
        assert_eq!(rank_score(4, 5), 0.0);
        assert_eq!(rank_score(0, 1), 1.0);
    }

    #[test]
    fn test_sample_is_bounded() {
        let products: Vec<ProductId> = (0..10).map(|i| format!("p{}", i)).collect();
        let refs: Vec<&ProductId> = products.iter().collect();
        assert_eq!(sample_products(&refs, 4).len(), 4);
        assert_eq!(sample_products(&refs, 40).len(), 10);
        assert_eq!(sample_products(&refs, usize::MAX).len(), 10);
    }

    #[tokio::test]
    async fn test_huge_request_on_single_product_catalog() {
        let catalog = InMemoryCatalog::new().with_product("only", Utc::now() - Duration::days(1));
        let context = SessionContext::builder("u1", RecommenderSettings::default())
            .build()
            .unwrap();
        let mut recommender = RandomRecommender::new(Arc::new(context), Arc::new(catalog));

        let result = recommender.recommend(usize::MAX / 4).await.unwrap();

        assert_eq!(result.product_ids(), vec!["only"]);
        assert_eq!(result.items[0].score, ScoreTuple::from_values([1.0]));
    }
}
