use crate::context::SessionContext;
use crate::error::Result;
use crate::models::{CandidateMap, ProductId, ScoreTuple, ScoredProduct};
use crate::providers::PopularityProvider;
use crate::services::recommender::Recommender;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// Popularity Strategy - 熱門推薦
///
/// Candidates are the products most consumed by all users within the
/// popularity window; the score is that consumption count.
pub struct PopularityRecommender {
    context: Arc<SessionContext>,
    provider: Arc<dyn PopularityProvider>,
    popularity_by_product: Option<HashMap<ProductId, f64>>,
}

impl PopularityRecommender {
    pub fn new(context: Arc<SessionContext>, provider: Arc<dyn PopularityProvider>) -> Self {
        Self {
            context,
            provider,
            popularity_by_product: None,
        }
    }

    async fn load_popularity(&mut self, product_ids: Option<&[ProductId]>, min_count: usize) -> Result<()> {
        let popularity = self
            .provider
            .fetch_popularity(product_ids, min_count, self.context.popularity_cutoff_date())
            .await?;

        if popularity.is_empty() {
            warn!("No popular products found since {}", self.context.popularity_cutoff_date());
        }

        self.popularity_by_product = Some(popularity);
        Ok(())
    }
}

#[async_trait]
impl Recommender for PopularityRecommender {
    fn suffix(&self) -> &str {
        "POP"
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
        if self.popularity_by_product.is_none() {
            self.load_popularity(None, min_count).await?;
        }

        let products: HashSet<ProductId> = self
            .popularity_by_product
            .iter()
            .flat_map(|by_product| by_product.keys().cloned())
            .collect();

        Ok(HashMap::from([(self.suffix().to_string(), products)]))
    }

    async fn score_candidates(
        &mut self,
        candidates: &CandidateMap,
        target_count: usize,
    ) -> Result<Vec<ScoredProduct>> {
        let selected = self.select_candidates(candidates);

        // BEFORE_SCORING skips gathering, so counts are loaded for the pre-filtered set
        if self.popularity_by_product.is_none() {
            let product_ids: Vec<ProductId> = selected.iter().cloned().collect();
            self.load_popularity(Some(&product_ids), target_count).await?;
        }

        let Some(popularity) = self.popularity_by_product.as_ref() else {
            return Ok(Vec::new());
        };

        let scored: Vec<ScoredProduct> = selected
            .iter()
            .filter_map(|product_id| {
                let count = popularity.get(product_id).copied().unwrap_or(0.0);
                (count > 0.0).then(|| ScoredProduct::new(ScoreTuple::from_values([count]), product_id.clone()))
            })
            .collect();

        debug!(scored = scored.len(), "Popularity scores computed");
        Ok(scored)
    }
}
