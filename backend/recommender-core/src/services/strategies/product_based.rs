use crate::context::SessionContext;
use crate::error::Result;
use crate::models::{CandidateMap, ProductId, ScoreTuple, ScoredProduct, Template};
use crate::providers::TemplateProvider;
use crate::services::recommender::Recommender;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, info};

/// Base products considered: this many times the configured base products count
const BASE_PRODUCTS_SLACK: usize = 3;

/// Tier factors of base products inside / outside the base products window
const RECENT_TIER_FACTOR: f64 = 20.0;
const OLDER_TIER_FACTOR: f64 = 10.0;

/// Family of product templates a [`ProductBasedRecommender`] draws from.
pub trait TemplateFamily: Send + Sync + 'static {
    const SUFFIX: &'static str;
}

/// Templates from product content similarity.
pub struct ContentSimilarity;

impl TemplateFamily for ContentSimilarity {
    const SUFFIX: &'static str = "CB";
}

/// Templates from co-consumption ("users who consumed X also consumed Y").
pub struct Attraction;

impl TemplateFamily for Attraction {
    const SUFFIX: &'static str = "PBCF";
}

pub type ContentSimilarityRecommender = ProductBasedRecommender<ContentSimilarity>;
pub type AttractionRecommender = ProductBasedRecommender<Attraction>;

/// Product-based Strategy (Item-CF / content-based)
///
/// Algorithm:
/// 1. Take the user's most recently consumed products as base products
/// 2. For each base product, fetch its precomputed templates (strongest first)
/// 3. Score each template by `(priority, freshness, strength)` so that
///    templates of recent base products always outrank older ones
///
/// Templates are fetched once per request and cached.
pub struct ProductBasedRecommender<F: TemplateFamily> {
    context: Arc<SessionContext>,
    provider: Arc<dyn TemplateProvider>,
    base_products: Vec<ProductId>,
    templates_by_base_product: Option<HashMap<ProductId, Vec<Template>>>,
    _family: PhantomData<fn() -> F>,
}

impl<F: TemplateFamily> ProductBasedRecommender<F> {
    pub fn new(context: Arc<SessionContext>, provider: Arc<dyn TemplateProvider>) -> Self {
        let base_products = context
            .most_recently_consumed_products()
            .iter()
            .take(BASE_PRODUCTS_SLACK * context.base_products_count())
            .cloned()
            .collect();

        Self {
            context,
            provider,
            base_products,
            templates_by_base_product: None,
            _family: PhantomData,
        }
    }

    pub fn base_products(&self) -> &[ProductId] {
        &self.base_products
    }

    async fn ensure_templates_loaded(&mut self) -> Result<()> {
        if self.templates_by_base_product.is_some() {
            return Ok(());
        }

        let templates = self
            .provider
            .get_templates(&self.base_products, self.context.blocked_products())
            .await?;

        info!(
            "{} templates loaded for {} of {} base products",
            F::SUFFIX,
            templates.len(),
            self.base_products.len()
        );

        self.templates_by_base_product = Some(templates);
        Ok(())
    }
}

#[async_trait]
impl<F: TemplateFamily> Recommender for ProductBasedRecommender<F> {
    fn suffix(&self) -> &str {
        F::SUFFIX
    }

    fn is_hybrid(&self) -> bool {
        false
    }

    fn score_arity(&self) -> usize {
        3
    }

    fn context(&self) -> &Arc<SessionContext> {
        &self.context
    }

    async fn gather_candidates(&mut self, min_count: usize) -> Result<CandidateMap> {
        self.ensure_templates_loaded().await?;

        let mut candidates: HashSet<ProductId> = HashSet::new();
        if let Some(templates_by_base_product) = self.templates_by_base_product.as_ref() {
            let base_products_count = self.context.base_products_count();

            for (idx, base_product) in self.base_products.iter().enumerate() {
                if let Some(templates) = templates_by_base_product.get(base_product) {
                    candidates.extend(templates.iter().map(|t| t.template_id.clone()));
                }
                // 至少要看過 base_products_count 個最近的商品
                if candidates.len() >= min_count && idx >= base_products_count {
                    break;
                }
            }
        }

        Ok(HashMap::from([(F::SUFFIX.to_string(), candidates)]))
    }

    async fn score_candidates(
        &mut self,
        candidates: &CandidateMap,
        target_count: usize,
    ) -> Result<Vec<ScoredProduct>> {
        let selected = self.select_candidates(candidates);
        self.ensure_templates_loaded().await?;

        let Some(templates_by_base_product) = self.templates_by_base_product.as_ref() else {
            return Ok(Vec::new());
        };

        let base_products_count = self.context.base_products_count();
        let total_base_products = self.base_products.len() as f64;
        let target = target_count as f64;

        let mut best_by_candidate: HashMap<&ProductId, ScoreTuple> = HashMap::new();
        let mut used_base_products = 0usize;

        for (idx, base_product) in self.base_products.iter().enumerate() {
            let tier_factor = if idx <= base_products_count {
                RECENT_TIER_FACTOR
            } else {
                OLDER_TIER_FACTOR
            };

            let templates = match templates_by_base_product.get(base_product) {
                Some(templates) if !templates.is_empty() => templates,
                _ => continue,
            };
            used_base_products += 1;
            let freshness = total_base_products - used_base_products as f64 + 1.0;

            for (position, template) in templates.iter().enumerate() {
                if !selected.contains(&template.template_id) {
                    continue;
                }

                let priority = tier_factor * target - (position + 1) as f64 + 1.0;
                let score = ScoreTuple::from_values([priority, freshness, template.strength]);

                // Earlier (more recent) base products win ties
                match best_by_candidate.get(&template.template_id) {
                    Some(current) if score <= *current => {}
                    _ => {
                        best_by_candidate.insert(&template.template_id, score);
                    }
                }
            }
        }

        debug!(
            "Number of base products which actually contributed = {}",
            used_base_products
        );

        Ok(best_by_candidate
            .into_iter()
            .map(|(product_id, score)| ScoredProduct::new(score, product_id.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecommenderSettings;
    use crate::models::Activity;
    use crate::providers::memory::InMemoryTemplates;
    use chrono::{Duration, Utc};

    fn context(recent: &[&str], base_products_count: usize, blocked: &[&str]) -> Arc<SessionContext> {
        let mut settings = RecommenderSettings::default();
        settings.base_products_count = base_products_count;
        let now = Utc::now();
        let activities = recent
            .iter()
            .enumerate()
            .map(|(i, p)| Activity::new(*p, "buy", now - Duration::hours(i as i64)))
            .collect();

        Arc::new(
            SessionContext::builder("u1", settings)
                .recent_activities(activities)
                .blocked_products(blocked.iter().copied())
                .build()
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_recent_tier_dominates_template_strength() {
        // a window of 1 keeps "a" and "b" in the recent tier, "c" falls in the older one
        let provider = InMemoryTemplates::new()
            .with_templates("a", vec![Template::new(0.1, "weak-recent")])
            .with_templates("c", vec![Template::new(0.99, "strong-old")]);
        let mut recommender =
            ContentSimilarityRecommender::new(context(&["a", "b", "c"], 1, &[]), Arc::new(provider));

        let result = recommender.recommend(2).await.unwrap();

        assert_eq!(result.product_ids(), vec!["weak-recent", "strong-old"]);
        // 20 * 6 - 1 + 1 with target 3N = 6
        assert_eq!(result.items[0].score.value(0), Some(120.0));
        assert_eq!(result.items[1].score.value(0), Some(60.0));
    }

    #[tokio::test]
    async fn test_shared_template_keeps_highest_tuple() {
        let provider = InMemoryTemplates::new()
            .with_templates(
                "a",
                vec![Template::new(0.9, "x"), Template::new(0.8, "shared")],
            )
            .with_templates("b", vec![Template::new(0.95, "shared")]);
        let mut recommender =
            AttractionRecommender::new(context(&["a", "b"], 5, &[]), Arc::new(provider));

        let candidates = recommender.gather_candidates(10).await.unwrap();
        let scored = recommender.score_candidates(&candidates, 4).await.unwrap();

        let shared = scored.iter().find(|s| s.product_id == "shared").unwrap();
        // from "b": priority 80, freshness 1 beats "a": priority 79, freshness 2
        assert_eq!(shared.score, ScoreTuple::from_values([80.0, 1.0, 0.95]));
        assert_eq!(recommender.suffix(), "PBCF");
    }

    #[tokio::test]
    async fn test_blocked_products_never_become_templates() {
        let provider = InMemoryTemplates::new().with_templates(
            "a",
            vec![Template::new(0.9, "consumed"), Template::new(0.5, "fresh")],
        );
        let mut recommender =
            ContentSimilarityRecommender::new(context(&["a", "consumed"], 5, &["consumed"]), Arc::new(provider));

        let result = recommender.recommend(5).await.unwrap();

        assert_eq!(result.product_ids(), vec!["fresh"]);
    }

    #[tokio::test]
    async fn test_gathering_stops_after_base_window() {
        let provider = InMemoryTemplates::new()
            .with_templates("a", vec![Template::new(0.9, "t1")])
            .with_templates("b", vec![Template::new(0.9, "t2")])
            .with_templates("c", vec![Template::new(0.9, "t3")]);
        let mut recommender =
            ContentSimilarityRecommender::new(context(&["a", "b", "c"], 1, &[]), Arc::new(provider));

        let candidates = recommender.gather_candidates(1).await.unwrap();

        // "a" satisfies the count, but the window forces "b" in as well
        assert_eq!(candidates["CB"].len(), 2);
        assert_eq!(recommender.base_products(), &["a", "b", "c"]);
    }
}
