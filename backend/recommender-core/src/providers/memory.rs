//! In-memory providers, handy for hosts that preload their data and for tests.

use super::{PopularityProvider, ProductCatalog, TemplateProvider};
use crate::models::{ProductId, Template};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Default)]
pub struct InMemoryTemplates {
    templates: HashMap<ProductId, Vec<Template>>,
}

impl InMemoryTemplates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the templates of `product`; they are kept strongest first.
    pub fn with_templates(mut self, product: impl Into<ProductId>, mut templates: Vec<Template>) -> Self {
        templates.sort_by(|a, b| b.strength.total_cmp(&a.strength));
        self.templates.insert(product.into(), templates);
        self
    }
}

#[async_trait]
impl TemplateProvider for InMemoryTemplates {
    async fn get_templates(
        &self,
        products: &[ProductId],
        blocked_products: &HashSet<ProductId>,
    ) -> Result<HashMap<ProductId, Vec<Template>>> {
        let mut result = HashMap::new();
        for product in products {
            if let Some(templates) = self.templates.get(product) {
                let kept: Vec<Template> = templates
                    .iter()
                    .filter(|t| !blocked_products.contains(&t.template_id))
                    .cloned()
                    .collect();
                result.insert(product.clone(), kept);
            }
        }
        Ok(result)
    }
}

#[derive(Debug, Clone)]
struct PopularityEntry {
    count: f64,
    last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryPopularity {
    entries: HashMap<ProductId, PopularityEntry>,
}

impl InMemoryPopularity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_product(mut self, product: impl Into<ProductId>, count: f64, last_seen: DateTime<Utc>) -> Self {
        self.entries
            .insert(product.into(), PopularityEntry { count, last_seen });
        self
    }
}

#[async_trait]
impl PopularityProvider for InMemoryPopularity {
    async fn fetch_popularity(
        &self,
        product_ids: Option<&[ProductId]>,
        min_count: usize,
        min_date: DateTime<Utc>,
    ) -> Result<HashMap<ProductId, f64>> {
        let recent = |entry: &PopularityEntry| entry.last_seen >= min_date;

        match product_ids {
            Some(ids) => Ok(ids
                .iter()
                .filter_map(|id| {
                    self.entries
                        .get(id)
                        .filter(|e| recent(e))
                        .map(|e| (id.clone(), e.count))
                })
                .collect()),
            None => {
                let mut ranked: Vec<(&ProductId, &PopularityEntry)> =
                    self.entries.iter().filter(|(_, e)| recent(e)).collect();
                ranked.sort_by(|a, b| b.1.count.total_cmp(&a.1.count).then_with(|| a.0.cmp(b.0)));
                Ok(ranked
                    .into_iter()
                    .take(min_count)
                    .map(|(id, e)| (id.clone(), e.count))
                    .collect())
            }
        }
    }
}

#[derive(Debug, Clone)]
struct CatalogEntry {
    created_at: DateTime<Utc>,
    deleted: bool,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    products: HashMap<ProductId, CatalogEntry>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_product(mut self, product: impl Into<ProductId>, created_at: DateTime<Utc>) -> Self {
        self.products.insert(
            product.into(),
            CatalogEntry {
                created_at,
                deleted: false,
            },
        );
        self
    }

    pub fn with_deleted_product(mut self, product: impl Into<ProductId>, created_at: DateTime<Utc>) -> Self {
        self.products.insert(
            product.into(),
            CatalogEntry {
                created_at,
                deleted: true,
            },
        );
        self
    }
}

#[async_trait]
impl ProductCatalog for InMemoryCatalog {
    async fn fetch_all_product_ids(
        &self,
        allow_deleted: bool,
        max_date: DateTime<Utc>,
    ) -> Result<HashSet<ProductId>> {
        Ok(self
            .products
            .iter()
            .filter(|(_, e)| e.created_at <= max_date && (allow_deleted || !e.deleted))
            .map(|(id, _)| id.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_templates_skip_blocked() {
        let provider = InMemoryTemplates::new().with_templates(
            "base",
            vec![Template::new(0.2, "t2"), Template::new(0.9, "t1")],
        );
        let blocked: HashSet<ProductId> = ["t2".to_string()].into_iter().collect();

        let templates = provider
            .get_templates(&["base".to_string(), "other".to_string()], &blocked)
            .await
            .unwrap();

        assert_eq!(templates.len(), 1);
        assert_eq!(templates["base"], vec![Template::new(0.9, "t1")]);
    }

    #[tokio::test]
    async fn test_popularity_window_and_limit() {
        let now = Utc::now();
        let provider = InMemoryPopularity::new()
            .with_product("p1", 5.0, now)
            .with_product("p2", 3.0, now)
            .with_product("old", 50.0, now - Duration::days(30));

        let top = provider
            .fetch_popularity(None, 1, now - Duration::days(7))
            .await
            .unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top.get("p1"), Some(&5.0));

        let picked = provider
            .fetch_popularity(
                Some(&["p2".to_string(), "old".to_string()]),
                10,
                now - Duration::days(7),
            )
            .await
            .unwrap();
        assert_eq!(picked.len(), 1);
        assert!(picked.contains_key("p2"));
    }

    #[tokio::test]
    async fn test_catalog_excludes_deleted_and_future() {
        let now = Utc::now();
        let catalog = InMemoryCatalog::new()
            .with_product("live", now - Duration::days(1))
            .with_product("future", now + Duration::days(1))
            .with_deleted_product("gone", now - Duration::days(1));

        let ids = catalog.fetch_all_product_ids(false, now).await.unwrap();
        assert_eq!(ids.len(), 1);
        assert!(ids.contains("live"));

        let with_deleted = catalog.fetch_all_product_ids(true, now).await.unwrap();
        assert_eq!(with_deleted.len(), 2);
    }
}
