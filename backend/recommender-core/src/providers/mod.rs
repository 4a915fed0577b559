//! Ports to the data layer and to the near-duplicate detector.
//!
//! The recommender core never talks to a store directly: templates,
//! popularity counts, the product catalog and the context filter are all
//! reached through these traits. Errors are returned as `anyhow::Error` and
//! surface unchanged through [`RecommenderError::Provider`](crate::RecommenderError::Provider).

pub mod memory;

use crate::context::SessionContext;
use crate::models::{ProductId, ProductModel, Template};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};

/// Precomputed product -> product templates.
///
/// One implementation backs content similarity, another the attraction
/// (co-consumption) family.
#[async_trait]
pub trait TemplateProvider: Send + Sync {
    /// Templates of each requested product, strongest first. Products in
    /// `blocked_products` never appear as templates.
    async fn get_templates(
        &self,
        products: &[ProductId],
        blocked_products: &HashSet<ProductId>,
    ) -> Result<HashMap<ProductId, Vec<Template>>>;
}

#[async_trait]
pub trait PopularityProvider: Send + Sync {
    /// Popularity counts since `min_date`. When `product_ids` is `None` the
    /// provider picks at least `min_count` of the most popular products.
    async fn fetch_popularity(
        &self,
        product_ids: Option<&[ProductId]>,
        min_count: usize,
        min_date: DateTime<Utc>,
    ) -> Result<HashMap<ProductId, f64>>;
}

#[async_trait]
pub trait ProductCatalog: Send + Sync {
    async fn fetch_all_product_ids(
        &self,
        allow_deleted: bool,
        max_date: DateTime<Utc>,
    ) -> Result<HashSet<ProductId>>;
}

#[async_trait]
pub trait NearIdenticalDetector: Send + Sync {
    /// Products of the (score-ordered) list that are too similar to a
    /// higher-ranked one. The highest-ranked member of each group is never
    /// included.
    async fn pinpoint_near_identical(
        &self,
        context: &SessionContext,
        product_ids: &[ProductId],
        product_models: &HashMap<ProductId, ProductModel>,
    ) -> Result<HashSet<ProductId>>;
}

/// Positive context filter applied after candidates are gathered
/// (AFTER_SCORING strategy).
#[async_trait]
pub trait ProductFilter: Send + Sync {
    async fn filter_products(&self, product_ids: &[ProductId]) -> Result<HashSet<ProductId>>;
}

/// Lets every product through.
#[derive(Debug, Clone, Default)]
pub struct AllowAll;

#[async_trait]
impl ProductFilter for AllowAll {
    async fn filter_products(&self, product_ids: &[ProductId]) -> Result<HashSet<ProductId>> {
        Ok(product_ids.iter().cloned().collect())
    }
}

/// Lets through only the listed products.
#[derive(Debug, Clone, Default)]
pub struct AllowListed {
    allowed: HashSet<ProductId>,
}

impl AllowListed {
    pub fn new<I, S>(allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ProductId>,
    {
        Self {
            allowed: allowed.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl ProductFilter for AllowListed {
    async fn filter_products(&self, product_ids: &[ProductId]) -> Result<HashSet<ProductId>> {
        Ok(product_ids
            .iter()
            .filter(|id| self.allowed.contains(*id))
            .cloned()
            .collect())
    }
}
