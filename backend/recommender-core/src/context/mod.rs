//! Per-request session context.
//!
//! Built once per recommendation request through [`SessionContextBuilder`] and
//! shared read-only (behind an `Arc`) by every strategy taking part in it.

mod decay;

pub use decay::DecayFunction;

use crate::config::RecommenderSettings;
use crate::error::{RecommenderError, Result};
use crate::models::{Activity, ProductId, ProductModel, Template, UserId};
use crate::providers::{AllowAll, NearIdenticalDetector, ProductFilter};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// When the context filter is applied to candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FilterStrategy {
    /// One pre-filtered candidate set shared by every strategy
    BeforeScoring,
    /// Each strategy gathers its own candidates, filtered afterwards
    #[default]
    AfterScoring,
}

pub struct SessionContext {
    user_id: UserId,
    anonymous: bool,
    settings: RecommenderSettings,
    present_date: DateTime<Utc>,
    filter_strategy: FilterStrategy,
    most_recently_consumed_products: Vec<ProductId>,
    latest_activity_by_product: HashMap<ProductId, Activity>,
    blocked_products: HashSet<ProductId>,
    filtered_products: HashSet<ProductId>,
    user_templates: Vec<Template>,
    recent_activities_by_template_user: HashMap<UserId, Vec<Activity>>,
    latest_activity_by_product_by_template_user: HashMap<UserId, HashMap<ProductId, Activity>>,
    rating_by_activity: HashMap<String, f64>,
    out_boost_by_activity: HashMap<String, f64>,
    in_boost_by_activity: HashMap<String, f64>,
    impressions_by_product: HashMap<ProductId, u32>,
    product_models: HashMap<ProductId, ProductModel>,
    positive_filter: Arc<dyn ProductFilter>,
    near_identical_detector: Option<Arc<dyn NearIdenticalDetector>>,
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("user_id", &self.user_id)
            .field("anonymous", &self.anonymous)
            .field("filter_strategy", &self.filter_strategy)
            .field("recent_products", &self.most_recently_consumed_products.len())
            .field("blocked_products", &self.blocked_products.len())
            .field("filtered_products", &self.filtered_products.len())
            .field("user_templates", &self.user_templates.len())
            .finish_non_exhaustive()
    }
}

impl SessionContext {
    pub fn builder(user_id: impl Into<UserId>, settings: RecommenderSettings) -> SessionContextBuilder {
        SessionContextBuilder::new(user_id, settings)
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn is_anonymous(&self) -> bool {
        self.anonymous
    }

    pub fn settings(&self) -> &RecommenderSettings {
        &self.settings
    }

    pub fn present_date(&self) -> DateTime<Utc> {
        self.present_date
    }

    pub fn filter_strategy(&self) -> FilterStrategy {
        self.filter_strategy
    }

    /// Products consumed by the user, most recent first, without repetitions.
    pub fn most_recently_consumed_products(&self) -> &[ProductId] {
        &self.most_recently_consumed_products
    }

    pub fn base_products_count(&self) -> usize {
        self.settings.base_products_count
    }

    pub fn blocked_products(&self) -> &HashSet<ProductId> {
        &self.blocked_products
    }

    pub fn filtered_products(&self) -> &HashSet<ProductId> {
        &self.filtered_products
    }

    pub fn user_templates(&self) -> &[Template] {
        &self.user_templates
    }

    pub fn recent_activities_of(&self, template_user: &str) -> &[Activity] {
        self.recent_activities_by_template_user
            .get(template_user)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn rating_of(&self, activity_type: &str) -> Option<f64> {
        self.rating_by_activity.get(activity_type).copied()
    }

    pub fn min_rating(&self) -> f64 {
        self.settings.min_rating_recommendable_from_user
    }

    pub fn product_models(&self) -> &HashMap<ProductId, ProductModel> {
        &self.product_models
    }

    pub fn positive_filter(&self) -> &dyn ProductFilter {
        self.positive_filter.as_ref()
    }

    pub fn near_identical_detector(&self) -> Option<&dyn NearIdenticalDetector> {
        self.near_identical_detector.as_deref()
    }

    /// Lower bound of the popularity window.
    pub fn popularity_cutoff_date(&self) -> DateTime<Utc> {
        self.present_date - Duration::days(self.settings.popularity_window_days)
    }

    /// Age decay of a product, by the configured date attribute. Products
    /// without a model or a date are not decayed.
    pub fn product_age_decay_factor(&self, product_id: &str) -> f64 {
        let product_date = self
            .product_models
            .get(product_id)
            .and_then(|m| m.date_attribute(&self.settings.product_date_field));

        match product_date {
            Some(date) => {
                let age_in_days = (self.present_date - date).num_days() as f64;
                self.settings.product_age_decay.factor(age_in_days)
            }
            None => 1.0,
        }
    }

    /// Decay by the number of times the product was already shown to the user.
    pub fn history_decay_factor(&self, product_id: &str) -> f64 {
        let impressions = self
            .impressions_by_product
            .get(product_id)
            .copied()
            .unwrap_or(0);
        self.settings.history_decay.factor(impressions as f64)
    }

    pub fn previous_consumption_factor(&self, product_id: &str) -> f64 {
        if self.blocked_products.contains(product_id) {
            self.settings.previous_consumption_factor
        } else {
            1.0
        }
    }

    /// Boost by the type of the user's own latest activity on the product.
    pub fn in_boost(&self, product_id: &str) -> f64 {
        self.latest_activity_by_product
            .get(product_id)
            .and_then(|a| self.in_boost_by_activity.get(&a.activity_type))
            .copied()
            .unwrap_or(1.0)
    }

    /// Boost by the type of a template user's latest activity on the product.
    pub fn out_boost(&self, template_user: &str, product_id: &str) -> f64 {
        self.latest_activity_by_product_by_template_user
            .get(template_user)
            .and_then(|by_product| by_product.get(product_id))
            .and_then(|a| self.out_boost_by_activity.get(&a.activity_type))
            .copied()
            .unwrap_or(1.0)
    }
}

pub struct SessionContextBuilder {
    user_id: UserId,
    settings: RecommenderSettings,
    present_date: Option<DateTime<Utc>>,
    filter_strategy: FilterStrategy,
    recent_activities: Vec<Activity>,
    blocked_products: HashSet<ProductId>,
    filtered_products: HashSet<ProductId>,
    user_templates: Vec<Template>,
    recent_activities_by_template_user: HashMap<UserId, Vec<Activity>>,
    rating_by_activity: HashMap<String, f64>,
    out_boost_by_activity: HashMap<String, f64>,
    in_boost_by_activity: HashMap<String, f64>,
    impressions_by_product: HashMap<ProductId, u32>,
    product_models: HashMap<ProductId, ProductModel>,
    positive_filter: Arc<dyn ProductFilter>,
    near_identical_detector: Option<Arc<dyn NearIdenticalDetector>>,
}

impl SessionContextBuilder {
    pub fn new(user_id: impl Into<UserId>, settings: RecommenderSettings) -> Self {
        Self {
            user_id: user_id.into(),
            settings,
            present_date: None,
            filter_strategy: FilterStrategy::default(),
            recent_activities: Vec::new(),
            blocked_products: HashSet::new(),
            filtered_products: HashSet::new(),
            user_templates: Vec::new(),
            recent_activities_by_template_user: HashMap::new(),
            rating_by_activity: HashMap::new(),
            out_boost_by_activity: HashMap::new(),
            in_boost_by_activity: HashMap::new(),
            impressions_by_product: HashMap::new(),
            product_models: HashMap::new(),
            positive_filter: Arc::new(AllowAll),
            near_identical_detector: None,
        }
    }

    pub fn present_date(mut self, date: DateTime<Utc>) -> Self {
        self.present_date = Some(date);
        self
    }

    pub fn filter_strategy(mut self, strategy: FilterStrategy) -> Self {
        self.filter_strategy = strategy;
        self
    }

    /// The user's own recent activities, most recent first.
    pub fn recent_activities(mut self, activities: Vec<Activity>) -> Self {
        self.recent_activities = activities;
        self
    }

    pub fn blocked_products<I, S>(mut self, products: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ProductId>,
    {
        self.blocked_products = products.into_iter().map(Into::into).collect();
        self
    }

    pub fn filtered_products<I, S>(mut self, products: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ProductId>,
    {
        self.filtered_products = products.into_iter().map(Into::into).collect();
        self
    }

    /// Similar users, strongest first.
    pub fn user_templates(mut self, templates: Vec<Template>) -> Self {
        self.user_templates = templates;
        self
    }

    /// Recent activities of one template user, most recent first.
    pub fn template_user_activities(mut self, template_user: impl Into<UserId>, activities: Vec<Activity>) -> Self {
        self.recent_activities_by_template_user
            .insert(template_user.into(), activities);
        self
    }

    pub fn rating_by_activity(mut self, ratings: HashMap<String, f64>) -> Self {
        self.rating_by_activity = ratings;
        self
    }

    pub fn out_boost_by_activity(mut self, boosts: HashMap<String, f64>) -> Self {
        self.out_boost_by_activity = boosts;
        self
    }

    pub fn in_boost_by_activity(mut self, boosts: HashMap<String, f64>) -> Self {
        self.in_boost_by_activity = boosts;
        self
    }

    pub fn impressions(mut self, impressions: HashMap<ProductId, u32>) -> Self {
        self.impressions_by_product = impressions;
        self
    }

    pub fn product_models<I>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = ProductModel>,
    {
        self.product_models = models
            .into_iter()
            .map(|m| (m.product_id.clone(), m))
            .collect();
        self
    }

    pub fn positive_filter(mut self, filter: Arc<dyn ProductFilter>) -> Self {
        self.positive_filter = filter;
        self
    }

    pub fn near_identical_detector(mut self, detector: Arc<dyn NearIdenticalDetector>) -> Self {
        self.near_identical_detector = Some(detector);
        self
    }

    pub fn build(self) -> Result<SessionContext> {
        self.validate()?;

        let anonymous = self.settings.is_anonymous(&self.user_id);

        let mut most_recently_consumed_products = Vec::new();
        let mut latest_activity_by_product: HashMap<ProductId, Activity> = HashMap::new();
        for activity in self.recent_activities {
            if !latest_activity_by_product.contains_key(&activity.product_id) {
                most_recently_consumed_products.push(activity.product_id.clone());
                latest_activity_by_product.insert(activity.product_id.clone(), activity);
            }
        }

        let latest_activity_by_product_by_template_user = self
            .recent_activities_by_template_user
            .iter()
            .map(|(template_user, activities)| {
                let mut latest: HashMap<ProductId, Activity> = HashMap::new();
                for activity in activities {
                    latest
                        .entry(activity.product_id.clone())
                        .or_insert_with(|| activity.clone());
                }
                (template_user.clone(), latest)
            })
            .collect();

        Ok(SessionContext {
            user_id: self.user_id,
            anonymous,
            settings: self.settings,
            present_date: self.present_date.unwrap_or_else(Utc::now),
            filter_strategy: self.filter_strategy,
            most_recently_consumed_products,
            latest_activity_by_product,
            blocked_products: self.blocked_products,
            filtered_products: self.filtered_products,
            user_templates: self.user_templates,
            recent_activities_by_template_user: self.recent_activities_by_template_user,
            latest_activity_by_product_by_template_user,
            rating_by_activity: self.rating_by_activity,
            out_boost_by_activity: self.out_boost_by_activity,
            in_boost_by_activity: self.in_boost_by_activity,
            impressions_by_product: self.impressions_by_product,
            product_models: self.product_models,
            positive_filter: self.positive_filter,
            near_identical_detector: self.near_identical_detector,
        })
    }

    fn validate(&self) -> Result<()> {
        if self.user_id.trim().is_empty() {
            return Err(RecommenderError::configuration("user id must not be empty"));
        }

        let settings = &self.settings;
        if settings.slack_factor == 0 {
            return Err(RecommenderError::configuration("slack factor must be at least 1"));
        }
        if settings.near_identical_slack_factor == 0 {
            return Err(RecommenderError::configuration(
                "near-identical slack factor must be at least 1",
            ));
        }
        if settings.popularity_window_days < 0 {
            return Err(RecommenderError::configuration(
                "popularity window must not be negative",
            ));
        }
        if settings.near_identical_filter().is_some() && self.near_identical_detector.is_none() {
            return Err(RecommenderError::configuration(
                "near-identical filter is configured but no detector was provided",
            ));
        }

        for template in &self.user_templates {
            if !template.strength.is_finite() {
                return Err(RecommenderError::Configuration(format!(
                    "user template {} has a non-finite strength",
                    template.template_id
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn settings() -> RecommenderSettings {
        RecommenderSettings::default()
    }

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_empty_user_is_rejected() {
        let result = SessionContext::builder("  ", settings()).build();
        assert!(matches!(result, Err(RecommenderError::Configuration(_))));
    }

    #[test]
    fn test_near_identical_filter_requires_detector() {
        let mut settings = settings();
        settings.near_identical_filter_field = Some("title".to_string());
        settings.near_identical_filter_threshold = Some(0.9);

        let result = SessionContext::builder("u1", settings).build();
        assert!(matches!(result, Err(RecommenderError::Configuration(_))));
    }

    #[test]
    fn test_recent_products_are_deduplicated_in_recency_order() {
        let ctx = SessionContext::builder("u1", settings())
            .recent_activities(vec![
                Activity::new("p2", "buy", at(5)),
                Activity::new("p1", "view", at(4)),
                Activity::new("p2", "view", at(3)),
                Activity::new("p3", "view", at(2)),
            ])
            .in_boost_by_activity([("buy".to_string(), 2.0)].into_iter().collect())
            .build()
            .unwrap();

        assert_eq!(ctx.most_recently_consumed_products(), &["p2", "p1", "p3"]);
        // latest activity on p2 is "buy"
        assert_eq!(ctx.in_boost("p2"), 2.0);
        assert_eq!(ctx.in_boost("p1"), 1.0);
        assert_eq!(ctx.in_boost("unknown"), 1.0);
    }

    #[test]
    fn test_out_boost_uses_latest_template_activity() {
        let ctx = SessionContext::builder("u1", settings())
            .template_user_activities(
                "t1",
                vec![
                    Activity::new("p1", "buy", at(5)),
                    Activity::new("p1", "view", at(1)),
                ],
            )
            .out_boost_by_activity([("buy".to_string(), 3.0)].into_iter().collect())
            .build()
            .unwrap();

        assert_eq!(ctx.out_boost("t1", "p1"), 3.0);
        assert_eq!(ctx.out_boost("t1", "p9"), 1.0);
        assert_eq!(ctx.out_boost("t9", "p1"), 1.0);
    }

    #[test]
    fn test_decay_factors() {
        let mut settings = settings();
        settings.product_age_decay = DecayFunction::Linear { ttl: 10.0 };
        settings.history_decay = DecayFunction::Step { ttl: 2.0 };
        settings.previous_consumption_factor = 0.5;

        let ctx = SessionContext::builder("u1", settings)
            .present_date(at(11))
            .product_models(vec![
                ProductModel::new("fresh").with_attribute("date", serde_json::json!("2024-03-06T12:00:00Z")),
                ProductModel::new("stale").with_attribute("date", serde_json::json!("2024-02-01T12:00:00Z")),
                ProductModel::new("undated"),
            ])
            .impressions([("seen".to_string(), 2)].into_iter().collect())
            .blocked_products(["consumed"])
            .build()
            .unwrap();

        assert!((ctx.product_age_decay_factor("fresh") - 0.5).abs() < 1e-9);
        assert_eq!(ctx.product_age_decay_factor("stale"), 0.0);
        assert_eq!(ctx.product_age_decay_factor("undated"), 1.0);
        assert_eq!(ctx.history_decay_factor("seen"), -1.0);
        assert_eq!(ctx.history_decay_factor("fresh"), 1.0);
        assert_eq!(ctx.previous_consumption_factor("consumed"), 0.5);
        assert_eq!(ctx.previous_consumption_factor("fresh"), 1.0);
    }

    #[test]
    fn test_anonymous_detection_and_cutoff() {
        let ctx = SessionContext::builder("hmrtmp123", settings())
            .present_date(at(10))
            .build()
            .unwrap();

        assert!(ctx.is_anonymous());
        assert_eq!(ctx.popularity_cutoff_date(), at(3));
    }
}
