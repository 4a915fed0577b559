use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt;

pub type ProductId = String;
pub type UserId = String;

/// Algorithm suffix -> candidate products gathered for it.
///
/// Under the BEFORE_SCORING filter strategy a single entry keyed by
/// [`PRE_FILTER`](crate::services::recommender::PRE_FILTER) is shared by all strategies.
pub type CandidateMap = HashMap<String, HashSet<ProductId>>;

/// One component of a score tuple.
///
/// Hybrid recommenders put a tag (the contributing algorithm) in front of the
/// numeric components; plain strategies only emit values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScoreComponent {
    Tag(String),
    Value(f64),
}

impl ScoreComponent {
    pub fn as_value(&self) -> Option<f64> {
        match self {
            ScoreComponent::Value(v) => Some(*v),
            ScoreComponent::Tag(_) => None,
        }
    }

    pub fn is_tag(&self) -> bool {
        matches!(self, ScoreComponent::Tag(_))
    }
}

impl Ord for ScoreComponent {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (ScoreComponent::Value(a), ScoreComponent::Value(b)) => a.total_cmp(b),
            (ScoreComponent::Tag(a), ScoreComponent::Tag(b)) => a.cmp(b),
            // Never compared within a well-formed ranking pass; values sort below tags.
            (ScoreComponent::Value(_), ScoreComponent::Tag(_)) => Ordering::Less,
            (ScoreComponent::Tag(_), ScoreComponent::Value(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for ScoreComponent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for ScoreComponent {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ScoreComponent {}

impl From<f64> for ScoreComponent {
    fn from(value: f64) -> Self {
        ScoreComponent::Value(value)
    }
}

impl fmt::Display for ScoreComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScoreComponent::Tag(tag) => write!(f, "{}", tag),
            ScoreComponent::Value(v) => write!(f, "{}", v),
        }
    }
}

/// Priority vector compared lexicographically, component 0 first.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScoreTuple(Vec<ScoreComponent>);

impl ScoreTuple {
    pub fn new(components: Vec<ScoreComponent>) -> Self {
        Self(components)
    }

    pub fn from_values<I: IntoIterator<Item = f64>>(values: I) -> Self {
        Self(values.into_iter().map(ScoreComponent::Value).collect())
    }

    /// Lowest tuple a strategy of the given arity can emit.
    pub fn floor(arity: usize) -> Self {
        Self(vec![ScoreComponent::Value(0.0); arity])
    }

    /// Returns a copy of this tuple with `tag` in front.
    pub fn tagged(&self, tag: &str) -> Self {
        let mut components = Vec::with_capacity(self.0.len() + 1);
        components.push(ScoreComponent::Tag(tag.to_string()));
        components.extend(self.0.iter().cloned());
        Self(components)
    }

    /// Returns a copy of this tuple with a numeric component in front.
    pub fn prefixed(&self, value: f64) -> Self {
        let mut components = Vec::with_capacity(self.0.len() + 1);
        components.push(ScoreComponent::Value(value));
        components.extend(self.0.iter().cloned());
        Self(components)
    }

    /// Multiplies every numeric component at or after `start` by `factor`.
    pub fn scale_from(&mut self, start: usize, factor: f64) {
        for component in self.0.iter_mut().skip(start) {
            if let ScoreComponent::Value(v) = component {
                *v *= factor;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn components(&self) -> &[ScoreComponent] {
        &self.0
    }

    pub fn value(&self, idx: usize) -> Option<f64> {
        self.0.get(idx).and_then(ScoreComponent::as_value)
    }
}

impl fmt::Display for ScoreTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, component) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", component)?;
        }
        write!(f, "]")
    }
}

/// A candidate product together with its score tuple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoredProduct {
    pub score: ScoreTuple,
    pub product_id: ProductId,
}

impl ScoredProduct {
    pub fn new(score: ScoreTuple, product_id: impl Into<ProductId>) -> Self {
        Self {
            score,
            product_id: product_id.into(),
        }
    }
}

/// Precomputed (strength, related entity) association.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub strength: f64,
    pub template_id: String,
}

impl Template {
    pub fn new(strength: f64, template_id: impl Into<String>) -> Self {
        Self {
            strength,
            template_id: template_id.into(),
        }
    }
}

/// A user activity on a product (consume, buy, rate, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub product_id: ProductId,
    pub activity_type: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl Activity {
    pub fn new(
        product_id: impl Into<ProductId>,
        activity_type: impl Into<String>,
        created_at: chrono::DateTime<chrono::Utc>,
    ) -> Self {
        Self {
            product_id: product_id.into(),
            activity_type: activity_type.into(),
            created_at,
        }
    }
}

/// Attribute bag describing a product.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductModel {
    pub product_id: ProductId,
    pub attributes: HashMap<String, serde_json::Value>,
}

impl ProductModel {
    pub fn new(product_id: impl Into<ProductId>) -> Self {
        Self {
            product_id: product_id.into(),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&serde_json::Value> {
        self.attributes.get(name)
    }

    /// Reads an RFC 3339 date attribute.
    pub fn date_attribute(&self, name: &str) -> Option<chrono::DateTime<chrono::Utc>> {
        self.attribute(name)
            .and_then(|v| v.as_str())
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&chrono::Utc))
    }
}

/// Counters collected along one pipeline run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineStats {
    pub candidate_count: usize,
    pub scored_count: usize,
    pub post_processed_count: usize,
    pub backfilled_count: usize,
    pub near_identical_count: usize,
    pub final_count: usize,
    pub elapsed_ms: u64,
}

/// Final ranked output of one `recommend` call.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RecommendationResult {
    pub items: Vec<ScoredProduct>,
    pub stats: PipelineStats,
}

impl RecommendationResult {
    pub fn product_ids(&self) -> Vec<&str> {
        self.items.iter().map(|i| i.product_id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lexicographic_order() {
        let a = ScoreTuple::from_values([20.0, 1.0, 0.3]);
        let b = ScoreTuple::from_values([20.0, 2.0, 0.1]);
        let c = ScoreTuple::from_values([19.0, 9.0, 0.9]);

        assert!(b > a);
        assert!(a > c);
        assert!(ScoreTuple::floor(3) < c);
    }

    #[test]
    fn test_prefix_orders_below() {
        let short = ScoreTuple::from_values([5.0]);
        let long = ScoreTuple::from_values([5.0, 0.0]);
        assert!(short < long);
    }

    #[test]
    fn test_tagged_tuple_keeps_tag_on_scale() {
        let mut score = ScoreTuple::from_values([2.0, 4.0]).tagged("UBCF");
        score.scale_from(1, 0.5);

        assert_eq!(score.len(), 3);
        assert!(score.components()[0].is_tag());
        assert_eq!(score.value(1), Some(1.0));
        assert_eq!(score.value(2), Some(2.0));
    }

    #[test]
    fn test_score_serializes_as_plain_list() {
        let item = ScoredProduct::new(ScoreTuple::from_values([3.0]).tagged("NI"), "p1");
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["score"], serde_json::json!(["NI", 3.0]));
        assert_eq!(json["product_id"], "p1");
    }

    #[test]
    fn test_date_attribute() {
        let model = ProductModel::new("p1")
            .with_attribute("date", serde_json::json!("2024-01-02T00:00:00Z"))
            .with_attribute("title", serde_json::json!("Title"));

        assert!(model.date_attribute("date").is_some());
        assert!(model.date_attribute("title").is_none());
        assert!(model.date_attribute("missing").is_none());
    }
}
