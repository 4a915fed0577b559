use crate::context::DecayFunction;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub recommender: RecommenderSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub service_name: String,
    /// Emit JSON log lines instead of the human-readable format
    pub log_json: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            service_name: "recommender-core".to_string(),
            log_json: false,
        }
    }
}

/// Customer-level recommender settings shared by every session context.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecommenderSettings {
    /// Minimum number of recently consumed products used as template seeds
    pub base_products_count: usize,
    /// Minimum activity rating for a template user's product to be recommendable
    pub min_rating_recommendable_from_user: f64,
    /// Score factor applied to products the target user already consumed
    pub previous_consumption_factor: f64,
    /// Product attribute holding the date used for age decay
    pub product_date_field: String,
    pub product_age_decay: DecayFunction,
    pub history_decay: DecayFunction,
    /// Days of activity counted by the popularity provider
    pub popularity_window_days: i64,
    pub near_identical_filter_field: Option<String>,
    pub near_identical_filter_threshold: Option<f64>,
    /// Lower bound on the number of candidates gathered per request
    pub candidate_pool_floor: usize,
    /// Multiplier applied to the requested count when gathering and scoring
    pub slack_factor: usize,
    /// Multiplier applied to the ranked page when near-identical filtering is on
    pub near_identical_slack_factor: usize,
    pub anonymous_user_prefix: String,
    /// Per-specialist time budget inside hybrid recommenders
    pub specialist_timeout_ms: u64,
    /// Positions between forced inclusions in the voting merge
    pub voting_bonus_period: usize,
}

impl Default for RecommenderSettings {
    fn default() -> Self {
        Self {
            base_products_count: 10,
            min_rating_recommendable_from_user: 3.0,
            previous_consumption_factor: 1.0,
            product_date_field: "date".to_string(),
            product_age_decay: DecayFunction::None,
            history_decay: DecayFunction::None,
            popularity_window_days: 7,
            near_identical_filter_field: None,
            near_identical_filter_threshold: None,
            candidate_pool_floor: 500,
            slack_factor: 3,
            near_identical_slack_factor: 2,
            anonymous_user_prefix: "hmrtmp".to_string(),
            specialist_timeout_ms: 10_000,
            voting_bonus_period: 8,
        }
    }
}

impl RecommenderSettings {
    /// Reads `RECOMMENDER_*` variables from the process environment.
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::prefixed("RECOMMENDER_").from_env()
    }

    /// Reads `RECOMMENDER_*` variables from an explicit list of pairs.
    pub fn from_vars<I>(vars: I) -> Result<Self, envy::Error>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::prefixed("RECOMMENDER_").from_iter(vars)
    }

    pub fn is_anonymous(&self, user_id: &str) -> bool {
        !self.anonymous_user_prefix.is_empty() && user_id.starts_with(&self.anonymous_user_prefix)
    }

    /// Field and threshold, only when both are configured.
    pub fn near_identical_filter(&self) -> Option<(&str, f64)> {
        match (
            self.near_identical_filter_field.as_deref(),
            self.near_identical_filter_threshold,
        ) {
            (Some(field), Some(threshold)) => Some((field, threshold)),
            _ => None,
        }
    }
}

impl Config {
    /// Loads `.env` if present, then reads `SERVICE_*` and `RECOMMENDER_*`.
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars<I>(vars: I) -> Result<Self, envy::Error>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: Vec<(String, String)> = vars.into_iter().collect();

        Ok(Config {
            service: envy::prefixed("SERVICE_").from_iter(vars.clone())?,
            recommender: RecommenderSettings::from_vars(vars)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_when_env_is_empty() {
        let settings = RecommenderSettings::from_vars(Vec::new()).unwrap();

        assert_eq!(settings.base_products_count, 10);
        assert_eq!(settings.candidate_pool_floor, 500);
        assert_eq!(settings.slack_factor, 3);
        assert_eq!(settings.near_identical_slack_factor, 2);
        assert_eq!(settings.product_age_decay, DecayFunction::None);
        assert!(settings.near_identical_filter().is_none());
    }

    #[test]
    fn test_env_overrides() {
        let settings = RecommenderSettings::from_vars(vars(&[
            ("RECOMMENDER_BASE_PRODUCTS_COUNT", "4"),
            ("RECOMMENDER_HISTORY_DECAY", "exponential:2"),
            ("RECOMMENDER_NEAR_IDENTICAL_FILTER_FIELD", "title"),
            ("RECOMMENDER_NEAR_IDENTICAL_FILTER_THRESHOLD", "0.8"),
            ("UNRELATED", "ignored"),
        ]))
        .unwrap();

        assert_eq!(settings.base_products_count, 4);
        assert_eq!(
            settings.history_decay,
            DecayFunction::Exponential { half_life: 2.0 }
        );
        assert_eq!(settings.near_identical_filter(), Some(("title", 0.8)));
    }

    #[test]
    fn test_invalid_decay_is_rejected() {
        let result =
            RecommenderSettings::from_vars(vars(&[("RECOMMENDER_PRODUCT_AGE_DECAY", "cubic")]));
        assert!(result.is_err());
    }

    #[test]
    fn test_config_reads_both_prefixes() {
        let config = Config::from_vars(vars(&[
            ("SERVICE_SERVICE_NAME", "recs-eu"),
            ("SERVICE_LOG_JSON", "true"),
            ("RECOMMENDER_SLACK_FACTOR", "5"),
        ]))
        .unwrap();

        assert_eq!(config.service.service_name, "recs-eu");
        assert!(config.service.log_json);
        assert_eq!(config.recommender.slack_factor, 5);
        assert_eq!(config.recommender.candidate_pool_floor, 500);
    }

    #[test]
    fn test_service_defaults() {
        let config = Config::from_vars(Vec::new()).unwrap();

        assert_eq!(config.service.service_name, "recommender-core");
        assert!(!config.service.log_json);
    }

    #[test]
    fn test_anonymous_prefix() {
        let settings = RecommenderSettings::default();
        assert!(settings.is_anonymous("hmrtmp_42"));
        assert!(!settings.is_anonymous("u42"));
    }
}
