//! Recommendation core: candidate gathering, scoring, decays, ranking and
//! near-identical suppression over pluggable strategies.

pub mod config;
pub mod context;
pub mod error;
pub mod models;
pub mod providers;
pub mod services;
pub mod telemetry;
pub mod utils;

pub use config::{Config, RecommenderSettings};
pub use context::{DecayFunction, FilterStrategy, SessionContext, SessionContextBuilder};
pub use error::{RecommenderError, Result};
pub use models::{RecommendationResult, ScoreComponent, ScoreTuple, ScoredProduct};
pub use services::{HybridRecommender, MergePolicy, Recommender, Specialist};
