//! Concrete recommendation strategies.

mod mock;
mod popularity;
mod product_based;
mod random;
mod user_based;

pub use mock::MockRecommender;
pub use popularity::PopularityRecommender;
pub use product_based::{
    Attraction, AttractionRecommender, ContentSimilarity, ContentSimilarityRecommender,
    ProductBasedRecommender, TemplateFamily,
};
pub use random::RandomRecommender;
pub use user_based::{StrengthTimesOutBoost, UserBasedRecommender, UserCfRecommender, UserScoring};
