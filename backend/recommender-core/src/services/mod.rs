pub mod diversity;
pub mod hybrid;
pub mod ranking;
pub mod recommender;
pub mod strategies;

pub use diversity::{demote_near_identical, DiversityOutcome};
pub use hybrid::{HybridRecommender, MergePolicy, Specialist};
pub use ranking::top_k;
pub use recommender::{Recommender, PRE_FILTER, PRE_FILTER_TAG};
pub use strategies::{
    AttractionRecommender, ContentSimilarityRecommender, MockRecommender, PopularityRecommender,
    RandomRecommender, UserCfRecommender,
};
