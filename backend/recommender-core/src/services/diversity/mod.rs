use crate::context::SessionContext;
use crate::error::Result;
use crate::models::{ProductId, ScoredProduct};
use crate::providers::NearIdenticalDetector;
use tracing::debug;

/// Marker put in front of the score of demoted near-identical products.
pub const NEAR_IDENTICAL_TAG: &str = "NI";

/// Result of near-identical demotion over one ranked page.
#[derive(Debug, Clone, Default)]
pub struct DiversityOutcome {
    pub items: Vec<ScoredProduct>,
    /// Demoted products that made it into `items`
    pub demoted: usize,
}

/// Diversity Layer - 近似重複降權
///
/// Keeps the products the detector considers distinct (in rank order) until
/// `n_recommendations` are collected, then fills the hole with the
/// near-identical ones, tagged with [`NEAR_IDENTICAL_TAG`]. When the clean
/// and demoted lists together fall short, the page is shorter than requested.
pub async fn demote_near_identical(
    detector: &dyn NearIdenticalDetector,
    context: &SessionContext,
    ranked: Vec<ScoredProduct>,
    n_recommendations: usize,
) -> Result<DiversityOutcome> {
    if ranked.is_empty() || n_recommendations == 0 {
        return Ok(DiversityOutcome::default());
    }

    let product_ids: Vec<ProductId> = ranked.iter().map(|r| r.product_id.clone()).collect();
    let near_identical = detector
        .pinpoint_near_identical(context, &product_ids, context.product_models())
        .await?;

    let (mut items, demoted): (Vec<ScoredProduct>, Vec<ScoredProduct>) = ranked
        .into_iter()
        .partition(|r| !near_identical.contains(&r.product_id));
    items.truncate(n_recommendations);

    let hole = n_recommendations - items.len();
    let filled: Vec<ScoredProduct> = demoted
        .into_iter()
        .take(hole)
        .map(|r| ScoredProduct::new(r.score.tagged(NEAR_IDENTICAL_TAG), r.product_id))
        .collect();

    debug!(
        flagged = near_identical.len(),
        demoted = filled.len(),
        "Near-identical products demoted"
    );

    let demoted = filled.len();
    items.extend(filled);

    Ok(DiversityOutcome { items, demoted })
}
