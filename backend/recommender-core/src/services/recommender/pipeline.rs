use super::{Recommender, PRE_FILTER, PRE_FILTER_TAG};
use crate::context::{FilterStrategy, SessionContext};
use crate::error::{RecommenderError, Result};
use crate::models::{CandidateMap, PipelineStats, ProductId, RecommendationResult, ScoreTuple, ScoredProduct};
use crate::services::diversity;
use rand::seq::SliceRandom;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

/// Runs the whole recommendation pipeline for one strategy:
/// gather → filter → score → decay → backfill → rank → near-identical demotion.
pub async fn recommend<R>(recommender: &mut R, n_recommendations: usize) -> Result<RecommendationResult>
where
    R: Recommender + ?Sized,
{
    let context = Arc::clone(recommender.context());
    let span = info_span!(
        "recommend",
        request_id = %Uuid::new_v4(),
        user_id = %context.user_id(),
        algorithm = %recommender.suffix(),
    );

    run(recommender, &context, n_recommendations)
        .instrument(span)
        .await
}

async fn run<R>(
    recommender: &mut R,
    context: &SessionContext,
    n_recommendations: usize,
) -> Result<RecommendationResult>
where
    R: Recommender + ?Sized,
{
    let started = Instant::now();
    let settings = context.settings();
    let mut stats = PipelineStats::default();

    info!(
        "Retrieving {} recommendations for user [{}]",
        n_recommendations,
        context.user_id()
    );

    // Slack to survive later pruning by decays, deleted and consumed products.
    let with_slack = settings.slack_factor.saturating_mul(n_recommendations);
    let candidates =
        gather_processed_candidates(recommender, settings.candidate_pool_floor.max(with_slack))
            .await?;
    stats.candidate_count = count_unique(&candidates);

    let before_scoring = context.filter_strategy() == FilterStrategy::BeforeScoring;
    let target_count = if before_scoring {
        candidates
            .get(PRE_FILTER)
            .map_or(0, |pre_filtered| with_slack.min(pre_filtered.len()))
    } else {
        with_slack
    };

    let scored = recommender
        .score_candidates(&candidates, target_count)
        .await?;
    stats.scored_count = scored.len();
    info!("full recommendations: [{}]", scored.len());
    debug!(scores = ?scored, "full recommendations");

    if !recommender.is_hybrid() {
        ensure_consistent_arity(recommender.suffix(), recommender.score_arity(), &scored)?;
    }

    let scored_ids: HashSet<ProductId> = scored.iter().map(|s| s.product_id.clone()).collect();

    let mut scored = recommender.post_process(scored);
    stats.post_processed_count = scored.len();
    info!("post-processed recommendations: [{}]", scored.len());
    debug!(scores = ?scored, "post-processed recommendations");

    // Every pre-filtered product must be recommendable, even without any signal.
    if before_scoring {
        if let Some(pre_filtered) = candidates.get(PRE_FILTER) {
            let mut floor = ScoreTuple::floor(recommender.score_arity());
            if recommender.is_hybrid() {
                floor = floor.tagged(PRE_FILTER_TAG);
            }
            let backfill = backfill_missing(context, pre_filtered, &scored_ids, &floor);
            stats.backfilled_count = backfill.len();
            scored.extend(backfill);
        }
    }

    let near_identical_filter = settings.near_identical_filter().is_some();
    let slack_for_near_identical = if near_identical_filter {
        settings.near_identical_slack_factor
    } else {
        1
    };
    let ranked = recommender.rank(
        scored,
        slack_for_near_identical.saturating_mul(n_recommendations),
    );
    info!("ranked recommendations: [{}]", ranked.len());
    debug!(scores = ?ranked, "ranked recommendations");

    let items = match context.near_identical_detector() {
        Some(detector) if near_identical_filter => {
            let outcome =
                diversity::demote_near_identical(detector, context, ranked, n_recommendations)
                    .await?;
            stats.near_identical_count = outcome.demoted;
            info!(
                "recommendations after near-identical filter [count({})]",
                outcome.items.len()
            );
            outcome.items
        }
        _ => {
            let mut ranked = ranked;
            ranked.truncate(n_recommendations);
            ranked
        }
    };

    stats.final_count = items.len();
    stats.elapsed_ms = started.elapsed().as_millis() as u64;

    info!(
        "Recommender{} took [{:.6}] seconds for user [{}]",
        recommender.suffix(),
        started.elapsed().as_secs_f64(),
        context.user_id()
    );

    Ok(RecommendationResult { items, stats })
}

/// Resolves the candidate map according to the context's filter strategy.
///
/// BEFORE_SCORING hands every strategy the pre-filtered set. AFTER_SCORING
/// lets the strategy gather its own candidates, drops blocked products from
/// their union, runs the positive filter over what is left and narrows each
/// strategy's set to the survivors.
pub async fn gather_processed_candidates<R>(recommender: &mut R, min_count: usize) -> Result<CandidateMap>
where
    R: Recommender + ?Sized,
{
    let context = Arc::clone(recommender.context());

    match context.filter_strategy() {
        FilterStrategy::BeforeScoring => Ok(HashMap::from([(
            PRE_FILTER.to_string(),
            context.filtered_products().clone(),
        )])),
        FilterStrategy::AfterScoring => {
            let mut products_by_algorithm = recommender.gather_candidates(min_count).await?;

            let unblocked: HashSet<&ProductId> = products_by_algorithm
                .values()
                .flatten()
                .filter(|p| !context.blocked_products().contains(*p))
                .collect();
            let unblocked: Vec<ProductId> = unblocked.into_iter().cloned().collect();

            let filtered = if unblocked.is_empty() {
                HashSet::new()
            } else {
                context.positive_filter().filter_products(&unblocked).await?
            };

            for products in products_by_algorithm.values_mut() {
                products.retain(|p| filtered.contains(p));
            }

            debug!(
                gathered = unblocked.len(),
                kept = filtered.len(),
                "Post-filtered candidate products"
            );

            Ok(products_by_algorithm)
        }
    }
}

/// Multiplies every numeric component (after the hybrid tag, if any) by the
/// product's decay and boost factors. Products with a non-positive age,
/// history or previous-consumption factor are dropped.
pub fn post_process_scores(
    context: &SessionContext,
    is_hybrid: bool,
    scored: Vec<ScoredProduct>,
) -> Vec<ScoredProduct> {
    let start_index = if is_hybrid { 1 } else { 0 };

    scored
        .into_iter()
        .filter_map(|mut item| {
            let factor = relevance_factor(context, &item.product_id)?;
            item.score.scale_from(start_index, factor);
            Some(item)
        })
        .collect()
}

/// Combined decay/boost factor, or `None` when the product must never be
/// recommended.
fn relevance_factor(context: &SessionContext, product_id: &str) -> Option<f64> {
    let product_age_decay = context.product_age_decay_factor(product_id);
    if product_age_decay <= 0.0 {
        return None;
    }

    let history_decay = context.history_decay_factor(product_id);
    if history_decay <= 0.0 {
        return None;
    }

    let previous_consumption = context.previous_consumption_factor(product_id);
    if previous_consumption <= 0.0 {
        return None;
    }

    Some(product_age_decay * history_decay * previous_consumption * context.in_boost(product_id))
}

/// Pre-filtered products no strategy scored, in random order, with the floor
/// score. Products excluded by decays stay out.
fn backfill_missing(
    context: &SessionContext,
    pre_filtered: &HashSet<ProductId>,
    scored_ids: &HashSet<ProductId>,
    floor: &ScoreTuple,
) -> Vec<ScoredProduct> {
    let mut missing: Vec<&ProductId> = pre_filtered
        .iter()
        .filter(|p| !scored_ids.contains(*p))
        // Same non-positive relevance exclusion as scored products: a product
        // dropped by a decay must not come back with the floor score.
        .filter(|p| relevance_factor(context, p).is_some())
        .collect();
    missing.shuffle(&mut rand::thread_rng());

    missing
        .into_iter()
        .map(|p| ScoredProduct::new(floor.clone(), p.clone()))
        .collect()
}

fn ensure_consistent_arity(algorithm: &str, expected: usize, scored: &[ScoredProduct]) -> Result<()> {
    match scored.iter().find(|s| s.score.len() != expected) {
        Some(offending) => Err(RecommenderError::InconsistentScore {
            algorithm: algorithm.to_string(),
            expected,
            found: offending.score.len(),
        }),
        None => Ok(()),
    }
}

fn count_unique(candidates: &CandidateMap) -> usize {
    candidates.values().flatten().collect::<HashSet<_>>().len()
}
