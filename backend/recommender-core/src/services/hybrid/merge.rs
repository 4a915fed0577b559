//! Merge policies of the hybrid recommender.
//!
//! Every policy receives each specialist's contributions sorted best first
//! and produces one merged, duplicate-free ranking.

use crate::models::{ProductId, ScoreTuple, ScoredProduct};
use crate::services::ranking::top_k;
use crate::utils::{exponential_decay, gcd};
use rand::Rng;
use std::collections::{HashMap, HashSet};
use tracing::info;

/// Weights are assumed to carry at most two decimal places
const WEIGHT_SCALE: f64 = 100.0;

/// Half-life (in ranking positions) of a specialist's vote
const VOTE_HALF_LIFE: f64 = 4.0;

/// Minimum value of a first-place vote
const MAX_VOTE_FLOOR: usize = 1000;

/// A specialist as seen by the merge policies.
#[derive(Debug, Clone, Copy)]
pub struct WeightedAlgorithm<'a> {
    pub suffix: &'a str,
    pub weight: f64,
    pub no_bonus: bool,
}

pub type Contributions = HashMap<String, Vec<ScoredProduct>>;

/// Takes chunks from each specialist in turn, chunk sizes proportional to the
/// weights. Stops once `n_recommendations` are collected or a whole round
/// adds nothing.
pub fn merge_chunks(
    algorithms: &[WeightedAlgorithm<'_>],
    contributions: &Contributions,
    n_recommendations: usize,
) -> Vec<ScoredProduct> {
    let chunk_sizes = chunk_sizes(algorithms);
    let mut cursors = vec![0usize; algorithms.len()];
    let mut contributed = vec![0usize; algorithms.len()];
    let mut merged = Vec::new();
    let mut seen: HashSet<ProductId> = HashSet::new();

    while merged.len() < n_recommendations {
        let before = merged.len();

        for (i, algorithm) in algorithms.iter().enumerate() {
            let Some(items) = contributions.get(algorithm.suffix) else {
                continue;
            };

            let mut taken = 0;
            while cursors[i] < items.len() && taken < chunk_sizes[i] {
                let item = &items[cursors[i]];
                cursors[i] += 1;
                if seen.insert(item.product_id.clone()) {
                    merged.push(ScoredProduct::new(item.score.tagged(algorithm.suffix), item.product_id.clone()));
                    taken += 1;
                }
            }
            contributed[i] += taken;
        }

        // 所有策略都沒有新貢獻
        if merged.len() == before {
            break;
        }
    }

    log_contributions(algorithms, &contributed);
    merged
}

/// Integer chunk sizes with no common divisor, e.g. 0.6 / 0.4 -> 3 / 2.
fn chunk_sizes(algorithms: &[WeightedAlgorithm<'_>]) -> Vec<usize> {
    let scaled: Vec<u64> = algorithms
        .iter()
        .map(|a| (a.weight * WEIGHT_SCALE).round() as u64)
        .collect();
    let divisor = scaled.iter().copied().fold(0, gcd).max(1);

    scaled
        .into_iter()
        .map(|w| ((w / divisor) as usize).max(1))
        .collect()
}

/// Repeatedly draws a specialist with probability proportional to its weight
/// (among those with items left) and takes its next unseen item.
pub fn merge_random<R: Rng + ?Sized>(
    algorithms: &[WeightedAlgorithm<'_>],
    contributions: &Contributions,
    n_recommendations: usize,
    rng: &mut R,
) -> Vec<ScoredProduct> {
    let mut cursors = vec![0usize; algorithms.len()];
    let mut contributed = vec![0usize; algorithms.len()];
    let mut merged = Vec::new();
    let mut seen: HashSet<ProductId> = HashSet::new();
    let mut cdf = cumulative_distribution(algorithms, contributions, &cursors);

    while merged.len() < n_recommendations {
        let Some(i) = choose(&cdf, rng.gen::<f64>()) else {
            break;
        };
        let algorithm = &algorithms[i];
        let items = contributions
            .get(algorithm.suffix)
            .map(Vec::as_slice)
            .unwrap_or(&[]);

        let before = merged.len();
        while cursors[i] < items.len() {
            let item = &items[cursors[i]];
            cursors[i] += 1;
            if seen.insert(item.product_id.clone()) {
                merged.push(ScoredProduct::new(item.score.tagged(algorithm.suffix), item.product_id.clone()));
                contributed[i] += 1;
                break;
            }
        }

        if merged.len() == before {
            // the chosen specialist ran dry
            cdf = cumulative_distribution(algorithms, contributions, &cursors);
        }
    }

    log_contributions(algorithms, &contributed);
    merged
}

/// (specialist index, cumulative probability) over specialists with items left.
fn cumulative_distribution(
    algorithms: &[WeightedAlgorithm<'_>],
    contributions: &Contributions,
    cursors: &[usize],
) -> Vec<(usize, f64)> {
    let mut cdf = Vec::new();
    let mut cumulative = 0.0;

    for (i, algorithm) in algorithms.iter().enumerate() {
        let available = contributions.get(algorithm.suffix).map_or(0, Vec::len);
        if cursors[i] < available {
            cumulative += algorithm.weight;
            cdf.push((i, cumulative));
        }
    }

    cdf.into_iter().map(|(i, c)| (i, c / cumulative)).collect()
}

fn choose(cdf: &[(usize, f64)], draw: f64) -> Option<usize> {
    cdf.iter().find(|(_, c)| draw < *c).map(|(i, _)| *i)
}

/// Each specialist's top `n_recommendations` vote with a value halving every
/// four positions, scaled by its weight. Every `bonus_period` positions of
/// the merged ranking, each specialist (unless flagged no-bonus) forces its
/// next ranked item in, so the heaviest specialist cannot monopolise the top.
///
/// Output tuples are `(remaining rank) ++ original tuple`, where the original
/// tuple is the vote total, or the specialist's own tuple for forced items.
pub fn merge_voting(
    algorithms: &[WeightedAlgorithm<'_>],
    contributions: &Contributions,
    n_recommendations: usize,
    bonus_period: usize,
) -> Vec<ScoredProduct> {
    let max_vote = MAX_VOTE_FLOOR.max(n_recommendations) as f64;
    let mut votes_by_product: HashMap<&ProductId, f64> = HashMap::new();
    let mut voting_order: Vec<&ProductId> = Vec::new();

    for algorithm in algorithms {
        let items = contributions
            .get(algorithm.suffix)
            .map(Vec::as_slice)
            .unwrap_or(&[]);

        for (idx, item) in items.iter().take(n_recommendations).enumerate() {
            let vote = max_vote * exponential_decay(idx as f64, VOTE_HALF_LIFE) * algorithm.weight;
            let votes = votes_by_product.entry(&item.product_id).or_insert_with(|| {
                voting_order.push(&item.product_id);
                0.0
            });
            *votes += vote;
        }

        info!("Algorithm [{}] ranked [{}] products", algorithm.suffix, items.len());
    }

    let ballots: Vec<ScoredProduct> = voting_order
        .iter()
        .map(|p| ScoredProduct::new(ScoreTuple::from_values([votes_by_product[*p]]), (*p).clone()))
        .collect();
    let ranked = top_k(ballots, n_recommendations);
    let recommendations_count = ranked.len();

    let mut final_ranking: Vec<ScoredProduct> = Vec::new();
    let mut ranked_products: HashSet<ProductId> = HashSet::new();
    let mut include = |product_id: &ProductId, original: &ScoreTuple| {
        if !ranked_products.contains(product_id) {
            let position = recommendations_count as f64 - ranked_products.len() as f64;
            final_ranking.push(ScoredProduct::new(original.prefixed(position), product_id.clone()));
            ranked_products.insert(product_id.clone());
        }
    };

    for (idx, voted) in ranked.iter().enumerate() {
        if bonus_period > 0 && idx % bonus_period == 0 {
            let bonus_rank = idx / bonus_period;
            for algorithm in algorithms.iter().filter(|a| !a.no_bonus) {
                let forced = contributions
                    .get(algorithm.suffix)
                    .and_then(|items| items.get(bonus_rank));
                if let Some(forced) = forced {
                    include(&forced.product_id, &forced.score);
                }
            }
        }
        include(&voted.product_id, &voted.score);
    }

    final_ranking
}

fn log_contributions(algorithms: &[WeightedAlgorithm<'_>], contributed: &[usize]) {
    for (algorithm, count) in algorithms.iter().zip(contributed) {
        info!("Algorithm [{}] contributed [{}] items", algorithm.suffix, count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn contributions(entries: &[(&str, &[&str])]) -> Contributions {
        entries
            .iter()
            .map(|(suffix, ids)| {
                let len = ids.len();
                let items = ids
                    .iter()
                    .enumerate()
                    .map(|(i, id)| ScoredProduct::new(ScoreTuple::from_values([(len - i) as f64]), *id))
                    .collect();
                (suffix.to_string(), items)
            })
            .collect()
    }

    fn weighted(suffix: &str, weight: f64) -> WeightedAlgorithm<'_> {
        WeightedAlgorithm {
            suffix,
            weight,
            no_bonus: false,
        }
    }

    fn ids(items: &[ScoredProduct]) -> Vec<&str> {
        items.iter().map(|i| i.product_id.as_str()).collect()
    }

    #[test]
    fn test_chunk_sizes_are_reduced() {
        assert_eq!(chunk_sizes(&[weighted("A", 0.6), weighted("B", 0.4)]), vec![3, 2]);
        assert_eq!(chunk_sizes(&[weighted("A", 0.5), weighted("B", 0.5)]), vec![1, 1]);
    }

    #[test]
    fn test_chunks_interleave_by_weight_and_skip_duplicates() {
        let contributions = contributions(&[
            ("A", &["a1", "a2", "a3", "a4"]),
            ("B", &["a1", "b1", "b2"]),
        ]);
        let algorithms = [weighted("A", 0.6), weighted("B", 0.4)];

        let merged = merge_chunks(&algorithms, &contributions, 7);

        assert_eq!(ids(&merged), vec!["a1", "a2", "a3", "b1", "b2", "a4"]);
        assert!(merged[0].score.components()[0].is_tag());
        assert_eq!(merged[3].score, ScoreTuple::from_values([2.0]).tagged("B"));
    }

    #[test]
    fn test_random_merge_takes_everything_once() {
        let contributions = contributions(&[("A", &["p1", "p2"]), ("B", &["p2", "p3"]), ("C", &[])]);
        let algorithms = [weighted("A", 0.7), weighted("B", 0.3), weighted("C", 1.0)];
        let mut rng = StdRng::seed_from_u64(7);

        let merged = merge_random(&algorithms, &contributions, 10, &mut rng);

        let mut got = ids(&merged);
        got.sort_unstable();
        assert_eq!(got, vec!["p1", "p2", "p3"]);
    }

    #[test]
    fn test_random_merge_keeps_specialist_order() {
        let contributions = contributions(&[("A", &["p1", "p2", "p3"])]);
        let mut rng = StdRng::seed_from_u64(1);

        let merged = merge_random(&[weighted("A", 1.0)], &contributions, 2, &mut rng);

        assert_eq!(ids(&merged), vec!["p1", "p2"]);
    }

    #[test]
    fn test_voting_sums_weighted_votes() {
        let contributions = contributions(&[("A", &["shared", "a-only"]), ("B", &["b-only", "shared"])]);
        let algorithms = [weighted("A", 0.5), weighted("B", 0.5)];

        // only position 0 gets a bonus round with this period
        let merged = merge_voting(&algorithms, &contributions, 3, 100);

        // position 0 forces each specialist's best item in first
        assert_eq!(ids(&merged), vec!["shared", "b-only", "a-only"]);
        // forced items keep the specialist's own tuple
        assert_eq!(merged[0].score, ScoreTuple::from_values([3.0, 2.0]));
        assert_eq!(merged[1].score, ScoreTuple::from_values([2.0, 2.0]));
        // voted items carry their vote total
        let a_only_votes = 1000.0 * exponential_decay(1.0, 4.0) * 0.5;
        assert_eq!(merged[2].score.value(0), Some(1.0));
        assert!((merged[2].score.value(1).unwrap() - a_only_votes).abs() < 1e-9);
    }

    #[test]
    fn test_voting_no_bonus_specialist_is_not_forced() {
        let contributions = contributions(&[("A", &["a1", "a2"]), ("B", &["b1"])]);
        let algorithms = [
            weighted("A", 1.0),
            WeightedAlgorithm {
                suffix: "B",
                weight: 0.01,
                no_bonus: true,
            },
        ];

        let merged = merge_voting(&algorithms, &contributions, 3, 8);

        assert_eq!(ids(&merged), vec!["a1", "a2", "b1"]);
    }
}
