//! Ranking Module
//!
//! Selects the best scored products by lexicographic score tuple order.
//!
//! # Ordering
//! - Higher tuples rank first, component 0 dominating.
//! - Equal tuples keep their input order, so a shuffled backfill stays shuffled.

use crate::models::{ScoreTuple, ScoredProduct};
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Returns the `k` highest scored products, best first.
pub fn top_k(scored: Vec<ScoredProduct>, k: usize) -> Vec<ScoredProduct> {
    if k == 0 || scored.is_empty() {
        return Vec::new();
    }

    if k >= scored.len() {
        let mut all = scored;
        // sort_by is stable
        all.sort_by(|a, b| b.score.cmp(&a.score));
        return all;
    }

    // Min-heap over (score, earlier-first) bounded to k entries
    let mut heap: BinaryHeap<Reverse<(ScoreTuple, Reverse<usize>)>> = BinaryHeap::with_capacity(k + 1);
    for (seq, item) in scored.iter().enumerate() {
        heap.push(Reverse((item.score.clone(), Reverse(seq))));
        if heap.len() > k {
            heap.pop();
        }
    }

    let mut slots: Vec<Option<ScoredProduct>> = scored.into_iter().map(Some).collect();
    let mut selected: Vec<(ScoreTuple, Reverse<usize>)> = heap.into_iter().map(|Reverse(key)| key).collect();
    selected.sort_by(|a, b| b.cmp(a));

    selected
        .into_iter()
        .filter_map(|(_, Reverse(seq))| slots[seq].take())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(values: &[f64], id: &str) -> ScoredProduct {
        ScoredProduct::new(ScoreTuple::from_values(values.iter().copied()), id)
    }

    #[test]
    fn test_top_k_orders_lexicographically() {
        let scored = vec![
            item(&[10.0, 5.0, 0.9], "low-tier"),
            item(&[20.0, 1.0, 0.1], "high-tier"),
            item(&[20.0, 3.0, 0.5], "high-tier-priority"),
        ];

        let ranked = top_k(scored, 2);

        let ids: Vec<&str> = ranked.iter().map(|r| r.product_id.as_str()).collect();
        assert_eq!(ids, vec!["high-tier-priority", "high-tier"]);
    }

    #[test]
    fn test_top_k_keeps_input_order_on_ties() {
        let scored = vec![
            item(&[1.0], "a"),
            item(&[0.0], "b"),
            item(&[0.0], "c"),
            item(&[0.0], "d"),
        ];

        let bounded = top_k(scored.clone(), 3);
        let ids: Vec<&str> = bounded.iter().map(|r| r.product_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);

        let full = top_k(scored, 10);
        let ids: Vec<&str> = full.iter().map(|r| r.product_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_top_k_zero_is_empty() {
        assert!(top_k(vec![item(&[1.0], "a")], 0).is_empty());
    }
}
