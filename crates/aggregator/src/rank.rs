//! Rank fusion.
//!
//! Every contribution scores `weight * 1/log2(position + 2)` and a merged
//! result sums its contributions, so agreement between engines boosts a
//! result above any single engine's pick. The tie-break chain is total,
//! which makes the final ordering deterministic for identical inputs.

use std::cmp::Ordering;

use ms_domain::{Query, SearchResult};

use crate::dedupe::MergedResult;

/// Position decay for a 0-based rank: 1, 0.6309, 0.5, 0.4307, ...
pub fn position_decay(position: usize) -> f64 {
    1.0 / (position as f64 + 2.0).log2()
}

fn score(merged: &MergedResult) -> f64 {
    merged
        .contributions
        .iter()
        .map(|c| c.weight * position_decay(c.position))
        .sum()
}

fn mean_position(merged: &MergedResult) -> f64 {
    let sum: usize = merged.contributions.iter().map(|c| c.position).sum();
    sum as f64 / merged.contributions.len() as f64
}

/// Score, order, and paginate merged results.
///
/// Returns the slice for the requested page plus the total number of
/// deduplicated results (for pagination headers).
pub fn rank_and_paginate(mut merged: Vec<MergedResult>, query: &Query) -> (Vec<SearchResult>, usize) {
    for m in merged.iter_mut() {
        m.result.score = score(m);
    }

    merged.sort_by(|a, b| {
        b.result
            .score
            .partial_cmp(&a.result.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.contributions.len().cmp(&a.contributions.len()))
            .then_with(|| {
                mean_position(a)
                    .partial_cmp(&mean_position(b))
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| a.fingerprint.cmp(&b.fingerprint))
    });

    let total = merged.len();
    let limit = query.limit as usize;
    let window_end = (query.page as usize * limit).min(total);
    let start = ((query.page as usize - 1) * limit).min(window_end);

    let page: Vec<SearchResult> = merged
        .into_iter()
        .take(window_end)
        .skip(start)
        .map(|m| m.result)
        .collect();
    (page, total)
}
