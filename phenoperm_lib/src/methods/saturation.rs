use crate::methods::fdr::estimate_fdr;
use crate::methods::gsea::EnrichmentRecord;
use crate::methods::null_distribution::NullDistributionTable;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaturationPoint {
    pub trials: usize,
    pub significant: usize,
}

/// `step, 2*step, ...` up to `total`, with `total` itself always last.
pub fn default_prefixes(total: usize, step: usize) -> Vec<usize> {
    if total == 0 {
        return Vec::new();
    }
    if step == 0 {
        return vec![total];
    }
    let mut prefixes: Vec<usize> = (1..=total / step).map(|i| i * step).collect();
    if prefixes.last() != Some(&total) {
        prefixes.push(total);
    }
    prefixes
}

/// Number of gene sets with empirical FDR below `alpha` when only trials
/// `1..=k` are used, for every prefix size `k`.
pub fn saturation_curve(
    observed: &[EnrichmentRecord],
    null: &NullDistributionTable,
    prefixes: &[usize],
    alpha: f64,
    real_permutations: usize,
) -> Vec<SaturationPoint> {
    prefixes
        .par_iter()
        .map(|&k| {
            let estimate = estimate_fdr(observed, &null.prefix(k), real_permutations);
            SaturationPoint {
                trials: k,
                significant: estimate.significant(alpha),
            }
        })
        .collect()
}

/// Whether the sample variance of the last `window` significant counts is
/// at most `tolerance`. Curves shorter than the window are never stable.
pub fn is_stable(curve: &[SaturationPoint], window: usize, tolerance: f64) -> bool {
    if window < 2 || curve.len() < window {
        return false;
    }
    let tail: Vec<f64> = curve[curve.len() - window..]
        .iter()
        .map(|p| p.significant as f64)
        .collect();
    tail.variance() <= tolerance
}
