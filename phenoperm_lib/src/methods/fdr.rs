use crate::methods::gsea::EnrichmentRecord;
use crate::methods::null_distribution::NullDistributionTable;
use crate::stat::{adjust, empirical_p, AdjustmentMethod};
use log::warn;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FdrResult {
    pub gene_set: String,
    pub observed_es: f64,
    pub observed_nes: f64,
    /// Engine-reported FDR of the observed run, zero floored
    pub engine_fdr: Option<f64>,
    /// Null values available for this gene set
    pub null_count: usize,
    pub nominal_p: f64,
    pub fdr_q: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FdrEstimate {
    pub pool_size: usize,
    pub results: Vec<FdrResult>,
    /// Observed gene sets with no null values or a non-finite ES
    pub unscored: Vec<String>,
}

impl FdrEstimate {
    pub fn significant(&self, alpha: f64) -> usize {
        self.results.iter().filter(|r| r.fdr_q < alpha).count()
    }

    pub fn get(&self, gene_set: &str) -> Option<&FdrResult> {
        self.results.iter().find(|r| r.gene_set == gene_set)
    }
}

/// Empirical p-values of the observed scores against the trial null, with BH
/// q-values computed across all scored gene sets together.
///
/// The smoothing denominator is the table's requested pool size plus one,
/// not the number of trials that happened to score a given gene set.
/// `real_permutations` is only used to floor the engine's own FDR.
pub fn estimate_fdr(
    observed: &[EnrichmentRecord],
    null: &NullDistributionTable,
    real_permutations: usize,
) -> FdrEstimate {
    let pool_size = null.requested_trials();
    let mut results = Vec::with_capacity(observed.len());
    let mut unscored = Vec::new();
    for record in observed {
        let null_count = null.entries(&record.gene_set).len();
        if null_count == 0 || !record.es.is_finite() {
            unscored.push(record.gene_set.clone());
            continue;
        }
        results.push(FdrResult {
            gene_set: record.gene_set.clone(),
            observed_es: record.es,
            observed_nes: record.nes,
            engine_fdr: record.floored_fdr(real_permutations),
            null_count,
            nominal_p: empirical_p(record.es, null.es_values(&record.gene_set), pool_size),
            fdr_q: f64::NAN,
        });
    }
    if !unscored.is_empty() {
        warn!(
            "{} observed gene sets have no null values and are left out of the FDR table",
            unscored.len()
        );
    }
    let p_vals: Vec<f64> = results.iter().map(|r| r.nominal_p).collect();
    let q_vals = adjust(&p_vals, AdjustmentMethod::BH);
    for (result, q) in results.iter_mut().zip(q_vals) {
        result.fdr_q = q;
    }
    FdrEstimate {
        pool_size,
        results,
        unscored,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use statrs::assert_almost_eq;

    fn record(set: &str, es: f64, fdr: Option<f64>) -> EnrichmentRecord {
        EnrichmentRecord {
            gene_set: set.to_string(),
            es,
            nes: es,
            fdr,
        }
    }

    #[test]
    fn missing_null_is_unscored() {
        let mut null = NullDistributionTable::new(10);
        null.merge(1, &[record("A", 0.1, None)]);
        let estimate = estimate_fdr(
            &[record("A", 0.5, Some(0.0)), record("B", 0.5, None)],
            &null,
            1000,
        );
        assert_eq!(estimate.unscored, vec!["B".to_string()]);
        let a = estimate.get("A").unwrap();
        assert_eq!(a.null_count, 1);
        assert_almost_eq!(a.nominal_p, 1.0 / 11.0, 1e-12);
        assert_almost_eq!(a.engine_fdr.unwrap(), 1.0 / 1001.0, 1e-15);
    }

    #[test]
    fn q_values_are_joint() {
        let mut null = NullDistributionTable::new(9);
        for trial in 1..=9 {
            null.merge(
                trial,
                &[record("A", trial as f64 / 10.0, None), record("B", -(trial as f64) / 10.0, None)],
            );
        }
        // A: 0.45 beaten by 0.5..0.9 (5 values); B: -0.95 beaten by none
        let estimate = estimate_fdr(&[record("A", 0.45, None), record("B", -0.95, None)], &null, 1);
        let a = estimate.get("A").unwrap();
        let b = estimate.get("B").unwrap();
        assert_almost_eq!(a.nominal_p, 0.6, 1e-12);
        assert_almost_eq!(b.nominal_p, 0.1, 1e-12);
        assert_almost_eq!(b.fdr_q, 0.2, 1e-12);
        assert_almost_eq!(a.fdr_q, 0.6, 1e-12);
    }
}
