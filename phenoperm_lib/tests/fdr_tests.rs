use phenoperm_lib::methods::fdr::estimate_fdr;
use phenoperm_lib::methods::gsea::EnrichmentRecord;
use phenoperm_lib::methods::null_distribution::NullDistributionTable;
use phenoperm_lib::stat::{adjust, empirical_p, AdjustmentMethod};
use pretty_assertions::assert_eq;
use statrs::assert_almost_eq;

const THRESHOLD: f64 = 1e-12;

fn record(set: &str, es: f64) -> EnrichmentRecord {
    EnrichmentRecord {
        gene_set: set.to_string(),
        es,
        nes: es / 0.3,
        fdr: None,
    }
}

/// `requested` trials, of which trials `1..=extreme` score `extreme_es`
/// and the rest score `background_es`.
fn null_for(
    set: &str,
    requested: usize,
    completed: usize,
    extreme: usize,
    extreme_es: f64,
    background_es: f64,
) -> NullDistributionTable {
    let mut table = NullDistributionTable::new(requested);
    for trial in 1..=completed {
        let es = if trial <= extreme { extreme_es } else { background_es };
        table.merge(trial, &[record(set, es)]);
    }
    table
}

#[test]
fn positive_score_with_nine_more_extreme_trials() {
    let null = null_for("PATHWAY_X", 999, 999, 9, 2.5, 0.4);
    let estimate = estimate_fdr(&[record("PATHWAY_X", 2.1)], &null, 1000);
    let x = estimate.get("PATHWAY_X").unwrap();
    assert_eq!(x.null_count, 999);
    assert_almost_eq!(x.nominal_p, 0.01, THRESHOLD);
    assert_almost_eq!(x.fdr_q, 0.01, THRESHOLD);
}

#[test]
fn negative_score_beyond_every_trial() {
    let null = null_for("PATHWAY_Y", 500, 500, 0, 0.0, -0.7);
    let estimate = estimate_fdr(&[record("PATHWAY_Y", -1.8)], &null, 1000);
    assert_almost_eq!(
        estimate.get("PATHWAY_Y").unwrap().nominal_p,
        1.0 / 501.0,
        THRESHOLD
    );
}

#[test]
fn partial_failure_keeps_requested_denominator() {
    let null = null_for("PATHWAY_Z", 1000, 950, 49, 0.9, 0.1);
    assert_eq!(null.completed_trials().len(), 950);
    let estimate = estimate_fdr(&[record("PATHWAY_Z", 0.5)], &null, 1000);
    assert_eq!(estimate.pool_size, 1000);
    assert_almost_eq!(
        estimate.get("PATHWAY_Z").unwrap().nominal_p,
        50.0 / 1001.0,
        THRESHOLD
    );
}

#[test]
fn nominal_p_never_below_laplace_floor() {
    let null = null_for("A", 100, 100, 0, 0.0, 0.2);
    for es in [0.3, 1.0, 50.0] {
        let p = empirical_p(es, null.es_values("A"), null.requested_trials());
        assert_almost_eq!(p, 1.0 / 101.0, THRESHOLD);
    }
    let p = empirical_p(0.0, null.es_values("A"), 100);
    assert!(p > 0.0 && p <= 1.0);
}

#[test]
fn nominal_p_grows_with_extreme_count() {
    let mut previous = 0.0;
    for extreme in [0, 1, 5, 20, 100] {
        let null = null_for("A", 100, 100, extreme, 3.0, 0.0);
        let p = estimate_fdr(&[record("A", 1.0)], &null, 1000)
            .get("A")
            .unwrap()
            .nominal_p;
        assert!(p > previous, "{} not above {}", p, previous);
        previous = p;
    }
    assert_almost_eq!(previous, 1.0, THRESHOLD);
}

#[test]
fn bh_reapplication_never_decreases() {
    let p = vec![0.001, 0.2, 0.03, 0.5, 0.04, 0.9, 0.011];
    let once = adjust(&p, AdjustmentMethod::BH);
    let twice = adjust(&once, AdjustmentMethod::BH);
    for (a, b) in once.iter().zip(twice.iter()) {
        assert!(b + THRESHOLD >= *a);
    }
    for (q, p) in once.iter().zip(p.iter()) {
        assert!(q >= p);
    }
}

#[test]
fn merge_order_does_not_matter() {
    let trials: Vec<(usize, Vec<EnrichmentRecord>)> = (1..=6)
        .map(|t| {
            let mut records = vec![record("A", t as f64 * 0.1)];
            if t % 2 == 0 {
                records.push(record("B", -(t as f64)));
            }
            (t, records)
        })
        .collect();
    let mut forward = NullDistributionTable::new(6);
    for (t, records) in &trials {
        forward.merge(*t, records);
    }
    let mut backward = NullDistributionTable::new(6);
    for (t, records) in trials.iter().rev() {
        backward.merge(*t, records);
    }
    assert_eq!(forward, backward);
    assert_eq!(forward.entries("B").len(), 3);
}
