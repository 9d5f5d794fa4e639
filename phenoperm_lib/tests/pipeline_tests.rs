use ndarray::Array2;
use phenoperm_lib::data::{Contrast, CountMatrix, LabelAssignment};
use phenoperm_lib::methods::analysis::{run_analysis, save_report, AnalysisConfig};
use phenoperm_lib::methods::de::{DifferentialExpression, GeneStatistic};
use phenoperm_lib::methods::gsea::{EnrichmentConfig, EnrichmentEngine, EnrichmentReport};
use phenoperm_lib::methods::rank::build_rank_list;
use phenoperm_lib::methods::trials::{TrialContext, TrialPlan};
use phenoperm_lib::readers::utils::ReportTable;
use phenoperm_lib::readers::{load_null_distribution, read_rank_file, read_report_table};
use phenoperm_lib::writers::write_rank_file;
use phenoperm_lib::{Error, Result, Stage};
use pretty_assertions::assert_eq;
use statrs::assert_almost_eq;
use std::fs;
use std::path::Path;

const THRESHOLD: f64 = 1e-12;

/// Difference of class means as logFC.
struct MeanDifference;

impl DifferentialExpression for MeanDifference {
    fn fit(
        &self,
        counts: &CountMatrix,
        labels: &LabelAssignment,
        contrast: &Contrast,
        _ctx: &TrialContext,
    ) -> Result<Vec<GeneStatistic>> {
        let pos = labels.members(&contrast.positive);
        let neg = labels.members(&contrast.negative);
        let mut stats = Vec::new();
        for (g, gene) in counts.genes.iter().enumerate() {
            let pos_mean: f64 =
                pos.iter().map(|&c| counts.counts[[g, c]] as f64).sum::<f64>() / pos.len() as f64;
            let neg_mean: f64 =
                neg.iter().map(|&c| counts.counts[[g, c]] as f64).sum::<f64>() / neg.len() as f64;
            let diff = pos_mean - neg_mean;
            stats.push(GeneStatistic {
                gene: format!("{}|{}", gene, g),
                log_fc: diff,
                p_value: 1.0 / (1.0 + diff.abs()),
            });
        }
        Ok(stats)
    }
}

/// Two gene sets scored from the ends of the rank list. Fails on every
/// `fail_every`-th trial; the observed run (index 0) fails only if asked.
struct EndsEngine {
    fail_every: usize,
    fail_observed: bool,
}

impl EnrichmentEngine for EndsEngine {
    fn score(
        &self,
        rank_file: &Path,
        config: &EnrichmentConfig,
        ctx: &TrialContext,
    ) -> Result<EnrichmentReport> {
        let fails = if ctx.index == 0 {
            self.fail_observed
        } else {
            self.fail_every > 0 && ctx.index % self.fail_every == 0
        };
        if fails {
            return Err(Error::EnrichmentTool(format!("{} crashed", ctx.label)));
        }
        let ranked = read_rank_file(rank_file)?;
        let n = ranked.len();
        let up = (ranked[0].rank + ranked[1].rank) / 2.0;
        let down = (ranked[n - 1].rank + ranked[n - 2].rank) / 2.0;
        let row = |name: &str, es: f64| {
            vec![
                name.to_string(),
                es.to_string(),
                (es * 1.5).to_string(),
                if config.permutations > 1 { "0.0" } else { "---" }.to_string(),
                String::new(),
            ]
        };
        let table = ReportTable {
            headers: ["NAME", "ES", "NES", "FDR q-val", ""]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            rows: vec![row("UP_SET", up), row("DOWN_SET", down)],
        };
        EnrichmentReport::from_table(table, rank_file)
    }
}

fn counts() -> CountMatrix {
    let values: Vec<u64> = (0..6 * 8)
        .map(|i| {
            let (gene, sample) = (i / 8, i % 8);
            let boost = if sample < 4 { 3 * gene as u64 } else { 0 };
            10 + boost + ((gene * 7 + sample * 3) % 5) as u64
        })
        .collect();
    CountMatrix::new(
        Array2::from_shape_vec((6, 8), values).unwrap(),
        (1..=6).map(|g| format!("G{}", g)).collect(),
        (1..=8).map(|s| format!("s{}", s)).collect(),
    )
    .unwrap()
}

fn labels() -> LabelAssignment {
    LabelAssignment::new(
        ["t", "t", "t", "t", "n", "n", "n", "n"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
    )
    .unwrap()
}

fn contrast() -> Contrast {
    Contrast {
        positive: "t".to_string(),
        negative: "n".to_string(),
    }
}

fn config(work_dir: &Path, trials: usize) -> AnalysisConfig {
    AnalysisConfig {
        real_permutations: 1000,
        trial_permutations: 1,
        plan: TrialPlan {
            trials,
            workers: 3,
            seed: 11,
            work_dir: work_dir.to_path_buf(),
            keep_artifacts: false,
        },
        saturation_step: 5,
        ..Default::default()
    }
}

fn gmt(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("sets.gmt");
    fs::write(&path, "UP_SET\tna\tG1\tG2\nDOWN_SET\tna\tG5\tG6\n").unwrap();
    path
}

#[test]
fn rank_list_survives_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let stats = vec![
        GeneStatistic {
            gene: "TP53|7157".to_string(),
            log_fc: 1.2,
            p_value: 3.3e-7,
        },
        GeneStatistic {
            gene: "MYC|4609".to_string(),
            log_fc: -0.4,
            p_value: 0.0,
        },
        GeneStatistic {
            gene: "GAPDH|2597".to_string(),
            log_fc: 0.01,
            p_value: 0.987654321,
        },
    ];
    let ranked = build_rank_list(&stats, '|').unwrap();
    let path = dir.path().join("observed.rnk");
    write_rank_file(&path, &ranked).unwrap();
    assert_eq!(read_rank_file(&path).unwrap(), ranked);
}

#[test]
fn analysis_excludes_failed_trials() {
    let dir = tempfile::tempdir().unwrap();
    let gene_sets = gmt(dir.path());
    let engine = EndsEngine {
        fail_every: 5,
        fail_observed: false,
    };
    let config = config(&dir.path().join("work"), 20);
    let report = run_analysis(
        &counts(),
        &labels(),
        &contrast(),
        &gene_sets,
        &MeanDifference,
        &engine,
        &config,
    )
    .unwrap();

    assert_eq!(report.summary.requested_trials, 20);
    assert_eq!(report.summary.completed_trials, 16);
    assert_eq!(report.summary.excluded_trials, 4);
    assert_eq!(report.summary.excluded_by_stage.get(&Stage::Enrichment), Some(&4));
    assert_eq!(report.estimate.pool_size, 20);
    assert_eq!(report.null.len(), 2);
    assert_eq!(report.null.gene_sets().collect::<Vec<_>>(), vec!["DOWN_SET", "UP_SET"]);
    assert_eq!(report.estimate.results.len(), 2);
    for result in &report.estimate.results {
        assert_eq!(result.null_count, 16);
        assert!(result.nominal_p >= 1.0 / 21.0 - THRESHOLD);
        assert_almost_eq!(result.engine_fdr.unwrap(), 1.0 / 1001.0, THRESHOLD);
    }

    let prefixes: Vec<usize> = report.saturation.iter().map(|p| p.trials).collect();
    assert_eq!(prefixes, vec![5, 10, 15, 20]);
    assert_eq!(
        report.saturation[3].significant,
        report.estimate.significant(config.alpha)
    );

    let out = dir.path().join("out");
    let written = save_report(&report, &out).unwrap();
    assert!(written.iter().all(|p| p.is_file()));
    assert_eq!(load_null_distribution(&out.join("null_distribution.bin")).unwrap(), report.null);
    let fdr_report = read_report_table(&out.join("fdr_report.tsv")).unwrap();
    assert_eq!(fdr_report.headers, report.observed.table.headers);
    assert_eq!(fdr_report.rows.len(), 2);
    assert!(!dir.path().join("work").join("trial_00001").exists());
}

#[test]
fn observed_failure_is_fatal_and_staged() {
    let dir = tempfile::tempdir().unwrap();
    let gene_sets = gmt(dir.path());
    let engine = EndsEngine {
        fail_every: 0,
        fail_observed: true,
    };
    let err = run_analysis(
        &counts(),
        &labels(),
        &contrast(),
        &gene_sets,
        &MeanDifference,
        &engine,
        &config(&dir.path().join("work"), 4),
    )
    .unwrap_err();
    assert_eq!(err.stage(), Stage::Enrichment);
}

#[test]
fn every_trial_failing_is_total_failure() {
    let dir = tempfile::tempdir().unwrap();
    let gene_sets = gmt(dir.path());
    let engine = EndsEngine {
        fail_every: 1,
        fail_observed: false,
    };
    let err = run_analysis(
        &counts(),
        &labels(),
        &contrast(),
        &gene_sets,
        &MeanDifference,
        &engine,
        &config(&dir.path().join("work"), 4),
    )
    .unwrap_err();
    assert!(matches!(err, Error::NoCompletedTrials { requested: 4 }));
    assert_eq!(err.stage(), Stage::Aggregation);
}

#[test]
fn single_class_labels_are_rejected_up_front() {
    let dir = tempfile::tempdir().unwrap();
    let gene_sets = gmt(dir.path());
    let one_class = LabelAssignment::new(vec!["t".to_string(); 8]).unwrap();
    let engine = EndsEngine {
        fail_every: 0,
        fail_observed: false,
    };
    let err = run_analysis(
        &counts(),
        &one_class,
        &contrast(),
        &gene_sets,
        &MeanDifference,
        &engine,
        &config(&dir.path().join("work"), 4),
    )
    .unwrap_err();
    assert_eq!(err.stage(), Stage::Input);
}
