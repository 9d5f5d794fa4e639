use crate::data::{Contrast, CountMatrix, LabelAssignment};
use crate::methods::de::DifferentialExpression;
use crate::methods::fdr::{estimate_fdr, FdrEstimate};
use crate::methods::gsea::{EnrichmentConfig, EnrichmentEngine, EnrichmentReport, ScoringScheme};
use crate::methods::null_distribution::NullDistributionTable;
use crate::methods::saturation::{default_prefixes, saturation_curve, SaturationPoint};
use crate::methods::trials::{excluded_by_stage, run_trials, Pipeline, TrialContext, TrialPlan};
use crate::readers::read_gmt_file;
use crate::writers::{
    save_null_distribution, save_summary, write_counts_file, write_fdr_comparison,
    write_fdr_report, write_report_table, write_saturation,
};
use crate::{Error, Result, Stage};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    pub min_size: usize,
    pub max_size: usize,
    pub scoring_scheme: ScoringScheme,
    /// Internal engine permutations for the observed run
    pub real_permutations: usize,
    /// Internal engine permutations for each randomized trial
    pub trial_permutations: usize,
    pub plan: TrialPlan,
    pub alpha: f64,
    pub saturation_step: usize,
    pub delimiter: char,
    pub min_cpm: f64,
    /// Low-count filter is off when 0
    pub min_samples: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        AnalysisConfig {
            min_size: 15,
            max_size: 500,
            scoring_scheme: ScoringScheme::Weighted,
            real_permutations: 1000,
            trial_permutations: 1,
            plan: TrialPlan::default(),
            alpha: 0.05,
            saturation_step: 100,
            delimiter: '|',
            min_cpm: 1.0,
            min_samples: 0,
        }
    }
}

impl AnalysisConfig {
    fn enrichment_config(&self, permutations: usize) -> EnrichmentConfig {
        EnrichmentConfig {
            min_size: self.min_size,
            max_size: self.max_size,
            permutations,
            scoring_scheme: self.scoring_scheme,
        }
    }

    pub fn real_config(&self) -> EnrichmentConfig {
        self.enrichment_config(self.real_permutations)
    }

    pub fn trial_config(&self) -> EnrichmentConfig {
        self.enrichment_config(self.trial_permutations)
    }

    pub fn validate(&self) -> Result<()> {
        self.real_config().validate()?;
        self.trial_config().validate()?;
        if self.plan.trials == 0 {
            return Err(Error::InvalidInput(
                "at least one permutation trial is required".to_string(),
            ));
        }
        if !(self.alpha > 0.0 && self.alpha <= 1.0) {
            return Err(Error::InvalidInput(format!(
                "alpha must be in (0, 1], got {}",
                self.alpha
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub requested_trials: usize,
    pub completed_trials: usize,
    pub excluded_trials: usize,
    pub excluded_by_stage: BTreeMap<Stage, usize>,
    pub scored_gene_sets: usize,
    pub unscored_gene_sets: usize,
    pub alpha: f64,
    pub significant: usize,
    pub elapsed_seconds: f64,
}

#[derive(Debug, Clone)]
pub struct AnalysisReport {
    pub observed: EnrichmentReport,
    pub null: NullDistributionTable,
    pub estimate: FdrEstimate,
    pub saturation: Vec<SaturationPoint>,
    pub summary: RunSummary,
}

/// Observed run, permutation trials, null aggregation, FDR and saturation.
///
/// Anything that goes wrong before the trials start, including the observed
/// run itself, is returned as an error. Trial failures only shrink the null.
pub fn run_analysis(
    counts: &CountMatrix,
    labels: &LabelAssignment,
    contrast: &Contrast,
    gene_sets: &Path,
    de: &dyn DifferentialExpression,
    engine: &dyn EnrichmentEngine,
    config: &AnalysisConfig,
) -> Result<AnalysisReport> {
    let start = Instant::now();
    config.validate()?;
    if labels.labels.len() != counts.n_samples() {
        return Err(Error::InvalidInput(format!(
            "{} labels for {} samples",
            labels.labels.len(),
            counts.n_samples()
        )));
    }
    contrast.validate(labels)?;
    let gmt = read_gmt_file(gene_sets)?;
    if gmt.is_empty() {
        return Err(Error::InvalidInput(format!(
            "no gene sets in {}",
            gene_sets.display()
        )));
    }
    info!("Loaded {} gene sets", gmt.len());

    let counts = counts.filter_low_counts(config.min_cpm, config.min_samples);
    if counts.n_genes() == 0 {
        return Err(Error::InvalidInput(
            "no genes left after the low-count filter".to_string(),
        ));
    }
    let work_dir = &config.plan.work_dir;
    fs::create_dir_all(work_dir)?;
    let counts_file = work_dir.join("counts.tsv");
    write_counts_file(&counts_file, &counts)?;

    let pipeline = Pipeline {
        counts: &counts,
        contrast,
        counts_file: &counts_file,
        gene_sets,
        de,
        engine,
        delimiter: config.delimiter,
    };
    info!("Scoring the observed labels");
    let ctx = TrialContext::observed(work_dir, config.plan.seed, &counts_file, gene_sets);
    ctx.prepare()?;
    let observed = pipeline.execute(labels, &config.real_config(), &ctx)?;
    if observed.records.is_empty() {
        return Err(Error::AtStage {
            stage: Stage::Enrichment,
            source: Box::new(Error::EnrichmentTool(
                "the observed run scored no gene sets".to_string(),
            )),
        });
    }
    info!("Observed run scored {} gene sets", observed.records.len());

    let outcomes = run_trials(&pipeline, labels, &config.trial_config(), &config.plan)?;
    let null = NullDistributionTable::from_outcomes(config.plan.trials, &outcomes);
    let completed = null.completed_trials().len();
    if completed == 0 {
        return Err(Error::NoCompletedTrials {
            requested: config.plan.trials,
        });
    }
    if null.is_empty() {
        warn!("{} completed trials scored no gene sets", completed);
    } else {
        info!(
            "Null distribution covers {} gene sets from {} of {} trials",
            null.len(),
            completed,
            config.plan.trials
        );
    }

    let estimate = estimate_fdr(&observed.records, &null, config.real_permutations);
    let prefixes = default_prefixes(config.plan.trials, config.saturation_step);
    let saturation = saturation_curve(
        &observed.records,
        &null,
        &prefixes,
        config.alpha,
        config.real_permutations,
    );
    let significant = estimate.significant(config.alpha);
    info!(
        "{} of {} gene sets have empirical FDR < {}",
        significant,
        estimate.results.len(),
        config.alpha
    );

    let summary = RunSummary {
        requested_trials: config.plan.trials,
        completed_trials: completed,
        excluded_trials: config.plan.trials - completed,
        excluded_by_stage: excluded_by_stage(&outcomes),
        scored_gene_sets: estimate.results.len(),
        unscored_gene_sets: estimate.unscored.len(),
        alpha: config.alpha,
        significant,
        elapsed_seconds: start.elapsed().as_secs_f64(),
    };
    Ok(AnalysisReport {
        observed,
        null,
        estimate,
        saturation,
        summary,
    })
}

/// Output files written by [`save_report`], relative to the output directory.
pub const OBSERVED_REPORT: &str = "observed_report.tsv";
pub const FDR_REPORT: &str = "fdr_report.tsv";
pub const FDR_COMPARISON: &str = "fdr_comparison.tsv";
pub const SATURATION: &str = "saturation.tsv";
pub const SUMMARY: &str = "summary.json";
pub const NULL_DISTRIBUTION: &str = "null_distribution.bin";

pub fn save_report(report: &AnalysisReport, out_dir: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(out_dir)?;
    let paths: Vec<PathBuf> = [
        OBSERVED_REPORT,
        FDR_REPORT,
        FDR_COMPARISON,
        SATURATION,
        SUMMARY,
        NULL_DISTRIBUTION,
    ]
    .iter()
    .map(|name| out_dir.join(name))
    .collect();
    write_report_table(&paths[0], &report.observed.table)?;
    write_fdr_report(&paths[1], &report.observed, &report.estimate)?;
    write_fdr_comparison(&paths[2], &report.estimate)?;
    write_saturation(&paths[3], &report.saturation)?;
    save_summary(&paths[4], &report.summary)?;
    save_null_distribution(&paths[5], &report.null)?;
    Ok(paths)
}
