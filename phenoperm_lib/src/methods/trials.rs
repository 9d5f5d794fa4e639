use crate::data::{Contrast, CountMatrix, LabelAssignment};
use crate::methods::de::DifferentialExpression;
use crate::methods::gsea::{EnrichmentConfig, EnrichmentEngine, EnrichmentRecord, EnrichmentReport};
use crate::methods::rank::build_rank_list;
use crate::methods::shuffle::{shuffle_labels, trial_seed};
use crate::writers::write_rank_file;
use crate::{Error, Result, Stage};
use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::BTreeMap;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

/// Everything one pipeline run needs to know about where it lives. Each
/// trial owns its directory, so concurrent trials never share a path.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialContext {
    /// 0 for the observed run, 1..=N for trials
    pub index: usize,
    pub label: String,
    pub seed: u64,
    pub dir: PathBuf,
    pub counts_file: PathBuf,
    pub gene_sets: PathBuf,
}

impl TrialContext {
    pub fn observed(work_dir: &Path, seed: u64, counts_file: &Path, gene_sets: &Path) -> Self {
        TrialContext {
            index: 0,
            label: "observed".to_string(),
            seed,
            dir: work_dir.join("observed"),
            counts_file: counts_file.to_path_buf(),
            gene_sets: gene_sets.to_path_buf(),
        }
    }

    pub fn trial(
        work_dir: &Path,
        index: usize,
        seed: u64,
        counts_file: &Path,
        gene_sets: &Path,
    ) -> Self {
        let label = format!("trial_{:05}", index);
        TrialContext {
            index,
            seed: trial_seed(seed, index),
            dir: work_dir.join(&label),
            label,
            counts_file: counts_file.to_path_buf(),
            gene_sets: gene_sets.to_path_buf(),
        }
    }

    pub fn classes_file(&self) -> PathBuf {
        self.dir.join("classes.tsv")
    }

    pub fn de_output(&self) -> PathBuf {
        self.dir.join("de_results.tsv")
    }

    pub fn rank_file(&self) -> PathBuf {
        self.dir.join(format!("{}.rnk", self.label))
    }

    pub fn enrichment_dir(&self) -> PathBuf {
        self.dir.join("enrichment")
    }

    pub fn prepare(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        Ok(())
    }
}

/// Result of one randomized trial. Failures carry the stage and reason and
/// are excluded from the null distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TrialOutcome {
    Completed {
        index: usize,
        records: Vec<EnrichmentRecord>,
    },
    Failed {
        index: usize,
        stage: Stage,
        reason: String,
    },
}

impl TrialOutcome {
    pub fn index(&self) -> usize {
        match self {
            TrialOutcome::Completed { index, .. } | TrialOutcome::Failed { index, .. } => *index,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, TrialOutcome::Completed { .. })
    }
}

/// Count failed trials per stage.
pub fn excluded_by_stage(outcomes: &[TrialOutcome]) -> BTreeMap<Stage, usize> {
    let mut counts = BTreeMap::new();
    for outcome in outcomes {
        if let TrialOutcome::Failed { stage, .. } = outcome {
            *counts.entry(*stage).or_insert(0) += 1;
        }
    }
    counts
}

#[derive(Debug, Clone)]
pub struct TrialPlan {
    pub trials: usize,
    pub workers: usize,
    pub seed: u64,
    pub work_dir: PathBuf,
    /// Keep each trial's directory after it finishes
    pub keep_artifacts: bool,
}

impl Default for TrialPlan {
    fn default() -> Self {
        TrialPlan {
            trials: 1000,
            workers: default_workers(),
            seed: 1,
            work_dir: PathBuf::from("phenoperm_work"),
            keep_artifacts: false,
        }
    }
}

/// All cores but one, at least one.
pub fn default_workers() -> usize {
    num_cpus::get().saturating_sub(1).max(1)
}

/// The shared, read-only inputs of every pipeline run.
pub struct Pipeline<'a> {
    pub counts: &'a CountMatrix,
    pub contrast: &'a Contrast,
    pub counts_file: &'a Path,
    pub gene_sets: &'a Path,
    pub de: &'a dyn DifferentialExpression,
    pub engine: &'a dyn EnrichmentEngine,
    /// Separator of composite gene ids, e.g. `|` in `TP53|7157`
    pub delimiter: char,
}

impl<'a> Pipeline<'a> {
    /// Fit, rank and score one label assignment. The error names the stage
    /// that failed; panics inside a stage are caught and reported the same way.
    pub fn execute(
        &self,
        labels: &LabelAssignment,
        config: &EnrichmentConfig,
        ctx: &TrialContext,
    ) -> Result<EnrichmentReport> {
        let stats = in_stage(Stage::Fit, || {
            self.de.fit(self.counts, labels, self.contrast, ctx)
        })?;
        let rank_file = ctx.rank_file();
        in_stage(Stage::Rank, || {
            let ranked = build_rank_list(&stats, self.delimiter)?;
            write_rank_file(&rank_file, &ranked)
        })?;
        in_stage(Stage::Enrichment, || {
            self.engine.score(&rank_file, config, ctx)
        })
    }
}

fn in_stage<T, F>(stage: Stage, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    let result = match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(Error::Panicked(panic_message(payload))),
    };
    result.map_err(|e| match e {
        Error::AtStage { .. } => e,
        e => Error::AtStage {
            stage,
            source: Box::new(e),
        },
    })
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Run trials 1..=N on a dedicated pool of `plan.workers` threads and return
/// one outcome per trial, in index order. A failing trial never aborts the
/// others; only a pool that cannot be built is an error.
pub fn run_trials(
    pipeline: &Pipeline,
    observed: &LabelAssignment,
    config: &EnrichmentConfig,
    plan: &TrialPlan,
) -> Result<Vec<TrialOutcome>> {
    let workers = plan.workers.max(1);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("phenoperm-trial-{}", i))
        .build()?;
    info!(
        "Running {} permutation trials on {} workers",
        plan.trials, workers
    );
    let outcomes: Vec<TrialOutcome> = pool.install(|| {
        (1..=plan.trials)
            .into_par_iter()
            .map(|index| run_trial(pipeline, observed, config, plan, index))
            .collect()
    });
    let completed = outcomes.iter().filter(|o| o.is_completed()).count();
    info!(
        "{} of {} trials completed, {} excluded",
        completed,
        plan.trials,
        plan.trials - completed
    );
    Ok(outcomes)
}

fn run_trial(
    pipeline: &Pipeline,
    observed: &LabelAssignment,
    config: &EnrichmentConfig,
    plan: &TrialPlan,
    index: usize,
) -> TrialOutcome {
    let ctx = TrialContext::trial(
        &plan.work_dir,
        index,
        plan.seed,
        pipeline.counts_file,
        pipeline.gene_sets,
    );
    let result = in_stage(Stage::Shuffle, || {
        ctx.prepare()?;
        shuffle_labels(observed, ctx.seed)
    })
    .and_then(|labels| pipeline.execute(&labels, config, &ctx));

    if !plan.keep_artifacts {
        if let Err(e) = fs::remove_dir_all(&ctx.dir) {
            debug!("[{}] could not remove {}: {}", ctx.label, ctx.dir.display(), e);
        }
    }

    match result {
        Ok(report) => {
            debug!("[{}] scored {} gene sets", ctx.label, report.records.len());
            TrialOutcome::Completed {
                index,
                records: report.records,
            }
        }
        Err(e) => {
            let stage = e.stage();
            let reason = match e {
                Error::AtStage { source, .. } => source.to_string(),
                e => e.to_string(),
            };
            warn!("[{}] excluded at {} stage: {}", ctx.label, stage, reason);
            TrialOutcome::Failed {
                index,
                stage,
                reason,
            }
        }
    }
}
