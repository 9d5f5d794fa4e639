use super::{run_external, TemplateVars};
use crate::data::{Contrast, CountMatrix, LabelAssignment};
use crate::methods::trials::TrialContext;
use crate::readers::read_de_table;
use crate::writers::write_class_file;
use crate::{Error, Result};
use log::debug;
use std::fs;
use std::path::PathBuf;

/// Per-gene result of a two-class differential expression fit.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneStatistic {
    pub gene: String,
    pub log_fc: f64,
    pub p_value: f64,
}

/// A differential expression model. Implementations must not mutate shared
/// state: one instance serves every trial concurrently.
pub trait DifferentialExpression: Sync {
    fn fit(
        &self,
        counts: &CountMatrix,
        labels: &LabelAssignment,
        contrast: &Contrast,
        ctx: &TrialContext,
    ) -> Result<Vec<GeneStatistic>>;
}

pub const DEFAULT_DE_ARGS: [&str; 6] = [
    "{counts}",
    "{classes}",
    "{positive}",
    "{negative}",
    "{output}",
    "{seed}",
];

/// Runs an external DE program (for example an edgeR exact-test script).
///
/// The program receives the shared counts file and a per-trial class file and
/// must write a tab-delimited table with `gene`, `logFC` and `PValue` columns
/// to `{output}`.
#[derive(Debug, Clone)]
pub struct CommandDifferentialExpression {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl CommandDifferentialExpression {
    pub fn new(program: PathBuf, args: Vec<String>) -> Self {
        let args = if args.is_empty() {
            DEFAULT_DE_ARGS.iter().map(|a| a.to_string()).collect()
        } else {
            args
        };
        CommandDifferentialExpression { program, args }
    }
}

impl DifferentialExpression for CommandDifferentialExpression {
    fn fit(
        &self,
        counts: &CountMatrix,
        labels: &LabelAssignment,
        contrast: &Contrast,
        ctx: &TrialContext,
    ) -> Result<Vec<GeneStatistic>> {
        let n_pos = labels.members(&contrast.positive).len();
        let n_neg = labels.members(&contrast.negative).len();
        if n_pos == 0 || n_neg == 0 {
            return Err(Error::FittingFailure(format!(
                "degenerate groups: {} '{}' vs {} '{}' samples",
                n_pos, contrast.positive, n_neg, contrast.negative
            )));
        }
        write_class_file(&ctx.classes_file(), &counts.samples, labels)?;
        let output = ctx.de_output();
        if output.exists() {
            fs::remove_file(&output)?;
        }
        let vars = TemplateVars::new()
            .with("counts", ctx.counts_file.display().to_string())
            .with("classes", ctx.classes_file().display().to_string())
            .with("positive", contrast.positive.clone())
            .with("negative", contrast.negative.clone())
            .with("output", output.display().to_string())
            .with("seed", ctx.seed.to_string());
        let args = vars.fill(&self.args);
        debug!("[{}] fitting DE model: {:?} {:?}", ctx.label, self.program, args);
        run_external(&self.program, &args).map_err(Error::FittingFailure)?;
        if !output.is_file() {
            return Err(Error::FittingFailure(format!(
                "{} produced no result table at {}",
                self.program.display(),
                output.display()
            )));
        }
        read_de_table(&output)
    }
}
