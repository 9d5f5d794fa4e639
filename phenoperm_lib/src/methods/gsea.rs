use super::{run_external, TemplateVars};
use crate::methods::trials::TrialContext;
use crate::readers::read_report_table;
use crate::readers::utils::{parse_number, ReportTable};
use crate::{Error, MalformedError, Result};
use ahash::AHashSet;
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScoringScheme {
    Classic,
    Weighted,
    WeightedP2,
    WeightedP1_5,
}

impl ScoringScheme {
    pub fn as_arg(&self) -> &'static str {
        match self {
            ScoringScheme::Classic => "classic",
            ScoringScheme::Weighted => "weighted",
            ScoringScheme::WeightedP2 => "weighted_p2",
            ScoringScheme::WeightedP1_5 => "weighted_p1.5",
        }
    }
}

impl FromStr for ScoringScheme {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "classic" => Ok(ScoringScheme::Classic),
            "weighted" => Ok(ScoringScheme::Weighted),
            "weighted_p2" => Ok(ScoringScheme::WeightedP2),
            "weighted_p1.5" => Ok(ScoringScheme::WeightedP1_5),
            _ => Err(format!(
                "unknown scoring scheme '{}' (classic, weighted, weighted_p2, weighted_p1.5)",
                s
            )),
        }
    }
}

/// Settings shared by the observed run and every trial. Only `permutations`
/// differs between the two; the random seed comes from the [`TrialContext`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    /// Smallest gene set (after intersecting with the rank list) to score
    pub min_size: usize,
    /// Largest gene set to score
    pub max_size: usize,
    /// Internal gene set permutations the engine runs for its own NES/FDR
    pub permutations: usize,
    pub scoring_scheme: ScoringScheme,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        EnrichmentConfig {
            min_size: 15,
            max_size: 500,
            permutations: 1000,
            scoring_scheme: ScoringScheme::Weighted,
        }
    }
}

impl EnrichmentConfig {
    pub fn with_permutations(&self, permutations: usize) -> Self {
        EnrichmentConfig {
            permutations,
            ..self.clone()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.permutations == 0 {
            return Err(Error::InvalidInput(
                "the enrichment engine needs at least 1 internal permutation to report NES"
                    .to_string(),
            ));
        }
        if self.min_size > self.max_size {
            return Err(Error::InvalidInput(format!(
                "gene set size bounds are inverted ({} > {})",
                self.min_size, self.max_size
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentRecord {
    pub gene_set: String,
    pub es: f64,
    pub nes: f64,
    /// FDR q-value reported by the engine itself, if any
    pub fdr: Option<f64>,
}

impl EnrichmentRecord {
    /// Engine FDR with an exact 0 replaced by `1 / (1 + permutations)`.
    pub fn floored_fdr(&self, permutations: usize) -> Option<f64> {
        self.fdr.map(|fdr| {
            if fdr == 0.0 {
                1.0 / (1.0 + permutations as f64)
            } else {
                fdr
            }
        })
    }
}

/// Engine output: the raw table plus the parsed records, row for row.
#[derive(Debug, Clone, Default)]
pub struct EnrichmentReport {
    pub table: ReportTable,
    pub records: Vec<EnrichmentRecord>,
    pub fdr_column: usize,
}

const NAME_COLUMNS: [&str; 2] = ["NAME", "pathway"];
const ES_COLUMNS: [&str; 1] = ["ES"];
const NES_COLUMNS: [&str; 1] = ["NES"];
const FDR_COLUMNS: [&str; 4] = ["FDR q-val", "FDR.q.val", "FDR", "padj"];

impl EnrichmentReport {
    pub fn from_table(table: ReportTable, path: &Path) -> Result<Self> {
        let name = table.find_column(&NAME_COLUMNS, path)?;
        let es = table.find_column(&ES_COLUMNS, path)?;
        let nes = table.find_column(&NES_COLUMNS, path)?;
        let fdr_column = table.find_column(&FDR_COLUMNS, path)?;
        let mut records = Vec::with_capacity(table.rows.len());
        let mut seen = AHashSet::new();
        for row in 0..table.rows.len() {
            let gene_set = table.cell(row, name);
            if !seen.insert(gene_set) {
                return Err(MalformedError::WrongFormat(format!(
                    "gene set '{}' is reported more than once in {}",
                    gene_set,
                    path.display()
                ))
                .into());
            }
            let fdr_cell = table.cell(row, fdr_column).trim();
            let fdr = if fdr_cell.is_empty() || fdr_cell == "---" {
                None
            } else {
                Some(parse_number(fdr_cell, &table.headers[fdr_column], path)?)
            };
            records.push(EnrichmentRecord {
                gene_set: gene_set.to_string(),
                es: parse_number(table.cell(row, es), &table.headers[es], path)?,
                nes: parse_number(table.cell(row, nes), &table.headers[nes], path)?,
                fdr,
            });
        }
        drop(seen);
        Ok(EnrichmentReport {
            table,
            records,
            fdr_column,
        })
    }
}

/// An enrichment scorer: ranked list in, ES/NES per gene set out.
pub trait EnrichmentEngine: Sync {
    fn score(
        &self,
        rank_file: &Path,
        config: &EnrichmentConfig,
        ctx: &TrialContext,
    ) -> Result<EnrichmentReport>;
}

/// GSEA preranked through its command line launcher. Reports are discovered
/// under the context's enrichment directory after the process exits.
#[derive(Debug, Clone)]
pub struct GseaCommand {
    pub program: PathBuf,
    /// Arguments placed before the generated ones, e.g. the tool name
    pub prefix_args: Vec<String>,
    /// Arguments appended verbatim; `{name}` placeholders are filled
    pub extra_args: Vec<String>,
}

impl GseaCommand {
    pub fn new(program: PathBuf) -> Self {
        GseaCommand {
            program,
            prefix_args: vec!["GSEAPreranked".to_string()],
            extra_args: Vec::new(),
        }
    }

    pub fn arguments(
        &self,
        rank_file: &Path,
        config: &EnrichmentConfig,
        ctx: &TrialContext,
    ) -> Vec<String> {
        let mut args = self.prefix_args.clone();
        let generated = [
            ("-gmx", ctx.gene_sets.display().to_string()),
            ("-rnk", rank_file.display().to_string()),
            ("-nperm", config.permutations.to_string()),
            ("-set_min", config.min_size.to_string()),
            ("-set_max", config.max_size.to_string()),
            ("-scoring_scheme", config.scoring_scheme.as_arg().to_string()),
            ("-rnd_seed", ctx.seed.to_string()),
            ("-out", ctx.enrichment_dir().display().to_string()),
            ("-rpt_label", ctx.label.clone()),
            ("-create_svgs", "false".to_string()),
            ("-plot_top_x", "0".to_string()),
            ("-zip_report", "false".to_string()),
        ];
        for (flag, value) in generated {
            args.push(flag.to_string());
            args.push(value);
        }
        let vars = TemplateVars::new()
            .with("label", ctx.label.clone())
            .with("out", ctx.enrichment_dir().display().to_string());
        args.extend(vars.fill(&self.extra_args));
        args
    }
}

impl EnrichmentEngine for GseaCommand {
    fn score(
        &self,
        rank_file: &Path,
        config: &EnrichmentConfig,
        ctx: &TrialContext,
    ) -> Result<EnrichmentReport> {
        // GSEA adds a timestamped folder per run; only this run's may be read
        let out_dir = ctx.enrichment_dir();
        if out_dir.exists() {
            fs::remove_dir_all(&out_dir)?;
        }
        fs::create_dir_all(&out_dir)?;
        let args = self.arguments(rank_file, config, ctx);
        debug!("[{}] running enrichment: {:?} {:?}", ctx.label, self.program, args);
        run_external(&self.program, &args).map_err(Error::EnrichmentTool)?;

        let mut reports = Vec::new();
        find_reports(&out_dir, &mut reports)?;
        if reports.is_empty() {
            return Err(Error::EnrichmentTool(format!(
                "no gsea_report_for_* table under {}",
                out_dir.display()
            )));
        }
        reports.sort();
        let mut table = ReportTable::default();
        for path in &reports {
            table.extend(read_report_table(path)?, path)?;
        }
        EnrichmentReport::from_table(table, &reports[0])
    }
}

fn find_reports(dir: &Path, found: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            find_reports(&path, found)?;
        } else if is_report(&path) {
            found.push(path);
        }
    }
    Ok(())
}

fn is_report(path: &Path) -> bool {
    let name = match path.file_name().and_then(|n| n.to_str()) {
        Some(n) => n,
        None => return false,
    };
    name.starts_with("gsea_report_for_") && (name.ends_with(".tsv") || name.ends_with(".xls"))
}
