use clap::{Args, Parser, Subcommand};
use log::{info, LevelFilter};
use owo_colors::{
    OwoColorize,
    Stream::{Stderr, Stdout},
};
use phenoperm_lib::data::Contrast;
use phenoperm_lib::methods::analysis::{run_analysis, save_report, AnalysisConfig, RunSummary};
use phenoperm_lib::methods::de::CommandDifferentialExpression;
use phenoperm_lib::methods::gsea::{EnrichmentReport, GseaCommand, ScoringScheme};
use phenoperm_lib::methods::saturation::{
    default_prefixes, is_stable, saturation_curve, SaturationPoint,
};
use phenoperm_lib::methods::trials::{default_workers, TrialPlan};
use phenoperm_lib::readers::{
    load_null_distribution, read_class_file, read_counts_file, read_report_table,
};
use phenoperm_lib::writers::write_saturation;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

/// phenoperm CLI.
/// Empirical gene set enrichment FDR from phenotype-permutation null distributions.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Debug logging, including every external command line
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Score the observed labels, run permutation trials and estimate FDR
    Run(RunArgs),
    /// Recompute the saturation curve from a saved null distribution
    Saturation(SaturationArgs),
}

#[derive(Args, Debug)]
struct StabilityArgs {
    /// Number of trailing saturation points checked for stability
    #[arg(long, default_value_t = 3)]
    stability_window: usize,

    /// Largest variance of the trailing significant counts still called stable
    #[arg(long, default_value_t = 1.0)]
    stability_tolerance: f64,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Gene x sample count table (TSV, header row of sample ids)
    #[arg(long)]
    counts: PathBuf,

    /// Sample to class definitions (TSV: sample, class)
    #[arg(long)]
    classes: PathBuf,

    /// Gene set definitions in GMT format
    #[arg(long)]
    gmt: PathBuf,

    /// Class used as the numerator of the fold change
    #[arg(long)]
    positive: String,

    /// Class used as the denominator of the fold change
    #[arg(long)]
    negative: String,

    /// Differential expression program
    #[arg(long)]
    de_command: PathBuf,

    /// Argument template for the DE program, repeatable. Placeholders:
    /// {counts} {classes} {positive} {negative} {output} {seed}
    #[arg(long = "de-arg", allow_hyphen_values = true)]
    de_args: Vec<String>,

    /// GSEA command line launcher
    #[arg(long)]
    gsea_command: PathBuf,

    /// Tool name passed before the generated GSEA arguments; empty for none
    #[arg(long, default_value = "GSEAPreranked")]
    gsea_tool: String,

    /// Extra GSEA argument, repeatable. Placeholders: {label} {out}
    #[arg(long = "gsea-arg", allow_hyphen_values = true)]
    gsea_args: Vec<String>,

    /// Output directory
    #[arg(short, long, default_value = "phenoperm_out")]
    out: PathBuf,

    /// Directory for per-trial artifacts [default: <out>/work]
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Keep per-trial artifacts after each trial finishes
    #[arg(long)]
    keep_artifacts: bool,

    #[arg(long, default_value_t = 1000)]
    trials: usize,

    /// Internal GSEA permutations for the observed run
    #[arg(long, default_value_t = 1000)]
    real_permutations: usize,

    /// Internal GSEA permutations for each trial
    #[arg(long, default_value_t = 1)]
    trial_permutations: usize,

    #[arg(long, default_value_t = 15)]
    min_size: usize,

    #[arg(long, default_value_t = 500)]
    max_size: usize,

    /// classic, weighted, weighted_p2 or weighted_p1.5
    #[arg(long, default_value = "weighted")]
    scoring_scheme: ScoringScheme,

    /// Concurrent trials [default: number of cores - 1]
    #[arg(short, long)]
    workers: Option<usize>,

    #[arg(long, default_value_t = 1)]
    seed: u64,

    /// Empirical FDR threshold for calling a gene set significant
    #[arg(long, default_value_t = 0.05)]
    alpha: f64,

    /// Spacing of saturation prefixes
    #[arg(long, default_value_t = 100)]
    step: usize,

    /// Separator of composite gene ids; only the first segment is ranked
    #[arg(long, default_value_t = '|')]
    delimiter: char,

    /// Minimum counts-per-million for the low-count filter
    #[arg(long, default_value_t = 1.0)]
    min_cpm: f64,

    /// Samples that must pass --min-cpm; 0 disables the filter
    #[arg(long, default_value_t = 0)]
    min_samples: usize,

    /// Print the run summary as JSON instead of text
    #[arg(long)]
    json: bool,

    #[command(flatten)]
    stability: StabilityArgs,
}

#[derive(Args, Debug)]
struct SaturationArgs {
    /// null_distribution.bin written by `phenoperm run`
    #[arg(long)]
    null: PathBuf,

    /// observed_report.tsv written by `phenoperm run`
    #[arg(long)]
    observed: PathBuf,

    #[arg(long, default_value_t = 100)]
    step: usize,

    #[arg(long, default_value_t = 0.05)]
    alpha: f64,

    #[arg(long, default_value_t = 1000)]
    real_permutations: usize,

    #[arg(short, long, default_value = "saturation.tsv")]
    out: PathBuf,

    #[command(flatten)]
    stability: StabilityArgs,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let log_level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    let start = Instant::now();
    let result = match cli.command {
        Commands::Run(args) => run(args),
        Commands::Saturation(args) => saturation(args),
    };
    match result {
        Ok(()) => {
            info!("Finished in {:?}", start.elapsed());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!(
                "{} [{}] {}",
                "error:".if_supports_color(Stderr, |t| t.red()),
                e.stage(),
                e
            );
            ExitCode::FAILURE
        }
    }
}

fn run(args: RunArgs) -> phenoperm_lib::Result<()> {
    let counts = read_counts_file(&args.counts)?;
    let labels = read_class_file(&args.classes)?.align(&counts)?;
    let contrast = Contrast {
        positive: args.positive,
        negative: args.negative,
    };
    let de = CommandDifferentialExpression::new(args.de_command, args.de_args);
    let mut engine = GseaCommand::new(args.gsea_command);
    engine.prefix_args = if args.gsea_tool.is_empty() {
        Vec::new()
    } else {
        vec![args.gsea_tool]
    };
    engine.extra_args = args.gsea_args;

    let config = AnalysisConfig {
        min_size: args.min_size,
        max_size: args.max_size,
        scoring_scheme: args.scoring_scheme,
        real_permutations: args.real_permutations,
        trial_permutations: args.trial_permutations,
        plan: TrialPlan {
            trials: args.trials,
            workers: args.workers.unwrap_or_else(default_workers),
            seed: args.seed,
            work_dir: args.work_dir.unwrap_or_else(|| args.out.join("work")),
            keep_artifacts: args.keep_artifacts,
        },
        alpha: args.alpha,
        saturation_step: args.step,
        delimiter: args.delimiter,
        min_cpm: args.min_cpm,
        min_samples: args.min_samples,
    };
    let report = run_analysis(&counts, &labels, &contrast, &args.gmt, &de, &engine, &config)?;
    let written = save_report(&report, &args.out)?;
    for path in &written {
        info!("Wrote {}", path.display());
    }

    if args.json {
        let json = serde_json::to_string_pretty(&report.summary).map_err(std::io::Error::from)?;
        println!("{}", json);
    } else {
        print_summary(&report.summary);
        print_saturation(&report.saturation, &args.stability);
    }
    Ok(())
}

fn saturation(args: SaturationArgs) -> phenoperm_lib::Result<()> {
    let null = load_null_distribution(&args.null)?;
    let observed = EnrichmentReport::from_table(read_report_table(&args.observed)?, &args.observed)?;
    let prefixes = default_prefixes(null.requested_trials(), args.step);
    let curve = saturation_curve(
        &observed.records,
        &null,
        &prefixes,
        args.alpha,
        args.real_permutations,
    );
    write_saturation(&args.out, &curve)?;
    info!("Wrote {}", args.out.display());
    print_saturation(&curve, &args.stability);
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!(
        "{}",
        "Permutation trials".if_supports_color(Stdout, |t| t.bold())
    );
    println!("  requested  {}", summary.requested_trials);
    println!(
        "  completed  {}",
        summary
            .completed_trials
            .if_supports_color(Stdout, |t| t.green())
    );
    if summary.excluded_trials > 0 {
        println!(
            "  excluded   {}",
            summary
                .excluded_trials
                .if_supports_color(Stdout, |t| t.yellow())
        );
        for (stage, count) in &summary.excluded_by_stage {
            println!("    {:<11}{}", stage.to_string(), count);
        }
    }
    println!(
        "{} {} of {} gene sets (empirical FDR < {}), {} without a null",
        "Significant:".if_supports_color(Stdout, |t| t.bold()),
        summary
            .significant
            .if_supports_color(Stdout, |t| t.bright_cyan()),
        summary.scored_gene_sets,
        summary.alpha,
        summary.unscored_gene_sets
    );
}

fn print_saturation(curve: &[SaturationPoint], stability: &StabilityArgs) {
    println!(
        "{}",
        "Saturation (trials: significant)".if_supports_color(Stdout, |t| t.bold())
    );
    for point in curve {
        println!("  {:>7}: {}", point.trials, point.significant);
    }
    if is_stable(
        curve,
        stability.stability_window,
        stability.stability_tolerance,
    ) {
        println!(
            "  {}",
            "stable".if_supports_color(Stdout, |t| t.green())
        );
    } else {
        println!(
            "  {} over the last {} points, consider more trials",
            "not stable".if_supports_color(Stdout, |t| t.yellow()),
            stability.stability_window
        );
    }
}
