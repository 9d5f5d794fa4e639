//! Collection of utilities to save results to a file/folder
use crate::data::{CountMatrix, LabelAssignment};
use crate::methods::analysis::RunSummary;
use crate::methods::fdr::FdrEstimate;
use crate::methods::gsea::EnrichmentReport;
use crate::methods::null_distribution::NullDistributionTable;
use crate::methods::rank::RankListItem;
use crate::methods::saturation::SaturationPoint;
use crate::readers::utils::ReportTable;
use crate::Result;
use ahash::AHashMap;
use std::fs::File;
use std::io::{prelude::*, BufWriter};
use std::path::Path;

fn tsv_writer(path: &Path) -> Result<csv::Writer<File>> {
    Ok(csv::WriterBuilder::new()
        .delimiter(b'\t')
        .flexible(true)
        .from_path(path)?)
}

fn format_optional(value: Option<f64>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => "NA".to_string(),
    }
}

/// `sample<TAB>class`, one line per count-matrix column.
pub fn write_class_file(path: &Path, samples: &[String], labels: &LabelAssignment) -> Result<()> {
    let mut wtr = tsv_writer(path)?;
    wtr.write_record(["sample", "class"])?;
    for (sample, class) in samples.iter().zip(labels.labels.iter()) {
        wtr.write_record([sample, class])?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_counts_file(path: &Path, counts: &CountMatrix) -> Result<()> {
    let mut wtr = tsv_writer(path)?;
    let mut header = vec!["gene".to_string()];
    header.extend(counts.samples.iter().cloned());
    wtr.write_record(&header)?;
    for (gene, row) in counts.genes.iter().zip(counts.counts.outer_iter()) {
        let mut record = Vec::with_capacity(row.len() + 1);
        record.push(gene.clone());
        record.extend(row.iter().map(|c| c.to_string()));
        wtr.write_record(&record)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Scores use the shortest representation that parses back to the same value.
pub fn write_rank_file(path: &Path, items: &[RankListItem]) -> Result<()> {
    let mut wtr = tsv_writer(path)?;
    wtr.write_record(["gene", "score"])?;
    for item in items {
        wtr.write_record([item.analyte.clone(), item.rank.to_string()])?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_report_table(path: &Path, table: &ReportTable) -> Result<()> {
    let mut wtr = tsv_writer(path)?;
    wtr.write_record(&table.headers)?;
    for row in &table.rows {
        wtr.write_record(row)?;
    }
    wtr.flush()?;
    Ok(())
}

/// The observed report, column for column, with its FDR column holding the
/// empirical q-values instead. Gene sets without a null distribution get `NA`.
pub fn write_fdr_report(
    path: &Path,
    report: &EnrichmentReport,
    estimate: &FdrEstimate,
) -> Result<()> {
    let q_values: AHashMap<&str, f64> = estimate
        .results
        .iter()
        .map(|r| (r.gene_set.as_str(), r.fdr_q))
        .collect();
    let mut wtr = tsv_writer(path)?;
    wtr.write_record(&report.table.headers)?;
    for (row, record) in report.table.rows.iter().zip(report.records.iter()) {
        let mut row = row.clone();
        if row.len() <= report.fdr_column {
            row.resize(report.fdr_column + 1, String::new());
        }
        row[report.fdr_column] = format_optional(q_values.get(record.gene_set.as_str()).copied());
        wtr.write_record(&row)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Engine FDR next to the empirical estimate for every scored gene set.
pub fn write_fdr_comparison(path: &Path, estimate: &FdrEstimate) -> Result<()> {
    let mut wtr = tsv_writer(path)?;
    wtr.write_record([
        "gene_set",
        "es",
        "nes",
        "engine_fdr",
        "null_count",
        "nominal_p",
        "empirical_fdr",
    ])?;
    for r in &estimate.results {
        wtr.write_record([
            r.gene_set.clone(),
            r.observed_es.to_string(),
            r.observed_nes.to_string(),
            format_optional(r.engine_fdr),
            r.null_count.to_string(),
            r.nominal_p.to_string(),
            r.fdr_q.to_string(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_saturation(path: &Path, curve: &[SaturationPoint]) -> Result<()> {
    let mut wtr = tsv_writer(path)?;
    wtr.write_record(["trials", "significant"])?;
    for point in curve {
        wtr.write_record([point.trials.to_string(), point.significant.to_string()])?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn save_summary(path: &Path, summary: &RunSummary) -> Result<()> {
    let mut file = File::create(path)?;
    let json = serde_json::to_string_pretty(summary).map_err(std::io::Error::from)?;
    file.write_all(json.as_bytes())?;
    Ok(())
}

pub fn save_null_distribution(path: &Path, table: &NullDistributionTable) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    bincode::serialize_into(&mut writer, table)?;
    writer.flush()?;
    Ok(())
}
