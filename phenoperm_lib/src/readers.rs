pub mod utils;
use crate::data::{CountMatrix, SampleSheet};
use crate::methods::de::GeneStatistic;
use crate::methods::null_distribution::NullDistributionTable;
use crate::methods::rank::RankListItem;
use crate::{Error, MalformedError, Result};
use ndarray::Array2;
use std::{fs::File, io::BufReader, path::Path};
use utils::{parse_number, Item, ReportTable};

/// `#` lines are skipped only in hand-written definition files; tables keyed
/// by gene id keep them, since ids may start with `#`.
fn tsv_reader(path: &Path, has_headers: bool, comments: bool) -> Result<csv::Reader<File>> {
    let file = File::open(path)?;
    Ok(csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .flexible(true)
        .has_headers(has_headers)
        .comment(if comments { Some(b'#') } else { None })
        .from_reader(file))
}

pub fn read_gmt_file(path: &Path) -> Result<Vec<Item>> {
    let mut rdr = tsv_reader(path, false, true)?;
    let mut items: Vec<utils::Item> = Vec::new();
    for r in rdr.records() {
        let result = r?
            .iter()
            .map(|x| x.to_string())
            .collect::<Vec<String>>();
        if result.len() < 3 {
            return Err(MalformedError::WrongFormat(format!(
                "gene set line with fewer than 3 fields in {}",
                path.display()
            ))
            .into());
        }
        let id = result[0].to_owned();
        let url = result[1].to_owned();
        let parts = result[2..]
            .iter()
            .filter(|x| !x.is_empty())
            .cloned()
            .collect();
        items.push(Item { id, url, parts });
    }
    Ok(items)
}

/// Read a two-column `gene<TAB>score` rank list written by
/// [`crate::writers::write_rank_file`].
pub fn read_rank_file(path: &Path) -> Result<Vec<RankListItem>> {
    let mut rdr = tsv_reader(path, true, false)?;
    let mut items: Vec<RankListItem> = Vec::new();
    for r in rdr.records() {
        let record = r?;
        let analyte = record
            .get(0)
            .ok_or_else(|| MalformedError::NoColumnsFound(path.to_path_buf()))?
            .to_owned();
        let rank = parse_number(record.get(1).unwrap_or(""), "score", path)?;
        items.push(RankListItem { analyte, rank });
    }
    Ok(items)
}

/// Gene × sample counts. The header row names the samples; its first cell
/// labels the gene column and is ignored.
pub fn read_counts_file(path: &Path) -> Result<CountMatrix> {
    let mut rdr = tsv_reader(path, true, false)?;
    let header = rdr.headers()?.clone();
    if header.len() < 2 {
        return Err(MalformedError::NoColumnsFound(path.to_path_buf()).into());
    }
    let samples: Vec<String> = header.iter().skip(1).map(|s| s.to_string()).collect();
    let mut genes = Vec::new();
    let mut values: Vec<u64> = Vec::new();
    for r in rdr.records() {
        let record = r?;
        if record.len() != samples.len() + 1 {
            return Err(MalformedError::WrongFormat(format!(
                "gene '{}' has {} count columns, expected {} in {}",
                record.get(0).unwrap_or(""),
                record.len().saturating_sub(1),
                samples.len(),
                path.display()
            ))
            .into());
        }
        genes.push(record[0].to_string());
        for (i, cell) in record.iter().skip(1).enumerate() {
            values.push(parse_count(cell, &samples[i], path)?);
        }
    }
    let counts = Array2::from_shape_vec((genes.len(), samples.len()), values)
        .map_err(|e| Error::InvalidInput(format!("count matrix shape: {}", e)))?;
    CountMatrix::new(counts, genes, samples)
}

fn parse_count(cell: &str, sample: &str, path: &Path) -> Result<u64> {
    let cell = cell.trim();
    if let Ok(v) = cell.parse::<u64>() {
        return Ok(v);
    }
    match cell.parse::<f64>() {
        Ok(v) if v >= 0.0 && v.fract() == 0.0 && v.is_finite() => Ok(v as u64),
        _ => Err(MalformedError::InvalidNumber {
            value: cell.to_string(),
            column: sample.to_string(),
            path: path.to_path_buf(),
        }
        .into()),
    }
}

/// `sample<TAB>class` rows; a leading `sample` header line is skipped.
pub fn read_class_file(path: &Path) -> Result<SampleSheet> {
    let mut rdr = tsv_reader(path, false, true)?;
    let mut entries = Vec::new();
    for (i, r) in rdr.records().enumerate() {
        let record = r?;
        if record.len() < 2 {
            return Err(MalformedError::WrongFormat(format!(
                "class definition line {} needs sample and class in {}",
                i + 1,
                path.display()
            ))
            .into());
        }
        let sample = record[0].trim();
        if i == 0 && matches!(sample.to_lowercase().as_str(), "sample" | "sample_id" | "id") {
            continue;
        }
        entries.push((sample.to_string(), record[1].trim().to_string()));
    }
    Ok(SampleSheet { entries })
}

/// Read any tab-delimited report with a header row, verbatim.
pub fn read_report_table(path: &Path) -> Result<ReportTable> {
    let mut rdr = tsv_reader(path, true, false)?;
    let headers: Vec<String> = rdr.headers()?.iter().map(|h| h.trim().to_string()).collect();
    if headers.iter().all(|h| h.is_empty()) {
        return Err(MalformedError::NoColumnsFound(path.to_path_buf()).into());
    }
    let mut rows = Vec::new();
    for r in rdr.records() {
        rows.push(r?.iter().map(|x| x.to_string()).collect());
    }
    Ok(ReportTable { headers, rows })
}

/// Output of the external DE model: gene id, log fold change, p-value.
pub fn read_de_table(path: &Path) -> Result<Vec<GeneStatistic>> {
    let table = read_report_table(path)?;
    let gene_col = table.find_column(&["gene", "Gene", "genes", "id"], path)?;
    let lfc_col = table.find_column(&["logFC", "log2FoldChange", "log_fc"], path)?;
    let p_col = table.find_column(&["PValue", "pvalue", "P.Value", "p_value"], path)?;
    let mut stats = Vec::with_capacity(table.rows.len());
    for row in 0..table.rows.len() {
        stats.push(GeneStatistic {
            gene: table.cell(row, gene_col).to_string(),
            log_fc: parse_number(table.cell(row, lfc_col), &table.headers[lfc_col], path)?,
            p_value: parse_number(table.cell(row, p_col), &table.headers[p_col], path)?,
        });
    }
    Ok(stats)
}

pub fn load_null_distribution(path: &Path) -> Result<NullDistributionTable> {
    let reader = BufReader::new(File::open(path)?);
    Ok(bincode::deserialize_from(reader)?)
}
