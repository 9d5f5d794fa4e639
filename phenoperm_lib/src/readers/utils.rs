use crate::{MalformedError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One gene set from a GMT file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub url: String,
    pub parts: Vec<String>,
}

/// A tab-delimited table kept verbatim so it can be written back with one
/// column replaced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl ReportTable {
    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// First column matching any of `names`.
    pub fn find_column(&self, names: &[&str], path: &Path) -> Result<usize> {
        names
            .iter()
            .find_map(|n| self.column(n))
            .ok_or_else(|| {
                MalformedError::MissingColumn {
                    column: names.join(" | "),
                    path: path.to_path_buf(),
                }
                .into()
            })
    }

    pub fn cell(&self, row: usize, column: usize) -> &str {
        self.rows[row].get(column).map(|s| s.as_str()).unwrap_or("")
    }

    /// Append rows of a table with the same header.
    pub fn extend(&mut self, other: ReportTable, path: &Path) -> Result<()> {
        if self.headers.is_empty() {
            *self = other;
            return Ok(());
        }
        if trimmed(&self.headers) != trimmed(&other.headers) {
            return Err(MalformedError::WrongFormat(format!(
                "{} has a different header than the other report tables",
                path.display()
            ))
            .into());
        }
        self.rows.extend(other.rows);
        Ok(())
    }
}

fn trimmed(headers: &[String]) -> Vec<&str> {
    let mut h: Vec<&str> = headers.iter().map(|s| s.as_str()).collect();
    while h.last().map_or(false, |s| s.is_empty()) {
        h.pop();
    }
    h
}

/// Parse a numeric cell, naming the column and file on failure.
pub fn parse_number(value: &str, column: &str, path: &Path) -> Result<f64> {
    value.trim().parse::<f64>().map_err(|_| {
        MalformedError::InvalidNumber {
            value: value.to_string(),
            column: column.to_string(),
            path: path.to_path_buf(),
        }
        .into()
    })
}
