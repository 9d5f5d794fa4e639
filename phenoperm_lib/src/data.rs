use crate::{Error, Result};
use ahash::{AHashMap, AHashSet};
use log::info;
use ndarray::{Array2, Axis};

/// Gene × sample count table. Read-only once trials start.
#[derive(Debug, Clone)]
pub struct CountMatrix {
    pub genes: Vec<String>,
    pub samples: Vec<String>,
    pub counts: Array2<u64>,
}

impl CountMatrix {
    pub fn new(counts: Array2<u64>, genes: Vec<String>, samples: Vec<String>) -> Result<Self> {
        if counts.nrows() != genes.len() || counts.ncols() != samples.len() {
            return Err(Error::InvalidInput(format!(
                "count matrix is {}x{} but {} genes and {} samples were named",
                counts.nrows(),
                counts.ncols(),
                genes.len(),
                samples.len()
            )));
        }
        let unique: AHashSet<&String> = samples.iter().collect();
        if unique.len() != samples.len() {
            return Err(Error::InvalidInput(
                "duplicate sample ids in count matrix header".to_string(),
            ));
        }
        Ok(CountMatrix {
            genes,
            samples,
            counts,
        })
    }

    pub fn n_genes(&self) -> usize {
        self.genes.len()
    }

    pub fn n_samples(&self) -> usize {
        self.samples.len()
    }

    pub fn library_sizes(&self) -> Vec<u64> {
        self.counts.sum_axis(Axis(0)).to_vec()
    }

    /// Keep genes with at least `min_cpm` counts-per-million in at least
    /// `min_samples` samples. `min_samples == 0` keeps everything.
    pub fn filter_low_counts(&self, min_cpm: f64, min_samples: usize) -> CountMatrix {
        if min_samples == 0 {
            return self.clone();
        }
        let lib_sizes = self.library_sizes();
        let keep: Vec<usize> = self
            .counts
            .outer_iter()
            .enumerate()
            .filter(|(_, row)| {
                let passing = row
                    .iter()
                    .zip(lib_sizes.iter())
                    .filter(|&(&c, &lib)| lib > 0 && c as f64 * 1e6 / lib as f64 >= min_cpm)
                    .count();
                passing >= min_samples
            })
            .map(|(i, _)| i)
            .collect();
        info!(
            "Low-count filter kept {} of {} genes (cpm >= {} in >= {} samples)",
            keep.len(),
            self.n_genes(),
            min_cpm,
            min_samples
        );
        CountMatrix {
            genes: keep.iter().map(|&i| self.genes[i].clone()).collect(),
            samples: self.samples.clone(),
            counts: self.counts.select(Axis(0), &keep),
        }
    }
}

/// Composite gene identifier such as `TP53|7157`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneKey {
    pub symbol: String,
    pub secondary: Option<String>,
}

impl GeneKey {
    pub fn parse(raw: &str, delimiter: char) -> Self {
        match raw.split_once(delimiter) {
            Some((symbol, rest)) if !symbol.is_empty() => GeneKey {
                symbol: symbol.to_string(),
                secondary: Some(rest.to_string()),
            },
            // empty leading segment: pass the raw id through
            _ => GeneKey {
                symbol: raw.to_string(),
                secondary: None,
            },
        }
    }
}

/// Observed sample → class mapping as read from the class definition file.
#[derive(Debug, Clone, Default)]
pub struct SampleSheet {
    pub entries: Vec<(String, String)>,
}

impl SampleSheet {
    /// Align the sheet to the count matrix columns. The two sample id sets
    /// must be identical; order does not matter.
    pub fn align(&self, counts: &CountMatrix) -> Result<LabelAssignment> {
        let lookup: AHashMap<&str, &str> = self
            .entries
            .iter()
            .map(|(s, c)| (s.as_str(), c.as_str()))
            .collect();
        if lookup.len() != self.entries.len() {
            return Err(Error::InvalidInput(
                "duplicate sample ids in class definitions".to_string(),
            ));
        }
        let missing: Vec<&str> = counts
            .samples
            .iter()
            .filter(|s| !lookup.contains_key(s.as_str()))
            .map(|s| s.as_str())
            .collect();
        if !missing.is_empty() || lookup.len() != counts.n_samples() {
            let extra: Vec<&str> = {
                let header: AHashSet<&str> = counts.samples.iter().map(|s| s.as_str()).collect();
                let mut extra: Vec<&str> = lookup
                    .keys()
                    .filter(|s| !header.contains(*s))
                    .copied()
                    .collect();
                extra.sort_unstable();
                extra
            };
            return Err(Error::InvalidInput(format!(
                "sample ids differ between counts and class definitions (missing classes for {:?}, unknown samples {:?})",
                missing, extra
            )));
        }
        let labels = counts
            .samples
            .iter()
            .map(|s| lookup[s.as_str()].to_string())
            .collect();
        LabelAssignment::new(labels)
    }
}

/// One class label per count-matrix column, in column order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelAssignment {
    pub labels: Vec<String>,
}

impl LabelAssignment {
    pub fn new(labels: Vec<String>) -> Result<Self> {
        if labels.is_empty() {
            return Err(Error::InvalidInput("no samples to label".to_string()));
        }
        Ok(LabelAssignment { labels })
    }

    pub fn classes(&self) -> Vec<&str> {
        let mut classes: Vec<&str> = self.labels.iter().map(|l| l.as_str()).collect();
        classes.sort_unstable();
        classes.dedup();
        classes
    }

    pub fn class_sizes(&self) -> AHashMap<&str, usize> {
        let mut sizes = AHashMap::default();
        for label in &self.labels {
            *sizes.entry(label.as_str()).or_insert(0) += 1;
        }
        sizes
    }

    /// Column indices of the samples labelled `class`.
    pub fn members(&self, class: &str) -> Vec<usize> {
        self.labels
            .iter()
            .enumerate()
            .filter(|(_, l)| l.as_str() == class)
            .map(|(i, _)| i)
            .collect()
    }
}

/// The two classes a run compares; `positive` is the numerator of logFC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contrast {
    pub positive: String,
    pub negative: String,
}

impl Contrast {
    pub fn validate(&self, labels: &LabelAssignment) -> Result<()> {
        if self.positive == self.negative {
            return Err(Error::InvalidInput(format!(
                "contrast compares class '{}' with itself",
                self.positive
            )));
        }
        for class in [&self.positive, &self.negative] {
            if labels.members(class).is_empty() {
                return Err(Error::InvalidInput(format!(
                    "class '{}' has no samples",
                    class
                )));
            }
        }
        Ok(())
    }
}
