use crate::methods::gsea::EnrichmentRecord;
use crate::methods::trials::TrialOutcome;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One trial's score for one gene set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NullEntry {
    pub trial: usize,
    pub es: f64,
    pub nes: f64,
}

/// Gene set → scores from every completed trial that scored it.
///
/// Entries are kept sorted by trial index, so the table is the same whatever
/// order trials are merged in. A gene set a trial did not score simply has no
/// entry for that trial.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NullDistributionTable {
    requested_trials: usize,
    completed: Vec<usize>,
    entries: BTreeMap<String, Vec<NullEntry>>,
}

impl NullDistributionTable {
    pub fn new(requested_trials: usize) -> Self {
        NullDistributionTable {
            requested_trials,
            ..Default::default()
        }
    }

    /// Build the table from every completed outcome; failed trials add nothing.
    pub fn from_outcomes(requested_trials: usize, outcomes: &[TrialOutcome]) -> Self {
        let mut table = NullDistributionTable::new(requested_trials);
        for outcome in outcomes {
            if let TrialOutcome::Completed { index, records } = outcome {
                table.merge(*index, records);
            }
        }
        table
    }

    pub fn merge(&mut self, trial: usize, records: &[EnrichmentRecord]) {
        match self.completed.binary_search(&trial) {
            Ok(_) => {
                warn!("Trial {} was already merged; ignoring repeat", trial);
                return;
            }
            Err(pos) => self.completed.insert(pos, trial),
        }
        for record in records {
            if !record.es.is_finite() {
                debug!("Trial {}: skipping non-finite ES for {}", trial, record.gene_set);
                continue;
            }
            let values = self.entries.entry(record.gene_set.clone()).or_default();
            match values.binary_search_by_key(&trial, |e| e.trial) {
                Ok(_) => debug!(
                    "Trial {}: gene set {} reported twice, keeping the first",
                    trial, record.gene_set
                ),
                Err(pos) => values.insert(
                    pos,
                    NullEntry {
                        trial,
                        es: record.es,
                        nes: record.nes,
                    },
                ),
            }
        }
    }

    /// Number of trials requested, the denominator basis for smoothing.
    pub fn requested_trials(&self) -> usize {
        self.requested_trials
    }

    pub fn completed_trials(&self) -> &[usize] {
        &self.completed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn gene_sets(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|k| k.as_str())
    }

    pub fn entries(&self, gene_set: &str) -> &[NullEntry] {
        self.entries
            .get(gene_set)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn es_values(&self, gene_set: &str) -> impl Iterator<Item = f64> + '_ {
        self.entries(gene_set).iter().map(|e| e.es)
    }

    pub fn nes_values(&self, gene_set: &str) -> impl Iterator<Item = f64> + '_ {
        self.entries(gene_set).iter().map(|e| e.nes)
    }

    /// The table restricted to trials `1..=k`, with `k` as the requested pool.
    pub fn prefix(&self, k: usize) -> NullDistributionTable {
        let entries = self
            .entries
            .iter()
            .filter_map(|(set, values)| {
                let end = values.partition_point(|e| e.trial <= k);
                if end == 0 {
                    None
                } else {
                    Some((set.clone(), values[..end].to_vec()))
                }
            })
            .collect();
        NullDistributionTable {
            requested_trials: k,
            completed: self.completed.iter().copied().filter(|&t| t <= k).collect(),
            entries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn record(set: &str, es: f64) -> EnrichmentRecord {
        EnrichmentRecord {
            gene_set: set.to_string(),
            es,
            nes: es * 2.0,
            fdr: None,
        }
    }

    #[test]
    fn outer_merge_leaves_gaps_absent() {
        let mut table = NullDistributionTable::new(3);
        table.merge(1, &[record("A", 0.1), record("B", -0.2)]);
        table.merge(2, &[record("A", 0.3)]);
        table.merge(3, &[record("B", 0.4), record("C", f64::NAN)]);
        assert_eq!(table.es_values("A").collect::<Vec<_>>(), vec![0.1, 0.3]);
        assert_eq!(table.es_values("B").collect::<Vec<_>>(), vec![-0.2, 0.4]);
        assert_eq!(table.entries("C").len(), 0);
        assert_eq!(table.completed_trials(), &[1, 2, 3]);
    }

    #[test]
    fn prefix_keeps_first_trials() {
        let mut table = NullDistributionTable::new(4);
        for trial in [4, 2, 1, 3] {
            table.merge(trial, &[record("A", trial as f64)]);
        }
        let prefix = table.prefix(2);
        assert_eq!(prefix.requested_trials(), 2);
        assert_eq!(prefix.es_values("A").collect::<Vec<_>>(), vec![1.0, 2.0]);
        assert_eq!(prefix.completed_trials(), &[1, 2]);
    }

    #[test]
    fn repeated_trial_is_ignored() {
        let mut table = NullDistributionTable::new(2);
        table.merge(1, &[record("A", 0.5)]);
        table.merge(1, &[record("A", 0.9)]);
        assert_eq!(table.es_values("A").collect::<Vec<_>>(), vec![0.5]);
    }

    #[test]
    fn lists_gene_sets_with_their_scores() {
        let mut table = NullDistributionTable::new(2);
        assert!(table.is_empty());
        table.merge(2, &[record("B", -0.5), record("A", 0.25)]);
        table.merge(1, &[record("A", 0.75)]);
        assert_eq!(table.len(), 2);
        assert!(!table.is_empty());
        assert_eq!(table.gene_sets().collect::<Vec<_>>(), vec!["A", "B"]);
        assert_eq!(table.nes_values("A").collect::<Vec<_>>(), vec![1.5, 0.5]);
        assert_eq!(table.nes_values("B").collect::<Vec<_>>(), vec![-1.0]);
        assert_eq!(table.nes_values("missing").count(), 0);
    }
}
