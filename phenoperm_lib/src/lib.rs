//! Phenotype-permutation null distributions and empirical FDR for gene set enrichment.
//!
//! The observed comparison and every randomized trial run the same pipeline:
//! label shuffle, differential expression, rank list, enrichment. Trial
//! enrichment scores are merged into a [`methods::null_distribution::NullDistributionTable`]
//! which [`methods::fdr`] turns into one-sided empirical p-values and BH q-values.
pub mod data;
pub mod methods;
pub mod readers;
pub mod stat;
pub mod writers;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("differential expression fit failed: {0}")]
    FittingFailure(String),

    #[error("enrichment tool failed: {0}")]
    EnrichmentTool(String),

    #[error("malformed file: {0}")]
    MalformedFile(MalformedError),

    #[error("panicked: {0}")]
    Panicked(String),

    #[error("{stage} stage failed: {source}")]
    AtStage {
        stage: Stage,
        #[source]
        source: Box<Error>,
    },

    #[error("no trials completed ({requested} requested, all excluded)")]
    NoCompletedTrials { requested: usize },

    #[error("could not build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("serialization failed: {0}")]
    Serialize(#[from] bincode::Error),

    #[error(transparent)]
    IOError(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

#[derive(Error, Debug)]
pub enum MalformedError {
    #[error("no columns found in {0}")]
    NoColumnsFound(PathBuf),

    #[error("column '{column}' missing in {path}")]
    MissingColumn { column: String, path: PathBuf },

    #[error("invalid number '{value}' in column '{column}' of {path}")]
    InvalidNumber {
        value: String,
        column: String,
        path: PathBuf,
    },

    #[error("{0}")]
    WrongFormat(String),
}

impl From<MalformedError> for Error {
    fn from(e: MalformedError) -> Self {
        Error::MalformedFile(e)
    }
}

/// Pipeline stage an error is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Input,
    Shuffle,
    Fit,
    Rank,
    Enrichment,
    Aggregation,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Input => "input",
            Stage::Shuffle => "shuffle",
            Stage::Fit => "fit",
            Stage::Rank => "rank",
            Stage::Enrichment => "enrichment",
            Stage::Aggregation => "aggregation",
        };
        f.write_str(name)
    }
}

impl Error {
    /// Stage the error is attributed to: the recorded stage for
    /// [`Error::AtStage`], otherwise the one implied by the category.
    pub fn stage(&self) -> Stage {
        match self {
            Error::AtStage { stage, .. } => *stage,
            Error::InvalidInput(_) => Stage::Input,
            Error::FittingFailure(_) => Stage::Fit,
            Error::EnrichmentTool(_) => Stage::Enrichment,
            Error::MalformedFile(_) => Stage::Rank,
            Error::NoCompletedTrials { .. } | Error::ThreadPool(_) | Error::Panicked(_) => {
                Stage::Aggregation
            }
            Error::Serialize(_) | Error::IOError(_) | Error::Csv(_) => Stage::Input,
        }
    }
}
