use std::path::PathBuf;

use thiserror::Error;

use crate::config::Metric;

/// Problems with the settings record or with what a caller asked of it.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("unknown language `{0}`, not present in the language file mapping")]
    UnknownLanguage(String),
    #[error("unknown metric `{0}`, expected one of BLEU, METEOR, COMET, COMET_QE")]
    UnknownMetric(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Failures while reading or validating a dataset.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("dataset file not found: {0}")]
    NotFound(PathBuf),
    #[error("failed to read {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("missing required columns in {path}: {columns:?}")]
    MissingColumns { path: PathBuf, columns: Vec<String> },
    #[error("duplicate column `{column}` in {path}")]
    DuplicateColumn { path: PathBuf, column: String },
    #[error("no MT system columns in {0}")]
    NoSystems(PathBuf),
    #[error("no rows with both Source and Reference in {0}")]
    Empty(PathBuf),
    #[error("unknown MT system `{system}` in {path}")]
    UnknownSystem { path: PathBuf, system: String },
    #[error("no valid translations found for MT system: {0}")]
    NoValidRows(String),
}

/// Failures while resolving, downloading or running a scoring model.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model `{id}` not found: {detail}")]
    NotFound { id: String, detail: String },
    #[error("failed to download `{id}`: {detail}")]
    Download { id: String, detail: String },
    #[error("incompatible runtime for `{id}`: {detail}")]
    Incompatible { id: String, detail: String },
    #[error("failed to load `{id}`: {detail}")]
    Load { id: String, detail: String },
    #[error("prediction failed for `{id}`: {detail}")]
    Predict { id: String, detail: String },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to read METEOR resource {path}: {source}")]
    Lexicon {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failure of one metric on one set of aligned segments.
#[derive(Debug, Error)]
pub enum MetricError {
    #[error("{metric}: input lengths differ ({detail})")]
    LengthMismatch { metric: Metric, detail: String },
    #[error("{0}: no segments to score")]
    EmptyInput(Metric),
    #[error("{0}: no model loaded")]
    ModelUnavailable(Metric),
    #[error("{metric}: {source}")]
    Model {
        metric: Metric,
        #[source]
        source: ModelError,
    },
    #[error("{metric}: model returned {got} scores for {expected} segments")]
    ScoreCount {
        metric: Metric,
        expected: usize,
        got: usize,
    },
}

/// Failure to persist a results table.
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("failed to create results directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write results to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

pub type DataResult<T> = Result<T, DataError>;
pub type MetricResult<T> = Result<T, MetricError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_affected_item() {
        let err = DataError::MissingColumns {
            path: PathBuf::from("Hindi.csv"),
            columns: vec!["Reference".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("Hindi.csv"));
        assert!(msg.contains("Reference"));

        let err = MetricError::EmptyInput(Metric::CometQe);
        assert_eq!(err.to_string(), "COMET_QE: no segments to score");
    }
}
