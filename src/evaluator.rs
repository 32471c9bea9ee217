//! Orchestration: score every system of every dataset, round, persist.
//!
//! A metric that fails for one system leaves an empty cell; it never drops the
//! row or the rest of the run.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::config::{EvalConfig, Metric};
use crate::data_loader::{load_datasets, AlignedSegments, MtDataset};
use crate::error::{DataError, OutputError};
use crate::models::Models;
use crate::score::compute_all_metrics;

/// Combined table file. Per-language files always end in `_results.csv`, so
/// no language can claim this name.
pub const COMBINED_RESULTS_FILE: &str = "results_combined.csv";

/// Round half away from zero to `places` decimals. Applying it twice changes nothing.
pub fn round_to(value: f64, places: u32) -> f64 {
    let factor = 10f64.powi(places as i32);
    (value * factor).round() / factor
}

/// Scores of one MT system on one dataset.
#[derive(Clone, Debug, PartialEq)]
pub struct ResultRow {
    pub language: String,
    pub system: String,
    pub scores: BTreeMap<Metric, Option<f64>>,
    pub num_samples: usize,
}

impl ResultRow {
    /// A row whose every metric is missing.
    pub fn missing(language: &str, system: &str, metrics: &[Metric]) -> Self {
        Self {
            language: language.to_string(),
            system: system.to_string(),
            scores: metrics.iter().map(|&m| (m, None)).collect(),
            num_samples: 0,
        }
    }

    pub fn score(&self, metric: Metric) -> Option<f64> {
        self.scores.get(&metric).copied().flatten()
    }
}

/// Result rows with a fixed metric column order and output precision.
#[derive(Clone, Debug, PartialEq)]
pub struct ResultsTable {
    pub metrics: Vec<Metric>,
    pub places: BTreeMap<Metric, u32>,
    pub rows: Vec<ResultRow>,
}

impl ResultsTable {
    pub fn new(config: &EvalConfig) -> Self {
        let metrics = config.metric_columns();
        let places = metrics
            .iter()
            .map(|&m| (m, config.decimal_places(m)))
            .collect();
        Self {
            metrics,
            places,
            rows: vec![],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Concatenate tables sharing the same columns.
    pub fn combine<'a>(config: &EvalConfig, tables: impl IntoIterator<Item = &'a ResultsTable>) -> Self {
        let mut combined = Self::new(config);
        for table in tables {
            combined.rows.extend(table.rows.iter().cloned());
        }
        combined
    }

    fn header(&self) -> Vec<String> {
        let mut header = vec!["Language".to_string(), "MT_System".to_string()];
        header.extend(self.metrics.iter().map(|m| m.name().to_string()));
        header.push("Num_Samples".to_string());
        header
    }

    fn format_cell(&self, metric: Metric, value: Option<f64>) -> String {
        let places = self.places.get(&metric).copied().unwrap_or(4) as usize;
        value
            .map(|v| format!("{v:.places$}"))
            .unwrap_or_default()
    }

    fn records(&self) -> Vec<Vec<String>> {
        self.rows
            .iter()
            .map(|row| {
                let mut record = vec![row.language.clone(), row.system.clone()];
                record.extend(
                    self.metrics
                        .iter()
                        .map(|&m| self.format_cell(m, row.score(m))),
                );
                record.push(row.num_samples.to_string());
                record
            })
            .collect()
    }

    /// Write the table as CSV, creating parent directories.
    pub fn write_csv(&self, path: &Path) -> Result<(), OutputError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| OutputError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let write_err = |source: csv::Error| OutputError::Write {
            path: path.to_path_buf(),
            source,
        };
        let mut wtr = csv::Writer::from_path(path).map_err(write_err)?;
        wtr.write_record(self.header()).map_err(write_err)?;
        for record in self.records() {
            wtr.write_record(&record).map_err(write_err)?;
        }
        wtr.flush().map_err(|e| write_err(e.into()))?;
        Ok(())
    }

    /// Fixed-width text rendering for the console.
    pub fn render(&self) -> String {
        let header = self.header();
        let records = self.records();
        let widths: Vec<usize> = (0..header.len())
            .map(|col| {
                records
                    .iter()
                    .map(|r| r[col].chars().count())
                    .chain(std::iter::once(header[col].chars().count()))
                    .max()
                    .unwrap_or(0)
            })
            .collect();

        let mut out = String::new();
        for line in std::iter::once(&header).chain(records.iter()) {
            let cells: Vec<String> = line
                .iter()
                .zip(&widths)
                .map(|(cell, width)| {
                    let pad = width - cell.chars().count();
                    format!("{}{cell}", " ".repeat(pad))
                })
                .collect();
            let _ = writeln!(out, "{}", cells.join("  "));
        }
        out
    }
}

/// File name for a language's results, safe on every platform.
///
/// Characters other than alphanumerics, `-` and `_` are percent-encoded byte
/// by byte, so distinct languages never share a file.
pub fn results_path(results_dir: &Path, language: &str) -> PathBuf {
    let mut stem = String::with_capacity(language.len());
    for c in language.chars() {
        if c.is_alphanumeric() || c == '-' || c == '_' {
            stem.push(c);
        } else {
            let mut buf = [0u8; 4];
            for byte in c.encode_utf8(&mut buf).bytes() {
                let _ = write!(stem, "%{byte:02X}");
            }
        }
    }
    results_dir.join(format!("{stem}_results.csv"))
}

/// Persist a language's table under the results directory.
pub fn write_results(
    config: &EvalConfig,
    language: &str,
    table: &ResultsTable,
) -> Result<PathBuf, OutputError> {
    let path = results_path(&config.results_dir, language);
    table.write_csv(&path)?;
    info!(language, path = %path.display(), "results saved");
    Ok(path)
}

/// Score one system's aligned segments with every requested metric.
pub fn evaluate_system(
    language: &str,
    system: &str,
    segments: &AlignedSegments,
    models: &Models,
    config: &EvalConfig,
) -> ResultRow {
    info!(language, system, samples = segments.len(), "evaluating");
    let metrics = config.metric_columns();
    let mut row = ResultRow::missing(language, system, &metrics);
    row.num_samples = segments.len();

    for (metric, result) in compute_all_metrics(segments, models, &metrics, config.batch_size) {
        let value = match result {
            Ok(value) if value.is_finite() => {
                let rounded = round_to(value, config.decimal_places(metric));
                info!(language, system, %metric, score = rounded);
                Some(rounded)
            }
            Ok(value) => {
                warn!(language, system, %metric, value, "non-finite score recorded as missing");
                None
            }
            Err(err) => {
                warn!(language, system, %metric, %err, "metric failed, recorded as missing");
                None
            }
        };
        row.scores.insert(metric, value);
    }
    row
}

/// One row per system column of `dataset`.
pub fn evaluate_dataset(
    language: &str,
    dataset: &MtDataset,
    models: &Models,
    config: &EvalConfig,
) -> ResultsTable {
    let systems = dataset.systems();
    info!(language, systems = %systems.join(", "), "processing dataset");

    let mut table = ResultsTable::new(config);
    for system in &systems {
        let row = match dataset.prepare(system) {
            Ok(segments) => evaluate_system(language, system, &segments, models, config),
            Err(err) => {
                warn!(language, system = %system, %err, "no scorable rows, recorded as missing");
                ResultRow::missing(language, system, &table.metrics)
            }
        };
        table.rows.push(row);
    }
    info!(language, "completed dataset");
    table
}

/// Evaluate every dataset, keyed by language.
pub fn evaluate_datasets(
    datasets: &BTreeMap<String, MtDataset>,
    models: &Models,
    config: &EvalConfig,
) -> BTreeMap<String, ResultsTable> {
    datasets
        .iter()
        .map(|(language, dataset)| {
            (
                language.clone(),
                evaluate_dataset(language, dataset, models, config),
            )
        })
        .collect()
}

/// Outcome of a full pipeline run.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub tables: BTreeMap<String, ResultsTable>,
    pub skipped: Vec<(String, DataError)>,
    pub written: Vec<PathBuf>,
}

impl RunSummary {
    pub fn combined(&self, config: &EvalConfig) -> ResultsTable {
        ResultsTable::combine(config, self.tables.values())
    }
}

/// Load, evaluate and persist every mapped dataset.
///
/// Datasets that fail to load are skipped and reported in the summary; no
/// results file is written for them.
pub fn run(
    config: &EvalConfig,
    language_files: &BTreeMap<String, PathBuf>,
    models: &Models,
) -> Result<RunSummary, OutputError> {
    info!(datasets = language_files.len(), "starting evaluation");
    let loaded = load_datasets(language_files);
    let tables = evaluate_datasets(&loaded.datasets, models, config);

    let mut summary = RunSummary {
        tables,
        skipped: loaded.failures,
        written: vec![],
    };
    for (language, table) in &summary.tables {
        let path = write_results(config, language, table)?;
        summary.written.push(path);
    }

    let combined = summary.combined(config);
    if !combined.is_empty() {
        let path = config.results_dir.join(COMBINED_RESULTS_FILE);
        combined.write_csv(&path)?;
        info!(path = %path.display(), evaluations = combined.rows.len(), "combined results saved");
        summary.written.push(path);
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(37.991784, 2), 37.99);
        assert_eq!(round_to(0.123456, 4), 0.1235);
        assert_eq!(round_to(-0.00005, 4), -0.0001);
        assert_eq!(round_to(12.5, 0), 13.0);
    }

    #[test]
    fn test_round_to_is_idempotent() {
        for i in 0..2000 {
            let value = (i as f64) * 0.731_7 - 400.0 + (i as f64).sin();
            for places in 0..=6 {
                let once = round_to(value, places);
                assert_eq!(round_to(once, places), once, "{value} @ {places}");
            }
        }
    }

    #[test]
    fn test_results_path_is_sanitised() {
        let dir = Path::new("out");
        assert_eq!(results_path(dir, "Hindi"), PathBuf::from("out/Hindi_results.csv"));
        assert_eq!(results_path(dir, "en/hi news"), PathBuf::from("out/en%2Fhi%20news_results.csv"));
        assert_eq!(results_path(dir, "100%"), PathBuf::from("out/100%25_results.csv"));
    }

    #[test]
    fn test_results_paths_never_collide() {
        let dir = Path::new("out");
        let languages = ["en/hi", "en_hi", "en%2Fhi", "all", "results", "combined", "Hindi"];
        let mut paths: Vec<PathBuf> = languages.iter().map(|l| results_path(dir, l)).collect();
        paths.push(dir.join(COMBINED_RESULTS_FILE));
        let count = paths.len();
        paths.sort();
        paths.dedup();
        assert_eq!(paths.len(), count);
    }

    fn table() -> ResultsTable {
        let config = EvalConfig {
            metrics: vec![Metric::Bleu, Metric::CometQe, Metric::Bleu],
            ..Default::default()
        };
        let mut table = ResultsTable::new(&config);
        table.rows.push(ResultRow {
            language: "Hindi".into(),
            system: "SystemA".into(),
            scores: BTreeMap::from([(Metric::Bleu, Some(3.5)), (Metric::CometQe, Some(0.12))]),
            num_samples: 10,
        });
        table.rows.push(ResultRow::missing("Hindi", "Blank", &table.metrics));
        table
    }

    #[test]
    fn test_csv_layout_and_precision() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("Hindi_results.csv");
        let table = table();
        assert_eq!(table.metrics, vec![Metric::Bleu, Metric::CometQe]);

        table.write_csv(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            text,
            "Language,MT_System,BLEU,COMET_QE,Num_Samples\n\
             Hindi,SystemA,3.50,0.1200,10\n\
             Hindi,Blank,,,0\n"
        );
    }

    #[test]
    fn test_render_aligns_columns() {
        let rendered = table().render();
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines.iter().all(|l| l.chars().count() == lines[0].chars().count()));
        assert!(lines[1].ends_with("10"));
    }
}
