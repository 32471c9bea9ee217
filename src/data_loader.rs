//! CSV ingestion and the missing-value policy.
//!
//! A cell that is empty or whitespace-only counts as missing. Rows missing
//! `Source` or `Reference` are dropped for every system; rows missing the
//! system's own cell are dropped for that system only. Metrics never see
//! placeholder text.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::config::REQUIRED_COLUMNS;
use crate::error::{DataError, DataResult};

/// Aligned segments for one MT system.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AlignedSegments {
    pub sources: Vec<String>,
    pub references: Vec<String>,
    pub hypotheses: Vec<String>,
}

impl AlignedSegments {
    pub fn len(&self) -> usize {
        self.hypotheses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hypotheses.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DatasetInfo {
    pub total_rows: usize,
    pub valid_rows: usize,
    pub systems: Vec<String>,
}

/// A validated evaluation table: `Source`, `Reference` and system columns.
#[derive(Clone, Debug)]
pub struct MtDataset {
    path: PathBuf,
    headers: Vec<String>,
    rows: Vec<Vec<Option<String>>>,
    source_idx: usize,
    reference_idx: usize,
}

fn cell(value: &str) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

impl MtDataset {
    pub fn from_path(path: &Path) -> DataResult<Self> {
        if !path.is_file() {
            return Err(DataError::NotFound(path.to_path_buf()));
        }
        let rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(path)
            .map_err(|source| DataError::Csv {
                path: path.to_path_buf(),
                source,
            })?;
        Self::parse(path.to_path_buf(), rdr)
    }

    /// Read CSV from any reader; `name` stands in for the file path in errors.
    pub fn from_reader<R: io::Read>(name: impl Into<PathBuf>, reader: R) -> DataResult<Self> {
        let rdr = csv::ReaderBuilder::new().has_headers(true).from_reader(reader);
        Self::parse(name.into(), rdr)
    }

    fn parse<R: io::Read>(path: PathBuf, mut rdr: csv::Reader<R>) -> DataResult<Self> {
        let csv_err = |source| DataError::Csv {
            path: path.clone(),
            source,
        };

        let headers: Vec<String> = rdr
            .headers()
            .map_err(csv_err)?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
            .collect();

        let position = |name: &str| headers.iter().position(|h| h == name);
        let (Some(source_idx), Some(reference_idx)) = (position("Source"), position("Reference"))
        else {
            let columns = REQUIRED_COLUMNS
                .iter()
                .filter(|col| position(**col).is_none())
                .map(|col| col.to_string())
                .collect();
            return Err(DataError::MissingColumns { path, columns });
        };
        if let Some(dup) = headers
            .iter()
            .enumerate()
            .find(|(i, h)| headers[..*i].contains(*h))
            .map(|(_, h)| h.clone())
        {
            return Err(DataError::DuplicateColumn { path, column: dup });
        }

        let mut rows: Vec<Vec<Option<String>>> = vec![];
        for record in rdr.records() {
            let record = record.map_err(csv_err)?;
            rows.push(record.iter().map(cell).collect());
        }

        let dataset = Self {
            path,
            headers,
            rows,
            source_idx,
            reference_idx,
        };
        if dataset.systems().is_empty() {
            return Err(DataError::NoSystems(dataset.path));
        }
        if dataset.valid_rows() == 0 {
            return Err(DataError::Empty(dataset.path));
        }
        Ok(dataset)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Dataset identity used when nothing better is known: the file stem.
    pub fn name(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }

    /// MT system column names, in file order.
    pub fn systems(&self) -> Vec<String> {
        self.headers
            .iter()
            .filter(|h| !REQUIRED_COLUMNS.contains(&h.as_str()))
            .cloned()
            .collect()
    }

    fn is_valid(&self, row: &[Option<String>]) -> bool {
        row[self.source_idx].is_some() && row[self.reference_idx].is_some()
    }

    fn valid_rows(&self) -> usize {
        self.rows.iter().filter(|row| self.is_valid(row)).count()
    }

    /// Aligned segments for `system` after dropping rows with missing cells.
    pub fn prepare(&self, system: &str) -> DataResult<AlignedSegments> {
        let idx = self
            .headers
            .iter()
            .position(|h| h == system)
            .filter(|idx| *idx != self.source_idx && *idx != self.reference_idx)
            .ok_or_else(|| DataError::UnknownSystem {
                path: self.path.clone(),
                system: system.to_string(),
            })?;

        let mut segments = AlignedSegments::default();
        for row in &self.rows {
            if let (Some(src), Some(gold), Some(mt)) =
                (&row[self.source_idx], &row[self.reference_idx], &row[idx])
            {
                segments.sources.push(src.clone());
                segments.references.push(gold.clone());
                segments.hypotheses.push(mt.clone());
            }
        }
        if segments.is_empty() {
            return Err(DataError::NoValidRows(system.to_string()));
        }
        Ok(segments)
    }

    pub fn info(&self) -> DatasetInfo {
        DatasetInfo {
            total_rows: self.rows.len(),
            valid_rows: self.valid_rows(),
            systems: self.systems(),
        }
    }
}

/// Datasets loaded from a language mapping, plus the entries that failed.
#[derive(Debug, Default)]
pub struct LoadedDatasets {
    pub datasets: BTreeMap<String, MtDataset>,
    pub failures: Vec<(String, DataError)>,
}

/// Load every mapped file. A failing file is reported and skipped.
pub fn load_datasets(language_files: &BTreeMap<String, PathBuf>) -> LoadedDatasets {
    let mut loaded = LoadedDatasets::default();
    for (language, path) in language_files {
        match MtDataset::from_path(path) {
            Ok(dataset) => {
                let info = dataset.info();
                info!(
                    language = %language,
                    rows = info.total_rows,
                    valid = info.valid_rows,
                    systems = info.systems.len(),
                    "loaded dataset"
                );
                loaded.datasets.insert(language.clone(), dataset);
            }
            Err(err) => {
                warn!(language = %language, %err, "skipping dataset");
                loaded.failures.push((language.clone(), err));
            }
        }
    }
    loaded
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn dataset(csv: &str) -> DataResult<MtDataset> {
        MtDataset::from_reader("Hindi.csv", csv.as_bytes())
    }

    #[test]
    fn test_systems_are_non_required_columns_in_order() {
        let ds = dataset("SysB,Source,Reference,SysA\nb,s,r,a\n").unwrap();
        assert_eq!(ds.systems(), vec!["SysB", "SysA"]);
        assert_eq!(ds.name(), "Hindi");
    }

    #[test]
    fn test_quoted_commas_survive() {
        let ds = dataset(
            "Source,Reference,SystemA\n\"Hello, world\",\"नमस्ते, दुनिया\",\"नमस्ते, विश्व\"\n",
        )
        .unwrap();
        let seg = ds.prepare("SystemA").unwrap();
        assert_eq!(seg.sources, vec!["Hello, world"]);
        assert_eq!(seg.hypotheses, vec!["नमस्ते, विश्व"]);
    }

    #[test]
    fn test_missing_reference_column_is_named() {
        let err = dataset("Source,SystemA\nhello,hola\n").unwrap_err();
        match err {
            DataError::MissingColumns { columns, .. } => assert_eq!(columns, vec!["Reference"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_cells_are_dropped_per_system() {
        let ds = dataset(
            "Source,Reference,A,B\n\
             s1,r1,a1,b1\n\
             s2,,a2,b2\n\
             s3,r3,,b3\n\
             s4,r4,a4,  \n",
        )
        .unwrap();

        let a = ds.prepare("A").unwrap();
        assert_eq!(a.sources, vec!["s1", "s4"]);
        assert_eq!(a.hypotheses, vec!["a1", "a4"]);

        let b = ds.prepare("B").unwrap();
        assert_eq!(b.references, vec!["r1", "r3"]);

        assert_eq!(
            ds.info(),
            DatasetInfo {
                total_rows: 4,
                valid_rows: 3,
                systems: vec!["A".into(), "B".into()],
            }
        );
    }

    #[test]
    fn test_all_empty_system_has_no_valid_rows() {
        let ds = dataset("Source,Reference,Good,Blank\ns,r,g,\ns2,r2,g2,\n").unwrap();
        assert!(matches!(ds.prepare("Blank"), Err(DataError::NoValidRows(sys)) if sys == "Blank"));
        assert_eq!(ds.prepare("Good").unwrap().len(), 2);
    }

    #[test]
    fn test_unknown_and_required_names_are_not_systems() {
        let ds = dataset("Source,Reference,A\ns,r,a\n").unwrap();
        assert!(matches!(ds.prepare("Z"), Err(DataError::UnknownSystem { .. })));
        assert!(matches!(ds.prepare("Source"), Err(DataError::UnknownSystem { .. })));
    }

    #[test]
    fn test_structural_failures() {
        assert!(matches!(
            dataset("Source,Reference\ns,r\n"),
            Err(DataError::NoSystems(_))
        ));
        assert!(matches!(
            dataset("Source,Reference,A\n,r,a\n"),
            Err(DataError::Empty(_))
        ));
        assert!(matches!(
            dataset("Source,Reference,A,A\ns,r,a,b\n"),
            Err(DataError::DuplicateColumn { column, .. }) if column == "A"
        ));
        assert!(matches!(
            dataset("Source,Reference,A\ns,r\n"),
            Err(DataError::Csv { .. })
        ));
    }

    #[test]
    fn test_byte_order_mark_is_ignored() {
        let ds = dataset("\u{feff}Source,Reference,A\ns,r,a\n").unwrap();
        assert_eq!(ds.systems(), vec!["A"]);
    }

    #[test]
    fn test_load_datasets_skips_bad_files() {
        let tmp = tempfile::tempdir().unwrap();
        let good = tmp.path().join("Tamil.csv");
        std::fs::write(&good, "Source,Reference,A\ns,r,a\n").unwrap();
        let bad = tmp.path().join("Odia.csv");
        std::fs::write(&bad, "Source,A\ns,a\n").unwrap();

        let files = BTreeMap::from([
            ("Marathi".to_string(), tmp.path().join("Marathi.csv")),
            ("Odia".to_string(), bad),
            ("Tamil".to_string(), good),
        ]);
        let loaded = load_datasets(&files);
        assert_eq!(loaded.datasets.keys().collect::<Vec<_>>(), vec!["Tamil"]);
        let failed: Vec<&str> = loaded.failures.iter().map(|(l, _)| l.as_str()).collect();
        assert_eq!(failed, vec!["Marathi", "Odia"]);
        assert!(matches!(loaded.failures[0].1, DataError::NotFound(_)));
    }
}
