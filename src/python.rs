use std::path::PathBuf;

use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::PyDict;

use crate::bleu::compute_bleu;
use crate::config::EvalConfig;
use crate::evaluator::{run, ResultRow};
use crate::meteor::{compute_meteor, MeteorResources};
use crate::models::provision_blocking;

fn row_to_dict<'py>(py: Python<'py>, row: &ResultRow) -> PyResult<Bound<'py, PyDict>> {
    let dict = PyDict::new(py);
    dict.set_item("Language", &row.language)?;
    dict.set_item("MT_System", &row.system)?;
    for (metric, score) in &row.scores {
        dict.set_item(metric.name(), *score)?;
    }
    dict.set_item("Num_Samples", row.num_samples)?;
    Ok(dict)
}

/// Run the full pipeline and return the combined rows as dicts.
#[pyfunction]
#[pyo3(signature = (config_path=None, languages=None))]
fn evaluate<'py>(
    py: Python<'py>,
    config_path: Option<PathBuf>,
    languages: Option<Vec<String>>,
) -> PyResult<Vec<Bound<'py, PyDict>>> {
    let config = EvalConfig::load(config_path.as_deref())
        .map_err(|e| PyValueError::new_err(e.to_string()))?;
    let selection = config
        .select_languages(&languages.unwrap_or_default())
        .map_err(|e| PyValueError::new_err(e.to_string()))?;

    let files = selection.files;

    // Scoring holds no Python objects, so the GIL is released for the whole run.
    let rows = py.allow_threads(|| -> anyhow::Result<Vec<ResultRow>> {
        let models = provision_blocking(&config)?;
        let summary = run(&config, &files, &models)?;
        Ok(summary.combined(&config).rows)
    });
    let rows = rows.map_err(|e| PyRuntimeError::new_err(format!("{e:#}")))?;

    rows.iter().map(|row| row_to_dict(py, row)).collect()
}

#[pyfunction]
fn bleu(py: Python, references: Vec<String>, hypotheses: Vec<String>) -> PyResult<f64> {
    py.allow_threads(|| compute_bleu(&references, &hypotheses))
        .map_err(|e| PyValueError::new_err(e.to_string()))
}

#[pyfunction]
fn meteor(py: Python, references: Vec<String>, hypotheses: Vec<String>) -> PyResult<f64> {
    py.allow_threads(|| compute_meteor(&references, &hypotheses, &MeteorResources::default()))
        .map_err(|e| PyValueError::new_err(e.to_string()))
}

#[pymodule]
fn mteval(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(evaluate, m)?)?;
    m.add_function(wrap_pyfunction!(bleu, m)?)?;
    m.add_function(wrap_pyfunction!(meteor, m)?)?;
    Ok(())
}
