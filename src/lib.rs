//! Machine-translation evaluation: corpus BLEU, METEOR and COMET-family
//! scores for every MT system column of a CSV dataset.

pub mod bleu;
pub mod comet;
pub mod config;
pub mod data_loader;
pub mod error;
pub mod evaluator;
pub mod meteor;
pub mod models;
pub mod score;
pub mod test_utils;
#[cfg(feature = "comet")]
pub mod torch_model;
pub mod utils;

#[cfg(feature = "python")]
mod python;

pub use config::{EvalConfig, Metric};
pub use data_loader::{load_datasets, AlignedSegments, MtDataset};
pub use evaluator::{
    evaluate_dataset, evaluate_datasets, evaluate_system, round_to, run, write_results, ResultRow,
    ResultsTable, RunSummary,
};
pub use models::{provision, provision_blocking, Models};
