use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, warn};

use mteval::config::{EvalConfig, LanguageSelection, Metric, CONFIG_ENV};
use mteval::evaluator::run;
use mteval::models::provision_blocking;
use mteval::utils::remove_model_cache;

/// Score MT system outputs with BLEU, METEOR, COMET and COMET-QE.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML configuration file; defaults apply when omitted
    #[arg(long, env = CONFIG_ENV)]
    config: Option<PathBuf>,

    /// Evaluate only this configured language (repeatable)
    #[arg(long = "language", conflicts_with = "input")]
    languages: Vec<String>,

    /// Evaluate a single CSV file, named after its file stem
    #[arg(long)]
    input: Option<PathBuf>,

    /// Directory for the results CSV files
    #[arg(long)]
    results_dir: Option<PathBuf>,

    /// Comma-separated metrics, e.g. BLEU,METEOR
    #[arg(long, value_delimiter = ',')]
    metrics: Vec<Metric>,

    /// Segments per learned-model forward pass
    #[arg(long)]
    batch_size: Option<usize>,

    /// Never use an accelerator
    #[arg(long)]
    cpu: bool,

    /// Delete downloaded model artefacts after the run
    #[arg(long)]
    purge_cache: bool,

    /// Only log warnings and errors
    #[arg(long, short)]
    quiet: bool,
}

impl Cli {
    fn apply(&self, config: &mut EvalConfig) {
        if let Some(dir) = &self.results_dir {
            config.results_dir = dir.clone();
        }
        if !self.metrics.is_empty() {
            config.metrics = self.metrics.clone();
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if self.cpu {
            config.use_gpu = false;
        }
    }

    fn language_files(&self, config: &EvalConfig) -> Result<LanguageSelection> {
        let Some(input) = &self.input else {
            return Ok(config.select_languages(&self.languages)?);
        };
        let language = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .with_context(|| format!("cannot name a dataset after {}", input.display()))?;
        Ok(LanguageSelection {
            files: BTreeMap::from([(language, input.clone())]),
            unknown: vec![],
        })
    }
}

fn init_logging(quiet: bool) {
    let default = if quiet { "warn" } else { "info" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.quiet);

    let mut config = EvalConfig::load(cli.config.as_deref()).context("loading configuration")?;
    cli.apply(&mut config);
    config.validate().context("validating configuration")?;
    let selection = cli.language_files(&config)?;

    let models = provision_blocking(&config).context("provisioning scoring models")?;
    let summary = run(&config, &selection.files, &models).context("writing results")?;

    let combined = summary.combined(&config);
    if combined.is_empty() {
        warn!("no results to display");
    } else {
        println!("EVALUATION RESULTS");
        println!("{}", combined.render());
    }
    for path in &summary.written {
        info!(path = %path.display(), "wrote");
    }

    if cli.purge_cache {
        let cache = config.cache_dir();
        let cached: Vec<&PathBuf> = models
            .artefact_dirs
            .iter()
            .filter(|dir| dir.starts_with(&cache))
            .collect();
        let removed = remove_model_cache(&cached);
        info!(removed, "model cache purged");
    }

    let skipped: Vec<&str> = selection
        .unknown
        .iter()
        .chain(summary.skipped.iter().map(|(language, _)| language))
        .map(String::as_str)
        .collect();
    if !skipped.is_empty() {
        warn!(skipped = %skipped.join(", "), "some languages were not evaluated");
    }
    if summary.tables.is_empty() {
        bail!(
            "none of the {} dataset(s) could be evaluated; see the warnings above",
            selection.files.len()
        );
    }
    Ok(())
}
