//! Settings for an evaluation run.
//!
//! Every key is optional in the TOML file; missing keys take the defaults
//! below. The resolved `EvalConfig` is built once and passed by reference to
//! provisioning, loading and the evaluator.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Deserializer};
use tracing::warn;

use crate::error::ConfigError;

pub const DEFAULT_COMET_MODEL: &str = "Unbabel/wmt22-comet-da";
pub const DEFAULT_COMET_QE_MODEL: &str = "Unbabel/wmt20-comet-qe-da";
pub const DEFAULT_HUB_ENDPOINT: &str = "https://huggingface.co";
pub const DEFAULT_DECIMAL_PLACES: u32 = 4;

/// Columns every dataset must carry.
pub const REQUIRED_COLUMNS: [&str; 2] = ["Source", "Reference"];

/// Environment variable naming the config file when `--config` is absent.
pub const CONFIG_ENV: &str = "MTEVAL_CONFIG";

/// Metric names are read loosely everywhere: `BLEU`, `bleu` and `comet-qe` all parse.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum Metric {
    Bleu,
    Meteor,
    Comet,
    CometQe,
}

impl Metric {
    pub const ALL: [Metric; 4] = [Metric::Bleu, Metric::Meteor, Metric::Comet, Metric::CometQe];

    /// Column header used in result files.
    pub fn name(self) -> &'static str {
        match self {
            Metric::Bleu => "BLEU",
            Metric::Meteor => "METEOR",
            Metric::Comet => "COMET",
            Metric::CometQe => "COMET_QE",
        }
    }

    /// Whether the metric is computed by a learned model.
    pub fn is_learned(self) -> bool {
        matches!(self, Metric::Comet | Metric::CometQe)
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<String> for Metric {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl FromStr for Metric {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "BLEU" => Ok(Metric::Bleu),
            "METEOR" => Ok(Metric::Meteor),
            "COMET" => Ok(Metric::Comet),
            "COMET_QE" | "COMETQE" => Ok(Metric::CometQe),
            _ => Err(ConfigError::UnknownMetric(s.to_string())),
        }
    }
}

/// METEOR scoring parameters and linguistic resources.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MeteorConfig {
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
    /// Snowball stemmer language, or "none" to skip the stem stage.
    pub stemmer: String,
    /// Optional synonym lexicon, one synonym set per line.
    pub synonyms: Option<PathBuf>,
}

impl Default for MeteorConfig {
    fn default() -> Self {
        Self {
            alpha: 0.9,
            beta: 3.0,
            gamma: 0.5,
            stemmer: "english".to_string(),
            synonyms: None,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EvalConfig {
    /// Hub repository id or local directory of the reference-based model.
    ///
    /// Either must provide `model.pt` (a TorchScript export of the estimator)
    /// and `tokenizer.json`. Repositories that only ship a training checkpoint
    /// cannot be loaded; export them and point this at the export directory.
    pub comet_model: String,
    /// Same contract as `comet_model`, for the reference-free model.
    pub comet_qe_model: String,
    pub batch_size: usize,
    /// Set to false to force CPU usage.
    pub use_gpu: bool,
    pub data_dir: PathBuf,
    pub results_dir: PathBuf,
    /// Language name to input file; relative paths resolve against `data_dir`.
    pub languages: BTreeMap<String, PathBuf>,
    /// Per-metric overrides, merged over the defaults.
    #[serde(deserialize_with = "merge_decimal_places")]
    pub decimal_places: BTreeMap<Metric, u32>,
    pub metrics: Vec<Metric>,
    pub hub_endpoint: String,
    pub cache_dir: Option<PathBuf>,
    pub meteor: MeteorConfig,
}

fn default_decimal_places() -> BTreeMap<Metric, u32> {
    BTreeMap::from([
        (Metric::Bleu, 2),
        (Metric::Meteor, 4),
        (Metric::Comet, 4),
        (Metric::CometQe, 4),
    ])
}

fn merge_decimal_places<'de, D>(deserializer: D) -> Result<BTreeMap<Metric, u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let overrides = BTreeMap::<Metric, u32>::deserialize(deserializer)?;
    let mut places = default_decimal_places();
    places.extend(overrides);
    Ok(places)
}

/// Learned metrics are requested by default only when their backend is compiled in.
pub fn default_metrics() -> Vec<Metric> {
    if cfg!(feature = "comet") {
        Metric::ALL.to_vec()
    } else {
        vec![Metric::Bleu, Metric::Meteor]
    }
}

/// Languages resolved from a selection, plus the names the mapping lacks.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LanguageSelection {
    pub files: BTreeMap<String, PathBuf>,
    pub unknown: Vec<String>,
}

impl Default for EvalConfig {
    fn default() -> Self {
        let languages = ["Hindi", "Marathi", "Odia", "Tamil"]
            .into_iter()
            .map(|lang| (lang.to_string(), PathBuf::from(format!("{lang}.csv"))))
            .collect();

        Self {
            comet_model: DEFAULT_COMET_MODEL.to_string(),
            comet_qe_model: DEFAULT_COMET_QE_MODEL.to_string(),
            batch_size: 8,
            use_gpu: true,
            data_dir: PathBuf::from("../Dataset/Literary"),
            results_dir: PathBuf::from("../Results"),
            languages,
            decimal_places: default_decimal_places(),
            metrics: default_metrics(),
            hub_endpoint: std::env::var("HF_ENDPOINT")
                .unwrap_or_else(|_| DEFAULT_HUB_ENDPOINT.to_string()),
            cache_dir: None,
            meteor: MeteorConfig::default(),
        }
    }
}

impl EvalConfig {
    /// Read a TOML file, or return the defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let cfg: Self = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be at least 1".into()));
        }
        if self.metrics.is_empty() {
            return Err(ConfigError::Invalid("no metrics requested".into()));
        }
        if let Some((key, places)) = self.decimal_places.iter().find(|(_, p)| **p > 12) {
            return Err(ConfigError::Invalid(format!(
                "decimal_places.{key} = {places} exceeds 12"
            )));
        }
        let m = &self.meteor;
        if !(0.0..=1.0).contains(&m.alpha) || m.beta < 0.0 || !(0.0..=1.0).contains(&m.gamma) {
            return Err(ConfigError::Invalid(
                "meteor.alpha and meteor.gamma must lie in [0, 1], meteor.beta must be >= 0".into(),
            ));
        }
        Ok(())
    }

    /// Decimal places for a metric's output column.
    pub fn decimal_places(&self, metric: Metric) -> u32 {
        self.decimal_places
            .get(&metric)
            .copied()
            .unwrap_or(DEFAULT_DECIMAL_PLACES)
    }

    /// The full language mapping with paths resolved against `data_dir`.
    pub fn language_files(&self) -> BTreeMap<String, PathBuf> {
        self.languages
            .iter()
            .map(|(lang, path)| (lang.clone(), self.data_dir.join(path)))
            .collect()
    }

    /// Restrict the mapping to the given languages; an empty selection keeps all.
    ///
    /// Names missing from the mapping are reported and skipped. Only a
    /// selection with nothing resolvable is an error.
    pub fn select_languages(&self, selection: &[String]) -> Result<LanguageSelection, ConfigError> {
        let all = self.language_files();
        if selection.is_empty() {
            return Ok(LanguageSelection {
                files: all,
                unknown: vec![],
            });
        }

        let mut picked = LanguageSelection::default();
        for lang in selection {
            match all.get(lang) {
                Some(path) => {
                    picked.files.insert(lang.clone(), path.clone());
                }
                None => {
                    warn!(language = %lang, "skipping language missing from the mapping");
                    picked.unknown.push(lang.clone());
                }
            }
        }
        if picked.files.is_empty() {
            return Err(ConfigError::UnknownLanguage(picked.unknown.join(", ")));
        }
        Ok(picked)
    }

    pub fn requests(&self, metric: Metric) -> bool {
        self.metrics.contains(&metric)
    }

    /// Requested metrics in first-mention order, without repeats.
    pub fn metric_columns(&self) -> Vec<Metric> {
        let mut columns: Vec<Metric> = vec![];
        for &metric in &self.metrics {
            if !columns.contains(&metric) {
                columns.push(metric);
            }
        }
        columns
    }

    /// Where downloaded model artefacts are kept.
    pub fn cache_dir(&self) -> PathBuf {
        if let Some(dir) = &self.cache_dir {
            return dir.clone();
        }
        directories::ProjectDirs::from("", "", "mteval")
            .map(|dirs| dirs.cache_dir().join("models"))
            .unwrap_or_else(|| PathBuf::from(".mteval-cache"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_match_the_literary_setup() {
        let cfg = EvalConfig::default();
        assert_eq!(cfg.batch_size, 8);
        assert_eq!(cfg.decimal_places(Metric::Bleu), 2);
        assert_eq!(cfg.decimal_places(Metric::CometQe), 4);
        assert_eq!(
            cfg.language_files().get("Odia"),
            Some(&PathBuf::from("../Dataset/Literary/Odia.csv"))
        );
        assert_eq!(cfg.metrics, default_metrics());
    }

    #[cfg(not(feature = "comet"))]
    #[test]
    fn test_default_metrics_without_backend_are_lexical() {
        assert_eq!(EvalConfig::default().metrics, vec![Metric::Bleu, Metric::Meteor]);
    }

    #[cfg(feature = "comet")]
    #[test]
    fn test_default_metrics_with_backend_are_complete() {
        assert_eq!(EvalConfig::default().metrics, Metric::ALL.to_vec());
    }

    #[test]
    fn test_partial_toml_keeps_remaining_defaults() {
        let cfg: EvalConfig = toml::from_str(
            r#"
            batch_size = 2
            data_dir = "data"
            metrics = ["BLEU", "COMET_QE"]

            [languages]
            Hindi = "hi.csv"

            [decimal_places]
            BLEU = 1

            [meteor]
            stemmer = "none"
            "#,
        )
        .unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.batch_size, 2);
        assert_eq!(cfg.metrics, vec![Metric::Bleu, Metric::CometQe]);
        assert_eq!(cfg.decimal_places(Metric::Bleu), 1);
        assert_eq!(cfg.decimal_places(Metric::Meteor), 4);
        assert_eq!(cfg.comet_model, DEFAULT_COMET_MODEL);
        assert_eq!(cfg.meteor.alpha, 0.9);
        assert_eq!(
            cfg.language_files().into_iter().collect::<Vec<_>>(),
            vec![("Hindi".to_string(), PathBuf::from("data/hi.csv"))]
        );
    }

    #[test]
    fn test_decimal_places_override_merges_over_defaults() {
        let cfg: EvalConfig = toml::from_str("[decimal_places]\nCOMET = 3\n").unwrap();
        assert_eq!(cfg.decimal_places(Metric::Comet), 3);
        assert_eq!(cfg.decimal_places(Metric::Bleu), 2);
        assert_eq!(cfg.decimal_places(Metric::CometQe), 4);
    }

    #[test]
    fn test_decimal_places_keys_parse_loosely() {
        let cfg: EvalConfig =
            toml::from_str("metrics = [\"bleu\"]\n[decimal_places]\nbleu = 1\ncomet-qe = 1\n").unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.metrics, vec![Metric::Bleu]);
        assert_eq!(cfg.decimal_places(Metric::Bleu), 1);
        assert_eq!(cfg.decimal_places(Metric::CometQe), 1);
        assert_eq!(cfg.decimal_places(Metric::Meteor), 4);
    }

    #[test]
    fn test_unknown_decimal_places_key_fails_to_parse() {
        assert!(toml::from_str::<EvalConfig>("[decimal_places]\nCHRF = 2\n").is_err());
    }

    #[test]
    fn test_unknown_language_is_skipped() {
        let cfg = EvalConfig::default();
        let picked = cfg
            .select_languages(&["Hindi".to_string(), "Klingon".to_string()])
            .unwrap();
        assert_eq!(picked.files.keys().collect::<Vec<_>>(), vec!["Hindi"]);
        assert_eq!(picked.unknown, vec!["Klingon".to_string()]);

        let all = cfg.select_languages(&[]).unwrap();
        assert_eq!(all.files.len(), 4);
        assert!(all.unknown.is_empty());
    }

    #[test]
    fn test_selection_with_no_known_language_fails() {
        let cfg = EvalConfig::default();
        let err = cfg.select_languages(&["Klingon".to_string()]).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownLanguage(lang) if lang == "Klingon"));
    }

    #[test]
    fn test_invalid_values_fail_validation() {
        let mut cfg = EvalConfig::default();
        cfg.batch_size = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = EvalConfig::default();
        cfg.decimal_places.insert(Metric::Meteor, 13);
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_metric_names_parse_loosely() {
        assert_eq!("comet-qe".parse::<Metric>().unwrap(), Metric::CometQe);
        assert_eq!("Bleu".parse::<Metric>().unwrap(), Metric::Bleu);
        assert!("ter".parse::<Metric>().is_err());
    }
}
