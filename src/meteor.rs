//! METEOR: unigram alignment in three stages (exact, stem, synonym), a
//! recall-weighted harmonic mean and a fragmentation penalty.

use std::collections::{HashMap, HashSet};

use rust_stemmers::{Algorithm, Stemmer};

use crate::config::{MeteorConfig, Metric};
use crate::error::{ConfigError, MetricError, MetricResult};
use crate::utils::Sequence;

/// Synonym sets keyed by word. Stands in for WordNet.
#[derive(Debug, Default, Clone)]
pub struct SynonymTable {
    sets: HashMap<String, Vec<usize>>,
}

impl SynonymTable {
    /// One set per line, words separated by tabs or commas. `#` starts a comment line.
    pub fn parse(text: &str) -> Self {
        let mut sets: HashMap<String, Vec<usize>> = HashMap::new();
        let lines = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'));
        for (set_id, line) in lines.enumerate() {
            let words: HashSet<String> = line
                .split(['\t', ','])
                .map(|w| w.trim().to_lowercase())
                .filter(|w| !w.is_empty())
                .collect();
            for word in words {
                sets.entry(word).or_default().push(set_id);
            }
        }
        Self { sets }
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn are_synonyms(&self, a: &str, b: &str) -> bool {
        if a == b {
            return true;
        }
        match (self.sets.get(a), self.sets.get(b)) {
            (Some(xs), Some(ys)) => xs.iter().any(|x| ys.contains(x)),
            _ => false,
        }
    }
}

/// Linguistic resources and weights used by METEOR.
pub struct MeteorResources {
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
    stemmer: Option<Stemmer>,
    synonyms: SynonymTable,
}

impl Default for MeteorResources {
    fn default() -> Self {
        let cfg = MeteorConfig::default();
        Self {
            alpha: cfg.alpha,
            beta: cfg.beta,
            gamma: cfg.gamma,
            stemmer: Some(Stemmer::create(Algorithm::English)),
            synonyms: SynonymTable::default(),
        }
    }
}

impl MeteorResources {
    pub fn new(cfg: &MeteorConfig, synonyms: SynonymTable) -> Result<Self, ConfigError> {
        Ok(Self {
            alpha: cfg.alpha,
            beta: cfg.beta,
            gamma: cfg.gamma,
            stemmer: stemmer_for(&cfg.stemmer)?.map(Stemmer::create),
            synonyms,
        })
    }

    pub fn with_synonyms(mut self, synonyms: SynonymTable) -> Self {
        self.synonyms = synonyms;
        self
    }

    fn stem(&self, word: &str) -> String {
        match &self.stemmer {
            Some(stemmer) => stemmer.stem(word).into_owned(),
            None => word.to_string(),
        }
    }
}

fn stemmer_for(language: &str) -> Result<Option<Algorithm>, ConfigError> {
    let algorithm = match language.to_ascii_lowercase().as_str() {
        "none" | "" => return Ok(None),
        "danish" => Algorithm::Danish,
        "dutch" => Algorithm::Dutch,
        "english" => Algorithm::English,
        "finnish" => Algorithm::Finnish,
        "french" => Algorithm::French,
        "german" => Algorithm::German,
        "hungarian" => Algorithm::Hungarian,
        "italian" => Algorithm::Italian,
        "norwegian" => Algorithm::Norwegian,
        "portuguese" => Algorithm::Portuguese,
        "romanian" => Algorithm::Romanian,
        "russian" => Algorithm::Russian,
        "spanish" => Algorithm::Spanish,
        "swedish" => Algorithm::Swedish,
        "turkish" => Algorithm::Turkish,
        other => {
            return Err(ConfigError::Invalid(format!(
                "meteor.stemmer: unsupported language `{other}`"
            )))
        }
    };
    Ok(Some(algorithm))
}

type Enumerated = Vec<(usize, String)>;

// Greedy right-to-left matching; matched words leave both lists.
fn match_enums<F>(hyp: &mut Enumerated, gold: &mut Enumerated, mut is_match: F) -> Vec<(usize, usize)>
where
    F: FnMut(&str, &str) -> bool,
{
    let mut word_match = vec![];
    for i in (0..hyp.len()).rev() {
        for j in (0..gold.len()).rev() {
            if is_match(&hyp[i].1, &gold[j].1) {
                word_match.push((hyp[i].0, gold[j].0));
                hyp.remove(i);
                gold.remove(j);
                break;
            }
        }
    }
    word_match
}

/// Align hypothesis to reference words. Returns (hyp_idx, ref_idx) pairs sorted by hyp index.
fn align_words(pred: &Sequence, gold: &Sequence, resources: &MeteorResources) -> Vec<(usize, usize)> {
    let mut hyp: Enumerated = pred.word_vector.iter().cloned().enumerate().collect();
    let mut reference: Enumerated = gold.word_vector.iter().cloned().enumerate().collect();

    let mut matches = match_enums(&mut hyp, &mut reference, |h, r| h == r);
    if resources.stemmer.is_some() {
        matches.extend(match_enums(&mut hyp, &mut reference, |h, r| {
            resources.stem(h) == resources.stem(r)
        }));
    }
    if !resources.synonyms.is_empty() {
        matches.extend(match_enums(&mut hyp, &mut reference, |h, r| {
            resources.synonyms.are_synonyms(h, r)
        }));
    }
    matches.sort_unstable();
    matches
}

/// Runs of matches adjacent in both hypothesis and reference.
fn count_chunks(matches: &[(usize, usize)]) -> usize {
    if matches.is_empty() {
        return 0;
    }
    1 + matches
        .windows(2)
        .filter(|w| !(w[1].0 == w[0].0 + 1 && w[1].1 == w[0].1 + 1))
        .count()
}

/// METEOR for one segment. Empty segments and segments without matches score 0.
pub fn meteor_score(pred: &Sequence, gold: &Sequence, resources: &MeteorResources) -> f64 {
    if pred.is_empty() || gold.is_empty() {
        return 0.0;
    }
    let matches = align_words(pred, gold, resources);
    let matches_count = matches.len() as f64;
    if matches_count == 0.0 {
        return 0.0;
    }

    let precision = matches_count / pred.n_words as f64;
    let recall = matches_count / gold.n_words as f64;
    let alpha = resources.alpha;
    let denominator = alpha * precision + (1.0 - alpha) * recall;
    if denominator == 0.0 {
        return 0.0;
    }
    let fmean = precision * recall / denominator;

    let frag_frac = count_chunks(&matches) as f64 / matches_count;
    let penalty = resources.gamma * frag_frac.powf(resources.beta);
    (1.0 - penalty) * fmean
}

/// Mean segment METEOR (0-1) over aligned references and hypotheses.
pub fn compute_meteor(
    references: &[String],
    hypotheses: &[String],
    resources: &MeteorResources,
) -> MetricResult<f64> {
    if references.len() != hypotheses.len() {
        return Err(MetricError::LengthMismatch {
            metric: Metric::Meteor,
            detail: format!("{} references, {} hypotheses", references.len(), hypotheses.len()),
        });
    }
    if hypotheses.is_empty() {
        return Err(MetricError::EmptyInput(Metric::Meteor));
    }

    let total: f64 = hypotheses
        .iter()
        .zip(references)
        .map(|(hyp, gold)| {
            meteor_score(&Sequence::lowercased(hyp), &Sequence::lowercased(gold), resources)
        })
        .sum();
    Ok(total / hypotheses.len() as f64)
}
