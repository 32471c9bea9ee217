//! Corpus-level BLEU compatible with sacreBLEU's defaults: 13a tokenization,
//! n-grams up to 4, `exp` smoothing and a corpus-wide brevity penalty.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::Metric;
use crate::error::{MetricError, MetricResult};

const MAX_NGRAMS: usize = 4;

// Stand-in for log(0) so a zero precision drives the geometric mean to zero.
const LOG_ZERO: f64 = -9_999_999_999.0;

static TOKENIZER_13A: Lazy<[(Regex, &'static str); 4]> = Lazy::new(|| {
    let re = |pattern: &str| Regex::new(pattern).expect("static 13a pattern");
    [
        // punctuation and symbols
        (re(r"([\{-~\[-` -&\(-\+:-@/])"), " ${1} "),
        // period and comma unless preceded by a digit
        (re(r"([^0-9])([\.,])"), "${1} ${2} "),
        // period and comma unless followed by a digit
        (re(r"([\.,])([^0-9])"), " ${1} ${2}"),
        // dash when preceded by a digit
        (re(r"([0-9])(-)"), "${1} ${2} "),
    ]
});

/// Tokenize one segment the way mteval-v13a does.
pub fn tokenize_13a(line: &str) -> Vec<String> {
    let mut line = line
        .trim_end()
        .replace("<skipped>", "")
        .replace("-\n", "")
        .replace('\n', " ");
    if line.contains('&') {
        line = line
            .replace("&quot;", "\"")
            .replace("&amp;", "&")
            .replace("&lt;", "<")
            .replace("&gt;", ">");
    }
    let mut line = format!(" {line} ");
    for (re, replacement) in TOKENIZER_13A.iter() {
        line = re.replace_all(&line, *replacement).into_owned();
    }
    line.split_whitespace().map(str::to_string).collect()
}

fn get_ngrams_from_word_vec(word_vec: &[String], ngrams: usize) -> Vec<String> {
    word_vec.windows(ngrams).map(|w| w.join(" ")).collect()
}

fn get_ngram_counts(ngrams_vec: &[String]) -> HashMap<&str, usize> {
    let mut hashmap: HashMap<&str, usize> = HashMap::new();
    for ngram in ngrams_vec {
        *hashmap.entry(ngram.as_str()).or_insert(0) += 1;
    }
    hashmap
}

fn get_matches_clipped(pred_map: &HashMap<&str, usize>, gold_map: &HashMap<&str, usize>) -> usize {
    let mut matches: usize = 0;
    for (ng, pred_count) in pred_map {
        if let Some(gold_count) = gold_map.get(ng) {
            matches += pred_count.min(gold_count);
        }
    }
    matches
}

/// Sufficient statistics accumulated over a corpus.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BleuStats {
    pub hyp_len: usize,
    pub ref_len: usize,
    pub correct: [usize; MAX_NGRAMS],
    pub total: [usize; MAX_NGRAMS],
}

impl BleuStats {
    /// Statistics for a single hypothesis/reference pair.
    pub fn from_segment(hypothesis: &str, reference: &str) -> Self {
        let pred = tokenize_13a(hypothesis);
        let gold = tokenize_13a(reference);

        let mut stats = BleuStats {
            hyp_len: pred.len(),
            ref_len: gold.len(),
            ..Default::default()
        };
        for n in 1..=MAX_NGRAMS {
            let pred_ngrams_vec = get_ngrams_from_word_vec(&pred, n);
            let gold_ngrams_vec = get_ngrams_from_word_vec(&gold, n);
            let pred_ngrams_counts = get_ngram_counts(&pred_ngrams_vec);
            let gold_ngrams_counts = get_ngram_counts(&gold_ngrams_vec);

            stats.total[n - 1] = pred_ngrams_vec.len();
            stats.correct[n - 1] = get_matches_clipped(&pred_ngrams_counts, &gold_ngrams_counts);
        }
        stats
    }

    pub fn add(&mut self, other: &BleuStats) {
        self.hyp_len += other.hyp_len;
        self.ref_len += other.ref_len;
        for n in 0..MAX_NGRAMS {
            self.correct[n] += other.correct[n];
            self.total[n] += other.total[n];
        }
    }

    /// BLEU on the 0-100 scale.
    pub fn score(&self) -> f64 {
        if self.hyp_len == 0 || self.correct.iter().all(|&c| c == 0) {
            return 0.0;
        }

        let brevity_penalty = if self.hyp_len < self.ref_len {
            (1.0 - self.ref_len as f64 / self.hyp_len as f64).exp()
        } else {
            1.0
        };

        let mut precisions = [0.0_f64; MAX_NGRAMS];
        let mut smooth = 1.0;
        for n in 0..MAX_NGRAMS {
            if self.total[n] == 0 {
                break;
            }
            precisions[n] = if self.correct[n] == 0 {
                smooth *= 2.0;
                100.0 / (smooth * self.total[n] as f64)
            } else {
                100.0 * self.correct[n] as f64 / self.total[n] as f64
            };
        }

        let log_sum: f64 = precisions
            .iter()
            .map(|&p| if p == 0.0 { LOG_ZERO } else { p.ln() })
            .sum();
        brevity_penalty * (log_sum / MAX_NGRAMS as f64).exp()
    }
}

/// Corpus BLEU (0-100) of `hypotheses` against a single set of `references`.
pub fn compute_bleu(references: &[String], hypotheses: &[String]) -> MetricResult<f64> {
    if references.len() != hypotheses.len() {
        return Err(MetricError::LengthMismatch {
            metric: Metric::Bleu,
            detail: format!("{} references, {} hypotheses", references.len(), hypotheses.len()),
        });
    }
    if hypotheses.is_empty() {
        return Err(MetricError::EmptyInput(Metric::Bleu));
    }

    let mut stats = BleuStats::default();
    for (hyp, gold) in hypotheses.iter().zip(references) {
        stats.add(&BleuStats::from_segment(hyp, gold));
    }
    Ok(stats.score())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corpus(lines: &[&str]) -> Vec<String> {
        lines.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_tokenize_13a_splits_punctuation() {
        assert_eq!(
            tokenize_13a("Hello, world. It costs 3.50-4 &amp; more!"),
            vec!["Hello", ",", "world", ".", "It", "costs", "3.50", "-", "4", "&", "more", "!"]
        );
    }

    #[test]
    fn test_tokenize_13a_keeps_devanagari_words() {
        assert_eq!(tokenize_13a("नमस्ते दुनिया।"), vec!["नमस्ते", "दुनिया।"]);
    }

    #[test]
    fn test_bleu_perfect_match() {
        let refs = corpus(&["the quick brown fox jumps", "over the lazy dog ."]);
        let score = compute_bleu(&refs, &refs).unwrap();
        assert!((score - 100.0).abs() < 1e-9, "Expected BLEU 100, got {score}");
    }

    #[test]
    fn test_bleu_partial_match_uses_exp_smoothing() {
        let refs = corpus(&["the cat sat on the mat"]);
        let hyps = corpus(&["the cat is on the mat"]);
        let score = compute_bleu(&refs, &hyps).unwrap();
        // p = [5/6, 3/5, 1/4, 1/(2*3)] -> geometric mean 37.99
        assert!((score - 37.9918).abs() < 1e-3, "got {score}");
    }

    #[test]
    fn test_bleu_no_match() {
        let refs = corpus(&["the quick brown fox"]);
        let hyps = corpus(&["cats sleep all day"]);
        assert_eq!(compute_bleu(&refs, &hyps).unwrap(), 0.0);
    }

    #[test]
    fn test_bleu_no_match_across_corpus_skips_smoothing() {
        let refs = corpus(&["a b c d e", "f g h"]);
        let hyps = corpus(&["v w x y z", "p q r s"]);
        let mut stats = BleuStats::default();
        for (h, r) in hyps.iter().zip(&refs) {
            stats.add(&BleuStats::from_segment(h, r));
        }
        assert_eq!(stats.correct, [0; MAX_NGRAMS]);
        assert_eq!(stats.score(), 0.0);
    }

    #[test]
    fn test_bleu_short_segments_near_zero() {
        let refs = corpus(&["नमस्ते दुनिया"]);
        let hyps = corpus(&["नमस्ते विश्व"]);
        let score = compute_bleu(&refs, &hyps).unwrap();
        assert!(score < 1e-6, "Expected BLEU near 0, got {score}");
    }

    #[test]
    fn test_bleu_brevity_penalty() {
        let refs = corpus(&["a b c d e f g h"]);
        let hyps = corpus(&["a b c d"]);
        let score = compute_bleu(&refs, &hyps).unwrap();
        let expected = 100.0 * (1.0_f64 - 8.0 / 4.0).exp();
        assert!((score - expected).abs() < 1e-6, "got {score}, expected {expected}");
    }

    #[test]
    fn test_bleu_repeated_pred_is_clipped() {
        let stats = BleuStats::from_segment("the the the the", "the the");
        assert_eq!(stats.correct[0], 2);
        assert_eq!(stats.total[0], 4);
    }

    #[test]
    fn test_bleu_empty_pred() {
        let refs = corpus(&["the quick brown fox"]);
        let hyps = corpus(&[""]);
        assert_eq!(compute_bleu(&refs, &hyps).unwrap(), 0.0);
    }

    #[test]
    fn test_bleu_length_mismatch() {
        let refs = corpus(&["a", "b"]);
        let hyps = corpus(&["a"]);
        assert!(matches!(
            compute_bleu(&refs, &hyps),
            Err(MetricError::LengthMismatch { .. })
        ));
    }
}
