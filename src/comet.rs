//! COMET and COMET-QE scoring through a loaded model handle.
//!
//! Both metrics feed batches of triplets to a `QualityModel` and report the
//! system score as the mean of the segment scores.

use tracing::debug;

use crate::config::Metric;
use crate::error::{MetricError, MetricResult, ModelError};

/// One segment to score. `reference` is `None` for reference-free scoring.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CometInput<'a> {
    pub src: &'a str,
    pub mt: &'a str,
    pub reference: Option<&'a str>,
}

/// A loaded learned-metric model. Read-only once loaded.
pub trait QualityModel {
    /// Identifier the model was loaded from.
    fn id(&self) -> &str;

    /// Segment-level scores for one batch, in input order.
    fn predict(&self, batch: &[CometInput<'_>]) -> Result<Vec<f64>, ModelError>;
}

/// Batched prediction shared by both metrics.
fn predict_system(
    metric: Metric,
    inputs: &[CometInput<'_>],
    model: &dyn QualityModel,
    batch_size: usize,
) -> MetricResult<f64> {
    if inputs.is_empty() {
        return Err(MetricError::EmptyInput(metric));
    }

    let mut scores = Vec::with_capacity(inputs.len());
    for (idx, batch) in inputs.chunks(batch_size.max(1)).enumerate() {
        debug!(%metric, model = model.id(), batch = idx, size = batch.len(), "predicting");
        let batch_scores = model
            .predict(batch)
            .map_err(|source| MetricError::Model { metric, source })?;
        if batch_scores.len() != batch.len() {
            return Err(MetricError::ScoreCount {
                metric,
                expected: batch.len(),
                got: batch_scores.len(),
            });
        }
        scores.extend(batch_scores);
    }

    Ok(scores.iter().sum::<f64>() / scores.len() as f64)
}

fn check_lengths(metric: Metric, lengths: &[(&str, usize)]) -> MetricResult<()> {
    let first = lengths[0].1;
    if lengths.iter().any(|(_, len)| *len != first) {
        let detail = lengths
            .iter()
            .map(|(name, len)| format!("{len} {name}"))
            .collect::<Vec<_>>()
            .join(", ");
        return Err(MetricError::LengthMismatch { metric, detail });
    }
    Ok(())
}

/// Reference-based COMET system score.
pub fn compute_comet(
    sources: &[String],
    references: &[String],
    hypotheses: &[String],
    model: &dyn QualityModel,
    batch_size: usize,
) -> MetricResult<f64> {
    check_lengths(
        Metric::Comet,
        &[
            ("sources", sources.len()),
            ("references", references.len()),
            ("hypotheses", hypotheses.len()),
        ],
    )?;
    let inputs: Vec<CometInput<'_>> = sources
        .iter()
        .zip(references)
        .zip(hypotheses)
        .map(|((src, gold), mt)| CometInput {
            src: src.as_str(),
            mt: mt.as_str(),
            reference: Some(gold.as_str()),
        })
        .collect();
    predict_system(Metric::Comet, &inputs, model, batch_size)
}

/// Reference-free COMET-QE system score.
pub fn compute_comet_qe(
    sources: &[String],
    hypotheses: &[String],
    model: &dyn QualityModel,
    batch_size: usize,
) -> MetricResult<f64> {
    check_lengths(
        Metric::CometQe,
        &[("sources", sources.len()), ("hypotheses", hypotheses.len())],
    )?;
    let inputs: Vec<CometInput<'_>> = sources
        .iter()
        .zip(hypotheses)
        .map(|(src, mt)| CometInput {
            src: src.as_str(),
            mt: mt.as_str(),
            reference: None,
        })
        .collect();
    predict_system(Metric::CometQe, &inputs, model, batch_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    /// Scores a segment by the length ratio of mt to src and records batch sizes.
    struct LengthRatioModel {
        batches: RefCell<Vec<usize>>,
        fail: bool,
    }

    impl LengthRatioModel {
        fn new() -> Self {
            Self {
                batches: RefCell::new(vec![]),
                fail: false,
            }
        }
    }

    impl QualityModel for LengthRatioModel {
        fn id(&self) -> &str {
            "test/length-ratio"
        }

        fn predict(&self, batch: &[CometInput<'_>]) -> Result<Vec<f64>, ModelError> {
            if self.fail {
                return Err(ModelError::Predict {
                    id: self.id().into(),
                    detail: "out of memory".into(),
                });
            }
            self.batches.borrow_mut().push(batch.len());
            Ok(batch
                .iter()
                .map(|input| input.mt.len() as f64 / input.src.len().max(1) as f64)
                .collect())
        }
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_system_score_is_mean_over_batches() {
        let model = LengthRatioModel::new();
        let src = strings(&["ab", "abcd", "a"]);
        let mt = strings(&["ab", "ab", "aaa"]);
        let gold = strings(&["x", "y", "z"]);
        let score = compute_comet(&src, &gold, &mt, &model, 2).unwrap();
        assert!((score - (1.0 + 0.5 + 3.0) / 3.0).abs() < 1e-9);
        assert_eq!(*model.batches.borrow(), vec![2, 1]);
    }

    #[test]
    fn test_qe_sends_no_reference() {
        struct AssertNoReference;
        impl QualityModel for AssertNoReference {
            fn id(&self) -> &str {
                "test/qe"
            }
            fn predict(&self, batch: &[CometInput<'_>]) -> Result<Vec<f64>, ModelError> {
                assert!(batch.iter().all(|input| input.reference.is_none()));
                Ok(vec![0.25; batch.len()])
            }
        }
        let score =
            compute_comet_qe(&strings(&["a", "b"]), &strings(&["c", "d"]), &AssertNoReference, 8)
                .unwrap();
        assert_eq!(score, 0.25);
    }

    #[test]
    fn test_model_failure_propagates() {
        let model = LengthRatioModel {
            fail: true,
            ..LengthRatioModel::new()
        };
        let err = compute_comet_qe(&strings(&["a"]), &strings(&["b"]), &model, 8).unwrap_err();
        assert!(matches!(
            err,
            MetricError::Model {
                metric: Metric::CometQe,
                ..
            }
        ));
    }

    #[test]
    fn test_length_mismatch_and_empty() {
        let model = LengthRatioModel::new();
        assert!(matches!(
            compute_comet(&strings(&["a"]), &strings(&[]), &strings(&["b"]), &model, 8),
            Err(MetricError::LengthMismatch { .. })
        ));
        assert!(matches!(
            compute_comet(&[], &[], &[], &model, 8),
            Err(MetricError::EmptyInput(Metric::Comet))
        ));
    }

    #[test]
    fn test_wrong_score_count_is_rejected() {
        struct Short;
        impl QualityModel for Short {
            fn id(&self) -> &str {
                "test/short"
            }
            fn predict(&self, _batch: &[CometInput<'_>]) -> Result<Vec<f64>, ModelError> {
                Ok(vec![0.5])
            }
        }
        assert!(matches!(
            compute_comet_qe(&strings(&["a", "b"]), &strings(&["c", "d"]), &Short, 8),
            Err(MetricError::ScoreCount {
                expected: 2,
                got: 1,
                ..
            })
        ));
    }
}
