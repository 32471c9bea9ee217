use crate::bleu::compute_bleu;
use crate::comet::{compute_comet, compute_comet_qe};
use crate::config::Metric;
use crate::data_loader::AlignedSegments;
use crate::error::{MetricError, MetricResult};
use crate::meteor::compute_meteor;
use crate::models::Models;

/// Everything needed to score one system's segments with any metric.
pub struct ScoringContext<'a> {
    segments: &'a AlignedSegments,
    models: &'a Models,
    batch_size: usize,
}

impl<'a> ScoringContext<'a> {
    pub fn new(segments: &'a AlignedSegments, models: &'a Models, batch_size: usize) -> Self {
        ScoringContext {
            segments,
            models,
            batch_size,
        }
    }

    pub fn score(&self, metric: Metric) -> MetricResult<f64> {
        let seg = self.segments;
        match metric {
            Metric::Bleu => compute_bleu(&seg.references, &seg.hypotheses),
            Metric::Meteor => compute_meteor(&seg.references, &seg.hypotheses, &self.models.meteor),
            Metric::Comet => compute_comet(
                &seg.sources,
                &seg.references,
                &seg.hypotheses,
                self.learned(metric)?,
                self.batch_size,
            ),
            Metric::CometQe => compute_comet_qe(
                &seg.sources,
                &seg.hypotheses,
                self.learned(metric)?,
                self.batch_size,
            ),
        }
    }

    fn learned(&self, metric: Metric) -> MetricResult<&'a dyn crate::comet::QualityModel> {
        self.models
            .learned(metric)
            .ok_or(MetricError::ModelUnavailable(metric))
    }

    /// Each metric is computed independently; one failure leaves the others intact.
    pub fn score_all(&self, metrics: &[Metric]) -> Vec<(Metric, MetricResult<f64>)> {
        metrics.iter().map(|&metric| (metric, self.score(metric))).collect()
    }
}

/// Score `segments` with every requested metric.
pub fn compute_all_metrics(
    segments: &AlignedSegments,
    models: &Models,
    metrics: &[Metric],
    batch_size: usize,
) -> Vec<(Metric, MetricResult<f64>)> {
    ScoringContext::new(segments, models, batch_size).score_all(metrics)
}
