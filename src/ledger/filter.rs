//! Run queries - conjunctive filters and run-to-run comparison

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::run::{ParamValue, Run};

/// Comparison operator for metric predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricOp {
    /// Latest metric value equals the threshold
    Eq,
    /// Latest metric value is strictly greater
    Gt,
    /// Latest metric value is greater or equal
    Ge,
    /// Latest metric value is strictly less
    Lt,
    /// Latest metric value is less or equal
    Le,
}

impl MetricOp {
    fn apply(self, observed: f64, threshold: f64) -> bool {
        match self {
            Self::Eq => (observed - threshold).abs() < f64::EPSILON,
            Self::Gt => observed > threshold,
            Self::Ge => observed >= threshold,
            Self::Lt => observed < threshold,
            Self::Le => observed <= threshold,
        }
    }
}

/// One metric predicate inside a filter conjunction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPredicate {
    key: String,
    op: MetricOp,
    threshold: f64,
}

/// Conjunctive filter over tag/param equality and metric thresholds.
///
/// An empty filter matches every run.
///
/// # Example
///
/// ```rust
/// use afinar::ledger::{MetricOp, RunFilter};
///
/// let filter = RunFilter::new()
///     .tag("pipeline", "churn-v2")
///     .metric("accuracy", MetricOp::Ge, 0.9);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunFilter {
    tags: Vec<(String, String)>,
    params: Vec<(String, ParamValue)>,
    metrics: Vec<MetricPredicate>,
}

impl RunFilter {
    /// Create an empty filter (matches everything).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Require a tag to equal the given value.
    #[must_use]
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push((key.into(), value.into()));
        self
    }

    /// Require a param to equal the given value.
    #[must_use]
    pub fn param(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// Require the latest value of a metric to satisfy `op threshold`.
    ///
    /// Runs without the metric never match.
    #[must_use]
    pub fn metric(mut self, key: impl Into<String>, op: MetricOp, threshold: f64) -> Self {
        self.metrics.push(MetricPredicate {
            key: key.into(),
            op,
            threshold,
        });
        self
    }

    /// Evaluate the conjunction against a run.
    #[must_use]
    pub fn matches(&self, run: &Run) -> bool {
        let tags_ok = self
            .tags
            .iter()
            .all(|(k, v)| run.tags().get(k).is_some_and(|t| t == v));
        let params_ok = self
            .params
            .iter()
            .all(|(k, v)| run.params().get(k).is_some_and(|p| p == v));
        let metrics_ok = self.metrics.iter().all(|pred| {
            run.latest_metric(&pred.key)
                .is_some_and(|observed| pred.op.apply(observed, pred.threshold))
        });
        tags_ok && params_ok && metrics_ok
    }
}

/// Per-metric comparison column across a set of runs.
///
/// `values[i]` is the latest metric value of run `i`; `deltas[i]` is
/// `values[i] - values[0]` when both are present (the first run is the
/// comparison baseline).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricComparison {
    /// Latest metric value per run, positionally aligned with `run_ids`
    pub values: Vec<Option<f64>>,
    /// Numeric difference against the first run, where defined
    pub deltas: Vec<Option<f64>>,
}

/// Side-by-side comparison of params and metrics across runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunComparison {
    /// The compared run ids, in the order given by the caller
    pub run_ids: Vec<String>,
    /// Every param key present in any run, with per-run values
    pub params: BTreeMap<String, Vec<Option<ParamValue>>>,
    /// Every metric key present in any run, with values and deltas
    pub metrics: BTreeMap<String, MetricComparison>,
}

impl RunComparison {
    /// Build a comparison record from resolved runs.
    #[must_use]
    pub fn from_runs(runs: &[Run]) -> Self {
        let run_ids: Vec<String> = runs.iter().map(|r| r.run_id().to_string()).collect();

        let mut params: BTreeMap<String, Vec<Option<ParamValue>>> = BTreeMap::new();
        for key in runs.iter().flat_map(|r| r.params().keys()) {
            params.entry(key.clone()).or_insert_with(|| {
                runs.iter().map(|r| r.params().get(key).cloned()).collect()
            });
        }

        let mut metrics: BTreeMap<String, MetricComparison> = BTreeMap::new();
        for key in runs.iter().flat_map(|r| r.metrics().keys()) {
            metrics.entry(key.clone()).or_insert_with(|| {
                let values: Vec<Option<f64>> =
                    runs.iter().map(|r| r.latest_metric(key)).collect();
                let baseline = values.first().copied().flatten();
                let deltas = values
                    .iter()
                    .map(|v| match (baseline, v) {
                        (Some(base), Some(v)) => Some(v - base),
                        _ => None,
                    })
                    .collect();
                MetricComparison { values, deltas }
            });
        }

        Self {
            run_ids,
            params,
            metrics,
        }
    }
}
