//! Run record - one tracked unit of work
//!
//! A `Run` owns its params, metrics, artifacts and tags. It is mutated
//! only through the ledger that issued its id, and becomes immutable
//! once finalized (`end_time` is set exactly once).

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Run is currently executing.
    Running,
    /// Run completed successfully.
    Finished,
    /// Run failed with an error.
    Failed,
    /// Run was cancelled before completion.
    Cancelled,
}

/// A scalar parameter value.
///
/// Params are scalars only; later writes to the same key overwrite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// Boolean flag
    Bool(bool),
    /// Integer value
    Int(i64),
    /// Floating-point value
    Float(f64),
    /// String value
    Str(String),
}

impl ParamValue {
    /// Numeric view of the value, if it has one.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            Self::Bool(_) | Self::Str(_) => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Str(s) => write!(f, "{s}"),
        }
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

/// Mapping of parameter name to scalar value.
pub type ParamMap = BTreeMap<String, ParamValue>;

/// One point in a metric time series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    step: u64,
    value: f64,
    timestamp: DateTime<Utc>,
}

impl MetricPoint {
    /// Create a metric point with the current timestamp.
    #[must_use]
    pub fn new(step: u64, value: f64) -> Self {
        Self {
            step,
            value,
            timestamp: Utc::now(),
        }
    }

    /// Get the step number.
    #[must_use]
    pub const fn step(&self) -> u64 {
        self.step
    }

    /// Get the metric value.
    #[must_use]
    pub const fn value(&self) -> f64 {
        self.value
    }

    /// Get the wall-clock timestamp when the point was recorded.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Run record - one tracked unit of work.
///
/// Metrics are ordered sequences of (step, value) points per key; a
/// metric may be logged multiple times (training curves) and the
/// latest-by-step point is the reported value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    run_id: String,
    name: String,
    status: RunStatus,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    params: ParamMap,
    metrics: BTreeMap<String, Vec<MetricPoint>>,
    artifacts: BTreeSet<String>,
    tags: BTreeMap<String, String>,
}

impl Run {
    /// Create a new running run with a fresh id.
    #[must_use]
    pub fn new(name: impl Into<String>, tags: BTreeMap<String, String>) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            status: RunStatus::Running,
            start_time: Utc::now(),
            end_time: None,
            params: ParamMap::new(),
            metrics: BTreeMap::new(),
            artifacts: BTreeSet::new(),
            tags,
        }
    }

    /// Get the run id.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Get the caller-supplied label (not unique).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the current status.
    #[must_use]
    pub const fn status(&self) -> RunStatus {
        self.status
    }

    /// Get the start timestamp.
    #[must_use]
    pub const fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    /// Get the end timestamp; unset while the run is live.
    #[must_use]
    pub const fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    /// Get the params mapping.
    #[must_use]
    pub const fn params(&self) -> &ParamMap {
        &self.params
    }

    /// Get the metric series, keyed by metric name.
    #[must_use]
    pub const fn metrics(&self) -> &BTreeMap<String, Vec<MetricPoint>> {
        &self.metrics
    }

    /// Get the artifact references.
    #[must_use]
    pub const fn artifacts(&self) -> &BTreeSet<String> {
        &self.artifacts
    }

    /// Get the tags mapping.
    #[must_use]
    pub const fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    /// True once `end_run` has sealed this record.
    #[must_use]
    pub const fn is_finalized(&self) -> bool {
        self.end_time.is_some()
    }

    /// Latest-by-step value of a metric, if any point was logged.
    ///
    /// Points at equal steps resolve last-write-wins.
    #[must_use]
    pub fn latest_metric(&self, key: &str) -> Option<f64> {
        let series = self.metrics.get(key)?;
        series
            .iter()
            .enumerate()
            .max_by_key(|(idx, p)| (p.step(), *idx))
            .map(|(_, p)| p.value())
    }

    /// Upsert a param (later writes overwrite).
    pub fn set_param(&mut self, key: impl Into<String>, value: ParamValue) {
        self.params.insert(key.into(), value);
    }

    /// Upsert a tag.
    pub fn set_tag(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.tags.insert(key.into(), value.into());
    }

    /// Append a metric point.
    ///
    /// When `step` is `None`, the next step is the current length of
    /// the series for that key (an auto-incrementing counter per key).
    pub fn append_metric(&mut self, key: impl Into<String>, step: Option<u64>, value: f64) {
        let series = self.metrics.entry(key.into()).or_default();
        let step = step.unwrap_or(series.len() as u64);
        series.push(MetricPoint::new(step, value));
    }

    /// Record an opaque artifact reference. Duplicates are no-ops.
    pub fn add_artifact(&mut self, reference: impl Into<String>) {
        self.artifacts.insert(reference.into());
    }

    /// Seal the run with a final status and set `end_time`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyFinalized`] on any call after the first;
    /// the original `end_time` is left untouched.
    pub fn finalize(&mut self, status: RunStatus) -> Result<()> {
        if self.is_finalized() {
            return Err(Error::AlreadyFinalized(self.run_id.clone()));
        }
        self.status = status;
        self.end_time = Some(Utc::now());
        Ok(())
    }
}
