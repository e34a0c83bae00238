//! Pipeline Orchestrator - ordered stage execution over the Run Ledger
//!
//! A pipeline executes named stages in registration order
//! (validate, prepare, train, evaluate, deploy-marker, or whatever the
//! caller registers), threading each stage's named outputs into the
//! context visible to subsequent stages. Each stage is a pure function
//! of the immutable pipeline config, the accumulated prior outputs, and
//! the opaque dataset, which keeps stage retries and unit testing of
//! individual stages tractable.
//!
//! The first stage failure finalizes the whole run as failed; no
//! subsequent stage runs, and the failing stage's error is retained in
//! the stage results.
//!
//! ## Usage
//!
//! ```rust
//! use afinar::ledger::{ParamMap, RunLedger};
//! use afinar::pipeline::{Pipeline, StageOutput};
//!
//! # fn example() -> afinar::Result<()> {
//! let ledger = RunLedger::in_memory();
//! let mut pipeline = Pipeline::new("churn-v1", ParamMap::new(), &ledger);
//!
//! pipeline.add_stage("validate", |ctx| {
//!     let rows = ctx.data::<Vec<f64>>().len();
//!     Ok(StageOutput::new().with_output("rows", serde_json::json!(rows)))
//! });
//! pipeline.add_stage("evaluate", |_ctx| {
//!     Ok(StageOutput::new().with_metric("accuracy", 0.91))
//! });
//!
//! let run = pipeline.execute(vec![1.0, 2.0, 3.0])?;
//! assert!((run.metrics()["accuracy"] - 0.91).abs() < 1e-12);
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::ledger::{ParamMap, Run, RunLedger, RunStatus};

/// Tag key identifying which pipeline owns a run.
const PIPELINE_TAG: &str = "afinar.pipeline";

/// Tag key carrying the serialized stage results on the primary run.
const STAGES_TAG: &str = "afinar.stages";

/// Lifecycle of a pipeline run. Transitions are
/// `Pending -> Running -> {Finished, Failed}`; the last two are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    /// Created but not yet started
    Pending,
    /// Stages are executing
    Running,
    /// Every stage completed
    Finished,
    /// A stage failed; no subsequent stage ran
    Failed,
}

/// Completion state of one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Stage returned its outputs
    Finished,
    /// Stage raised; its error is retained
    Failed,
}

/// Record of one executed stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    name: String,
    status: StageStatus,
    duration_ms: u64,
    outputs: BTreeMap<String, serde_json::Value>,
    error: Option<String>,
}

impl StageResult {
    /// The stage's registered name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the stage finished or failed.
    #[must_use]
    pub const fn status(&self) -> StageStatus {
        self.status
    }

    /// Wall-clock duration of the stage call.
    #[must_use]
    pub const fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }

    /// The stage's named outputs.
    #[must_use]
    pub const fn outputs(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.outputs
    }

    /// The retained error message for failed stages.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

/// What a stage function returns: named outputs visible to subsequent
/// stages, plus any metrics to aggregate into the run record (by
/// convention the evaluation stage produces them).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageOutput {
    outputs: BTreeMap<String, serde_json::Value>,
    metrics: BTreeMap<String, f64>,
}

impl StageOutput {
    /// Create an empty output.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a named output for downstream stages.
    #[must_use]
    pub fn with_output(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.outputs.insert(name.into(), value);
        self
    }

    /// Add a metric to aggregate into the run record.
    #[must_use]
    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }
}

/// Everything a stage function may read: the immutable pipeline config,
/// the accumulated outputs of all prior stages, and the opaque dataset.
pub struct StageContext<'a> {
    config: &'a ParamMap,
    inputs: &'a BTreeMap<String, serde_json::Value>,
    data: &'a dyn std::any::Any,
}

impl<'a> StageContext<'a> {
    /// The pipeline's immutable configuration.
    #[must_use]
    pub const fn config(&self) -> &ParamMap {
        self.config
    }

    /// All prior stage outputs, keyed by their declared names.
    #[must_use]
    pub const fn inputs(&self) -> &BTreeMap<String, serde_json::Value> {
        self.inputs
    }

    /// One prior stage output by name.
    #[must_use]
    pub fn input(&self, name: &str) -> Option<&serde_json::Value> {
        self.inputs.get(name)
    }

    /// The opaque dataset, downcast to the type the caller supplied to
    /// [`Pipeline::execute`].
    ///
    /// # Panics
    ///
    /// Panics if `T` is not the type passed to `execute`; stages and
    /// the `execute` caller are the same party, so a mismatch is a
    /// programming error, not a runtime condition.
    #[must_use]
    pub fn data<T: 'static>(&self) -> &T {
        self.data
            .downcast_ref::<T>()
            .expect("stage requested a different dataset type than execute received")
    }
}

type StageFn = Box<dyn Fn(&StageContext<'_>) -> anyhow::Result<StageOutput>>;

/// One execution of the orchestrator, tied to a Run in the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    run_id: String,
    status: PipelineStatus,
    stage_results: Vec<StageResult>,
    config: ParamMap,
    metrics: BTreeMap<String, f64>,
}

impl PipelineRun {
    /// The ledger run id this execution is recorded under.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Terminal (or current) status.
    #[must_use]
    pub const fn status(&self) -> PipelineStatus {
        self.status
    }

    /// Per-stage results in execution order; stages after the first
    /// failure are absent.
    #[must_use]
    pub fn stage_results(&self) -> &[StageResult] {
        &self.stage_results
    }

    /// The immutable configuration the run executed under.
    #[must_use]
    pub const fn config(&self) -> &ParamMap {
        &self.config
    }

    /// Aggregate metrics surfaced by metric-producing stages.
    #[must_use]
    pub const fn metrics(&self) -> &BTreeMap<String, f64> {
        &self.metrics
    }

    /// Rebuild a pipeline run from its ledger record.
    #[must_use]
    pub fn from_run(run: &Run) -> Self {
        let status = match run.status() {
            RunStatus::Running => PipelineStatus::Running,
            RunStatus::Finished => PipelineStatus::Finished,
            RunStatus::Failed | RunStatus::Cancelled => PipelineStatus::Failed,
        };
        let stage_results = run
            .tags()
            .get(STAGES_TAG)
            .and_then(|json| serde_json::from_str(json).ok())
            .unwrap_or_default();
        let metrics = run
            .metrics()
            .keys()
            .filter_map(|key| run.latest_metric(key).map(|v| (key.clone(), v)))
            .collect();
        Self {
            run_id: run.run_id().to_string(),
            status,
            stage_results,
            config: run.params().clone(),
            metrics,
        }
    }
}

/// Pipeline Orchestrator - an ordered sequence of named stages recorded
/// through the [`RunLedger`].
///
/// The configuration supplied at construction is immutable for the
/// life of every run, so reusing one orchestrator instance cannot leak
/// state across runs.
pub struct Pipeline<'a> {
    name: String,
    config: ParamMap,
    stages: Vec<(String, StageFn)>,
    ledger: &'a RunLedger,
}

impl<'a> Pipeline<'a> {
    /// Create a pipeline with an immutable configuration.
    #[must_use]
    pub fn new(name: impl Into<String>, config: ParamMap, ledger: &'a RunLedger) -> Self {
        Self {
            name: name.into(),
            config,
            stages: Vec::new(),
            ledger,
        }
    }

    /// The pipeline's name (also its run tag in the ledger).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a stage in call order.
    ///
    /// Re-adding an existing `stage_name` replaces the previously
    /// registered function in place; stage names are unique within one
    /// pipeline instance.
    pub fn add_stage<F>(&mut self, stage_name: impl Into<String>, func: F)
    where
        F: Fn(&StageContext<'_>) -> anyhow::Result<StageOutput> + 'static,
    {
        let stage_name = stage_name.into();
        let func: StageFn = Box::new(func);
        if let Some(slot) = self.stages.iter_mut().find(|(name, _)| *name == stage_name) {
            slot.1 = func;
        } else {
            self.stages.push((stage_name, func));
        }
    }

    /// Execute every registered stage in order against `data`.
    ///
    /// Starts a run in the ledger, measures per-stage duration, threads
    /// stage outputs forward, and aggregates stage metrics into the run
    /// record. On success the run is finalized as finished; on the
    /// first stage failure it is finalized as failed and the error is
    /// re-raised wrapping the stage name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StageExecution`] when a stage fails, and
    /// [`Error::Backend`] when the primary run cannot be started or
    /// finalized. Mid-run logging failures degrade to warnings.
    pub fn execute<D: 'static>(&self, data: D) -> Result<PipelineRun> {
        let mut tags = BTreeMap::new();
        tags.insert(PIPELINE_TAG.to_string(), self.name.clone());
        let run_id = self.ledger.start_run(&self.name, tags)?;
        self.log_or_warn(self.ledger.log_params(&run_id, &self.config));

        let mut stage_results: Vec<StageResult> = Vec::with_capacity(self.stages.len());
        let mut accumulated: BTreeMap<String, serde_json::Value> = BTreeMap::new();
        let mut metrics: BTreeMap<String, f64> = BTreeMap::new();
        let mut failure: Option<(String, anyhow::Error)> = None;

        for (stage_name, func) in &self.stages {
            let context = StageContext {
                config: &self.config,
                inputs: &accumulated,
                data: &data,
            };
            debug!(pipeline = %self.name, stage = %stage_name, "stage starting");
            let started = Instant::now();
            let result = func(&context);
            let duration_ms = started.elapsed().as_millis().try_into().unwrap_or(u64::MAX);

            match result {
                Ok(output) => {
                    stage_results.push(StageResult {
                        name: stage_name.clone(),
                        status: StageStatus::Finished,
                        duration_ms,
                        outputs: output.outputs.clone(),
                        error: None,
                    });
                    accumulated.extend(output.outputs);
                    metrics.extend(output.metrics);
                }
                Err(error) => {
                    stage_results.push(StageResult {
                        name: stage_name.clone(),
                        status: StageStatus::Failed,
                        duration_ms,
                        outputs: BTreeMap::new(),
                        error: Some(error.to_string()),
                    });
                    failure = Some((stage_name.clone(), error));
                    break;
                }
            }
        }

        self.log_or_warn(self.ledger.log_metrics(&run_id, &metrics));
        match serde_json::to_string(&stage_results) {
            Ok(json) => self.log_or_warn(self.ledger.set_tag(&run_id, STAGES_TAG, &json)),
            Err(e) => warn!(error = %e, "could not serialize stage results"),
        }

        match failure {
            None => {
                self.ledger.end_run(&run_id, RunStatus::Finished)?;
                Ok(PipelineRun {
                    run_id,
                    status: PipelineStatus::Finished,
                    stage_results,
                    config: self.config.clone(),
                    metrics,
                })
            }
            Some((stage, source)) => {
                self.ledger.end_run(&run_id, RunStatus::Failed)?;
                Err(Error::StageExecution { stage, source })
            }
        }
    }

    /// Past runs of this pipeline, most recent first.
    ///
    /// Delegates to the ledger's `search_runs` filtered by this
    /// pipeline's name tag.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Backend`] if the ledger backend is unreachable.
    pub fn get_run_history(&self, limit: usize) -> Result<Vec<PipelineRun>> {
        let filter = crate::ledger::RunFilter::new().tag(PIPELINE_TAG, self.name.clone());
        let runs = self.ledger.search_runs(&filter, limit)?;
        Ok(runs.iter().map(PipelineRun::from_run).collect())
    }

    /// Compare ledger records of past runs.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownRun`] if any id is absent.
    pub fn compare_runs(&self, run_ids: &[&str]) -> Result<crate::ledger::RunComparison> {
        self.ledger.compare_runs(run_ids)
    }

    /// Defensive copy of the immutable configuration supplied at
    /// construction.
    #[must_use]
    pub fn get_current_config(&self) -> ParamMap {
        self.config.clone()
    }

    /// Tracking is an observability concern; mid-run write failures
    /// must not abort the computation.
    fn log_or_warn(&self, result: Result<()>) {
        if let Err(e) = result {
            warn!(pipeline = %self.name, error = %e, "ledger write failed mid-run");
        }
    }
}
