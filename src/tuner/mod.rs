//! Hyperparameter Tuner - grid, random, and Bayesian search
//!
//! All three strategies share one trial engine: candidates are
//! evaluated through caller-supplied train/eval functions, optionally
//! under deterministic k-fold cross-validation, and every trial is
//! persisted to the [`RunLedger`] as a child run before the search
//! moves on. A search interrupted mid-way therefore leaves a complete,
//! queryable record of everything evaluated.
//!
//! Trial-level failures are isolated: a candidate whose train or eval
//! call fails is recorded with a failed status and excluded from
//! best-score computation, and the search continues. Ledger write
//! failures inside a trial degrade to warnings; tracking is an
//! observability concern, never a correctness dependency of the search.
//!
//! ## Usage
//!
//! ```rust
//! use afinar::ledger::{ParamValue, RunLedger};
//! use afinar::tuner::{ParamGrid, Tuner, TunerConfig};
//!
//! # fn example() -> afinar::Result<()> {
//! let ledger = RunLedger::in_memory();
//! let tuner = Tuner::new(&ledger, TunerConfig::new())?;
//!
//! let grid = ParamGrid::new()
//!     .add("x", vec![ParamValue::Int(1), ParamValue::Int(2)])
//!     .add("y", vec![ParamValue::Int(10), ParamValue::Int(20)]);
//!
//! let data: Vec<f64> = vec![0.0; 8];
//! let outcome = tuner.grid_search(
//!     &grid,
//!     &data,
//!     |params, _data| {
//!         let x = params["x"].as_f64().unwrap();
//!         let y = params["y"].as_f64().unwrap();
//!         Ok(x + y)
//!     },
//!     |model, _data| Ok(*model),
//! )?;
//! assert!((outcome.best.score - 22.0).abs() < 1e-12);
//! # Ok(())
//! # }
//! ```

mod bayes;
mod space;

pub use space::{ParamDistribution, ParamDistributions, ParamDomain, ParamGrid, ParamSpace};

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::ledger::{ParamMap, RunLedger, RunStatus};

use bayes::Surrogate;

/// Improvements at or below this tolerance do not reset early-stopping
/// patience.
const IMPROVEMENT_TOLERANCE: f64 = 1e-9;

/// Caller-visible cancellation signal, checked between trials.
///
/// An in-flight train/eval call is allowed to finish so the trial's
/// record stays intact; the search then stops and reports everything
/// evaluated so far.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a token in the not-cancelled state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// How a search ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStatus {
    /// Budget exhausted or early stopping triggered
    Finished,
    /// Caller cancelled between trials
    Cancelled,
}

/// Outcome of one evaluated candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialOutcome {
    trial_index: usize,
    params: ParamMap,
    cv_scores: Vec<f64>,
    score: Option<f64>,
    run_id: Option<String>,
    error: Option<String>,
}

impl TrialOutcome {
    /// Position in the search, assigned at dispatch time.
    #[must_use]
    pub const fn trial_index(&self) -> usize {
        self.trial_index
    }

    /// The configuration under test.
    #[must_use]
    pub const fn params(&self) -> &ParamMap {
        &self.params
    }

    /// Per-fold scores; empty unless cross-validation ran.
    #[must_use]
    pub fn cv_scores(&self) -> &[f64] {
        &self.cv_scores
    }

    /// Aggregate score; `None` for failed trials.
    #[must_use]
    pub const fn score(&self) -> Option<f64> {
        self.score
    }

    /// Child run id in the ledger, if the write went through.
    #[must_use]
    pub fn run_id(&self) -> Option<&str> {
        self.run_id.as_deref()
    }

    /// The train/eval error message for failed trials.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

/// The winning configuration of a search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestTrial {
    /// The configuration
    pub params: ParamMap,
    /// Its aggregate score
    pub score: f64,
}

/// Aggregate record of a completed (or cancelled) search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSummary {
    search_id: String,
    parent_run_id: Option<String>,
    status: SearchStatus,
    maximize: bool,
    trials: Vec<TrialOutcome>,
}

impl SearchSummary {
    /// Identifying tag shared by the parent run and every trial run.
    #[must_use]
    pub fn search_id(&self) -> &str {
        &self.search_id
    }

    /// The parent run id, if the ledger write went through.
    #[must_use]
    pub fn parent_run_id(&self) -> Option<&str> {
        self.parent_run_id.as_deref()
    }

    /// Whether the search finished or was cancelled.
    #[must_use]
    pub const fn status(&self) -> SearchStatus {
        self.status
    }

    /// Every trial actually evaluated, in dispatch order.
    #[must_use]
    pub fn trials(&self) -> &[TrialOutcome] {
        &self.trials
    }

    /// Number of trials actually evaluated.
    #[must_use]
    pub fn total_trials(&self) -> usize {
        self.trials.len()
    }

    /// Best aggregate score among successful trials.
    #[must_use]
    pub fn best_score(&self) -> Option<f64> {
        self.ranked().first().map(|t| t.score.unwrap_or(f64::NAN))
    }

    /// Mean aggregate score over successful trials.
    #[must_use]
    pub fn mean_score(&self) -> Option<f64> {
        let scores: Vec<f64> = self.trials.iter().filter_map(|t| t.score).collect();
        if scores.is_empty() {
            None
        } else {
            Some(scores.iter().sum::<f64>() / scores.len() as f64)
        }
    }

    /// The `n` best trials, best first, ties broken by earlier
    /// `trial_index`.
    #[must_use]
    pub fn get_top_results(&self, n: usize) -> Vec<BestTrial> {
        self.ranked()
            .into_iter()
            .take(n)
            .map(|t| BestTrial {
                params: t.params.clone(),
                score: t.score.unwrap_or(f64::NAN),
            })
            .collect()
    }

    fn ranked(&self) -> Vec<&TrialOutcome> {
        let mut successful: Vec<&TrialOutcome> =
            self.trials.iter().filter(|t| t.score.is_some()).collect();
        successful.sort_by(|a, b| {
            let sa = oriented(a.score.unwrap_or(f64::NAN), self.maximize);
            let sb = oriented(b.score.unwrap_or(f64::NAN), self.maximize);
            sb.partial_cmp(&sa)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.trial_index.cmp(&b.trial_index))
        });
        successful
    }
}

/// Uniform result shape shared by all three strategies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchOutcome {
    /// The best trial by aggregate score
    pub best: BestTrial,
    /// The full record of the search
    pub summary: SearchSummary,
}

/// Tuner options, validated at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TunerConfig {
    maximize: bool,
    cv_folds: usize,
    early_stopping_patience: usize,
    n_iter: usize,
    n_calls: usize,
    random_state: Option<u64>,
    parallelism: usize,
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self {
            maximize: true,
            cv_folds: 1,
            early_stopping_patience: 0,
            n_iter: 10,
            n_calls: 25,
            random_state: None,
            parallelism: 1,
        }
    }
}

impl TunerConfig {
    /// Create the default configuration: maximize, no cross-validation,
    /// no early stopping, sequential evaluation.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Maximize (default) or minimize the score.
    #[must_use]
    pub const fn maximize(mut self, maximize: bool) -> Self {
        self.maximize = maximize;
        self
    }

    /// Number of cross-validation folds; 1 disables CV.
    #[must_use]
    pub const fn cv_folds(mut self, folds: usize) -> Self {
        self.cv_folds = folds;
        self
    }

    /// Consecutive non-improving trials tolerated before stopping;
    /// 0 disables early stopping.
    #[must_use]
    pub const fn early_stopping_patience(mut self, patience: usize) -> Self {
        self.early_stopping_patience = patience;
        self
    }

    /// Number of random-search samples.
    #[must_use]
    pub const fn n_iter(mut self, n: usize) -> Self {
        self.n_iter = n;
        self
    }

    /// Trial budget for Bayesian optimization.
    #[must_use]
    pub const fn n_calls(mut self, n: usize) -> Self {
        self.n_calls = n;
        self
    }

    /// Seed for reproducible sampling.
    #[must_use]
    pub const fn random_state(mut self, seed: u64) -> Self {
        self.random_state = Some(seed);
        self
    }

    /// Bounded worker count for grid/random trial evaluation;
    /// 1 keeps everything sequential.
    #[must_use]
    pub const fn parallelism(mut self, workers: usize) -> Self {
        self.parallelism = workers;
        self
    }

    /// Build a configuration from a flat mapping of recognized options.
    ///
    /// Recognized keys: `maximize`, `cv_folds`,
    /// `early_stopping_patience`, `n_iter`, `n_calls`, `random_state`,
    /// `parallelism`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for unrecognized keys, wrong value
    /// types, or out-of-range values.
    pub fn from_map(options: &BTreeMap<String, serde_json::Value>) -> Result<Self> {
        let mut config = Self::default();
        for (key, value) in options {
            match key.as_str() {
                "maximize" => config.maximize = as_bool(key, value)?,
                "cv_folds" => config.cv_folds = as_usize(key, value)?,
                "early_stopping_patience" => {
                    config.early_stopping_patience = as_usize(key, value)?;
                }
                "n_iter" => config.n_iter = as_usize(key, value)?,
                "n_calls" => config.n_calls = as_usize(key, value)?,
                "random_state" => config.random_state = Some(as_u64(key, value)?),
                "parallelism" => config.parallelism = as_usize(key, value)?,
                other => {
                    return Err(Error::Config(format!(
                        "unrecognized tuner option '{other}'"
                    )));
                }
            }
        }
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.cv_folds == 0 {
            return Err(Error::Config("cv_folds must be at least 1".to_string()));
        }
        if self.n_iter == 0 {
            return Err(Error::Config("n_iter must be at least 1".to_string()));
        }
        if self.n_calls == 0 {
            return Err(Error::Config("n_calls must be at least 1".to_string()));
        }
        if self.parallelism == 0 {
            return Err(Error::Config("parallelism must be at least 1".to_string()));
        }
        Ok(())
    }
}

fn as_bool(key: &str, value: &serde_json::Value) -> Result<bool> {
    value
        .as_bool()
        .ok_or_else(|| Error::Config(format!("option '{key}' expects a boolean")))
}

fn as_u64(key: &str, value: &serde_json::Value) -> Result<u64> {
    value
        .as_u64()
        .ok_or_else(|| Error::Config(format!("option '{key}' expects a non-negative integer")))
}

fn as_usize(key: &str, value: &serde_json::Value) -> Result<usize> {
    Ok(usize::try_from(as_u64(key, value)?)
        .map_err(|_| Error::Config(format!("option '{key}' is out of range")))?)
}

const fn oriented(score: f64, maximize: bool) -> f64 {
    if maximize {
        score
    } else {
        -score
    }
}

/// Early-stopping tracker over oriented scores.
struct Patience {
    patience: usize,
    best: Option<f64>,
    stale: usize,
}

impl Patience {
    const fn new(patience: usize) -> Self {
        Self {
            patience,
            best: None,
            stale: 0,
        }
    }

    /// Record a trial result; returns true when the search should stop.
    fn update(&mut self, oriented_score: Option<f64>) -> bool {
        match (oriented_score, self.best) {
            (Some(score), best)
                if best.map_or(true, |b| score > b + IMPROVEMENT_TOLERANCE) =>
            {
                self.best = Some(score);
                self.stale = 0;
            }
            // Failed trials count against patience too
            _ => self.stale += 1,
        }
        self.patience > 0 && self.stale >= self.patience
    }
}

/// Raw result of one train/eval (or k-fold) evaluation.
struct Evaluation {
    cv_scores: Vec<f64>,
    score: std::result::Result<f64, String>,
}

/// Hyperparameter Tuner over a [`RunLedger`].
///
/// Holds no state beyond the lifetime of a single search call; the
/// ledger is the source of truth for later comparison.
pub struct Tuner<'a> {
    ledger: &'a RunLedger,
    config: TunerConfig,
    cancel: CancelToken,
}

impl<'a> Tuner<'a> {
    /// Create a tuner.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for out-of-range options.
    pub fn new(ledger: &'a RunLedger, config: TunerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            ledger,
            config,
            cancel: CancelToken::new(),
        })
    }

    /// Attach a cancellation token, checked between trials.
    #[must_use]
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// The validated configuration in effect.
    #[must_use]
    pub const fn config(&self) -> &TunerConfig {
        &self.config
    }

    /// Exhaustive search over the full Cartesian product of `grid`.
    ///
    /// Every combination is logged as a child run, win or lose. Ties on
    /// the best score resolve to the earliest-dispatched trial.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a degenerate grid or a dataset
    /// smaller than `cv_folds`, and [`Error::NoSuccessfulTrial`] when
    /// every candidate fails.
    pub fn grid_search<D, M, T, E>(
        &self,
        grid: &ParamGrid,
        data: &[D],
        train_fn: T,
        eval_fn: E,
    ) -> Result<SearchOutcome>
    where
        D: Clone + Sync,
        T: Fn(&ParamMap, &[D]) -> anyhow::Result<M> + Sync,
        E: Fn(&M, &[D]) -> anyhow::Result<f64> + Sync,
    {
        grid.validate()?;
        self.check_dataset(data)?;
        let candidates = grid.combinations();
        self.run_enumerated("grid_search", candidates, data, &train_fn, &eval_fn)
    }

    /// Draws `n_iter` independent samples from the per-parameter
    /// distributions.
    ///
    /// Sampling is seeded by `random_state` when set, making the whole
    /// search reproducible. Same CV, logging, and tie-break behavior as
    /// [`Self::grid_search`].
    ///
    /// # Errors
    ///
    /// Same conditions as [`Self::grid_search`].
    pub fn random_search<D, M, T, E>(
        &self,
        distributions: &ParamDistributions,
        data: &[D],
        train_fn: T,
        eval_fn: E,
    ) -> Result<SearchOutcome>
    where
        D: Clone + Sync,
        T: Fn(&ParamMap, &[D]) -> anyhow::Result<M> + Sync,
        E: Fn(&M, &[D]) -> anyhow::Result<f64> + Sync,
    {
        distributions.validate()?;
        self.check_dataset(data)?;
        let mut rng = self.rng();
        let candidates: Vec<ParamMap> = (0..self.config.n_iter)
            .map(|_| distributions.sample(&mut rng))
            .collect();
        self.run_enumerated("random_search", candidates, data, &train_fn, &eval_fn)
    }

    /// Sequential model-based search over `space` with an `n_calls`
    /// budget.
    ///
    /// Uniform random warm-up covers `max(1, n_calls / 4)` trials;
    /// afterwards each proposal maximizes an upper-confidence-bound
    /// acquisition over the surrogate's predictions. While the
    /// surrogate has no successful observation, proposals stay uniform
    /// random, so the search always degrades gracefully.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Self::grid_search`].
    pub fn bayesian_optimization<D, M, T, E>(
        &self,
        space: &ParamSpace,
        data: &[D],
        train_fn: T,
        eval_fn: E,
    ) -> Result<SearchOutcome>
    where
        D: Clone + Sync,
        T: Fn(&ParamMap, &[D]) -> anyhow::Result<M> + Sync,
        E: Fn(&M, &[D]) -> anyhow::Result<f64> + Sync,
    {
        space.validate()?;
        self.check_dataset(data)?;

        let search = SearchHandle::open(self, "bayesian_optimization");
        let mut rng = self.rng();
        let warmup = (self.config.n_calls / 4).max(1);
        let mut surrogate = Surrogate::new(space);
        let mut patience = Patience::new(self.config.early_stopping_patience);
        let mut trials = Vec::with_capacity(self.config.n_calls);
        let mut cancelled = false;

        for trial_index in 0..self.config.n_calls {
            if self.cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            let params = if trial_index < warmup {
                space.sample(&mut rng)
            } else {
                surrogate.propose(&mut rng)
            };
            let outcome = self.run_trial(&search, trial_index, params, data, &train_fn, &eval_fn);
            if let Some(score) = outcome.score {
                surrogate.observe(outcome.params.clone(), oriented(score, self.config.maximize));
            }
            let stop = patience.update(
                outcome
                    .score
                    .map(|s| oriented(s, self.config.maximize)),
            );
            trials.push(outcome);
            if stop {
                debug!(
                    trials = trials.len(),
                    observations = surrogate.observation_count(),
                    "early stopping triggered"
                );
                break;
            }
        }

        search.close(self, trials, cancelled)
    }

    /// Shared driver for the pre-enumerated strategies (grid/random).
    fn run_enumerated<D, M, T, E>(
        &self,
        strategy: &str,
        candidates: Vec<ParamMap>,
        data: &[D],
        train_fn: &T,
        eval_fn: &E,
    ) -> Result<SearchOutcome>
    where
        D: Clone + Sync,
        T: Fn(&ParamMap, &[D]) -> anyhow::Result<M> + Sync,
        E: Fn(&M, &[D]) -> anyhow::Result<f64> + Sync,
    {
        let search = SearchHandle::open(self, strategy);
        let indexed: Vec<(usize, ParamMap)> = candidates.into_iter().enumerate().collect();
        let mut patience = Patience::new(self.config.early_stopping_patience);
        let mut trials = Vec::with_capacity(indexed.len());
        let mut cancelled = false;

        // Waves of `parallelism` trials; cancellation and early
        // stopping are checked at wave boundaries, which for the
        // default parallelism of 1 means between trials.
        for wave in indexed.chunks(self.config.parallelism.max(1)) {
            if self.cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            let outcomes = self.evaluate_wave(&search, wave, data, train_fn, eval_fn)?;
            // Every outcome of the wave is already persisted, so the
            // summary must report all of them even when one trips the
            // patience tracker mid-wave.
            let mut stop = false;
            for outcome in outcomes {
                stop |= patience.update(
                    outcome
                        .score
                        .map(|s| oriented(s, self.config.maximize)),
                );
                trials.push(outcome);
            }
            if stop {
                debug!(trials = trials.len(), strategy, "early stopping triggered");
                break;
            }
        }

        search.close(self, trials, cancelled)
    }

    /// Evaluate one wave of candidates, sequentially or on the bounded
    /// rayon pool.
    fn evaluate_wave<D, M, T, E>(
        &self,
        search: &SearchHandle,
        wave: &[(usize, ParamMap)],
        data: &[D],
        train_fn: &T,
        eval_fn: &E,
    ) -> Result<Vec<TrialOutcome>>
    where
        D: Clone + Sync,
        T: Fn(&ParamMap, &[D]) -> anyhow::Result<M> + Sync,
        E: Fn(&M, &[D]) -> anyhow::Result<f64> + Sync,
    {
        if self.config.parallelism <= 1 || wave.len() <= 1 {
            return Ok(wave
                .iter()
                .map(|(index, params)| {
                    self.run_trial(search, *index, params.clone(), data, train_fn, eval_fn)
                })
                .collect());
        }
        self.evaluate_wave_parallel(search, wave, data, train_fn, eval_fn)
    }

    #[cfg(feature = "rayon")]
    fn evaluate_wave_parallel<D, M, T, E>(
        &self,
        search: &SearchHandle,
        wave: &[(usize, ParamMap)],
        data: &[D],
        train_fn: &T,
        eval_fn: &E,
    ) -> Result<Vec<TrialOutcome>>
    where
        D: Clone + Sync,
        T: Fn(&ParamMap, &[D]) -> anyhow::Result<M> + Sync,
        E: Fn(&M, &[D]) -> anyhow::Result<f64> + Sync,
    {
        use rayon::prelude::*;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.parallelism)
            .build()
            .map_err(|e| Error::Backend(format!("failed to build worker pool: {e}")))?;

        let mut outcomes: Vec<TrialOutcome> = pool.install(|| {
            wave.par_iter()
                .map(|(index, params)| {
                    self.run_trial(search, *index, params.clone(), data, train_fn, eval_fn)
                })
                .collect()
        });
        // Dispatch order, not completion order, drives tie-breaks
        outcomes.sort_by_key(TrialOutcome::trial_index);
        Ok(outcomes)
    }

    #[cfg(not(feature = "rayon"))]
    fn evaluate_wave_parallel<D, M, T, E>(
        &self,
        _search: &SearchHandle,
        _wave: &[(usize, ParamMap)],
        _data: &[D],
        _train_fn: &T,
        _eval_fn: &E,
    ) -> Result<Vec<TrialOutcome>>
    where
        D: Clone + Sync,
        T: Fn(&ParamMap, &[D]) -> anyhow::Result<M> + Sync,
        E: Fn(&M, &[D]) -> anyhow::Result<f64> + Sync,
    {
        Err(Error::Config(
            "parallelism > 1 requires the 'rayon' feature".to_string(),
        ))
    }

    /// Evaluate one candidate and persist it as a child run.
    fn run_trial<D, M, T, E>(
        &self,
        search: &SearchHandle,
        trial_index: usize,
        params: ParamMap,
        data: &[D],
        train_fn: &T,
        eval_fn: &E,
    ) -> TrialOutcome
    where
        D: Clone + Sync,
        T: Fn(&ParamMap, &[D]) -> anyhow::Result<M> + Sync,
        E: Fn(&M, &[D]) -> anyhow::Result<f64> + Sync,
    {
        let evaluation = self.evaluate(&params, data, train_fn, eval_fn);
        let (score, error) = match evaluation.score {
            Ok(score) => (Some(score), None),
            Err(message) => (None, Some(message)),
        };
        let outcome = TrialOutcome {
            trial_index,
            params,
            cv_scores: evaluation.cv_scores,
            score,
            run_id: None,
            error,
        };
        let run_id = search.log_trial(self, &outcome);
        debug!(
            trial_index,
            score = ?outcome.score,
            "trial evaluated"
        );
        TrialOutcome { run_id, ..outcome }
    }

    /// Single train/eval call, or k-fold cross-validation when
    /// `cv_folds > 1`.
    fn evaluate<D, M, T, E>(
        &self,
        params: &ParamMap,
        data: &[D],
        train_fn: &T,
        eval_fn: &E,
    ) -> Evaluation
    where
        D: Clone + Sync,
        T: Fn(&ParamMap, &[D]) -> anyhow::Result<M> + Sync,
        E: Fn(&M, &[D]) -> anyhow::Result<f64> + Sync,
    {
        let k = self.config.cv_folds;
        if k <= 1 {
            let score = train_fn(params, data)
                .and_then(|model| eval_fn(&model, data))
                .map_err(|e| e.to_string());
            return Evaluation {
                cv_scores: Vec::new(),
                score,
            };
        }

        let mut cv_scores = Vec::with_capacity(k);
        for (lo, hi) in fold_bounds(data.len(), k) {
            let held_out = &data[lo..hi];
            let mut train_set = Vec::with_capacity(data.len() - (hi - lo));
            train_set.extend_from_slice(&data[..lo]);
            train_set.extend_from_slice(&data[hi..]);

            let fold_score = train_fn(params, &train_set)
                .and_then(|model| eval_fn(&model, held_out))
                .map_err(|e| e.to_string());
            match fold_score {
                Ok(score) => cv_scores.push(score),
                Err(message) => {
                    return Evaluation {
                        cv_scores,
                        score: Err(message),
                    };
                }
            }
        }
        let mean = cv_scores.iter().sum::<f64>() / cv_scores.len() as f64;
        Evaluation {
            cv_scores,
            score: Ok(mean),
        }
    }

    fn check_dataset<D>(&self, data: &[D]) -> Result<()> {
        if self.config.cv_folds > 1 && data.len() < self.config.cv_folds {
            return Err(Error::Config(format!(
                "cv_folds = {} exceeds dataset length {}",
                self.config.cv_folds,
                data.len()
            )));
        }
        Ok(())
    }

    fn rng(&self) -> StdRng {
        self.config
            .random_state
            .map_or_else(StdRng::from_entropy, StdRng::seed_from_u64)
    }
}

/// Deterministic contiguous fold boundaries: the first `len % k` folds
/// take one extra element.
fn fold_bounds(len: usize, k: usize) -> Vec<(usize, usize)> {
    let base = len / k;
    let extra = len % k;
    let mut bounds = Vec::with_capacity(k);
    let mut start = 0;
    for fold in 0..k {
        let size = base + usize::from(fold < extra);
        bounds.push((start, start + size));
        start += size;
    }
    bounds
}

/// Parent-run bookkeeping for one search invocation.
///
/// Every ledger failure on this path is downgraded to a warning; the
/// numerical search never blocks on tracking.
struct SearchHandle {
    search_id: String,
    strategy: String,
    parent_run_id: Option<String>,
}

impl SearchHandle {
    fn open(tuner: &Tuner<'_>, strategy: &str) -> Self {
        let search_id = uuid::Uuid::new_v4().to_string();
        let mut tags = BTreeMap::new();
        tags.insert("afinar.search".to_string(), search_id.clone());
        tags.insert("afinar.strategy".to_string(), strategy.to_string());
        let parent_run_id = match tuner.ledger.start_run(strategy, tags) {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(error = %e, strategy, "could not open parent run; trials will be unparented");
                None
            }
        };
        Self {
            search_id,
            strategy: strategy.to_string(),
            parent_run_id,
        }
    }

    /// Persist one trial as a child run; returns its run id when the
    /// writes went through.
    fn log_trial(&self, tuner: &Tuner<'_>, outcome: &TrialOutcome) -> Option<String> {
        let mut tags = BTreeMap::new();
        tags.insert("afinar.search".to_string(), self.search_id.clone());
        tags.insert(
            "afinar.trial_index".to_string(),
            outcome.trial_index.to_string(),
        );
        if let Some(parent) = &self.parent_run_id {
            tags.insert("afinar.parent".to_string(), parent.clone());
        }
        let name = format!("{}-trial-{}", self.strategy, outcome.trial_index);

        let result = (|| -> Result<String> {
            let run_id = tuner.ledger.start_run(&name, tags)?;
            tuner.ledger.log_params(&run_id, &outcome.params)?;
            for (fold, score) in outcome.cv_scores.iter().enumerate() {
                tuner
                    .ledger
                    .log_metric(&run_id, "cv_score", *score, Some(fold as u64))?;
            }
            let status = match outcome.score {
                Some(score) => {
                    tuner.ledger.log_metric(&run_id, "score", score, None)?;
                    RunStatus::Finished
                }
                None => RunStatus::Failed,
            };
            tuner.ledger.end_run(&run_id, status)?;
            Ok(run_id)
        })();

        match result {
            Ok(run_id) => Some(run_id),
            Err(e) => {
                warn!(
                    error = %e,
                    trial_index = outcome.trial_index,
                    "trial record could not be persisted; continuing search"
                );
                None
            }
        }
    }

    /// Finalize the parent run and assemble the search outcome.
    fn close(
        self,
        tuner: &Tuner<'_>,
        trials: Vec<TrialOutcome>,
        cancelled: bool,
    ) -> Result<SearchOutcome> {
        let summary = SearchSummary {
            search_id: self.search_id,
            parent_run_id: self.parent_run_id.clone(),
            status: if cancelled {
                SearchStatus::Cancelled
            } else {
                SearchStatus::Finished
            },
            maximize: tuner.config.maximize,
            trials,
        };

        let best = summary.get_top_results(1).into_iter().next();
        let run_status = match (&best, cancelled) {
            (_, true) => RunStatus::Cancelled,
            (Some(_), false) => RunStatus::Finished,
            (None, false) => RunStatus::Failed,
        };
        if let Some(parent) = &self.parent_run_id {
            let finalize = (|| -> Result<()> {
                if let (Some(best_score), Some(mean_score)) =
                    (summary.best_score(), summary.mean_score())
                {
                    tuner.ledger.log_metric(parent, "best_score", best_score, None)?;
                    tuner.ledger.log_metric(parent, "mean_score", mean_score, None)?;
                }
                tuner.ledger.log_metric(
                    parent,
                    "total_trials",
                    summary.total_trials() as f64,
                    None,
                )?;
                tuner.ledger.end_run(parent, run_status)
            })();
            if let Err(e) = finalize {
                warn!(error = %e, "could not finalize parent search run");
            }
        }

        match best {
            Some(best) => Ok(SearchOutcome { best, summary }),
            None => Err(Error::NoSuccessfulTrial {
                attempted: summary.total_trials(),
            }),
        }
    }
}
