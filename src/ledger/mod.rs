//! Run Ledger - durable record of experiment runs
//!
//! The ledger is the only component with durable mutable state. It
//! issues fresh run ids, accepts append-only log operations from the
//! run's owner, and answers queries (`search_runs`, `compare_runs`)
//! over everything ever recorded.
//!
//! Two functionally identical modes exist behind one type: a pure
//! in-memory store (the default when no backend is configured) and a
//! durable mode writing JSON records through a [`KvBackend`]. Callers
//! never branch on which mode they hold.
//!
//! ## Usage
//!
//! ```rust
//! use afinar::ledger::{RunLedger, RunStatus};
//! use std::collections::BTreeMap;
//!
//! # fn example() -> afinar::Result<()> {
//! let ledger = RunLedger::in_memory();
//!
//! let run_id = ledger.start_run("baseline", BTreeMap::new())?;
//! ledger.log_param(&run_id, "learning_rate", 0.01.into())?;
//! ledger.log_metric(&run_id, "loss", 0.42, None)?;
//! ledger.end_run(&run_id, RunStatus::Finished)?;
//!
//! let run = ledger.get_run(&run_id)?;
//! assert_eq!(run.status(), RunStatus::Finished);
//! # Ok(())
//! # }
//! ```

mod filter;
mod run;

pub use filter::{MetricComparison, MetricOp, MetricPredicate, RunComparison, RunFilter};
pub use run::{MetricPoint, ParamMap, ParamValue, Run, RunStatus};

use std::collections::BTreeMap;

use dashmap::DashMap;
use tracing::warn;

use crate::error::{Error, Result};
use crate::kv::KvBackend;

const RUN_KEY_PREFIX: &str = "run/";

/// Storage mode. Both variants satisfy the identical contract; the
/// tuner and orchestrator cannot distinguish between them.
enum LedgerBackend {
    /// All state kept in memory (mock mode).
    InMemory(DashMap<String, Run>),
    /// Runs persisted as JSON through the narrow KV contract.
    Durable(Box<dyn KvBackend>),
}

/// Run Ledger - the append-only store of all run records.
///
/// All methods take `&self`; the in-memory mode is safe under
/// concurrent trial writers, and the durable mode requires the same of
/// its [`KvBackend`].
pub struct RunLedger {
    backend: LedgerBackend,
}

impl RunLedger {
    /// Create a ledger keeping all state in memory.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            backend: LedgerBackend::InMemory(DashMap::new()),
        }
    }

    /// Create a ledger persisting runs through a durable backend.
    #[must_use]
    pub fn durable(backend: Box<dyn KvBackend>) -> Self {
        Self {
            backend: LedgerBackend::Durable(backend),
        }
    }

    /// Create a run in `Running` status and persist it.
    ///
    /// Run ids are always fresh; this operation never collides.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Backend`] if the durable write fails after the
    /// single retry.
    pub fn start_run(&self, name: &str, tags: BTreeMap<String, String>) -> Result<String> {
        let run = Run::new(name, tags);
        let run_id = run.run_id().to_string();
        match &self.backend {
            LedgerBackend::InMemory(store) => {
                store.insert(run_id.clone(), run);
            }
            LedgerBackend::Durable(kv) => persist(kv.as_ref(), &run)?,
        }
        Ok(run_id)
    }

    /// Upsert a single param on a live run.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownRun`] if the id does not exist or the
    /// run is finalized.
    pub fn log_param(&self, run_id: &str, key: &str, value: ParamValue) -> Result<()> {
        self.update_live(run_id, |run| run.set_param(key, value.clone()))
    }

    /// Upsert a mapping of params on a live run.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Self::log_param`].
    pub fn log_params(&self, run_id: &str, params: &ParamMap) -> Result<()> {
        self.update_live(run_id, |run| {
            for (key, value) in params {
                run.set_param(key.clone(), value.clone());
            }
        })
    }

    /// Append one metric point.
    ///
    /// `step` defaults to an auto-incrementing counter per key.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Self::log_param`].
    pub fn log_metric(&self, run_id: &str, key: &str, value: f64, step: Option<u64>) -> Result<()> {
        self.update_live(run_id, |run| run.append_metric(key, step, value))
    }

    /// Append one point per metric, all with auto-assigned steps.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Self::log_param`].
    pub fn log_metrics(&self, run_id: &str, metrics: &BTreeMap<String, f64>) -> Result<()> {
        self.update_live(run_id, |run| {
            for (key, value) in metrics {
                run.append_metric(key.clone(), None, *value);
            }
        })
    }

    /// Upsert a free-form tag on a live run.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Self::log_param`].
    pub fn set_tag(&self, run_id: &str, key: &str, value: &str) -> Result<()> {
        self.update_live(run_id, |run| run.set_tag(key, value))
    }

    /// Record an opaque artifact reference.
    ///
    /// Artifact bytes are never transferred or validated; storage is
    /// the collaborator's concern.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Self::log_param`].
    pub fn log_artifact(&self, run_id: &str, reference: &str) -> Result<()> {
        self.update_live(run_id, |run| run.add_artifact(reference))
    }

    /// Set `end_time` and the final status.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownRun`] for unknown ids and
    /// [`Error::AlreadyFinalized`] on any call after the first.
    pub fn end_run(&self, run_id: &str, status: RunStatus) -> Result<()> {
        match &self.backend {
            LedgerBackend::InMemory(store) => {
                let mut entry = store
                    .get_mut(run_id)
                    .ok_or_else(|| Error::UnknownRun(run_id.to_string()))?;
                entry.finalize(status)
            }
            LedgerBackend::Durable(kv) => {
                let mut run = load(kv.as_ref(), run_id)?;
                run.finalize(status)?;
                persist(kv.as_ref(), &run)
            }
        }
    }

    /// Fetch a run by id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownRun`] if absent.
    pub fn get_run(&self, run_id: &str) -> Result<Run> {
        match &self.backend {
            LedgerBackend::InMemory(store) => store
                .get(run_id)
                .map(|entry| entry.clone())
                .ok_or_else(|| Error::UnknownRun(run_id.to_string())),
            LedgerBackend::Durable(kv) => load(kv.as_ref(), run_id),
        }
    }

    /// Search runs matching a conjunctive filter, most recent first.
    ///
    /// Results are ordered by `start_time` descending and truncated to
    /// `max_results`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Backend`] if the durable backend is unreachable.
    pub fn search_runs(&self, filter: &RunFilter, max_results: usize) -> Result<Vec<Run>> {
        let mut matched: Vec<Run> = match &self.backend {
            LedgerBackend::InMemory(store) => store
                .iter()
                .filter(|entry| filter.matches(entry.value()))
                .map(|entry| entry.value().clone())
                .collect(),
            LedgerBackend::Durable(kv) => {
                let mut runs = Vec::new();
                for key in kv.list_prefix(RUN_KEY_PREFIX)? {
                    let run_id = &key[RUN_KEY_PREFIX.len()..];
                    let run = load(kv.as_ref(), run_id)?;
                    if filter.matches(&run) {
                        runs.push(run);
                    }
                }
                runs
            }
        };
        matched.sort_by(|a, b| b.start_time().cmp(&a.start_time()));
        matched.truncate(max_results);
        Ok(matched)
    }

    /// Compare params and metrics across the given runs.
    ///
    /// Numeric metric deltas are reported against the first run.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownRun`] if any id is absent.
    pub fn compare_runs(&self, run_ids: &[&str]) -> Result<RunComparison> {
        let runs: Vec<Run> = run_ids
            .iter()
            .map(|id| self.get_run(id))
            .collect::<Result<_>>()?;
        Ok(RunComparison::from_runs(&runs))
    }

    /// Apply a mutation to a live (non-finalized) run and persist it.
    ///
    /// The durable arm is a load-mutate-store sequence, not an atomic
    /// update: it relies on the single-owner invariant that only the
    /// entity that started a run mutates it. Concurrent writers to
    /// DIFFERENT run ids are fine; two writers to the same run id are
    /// outside the contract and may lose one of the updates.
    fn update_live<F>(&self, run_id: &str, mutate: F) -> Result<()>
    where
        F: Fn(&mut Run),
    {
        match &self.backend {
            LedgerBackend::InMemory(store) => {
                let mut entry = store
                    .get_mut(run_id)
                    .ok_or_else(|| Error::UnknownRun(run_id.to_string()))?;
                if entry.is_finalized() {
                    return Err(Error::UnknownRun(run_id.to_string()));
                }
                mutate(&mut entry);
                Ok(())
            }
            LedgerBackend::Durable(kv) => {
                let mut run = load(kv.as_ref(), run_id)?;
                if run.is_finalized() {
                    return Err(Error::UnknownRun(run_id.to_string()));
                }
                mutate(&mut run);
                persist(kv.as_ref(), &run)
            }
        }
    }
}

/// Write a run record, retrying the backend once before surfacing.
fn persist(kv: &dyn KvBackend, run: &Run) -> Result<()> {
    let key = format!("{RUN_KEY_PREFIX}{}", run.run_id());
    let bytes = serde_json::to_vec(run)?;
    if let Err(first) = kv.put(&key, bytes.clone()) {
        warn!(run_id = %run.run_id(), error = %first, "ledger write failed, retrying once");
        kv.put(&key, bytes)
            .map_err(|e| Error::Backend(format!("write for run {} failed after retry: {e}", run.run_id())))?;
    }
    Ok(())
}

/// Read and decode a run record from the durable backend.
fn load(kv: &dyn KvBackend, run_id: &str) -> Result<Run> {
    let key = format!("{RUN_KEY_PREFIX}{run_id}");
    let bytes = kv
        .get(&key)?
        .ok_or_else(|| Error::UnknownRun(run_id.to_string()))?;
    Ok(serde_json::from_slice(&bytes)?)
}
