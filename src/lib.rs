//! # Afinar: Training-Experiment Orchestration
//!
//! Afinar runs supervised-learning workflows through ordered pipeline
//! stages, explores hyperparameter spaces under cross-validation, and
//! records every trial and pipeline run in an append-only ledger for
//! later comparison.
//!
//! ## Components
//!
//! - [`ledger::RunLedger`] - durable record of runs: params, metrics,
//!   artifacts, status, timestamps. In-memory and KV-backed modes are
//!   functionally identical.
//! - [`tuner::Tuner`] - grid, random, and Bayesian search over
//!   caller-supplied train/eval functions, with optional k-fold
//!   cross-validation, early stopping, and cancellation. Every trial
//!   is persisted before the next candidate runs.
//! - [`pipeline::Pipeline`] - ordered named stages threading outputs
//!   forward, recorded as runs, failing fast on the first stage error.
//!
//! ## Example
//!
//! ```rust
//! use afinar::ledger::{ParamValue, RunLedger};
//! use afinar::tuner::{ParamGrid, Tuner, TunerConfig};
//!
//! # fn main() -> afinar::Result<()> {
//! let ledger = RunLedger::in_memory();
//! let tuner = Tuner::new(&ledger, TunerConfig::new())?;
//!
//! let grid = ParamGrid::new()
//!     .add("depth", vec![ParamValue::Int(2), ParamValue::Int(4)]);
//!
//! let data: Vec<f64> = (0..32).map(f64::from).collect();
//! let outcome = tuner.grid_search(
//!     &grid,
//!     &data,
//!     |params, _| Ok(params["depth"].as_f64().unwrap()),
//!     |model, _| Ok(-model),
//! )?;
//! println!("best: {:?}", outcome.best.params);
//! # Ok(())
//! # }
//! ```
//!
//! ## Design Principles
//!
//! - No ambient singletons: every component takes its collaborators
//!   (ledger, train/eval functions) explicitly.
//! - Tracking never blocks computation: ledger write failures inside a
//!   trial degrade to warnings, and the trial's local result is still
//!   returned.
//! - Deterministic search: sequential evaluation by default, seeded
//!   sampling via `random_state`, and dispatch-order tie-breaks even
//!   under the optional worker pool.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod kv;
pub mod ledger;
pub mod pipeline;
pub mod tuner;

pub use error::{Error, Result};
