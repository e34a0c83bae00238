//! Pipeline Orchestrator integration tests
//!
//! End-to-end runs through the ledger: stage ordering, output
//! threading, failure isolation, history reconstruction, and a
//! composed pipeline whose train stage drives the tuner.

use afinar::kv::MemoryKv;
use afinar::ledger::{ParamMap, ParamValue, RunLedger, RunStatus};
use afinar::pipeline::{Pipeline, PipelineStatus, StageOutput, StageStatus};
use afinar::tuner::{ParamGrid, Tuner, TunerConfig};
use afinar::Error;

fn both_modes() -> Vec<(&'static str, RunLedger)> {
    vec![
        ("in_memory", RunLedger::in_memory()),
        ("durable", RunLedger::durable(Box::new(MemoryKv::new()))),
    ]
}

fn threshold_config() -> ParamMap {
    let mut config = ParamMap::new();
    config.insert("threshold".to_string(), ParamValue::Float(0.5));
    config
}

// =============================================================================
// Happy path
// =============================================================================

#[test]
fn test_full_pipeline_records_a_finished_run() {
    for (mode, ledger) in both_modes() {
        let mut pipeline = Pipeline::new("churn-v1", threshold_config(), &ledger);

        pipeline.add_stage("validate", |ctx| {
            let data = ctx.data::<Vec<f64>>();
            anyhow::ensure!(!data.is_empty(), "empty dataset");
            Ok(StageOutput::new().with_output("rows", serde_json::json!(data.len())))
        });
        pipeline.add_stage("prepare", |ctx| {
            let rows = ctx.input("rows").and_then(serde_json::Value::as_u64).unwrap();
            Ok(StageOutput::new().with_output("train_rows", serde_json::json!(rows - 2)))
        });
        pipeline.add_stage("evaluate", |ctx| {
            let threshold = ctx.config()["threshold"].as_f64().unwrap();
            Ok(StageOutput::new()
                .with_metric("accuracy", 0.9)
                .with_metric("threshold_used", threshold))
        });

        let data: Vec<f64> = (0..10).map(f64::from).collect();
        let run = pipeline.execute(data).unwrap();

        assert_eq!(run.status(), PipelineStatus::Finished, "{mode}");
        let names: Vec<&str> = run.stage_results().iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["validate", "prepare", "evaluate"], "{mode}");
        assert_eq!(
            run.stage_results()[1].outputs()["train_rows"],
            serde_json::json!(8)
        );
        assert!((run.metrics()["accuracy"] - 0.9).abs() < 1e-12, "{mode}");
        assert!((run.metrics()["threshold_used"] - 0.5).abs() < 1e-12);

        // The ledger record agrees with the returned run
        let record = ledger.get_run(run.run_id()).unwrap();
        assert_eq!(record.status(), RunStatus::Finished, "{mode}");
        assert_eq!(record.params()["threshold"], ParamValue::Float(0.5));
        assert_eq!(record.latest_metric("accuracy"), Some(0.9), "{mode}");
        assert_eq!(record.tags()["afinar.pipeline"], "churn-v1");
    }
}

#[test]
fn test_empty_pipeline_finishes_with_no_stages() {
    let ledger = RunLedger::in_memory();
    let pipeline = Pipeline::new("noop", ParamMap::new(), &ledger);
    let run = pipeline.execute(()).unwrap();
    assert_eq!(run.status(), PipelineStatus::Finished);
    assert!(run.stage_results().is_empty());
}

// =============================================================================
// Failure isolation
// =============================================================================

#[test]
fn test_failure_finalizes_run_and_skips_rest() {
    for (mode, ledger) in both_modes() {
        let mut pipeline = Pipeline::new("p", ParamMap::new(), &ledger);

        pipeline.add_stage("a", |_| Ok(StageOutput::new()));
        pipeline.add_stage("b", |_| anyhow::bail!("label column missing"));
        pipeline.add_stage("c", |_| {
            panic!("stage after a failure must never run");
        });

        let err = pipeline.execute(()).unwrap_err();
        assert!(
            matches!(&err, Error::StageExecution { stage, .. } if stage == "b"),
            "{mode}: {err}"
        );

        let history = pipeline.get_run_history(10).unwrap();
        assert_eq!(history.len(), 1, "{mode}");
        let run = &history[0];
        assert_eq!(run.status(), PipelineStatus::Failed, "{mode}");
        assert_eq!(run.stage_results().len(), 2, "{mode}");
        assert_eq!(run.stage_results()[0].status(), StageStatus::Finished);
        assert_eq!(run.stage_results()[1].status(), StageStatus::Failed);
        assert_eq!(
            run.stage_results()[1].error(),
            Some("label column missing"),
            "{mode}"
        );
    }
}

#[test]
fn test_failed_run_does_not_poison_the_next() {
    let ledger = RunLedger::in_memory();
    let mut pipeline = Pipeline::new("p", ParamMap::new(), &ledger);

    // Stage functions are Fn, so the flake is driven through a Cell
    let flake = std::cell::Cell::new(true);
    pipeline.add_stage("train", move |_| {
        if flake.replace(false) {
            anyhow::bail!("transient");
        }
        Ok(StageOutput::new().with_metric("accuracy", 0.8))
    });

    assert!(pipeline.execute(()).is_err());
    let run = pipeline.execute(()).unwrap();
    assert_eq!(run.status(), PipelineStatus::Finished);

    let history = pipeline.get_run_history(10).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].status(), PipelineStatus::Finished, "newest first");
    assert_eq!(history[1].status(), PipelineStatus::Failed);
}

// =============================================================================
// History and comparison
// =============================================================================

#[test]
fn test_run_history_is_scoped_to_the_pipeline() {
    let ledger = RunLedger::in_memory();

    let mut mine = Pipeline::new("mine", ParamMap::new(), &ledger);
    mine.add_stage("s", |_| Ok(StageOutput::new()));
    let mut other = Pipeline::new("other", ParamMap::new(), &ledger);
    other.add_stage("s", |_| Ok(StageOutput::new()));

    mine.execute(()).unwrap();
    other.execute(()).unwrap();
    mine.execute(()).unwrap();

    let history = mine.get_run_history(10).unwrap();
    assert_eq!(history.len(), 2);
    // Stage results survive the round trip through the ledger
    for run in &history {
        assert_eq!(run.stage_results().len(), 1);
        assert_eq!(run.stage_results()[0].name(), "s");
    }
}

#[test]
fn test_compare_runs_across_configs() {
    let ledger = RunLedger::in_memory();

    let mut run_ids = Vec::new();
    for (threshold, accuracy) in [(0.3, 0.82), (0.5, 0.88)] {
        let mut config = ParamMap::new();
        config.insert("threshold".to_string(), ParamValue::Float(threshold));
        let mut pipeline = Pipeline::new("sweep", config, &ledger);
        pipeline.add_stage("evaluate", move |_| {
            Ok(StageOutput::new().with_metric("accuracy", accuracy))
        });
        run_ids.push(pipeline.execute(()).unwrap().run_id().to_string());
    }

    let pipeline = Pipeline::new("sweep", ParamMap::new(), &ledger);
    let ids: Vec<&str> = run_ids.iter().map(String::as_str).collect();
    let cmp = pipeline.compare_runs(&ids).unwrap();

    let acc = &cmp.metrics["accuracy"];
    assert_eq!(acc.values, vec![Some(0.82), Some(0.88)]);
    assert!((acc.deltas[1].unwrap() - 0.06).abs() < 1e-12);
    assert_eq!(cmp.params["threshold"][0], Some(ParamValue::Float(0.3)));
}

// =============================================================================
// Composition with the tuner
// =============================================================================

#[test]
fn test_train_stage_drives_a_grid_search() {
    let ledger = RunLedger::in_memory();
    let mut pipeline = Pipeline::new("tuned-train", ParamMap::new(), &ledger);

    pipeline.add_stage("train", |ctx| {
        let data = ctx.data::<Vec<f64>>();
        // The stage owns its tuning sub-search and its own ledger scope
        let trial_ledger = RunLedger::in_memory();
        let tuner = Tuner::new(&trial_ledger, TunerConfig::new())?;
        let grid = ParamGrid::new().add(
            "depth",
            vec![ParamValue::Int(2), ParamValue::Int(4), ParamValue::Int(8)],
        );
        let outcome = tuner.grid_search(
            &grid,
            data,
            |params, _| Ok(params["depth"].as_f64().unwrap()),
            // Depth 4 wins
            |depth, _| Ok(-(depth - 4.0).abs()),
        )?;
        let depth = outcome.best.params["depth"].as_f64().unwrap();
        Ok(StageOutput::new()
            .with_output("best_depth", serde_json::json!(depth))
            .with_metric("best_score", outcome.best.score))
    });
    pipeline.add_stage("evaluate", |ctx| {
        let depth = ctx
            .input("best_depth")
            .and_then(serde_json::Value::as_f64)
            .unwrap();
        anyhow::ensure!((depth - 4.0).abs() < 1e-12, "unexpected depth {depth}");
        Ok(StageOutput::new().with_metric("accuracy", 0.9))
    });

    let data: Vec<f64> = (0..12).map(f64::from).collect();
    let run = pipeline.execute(data).unwrap();
    assert_eq!(run.status(), PipelineStatus::Finished);
    assert!((run.metrics()["best_score"] - 0.0).abs() < 1e-12);
    assert!((run.metrics()["accuracy"] - 0.9).abs() < 1e-12);
}
