//! End-to-end orchestrator runs.
//!
//! These tests verify that a run validates, schedules wave by wave, hands
//! results to the sink and reports failures without aborting.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;
use tokio::sync::mpsc;

use wavegen::core::{Manifest, ProcessingResult, RunContext, TaskPayload};
use wavegen::memory::{Collector, MemoryMonitor};
use wavegen::orchestration::{
    CommandWorker, FnWorker, JsonDirSink, MemorySink, OrchestratorConfig, OutputSink,
    PoolEvent, ProcessingOptions, ProcessingOrchestrator, RunState, Worker,
};
use wavegen::{Error, TaskError};

use crate::fixtures::{
    recording_worker, steady_monitor, unit, ExecutionLog, ScriptedProbe, GIB, MIB,
    SAMPLE_MANIFEST,
};

/// Test: Priority and dependency ordering end to end
/// Given units C(priority 5), A(0), B depends on A
/// When processed
/// Then waves are [[C, A], [B]] and B completes after A
#[tokio::test]
async fn test_priority_and_dependency_end_to_end() {
    let log = ExecutionLog::default();
    let sink = Arc::new(MemorySink::new());
    let mut orchestrator = ProcessingOrchestrator::builder(recording_worker(log.clone()))
        .sink(sink.clone())
        .monitor(steady_monitor(100 * MIB))
        .build();

    let units = vec![unit("c", &[], 5), unit("a", &[], 0), unit("b", &["a"], 0)];
    let summary = orchestrator
        .process_templates(&units, RunContext::new(), ProcessingOptions::default())
        .await
        .unwrap();

    assert!(summary.is_clean());
    assert_eq!(summary.waves, 2);
    let waves: Vec<(String, usize)> = sink
        .results()
        .into_iter()
        .map(|r| (r.unit, r.wave))
        .collect();
    assert!(waves.contains(&("c".to_string(), 0)));
    assert!(waves.contains(&("a".to_string(), 0)));
    assert_eq!(waves.last(), Some(&("b".to_string(), 1)));
    assert!(log.position("a").unwrap() < log.position("b").unwrap());
}

/// Test: Manifest-driven run
/// Given the sample TOML manifest
/// When processed
/// Then every unit completes in its own dependency layer
#[tokio::test]
async fn test_manifest_run_completes_every_unit() {
    let units = Manifest::parse(SAMPLE_MANIFEST).unwrap().into_units();
    let log = ExecutionLog::default();
    let mut orchestrator = ProcessingOrchestrator::builder(recording_worker(log.clone()))
        .monitor(steady_monitor(100 * MIB))
        .build();

    let summary = orchestrator
        .process_templates(&units, RunContext::new(), ProcessingOptions::default())
        .await
        .unwrap();

    assert_eq!(summary.results.len(), units.len());
    assert_eq!(summary.waves, 4);
    let order: Vec<String> = log.entries().into_iter().map(|(name, _)| name).collect();
    assert_eq!(order, vec!["schema", "models", "api", "readme"]);
    assert_eq!(summary.result_for("readme").unwrap().output["wave"], 3);
}

/// Test: Shell worker writing JSON files
/// Given a CommandWorker printing JSON and a JsonDirSink
/// When processed
/// Then each unit has a file holding its parsed output
#[tokio::test]
async fn test_command_worker_with_json_sink() {
    let temp = TempDir::new().unwrap();
    let out = temp.path().join("out");
    let worker = Arc::new(CommandWorker::new(
        r#"printf '{"unit":"%s","wave":%s}' "$WAVEGEN_UNIT" "$WAVEGEN_WAVE""#,
    ));
    let sink = Arc::new(JsonDirSink::new(&out));
    let mut orchestrator = ProcessingOrchestrator::builder(worker)
        .sink(sink.clone())
        .monitor(steady_monitor(100 * MIB))
        .build();

    let units = vec![unit("schema", &[], 0), unit("api", &["schema"], 0)];
    let summary = orchestrator
        .process_templates(&units, RunContext::new(), ProcessingOptions::default())
        .await
        .unwrap();
    assert!(summary.is_clean());

    let written = std::fs::read_to_string(out.join("api.json")).unwrap();
    let result: ProcessingResult = serde_json::from_str(&written).unwrap();
    assert_eq!(result.output, json!({"unit": "api", "wave": 1}));
    assert!(out.join("schema.json").exists());
    assert_eq!(sink.output_stats().batches, 2);
}

/// Test: Shell failures are reported, not fatal
/// Given one unit whose command exits non-zero
/// When processed with one retry
/// Then it is a failure after two attempts and its dependent still runs
#[tokio::test]
async fn test_shell_failure_is_collected() {
    let worker = Arc::new(CommandWorker::new(
        r#"if [ "$WAVEGEN_UNIT" = "bad" ]; then echo "no template" >&2; exit 4; fi; echo done"#,
    ));
    let mut orchestrator = ProcessingOrchestrator::builder(worker)
        .monitor(steady_monitor(100 * MIB))
        .build();

    let units = vec![unit("bad", &[], 0), unit("good", &[], 0), unit("after", &["bad"], 0)];
    let summary = orchestrator
        .process_templates(
            &units,
            RunContext::new(),
            ProcessingOptions {
                retries: Some(1),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(summary.failures.len(), 1);
    let failure = &summary.failures[0];
    assert_eq!(failure.unit, "bad");
    assert_eq!(failure.attempts, 2);
    match &failure.error {
        TaskError::Failed(message) => assert!(message.contains("no template")),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(summary.result_for("after").unwrap().output, json!("done"));
    assert_eq!(summary.to_string(), "completed with 1 errors");
}

/// Test: Missing dependency aborts before anything runs
/// Given a unit depending on an unknown name
/// When processed
/// Then the run fails with MissingDependency and the worker is never called
#[tokio::test]
async fn test_missing_dependency_aborts_run() {
    let log = ExecutionLog::default();
    let mut orchestrator = ProcessingOrchestrator::builder(recording_worker(log.clone()))
        .monitor(steady_monitor(100 * MIB))
        .build();

    let err = orchestrator
        .process_templates(
            &[unit("api", &["ghost"], 0)],
            RunContext::new(),
            ProcessingOptions::default(),
        )
        .await
        .unwrap_err();

    match err {
        Error::MissingDependency { missing } => assert_eq!(missing, vec!["ghost".to_string()]),
        other => panic!("unexpected error: {other}"),
    }
    assert!(log.entries().is_empty());
    assert_eq!(orchestrator.state(), RunState::Failed);
    assert!(!orchestrator.monitor().is_monitoring());
}

/// Test: Pool events reach the caller
/// Given a pool event channel on the builder
/// When a flaky unit needs a retry
/// Then AttemptFailed and a successful TaskFinished are observed
#[tokio::test]
async fn test_pool_events_through_builder() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let worker: Arc<dyn Worker> = Arc::new(FnWorker::new(move |_: TaskPayload| {
        let counter = Arc::clone(&counter);
        async move {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err("first attempt fails".to_string())
            } else {
                Ok(json!("ok"))
            }
        }
    }));

    let (tx, mut rx) = mpsc::channel(32);
    let mut orchestrator = ProcessingOrchestrator::builder(worker)
        .monitor(steady_monitor(100 * MIB))
        .pool_events(tx)
        .build();
    orchestrator
        .process_templates(&[unit("flaky", &[], 0)], RunContext::new(), ProcessingOptions::default())
        .await
        .unwrap();

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    assert!(events.iter().any(|e| matches!(e, PoolEvent::AttemptFailed { attempt: 1, .. })));
    assert_eq!(
        events.last(),
        Some(&PoolEvent::TaskFinished {
            id: "flaky".to_string(),
            attempts: 2,
            success: true,
        })
    );
}

/// Test: Collections between waves under pressure
/// Given medium pressure, gc hints on and a collector installed
/// When three waves run
/// Then a collection is forced after each wave
#[tokio::test]
async fn test_gc_hint_after_each_wave() {
    struct Counting(Arc<AtomicUsize>);

    impl Collector for Counting {
        fn collect(&self) -> bool {
            self.0.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    let collections = Arc::new(AtomicUsize::new(0));
    let monitor = MemoryMonitor::with_probe(Box::new(ScriptedProbe::new(8 * GIB, &[6 * GIB])))
        .with_collector(Box::new(Counting(Arc::clone(&collections))));

    let log = ExecutionLog::default();
    let mut orchestrator = ProcessingOrchestrator::builder(recording_worker(log))
        .monitor(monitor)
        .build();
    let units = vec![unit("a", &[], 0), unit("b", &["a"], 0), unit("c", &["b"], 0)];
    orchestrator
        .process_templates(&units, RunContext::new(), ProcessingOptions::default())
        .await
        .unwrap();

    assert_eq!(collections.load(Ordering::SeqCst), 3);
    assert_eq!(orchestrator.monitor().stats().gc_count, 3);
}

/// Test: GC hints disabled
/// Given medium pressure with gc_hints off
/// When processed
/// Then no collection is forced
#[tokio::test]
async fn test_gc_hints_disabled() {
    struct Counting(Arc<AtomicUsize>);

    impl Collector for Counting {
        fn collect(&self) -> bool {
            self.0.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    let collections = Arc::new(AtomicUsize::new(0));
    let monitor = MemoryMonitor::with_probe(Box::new(ScriptedProbe::new(8 * GIB, &[6 * GIB])))
        .with_collector(Box::new(Counting(Arc::clone(&collections))));

    let log = ExecutionLog::default();
    let mut orchestrator = ProcessingOrchestrator::builder(recording_worker(log))
        .monitor(monitor)
        .config(OrchestratorConfig {
            gc_hints: false,
            ..Default::default()
        })
        .build();
    orchestrator
        .process_templates(&[unit("a", &[], 0)], RunContext::new(), ProcessingOptions::default())
        .await
        .unwrap();

    assert_eq!(collections.load(Ordering::SeqCst), 0);
}

/// Test: Summary serializes for the CLI
/// Given a run with one timeout
/// When the summary is serialized
/// Then the failure carries its error kind
#[tokio::test]
async fn test_summary_serializes() {
    let worker: Arc<dyn Worker> = Arc::new(FnWorker::new(|payload: TaskPayload| async move {
        if payload.unit.name == "slow" {
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
        Ok(json!(payload.unit.name))
    }));
    let mut orchestrator = ProcessingOrchestrator::builder(worker)
        .monitor(steady_monitor(100 * MIB))
        .build();

    let summary = orchestrator
        .process_templates(
            &[unit("slow", &[], 0), unit("fast", &[], 0)],
            RunContext::new().with_value("project", json!("demo")),
            ProcessingOptions {
                timeout: Some(Duration::from_millis(20)),
                retries: Some(0),
            },
        )
        .await
        .unwrap();

    let value = serde_json::to_value(&summary).unwrap();
    assert_eq!(value["failures"][0]["unit"], "slow");
    assert_eq!(value["failures"][0]["error"]["kind"], "timeout");
    assert_eq!(value["results"][0]["unit"], "fast");
}

/// Test: Cleanup shuts everything down
/// Given an orchestrator with a memory sink
/// When cleaned up
/// Then health fails, the sink is closed and new runs fail
#[tokio::test]
async fn test_cleanup_then_run_fails() {
    let sink = Arc::new(MemorySink::new());
    let log = ExecutionLog::default();
    let mut orchestrator = ProcessingOrchestrator::builder(recording_worker(log))
        .sink(sink.clone())
        .monitor(steady_monitor(100 * MIB))
        .build();
    assert!(orchestrator.health_check());

    orchestrator.cleanup().await.unwrap();
    assert!(!orchestrator.health_check());
    assert!(sink.is_closed());

    let err = orchestrator
        .process_templates(&[unit("a", &[], 0)], RunContext::new(), ProcessingOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PoolFailure(_)));
}
