//! Integration tests for the calibration workflow: the ordered step
//! sequence, the retry escalation path, and validity-window bookkeeping.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;

use hemogas::calibration::{CalibrationEngine, CalibrationRecord, CalibrationStatus, PH_ONLY_TYPE};
use hemogas::config::HemogasConfig;
use hemogas::events::CalibrationEvent;
use hemogas::sampling::{Sampler, ScriptedSampler};
use hemogas::storage::InMemoryStorage;

const EVENT_TIMEOUT: Duration = Duration::from_secs(7200);

fn engine_with(sampler: Arc<dyn Sampler>) -> (CalibrationEngine, Arc<InMemoryStorage>) {
    let storage = Arc::new(InMemoryStorage::new());
    let engine = CalibrationEngine::new(
        storage.clone(),
        sampler,
        HemogasConfig::default().calibration,
    );
    (engine, storage)
}

async fn recv_event(rx: &mut broadcast::Receiver<CalibrationEvent>) -> CalibrationEvent {
    tokio::time::timeout(EVENT_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for calibration event")
        .expect("calibration event channel closed")
}

/// Pump events until the run completes, answering every parked failure with
/// a retry. Returns the completion outcome and the completed-step log.
async fn drive_to_completion(
    engine: &CalibrationEngine,
    rx: &mut broadcast::Receiver<CalibrationEvent>,
) -> (bool, Vec<(String, bool)>) {
    let mut step_log = Vec::new();
    loop {
        match recv_event(rx).await {
            CalibrationEvent::StepCompleted { step, success } => step_log.push((step, success)),
            CalibrationEvent::Failed { reason }
                if reason.starts_with("Calibration step failed") =>
            {
                assert_eq!(engine.status().await, CalibrationStatus::AwaitingRetryOrCancel);
                engine.retry_step().await;
            }
            CalibrationEvent::Completed { success } => return (success, step_log),
            _ => {}
        }
    }
}

#[tokio::test(start_paused = true)]
async fn full_run_walks_all_five_steps_in_order() {
    let (engine, storage) = engine_with(Arc::new(ScriptedSampler::passing()));
    let mut rx = engine.subscribe();

    engine.start_calibration("full").await;
    let (success, step_log) = drive_to_completion(&engine, &mut rx).await;

    assert!(success);
    let steps: Vec<&str> = step_log.iter().map(|(step, _)| step.as_str()).collect();
    assert_eq!(
        steps,
        [
            "System Check",
            "pH Calibration",
            "Gas Calibration",
            "Electrolyte Calibration",
            "Quality Control",
        ]
    );
    assert!(step_log.iter().all(|(_, success)| *success));

    assert!(engine.is_calibrated().await);
    assert!(!engine.is_calibrating().await);
    assert_eq!(engine.status().await, CalibrationStatus::Idle);

    let history = storage.calibration_history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].calibration_type, "full");
    assert_eq!(history[0].steps_completed, 5);
    assert!(history[0].success);
}

#[tokio::test(start_paused = true)]
async fn progress_reaches_one_hundred_on_success() {
    let (engine, _storage) = engine_with(Arc::new(ScriptedSampler::passing()));
    let mut rx = engine.subscribe();

    engine.start_calibration("full").await;

    let mut saw_full_progress = false;
    loop {
        match recv_event(&mut rx).await {
            CalibrationEvent::ProgressChanged { percent: 100 } => saw_full_progress = true,
            CalibrationEvent::Completed { .. } => break,
            _ => {}
        }
    }
    assert!(saw_full_progress);
}

#[tokio::test(start_paused = true)]
async fn ph_only_run_executes_the_single_ph_step() {
    let (engine, storage) = engine_with(Arc::new(ScriptedSampler::passing()));
    let mut rx = engine.subscribe();

    engine.start_calibration(PH_ONLY_TYPE).await;
    let (success, step_log) = drive_to_completion(&engine, &mut rx).await;

    assert!(success);
    assert_eq!(step_log, [("pH Calibration".to_string(), true)]);
    assert!(engine.is_calibrated().await);
    assert_eq!(storage.calibration_history()[0].calibration_type, PH_ONLY_TYPE);
}

#[tokio::test(start_paused = true)]
async fn retry_ceiling_fails_the_run_terminally() {
    let (engine, storage) = engine_with(Arc::new(ScriptedSampler::failing()));
    let mut rx = engine.subscribe();

    engine.start_calibration("full").await;
    let (success, step_log) = drive_to_completion(&engine, &mut rx).await;

    assert!(!success);
    // The first step fails once on entry and once per allowed retry.
    assert_eq!(
        step_log,
        [
            ("System Check".to_string(), false),
            ("System Check".to_string(), false),
            ("System Check".to_string(), false),
        ]
    );
    assert!(matches!(
        recv_event(&mut rx).await,
        CalibrationEvent::Failed { reason } if reason == "Too many retries for step: System Check"
    ));
    assert!(!engine.is_calibrated().await);
    assert_eq!(engine.status().await, CalibrationStatus::Idle);
    assert!(storage.calibration_history().is_empty());
}

#[tokio::test(start_paused = true)]
async fn one_failure_then_retry_recovers_the_run() {
    let sampler = ScriptedSampler::with_outcomes([true, false], true);
    let (engine, _storage) = engine_with(Arc::new(sampler));
    let mut rx = engine.subscribe();

    engine.start_calibration("full").await;
    let (success, step_log) = drive_to_completion(&engine, &mut rx).await;

    assert!(success);
    assert_eq!(step_log.len(), 6);
    assert_eq!(step_log[1], ("pH Calibration".to_string(), false));
    assert_eq!(step_log[2], ("pH Calibration".to_string(), true));
}

#[tokio::test(start_paused = true)]
async fn cancel_abandons_the_run_without_a_record() {
    let (engine, storage) = engine_with(Arc::new(ScriptedSampler::passing()));

    engine.start_calibration("full").await;
    assert!(engine.is_calibrating().await);

    engine.cancel_calibration().await;
    assert!(!engine.is_calibrating().await);
    assert_eq!(engine.status().await, CalibrationStatus::Idle);
    assert!(!engine.is_calibrated().await);
    assert!(storage.calibration_history().is_empty());

    // The cancelled step timer must not resurrect the run.
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(!engine.is_calibrating().await);
}

#[tokio::test(start_paused = true)]
async fn start_is_ignored_while_a_run_is_active() {
    let (engine, storage) = engine_with(Arc::new(ScriptedSampler::passing()));
    let mut rx = engine.subscribe();

    engine.start_calibration("full").await;
    engine.start_calibration(PH_ONLY_TYPE).await;

    let (success, step_log) = drive_to_completion(&engine, &mut rx).await;
    assert!(success);
    assert_eq!(step_log.len(), 5, "second start must not fork the run");
    assert_eq!(storage.calibration_history().len(), 1);
    assert_eq!(storage.calibration_history()[0].calibration_type, "full");
}

#[tokio::test(start_paused = true)]
async fn fresh_record_survives_engine_restart() {
    let storage = Arc::new(InMemoryStorage::new());
    storage.seed_calibration_record(CalibrationRecord {
        calibration_type: "full".to_string(),
        timestamp: Utc::now() - chrono::Duration::days(5),
        duration_ms: 10_000,
        steps_completed: 5,
        success: true,
    });

    let engine = CalibrationEngine::new(
        storage,
        Arc::new(ScriptedSampler::passing()),
        HemogasConfig::default().calibration,
    );
    assert!(engine.is_calibrated().await);
    assert!(!engine.is_calibration_required().await);
    assert_eq!(engine.validity_days_remaining().await, 25);
}

#[tokio::test(start_paused = true)]
async fn record_write_failure_keeps_the_calibrated_flag() {
    let (engine, storage) = engine_with(Arc::new(ScriptedSampler::passing()));
    let mut rx = engine.subscribe();

    engine.start_calibration("full").await;
    storage.set_available(false);

    let (success, _) = drive_to_completion(&engine, &mut rx).await;
    assert!(success);
    assert!(engine.is_calibrated().await);
    assert!(engine.last_calibration_time().await.is_some());
    assert!(storage.calibration_history().is_empty());
}
