//! Integration tests for the analysis gate: precondition admission,
//! acquisition timing, result persistence, and export.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::time::sleep;

use hemogas::analysis::{AnalysisError, AnalysisGate, AnalysisRequest, AnalysisState};
use hemogas::calibration::{CalibrationEngine, CalibrationRecord};
use hemogas::config::HemogasConfig;
use hemogas::events::AnalysisEvent;
use hemogas::hl7::Hl7Exporter;
use hemogas::sampling::{Sampler, ScriptedSampler};
use hemogas::session::SessionManager;
use hemogas::storage::{InMemoryStorage, StorageOperations};

const EVENT_TIMEOUT: Duration = Duration::from_secs(7200);

struct Harness {
    storage: Arc<InMemoryStorage>,
    exporter: Arc<Hl7Exporter>,
    session: SessionManager,
    gate: AnalysisGate,
}

fn harness(calibrated: bool) -> Harness {
    let config = HemogasConfig::default();
    let storage = Arc::new(InMemoryStorage::with_default_users());
    if calibrated {
        storage.seed_calibration_record(CalibrationRecord {
            calibration_type: "full".to_string(),
            timestamp: Utc::now(),
            duration_ms: 10_000,
            steps_completed: 5,
            success: true,
        });
    }
    let sampler: Arc<dyn Sampler> = Arc::new(ScriptedSampler::passing());
    let exporter = Arc::new(Hl7Exporter::new());
    let session = SessionManager::new(storage.clone(), config.session.clone());
    let calibration = CalibrationEngine::new(
        storage.clone(),
        sampler.clone(),
        config.calibration.clone(),
    );
    let gate = AnalysisGate::new(
        session.clone(),
        calibration,
        storage.clone(),
        exporter.clone(),
        sampler,
        config.analysis,
    );
    Harness {
        storage,
        exporter,
        session,
        gate,
    }
}

async fn recv_event(rx: &mut broadcast::Receiver<AnalysisEvent>) -> AnalysisEvent {
    tokio::time::timeout(EVENT_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for analysis event")
        .expect("analysis event channel closed")
}

fn drain(rx: &mut broadcast::Receiver<AnalysisEvent>) -> Vec<AnalysisEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {expected}, got {actual}"
    );
}

#[tokio::test(start_paused = true)]
async fn rejects_a_request_without_a_session() {
    let h = harness(true);
    let mut rx = h.gate.subscribe();

    assert_eq!(
        h.gate.start_analysis(AnalysisRequest::default()).await,
        Err(AnalysisError::NoActiveSession)
    );
    assert_eq!(h.gate.state().await, AnalysisState::Idle);

    // No acquisition timer was armed.
    sleep(Duration::from_secs(10)).await;
    let events = drain(&mut rx);
    assert!(matches!(
        events.as_slice(),
        [AnalysisEvent::Error { reason }] if reason == "No user logged in"
    ));
    assert!(h.storage.load_all_results().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn rejects_a_request_on_an_uncalibrated_device() {
    let h = harness(false);
    h.session.login("operator", "operator123").await.unwrap();
    let mut rx = h.gate.subscribe();

    assert_eq!(
        h.gate.start_analysis(AnalysisRequest::default()).await,
        Err(AnalysisError::NotCalibrated)
    );
    assert_eq!(h.gate.state().await, AnalysisState::Idle);

    sleep(Duration::from_secs(10)).await;
    assert!(matches!(
        drain(&mut rx).as_slice(),
        [AnalysisEvent::Error { reason }] if reason == "Device not calibrated"
    ));
}

#[tokio::test(start_paused = true)]
async fn rejects_a_second_request_while_running() {
    let h = harness(true);
    h.session.login("operator", "operator123").await.unwrap();

    h.gate.start_analysis(AnalysisRequest::default()).await.unwrap();
    assert!(h.gate.is_analyzing().await);
    assert_eq!(
        h.gate.start_analysis(AnalysisRequest::default()).await,
        Err(AnalysisError::AlreadyRunning)
    );
}

#[tokio::test(start_paused = true)]
async fn completes_and_stores_a_scripted_result() {
    let h = harness(true);
    h.session.login("operator", "operator123").await.unwrap();
    let mut rx = h.gate.subscribe();

    h.gate
        .start_analysis(AnalysisRequest {
            sample_id: Some("S-1".to_string()),
            patient_id: Some("P-1".to_string()),
            temperature: None,
        })
        .await
        .unwrap();

    assert_eq!(
        recv_event(&mut rx).await,
        AnalysisEvent::Started {
            sample_id: Some("S-1".to_string()),
        }
    );
    let AnalysisEvent::Completed { result } = recv_event(&mut rx).await else {
        panic!("expected a completed analysis");
    };

    // The scripted sampler returns range midpoints.
    assert_eq!(result.sample_id, "S-1");
    assert_eq!(result.patient_id, "P-1");
    assert_eq!(result.operator, "operator");
    assert_close(result.temperature, 37.0);
    assert_close(result.ph, 7.40);
    assert_close(result.pco2, 42.5);
    assert_close(result.po2, 100.0);
    assert_close(result.hco3, 25.0);
    assert_close(result.so2, 97.5);
    assert_close(result.base_excess, 2.0);
    assert_close(result.sodium, 140.0);
    assert_close(result.potassium, 4.5);
    assert_close(result.chloride, 102.5);
    assert_close(result.calcium, 2.5);
    assert_close(result.glucose, 95.0);
    assert_close(result.lactate, 2.0);

    assert_eq!(h.gate.state().await, AnalysisState::Completed);
    assert_eq!(h.gate.last_result().await, Some(result.clone()));
    assert_eq!(h.storage.load_all_results().unwrap(), [result]);
    assert_eq!(h.exporter.messages_sent(), 1);
    assert!(h
        .storage
        .audit_log()
        .iter()
        .any(|entry| entry.event == "ANALYSIS_COMPLETED"));
}

#[tokio::test(start_paused = true)]
async fn generates_a_sample_id_when_none_is_given() {
    let h = harness(true);
    h.session.login("operator", "operator123").await.unwrap();
    let mut rx = h.gate.subscribe();

    h.gate.start_analysis(AnalysisRequest::default()).await.unwrap();

    assert_eq!(recv_event(&mut rx).await, AnalysisEvent::Started { sample_id: None });
    let AnalysisEvent::Completed { result } = recv_event(&mut rx).await else {
        panic!("expected a completed analysis");
    };
    assert!(result.sample_id.starts_with("AUTO_"));
    assert!(result.patient_id.is_empty());
}

#[tokio::test(start_paused = true)]
async fn stop_discards_the_inflight_request() {
    let h = harness(true);
    h.session.login("operator", "operator123").await.unwrap();
    let mut rx = h.gate.subscribe();

    h.gate.start_analysis(AnalysisRequest::default()).await.unwrap();
    h.gate.stop_analysis().await;
    assert_eq!(h.gate.state().await, AnalysisState::Idle);

    sleep(Duration::from_secs(10)).await;
    let events = drain(&mut rx);
    assert!(!events
        .iter()
        .any(|event| matches!(event, AnalysisEvent::Completed { .. })));
    assert!(h.storage.load_all_results().unwrap().is_empty());
    assert!(h.gate.last_result().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn export_failure_does_not_block_completion() {
    let h = harness(true);
    h.session.login("operator", "operator123").await.unwrap();
    h.exporter.set_connected(false);
    let mut rx = h.gate.subscribe();

    h.gate.start_analysis(AnalysisRequest::default()).await.unwrap();

    loop {
        if let AnalysisEvent::Completed { .. } = recv_event(&mut rx).await {
            break;
        }
    }
    assert_eq!(h.gate.state().await, AnalysisState::Completed);
    assert_eq!(h.storage.load_all_results().unwrap().len(), 1);
    assert_eq!(h.exporter.messages_sent(), 0);
}

#[tokio::test(start_paused = true)]
async fn storage_outage_at_completion_flags_an_error() {
    let h = harness(true);
    h.session.login("operator", "operator123").await.unwrap();
    let mut rx = h.gate.subscribe();

    h.gate.start_analysis(AnalysisRequest::default()).await.unwrap();
    h.storage.set_available(false);

    loop {
        match recv_event(&mut rx).await {
            AnalysisEvent::Error { reason } => {
                assert_eq!(reason, "Failed to store analysis result");
                break;
            }
            AnalysisEvent::Completed { .. } => panic!("completion must not be reported"),
            AnalysisEvent::Started { .. } => {}
        }
    }
    assert_eq!(h.gate.state().await, AnalysisState::Error);
    // The synthesized values are still available for inspection.
    assert!(h.gate.last_result().await.is_some());
}

#[tokio::test(start_paused = true)]
async fn session_end_mid_run_still_completes_with_the_admitting_operator() {
    let h = harness(true);
    h.session.login("operator", "operator123").await.unwrap();
    let mut rx = h.gate.subscribe();

    h.gate
        .start_analysis(AnalysisRequest {
            sample_id: Some("S-9".to_string()),
            ..AnalysisRequest::default()
        })
        .await
        .unwrap();
    h.session.logout().await;

    loop {
        if let AnalysisEvent::Completed { result } = recv_event(&mut rx).await {
            assert_eq!(result.operator, "operator");
            assert_eq!(result.sample_id, "S-9");
            break;
        }
    }
    assert_eq!(h.storage.load_all_results().unwrap().len(), 1);
}
