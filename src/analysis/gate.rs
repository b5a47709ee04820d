use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tokio::sync::{broadcast, Mutex};
use tracing::{error, info, warn};

use crate::analysis::types::{
    AnalysisError, AnalysisRequest, AnalysisResult, AnalysisState, DEFAULT_SAMPLE_TEMPERATURE,
};
use crate::calibration::CalibrationEngine;
use crate::config::AnalysisConfig;
use crate::events::{AnalysisEvent, CalibrationEvent, SessionEvent, EVENT_CHANNEL_CAPACITY};
use crate::sampling::Sampler;
use crate::session::SessionManager;
use crate::storage::{ExportOperations, StorageOperations};
use crate::timing::{self, Generation};

/// Orchestrates one simulated measurement cycle at a time.
///
/// A request is admitted only when the session manager reports a logged-in
/// operator and the calibration engine reports the device calibrated. An
/// admitted request arms a one-shot acquisition timer; when it fires, the
/// gate synthesizes a result, persists it, exports it best-effort, and
/// retains it as the last result.
///
/// A session that ends while an acquisition is in flight does not abort it:
/// the result is stamped with the operator captured at admission. The
/// dependency watcher only logs the condition.
#[derive(Clone)]
pub struct AnalysisGate {
    inner: Arc<Mutex<GateInner>>,
    session: SessionManager,
    calibration: CalibrationEngine,
    storage: Arc<dyn StorageOperations>,
    exporter: Arc<dyn ExportOperations>,
    sampler: Arc<dyn Sampler>,
    events: broadcast::Sender<AnalysisEvent>,
    config: AnalysisConfig,
}

#[derive(Debug, Default)]
struct GateInner {
    state: AnalysisState,
    request: Option<AnalysisRequest>,
    /// Operator captured when the request was admitted, so a mid-run logout
    /// cannot produce an anonymous result.
    operator: Option<String>,
    last_result: Option<AnalysisResult>,
    timer_generation: Generation,
}

impl AnalysisGate {
    pub fn new(
        session: SessionManager,
        calibration: CalibrationEngine,
        storage: Arc<dyn StorageOperations>,
        exporter: Arc<dyn ExportOperations>,
        sampler: Arc<dyn Sampler>,
        config: AnalysisConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let gate = Self {
            inner: Arc::new(Mutex::new(GateInner::default())),
            session,
            calibration,
            storage,
            exporter,
            sampler,
            events,
            config,
        };
        gate.spawn_dependency_watcher();
        gate
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AnalysisEvent> {
        self.events.subscribe()
    }

    /// Admit a measurement request and arm the acquisition timer.
    ///
    /// Precondition failures are reported synchronously and leave the gate
    /// untouched; no timer is armed.
    pub async fn start_analysis(&self, request: AnalysisRequest) -> Result<(), AnalysisError> {
        let mut inner = self.inner.lock().await;
        if inner.state == AnalysisState::Running {
            warn!("analysis already in progress");
            return Err(AnalysisError::AlreadyRunning);
        }

        let Some(operator) = self.session.current_user().await else {
            warn!("analysis rejected: no user logged in");
            let _ = self.events.send(AnalysisEvent::Error {
                reason: "No user logged in".to_string(),
            });
            return Err(AnalysisError::NoActiveSession);
        };
        if !self.calibration.is_calibrated().await {
            warn!("analysis rejected: device not calibrated");
            let _ = self.events.send(AnalysisEvent::Error {
                reason: "Device not calibrated".to_string(),
            });
            return Err(AnalysisError::NotCalibrated);
        }

        let sample_id = request.sample_id.clone();
        inner.request = Some(request);
        inner.operator = Some(operator);
        inner.state = AnalysisState::Running;
        let generation = inner.timer_generation.bump();
        drop(inner);

        let delay = self
            .sampler
            .acquisition_delay(self.config.min_duration(), self.config.max_duration());
        info!(delay_ms = delay.as_millis() as u64, ?sample_id, "started analysis");
        let _ = self.events.send(AnalysisEvent::Started { sample_id });

        let gate = self.clone();
        timing::spawn_after(delay, async move {
            gate.on_acquisition_timer(generation).await;
        });
        Ok(())
    }

    /// Discard the in-flight request without producing a result. No-op
    /// unless running.
    pub async fn stop_analysis(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state != AnalysisState::Running {
            return;
        }
        inner.timer_generation.bump();
        inner.state = AnalysisState::Idle;
        inner.request = None;
        inner.operator = None;
        info!("analysis stopped by user");
    }

    pub async fn state(&self) -> AnalysisState {
        self.inner.lock().await.state
    }

    pub async fn is_analyzing(&self) -> bool {
        self.inner.lock().await.state == AnalysisState::Running
    }

    /// The most recent result, retained until the next request overwrites
    /// it.
    pub async fn last_result(&self) -> Option<AnalysisResult> {
        self.inner.lock().await.last_result.clone()
    }

    async fn on_acquisition_timer(&self, generation: Generation) {
        let mut inner = self.inner.lock().await;
        if inner.timer_generation != generation || inner.state != AnalysisState::Running {
            return;
        }
        let request = inner.request.take().unwrap_or_default();
        let operator = inner.operator.take().unwrap_or_default();
        let result = self.synthesize(&request, &operator);

        let stored = match self.storage.save_result(&result) {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "failed to store analysis result");
                false
            }
        };
        match self.exporter.export_result(&result) {
            Ok(true) => {}
            Ok(false) => warn!(sample_id = %result.sample_id, "result export declined"),
            Err(e) => warn!(error = %e, "result export failed"),
        }
        if let Err(e) = self.storage.record_audit_event(
            "ANALYSIS_COMPLETED",
            &operator,
            json!({"sample_id": result.sample_id}),
        ) {
            warn!(error = %e, "failed to record analysis audit event");
        }

        inner.state = if stored {
            AnalysisState::Completed
        } else {
            AnalysisState::Error
        };
        inner.last_result = Some(result.clone());
        drop(inner);

        if stored {
            info!(sample_id = %result.sample_id, operator, "analysis completed");
            let _ = self.events.send(AnalysisEvent::Completed { result });
        } else {
            let _ = self.events.send(AnalysisEvent::Error {
                reason: "Failed to store analysis result".to_string(),
            });
        }
    }

    /// Draw every measured parameter from its clinically plausible range.
    fn synthesize(&self, request: &AnalysisRequest, operator: &str) -> AnalysisResult {
        let sampler = &self.sampler;
        AnalysisResult {
            sample_id: request
                .sample_id
                .clone()
                .unwrap_or_else(|| format!("AUTO_{}", Utc::now().timestamp())),
            patient_id: request.patient_id.clone().unwrap_or_default(),
            operator: operator.to_string(),
            timestamp: Utc::now(),
            temperature: request.temperature.unwrap_or(DEFAULT_SAMPLE_TEMPERATURE),
            ph: sampler.uniform(7.35, 7.45),
            pco2: sampler.uniform(35.0, 50.0),
            po2: sampler.uniform(80.0, 120.0),
            hco3: sampler.uniform(22.0, 28.0),
            so2: sampler.uniform(95.0, 100.0),
            base_excess: sampler.uniform(-2.0, 6.0),
            sodium: sampler.uniform(135.0, 145.0),
            potassium: sampler.uniform(3.5, 5.5),
            chloride: sampler.uniform(95.0, 110.0),
            calcium: sampler.uniform(2.2, 2.8),
            glucose: sampler.uniform(70.0, 120.0),
            lactate: sampler.uniform(0.5, 3.5),
        }
    }

    /// Watch session and calibration transitions to re-evaluate the gate.
    /// With at most one request in flight and no admission queue, the only
    /// actionable condition is a dependency dropping mid-acquisition, which
    /// is logged and deliberately not acted on.
    fn spawn_dependency_watcher(&self) {
        let gate = self.clone();
        let mut session_rx = gate.session.subscribe();
        let mut calibration_rx = gate.calibration.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = session_rx.recv() => match event {
                        Ok(SessionEvent::Ended | SessionEvent::Expired) => {
                            if gate.is_analyzing().await {
                                warn!("session ended during analysis; acquisition will complete");
                            }
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(_)) => {}
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    event = calibration_rx.recv() => match event {
                        Ok(CalibrationEvent::Completed { success: false }) => {
                            if gate.is_analyzing().await {
                                warn!("calibration failed during analysis; acquisition will complete");
                            }
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(_)) => {}
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });
    }
}
