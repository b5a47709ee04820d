use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, Mutex};
use tracing::{error, info, warn};

use crate::calibration::steps::{standard_steps, PH_CALIBRATION_STEP, PH_ONLY_TYPE};
use crate::calibration::types::{
    CalibrationRecord, CalibrationRun, CalibrationStatus, CalibrationStep, RunState,
};
use crate::config::CalibrationConfig;
use crate::events::{CalibrationEvent, EVENT_CHANNEL_CAPACITY};
use crate::sampling::Sampler;
use crate::storage::StorageOperations;
use crate::timing::{self, Generation};

/// Owns the multi-step calibration sequence.
///
/// At most one run exists at a time. Each step arms a one-shot timer for its
/// nominal duration; when it fires, the injected sampler decides the outcome.
/// A successful step advances automatically, a failed one parks the run in
/// `AwaitingRetryOrCancel` until the operator retries (up to the configured
/// ceiling) or cancels. Completing a run persists a record and refreshes the
/// calibrated flag; the flag survives a failed persistence write.
#[derive(Clone)]
pub struct CalibrationEngine {
    inner: Arc<Mutex<EngineInner>>,
    storage: Arc<dyn StorageOperations>,
    sampler: Arc<dyn Sampler>,
    events: broadcast::Sender<CalibrationEvent>,
    steps: Arc<Vec<CalibrationStep>>,
    config: CalibrationConfig,
}

#[derive(Debug, Default)]
struct EngineInner {
    run: Option<CalibrationRun>,
    calibrated: bool,
    last_calibration: Option<DateTime<Utc>>,
    current_step_name: Option<String>,
    progress: u8,
    timer_generation: Generation,
}

impl CalibrationEngine {
    /// Build the engine and reload calibration validity from the latest
    /// persisted record. A storage outage here is logged and treated as
    /// never-calibrated.
    pub fn new(
        storage: Arc<dyn StorageOperations>,
        sampler: Arc<dyn Sampler>,
        config: CalibrationConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let steps = Arc::new(standard_steps(config.step_duration()));

        let last_calibration = match storage.load_latest_calibration_record() {
            Ok(Some(record)) => {
                info!(last_calibration = %record.timestamp, "loaded calibration state");
                Some(record.timestamp)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "could not load calibration state; starting uncalibrated");
                None
            }
        };
        let calibrated = last_calibration
            .is_some_and(|t| (Utc::now() - t).num_days() < config.validity_days);

        Self {
            inner: Arc::new(Mutex::new(EngineInner {
                calibrated,
                last_calibration,
                ..EngineInner::default()
            })),
            storage,
            sampler,
            events,
            steps,
            config,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CalibrationEvent> {
        self.events.subscribe()
    }

    /// Begin a new run. Logged and ignored when a run is already in
    /// progress.
    pub async fn start_calibration(&self, calibration_type: &str) {
        let mut inner = self.inner.lock().await;
        if inner.run.is_some() {
            warn!("calibration already in progress");
            return;
        }
        inner.run = Some(CalibrationRun {
            calibration_type: calibration_type.to_string(),
            started_at: Utc::now(),
            current_step_index: 0,
            retry_count: 0,
            state: RunState::StepRunning,
        });
        inner.progress = 0;
        let _ = self
            .events
            .send(CalibrationEvent::StatusChanged { calibrating: true });
        let _ = self
            .events
            .send(CalibrationEvent::ProgressChanged { percent: 0 });
        info!(calibration_type, "started calibration");
        self.begin_step_locked(&mut inner);
    }

    /// Advance past the current step. Called automatically on a successful
    /// draw; also available to the operator for manual flows.
    pub async fn accept_step(&self) {
        let mut inner = self.inner.lock().await;
        if inner.run.is_none() {
            return;
        }
        self.advance_locked(&mut inner);
    }

    /// Re-run the current step. The run fails terminally once the retry
    /// ceiling is reached.
    pub async fn retry_step(&self) {
        let mut inner = self.inner.lock().await;
        if inner.run.is_none() {
            return;
        }
        inner.timer_generation.bump();
        let retry_count = match inner.run.as_mut() {
            Some(run) => {
                run.retry_count += 1;
                run.retry_count
            }
            None => return,
        };
        if retry_count >= self.config.max_retry_count {
            let step_name = inner.current_step_name.clone().unwrap_or_default();
            warn!(step = %step_name, retry_count, "retry ceiling reached");
            self.complete_locked(&mut inner, false);
            let _ = self.events.send(CalibrationEvent::Failed {
                reason: format!("Too many retries for step: {step_name}"),
            });
        } else {
            self.begin_step_locked(&mut inner);
        }
    }

    /// Abandon the run without persisting a record. No-op when idle.
    pub async fn cancel_calibration(&self) {
        let mut inner = self.inner.lock().await;
        if inner.run.is_none() {
            return;
        }
        inner.timer_generation.bump();
        self.reset_locked(&mut inner);
        info!("calibration cancelled");
    }

    pub async fn status(&self) -> CalibrationStatus {
        let inner = self.inner.lock().await;
        match inner.run.as_ref().map(|run| run.state) {
            None => CalibrationStatus::Idle,
            Some(RunState::StepRunning) => CalibrationStatus::StepRunning,
            Some(RunState::AwaitingRetryOrCancel) => CalibrationStatus::AwaitingRetryOrCancel,
        }
    }

    pub async fn is_calibrating(&self) -> bool {
        self.inner.lock().await.run.is_some()
    }

    pub async fn is_calibrated(&self) -> bool {
        self.inner.lock().await.calibrated
    }

    pub async fn last_calibration_time(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().await.last_calibration
    }

    pub async fn progress(&self) -> u8 {
        self.inner.lock().await.progress
    }

    pub async fn current_step(&self) -> Option<String> {
        self.inner.lock().await.current_step_name.clone()
    }

    /// True when no successful calibration is recorded or the last one has
    /// aged out of the validity window.
    pub async fn is_calibration_required(&self) -> bool {
        let inner = self.inner.lock().await;
        match inner.last_calibration {
            None => true,
            Some(t) => (Utc::now() - t).num_days() >= self.config.validity_days,
        }
    }

    /// Days left in the validity window; 0 when never calibrated.
    pub async fn validity_days_remaining(&self) -> i64 {
        let inner = self.inner.lock().await;
        match inner.last_calibration {
            None => 0,
            Some(t) => (self.config.validity_days - (Utc::now() - t).num_days()).max(0),
        }
    }

    /// Start executing the run's current step, applying the `ph_only` filter
    /// first. Completes the run when the filter leaves nothing to execute.
    fn begin_step_locked(&self, inner: &mut EngineInner) {
        let total = self.steps.len();
        let (mut index, calibration_type) = match inner.run.as_ref() {
            Some(run) => (run.current_step_index, run.calibration_type.clone()),
            None => return,
        };

        if calibration_type == PH_ONLY_TYPE {
            while index < total && self.steps[index].name != PH_CALIBRATION_STEP {
                index += 1;
            }
        }
        if index >= total {
            self.complete_locked(inner, true);
            return;
        }

        let step = &self.steps[index];
        let progress = ((index * 100) / total) as u8;
        if let Some(run) = inner.run.as_mut() {
            run.current_step_index = index;
            run.state = RunState::StepRunning;
        }
        inner.current_step_name = Some(step.name.to_string());
        inner.progress = progress;
        let generation = inner.timer_generation.bump();

        let _ = self.events.send(CalibrationEvent::StepChanged {
            step: Some(step.name.to_string()),
        });
        let _ = self
            .events
            .send(CalibrationEvent::ProgressChanged { percent: progress });
        info!(step = step.name, "performing calibration step");

        let engine = self.clone();
        timing::spawn_after(step.nominal_duration, async move {
            engine.on_step_timer(generation).await;
        });
    }

    /// Step timer callback: resolve the outcome draw and either advance or
    /// park the run for operator intervention.
    async fn on_step_timer(&self, generation: Generation) {
        let mut inner = self.inner.lock().await;
        if inner.timer_generation != generation {
            return;
        }
        let index = match inner.run.as_ref() {
            Some(run) if run.state == RunState::StepRunning => run.current_step_index,
            _ => return,
        };
        if index >= self.steps.len() {
            return;
        }

        let step_name = self.steps[index].name;
        let success = self.sampler.step_passes(self.config.success_rate_percent);
        let _ = self.events.send(CalibrationEvent::StepCompleted {
            step: step_name.to_string(),
            success,
        });

        if success {
            self.advance_locked(&mut inner);
        } else {
            if let Some(run) = inner.run.as_mut() {
                run.state = RunState::AwaitingRetryOrCancel;
            }
            warn!(step = step_name, "calibration step failed");
            let _ = self.events.send(CalibrationEvent::Failed {
                reason: format!(
                    "Calibration step failed: {step_name}. Retry or cancel calibration."
                ),
            });
        }
    }

    fn advance_locked(&self, inner: &mut EngineInner) {
        inner.timer_generation.bump();
        let finished = match inner.run.as_mut() {
            Some(run) => {
                run.current_step_index += 1;
                run.retry_count = 0;
                run.current_step_index >= self.steps.len()
            }
            None => return,
        };
        if finished {
            self.complete_locked(inner, true);
        } else {
            self.begin_step_locked(inner);
        }
    }

    fn complete_locked(&self, inner: &mut EngineInner, success: bool) {
        inner.timer_generation.bump();
        let run = inner.run.take();

        if success {
            let now = Utc::now();
            inner.calibrated = true;
            inner.last_calibration = Some(now);
            inner.progress = 100;
            let _ = self
                .events
                .send(CalibrationEvent::CalibratedChanged { calibrated: true });
            let _ = self
                .events
                .send(CalibrationEvent::ProgressChanged { percent: 100 });

            if let Some(run) = &run {
                let record = CalibrationRecord {
                    calibration_type: run.calibration_type.clone(),
                    timestamp: now,
                    duration_ms: (now - run.started_at).num_milliseconds(),
                    steps_completed: self.steps.len(),
                    success: true,
                };
                // Calibration success is authoritative: the calibrated flag
                // is never rolled back when the record write fails.
                if let Err(e) = self.storage.save_calibration_record(&record) {
                    error!(error = %e, "failed to persist calibration record");
                }
            }
            info!("calibration completed successfully");
        } else {
            info!("calibration failed");
        }

        self.reset_locked(inner);
        let _ = self.events.send(CalibrationEvent::Completed { success });
    }

    fn reset_locked(&self, inner: &mut EngineInner) {
        inner.run = None;
        inner.current_step_name = None;
        inner.progress = 0;
        let _ = self
            .events
            .send(CalibrationEvent::StatusChanged { calibrating: false });
        let _ = self.events.send(CalibrationEvent::StepChanged { step: None });
        let _ = self
            .events
            .send(CalibrationEvent::ProgressChanged { percent: 0 });
    }
}
