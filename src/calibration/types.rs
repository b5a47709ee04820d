use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One timed calibration sub-task. Expected values and tolerances are
/// descriptive metadata; the pass/fail decision comes from the injected
/// sampler, standing in for real instrument feedback.
#[derive(Debug, Clone)]
pub struct CalibrationStep {
    pub name: &'static str,
    pub description: &'static str,
    pub nominal_duration: Duration,
    pub expected_values: serde_json::Value,
    pub tolerances: serde_json::Value,
}

/// States of the step currently owned by a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Step timer armed, waiting for the outcome draw
    StepRunning,
    /// Step failed; the operator must retry or cancel
    AwaitingRetryOrCancel,
}

/// One end-to-end execution of the step sequence. Exists only while a
/// calibration is in progress; completion, failure, and cancellation all
/// destroy it.
#[derive(Debug, Clone)]
pub struct CalibrationRun {
    pub calibration_type: String,
    pub started_at: DateTime<Utc>,
    pub current_step_index: usize,
    pub retry_count: u32,
    pub state: RunState,
}

/// Engine status as observers see it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CalibrationStatus {
    #[default]
    Idle,
    StepRunning,
    AwaitingRetryOrCancel,
}

/// Write-once record persisted when a run completes successfully.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRecord {
    pub calibration_type: String,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: i64,
    pub steps_completed: usize,
    pub success: bool,
}
