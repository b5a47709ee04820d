// Calibration Workflow Engine - ordered step sequence with retry escalation

pub mod engine;
pub mod steps;
pub mod types;

pub use engine::CalibrationEngine;
pub use steps::{standard_steps, PH_CALIBRATION_STEP, PH_ONLY_TYPE};
pub use types::{CalibrationRecord, CalibrationRun, CalibrationStatus, CalibrationStep, RunState};
