// Hemogas Library - Blood Gas Analyzer Simulation
// This exposes the core components for testing and integration

pub mod analysis;
pub mod calibration;
pub mod config;
pub mod events;
pub mod hl7;
pub mod sampling;
pub mod session;
pub mod storage;
pub mod timing;

// Re-export key types for easy access
pub use analysis::{
    interpret, AnalysisError, AnalysisGate, AnalysisRequest, AnalysisResult, AnalysisState,
    Interpretation,
};
pub use calibration::{CalibrationEngine, CalibrationRecord, CalibrationStatus};
pub use crate::config::HemogasConfig;
pub use events::{AnalysisEvent, CalibrationEvent, SessionEvent};
pub use hl7::{Hl7Exporter, Hl7Message};
pub use sampling::{RandomSampler, Sampler, ScriptedSampler};
pub use session::{Role, Session, SessionError, SessionManager, SessionState};
pub use storage::{ExportOperations, InMemoryStorage, StorageOperations};
