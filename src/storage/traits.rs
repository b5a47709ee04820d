use anyhow::Result;

use crate::analysis::AnalysisResult;
use crate::calibration::CalibrationRecord;

/// Persistent storage interface consumed by all three managers.
///
/// An `Err` from any method means the collaborator is unreachable; the
/// managers translate that into their own failure semantics. `Ok(false)` from
/// the credential methods is an ordinary rejection.
pub trait StorageOperations: Send + Sync {
    /// Check a username/password pair against the stored credential
    fn verify_credential(&self, username: &str, password: &str) -> Result<bool>;

    /// Replace the stored password for a user
    fn update_credential(&self, username: &str, new_password: &str) -> Result<bool>;

    /// Append an entry to the audit trail
    fn record_audit_event(&self, event: &str, username: &str, details: serde_json::Value)
        -> Result<()>;

    /// Persist a completed calibration run
    fn save_calibration_record(&self, record: &CalibrationRecord) -> Result<()>;

    /// Most recent calibration record, if any calibration ever completed
    fn load_latest_calibration_record(&self) -> Result<Option<CalibrationRecord>>;

    /// Persist a finished analysis result
    fn save_result(&self, result: &AnalysisResult) -> Result<()>;

    /// All stored analysis results, oldest first
    fn load_all_results(&self) -> Result<Vec<AnalysisResult>>;
}

/// Outbound result export (HL7 messaging in the reference setup).
///
/// Best-effort: callers log a false/`Err` outcome and move on; a failed
/// export never invalidates the result it carried.
pub trait ExportOperations: Send + Sync {
    fn export_result(&self, result: &AnalysisResult) -> Result<bool>;
}
