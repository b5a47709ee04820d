//! In-memory storage backend with the same observable behavior as the
//! reference SQLite schema: salted one-way password hashes, calibration
//! history, result rows, and an audit trail. The availability switch lets
//! tests and demos simulate a storage outage.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::analysis::AnalysisResult;
use crate::calibration::CalibrationRecord;
use crate::storage::traits::StorageOperations;

#[derive(Debug, Clone)]
struct StoredCredential {
    password_hash: String,
    salt: String,
    role: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub event: String,
    pub username: String,
    pub details: serde_json::Value,
}

#[derive(Debug, Default)]
struct StorageState {
    users: HashMap<String, StoredCredential>,
    calibrations: Vec<CalibrationRecord>,
    results: Vec<AnalysisResult>,
    audit_log: Vec<AuditEntry>,
}

#[derive(Debug, Default)]
pub struct InMemoryStorage {
    state: Mutex<StorageState>,
    unavailable: AtomicBool,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage seeded with the demonstration accounts.
    pub fn with_default_users() -> Self {
        let storage = Self::new();
        storage.create_user("admin", "admin123", "administrator");
        storage.create_user("supervisor", "supervisor123", "supervisor");
        storage.create_user("operator", "operator123", "operator");
        {
            let mut state = storage.lock_state();
            Self::append_audit(
                &mut state,
                "SYSTEM_INIT",
                "SYSTEM",
                json!({"action": "Default users created"}),
            );
        }
        storage
    }

    pub fn create_user(&self, username: &str, password: &str, role: &str) -> bool {
        if username.is_empty() || password.is_empty() {
            return false;
        }
        let salt = generate_salt();
        let password_hash = hash_password(password, &salt);
        let mut state = self.lock_state();
        state.users.insert(
            username.to_string(),
            StoredCredential {
                password_hash,
                salt,
                role: role.to_string(),
            },
        );
        Self::append_audit(
            &mut state,
            "USER_CREATED",
            "SYSTEM",
            json!({"username": username, "role": role}),
        );
        true
    }

    /// Flip availability; while unavailable every operation returns `Err`.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Role column for a stored credential. Unused by the demonstration
    /// login flow, which maps roles from usernames, but kept so the switch
    /// to credential-backed roles stays a one-line change.
    pub fn role_of(&self, username: &str) -> Option<String> {
        self.lock_state().users.get(username).map(|c| c.role.clone())
    }

    pub fn audit_log(&self) -> Vec<AuditEntry> {
        self.lock_state().audit_log.clone()
    }

    pub fn calibration_history(&self) -> Vec<CalibrationRecord> {
        self.lock_state().calibrations.clone()
    }

    /// Backdate the latest-calibration view; used to seed validity-window
    /// scenarios.
    pub fn seed_calibration_record(&self, record: CalibrationRecord) {
        self.lock_state().calibrations.push(record);
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, StorageState> {
        self.state.lock().expect("storage state mutex poisoned")
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            bail!("storage unavailable");
        }
        Ok(())
    }

    fn append_audit(
        state: &mut StorageState,
        event: &str,
        username: &str,
        details: serde_json::Value,
    ) {
        state.audit_log.push(AuditEntry {
            timestamp: Utc::now(),
            event: event.to_string(),
            username: username.to_string(),
            details,
        });
    }
}

impl StorageOperations for InMemoryStorage {
    fn verify_credential(&self, username: &str, password: &str) -> Result<bool> {
        self.check_available()?;
        if username.is_empty() || password.is_empty() {
            return Ok(false);
        }
        let mut state = self.lock_state();
        let Some(credential) = state.users.get(username).cloned() else {
            Self::append_audit(
                &mut state,
                "LOGIN_FAILED",
                username,
                json!({"reason": "User not found"}),
            );
            return Ok(false);
        };
        let verified = hash_password(password, &credential.salt) == credential.password_hash;
        if verified {
            Self::append_audit(&mut state, "LOGIN_SUCCESS", username, json!({}));
        } else {
            Self::append_audit(
                &mut state,
                "LOGIN_FAILED",
                username,
                json!({"reason": "Invalid password"}),
            );
        }
        Ok(verified)
    }

    fn update_credential(&self, username: &str, new_password: &str) -> Result<bool> {
        self.check_available()?;
        if new_password.is_empty() {
            return Ok(false);
        }
        let mut state = self.lock_state();
        let Some(credential) = state.users.get_mut(username) else {
            return Ok(false);
        };
        let salt = generate_salt();
        credential.password_hash = hash_password(new_password, &salt);
        credential.salt = salt;
        Self::append_audit(&mut state, "PASSWORD_CHANGED", username, json!({}));
        Ok(true)
    }

    fn record_audit_event(
        &self,
        event: &str,
        username: &str,
        details: serde_json::Value,
    ) -> Result<()> {
        self.check_available()?;
        let mut state = self.lock_state();
        Self::append_audit(&mut state, event, username, details);
        Ok(())
    }

    fn save_calibration_record(&self, record: &CalibrationRecord) -> Result<()> {
        self.check_available()?;
        debug!(calibration_type = %record.calibration_type, "saving calibration record");
        self.lock_state().calibrations.push(record.clone());
        Ok(())
    }

    fn load_latest_calibration_record(&self) -> Result<Option<CalibrationRecord>> {
        self.check_available()?;
        Ok(self.lock_state().calibrations.last().cloned())
    }

    fn save_result(&self, result: &AnalysisResult) -> Result<()> {
        self.check_available()?;
        debug!(sample_id = %result.sample_id, "saving analysis result");
        self.lock_state().results.push(result.clone());
        Ok(())
    }

    fn load_all_results(&self) -> Result<Vec<AnalysisResult>> {
        self.check_available()?;
        Ok(self.lock_state().results.clone())
    }
}

/// Salted one-way hash, `sha256(salt + password + salt)` rendered as hex.
fn hash_password(password: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hasher.update(salt.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

fn generate_salt() -> String {
    let mut rng = rand::rng();
    (0..32).map(|_| format!("{:02x}", rng.random::<u8>())).collect()
}
