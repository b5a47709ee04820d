use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Permissions granted to the Operator role. Everything else is denied.
pub const OPERATOR_PERMISSIONS: [&str; 4] = [
    "run_analysis",
    "view_results",
    "export_results",
    "basic_calibration",
];

/// Operator roles. Permissions are an explicit allow-list per role, not a
/// hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Administrator,
    Supervisor,
    Operator,
}

impl Role {
    /// Demonstration role assignment by username. A production deployment
    /// would read the role from the credential record instead; kept here to
    /// preserve the reference behavior.
    pub fn for_username(username: &str) -> Role {
        match username.to_lowercase().as_str() {
            "admin" => Role::Administrator,
            "supervisor" => Role::Supervisor,
            _ => Role::Operator,
        }
    }

    pub fn allows(&self, permission: &str) -> bool {
        match self {
            Role::Administrator => true,
            Role::Supervisor => permission != "user_management" && permission != "system_config",
            Role::Operator => OPERATOR_PERMISSIONS.contains(&permission),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Administrator => write!(f, "administrator"),
            Role::Supervisor => write!(f, "supervisor"),
            Role::Operator => write!(f, "operator"),
        }
    }
}

/// Session lifecycle states.
///
/// `Expired` is transient: the expiry callback passes through it and settles
/// on `LoggedOut` before releasing the state lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    LoggedOut,
    Active,
    Warning,
    Expired,
}

/// The authenticated-operator context. Exists only while logged in.
#[derive(Debug, Clone)]
pub struct Session {
    pub username: String,
    pub role: Role,
    pub login_time: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("invalid username or password")]
    InvalidCredentials,
    #[error("storage collaborator unavailable")]
    StorageUnavailable,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn administrator_has_every_permission() {
        for permission in ["user_management", "system_config", "run_analysis", "anything"] {
            assert!(Role::Administrator.allows(permission));
        }
    }

    #[test]
    fn supervisor_is_denied_administration_only() {
        assert!(!Role::Supervisor.allows("user_management"));
        assert!(!Role::Supervisor.allows("system_config"));
        assert!(Role::Supervisor.allows("run_analysis"));
        assert!(Role::Supervisor.allows("advanced_calibration"));
    }

    #[test]
    fn operator_is_limited_to_allow_list() {
        for permission in OPERATOR_PERMISSIONS {
            assert!(Role::Operator.allows(permission));
        }
        assert!(!Role::Operator.allows("user_management"));
        assert!(!Role::Operator.allows("system_config"));
        assert!(!Role::Operator.allows("advanced_calibration"));
    }

    #[test]
    fn role_mapping_is_case_insensitive() {
        assert_eq!(Role::for_username("Admin"), Role::Administrator);
        assert_eq!(Role::for_username("SUPERVISOR"), Role::Supervisor);
        assert_eq!(Role::for_username("jsmith"), Role::Operator);
    }
}
