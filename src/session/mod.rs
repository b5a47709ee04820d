// Session Manager - operator login, idle timeout, and expiry warning

pub mod manager;
pub mod types;

pub use manager::SessionManager;
pub use types::{Role, Session, SessionError, SessionState, OPERATOR_PERMISSIONS};
