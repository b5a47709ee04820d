use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tokio::sync::{broadcast, Mutex};
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::config::SessionConfig;
use crate::events::{SessionEvent, EVENT_CHANNEL_CAPACITY};
use crate::session::types::{Role, Session, SessionError, SessionState};
use crate::storage::StorageOperations;
use crate::timing::{self, Generation};

/// Owns operator login state and the session expiry timers.
///
/// State transitions: `LoggedOut → Active → Warning → Expired → LoggedOut`,
/// with `Active → LoggedOut` on explicit logout. Three timers are armed per
/// login: a one-shot warning timer, a one-shot expiry timer, and a repeating
/// ticker that only refreshes `session_time_remaining` for observers. All
/// three carry the generation token they were armed with and become no-ops
/// once a logout, expiry, or extension bumps it.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Mutex<SessionInner>>,
    storage: Arc<dyn StorageOperations>,
    events: broadcast::Sender<SessionEvent>,
    config: SessionConfig,
}

#[derive(Debug, Default)]
struct SessionInner {
    state: SessionState,
    session: Option<Session>,
    /// Expiry deadline on the runtime clock, tracked separately from the
    /// wall-clock instants in `Session` so tests can drive it.
    deadline: Option<Instant>,
    timer_generation: Generation,
}

impl SessionManager {
    pub fn new(storage: Arc<dyn StorageOperations>, config: SessionConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Mutex::new(SessionInner::default())),
            storage,
            events,
            config,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Authenticate and start a session.
    ///
    /// A login attempt while a session exists replaces it: the old session is
    /// ended once the credential check has been reached, whether or not the
    /// new credentials verify. A storage outage aborts before any state
    /// change.
    pub async fn login(&self, username: &str, password: &str) -> Result<(), SessionError> {
        if username.is_empty() || password.is_empty() {
            warn!("login rejected: username and password are required");
            return Err(SessionError::InvalidCredentials);
        }

        let verified = self
            .storage
            .verify_credential(username, password)
            .map_err(|e| {
                error!(error = %e, "credential verification unavailable");
                SessionError::StorageUnavailable
            })?;

        let mut inner = self.inner.lock().await;
        if inner.session.is_some() {
            self.clear_session_locked(&mut inner);
            let _ = self.events.send(SessionEvent::Ended);
            let _ = self
                .events
                .send(SessionEvent::CurrentUserChanged { username: None });
        }

        if !verified {
            warn!(username, "login rejected: invalid credentials");
            return Err(SessionError::InvalidCredentials);
        }

        let role = Role::for_username(username);
        let now = Utc::now();
        inner.session = Some(Session {
            username: username.to_string(),
            role,
            login_time: now,
            last_activity: now,
        });
        inner.state = SessionState::Active;
        inner.deadline = Some(Instant::now() + self.config.duration());
        let generation = inner.timer_generation.bump();
        drop(inner);

        self.arm_timers(generation);
        info!(username, role = %role, "user logged in");
        let _ = self.events.send(SessionEvent::Started {
            username: username.to_string(),
            role,
        });
        let _ = self.events.send(SessionEvent::CurrentUserChanged {
            username: Some(username.to_string()),
        });
        Ok(())
    }

    /// End the current session. No-op when not logged in.
    pub async fn logout(&self) {
        let mut inner = self.inner.lock().await;
        if inner.session.is_none() {
            return;
        }
        let username = self.clear_session_locked(&mut inner);
        drop(inner);

        info!(username, "user logged out");
        let _ = self.events.send(SessionEvent::Ended);
        let _ = self
            .events
            .send(SessionEvent::CurrentUserChanged { username: None });
        if let Err(e) = self
            .storage
            .record_audit_event("LOGOUT", &username, json!({}))
        {
            warn!(error = %e, "failed to record logout audit event");
        }
    }

    /// Reset the idle timeout from now. No-op when not logged in.
    pub async fn extend_session(&self) {
        let mut inner = self.inner.lock().await;
        let Some(session) = inner.session.as_mut() else {
            return;
        };
        session.last_activity = Utc::now();
        let username = session.username.clone();
        if inner.state == SessionState::Warning {
            inner.state = SessionState::Active;
        }
        inner.deadline = Some(Instant::now() + self.config.duration());
        let generation = inner.timer_generation.bump();
        drop(inner);

        self.arm_timers(generation);
        info!(username, "session extended");
        let _ = self.events.send(SessionEvent::TimeRemainingChanged {
            seconds: self.config.duration().as_secs() as i64,
        });
    }

    /// Change the logged-in user's password. Returns false unless logged in,
    /// both fields are non-empty, and storage confirms the current password.
    pub async fn change_password(&self, current: &str, new: &str) -> bool {
        if current.is_empty() || new.is_empty() {
            return false;
        }
        let username = {
            let inner = self.inner.lock().await;
            match inner.session.as_ref() {
                Some(session) => session.username.clone(),
                None => return false,
            }
        };

        match self.storage.verify_credential(&username, current) {
            Ok(true) => {}
            Ok(false) => return false,
            Err(e) => {
                error!(error = %e, "password change aborted: storage unavailable");
                return false;
            }
        }

        match self.storage.update_credential(&username, new) {
            Ok(updated) => {
                if updated {
                    info!(username, "password changed");
                }
                updated
            }
            Err(e) => {
                error!(error = %e, "password update failed");
                false
            }
        }
    }

    pub async fn has_permission(&self, permission: &str) -> bool {
        let inner = self.inner.lock().await;
        inner
            .session
            .as_ref()
            .is_some_and(|session| session.role.allows(permission))
    }

    /// Whole seconds until the idle timeout fires; 0 when not logged in.
    pub async fn session_time_remaining(&self) -> i64 {
        let inner = self.inner.lock().await;
        if inner.session.is_none() {
            return 0;
        }
        match inner.deadline {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()).as_secs() as i64,
            None => 0,
        }
    }

    pub async fn current_user(&self) -> Option<String> {
        let inner = self.inner.lock().await;
        inner.session.as_ref().map(|s| s.username.clone())
    }

    pub async fn current_role(&self) -> Option<Role> {
        let inner = self.inner.lock().await;
        inner.session.as_ref().map(|s| s.role)
    }

    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state
    }

    pub async fn is_logged_in(&self) -> bool {
        self.inner.lock().await.session.is_some()
    }

    fn arm_timers(&self, generation: Generation) {
        let duration = self.config.duration();
        let warning_at = duration.saturating_sub(self.config.warning_lead());

        let manager = self.clone();
        timing::spawn_after(warning_at, async move {
            manager.on_warning_timer(generation).await;
        });

        let manager = self.clone();
        timing::spawn_after(duration, async move {
            manager.on_expiry_timer(generation).await;
        });

        let manager = self.clone();
        timing::spawn_every(self.config.ticker_period(), move || {
            let manager = manager.clone();
            async move { manager.on_ticker(generation).await }
        });
    }

    async fn on_warning_timer(&self, generation: Generation) {
        let mut inner = self.inner.lock().await;
        if inner.timer_generation != generation || inner.session.is_none() {
            return;
        }
        if inner.state == SessionState::Active {
            inner.state = SessionState::Warning;
            let username = inner.session.as_ref().map(|s| s.username.clone());
            drop(inner);
            warn!(?username, "session expiring soon");
            let _ = self.events.send(SessionEvent::Expiring);
        }
    }

    async fn on_expiry_timer(&self, generation: Generation) {
        let mut inner = self.inner.lock().await;
        if inner.timer_generation != generation || inner.session.is_none() {
            return;
        }
        // Transient Expired state; settles on LoggedOut before the lock drops.
        inner.state = SessionState::Expired;
        let username = self.clear_session_locked(&mut inner);
        drop(inner);

        info!(username, "session expired");
        let _ = self.events.send(SessionEvent::Expired);
        let _ = self
            .events
            .send(SessionEvent::CurrentUserChanged { username: None });
        if let Err(e) = self
            .storage
            .record_audit_event("SESSION_EXPIRED", &username, json!({}))
        {
            warn!(error = %e, "failed to record session expiry audit event");
        }
    }

    async fn on_ticker(&self, generation: Generation) -> bool {
        let inner = self.inner.lock().await;
        if inner.timer_generation != generation || inner.session.is_none() {
            return false;
        }
        let seconds = match inner.deadline {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()).as_secs() as i64,
            None => 0,
        };
        drop(inner);
        let _ = self
            .events
            .send(SessionEvent::TimeRemainingChanged { seconds });
        true
    }

    /// Clears all session fields and disarms timers. Returns the username the
    /// session belonged to.
    fn clear_session_locked(&self, inner: &mut SessionInner) -> String {
        let username = inner
            .session
            .take()
            .map(|s| s.username)
            .unwrap_or_default();
        inner.state = SessionState::LoggedOut;
        inner.deadline = None;
        inner.timer_generation.bump();
        username
    }
}
