//! Customer session lifecycle
//!
//! A session spans one customer's visit, entry to exit. The manager
//! enforces exactly one active session per customer and a cap on
//! concurrent active sessions, and sweeps expired state periodically.

use crate::domain::{epoch_ms, CameraId, CoreError, CustomerId, SessionId};
use rustc_hash::FxHashMap;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Force-abandon active sessions older than this (ms)
pub const DEFAULT_SESSION_TIMEOUT_MS: u64 = 3_600_000;
/// Purge terminal sessions older than this (ms)
pub const DEFAULT_RETENTION_MS: u64 = 86_400_000;
/// Default cap on concurrent active sessions
pub const DEFAULT_MAX_CONCURRENT: usize = 1_000;

/// Closed set of session states.
/// `Completed` and `Abandoned` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Exiting,
    Completed,
    Abandoned,
}

impl SessionStatus {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Exiting => "exiting",
            SessionStatus::Completed => "completed",
            SessionStatus::Abandoned => "abandoned",
        }
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Abandoned)
    }
}

/// One customer's visit
#[derive(Debug, Clone, Serialize)]
pub struct CustomerSession {
    pub session_id: SessionId,
    pub customer_id: CustomerId,
    pub entry_ms: u64,
    pub exit_ms: Option<u64>,
    pub status: SessionStatus,
    pub entry_camera: Option<CameraId>,
    pub exit_camera: Option<CameraId>,
    pub cart_id: Option<String>,
}

impl CustomerSession {
    fn new(customer_id: CustomerId, entry_camera: Option<CameraId>) -> Self {
        Self {
            session_id: SessionId::generate(),
            customer_id,
            entry_ms: epoch_ms(),
            exit_ms: None,
            status: SessionStatus::Active,
            entry_camera,
            exit_camera: None,
            cart_id: None,
        }
    }

    pub fn duration_ms(&self) -> u64 {
        self.exit_ms.unwrap_or_else(epoch_ms).saturating_sub(self.entry_ms)
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }
}

/// Counts by status
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SessionStats {
    pub total: usize,
    pub active: usize,
    pub exiting: usize,
    pub completed: usize,
    pub abandoned: usize,
}

pub struct SessionManager {
    session_timeout_ms: u64,
    retention_ms: u64,
    max_concurrent: usize,
    sessions: FxHashMap<SessionId, CustomerSession>,
    /// Active/exiting session per customer; released on completion
    /// or abandonment
    by_customer: FxHashMap<CustomerId, SessionId>,
}

impl SessionManager {
    pub fn new(session_timeout_ms: u64, retention_ms: u64, max_concurrent: usize) -> Self {
        Self {
            session_timeout_ms,
            retention_ms,
            max_concurrent,
            sessions: FxHashMap::default(),
            by_customer: FxHashMap::default(),
        }
    }

    /// Create a session on customer entry.
    ///
    /// Idempotent re-entry: a customer who already holds a live
    /// session gets that session back (warn-logged, not an error).
    /// Exceeding the concurrent-session cap is `CapacityExceeded`.
    pub fn create_session(
        &mut self,
        customer_id: &CustomerId,
        entry_camera: Option<CameraId>,
    ) -> Result<CustomerSession, CoreError> {
        if let Some(existing_id) = self.by_customer.get(customer_id) {
            if let Some(existing) = self.sessions.get(existing_id) {
                if !existing.status.is_terminal() {
                    warn!(
                        customer_id = %customer_id,
                        session_id = %existing.session_id,
                        "session_already_active"
                    );
                    return Ok(existing.clone());
                }
            }
        }

        let active = self.sessions.values().filter(|s| !s.status.is_terminal()).count();
        if active >= self.max_concurrent {
            return Err(CoreError::CapacityExceeded(format!(
                "{active} concurrent sessions (max {})",
                self.max_concurrent
            )));
        }

        let session = CustomerSession::new(customer_id.clone(), entry_camera);
        info!(
            customer_id = %customer_id,
            session_id = %session.session_id,
            entry_camera = ?session.entry_camera,
            "session_created"
        );
        self.by_customer.insert(customer_id.clone(), session.session_id.clone());
        self.sessions.insert(session.session_id.clone(), session.clone());
        Ok(session)
    }

    pub fn get(&self, session_id: &SessionId) -> Option<&CustomerSession> {
        self.sessions.get(session_id)
    }

    /// Live session for a customer, if any
    pub fn get_by_customer(&self, customer_id: &CustomerId) -> Option<&CustomerSession> {
        self.by_customer.get(customer_id).and_then(|id| self.sessions.get(id))
    }

    /// Attach the cart created alongside this session
    pub fn set_cart(&mut self, session_id: &SessionId, cart_id: &str) -> Result<(), CoreError> {
        let session = self.session_mut(session_id)?;
        session.cart_id = Some(cart_id.to_string());
        debug!(session_id = %session_id, cart_id = %cart_id, "session_cart_attached");
        Ok(())
    }

    /// Customer approaching the exit
    pub fn mark_exiting(
        &mut self,
        session_id: &SessionId,
        exit_camera: Option<CameraId>,
    ) -> Result<(), CoreError> {
        let session = self.session_mut(session_id)?;
        if session.status.is_terminal() {
            warn!(session_id = %session_id, status = %session.status.as_str(), "exiting_on_terminal_session");
            return Ok(());
        }
        session.status = SessionStatus::Exiting;
        session.exit_camera = exit_camera;
        info!(session_id = %session_id, "session_exiting");
        Ok(())
    }

    /// Customer exited; releases the customer→session mapping so a
    /// new session can be created.
    pub fn complete_session(
        &mut self,
        session_id: &SessionId,
        exit_camera: Option<CameraId>,
    ) -> Result<CustomerSession, CoreError> {
        self.finish(session_id, SessionStatus::Completed, exit_camera)
    }

    /// Session given up (timeout or lost customer)
    pub fn abandon_session(&mut self, session_id: &SessionId) -> Result<CustomerSession, CoreError> {
        self.finish(session_id, SessionStatus::Abandoned, None)
    }

    fn finish(
        &mut self,
        session_id: &SessionId,
        status: SessionStatus,
        exit_camera: Option<CameraId>,
    ) -> Result<CustomerSession, CoreError> {
        let session = self.session_mut(session_id)?;
        if session.status.is_terminal() {
            warn!(
                session_id = %session_id,
                status = %session.status.as_str(),
                "transition_on_terminal_session"
            );
            return Ok(session.clone());
        }
        session.status = status;
        session.exit_ms = Some(epoch_ms());
        if exit_camera.is_some() {
            session.exit_camera = exit_camera;
        }
        let snapshot = session.clone();
        self.by_customer.remove(&snapshot.customer_id);
        info!(
            session_id = %session_id,
            customer_id = %snapshot.customer_id,
            status = %status.as_str(),
            duration_ms = %snapshot.duration_ms(),
            "session_finished"
        );
        Ok(snapshot)
    }

    fn session_mut(&mut self, session_id: &SessionId) -> Result<&mut CustomerSession, CoreError> {
        self.sessions
            .get_mut(session_id)
            .ok_or_else(|| CoreError::NotFound(format!("session {session_id}")))
    }

    /// Periodic sweep: force-abandon stale active sessions, purge
    /// terminal sessions past the retention window. Returns the
    /// customer ids whose sessions were force-abandoned so callers
    /// can release dependent state (carts, tracking history).
    pub fn cleanup_expired(&mut self) -> Vec<CustomerId> {
        let now = epoch_ms();

        let stale: Vec<SessionId> = self
            .sessions
            .values()
            .filter(|s| s.is_active() && now.saturating_sub(s.entry_ms) > self.session_timeout_ms)
            .map(|s| s.session_id.clone())
            .collect();

        let mut abandoned_customers = Vec::with_capacity(stale.len());
        for session_id in stale {
            warn!(session_id = %session_id, "session_expired");
            if let Ok(session) = self.abandon_session(&session_id) {
                abandoned_customers.push(session.customer_id);
            }
        }

        let purge: Vec<SessionId> = self
            .sessions
            .values()
            .filter(|s| {
                s.status.is_terminal()
                    && s.exit_ms.map_or(false, |t| now.saturating_sub(t) > self.retention_ms)
            })
            .map(|s| s.session_id.clone())
            .collect();
        for session_id in purge {
            self.sessions.remove(&session_id);
            debug!(session_id = %session_id, "session_purged");
        }

        abandoned_customers
    }

    pub fn stats(&self) -> SessionStats {
        let mut stats = SessionStats { total: self.sessions.len(), ..Default::default() };
        for session in self.sessions.values() {
            match session.status {
                SessionStatus::Active => stats.active += 1,
                SessionStatus::Exiting => stats.exiting += 1,
                SessionStatus::Completed => stats.completed += 1,
                SessionStatus::Abandoned => stats.abandoned += 1,
            }
        }
        stats
    }

    #[cfg(test)]
    fn backdate_entry(&mut self, session_id: &SessionId, entry_ms: u64) {
        if let Some(session) = self.sessions.get_mut(session_id) {
            session.entry_ms = entry_ms;
        }
    }

    #[cfg(test)]
    fn backdate_exit(&mut self, session_id: &SessionId, exit_ms: u64) {
        if let Some(session) = self.sessions.get_mut(session_id) {
            session.exit_ms = Some(exit_ms);
        }
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_TIMEOUT_MS, DEFAULT_RETENTION_MS, DEFAULT_MAX_CONCURRENT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn customer(id: &str) -> CustomerId {
        CustomerId::from(id)
    }

    #[test]
    fn test_create_session() {
        let mut manager = SessionManager::default();
        let session =
            manager.create_session(&customer("C1"), Some(CameraId::from("cam-1"))).unwrap();

        assert_eq!(session.status, SessionStatus::Active);
        assert_eq!(session.customer_id, customer("C1"));
        assert!(session.exit_ms.is_none());
        assert!(manager.get_by_customer(&customer("C1")).is_some());
    }

    #[test]
    fn test_create_session_idempotent_reentry() {
        let mut manager = SessionManager::default();
        let first = manager.create_session(&customer("C1"), None).unwrap();
        let second = manager.create_session(&customer("C1"), None).unwrap();

        // Same session, never a second one
        assert_eq!(first.session_id, second.session_id);
        assert_eq!(manager.stats().active, 1);
    }

    #[test]
    fn test_capacity_exceeded() {
        let mut manager =
            SessionManager::new(DEFAULT_SESSION_TIMEOUT_MS, DEFAULT_RETENTION_MS, 2);
        manager.create_session(&customer("C1"), None).unwrap();
        manager.create_session(&customer("C2"), None).unwrap();

        let result = manager.create_session(&customer("C3"), None);
        assert!(matches!(result, Err(CoreError::CapacityExceeded(_))));
    }

    #[test]
    fn test_full_lifecycle() {
        let mut manager = SessionManager::default();
        let session = manager.create_session(&customer("C1"), None).unwrap();

        manager.mark_exiting(&session.session_id, Some(CameraId::from("cam-exit"))).unwrap();
        assert_eq!(manager.get(&session.session_id).unwrap().status, SessionStatus::Exiting);

        let completed = manager.complete_session(&session.session_id, None).unwrap();
        assert_eq!(completed.status, SessionStatus::Completed);
        assert!(completed.exit_ms.is_some());
        assert_eq!(completed.exit_camera, Some(CameraId::from("cam-exit")));

        // Customer mapping released: a new session can be created
        let next = manager.create_session(&customer("C1"), None).unwrap();
        assert_ne!(next.session_id, session.session_id);
    }

    #[test]
    fn test_transition_on_unknown_session() {
        let mut manager = SessionManager::default();
        let missing = SessionId("nope".to_string());

        assert!(matches!(manager.mark_exiting(&missing, None), Err(CoreError::NotFound(_))));
        assert!(matches!(
            manager.complete_session(&missing, None),
            Err(CoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_terminal_sessions_not_mutated() {
        let mut manager = SessionManager::default();
        let session = manager.create_session(&customer("C1"), None).unwrap();
        let completed = manager.complete_session(&session.session_id, None).unwrap();

        // Abandon on a completed session is a no-op
        let after = manager.abandon_session(&session.session_id).unwrap();
        assert_eq!(after.status, SessionStatus::Completed);
        assert_eq!(after.exit_ms, completed.exit_ms);
    }

    #[test]
    fn test_cleanup_abandons_expired_active() {
        // 5s timeout; session idle 6s
        let mut manager = SessionManager::new(5_000, DEFAULT_RETENTION_MS, 100);
        let session = manager.create_session(&customer("C1"), None).unwrap();
        manager.backdate_entry(&session.session_id, epoch_ms() - 6_000);

        let abandoned = manager.cleanup_expired();
        assert_eq!(abandoned, vec![customer("C1")]);

        let swept = manager.get(&session.session_id).unwrap();
        assert_eq!(swept.status, SessionStatus::Abandoned);
        assert!(swept.exit_ms.is_some());
    }

    #[test]
    fn test_cleanup_leaves_fresh_and_terminal_alone() {
        let mut manager = SessionManager::new(5_000, DEFAULT_RETENTION_MS, 100);
        let fresh = manager.create_session(&customer("C1"), None).unwrap();
        let done = manager.create_session(&customer("C2"), None).unwrap();
        manager.complete_session(&done.session_id, None).unwrap();

        let abandoned = manager.cleanup_expired();
        assert!(abandoned.is_empty());
        assert_eq!(manager.get(&fresh.session_id).unwrap().status, SessionStatus::Active);
        assert_eq!(manager.get(&done.session_id).unwrap().status, SessionStatus::Completed);
    }

    #[test]
    fn test_cleanup_purges_past_retention() {
        let mut manager = SessionManager::new(5_000, 10_000, 100);
        let session = manager.create_session(&customer("C1"), None).unwrap();
        manager.complete_session(&session.session_id, None).unwrap();
        manager.backdate_exit(&session.session_id, epoch_ms() - 11_000);

        manager.cleanup_expired();
        assert!(manager.get(&session.session_id).is_none());
        assert_eq!(manager.stats().total, 0);
    }

    #[test]
    fn test_stats() {
        let mut manager = SessionManager::default();
        manager.create_session(&customer("C1"), None).unwrap();
        let s2 = manager.create_session(&customer("C2"), None).unwrap();
        manager.mark_exiting(&s2.session_id, None).unwrap();

        let stats = manager.stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.exiting, 1);
    }
}
