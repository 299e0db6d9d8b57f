//! Session lifecycle: open, close, and live-session lookup.
//!
//! Callers must hold the committee's lock from [`CommitteeLocks`] across
//! every mutating call; nothing here locks on its own. Every call re-reads
//! the live session from the store.
//!
//! [`CommitteeLocks`]: crate::locks::CommitteeLocks

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument};

use rollcall_core::{
    CommitteeId, Result, RollcallError, Session, SessionKind, SessionSnapshot, SessionStore,
};

/// Enforces one live session per (committee, kind).
#[derive(Clone)]
pub struct LifecycleManager {
    store: Arc<dyn SessionStore>,
}

impl LifecycleManager {
    /// Manager over `store`.
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    /// Close the current live session, if any, and open a fresh one. Both
    /// writes commit together.
    #[instrument(skip(self), fields(committee_id = %committee_id, kind = %kind))]
    pub fn open(&self, kind: SessionKind, committee_id: CommitteeId) -> Result<Session> {
        let now = Utc::now();
        let previous = self.store.get_live_session(committee_id, kind)?;
        let replacing = previous
            .as_ref()
            .map(|p| (p.session_id, close_time_for(p, now)));
        let session = self.store.open_session(committee_id, kind, replacing, now)?;
        if let Some(previous) = previous {
            info!(session_id = %previous.session_id, "closed previous live session");
        }
        info!(session_id = %session.session_id, "session opened");
        Ok(session)
    }

    /// Close the live session. Fails with `NoLiveSession` when there is none.
    #[instrument(skip(self), fields(committee_id = %committee_id, kind = %kind))]
    pub fn close(&self, kind: SessionKind, committee_id: CommitteeId) -> Result<Session> {
        let live = self.require_live(kind, committee_id)?;
        let closed = self.close_at(&live, Utc::now())?;
        info!(session_id = %closed.session_id, "session closed");
        Ok(closed)
    }

    /// The live session, or `None`.
    pub fn current_live(
        &self,
        kind: SessionKind,
        committee_id: CommitteeId,
    ) -> Result<Option<Session>> {
        Ok(self.store.get_live_session(committee_id, kind)?)
    }

    /// The live session, or `NoLiveSession`.
    pub fn require_live(&self, kind: SessionKind, committee_id: CommitteeId) -> Result<Session> {
        self.current_live(kind, committee_id)?
            .ok_or(RollcallError::NoLiveSession { committee_id, kind })
    }

    /// Closed sessions, most recent first.
    pub fn history(&self, kind: SessionKind, committee_id: CommitteeId) -> Result<Vec<Session>> {
        let sessions = self.store.list_sessions(committee_id, kind)?;
        Ok(sessions.into_iter().filter(|s| !s.live).collect())
    }

    /// Pair a session with its active entries.
    pub fn snapshot(&self, session: Session) -> Result<SessionSnapshot> {
        let entries = self.store.list_entries(session.session_id)?;
        Ok(SessionSnapshot::new(session, entries))
    }

    fn close_at(&self, session: &Session, now: DateTime<Utc>) -> Result<Session> {
        let close_time = close_time_for(session, now);
        Ok(self.store.close_session(session.session_id, close_time)?)
    }
}

// A backwards clock step must not produce close_time < open_time.
fn close_time_for(session: &Session, now: DateTime<Utc>) -> DateTime<Utc> {
    let close_time = now.max(session.open_time);
    if close_time != now {
        debug!(session_id = %session.session_id, "clamped close time to open time");
    }
    close_time
}
