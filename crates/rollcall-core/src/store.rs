//! Collaborator traits for persistence and the committee directory.
//!
//! The store holds no policy: it never decides which session is live or
//! whether a submission is a duplicate. Callers serialize mutations per
//! committee and re-read state on every operation.

use chrono::{DateTime, Utc};

use crate::ids::{CommitteeId, DelegationId, EntryId, SessionId};
use crate::model::{Entry, EntryValue, Session, SessionKind};

/// Errors raised by a persistence backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend rejected or failed a statement.
    #[error("database error: {0}")]
    Database(String),

    /// The addressed record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A stored row could not be decoded.
    #[error("corrupt row in {table}.{column}: {detail}")]
    CorruptRow {
        /// Table name.
        table: &'static str,
        /// Column name.
        column: &'static str,
        /// Decoder message.
        detail: String,
    },

    /// Filesystem error while opening the backend.
    #[error("IO error: {0}")]
    Io(String),
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// Durable mapping from committee to its sessions and their entries.
pub trait SessionStore: Send + Sync {
    /// Insert a new live session.
    fn create_session(
        &self,
        committee_id: CommitteeId,
        kind: SessionKind,
        open_time: DateTime<Utc>,
    ) -> Result<Session, StoreError>;

    /// In one transaction, close `replacing` (the current live session, at
    /// the paired close time) and insert a new live session. Nothing changes
    /// if either write fails.
    fn open_session(
        &self,
        committee_id: CommitteeId,
        kind: SessionKind,
        replacing: Option<(SessionId, DateTime<Utc>)>,
        open_time: DateTime<Utc>,
    ) -> Result<Session, StoreError>;

    /// Mark a session closed at `close_time`; returns the updated header.
    fn close_session(
        &self,
        session_id: SessionId,
        close_time: DateTime<Utc>,
    ) -> Result<Session, StoreError>;

    /// Fetch one session header.
    fn get_session(&self, session_id: SessionId) -> Result<Session, StoreError>;

    /// The committee's live session of `kind`, if any.
    fn get_live_session(
        &self,
        committee_id: CommitteeId,
        kind: SessionKind,
    ) -> Result<Option<Session>, StoreError>;

    /// Every session of `kind` for the committee, newest first.
    fn list_sessions(
        &self,
        committee_id: CommitteeId,
        kind: SessionKind,
    ) -> Result<Vec<Session>, StoreError>;

    /// Append an active entry.
    fn create_entry(
        &self,
        session_id: SessionId,
        delegation_id: DelegationId,
        value: EntryValue,
        timestamp: DateTime<Utc>,
    ) -> Result<Entry, StoreError>;

    /// Atomically mark `superseded` inactive and append a replacement entry.
    fn replace_entry(
        &self,
        superseded: EntryId,
        session_id: SessionId,
        delegation_id: DelegationId,
        value: EntryValue,
        timestamp: DateTime<Utc>,
    ) -> Result<Entry, StoreError>;

    /// The delegation's active entry in a session, if any.
    fn get_active_entry(
        &self,
        session_id: SessionId,
        delegation_id: DelegationId,
    ) -> Result<Option<Entry>, StoreError>;

    /// Remove an entry.
    fn delete_entry(&self, entry_id: EntryId) -> Result<(), StoreError>;

    /// Active entries of a session in submission order.
    fn list_entries(&self, session_id: SessionId) -> Result<Vec<Entry>, StoreError>;

    /// Every entry of a session, superseded ones included, in insertion order.
    fn list_entry_history(&self, session_id: SessionId) -> Result<Vec<Entry>, StoreError>;

    /// Latest active entry for a delegation across all of the committee's
    /// sessions of `kind`, ordered by timestamp then insertion.
    fn latest_entry_for_delegation(
        &self,
        committee_id: CommitteeId,
        kind: SessionKind,
        delegation_id: DelegationId,
    ) -> Result<Option<Entry>, StoreError>;
}

/// Read-only view of the committee directory.
pub trait Roster: Send + Sync {
    /// Whether the committee exists.
    fn committee_exists(&self, committee_id: CommitteeId) -> Result<bool, StoreError>;

    /// Whether the delegation sits on the committee.
    fn is_participant(
        &self,
        committee_id: CommitteeId,
        delegation_id: DelegationId,
    ) -> Result<bool, StoreError>;
}
