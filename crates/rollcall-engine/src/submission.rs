//! Entry submission against the live session.
//!
//! At most one active entry per (session, delegation). A fresh submission
//! for a delegation that already has one is rejected; an override
//! supersedes it, keeping the old row as inactive audit history.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, instrument};

use rollcall_core::{
    CommitteeId, DelegationId, Entry, EntryValue, Result, RollcallError, SessionKind,
    SessionSnapshot, SessionStore,
};

use crate::lifecycle::LifecycleManager;

/// Whether a submission may replace an existing active entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitMode {
    /// Delegate submission; rejected if the delegation already submitted.
    Fresh,
    /// Administrator override; supersedes any existing entry.
    Override,
}

/// Applies submissions and removals. Callers hold the committee lock.
#[derive(Clone)]
pub struct SubmissionEngine {
    store: Arc<dyn SessionStore>,
    lifecycle: LifecycleManager,
}

impl SubmissionEngine {
    /// Engine over `store`.
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        let lifecycle = LifecycleManager::new(Arc::clone(&store));
        Self { store, lifecycle }
    }

    /// Record `value` for `delegation_id` in the committee's live session of
    /// the value's kind and return the refreshed snapshot.
    #[instrument(skip(self), fields(committee_id = %committee_id, delegation_id = %delegation_id))]
    pub fn submit(
        &self,
        committee_id: CommitteeId,
        delegation_id: DelegationId,
        value: EntryValue,
        mode: SubmitMode,
    ) -> Result<SessionSnapshot> {
        let session = self.lifecycle.require_live(value.kind(), committee_id)?;
        let existing = self.store.get_active_entry(session.session_id, delegation_id)?;
        let now = Utc::now();

        match (existing, mode) {
            (Some(_), SubmitMode::Fresh) => {
                return Err(RollcallError::DuplicateSubmission {
                    session_id: session.session_id,
                    delegation_id,
                });
            }
            (Some(prev), SubmitMode::Override) => {
                let entry = self.store.replace_entry(
                    prev.entry_id,
                    session.session_id,
                    delegation_id,
                    value,
                    now,
                )?;
                debug!(superseded = %prev.entry_id, entry_id = %entry.entry_id, "entry overridden");
            }
            (None, _) => {
                let entry =
                    self.store
                        .create_entry(session.session_id, delegation_id, value, now)?;
                debug!(entry_id = %entry.entry_id, "entry recorded");
            }
        }

        self.lifecycle.snapshot(session)
    }

    /// Remove the delegation's active entry. A no-op when it has none.
    #[instrument(skip(self), fields(committee_id = %committee_id, kind = %kind, delegation_id = %delegation_id))]
    pub fn remove(
        &self,
        kind: SessionKind,
        committee_id: CommitteeId,
        delegation_id: DelegationId,
    ) -> Result<SessionSnapshot> {
        let session = self.lifecycle.require_live(kind, committee_id)?;
        match self.store.get_active_entry(session.session_id, delegation_id)? {
            Some(entry) => {
                self.store.delete_entry(entry.entry_id)?;
                debug!(entry_id = %entry.entry_id, "entry removed");
            }
            None => debug!("no active entry to remove"),
        }
        self.lifecycle.snapshot(session)
    }

    /// Latest active entry for the delegation across every session of `kind`,
    /// live or closed.
    pub fn most_recent_submission(
        &self,
        kind: SessionKind,
        committee_id: CommitteeId,
        delegation_id: DelegationId,
    ) -> Result<Option<Entry>> {
        Ok(self
            .store
            .latest_entry_for_delegation(committee_id, kind, delegation_id)?)
    }

    /// Every entry of the live session, superseded ones included.
    pub fn entry_history(&self, kind: SessionKind, committee_id: CommitteeId) -> Result<Vec<Entry>> {
        let session = self.lifecycle.require_live(kind, committee_id)?;
        Ok(self.store.list_entry_history(session.session_id)?)
    }
}
