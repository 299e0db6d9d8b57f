//! The facade every caller goes through.
//!
//! Each operation authorizes the caller, optionally checks the roster,
//! then, for mutations, takes the committee lock, applies the change,
//! builds the snapshot and hands it to the hub before releasing the lock.
//! A failed operation never broadcasts.

use std::sync::Arc;

use metrics::counter;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, instrument};

use rollcall_core::{
    Caller, CommitteeId, DelegationId, Entry, EntryValue, ObserverId, Operation, PollStatus,
    Result, RollcallError, Roster, SessionKind, SessionSnapshot, SessionStore,
};
use rollcall_telemetry::metrics::OPERATIONS_TOTAL;

use crate::hub::{BroadcastHub, Observer, Topic};
use crate::lifecycle::LifecycleManager;
use crate::locks::CommitteeLocks;
use crate::submission::{SubmissionEngine, SubmitMode};

/// Which kinds a committee is polling.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitteePoll {
    /// The committee.
    pub committee_id: CommitteeId,
    /// Derived from the live sessions.
    pub poll: PollStatus,
}

/// A registered observer's receiving end. Unregisters on drop.
pub struct Subscription {
    hub: Arc<BroadcastHub>,
    topic: Topic,
    id: ObserverId,
    rx: mpsc::Receiver<Arc<String>>,
}

impl Subscription {
    /// Observer id.
    pub fn id(&self) -> &ObserverId {
        &self.id
    }

    /// What this subscription watches.
    pub fn topic(&self) -> Topic {
        self.topic
    }

    /// Next serialized snapshot; `None` once the hub dropped this observer.
    pub async fn recv(&mut self) -> Option<Arc<String>> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let _ = self.hub.unregister(self.topic, &self.id);
    }
}

/// Sequences authorization, locking, persistence and broadcast.
pub struct Coordinator {
    lifecycle: LifecycleManager,
    submissions: SubmissionEngine,
    hub: Arc<BroadcastHub>,
    locks: CommitteeLocks,
    roster: Option<Arc<dyn Roster>>,
}

impl Coordinator {
    /// Coordinator over `store`, broadcasting through `hub`.
    pub fn new(store: Arc<dyn SessionStore>, hub: Arc<BroadcastHub>) -> Self {
        Self {
            lifecycle: LifecycleManager::new(Arc::clone(&store)),
            submissions: SubmissionEngine::new(store),
            hub,
            locks: CommitteeLocks::new(),
            roster: None,
        }
    }

    /// Reject unknown committees and non-participating delegations.
    #[must_use]
    pub fn with_roster(mut self, roster: Arc<dyn Roster>) -> Self {
        self.roster = Some(roster);
        self
    }

    /// The hub snapshots are broadcast through.
    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    /// Open a session, closing any live one of the same kind.
    #[instrument(skip(self, caller), fields(committee_id = %committee_id, kind = %kind))]
    pub fn start(
        &self,
        caller: &Caller,
        kind: SessionKind,
        committee_id: CommitteeId,
    ) -> Result<SessionSnapshot> {
        self.mutate(Operation::Start, caller, kind, committee_id, None, || {
            let session = self.lifecycle.open(kind, committee_id)?;
            self.lifecycle.snapshot(session)
        })
    }

    /// Close the live session.
    #[instrument(skip(self, caller), fields(committee_id = %committee_id, kind = %kind))]
    pub fn end(
        &self,
        caller: &Caller,
        kind: SessionKind,
        committee_id: CommitteeId,
    ) -> Result<SessionSnapshot> {
        self.mutate(Operation::End, caller, kind, committee_id, None, || {
            let session = self.lifecycle.close(kind, committee_id)?;
            self.lifecycle.snapshot(session)
        })
    }

    /// Delegate submission. Fails with `DuplicateSubmission` if the
    /// delegation already has an active entry.
    #[instrument(skip(self, caller), fields(committee_id = %committee_id, delegation_id = %delegation_id))]
    pub fn submit(
        &self,
        caller: &Caller,
        committee_id: CommitteeId,
        delegation_id: DelegationId,
        value: EntryValue,
    ) -> Result<SessionSnapshot> {
        self.mutate(
            Operation::Submit,
            caller,
            value.kind(),
            committee_id,
            Some(delegation_id),
            || {
                self.submissions
                    .submit(committee_id, delegation_id, value, SubmitMode::Fresh)
            },
        )
    }

    /// Administrator replacement of a delegation's entry.
    #[instrument(skip(self, caller), fields(committee_id = %committee_id, delegation_id = %delegation_id))]
    pub fn override_entry(
        &self,
        caller: &Caller,
        committee_id: CommitteeId,
        delegation_id: DelegationId,
        value: EntryValue,
    ) -> Result<SessionSnapshot> {
        self.mutate(
            Operation::Override,
            caller,
            value.kind(),
            committee_id,
            Some(delegation_id),
            || {
                self.submissions
                    .submit(committee_id, delegation_id, value, SubmitMode::Override)
            },
        )
    }

    /// Remove a delegation's active entry.
    #[instrument(skip(self, caller), fields(committee_id = %committee_id, kind = %kind, delegation_id = %delegation_id))]
    pub fn mark_absent(
        &self,
        caller: &Caller,
        kind: SessionKind,
        committee_id: CommitteeId,
        delegation_id: DelegationId,
    ) -> Result<SessionSnapshot> {
        self.mutate(
            Operation::MarkAbsent,
            caller,
            kind,
            committee_id,
            Some(delegation_id),
            || self.submissions.remove(kind, committee_id, delegation_id),
        )
    }

    /// The live session with its entries, or `None`.
    pub fn live(
        &self,
        caller: &Caller,
        kind: SessionKind,
        committee_id: CommitteeId,
    ) -> Result<Option<SessionSnapshot>> {
        self.read(Operation::Live, caller, committee_id, None, || {
            self.lifecycle
                .current_live(kind, committee_id)?
                .map(|s| self.lifecycle.snapshot(s))
                .transpose()
        })
    }

    /// Closed sessions with their entries, most recent first.
    pub fn history(
        &self,
        caller: &Caller,
        kind: SessionKind,
        committee_id: CommitteeId,
    ) -> Result<Vec<SessionSnapshot>> {
        self.read(Operation::History, caller, committee_id, None, || {
            self.lifecycle
                .history(kind, committee_id)?
                .into_iter()
                .map(|s| self.lifecycle.snapshot(s))
                .collect()
        })
    }

    /// The delegation's latest entry across every session of `kind`.
    pub fn most_recent_submission(
        &self,
        caller: &Caller,
        kind: SessionKind,
        committee_id: CommitteeId,
        delegation_id: DelegationId,
    ) -> Result<Option<Entry>> {
        self.read(
            Operation::MostRecent,
            caller,
            committee_id,
            Some(delegation_id),
            || {
                self.submissions
                    .most_recent_submission(kind, committee_id, delegation_id)
            },
        )
    }

    /// Every entry of the live session, superseded ones included.
    pub fn entry_history(
        &self,
        caller: &Caller,
        kind: SessionKind,
        committee_id: CommitteeId,
    ) -> Result<Vec<Entry>> {
        self.read(Operation::EntryHistory, caller, committee_id, None, || {
            self.submissions.entry_history(kind, committee_id)
        })
    }

    /// Which kinds currently have a live session.
    pub fn poll_status(&self, caller: &Caller, committee_id: CommitteeId) -> Result<CommitteePoll> {
        self.read(Operation::PollStatus, caller, committee_id, None, || {
            let attendance = self
                .lifecycle
                .current_live(SessionKind::Attendance, committee_id)?
                .is_some();
            let voting = self
                .lifecycle
                .current_live(SessionKind::Voting, committee_id)?
                .is_some();
            Ok(CommitteePoll {
                committee_id,
                poll: PollStatus::from_live(attendance, voting),
            })
        })
    }

    /// Register an observer for `kind` snapshots of `committee_id`.
    pub fn observe(
        &self,
        caller: &Caller,
        kind: SessionKind,
        committee_id: CommitteeId,
        queue_size: usize,
    ) -> Result<Subscription> {
        self.read(Operation::Observe, caller, committee_id, None, || {
            let topic = Topic::new(committee_id, kind);
            let (observer, rx) = Observer::channel(queue_size);
            let id = observer.id.clone();
            let _ = self.hub.register(topic, observer);
            Ok(Subscription {
                hub: Arc::clone(&self.hub),
                topic,
                id,
                rx,
            })
        })
    }

    fn mutate(
        &self,
        op: Operation,
        caller: &Caller,
        kind: SessionKind,
        committee_id: CommitteeId,
        delegation_id: Option<DelegationId>,
        apply: impl FnOnce() -> Result<SessionSnapshot>,
    ) -> Result<SessionSnapshot> {
        let result = self.precheck(op, caller, committee_id, delegation_id).and_then(|()| {
            let lock = self.locks.get(committee_id);
            let _guard = lock.lock();
            let snapshot = apply()?;
            let report = self.hub.broadcast(Topic::new(committee_id, kind), &snapshot);
            debug!(op = op.as_str(), delivered = report.delivered, "mutation applied");
            Ok(snapshot)
        });
        record(op, &result);
        result
    }

    fn read<T>(
        &self,
        op: Operation,
        caller: &Caller,
        committee_id: CommitteeId,
        delegation_id: Option<DelegationId>,
        query: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        let result = self
            .precheck(op, caller, committee_id, delegation_id)
            .and_then(|()| query());
        record(op, &result);
        result
    }

    fn precheck(
        &self,
        op: Operation,
        caller: &Caller,
        committee_id: CommitteeId,
        delegation_id: Option<DelegationId>,
    ) -> Result<()> {
        caller.authorize(op)?;
        let Some(roster) = &self.roster else {
            return Ok(());
        };
        if !roster.committee_exists(committee_id)? {
            return Err(RollcallError::NotFound(format!("committee {committee_id}")));
        }
        match delegation_id {
            Some(delegation_id) if !roster.is_participant(committee_id, delegation_id)? => Err(
                RollcallError::NotFound(format!(
                    "delegation {delegation_id} in committee {committee_id}"
                )),
            ),
            _ => Ok(()),
        }
    }
}

fn record<T>(op: Operation, result: &Result<T>) {
    let outcome = match result {
        Ok(_) => "ok",
        Err(e) => e.code(),
    };
    counter!(OPERATIONS_TOTAL, "op" => op.as_str(), "outcome" => outcome).increment(1);
}
