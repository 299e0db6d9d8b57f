//! Snapshot fan-out to connected observers.
//!
//! Observers are partitioned by [`Topic`]; each topic owns an independently
//! locked set, so broadcasting to one committee never waits on another.
//! Sends are `try_send` on a bounded channel: a full channel drops that one
//! message, a closed channel gets its observer pruned.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

use dashmap::DashMap;
use metrics::{counter, gauge};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use rollcall_core::{CommitteeId, ObserverId, SessionKind, SessionSnapshot};
use rollcall_telemetry::metrics::{
    BROADCAST_DROPS_TOTAL, BROADCASTS_TOTAL, OBSERVERS_ACTIVE,
};

/// Lifetime drops after which a slow observer is disconnected.
pub const MAX_TOTAL_DROPS: u64 = 100;

/// Observer partition key.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct Topic {
    /// Committee being watched.
    pub committee_id: CommitteeId,
    /// Attendance or voting.
    pub kind: SessionKind,
}

impl Topic {
    /// Topic for `kind` sessions of `committee_id`.
    pub const fn new(committee_id: CommitteeId, kind: SessionKind) -> Self {
        Self { committee_id, kind }
    }
}

/// One connected observer.
pub struct Observer {
    /// Connection id.
    pub id: ObserverId,
    tx: mpsc::Sender<Arc<String>>,
    /// When the observer registered.
    pub connected_at: Instant,
    dropped_messages: AtomicU64,
}

impl Observer {
    /// Wrap the sending half of an observer's outbound queue.
    pub fn new(id: ObserverId, tx: mpsc::Sender<Arc<String>>) -> Self {
        Self {
            id,
            tx,
            connected_at: Instant::now(),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Observer with a fresh id and a queue of `capacity` messages.
    pub fn channel(capacity: usize) -> (Arc<Self>, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Arc::new(Self::new(ObserverId::new(), tx)), rx)
    }

    /// Total messages dropped for this observer.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    fn send(&self, message: Arc<String>) -> SendOutcome {
        match self.tx.try_send(message) {
            Ok(()) => SendOutcome::Delivered,
            Err(TrySendError::Full(_)) => {
                let drops = self.dropped_messages.fetch_add(1, Ordering::Relaxed) + 1;
                SendOutcome::Dropped(drops)
            }
            Err(TrySendError::Closed(_)) => SendOutcome::Closed,
        }
    }
}

enum SendOutcome {
    Delivered,
    Dropped(u64),
    Closed,
}

/// What one broadcast did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    /// Observers whose queue accepted the snapshot.
    pub delivered: usize,
    /// Observers whose queue was full.
    pub dropped: usize,
    /// Observers removed during this broadcast.
    pub pruned: usize,
}

type ObserverSet = Arc<RwLock<HashMap<ObserverId, Arc<Observer>>>>;

/// Per-topic observer registry.
#[derive(Default)]
pub struct BroadcastHub {
    topics: DashMap<Topic, ObserverSet>,
    active_count: AtomicUsize,
}

impl BroadcastHub {
    /// Empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `observer` under `topic`. Returns `false` if it was already there.
    pub fn register(&self, topic: Topic, observer: Arc<Observer>) -> bool {
        // The shard guard is held across the insert so `unregister` cannot
        // drop the set from the map in between.
        let set = self.topics.entry(topic).or_default();
        let inserted = set.write().insert(observer.id.clone(), observer).is_none();
        drop(set);
        if inserted {
            let total = self.active_count.fetch_add(1, Ordering::Relaxed) + 1;
            gauge!(OBSERVERS_ACTIVE).set(total as f64);
            debug!(committee_id = %topic.committee_id, kind = %topic.kind, "observer registered");
        }
        inserted
    }

    /// Remove an observer. Returns `false` if it was not registered.
    pub fn unregister(&self, topic: Topic, observer_id: &ObserverId) -> bool {
        let removed = self.remove_many(topic, std::slice::from_ref(observer_id)) > 0;
        if removed {
            debug!(committee_id = %topic.committee_id, kind = %topic.kind, observer_id = %observer_id, "observer unregistered");
        }
        removed
    }

    /// Serialize `snapshot` once and offer it to every observer of `topic`.
    pub fn broadcast(&self, topic: Topic, snapshot: &SessionSnapshot) -> BroadcastReport {
        let json = match serde_json::to_string(snapshot) {
            Ok(j) => Arc::new(j),
            Err(e) => {
                warn!(committee_id = %topic.committee_id, error = %e, "failed to serialize snapshot");
                return BroadcastReport::default();
            }
        };

        let Some(set) = self.topics.get(&topic).map(|s| Arc::clone(s.value())) else {
            debug!(committee_id = %topic.committee_id, kind = %topic.kind, "no observers registered");
            return BroadcastReport::default();
        };

        let mut report = BroadcastReport::default();
        let mut to_remove = Vec::new();
        {
            let observers = set.read();
            if observers.is_empty() {
                debug!(committee_id = %topic.committee_id, kind = %topic.kind, "no observers registered");
            }
            for observer in observers.values() {
                match observer.send(Arc::clone(&json)) {
                    SendOutcome::Delivered => report.delivered += 1,
                    SendOutcome::Dropped(drops) => {
                        report.dropped += 1;
                        counter!(BROADCAST_DROPS_TOTAL).increment(1);
                        if drops >= MAX_TOTAL_DROPS {
                            warn!(observer_id = %observer.id, drops, "disconnecting slow observer");
                            to_remove.push(observer.id.clone());
                        } else {
                            warn!(observer_id = %observer.id, total_drops = drops, "observer queue full, snapshot dropped");
                        }
                    }
                    SendOutcome::Closed => to_remove.push(observer.id.clone()),
                }
            }
        }

        if !to_remove.is_empty() {
            report.pruned = self.remove_many(topic, &to_remove);
        }
        counter!(BROADCASTS_TOTAL, "kind" => topic.kind.as_str()).increment(1);
        debug!(
            committee_id = %topic.committee_id,
            kind = %topic.kind,
            delivered = report.delivered,
            dropped = report.dropped,
            pruned = report.pruned,
            "snapshot broadcast"
        );
        report
    }

    /// Observers currently registered under `topic`.
    pub fn observer_count(&self, topic: Topic) -> usize {
        self.topics.get(&topic).map_or(0, |s| s.read().len())
    }

    /// Observers across all topics.
    pub fn total_observers(&self) -> usize {
        self.active_count.load(Ordering::Relaxed)
    }

    fn remove_many(&self, topic: Topic, ids: &[ObserverId]) -> usize {
        let Some(set) = self.topics.get(&topic).map(|s| Arc::clone(s.value())) else {
            return 0;
        };
        let removed = {
            let mut observers = set.write();
            ids.iter().filter(|id| observers.remove(*id).is_some()).count()
        };
        if removed > 0 {
            let total = self.active_count.fetch_sub(removed, Ordering::Relaxed) - removed;
            gauge!(OBSERVERS_ACTIVE).set(total as f64);
        }
        let _ = self.topics.remove_if(&topic, |_, set| set.read().is_empty());
        removed
    }
}
