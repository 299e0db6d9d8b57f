//! Per-committee mutation locks.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use rollcall_core::CommitteeId;

/// One mutex per committee, created on first use.
///
/// Committees never contend with each other: the map is sharded and each
/// entry is an independent lock. Entries are never removed; a committee
/// costs one `Arc<Mutex<()>>` for the life of the process.
#[derive(Default)]
pub struct CommitteeLocks {
    locks: DashMap<CommitteeId, Arc<Mutex<()>>>,
}

impl CommitteeLocks {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock for `committee_id`. Clone out of the map so the shard is
    /// released before the caller blocks on the mutex.
    pub fn get(&self, committee_id: CommitteeId) -> Arc<Mutex<()>> {
        self.locks
            .entry(committee_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Number of committees seen so far.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Whether no committee has been locked yet.
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn same_committee_same_lock() {
        let locks = CommitteeLocks::new();
        let a = locks.get(CommitteeId::new(1));
        let b = locks.get(CommitteeId::new(1));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(locks.len(), 1);
    }

    #[test]
    fn different_committees_do_not_contend() {
        let locks = CommitteeLocks::new();
        let a = locks.get(CommitteeId::new(1));
        let _held = a.lock();
        let b = locks.get(CommitteeId::new(2));
        assert!(b.try_lock().is_some());
    }

    #[test]
    fn serializes_critical_sections() {
        let locks = Arc::new(CommitteeLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let inside = Arc::clone(&inside);
                thread::spawn(move || {
                    for _ in 0..100 {
                        let lock = locks.get(CommitteeId::new(7));
                        let _guard = lock.lock();
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                        let _ = inside.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }
}
