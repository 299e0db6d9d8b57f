//! Committee directory tables.
//!
//! The directory is owned by an external system that fills these tables;
//! rollcall only reads them when roster enforcement is switched on. The
//! write helpers exist for that external loader and for tests.

use rusqlite::params;
use tracing::instrument;

use rollcall_core::{CommitteeId, DelegationId, Roster, StoreError};

use crate::database::Database;

/// Read/write access to committees, delegations and their participation.
#[derive(Clone)]
pub struct RosterRepo {
    db: Database,
}

impl RosterRepo {
    /// Wrap an open database.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert or rename a committee.
    #[instrument(skip(self, name), fields(committee_id = %committee_id))]
    pub fn upsert_committee(&self, committee_id: CommitteeId, name: &str) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let _ = conn.execute(
                "INSERT INTO committees (id, name) VALUES (?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET name = excluded.name",
                params![committee_id.get(), name],
            )?;
            Ok(())
        })
    }

    /// Insert or rename a delegation.
    #[instrument(skip(self, name), fields(delegation_id = %delegation_id))]
    pub fn upsert_delegation(
        &self,
        delegation_id: DelegationId,
        name: &str,
    ) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let _ = conn.execute(
                "INSERT INTO delegations (id, name) VALUES (?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET name = excluded.name",
                params![delegation_id.get(), name],
            )?;
            Ok(())
        })
    }

    /// Seat a delegation on a committee. Both must already exist.
    #[instrument(skip(self), fields(committee_id = %committee_id, delegation_id = %delegation_id))]
    pub fn add_participant(
        &self,
        committee_id: CommitteeId,
        delegation_id: DelegationId,
    ) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let _ = conn.execute(
                "INSERT OR IGNORE INTO participants (committee_id, delegation_id) VALUES (?1, ?2)",
                params![committee_id.get(), delegation_id.get()],
            )?;
            Ok(())
        })
    }

    /// Delegations seated on a committee, by id.
    pub fn participants(&self, committee_id: CommitteeId) -> Result<Vec<DelegationId>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT delegation_id FROM participants WHERE committee_id = ?1
                 ORDER BY delegation_id",
            )?;
            let ids = stmt
                .query_map([committee_id.get()], |row| row.get::<_, i64>(0))?
                .map(|r| r.map(DelegationId::new))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ids)
        })
    }
}

impl Roster for RosterRepo {
    fn committee_exists(&self, committee_id: CommitteeId) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM committees WHERE id = ?1)",
                [committee_id.get()],
                |row| row.get(0),
            )?)
        })
    }

    fn is_participant(
        &self,
        committee_id: CommitteeId,
        delegation_id: DelegationId,
    ) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM participants
                               WHERE committee_id = ?1 AND delegation_id = ?2)",
                params![committee_id.get(), delegation_id.get()],
                |row| row.get(0),
            )?)
        })
    }
}
