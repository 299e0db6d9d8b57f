use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::instrument;

use rollcall_core::{
    CommitteeId, DelegationId, Entry, EntryId, EntryValue, Session, SessionId, SessionKind,
    SessionStore, StoreError,
};

use crate::database::Database;
use crate::row_helpers::{self, format_time, parse_time};

const SESSION_COLUMNS: &str = "id, committee_id, kind, live, open_time, close_time";

const ENTRY_SELECT: &str = "SELECT e.id, e.session_id, e.delegation_id, e.timestamp, e.value, \
     e.active, s.kind FROM entries e JOIN sessions s ON s.id = e.session_id";

/// `SessionStore` over SQLite.
#[derive(Clone)]
pub struct SqliteSessionStore {
    db: Database,
}

impl SqliteSessionStore {
    /// Wrap an open database.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// The underlying handle.
    pub fn database(&self) -> &Database {
        &self.db
    }
}

fn row_to_session(row: &rusqlite::Row<'_>) -> Result<Session, StoreError> {
    let kind: String = row_helpers::get(row, 2, "sessions", "kind")?;
    let open_time: String = row_helpers::get(row, 4, "sessions", "open_time")?;
    let close_time: Option<String> = row_helpers::get_opt(row, 5, "sessions", "close_time")?;
    Ok(Session {
        session_id: SessionId::new(row_helpers::get(row, 0, "sessions", "id")?),
        committee_id: CommitteeId::new(row_helpers::get(row, 1, "sessions", "committee_id")?),
        kind: row_helpers::parse_enum(&kind, "sessions", "kind")?,
        live: row_helpers::get(row, 3, "sessions", "live")?,
        open_time: parse_time(&open_time, "sessions", "open_time")?,
        close_time: close_time
            .map(|raw| parse_time(&raw, "sessions", "close_time"))
            .transpose()?,
    })
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> Result<Entry, StoreError> {
    let timestamp: String = row_helpers::get(row, 3, "entries", "timestamp")?;
    let tag: i64 = row_helpers::get(row, 4, "entries", "value")?;
    let kind: String = row_helpers::get(row, 6, "sessions", "kind")?;
    let kind: SessionKind = row_helpers::parse_enum(&kind, "sessions", "kind")?;
    let value = EntryValue::from_tag(kind, tag).ok_or_else(|| StoreError::CorruptRow {
        table: "entries",
        column: "value",
        detail: format!("tag {tag} is not a {kind} value"),
    })?;
    Ok(Entry {
        entry_id: EntryId::new(row_helpers::get(row, 0, "entries", "id")?),
        session_id: SessionId::new(row_helpers::get(row, 1, "entries", "session_id")?),
        delegation_id: DelegationId::new(row_helpers::get(row, 2, "entries", "delegation_id")?),
        timestamp: parse_time(&timestamp, "entries", "timestamp")?,
        value,
        active: row_helpers::get(row, 5, "entries", "active")?,
    })
}

fn query_sessions(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<Session>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    let mut results = Vec::new();
    while let Some(row) = rows.next()? {
        results.push(row_to_session(row)?);
    }
    Ok(results)
}

fn query_entries(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<Entry>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    let mut results = Vec::new();
    while let Some(row) = rows.next()? {
        results.push(row_to_entry(row)?);
    }
    Ok(results)
}

fn fetch_session(conn: &Connection, session_id: SessionId) -> Result<Session, StoreError> {
    let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1");
    query_sessions(conn, &sql, [session_id.get()])?
        .pop()
        .ok_or_else(|| StoreError::NotFound(format!("session {session_id}")))
}

fn fetch_entry(conn: &Connection, entry_id: EntryId) -> Result<Entry, StoreError> {
    let sql = format!("{ENTRY_SELECT} WHERE e.id = ?1");
    query_entries(conn, &sql, [entry_id.get()])?
        .pop()
        .ok_or_else(|| StoreError::NotFound(format!("entry {entry_id}")))
}

fn insert_entry(
    conn: &Connection,
    session_id: SessionId,
    delegation_id: DelegationId,
    value: EntryValue,
    timestamp: DateTime<Utc>,
) -> Result<Entry, StoreError> {
    let kind: Option<String> = conn
        .query_row(
            "SELECT kind FROM sessions WHERE id = ?1",
            [session_id.get()],
            |row| row.get(0),
        )
        .optional()?;
    let kind: SessionKind = match kind {
        Some(raw) => row_helpers::parse_enum(&raw, "sessions", "kind")?,
        None => return Err(StoreError::NotFound(format!("session {session_id}"))),
    };
    if kind != value.kind() {
        return Err(StoreError::Database(format!(
            "{} value cannot be stored in {kind} session {session_id}",
            value.kind()
        )));
    }

    let _ = conn.execute(
        "INSERT INTO entries (session_id, delegation_id, value, timestamp, active)
         VALUES (?1, ?2, ?3, ?4, 1)",
        params![
            session_id.get(),
            delegation_id.get(),
            value.tag(),
            format_time(timestamp),
        ],
    )?;
    Ok(Entry {
        entry_id: EntryId::new(conn.last_insert_rowid()),
        session_id,
        delegation_id,
        timestamp,
        value,
        active: true,
    })
}

fn insert_session(
    conn: &Connection,
    committee_id: CommitteeId,
    kind: SessionKind,
    open_time: DateTime<Utc>,
) -> Result<Session, StoreError> {
    let _ = conn.execute(
        "INSERT INTO sessions (committee_id, kind, live, open_time) VALUES (?1, ?2, 1, ?3)",
        params![committee_id.get(), kind.as_str(), format_time(open_time)],
    )?;
    Ok(Session {
        session_id: SessionId::new(conn.last_insert_rowid()),
        committee_id,
        kind,
        live: true,
        open_time,
        close_time: None,
    })
}

impl SessionStore for SqliteSessionStore {
    #[instrument(skip(self), fields(committee_id = %committee_id, kind = %kind))]
    fn create_session(
        &self,
        committee_id: CommitteeId,
        kind: SessionKind,
        open_time: DateTime<Utc>,
    ) -> Result<Session, StoreError> {
        self.db
            .with_conn(|conn| insert_session(conn, committee_id, kind, open_time))
    }

    #[instrument(skip(self, replacing), fields(committee_id = %committee_id, kind = %kind))]
    fn open_session(
        &self,
        committee_id: CommitteeId,
        kind: SessionKind,
        replacing: Option<(SessionId, DateTime<Utc>)>,
        open_time: DateTime<Utc>,
    ) -> Result<Session, StoreError> {
        self.db.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            if let Some((previous, close_time)) = replacing {
                let changed = tx.execute(
                    "UPDATE sessions SET live = 0, close_time = ?1 WHERE id = ?2 AND live = 1",
                    params![format_time(close_time), previous.get()],
                )?;
                if changed == 0 {
                    return Err(StoreError::NotFound(format!("live session {previous}")));
                }
            }
            let session = insert_session(&tx, committee_id, kind, open_time)?;
            tx.commit()?;
            Ok(session)
        })
    }

    #[instrument(skip(self), fields(session_id = %session_id))]
    fn close_session(
        &self,
        session_id: SessionId,
        close_time: DateTime<Utc>,
    ) -> Result<Session, StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE sessions SET live = 0, close_time = ?1 WHERE id = ?2 AND live = 1",
                params![format_time(close_time), session_id.get()],
            )?;
            let session = fetch_session(conn, session_id)?;
            if changed == 0 {
                tracing::debug!(session_id = %session_id, "session was already closed");
            }
            Ok(session)
        })
    }

    fn get_session(&self, session_id: SessionId) -> Result<Session, StoreError> {
        self.db.with_conn(|conn| fetch_session(conn, session_id))
    }

    #[instrument(skip(self), fields(committee_id = %committee_id, kind = %kind))]
    fn get_live_session(
        &self,
        committee_id: CommitteeId,
        kind: SessionKind,
    ) -> Result<Option<Session>, StoreError> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {SESSION_COLUMNS} FROM sessions
                 WHERE committee_id = ?1 AND kind = ?2 AND live = 1
                 ORDER BY id DESC LIMIT 1"
            );
            Ok(query_sessions(conn, &sql, params![committee_id.get(), kind.as_str()])?.pop())
        })
    }

    #[instrument(skip(self), fields(committee_id = %committee_id, kind = %kind))]
    fn list_sessions(
        &self,
        committee_id: CommitteeId,
        kind: SessionKind,
    ) -> Result<Vec<Session>, StoreError> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {SESSION_COLUMNS} FROM sessions
                 WHERE committee_id = ?1 AND kind = ?2
                 ORDER BY open_time DESC, id DESC"
            );
            query_sessions(conn, &sql, params![committee_id.get(), kind.as_str()])
        })
    }

    #[instrument(skip(self), fields(session_id = %session_id, delegation_id = %delegation_id))]
    fn create_entry(
        &self,
        session_id: SessionId,
        delegation_id: DelegationId,
        value: EntryValue,
        timestamp: DateTime<Utc>,
    ) -> Result<Entry, StoreError> {
        self.db
            .with_conn(|conn| insert_entry(conn, session_id, delegation_id, value, timestamp))
    }

    #[instrument(skip(self), fields(superseded = %superseded, session_id = %session_id))]
    fn replace_entry(
        &self,
        superseded: EntryId,
        session_id: SessionId,
        delegation_id: DelegationId,
        value: EntryValue,
        timestamp: DateTime<Utc>,
    ) -> Result<Entry, StoreError> {
        self.db.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            let changed = tx.execute(
                "UPDATE entries SET active = 0 WHERE id = ?1 AND active = 1",
                [superseded.get()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("active entry {superseded}")));
            }
            let entry = insert_entry(&tx, session_id, delegation_id, value, timestamp)?;
            tx.commit()?;
            Ok(entry)
        })
    }

    fn get_active_entry(
        &self,
        session_id: SessionId,
        delegation_id: DelegationId,
    ) -> Result<Option<Entry>, StoreError> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "{ENTRY_SELECT} WHERE e.session_id = ?1 AND e.delegation_id = ?2 AND e.active = 1
                 ORDER BY e.timestamp DESC, e.id DESC LIMIT 1"
            );
            Ok(query_entries(conn, &sql, params![session_id.get(), delegation_id.get()])?.pop())
        })
    }

    #[instrument(skip(self), fields(entry_id = %entry_id))]
    fn delete_entry(&self, entry_id: EntryId) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM entries WHERE id = ?1", [entry_id.get()])?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("entry {entry_id}")));
            }
            Ok(())
        })
    }

    fn list_entries(&self, session_id: SessionId) -> Result<Vec<Entry>, StoreError> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "{ENTRY_SELECT} WHERE e.session_id = ?1 AND e.active = 1
                 ORDER BY e.timestamp ASC, e.id ASC"
            );
            query_entries(conn, &sql, [session_id.get()])
        })
    }

    fn list_entry_history(&self, session_id: SessionId) -> Result<Vec<Entry>, StoreError> {
        self.db.with_conn(|conn| {
            let sql = format!("{ENTRY_SELECT} WHERE e.session_id = ?1 ORDER BY e.id ASC");
            query_entries(conn, &sql, [session_id.get()])
        })
    }

    #[instrument(skip(self), fields(committee_id = %committee_id, kind = %kind, delegation_id = %delegation_id))]
    fn latest_entry_for_delegation(
        &self,
        committee_id: CommitteeId,
        kind: SessionKind,
        delegation_id: DelegationId,
    ) -> Result<Option<Entry>, StoreError> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "{ENTRY_SELECT}
                 WHERE s.committee_id = ?1 AND s.kind = ?2 AND e.delegation_id = ?3 AND e.active = 1
                 ORDER BY e.timestamp DESC, e.id DESC LIMIT 1"
            );
            Ok(query_entries(
                conn,
                &sql,
                params![committee_id.get(), kind.as_str(), delegation_id.get()],
            )?
            .pop())
        })
    }
}

impl SqliteSessionStore {
    /// Fetch one entry regardless of its active flag.
    pub fn get_entry(&self, entry_id: EntryId) -> Result<Entry, StoreError> {
        self.db.with_conn(|conn| fetch_entry(conn, entry_id))
    }
}
