//! SQL DDL for the rollcall database.
//! WAL mode + foreign keys enabled at connection time.

/// Current schema version, recorded in `schema_version` on first open.
pub const SCHEMA_VERSION: u32 = 1;

/// Tables and indexes. Idempotent.
pub const CREATE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS committees (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS delegations (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS participants (
    committee_id INTEGER NOT NULL REFERENCES committees(id) ON DELETE CASCADE,
    delegation_id INTEGER NOT NULL REFERENCES delegations(id) ON DELETE CASCADE,
    PRIMARY KEY (committee_id, delegation_id)
);

CREATE TABLE IF NOT EXISTS sessions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    committee_id INTEGER NOT NULL,
    kind TEXT NOT NULL,
    live INTEGER NOT NULL DEFAULT 1,
    open_time TEXT NOT NULL,
    close_time TEXT
);

CREATE TABLE IF NOT EXISTS entries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id INTEGER NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
    delegation_id INTEGER NOT NULL,
    value INTEGER NOT NULL,
    timestamp TEXT NOT NULL,
    active INTEGER NOT NULL DEFAULT 1
);

CREATE INDEX IF NOT EXISTS idx_sessions_committee_kind ON sessions(committee_id, kind);
CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_one_live
    ON sessions(committee_id, kind) WHERE live = 1;
CREATE INDEX IF NOT EXISTS idx_entries_session ON entries(session_id);
CREATE INDEX IF NOT EXISTS idx_entries_delegation ON entries(delegation_id);
CREATE UNIQUE INDEX IF NOT EXISTS idx_entries_one_active
    ON entries(session_id, delegation_id) WHERE active = 1;

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);
";

/// Connection pragmas.
pub const PRAGMAS: &str = r"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 5000;
PRAGMA synchronous = NORMAL;
";
