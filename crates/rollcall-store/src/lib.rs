//! SQLite persistence for rollcall.
//!
//! [`SqliteSessionStore`] implements both collaborator traits from
//! `rollcall-core` over one shared [`Database`] handle. The store is pure
//! data access: which session is live, and whether a submission is a
//! duplicate, are decided by the engine.

#![deny(unsafe_code)]

pub mod database;
pub mod roster;
pub mod row_helpers;
pub mod schema;
pub mod sessions;

pub use database::Database;
pub use roster::RosterRepo;
pub use sessions::SqliteSessionStore;
