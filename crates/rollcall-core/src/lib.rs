//! # rollcall-core
//!
//! Shared vocabulary for the live-session coordination core.
//!
//! - [`ids`]: numeric record ids (committee, delegation, session, entry) and
//!   branded string ids for transient things like observer connections
//! - [`model`]: sessions, entries, entry values and the snapshot pushed to observers
//! - [`errors`]: the domain error taxonomy surfaced to callers
//! - [`store`]: the `SessionStore` and `Roster` collaborator traits
//! - [`identity`]: administrator identity and the per-operation authorization policy

#![deny(unsafe_code)]

pub mod errors;
pub mod identity;
pub mod ids;
pub mod model;
pub mod store;

pub use errors::{Result, RollcallError};
pub use identity::{AdminIdentity, Caller, IdentityProvider, Operation};
pub use ids::{CommitteeId, DelegationId, EntryId, ObserverId, SessionId};
pub use model::{
    AttendanceMark, Entry, EntryValue, PollStatus, Session, SessionKind, SessionSnapshot, Vote,
};
pub use store::{Roster, SessionStore, StoreError};
