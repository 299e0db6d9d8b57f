//! # rollcall-engine
//!
//! The live-session coordination core.
//!
//! - [`LifecycleManager`]: one live session per committee and kind
//! - [`SubmissionEngine`]: duplicate, override and mark-absent rules
//! - [`BroadcastHub`]: per-committee observer sets with non-blocking fan-out
//! - [`Coordinator`]: the facade callers use; authorizes, serializes per
//!   committee, persists, then broadcasts

#![deny(unsafe_code)]

pub mod coordinator;
pub mod hub;
pub mod lifecycle;
pub mod locks;
pub mod submission;

pub use coordinator::{CommitteePoll, Coordinator, Subscription};
pub use hub::{BroadcastHub, BroadcastReport, MAX_TOTAL_DROPS, Observer, Topic};
pub use lifecycle::LifecycleManager;
pub use locks::CommitteeLocks;
pub use submission::{SubmissionEngine, SubmitMode};
