//! Administrator identity and the per-operation authorization policy.
//!
//! Delegations may submit their own attendance or vote without an
//! administrator identity; overriding or removing an entry, opening or
//! closing a session, reading closed history and reading the incident
//! log all require one.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, RollcallError};

/// An authenticated administrator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminIdentity {
    /// Login name of the administrator.
    pub username: String,
}

/// Who is invoking an operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Caller {
    /// Carries a valid administrator identity.
    Admin(AdminIdentity),
    /// No identity, or one the identity collaborator rejected.
    Anonymous,
}

impl Caller {
    /// Build a caller from the identity collaborator's verdict.
    pub fn from_identity(identity: Option<AdminIdentity>) -> Self {
        identity.map_or(Self::Anonymous, Self::Admin)
    }

    /// The administrator name, when present.
    pub fn admin_name(&self) -> Option<&str> {
        match self {
            Self::Admin(id) => Some(&id.username),
            Self::Anonymous => None,
        }
    }

    /// Check this caller against the policy for `op`.
    pub fn authorize(&self, op: Operation) -> Result<()> {
        if op.requires_admin() && matches!(self, Self::Anonymous) {
            return Err(RollcallError::Unauthorized(format!(
                "{} requires an administrator",
                op.as_str()
            )));
        }
        Ok(())
    }
}

/// Every operation exposed through the coordinator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Open a session.
    Start,
    /// Close the live session.
    End,
    /// Delegate-submitted entry.
    Submit,
    /// Administrator replacement of an entry.
    Override,
    /// Administrator removal of an entry.
    MarkAbsent,
    /// Read the live session.
    Live,
    /// Read closed sessions.
    History,
    /// Read every entry of the live session, superseded ones included.
    EntryHistory,
    /// Read a delegation's latest entry.
    MostRecent,
    /// Read which kinds are live.
    PollStatus,
    /// Subscribe to snapshots.
    Observe,
    /// Read persisted warnings and errors.
    Incidents,
}

impl Operation {
    /// Whether the identity collaborator must vouch for the caller.
    pub const fn requires_admin(self) -> bool {
        match self {
            Self::Start
            | Self::End
            | Self::Override
            | Self::MarkAbsent
            | Self::History
            | Self::EntryHistory
            | Self::Incidents => true,
            Self::Submit | Self::Live | Self::MostRecent | Self::PollStatus | Self::Observe => {
                false
            }
        }
    }

    /// Whether a successful call changes state and must broadcast.
    pub const fn mutates(self) -> bool {
        matches!(
            self,
            Self::Start | Self::End | Self::Submit | Self::Override | Self::MarkAbsent
        )
    }

    /// Short label for logs and metrics.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::End => "end",
            Self::Submit => "submit",
            Self::Override => "override",
            Self::MarkAbsent => "mark_absent",
            Self::Live => "live",
            Self::History => "history",
            Self::EntryHistory => "entry_history",
            Self::MostRecent => "most_recent",
            Self::PollStatus => "poll_status",
            Self::Observe => "observe",
            Self::Incidents => "incidents",
        }
    }
}

/// Resolves request credentials to an administrator identity.
pub trait IdentityProvider: Send + Sync {
    /// Verify a bearer credential. `None` means no valid identity.
    fn authenticate(&self, bearer: Option<&str>) -> Option<AdminIdentity>;
}
