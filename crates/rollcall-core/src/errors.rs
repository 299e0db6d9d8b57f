//! Domain error taxonomy.
//!
//! Every failure a caller can observe maps to one variant with a stable
//! machine-readable [`code`](RollcallError::code), so transports can tell
//! "no live session" from "already submitted" from "not allowed".

use crate::ids::{CommitteeId, DelegationId, SessionId};
use crate::model::SessionKind;
use crate::store::StoreError;

/// Errors surfaced by lifecycle, submission and coordinator operations.
#[derive(Debug, thiserror::Error)]
pub enum RollcallError {
    /// The operation needs a live session and the committee has none.
    #[error("no live {kind} session for committee {committee_id}")]
    NoLiveSession {
        /// Committee that was addressed.
        committee_id: CommitteeId,
        /// Session kind that was addressed.
        kind: SessionKind,
    },

    /// A non-override submission for a delegation that already has an
    /// active entry in the live session.
    #[error("delegation {delegation_id} already submitted to session {session_id}")]
    DuplicateSubmission {
        /// The live session.
        session_id: SessionId,
        /// The delegation that already submitted.
        delegation_id: DelegationId,
    },

    /// A referenced committee, delegation, session or entry does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The administrative precondition was not satisfied.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Request parameters failed validation.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The persistence layer failed. Never retried automatically.
    #[error("store failure: {0}")]
    StoreFailure(String),
}

impl RollcallError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoLiveSession { .. } => "NO_LIVE_SESSION",
            Self::DuplicateSubmission { .. } => "DUPLICATE_SUBMISSION",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::StoreFailure(_) => "STORE_FAILURE",
        }
    }
}

impl From<StoreError> for RollcallError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => Self::NotFound(what),
            other => Self::StoreFailure(other.to_string()),
        }
    }
}

/// Result alias for domain operations.
pub type Result<T> = std::result::Result<T, RollcallError>;
