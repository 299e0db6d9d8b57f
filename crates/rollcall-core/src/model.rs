//! Sessions, entries and the snapshot observers receive.
//!
//! A session is either an attendance call or a vote; both share one shape
//! and differ only in the entry payload they accept. Entry values travel on
//! the wire as their integer tag.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};

use crate::ids::{CommitteeId, DelegationId, EntryId, SessionId};

/// Which procedure a session runs.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    /// Roll call: delegations mark themselves present.
    Attendance,
    /// Substantive vote: delegations cast yes/no/abstain.
    Voting,
}

impl SessionKind {
    /// Every kind, in a stable order.
    pub const ALL: [Self; 2] = [Self::Attendance, Self::Voting];

    /// Lowercase name used in routes and storage.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Attendance => "attendance",
            Self::Voting => "voting",
        }
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "attendance" => Ok(Self::Attendance),
            "voting" => Ok(Self::Voting),
            other => Err(format!("unknown session kind: {other}")),
        }
    }
}

/// An attendance mark.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum AttendanceMark {
    /// Present; may abstain on substantive votes.
    Present = 1,
    /// Present and voting; may not abstain.
    PresentAndVoting = 2,
}

impl AttendanceMark {
    /// Decode a wire tag.
    pub const fn from_tag(tag: i64) -> Option<Self> {
        match tag {
            1 => Some(Self::Present),
            2 => Some(Self::PresentAndVoting),
            _ => None,
        }
    }
}

/// A cast vote.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum Vote {
    /// In favour.
    Yes = 1,
    /// Against.
    No = 2,
    /// Abstention.
    Abstain = 3,
}

impl Vote {
    /// Decode a wire tag.
    pub const fn from_tag(tag: i64) -> Option<Self> {
        match tag {
            1 => Some(Self::Yes),
            2 => Some(Self::No),
            3 => Some(Self::Abstain),
            _ => None,
        }
    }
}

/// The payload of an entry. Serializes as its integer tag.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum EntryValue {
    /// Attendance mark for an attendance session.
    Attendance(AttendanceMark),
    /// Vote for a voting session.
    Vote(Vote),
}

impl EntryValue {
    /// The session kind this value belongs to.
    pub const fn kind(self) -> SessionKind {
        match self {
            Self::Attendance(_) => SessionKind::Attendance,
            Self::Vote(_) => SessionKind::Voting,
        }
    }

    /// Integer wire tag.
    pub const fn tag(self) -> i64 {
        match self {
            Self::Attendance(mark) => mark as i64,
            Self::Vote(vote) => vote as i64,
        }
    }

    /// Decode a wire tag in the context of a session kind.
    pub const fn from_tag(kind: SessionKind, tag: i64) -> Option<Self> {
        match kind {
            SessionKind::Attendance => match AttendanceMark::from_tag(tag) {
                Some(mark) => Some(Self::Attendance(mark)),
                None => None,
            },
            SessionKind::Voting => match Vote::from_tag(tag) {
                Some(vote) => Some(Self::Vote(vote)),
                None => None,
            },
        }
    }
}

impl Serialize for EntryValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.tag())
    }
}

impl From<AttendanceMark> for EntryValue {
    fn from(mark: AttendanceMark) -> Self {
        Self::Attendance(mark)
    }
}

impl From<Vote> for EntryValue {
    fn from(vote: Vote) -> Self {
        Self::Vote(vote)
    }
}

/// Session header as stored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Store-assigned, monotonically increasing id.
    pub session_id: SessionId,
    /// Owning committee.
    pub committee_id: CommitteeId,
    /// Attendance or voting.
    pub kind: SessionKind,
    /// Whether this is the committee's live session of its kind.
    pub live: bool,
    /// Set at creation, never changed.
    pub open_time: DateTime<Utc>,
    /// Set exactly once, when the session closes.
    pub close_time: Option<DateTime<Utc>>,
}

/// One attendance entry or cast vote.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    /// Store-assigned, monotonically increasing id.
    pub entry_id: EntryId,
    /// Owning session.
    pub session_id: SessionId,
    /// Submitting delegation.
    pub delegation_id: DelegationId,
    /// When the entry was recorded.
    pub timestamp: DateTime<Utc>,
    /// Attendance mark or vote.
    pub value: EntryValue,
    /// `false` once an override has superseded this entry.
    pub active: bool,
}

impl Entry {
    /// Ordering key for "latest wins": timestamp, then insertion order.
    pub fn recency(&self) -> (DateTime<Utc>, EntryId) {
        (self.timestamp, self.entry_id)
    }
}

/// Full session state pushed to observers and returned to callers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    /// Session header fields, inlined.
    #[serde(flatten)]
    pub session: Session,
    /// Active entries in submission order.
    pub entries: Vec<Entry>,
}

impl SessionSnapshot {
    /// Pair a session header with its active entries.
    pub fn new(session: Session, entries: Vec<Entry>) -> Self {
        Self { session, entries }
    }

    /// The active entry for `delegation_id`, if any. When two entries tie on
    /// timestamp the later insert wins.
    pub fn active_entry(&self, delegation_id: DelegationId) -> Option<&Entry> {
        self.entries
            .iter()
            .filter(|e| e.active && e.delegation_id == delegation_id)
            .max_by_key(|e| e.recency())
    }
}

/// Which procedures a committee is currently polling.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PollStatus {
    /// Nothing live.
    None,
    /// A live attendance session only.
    Attendance,
    /// A live voting session only.
    Voting,
    /// Both an attendance and a voting session are live.
    Both,
}

impl PollStatus {
    /// Derive the status from which kinds currently have a live session.
    pub const fn from_live(attendance: bool, voting: bool) -> Self {
        match (attendance, voting) {
            (false, false) => Self::None,
            (true, false) => Self::Attendance,
            (false, true) => Self::Voting,
            (true, true) => Self::Both,
        }
    }
}
