//! HTTP handlers.
//!
//! Each handler parses the `{kind}` segment and query parameters, resolves
//! the caller, then runs the synchronous coordinator call on the blocking
//! pool. Committee and delegation ids travel as query parameters.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::QueryRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use rollcall_core::{
    CommitteeId, DelegationId, Entry, EntryValue, Operation, RollcallError, SessionKind,
    SessionSnapshot,
};
use rollcall_engine::CommitteePoll;
use rollcall_telemetry::{Incident, IncidentFilter};

use crate::auth::AuthCaller;
use crate::errors::ApiError;
use crate::server::AppState;
use crate::websocket::run_observer_session;

type Params<T> = Result<Query<T>, QueryRejection>;

#[derive(Debug, Deserialize)]
pub(crate) struct CommitteeParams {
    committee_id: i64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DelegationParams {
    committee_id: i64,
    delegation_id: i64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ValueParams {
    committee_id: i64,
    delegation_id: i64,
    value: i64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct IncidentParams {
    committee_id: Option<i64>,
    kind: Option<String>,
    #[serde(default)]
    errors_only: bool,
    limit: Option<u32>,
}

fn params<T>(query: Params<T>) -> Result<T, ApiError> {
    query
        .map(|Query(p)| p)
        .map_err(|e| RollcallError::InvalidInput(e.body_text()).into())
}

// Unknown kinds are unknown routes.
fn parse_kind(raw: &str) -> Result<SessionKind, ApiError> {
    raw.parse()
        .map_err(|e: String| RollcallError::NotFound(e).into())
}

fn parse_value(kind: SessionKind, tag: i64) -> Result<EntryValue, ApiError> {
    EntryValue::from_tag(kind, tag).ok_or_else(|| {
        RollcallError::InvalidInput(format!("{tag} is not a valid {kind} value")).into()
    })
}

/// Run a coordinator call off the async runtime.
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> rollcall_core::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::internal(format!("blocking task failed: {e}")))?
        .map_err(ApiError::from)
}

/// `POST /{kind}/start?committee_id`
pub(crate) async fn start(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    AuthCaller(caller): AuthCaller,
    query: Params<CommitteeParams>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    let kind = parse_kind(&kind)?;
    let p = params(query)?;
    let coordinator = Arc::clone(&state.coordinator);
    let snapshot =
        blocking(move || coordinator.start(&caller, kind, CommitteeId::new(p.committee_id)))
            .await?;
    Ok(Json(snapshot))
}

/// `POST /{kind}/end?committee_id`
pub(crate) async fn end(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    AuthCaller(caller): AuthCaller,
    query: Params<CommitteeParams>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    let kind = parse_kind(&kind)?;
    let p = params(query)?;
    let coordinator = Arc::clone(&state.coordinator);
    let snapshot =
        blocking(move || coordinator.end(&caller, kind, CommitteeId::new(p.committee_id))).await?;
    Ok(Json(snapshot))
}

/// `GET /{kind}?committee_id`, `null` when nothing is live.
pub(crate) async fn live(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    AuthCaller(caller): AuthCaller,
    query: Params<CommitteeParams>,
) -> Result<Json<Option<SessionSnapshot>>, ApiError> {
    let kind = parse_kind(&kind)?;
    let p = params(query)?;
    let coordinator = Arc::clone(&state.coordinator);
    let snapshot =
        blocking(move || coordinator.live(&caller, kind, CommitteeId::new(p.committee_id)))
            .await?;
    Ok(Json(snapshot))
}

/// `GET /{kind}/closed?committee_id`
pub(crate) async fn history(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    AuthCaller(caller): AuthCaller,
    query: Params<CommitteeParams>,
) -> Result<Json<Vec<SessionSnapshot>>, ApiError> {
    let kind = parse_kind(&kind)?;
    let p = params(query)?;
    let coordinator = Arc::clone(&state.coordinator);
    let sessions =
        blocking(move || coordinator.history(&caller, kind, CommitteeId::new(p.committee_id)))
            .await?;
    Ok(Json(sessions))
}

/// `GET /{kind}/delegation?committee_id&delegation_id`
pub(crate) async fn most_recent(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    AuthCaller(caller): AuthCaller,
    query: Params<DelegationParams>,
) -> Result<Json<Option<Entry>>, ApiError> {
    let kind = parse_kind(&kind)?;
    let p = params(query)?;
    let coordinator = Arc::clone(&state.coordinator);
    let entry = blocking(move || {
        coordinator.most_recent_submission(
            &caller,
            kind,
            CommitteeId::new(p.committee_id),
            DelegationId::new(p.delegation_id),
        )
    })
    .await?;
    Ok(Json(entry))
}

/// `GET /{kind}/entries?committee_id`
pub(crate) async fn entry_history(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    AuthCaller(caller): AuthCaller,
    query: Params<CommitteeParams>,
) -> Result<Json<Vec<Entry>>, ApiError> {
    let kind = parse_kind(&kind)?;
    let p = params(query)?;
    let coordinator = Arc::clone(&state.coordinator);
    let entries = blocking(move || {
        coordinator.entry_history(&caller, kind, CommitteeId::new(p.committee_id))
    })
    .await?;
    Ok(Json(entries))
}

/// `POST /{kind}/submit?committee_id&delegation_id&value`
pub(crate) async fn submit(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    AuthCaller(caller): AuthCaller,
    query: Params<ValueParams>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    let kind = parse_kind(&kind)?;
    let p = params(query)?;
    let value = parse_value(kind, p.value)?;
    let coordinator = Arc::clone(&state.coordinator);
    let snapshot = blocking(move || {
        coordinator.submit(
            &caller,
            CommitteeId::new(p.committee_id),
            DelegationId::new(p.delegation_id),
            value,
        )
    })
    .await?;
    Ok(Json(snapshot))
}

/// `POST /{kind}/override?committee_id&delegation_id&value`
pub(crate) async fn override_entry(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    AuthCaller(caller): AuthCaller,
    query: Params<ValueParams>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    let kind = parse_kind(&kind)?;
    let p = params(query)?;
    let value = parse_value(kind, p.value)?;
    let coordinator = Arc::clone(&state.coordinator);
    let snapshot = blocking(move || {
        coordinator.override_entry(
            &caller,
            CommitteeId::new(p.committee_id),
            DelegationId::new(p.delegation_id),
            value,
        )
    })
    .await?;
    Ok(Json(snapshot))
}

/// `POST /{kind}/markabsent?committee_id&delegation_id`
pub(crate) async fn mark_absent(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    AuthCaller(caller): AuthCaller,
    query: Params<DelegationParams>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    let kind = parse_kind(&kind)?;
    let p = params(query)?;
    let coordinator = Arc::clone(&state.coordinator);
    let snapshot = blocking(move || {
        coordinator.mark_absent(
            &caller,
            kind,
            CommitteeId::new(p.committee_id),
            DelegationId::new(p.delegation_id),
        )
    })
    .await?;
    Ok(Json(snapshot))
}

/// `GET /committees/{committee_id}/poll`
pub(crate) async fn poll_status(
    State(state): State<AppState>,
    Path(committee_id): Path<String>,
    AuthCaller(caller): AuthCaller,
) -> Result<Json<CommitteePoll>, ApiError> {
    let committee_id = parse_committee(&committee_id)?;
    let coordinator = Arc::clone(&state.coordinator);
    let poll = blocking(move || coordinator.poll_status(&caller, committee_id)).await?;
    Ok(Json(poll))
}

/// `GET /incidents?committee_id&kind&errors_only&limit`, newest first.
pub(crate) async fn incidents(
    State(state): State<AppState>,
    AuthCaller(caller): AuthCaller,
    query: Params<IncidentParams>,
) -> Result<Json<Vec<Incident>>, ApiError> {
    caller.authorize(Operation::Incidents)?;
    let p = params(query)?;
    let kind = p
        .kind
        .map(|raw| raw.parse::<SessionKind>().map_err(RollcallError::InvalidInput))
        .transpose()?;
    let Some(log) = state.incidents.clone() else {
        return Err(RollcallError::NotFound("incident log is disabled".into()).into());
    };

    let mut filter = IncidentFilter {
        committee_id: p.committee_id,
        kind: kind.map(|k| k.as_str().to_owned()),
        errors_only: p.errors_only,
        ..IncidentFilter::default()
    };
    if let Some(limit) = p.limit {
        filter.limit = limit;
    }
    let incidents = blocking(move || {
        log.recent(&filter)
            .map_err(|e| RollcallError::StoreFailure(e.to_string()))
    })
    .await?;
    Ok(Json(incidents))
}

/// `GET /{kind}/{committee_id}/ws`: upgrade to an observer channel.
///
/// Registration happens before the upgrade, so a refused observer gets a
/// normal HTTP error instead of a socket that closes immediately.
pub(crate) async fn observe(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path((kind, committee_id)): Path<(String, String)>,
    AuthCaller(caller): AuthCaller,
) -> Result<Response, ApiError> {
    let kind = parse_kind(&kind)?;
    let committee_id = parse_committee(&committee_id)?;
    let coordinator = Arc::clone(&state.coordinator);
    let queue_size = state.config.observer_queue_size;
    let subscription =
        blocking(move || coordinator.observe(&caller, kind, committee_id, queue_size)).await?;

    let config = Arc::clone(&state.config);
    let cancel = state.shutdown.token();
    Ok(ws
        .max_message_size(config.max_message_size)
        .on_upgrade(move |socket| async move {
            let _ = run_observer_session(socket, subscription, config, cancel).await;
        })
        .into_response())
}

fn parse_committee(raw: &str) -> Result<CommitteeId, ApiError> {
    raw.parse::<i64>().map(CommitteeId::new).map_err(|_| {
        RollcallError::InvalidInput(format!("committee id must be an integer, got '{raw}'")).into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn kinds_parse() {
        assert_eq!(parse_kind("attendance").unwrap(), SessionKind::Attendance);
        assert_eq!(parse_kind("voting").unwrap(), SessionKind::Voting);
        assert_eq!(parse_kind("quorum").unwrap_err().status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn values_are_checked_against_kind() {
        assert!(parse_value(SessionKind::Attendance, 2).is_ok());
        assert!(parse_value(SessionKind::Voting, 3).is_ok());
        let err = parse_value(SessionKind::Attendance, 3).unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");
        assert!(parse_value(SessionKind::Voting, 0).is_err());
    }

    #[test]
    fn committee_segment_must_be_numeric() {
        assert_eq!(parse_committee("42").unwrap(), CommitteeId::new(42));
        assert_eq!(parse_committee("x").unwrap_err().status(), StatusCode::BAD_REQUEST);
    }
}
