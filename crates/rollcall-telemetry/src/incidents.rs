//! Incident log.
//!
//! Every warn+ event is kept in SQLite together with the committee and
//! session kind it concerns, taken from the event's own fields or from the
//! nearest enclosing span that carries them. Administrators read it back
//! per committee through the server. The table is capped at a retention
//! count; the oldest rows go first.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{Connection, Row, params};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::field::{Field, Visit};
use tracing::{Level, span};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;

use crate::TelemetryError;

/// Row cap applied when none is configured.
pub const DEFAULT_RETENTION: u64 = 10_000;

/// Most rows a single read returns.
pub const MAX_READ: u32 = 1_000;

const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
CREATE TABLE IF NOT EXISTS incidents (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    at TEXT NOT NULL,
    level TEXT NOT NULL,
    target TEXT NOT NULL,
    message TEXT NOT NULL,
    committee_id INTEGER,
    kind TEXT,
    fields TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_incidents_scope ON incidents(committee_id, kind, id);
";

/// A persisted warning or error.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Incident {
    /// Insertion sequence.
    pub id: i64,
    /// When the event fired.
    pub at: DateTime<Utc>,
    /// `WARN` or `ERROR`.
    pub level: String,
    /// Module path of the call site.
    pub target: String,
    /// Formatted message.
    pub message: String,
    /// Committee the event concerns.
    pub committee_id: Option<i64>,
    /// Session kind the event concerns.
    pub kind: Option<String>,
    /// Every other field of the event.
    pub fields: Map<String, Value>,
}

/// An incident before it is stored.
#[derive(Clone, Debug)]
pub struct NewIncident {
    /// When the event fired.
    pub at: DateTime<Utc>,
    /// Event level; only `WARN` and `ERROR` are stored by the layer.
    pub level: Level,
    /// Module path of the call site.
    pub target: String,
    /// Formatted message.
    pub message: String,
    /// Committee the event concerns.
    pub committee_id: Option<i64>,
    /// Session kind the event concerns.
    pub kind: Option<String>,
    /// Every other field of the event.
    pub fields: Map<String, Value>,
}

/// Which incidents to read back. Newest first.
#[derive(Clone, Debug)]
pub struct IncidentFilter {
    /// Only incidents for this committee.
    pub committee_id: Option<i64>,
    /// Only incidents for this session kind.
    pub kind: Option<String>,
    /// Skip warnings.
    pub errors_only: bool,
    /// Row cap, clamped to [`MAX_READ`].
    pub limit: u32,
}

impl Default for IncidentFilter {
    fn default() -> Self {
        Self {
            committee_id: None,
            kind: None,
            errors_only: false,
            limit: 100,
        }
    }
}

/// SQLite-backed incident store.
pub struct IncidentLog {
    conn: Mutex<Connection>,
    retention: u64,
}

impl IncidentLog {
    /// Open or create the log at `path`, keeping at most `retention` rows.
    pub fn open(path: &Path, retention: u64) -> Result<Self, TelemetryError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::with_conn(Connection::open(path)?, retention)
    }

    /// A log that lives only as long as the process.
    pub fn in_memory(retention: u64) -> Result<Self, TelemetryError> {
        Self::with_conn(Connection::open_in_memory()?, retention)
    }

    fn with_conn(conn: Connection, retention: u64) -> Result<Self, TelemetryError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            retention: retention.max(1),
        })
    }

    /// Store one incident and trim past the retention cap. Returns its id.
    pub fn record(&self, incident: &NewIncident) -> Result<i64, TelemetryError> {
        let fields = Value::Object(incident.fields.clone()).to_string();
        let conn = self.conn.lock();
        let _ = conn.execute(
            "INSERT INTO incidents (at, level, target, message, committee_id, kind, fields)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                incident.at.to_rfc3339_opts(SecondsFormat::Micros, true),
                incident.level.as_str(),
                incident.target,
                incident.message,
                incident.committee_id,
                incident.kind,
                fields,
            ],
        )?;
        let id = conn.last_insert_rowid();
        let _ = conn.execute(
            "DELETE FROM incidents WHERE id <= ?1",
            [id - self.retention as i64],
        )?;
        Ok(id)
    }

    /// Incidents matching `filter`, newest first.
    pub fn recent(&self, filter: &IncidentFilter) -> Result<Vec<Incident>, TelemetryError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, at, level, target, message, committee_id, kind, fields
             FROM incidents
             WHERE (?1 IS NULL OR committee_id = ?1)
               AND (?2 IS NULL OR kind = ?2)
               AND (?3 = 0 OR level = 'ERROR')
             ORDER BY id DESC
             LIMIT ?4",
        )?;
        let rows = stmt.query_map(
            params![
                filter.committee_id,
                filter.kind,
                filter.errors_only,
                filter.limit.min(MAX_READ),
            ],
            incident_from_row,
        )?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// Rows currently stored.
    pub fn len(&self) -> Result<u64, TelemetryError> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM incidents", [], |row| row.get(0))?;
        Ok(n as u64)
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> Result<bool, TelemetryError> {
        Ok(self.len()? == 0)
    }
}

fn incident_from_row(row: &Row<'_>) -> rusqlite::Result<Incident> {
    let at: String = row.get(1)?;
    let at = DateTime::parse_from_rfc3339(&at)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?
        .with_timezone(&Utc);
    let fields: String = row.get(7)?;
    let fields = match serde_json::from_str(&fields) {
        Ok(Value::Object(map)) => map,
        Ok(_) => Map::new(),
        Err(e) => {
            return Err(rusqlite::Error::FromSqlConversionFailure(
                7,
                Type::Text,
                Box::new(e),
            ));
        }
    };
    Ok(Incident {
        id: row.get(0)?,
        at,
        level: row.get(2)?,
        target: row.get(3)?,
        message: row.get(4)?,
        committee_id: row.get(5)?,
        kind: row.get(6)?,
        fields,
    })
}

/// Committee and kind carried by an event or span.
#[derive(Clone, Debug, Default)]
struct Scope {
    committee_id: Option<i64>,
    kind: Option<String>,
}

impl Scope {
    fn fill_from(&mut self, outer: &Scope) {
        if self.committee_id.is_none() {
            self.committee_id = outer.committee_id;
        }
        if self.kind.is_none() {
            self.kind.clone_from(&outer.kind);
        }
    }

    fn is_complete(&self) -> bool {
        self.committee_id.is_some() && self.kind.is_some()
    }
}

#[derive(Default)]
struct Collect {
    scope: Scope,
    message: Option<String>,
    fields: Map<String, Value>,
}

impl Collect {
    fn text(&mut self, name: &str, value: String) {
        match name {
            "message" => self.message = Some(value),
            // `%committee_id` arrives as text.
            "committee_id" => self.scope.committee_id = value.parse().ok(),
            "kind" => self.scope.kind = Some(value),
            _ => {
                let _ = self.fields.insert(name.to_owned(), Value::String(value));
            }
        }
    }

    fn number(&mut self, name: &str, value: Value, as_id: Option<i64>) {
        if name == "committee_id" {
            self.scope.committee_id = as_id;
        } else {
            let _ = self.fields.insert(name.to_owned(), value);
        }
    }
}

impl Visit for Collect {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let text = format!("{value:?}");
        let text = text
            .strip_prefix('"')
            .and_then(|t| t.strip_suffix('"'))
            .map_or(text.clone(), str::to_owned);
        self.text(field.name(), text);
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.text(field.name(), value.to_owned());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.number(field.name(), value.into(), Some(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.number(field.name(), value.into(), i64::try_from(value).ok());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        let _ = self.fields.insert(field.name().to_owned(), Value::Bool(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        if let Some(n) = serde_json::Number::from_f64(value) {
            let _ = self.fields.insert(field.name().to_owned(), Value::Number(n));
        }
    }
}

/// `tracing` layer feeding warn+ events into an [`IncidentLog`].
pub struct IncidentLayer {
    log: Arc<IncidentLog>,
}

impl IncidentLayer {
    /// Layer writing into `log`.
    pub fn new(log: Arc<IncidentLog>) -> Self {
        Self { log }
    }
}

impl<S> Layer<S> for IncidentLayer
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let mut collect = Collect::default();
        attrs.record(&mut collect);
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(collect.scope);
        }
    }

    fn on_record(&self, id: &span::Id, values: &span::Record<'_>, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else { return };
        let mut collect = Collect::default();
        values.record(&mut collect);
        let mut extensions = span.extensions_mut();
        if let Some(scope) = extensions.get_mut::<Scope>() {
            if collect.scope.committee_id.is_some() {
                scope.committee_id = collect.scope.committee_id;
            }
            if collect.scope.kind.is_some() {
                scope.kind = collect.scope.kind;
            }
        }
    }

    fn on_event(&self, event: &tracing::Event<'_>, ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if level > Level::WARN {
            return;
        }

        let mut collect = Collect::default();
        event.record(&mut collect);
        if let Some(spans) = ctx.event_scope(event) {
            for span in spans {
                if collect.scope.is_complete() {
                    break;
                }
                if let Some(outer) = span.extensions().get::<Scope>() {
                    collect.scope.fill_from(outer);
                }
            }
        }

        // A failed write must not disturb the caller.
        let _ = self.log.record(&NewIncident {
            at: Utc::now(),
            level,
            target: event.metadata().target().to_owned(),
            message: collect.message.unwrap_or_default(),
            committee_id: collect.scope.committee_id,
            kind: collect.scope.kind,
            fields: collect.fields,
        });
    }
}
