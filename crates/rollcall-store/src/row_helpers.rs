use chrono::{DateTime, SecondsFormat, Utc};
use rollcall_core::StoreError;

/// Get a required column value from a row, returning `CorruptRow` on failure.
pub fn get<T: rusqlite::types::FromSql>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    row.get(idx).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: e.to_string(),
    })
}

/// Get an optional column value.
pub fn get_opt<T: rusqlite::types::FromSql>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<Option<T>, StoreError> {
    row.get(idx).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: e.to_string(),
    })
}

/// Parse a string into an enum, returning `CorruptRow` on failure.
pub fn parse_enum<T: std::str::FromStr>(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    raw.parse().map_err(|_| StoreError::CorruptRow {
        table,
        column,
        detail: format!("unknown variant: {raw}"),
    })
}

/// Parse an RFC 3339 timestamp column.
pub fn parse_time(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::CorruptRow {
            table,
            column,
            detail: format!("invalid timestamp {raw:?}: {e}"),
        })
}

/// Fixed-width UTC rendering, so text order is time order.
pub fn format_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::TimeZone;
    use rollcall_core::SessionKind;

    #[test]
    fn parse_enum_success() {
        let kind: SessionKind = parse_enum("voting", "sessions", "kind").unwrap();
        assert_eq!(kind, SessionKind::Voting);
    }

    #[test]
    fn parse_enum_failure() {
        let result: Result<SessionKind, _> = parse_enum("quorum", "sessions", "kind");
        assert_matches!(
            result,
            Err(StoreError::CorruptRow { table: "sessions", column: "kind", .. })
        );
    }

    #[test]
    fn time_round_trips_with_micros() {
        let t = Utc.timestamp_opt(1_760_000_000, 123_456_000).unwrap();
        let raw = format_time(t);
        assert_eq!(raw, "2025-10-09T08:53:20.123456Z");
        assert_eq!(parse_time(&raw, "entries", "timestamp").unwrap(), t);
    }

    #[test]
    fn formatted_times_sort_lexically() {
        let early = format_time(Utc.timestamp_opt(1_760_000_000, 900_000_000).unwrap());
        let late = format_time(Utc.timestamp_opt(1_760_000_001, 0).unwrap());
        assert!(early < late);
    }

    #[test]
    fn parse_time_failure() {
        assert_matches!(
            parse_time("yesterday", "sessions", "open_time"),
            Err(StoreError::CorruptRow { column: "open_time", .. })
        );
    }
}
