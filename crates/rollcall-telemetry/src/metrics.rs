//! Metric names shared by the engine and the server.
//!
//! The recorder itself is installed by the server; these are only the
//! names, so recording sites cannot drift apart.

/// Coordinator operations (counter, labels: op, outcome).
pub const OPERATIONS_TOTAL: &str = "rollcall_operations_total";
/// Snapshots broadcast (counter, labels: kind).
pub const BROADCASTS_TOTAL: &str = "rollcall_broadcasts_total";
/// Snapshots dropped on a full observer queue (counter).
pub const BROADCAST_DROPS_TOTAL: &str = "rollcall_broadcast_drops_total";
/// Registered observers (gauge).
pub const OBSERVERS_ACTIVE: &str = "rollcall_observers_active";
/// Observer connections accepted (counter, labels: kind).
pub const OBSERVER_CONNECTIONS_TOTAL: &str = "rollcall_observer_connections_total";
