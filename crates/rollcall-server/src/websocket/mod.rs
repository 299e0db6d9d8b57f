//! Observer WebSocket connections.

pub mod heartbeat;
pub mod session;

pub use heartbeat::{HeartbeatMonitor, HeartbeatResult, Liveness};
pub use session::{SessionEnd, run_observer_session};
