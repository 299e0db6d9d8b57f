//! # rollcall-server
//!
//! axum HTTP + WebSocket transport over the rollcall [`Coordinator`].
//!
//! - `/{kind}/...` routes for attendance and voting sessions
//! - `/{kind}/{committee_id}/ws` observer channels with ping/pong liveness
//! - bearer-token administrator identity ([`auth::JwtIdentity`])
//! - `/health`, `/metrics`, and a shutdown that drains observers
//!
//! [`Coordinator`]: rollcall_engine::Coordinator

#![deny(unsafe_code)]

pub mod auth;
pub mod config;
pub mod errors;
pub mod health;
pub mod metrics;
mod routes;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use auth::{AuthError, JwtIdentity};
pub use config::ServerConfig;
pub use errors::ApiError;
pub use server::{AppState, RollcallServer};
pub use shutdown::ShutdownReport;
