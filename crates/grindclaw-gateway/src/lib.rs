//! # GrindClaw Gateway
//! Telemetry ingest/query API (Axum).
//!
//! - `POST /api/v1/telemetry` (alias `/api/update_bot_stats`): agent pushes
//! - `GET  /api/v1/stats`     (alias `/api/stats`)          : dashboard polls
//! - `GET  /health`                                         : liveness

pub mod routes;
pub mod server;

pub use server::{AppState, build_router, start};
