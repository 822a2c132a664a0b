//! API route handlers for the gateway.

use axum::body::Bytes;
use axum::response::IntoResponse;
use axum::{Json, extract::State, http::StatusCode};
use chrono::{DateTime, Local, Timelike};
use grindclaw_telemetry::{HistorySample, TelemetryRecord, TelemetrySnapshot};
use serde_json::json;
use std::sync::Arc;

use super::server::AppState;

/// Health check endpoint.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "grindclaw-gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}

fn bad_request(message: &str) -> axum::response::Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"status": "error", "message": message})),
    )
        .into_response()
}

/// Telemetry push from the agent.
///
/// The body is parsed by hand so malformed payloads get the same JSON error
/// shape as an empty one.
pub async fn ingest_telemetry(State(state): State<Arc<AppState>>, body: Bytes) -> axum::response::Response {
    let value: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(_) if body.iter().all(u8::is_ascii_whitespace) => {
            return bad_request("No JSON data received");
        }
        Err(e) => return bad_request(&format!("Invalid JSON: {e}")),
    };
    if value.is_null() || value.as_object().is_some_and(|o| o.is_empty()) {
        return bad_request("No JSON data received");
    }
    let record: TelemetryRecord = match serde_json::from_value(value) {
        Ok(r) => r,
        Err(e) => return bad_request(&format!("Invalid telemetry record: {e}")),
    };

    state.store.ingest(&record);
    tracing::debug!(
        "📊 Telemetry ingested (commands={:?}, resource={:?})",
        record.commands_sent,
        record.resource_earned
    );
    Json(json!({"status": "success", "message": "Stats updated"})).into_response()
}

/// Dashboard stats: counters, rates, history series, forecasts and the event log.
pub async fn get_stats(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let snapshot = state.store.snapshot();
    let forecast = state.engine.forecast(&snapshot, Local::now().hour());
    Json(stats_body(&snapshot, serde_json::to_value(forecast).unwrap_or_default()))
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn time_point(sample: &HistorySample) -> String {
    DateTime::from_timestamp(sample.bucket, 0)
        .map(|t| t.with_timezone(&Local).format("%H:%M:%S").to_string())
        .unwrap_or_default()
}

fn stats_body(snapshot: &TelemetrySnapshot, predictions: serde_json::Value) -> serde_json::Value {
    let samples = &snapshot.samples;
    json!({
        "uptime_hours": round2(snapshot.uptime_hours),
        "commands_sent": snapshot.commands_sent,
        "coins_earned": snapshot.resource_earned,
        "hoarded_items": snapshot.hoarded_items,
        "commands_per_hour": round2(snapshot.commands_per_hour),
        "coins_per_hour": round2(snapshot.resource_rate),
        "efficiency_score": snapshot.efficiency,
        "historical_data": {
            "time_points": samples.iter().map(time_point).collect::<Vec<_>>(),
            "commands_history": samples.iter().map(|s| s.commands_total).collect::<Vec<_>>(),
            "coins_history": samples.iter().map(|s| s.resource_total).collect::<Vec<_>>(),
            "hoarded_items_history": samples.iter().map(|s| s.hoarded).collect::<Vec<_>>(),
        },
        "ai_predictions": predictions,
        "status": if snapshot.is_idle() { "idle" } else { "operational" },
        "started_at": snapshot.started_at,
        "last_updated": snapshot.taken_at.with_timezone(&Local).format("%H:%M:%S").to_string(),
        "recent_commands_log": snapshot.events,
    })
}
