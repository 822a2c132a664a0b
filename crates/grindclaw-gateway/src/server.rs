//! HTTP server implementation using Axum.

use axum::response::IntoResponse;
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use grindclaw_core::config::GatewayConfig;
use grindclaw_telemetry::{HistoryStore, PredictionEngine};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared state for the gateway server.
#[derive(Clone)]
pub struct AppState {
    /// History the agent pushes into and the dashboard reads from.
    pub store: Arc<HistoryStore>,
    pub engine: PredictionEngine,
    pub start_time: std::time::Instant,
    pub pairing_code: Option<String>,
}

impl AppState {
    pub fn new(store: Arc<HistoryStore>) -> Self {
        Self {
            store,
            engine: PredictionEngine::default(),
            start_time: std::time::Instant::now(),
            pairing_code: None,
        }
    }

    pub fn with_pairing_code(mut self, code: impl Into<String>) -> Self {
        self.pairing_code = Some(code.into());
        self
    }
}

/// Pairing code auth middleware: validates X-Pairing-Code header or ?code= query.
async fn require_pairing(
    State(state): State<Arc<AppState>>,
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let Some(expected) = &state.pairing_code else {
        return next.run(req).await;
    };

    let from_header = req
        .headers()
        .get("X-Pairing-Code")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if from_header == expected {
        return next.run(req).await;
    }

    if let Some(query) = req.uri().query()
        && query
            .split('&')
            .filter_map(|pair| pair.strip_prefix("code="))
            .any(|code| code == expected)
    {
        return next.run(req).await;
    }

    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({"status": "error", "message": "Invalid or missing pairing code"})),
    )
        .into_response()
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    build_router_from_arc(Arc::new(state))
}

pub fn build_router_from_arc(shared: Arc<AppState>) -> Router {
    // Protected routes: require valid pairing code
    let protected = Router::new()
        .route("/api/v1/telemetry", post(super::routes::ingest_telemetry))
        .route("/api/v1/stats", get(super::routes::get_stats))
        // Legacy dashboard paths
        .route("/api/update_bot_stats", post(super::routes::ingest_telemetry))
        .route("/api/stats", get(super::routes::get_stats))
        .route_layer(axum::middleware::from_fn_with_state(
            shared.clone(),
            require_pairing,
        ));

    // Public routes: no auth
    let public = Router::new()
        .route("/health", get(super::routes::health_check));

    protected
        .merge(public)
        .layer({
            let cors = CorsLayer::new()
                .allow_methods([
                    axum::http::Method::GET,
                    axum::http::Method::POST,
                    axum::http::Method::OPTIONS,
                ])
                .allow_headers(Any)
                .max_age(std::time::Duration::from_secs(3600));

            // Example: GRINDCLAW_CORS_ORIGINS=https://dash.example.com,http://localhost:3000
            if let Ok(origins_str) = std::env::var("GRINDCLAW_CORS_ORIGINS") {
                let origins: Vec<_> = origins_str
                    .split(',')
                    .filter_map(|s| s.trim().parse::<axum::http::HeaderValue>().ok())
                    .collect();
                cors.allow_origin(origins)
            } else {
                cors.allow_origin(Any)
            }
        })
        .layer(TraceLayer::new_for_http())
        .with_state(shared)
}

/// Non-blank pairing code, trimmed.
fn pairing_code_from(raw: Option<String>) -> Option<String> {
    raw.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Start the HTTP server; returns once `cancel` fires and in-flight requests finish.
pub async fn start(
    config: &GatewayConfig,
    store: Arc<HistoryStore>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let mut state = AppState::new(store);
    if config.require_pairing {
        let Some(code) = pairing_code_from(std::env::var("GRINDCLAW_PAIRING_CODE").ok()) else {
            anyhow::bail!("gateway.require_pairing is set but GRINDCLAW_PAIRING_CODE is empty or unset");
        };
        state = state.with_pairing_code(code);
        tracing::info!("🔐 Pairing required for telemetry routes");
    }

    let app = build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("🌐 Gateway server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await?;
    tracing::info!("🌐 Gateway server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn app(pairing: Option<&str>) -> (Router, Arc<HistoryStore>) {
        let store = Arc::new(HistoryStore::new());
        let mut state = AppState::new(store.clone());
        if let Some(code) = pairing {
            state = state.with_pairing_code(code);
        }
        (build_router(state), store)
    }

    async fn body_json(resp: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let (router, _) = app(Some("s3cret"));
        let resp = router
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["service"], "grindclaw-gateway");
    }

    #[tokio::test]
    async fn test_ingest_then_stats() {
        let (router, store) = app(None);
        let resp = router
            .clone()
            .oneshot(post_json(
                "/api/v1/telemetry",
                r#"{"commands_sent": 4, "coins_earned": 120, "hoarded_items": 2, "last_sent_command": "rpg hunt"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            body_json(resp).await,
            serde_json::json!({"status": "success", "message": "Stats updated"})
        );
        assert_eq!(store.snapshot().resource_earned, 120);

        let resp = router
            .oneshot(Request::builder().uri("/api/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["commands_sent"], 4);
        assert_eq!(json["coins_earned"], 120);
        assert_eq!(json["hoarded_items"], 2);
        assert_eq!(json["status"], "operational");
        assert_eq!(json["historical_data"]["coins_history"], serde_json::json!([120]));
        assert!(json["ai_predictions"]["coins_1h"]["prediction"].is_u64());
        assert!(
            json["recent_commands_log"]
                .as_array()
                .unwrap()
                .iter()
                .any(|l| l.as_str().unwrap().ends_with("Sent: `rpg hunt`"))
        );
    }

    #[tokio::test]
    async fn test_legacy_update_path() {
        let (router, store) = app(None);
        let resp = router
            .oneshot(post_json("/api/update_bot_stats", r#"{"commands_sent": 9}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(store.snapshot().commands_sent, 9);
    }

    #[tokio::test]
    async fn test_bad_payloads_rejected() {
        let (router, store) = app(None);
        for body in ["", "null", "{}", "{not json", "[1, 2]"] {
            let resp = router
                .clone()
                .oneshot(post_json("/api/v1/telemetry", body))
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "body {body:?}");
            assert_eq!(body_json(resp).await["status"], "error");
        }
        assert!(store.snapshot().is_idle());
    }

    #[tokio::test]
    async fn test_idle_stats() {
        let (router, _) = app(None);
        let resp = router
            .oneshot(Request::builder().uri("/api/v1/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let json = body_json(resp).await;
        assert_eq!(json["status"], "idle");
        assert_eq!(json["commands_sent"], 0);
        assert_eq!(json["historical_data"]["time_points"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_pairing_enforced() {
        let (router, _) = app(Some("s3cret"));

        let resp = router
            .clone()
            .oneshot(Request::builder().uri("/api/v1/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = router
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/v1/stats")
                    .header("X-Pairing-Code", "s3cret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = router
            .clone()
            .oneshot(Request::builder().uri("/api/stats?code=s3cret").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = router
            .oneshot(post_json("/api/v1/telemetry?code=wrong", r#"{"commands_sent": 1}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_only_telemetry_routes_are_served() {
        let (router, _) = app(None);
        let resp = router
            .oneshot(post_json("/api/v1/verify-pairing", r#"{"code": "x"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_pairing_code_must_be_non_blank() {
        assert_eq!(pairing_code_from(Some("  s3cret\n".into())).as_deref(), Some("s3cret"));
        assert_eq!(pairing_code_from(Some("   ".into())), None);
        assert_eq!(pairing_code_from(None), None);
    }
}
