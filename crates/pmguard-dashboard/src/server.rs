//! HTTP server implementation using axum.

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use axum::extract::{Path, Query, Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use pmguard_core::{RuleId, RuleStatus, TradeRule};
use pmguard_engine::{MonitoringWorker, WorkerStatus};
use pmguard_store::DEFAULT_PAGE_SIZE;
use pmguard_telemetry::Metrics;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::config::DashboardConfig;
use crate::types::{ErrorBody, EventsPage, EventsQuery, PositionsView, RulesQuery};

/// Upper bound on `limit` for event pages.
pub const MAX_PAGE_SIZE: usize = 1000;

/// Shared application state for axum handlers.
#[derive(Clone)]
pub struct AppState {
    worker: Arc<MonitoringWorker>,
    config: DashboardConfig,
}

impl AppState {
    pub fn new(worker: Arc<MonitoringWorker>, config: DashboardConfig) -> Self {
        Self { worker, config }
    }
}

/// JSON error response.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorBody {
                error: self.message,
            }),
        )
            .into_response()
    }
}

/// Create the axum router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/status", get(get_status))
        .route("/api/rules", get(list_rules))
        .route("/api/rules/{id}", get(get_rule))
        .route("/api/positions", get(list_positions))
        .route("/api/events", get(list_events))
        .route("/metrics", get(get_metrics))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn get_status(State(state): State<AppState>) -> Json<WorkerStatus> {
    Json(state.worker.status())
}

async fn list_rules(
    State(state): State<AppState>,
    Query(query): Query<RulesQuery>,
) -> Result<Json<Vec<TradeRule>>, ApiError> {
    let status = query
        .status
        .as_deref()
        .map(RuleStatus::from_str)
        .transpose()
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e.to_string()))?;
    Ok(Json(state.worker.store().list(status)))
}

async fn get_rule(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TradeRule>, ApiError> {
    state
        .worker
        .store()
        .get(&RuleId::from_string(id.clone()))
        .map(Json)
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, format!("rule {id} not found")))
}

async fn list_positions(State(state): State<AppState>) -> Json<PositionsView> {
    let tracker = state.worker.tracker();
    Json(PositionsView {
        open: tracker.positions(),
        history: tracker.history(),
    })
}

async fn list_events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Json<EventsPage> {
    let rule_id = query.rule_id.map(RuleId::from_string);
    let offset = query.offset.unwrap_or(0);
    let limit = query
        .limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    let events = state.worker.store().events();
    Json(EventsPage {
        total: events.count(rule_id.as_ref()),
        offset,
        limit,
        events: events.list(rule_id.as_ref(), offset, limit),
    })
}

async fn get_metrics() -> Result<Response, ApiError> {
    let body = Metrics::render()
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
        .into_response())
}

/// Basic auth gate, active only when credentials are configured.
async fn require_auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if state.config.auth_enabled() && !check_basic_auth(request.headers(), &state.config) {
        return (
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, "Basic realm=\"pmguard\"")],
            "Unauthorized",
        )
            .into_response();
    }
    next.run(request).await
}

fn check_basic_auth(headers: &HeaderMap, config: &DashboardConfig) -> bool {
    let Some(encoded) = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Basic "))
    else {
        return false;
    };
    let Ok(decoded) = BASE64.decode(encoded.trim()) else {
        return false;
    };
    let expected = format!("{}:{}", config.username, config.password);
    constant_time_eq(&decoded, expected.as_bytes())
}

/// Byte comparison whose running time does not depend on where the inputs
/// first differ.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Serve the management endpoints until `shutdown` fires.
pub async fn run_server(
    worker: Arc<MonitoringWorker>,
    config: DashboardConfig,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let app = create_router(AppState::new(worker, config.clone()));
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!(port = config.port, "Starting dashboard server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await;
    if let Err(e) = &result {
        warn!(error = %e, "Dashboard server stopped with error");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use pmguard_core::{OwnerRef, Price, RuleAction, RuleSpec};
    use pmguard_engine::{RuleExecutor, WorkerConfig};
    use pmguard_feed::{PriceCache, PriceFeed};
    use pmguard_position::PositionTracker;
    use pmguard_risk::{CircuitBreaker, CircuitBreakerConfig};
    use pmguard_store::{EventLog, RuleStore};
    use pmguard_upstream::MockTradingApi;
    use rust_decimal_macros::dec;
    use serde_json::Value;
    use std::time::Duration;
    use tower::ServiceExt;

    fn worker() -> Arc<MonitoringWorker> {
        let api = Arc::new(MockTradingApi::new());
        let store = Arc::new(RuleStore::in_memory(Arc::new(EventLog::in_memory())));
        let tracker = Arc::new(PositionTracker::new(api.clone(), Duration::from_secs(1), 2));
        let feed = Arc::new(PriceFeed::new(
            Arc::new(PriceCache::new(Duration::from_secs(30))),
            api.clone(),
            Duration::from_secs(1),
        ));
        let executor =
            RuleExecutor::new(store.clone(), tracker.clone(), api, Duration::from_secs(1));
        Arc::new(MonitoringWorker::new(
            WorkerConfig::default(),
            store,
            tracker,
            feed,
            executor,
            CircuitBreaker::new(CircuitBreakerConfig::default()),
        ))
    }

    fn create_rule(worker: &MonitoringWorker) -> TradeRule {
        worker
            .store()
            .create(RuleSpec {
                owner_ref: OwnerRef::new("alice"),
                market_id: "mkt".to_string(),
                token_id: "tok".to_string(),
                rule_type: "STOP_LOSS".to_string(),
                trigger_price: Some(Price::new(dec!(0.30))),
                trailing_percent: None,
                reference_price: None,
                action: RuleAction::SellAll,
            })
            .unwrap()
    }

    async fn get_json(router: Router, uri: &str) -> (StatusCode, Value) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn test_status_endpoint() {
        let w = worker();
        create_rule(&w);
        let router = create_router(AppState::new(w, DashboardConfig::default()));

        let (status, body) = get_json(router, "/api/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["running"], false);
        assert_eq!(body["active_rules_count"], 1);
    }

    #[tokio::test]
    async fn test_rules_filter_and_lookup() {
        let w = worker();
        let rule = create_rule(&w);
        let router = create_router(AppState::new(w, DashboardConfig::default()));

        let (_, active) = get_json(router.clone(), "/api/rules?status=active").await;
        assert_eq!(active.as_array().map(Vec::len), Some(1));
        let (_, failed) = get_json(router.clone(), "/api/rules?status=FAILED").await;
        assert_eq!(failed.as_array().map(Vec::len), Some(0));

        let (status, _) = get_json(router.clone(), "/api/rules?status=bogus").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = get_json(router.clone(), &format!("/api/rules/{}", rule.id)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["rule_type"], "STOP_LOSS");
        assert_eq!(body["status"], "ACTIVE");

        let (status, _) = get_json(router, "/api/rules/missing").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_events_are_paginated() {
        let w = worker();
        let rule = create_rule(&w);
        w.store().cancel(&rule.id).unwrap();
        create_rule(&w);
        let router = create_router(AppState::new(w, DashboardConfig::default()));

        let (_, page) = get_json(router.clone(), "/api/events?limit=2").await;
        assert_eq!(page["total"], 3);
        assert_eq!(page["events"].as_array().map(Vec::len), Some(2));

        let (_, page) = get_json(router, &format!("/api/events?rule_id={}", rule.id)).await;
        assert_eq!(page["total"], 2);
        assert_eq!(page["events"][1]["event_type"], "RULE_CANCELED");
    }

    #[tokio::test]
    async fn test_basic_auth_enforced_when_configured() {
        let config = DashboardConfig {
            username: "ops".to_string(),
            password: "secret".to_string(),
            ..DashboardConfig::default()
        };
        let router = create_router(AppState::new(worker(), config));

        let (status, _) = get_json(router.clone(), "/api/status").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        // "ops:secret"
        let response = router
            .oneshot(
                Request::builder()
                    .uri("/api/status")
                    .header(header::AUTHORIZATION, "Basic b3BzOnNlY3JldA==")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_basic_auth_header_check() {
        let config = DashboardConfig {
            username: "ops".to_string(),
            password: "secret".to_string(),
            ..DashboardConfig::default()
        };
        let with = |value: &str| {
            let mut headers = HeaderMap::new();
            headers.insert(header::AUTHORIZATION, value.parse().unwrap());
            headers
        };
        assert!(check_basic_auth(&with("Basic b3BzOnNlY3JldA=="), &config));
        assert!(!check_basic_auth(&with("Basic b3BzOnNlY3JldDE="), &config));
        assert!(!check_basic_auth(&with("Basic !!"), &config));
        assert!(!check_basic_auth(&HeaderMap::new(), &config));
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"ops:secret", b"ops:secret"));
        assert!(!constant_time_eq(b"ops:secret", b"ops:secreT"));
        assert!(!constant_time_eq(b"ops", b"ops:secret"));
    }
}
