//! Route definitions and router setup
//!
//! Configures all API routes and middleware.

use crate::config::Settings;
use crate::realtime::ws_handler;
use crate::state::SharedState;
use axum::{
    extract::{Request, State},
    http::{header, request::Parts, HeaderValue, Method},
    middleware::{self, Next},
    response::Response,
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, CorsLayer},
    request_id::MakeRequestUuid,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
    ServiceBuilderExt,
};
use tracing::Level;

/// Sample query shown on the root endpoint: a handful of entities of any
/// type, enough to prove the database answers.
const SAMPLE_ENTITIES_QUERY: &str = "match entity $type; $entity isa $type; limit 6;";

/// Create the application router with all routes and middleware
pub fn create_router(state: SharedState) -> Router {
    // Build CORS layer
    let cors = build_cors_layer(&state.settings);

    // Build tracing/logging layer
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    // Build middleware stack
    let middleware_stack = ServiceBuilder::new()
        .set_x_request_id(MakeRequestUuid)
        .layer(trace_layer)
        .layer(CompressionLayer::new())
        .layer(cors)
        .propagate_x_request_id();

    // Build the router
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/ws", get(ws_handler))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            security_headers,
        ))
        .layer(middleware_stack)
        .with_state(state)
}

/// Build CORS layer from settings
///
/// Origins are matched exactly, except the development-only
/// `http://127.0.0.1:*` entry which admits any port on local loopback.
/// Credentials stay enabled, so a blanket wildcard is never used.
fn build_cors_layer(settings: &Settings) -> CorsLayer {
    let configured = settings.cors_origins();
    let allow_loopback = configured.iter().any(|origin| origin == "http://127.0.0.1:*");
    let exact: Vec<HeaderValue> = configured
        .iter()
        .filter(|origin| origin.as_str() != "http://127.0.0.1:*")
        .filter_map(|origin| origin.parse().ok())
        .collect();

    let origin = AllowOrigin::predicate(move |origin: &HeaderValue, _parts: &Parts| {
        if exact.iter().any(|allowed| allowed == origin) {
            return true;
        }
        allow_loopback
            && origin
                .to_str()
                .map(|candidate| candidate.starts_with("http://127.0.0.1:"))
                .unwrap_or(false)
    });

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::PATCH,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT])
        .allow_credentials(true)
        .max_age(Duration::from_secs(3600))
}

/// Attach browser security headers to every response. HSTS goes out only
/// in production, where TLS termination is guaranteed upstream.
async fn security_headers(State(state): State<SharedState>, request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert("X-Content-Type-Options", HeaderValue::from_static("nosniff"));
    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    headers.insert("X-XSS-Protection", HeaderValue::from_static("1; mode=block"));
    headers.insert(
        "Referrer-Policy",
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    if state.settings.is_production() {
        headers.insert(
            "Strict-Transport-Security",
            HeaderValue::from_static("max-age=31536000; includeSubDomains"),
        );
    }
    response
}

/// Root endpoint: service banner plus a live TypeDB probe.
///
/// A connection or query failure degrades to an error string in
/// `typedb_status` instead of failing the whole response.
async fn root(State(state): State<SharedState>) -> Json<Value> {
    match state.db.execute_read_query(SAMPLE_ENTITIES_QUERY).await {
        Ok(rows) => {
            let data_sample: Vec<String> = rows
                .iter()
                .map(|row| serde_json::to_string(row).unwrap_or_default())
                .collect();
            Json(json!({
                "Hello": "World",
                "realtime": "enabled",
                "typedb_status": "connected",
                "data_sample": data_sample,
            }))
        }
        Err(probe_error) => Json(json!({
            "Hello": "World",
            "realtime": "enabled",
            "typedb_status": format!("error: {}", probe_error),
        })),
    }
}

/// Health check endpoint
async fn health_check(State(state): State<SharedState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "environment": state.settings.environment.as_str(),
        "debug": state.settings.debug,
        "typedb": state.db.status().await,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
