//! Middleware for the HTTP server.

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

/// Create CORS middleware.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Request logging middleware.
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = std::time::Instant::now();

    let response = next.run(request).await;

    info!(
        method = %method,
        uri = %uri,
        status = %response.status().as_u16(),
        duration_ms = %start.elapsed().as_millis(),
        "Request completed"
    );

    response
}

/// The configured API key.
#[derive(Clone)]
pub struct ApiKey(pub Arc<str>);

/// Require `Authorization: Bearer <key>` (or `Token <key>`).
pub async fn auth_middleware(
    State(expected): State<ApiKey>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer ").or_else(|| h.strip_prefix("Token ")));

    let authorized = matches!(token, Some(t) if t.trim() == &*expected.0);

    if authorized {
        Ok(next.run(request).await)
    } else {
        warn!(uri = %request.uri(), "Rejected request with missing or invalid API key");
        Err(StatusCode::UNAUTHORIZED)
    }
}
