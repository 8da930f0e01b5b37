//! HTTP server: routes, middleware and shared state.
//!
//! # Example
//!
//! ```ignore
//! use edgequake_docparse::{create_server, AppState, ServiceConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ServiceConfig::builder().build().unwrap();
//!     let addr = config.bind_address();
//!     let app = create_server(AppState::from_config(config).unwrap());
//!
//!     let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
//!     axum::serve(listener, app).await.unwrap();
//! }
//! ```

pub mod middleware;
pub mod routes;
pub mod state;

pub use state::AppState;

use axum::{
    extract::DefaultBodyLimit,
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use middleware::ApiKey;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Create the server with all routes and middleware.
///
/// Auth, when an API key is configured, covers `/parse_document*` only.
pub fn create_server(state: AppState) -> Router {
    let config = state.config();
    let body_limit = config.max_body_bytes;
    let enable_cors = config.enable_cors;

    let mut parse = Router::new()
        .route("/parse_document", post(routes::parse_upload))
        .route("/parse_document/pdf", post(routes::parse_pdf))
        .route("/parse_document/pdfdocs", post(routes::parse_pdfdocs))
        .route("/parse_document/docs", post(routes::parse_docs));
    if let Some(key) = &config.api_key {
        info!("API key authentication enabled");
        parse = parse.route_layer(axum_middleware::from_fn_with_state(
            ApiKey(key.as_str().into()),
            middleware::auth_middleware,
        ));
    }

    let mut app = Router::new()
        .route("/health", get(routes::health))
        .merge(parse)
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
        .layer(TraceLayer::new_for_http());
    if enable_cors {
        app = app.layer(middleware::cors_layer());
    }
    app.layer(axum_middleware::from_fn(middleware::logging_middleware))
}
