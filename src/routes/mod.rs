pub mod analyze;
pub mod health;

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    http::{header::CONTENT_TYPE, HeaderValue, Method},
    routing::{get, get_service},
    Router,
};
use tower_http::{cors::CorsLayer, services::ServeFile, trace::TraceLayer};

use crate::app_state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    let config = &state.config;

    let mut app = Router::new()
        .route(
            "/",
            get_service(ServeFile::new(&config.index_file)).post(analyze::handler),
        )
        .route("/health", get(health::handler))
        .layer(DefaultBodyLimit::max(config.max_upload_bytes));

    // Only the cross-origin deployment gets CORS headers; preflight OPTIONS
    // requests are answered by the layer itself.
    if let Some(origin) = config.cors_origin.as_deref().and_then(cors_origin) {
        app = app.layer(
            CorsLayer::new()
                .allow_origin(origin)
                .allow_methods([Method::POST, Method::GET, Method::OPTIONS])
                .allow_headers([CONTENT_TYPE]),
        );
    }

    app.layer(TraceLayer::new_for_http()).with_state(state)
}

fn cors_origin(origin: &str) -> Option<HeaderValue> {
    HeaderValue::from_str(origin)
        .map_err(|e| tracing::warn!(%origin, error = %e, "Ignoring invalid CORS origin"))
        .ok()
}
