use crate::state::AppState;
use axum::http::HeaderValue;
use tower_http::cors::{Any, CorsLayer};

/// CORS policy from `PARLEY_CORS_ORIGINS`.
///
/// Unset, or a list in which no entry parses as a header value, means any
/// origin is allowed.
pub fn cors_layer(state: &AppState) -> CorsLayer {
    let origins: Vec<HeaderValue> = state
        .config
        .cors_allowed_origins
        .as_deref()
        .map(|list| {
            list.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .filter_map(|s| HeaderValue::from_str(s).ok())
                .collect()
        })
        .unwrap_or_default();

    let layer = CorsLayer::new().allow_headers(Any).allow_methods(Any);
    if origins.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(origins)
    }
}
