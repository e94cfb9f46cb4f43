//! Axum router construction.
//!
//! [`build`] assembles the complete application router, including:
//! - Middleware layers (CORS, per-request trace-ID injection)
//! - Optional Swagger UI / OpenAPI document endpoint (disable with `PARLEY_ENABLE_SWAGGER=false`)
//! - Health / heartbeat route
//! - Chat, history and diagnostic routes
//! - A JSON 404 for everything else

pub mod chat;
pub mod doc;
mod health;

use axum::http::Uri;
use axum::{middleware, Router};
use crate::error::ServerError;
use crate::middleware::{cors, trace};
use crate::state::AppState;
use std::sync::Arc;
use tower::ServiceBuilder;
use utoipa_swagger_ui::SwaggerUi;

// ── Router builder ────────────────────────────────────────────────────────────

/// Build the complete Axum [`Router`] for the application.
pub fn build(state: Arc<AppState>) -> Router {
    let api_router = Router::new()
        .merge(health::router())
        .merge(chat::router());

    let mut app = Router::new().merge(api_router).fallback(no_route);

    if state.config.enable_swagger {
        app = app.merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", doc::get_docs()));
    }

    app
        .layer(ServiceBuilder::new().layer(cors::cors_layer(&state)))
        .layer(middleware::from_fn(trace::trace_middleware))
        .with_state(state)
}

async fn no_route(uri: Uri) -> ServerError {
    ServerError::NotFound(format!("no route for {}", uri.path()))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::completion::AzureOpenAiClient;
    use crate::config::{CompletionConfig, Config};
    use crate::entities::SqliteStore;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn app(enable_swagger: bool) -> Router {
        let completion = AzureOpenAiClient::new(CompletionConfig {
            endpoint: "http://127.0.0.1:9".into(),
            api_key: "test-key".into(),
            deployment: "unused".into(),
            ..CompletionConfig::default()
        })
        .unwrap();
        build(Arc::new(AppState {
            config: Arc::new(Config { enable_swagger, ..Config::default() }),
            store: Arc::new(SqliteStore::in_memory().await.unwrap()),
            completion: Arc::new(completion),
        }))
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
        let resp = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        (status, resp.into_body().collect().await.unwrap().to_bytes().to_vec())
    }

    #[tokio::test]
    async fn unknown_routes_get_json_404() {
        let (status, body) = get(app(false).await, "/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["error"], "no route for /nope");
    }

    #[tokio::test]
    async fn openapi_document_follows_swagger_toggle() {
        let (status, _) = get(app(true).await, "/api-docs/openapi.json").await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = get(app(false).await, "/api-docs/openapi.json").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn health_is_routed() {
        let (status, _) = get(app(false).await, "/health").await;
        assert_eq!(status, StatusCode::OK);
    }
}
