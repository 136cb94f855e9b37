use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

pub mod error;
pub mod handlers;
pub mod state;

pub use error::ApiError;
pub use state::AppState;

pub fn create_app(state: AppState) -> Router {
    let cors = CorsLayer::permissive();

    Router::new()
        .route("/api/jobs", post(handlers::start_job))
        .route("/api/jobs/:id", get(handlers::get_progress))
        .route("/api/jobs/:id/cancel", post(handlers::cancel_job))
        .route("/api/jobs/:id/retry-saves", post(handlers::retry_saves))
        .route("/api/sources", get(handlers::list_sources))
        .layer(cors)
        .with_state(Arc::new(state))
}

/// Serves the API until the process is stopped.
pub async fn serve(addr: SocketAddr, state: AppState) -> lp_core::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on http://{}", listener.local_addr()?);
    axum::serve(listener, create_app(state)).await?;
    Ok(())
}

pub mod prelude {
    pub use crate::{create_app, serve, ApiError, AppState};
    pub use lp_core::{Error, Result};
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use lp_core::{CompletionModel, CrawlJob, JobStatus, Language};
    use lp_crawler::fetcher::static_fetcher::test_source;
    use lp_crawler::{CrawlManager, ManagerSettings, ModelFactory, SourceCatalog, StaticFetcher};
    use lp_inference::models::DummyModel;
    use lp_inference::PolishSettings;
    use lp_storage::{MemoryStorage, Storage};
    use serde_json::{json, Value};
    use std::time::Duration;
    use tower::ServiceExt;

    fn app(delay: Duration) -> (Router, CrawlManager) {
        let npr = test_source("npr", Language::En);
        let mut old = test_source("old", Language::En);
        old.active = false;
        let fetcher = StaticFetcher::new().with_generated(&npr, 1).with_delay(delay);
        let models: ModelFactory = Arc::new(|_| Arc::new(DummyModel) as Arc<dyn CompletionModel>);
        let settings = ManagerSettings {
            polish: PolishSettings {
                min_call_delay: Duration::ZERO,
                ..PolishSettings::default()
            },
            ..ManagerSettings::default()
        };
        let manager = CrawlManager::new(
            SourceCatalog::from_sources(vec![npr, old]).unwrap(),
            Arc::new(fetcher),
            Storage::from_backend(MemoryStorage::new()),
            models,
            settings,
        );
        let state = AppState {
            service: Arc::new(manager.clone()),
        };
        (create_app(state), manager)
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_start_and_poll() {
        let (app, manager) = app(Duration::ZERO);
        let body = json!({ "target_languages": ["en"], "articles_per_language": 1, "ai_model": "dummy" });
        let (status, started) = call(&app, "POST", "/api/jobs", Some(body)).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let id = started["job_id"].as_str().unwrap().to_string();

        manager.wait(id.parse().unwrap()).await.unwrap();
        let (status, job) = call(&app, "GET", &format!("/api/jobs/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        let job: CrawlJob = serde_json::from_value(job).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.languages.values().next().unwrap().articles_polished, 1);
    }

    #[tokio::test]
    async fn test_job_control_errors() {
        let (app, _) = app(Duration::from_millis(300));
        let (status, body) = call(
            &app,
            "POST",
            "/api/jobs",
            Some(json!({ "target_languages": [], "articles_per_language": 1 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("no target languages"));

        let (status, _) = call(&app, "GET", "/api/jobs/not-a-uuid", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let missing = lp_core::JobId::new();
        let (status, _) = call(&app, "GET", &format!("/api/jobs/{missing}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = call(&app, "POST", &format!("/api/jobs/{missing}/cancel"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let body = json!({ "target_languages": ["en"], "articles_per_language": 1 });
        let (_, first) = call(&app, "POST", "/api/jobs", Some(body.clone())).await;
        let (_, second) = call(&app, "POST", "/api/jobs", Some(body)).await;
        assert_eq!(first["job_id"], second["job_id"]);

        let id = first["job_id"].as_str().unwrap();
        let (status, _) = call(&app, "POST", &format!("/api/jobs/{id}/retry-saves"), None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, ack) = call(&app, "POST", &format!("/api/jobs/{id}/cancel"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(ack["status"], "failed");
    }

    #[tokio::test]
    async fn test_list_sources() {
        let (app, _) = app(Duration::ZERO);
        let (status, sources) = call(&app, "GET", "/api/sources?language=en", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(sources.as_array().unwrap().len(), 1);

        let (_, sources) = call(&app, "GET", "/api/sources?language=en&all=true", None).await;
        assert_eq!(sources.as_array().unwrap().len(), 2);

        let (_, sources) = call(&app, "GET", "/api/sources?language=zh", None).await;
        assert!(sources.as_array().unwrap().is_empty());
    }
}
