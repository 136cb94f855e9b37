use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use lp_core::{Country, CrawlConfig, CrawlJob, JobId, Language, Source};
use lp_crawler::{CancelAck, RetryOutcome, SourceFilter};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::AppState;

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Serialize, Deserialize)]
pub struct StartResponse {
    pub job_id: JobId,
}

#[derive(Debug, Default, Deserialize)]
pub struct SourceQuery {
    pub language: Option<Language>,
    pub country: Option<Country>,
    /// Include inactive sources
    #[serde(default)]
    pub all: bool,
}

fn parse_id(raw: &str) -> ApiResult<JobId> {
    Ok(raw.parse::<JobId>()?)
}

pub async fn start_job(
    State(state): State<Arc<AppState>>,
    Json(config): Json<CrawlConfig>,
) -> ApiResult<impl IntoResponse> {
    let job_id = state.service.start_job(config).await?;
    Ok((StatusCode::ACCEPTED, Json(StartResponse { job_id })))
}

pub async fn get_progress(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Json<CrawlJob>> {
    let id = parse_id(&id)?;
    Ok(Json(state.service.get_progress(id).await?))
}

pub async fn cancel_job(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Json<CancelAck>> {
    let id = parse_id(&id)?;
    Ok(Json(state.service.cancel_job(id).await?))
}

pub async fn retry_saves(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Json<RetryOutcome>> {
    let id = parse_id(&id)?;
    Ok(Json(state.service.retry_saves(id).await?))
}

pub async fn list_sources(State(state): State<Arc<AppState>>, Query(query): Query<SourceQuery>) -> Json<Vec<Source>> {
    let filter = SourceFilter {
        language: query.language,
        country: query.country,
        active: if query.all { None } else { Some(true) },
    };
    Json(state.service.list_sources(&filter).await)
}
