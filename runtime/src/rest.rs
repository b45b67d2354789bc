// Copyright 2026 Sitegauge Contributors
// SPDX-License-Identifier: Apache-2.0

//! HTTP REST API for Sitegauge.
//!
//! Starting an audit returns `202 Accepted` with the job id as soon as the
//! job row exists; the pipeline runs detached. Progress is served as
//! Server-Sent Events built from the persisted job state.

use crate::jobs::{JobError, JobService};
use crate::progress::ProgressStreamer;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use sitegauge::GaugeError;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};

const DEFAULT_DEPTH: u32 = 2;
const DEFAULT_MAX_URLS: u32 = 100;
const DEFAULT_LIST_LIMIT: usize = 20;
const MAX_LIST_LIMIT: usize = 200;

/// Shared state behind every handler.
pub struct AppState {
    pub jobs: JobService,
    pub streamer: ProgressStreamer,
    pub browser_available: bool,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(jobs: JobService, browser_available: bool) -> Self {
        let streamer = ProgressStreamer::new(jobs.store().clone());
        Self {
            jobs,
            streamer,
            browser_available,
            started_at: Instant::now(),
        }
    }
}

/// Errors returned to API clients as `{"error": {"code", "message"}}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("audit job {0} not found")]
    NotFound(String),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error(transparent)]
    Store(#[from] GaugeError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::NotFound(_)
            | Self::Store(GaugeError::JobNotFound(_))
            | Self::Job(JobError::Store(GaugeError::JobNotFound(_))) => {
                (StatusCode::NOT_FOUND, "E_NOT_FOUND")
            }
            Self::Job(JobError::InvalidUrl(_) | JobError::InvalidViewport(_)) => {
                (StatusCode::BAD_REQUEST, "E_INVALID_PARAMS")
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "E_INTERNAL"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            tracing::error!("API error: {self}");
        }
        let body = json!({ "error": { "code": code, "message": self.to_string() } });
        (status, Json(body)).into_response()
    }
}

/// Build the axum Router with all REST endpoints.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/v1/audits", get(list_audits))
        .route("/api/v1/audits/site", post(start_site_audit))
        .route("/api/v1/audits/page", post(start_page_audit))
        .route("/api/v1/audits/:id", get(get_audit))
        .route("/api/v1/audits/:id/events", get(audit_events))
        .layer(cors)
        .with_state(state)
}

/// Serve the API until the listener fails.
pub async fn start(addr: SocketAddr, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("REST API listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": state.started_at.elapsed().as_secs_f64(),
        "browser": state.browser_available,
    }))
}

fn default_depth() -> u32 {
    DEFAULT_DEPTH
}

fn default_max_urls() -> u32 {
    DEFAULT_MAX_URLS
}

#[derive(Debug, Deserialize)]
struct SiteAuditBody {
    url: String,
    #[serde(default = "default_depth")]
    max_depth: u32,
    #[serde(default = "default_max_urls")]
    max_urls: u32,
}

#[derive(Debug, Deserialize)]
struct PageAuditBody {
    url: String,
    viewport: Option<String>,
}

async fn start_site_audit(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SiteAuditBody>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let job = state
        .jobs
        .start_site_audit(&body.url, body.max_depth, body.max_urls)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "job_id": job.id,
            "status": job.status,
            "mode": job.mode,
            "url": job.url,
            "max_depth": job.max_depth,
            "max_urls": job.max_urls,
        })),
    ))
}

async fn start_page_audit(
    State(state): State<Arc<AppState>>,
    Json(body): Json<PageAuditBody>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let job = state
        .jobs
        .start_page_audit(&body.url, body.viewport.as_deref())?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "job_id": job.id,
            "status": job.status,
            "mode": job.mode,
            "url": job.url,
            "viewport": job.viewport,
        })),
    ))
}

/// Full report once terminal; a status-only projection while running.
async fn get_audit(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let store = state.jobs.store();
    let job = store
        .find_job(&id)?
        .ok_or_else(|| ApiError::NotFound(id.clone()))?;

    if job.status.is_terminal() {
        let report = store.job_report(&id)?;
        return Ok(Json(serde_json::to_value(report)?));
    }

    Ok(Json(json!({
        "id": job.id,
        "url": job.url,
        "mode": job.mode,
        "status": job.status,
        "current_step": job.current_step,
        "created_at": job.created_at,
        "updated_at": job.updated_at,
    })))
}

async fn audit_events(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Sse<impl futures::Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    if state.jobs.store().find_job(&id)?.is_none() {
        return Err(ApiError::NotFound(id));
    }
    let stream = state.streamer.stream(&id).map(|event| {
        Event::default()
            .event("progress")
            .id(event.seq.to_string())
            .json_data(&event)
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

#[derive(Debug, Deserialize, Default)]
struct ListParams {
    limit: Option<usize>,
}

async fn list_audits(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Result<Json<Value>, ApiError> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);
    let jobs = state.jobs.store().list_jobs(limit)?;
    Ok(Json(json!({ "audits": jobs })))
}
