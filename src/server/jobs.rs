use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::get,
};
use uuid::Uuid;

use crate::auth::RequireAuth;
use crate::server::dto::{JobQuery, WaitQuery};
use crate::server::response::{ApiError, Reply, StoreOptionExt};
use crate::server::{AppState, authorize};
use crate::types::{Job, Scope, Subject};

const DEFAULT_WAIT_MS: u64 = 5_000;
const MAX_WAIT_MS: u64 = 60_000;

pub fn jobs_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/job/", get(list_jobs))
        .route("/job/{id}", get(show_job))
        .route("/job/{id}/wait", get(wait_job))
}

/// Own jobs are always visible; everybody else's need job-admin.
async fn visible_job(state: &AppState, subject: &Subject, id: Uuid) -> Result<Job, ApiError> {
    let job = state
        .jobs
        .get(id)
        .map_err(ApiError::from)?
        .or_not_found("Job not found")?;
    if job.user_id != subject.user_id {
        authorize(state, subject, "job-admin", "show", Scope::Unscoped).await?;
    } else {
        authorize(state, subject, "job", "show", Scope::Unscoped).await?;
    }
    Ok(job)
}

async fn list_jobs(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Query(query): Query<JobQuery>,
) -> impl IntoResponse {
    let owner = if query.all {
        authorize(&state, &auth.subject, "job-admin", "list", Scope::Unscoped).await?;
        None
    } else {
        authorize(&state, &auth.subject, "job", "list", Scope::Unscoped).await?;
        Some(auth.subject.user_id)
    };
    let jobs = state.jobs.list(owner).map_err(ApiError::from)?;
    Ok::<_, ApiError>(Reply::list(jobs))
}

async fn show_job(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let job = visible_job(&state, &auth.subject, id).await?;
    Ok::<_, ApiError>(Reply::one(job))
}

/// Long-polls until the job is processed; on timeout the current state is
/// returned.
async fn wait_job(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<WaitQuery>,
) -> impl IntoResponse {
    visible_job(&state, &auth.subject, id).await?;
    let timeout = query.timeout_ms.unwrap_or(DEFAULT_WAIT_MS).min(MAX_WAIT_MS);
    let job = state
        .jobs
        .wait(id, Duration::from_millis(timeout))
        .await
        .map_err(ApiError::from)?;
    Ok::<_, ApiError>(Reply::one(job))
}
