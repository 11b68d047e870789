//! Workflow inspection for operators and the deployment feed consumed by
//! monitoring systems.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::{get, patch},
};
use uuid::Uuid;

use crate::auth::RequireAuth;
use crate::server::dto::{ForceRequest, RetryRequest, SummaryEntry, WorkflowQuery};
use crate::server::response::{ApiError, Reply, StoreOptionExt};
use crate::server::{AppState, authorize};
use crate::types::Scope;
use crate::workflow::InstanceConfig;

pub fn workflow_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/workflow/summary", get(summary))
        .route("/workflow/", get(list))
        .route("/workflow/retry", patch(retry))
        .route("/workflow/set/{id}", patch(force))
        .route("/workflow/history/{id}", get(history))
        .route("/deployment/monitoring/{id}", get(poll))
        .route("/deployment/id/{id}", get(claim))
        .route("/deployment/id/{id}/{result}", patch(report))
}

async fn summary(auth: RequireAuth, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    authorize(&state, &auth.subject, "workflow", "summary", Scope::Unscoped).await?;
    let entries: Vec<SummaryEntry> = state
        .store
        .workflow_summary()
        .map_err(ApiError::from)?
        .into_iter()
        .map(|(status, count)| SummaryEntry { status, count })
        .collect();
    Ok::<_, ApiError>(Reply::list(entries))
}

async fn list(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Query(query): Query<WorkflowQuery>,
) -> impl IntoResponse {
    authorize(&state, &auth.subject, "workflow", "list", Scope::Unscoped).await?;
    let configs = state
        .store
        .list_instance_configs(query.status)
        .map_err(ApiError::from)?;
    Ok::<_, ApiError>(Reply::list(configs))
}

async fn history(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    authorize(&state, &auth.subject, "workflow", "list", Scope::Unscoped).await?;
    state
        .store
        .get_instance_config(id)
        .map_err(ApiError::from)?
        .or_not_found("Instance configuration not found")?;
    let rows = state.store.list_history(id).map_err(ApiError::from)?;
    Ok::<_, ApiError>(Reply::list(rows))
}

async fn retry(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Json(req): Json<RetryRequest>,
) -> impl IntoResponse {
    authorize(&state, &auth.subject, "workflow", "retry", Scope::Unscoped).await?;
    let config = state
        .workflow
        .retry(req.instance_config_id, Some(auth.subject.user_id))
        .await
        .map_err(ApiError::from)?;
    Ok::<_, ApiError>(Reply::one(config))
}

async fn force(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<ForceRequest>,
) -> impl IntoResponse {
    authorize(&state, &auth.subject, "workflow", "set", Scope::Unscoped).await?;
    let config = state
        .workflow
        .force(id, req.status, Some(auth.subject.user_id))
        .await
        .map_err(ApiError::from)?;
    Ok::<_, ApiError>(Reply::one(config))
}

// Deployment feed

/// Loads a configuration and authorizes against its monitoring system.
async fn deployment(
    state: &AppState,
    auth: &RequireAuth,
    id: Uuid,
    action: &str,
) -> Result<InstanceConfig, ApiError> {
    let config = state
        .store
        .get_instance_config(id)
        .map_err(ApiError::from)?
        .or_not_found("Instance configuration not found")?;
    let monitoring_id = config.monitoring_id.ok_or_else(|| {
        ApiError::not_found(format!(
            "instance configuration {id} is not bound to a monitoring system"
        ))
    })?;
    authorize(
        state,
        &auth.subject,
        "deployment",
        action,
        Scope::Monitoring(monitoring_id),
    )
    .await?;
    Ok(config)
}

/// Ids of the configurations a monitoring system has to roll out or
/// remove.
async fn poll(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(monitoring_id): Path<Uuid>,
) -> impl IntoResponse {
    state
        .store
        .get_monitoring(monitoring_id)
        .map_err(ApiError::from)?
        .or_not_found("Monitoring system not found")?;
    authorize(
        &state,
        &auth.subject,
        "deployment",
        "poll",
        Scope::Monitoring(monitoring_id),
    )
    .await?;
    let pending: Vec<Uuid> = state
        .workflow
        .poll(monitoring_id)
        .await
        .map_err(ApiError::from)?
        .into_iter()
        .map(|config| config.id)
        .collect();
    Ok::<_, ApiError>(Reply::list(pending))
}

async fn claim(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    deployment(&state, &auth, id, "claim").await?;
    let config = state
        .workflow
        .claim(id, Some(auth.subject.user_id))
        .await
        .map_err(ApiError::from)?;
    Ok::<_, ApiError>(Reply::one(config))
}

async fn report(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path((id, result)): Path<(Uuid, String)>,
) -> impl IntoResponse {
    let success = match result.as_str() {
        "success" => true,
        "failed" => false,
        other => {
            return Err(ApiError::bad_request(format!(
                "deployment result must be success or failed, not {other}"
            )));
        }
    };
    deployment(&state, &auth, id, "result").await?;
    let config = state
        .workflow
        .report(id, success, Some(auth.subject.user_id))
        .await
        .map_err(ApiError::from)?;
    Ok::<_, ApiError>(Reply::one(config))
}
