use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::get,
};
use uuid::Uuid;

use crate::auth::RequireAuth;
use crate::server::dto::{CheckRequest, InstanceQuery};
use crate::server::response::{ApiError, Reply, StoreOptionExt};
use crate::server::tree::{live_repository, mutate, repository_scope};
use crate::server::validation::validate_catalog_name;
use crate::server::{AppState, authorize};
use crate::tree::{CheckConfig, CheckSpec, TreeOperation};
use crate::types::Scope;

pub fn checks_router() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/checkconfig/{repository}/",
            get(list_checks).post(create_check),
        )
        .route(
            "/checkconfig/{repository}/{id}",
            get(show_check).put(update_check).delete(delete_check),
        )
        .route("/instance/", get(list_instances))
        .route("/instance/{id}", get(show_instance))
        .route("/instance/{id}/versions", get(instance_versions))
}

fn check_in(state: &AppState, repository_id: Uuid, id: Uuid) -> Result<CheckConfig, ApiError> {
    state
        .store
        .get_check_config(id)
        .map_err(ApiError::from)?
        .filter(|c| c.repository_id == repository_id)
        .or_not_found("Check configuration not found")
}

fn validate_spec(spec: &CheckSpec) -> Result<(), ApiError> {
    validate_catalog_name(&spec.name, "Check")?;
    if spec.interval == 0 {
        return Err(ApiError::bad_request("check interval must be positive"));
    }
    if spec.thresholds.is_empty() {
        return Err(ApiError::bad_request("a check needs at least one threshold"));
    }
    Ok(())
}

async fn list_checks(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(repository_id): Path<Uuid>,
) -> impl IntoResponse {
    live_repository(&state, repository_id)?;
    authorize(
        &state,
        &auth.subject,
        "check-config",
        "list",
        repository_scope(repository_id),
    )
    .await?;
    let checks = state
        .store
        .list_check_configs(repository_id)
        .map_err(ApiError::from)?;
    Ok::<_, ApiError>(Reply::list(checks))
}

async fn show_check(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path((repository_id, id)): Path<(Uuid, Uuid)>,
) -> impl IntoResponse {
    let check = check_in(&state, repository_id, id)?;
    let scope = state
        .guidepost
        .scope_of(repository_id, check.object_id)
        .map_err(ApiError::from)?;
    authorize(&state, &auth.subject, "check-config", "show", scope).await?;
    Ok::<_, ApiError>(Reply::one(check))
}

async fn create_check(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(repository_id): Path<Uuid>,
    Json(req): Json<CheckRequest>,
) -> impl IntoResponse {
    live_repository(&state, repository_id)?;
    validate_spec(&req.spec)?;
    let mut spec = req.spec;
    spec.id = None;
    let op = TreeOperation::AddCheck {
        object: req.object_id,
        spec,
    };
    mutate(&state, &auth.subject, repository_id, "check-config", "add", op).await
}

async fn update_check(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path((repository_id, id)): Path<(Uuid, Uuid)>,
    Json(mut spec): Json<CheckSpec>,
) -> impl IntoResponse {
    check_in(&state, repository_id, id)?;
    validate_spec(&spec)?;
    spec.id = None;
    let op = TreeOperation::UpdateCheck { config_id: id, spec };
    mutate(&state, &auth.subject, repository_id, "check-config", "update", op).await
}

async fn delete_check(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path((repository_id, id)): Path<(Uuid, Uuid)>,
) -> impl IntoResponse {
    check_in(&state, repository_id, id)?;
    let op = TreeOperation::DeleteCheck { config_id: id };
    mutate(&state, &auth.subject, repository_id, "check-config", "remove", op).await
}

// Check instances

async fn list_instances(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Query(query): Query<InstanceQuery>,
) -> impl IntoResponse {
    authorize(&state, &auth.subject, "instance", "list", Scope::Unscoped).await?;
    let instances = state
        .store
        .list_instances(query.repository)
        .map_err(ApiError::from)?;
    Ok::<_, ApiError>(Reply::list(instances))
}

async fn show_instance(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    authorize(&state, &auth.subject, "instance", "show", Scope::Unscoped).await?;
    let instance = state
        .store
        .get_instance(id)
        .map_err(ApiError::from)?
        .or_not_found("Check instance not found")?;
    Ok::<_, ApiError>(Reply::one(instance))
}

async fn instance_versions(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    authorize(&state, &auth.subject, "instance", "versions", Scope::Unscoped).await?;
    let versions = state
        .store
        .list_instance_versions(id)
        .map_err(ApiError::from)?;
    if versions.is_empty() {
        return Err(ApiError::not_found("Check instance not found"));
    }
    Ok::<_, ApiError>(Reply::list(versions))
}
