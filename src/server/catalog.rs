//! Global catalogues: name-only lookups and the structured catalogues the
//! tree validates against.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    response::IntoResponse,
    routing::get,
};
use uuid::Uuid;

use crate::auth::RequireAuth;
use crate::server::dto::{CapabilityRequest, MonitoringRequest, NameRequest, NameResponse};
use crate::server::response::{ApiError, Reply, StoreOptionExt, deleted};
use crate::server::validation::validate_catalog_name;
use crate::server::{AppState, authorize};
use crate::types::{
    Attribute, Capability, Level, LookupKind, Metric, MonitoringSystem, Provider, Scope, Unit,
    Validity,
};

pub fn catalog_router() -> Router<Arc<AppState>> {
    let mut router = Router::new();
    for kind in LookupKind::ALL {
        router = lookup_routes(router, kind);
    }
    router
        .route("/unit/", get(list_units).post(add_unit))
        .route("/unit/{unit}", get(show_unit).delete(remove_unit))
        .route("/provider/", get(list_providers).post(add_provider))
        .route("/provider/{name}", get(show_provider).delete(remove_provider))
        .route("/metric/", get(list_metrics).post(add_metric))
        .route("/metric/{path}", get(show_metric).delete(remove_metric))
        .route("/level/", get(list_levels).post(add_level))
        .route("/level/{name}", get(show_level).delete(remove_level))
        .route("/attribute/", get(list_attributes).post(add_attribute))
        .route(
            "/attribute/{name}",
            get(show_attribute).delete(remove_attribute),
        )
        .route("/validity/", get(list_validity).post(add_validity))
        .route("/validity/{name}", get(show_validity).delete(remove_validity))
        .route(
            "/monitoringsystem/",
            get(list_monitoring).post(add_monitoring),
        )
        .route(
            "/monitoringsystem/{id}",
            get(show_monitoring).delete(remove_monitoring),
        )
        .route("/capability/", get(list_capabilities).post(add_capability))
        .route(
            "/capability/{id}",
            get(show_capability).delete(remove_capability),
        )
}

fn lookup_routes(router: Router<Arc<AppState>>, kind: LookupKind) -> Router<Arc<AppState>> {
    router
        .route(
            &format!("/{kind}/"),
            get(move |auth: RequireAuth, state: State<Arc<AppState>>| {
                list_lookup(kind, auth, state)
            })
            .post(
                move |auth: RequireAuth,
                      state: State<Arc<AppState>>,
                      body: Json<NameRequest>| add_lookup(kind, auth, state, body),
            ),
        )
        .route(
            &format!("/{kind}/{{name}}"),
            get(
                move |auth: RequireAuth, state: State<Arc<AppState>>, name: Path<String>| {
                    show_lookup(kind, auth, state, name)
                },
            )
            .delete(
                move |auth: RequireAuth, state: State<Arc<AppState>>, name: Path<String>| {
                    remove_lookup(kind, auth, state, name)
                },
            ),
        )
}

async fn list_lookup(
    kind: LookupKind,
    _auth: RequireAuth,
    State(state): State<Arc<AppState>>,
) -> Result<Reply<NameResponse>, ApiError> {
    let names = state.store.list_lookup(kind).map_err(ApiError::from)?;
    Ok(Reply::list(
        names.into_iter().map(|name| NameResponse { name }).collect(),
    ))
}

async fn show_lookup(
    kind: LookupKind,
    _auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Reply<NameResponse>, ApiError> {
    if !state.store.has_lookup(kind, &name).map_err(ApiError::from)? {
        return Err(ApiError::not_found(format!("{kind} {name} not found")));
    }
    Ok(Reply::one(NameResponse { name }))
}

async fn add_lookup(
    kind: LookupKind,
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Json(req): Json<NameRequest>,
) -> Result<Reply<NameResponse>, ApiError> {
    authorize(&state, &auth.subject, kind.as_str(), "add", Scope::Unscoped).await?;
    validate_catalog_name(&req.name, kind.as_str())?;
    state
        .store
        .add_lookup(kind, &req.name)
        .map_err(ApiError::from)?;
    Ok(Reply::created(NameResponse { name: req.name }))
}

async fn remove_lookup(
    kind: LookupKind,
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Reply<()>, ApiError> {
    authorize(&state, &auth.subject, kind.as_str(), "remove", Scope::Unscoped).await?;
    let removed = state
        .store
        .remove_lookup(kind, &name)
        .map_err(ApiError::from)?;
    if removed {
        Ok(Reply::empty())
    } else {
        Err(ApiError::not_found(format!("{kind} {name} not found")))
    }
}

// Units

async fn list_units(_auth: RequireAuth, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let units = state.store.list_units().map_err(ApiError::from)?;
    Ok::<_, ApiError>(Reply::list(units))
}

async fn show_unit(
    _auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(unit): Path<String>,
) -> impl IntoResponse {
    let unit = state
        .store
        .get_unit(&unit)
        .map_err(ApiError::from)?
        .or_not_found("Unit not found")?;
    Ok::<_, ApiError>(Reply::one(unit))
}

async fn add_unit(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Json(unit): Json<Unit>,
) -> impl IntoResponse {
    authorize(&state, &auth.subject, "unit", "add", Scope::Unscoped).await?;
    validate_catalog_name(&unit.unit, "Unit")?;
    state.store.create_unit(&unit).map_err(ApiError::from)?;
    Ok::<_, ApiError>(Reply::created(unit))
}

async fn remove_unit(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(unit): Path<String>,
) -> impl IntoResponse {
    authorize(&state, &auth.subject, "unit", "remove", Scope::Unscoped).await?;
    let removed = state.store.delete_unit(&unit).map_err(ApiError::from)?;
    deleted(removed, "Unit not found")
}

// Providers

async fn list_providers(
    _auth: RequireAuth,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let providers = state.store.list_providers().map_err(ApiError::from)?;
    Ok::<_, ApiError>(Reply::list(providers))
}

async fn show_provider(
    _auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    let provider = state
        .store
        .get_provider(&name)
        .map_err(ApiError::from)?
        .or_not_found("Provider not found")?;
    Ok::<_, ApiError>(Reply::one(provider))
}

async fn add_provider(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Json(provider): Json<Provider>,
) -> impl IntoResponse {
    authorize(&state, &auth.subject, "provider", "add", Scope::Unscoped).await?;
    validate_catalog_name(&provider.name, "Provider")?;
    state
        .store
        .create_provider(&provider)
        .map_err(ApiError::from)?;
    Ok::<_, ApiError>(Reply::created(provider))
}

async fn remove_provider(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    authorize(&state, &auth.subject, "provider", "remove", Scope::Unscoped).await?;
    let removed = state.store.delete_provider(&name).map_err(ApiError::from)?;
    deleted(removed, "Provider not found")
}

// Metrics

async fn list_metrics(_auth: RequireAuth, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let metrics = state.store.list_metrics().map_err(ApiError::from)?;
    Ok::<_, ApiError>(Reply::list(metrics))
}

async fn show_metric(
    _auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
) -> impl IntoResponse {
    let metric = state
        .store
        .get_metric(&path)
        .map_err(ApiError::from)?
        .or_not_found("Metric not found")?;
    Ok::<_, ApiError>(Reply::one(metric))
}

async fn add_metric(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Json(metric): Json<Metric>,
) -> impl IntoResponse {
    authorize(&state, &auth.subject, "metric", "add", Scope::Unscoped).await?;
    validate_catalog_name(&metric.path, "Metric")?;
    if state
        .store
        .get_unit(&metric.unit)
        .map_err(ApiError::from)?
        .is_none()
    {
        return Err(ApiError::bad_request(format!("unknown unit {}", metric.unit)));
    }
    state.store.create_metric(&metric).map_err(ApiError::from)?;
    Ok::<_, ApiError>(Reply::created(metric))
}

async fn remove_metric(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
) -> impl IntoResponse {
    authorize(&state, &auth.subject, "metric", "remove", Scope::Unscoped).await?;
    let removed = state.store.delete_metric(&path).map_err(ApiError::from)?;
    deleted(removed, "Metric not found")
}

// Levels

async fn list_levels(_auth: RequireAuth, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let levels = state.store.list_levels().map_err(ApiError::from)?;
    Ok::<_, ApiError>(Reply::list(levels))
}

async fn show_level(
    _auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    let level = state
        .store
        .get_level(&name)
        .map_err(ApiError::from)?
        .or_not_found("Level not found")?;
    Ok::<_, ApiError>(Reply::one(level))
}

async fn add_level(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Json(level): Json<Level>,
) -> impl IntoResponse {
    authorize(&state, &auth.subject, "level", "add", Scope::Unscoped).await?;
    validate_catalog_name(&level.name, "Level")?;
    validate_catalog_name(&level.short_name, "Level short")?;
    state.store.create_level(&level).map_err(ApiError::from)?;
    Ok::<_, ApiError>(Reply::created(level))
}

async fn remove_level(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    authorize(&state, &auth.subject, "level", "remove", Scope::Unscoped).await?;
    let removed = state.store.delete_level(&name).map_err(ApiError::from)?;
    deleted(removed, "Level not found")
}

// Service attributes

async fn list_attributes(
    _auth: RequireAuth,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let attributes = state.store.list_attributes().map_err(ApiError::from)?;
    Ok::<_, ApiError>(Reply::list(attributes))
}

async fn show_attribute(
    _auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    let attribute = state
        .store
        .get_attribute(&name)
        .map_err(ApiError::from)?
        .or_not_found("Attribute not found")?;
    Ok::<_, ApiError>(Reply::one(attribute))
}

async fn add_attribute(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Json(attribute): Json<Attribute>,
) -> impl IntoResponse {
    authorize(&state, &auth.subject, "attribute", "add", Scope::Unscoped).await?;
    validate_catalog_name(&attribute.name, "Attribute")?;
    state
        .store
        .create_attribute(&attribute)
        .map_err(ApiError::from)?;
    Ok::<_, ApiError>(Reply::created(attribute))
}

async fn remove_attribute(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    authorize(&state, &auth.subject, "attribute", "remove", Scope::Unscoped).await?;
    let removed = state
        .store
        .delete_attribute(&name)
        .map_err(ApiError::from)?;
    deleted(removed, "Attribute not found")
}

// System property validity

async fn list_validity(_auth: RequireAuth, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let rows = state.store.list_validity().map_err(ApiError::from)?;
    Ok::<_, ApiError>(Reply::list(rows))
}

async fn show_validity(
    _auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    let rows: Vec<Validity> = state
        .store
        .list_validity()
        .map_err(ApiError::from)?
        .into_iter()
        .filter(|v| v.system_property == name)
        .collect();
    if rows.is_empty() {
        return Err(ApiError::not_found("Validity not found"));
    }
    Ok::<_, ApiError>(Reply::list(rows))
}

async fn add_validity(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Json(validity): Json<Validity>,
) -> impl IntoResponse {
    authorize(&state, &auth.subject, "validity", "add", Scope::Unscoped).await?;
    if !state
        .store
        .has_lookup(LookupKind::Entity, &validity.entity)
        .map_err(ApiError::from)?
    {
        return Err(ApiError::bad_request(format!(
            "unknown entity {}",
            validity.entity
        )));
    }
    state
        .store
        .create_validity(&validity)
        .map_err(ApiError::from)?;
    Ok::<_, ApiError>(Reply::created(validity))
}

async fn remove_validity(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    authorize(&state, &auth.subject, "validity", "remove", Scope::Unscoped).await?;
    let removed = state
        .store
        .delete_validity(&name)
        .map_err(ApiError::from)?;
    deleted(removed, "Validity not found")
}

// Monitoring systems

async fn list_monitoring(
    _auth: RequireAuth,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let systems = state.store.list_monitoring().map_err(ApiError::from)?;
    Ok::<_, ApiError>(Reply::list(systems))
}

async fn show_monitoring(
    _auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let system = state
        .store
        .get_monitoring(id)
        .map_err(ApiError::from)?
        .or_not_found("Monitoring system not found")?;
    Ok::<_, ApiError>(Reply::one(system))
}

async fn add_monitoring(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Json(req): Json<MonitoringRequest>,
) -> impl IntoResponse {
    authorize(&state, &auth.subject, "monitoringsystem", "add", Scope::Unscoped).await?;
    validate_catalog_name(&req.name, "Monitoring system")?;
    if !state
        .store
        .has_lookup(LookupKind::Mode, &req.mode)
        .map_err(ApiError::from)?
    {
        return Err(ApiError::bad_request(format!("unknown mode {}", req.mode)));
    }
    state
        .store
        .get_user(req.contact_id)
        .map_err(ApiError::from)?
        .or_not_found("Contact user not found")?;
    state
        .store
        .get_team(req.team_id)
        .map_err(ApiError::from)?
        .or_not_found("Team not found")?;

    let system = MonitoringSystem {
        id: Uuid::new_v4(),
        name: req.name,
        mode: req.mode,
        contact_id: req.contact_id,
        team_id: req.team_id,
        callback: req.callback,
    };
    state
        .store
        .create_monitoring(&system)
        .map_err(ApiError::from)?;
    Ok::<_, ApiError>(Reply::created(system))
}

async fn remove_monitoring(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    authorize(&state, &auth.subject, "monitoringsystem", "remove", Scope::Unscoped).await?;
    let removed = state.store.delete_monitoring(id).map_err(ApiError::from)?;
    deleted(removed, "Monitoring system not found")
}

// Capabilities

async fn list_capabilities(
    _auth: RequireAuth,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let capabilities = state.store.list_capabilities().map_err(ApiError::from)?;
    Ok::<_, ApiError>(Reply::list(capabilities))
}

async fn show_capability(
    _auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let capability = state
        .store
        .get_capability(id)
        .map_err(ApiError::from)?
        .or_not_found("Capability not found")?;
    Ok::<_, ApiError>(Reply::one(capability))
}

async fn add_capability(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CapabilityRequest>,
) -> impl IntoResponse {
    authorize(&state, &auth.subject, "capability", "add", Scope::Unscoped).await?;
    let monitoring = state
        .store
        .get_monitoring(req.monitoring_id)
        .map_err(ApiError::from)?
        .or_not_found("Monitoring system not found")?;
    state
        .store
        .get_metric(&req.metric)
        .map_err(ApiError::from)?
        .or_not_found("Metric not found")?;
    if !state
        .store
        .has_lookup(LookupKind::View, &req.view)
        .map_err(ApiError::from)?
    {
        return Err(ApiError::bad_request(format!("unknown view {}", req.view)));
    }
    if req.thresholds == 0 {
        return Err(ApiError::bad_request("a capability needs at least one threshold"));
    }

    let capability = Capability {
        id: Uuid::new_v4(),
        name: Capability::canonical_name(&monitoring.name, &req.view, &req.metric),
        monitoring_id: monitoring.id,
        metric: req.metric,
        view: req.view,
        thresholds: req.thresholds,
    };
    state
        .store
        .create_capability(&capability)
        .map_err(ApiError::from)?;
    Ok::<_, ApiError>(Reply::created(capability))
}

async fn remove_capability(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    authorize(&state, &auth.subject, "capability", "remove", Scope::Unscoped).await?;
    let removed = state.store.delete_capability(id).map_err(ApiError::from)?;
    deleted(removed, "Capability not found")
}
