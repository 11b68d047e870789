use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::auth::RequireAuth;
use crate::server::dto::{
    ActivationResponse, CreateUserRequest, NodeRequest, NodeResponse, OncallRequest,
    ServerRequest, TeamRequest, UpdateNodeRequest, UpdateUserRequest,
};
use crate::server::response::{ApiError, Reply, StoreOptionExt, deleted};
use crate::server::validation::{validate_catalog_name, validate_object_name, validate_uid};
use crate::server::{AppState, authorize};
use crate::store::Store;
use crate::supervisor::password_credential;
use crate::types::{
    LookupKind, NodeAttachment, NodeRecord, Oncall, Scope, Server, Team, User,
};

pub fn identity_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/team/", get(list_teams).post(create_team))
        .route(
            "/team/{id}",
            get(show_team).put(update_team).delete(delete_team),
        )
        .route("/user/", get(list_users).post(create_user))
        .route(
            "/user/{id}",
            get(show_user).patch(update_user).delete(delete_user),
        )
        .route("/user/{id}/activation", post(issue_activation))
        .route("/oncall/", get(list_oncalls).post(create_oncall))
        .route(
            "/oncall/{id}",
            get(show_oncall).put(update_oncall).delete(delete_oncall),
        )
        .route("/server/", get(list_servers).post(create_server))
        .route(
            "/server/{id}",
            get(show_server).put(update_server).delete(delete_server),
        )
        .route("/node/", get(list_nodes).post(create_node))
        .route(
            "/node/{id}",
            get(show_node).patch(update_node).delete(delete_node),
        )
}

// Teams

async fn list_teams(_auth: RequireAuth, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let teams = state.store.list_teams().map_err(ApiError::from)?;
    Ok::<_, ApiError>(Reply::list(teams))
}

async fn show_team(
    _auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let team = state
        .store
        .get_team(id)
        .map_err(ApiError::from)?
        .or_not_found("Team not found")?;
    Ok::<_, ApiError>(Reply::one(team))
}

async fn create_team(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Json(req): Json<TeamRequest>,
) -> impl IntoResponse {
    authorize(&state, &auth.subject, "team", "add", Scope::Unscoped).await?;
    validate_object_name(&req.name, "Team")?;

    let team = Team {
        id: Uuid::new_v4(),
        name: req.name,
        ldap_id: req.ldap_id,
        is_system: false,
    };
    state.store.create_team(&team).map_err(ApiError::from)?;
    info!(team = %team.name, "team created");
    Ok::<_, ApiError>(Reply::created(team))
}

async fn update_team(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<TeamRequest>,
) -> impl IntoResponse {
    authorize(&state, &auth.subject, "team", "update", Scope::Unscoped).await?;
    validate_object_name(&req.name, "Team")?;

    let mut team = state
        .store
        .get_team(id)
        .map_err(ApiError::from)?
        .or_not_found("Team not found")?;
    if team.is_system {
        return Err(ApiError::forbidden("the system team cannot be modified"));
    }
    team.name = req.name;
    team.ldap_id = req.ldap_id;
    state.store.update_team(&team).map_err(ApiError::from)?;
    Ok::<_, ApiError>(Reply::one(team))
}

async fn delete_team(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    authorize(&state, &auth.subject, "team", "remove", Scope::Unscoped).await?;
    let removed = state.store.delete_team(id).map_err(ApiError::from)?;
    deleted(removed, "Team not found")
}

// Users

async fn list_users(_auth: RequireAuth, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let users = state.store.list_users().map_err(ApiError::from)?;
    Ok::<_, ApiError>(Reply::list(users))
}

fn live_user(store: &dyn Store, id: Uuid) -> Result<User, ApiError> {
    store
        .get_user(id)
        .map_err(ApiError::from)?
        .filter(|u| !u.is_deleted)
        .or_not_found("User not found")
}

async fn show_user(
    _auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let user = live_user(state.store.as_ref(), id)?;
    Ok::<_, ApiError>(Reply::one(user))
}

async fn create_user(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateUserRequest>,
) -> impl IntoResponse {
    authorize(&state, &auth.subject, "user", "add", Scope::Unscoped).await?;
    validate_uid(&req.uid)?;
    state
        .store
        .get_team(req.team_id)
        .map_err(ApiError::from)?
        .or_not_found("Team not found")?;

    let user = User {
        id: Uuid::new_v4(),
        uid: req.uid,
        first_name: req.first_name,
        last_name: req.last_name,
        employee_number: req.employee_number,
        mail_address: req.mail_address,
        team_id: req.team_id,
        is_active: req.password.is_some(),
        is_system: false,
        is_deleted: false,
        is_admin: req.is_admin,
        created_at: Utc::now(),
    };

    // An empty password is rejected before the account exists.
    let credential = req
        .password
        .as_deref()
        .map(|password| {
            password_credential(
                &state.hasher,
                user.id,
                password,
                state.config.auth.credential_ttl_days,
            )
        })
        .transpose()
        .map_err(ApiError::from)?;

    state.store.create_user(&user).map_err(ApiError::from)?;
    if let Some(credential) = credential {
        state
            .store
            .set_credential(&credential)
            .map_err(ApiError::from)?;
    }

    info!(uid = %user.uid, active = user.is_active, "user created");
    Ok::<_, ApiError>(Reply::created(user))
}

async fn update_user(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateUserRequest>,
) -> impl IntoResponse {
    authorize(&state, &auth.subject, "user", "update", Scope::Unscoped).await?;
    let mut user = live_user(state.store.as_ref(), id)?;
    if user.is_system {
        return Err(ApiError::forbidden("system accounts cannot be modified"));
    }

    if let Some(team_id) = req.team_id {
        state
            .store
            .get_team(team_id)
            .map_err(ApiError::from)?
            .or_not_found("Team not found")?;
        user.team_id = team_id;
    }
    if let Some(first_name) = req.first_name {
        user.first_name = first_name;
    }
    if let Some(last_name) = req.last_name {
        user.last_name = last_name;
    }
    if req.employee_number.is_some() {
        user.employee_number = req.employee_number;
    }
    if let Some(mail_address) = req.mail_address {
        user.mail_address = mail_address;
    }
    if let Some(is_active) = req.is_active {
        user.is_active = is_active;
    }

    state.store.update_user(&user).map_err(ApiError::from)?;
    Ok::<_, ApiError>(Reply::one(user))
}

async fn delete_user(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    authorize(&state, &auth.subject, "user", "remove", Scope::Unscoped).await?;
    let removed = state.store.delete_user(id).map_err(ApiError::from)?;
    if removed {
        state
            .store
            .delete_user_tokens(id)
            .map_err(ApiError::from)?;
    }
    deleted(removed, "User not found")
}

async fn issue_activation(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    authorize(&state, &auth.subject, "user", "activation", Scope::Unscoped).await?;
    let token = state
        .supervisor
        .issue_activation(id)
        .await
        .map_err(ApiError::from)?;
    Ok::<_, ApiError>(Reply::created(ActivationResponse { user_id: id, token }))
}

// Oncall duties

async fn list_oncalls(_auth: RequireAuth, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let oncalls = state.store.list_oncalls().map_err(ApiError::from)?;
    Ok::<_, ApiError>(Reply::list(oncalls))
}

async fn show_oncall(
    _auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let oncall = state
        .store
        .get_oncall(id)
        .map_err(ApiError::from)?
        .or_not_found("Oncall not found")?;
    Ok::<_, ApiError>(Reply::one(oncall))
}

fn validate_oncall(req: &OncallRequest) -> Result<(), ApiError> {
    validate_catalog_name(&req.name, "Oncall")?;
    if req.number.is_empty() || !req.number.chars().all(|c| c.is_ascii_digit()) {
        return Err(ApiError::bad_request("oncall number must be numeric"));
    }
    Ok(())
}

async fn create_oncall(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Json(req): Json<OncallRequest>,
) -> impl IntoResponse {
    authorize(&state, &auth.subject, "oncall", "add", Scope::Unscoped).await?;
    validate_oncall(&req)?;
    let oncall = Oncall {
        id: Uuid::new_v4(),
        name: req.name,
        number: req.number,
    };
    state.store.create_oncall(&oncall).map_err(ApiError::from)?;
    Ok::<_, ApiError>(Reply::created(oncall))
}

async fn update_oncall(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<OncallRequest>,
) -> impl IntoResponse {
    authorize(&state, &auth.subject, "oncall", "update", Scope::Unscoped).await?;
    validate_oncall(&req)?;
    let mut oncall = state
        .store
        .get_oncall(id)
        .map_err(ApiError::from)?
        .or_not_found("Oncall not found")?;
    oncall.name = req.name;
    oncall.number = req.number;
    state.store.update_oncall(&oncall).map_err(ApiError::from)?;
    Ok::<_, ApiError>(Reply::one(oncall))
}

async fn delete_oncall(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    authorize(&state, &auth.subject, "oncall", "remove", Scope::Unscoped).await?;
    let removed = state.store.delete_oncall(id).map_err(ApiError::from)?;
    deleted(removed, "Oncall not found")
}

// Physical servers

async fn list_servers(_auth: RequireAuth, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let servers = state.store.list_servers().map_err(ApiError::from)?;
    Ok::<_, ApiError>(Reply::list(servers))
}

async fn show_server(
    _auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let server = state
        .store
        .get_server(id)
        .map_err(ApiError::from)?
        .filter(|s| !s.is_deleted)
        .or_not_found("Server not found")?;
    Ok::<_, ApiError>(Reply::one(server))
}

fn check_datacenter(store: &dyn Store, datacenter: &str) -> Result<(), ApiError> {
    if store
        .has_lookup(LookupKind::Datacenter, datacenter)
        .map_err(ApiError::from)?
    {
        Ok(())
    } else {
        Err(ApiError::bad_request(format!(
            "unknown datacenter {datacenter}"
        )))
    }
}

async fn create_server(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Json(req): Json<ServerRequest>,
) -> impl IntoResponse {
    authorize(&state, &auth.subject, "server", "add", Scope::Unscoped).await?;
    validate_object_name(&req.name, "Server")?;
    check_datacenter(state.store.as_ref(), &req.datacenter)?;

    let server = Server {
        id: Uuid::new_v4(),
        asset_id: req.asset_id,
        datacenter: req.datacenter,
        location: req.location,
        name: req.name,
        is_online: req.is_online,
        is_deleted: false,
    };
    state.store.create_server(&server).map_err(ApiError::from)?;
    Ok::<_, ApiError>(Reply::created(server))
}

async fn update_server(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<ServerRequest>,
) -> impl IntoResponse {
    authorize(&state, &auth.subject, "server", "update", Scope::Unscoped).await?;
    validate_object_name(&req.name, "Server")?;
    check_datacenter(state.store.as_ref(), &req.datacenter)?;

    let mut server = state
        .store
        .get_server(id)
        .map_err(ApiError::from)?
        .filter(|s| !s.is_deleted)
        .or_not_found("Server not found")?;
    server.asset_id = req.asset_id;
    server.datacenter = req.datacenter;
    server.location = req.location;
    server.name = req.name;
    server.is_online = req.is_online;
    state.store.update_server(&server).map_err(ApiError::from)?;
    Ok::<_, ApiError>(Reply::one(server))
}

async fn delete_server(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    authorize(&state, &auth.subject, "server", "remove", Scope::Unscoped).await?;
    let removed = state.store.delete_server(id).map_err(ApiError::from)?;
    deleted(removed, "Server not found")
}

// Node inventory

/// Reports where a node sits: floating, assigned without own
/// configuration, or assigned and carrying sources.
fn describe_node(store: &dyn Store, node: NodeRecord) -> Result<NodeResponse, ApiError> {
    let Some(row) = store.locate_object(node.id).map_err(ApiError::from)? else {
        return Ok(NodeResponse {
            node,
            attachment: NodeAttachment::Floating,
            repository_id: None,
            bucket_id: None,
        });
    };

    let has_property = store
        .list_properties(node.id)
        .map_err(ApiError::from)?
        .iter()
        .any(|p| !p.inherited);
    let configured = has_property
        || store
            .list_check_configs(row.repository_id)
            .map_err(ApiError::from)?
            .iter()
            .any(|c| c.object_id == node.id);

    Ok(NodeResponse {
        node,
        attachment: if configured {
            NodeAttachment::Attached
        } else {
            NodeAttachment::AttachedUnconfigured
        },
        repository_id: Some(row.repository_id),
        bucket_id: row.bucket_id,
    })
}

fn live_node(store: &dyn Store, id: Uuid) -> Result<NodeRecord, ApiError> {
    store
        .get_node(id)
        .map_err(ApiError::from)?
        .filter(|n| !n.is_deleted)
        .or_not_found("Node not found")
}

async fn list_nodes(auth: RequireAuth, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    authorize(&state, &auth.subject, "node-index", "list", Scope::Unscoped).await?;
    let nodes = state.store.list_nodes().map_err(ApiError::from)?;
    Ok::<_, ApiError>(Reply::list(nodes))
}

async fn show_node(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    authorize(&state, &auth.subject, "node-index", "show", Scope::Unscoped).await?;
    let node = live_node(state.store.as_ref(), id)?;
    let response = describe_node(state.store.as_ref(), node)?;
    Ok::<_, ApiError>(Reply::one(response))
}

async fn create_node(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Json(req): Json<NodeRequest>,
) -> impl IntoResponse {
    authorize(&state, &auth.subject, "node", "add", Scope::Team(req.team_id)).await?;
    validate_object_name(&req.name, "Node")?;
    state
        .store
        .get_team(req.team_id)
        .map_err(ApiError::from)?
        .or_not_found("Team not found")?;
    if let Some(server_id) = req.server_id {
        state
            .store
            .get_server(server_id)
            .map_err(ApiError::from)?
            .filter(|s| !s.is_deleted)
            .or_not_found("Server not found")?;
    }

    let node = NodeRecord {
        id: Uuid::new_v4(),
        asset_id: req.asset_id,
        name: req.name,
        team_id: req.team_id,
        server_id: req.server_id,
        is_online: req.is_online,
        is_deleted: false,
        created_at: Utc::now(),
    };
    state.store.create_node(&node).map_err(ApiError::from)?;
    info!(node = %node.name, "node created");
    Ok::<_, ApiError>(Reply::created(NodeResponse {
        node,
        attachment: NodeAttachment::Floating,
        repository_id: None,
        bucket_id: None,
    }))
}

async fn update_node(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateNodeRequest>,
) -> impl IntoResponse {
    let mut node = live_node(state.store.as_ref(), id)?;
    authorize(&state, &auth.subject, "node", "update", Scope::Team(node.team_id)).await?;

    if let Some(name) = req.name {
        validate_object_name(&name, "Node")?;
        // The tree keeps its own copy of the name.
        if name != node.name && state.store.locate_object(id).map_err(ApiError::from)?.is_some() {
            return Err(ApiError::conflict("an assigned node cannot be renamed"));
        }
        node.name = name;
    }
    if let Some(server_id) = req.server_id {
        state
            .store
            .get_server(server_id)
            .map_err(ApiError::from)?
            .filter(|s| !s.is_deleted)
            .or_not_found("Server not found")?;
        node.server_id = Some(server_id);
    }
    if let Some(is_online) = req.is_online {
        node.is_online = is_online;
    }

    state.store.update_node(&node).map_err(ApiError::from)?;
    let response = describe_node(state.store.as_ref(), node)?;
    Ok::<_, ApiError>(Reply::one(response))
}

async fn delete_node(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let node = live_node(state.store.as_ref(), id)?;
    authorize(&state, &auth.subject, "node", "remove", Scope::Team(node.team_id)).await?;
    if state.store.locate_object(id).map_err(ApiError::from)?.is_some() {
        return Err(ApiError::conflict(
            "node is assigned to a bucket; unassign it first",
        ));
    }
    let removed = state.store.delete_node(id).map_err(ApiError::from)?;
    deleted(removed, "Node not found")
}
