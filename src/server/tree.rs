//! Repository lifecycle and every request that goes through a tree-keeper.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::RequireAuth;
use crate::guidepost::Routed;
use crate::server::dto::{
    AssignNodeRequest, BucketRequest, ContainerRequest, MemberRequest, ObjectResponse,
    PropertyInput, PropertyRequest, RepositoryRequest, RepositoryResponse,
};
use crate::server::response::{ApiError, Reply, StoreOptionExt};
use crate::server::validation::validate_object_name;
use crate::server::{AppState, authorize};
use crate::store::ObjectRow;
use crate::tree::{NodeSpec, ObjectType, PropertySpec, PropertyValue, TreeOperation};
use crate::treekeeper::{KeeperReply, KeeperRequest};
use crate::types::{RepositoryRecord, Scope, Subject};

pub fn tree_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/repository/", get(list_repositories).post(create_repository))
        .route(
            "/repository/{repository}",
            get(show_repository).delete(destroy_repository),
        )
        .route("/repository/{repository}/tree", get(repository_tree))
        .route("/repository/{repository}/rebuild", post(rebuild))
        .route("/repository/{repository}/repair", post(repair))
        .route("/repository/{repository}/freeze", post(freeze))
        .route("/repository/{repository}/unfreeze", post(unfreeze))
        .route(
            "/repository/{repository}/bucket/",
            get(list_buckets).post(create_bucket),
        )
        .route(
            "/repository/{repository}/bucket/{bucket}",
            get(show_bucket).delete(destroy_bucket),
        )
        .route("/repository/{repository}/bucket/{bucket}/tree", get(bucket_tree))
        .route(
            "/repository/{repository}/bucket/{bucket}/group/",
            get(list_groups).post(create_group),
        )
        .route(
            "/repository/{repository}/bucket/{bucket}/group/{object}",
            get(show_group).delete(destroy_group),
        )
        .route(
            "/repository/{repository}/bucket/{bucket}/group/{object}/member/",
            post(add_group_member),
        )
        .route(
            "/repository/{repository}/bucket/{bucket}/group/{object}/tree",
            get(group_tree),
        )
        .route(
            "/repository/{repository}/bucket/{bucket}/cluster/",
            get(list_clusters).post(create_cluster),
        )
        .route(
            "/repository/{repository}/bucket/{bucket}/cluster/{object}",
            get(show_cluster).delete(destroy_cluster),
        )
        .route(
            "/repository/{repository}/bucket/{bucket}/cluster/{object}/member/",
            post(add_cluster_member),
        )
        .route(
            "/repository/{repository}/bucket/{bucket}/cluster/{object}/tree",
            get(cluster_tree),
        )
        .route(
            "/repository/{repository}/bucket/{bucket}/node/",
            get(list_assigned_nodes).post(assign_node),
        )
        .route(
            "/repository/{repository}/bucket/{bucket}/node/{object}",
            get(show_assigned_node).delete(unassign_node),
        )
        .route(
            "/repository/{repository}/bucket/{bucket}/node/{object}/tree",
            get(node_tree),
        )
        .merge(property_routes("/repository/{repository}"))
        .merge(property_routes("/repository/{repository}/bucket/{bucket}"))
        .merge(property_routes(
            "/repository/{repository}/bucket/{bucket}/group/{object}",
        ))
        .merge(property_routes(
            "/repository/{repository}/bucket/{bucket}/cluster/{object}",
        ))
        .merge(property_routes(
            "/repository/{repository}/bucket/{bucket}/node/{object}",
        ))
}

fn property_routes(base: &str) -> Router<Arc<AppState>> {
    Router::new()
        .route(&format!("{base}/property/{{ptype}}/"), post(add_property))
        .route(
            &format!("{base}/property/{{ptype}}/{{source}}"),
            put(update_property).delete(delete_property),
        )
}

#[derive(Debug, Deserialize)]
struct BucketPath {
    repository: Uuid,
    bucket: Uuid,
}

#[derive(Debug, Deserialize)]
struct ObjectPath {
    repository: Uuid,
    bucket: Uuid,
    object: Uuid,
}

/// Any property route. The target is the innermost object named.
#[derive(Debug, Deserialize)]
struct PropertyPath {
    repository: Uuid,
    #[serde(default)]
    bucket: Option<Uuid>,
    #[serde(default)]
    object: Option<Uuid>,
    ptype: String,
    #[serde(default)]
    source: Option<Uuid>,
}

impl PropertyPath {
    fn target(&self) -> Uuid {
        self.object.or(self.bucket).unwrap_or(self.repository)
    }
}

pub(super) fn live_repository(state: &AppState, id: Uuid) -> Result<RepositoryRecord, ApiError> {
    state
        .store
        .get_repository(id)
        .map_err(ApiError::from)?
        .filter(|r| !r.is_deleted)
        .or_not_found("Repository not found")
}

pub(super) fn repository_scope(repository_id: Uuid) -> Scope {
    Scope::Repository {
        repository_id,
        bucket_id: None,
    }
}

/// Loads an object and checks it sits where the path says it does.
fn object_at(
    state: &AppState,
    repository_id: Uuid,
    bucket_id: Option<Uuid>,
    object_id: Uuid,
    object_type: ObjectType,
) -> Result<ObjectRow, ApiError> {
    let row = state
        .store
        .locate_object(object_id)
        .map_err(ApiError::from)?
        .filter(|row| row.repository_id == repository_id && row.object_type == object_type)
        .filter(|row| bucket_id.is_none() || row.bucket_id == bucket_id)
        .ok_or_else(|| ApiError::not_found(format!("{object_type} {object_id} not found")))?;
    Ok(row)
}

fn describe(state: &AppState, object: ObjectRow) -> Result<ObjectResponse, ApiError> {
    let properties = state
        .store
        .list_properties(object.id)
        .map_err(ApiError::from)?;
    Ok(ObjectResponse { object, properties })
}

/// Renders a keeper reply. Failed mutations still name their job.
fn keeper_reply(routed: Routed) -> Result<Response, ApiError> {
    let job_id = routed.job_id;
    let reply = routed.result.map_err(|e| ApiError::from(e).with_job(job_id))?;
    Ok(match (reply, job_id) {
        (KeeperReply::Applied(actions), Some(job)) => Reply::job(job, actions).into_response(),
        (KeeperReply::Applied(actions), None) => Reply::list(actions).into_response(),
        (KeeperReply::Tree(view), _) => Reply::one(view).into_response(),
        (KeeperReply::Done, Some(job)) => Reply::<()>::job(job, Vec::new()).into_response(),
        (KeeperReply::Done, None) => Reply::empty().into_response(),
    })
}

async fn forward(
    state: &AppState,
    subject: &Subject,
    repository_id: Uuid,
    request: KeeperRequest,
) -> Result<Response, ApiError> {
    let routed = state
        .guidepost
        .route(subject, repository_id, request)
        .await
        .map_err(ApiError::from)?;
    keeper_reply(routed)
}

/// Authorizes a tree operation against the scope it resolves to, then
/// hands it to the repository's keeper.
pub(super) async fn mutate(
    state: &AppState,
    subject: &Subject,
    repository_id: Uuid,
    section: &str,
    action: &str,
    op: TreeOperation,
) -> Result<Response, ApiError> {
    let scope = state
        .guidepost
        .resolve(repository_id, &op)
        .map_err(ApiError::from)?;
    authorize(state, subject, section, action, scope).await?;
    forward(state, subject, repository_id, KeeperRequest::Mutate(op)).await
}

async fn show_subtree(
    state: &AppState,
    subject: &Subject,
    repository_id: Uuid,
    section: &str,
    object_id: Option<Uuid>,
) -> Result<Response, ApiError> {
    let scope = match object_id {
        Some(id) => state
            .guidepost
            .scope_of(repository_id, id)
            .map_err(ApiError::from)?,
        None => repository_scope(repository_id),
    };
    authorize(state, subject, section, "tree", scope).await?;
    forward(state, subject, repository_id, KeeperRequest::Show(object_id)).await
}

// Repositories

async fn list_repositories(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    authorize(&state, &auth.subject, "repository-index", "list", Scope::Unscoped).await?;
    let keepers = state.forest.keepers().await;
    let repositories: Vec<RepositoryResponse> = state
        .store
        .list_repositories()
        .map_err(ApiError::from)?
        .into_iter()
        .map(|repository| RepositoryResponse {
            keeper: keepers
                .iter()
                .find(|k| k.repository_id == repository.id)
                .map(|k| k.state()),
            repository,
        })
        .collect();
    Ok::<_, ApiError>(Reply::list(repositories))
}

async fn show_repository(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(repository_id): Path<Uuid>,
) -> impl IntoResponse {
    let repository = live_repository(&state, repository_id)?;
    authorize(
        &state,
        &auth.subject,
        "repository",
        "show",
        repository_scope(repository_id),
    )
    .await?;
    let keeper = state
        .forest
        .keeper(repository_id)
        .await
        .ok()
        .map(|k| k.state());
    Ok::<_, ApiError>(Reply::one(RepositoryResponse { repository, keeper }))
}

async fn create_repository(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Json(req): Json<RepositoryRequest>,
) -> impl IntoResponse {
    authorize(
        &state,
        &auth.subject,
        "repository-lifecycle",
        "add",
        Scope::Team(req.team_id),
    )
    .await?;
    if state.config.observer {
        return Err(ApiError::forbidden("server is in observer mode"));
    }
    validate_object_name(&req.name, "Repository")?;
    state
        .store
        .get_team(req.team_id)
        .map_err(ApiError::from)?
        .or_not_found("Team not found")?;

    let repository = state
        .forest
        .create_repository(&req.name, req.team_id)
        .await
        .map_err(ApiError::from)?;
    let keeper = state
        .forest
        .keeper(repository.id)
        .await
        .ok()
        .map(|k| k.state());
    Ok::<_, ApiError>(Reply::created(RepositoryResponse { repository, keeper }))
}

async fn destroy_repository(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(repository_id): Path<Uuid>,
) -> impl IntoResponse {
    let repository = live_repository(&state, repository_id)?;
    authorize(
        &state,
        &auth.subject,
        "repository-lifecycle",
        "remove",
        Scope::Team(repository.team_id),
    )
    .await?;
    if state.config.observer {
        return Err(ApiError::forbidden("server is in observer mode"));
    }
    state
        .forest
        .destroy_repository(repository_id)
        .await
        .map_err(ApiError::from)?;
    Ok::<_, ApiError>(Reply::empty())
}

async fn repository_tree(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(repository_id): Path<Uuid>,
) -> impl IntoResponse {
    show_subtree(&state, &auth.subject, repository_id, "repository", None).await
}

async fn lifecycle(
    state: &AppState,
    subject: &Subject,
    repository_id: Uuid,
    action: &str,
    request: KeeperRequest,
) -> Result<Response, ApiError> {
    authorize(
        state,
        subject,
        "repository",
        action,
        repository_scope(repository_id),
    )
    .await?;
    forward(state, subject, repository_id, request).await
}

async fn rebuild(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(repository_id): Path<Uuid>,
) -> impl IntoResponse {
    lifecycle(&state, &auth.subject, repository_id, "rebuild", KeeperRequest::Rebuild).await
}

async fn repair(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(repository_id): Path<Uuid>,
) -> impl IntoResponse {
    lifecycle(&state, &auth.subject, repository_id, "repair", KeeperRequest::Repair).await
}

async fn freeze(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(repository_id): Path<Uuid>,
) -> impl IntoResponse {
    lifecycle(&state, &auth.subject, repository_id, "freeze", KeeperRequest::Freeze(true)).await
}

async fn unfreeze(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(repository_id): Path<Uuid>,
) -> impl IntoResponse {
    lifecycle(&state, &auth.subject, repository_id, "freeze", KeeperRequest::Freeze(false)).await
}

// Buckets

async fn list_buckets(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(repository_id): Path<Uuid>,
) -> impl IntoResponse {
    live_repository(&state, repository_id)?;
    authorize(
        &state,
        &auth.subject,
        "bucket",
        "list",
        repository_scope(repository_id),
    )
    .await?;
    let buckets = state
        .store
        .list_objects(repository_id, Some(ObjectType::Bucket))
        .map_err(ApiError::from)?;
    Ok::<_, ApiError>(Reply::list(buckets))
}

async fn show_bucket(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(path): Path<BucketPath>,
) -> impl IntoResponse {
    let row = object_at(&state, path.repository, None, path.bucket, ObjectType::Bucket)?;
    authorize(
        &state,
        &auth.subject,
        "bucket",
        "show",
        Scope::Repository {
            repository_id: path.repository,
            bucket_id: Some(path.bucket),
        },
    )
    .await?;
    Ok::<_, ApiError>(Reply::one(describe(&state, row)?))
}

async fn create_bucket(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(repository_id): Path<Uuid>,
    Json(req): Json<BucketRequest>,
) -> impl IntoResponse {
    let repository = live_repository(&state, repository_id)?;
    validate_object_name(&req.name, "Bucket")?;
    let op = TreeOperation::CreateBucket {
        id: Uuid::new_v4(),
        name: req.name,
        environment: req.environment,
        team_id: req.team_id.unwrap_or(repository.team_id),
    };
    mutate(&state, &auth.subject, repository_id, "bucket", "add", op).await
}

async fn destroy_bucket(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(path): Path<BucketPath>,
) -> impl IntoResponse {
    object_at(&state, path.repository, None, path.bucket, ObjectType::Bucket)?;
    let op = TreeOperation::DestroyBucket { id: path.bucket };
    mutate(&state, &auth.subject, path.repository, "bucket", "remove", op).await
}

async fn bucket_tree(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(path): Path<BucketPath>,
) -> impl IntoResponse {
    show_subtree(
        &state,
        &auth.subject,
        path.repository,
        "bucket",
        Some(path.bucket),
    )
    .await
}

// Groups and clusters

async fn list_in_bucket(
    state: &AppState,
    subject: &Subject,
    path: &BucketPath,
    object_type: ObjectType,
) -> Result<Reply<ObjectRow>, ApiError> {
    object_at(state, path.repository, None, path.bucket, ObjectType::Bucket)?;
    authorize(
        state,
        subject,
        section_for(object_type),
        "list",
        Scope::Repository {
            repository_id: path.repository,
            bucket_id: Some(path.bucket),
        },
    )
    .await?;
    let rows: Vec<ObjectRow> = state
        .store
        .list_objects(path.repository, Some(object_type))
        .map_err(ApiError::from)?
        .into_iter()
        .filter(|row| row.bucket_id == Some(path.bucket))
        .collect();
    Ok(Reply::list(rows))
}

fn section_for(object_type: ObjectType) -> &'static str {
    match object_type {
        ObjectType::Node => "node-config",
        other => other.as_str(),
    }
}

async fn show_in_bucket(
    state: &AppState,
    subject: &Subject,
    path: &ObjectPath,
    object_type: ObjectType,
) -> Result<Reply<ObjectResponse>, ApiError> {
    let row = object_at(
        state,
        path.repository,
        Some(path.bucket),
        path.object,
        object_type,
    )?;
    authorize(
        state,
        subject,
        section_for(object_type),
        "show",
        Scope::Repository {
            repository_id: path.repository,
            bucket_id: Some(path.bucket),
        },
    )
    .await?;
    Ok(Reply::one(describe(state, row)?))
}

async fn list_groups(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(path): Path<BucketPath>,
) -> impl IntoResponse {
    list_in_bucket(&state, &auth.subject, &path, ObjectType::Group).await
}

async fn show_group(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(path): Path<ObjectPath>,
) -> impl IntoResponse {
    show_in_bucket(&state, &auth.subject, &path, ObjectType::Group).await
}

async fn create_group(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(path): Path<BucketPath>,
    Json(req): Json<ContainerRequest>,
) -> impl IntoResponse {
    let repository = live_repository(&state, path.repository)?;
    validate_object_name(&req.name, "Group")?;
    let op = TreeOperation::CreateGroup {
        id: Uuid::new_v4(),
        bucket_id: path.bucket,
        name: req.name,
        team_id: req.team_id.unwrap_or(repository.team_id),
    };
    mutate(&state, &auth.subject, path.repository, "group", "add", op).await
}

async fn destroy_group(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(path): Path<ObjectPath>,
) -> impl IntoResponse {
    object_at(
        &state,
        path.repository,
        Some(path.bucket),
        path.object,
        ObjectType::Group,
    )?;
    let op = TreeOperation::DestroyGroup { id: path.object };
    mutate(&state, &auth.subject, path.repository, "group", "remove", op).await
}

async fn add_group_member(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(path): Path<ObjectPath>,
    Json(req): Json<MemberRequest>,
) -> impl IntoResponse {
    let op = TreeOperation::AddMember {
        parent: path.object,
        child: req.child_id,
    };
    mutate(&state, &auth.subject, path.repository, "group", "member", op).await
}

async fn group_tree(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(path): Path<ObjectPath>,
) -> impl IntoResponse {
    show_subtree(
        &state,
        &auth.subject,
        path.repository,
        "group",
        Some(path.object),
    )
    .await
}

async fn list_clusters(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(path): Path<BucketPath>,
) -> impl IntoResponse {
    list_in_bucket(&state, &auth.subject, &path, ObjectType::Cluster).await
}

async fn show_cluster(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(path): Path<ObjectPath>,
) -> impl IntoResponse {
    show_in_bucket(&state, &auth.subject, &path, ObjectType::Cluster).await
}

async fn create_cluster(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(path): Path<BucketPath>,
    Json(req): Json<ContainerRequest>,
) -> impl IntoResponse {
    let repository = live_repository(&state, path.repository)?;
    validate_object_name(&req.name, "Cluster")?;
    let op = TreeOperation::CreateCluster {
        id: Uuid::new_v4(),
        bucket_id: path.bucket,
        name: req.name,
        team_id: req.team_id.unwrap_or(repository.team_id),
    };
    mutate(&state, &auth.subject, path.repository, "cluster", "add", op).await
}

async fn destroy_cluster(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(path): Path<ObjectPath>,
) -> impl IntoResponse {
    object_at(
        &state,
        path.repository,
        Some(path.bucket),
        path.object,
        ObjectType::Cluster,
    )?;
    let op = TreeOperation::DestroyCluster { id: path.object };
    mutate(&state, &auth.subject, path.repository, "cluster", "remove", op).await
}

async fn add_cluster_member(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(path): Path<ObjectPath>,
    Json(req): Json<MemberRequest>,
) -> impl IntoResponse {
    let op = TreeOperation::AddMember {
        parent: path.object,
        child: req.child_id,
    };
    mutate(&state, &auth.subject, path.repository, "cluster", "member", op).await
}

async fn cluster_tree(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(path): Path<ObjectPath>,
) -> impl IntoResponse {
    show_subtree(
        &state,
        &auth.subject,
        path.repository,
        "cluster",
        Some(path.object),
    )
    .await
}

// Node assignment

async fn list_assigned_nodes(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(path): Path<BucketPath>,
) -> impl IntoResponse {
    list_in_bucket(&state, &auth.subject, &path, ObjectType::Node).await
}

async fn show_assigned_node(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(path): Path<ObjectPath>,
) -> impl IntoResponse {
    show_in_bucket(&state, &auth.subject, &path, ObjectType::Node).await
}

async fn assign_node(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(path): Path<BucketPath>,
    Json(req): Json<AssignNodeRequest>,
) -> impl IntoResponse {
    let node = state
        .store
        .get_node(req.node_id)
        .map_err(ApiError::from)?
        .filter(|n| !n.is_deleted)
        .or_not_found("Node not found")?;
    if state
        .store
        .locate_object(node.id)
        .map_err(ApiError::from)?
        .is_some()
    {
        return Err(ApiError::conflict(format!(
            "node {} is already assigned",
            node.name
        )));
    }

    let op = TreeOperation::AssignNode {
        bucket_id: path.bucket,
        node: NodeSpec {
            id: node.id,
            name: node.name,
            team_id: node.team_id,
            asset_id: node.asset_id,
            server_id: node.server_id,
            is_online: node.is_online,
        },
    };
    mutate(&state, &auth.subject, path.repository, "node-config", "assign", op).await
}

async fn unassign_node(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(path): Path<ObjectPath>,
) -> impl IntoResponse {
    object_at(
        &state,
        path.repository,
        Some(path.bucket),
        path.object,
        ObjectType::Node,
    )?;
    let op = TreeOperation::UnassignNode { id: path.object };
    mutate(
        &state,
        &auth.subject,
        path.repository,
        "node-config",
        "unassign",
        op,
    )
    .await
}

async fn node_tree(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(path): Path<ObjectPath>,
) -> impl IntoResponse {
    show_subtree(
        &state,
        &auth.subject,
        path.repository,
        "node-config",
        Some(path.object),
    )
    .await
}

// Properties

/// Turns a client property body into the tree's form, resolving custom
/// property ids, service owners and oncall details.
fn property_spec(
    state: &AppState,
    repository: &RepositoryRecord,
    ptype: &str,
    req: PropertyRequest,
) -> Result<PropertySpec, ApiError> {
    if req.value.type_name() != ptype {
        return Err(ApiError::bad_request(format!(
            "property type {} does not match route type {ptype}",
            req.value.type_name()
        )));
    }

    let value = match req.value {
        PropertyInput::System { name, value } => PropertyValue::System { name, value },
        PropertyInput::Custom { name, value } => {
            validate_object_name(&name, "Custom property")?;
            let custom_id = state
                .store
                .ensure_custom_property(repository.id, &name)
                .map_err(ApiError::from)?;
            PropertyValue::Custom {
                custom_id,
                name,
                value,
            }
        }
        PropertyInput::Service {
            name,
            team_id,
            attributes,
        } => PropertyValue::Service {
            name,
            team_id: team_id.unwrap_or(repository.team_id),
            attributes,
        },
        PropertyInput::Oncall { oncall_id } => {
            let oncall = state
                .store
                .get_oncall(oncall_id)
                .map_err(ApiError::from)?
                .or_not_found("Oncall not found")?;
            PropertyValue::Oncall {
                oncall_id,
                name: oncall.name,
                number: oncall.number,
            }
        }
    };

    Ok(PropertySpec {
        instance_id: None,
        view: req.view,
        inheritance: req.inheritance,
        children_only: req.children_only,
        value,
    })
}

fn property_source(path: &PropertyPath) -> Result<Uuid, ApiError> {
    path.source
        .ok_or_else(|| ApiError::bad_request("property source id is missing"))
}

async fn add_property(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(path): Path<PropertyPath>,
    Json(req): Json<PropertyRequest>,
) -> impl IntoResponse {
    let repository = live_repository(&state, path.repository)?;
    let spec = property_spec(&state, &repository, &path.ptype, req)?;
    let op = TreeOperation::AddProperty {
        object: path.target(),
        spec,
    };
    mutate(&state, &auth.subject, path.repository, "property", "add", op).await
}

async fn update_property(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(path): Path<PropertyPath>,
    Json(req): Json<PropertyRequest>,
) -> impl IntoResponse {
    let repository = live_repository(&state, path.repository)?;
    let source_instance_id = property_source(&path)?;
    let spec = property_spec(&state, &repository, &path.ptype, req)?;
    let op = TreeOperation::UpdateProperty {
        object: path.target(),
        source_instance_id,
        spec,
    };
    mutate(&state, &auth.subject, path.repository, "property", "update", op).await
}

async fn delete_property(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(path): Path<PropertyPath>,
) -> impl IntoResponse {
    live_repository(&state, path.repository)?;
    let source_instance_id = property_source(&path)?;
    let op = TreeOperation::DeleteProperty {
        object: path.target(),
        source_instance_id,
    };
    mutate(&state, &auth.subject, path.repository, "property", "remove", op).await
}
