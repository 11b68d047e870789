//! The permission model: categories, sections, actions, permissions and
//! the grants handing them out.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::{delete, get},
};
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::auth::RequireAuth;
use crate::server::dto::{
    ActionRequest, CategoryQuery, GrantRequest, MapRequest, NameRequest, PermissionRequest,
    SectionQuery, SectionRequest,
};
use crate::server::response::{ApiError, Reply, StoreOptionExt, deleted};
use crate::server::validation::validate_object_name;
use crate::server::{AppState, authorize};
use crate::store::add_category;
use crate::tree::ObjectType;
use crate::types::{
    BUILTIN_CATEGORIES, Grant, Permission, PermissionMap, RecipientType,
    SYSTEM_CATEGORY, Scope, Section, SectionAction, base_category, grant_category,
    is_grant_category, requires_scope,
};

pub fn permissions_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/category/", get(list_categories).post(create_category))
        .route("/category/{name}", get(show_category).delete(delete_category))
        .route("/section/", get(list_sections).post(create_section))
        .route("/section/{id}", get(show_section).delete(delete_section))
        .route("/action/", get(list_actions).post(create_action))
        .route("/action/{id}", get(show_action).delete(delete_action))
        .route("/permission/", get(list_permissions).post(create_permission))
        .route(
            "/permission/{id}",
            get(show_permission).delete(delete_permission),
        )
        .route("/permission/{id}/map/", get(list_maps).post(map_permission))
        .route("/permission/{id}/map/{map_id}", delete(unmap_permission))
        .route("/grant/", get(list_grants).post(create_grant))
        .route("/grant/{id}", delete(revoke_grant))
}

// Categories

async fn list_categories(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    authorize(&state, &auth.subject, "category", "list", Scope::Unscoped).await?;
    let categories = state.store.list_categories().map_err(ApiError::from)?;
    Ok::<_, ApiError>(Reply::list(categories))
}

async fn show_category(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    authorize(&state, &auth.subject, "category", "show", Scope::Unscoped).await?;
    let category = state
        .store
        .get_category(&name)
        .map_err(ApiError::from)?
        .or_not_found("Category not found")?;
    Ok::<_, ApiError>(Reply::one(category))
}

async fn create_category(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Json(req): Json<NameRequest>,
) -> impl IntoResponse {
    authorize(&state, &auth.subject, "category", "add", Scope::Unscoped).await?;
    validate_object_name(&req.name, "Category")?;
    add_category(state.store.as_ref(), &req.name).map_err(ApiError::from)?;

    let category = state
        .store
        .get_category(&req.name)
        .map_err(ApiError::from)?
        .or_not_found("Category not found")?;
    info!(category = %category.name, "category created");
    Ok::<_, ApiError>(Reply::created(category))
}

/// Removes a category with its `:grant` sibling and the system permission
/// named after it. Sections, permissions and grants go with them.
async fn delete_category(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    authorize(&state, &auth.subject, "category", "remove", Scope::Unscoped).await?;
    if is_grant_category(&name) {
        return Err(ApiError::bad_request(
            "grant categories are removed with their base category",
        ));
    }
    if BUILTIN_CATEGORIES.contains(&name.as_str()) {
        return Err(ApiError::forbidden(format!(
            "built-in category {name} cannot be removed"
        )));
    }

    if !state.store.delete_category(&name).map_err(ApiError::from)? {
        return Err(ApiError::not_found("Category not found"));
    }
    state
        .store
        .delete_category(&grant_category(&name))
        .map_err(ApiError::from)?;
    if let Some(permission) = state
        .store
        .get_permission_by_name(SYSTEM_CATEGORY, &name)
        .map_err(ApiError::from)?
    {
        state
            .store
            .delete_permission(permission.id)
            .map_err(ApiError::from)?;
    }

    info!(category = %name, "category removed");
    Ok::<_, ApiError>(Reply::empty())
}

// Sections

async fn list_sections(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Query(query): Query<CategoryQuery>,
) -> impl IntoResponse {
    authorize(&state, &auth.subject, "section", "list", Scope::Unscoped).await?;
    let sections = state
        .store
        .list_sections(query.category.as_deref())
        .map_err(ApiError::from)?;
    Ok::<_, ApiError>(Reply::list(sections))
}

async fn show_section(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    authorize(&state, &auth.subject, "section", "show", Scope::Unscoped).await?;
    let section = state
        .store
        .get_section(id)
        .map_err(ApiError::from)?
        .or_not_found("Section not found")?;
    Ok::<_, ApiError>(Reply::one(section))
}

async fn create_section(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Json(req): Json<SectionRequest>,
) -> impl IntoResponse {
    authorize(&state, &auth.subject, "section", "add", Scope::Unscoped).await?;
    validate_object_name(&req.name, "Section")?;
    if is_grant_category(&req.category) {
        return Err(ApiError::bad_request(
            "sections cannot live in a grant category",
        ));
    }
    state
        .store
        .get_category(&req.category)
        .map_err(ApiError::from)?
        .or_not_found("Category not found")?;

    let section = Section {
        id: Uuid::new_v4(),
        name: req.name,
        category: req.category,
    };
    state.store.create_section(&section).map_err(ApiError::from)?;
    Ok::<_, ApiError>(Reply::created(section))
}

async fn delete_section(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    authorize(&state, &auth.subject, "section", "remove", Scope::Unscoped).await?;
    let removed = state.store.delete_section(id).map_err(ApiError::from)?;
    deleted(removed, "Section not found")
}

// Actions

async fn list_actions(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Query(query): Query<SectionQuery>,
) -> impl IntoResponse {
    authorize(&state, &auth.subject, "action", "list", Scope::Unscoped).await?;
    let actions = state
        .store
        .list_actions(query.section_id)
        .map_err(ApiError::from)?;
    Ok::<_, ApiError>(Reply::list(actions))
}

async fn show_action(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    authorize(&state, &auth.subject, "action", "show", Scope::Unscoped).await?;
    let action = state
        .store
        .get_action(id)
        .map_err(ApiError::from)?
        .or_not_found("Action not found")?;
    Ok::<_, ApiError>(Reply::one(action))
}

async fn create_action(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Json(req): Json<ActionRequest>,
) -> impl IntoResponse {
    authorize(&state, &auth.subject, "action", "add", Scope::Unscoped).await?;
    validate_object_name(&req.name, "Action")?;
    let section = state
        .store
        .get_section(req.section_id)
        .map_err(ApiError::from)?
        .or_not_found("Section not found")?;

    let action = SectionAction {
        id: Uuid::new_v4(),
        name: req.name,
        section_id: section.id,
        section_name: section.name,
        category: section.category,
    };
    state.store.create_action(&action).map_err(ApiError::from)?;
    Ok::<_, ApiError>(Reply::created(action))
}

async fn delete_action(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    authorize(&state, &auth.subject, "action", "remove", Scope::Unscoped).await?;
    let removed = state.store.delete_action(id).map_err(ApiError::from)?;
    deleted(removed, "Action not found")
}

// Permissions

async fn list_permissions(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Query(query): Query<CategoryQuery>,
) -> impl IntoResponse {
    authorize(&state, &auth.subject, "permission", "list", Scope::Unscoped).await?;
    let permissions = state
        .store
        .list_permissions(query.category.as_deref())
        .map_err(ApiError::from)?;
    Ok::<_, ApiError>(Reply::list(permissions))
}

fn find_permission(state: &AppState, id: Uuid) -> Result<Permission, ApiError> {
    state
        .store
        .get_permission(id)
        .map_err(ApiError::from)?
        .or_not_found("Permission not found")
}

async fn show_permission(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    authorize(&state, &auth.subject, "permission", "show", Scope::Unscoped).await?;
    let permission = find_permission(&state, id)?;
    Ok::<_, ApiError>(Reply::one(permission))
}

async fn create_permission(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Json(req): Json<PermissionRequest>,
) -> impl IntoResponse {
    authorize(&state, &auth.subject, "permission", "add", Scope::Unscoped).await?;
    validate_object_name(&req.name, "Permission")?;
    if req.category == SYSTEM_CATEGORY {
        return Err(ApiError::forbidden(
            "system permissions are managed through categories",
        ));
    }
    state
        .store
        .get_category(&req.category)
        .map_err(ApiError::from)?
        .or_not_found("Category not found")?;

    let permission = Permission {
        id: Uuid::new_v4(),
        name: req.name,
        category: req.category,
    };
    state
        .store
        .create_permission(&permission)
        .map_err(ApiError::from)?;
    Ok::<_, ApiError>(Reply::created(permission))
}

async fn delete_permission(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    authorize(&state, &auth.subject, "permission", "remove", Scope::Unscoped).await?;
    let permission = find_permission(&state, id)?;
    if permission.category == SYSTEM_CATEGORY {
        return Err(ApiError::forbidden(
            "system permissions are managed through categories",
        ));
    }
    let removed = state.store.delete_permission(id).map_err(ApiError::from)?;
    deleted(removed, "Permission not found")
}

async fn list_maps(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    authorize(&state, &auth.subject, "permission", "show", Scope::Unscoped).await?;
    find_permission(&state, id)?;
    let maps = state
        .store
        .list_permission_maps(id)
        .map_err(ApiError::from)?;
    Ok::<_, ApiError>(Reply::list(maps))
}

/// Maps a permission onto a section, or onto one action of it. Both must
/// belong to the permission's category.
async fn map_permission(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<MapRequest>,
) -> impl IntoResponse {
    authorize(&state, &auth.subject, "permission", "map", Scope::Unscoped).await?;
    let permission = find_permission(&state, id)?;
    let section = state
        .store
        .get_section(req.section_id)
        .map_err(ApiError::from)?
        .or_not_found("Section not found")?;
    if section.category != permission.category {
        return Err(ApiError::bad_request(format!(
            "section {} belongs to category {}, not {}",
            section.name, section.category, permission.category
        )));
    }

    let action = match req.action_id {
        Some(action_id) => {
            let action = state
                .store
                .get_action(action_id)
                .map_err(ApiError::from)?
                .or_not_found("Action not found")?;
            if action.section_id != section.id {
                return Err(ApiError::bad_request(format!(
                    "action {} is not part of section {}",
                    action.name, section.name
                )));
            }
            Some(action)
        }
        None => None,
    };

    let map = PermissionMap {
        id: Uuid::new_v4(),
        permission_id: permission.id,
        category: permission.category,
        section_id: section.id,
        section_name: section.name,
        action_id: action.as_ref().map(|a| a.id),
        action_name: action.map(|a| a.name),
    };
    state
        .store
        .create_permission_map(&map)
        .map_err(ApiError::from)?;
    Ok::<_, ApiError>(Reply::created(map))
}

async fn unmap_permission(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path((id, map_id)): Path<(Uuid, Uuid)>,
) -> impl IntoResponse {
    authorize(&state, &auth.subject, "permission", "unmap", Scope::Unscoped).await?;
    let owned = state
        .store
        .list_permission_maps(id)
        .map_err(ApiError::from)?
        .iter()
        .any(|m| m.id == map_id);
    if !owned {
        return Err(ApiError::not_found("Permission mapping not found"));
    }
    let removed = state
        .store
        .delete_permission_map(map_id)
        .map_err(ApiError::from)?;
    deleted(removed, "Permission mapping not found")
}

// Grants

async fn list_grants(auth: RequireAuth, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    authorize(&state, &auth.subject, "right", "list", Scope::Unscoped).await?;
    let grants = state.store.list_grants().map_err(ApiError::from)?;
    Ok::<_, ApiError>(Reply::list(grants))
}

/// Scope a grant of `category` is bound to. Scoped categories must name
/// their object; the others must not.
fn grant_scope(
    state: &AppState,
    category: &str,
    object_type: Option<&str>,
    object_id: Option<Uuid>,
) -> Result<Scope, ApiError> {
    if !requires_scope(category) {
        if object_type.is_some() || object_id.is_some() {
            return Err(ApiError::bad_request(format!(
                "grants in category {category} are global"
            )));
        }
        return Ok(Scope::Unscoped);
    }

    let (Some(object_type), Some(object_id)) = (object_type, object_id) else {
        return Err(ApiError::bad_request(format!(
            "grants in category {category} must name an object"
        )));
    };

    match (base_category(category), object_type) {
        ("repository", "repository") => {
            state
                .store
                .get_repository(object_id)
                .map_err(ApiError::from)?
                .filter(|r| !r.is_deleted)
                .or_not_found("Repository not found")?;
            Ok(Scope::Repository {
                repository_id: object_id,
                bucket_id: None,
            })
        }
        ("repository", "bucket") => {
            let row = state
                .store
                .locate_object(object_id)
                .map_err(ApiError::from)?
                .filter(|row| row.object_type == ObjectType::Bucket)
                .or_not_found("Bucket not found")?;
            Ok(Scope::Repository {
                repository_id: row.repository_id,
                bucket_id: Some(row.id),
            })
        }
        ("team", "team") => {
            state
                .store
                .get_team(object_id)
                .map_err(ApiError::from)?
                .or_not_found("Team not found")?;
            Ok(Scope::Team(object_id))
        }
        ("monitoring", "monitoring") => {
            state
                .store
                .get_monitoring(object_id)
                .map_err(ApiError::from)?
                .or_not_found("Monitoring system not found")?;
            Ok(Scope::Monitoring(object_id))
        }
        (_, other) => Err(ApiError::bad_request(format!(
            "object type {other} cannot scope a grant in category {category}"
        ))),
    }
}

fn check_recipient(
    state: &AppState,
    recipient_type: RecipientType,
    recipient_id: Uuid,
) -> Result<(), ApiError> {
    match recipient_type {
        RecipientType::Team => {
            state
                .store
                .get_team(recipient_id)
                .map_err(ApiError::from)?
                .or_not_found("Team not found")?;
        }
        RecipientType::User | RecipientType::Admin => {
            let user = state
                .store
                .get_user(recipient_id)
                .map_err(ApiError::from)?
                .filter(|u| !u.is_deleted)
                .or_not_found("User not found")?;
            if recipient_type == RecipientType::Admin && !user.is_admin {
                return Err(ApiError::bad_request(format!(
                    "{} is not an admin account",
                    user.uid
                )));
            }
        }
    }
    Ok(())
}

async fn create_grant(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Json(req): Json<GrantRequest>,
) -> impl IntoResponse {
    authorize(&state, &auth.subject, "right", "grant", Scope::Unscoped).await?;
    let recipient_type: RecipientType = req.recipient_type.parse().map_err(ApiError::from)?;
    check_recipient(&state, recipient_type, req.recipient_id)?;

    let permission = find_permission(&state, req.permission_id)?;
    let scope = grant_scope(
        &state,
        &permission.category,
        req.object_type.as_deref(),
        req.object_id,
    )?;
    state
        .supervisor
        .authorize_grant(&auth.subject, &permission, scope)
        .await
        .map_err(ApiError::from)?;

    let grant = Grant {
        id: Uuid::new_v4(),
        recipient_type,
        recipient_id: req.recipient_id,
        permission_id: permission.id,
        category: permission.category,
        object_type: req.object_type,
        object_id: req.object_id,
        created_at: Utc::now(),
        created_by: Some(auth.subject.user_id),
    };
    state.store.create_grant(&grant).map_err(ApiError::from)?;
    info!(
        grant = %grant.id,
        permission = %permission.name,
        recipient = %grant.recipient_id,
        by = %auth.subject.uid,
        "permission granted"
    );
    Ok::<_, ApiError>(Reply::created(grant))
}

async fn revoke_grant(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    authorize(&state, &auth.subject, "right", "revoke", Scope::Unscoped).await?;
    let grant = state
        .store
        .get_grant(id)
        .map_err(ApiError::from)?
        .or_not_found("Grant not found")?;
    let permission = find_permission(&state, grant.permission_id)?;
    let scope = grant_scope(
        &state,
        &grant.category,
        grant.object_type.as_deref(),
        grant.object_id,
    )?;
    state
        .supervisor
        .authorize_grant(&auth.subject, &permission, scope)
        .await
        .map_err(ApiError::from)?;

    let removed = state.store.delete_grant(id).map_err(ApiError::from)?;
    info!(grant = %id, by = %auth.subject.uid, "permission revoked");
    deleted(removed, "Grant not found")
}
