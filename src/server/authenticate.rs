use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    response::IntoResponse,
    routing::{delete, post, put},
};

use crate::auth::{BasicCredentials, RequireAuth};
use crate::server::AppState;
use crate::server::dto::{ActivateRequest, LogoutResponse, PasswordRequest, TokenResponse};
use crate::server::response::{ApiError, Reply};

pub fn authenticate_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/authenticate/", post(login))
        .route("/authenticate/", delete(logout))
        .route("/authenticate/all", delete(logout_all))
        .route("/authenticate/activate/", post(activate))
        .route("/authenticate/password", put(change_password))
}

async fn login(
    State(state): State<Arc<AppState>>,
    credentials: BasicCredentials,
) -> impl IntoResponse {
    let token = state
        .supervisor
        .authenticate(&credentials.uid, &credentials.password)
        .await
        .map_err(ApiError::from)?;

    Ok::<_, ApiError>(Reply::one(TokenResponse::from(token)))
}

async fn activate(
    State(state): State<Arc<AppState>>,
    credentials: BasicCredentials,
    Json(req): Json<ActivateRequest>,
) -> impl IntoResponse {
    let token = state
        .supervisor
        .activate(&credentials.uid, &credentials.password, &req.token)
        .await
        .map_err(ApiError::from)?;

    Ok::<_, ApiError>(Reply::created(TokenResponse::from(token)))
}

async fn logout(auth: RequireAuth, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let revoked = state
        .supervisor
        .logout(&auth.subject, &auth.tag, false)
        .await
        .map_err(ApiError::from)?;

    Ok::<_, ApiError>(Reply::one(LogoutResponse { revoked }))
}

async fn logout_all(auth: RequireAuth, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let revoked = state
        .supervisor
        .logout(&auth.subject, &auth.tag, true)
        .await
        .map_err(ApiError::from)?;

    Ok::<_, ApiError>(Reply::one(LogoutResponse { revoked }))
}

async fn change_password(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Json(req): Json<PasswordRequest>,
) -> impl IntoResponse {
    state
        .supervisor
        .change_password(&auth.subject, &req.password)
        .await
        .map_err(ApiError::from)?;

    Ok::<_, ApiError>(Reply::empty())
}
