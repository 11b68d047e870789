use std::sync::Arc;

use axum::{Router, extract::State, response::IntoResponse, routing::post};
use tracing::warn;

use crate::auth::RequireAuth;
use crate::server::response::{ApiError, Reply};
use crate::server::{AppState, authorize};
use crate::types::Scope;

pub fn system_router() -> Router<Arc<AppState>> {
    Router::new().route("/system/shutdown", post(shutdown))
}

async fn shutdown(auth: RequireAuth, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    authorize(&state, &auth.subject, "system", "shutdown", Scope::Unscoped).await?;
    warn!(user = %auth.subject.user_id, "shutdown requested over the API");
    state.reaper.shutdown("api request");
    Ok::<_, ApiError>(Reply::empty())
}
