mod authenticate;
mod catalog;
mod checks;
pub mod dto;
mod identity;
mod jobs;
mod permissions;
pub mod response;
mod router;
mod system;
mod tree;
pub mod validation;
mod workflow;

pub use router::{AppState, create_router};

use response::ApiError;

use crate::types::{Scope, Subject};

/// Asks the supervisor whether `subject` may perform `(section, action)`.
pub(crate) async fn authorize(
    state: &AppState,
    subject: &Subject,
    section: &str,
    action: &str,
    scope: Scope,
) -> Result<(), ApiError> {
    state
        .supervisor
        .authorize(subject, section, action, scope)
        .await
        .map_err(ApiError::from)
}
