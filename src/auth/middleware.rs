use std::sync::Arc;

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
    response::{IntoResponse, Response},
};

use super::helpers::{HeaderError, extract_basic_credentials, extract_bearer_token};
use crate::error::Error;
use crate::server::AppState;
use crate::server::response::ApiError;
use crate::types::Subject;

/// Extractor that requires a valid bearer token.
pub struct RequireAuth {
    pub subject: Subject,
    pub tag: String,
}

/// Extractor for the Basic `uid:password` pair of the login endpoints.
pub struct BasicCredentials {
    pub uid: String,
    pub password: String,
}

#[derive(Debug)]
pub enum AuthError {
    MissingAuth,
    InvalidScheme,
    Malformed,
    Rejected(String),
    Unavailable,
    InternalError,
}

impl From<HeaderError> for AuthError {
    fn from(err: HeaderError) -> Self {
        match err {
            HeaderError::Missing => AuthError::MissingAuth,
            HeaderError::InvalidScheme => AuthError::InvalidScheme,
            HeaderError::Malformed => AuthError::Malformed,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let error = match self {
            AuthError::MissingAuth => ApiError::unauthorized("Authentication required"),
            AuthError::InvalidScheme => ApiError::unauthorized("Invalid authorization scheme"),
            AuthError::Malformed => ApiError::unauthorized("Malformed authorization header"),
            AuthError::Rejected(message) => ApiError::unauthorized(message),
            AuthError::Unavailable => ApiError::from(Error::Shutdown),
            AuthError::InternalError => ApiError::internal("Internal server error"),
        };
        error.into_response()
    }
}

fn authorization(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
}

impl FromRequestParts<Arc<AppState>> for RequireAuth {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let tag = extract_bearer_token(authorization(parts))?;

        let subject = state
            .supervisor
            .validate(&tag)
            .await
            .map_err(|e| match e {
                Error::Unauthorized(message) => AuthError::Rejected(message),
                Error::Shutdown => AuthError::Unavailable,
                _ => AuthError::InternalError,
            })?;

        Ok(RequireAuth { subject, tag })
    }
}

impl<S: Send + Sync> FromRequestParts<S> for BasicCredentials {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let (uid, password) = extract_basic_credentials(authorization(parts))?;
        Ok(BasicCredentials { uid, password })
    }
}
