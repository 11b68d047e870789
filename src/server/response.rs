use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use uuid::Uuid;

use crate::error::Error;

const RETRY_AFTER_SECS: &str = "1";

/// Uniform reply body: `{code, status, errors, job_id?, result}`.
#[derive(Debug, Serialize)]
pub struct Reply<T: Serialize> {
    pub code: u16,
    pub status: String,
    pub errors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<Uuid>,
    pub result: Vec<T>,
}

impl<T: Serialize> Reply<T> {
    fn with_status(status: StatusCode, result: Vec<T>) -> Self {
        Self {
            code: status.as_u16(),
            status: status.canonical_reason().unwrap_or_default().to_string(),
            errors: Vec::new(),
            job_id: None,
            result,
        }
    }

    #[must_use]
    pub fn list(result: Vec<T>) -> Self {
        Self::with_status(StatusCode::OK, result)
    }

    #[must_use]
    pub fn one(item: T) -> Self {
        Self::list(vec![item])
    }

    #[must_use]
    pub fn created(item: T) -> Self {
        Self::with_status(StatusCode::CREATED, vec![item])
    }

    /// Reply to a mutation that went through a tree-keeper.
    #[must_use]
    pub fn job(job_id: Uuid, result: Vec<T>) -> Self {
        Self {
            job_id: Some(job_id),
            ..Self::list(result)
        }
    }
}

impl Reply<()> {
    #[must_use]
    pub fn empty() -> Self {
        Self::list(Vec::new())
    }
}

impl<T: Serialize> IntoResponse for Reply<T> {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.code).unwrap_or(StatusCode::OK);
        (status, Json(self)).into_response()
    }
}

/// API error that renders as a reply with an empty result.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub job_id: Option<Uuid>,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            job_id: None,
        }
    }

    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    #[must_use]
    pub fn with_job(mut self, job_id: Option<Uuid>) -> Self {
        self.job_id = job_id;
        self
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = err.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %err, "request failed");
        }
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status;
        let body: Reply<()> = Reply {
            errors: vec![self.message],
            job_id: self.job_id,
            ..Reply::with_status(status, Vec::new())
        };
        let mut response = (status, Json(body)).into_response();

        match status {
            StatusCode::SERVICE_UNAVAILABLE => {
                response.headers_mut().insert(
                    header::RETRY_AFTER,
                    HeaderValue::from_static(RETRY_AFTER_SECS),
                );
            }
            StatusCode::UNAUTHORIZED => {
                response.headers_mut().insert(
                    header::WWW_AUTHENTICATE,
                    HeaderValue::from_static("Bearer realm=\"soma\""),
                );
            }
            _ => {}
        }
        response
    }
}

/// Extension for Option types from store operations.
pub trait StoreOptionExt<T> {
    fn or_not_found(self, message: &'static str) -> Result<T, ApiError>;
}

impl<T> StoreOptionExt<T> for Option<T> {
    fn or_not_found(self, message: &'static str) -> Result<T, ApiError> {
        self.ok_or_else(|| ApiError::not_found(message))
    }
}

/// Maps a store `delete_*` outcome onto an empty reply or 404.
pub fn deleted(removed: bool, what: &'static str) -> Result<Reply<()>, ApiError> {
    if removed {
        Ok(Reply::empty())
    } else {
        Err(ApiError::not_found(what))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overload_carries_retry_after() {
        let response = ApiError::from(Error::Overload("queue full".into())).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()[header::RETRY_AFTER], "1");
    }

    #[test]
    fn test_unauthorized_carries_challenge() {
        let response = ApiError::unauthorized("token expired").into_response();
        assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));
    }

    #[test]
    fn test_reply_serialization() {
        let job = Uuid::new_v4();
        let value = serde_json::to_value(Reply::job(job, vec!["x"])).unwrap();
        assert_eq!(value["code"], 200);
        assert_eq!(value["status"], "OK");
        assert_eq!(value["job_id"], job.to_string());
        assert_eq!(value["result"][0], "x");

        let empty = serde_json::to_value(Reply::empty()).unwrap();
        assert!(empty.get("job_id").is_none());
        assert_eq!(empty["errors"].as_array().unwrap().len(), 0);
    }
}
