use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use thiserror::Error;

/// Error kinds from spec.md §7, with the retry policy noted in comments
/// rather than encoded (retry is the caller's decision, not this type's).
#[derive(Debug, Error, Clone)]
pub enum MeshError {
    /// Caller fixes input; never retried.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// Token invalid, expired, or already used.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),
    /// Cluster/tenant binding violation; not retried.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// Node not enrolled or inactive.
    #[error("not found: {0}")]
    NotFound(String),
    /// Idempotency conflict, e.g. node already in a different cluster.
    #[error("failed precondition: {0}")]
    FailedPrecondition(String),
    /// Cluster cap, token usage limit; caller adjusts.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
    /// Transient: no active cluster, allocator contention, store down.
    #[error("unavailable: {0}")]
    Unavailable(String),
    /// Bug; logged; retried next cycle by the caller.
    #[error("internal: {0}")]
    Internal(String),
}

impl MeshError {
    pub fn kind(&self) -> &'static str {
        match self {
            MeshError::InvalidRequest(_) => "InvalidRequest",
            MeshError::Unauthenticated(_) => "Unauthenticated",
            MeshError::PermissionDenied(_) => "PermissionDenied",
            MeshError::NotFound(_) => "NotFound",
            MeshError::FailedPrecondition(_) => "FailedPrecondition",
            MeshError::ResourceExhausted(_) => "ResourceExhausted",
            MeshError::Unavailable(_) => "Unavailable",
            MeshError::Internal(_) => "Internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            MeshError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            MeshError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            MeshError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            MeshError::NotFound(_) => StatusCode::NOT_FOUND,
            MeshError::FailedPrecondition(_) => StatusCode::CONFLICT,
            MeshError::ResourceExhausted(_) => StatusCode::TOO_MANY_REQUESTS,
            MeshError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            MeshError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    kind: &'static str,
    message: String,
}

impl IntoResponse for MeshError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        let body = ErrorBody {
            kind: self.kind(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub type MeshResult<T> = Result<T, MeshError>;
