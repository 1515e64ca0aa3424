//! JSON error responses.
//!
//! Every handler returns [`ApiError`]; the status code is derived from the
//! domain error so handlers never pick one themselves.

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::{error, warn};
use utoipa::ToSchema;

use crate::profile::ProfileError;
use crate::session::{
    AuthError,
    validator::{Field, Violation},
};
use crate::store::StoreError;

#[derive(Debug)]
pub enum ApiError {
    Auth(AuthError),
    Profile(ProfileError),
    Store(StoreError),
    /// Catalog entry that does not exist.
    NotFound(String),
    /// Request body that could not be parsed.
    InvalidPayload(String),
}

#[derive(Debug, Serialize, ToSchema)]
pub struct FieldError {
    pub field: Field,
    pub violation: Violation,
    pub message: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Stable machine-readable code.
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldError>,
}

const fn store_status(err: &StoreError) -> StatusCode {
    match err {
        StoreError::NotFound { .. } => StatusCode::NOT_FOUND,
        StoreError::Decoding { .. } => StatusCode::BAD_GATEWAY,
        StoreError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        StoreError::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
        StoreError::LimitExceeded { .. } => StatusCode::UNPROCESSABLE_ENTITY,
    }
}

const fn store_code(err: &StoreError) -> &'static str {
    match err {
        StoreError::NotFound { .. } => "not_found",
        StoreError::Decoding { .. } => "decoding_error",
        StoreError::Unavailable(_) => "network_error",
        StoreError::Backend(_) => "store_error",
        StoreError::LimitExceeded { .. } => "limit_reached",
    }
}

impl ApiError {
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Auth(err) => match err {
                AuthError::Validation(_) => StatusCode::BAD_REQUEST,
                AuthError::InvalidCredentials | AuthError::NoActiveSession => {
                    StatusCode::UNAUTHORIZED
                }
                AuthError::UnknownIdentity => StatusCode::NOT_FOUND,
                AuthError::EmailAlreadyInUse => StatusCode::CONFLICT,
                AuthError::Network(_) => StatusCode::SERVICE_UNAVAILABLE,
                AuthError::Decoding(_) => StatusCode::BAD_GATEWAY,
                AuthError::ProviderConfiguration(_) | AuthError::Unknown(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            Self::Profile(err) => match err {
                ProfileError::LimitReached { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                ProfileError::NotFound(_) => StatusCode::NOT_FOUND,
                ProfileError::Store(store) => store_status(store),
            },
            Self::Store(err) => store_status(err),
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidPayload(_) => StatusCode::BAD_REQUEST,
        }
    }

    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Auth(err) => err.code(),
            Self::Profile(err) => err.code(),
            Self::Store(err) => store_code(err),
            Self::NotFound(_) => "not_found",
            Self::InvalidPayload(_) => "invalid_payload",
        }
    }

    fn message(&self) -> String {
        match self {
            Self::Auth(err) => err.to_string(),
            Self::Profile(err) => err.to_string(),
            Self::Store(err) => err.to_string(),
            Self::NotFound(what) => format!("{what} not found"),
            Self::InvalidPayload(reason) => reason.clone(),
        }
    }

    fn fields(&self) -> Vec<FieldError> {
        match self {
            Self::Auth(AuthError::Validation(violations)) => violations
                .iter()
                .map(|violation| FieldError {
                    field: violation.field(),
                    violation: *violation,
                    message: violation.to_string(),
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        Self::Auth(err)
    }
}

impl From<ProfileError> for ApiError {
    fn from(err: ProfileError) -> Self {
        Self::Profile(err)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::InvalidPayload(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody {
            error: self.code().to_string(),
            message: self.message(),
            fields: self.fields(),
        };

        if status.is_server_error() {
            error!(code = %body.error, "Request failed: {}", body.message);
        } else {
            warn!(code = %body.error, "Request rejected: {}", body.message);
        }

        (status, Json(body)).into_response()
    }
}
