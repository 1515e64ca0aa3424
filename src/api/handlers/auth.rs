//! Session endpoints.
//!
//! Flow Overview:
//! 1) Parse the JSON payload; credentials are wrapped in `SecretString` at once.
//! 2) Delegate to the session manager, which validates before any provider call.
//! 3) Return the signed-in identity or the mapped error.

use axum::{
    Json,
    extract::{Extension, rejection::JsonRejection},
    http::{HeaderMap, HeaderValue, StatusCode, header::CACHE_CONTROL},
    response::IntoResponse,
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

use crate::api::error::{ApiError, ErrorBody};
use crate::identity::{FederatedCredential, FederatedProvider, Identity};
use crate::session::{SessionManager, SessionState, nonce::Nonce};

#[derive(Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize, ToSchema)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub confirm_password: String,
    pub display_name: String,
}

#[derive(Deserialize, ToSchema)]
pub struct FederatedRequest {
    pub provider: FederatedProvider,
    pub id_token: String,
    #[serde(default)]
    pub access_token: Option<String>,
    /// Raw nonce whose SHA-256 was sent to Apple. Required for Apple.
    #[serde(default)]
    pub raw_nonce: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PasswordResetRequest {
    pub email: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct NonceResponse {
    /// Keep client-side and send back with the Apple token.
    pub nonce: String,
    /// Lowercase hex SHA-256 of `nonce`, sent in the Apple authorization request.
    pub sha256: String,
}

impl From<FederatedRequest> for FederatedCredential {
    fn from(request: FederatedRequest) -> Self {
        Self {
            provider: request.provider,
            id_token: SecretString::from(request.id_token),
            access_token: request.access_token.map(SecretString::from),
            raw_nonce: request.raw_nonce,
        }
    }
}

#[utoipa::path(
    get,
    path = "/v1/auth/session",
    responses(
        (status = 200, description = "Current session state", body = SessionState),
    ),
    tag = "auth"
)]
pub async fn session_state(session: Extension<Arc<SessionManager>>) -> Json<SessionState> {
    Json(session.state())
}

#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Signed in", body = Identity),
        (status = 400, description = "Malformed email or password", body = ErrorBody),
        (status = 401, description = "Invalid credentials", body = ErrorBody),
        (status = 503, description = "Identity provider unreachable", body = ErrorBody),
    ),
    tag = "auth"
)]
pub async fn login(
    session: Extension<Arc<SessionManager>>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<Identity>, ApiError> {
    let Json(request) = payload?;
    let password = SecretString::from(request.password);
    let identity = session
        .sign_in_with_password(&request.email, &password)
        .await?;
    Ok(Json(identity))
}

#[utoipa::path(
    post,
    path = "/v1/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created and signed in", body = Identity),
        (status = 400, description = "One entry per failed rule", body = ErrorBody),
        (status = 409, description = "Email already registered", body = ErrorBody),
    ),
    tag = "auth"
)]
pub async fn register(
    session: Extension<Arc<SessionManager>>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = payload?;
    let password = SecretString::from(request.password);
    let confirm_password = SecretString::from(request.confirm_password);
    let identity = session
        .register_with_password(
            &request.email,
            &password,
            &confirm_password,
            &request.display_name,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(identity)))
}

#[utoipa::path(
    post,
    path = "/v1/auth/federated",
    request_body = FederatedRequest,
    responses(
        (status = 200, description = "Signed in with Google or Apple", body = Identity),
        (status = 401, description = "Token rejected", body = ErrorBody),
    ),
    tag = "auth"
)]
pub async fn federated(
    session: Extension<Arc<SessionManager>>,
    payload: Result<Json<FederatedRequest>, JsonRejection>,
) -> Result<Json<Identity>, ApiError> {
    let Json(request) = payload?;
    let credential = FederatedCredential::from(request);
    let identity = session.sign_in_with_federated_token(&credential).await?;
    Ok(Json(identity))
}

#[utoipa::path(
    get,
    path = "/v1/auth/nonce",
    responses(
        (status = 200, description = "Fresh nonce for Apple sign-in", body = NonceResponse),
    ),
    tag = "auth"
)]
pub async fn nonce() -> impl IntoResponse {
    let nonce = Nonce::generate();
    let sha256 = nonce.sha256();

    let mut headers = HeaderMap::new();
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));

    (
        headers,
        Json(NonceResponse {
            nonce: nonce.into_raw(),
            sha256,
        }),
    )
}

#[utoipa::path(
    post,
    path = "/v1/auth/password-reset",
    request_body = PasswordResetRequest,
    responses(
        (status = 202, description = "Reset email requested"),
        (status = 400, description = "Malformed email", body = ErrorBody),
        (status = 404, description = "No account for this email", body = ErrorBody),
    ),
    tag = "auth"
)]
pub async fn password_reset(
    session: Extension<Arc<SessionManager>>,
    payload: Result<Json<PasswordResetRequest>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(request) = payload?;
    session.request_password_reset(&request.email).await?;
    Ok(StatusCode::ACCEPTED)
}

#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    responses(
        (status = 204, description = "Signed out; always succeeds locally"),
    ),
    tag = "auth"
)]
pub async fn logout(session: Extension<Arc<SessionManager>>) -> StatusCode {
    session.sign_out().await;
    StatusCode::NO_CONTENT
}
