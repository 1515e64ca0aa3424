//! Endpoints for the signed-in reader.
//!
//! Every handler resolves the current identity from the process session and
//! fails with 401 when nobody is signed in.

use axum::{
    Json,
    extract::{Extension, Path, rejection::JsonRejection},
    http::StatusCode,
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

use crate::api::error::{ApiError, ErrorBody};
use crate::identity::Identity;
use crate::profile::{ReadingProgress, UserProfile};
use crate::session::{AuthError, SessionManager};

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MeResponse {
    pub identity: Identity,
    pub profile: UserProfile,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct MeUpdateRequest {
    pub display_name: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct EmailUpdateRequest {
    pub email: String,
}

#[derive(Deserialize, ToSchema)]
pub struct PasswordUpdateRequest {
    pub password: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ProgressRequest {
    /// Percentage read, clamped to `0..=100`.
    pub progress: f64,
}

fn require_identity(session: &SessionManager) -> Result<Identity, ApiError> {
    session
        .current_identity()
        .ok_or(ApiError::Auth(AuthError::NoActiveSession))
}

#[utoipa::path(
    get,
    path = "/v1/me",
    responses(
        (status = 200, description = "Signed-in identity and profile", body = MeResponse),
        (status = 401, description = "No active session", body = ErrorBody),
        (status = 404, description = "Profile document missing", body = ErrorBody),
    ),
    tag = "me"
)]
pub async fn get_me(session: Extension<Arc<SessionManager>>) -> Result<Json<MeResponse>, ApiError> {
    let identity = require_identity(&session)?;
    let profile = session.profiles().fetch_profile(&identity.id).await?;
    Ok(Json(MeResponse { identity, profile }))
}

#[utoipa::path(
    patch,
    path = "/v1/me",
    request_body = MeUpdateRequest,
    responses(
        (status = 200, description = "Display name updated", body = Identity),
        (status = 400, description = "Invalid display name", body = ErrorBody),
        (status = 401, description = "No active session", body = ErrorBody),
    ),
    tag = "me"
)]
pub async fn patch_me(
    session: Extension<Arc<SessionManager>>,
    payload: Result<Json<MeUpdateRequest>, JsonRejection>,
) -> Result<Json<Identity>, ApiError> {
    let Json(request) = payload?;
    let identity = session.update_display_name(&request.display_name).await?;
    Ok(Json(identity))
}

#[utoipa::path(
    delete,
    path = "/v1/me",
    responses(
        (status = 204, description = "Account and profile deleted"),
        (status = 401, description = "No active session", body = ErrorBody),
    ),
    tag = "me"
)]
pub async fn delete_me(session: Extension<Arc<SessionManager>>) -> Result<StatusCode, ApiError> {
    session.delete_account().await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    put,
    path = "/v1/me/email",
    request_body = EmailUpdateRequest,
    responses(
        (status = 204, description = "Profile email changed"),
        (status = 400, description = "Invalid email address", body = ErrorBody),
        (status = 401, description = "No active session", body = ErrorBody),
    ),
    tag = "me"
)]
pub async fn update_email(
    session: Extension<Arc<SessionManager>>,
    payload: Result<Json<EmailUpdateRequest>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(request) = payload?;
    session.update_email(&request.email).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/v1/me/password",
    request_body = PasswordUpdateRequest,
    responses(
        (status = 204, description = "Password changed"),
        (status = 400, description = "Password too short or too long", body = ErrorBody),
        (status = 401, description = "No active session", body = ErrorBody),
    ),
    tag = "me"
)]
pub async fn update_password(
    session: Extension<Arc<SessionManager>>,
    payload: Result<Json<PasswordUpdateRequest>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(request) = payload?;
    let password = SecretString::from(request.password);
    session.update_password(&password).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/v1/me/onboarding",
    responses(
        (status = 204, description = "Onboarding marked complete"),
        (status = 401, description = "No active session", body = ErrorBody),
    ),
    tag = "me"
)]
pub async fn complete_onboarding(
    session: Extension<Arc<SessionManager>>,
) -> Result<StatusCode, ApiError> {
    let identity = require_identity(&session)?;
    session.profiles().complete_onboarding(&identity.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    put,
    path = "/v1/me/topics/{id}",
    params(("id" = String, Path, description = "Topic id")),
    responses(
        (status = 204, description = "Topic followed"),
        (status = 401, description = "No active session", body = ErrorBody),
        (status = 422, description = "Followed topic limit reached", body = ErrorBody),
    ),
    tag = "me"
)]
pub async fn follow_topic(
    session: Extension<Arc<SessionManager>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let identity = require_identity(&session)?;
    session.profiles().follow_topic(&identity.id, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    delete,
    path = "/v1/me/topics/{id}",
    params(("id" = String, Path, description = "Topic id")),
    responses(
        (status = 204, description = "Topic unfollowed"),
        (status = 401, description = "No active session", body = ErrorBody),
    ),
    tag = "me"
)]
pub async fn unfollow_topic(
    session: Extension<Arc<SessionManager>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let identity = require_identity(&session)?;
    session.profiles().unfollow_topic(&identity.id, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    put,
    path = "/v1/me/publications/{id}",
    params(("id" = String, Path, description = "Publication id")),
    responses(
        (status = 204, description = "Publication followed"),
        (status = 401, description = "No active session", body = ErrorBody),
        (status = 422, description = "Followed publication limit reached", body = ErrorBody),
    ),
    tag = "me"
)]
pub async fn follow_publication(
    session: Extension<Arc<SessionManager>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let identity = require_identity(&session)?;
    session
        .profiles()
        .follow_publication(&identity.id, &id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    delete,
    path = "/v1/me/publications/{id}",
    params(("id" = String, Path, description = "Publication id")),
    responses(
        (status = 204, description = "Publication unfollowed"),
        (status = 401, description = "No active session", body = ErrorBody),
    ),
    tag = "me"
)]
pub async fn unfollow_publication(
    session: Extension<Arc<SessionManager>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let identity = require_identity(&session)?;
    session
        .profiles()
        .unfollow_publication(&identity.id, &id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    put,
    path = "/v1/me/bookmarks/{id}",
    params(("id" = String, Path, description = "Article id")),
    responses(
        (status = 204, description = "Article bookmarked"),
        (status = 401, description = "No active session", body = ErrorBody),
        (status = 422, description = "Bookmark limit reached", body = ErrorBody),
    ),
    tag = "me"
)]
pub async fn add_bookmark(
    session: Extension<Arc<SessionManager>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let identity = require_identity(&session)?;
    session.profiles().add_bookmark(&identity.id, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    delete,
    path = "/v1/me/bookmarks/{id}",
    params(("id" = String, Path, description = "Article id")),
    responses(
        (status = 204, description = "Bookmark removed"),
        (status = 401, description = "No active session", body = ErrorBody),
    ),
    tag = "me"
)]
pub async fn remove_bookmark(
    session: Extension<Arc<SessionManager>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let identity = require_identity(&session)?;
    session.profiles().remove_bookmark(&identity.id, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/v1/me/progress",
    responses(
        (status = 200, description = "Reading progress for every started article", body = [ReadingProgress]),
        (status = 401, description = "No active session", body = ErrorBody),
    ),
    tag = "me"
)]
pub async fn list_progress(
    session: Extension<Arc<SessionManager>>,
) -> Result<Json<Vec<ReadingProgress>>, ApiError> {
    let identity = require_identity(&session)?;
    let records = session.profiles().all_reading_progress(&identity.id).await?;
    Ok(Json(records))
}

#[utoipa::path(
    put,
    path = "/v1/me/progress/{article_id}",
    request_body = ProgressRequest,
    params(("article_id" = String, Path, description = "Article id")),
    responses(
        (status = 200, description = "Stored progress record", body = ReadingProgress),
        (status = 401, description = "No active session", body = ErrorBody),
    ),
    tag = "me"
)]
pub async fn save_progress(
    session: Extension<Arc<SessionManager>>,
    Path(article_id): Path<String>,
    payload: Result<Json<ProgressRequest>, JsonRejection>,
) -> Result<Json<ReadingProgress>, ApiError> {
    let identity = require_identity(&session)?;
    let Json(request) = payload?;
    let record = session
        .profiles()
        .save_reading_progress(&identity.id, &article_id, request.progress)
        .await?;
    Ok(Json(record))
}
