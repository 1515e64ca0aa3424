use super::handlers::{auth, catalog, health, me};
use axum::Json;
use utoipa::openapi::{Contact, InfoBuilder, License, OpenApiBuilder, Tag};
use utoipa_axum::{router::OpenApiRouter, routes};

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    let (_router, openapi) = api_router().split_for_parts();
    openapi
}

/// Serve the generated document at `/openapi.json`.
pub(crate) async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(openapi())
}

/// Build the router that also drives the `OpenAPI` document.
///
/// Add new endpoints here via `.routes(routes!(...))` so they are both served
/// and documented. Handlers sharing a path must share one `routes!` call.
pub(crate) fn api_router() -> OpenApiRouter {
    let mut router = OpenApiRouter::with_openapi(cargo_openapi())
        .routes(routes!(health::health))
        .routes(routes!(auth::session_state))
        .routes(routes!(auth::login))
        .routes(routes!(auth::register))
        .routes(routes!(auth::federated))
        .routes(routes!(auth::nonce))
        .routes(routes!(auth::password_reset))
        .routes(routes!(auth::logout))
        .routes(routes!(me::get_me, me::patch_me, me::delete_me))
        .routes(routes!(me::update_email))
        .routes(routes!(me::update_password))
        .routes(routes!(me::complete_onboarding))
        .routes(routes!(me::follow_topic, me::unfollow_topic))
        .routes(routes!(me::follow_publication, me::unfollow_publication))
        .routes(routes!(me::add_bookmark, me::remove_bookmark))
        .routes(routes!(me::list_progress))
        .routes(routes!(me::save_progress))
        .routes(routes!(catalog::list_topics))
        .routes(routes!(catalog::topic_articles))
        .routes(routes!(catalog::topic_publications))
        .routes(routes!(catalog::publication_articles))
        .routes(routes!(catalog::get_article));

    let mut health_tag = Tag::new("health");
    health_tag.description = Some("Liveness and build information".to_string());

    let mut auth_tag = Tag::new("auth");
    auth_tag.description = Some("Sign-in, registration and sign-out".to_string());

    let mut me_tag = Tag::new("me");
    me_tag.description = Some("Signed-in reader profile and preferences".to_string());

    let mut catalog_tag = Tag::new("catalog");
    catalog_tag.description = Some("Topics, publications and articles".to_string());

    router.get_openapi_mut().tags = Some(vec![health_tag, auth_tag, me_tag, catalog_tag]);

    router
}

fn cargo_openapi() -> utoipa::openapi::OpenApi {
    // Use Cargo.toml metadata instead of the utoipa-axum crate info defaults.
    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(optional_str(env!("CARGO_PKG_DESCRIPTION")))
        .build();

    info.contact = cargo_contact();
    info.license = cargo_license();

    OpenApiBuilder::new().info(info).build()
}

fn cargo_contact() -> Option<Contact> {
    // Cargo authors are `;` separated and may include "Name <email>".
    let authors = env!("CARGO_PKG_AUTHORS");
    let primary = authors.split(';').next().map(str::trim)?;
    if primary.is_empty() {
        return None;
    }

    let (name, email) = parse_author(primary);
    if name.is_none() && email.is_none() {
        return None;
    }

    let mut contact = Contact::new();
    contact.name = name.map(str::to_string);
    contact.email = email.map(str::to_string);
    Some(contact)
}

fn cargo_license() -> Option<License> {
    let identifier = optional_str(env!("CARGO_PKG_LICENSE"))?;
    let mut license = License::new(identifier);
    license.identifier = Some(identifier.to_string());
    Some(license)
}

fn optional_str(value: &'static str) -> Option<&'static str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn non_empty(value: &str) -> Option<&str> {
    if value.is_empty() { None } else { Some(value) }
}

fn parse_author(author: &str) -> (Option<&str>, Option<&str>) {
    match author.split_once('<') {
        Some((name, email)) => (
            non_empty(name.trim()),
            non_empty(email.trim_end_matches('>').trim()),
        ),
        None => (non_empty(author.trim()), None),
    }
}
