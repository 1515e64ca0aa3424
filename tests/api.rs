//! End-to-end tests of the HTTP API over the in-memory adapters.

use anyhow::{Context, Result};
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header::CONTENT_TYPE},
};
use defyblog::{
    api,
    catalog::CatalogService,
    identity::{FederatedProvider, Identity, memory::MemoryIdentityProvider},
    profile::ProfileService,
    session::SessionManager,
    store::{DocumentStore, memory::MemoryDocumentStore},
};
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;

struct TestApp {
    router: Router,
    provider: Arc<MemoryIdentityProvider>,
    store: Arc<MemoryDocumentStore>,
    session: Arc<SessionManager>,
}

impl TestApp {
    fn new() -> Result<Self> {
        let provider = Arc::new(MemoryIdentityProvider::signed_out());
        let store = Arc::new(MemoryDocumentStore::new());
        let session = Arc::new(SessionManager::start(
            provider.clone(),
            ProfileService::new(store.clone()),
        ));
        let router = api::app(
            session.clone(),
            CatalogService::new(store.clone()),
            Some("https://defy.blog"),
        )?;
        Ok(Self {
            router,
            provider,
            store,
            session,
        })
    }

    async fn call(&self, method: &str, uri: &str, body: Option<Value>) -> Result<(StatusCode, Value)> {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_vec(&body)?))?,
            None => builder.body(Body::empty())?,
        };

        let response = self.router.clone().oneshot(request).await?;
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await?;
        let payload = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)?
        };
        Ok((status, payload))
    }

    async fn register(&self, email: &str) -> Result<Value> {
        let (status, body) = self
            .call(
                "POST",
                "/v1/auth/register",
                Some(json!({
                    "email": email,
                    "password": "password1",
                    "confirm_password": "password1",
                    "display_name": "Ann",
                })),
            )
            .await?;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        Ok(body)
    }

    async fn seed(&self, collection: &str, id: &str, document: Value) -> Result<()> {
        let document = document
            .as_object()
            .cloned()
            .context("seed document must be an object")?;
        self.store.set_document(collection, id, document).await?;
        Ok(())
    }
}

fn article(id: &str, topic_id: &str, publication_id: &str) -> Value {
    json!({
        "title": format!("Article {id}"),
        "slug": id,
        "featuredQuote": "quote",
        "content": "# Body",
        "authorName": "Author",
        "readTimeMinutes": 4,
        "publicationId": publication_id,
        "topicId": topic_id,
    })
}

#[tokio::test]
async fn session_starts_unauthenticated() -> Result<()> {
    let app = TestApp::new()?;
    let (status, body) = app.call("GET", "/v1/auth/session", None).await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "unauthenticated");
    assert!(body.get("identity").is_none());
    Ok(())
}

#[tokio::test]
async fn register_login_logout_round() -> Result<()> {
    let app = TestApp::new()?;
    let identity = app.register("reader@defy.blog").await?;
    assert_eq!(identity["display_name"], "Ann");

    let (_, body) = app.call("GET", "/v1/auth/session", None).await?;
    assert_eq!(body["state"], "authenticated");
    assert_eq!(body["identity"]["email"], "reader@defy.blog");

    let (status, _) = app.call("POST", "/v1/auth/logout", None).await?;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(!app.session.state().is_authenticated());

    let (status, body) = app
        .call(
            "POST",
            "/v1/auth/login",
            Some(json!({"email": "reader@defy.blog", "password": "password1"})),
        )
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], identity["id"]);
    Ok(())
}

#[tokio::test]
async fn register_reports_every_violation() -> Result<()> {
    let app = TestApp::new()?;
    let (status, body) = app
        .call(
            "POST",
            "/v1/auth/register",
            Some(json!({
                "email": "not-an-email",
                "password": "short",
                "confirm_password": "different",
                "display_name": " ",
            })),
        )
        .await?;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");
    let fields: Vec<&str> = body["fields"]
        .as_array()
        .context("fields array")?
        .iter()
        .filter_map(|field| field["field"].as_str())
        .collect();
    assert!(fields.contains(&"email"));
    assert!(fields.contains(&"password"));
    assert!(fields.contains(&"confirm_password"));
    assert!(fields.contains(&"display_name"));
    assert_eq!(app.provider.request_count(), 0);
    Ok(())
}

#[tokio::test]
async fn duplicate_registration_conflicts() -> Result<()> {
    let app = TestApp::new()?;
    app.register("reader@defy.blog").await?;
    app.call("POST", "/v1/auth/logout", None).await?;

    let (status, body) = app
        .call(
            "POST",
            "/v1/auth/register",
            Some(json!({
                "email": "reader@defy.blog",
                "password": "password1",
                "confirm_password": "password1",
                "display_name": "Ann",
            })),
        )
        .await?;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "email_already_in_use");
    Ok(())
}

#[tokio::test]
async fn wrong_password_is_unauthorized() -> Result<()> {
    let app = TestApp::new()?;
    app.register("reader@defy.blog").await?;
    app.call("POST", "/v1/auth/logout", None).await?;

    let (status, body) = app
        .call(
            "POST",
            "/v1/auth/login",
            Some(json!({"email": "reader@defy.blog", "password": "password2"})),
        )
        .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid_credentials");
    Ok(())
}

#[tokio::test]
async fn malformed_payload_is_bad_request() -> Result<()> {
    let app = TestApp::new()?;
    let (status, body) = app
        .call("POST", "/v1/auth/login", Some(json!({"email": "a@b.com"})))
        .await?;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_payload");
    Ok(())
}

#[tokio::test]
async fn me_requires_session() -> Result<()> {
    let app = TestApp::new()?;
    for (method, uri) in [
        ("GET", "/v1/me"),
        ("DELETE", "/v1/me"),
        ("POST", "/v1/me/onboarding"),
        ("PUT", "/v1/me/bookmarks/a1"),
        ("GET", "/v1/me/progress"),
    ] {
        let (status, body) = app.call(method, uri, None).await?;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{method} {uri}");
        assert_eq!(body["error"], "no_active_session");
    }
    Ok(())
}

#[tokio::test]
async fn profile_preferences_round() -> Result<()> {
    let app = TestApp::new()?;
    app.register("reader@defy.blog").await?;

    for uri in [
        "/v1/me/topics/tech",
        "/v1/me/topics/tech",
        "/v1/me/publications/p1",
        "/v1/me/bookmarks/a1",
        "/v1/me/bookmarks/a2",
    ] {
        let (status, _) = app.call("PUT", uri, None).await?;
        assert_eq!(status, StatusCode::NO_CONTENT, "{uri}");
    }
    let (status, _) = app.call("DELETE", "/v1/me/bookmarks/a1", None).await?;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = app.call("POST", "/v1/me/onboarding", None).await?;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = app.call("GET", "/v1/me", None).await?;
    assert_eq!(status, StatusCode::OK);
    let profile = &body["profile"];
    assert_eq!(profile["followedTopics"], json!(["tech"]));
    assert_eq!(profile["followedPublications"], json!(["p1"]));
    assert_eq!(profile["bookmarks"], json!(["a2"]));
    assert_eq!(profile["onboardingCompleted"], true);
    Ok(())
}

#[tokio::test]
async fn rename_updates_identity_and_profile() -> Result<()> {
    let app = TestApp::new()?;
    app.register("reader@defy.blog").await?;

    let (status, body) = app
        .call("PATCH", "/v1/me", Some(json!({"display_name": "  Bea  "})))
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["display_name"], "Bea");

    let (_, body) = app.call("GET", "/v1/me", None).await?;
    assert_eq!(body["profile"]["displayName"], "Bea");

    let (status, body) = app
        .call("PATCH", "/v1/me", Some(json!({"display_name": ""})))
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["fields"][0]["violation"], "empty_display_name");
    Ok(())
}

#[tokio::test]
async fn email_update_is_validated() -> Result<()> {
    let app = TestApp::new()?;
    app.register("reader@defy.blog").await?;

    let (status, body) = app
        .call("PUT", "/v1/me/email", Some(json!({"email": "nope"})))
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["fields"][0]["violation"], "invalid_email");

    let (status, _) = app
        .call("PUT", "/v1/me/email", Some(json!({"email": "new@defy.blog"})))
        .await?;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, body) = app.call("GET", "/v1/me", None).await?;
    assert_eq!(body["profile"]["email"], "new@defy.blog");
    Ok(())
}

#[tokio::test]
async fn reading_progress_is_clamped_and_listed() -> Result<()> {
    let app = TestApp::new()?;
    app.register("reader@defy.blog").await?;

    let (status, body) = app
        .call("PUT", "/v1/me/progress/a1", Some(json!({"progress": 170.0})))
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["progress"], 100.0);
    assert_eq!(body["isCompleted"], true);

    let (_, body) = app
        .call("PUT", "/v1/me/progress/a1", Some(json!({"progress": 20.0})))
        .await?;
    assert_eq!(body["isCompleted"], true);

    let (status, body) = app.call("GET", "/v1/me/progress", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().map(Vec::len), Some(1));
    assert_eq!(body[0]["articleId"], "a1");
    Ok(())
}

#[tokio::test]
async fn delete_account_signs_out() -> Result<()> {
    let app = TestApp::new()?;
    let identity = app.register("reader@defy.blog").await?;
    let id = identity["id"].as_str().context("identity id")?.to_string();

    let (status, _) = app.call("DELETE", "/v1/me", None).await?;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(!app.session.state().is_authenticated());
    assert!(app.store.get_document("users", &id).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn federated_sign_in_with_nonce() -> Result<()> {
    let app = TestApp::new()?;
    app.provider.register_federated(
        FederatedProvider::Apple,
        "apple-token",
        Identity {
            id: "apple-user".to_string(),
            email: Some("hidden@privaterelay.appleid.com".to_string()),
            display_name: None,
            photo_url: None,
        },
    );

    let (status, nonce) = app.call("GET", "/v1/auth/nonce", None).await?;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .call(
            "POST",
            "/v1/auth/federated",
            Some(json!({
                "provider": "apple",
                "id_token": "apple-token",
                "raw_nonce": nonce["nonce"],
            })),
        )
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], "apple-user");

    let (_, body) = app.call("GET", "/v1/me", None).await?;
    assert_eq!(body["profile"]["displayName"], "User");
    Ok(())
}

#[tokio::test]
async fn federated_sign_in_with_empty_token_is_unauthorized() -> Result<()> {
    let app = TestApp::new()?;
    let (status, _) = app
        .call(
            "POST",
            "/v1/auth/federated",
            Some(json!({"provider": "google", "id_token": "  "})),
        )
        .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(app.provider.request_count(), 0);
    Ok(())
}

#[tokio::test]
async fn password_reset_accepted_for_known_email() -> Result<()> {
    let app = TestApp::new()?;
    app.register("reader@defy.blog").await?;

    let (status, _) = app
        .call(
            "POST",
            "/v1/auth/password-reset",
            Some(json!({"email": "reader@defy.blog"})),
        )
        .await?;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (status, body) = app
        .call(
            "POST",
            "/v1/auth/password-reset",
            Some(json!({"email": "nobody@defy.blog"})),
        )
        .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "unknown_identity");
    Ok(())
}

#[tokio::test]
async fn catalog_browsing() -> Result<()> {
    let app = TestApp::new()?;
    for (id, order) in [("science", 2), ("tech", 1)] {
        app.seed(
            "topics",
            id,
            json!({
                "name": id,
                "slug": id,
                "description": "",
                "iconName": "icon",
                "color": "#000000",
                "order": order,
            }),
        )
        .await?;
    }
    app.seed("articles", "a1", article("a1", "tech", "p1")).await?;
    app.seed("articles", "a2", article("a2", "tech", "p2")).await?;
    app.seed("articles", "a3", article("a3", "science", "p1")).await?;

    let (status, body) = app.call("GET", "/v1/topics", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["id"], "tech");
    assert_eq!(body[1]["id"], "science");

    let (_, body) = app.call("GET", "/v1/topics/tech/articles", None).await?;
    assert_eq!(body.as_array().map(Vec::len), Some(2));

    let (_, body) = app
        .call("GET", "/v1/topics/tech/articles?limit=1", None)
        .await?;
    assert_eq!(body.as_array().map(Vec::len), Some(1));

    let (_, body) = app.call("GET", "/v1/publications/p1/articles", None).await?;
    assert_eq!(body.as_array().map(Vec::len), Some(2));

    let (status, body) = app.call("GET", "/v1/articles/a3", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["readTimeMinutes"], 4);

    let (status, body) = app.call("GET", "/v1/articles/missing", None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
    Ok(())
}

#[tokio::test]
async fn corrupt_catalog_document_is_bad_gateway() -> Result<()> {
    let app = TestApp::new()?;
    app.seed("articles", "bad", json!({"title": 42})).await?;

    let (status, body) = app.call("GET", "/v1/articles/bad", None).await?;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"], "decoding_error");
    Ok(())
}

#[tokio::test]
async fn request_id_is_propagated() -> Result<()> {
    let app = TestApp::new()?;
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/health")
                .header("x-request-id", "req-123")
                .body(Body::empty())?,
        )
        .await?;

    assert_eq!(
        response
            .headers()
            .get("x-request-id")
            .and_then(|value| value.to_str().ok()),
        Some("req-123")
    );
    Ok(())
}

#[tokio::test]
async fn openapi_document_is_served() -> Result<()> {
    let app = TestApp::new()?;
    let (status, body) = app.call("GET", "/openapi.json", None).await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["info"]["title"], "defyblog");
    assert!(body["paths"].get("/v1/auth/login").is_some());
    Ok(())
}
