use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::identity::Identity;

pub const USERS: &str = "users";
pub const READING_PROGRESS: &str = "readingProgress";

pub const MAX_BOOKMARKS: usize = 1000;
pub const MAX_FOLLOWED_TOPICS: usize = 20;
pub const MAX_FOLLOWED_PUBLICATIONS: usize = 100;

/// Fallback display name for identities that carry none.
pub const DEFAULT_DISPLAY_NAME: &str = "User";

/// Collection path holding a user's reading progress documents.
#[must_use]
pub fn reading_progress_collection(user_id: &str) -> String {
    format!("{USERS}/{user_id}/{READING_PROGRESS}")
}

/// Profile document stored under `users/{id}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    pub display_name: String,
    #[serde(rename = "photoURL", default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub onboarding_completed: bool,
    #[serde(default)]
    pub followed_topics: Vec<String>,
    #[serde(default)]
    pub followed_publications: Vec<String>,
    #[serde(default)]
    pub bookmarks: Vec<String>,
}

impl UserProfile {
    /// Fresh profile for an identity signing in for the first time.
    #[must_use]
    pub fn for_identity(identity: &Identity) -> Self {
        let display_name = identity
            .display_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_DISPLAY_NAME)
            .to_string();
        Self {
            id: identity.id.clone(),
            email: identity.email.clone().unwrap_or_default(),
            display_name,
            photo_url: identity.photo_url.clone(),
            created_at: Utc::now(),
            onboarding_completed: false,
            followed_topics: Vec::new(),
            followed_publications: Vec::new(),
            bookmarks: Vec::new(),
        }
    }
}

/// Reading position in one article, stored under
/// `users/{id}/readingProgress/{articleId}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReadingProgress {
    pub article_id: String,
    #[serde(default = "Utc::now")]
    pub last_read_at: DateTime<Utc>,
    /// Percentage in `[0, 100]`.
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub is_completed: bool,
}

impl ReadingProgress {
    #[must_use]
    pub fn new(article_id: &str) -> Self {
        Self {
            article_id: article_id.to_string(),
            last_read_at: Utc::now(),
            progress: 0.0,
            is_completed: false,
        }
    }

    /// Clamp to `[0, 100]` and mark completion once the end is reached.
    ///
    /// Completion is sticky: scrolling back does not clear it.
    pub fn update(&mut self, progress: f64) {
        let progress = if progress.is_nan() { 0.0 } else { progress };
        self.progress = progress.clamp(0.0, 100.0);
        self.last_read_at = Utc::now();
        if self.progress >= 100.0 {
            self.is_completed = true;
        }
    }

    pub fn mark_completed(&mut self) {
        self.update(100.0);
    }

    #[must_use]
    pub fn is_started(&self) -> bool {
        self.progress > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{StoreError, decode, encode};
    use serde_json::{Value, json};

    fn doc(value: Value) -> crate::store::Document {
        match value {
            Value::Object(map) => map,
            _ => crate::store::Document::new(),
        }
    }

    #[test]
    fn profile_decodes_with_defaults() -> Result<(), StoreError> {
        let profile: UserProfile = decode(
            USERS,
            "u1",
            doc(json!({ "email": "a@b.com", "displayName": "Ann" })),
        )?;
        assert_eq!(profile.id, "u1");
        assert!(!profile.onboarding_completed);
        assert!(profile.bookmarks.is_empty());
        assert_eq!(profile.photo_url, None);
        Ok(())
    }

    #[test]
    fn profile_without_display_name_fails_to_decode() {
        let result: Result<UserProfile, _> =
            decode(USERS, "u1", doc(json!({ "email": "a@b.com" })));
        assert!(matches!(result, Err(StoreError::Decoding { .. })));
    }

    #[test]
    fn profile_encodes_with_document_field_names() -> Result<(), StoreError> {
        let mut profile = UserProfile::for_identity(&Identity {
            id: "u1".to_string(),
            email: Some("a@b.com".to_string()),
            display_name: Some("Ann".to_string()),
            photo_url: Some("https://img/a.png".to_string()),
        });
        profile.bookmarks.push("a1".to_string());
        let document = encode(&profile)?;
        assert!(!document.contains_key("id"));
        assert_eq!(document.get("photoURL"), Some(&json!("https://img/a.png")));
        assert_eq!(document.get("bookmarks"), Some(&json!(["a1"])));
        assert_eq!(document.get("onboardingCompleted"), Some(&json!(false)));
        Ok(())
    }

    #[test]
    fn for_identity_defaults_missing_fields() {
        let profile = UserProfile::for_identity(&Identity {
            id: "apple-1".to_string(),
            email: None,
            display_name: Some("   ".to_string()),
            photo_url: None,
        });
        assert_eq!(profile.display_name, DEFAULT_DISPLAY_NAME);
        assert_eq!(profile.email, "");
    }

    #[test]
    fn reading_progress_clamps_and_completes() {
        let mut progress = ReadingProgress::new("a1");
        assert!(!progress.is_started());

        progress.update(-5.0);
        assert!((progress.progress - 0.0).abs() < f64::EPSILON);

        progress.update(42.5);
        assert!(progress.is_started());
        assert!(!progress.is_completed);

        progress.update(250.0);
        assert!((progress.progress - 100.0).abs() < f64::EPSILON);
        assert!(progress.is_completed);

        progress.update(10.0);
        assert!(progress.is_completed);
    }

    #[test]
    fn reading_progress_collection_is_nested_under_user() {
        assert_eq!(reading_progress_collection("u1"), "users/u1/readingProgress");
    }
}
