//! Typed operations over the `users` collection.
//!
//! Set membership changes are field-level array unions/removals so repeated
//! calls converge to the same document.

use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument};

use super::models::{
    MAX_BOOKMARKS, MAX_FOLLOWED_PUBLICATIONS, MAX_FOLLOWED_TOPICS, ReadingProgress, USERS,
    UserProfile, reading_progress_collection,
};
use crate::identity::Identity;
use crate::store::{DocumentStore, FieldUpdate, StoreError, decode, encode};

const FOLLOWED_TOPICS: &str = "followedTopics";
const FOLLOWED_PUBLICATIONS: &str = "followedPublications";
const BOOKMARKS: &str = "bookmarks";

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ProfileError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("{field} is limited to {limit} entries")]
    LimitReached { field: &'static str, limit: usize },
    #[error("profile {0} not found")]
    NotFound(String),
}

impl ProfileError {
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Store(StoreError::Decoding { .. }) => "decoding_error",
            Self::Store(StoreError::Unavailable(_)) => "network_error",
            Self::LimitReached { .. } | Self::Store(StoreError::LimitExceeded { .. }) => {
                "limit_reached"
            }
            Self::Store(_) => "store_error",
            Self::NotFound(_) => "profile_not_found",
        }
    }
}

#[derive(Clone)]
pub struct ProfileService {
    store: Arc<dyn DocumentStore>,
}

impl ProfileService {
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Create the profile for `identity` unless one already exists.
    ///
    /// Returns `true` when this call created the document.
    ///
    /// # Errors
    /// Returns an error if the store rejects the write.
    #[instrument(skip(self, identity), fields(user_id = %identity.id))]
    pub async fn ensure_profile(&self, identity: &Identity) -> Result<bool, ProfileError> {
        let document = encode(&UserProfile::for_identity(identity))?;
        let created = self
            .store
            .create_if_absent(USERS, &identity.id, document)
            .await?;
        if created {
            debug!("Created profile document");
        }
        Ok(created)
    }

    /// # Errors
    /// Returns `NotFound` when the user has no profile document.
    pub async fn fetch_profile(&self, user_id: &str) -> Result<UserProfile, ProfileError> {
        self.find_profile(user_id)
            .await?
            .ok_or_else(|| ProfileError::NotFound(user_id.to_string()))
    }

    /// # Errors
    /// Returns an error if the document exists but cannot be decoded.
    pub async fn find_profile(&self, user_id: &str) -> Result<Option<UserProfile>, ProfileError> {
        match self.store.get_document(USERS, user_id).await? {
            Some(document) => Ok(Some(decode(USERS, user_id, document)?)),
            None => Ok(None),
        }
    }

    /// # Errors
    /// Returns an error if the store call fails.
    pub async fn profile_exists(&self, user_id: &str) -> Result<bool, ProfileError> {
        Ok(self.store.document_exists(USERS, user_id).await?)
    }

    /// # Errors
    /// Returns `NotFound` when the user has no profile document.
    pub async fn complete_onboarding(&self, user_id: &str) -> Result<(), ProfileError> {
        self.update(user_id, &[FieldUpdate::set("onboardingCompleted", true)])
            .await
    }

    /// # Errors
    /// Returns `NotFound` when the user has no profile document.
    pub async fn update_display_name(
        &self,
        user_id: &str,
        display_name: &str,
    ) -> Result<(), ProfileError> {
        self.update(user_id, &[FieldUpdate::set("displayName", display_name)])
            .await
    }

    /// Callers validate the address first.
    ///
    /// # Errors
    /// Returns `NotFound` when the user has no profile document.
    pub async fn update_email(&self, user_id: &str, email: &str) -> Result<(), ProfileError> {
        self.update(user_id, &[FieldUpdate::set("email", email)]).await
    }

    /// # Errors
    /// Returns `NotFound` when the user has no profile document.
    pub async fn update_photo_url(&self, user_id: &str, photo_url: &str) -> Result<(), ProfileError> {
        self.update(user_id, &[FieldUpdate::set("photoURL", photo_url)])
            .await
    }

    /// # Errors
    /// Returns `LimitReached` once 20 topics are followed.
    pub async fn follow_topic(&self, user_id: &str, topic_id: &str) -> Result<(), ProfileError> {
        self.add_member(user_id, FOLLOWED_TOPICS, topic_id, MAX_FOLLOWED_TOPICS)
            .await
    }

    /// # Errors
    /// Returns `NotFound` when the user has no profile document.
    pub async fn unfollow_topic(&self, user_id: &str, topic_id: &str) -> Result<(), ProfileError> {
        self.update(user_id, &[FieldUpdate::array_remove(FOLLOWED_TOPICS, topic_id)])
            .await
    }

    /// Replace the followed topics, dropping duplicates.
    ///
    /// # Errors
    /// Returns `LimitReached` when more than 20 distinct topics are given.
    pub async fn set_followed_topics(
        &self,
        user_id: &str,
        topic_ids: &[String],
    ) -> Result<(), ProfileError> {
        self.replace_members(user_id, FOLLOWED_TOPICS, topic_ids, MAX_FOLLOWED_TOPICS)
            .await
    }

    /// # Errors
    /// Returns `LimitReached` once 100 publications are followed.
    pub async fn follow_publication(
        &self,
        user_id: &str,
        publication_id: &str,
    ) -> Result<(), ProfileError> {
        self.add_member(
            user_id,
            FOLLOWED_PUBLICATIONS,
            publication_id,
            MAX_FOLLOWED_PUBLICATIONS,
        )
        .await
    }

    /// # Errors
    /// Returns `NotFound` when the user has no profile document.
    pub async fn unfollow_publication(
        &self,
        user_id: &str,
        publication_id: &str,
    ) -> Result<(), ProfileError> {
        self.update(
            user_id,
            &[FieldUpdate::array_remove(FOLLOWED_PUBLICATIONS, publication_id)],
        )
        .await
    }

    /// # Errors
    /// Returns `LimitReached` when more than 100 distinct publications are given.
    pub async fn set_followed_publications(
        &self,
        user_id: &str,
        publication_ids: &[String],
    ) -> Result<(), ProfileError> {
        self.replace_members(
            user_id,
            FOLLOWED_PUBLICATIONS,
            publication_ids,
            MAX_FOLLOWED_PUBLICATIONS,
        )
        .await
    }

    /// # Errors
    /// Returns `LimitReached` once 1000 articles are bookmarked.
    pub async fn add_bookmark(&self, user_id: &str, article_id: &str) -> Result<(), ProfileError> {
        self.add_member(user_id, BOOKMARKS, article_id, MAX_BOOKMARKS)
            .await
    }

    /// # Errors
    /// Returns `NotFound` when the user has no profile document.
    pub async fn remove_bookmark(&self, user_id: &str, article_id: &str) -> Result<(), ProfileError> {
        self.update(user_id, &[FieldUpdate::array_remove(BOOKMARKS, article_id)])
            .await
    }

    /// A missing profile has no bookmarks.
    ///
    /// # Errors
    /// Returns an error if the profile cannot be read.
    pub async fn is_bookmarked(&self, user_id: &str, article_id: &str) -> Result<bool, ProfileError> {
        Ok(self
            .find_profile(user_id)
            .await?
            .is_some_and(|profile| profile.bookmarks.iter().any(|id| id == article_id)))
    }

    /// Record progress for an article, keeping completion once reached.
    ///
    /// # Errors
    /// Returns an error if the previous record cannot be read or the write fails.
    pub async fn save_reading_progress(
        &self,
        user_id: &str,
        article_id: &str,
        progress: f64,
    ) -> Result<ReadingProgress, ProfileError> {
        let mut record = self
            .reading_progress(user_id, article_id)
            .await?
            .unwrap_or_else(|| ReadingProgress::new(article_id));
        record.update(progress);
        let collection = reading_progress_collection(user_id);
        self.store
            .set_document(&collection, article_id, encode(&record)?)
            .await?;
        Ok(record)
    }

    /// # Errors
    /// Returns an error if the stored record cannot be decoded.
    pub async fn reading_progress(
        &self,
        user_id: &str,
        article_id: &str,
    ) -> Result<Option<ReadingProgress>, ProfileError> {
        let collection = reading_progress_collection(user_id);
        match self.store.get_document(&collection, article_id).await? {
            Some(document) => Ok(Some(decode(&collection, article_id, document)?)),
            None => Ok(None),
        }
    }

    /// # Errors
    /// Returns an error if any stored record cannot be decoded.
    pub async fn all_reading_progress(
        &self,
        user_id: &str,
    ) -> Result<Vec<ReadingProgress>, ProfileError> {
        let collection = reading_progress_collection(user_id);
        let documents = self.store.list_documents(&collection, None).await?;
        let mut records = Vec::with_capacity(documents.len());
        for (id, document) in documents {
            records.push(decode(&collection, &id, document)?);
        }
        Ok(records)
    }

    /// Delete the profile and its reading progress.
    ///
    /// # Errors
    /// Returns an error if the store rejects a delete.
    #[instrument(skip(self))]
    pub async fn delete_profile(&self, user_id: &str) -> Result<(), ProfileError> {
        let collection = reading_progress_collection(user_id);
        for (id, _) in self.store.list_documents(&collection, None).await? {
            self.store.delete_document(&collection, &id).await?;
        }
        self.store.delete_document(USERS, user_id).await?;
        Ok(())
    }

    async fn update(&self, user_id: &str, updates: &[FieldUpdate]) -> Result<(), ProfileError> {
        match self.store.update_fields(USERS, user_id, updates).await {
            Err(StoreError::NotFound { .. }) => Err(ProfileError::NotFound(user_id.to_string())),
            other => Ok(other?),
        }
    }

    /// The cap is checked inside the store's atomic patch.
    async fn add_member(
        &self,
        user_id: &str,
        field: &'static str,
        member: &str,
        limit: usize,
    ) -> Result<(), ProfileError> {
        let update = FieldUpdate::capped_array_union(field, member, limit);
        match self.update(user_id, &[update]).await {
            Err(ProfileError::Store(StoreError::LimitExceeded { .. })) => {
                Err(ProfileError::LimitReached { field, limit })
            }
            other => other,
        }
    }

    async fn replace_members(
        &self,
        user_id: &str,
        field: &'static str,
        members: &[String],
        limit: usize,
    ) -> Result<(), ProfileError> {
        let mut unique: Vec<Value> = Vec::with_capacity(members.len());
        for member in members {
            let value = Value::String(member.clone());
            if !unique.contains(&value) {
                unique.push(value);
            }
        }
        if unique.len() > limit {
            return Err(ProfileError::LimitReached { field, limit });
        }
        self.update(user_id, &[FieldUpdate::set(field, Value::Array(unique))])
            .await
    }
}
