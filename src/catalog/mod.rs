//! Read-only browsing of topics, publications and articles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::store::{Document, DocumentStore, StoreError, decode};

pub const TOPICS: &str = "topics";
pub const PUBLICATIONS: &str = "publications";
pub const ARTICLES: &str = "articles";

pub const ARTICLES_PER_PAGE: usize = 20;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Topic {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub description: String,
    pub icon_name: String,
    pub color: String,
    pub order: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Publication {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub description: String,
    #[serde(rename = "avatarURL")]
    pub avatar_url: String,
    #[serde(rename = "blogURL")]
    pub blog_url: String,
    pub topic_id: String,
    pub topics: Vec<String>,
    #[serde(default)]
    pub follower_count: i64,
    #[serde(default)]
    pub article_count: i64,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    pub id: String,
    pub title: String,
    pub slug: String,
    pub featured_quote: String,
    /// Markdown body.
    pub content: String,
    pub author_name: String,
    #[serde(rename = "authorAvatarURL", default)]
    pub author_avatar_url: Option<String>,
    #[serde(default = "Utc::now")]
    pub published_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub original_publish_date: DateTime<Utc>,
    pub read_time_minutes: i64,
    #[serde(rename = "coverImageURL", default)]
    pub cover_image_url: Option<String>,
    pub publication_id: String,
    pub topic_id: String,
    #[serde(default)]
    pub recommend_count: i64,
}

impl Article {
    #[must_use]
    pub fn read_time_text(&self) -> String {
        format!("{} min read", self.read_time_minutes)
    }
}

#[derive(Clone)]
pub struct CatalogService {
    store: Arc<dyn DocumentStore>,
}

fn decode_all<T: DeserializeOwned>(
    collection: &str,
    documents: Vec<(String, Document)>,
) -> Result<Vec<T>, StoreError> {
    documents
        .into_iter()
        .map(|(id, document)| decode(collection, &id, document))
        .collect()
}

impl CatalogService {
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// All topics ordered by their `order` field.
    ///
    /// # Errors
    /// Fails if any topic document cannot be decoded.
    pub async fn topics(&self) -> Result<Vec<Topic>, StoreError> {
        let documents = self.store.list_documents(TOPICS, None).await?;
        let mut topics: Vec<Topic> = decode_all(TOPICS, documents)?;
        topics.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.id.cmp(&b.id)));
        Ok(topics)
    }

    /// # Errors
    /// Fails if the topic document cannot be decoded.
    pub async fn topic(&self, id: &str) -> Result<Option<Topic>, StoreError> {
        self.find(TOPICS, id).await
    }

    /// # Errors
    /// Fails if any matching document cannot be decoded.
    pub async fn publications_for_topic(
        &self,
        topic_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Publication>, StoreError> {
        self.query(PUBLICATIONS, "topicId", topic_id, limit).await
    }

    /// # Errors
    /// Fails if any matching document cannot be decoded.
    pub async fn articles_for_topic(
        &self,
        topic_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Article>, StoreError> {
        self.query(ARTICLES, "topicId", topic_id, limit).await
    }

    /// # Errors
    /// Fails if any matching document cannot be decoded.
    pub async fn articles_for_publication(
        &self,
        publication_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Article>, StoreError> {
        self.query(ARTICLES, "publicationId", publication_id, limit)
            .await
    }

    /// # Errors
    /// Fails if the article document cannot be decoded.
    pub async fn article(&self, id: &str) -> Result<Option<Article>, StoreError> {
        self.find(ARTICLES, id).await
    }

    async fn find<T: DeserializeOwned>(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<T>, StoreError> {
        self.store
            .get_document(collection, id)
            .await?
            .map(|document| decode(collection, id, document))
            .transpose()
    }

    async fn query<T: DeserializeOwned>(
        &self,
        collection: &str,
        field: &str,
        value: &str,
        limit: Option<usize>,
    ) -> Result<Vec<T>, StoreError> {
        let limit = limit.unwrap_or(ARTICLES_PER_PAGE);
        let documents = self
            .store
            .query_by_field(
                collection,
                field,
                &Value::String(value.to_string()),
                Some(limit),
            )
            .await?;
        decode_all(collection, documents)
    }
}
