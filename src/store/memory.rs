//! In-process document store for local development and tests.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{Document, DocumentStore, FieldUpdate, StoreError, apply_updates};

type Collection = BTreeMap<String, Document>;

#[derive(Default)]
pub struct MemoryDocumentStore {
    collections: Mutex<HashMap<String, Collection>>,
    fail_next: Mutex<Option<StoreError>>,
}

impl MemoryDocumentStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next store call fail with `error`.
    pub fn fail_next(&self, error: StoreError) {
        *self
            .fail_next
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(error);
    }

    /// Number of documents currently held in `collection`.
    #[must_use]
    pub fn len(&self, collection: &str) -> usize {
        self.collections().get(collection).map_or(0, BTreeMap::len)
    }

    #[must_use]
    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }

    fn collections(&self) -> MutexGuard<'_, HashMap<String, Collection>> {
        self.collections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn begin(&self) -> Result<(), StoreError> {
        match self
            .fail_next
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

fn take(
    documents: impl Iterator<Item = (String, Document)>,
    limit: Option<usize>,
) -> Vec<(String, Document)> {
    match limit {
        Some(limit) => documents.take(limit).collect(),
        None => documents.collect(),
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get_document(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<Document>, StoreError> {
        self.begin()?;
        Ok(self
            .collections()
            .get(collection)
            .and_then(|documents| documents.get(id))
            .cloned())
    }

    async fn set_document(
        &self,
        collection: &str,
        id: &str,
        document: Document,
    ) -> Result<(), StoreError> {
        self.begin()?;
        self.collections()
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), document);
        Ok(())
    }

    async fn create_if_absent(
        &self,
        collection: &str,
        id: &str,
        document: Document,
    ) -> Result<bool, StoreError> {
        self.begin()?;
        let mut collections = self.collections();
        let documents = collections.entry(collection.to_string()).or_default();
        if documents.contains_key(id) {
            return Ok(false);
        }
        documents.insert(id.to_string(), document);
        Ok(true)
    }

    async fn update_fields(
        &self,
        collection: &str,
        id: &str,
        updates: &[FieldUpdate],
    ) -> Result<(), StoreError> {
        self.begin()?;
        let mut collections = self.collections();
        let document = collections
            .get_mut(collection)
            .and_then(|documents| documents.get_mut(id))
            .ok_or_else(|| StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            })?;
        let mut patched = document.clone();
        apply_updates(&mut patched, updates)?;
        *document = patched;
        Ok(())
    }

    async fn document_exists(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        self.begin()?;
        Ok(self
            .collections()
            .get(collection)
            .is_some_and(|documents| documents.contains_key(id)))
    }

    async fn query_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
        limit: Option<usize>,
    ) -> Result<Vec<(String, Document)>, StoreError> {
        self.begin()?;
        let collections = self.collections();
        let Some(documents) = collections.get(collection) else {
            return Ok(Vec::new());
        };
        let matches = documents
            .iter()
            .filter(|(_, document)| document.get(field) == Some(value))
            .map(|(id, document)| (id.clone(), document.clone()));
        Ok(take(matches, limit))
    }

    async fn list_documents(
        &self,
        collection: &str,
        limit: Option<usize>,
    ) -> Result<Vec<(String, Document)>, StoreError> {
        self.begin()?;
        let collections = self.collections();
        let Some(documents) = collections.get(collection) else {
            return Ok(Vec::new());
        };
        let all = documents
            .iter()
            .map(|(id, document)| (id.clone(), document.clone()));
        Ok(take(all, limit))
    }

    async fn delete_document(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        self.begin()?;
        if let Some(documents) = self.collections().get_mut(collection) {
            documents.remove(id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => Document::new(),
        }
    }

    #[tokio::test]
    async fn create_if_absent_never_overwrites() -> Result<(), StoreError> {
        let store = MemoryDocumentStore::new();
        assert!(store.create_if_absent("users", "u1", doc(json!({ "n": 1 }))).await?);
        assert!(!store.create_if_absent("users", "u1", doc(json!({ "n": 2 }))).await?);
        let stored = store.get_document("users", "u1").await?;
        assert_eq!(stored.and_then(|d| d.get("n").cloned()), Some(json!(1)));
        assert_eq!(store.len("users"), 1);
        Ok(())
    }

    #[tokio::test]
    async fn update_fields_requires_existing_document() {
        let store = MemoryDocumentStore::new();
        let result = store
            .update_fields("users", "missing", &[FieldUpdate::set("a", 1)])
            .await;
        assert!(matches!(result, Err(StoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn rejected_patch_leaves_document_untouched() -> Result<(), StoreError> {
        let store = MemoryDocumentStore::new();
        store
            .set_document("users", "u1", doc(json!({ "bookmarks": ["a1"], "n": 1 })))
            .await?;
        let result = store
            .update_fields(
                "users",
                "u1",
                &[
                    FieldUpdate::set("n", 2),
                    FieldUpdate::capped_array_union("bookmarks", "a2", 1),
                ],
            )
            .await;
        assert!(matches!(result, Err(StoreError::LimitExceeded { limit: 1, .. })));

        let stored = store.get_document("users", "u1").await?;
        assert_eq!(
            stored.map(Value::Object),
            Some(json!({ "bookmarks": ["a1"], "n": 1 }))
        );
        Ok(())
    }

    #[tokio::test]
    async fn query_by_field_filters_and_limits() -> Result<(), StoreError> {
        let store = MemoryDocumentStore::new();
        for (id, topic) in [("a1", "t1"), ("a2", "t2"), ("a3", "t1"), ("a4", "t1")] {
            store
                .set_document("articles", id, doc(json!({ "topicId": topic })))
                .await?;
        }
        let all = store
            .query_by_field("articles", "topicId", &json!("t1"), None)
            .await?;
        let ids: Vec<_> = all.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["a1", "a3", "a4"]);

        let limited = store
            .query_by_field("articles", "topicId", &json!("t1"), Some(2))
            .await?;
        assert_eq!(limited.len(), 2);

        let none = store
            .query_by_field("missing", "topicId", &json!("t1"), None)
            .await?;
        assert!(none.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn delete_is_idempotent() -> Result<(), StoreError> {
        let store = MemoryDocumentStore::new();
        store.set_document("users", "u1", Document::new()).await?;
        store.delete_document("users", "u1").await?;
        store.delete_document("users", "u1").await?;
        assert!(!store.document_exists("users", "u1").await?);
        Ok(())
    }

    #[tokio::test]
    async fn injected_failure_fires_once() -> Result<(), StoreError> {
        let store = MemoryDocumentStore::new();
        store.fail_next(StoreError::Unavailable("offline".to_string()));
        assert_eq!(
            store.document_exists("users", "u1").await,
            Err(StoreError::Unavailable("offline".to_string()))
        );
        assert!(!store.document_exists("users", "u1").await?);
        Ok(())
    }
}
