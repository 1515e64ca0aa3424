//! Document store boundary.
//!
//! Records are JSON objects addressed by `(collection, id)`. Collections are
//! plain strings, so nested collections are written as paths such as
//! `users/{uid}/readingProgress`. Typed records are decoded at this boundary;
//! a document that does not match its schema is an error, never skipped.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use thiserror::Error;

pub type Document = Map<String, Value>;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("document {collection}/{id} not found")]
    NotFound { collection: String, id: String },
    #[error("failed to decode {collection}/{id}: {reason}")]
    Decoding {
        collection: String,
        id: String,
        reason: String,
    },
    #[error("document store unavailable: {0}")]
    Unavailable(String),
    #[error("document store error: {0}")]
    Backend(String),
    #[error("{field} is limited to {limit} entries")]
    LimitExceeded { field: String, limit: usize },
}

/// Field-level patch operation.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldOp {
    Set(Value),
    /// Append values not already present, keeping order.
    ArrayUnion(Vec<Value>),
    /// Like `ArrayUnion`, but the array may not grow past `max_len`.
    CappedArrayUnion { values: Vec<Value>, max_len: usize },
    /// Remove every occurrence of the given values.
    ArrayRemove(Vec<Value>),
    Delete,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FieldUpdate {
    pub field: String,
    pub op: FieldOp,
}

impl FieldUpdate {
    pub fn set(field: &str, value: impl Into<Value>) -> Self {
        Self {
            field: field.to_string(),
            op: FieldOp::Set(value.into()),
        }
    }

    pub fn array_union(field: &str, value: impl Into<Value>) -> Self {
        Self {
            field: field.to_string(),
            op: FieldOp::ArrayUnion(vec![value.into()]),
        }
    }

    pub fn capped_array_union(field: &str, value: impl Into<Value>, max_len: usize) -> Self {
        Self {
            field: field.to_string(),
            op: FieldOp::CappedArrayUnion {
                values: vec![value.into()],
                max_len,
            },
        }
    }

    pub fn array_remove(field: &str, value: impl Into<Value>) -> Self {
        Self {
            field: field.to_string(),
            op: FieldOp::ArrayRemove(vec![value.into()]),
        }
    }

    #[must_use]
    pub fn delete(field: &str) -> Self {
        Self {
            field: field.to_string(),
            op: FieldOp::Delete,
        }
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get_document(&self, collection: &str, id: &str)
    -> Result<Option<Document>, StoreError>;

    /// Full replace, creating the document if needed.
    async fn set_document(
        &self,
        collection: &str,
        id: &str,
        document: Document,
    ) -> Result<(), StoreError>;

    /// Atomically create the document unless one already exists.
    ///
    /// Returns `true` when this call created it.
    async fn create_if_absent(
        &self,
        collection: &str,
        id: &str,
        document: Document,
    ) -> Result<bool, StoreError>;

    /// Patch fields of an existing document; fails with `NotFound` otherwise.
    ///
    /// The patch applies as a whole or not at all; a capped union that would
    /// overflow fails with `LimitExceeded` and leaves the document untouched.
    async fn update_fields(
        &self,
        collection: &str,
        id: &str,
        updates: &[FieldUpdate],
    ) -> Result<(), StoreError>;

    async fn document_exists(&self, collection: &str, id: &str) -> Result<bool, StoreError>;

    /// Documents whose `field` equals `value`, ordered by id.
    async fn query_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
        limit: Option<usize>,
    ) -> Result<Vec<(String, Document)>, StoreError>;

    /// Every document in a collection, ordered by id.
    async fn list_documents(
        &self,
        collection: &str,
        limit: Option<usize>,
    ) -> Result<Vec<(String, Document)>, StoreError>;

    /// Delete a document; deleting a missing document is not an error.
    async fn delete_document(&self, collection: &str, id: &str) -> Result<(), StoreError>;
}

/// Apply field updates in order to an in-memory document.
///
/// On error the document may be partially patched; stores apply to a copy.
pub(crate) fn apply_updates(
    document: &mut Document,
    updates: &[FieldUpdate],
) -> Result<(), StoreError> {
    for update in updates {
        match &update.op {
            FieldOp::Set(value) => {
                document.insert(update.field.clone(), value.clone());
            }
            FieldOp::Delete => {
                document.remove(&update.field);
            }
            FieldOp::ArrayUnion(values) => {
                union_field(document, &update.field, values, None)?;
            }
            FieldOp::CappedArrayUnion { values, max_len } => {
                union_field(document, &update.field, values, Some(*max_len))?;
            }
            FieldOp::ArrayRemove(values) => {
                if let Some(Value::Array(items)) = document.get_mut(&update.field) {
                    items.retain(|item| !values.contains(item));
                } else {
                    document.insert(update.field.clone(), Value::Array(Vec::new()));
                }
            }
        }
    }
    Ok(())
}

fn union_field(
    document: &mut Document,
    field: &str,
    values: &[Value],
    max_len: Option<usize>,
) -> Result<(), StoreError> {
    let mut items = match document.remove(field) {
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    };
    for value in values {
        if !items.contains(value) {
            items.push(value.clone());
        }
    }
    let overflow = max_len.filter(|max_len| items.len() > *max_len);
    document.insert(field.to_string(), Value::Array(items));
    match overflow {
        Some(limit) => Err(StoreError::LimitExceeded {
            field: field.to_string(),
            limit,
        }),
        None => Ok(()),
    }
}

/// Decode a stored document into a schema struct.
///
/// The document id is injected as `id` so records can carry it.
///
/// # Errors
/// Returns `StoreError::Decoding` when required fields are missing or mistyped.
pub fn decode<T: DeserializeOwned>(
    collection: &str,
    id: &str,
    mut document: Document,
) -> Result<T, StoreError> {
    document
        .entry("id".to_string())
        .or_insert_with(|| Value::String(id.to_string()));
    serde_json::from_value(Value::Object(document)).map_err(|err| StoreError::Decoding {
        collection: collection.to_string(),
        id: id.to_string(),
        reason: err.to_string(),
    })
}

/// Encode a schema struct into a document, dropping its `id` field.
///
/// # Errors
/// Returns `StoreError::Backend` when the record does not serialize to an object.
pub fn encode<T: Serialize>(record: &T) -> Result<Document, StoreError> {
    match serde_json::to_value(record) {
        Ok(Value::Object(mut document)) => {
            document.remove("id");
            Ok(document)
        }
        Ok(_) => Err(StoreError::Backend(
            "record did not serialize to an object".to_string(),
        )),
        Err(err) => Err(StoreError::Backend(err.to_string())),
    }
}
