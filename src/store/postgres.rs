//! JSONB document table on Postgres.
//!
//! Every collection shares one table (`sql/schema.sql`); a document is the
//! `body` column of the row keyed by `(collection, id)`.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgPoolOptions, types::Json};
use std::time::Duration;
use tracing::{Instrument, warn};

use super::{Document, DocumentStore, FieldUpdate, StoreError, apply_updates};

pub const SCHEMA: &str = include_str!("../../sql/schema.sql");

#[derive(Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect with the pool settings used by the server.
    ///
    /// # Errors
    /// Returns `StoreError::Unavailable` if the database cannot be reached.
    pub async fn connect(dsn: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .min_connections(1)
            .max_connections(5)
            .max_lifetime(Duration::from_secs(60 * 2))
            .test_before_acquire(true)
            .connect(dsn)
            .await
            .map_err(map_sqlx_error)?;
        Ok(Self::new(pool))
    }

    /// Create the documents table if it does not exist.
    ///
    /// # Errors
    /// Returns an error if the schema statements fail.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "CREATE",
            db.statement = SCHEMA
        );
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .instrument(span)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

pub(crate) fn map_sqlx_error(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => StoreError::Unavailable(err.to_string()),
        other => StoreError::Backend(other.to_string()),
    }
}

fn body_of(collection: &str, id: &str, value: Value) -> Result<Document, StoreError> {
    match value {
        Value::Object(document) => Ok(document),
        other => Err(StoreError::Decoding {
            collection: collection.to_string(),
            id: id.to_string(),
            reason: format!("expected object body, found {other}"),
        }),
    }
}

fn rows_to_documents(
    collection: &str,
    rows: Vec<sqlx::postgres::PgRow>,
) -> Result<Vec<(String, Document)>, StoreError> {
    rows.into_iter()
        .map(|row| {
            let id: String = row.try_get("id").map_err(map_sqlx_error)?;
            let Json(body): Json<Value> = row.try_get("body").map_err(map_sqlx_error)?;
            let document = body_of(collection, &id, body)?;
            Ok((id, document))
        })
        .collect()
}

async fn rollback(tx: Transaction<'_, Postgres>, collection: &str, id: &str) {
    if let Err(err) = tx.rollback().await {
        warn!(collection, id, "Failed to roll back document update: {err}");
    }
}

fn limit_param(limit: Option<usize>) -> Option<i64> {
    limit.map(|limit| i64::try_from(limit).unwrap_or(i64::MAX))
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn get_document(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<Document>, StoreError> {
        let query = "SELECT body FROM documents WHERE collection = $1 AND id = $2";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(collection)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .map_err(map_sqlx_error)?;

        row.map(|row| {
            let Json(body): Json<Value> = row.try_get("body").map_err(map_sqlx_error)?;
            body_of(collection, id, body)
        })
        .transpose()
    }

    async fn set_document(
        &self,
        collection: &str,
        id: &str,
        document: Document,
    ) -> Result<(), StoreError> {
        let query = r"
            INSERT INTO documents (collection, id, body)
            VALUES ($1, $2, $3)
            ON CONFLICT (collection, id)
            DO UPDATE SET body = EXCLUDED.body, updated_at = NOW()
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(collection)
            .bind(id)
            .bind(Json(Value::Object(document)))
            .execute(&self.pool)
            .instrument(span)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn create_if_absent(
        &self,
        collection: &str,
        id: &str,
        document: Document,
    ) -> Result<bool, StoreError> {
        let query = r"
            INSERT INTO documents (collection, id, body)
            VALUES ($1, $2, $3)
            ON CONFLICT (collection, id) DO NOTHING
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(collection)
            .bind(id)
            .bind(Json(Value::Object(document)))
            .execute(&self.pool)
            .instrument(span)
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() == 1)
    }

    async fn update_fields(
        &self,
        collection: &str,
        id: &str,
        updates: &[FieldUpdate],
    ) -> Result<(), StoreError> {
        // Row lock keeps concurrent array unions from losing writes.
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let query = "SELECT body FROM documents WHERE collection = $1 AND id = $2 FOR UPDATE";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(collection)
            .bind(id)
            .fetch_optional(&mut *tx)
            .instrument(span)
            .await
            .map_err(map_sqlx_error)?;

        let Some(row) = row else {
            rollback(tx, collection, id).await;
            return Err(StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        };
        let Json(body): Json<Value> = row.try_get("body").map_err(map_sqlx_error)?;
        let mut document = body_of(collection, id, body)?;
        if let Err(err) = apply_updates(&mut document, updates) {
            rollback(tx, collection, id).await;
            return Err(err);
        }

        let query = r"
            UPDATE documents
            SET body = $3, updated_at = NOW()
            WHERE collection = $1 AND id = $2
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(collection)
            .bind(id)
            .bind(Json(Value::Object(document)))
            .execute(&mut *tx)
            .instrument(span)
            .await
            .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn document_exists(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        let query =
            "SELECT EXISTS(SELECT 1 FROM documents WHERE collection = $1 AND id = $2) AS found";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(collection)
            .bind(id)
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .map_err(map_sqlx_error)?;
        row.try_get("found").map_err(map_sqlx_error)
    }

    async fn query_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
        limit: Option<usize>,
    ) -> Result<Vec<(String, Document)>, StoreError> {
        let query = r"
            SELECT id, body FROM documents
            WHERE collection = $1 AND body -> $2 = $3
            ORDER BY id
            LIMIT $4
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let rows = sqlx::query(query)
            .bind(collection)
            .bind(field)
            .bind(Json(value))
            .bind(limit_param(limit))
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .map_err(map_sqlx_error)?;
        rows_to_documents(collection, rows)
    }

    async fn list_documents(
        &self,
        collection: &str,
        limit: Option<usize>,
    ) -> Result<Vec<(String, Document)>, StoreError> {
        let query = "SELECT id, body FROM documents WHERE collection = $1 ORDER BY id LIMIT $2";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let rows = sqlx::query(query)
            .bind(collection)
            .bind(limit_param(limit))
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .map_err(map_sqlx_error)?;
        rows_to_documents(collection, rows)
    }

    async fn delete_document(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        let query = "DELETE FROM documents WHERE collection = $1 AND id = $2";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(collection)
            .bind(id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }
}
