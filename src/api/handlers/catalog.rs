//! Read-only catalog endpoints. No session required.

use axum::{
    Json,
    extract::{Extension, Path, Query},
};
use serde::Deserialize;
use utoipa::IntoParams;

use crate::api::error::{ApiError, ErrorBody};
use crate::catalog::{Article, CatalogService, Publication, Topic};

pub const MAX_PAGE_SIZE: usize = 100;

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct Page {
    /// Maximum number of entries, 20 when omitted, capped at 100.
    pub limit: Option<usize>,
}

impl Page {
    fn limit(&self) -> Option<usize> {
        self.limit.map(|limit| limit.clamp(1, MAX_PAGE_SIZE))
    }
}

#[utoipa::path(
    get,
    path = "/v1/topics",
    responses(
        (status = 200, description = "All topics in display order", body = [Topic]),
        (status = 502, description = "A stored topic could not be decoded", body = ErrorBody),
    ),
    tag = "catalog"
)]
pub async fn list_topics(
    catalog: Extension<CatalogService>,
) -> Result<Json<Vec<Topic>>, ApiError> {
    Ok(Json(catalog.topics().await?))
}

#[utoipa::path(
    get,
    path = "/v1/topics/{id}/articles",
    params(("id" = String, Path, description = "Topic id"), Page),
    responses(
        (status = 200, description = "Articles filed under the topic", body = [Article]),
    ),
    tag = "catalog"
)]
pub async fn topic_articles(
    catalog: Extension<CatalogService>,
    Path(id): Path<String>,
    Query(page): Query<Page>,
) -> Result<Json<Vec<Article>>, ApiError> {
    Ok(Json(catalog.articles_for_topic(&id, page.limit()).await?))
}

#[utoipa::path(
    get,
    path = "/v1/topics/{id}/publications",
    params(("id" = String, Path, description = "Topic id"), Page),
    responses(
        (status = 200, description = "Publications filed under the topic", body = [Publication]),
    ),
    tag = "catalog"
)]
pub async fn topic_publications(
    catalog: Extension<CatalogService>,
    Path(id): Path<String>,
    Query(page): Query<Page>,
) -> Result<Json<Vec<Publication>>, ApiError> {
    Ok(Json(
        catalog.publications_for_topic(&id, page.limit()).await?,
    ))
}

#[utoipa::path(
    get,
    path = "/v1/publications/{id}/articles",
    params(("id" = String, Path, description = "Publication id"), Page),
    responses(
        (status = 200, description = "Articles from the publication", body = [Article]),
    ),
    tag = "catalog"
)]
pub async fn publication_articles(
    catalog: Extension<CatalogService>,
    Path(id): Path<String>,
    Query(page): Query<Page>,
) -> Result<Json<Vec<Article>>, ApiError> {
    Ok(Json(
        catalog
            .articles_for_publication(&id, page.limit())
            .await?,
    ))
}

#[utoipa::path(
    get,
    path = "/v1/articles/{id}",
    params(("id" = String, Path, description = "Article id")),
    responses(
        (status = 200, description = "Article", body = Article),
        (status = 404, description = "Unknown article", body = ErrorBody),
    ),
    tag = "catalog"
)]
pub async fn get_article(
    catalog: Extension<CatalogService>,
    Path(id): Path<String>,
) -> Result<Json<Article>, ApiError> {
    catalog
        .article(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("article {id}")))
}
