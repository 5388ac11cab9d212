use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    error::AppResult,
    middleware::RequestId,
    models::{Page, Pagination, Recommendation, SortOptions},
    routes::AppState,
};

pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(pagination): Query<Pagination>,
    Query(sort): Query<SortOptions>,
) -> AppResult<Json<Page<Recommendation>>> {
    let page = state.store.list(pagination, sort).await?;
    Ok(Json(page))
}

pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Recommendation>> {
    let recommendation = state.store.get(id).await?;
    Ok(Json(recommendation))
}

/// Recommendations sent to one user
pub async fn list_for_user(
    State(state): State<Arc<AppState>>,
    Extension(request_id): Extension<RequestId>,
    Path(user_id): Path<Uuid>,
    Query(pagination): Query<Pagination>,
    Query(sort): Query<SortOptions>,
) -> AppResult<Json<Page<Recommendation>>> {
    let page = state.store.list_by_user(user_id, pagination, sort).await?;

    tracing::debug!(
        request_id = %request_id,
        user_id = %user_id,
        total = page.total,
        "Listed user recommendations"
    );

    Ok(Json(page))
}
