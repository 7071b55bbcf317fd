//! Category CRUD endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use std::sync::Arc;

use super::types::{CreateCategoryRequest, UpdateCategoryRequest};
use super::AppState;
use crate::categories::Category;
use crate::error::{ApiError, ApiResult};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/categories", get(list_categories).post(create_category))
        .route(
            "/categories/:id",
            get(get_category)
                .put(update_category)
                .delete(delete_category),
        )
}

/// GET /v1/categories
async fn list_categories(State(state): State<Arc<AppState>>) -> Json<Vec<Category>> {
    Json(state.categories.list().await)
}

/// POST /v1/categories
async fn create_category(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateCategoryRequest>,
) -> ApiResult<(StatusCode, Json<Category>)> {
    let category = state.categories.create(req.into()).await?;
    Ok((StatusCode::CREATED, Json(category)))
}

/// GET /v1/categories/{id}
async fn get_category(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Category>> {
    state
        .categories
        .get(&id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Category not found"))
}

/// PUT /v1/categories/{id}
async fn update_category(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<UpdateCategoryRequest>,
) -> ApiResult<Json<Category>> {
    let category = state.categories.update(&id, req.into()).await?;
    Ok(Json(category))
}

/// DELETE /v1/categories/{id}
async fn delete_category(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    if state.categories.delete(&id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found("Category not found"))
    }
}
