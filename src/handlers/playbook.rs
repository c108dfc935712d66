// src/handlers/playbook.rs

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use validator::Validate;

use crate::{
    error::AppError,
    models::{
        catalog::{PlayBookQuery, PublicPlayBookQuery},
        playbook::{CreatePlayBookRequest, PlayBook, UpdatePlayBookRequest},
        response::ApiResponse,
    },
    services::catalog,
    state::AppState,
};

/// Creates a PlayBook definition.
/// Admin only.
pub async fn create_playbook(
    State(state): State<AppState>,
    Json(payload): Json<CreatePlayBookRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let playbook = PlayBook::from_request(payload, Utc::now());
    let created = state.playbooks.create(&playbook).await?;

    tracing::info!(
        "Created playbook {} ({}, {} steps)",
        created.id,
        created.slug,
        created.total_steps()
    );
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(created))))
}

/// Lists PlayBooks of any status with search, filters, sorting and paging.
/// Admin only.
pub async fn list_playbooks(
    State(state): State<AppState>,
    Query(query): Query<PlayBookQuery>,
) -> Result<impl IntoResponse, AppError> {
    let playbooks = state.playbooks.list().await?;
    Ok(Json(catalog::admin_page(playbooks, &query)))
}

/// Admin only.
pub async fn get_playbook(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let playbook = state
        .playbooks
        .get(&id)
        .await?
        .ok_or_else(|| AppError::NotFound("PlayBook not found".to_string()))?;
    Ok(Json(ApiResponse::ok(playbook)))
}

/// Partially updates a PlayBook. The slug cannot be changed.
///
/// Learners already under way keep the step count they started with.
/// Admin only.
pub async fn update_playbook(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<UpdatePlayBookRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let playbook = state
        .playbooks
        .get(&id)
        .await?
        .ok_or_else(|| AppError::NotFound("PlayBook not found".to_string()))?;

    let updated = state
        .playbooks
        .update(&playbook.apply_update(payload, Utc::now()))
        .await?;

    tracing::info!(
        "Updated playbook {} ({}, {} steps)",
        updated.id,
        updated.status.as_str(),
        updated.total_steps()
    );
    Ok(Json(ApiResponse::ok(updated).with_message("PlayBook updated")))
}

/// Deletes a draft PlayBook together with all of its progress records.
/// Published PlayBooks are refused.
/// Admin only.
pub async fn delete_playbook(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let playbook = state
        .playbooks
        .get(&id)
        .await?
        .ok_or_else(|| AppError::NotFound("PlayBook not found".to_string()))?;

    if playbook.is_published() {
        return Err(AppError::BadRequest(
            "Published PlayBooks cannot be deleted".to_string(),
        ));
    }

    if !state.playbooks.delete(&id).await? {
        return Err(AppError::NotFound("PlayBook not found".to_string()));
    }
    let removed = state.progress.delete_by_playbook(&id).await?;

    tracing::info!("Deleted playbook {} and {} progress records", id, removed);
    Ok(Json(
        ApiResponse::ok(serde_json::json!({ "id": id, "removedProgress": removed }))
            .with_message("PlayBook deleted"),
    ))
}

/// Published PlayBooks without their steps, newest publication first.
pub async fn list_public_playbooks(
    State(state): State<AppState>,
    Query(query): Query<PublicPlayBookQuery>,
) -> Result<impl IntoResponse, AppError> {
    let playbooks = state.playbooks.list().await?;
    Ok(Json(catalog::public_page(playbooks, &query)))
}

/// Categories in use by published PlayBooks.
pub async fn list_categories(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let playbooks = state.playbooks.list().await?;
    Ok(Json(ApiResponse::ok(catalog::categories(&playbooks))))
}

/// Published definition by slug, for the learner-facing player.
/// Each call counts as one view.
pub async fn get_public_playbook(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let mut playbook = state
        .playbooks
        .get_by_slug(&slug)
        .await?
        .filter(PlayBook::is_published)
        .ok_or_else(|| AppError::NotFound("PlayBook not found".to_string()))?;

    state.playbooks.increment_view_count(&playbook.id).await?;
    playbook.view_count += 1;

    Ok(Json(ApiResponse::ok(playbook)))
}
