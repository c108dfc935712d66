// src/handlers/stats.rs

use axum::{
    Json,
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::Deserialize;

use crate::{
    error::AppError,
    models::{response::ApiResponse, stats::StatsResponse},
    services::export::{self, ExportFormat},
    state::AppState,
};

/// Overview and per-step completion counts.
/// Admin only.
pub async fn get_playbook_stats(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    if state.playbooks.get(&id).await?.is_none() {
        return Err(AppError::NotFound("PlayBook not found".to_string()));
    }

    let stats = state.stats();
    let overview = stats.get_playbook_stats(&id).await?;
    let step_stats = stats.get_step_stats(&id).await?;

    Ok(Json(ApiResponse::ok(StatsResponse {
        overview,
        step_stats,
    })))
}

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    #[serde(default)]
    pub format: ExportFormat,
}

/// Per-learner results as an attachment, JSON by default or `?format=csv`.
/// Admin only.
pub async fn download_results(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response, AppError> {
    let playbook = state
        .playbooks
        .get(&id)
        .await?
        .ok_or_else(|| AppError::NotFound("PlayBook not found".to_string()))?;

    let user_results = state.stats().get_playbook_user_results(&id).await?;
    let document = export::build_document(&playbook, user_results, Utc::now());

    let body = match query.format {
        ExportFormat::Json => serde_json::to_string_pretty(&document)?,
        ExportFormat::Csv => export::to_csv(&document),
    };
    let disposition = format!(
        "attachment; filename=\"{}\"",
        export::file_name(&playbook.slug, query.format)
    );

    tracing::info!(
        "Exported {} results of playbook {} as {}",
        document.user_results.len(),
        id,
        query.format.extension()
    );

    Ok((
        [
            (header::CONTENT_TYPE, query.format.content_type().to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}
