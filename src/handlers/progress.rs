// src/handlers/progress.rs

use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;

use crate::{
    error::AppError,
    models::{
        learner::LearnerId,
        playbook::StepType,
        progress::{CustomPageResult, ProgressRecord, StepResult, TimeRecord},
        response::ApiResponse,
    },
    services::ProgressEngine,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartProgressRequest {
    pub user_id: Option<String>,
    pub user_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStepRequest {
    pub user_id: Option<String>,
    pub result: Option<StepResult>,
    /// Seconds to add to the learner's total.
    pub time_spent: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomPageProgressRequest {
    pub user_id: Option<String>,
    pub progress_data: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoToStepRequest {
    pub user_id: Option<String>,
    pub step_number: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearnerRequest {
    pub user_id: Option<String>,
}

fn non_negative_seconds(raw: Option<i64>) -> Result<Option<u64>, AppError> {
    match raw {
        Some(s) if s < 0 => Err(AppError::BadRequest(
            "timeSpent must not be negative".to_string(),
        )),
        Some(s) => Ok(Some(s as u64)),
        None => Ok(None),
    }
}

/// Seconds reported by a custom page. Pages send fractional values, which
/// are rounded; anything non-positive is ignored.
fn reported_seconds(value: &Value) -> Option<u64> {
    value
        .as_f64()
        .filter(|s| s.is_finite() && *s > 0.0)
        .map(|s| s.round() as u64)
        .filter(|s| *s > 0)
}

/// Rejects a result whose type does not match the step it is submitted for.
async fn check_result_type(
    engine: &ProgressEngine,
    playbook_id: &str,
    step_number: u32,
    submitted: StepType,
) -> Result<(), AppError> {
    if let Some(step) = engine.step_definition(playbook_id, step_number).await? {
        if step.step_type != submitted {
            return Err(AppError::BadRequest(format!(
                "Step {} is a {} step, got a {} result",
                step_number,
                step.step_type.as_str(),
                submitted.as_str()
            )));
        }
    }
    Ok(())
}

/// Starts (or resumes) a learner's run through a PlayBook.
pub async fn get_or_create_progress(
    State(engine): State<ProgressEngine>,
    Path(playbook_id): Path<String>,
    Json(payload): Json<StartProgressRequest>,
) -> Result<impl IntoResponse, AppError> {
    let learner = LearnerId::require(payload.user_id.as_deref())?;
    let record = engine
        .create_or_get(&playbook_id, &learner, payload.user_name.as_deref())
        .await?;
    Ok(Json(ApiResponse::ok(record)))
}

/// Completes a step, optionally attaching its result and time spent.
pub async fn update_step_progress(
    State(engine): State<ProgressEngine>,
    Path((playbook_id, step_number)): Path<(String, u32)>,
    Json(payload): Json<UpdateStepRequest>,
) -> Result<impl IntoResponse, AppError> {
    let learner = LearnerId::require(payload.user_id.as_deref())?;
    let time_spent = non_negative_seconds(payload.time_spent)?;

    if let Some(result) = &payload.result {
        check_result_type(&engine, &playbook_id, step_number, result.step_type()).await?;
    }

    let completion = engine
        .complete_step(
            &playbook_id,
            &learner,
            step_number,
            payload.result,
            time_spent,
        )
        .await?;

    let response = ApiResponse::ok(completion.record);
    Ok(Json(if completion.newly_completed {
        response.with_message("PlayBook completed")
    } else {
        response
    }))
}

/// Saves custom page state. Completes the step only when the page reports
/// `completed: true`; otherwise the data is stored as work in progress.
pub async fn update_custom_page_progress(
    State(engine): State<ProgressEngine>,
    Path((playbook_id, step_number)): Path<(String, u32)>,
    Json(payload): Json<CustomPageProgressRequest>,
) -> Result<impl IntoResponse, AppError> {
    let learner = LearnerId::require(payload.user_id.as_deref())?;
    check_result_type(&engine, &playbook_id, step_number, StepType::CustomPage).await?;

    let data = match payload.progress_data {
        Some(Value::Object(map)) => Value::Object(map),
        Some(Value::Null) | None => Value::Object(Default::default()),
        Some(_) => {
            return Err(AppError::BadRequest(
                "progressData must be an object".to_string(),
            ));
        }
    };

    let completed = data.get("completed").and_then(Value::as_bool) == Some(true);
    let time_spent = data.get("timeSpent").and_then(reported_seconds);
    let text = |key: &str| data.get(key).and_then(Value::as_str).map(str::to_string);
    let now = Utc::now();

    let result = StepResult::CustomPage(CustomPageResult {
        custom_page_id: text("customPageId"),
        custom_page_title: text("title"),
        completed,
        completed_at: completed.then_some(now),
        updated_at: Some(now),
        time_record: TimeRecord {
            time_spent: time_spent.unwrap_or(0),
            ..Default::default()
        },
        data: data.clone(),
    });

    let record = if completed {
        engine
            .complete_step(&playbook_id, &learner, step_number, Some(result), time_spent)
            .await?
            .record
    } else {
        engine
            .record_step_result(&playbook_id, &learner, step_number, result)
            .await?
    };

    Ok(Json(ApiResponse::ok(record)))
}

/// Moves the learner's pointer, e.g. back to review an earlier step.
pub async fn go_to_step(
    State(engine): State<ProgressEngine>,
    Path(playbook_id): Path<String>,
    Json(payload): Json<GoToStepRequest>,
) -> Result<impl IntoResponse, AppError> {
    let learner = LearnerId::require(payload.user_id.as_deref())?;
    let record = engine
        .go_to_step(&playbook_id, &learner, payload.step_number)
        .await?;
    Ok(Json(ApiResponse::ok(record)))
}

/// Resets the learner's run. Resetting a run that never started succeeds
/// with `data: null`.
pub async fn reset_progress(
    State(engine): State<ProgressEngine>,
    Path(playbook_id): Path<String>,
    Json(payload): Json<LearnerRequest>,
) -> Result<impl IntoResponse, AppError> {
    let learner = LearnerId::require(payload.user_id.as_deref())?;

    let record: Option<ProgressRecord> = match engine.reset(&playbook_id, &learner).await {
        Ok(record) => Some(record),
        Err(AppError::NotFound(_)) => None,
        Err(e) => return Err(e),
    };

    Ok(Json(ApiResponse::ok(record).with_message("Progress reset")))
}
