// src/store/postgres.rs

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{FromRow, PgPool, types::Json};
use uuid::Uuid;

use crate::{
    error::AppError,
    models::{
        learner::LearnerId,
        playbook::{Difficulty, DisplayType, PlayBook, PlayBookStatus, Step},
        progress::{ProgressRecord, StepResult},
        user::User,
    },
    store::{PlayBookStore, ProgressStore, UserStore},
};

const PROGRESS_COLUMNS: &str = "id, playbook_id, user_id, user_name, current_step, \
    completed_steps, step_results, total_steps, time_spent, started_at, last_active_at, \
    completed_at, is_completed, completion_rate, version, created_at, updated_at";

const PLAYBOOK_COLUMNS: &str = "id, title, slug, description, category, difficulty, \
    display_type, tags, status, steps, estimated_time, view_count, completion_count, \
    created_at, updated_at, published_at";

// Postgres error codes.
const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";

/// PostgreSQL backend for every port.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn db_error_code(err: &sqlx::Error) -> Option<String> {
    err.as_database_error()
        .and_then(|e| e.code())
        .map(|c| c.into_owned())
}

fn to_i32(value: u32, field: &str) -> Result<i32, AppError> {
    i32::try_from(value)
        .map_err(|_| AppError::BadRequest(format!("{} is out of range", field)))
}

fn to_i64(value: u64, field: &str) -> Result<i64, AppError> {
    i64::try_from(value)
        .map_err(|_| AppError::BadRequest(format!("{} is out of range", field)))
}

/// Raw 'playbook_progress' row. JSON columns stay untyped so that legacy
/// rows can be repaired instead of failing to decode.
#[derive(Debug, FromRow)]
struct ProgressRow {
    id: Uuid,
    playbook_id: String,
    user_id: String,
    user_name: String,
    current_step: i32,
    completed_steps: Option<Json<Value>>,
    step_results: Option<Json<Value>>,
    total_steps: i32,
    time_spent: i64,
    started_at: DateTime<Utc>,
    last_active_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    is_completed: bool,
    completion_rate: i32,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Returns the valid step numbers and whether anything had to be dropped.
fn decode_completed_steps(raw: Option<Value>) -> (Vec<u32>, bool) {
    let Some(Value::Array(items)) = raw else {
        return (Vec::new(), true);
    };

    let total = items.len();
    let steps: Vec<u32> = items
        .iter()
        .filter_map(|v| v.as_u64())
        .filter_map(|n| u32::try_from(n).ok())
        .collect();
    let repaired = steps.len() != total;
    (steps, repaired)
}

fn decode_step_results(raw: Option<Value>, record_id: Uuid) -> (BTreeMap<u32, StepResult>, bool) {
    let Some(Value::Object(entries)) = raw else {
        return (BTreeMap::new(), true);
    };

    let mut repaired = false;
    let mut results = BTreeMap::new();
    for (key, value) in entries {
        let step = key.parse::<u32>().ok();
        let parsed = serde_json::from_value::<StepResult>(value).ok();
        match (step, parsed) {
            (Some(step), Some(result)) => {
                results.insert(step, result);
            }
            _ => {
                tracing::warn!("Dropping unreadable step result '{}' of progress {}", key, record_id);
                repaired = true;
            }
        }
    }
    (results, repaired)
}

impl TryFrom<ProgressRow> for ProgressRecord {
    type Error = AppError;

    fn try_from(row: ProgressRow) -> Result<Self, Self::Error> {
        let user_id = LearnerId::parse(&row.user_id).map_err(|_| {
            AppError::InternalServerError(format!("Progress {} has an invalid user id", row.id))
        })?;

        let (completed_steps, steps_repaired) = decode_completed_steps(row.completed_steps.map(|j| j.0));
        let (step_results, results_repaired) = decode_step_results(row.step_results.map(|j| j.0), row.id);

        Ok(ProgressRecord {
            id: row.id,
            playbook_id: row.playbook_id,
            user_id,
            user_name: row.user_name,
            current_step: u32::try_from(row.current_step).unwrap_or(0),
            completed_steps,
            step_results,
            total_steps: u32::try_from(row.total_steps).unwrap_or(0),
            time_spent: u64::try_from(row.time_spent).unwrap_or(0),
            started_at: row.started_at,
            last_active_at: row.last_active_at,
            completed_at: row.completed_at,
            is_completed: row.is_completed,
            completion_rate: u32::try_from(row.completion_rate).unwrap_or(0).min(100),
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
            needs_repair: steps_repaired || results_repaired,
        })
    }
}

#[derive(Debug, FromRow)]
struct PlayBookRow {
    id: String,
    title: String,
    slug: String,
    description: Option<String>,
    category: String,
    difficulty: String,
    display_type: String,
    tags: Json<Vec<String>>,
    status: String,
    steps: Json<Vec<Step>>,
    estimated_time: i32,
    view_count: i64,
    completion_count: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    published_at: Option<DateTime<Utc>>,
}

impl From<PlayBookRow> for PlayBook {
    fn from(row: PlayBookRow) -> Self {
        PlayBook {
            status: PlayBookStatus::parse(&row.status).unwrap_or_default(),
            difficulty: Difficulty::parse(&row.difficulty).unwrap_or_default(),
            display_type: DisplayType::parse(&row.display_type).unwrap_or_default(),
            tags: row.tags.0,
            id: row.id,
            title: row.title,
            slug: row.slug,
            description: row.description,
            category: row.category,
            steps: row.steps.0,
            estimated_time: u32::try_from(row.estimated_time).unwrap_or(0),
            view_count: row.view_count,
            completion_count: row.completion_count,
            created_at: row.created_at,
            updated_at: row.updated_at,
            published_at: row.published_at,
        }
    }
}

#[async_trait]
impl ProgressStore for PgStore {
    async fn find(
        &self,
        playbook_id: &str,
        user_id: &LearnerId,
    ) -> Result<Option<ProgressRecord>, AppError> {
        let sql = format!(
            "SELECT {} FROM playbook_progress WHERE playbook_id = $1 AND user_id = $2",
            PROGRESS_COLUMNS
        );
        let row = sqlx::query_as::<_, ProgressRow>(&sql)
            .bind(playbook_id)
            .bind(user_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!("Failed to fetch progress: {:?}", e);
                AppError::from(e)
            })?;

        row.map(ProgressRecord::try_from).transpose()
    }

    async fn create_if_absent(&self, record: &ProgressRecord) -> Result<ProgressRecord, AppError> {
        let sql = format!(
            r#"
            INSERT INTO playbook_progress (
                id, playbook_id, user_id, user_name, current_step, completed_steps,
                step_results, total_steps, time_spent, started_at, last_active_at,
                completed_at, is_completed, completion_rate, version, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, NOW(), NOW())
            ON CONFLICT (playbook_id, user_id) DO NOTHING
            RETURNING {}
            "#,
            PROGRESS_COLUMNS
        );

        let inserted = sqlx::query_as::<_, ProgressRow>(&sql)
            .bind(record.id)
            .bind(&record.playbook_id)
            .bind(record.user_id.as_str())
            .bind(&record.user_name)
            .bind(to_i32(record.current_step, "currentStep")?)
            .bind(Json(&record.completed_steps))
            .bind(Json(&record.step_results))
            .bind(to_i32(record.total_steps, "totalSteps")?)
            .bind(to_i64(record.time_spent, "timeSpent")?)
            .bind(record.started_at)
            .bind(record.last_active_at)
            .bind(record.completed_at)
            .bind(record.is_completed)
            .bind(to_i32(record.completion_rate, "completionRate")?)
            .bind(record.version)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                if db_error_code(&e).as_deref() == Some(FOREIGN_KEY_VIOLATION) {
                    AppError::NotFound("PlayBook not found".to_string())
                } else {
                    tracing::error!("Failed to insert progress: {:?}", e);
                    AppError::from(e)
                }
            })?;

        match inserted {
            Some(row) => ProgressRecord::try_from(row),
            // Someone else created the record between our lookup and insert.
            None => self
                .find(&record.playbook_id, &record.user_id)
                .await?
                .ok_or_else(|| AppError::NotFound("Progress record not found".to_string())),
        }
    }

    async fn save(
        &self,
        record: &ProgressRecord,
        expected_version: i64,
    ) -> Result<Option<ProgressRecord>, AppError> {
        let sql = format!(
            r#"
            UPDATE playbook_progress SET
                user_name = $3,
                current_step = $4,
                completed_steps = $5,
                step_results = $6,
                total_steps = $7,
                time_spent = $8,
                started_at = $9,
                last_active_at = $10,
                completed_at = $11,
                is_completed = $12,
                completion_rate = $13,
                version = version + 1,
                updated_at = NOW()
            WHERE id = $1 AND version = $2
            RETURNING {}
            "#,
            PROGRESS_COLUMNS
        );

        let row = sqlx::query_as::<_, ProgressRow>(&sql)
            .bind(record.id)
            .bind(expected_version)
            .bind(&record.user_name)
            .bind(to_i32(record.current_step, "currentStep")?)
            .bind(Json(&record.completed_steps))
            .bind(Json(&record.step_results))
            .bind(to_i32(record.total_steps, "totalSteps")?)
            .bind(to_i64(record.time_spent, "timeSpent")?)
            .bind(record.started_at)
            .bind(record.last_active_at)
            .bind(record.completed_at)
            .bind(record.is_completed)
            .bind(to_i32(record.completion_rate, "completionRate")?)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!("Failed to save progress {}: {:?}", record.id, e);
                AppError::from(e)
            })?;

        if let Some(row) = row {
            return ProgressRecord::try_from(row).map(Some);
        }

        // No row matched: either the version moved on or the record is gone.
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM playbook_progress WHERE id = $1)",
        )
        .bind(record.id)
        .fetch_one(&self.pool)
        .await?;

        if exists {
            Ok(None)
        } else {
            Err(AppError::NotFound("Progress record not found".to_string()))
        }
    }

    async fn list_by_playbook(&self, playbook_id: &str) -> Result<Vec<ProgressRecord>, AppError> {
        let sql = format!(
            "SELECT {} FROM playbook_progress WHERE playbook_id = $1 ORDER BY created_at DESC",
            PROGRESS_COLUMNS
        );
        let rows = sqlx::query_as::<_, ProgressRow>(&sql)
            .bind(playbook_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!("Failed to list progress: {:?}", e);
                AppError::from(e)
            })?;

        rows.into_iter().map(ProgressRecord::try_from).collect()
    }

    async fn delete_by_playbook(&self, playbook_id: &str) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM playbook_progress WHERE playbook_id = $1")
            .bind(playbook_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl PlayBookStore for PgStore {
    async fn get(&self, id: &str) -> Result<Option<PlayBook>, AppError> {
        let sql = format!("SELECT {} FROM playbooks WHERE id = $1", PLAYBOOK_COLUMNS);
        let row = sqlx::query_as::<_, PlayBookRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!("Failed to fetch playbook: {:?}", e);
                AppError::from(e)
            })?;
        Ok(row.map(PlayBook::from))
    }

    async fn get_by_slug(&self, slug: &str) -> Result<Option<PlayBook>, AppError> {
        let sql = format!("SELECT {} FROM playbooks WHERE slug = $1", PLAYBOOK_COLUMNS);
        let row = sqlx::query_as::<_, PlayBookRow>(&sql)
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(PlayBook::from))
    }

    async fn list(&self) -> Result<Vec<PlayBook>, AppError> {
        let sql = format!(
            "SELECT {} FROM playbooks ORDER BY created_at DESC",
            PLAYBOOK_COLUMNS
        );
        let rows = sqlx::query_as::<_, PlayBookRow>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!("Failed to list playbooks: {:?}", e);
                AppError::from(e)
            })?;
        Ok(rows.into_iter().map(PlayBook::from).collect())
    }

    async fn create(&self, playbook: &PlayBook) -> Result<PlayBook, AppError> {
        let sql = format!(
            r#"
            INSERT INTO playbooks (
                id, title, slug, description, category, difficulty, display_type, tags,
                status, steps, estimated_time, view_count, completion_count,
                created_at, updated_at, published_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            RETURNING {}
            "#,
            PLAYBOOK_COLUMNS
        );

        let row = sqlx::query_as::<_, PlayBookRow>(&sql)
            .bind(&playbook.id)
            .bind(&playbook.title)
            .bind(&playbook.slug)
            .bind(&playbook.description)
            .bind(&playbook.category)
            .bind(playbook.difficulty.as_str())
            .bind(playbook.display_type.as_str())
            .bind(Json(&playbook.tags))
            .bind(playbook.status.as_str())
            .bind(Json(&playbook.steps))
            .bind(to_i32(playbook.estimated_time, "estimatedTime")?)
            .bind(playbook.view_count)
            .bind(playbook.completion_count)
            .bind(playbook.created_at)
            .bind(playbook.updated_at)
            .bind(playbook.published_at)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                if db_error_code(&e).as_deref() == Some(UNIQUE_VIOLATION) {
                    AppError::Conflict(format!("Slug '{}' is already in use", playbook.slug))
                } else {
                    tracing::error!("Failed to create playbook: {:?}", e);
                    AppError::from(e)
                }
            })?;

        Ok(PlayBook::from(row))
    }

    async fn update(&self, playbook: &PlayBook) -> Result<PlayBook, AppError> {
        let sql = format!(
            r#"
            UPDATE playbooks SET
                title = $2,
                description = $3,
                category = $4,
                difficulty = $5,
                display_type = $6,
                tags = $7,
                status = $8,
                steps = $9,
                estimated_time = $10,
                updated_at = $11,
                published_at = $12
            WHERE id = $1
            RETURNING {}
            "#,
            PLAYBOOK_COLUMNS
        );

        let row = sqlx::query_as::<_, PlayBookRow>(&sql)
            .bind(&playbook.id)
            .bind(&playbook.title)
            .bind(&playbook.description)
            .bind(&playbook.category)
            .bind(playbook.difficulty.as_str())
            .bind(playbook.display_type.as_str())
            .bind(Json(&playbook.tags))
            .bind(playbook.status.as_str())
            .bind(Json(&playbook.steps))
            .bind(to_i32(playbook.estimated_time, "estimatedTime")?)
            .bind(playbook.updated_at)
            .bind(playbook.published_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!("Failed to update playbook {}: {:?}", playbook.id, e);
                AppError::from(e)
            })?;

        row.map(PlayBook::from)
            .ok_or_else(|| AppError::NotFound("PlayBook not found".to_string()))
    }

    async fn delete(&self, id: &str) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM playbooks WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!("Failed to delete playbook: {:?}", e);
                AppError::from(e)
            })?;
        Ok(result.rows_affected() > 0)
    }

    async fn increment_view_count(&self, id: &str) -> Result<(), AppError> {
        sqlx::query("UPDATE playbooks SET view_count = view_count + 1 WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn increment_completion_count(&self, id: &str) -> Result<(), AppError> {
        sqlx::query("UPDATE playbooks SET completion_count = completion_count + 1 WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl UserStore for PgStore {
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, username, password, role, created_at FROM users WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!("Login DB error: {:?}", e);
            AppError::InternalServerError(e.to_string())
        })?;
        Ok(user)
    }

    async fn create(
        &self,
        username: &str,
        password_hash: &str,
        role: &str,
    ) -> Result<User, AppError> {
        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (username, password, role)
            VALUES ($1, $2, $3)
            RETURNING id, username, password, role, created_at
            "#,
        )
        .bind(username)
        .bind(password_hash)
        .bind(role)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if db_error_code(&e).as_deref() == Some(UNIQUE_VIOLATION) {
                AppError::Conflict(format!("Username '{}' already exists", username))
            } else {
                tracing::error!("Failed to create user: {:?}", e);
                AppError::from(e)
            }
        })
    }
}
