// src/models/stats.rs

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::models::playbook::StepType;

/// Overview of every learner's progress through one PlayBook.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayBookStats {
    pub total_users: u64,
    pub completed_users: u64,
    /// Percentage of learners who finished.
    pub completion_rate: f64,
    /// Mean of per-learner completion rates, rounded.
    pub average_progress: u64,
    pub average_time_spent: u64,
    pub min_time_spent: u64,
    pub max_time_spent: u64,
    pub total_time_spent: u64,
}

/// Completion count per step number, with an entry for every step.
pub type StepStats = BTreeMap<u32, u64>;

/// Response body of the stats endpoint.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub overview: PlayBookStats,
    pub step_stats: StepStats,
}

/// One stored step result flattened for export.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepDetail {
    pub step_number: u32,
    pub step_title: String,
    pub step_type: StepType,
    pub completed_at: Option<DateTime<Utc>>,
    pub time_spent: u64,
    pub read_time: u64,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,

    // Exam steps only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exam_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exam_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passed: Option<bool>,

    // Survey steps only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub survey_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub survey_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answers: Option<Value>,
}

/// Per-learner export row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResult {
    pub user_id: String,
    pub user_name: String,
    pub play_book_title: String,
    pub play_book_slug: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_active_at: DateTime<Utc>,
    pub is_completed: bool,
    pub completion_rate: u32,
    pub total_time_spent: u64,
    pub current_step: u32,
    pub completed_steps: Vec<u32>,
    pub step_details: Vec<StepDetail>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
