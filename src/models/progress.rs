// src/models/progress.rs

//! Learner progress through a PlayBook.
//!
//! Every transition here is a pure `ProgressRecord -> ProgressRecord`
//! function taking the current instant as an argument. Loading and saving
//! the record is the job of `services::progress::ProgressEngine`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{
    error::AppError,
    models::{
        learner::LearnerId,
        playbook::{PlayBook, StepType},
    },
};

pub const ANONYMOUS_USER: &str = "anonymous user";

/// Timing sub-fields reported by the player for a single step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeRecord {
    /// Seconds spent on the step.
    #[serde(default, alias = "stepTimeSpent")]
    pub time_spent: u64,
    /// Seconds spent reading, for content steps.
    #[serde(default)]
    pub read_time: u64,
    #[serde(default, alias = "stepStartTime")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, alias = "stepEndTime")]
    pub end_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentResult {
    pub content_id: Option<String>,
    pub content_title: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub time_record: TimeRecord,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamResult {
    pub exam_id: Option<String>,
    pub exam_title: Option<String>,
    pub score: Option<f64>,
    pub passed: Option<bool>,
    #[serde(default)]
    pub answers: Value,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub time_record: TimeRecord,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurveyResult {
    pub survey_id: Option<String>,
    pub survey_title: Option<String>,
    #[serde(default, alias = "responses")]
    pub answers: Value,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub time_record: TimeRecord,
}

/// Custom pages report interim state many times before they finish, so the
/// page-specific payload is kept verbatim in `data`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomPageResult {
    pub custom_page_id: Option<String>,
    pub custom_page_title: Option<String>,
    #[serde(default)]
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub time_record: TimeRecord,
}

/// Result payload stored per step, tagged by step type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StepResult {
    Content(ContentResult),
    Exam(ExamResult),
    Survey(SurveyResult),
    CustomPage(CustomPageResult),
}

impl StepResult {
    pub fn step_type(&self) -> StepType {
        match self {
            StepResult::Content(_) => StepType::Content,
            StepResult::Exam(_) => StepType::Exam,
            StepResult::Survey(_) => StepType::Survey,
            StepResult::CustomPage(_) => StepType::CustomPage,
        }
    }

    /// Resource title captured by the player, if it sent one.
    pub fn title(&self) -> Option<&str> {
        match self {
            StepResult::Content(r) => r.content_title.as_deref(),
            StepResult::Exam(r) => r.exam_title.as_deref(),
            StepResult::Survey(r) => r.survey_title.as_deref(),
            StepResult::CustomPage(r) => r.custom_page_title.as_deref(),
        }
    }

    pub fn time_record(&self) -> &TimeRecord {
        match self {
            StepResult::Content(r) => &r.time_record,
            StepResult::Exam(r) => &r.time_record,
            StepResult::Survey(r) => &r.time_record,
            StepResult::CustomPage(r) => &r.time_record,
        }
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        match self {
            StepResult::Content(r) => r.completed_at,
            StepResult::Exam(r) => r.completed_at,
            StepResult::Survey(r) => r.completed_at,
            StepResult::CustomPage(r) => r.completed_at,
        }
    }
}

/// Integer percentage of `total` covered by `completed`, 0 for an empty PlayBook.
pub fn completion_percent(completed: usize, total: u32) -> u32 {
    if total == 0 {
        return 0;
    }
    let pct = (completed as f64 / total as f64 * 100.0).round();
    pct.clamp(0.0, 100.0) as u32
}

/// Persisted state of one learner's run through one PlayBook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
    pub id: Uuid,
    pub playbook_id: String,
    pub user_id: LearnerId,
    pub user_name: String,
    /// Frontier step the learner is expected to attempt next.
    pub current_step: u32,
    /// Sorted ascending, no duplicates.
    pub completed_steps: Vec<u32>,
    pub step_results: BTreeMap<u32, StepResult>,
    /// Step count of the PlayBook when the record was created.
    pub total_steps: u32,
    /// Seconds.
    pub time_spent: u64,
    pub started_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub is_completed: bool,
    pub completion_rate: u32,
    /// Bumped by the store on every successful write.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set by a store when the persisted form was malformed and has been
    /// coerced while decoding.
    #[serde(skip)]
    pub needs_repair: bool,
}

impl ProgressRecord {
    /// Fresh record for a learner starting `playbook`.
    pub fn start(
        playbook: &PlayBook,
        user_id: LearnerId,
        user_name: Option<&str>,
        now: DateTime<Utc>,
    ) -> Self {
        let user_name = user_name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(ANONYMOUS_USER)
            .to_string();

        let mut record = Self {
            id: Uuid::new_v4(),
            playbook_id: playbook.id.clone(),
            user_id,
            user_name,
            current_step: 1,
            completed_steps: Vec::new(),
            step_results: BTreeMap::new(),
            total_steps: playbook.total_steps(),
            time_spent: 0,
            started_at: now,
            last_active_at: now,
            completed_at: None,
            is_completed: false,
            completion_rate: 0,
            version: 0,
            created_at: now,
            updated_at: now,
            needs_repair: false,
        };
        record.refresh_completion(now);
        record
    }

    pub fn is_step_completed(&self, step_number: u32) -> bool {
        self.completed_steps.contains(&step_number)
    }

    pub fn step_result(&self, step_number: u32) -> Option<&StepResult> {
        self.step_results.get(&step_number)
    }

    /// Range and gate check for writing to `step_number`.
    pub fn ensure_step_open(&self, step_number: u32) -> Result<(), AppError> {
        if step_number < 1 || step_number > self.total_steps {
            return Err(AppError::BadRequest(format!(
                "Invalid step number {} (expected 1..={})",
                step_number, self.total_steps
            )));
        }
        if !self.can_access_step(step_number) {
            return Err(AppError::Forbidden(
                "This step is locked, complete the previous steps first".to_string(),
            ));
        }
        Ok(())
    }

    /// Linear gating: step 1 is always open, step `n` opens once `n - 1`
    /// is completed. Steps beyond `total_steps` are never open.
    pub fn can_access_step(&self, step_number: u32) -> bool {
        match step_number {
            0 => false,
            1 => true,
            n if n > self.total_steps => false,
            n => self.is_step_completed(n - 1),
        }
    }

    /// Repairs legacy or hand-edited records. Returns whether anything changed.
    ///
    /// `playbook_total` is only consulted when the record has no step count.
    pub fn normalize(mut self, playbook_total: Option<u32>, now: DateTime<Utc>) -> (Self, bool) {
        let mut changed = std::mem::take(&mut self.needs_repair);

        let before = self.completed_steps.len();
        let was_sorted = self.completed_steps.is_sorted();
        self.completed_steps.retain(|&n| n > 0);
        self.completed_steps.sort_unstable();
        self.completed_steps.dedup();
        if !was_sorted || before != self.completed_steps.len() {
            changed = true;
        }

        if self.current_step == 0 {
            self.current_step = 1;
            changed = true;
        }

        if self.total_steps == 0 {
            if let Some(total) = playbook_total.filter(|&t| t > 0) {
                self.total_steps = total;
                changed = true;
                // Completion earned against zero steps no longer holds.
                if self.completed_steps.len() < total as usize {
                    self.is_completed = false;
                    self.completed_at = None;
                }
            }
        }

        if changed {
            self.refresh_completion(now);
        }
        (self, changed)
    }

    /// Marks `step_number` completed and stores its result.
    ///
    /// Access is not checked here; callers gate with `ensure_step_open` first.
    /// Completing an already completed step only overwrites its result.
    pub fn complete_step(
        mut self,
        step_number: u32,
        result: Option<StepResult>,
        now: DateTime<Utc>,
    ) -> Self {
        if !self.is_step_completed(step_number) {
            self.completed_steps.push(step_number);
            self.completed_steps.sort_unstable();
        }

        if let Some(result) = result {
            self.step_results.insert(step_number, result);
        }

        // The pointer tracks the frontier, not the last completed step.
        if step_number == self.current_step && self.current_step < self.total_steps {
            self.current_step = step_number + 1;
        }

        self.refresh_completion(now);
        self.last_active_at = now;
        self
    }

    pub fn add_time_spent(mut self, seconds: u64, now: DateTime<Utc>) -> Self {
        self.time_spent = self.time_spent.saturating_add(seconds);
        self.last_active_at = now;
        self
    }

    /// Moves the pointer without touching completion, e.g. to review a step.
    pub fn go_to_step(mut self, step_number: u32, now: DateTime<Utc>) -> Result<Self, AppError> {
        if step_number < 1 || step_number > self.total_steps {
            return Err(AppError::BadRequest(format!(
                "Invalid step number {} (expected 1..={})",
                step_number, self.total_steps
            )));
        }
        self.current_step = step_number;
        self.last_active_at = now;
        Ok(self)
    }

    /// Returns the record to its initial state, keeping its identity.
    pub fn reset(mut self, now: DateTime<Utc>) -> Self {
        self.current_step = 1;
        self.completed_steps.clear();
        self.step_results.clear();
        self.time_spent = 0;
        self.is_completed = false;
        self.completed_at = None;
        self.started_at = now;
        self.last_active_at = now;
        self.refresh_completion(now);
        self
    }

    /// Stores interim state for a step without completing it.
    pub fn record_step_result(
        mut self,
        step_number: u32,
        result: StepResult,
        now: DateTime<Utc>,
    ) -> Self {
        self.step_results.insert(step_number, result);
        self.last_active_at = now;
        self
    }

    fn refresh_completion(&mut self, now: DateTime<Utc>) {
        let done = self.completed_steps.len();
        self.completion_rate = completion_percent(done, self.total_steps);

        if done >= self.total_steps as usize && !self.is_completed {
            self.is_completed = true;
            self.completed_at = Some(now);
        }
    }
}
