// src/services/stats.rs

use std::sync::Arc;

use serde_json::{Value, json};

use crate::{
    error::AppError,
    models::{
        playbook::PlayBook,
        progress::{ProgressRecord, StepResult},
        stats::{PlayBookStats, StepDetail, StepStats, UserResult},
    },
    store::{PlayBookStore, ProgressStore},
};

/// Aggregate figures over a PlayBook's progress records.
pub fn overview(records: &[ProgressRecord]) -> PlayBookStats {
    if records.is_empty() {
        return PlayBookStats::default();
    }

    let total_users = records.len() as u64;
    let completed_users = records.iter().filter(|r| r.is_completed).count() as u64;
    let total_time_spent: u64 = records.iter().map(|r| r.time_spent).sum();
    let progress_sum: u64 = records.iter().map(|r| r.completion_rate as u64).sum();

    PlayBookStats {
        total_users,
        completed_users,
        completion_rate: completed_users as f64 / total_users as f64 * 100.0,
        average_progress: rounded_mean(progress_sum, total_users),
        average_time_spent: rounded_mean(total_time_spent, total_users),
        min_time_spent: records.iter().map(|r| r.time_spent).min().unwrap_or(0),
        max_time_spent: records.iter().map(|r| r.time_spent).max().unwrap_or(0),
        total_time_spent,
    }
}

/// How many learners completed each step. Every step `1..=total_steps`
/// gets an entry; numbers outside that range are still counted.
pub fn step_stats(records: &[ProgressRecord], total_steps: Option<u32>) -> StepStats {
    let mut stats = StepStats::new();
    for step in 1..=total_steps.unwrap_or(0) {
        stats.insert(step, 0);
    }
    for record in records {
        for &step in &record.completed_steps {
            *stats.entry(step).or_insert(0) += 1;
        }
    }
    stats
}

/// Per-learner export rows, newest record first.
pub fn user_results(mut records: Vec<ProgressRecord>, playbook: Option<&PlayBook>) -> Vec<UserResult> {
    records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    let play_book_title = playbook.map_or_else(|| "Unknown".to_string(), |p| p.title.clone());
    let play_book_slug = playbook.map(|p| p.slug.clone()).unwrap_or_default();
    records
        .into_iter()
        .map(|record| {
            let step_details = record
                .step_results
                .iter()
                .map(|(&n, result)| step_detail(n, result, playbook))
                .collect();

            UserResult {
                user_id: record.user_id.to_string(),
                user_name: record.user_name,
                play_book_title: play_book_title.clone(),
                play_book_slug: play_book_slug.clone(),
                started_at: record.started_at,
                completed_at: record.completed_at,
                last_active_at: record.last_active_at,
                is_completed: record.is_completed,
                completion_rate: record.completion_rate,
                total_time_spent: record.time_spent,
                current_step: record.current_step,
                completed_steps: record.completed_steps,
                step_details,
                created_at: record.created_at,
                updated_at: record.updated_at,
            }
        })
        .collect()
}

fn step_detail(step_number: u32, result: &StepResult, playbook: Option<&PlayBook>) -> StepDetail {
    let step_title = result
        .title()
        .map(str::to_string)
        .or_else(|| playbook.and_then(|p| p.step(step_number)).map(|s| s.title.clone()))
        .unwrap_or_else(|| format!("Step {}", step_number));
    let timing = result.time_record();

    let mut detail = StepDetail {
        step_number,
        step_title,
        step_type: result.step_type(),
        completed_at: result.completed_at().or(timing.end_time),
        time_spent: timing.time_spent,
        read_time: timing.read_time,
        start_time: timing.start_time,
        end_time: timing.end_time,
        exam_id: None,
        exam_title: None,
        score: None,
        passed: None,
        survey_id: None,
        survey_title: None,
        answers: None,
    };

    match result {
        StepResult::Exam(exam) => {
            detail.exam_id = exam.exam_id.clone();
            detail.exam_title = exam.exam_title.clone();
            detail.score = exam.score;
            detail.passed = exam.passed;
        }
        StepResult::Survey(survey) => {
            detail.survey_id = survey.survey_id.clone();
            detail.survey_title = survey.survey_title.clone();
            detail.answers = Some(match &survey.answers {
                Value::Null => json!({}),
                answers => answers.clone(),
            });
        }
        StepResult::Content(_) | StepResult::CustomPage(_) => {}
    }
    detail
}

fn rounded_mean(sum: u64, count: u64) -> u64 {
    if count == 0 {
        0
    } else {
        (sum as f64 / count as f64).round() as u64
    }
}

/// Store-backed entry point for the reporting endpoints.
#[derive(Clone)]
pub struct StatsAggregator {
    playbooks: Arc<dyn PlayBookStore>,
    progress: Arc<dyn ProgressStore>,
}

impl StatsAggregator {
    pub fn new(playbooks: Arc<dyn PlayBookStore>, progress: Arc<dyn ProgressStore>) -> Self {
        Self {
            playbooks,
            progress,
        }
    }

    pub async fn get_playbook_stats(&self, playbook_id: &str) -> Result<PlayBookStats, AppError> {
        let records = self.progress.list_by_playbook(playbook_id).await?;
        Ok(overview(&records))
    }

    /// Padded to the PlayBook's step count when the PlayBook still exists.
    pub async fn get_step_stats(&self, playbook_id: &str) -> Result<StepStats, AppError> {
        let playbook = self.playbooks.get(playbook_id).await?;
        let records = self.progress.list_by_playbook(playbook_id).await?;
        Ok(step_stats(&records, playbook.map(|p| p.total_steps())))
    }

    pub async fn get_playbook_user_results(
        &self,
        playbook_id: &str,
    ) -> Result<Vec<UserResult>, AppError> {
        let playbook = self.playbooks.get(playbook_id).await?;
        let records = self.progress.list_by_playbook(playbook_id).await?;
        Ok(user_results(records, playbook.as_ref()))
    }
}
