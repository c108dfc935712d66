// src/services/progress.rs

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use chrono::{DateTime, Utc};

use crate::{
    error::AppError,
    models::{
        learner::LearnerId,
        playbook::{PlayBook, Step},
        progress::{ProgressRecord, StepResult},
    },
    store::{PlayBookStore, ProgressStore},
};

/// How many times a write is re-applied after losing a version race.
pub const MAX_WRITE_ATTEMPTS: usize = 3;

/// Outcome of `ProgressEngine::complete_step`.
#[derive(Debug)]
pub struct StepCompletion {
    pub record: ProgressRecord,
    /// True only for the write that finished the PlayBook.
    pub newly_completed: bool,
}

/// Drives learners through PlayBooks.
///
/// Each operation loads the learner's record, applies one of the pure
/// transitions on `ProgressRecord`, and writes it back with a version check.
/// A write that loses the race is re-applied on a fresh copy.
#[derive(Clone)]
pub struct ProgressEngine {
    playbooks: Arc<dyn PlayBookStore>,
    progress: Arc<dyn ProgressStore>,
}

impl ProgressEngine {
    pub fn new(playbooks: Arc<dyn PlayBookStore>, progress: Arc<dyn ProgressStore>) -> Self {
        Self {
            playbooks,
            progress,
        }
    }

    /// Returns the learner's record, creating it on first contact.
    pub async fn create_or_get(
        &self,
        playbook_id: &str,
        user_id: &LearnerId,
        user_name: Option<&str>,
    ) -> Result<ProgressRecord, AppError> {
        let now = Utc::now();

        if let Some(existing) = self.progress.find(playbook_id, user_id).await? {
            return self.repair(existing, now).await;
        }

        let playbook = self.playbook(playbook_id).await?;
        let fresh = ProgressRecord::start(&playbook, user_id.clone(), user_name, now);
        let stored = self.progress.create_if_absent(&fresh).await?;

        if stored.id == fresh.id {
            tracing::info!(
                "Learner {} started playbook {} ({} steps)",
                user_id,
                playbook_id,
                stored.total_steps
            );
            // An empty PlayBook is finished the moment it is started.
            if stored.is_completed {
                self.count_completion(playbook_id, user_id).await;
            }
        }
        Ok(stored)
    }

    pub async fn find(
        &self,
        playbook_id: &str,
        user_id: &LearnerId,
    ) -> Result<ProgressRecord, AppError> {
        self.progress
            .find(playbook_id, user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Progress record not found".to_string()))
    }

    pub async fn playbook(&self, playbook_id: &str) -> Result<PlayBook, AppError> {
        self.playbooks
            .get(playbook_id)
            .await?
            .ok_or_else(|| AppError::NotFound("PlayBook not found".to_string()))
    }

    /// Definition of one step, for validating result payloads.
    pub async fn step_definition(
        &self,
        playbook_id: &str,
        step_number: u32,
    ) -> Result<Option<Step>, AppError> {
        let playbook = self.playbook(playbook_id).await?;
        Ok(playbook.step(step_number).cloned())
    }

    /// Completes a step and optionally accrues time, as one write.
    ///
    /// The step must be in range and unlocked on the copy being written,
    /// so a reset that lands between attempts is seen by the retry.
    pub async fn complete_step(
        &self,
        playbook_id: &str,
        user_id: &LearnerId,
        step_number: u32,
        result: Option<StepResult>,
        time_spent: Option<u64>,
    ) -> Result<StepCompletion, AppError> {
        let now = Utc::now();
        // Set by the attempt that actually lands, since each retry overwrites it.
        let finished = AtomicBool::new(false);
        let record = self
            .mutate(playbook_id, user_id, now, |rec| {
                rec.ensure_step_open(step_number)?;
                let was_completed = rec.is_completed;
                let rec = rec.complete_step(step_number, result.clone(), now);
                finished.store(!was_completed && rec.is_completed, Ordering::SeqCst);
                Ok(match time_spent {
                    Some(seconds) if seconds > 0 => rec.add_time_spent(seconds, now),
                    _ => rec,
                })
            })
            .await?;

        let newly_completed = finished.load(Ordering::SeqCst);
        tracing::debug!(
            "Learner {} completed step {} of playbook {} ({}%)",
            user_id,
            step_number,
            playbook_id,
            record.completion_rate
        );

        if newly_completed {
            self.count_completion(playbook_id, user_id).await;
        }

        Ok(StepCompletion {
            record,
            newly_completed,
        })
    }

    pub async fn add_time_spent(
        &self,
        playbook_id: &str,
        user_id: &LearnerId,
        seconds: u64,
    ) -> Result<ProgressRecord, AppError> {
        let now = Utc::now();
        self.mutate(playbook_id, user_id, now, |rec| {
            Ok(rec.add_time_spent(seconds, now))
        })
        .await
    }

    pub async fn go_to_step(
        &self,
        playbook_id: &str,
        user_id: &LearnerId,
        step_number: u32,
    ) -> Result<ProgressRecord, AppError> {
        let now = Utc::now();
        self.mutate(playbook_id, user_id, now, |rec| rec.go_to_step(step_number, now))
            .await
    }

    pub async fn reset(
        &self,
        playbook_id: &str,
        user_id: &LearnerId,
    ) -> Result<ProgressRecord, AppError> {
        let now = Utc::now();
        let record = self
            .mutate(playbook_id, user_id, now, |rec| Ok(rec.reset(now)))
            .await?;
        tracing::info!("Learner {} reset playbook {}", user_id, playbook_id);
        Ok(record)
    }

    /// Saves interim state for a step without completing it. Gated like
    /// `complete_step`.
    pub async fn record_step_result(
        &self,
        playbook_id: &str,
        user_id: &LearnerId,
        step_number: u32,
        result: StepResult,
    ) -> Result<ProgressRecord, AppError> {
        let now = Utc::now();
        self.mutate(playbook_id, user_id, now, |rec| {
            rec.ensure_step_open(step_number)?;
            Ok(rec.record_step_result(step_number, result.clone(), now))
        })
        .await
    }

    async fn count_completion(&self, playbook_id: &str, user_id: &LearnerId) {
        tracing::info!("Learner {} finished playbook {}", user_id, playbook_id);
        // The counter is informational; a failure here must not undo the progress write.
        if let Err(e) = self.playbooks.increment_completion_count(playbook_id).await {
            tracing::error!("Failed to bump completion count of {}: {:?}", playbook_id, e);
        }
    }

    /// Persists normalization of an existing record when it changed anything.
    async fn repair(
        &self,
        record: ProgressRecord,
        now: DateTime<Utc>,
    ) -> Result<ProgressRecord, AppError> {
        let playbook_total = if record.total_steps == 0 {
            self.playbooks
                .get(&record.playbook_id)
                .await?
                .map(|p| p.total_steps())
        } else {
            None
        };

        let version = record.version;
        let (normalized, changed) = record.normalize(playbook_total, now);
        if !changed {
            return Ok(normalized);
        }

        tracing::info!("Repairing progress record {}", normalized.id);
        match self.progress.save(&normalized, version).await? {
            Some(saved) => Ok(saved),
            // A concurrent writer already replaced it; hand back the newer copy.
            None => self.find(&normalized.playbook_id, &normalized.user_id).await,
        }
    }

    /// Load, apply, compare-and-swap. Retries up to `MAX_WRITE_ATTEMPTS`.
    async fn mutate<F>(
        &self,
        playbook_id: &str,
        user_id: &LearnerId,
        now: DateTime<Utc>,
        apply: F,
    ) -> Result<ProgressRecord, AppError>
    where
        F: Fn(ProgressRecord) -> Result<ProgressRecord, AppError> + Send + Sync,
    {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let current = self.find(playbook_id, user_id).await?;
            let version = current.version;
            let (current, _) = current.normalize(None, now);
            let next = apply(current)?;

            if let Some(saved) = self.progress.save(&next, version).await? {
                return Ok(saved);
            }
            tracing::debug!(
                "Progress write for {}/{} lost a version race (attempt {})",
                playbook_id,
                user_id,
                attempt
            );
        }

        tracing::warn!(
            "Giving up on progress write for {}/{} after {} attempts",
            playbook_id,
            user_id,
            MAX_WRITE_ATTEMPTS
        );
        Err(AppError::Conflict(
            "Progress is being updated concurrently, please retry".to_string(),
        ))
    }
}
