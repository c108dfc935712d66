// src/store/mod.rs

//! Persistence ports.
//!
//! Handlers and services only see these traits; `postgres` backs them in
//! production and `memory` in tests or `DATA_BACKEND=memory` runs.

use async_trait::async_trait;

use crate::{
    error::AppError,
    models::{learner::LearnerId, playbook::PlayBook, progress::ProgressRecord, user::User},
};

pub mod memory;
pub mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

/// One progress record per (playbook, learner) pair.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn find(
        &self,
        playbook_id: &str,
        user_id: &LearnerId,
    ) -> Result<Option<ProgressRecord>, AppError>;

    /// Inserts `record` unless its key is already taken, and returns whichever
    /// record is stored for the key afterwards.
    async fn create_if_absent(&self, record: &ProgressRecord) -> Result<ProgressRecord, AppError>;

    /// Writes `record` only if the stored version still equals
    /// `expected_version`. Returns the saved record with its bumped version,
    /// or `None` when another writer got there first. A record that no
    /// longer exists is `NotFound`.
    async fn save(
        &self,
        record: &ProgressRecord,
        expected_version: i64,
    ) -> Result<Option<ProgressRecord>, AppError>;

    async fn list_by_playbook(&self, playbook_id: &str) -> Result<Vec<ProgressRecord>, AppError>;

    /// Removes every record of a PlayBook. Returns the number removed.
    async fn delete_by_playbook(&self, playbook_id: &str) -> Result<u64, AppError>;
}

#[async_trait]
pub trait PlayBookStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<PlayBook>, AppError>;

    async fn get_by_slug(&self, slug: &str) -> Result<Option<PlayBook>, AppError>;

    /// Newest first.
    async fn list(&self) -> Result<Vec<PlayBook>, AppError>;

    /// Fails with `Conflict` when the slug is taken.
    async fn create(&self, playbook: &PlayBook) -> Result<PlayBook, AppError>;

    /// Overwrites the definition fields of an existing PlayBook. The view and
    /// completion counters are left as stored. `NotFound` when it is gone.
    async fn update(&self, playbook: &PlayBook) -> Result<PlayBook, AppError>;

    /// Returns false when there was nothing to delete.
    async fn delete(&self, id: &str) -> Result<bool, AppError>;

    async fn increment_view_count(&self, id: &str) -> Result<(), AppError>;

    async fn increment_completion_count(&self, id: &str) -> Result<(), AppError>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, AppError>;

    /// Fails with `Conflict` when the username is taken.
    async fn create(&self, username: &str, password_hash: &str, role: &str)
    -> Result<User, AppError>;
}
