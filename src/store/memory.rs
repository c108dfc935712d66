// src/store/memory.rs

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::{
    error::AppError,
    models::{learner::LearnerId, playbook::PlayBook, progress::ProgressRecord, user::User},
    store::{PlayBookStore, ProgressStore, UserStore},
};

type ProgressKey = (String, String);

fn key(playbook_id: &str, user_id: &LearnerId) -> ProgressKey {
    (playbook_id.to_string(), user_id.as_str().to_string())
}

/// Process-local backend for every port.
#[derive(Default)]
pub struct InMemoryStore {
    playbooks: RwLock<HashMap<String, PlayBook>>,
    progress: RwLock<HashMap<ProgressKey, ProgressRecord>>,
    users: RwLock<HashMap<String, User>>,
    next_user_id: AtomicI64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProgressStore for InMemoryStore {
    async fn find(
        &self,
        playbook_id: &str,
        user_id: &LearnerId,
    ) -> Result<Option<ProgressRecord>, AppError> {
        let store = self.progress.read().await;
        Ok(store.get(&key(playbook_id, user_id)).cloned())
    }

    async fn create_if_absent(&self, record: &ProgressRecord) -> Result<ProgressRecord, AppError> {
        let mut store = self.progress.write().await;
        let stored = store
            .entry(key(&record.playbook_id, &record.user_id))
            .or_insert_with(|| record.clone());
        Ok(stored.clone())
    }

    async fn save(
        &self,
        record: &ProgressRecord,
        expected_version: i64,
    ) -> Result<Option<ProgressRecord>, AppError> {
        let mut store = self.progress.write().await;
        let Some(current) = store.get_mut(&key(&record.playbook_id, &record.user_id)) else {
            return Err(AppError::NotFound("Progress record not found".to_string()));
        };

        if current.version != expected_version {
            return Ok(None);
        }

        let mut saved = record.clone();
        saved.version = expected_version + 1;
        saved.updated_at = Utc::now();
        *current = saved.clone();
        Ok(Some(saved))
    }

    async fn list_by_playbook(&self, playbook_id: &str) -> Result<Vec<ProgressRecord>, AppError> {
        let store = self.progress.read().await;
        Ok(store
            .values()
            .filter(|r| r.playbook_id == playbook_id)
            .cloned()
            .collect())
    }

    async fn delete_by_playbook(&self, playbook_id: &str) -> Result<u64, AppError> {
        let mut store = self.progress.write().await;
        let before = store.len();
        store.retain(|(pb, _), _| pb != playbook_id);
        Ok((before - store.len()) as u64)
    }
}

#[async_trait]
impl PlayBookStore for InMemoryStore {
    async fn get(&self, id: &str) -> Result<Option<PlayBook>, AppError> {
        Ok(self.playbooks.read().await.get(id).cloned())
    }

    async fn get_by_slug(&self, slug: &str) -> Result<Option<PlayBook>, AppError> {
        let store = self.playbooks.read().await;
        Ok(store.values().find(|p| p.slug == slug).cloned())
    }

    async fn list(&self) -> Result<Vec<PlayBook>, AppError> {
        let mut list: Vec<PlayBook> = self.playbooks.read().await.values().cloned().collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(list)
    }

    async fn create(&self, playbook: &PlayBook) -> Result<PlayBook, AppError> {
        let mut store = self.playbooks.write().await;
        if store.values().any(|p| p.slug == playbook.slug) {
            return Err(AppError::Conflict(format!(
                "Slug '{}' is already in use",
                playbook.slug
            )));
        }
        if store.contains_key(&playbook.id) {
            return Err(AppError::Conflict("PlayBook already exists".to_string()));
        }
        store.insert(playbook.id.clone(), playbook.clone());
        Ok(playbook.clone())
    }

    async fn update(&self, playbook: &PlayBook) -> Result<PlayBook, AppError> {
        let mut store = self.playbooks.write().await;
        let Some(current) = store.get_mut(&playbook.id) else {
            return Err(AppError::NotFound("PlayBook not found".to_string()));
        };

        let mut updated = playbook.clone();
        updated.view_count = current.view_count;
        updated.completion_count = current.completion_count;
        *current = updated.clone();
        Ok(updated)
    }

    async fn delete(&self, id: &str) -> Result<bool, AppError> {
        Ok(self.playbooks.write().await.remove(id).is_some())
    }

    async fn increment_view_count(&self, id: &str) -> Result<(), AppError> {
        if let Some(pb) = self.playbooks.write().await.get_mut(id) {
            pb.view_count += 1;
        }
        Ok(())
    }

    async fn increment_completion_count(&self, id: &str) -> Result<(), AppError> {
        if let Some(pb) = self.playbooks.write().await.get_mut(id) {
            pb.completion_count += 1;
        }
        Ok(())
    }
}

#[async_trait]
impl UserStore for InMemoryStore {
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, AppError> {
        Ok(self.users.read().await.get(username).cloned())
    }

    async fn create(
        &self,
        username: &str,
        password_hash: &str,
        role: &str,
    ) -> Result<User, AppError> {
        let mut users = self.users.write().await;
        if users.contains_key(username) {
            return Err(AppError::Conflict(format!(
                "Username '{}' already exists",
                username
            )));
        }
        let user = User {
            id: self.next_user_id.fetch_add(1, Ordering::Relaxed) + 1,
            username: username.to_string(),
            password: password_hash.to_string(),
            role: role.to_string(),
            created_at: Some(Utc::now()),
        };
        users.insert(username.to_string(), user.clone());
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::playbook::{StepType, sample_playbook};

    fn record(pb: &PlayBook, user: &str) -> ProgressRecord {
        ProgressRecord::start(pb, LearnerId::parse(user).unwrap(), None, Utc::now())
    }

    #[tokio::test]
    async fn create_if_absent_keeps_the_first_record() {
        let store = InMemoryStore::new();
        let pb = sample_playbook("pb1", &[StepType::Content, StepType::Exam]);

        let first = store.create_if_absent(&record(&pb, "u1")).await.unwrap();
        let second = store.create_if_absent(&record(&pb, "u1")).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(store.list_by_playbook("pb1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn save_rejects_stale_versions() {
        let store = InMemoryStore::new();
        let pb = sample_playbook("pb1", &[StepType::Content]);
        let rec = store.create_if_absent(&record(&pb, "u1")).await.unwrap();

        let saved = store.save(&rec, 0).await.unwrap().expect("fresh version");
        assert_eq!(saved.version, 1);

        let stale = store.save(&rec, 0).await.unwrap();
        assert!(stale.is_none());

        let found = store
            .find("pb1", &LearnerId::parse("u1").unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.version, 1);
    }

    #[tokio::test]
    async fn save_of_unknown_record_is_not_found() {
        let store = InMemoryStore::new();
        let pb = sample_playbook("pb1", &[StepType::Content]);
        let err = store.save(&record(&pb, "ghost"), 0).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn delete_by_playbook_only_touches_that_playbook() {
        let store = InMemoryStore::new();
        let a = sample_playbook("a", &[StepType::Content]);
        let b = sample_playbook("b", &[StepType::Content]);
        store.create_if_absent(&record(&a, "u1")).await.unwrap();
        store.create_if_absent(&record(&a, "u2")).await.unwrap();
        store.create_if_absent(&record(&b, "u1")).await.unwrap();

        assert_eq!(store.delete_by_playbook("a").await.unwrap(), 2);
        assert!(store.list_by_playbook("a").await.unwrap().is_empty());
        assert_eq!(store.list_by_playbook("b").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn playbook_slugs_are_unique() {
        let store = InMemoryStore::new();
        let pb = sample_playbook("pb1", &[StepType::Content]);
        PlayBookStore::create(&store, &pb).await.unwrap();

        let mut dup = pb.clone();
        dup.id = "pb2".to_string();
        let err = PlayBookStore::create(&store, &dup).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn playbook_update_keeps_counters() {
        let store = InMemoryStore::new();
        let pb = sample_playbook("pb1", &[StepType::Content]);
        PlayBookStore::create(&store, &pb).await.unwrap();
        store.increment_view_count("pb1").await.unwrap();

        let mut edited = pb.clone();
        edited.title = "Renamed".to_string();
        let saved = store.update(&edited).await.unwrap();
        assert_eq!(saved.title, "Renamed");
        assert_eq!(saved.view_count, 1);

        let mut ghost = pb;
        ghost.id = "ghost".to_string();
        assert!(matches!(
            store.update(&ghost).await.unwrap_err(),
            AppError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn users_get_sequential_ids() {
        let store = InMemoryStore::new();
        let a = UserStore::create(&store, "alice", "hash", "admin").await.unwrap();
        let b = UserStore::create(&store, "bob", "hash", "user").await.unwrap();
        assert_eq!((a.id, b.id), (1, 2));
        assert!(UserStore::create(&store, "alice", "x", "user").await.is_err());
    }
}
