// src/state.rs

use std::sync::Arc;

use axum::extract::FromRef;
use sqlx::PgPool;

use crate::{
    config::Config,
    services::{ProgressEngine, StatsAggregator},
    store::{InMemoryStore, PgStore, PlayBookStore, ProgressStore, UserStore},
};

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub playbooks: Arc<dyn PlayBookStore>,
    pub progress: Arc<dyn ProgressStore>,
    pub users: Arc<dyn UserStore>,
}

impl AppState {
    /// Wires every port to one backend.
    pub fn new<S>(config: Config, store: Arc<S>) -> Self
    where
        S: PlayBookStore + ProgressStore + UserStore + 'static,
    {
        Self {
            config,
            playbooks: store.clone(),
            progress: store.clone(),
            users: store,
        }
    }

    pub fn in_memory(config: Config) -> Self {
        Self::new(config, Arc::new(InMemoryStore::new()))
    }

    pub fn postgres(pool: PgPool, config: Config) -> Self {
        Self::new(config, Arc::new(PgStore::new(pool)))
    }

    pub fn engine(&self) -> ProgressEngine {
        ProgressEngine::new(self.playbooks.clone(), self.progress.clone())
    }

    pub fn stats(&self) -> StatsAggregator {
        StatsAggregator::new(self.playbooks.clone(), self.progress.clone())
    }
}

impl FromRef<AppState> for Config {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}

impl FromRef<AppState> for ProgressEngine {
    fn from_ref(state: &AppState) -> Self {
        state.engine()
    }
}

impl FromRef<AppState> for StatsAggregator {
    fn from_ref(state: &AppState) -> Self {
        state.stats()
    }
}
