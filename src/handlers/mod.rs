// src/handlers/mod.rs

pub mod auth;
pub mod playbook;
pub mod progress;
pub mod stats;
