// src/models/mod.rs

pub mod catalog;
pub mod learner;
pub mod playbook;
pub mod progress;
pub mod response;
pub mod stats;
pub mod user;
