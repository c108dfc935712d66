// src/services/mod.rs

pub mod catalog;
pub mod export;
pub mod progress;
pub mod stats;

pub use progress::{ProgressEngine, StepCompletion};
pub use stats::StatsAggregator;
