// src/models/learner.rs

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

const MAX_LEARNER_ID_LEN: usize = 128;

/// Opaque learner identifier generated and kept by the client.
///
/// Anonymous learners have no server-issued identity, so every progress call
/// carries this token explicitly. Construction trims whitespace and rejects
/// empty or oversized values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LearnerId(String);

impl LearnerId {
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(AppError::BadRequest("userId is required".to_string()));
        }
        if trimmed.chars().count() > MAX_LEARNER_ID_LEN {
            return Err(AppError::BadRequest(format!(
                "userId must be at most {} characters",
                MAX_LEARNER_ID_LEN
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Parses an optional request field, treating absence as a missing userId.
    pub fn require(raw: Option<&str>) -> Result<Self, AppError> {
        Self::parse(raw.unwrap_or_default())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for LearnerId {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<LearnerId> for String {
    fn from(value: LearnerId) -> Self {
        value.0
    }
}

impl fmt::Display for LearnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
