// src/models/playbook.rs

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use validator::Validate;

static SLUG_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]+(?:-[a-z0-9]+)*$").unwrap());

pub const MAX_TAGS: usize = 10;
const MAX_TAG_LEN: usize = 30;
const DEFAULT_CATEGORY: &str = "general";

/// The kind of resource a step points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StepType {
    Content,
    Exam,
    Survey,
    CustomPage,
}

impl StepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepType::Content => "content",
            StepType::Exam => "exam",
            StepType::Survey => "survey",
            StepType::CustomPage => "customPage",
        }
    }

    /// Average minutes a learner spends on a step of this type.
    pub fn estimated_minutes(&self) -> u32 {
        match self {
            StepType::Content => 5,
            StepType::Exam => 10,
            StepType::Survey => 3,
            StepType::CustomPage => 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayBookStatus {
    #[default]
    Draft,
    Published,
}

impl PlayBookStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlayBookStatus::Draft => "draft",
            PlayBookStatus::Published => "published",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "draft" => Some(PlayBookStatus::Draft),
            "published" => Some(PlayBookStatus::Published),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    #[default]
    Beginner,
    Intermediate,
    Advanced,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Beginner => "beginner",
            Difficulty::Intermediate => "intermediate",
            Difficulty::Advanced => "advanced",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "beginner" => Some(Difficulty::Beginner),
            "intermediate" => Some(Difficulty::Intermediate),
            "advanced" => Some(Difficulty::Advanced),
            _ => None,
        }
    }
}

/// How the player presents a PlayBook: an overview page listing every step,
/// or straight into the steps one at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DisplayType {
    #[default]
    Overview,
    StepByStep,
}

impl DisplayType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisplayType::Overview => "overview",
            DisplayType::StepByStep => "stepByStep",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "overview" => Some(DisplayType::Overview),
            "stepByStep" => Some(DisplayType::StepByStep),
            _ => None,
        }
    }
}

/// One unit of a PlayBook. Step numbers run `1..=total_steps` with no gaps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub step_number: u32,
    #[serde(rename = "type")]
    pub step_type: StepType,
    pub resource_id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_required")]
    pub is_required: bool,
    /// Minutes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_limit: Option<u32>,
}

fn default_required() -> bool {
    true
}

/// An authored learning path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayBook {
    pub id: String,
    pub title: String,
    pub slug: String,
    pub description: Option<String>,
    pub category: String,
    pub difficulty: Difficulty,
    #[serde(default)]
    pub display_type: DisplayType,
    #[serde(default)]
    pub tags: Vec<String>,
    pub status: PlayBookStatus,
    pub steps: Vec<Step>,
    pub estimated_time: u32,
    pub view_count: i64,
    pub completion_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

impl PlayBook {
    pub fn total_steps(&self) -> u32 {
        self.steps.len() as u32
    }

    pub fn step(&self, step_number: u32) -> Option<&Step> {
        self.steps.iter().find(|s| s.step_number == step_number)
    }

    pub fn is_published(&self) -> bool {
        self.status == PlayBookStatus::Published
    }

    /// Builds a new definition from a validated create request.
    ///
    /// Steps are numbered in request order, so the no-gaps invariant holds by
    /// construction.
    pub fn from_request(req: CreatePlayBookRequest, now: DateTime<Utc>) -> Self {
        let steps = number_steps(req.steps);

        let status = req.status.unwrap_or_default();
        let slug = match req.slug {
            Some(slug) if !slug.is_empty() => slug,
            _ => slugify(&req.title),
        };

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            estimated_time: estimate_minutes(&steps),
            title: req.title,
            slug,
            description: req.description,
            category: category_or_default(req.category),
            difficulty: req.difficulty.unwrap_or_default(),
            display_type: req.display_type.unwrap_or_default(),
            tags: clean_tags(req.tags),
            status,
            steps,
            view_count: 0,
            completion_count: 0,
            created_at: now,
            updated_at: now,
            published_at: (status == PlayBookStatus::Published).then_some(now),
        }
    }

    /// Applies a partial update. Absent fields are left alone.
    ///
    /// Replacing the steps renumbers them and re-estimates the time.
    /// Publishing stamps `published_at` once; moving back to draft clears it.
    pub fn apply_update(mut self, req: UpdatePlayBookRequest, now: DateTime<Utc>) -> Self {
        if let Some(title) = req.title {
            self.title = title;
        }
        if let Some(description) = req.description {
            self.description = Some(description).filter(|d| !d.trim().is_empty());
        }
        if req.category.is_some() {
            self.category = category_or_default(req.category);
        }
        if let Some(difficulty) = req.difficulty {
            self.difficulty = difficulty;
        }
        if let Some(display_type) = req.display_type {
            self.display_type = display_type;
        }
        if let Some(tags) = req.tags {
            self.tags = clean_tags(tags);
        }
        if let Some(steps) = req.steps {
            self.steps = number_steps(steps);
            self.estimated_time = estimate_minutes(&self.steps);
        }
        if let Some(status) = req.status {
            match status {
                PlayBookStatus::Published if self.published_at.is_none() => {
                    self.published_at = Some(now)
                }
                PlayBookStatus::Draft => self.published_at = None,
                PlayBookStatus::Published => {}
            }
            self.status = status;
        }
        self.updated_at = now;
        self
    }

    /// Case-insensitive match against title, description and tags.
    /// `needle` must already be lowercase.
    pub fn matches_search(&self, needle: &str) -> bool {
        self.title.to_lowercase().contains(needle)
            || self
                .description
                .as_deref()
                .is_some_and(|d| d.to_lowercase().contains(needle))
            || self.tags.iter().any(|t| t.to_lowercase().contains(needle))
    }
}

/// Numbers steps in request order, so the no-gaps invariant holds by
/// construction.
fn number_steps(steps: Vec<CreateStepRequest>) -> Vec<Step> {
    steps
        .into_iter()
        .enumerate()
        .map(|(idx, s)| Step {
            step_number: idx as u32 + 1,
            step_type: s.step_type,
            resource_id: s.resource_id,
            title: s.title,
            description: s.description,
            is_required: s.is_required.unwrap_or(true),
            time_limit: s.time_limit,
        })
        .collect()
}

fn category_or_default(category: Option<String>) -> String {
    category
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| DEFAULT_CATEGORY.to_string())
}

/// Trimmed, non-empty, first occurrence kept.
fn clean_tags(tags: Vec<String>) -> Vec<String> {
    let mut cleaned: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim();
        if !tag.is_empty() && !cleaned.iter().any(|t| t == tag) {
            cleaned.push(tag.to_string());
        }
    }
    cleaned
}

pub fn estimate_minutes(steps: &[Step]) -> u32 {
    steps.iter().map(|s| s.step_type.estimated_minutes()).sum()
}

/// Lowercase ASCII slug of `title`. Titles with no ASCII letters or digits
/// get a random `pb-xxxxxx` slug instead.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_dash = false;

    for ch in title.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            slug.push(ch.to_ascii_lowercase());
            pending_dash = false;
        } else {
            pending_dash = true;
        }
    }

    if slug.is_empty() {
        let random = uuid::Uuid::new_v4().simple().to_string();
        return format!("pb-{}", &random[..6]);
    }
    slug
}

/// DTO for one step in a create or update request. Step numbers are
/// assigned by the server.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateStepRequest {
    #[serde(rename = "type")]
    pub step_type: StepType,
    pub resource_id: String,
    pub title: String,
    pub description: Option<String>,
    pub is_required: Option<bool>,
    pub time_limit: Option<u32>,
}

/// DTO for creating a PlayBook.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreatePlayBookRequest {
    #[validate(length(min = 1, max = 100, message = "Title must be between 1 and 100 characters."))]
    pub title: String,
    #[validate(regex(path = *SLUG_REGEX, message = "Slug may only contain lowercase letters, digits and dashes."))]
    pub slug: Option<String>,
    #[validate(length(max = 1000))]
    pub description: Option<String>,
    #[validate(length(max = 50))]
    pub category: Option<String>,
    pub difficulty: Option<Difficulty>,
    pub display_type: Option<DisplayType>,
    #[serde(default)]
    #[validate(custom(function = validate_tags))]
    pub tags: Vec<String>,
    pub status: Option<PlayBookStatus>,
    #[serde(default)]
    #[validate(custom(function = validate_steps))]
    pub steps: Vec<CreateStepRequest>,
}

/// DTO for a partial PlayBook update. The slug is fixed once created.
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePlayBookRequest {
    #[validate(length(min = 1, max = 100, message = "Title must be between 1 and 100 characters."))]
    pub title: Option<String>,
    #[validate(length(max = 1000))]
    pub description: Option<String>,
    #[validate(length(max = 50))]
    pub category: Option<String>,
    pub difficulty: Option<Difficulty>,
    pub display_type: Option<DisplayType>,
    #[validate(custom(function = validate_tags))]
    pub tags: Option<Vec<String>>,
    pub status: Option<PlayBookStatus>,
    #[validate(custom(function = validate_steps))]
    pub steps: Option<Vec<CreateStepRequest>>,
}

fn validate_tags(tags: &[String]) -> Result<(), validator::ValidationError> {
    if tags.len() > MAX_TAGS {
        return Err(validator::ValidationError::new("too_many_tags"));
    }
    if tags.iter().any(|t| t.trim().chars().count() > MAX_TAG_LEN) {
        return Err(validator::ValidationError::new("tag_too_long"));
    }
    Ok(())
}

fn validate_steps(steps: &[CreateStepRequest]) -> Result<(), validator::ValidationError> {
    for step in steps {
        let title_len = step.title.trim().chars().count();
        if title_len == 0 || title_len > 100 {
            return Err(validator::ValidationError::new("invalid_step_title"));
        }
        if step.description.as_ref().is_some_and(|d| d.chars().count() > 500) {
            return Err(validator::ValidationError::new("step_description_too_long"));
        }
        if step.resource_id.trim().is_empty() {
            return Err(validator::ValidationError::new("missing_step_resource"));
        }
    }
    Ok(())
}

/// Builds a published PlayBook with one step per entry of `types`.
#[cfg(test)]
pub(crate) fn sample_playbook(id: &str, types: &[StepType]) -> PlayBook {
    let now = Utc::now();
    let steps: Vec<Step> = types
        .iter()
        .enumerate()
        .map(|(idx, t)| Step {
            step_number: idx as u32 + 1,
            step_type: *t,
            resource_id: format!("res-{}", idx + 1),
            title: format!("{} {}", t.as_str(), idx + 1),
            description: None,
            is_required: true,
            time_limit: None,
        })
        .collect();

    PlayBook {
        id: id.to_string(),
        title: format!("PlayBook {}", id),
        slug: id.to_string(),
        description: None,
        category: "general".to_string(),
        difficulty: Difficulty::Beginner,
        display_type: DisplayType::Overview,
        tags: Vec::new(),
        status: PlayBookStatus::Published,
        estimated_time: estimate_minutes(&steps),
        steps,
        view_count: 0,
        completion_count: 0,
        created_at: now,
        updated_at: now,
        published_at: Some(now),
    }
}
