// src/models/catalog.rs

//! Query parameters and list views for browsing PlayBooks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::playbook::{Difficulty, DisplayType, PlayBook, PlayBookStatus};

/// Filter value meaning "no filter" on the admin list.
pub const ALL: &str = "all";

pub const ADMIN_PAGE_SIZE: u64 = 10;
pub const PUBLIC_PAGE_SIZE: u64 = 12;
pub const MAX_PAGE_SIZE: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortBy {
    #[default]
    Latest,
    Oldest,
    TitleAsc,
    TitleDesc,
    PublishedDesc,
    PublishedAsc,
    ViewCount,
    CompletionCount,
}

impl SortBy {
    /// Unknown keys sort newest first.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "oldest" => SortBy::Oldest,
            "titleAsc" => SortBy::TitleAsc,
            "titleDesc" => SortBy::TitleDesc,
            "publishedDesc" => SortBy::PublishedDesc,
            "publishedAsc" => SortBy::PublishedAsc,
            "viewCount" => SortBy::ViewCount,
            "completionCount" => SortBy::CompletionCount,
            _ => SortBy::Latest,
        }
    }
}

/// `GET /api/playbooks` query. `all` (or an empty value) disables a filter.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayBookQuery {
    pub page: Option<u64>,
    pub page_size: Option<u64>,
    pub search: Option<String>,
    pub status: Option<String>,
    pub category: Option<String>,
    pub difficulty: Option<String>,
    pub sort_by: Option<String>,
}

/// `GET /api/playbooks/public` query. Only published PlayBooks are listed.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicPlayBookQuery {
    pub page: Option<u64>,
    pub page_size: Option<u64>,
    pub search: Option<String>,
    pub category: Option<String>,
    pub difficulty: Option<String>,
}

/// A PlayBook without its steps, for public browsing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayBookListing {
    pub id: String,
    pub title: String,
    pub slug: String,
    pub description: Option<String>,
    pub category: String,
    pub difficulty: Difficulty,
    pub display_type: DisplayType,
    pub tags: Vec<String>,
    pub status: PlayBookStatus,
    pub total_steps: u32,
    pub estimated_time: u32,
    pub view_count: i64,
    pub completion_count: i64,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

impl From<PlayBook> for PlayBookListing {
    fn from(pb: PlayBook) -> Self {
        Self {
            total_steps: pb.total_steps(),
            id: pb.id,
            title: pb.title,
            slug: pb.slug,
            description: pb.description,
            category: pb.category,
            difficulty: pb.difficulty,
            display_type: pb.display_type,
            tags: pb.tags,
            status: pb.status,
            estimated_time: pb.estimated_time,
            view_count: pb.view_count,
            completion_count: pb.completion_count,
            created_at: pb.created_at,
            published_at: pb.published_at,
        }
    }
}
