// src/services/catalog.rs

//! Filtering, ordering and paging of PlayBook lists.
//!
//! Both backends hand back the full list and the shaping happens here, so
//! the two list endpoints behave the same on either store.

use std::collections::BTreeSet;

use crate::models::{
    catalog::{
        ADMIN_PAGE_SIZE, ALL, MAX_PAGE_SIZE, PUBLIC_PAGE_SIZE, PlayBookListing, PlayBookQuery,
        PublicPlayBookQuery, SortBy,
    },
    playbook::PlayBook,
    response::PagedResponse,
};

/// Admin list: every status, filters where `all` means "any".
pub fn admin_page(mut playbooks: Vec<PlayBook>, query: &PlayBookQuery) -> PagedResponse<PlayBook> {
    let search = needle(query.search.as_deref());
    let status = filter(query.status.as_deref(), true);
    let category = filter(query.category.as_deref(), true);
    let difficulty = filter(query.difficulty.as_deref(), true);

    playbooks.retain(|pb| {
        search.as_deref().is_none_or(|s| pb.matches_search(s))
            && status.is_none_or(|s| pb.status.as_str() == s)
            && category.is_none_or(|c| pb.category == c)
            && difficulty.is_none_or(|d| pb.difficulty.as_str() == d)
    });

    let sort_by = query.sort_by.as_deref().map(SortBy::parse).unwrap_or_default();
    sort(&mut playbooks, sort_by);
    paginate(playbooks, query.page, query.page_size, ADMIN_PAGE_SIZE)
}

/// Public list: published only, newest publication first, without steps.
pub fn public_page(
    mut playbooks: Vec<PlayBook>,
    query: &PublicPlayBookQuery,
) -> PagedResponse<PlayBookListing> {
    let search = needle(query.search.as_deref());
    let category = filter(query.category.as_deref(), false);
    let difficulty = filter(query.difficulty.as_deref(), false);

    playbooks.retain(|pb| {
        pb.is_published()
            && search.as_deref().is_none_or(|s| pb.matches_search(s))
            && category.is_none_or(|c| pb.category == c)
            && difficulty.is_none_or(|d| pb.difficulty.as_str() == d)
    });

    sort(&mut playbooks, SortBy::PublishedDesc);
    let page = paginate(playbooks, query.page, query.page_size, PUBLIC_PAGE_SIZE);
    PagedResponse {
        success: page.success,
        data: page.data.into_iter().map(PlayBookListing::from).collect(),
        count: page.count,
        pages: page.pages,
        current_page: page.current_page,
    }
}

/// Distinct non-empty categories of published PlayBooks, sorted.
pub fn categories(playbooks: &[PlayBook]) -> Vec<String> {
    playbooks
        .iter()
        .filter(|pb| pb.is_published())
        .map(|pb| pb.category.trim())
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn needle(search: Option<&str>) -> Option<String> {
    search
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase)
}

fn filter(raw: Option<&str>, all_means_any: bool) -> Option<&str> {
    raw.map(str::trim)
        .filter(|v| !v.is_empty() && !(all_means_any && *v == ALL))
}

/// Stable, so ties keep the store's newest-first order.
fn sort(playbooks: &mut [PlayBook], sort_by: SortBy) {
    match sort_by {
        SortBy::Latest => playbooks.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
        SortBy::Oldest => playbooks.sort_by(|a, b| a.created_at.cmp(&b.created_at)),
        SortBy::TitleAsc => playbooks.sort_by(|a, b| a.title.cmp(&b.title)),
        SortBy::TitleDesc => playbooks.sort_by(|a, b| b.title.cmp(&a.title)),
        // Unpublished entries have no date and sort as the earliest.
        SortBy::PublishedDesc => playbooks.sort_by(|a, b| b.published_at.cmp(&a.published_at)),
        SortBy::PublishedAsc => playbooks.sort_by(|a, b| a.published_at.cmp(&b.published_at)),
        SortBy::ViewCount => playbooks.sort_by(|a, b| b.view_count.cmp(&a.view_count)),
        SortBy::CompletionCount => {
            playbooks.sort_by(|a, b| b.completion_count.cmp(&a.completion_count))
        }
    }
}

fn paginate<T>(
    items: Vec<T>,
    page: Option<u64>,
    page_size: Option<u64>,
    default_size: u64,
) -> PagedResponse<T> {
    let page = page.unwrap_or(1).max(1);
    let page_size = page_size.unwrap_or(default_size).clamp(1, MAX_PAGE_SIZE);
    let count = items.len() as u64;
    let skip = usize::try_from((page - 1).saturating_mul(page_size)).unwrap_or(usize::MAX);

    PagedResponse {
        success: true,
        data: items
            .into_iter()
            .skip(skip)
            .take(page_size as usize)
            .collect(),
        count,
        pages: count.div_ceil(page_size),
        current_page: page,
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::models::playbook::{Difficulty, PlayBookStatus, StepType, sample_playbook};

    /// Five PlayBooks created a minute apart, `pb0` oldest.
    fn shelf() -> Vec<PlayBook> {
        let base = Utc::now();
        (0..5)
            .map(|i| {
                let mut pb = sample_playbook(&format!("pb{}", i), &[StepType::Content]);
                pb.created_at = base + Duration::minutes(i);
                pb.published_at = Some(base + Duration::minutes(10 - i));
                pb.view_count = i * 3 % 5;
                pb
            })
            .collect()
    }

    fn ids(items: &[PlayBook]) -> Vec<String> {
        items.iter().map(|p| p.id.clone()).collect()
    }

    fn listing_ids(items: &[PlayBookListing]) -> Vec<String> {
        items.iter().map(|p| p.id.clone()).collect()
    }

    #[test]
    fn admin_defaults_to_latest_first_page() {
        let page = admin_page(shelf(), &PlayBookQuery::default());
        assert_eq!(page.count, 5);
        assert_eq!(page.pages, 1);
        assert_eq!(page.current_page, 1);
        assert_eq!(
            ids(&page.data),
            vec!["pb4", "pb3", "pb2", "pb1", "pb0"]
        );
    }

    #[test]
    fn admin_filters_combine() {
        let mut books = shelf();
        books[0].status = PlayBookStatus::Draft;
        books[1].status = PlayBookStatus::Draft;
        books[1].category = "safety".into();
        books[2].difficulty = Difficulty::Advanced;
        books[3].tags = vec!["Fire drill".into()];

        let drafts = admin_page(
            books.clone(),
            &PlayBookQuery {
                status: Some("draft".into()),
                category: Some("all".into()),
                ..Default::default()
            },
        );
        assert_eq!(ids(&drafts.data), vec!["pb1", "pb0"]);

        let safety_drafts = admin_page(
            books.clone(),
            &PlayBookQuery {
                status: Some("draft".into()),
                category: Some("safety".into()),
                ..Default::default()
            },
        );
        assert_eq!(ids(&safety_drafts.data), vec!["pb1"]);

        let advanced = admin_page(
            books.clone(),
            &PlayBookQuery {
                difficulty: Some("advanced".into()),
                ..Default::default()
            },
        );
        assert_eq!(ids(&advanced.data), vec!["pb2"]);

        let by_tag = admin_page(
            books,
            &PlayBookQuery {
                search: Some("DRILL".into()),
                ..Default::default()
            },
        );
        assert_eq!(ids(&by_tag.data), vec!["pb3"]);
    }

    #[test]
    fn admin_sort_keys() {
        let sorted = |key: &str| {
            let page = admin_page(
                shelf(),
                &PlayBookQuery {
                    sort_by: Some(key.into()),
                    ..Default::default()
                },
            );
            ids(&page.data)
        };
        assert_eq!(sorted("oldest"), vec!["pb0", "pb1", "pb2", "pb3", "pb4"]);
        assert_eq!(sorted("titleDesc")[0], "pb4");
        assert_eq!(sorted("publishedAsc")[0], "pb4");
        // View counts are 0, 3, 1, 4, 2.
        assert_eq!(sorted("viewCount"), vec!["pb3", "pb1", "pb4", "pb2", "pb0"]);
        assert_eq!(sorted("nonsense"), sorted("latest"));
    }

    #[test]
    fn pages_are_counted_and_clamped() {
        let second = admin_page(
            shelf(),
            &PlayBookQuery {
                page: Some(2),
                page_size: Some(2),
                ..Default::default()
            },
        );
        assert_eq!(second.count, 5);
        assert_eq!(second.pages, 3);
        assert_eq!(second.current_page, 2);
        assert_eq!(ids(&second.data), vec!["pb2", "pb1"]);

        let beyond = admin_page(
            shelf(),
            &PlayBookQuery {
                page: Some(9),
                page_size: Some(2),
                ..Default::default()
            },
        );
        assert!(beyond.data.is_empty());
        assert_eq!(beyond.count, 5);

        let zero = admin_page(
            shelf(),
            &PlayBookQuery {
                page: Some(0),
                page_size: Some(0),
                ..Default::default()
            },
        );
        assert_eq!(zero.current_page, 1);
        assert_eq!(zero.data.len(), 1);
        assert_eq!(zero.pages, 5);
    }

    #[test]
    fn public_list_hides_drafts_and_steps() {
        let mut books = shelf();
        books[4].status = PlayBookStatus::Draft;
        books[4].published_at = None;
        books[1].category = "safety".into();

        let page = public_page(books.clone(), &PublicPlayBookQuery::default());
        assert_eq!(page.count, 4);
        // Published most recently first: pb0 at +10 minutes.
        assert_eq!(listing_ids(&page.data), vec!["pb0", "pb1", "pb2", "pb3"]);
        assert_eq!(page.data[0].total_steps, 1);
        let json = serde_json::to_value(&page).unwrap();
        assert!(json["data"][0].get("steps").is_none());
        assert_eq!(json["currentPage"], 1);

        let safety = public_page(
            books,
            &PublicPlayBookQuery {
                category: Some("safety".into()),
                ..Default::default()
            },
        );
        assert_eq!(listing_ids(&safety.data), vec!["pb1"]);
    }

    #[test]
    fn categories_are_distinct_and_published_only() {
        let mut books = shelf();
        books[0].category = "safety".into();
        books[1].category = "safety".into();
        books[2].category = " ".into();
        books[3].category = "hr".into();
        books[3].status = PlayBookStatus::Draft;

        assert_eq!(categories(&books), vec!["general", "safety"]);
    }
}
