// src/services/export.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{
    playbook::{Difficulty, PlayBook},
    stats::{StepDetail, UserResult},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Json,
    Csv,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Json => "application/json; charset=utf-8",
            ExportFormat::Csv => "text/csv; charset=utf-8",
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayBookSummary {
    pub id: String,
    pub title: String,
    pub slug: String,
    pub description: Option<String>,
    pub category: String,
    pub difficulty: Difficulty,
    pub total_steps: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportSummary {
    pub total_users: u64,
    pub completed_users: u64,
    pub average_completion_rate: u64,
    pub average_time_spent: u64,
    pub export_date: DateTime<Utc>,
}

/// Everything a download contains, before it is rendered.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportDocument {
    pub play_book: PlayBookSummary,
    pub summary: ExportSummary,
    pub user_results: Vec<UserResult>,
}

pub fn build_document(
    playbook: &PlayBook,
    user_results: Vec<UserResult>,
    now: DateTime<Utc>,
) -> ExportDocument {
    let total_users = user_results.len() as u64;
    let completed_users = user_results.iter().filter(|u| u.is_completed).count() as u64;
    let rate_sum: u64 = user_results.iter().map(|u| u.completion_rate as u64).sum();
    let time_sum: u64 = user_results.iter().map(|u| u.total_time_spent).sum();

    let mean = |sum: u64| {
        if total_users == 0 {
            0
        } else {
            (sum as f64 / total_users as f64).round() as u64
        }
    };

    ExportDocument {
        play_book: PlayBookSummary {
            id: playbook.id.clone(),
            title: playbook.title.clone(),
            slug: playbook.slug.clone(),
            description: playbook.description.clone(),
            category: playbook.category.clone(),
            difficulty: playbook.difficulty,
            total_steps: playbook.total_steps(),
        },
        summary: ExportSummary {
            total_users,
            completed_users,
            average_completion_rate: mean(rate_sum),
            average_time_spent: mean(time_sum),
            export_date: now,
        },
        user_results,
    }
}

/// `playbook_<slug>_results.<ext>`
pub fn file_name(slug: &str, format: ExportFormat) -> String {
    format!("playbook_{}_results.{}", slug, format.extension())
}

const CSV_HEADER: [&str; 11] = [
    "User ID",
    "User Name",
    "Started At",
    "Completed At",
    "Last Active At",
    "Completed",
    "Completion Rate (%)",
    "Time Spent (s)",
    "Current Step",
    "Completed Steps",
    "Step Details",
];

/// Renders the document as a spreadsheet-friendly CSV (UTF-8 with BOM).
pub fn to_csv(doc: &ExportDocument) -> String {
    let mut out = String::from('\u{feff}');

    let preamble = [
        ("PlayBook", doc.play_book.title.clone()),
        ("Exported At", doc.summary.export_date.to_rfc3339()),
        ("Total Users", doc.summary.total_users.to_string()),
        ("Completed Users", doc.summary.completed_users.to_string()),
        (
            "Average Completion Rate (%)",
            doc.summary.average_completion_rate.to_string(),
        ),
        (
            "Average Time Spent (s)",
            doc.summary.average_time_spent.to_string(),
        ),
    ];
    for (label, value) in &preamble {
        push_row(&mut out, &[label.to_string(), value.clone()]);
    }
    out.push_str("\r\n");

    push_row(&mut out, &CSV_HEADER.map(str::to_string));

    for user in &doc.user_results {
        let completed_steps = user
            .completed_steps
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let step_details = user
            .step_details
            .iter()
            .map(format_step_detail)
            .collect::<Vec<_>>()
            .join(";");

        push_row(
            &mut out,
            &[
                user.user_id.clone(),
                user.user_name.clone(),
                user.started_at.to_rfc3339(),
                user.completed_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
                user.last_active_at.to_rfc3339(),
                if user.is_completed { "yes" } else { "no" }.to_string(),
                user.completion_rate.to_string(),
                user.total_time_spent.to_string(),
                user.current_step.to_string(),
                completed_steps,
                step_details,
            ],
        );
    }
    out
}

fn format_step_detail(detail: &StepDetail) -> String {
    let mut text = format!(
        "Step {}:{}:{}s",
        detail.step_number, detail.step_title, detail.time_spent
    );
    if detail.score.is_some() || detail.passed.is_some() {
        let score = detail.score.map(|s| s.to_string()).unwrap_or_default();
        let passed = detail.passed.map(|p| p.to_string()).unwrap_or_default();
        text.push_str(&format!(":score={}:passed={}", score, passed));
    }
    if let Some(answers) = &detail.answers {
        text.push_str(&format!(":answers={}", answers));
    }
    text
}

fn push_row(out: &mut String, fields: &[String]) {
    let row = fields
        .iter()
        .map(|f| format!("\"{}\"", f.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(",");
    out.push_str(&row);
    out.push_str("\r\n");
}
