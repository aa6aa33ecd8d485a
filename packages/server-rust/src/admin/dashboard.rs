//! Job-queue dashboard.
//!
//! A server-rendered overview of queue depths plus the same numbers as
//! JSON. Served by both roles; the admin gate decides who may see it.

use std::fmt::Write as _;

use axum::extract::State;
use axum::response::Html;
use axum::Json;
use serde::Serialize;

use super::AdminState;
use crate::network::ApiError;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct QueueStats {
    pub name: String,
    pub waiting: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardStats {
    pub role: &'static str,
    pub queues: Vec<QueueStats>,
}

async fn collect(state: &AdminState) -> Result<DashboardStats, ApiError> {
    let mut queues = Vec::with_capacity(state.queue_names.len());
    for name in &state.queue_names {
        let waiting = state.queue.len(name).await.map_err(ApiError::internal)?;
        queues.push(QueueStats {
            name: (*name).to_string(),
            waiting,
        });
    }
    Ok(DashboardStats {
        role: state.role.as_str(),
        queues,
    })
}

fn escape_html(raw: &str) -> String {
    raw.chars().fold(String::with_capacity(raw.len()), |mut out, c| {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
        out
    })
}

fn render(stats: &DashboardStats) -> String {
    let mut rows = String::new();
    for queue in &stats.queues {
        let _ = write!(
            rows,
            "<tr><td>{}</td><td>{}</td></tr>",
            escape_html(&queue.name),
            queue.waiting
        );
    }
    format!(
        "<!doctype html>\
         <html lang=\"en\"><head><meta charset=\"utf-8\"><title>Queues</title></head>\
         <body><h1>Job queues</h1><p>Reported by the {role} process.</p>\
         <table><thead><tr><th>Queue</th><th>Waiting</th></tr></thead>\
         <tbody>{rows}</tbody></table>\
         <p><a href=\"/api/queues/stats\">JSON</a></p></body></html>",
        role = stats.role,
    )
}

/// `GET /api/queues`
pub async fn dashboard_page(State(state): State<AdminState>) -> Result<Html<String>, ApiError> {
    let stats = collect(&state).await?;
    Ok(Html(render(&stats)))
}

/// `GET /api/queues/stats`
pub async fn dashboard_stats(
    State(state): State<AdminState>,
) -> Result<Json<DashboardStats>, ApiError> {
    collect(&state).await.map(Json)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use gatehouse_core::Role;
    use serde_json::json;

    use super::*;
    use crate::jobs::{new_job, JobQueue, MemoryJobQueue};

    async fn state() -> AdminState {
        let queue = MemoryJobQueue::new();
        queue.push(new_job("resources", "a", json!(null))).await.unwrap();
        queue.push(new_job("resources", "b", json!(null))).await.unwrap();
        AdminState {
            queue: Arc::new(queue),
            queue_names: vec!["resources", "mail"],
            role: Role::Worker,
        }
    }

    #[tokio::test]
    async fn stats_report_every_known_queue() {
        let Json(stats) = dashboard_stats(State(state().await)).await.unwrap();
        assert_eq!(stats.role, "worker");
        assert_eq!(
            stats.queues,
            vec![
                QueueStats {
                    name: "resources".to_string(),
                    waiting: 2
                },
                QueueStats {
                    name: "mail".to_string(),
                    waiting: 0
                },
            ]
        );
    }

    #[tokio::test]
    async fn page_renders_rows_without_scripts() {
        let Html(page) = dashboard_page(State(state().await)).await.unwrap();
        assert!(page.contains("<td>resources</td><td>2</td>"));
        assert!(!page.contains("<script"));
    }

    #[test]
    fn names_are_escaped() {
        assert_eq!(escape_html("<a&b>"), "&lt;a&amp;b&gt;");
    }
}
