use std::sync::LazyLock;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use chrono::{Local, NaiveDate};
use regex::Regex;

use super::templates;
use super::AppState;
use crate::constants::DAY_FORMAT;

/// Body returned whenever there is nothing to show.
const NO_NEW: &str = "no new";

static DAY_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^20\d{2}-\d{2}-\d{2}$").expect("Invalid regex"));

/// Create the router with all routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/topics/:day", get(topics))
        .route("/api/crawl", get(trigger_crawl).post(trigger_crawl))
        .route("/healthz", get(health))
        .fallback(no_new)
}

/// Handler for a day bucket (GET /topics/:day).
///
/// `:day` is `today`, `yesterday` or `YYYY-MM-DD`.
async fn topics(State(state): State<AppState>, Path(day): Path<String>) -> Response {
    let Some(day) = resolve_day(&day, Local::now().date_naive()) else {
        return NO_NEW.into_response();
    };

    match state.scheduler.store().load_bucket(day).await {
        Ok(bucket) if bucket.is_empty() => NO_NEW.into_response(),
        Ok(bucket) => Html(templates::render_day(&bucket)).into_response(),
        Err(e) => {
            tracing::error!(day = %day, "Failed to load day bucket: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, "inner error").into_response()
        }
    }
}

/// Handler for an on-demand crawl (GET/POST /api/crawl).
///
/// The pass runs in the background behind any pass already in progress.
async fn trigger_crawl(State(state): State<AppState>) -> &'static str {
    let scheduler = state.scheduler.clone();
    tokio::spawn(async move {
        scheduler.tick().await;
    });
    tracing::info!("Manual crawl triggered");
    "ok"
}

async fn health() -> &'static str {
    "ok"
}

async fn no_new() -> &'static str {
    NO_NEW
}

fn resolve_day(raw: &str, today: NaiveDate) -> Option<NaiveDate> {
    match raw {
        "today" => Some(today),
        "yesterday" => today.pred_opt(),
        _ if DAY_PATTERN.is_match(raw) => NaiveDate::parse_from_str(raw, DAY_FORMAT).ok(),
        _ => None,
    }
}
