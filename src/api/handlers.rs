//! Request handlers for the reporting API.

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use serde_json::json;

use super::AppState;
use crate::config;

#[derive(Debug, Deserialize)]
pub struct ReportQuery {
    url: Option<String>,
    limit: Option<u32>,
}

pub async fn handle_health() -> impl IntoResponse {
    Json(json!({"status": "healthy", "service": "sitewatch"}))
}

/// Without a `url` parameter, report every target; with one, report that
/// target joined with its recent check history.
pub async fn handle_reports(State(state): State<AppState>, Query(q): Query<ReportQuery>) -> Response {
    let limit = q.limit.unwrap_or(1000);

    let Some(url) = q.url else {
        return match state.store.list_targets() {
            Ok(targets) => Json(json!(targets)).into_response(),
            Err(e) => internal_error("failed to retrieve targets", e),
        };
    };

    match state.store.get_target_with_history(&url, limit) {
        Ok(Some(report)) => Json(json!(report)).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, Json(json!({"message": "record not found"}))).into_response(),
        Err(e) => internal_error("failed to retrieve target details", e),
    }
}

pub async fn handle_update_config(State(state): State<AppState>, body: Bytes) -> Response {
    match config::update_monitor_config(&state.config_path, &body) {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "message": "configuration updated successfully; restart the application to apply changes"
            })),
        )
            .into_response(),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(json!({"message": "failed to update configuration", "error": e.to_string()})),
        )
            .into_response(),
    }
}

fn internal_error(message: &str, err: crate::db::DbError) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"message": message, "error": err.to_string()})),
    )
        .into_response()
}
