//! Import request and progress-polling endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use crate::calendar;
use crate::scrape::{Credentials, DateRange};
use crate::server::types::ApiErrorType;
use crate::types::AppState;

#[derive(Debug, Deserialize)]
pub struct ImportRequest {
    pub username: String,
    pub password: String,
    pub start_date: String,
    pub end_date: String,
}

#[derive(Debug, Serialize)]
pub struct ImportResponse {
    pub session_token: String,
}

/// POST /import
/// Validates the request, schedules a detached import run, and returns the
/// session token to poll.
pub async fn post_import(
    State(s): State<Arc<AppState>>,
    Json(req): Json<ImportRequest>,
) -> Response {
    info!("POST /import ({} to {})", req.start_date, req.end_date);

    if req.username.trim().is_empty()
        || req.password.is_empty()
        || req.start_date.trim().is_empty()
        || req.end_date.trim().is_empty()
    {
        return ApiErrorType::from((StatusCode::BAD_REQUEST, "All fields are required", None))
            .into_response();
    }

    let (start, end) = match (parse_date(&req.start_date), parse_date(&req.end_date)) {
        (Some(start), Some(end)) => (start, end),
        _ => {
            return ApiErrorType::from((
                StatusCode::BAD_REQUEST,
                "Invalid date format. Please use YYYY-MM-DD",
                None,
            ))
            .into_response()
        }
    };

    if !calendar::is_authorized(&s.config.token_file) {
        return ApiErrorType::from((
            StatusCode::BAD_REQUEST,
            "Calendar not authorized. Please authorize first",
            None,
        ))
        .into_response();
    }

    let token = s.registry.new_token();
    s.registry.start_import(
        &token,
        Credentials {
            username: req.username,
            password: req.password,
        },
        DateRange { start, end },
        s.config.clone(),
    );

    (
        StatusCode::ACCEPTED,
        Json(ImportResponse {
            session_token: token,
        }),
    )
        .into_response()
}

/// GET /progress/:token
/// Non-blocking progress lookup; unknown tokens read as not started.
pub async fn get_progress(
    Path(token): Path<String>,
    State(s): State<Arc<AppState>>,
) -> Response {
    (StatusCode::OK, Json(s.registry.progress(&token))).into_response()
}

/// POST /progress/reset
/// Issues a fresh token so new polling is decoupled from a prior run's
/// terminal state.
pub async fn post_reset_progress(State(s): State<Arc<AppState>>) -> Response {
    let token = s.registry.new_token();
    (StatusCode::OK, Json(json!({ "session_token": token }))).into_response()
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dates_must_be_iso() {
        assert_eq!(
            parse_date("2025-01-06"),
            NaiveDate::from_ymd_opt(2025, 1, 6)
        );
        assert_eq!(parse_date(" 2025-01-06 "), NaiveDate::from_ymd_opt(2025, 1, 6));
        assert!(parse_date("06/01/2025").is_none());
        assert!(parse_date("2025-13-01").is_none());
        assert!(parse_date("").is_none());
    }
}
