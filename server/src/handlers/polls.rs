use axum::{
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
    Extension, Json,
};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use validator::Validate;

use crate::{
    error::ApiError,
    middlewares::auth::JwtClaims,
    models::poll::{HistoryQuery, StartPollRequest, StudentResultQuery, VoteRequest},
    services::{poll_service::PollService, AppState},
};

fn poll_service(state: &AppState) -> PollService {
    PollService::new(state.polls.clone(), state.students.clone())
}

pub(super) fn csv_response(filename: String, csv: String) -> Response {
    (
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        csv,
    )
        .into_response()
}

/// POST /start_poll - Start a new poll (instructor only)
pub async fn start_poll(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Json(req): Json<StartPollRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate()
        .map_err(|e| ApiError::Validation(e.to_string()))?;

    let poll = poll_service(&state).start(req, &claims.sub).await?;
    Ok(Json(json!({ "success": true, "pollId": poll.id.to_hex() })))
}

/// POST /end_poll - End the active poll now (instructor only)
pub async fn end_poll(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    poll_service(&state).end().await?;
    Ok(Json(json!({ "success": true, "message": "Poll ended successfully" })))
}

/// GET /poll - Current poll status for the clickers
pub async fn get_poll(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let now = Utc::now();
    Ok(match poll_service(&state).current().await? {
        None => Json(json!({ "active": false })),
        Some(poll) => Json(json!({
            "active": poll.window.is_open(now),
            "timeLeft": poll.window.time_left_seconds(now),
            "question": poll.question,
            "options": poll.options,
        })),
    })
}

/// POST /vote - Record one student's vote
pub async fn vote(
    State(state): State<Arc<AppState>>,
    Json(req): Json<VoteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let record = poll_service(&state).vote(req).await?;
    Ok(Json(json!({ "success": true, "isCorrect": record.is_correct })))
}

/// GET /student_result?rollNo= - A student's own outcome, once closed
pub async fn student_result(
    State(state): State<Arc<AppState>>,
    Query(params): Query<StudentResultQuery>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(
        match poll_service(&state).student_result(&params.roll_no).await? {
            None => Json(json!({ "ready": false })),
            Some((vote, correct)) => Json(json!({
                "ready": true,
                "voted": vote.answer,
                "correct": correct,
                "isCorrect": vote.is_correct,
            })),
        },
    )
}

/// GET /results - Full tally and per-vote details
pub async fn results(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let results = poll_service(&state).results().await?;
    Ok(Json(results))
}

/// GET /poll_history?limit=&skip= - Newest-first summaries (votes elided)
pub async fn poll_history(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HistoryQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let polls = poll_service(&state)
        .history(params.limit, params.skip)
        .await?;
    Ok(Json(json!({ "polls": polls })))
}

/// DELETE /poll_history/{id} - Prune one ended poll from history
pub async fn delete_poll(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    poll_service(&state).delete(&id).await?;
    Ok(Json(json!({ "success": true })))
}

/// GET /export_poll/{id} - CSV download of one poll
pub async fn export_poll(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let (filename, csv) = poll_service(&state).export(Some(&id)).await?;
    Ok(csv_response(filename, csv))
}

/// GET /export_poll - CSV download of the most recent poll
pub async fn export_latest_poll(
    State(state): State<Arc<AppState>>,
) -> Result<Response, ApiError> {
    let (filename, csv) = poll_service(&state).export(None).await?;
    Ok(csv_response(filename, csv))
}
