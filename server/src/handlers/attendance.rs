use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde_json::json;
use std::sync::Arc;
use validator::Validate;

use crate::{
    error::ApiError,
    middlewares::auth::JwtClaims,
    models::attendance::{MarkAttendanceRequest, StartAttendanceRequest},
    models::poll::HistoryQuery,
    services::{attendance_service::AttendanceService, AppState},
};

use super::polls::csv_response;

fn attendance_service(state: &AppState) -> AttendanceService {
    AttendanceService::new(state.attendance.clone(), state.students.clone())
}

/// POST /start_attendance - Open an attendance window (instructor only)
pub async fn start_attendance(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Json(req): Json<StartAttendanceRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate()
        .map_err(|e| ApiError::Validation(e.to_string()))?;

    let session = attendance_service(&state).start(req, &claims.sub).await?;
    Ok(Json(json!({
        "success": true,
        "code": session.code,
        "endTime": session.window.end_time,
        "totalExpected": session.total_expected,
    })))
}

/// POST /end_attendance - End the active window now (instructor only)
pub async fn end_attendance(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    attendance_service(&state).end().await?;
    Ok(Json(json!({ "success": true, "message": "Attendance session ended" })))
}

/// GET /attendance - Window status for the clickers. Never exposes the
/// access code; that travels by voice in the classroom.
pub async fn get_attendance(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let status = attendance_service(&state).status().await?;
    Ok(Json(json!({
        "active": status.active,
        "timeLeft": status.time_left,
    })))
}

/// POST /mark_attendance - Record one student as present
pub async fn mark_attendance(
    State(state): State<Arc<AppState>>,
    Json(req): Json<MarkAttendanceRequest>,
) -> Result<impl IntoResponse, ApiError> {
    attendance_service(&state).mark(req).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Attendance marked successfully",
    })))
}

/// GET /attendance_results - Summary, present list and absentees
pub async fn attendance_results(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let (summary, records, absentees) = attendance_service(&state).results().await?;
    Ok(Json(json!({
        "summary": summary,
        "records": records,
        "absentees": absentees,
    })))
}

/// GET /attendance_history?limit=&skip= - Newest-first summaries
pub async fn attendance_history(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HistoryQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let sessions = attendance_service(&state)
        .history(params.limit, params.skip)
        .await?;
    Ok(Json(json!({ "sessions": sessions })))
}

/// DELETE /attendance_history/{id} - Prune one ended session
pub async fn delete_attendance(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    attendance_service(&state).delete(&id).await?;
    Ok(Json(json!({ "success": true })))
}

/// GET /export_attendance/{id} - CSV download of one session
pub async fn export_attendance(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let (filename, csv) = attendance_service(&state).export(Some(&id)).await?;
    Ok(csv_response(filename, csv))
}

/// GET /export_attendance - CSV download of the most recent session
pub async fn export_latest_attendance(
    State(state): State<Arc<AppState>>,
) -> Result<Response, ApiError> {
    let (filename, csv) = attendance_service(&state).export(None).await?;
    Ok(csv_response(filename, csv))
}
