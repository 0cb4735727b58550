use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use serde_json::json;
use std::sync::Arc;
use validator::Validate;

use crate::{
    error::ApiError,
    models::student::{
        ImportStudentsRequest, ListStudentsQuery, SearchStudentsQuery, StudentProfile,
        ValidateCodeRequest,
    },
    services::{student_service::StudentService, AppState},
};

/// POST /validate - Resolve a clicker login code to a student identity
pub async fn validate_code(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ValidateCodeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let service = StudentService::new(state.students.clone());
    let student = service.resolve_by_device_code(&req.code).await?;

    Ok(Json(json!({
        "success": true,
        "rollNo": student.roll_no,
        "name": student.name,
        "section": student.section.as_str(),
        "branch": student.branch,
    })))
}

/// POST /students/import - Bulk roster import (instructor only)
pub async fn import_students(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ImportStudentsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate()
        .map_err(|e| ApiError::Validation(e.to_string()))?;

    tracing::info!("Importing {} roster entries", req.students.len());

    let service = StudentService::new(state.students.clone());
    let response = service.import(req).await?;
    Ok(Json(response))
}

/// POST /students/{rollNo}/regenerate_code - Issue a fresh device code
pub async fn regenerate_code(
    State(state): State<Arc<AppState>>,
    Path(roll_no): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let service = StudentService::new(state.students.clone());
    let code = service.regenerate_device_code(&roll_no).await?;

    Ok(Json(json!({ "success": true, "deviceCode": code })))
}

/// GET /search_students?query= - Roster search (instructor only)
pub async fn search_students(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchStudentsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let service = StudentService::new(state.students.clone());
    let students = service.search(params.query).await?;

    Ok(Json(json!({
        "success": true,
        "count": students.len(),
        "students": students,
    })))
}

/// GET /all_students?page=&limit= - Paginated roster listing
pub async fn all_students(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListStudentsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let service = StudentService::new(state.students.clone());
    let (page, limit, total, pages, students) = service.list(params.page, params.limit).await?;

    Ok(Json(json!({
        "success": true,
        "page": page,
        "limit": limit,
        "total": total,
        "pages": pages,
        "students": students,
    })))
}

/// GET /student/{rollNo} - Single roster entry
pub async fn get_student(
    State(state): State<Arc<AppState>>,
    Path(roll_no): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let service = StudentService::new(state.students.clone());
    let student = service.get_by_roll_no(&roll_no).await?;

    Ok(Json(json!({
        "success": true,
        "student": StudentProfile::from(student),
    })))
}
