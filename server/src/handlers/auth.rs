use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use std::sync::Arc;
use validator::Validate;

use crate::{
    error::ApiError,
    middlewares::auth::JwtService,
    models::user::{LoginRequest, RegisterRequest},
    services::{auth_service::AuthService, AppState},
};

fn auth_service(state: &AppState) -> AuthService {
    AuthService::new(
        state.users.clone(),
        JwtService::new(&state.config.jwt_secret),
        state.config.master_code.clone(),
    )
}

/// POST /auth/register - Register a new instructor (master-code gated)
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate()
        .map_err(|e| ApiError::Validation(e.to_string()))?;

    tracing::info!("Registering instructor: {}", req.username);

    let response = auth_service(&state).register(req).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// POST /auth/login - Login with username and password
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate()
        .map_err(|e| ApiError::Validation(e.to_string()))?;

    tracing::info!("Login attempt for instructor: {}", req.username);

    let response = auth_service(&state).login(req).await?;
    Ok(Json(response))
}
