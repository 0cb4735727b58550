use axum::{
    http::{header, Method},
    middleware,
    routing::{delete, get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub mod config;
pub mod error;
pub mod handlers;
pub mod middlewares;
pub mod models;
pub mod services;
pub mod store;

pub use config::Config;
pub use services::AppState;

pub fn create_router(app_state: std::sync::Arc<services::AppState>) -> Router {
    // The clicker firmware and the instructor dashboard both talk to this
    // API from other origins.
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_origin(tower_http::cors::Any); // TODO: restrict to the dashboard origin in production

    Router::new()
        // Public endpoints (students and clickers)
        .route("/health", get(handlers::health_check))
        .route("/validate", post(handlers::students::validate_code))
        .route("/poll", get(handlers::polls::get_poll))
        .route("/vote", post(handlers::polls::vote))
        .route("/student_result", get(handlers::polls::student_result))
        .route("/results", get(handlers::polls::results))
        .route("/attendance", get(handlers::attendance::get_attendance))
        .route(
            "/mark_attendance",
            post(handlers::attendance::mark_attendance),
        )
        .route(
            "/attendance_results",
            get(handlers::attendance::attendance_results),
        )
        // Instructor auth
        .route("/auth/register", post(handlers::auth::register))
        .route("/auth/login", post(handlers::auth::login))
        // Instructor endpoints (JWT required)
        .merge(instructor_routes(app_state.clone()))
        .with_state(app_state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

fn instructor_routes(
    app_state: std::sync::Arc<services::AppState>,
) -> Router<std::sync::Arc<services::AppState>> {
    Router::new()
        // Polls
        .route("/start_poll", post(handlers::polls::start_poll))
        .route("/end_poll", post(handlers::polls::end_poll))
        .route("/poll_history", get(handlers::polls::poll_history))
        .route("/poll_history/{id}", delete(handlers::polls::delete_poll))
        .route("/export_poll", get(handlers::polls::export_latest_poll))
        .route("/export_poll/{id}", get(handlers::polls::export_poll))
        // Attendance
        .route(
            "/start_attendance",
            post(handlers::attendance::start_attendance),
        )
        .route(
            "/end_attendance",
            post(handlers::attendance::end_attendance),
        )
        .route(
            "/attendance_history",
            get(handlers::attendance::attendance_history),
        )
        .route(
            "/attendance_history/{id}",
            delete(handlers::attendance::delete_attendance),
        )
        .route(
            "/export_attendance",
            get(handlers::attendance::export_latest_attendance),
        )
        .route(
            "/export_attendance/{id}",
            get(handlers::attendance::export_attendance),
        )
        // Roster management
        .route("/students/import", post(handlers::students::import_students))
        .route(
            "/students/{roll_no}/regenerate_code",
            post(handlers::students::regenerate_code),
        )
        .route("/search_students", get(handlers::students::search_students))
        .route("/all_students", get(handlers::students::all_students))
        .route("/student/{roll_no}", get(handlers::students::get_student))
        .route_layer(middleware::from_fn_with_state(
            app_state,
            middlewares::auth::auth_middleware,
        ))
}
