use axum::Router;
use std::sync::Arc;

use classpulse_api::{config::Config, create_router, services::AppState};

/// Router over fully in-memory stores: the same wiring as main, but no
/// database required, so each test gets its own isolated state.
pub async fn create_test_app() -> Router {
    // Initialize tracing for tests
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    let config = Config {
        mongo_uri: "mongodb://localhost:27017".to_string(),
        mongo_database: "classpulse_test".to_string(),
        jwt_secret: "test-secret".to_string(),
        master_code: "MASTER123".to_string(),
        bind_addr: "127.0.0.1:0".to_string(),
    };

    create_router(Arc::new(AppState::in_memory(config)))
}
