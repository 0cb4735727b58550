use crate::config::Config;
use crate::error::ApiError;
use crate::models::{AttendanceSession, Poll};
use crate::store::memory::{MemorySessionStore, MemoryStudentStore, MemoryUserStore};
use crate::store::mongo::{
    ensure_indexes, MongoSessionStore, MongoStudentStore, MongoUserStore,
};
use crate::store::{StudentStore, UserStore};
use mongodb::bson::oid::ObjectId;
use mongodb::Client as MongoClient;
use std::sync::Arc;

use session_engine::SessionDirectory;

pub struct AppState {
    pub config: Config,
    pub students: Arc<dyn StudentStore>,
    pub users: Arc<dyn UserStore>,
    pub polls: SessionDirectory<Poll>,
    pub attendance: SessionDirectory<AttendanceSession>,
}

impl AppState {
    pub async fn new(config: Config, mongo_client: MongoClient) -> anyhow::Result<Self> {
        let db = mongo_client.database(&config.mongo_database);

        ensure_indexes(&db).await?;
        tracing::info!("MongoDB indexes ensured");

        Ok(Self {
            students: Arc::new(MongoStudentStore::new(&db)),
            users: Arc::new(MongoUserStore::new(&db)),
            polls: SessionDirectory::new(Arc::new(MongoSessionStore::<Poll>::new(&db))),
            attendance: SessionDirectory::new(Arc::new(
                MongoSessionStore::<AttendanceSession>::new(&db),
            )),
            config,
        })
    }

    /// Fully in-process state, no database required. Backs the integration
    /// tests and is handy for poking at the API locally.
    pub fn in_memory(config: Config) -> Self {
        Self {
            students: Arc::new(MemoryStudentStore::new()),
            users: Arc::new(MemoryUserStore::new()),
            polls: SessionDirectory::new(Arc::new(MemorySessionStore::new())),
            attendance: SessionDirectory::new(Arc::new(MemorySessionStore::new())),
            config,
        }
    }
}

pub(crate) fn parse_object_id(raw: &str) -> Result<ObjectId, ApiError> {
    ObjectId::parse_str(raw).map_err(|_| ApiError::NotFound("Session not found".to_string()))
}

pub mod attendance_service;
pub mod auth_service;
pub mod poll_service;
pub mod session_engine;
pub mod student_service;
