use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;

use crate::models::{SessionRecord, Student, User};
use crate::models::attendance::Cohort;

pub mod memory;
pub mod mongo;

/// Result of an atomic conditional append. The store decides this in a
/// single write where possible; `Duplicate` and `Closed` are what the
/// write's filter rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    Duplicate,
    Closed,
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// The session is still flagged active; history pruning refuses it.
    ActiveRefused,
    NotFound,
}

/// Persistence adapter for one session kind. The domain types never touch
/// the driver; everything goes through this trait so tests can swap in the
/// in-memory adapter.
#[async_trait]
pub trait SessionStore<R: SessionRecord>: Send + Sync {
    async fn insert(&self, session: &R) -> Result<()>;

    async fn find_by_id(&self, id: ObjectId) -> Result<Option<R>>;

    /// The session whose persisted `active` flag is set, if any. Expiry is
    /// the caller's concern; this is a plain flag lookup.
    async fn find_active(&self) -> Result<Option<R>>;

    /// Newest session by creation time, regardless of state.
    async fn most_recent(&self) -> Result<Option<R>>;

    /// Newest-first page of sessions. Response collections are elided where
    /// the backend supports projection.
    async fn history(&self, limit: i64, skip: u64) -> Result<Vec<R>>;

    /// Atomic conditional append: succeeds only if the session is still
    /// flagged active, the window has not elapsed, and the participant has
    /// not already responded. This single-write condition is what closes
    /// the check-then-act race between concurrent responders.
    async fn append_response(
        &self,
        id: ObjectId,
        response: R::Response,
        now: DateTime<Utc>,
    ) -> Result<AppendOutcome>;

    /// Explicit end: clears `active` and collapses `end_time` to `now`.
    /// Returns false if the session was not active anymore.
    async fn end(&self, id: ObjectId, now: DateTime<Utc>) -> Result<bool>;

    /// Lazy-expiry clear: drops the `active` flag without touching
    /// `end_time` (the window already elapsed on its own).
    async fn deactivate(&self, id: ObjectId) -> Result<()>;

    /// Whether any session of this kind already uses `code` as its access
    /// code. Kinds without access codes report false.
    async fn access_code_exists(&self, code: &str) -> Result<bool>;

    /// History prune; conditional on the session no longer being active.
    async fn delete(&self, id: ObjectId) -> Result<DeleteOutcome>;
}

/// Roster lookups and maintenance.
#[async_trait]
pub trait StudentStore: Send + Sync {
    /// Cheap liveness probe for the health endpoint.
    async fn ping(&self) -> Result<()>;

    async fn find_by_device_code(&self, code: &str) -> Result<Option<Student>>;

    async fn find_by_roll_no(&self, roll_no: &str) -> Result<Option<Student>>;

    async fn device_code_exists(&self, code: &str) -> Result<bool>;

    async fn count_active(&self, cohort: Cohort) -> Result<i64>;

    /// All active students in the cohort, sorted by roll number.
    async fn list_active(&self, cohort: Cohort) -> Result<Vec<Student>>;

    /// Case-insensitive search over roll number, name and email; active
    /// students only, capped by `limit`.
    async fn search(&self, query: &str, limit: i64) -> Result<Vec<Student>>;

    /// Paginated roster listing: (total active, page sorted by roll).
    async fn list_page(&self, skip: u64, limit: i64) -> Result<(i64, Vec<Student>)>;

    /// Upsert by roll number. Existing students keep their device code and
    /// creation timestamp. Returns true if a new student was inserted.
    async fn upsert(&self, student: &Student) -> Result<bool>;

    async fn set_device_code(&self, roll_no: &str, code: &str, now: DateTime<Utc>) -> Result<bool>;
}

/// Instructor account persistence.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_username(&self, username: &str) -> Result<Option<User>>;

    async fn find_by_email(&self, email: &str) -> Result<Option<User>>;

    async fn insert(&self, user: &User) -> Result<()>;

    async fn record_login_failure(
        &self,
        id: ObjectId,
        attempts: i32,
        lock_until: Option<DateTime<Utc>>,
    ) -> Result<()>;

    async fn record_login_success(&self, id: ObjectId, now: DateTime<Utc>) -> Result<()>;
}
