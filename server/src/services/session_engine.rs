use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::ApiError;
use crate::models::{SessionKind, SessionRecord};
use crate::store::{AppendOutcome, DeleteOutcome, SessionStore};

/// Lifecycle engine and directory for one session kind.
///
/// All mutation of a kind's sessions funnels through this handle: creation
/// is serialized by the per-kind mutex, and response recording relies on the
/// store's atomic conditional append. Nothing else in the crate writes
/// session state, which is what keeps the "at most one active session per
/// kind" invariant enforceable.
///
/// Every operation takes `now` from the caller; there are no background
/// timers, so expiry is re-evaluated lazily against the given clock.
pub struct SessionDirectory<R: SessionRecord> {
    store: Arc<dyn SessionStore<R>>,
    create_lock: Arc<Mutex<()>>,
}

impl<R: SessionRecord> Clone for SessionDirectory<R> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            create_lock: self.create_lock.clone(),
        }
    }
}

/// Point-in-time status of a kind: effective activity plus whole seconds
/// remaining, clamped at zero.
#[derive(Debug, Clone, Copy)]
pub struct SessionStatus {
    pub active: bool,
    pub time_left: i64,
}

impl<R: SessionRecord + 'static> SessionDirectory<R> {
    pub fn new(store: Arc<dyn SessionStore<R>>) -> Self {
        Self {
            store,
            create_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Insert a freshly built session, upholding the single-active-session
    /// invariant. An active session whose window already elapsed is closed
    /// here (the one write path allowed to persist lazy expiry) before the
    /// new one goes in.
    pub async fn create(&self, session: R, now: DateTime<Utc>) -> Result<R, ApiError> {
        let _guard = self.create_lock.lock().await;

        if let Some(existing) = self.store.find_active().await? {
            if existing.window().is_expired(now) {
                self.store.deactivate(existing.id()).await?;
            } else {
                return Err(ApiError::Conflict(already_active::<R>()));
            }
        }

        self.store.insert(&session).await?;
        tracing::info!(
            kind = R::KIND.as_str(),
            id = %session.id(),
            "session started"
        );
        Ok(session)
    }

    /// The active session, or the newest one once everything has ended.
    /// Status and result endpoints fall back to the latter so a class can
    /// still read outcomes after the window closes.
    pub async fn current_or_recent(&self) -> Result<Option<R>, ApiError> {
        if let Some(session) = self.store.find_active().await? {
            return Ok(Some(session));
        }
        Ok(self.store.most_recent().await?)
    }

    /// Record one participant response against the active session.
    ///
    /// The failure ladder is fixed: no active session, elapsed window,
    /// wrong access code, then whatever `make` rejects (an out-of-range
    /// value), and finally a duplicate — the last two decided by the
    /// store's conditional append so concurrent submitters cannot both
    /// slip through.
    pub async fn record_response<F>(
        &self,
        access_code: Option<&str>,
        make: F,
        now: DateTime<Utc>,
    ) -> Result<R::Response, ApiError>
    where
        F: FnOnce(&R) -> Result<R::Response, ApiError> + Send,
    {
        let Some(session) = self.store.find_active().await? else {
            return Err(ApiError::Expired(no_active::<R>()));
        };
        if session.window().is_expired(now) {
            // Closed for responses; the flag itself is left for the next
            // create to clear so this stays a single round trip.
            return Err(ApiError::Expired(window_closed::<R>()));
        }
        if let Some(expected) = session.access_code() {
            if access_code.unwrap_or("") != expected {
                return Err(ApiError::InvalidCode);
            }
        }

        let response = make(&session)?;
        match self
            .store
            .append_response(session.id(), response.clone(), now)
            .await?
        {
            AppendOutcome::Appended => {
                tracing::info!(
                    kind = R::KIND.as_str(),
                    roll_no = R::response_roll_no(&response),
                    "response recorded"
                );
                Ok(response)
            }
            AppendOutcome::Duplicate => Err(ApiError::Duplicate(duplicate::<R>())),
            // Lost the race against expiry or an explicit end.
            AppendOutcome::Closed => Err(ApiError::Expired(window_closed::<R>())),
            AppendOutcome::NotFound => Err(ApiError::NotFound("Session not found".to_string())),
        }
    }

    /// Steps 1-3 of the recording ladder without writing anything: there is
    /// an active session, its window has not elapsed, and the presented
    /// access code matches. Lets callers refuse a wrong code before they
    /// even look at the roster.
    pub async fn verify_open(
        &self,
        access_code: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<R, ApiError> {
        let Some(session) = self.store.find_active().await? else {
            return Err(ApiError::Expired(no_active::<R>()));
        };
        if session.window().is_expired(now) {
            return Err(ApiError::Expired(window_closed::<R>()));
        }
        if let Some(expected) = session.access_code() {
            if access_code.unwrap_or("") != expected {
                return Err(ApiError::InvalidCode);
            }
        }
        Ok(session)
    }

    /// End the active session now, collapsing any remaining duration.
    pub async fn end_active(&self, now: DateTime<Utc>) -> Result<R, ApiError> {
        let Some(mut session) = self.store.find_active().await? else {
            return Err(ApiError::Validation(none_to_end::<R>()));
        };

        if !self.store.end(session.id(), now).await? {
            // Someone else ended it between our read and write.
            return Err(ApiError::Validation(none_to_end::<R>()));
        }

        session.window_mut().close(now);
        tracing::info!(
            kind = R::KIND.as_str(),
            id = %session.id(),
            "session ended by instructor"
        );
        Ok(session)
    }

    /// Pure status read: never persists anything, even when it observes an
    /// expired-but-still-flagged session.
    pub async fn status(&self, now: DateTime<Utc>) -> Result<SessionStatus, ApiError> {
        Ok(match self.current_or_recent().await? {
            None => SessionStatus {
                active: false,
                time_left: 0,
            },
            Some(session) => SessionStatus {
                active: session.window().is_open(now),
                time_left: session.window().time_left_seconds(now),
            },
        })
    }

    pub async fn find_by_id(&self, id: ObjectId) -> Result<Option<R>, ApiError> {
        Ok(self.store.find_by_id(id).await?)
    }

    pub async fn most_recent(&self) -> Result<Option<R>, ApiError> {
        Ok(self.store.most_recent().await?)
    }

    /// Newest-first summaries page; responses are elided by the store.
    pub async fn history(&self, limit: i64, skip: u64) -> Result<Vec<R>, ApiError> {
        Ok(self.store.history(limit, skip).await?)
    }

    pub async fn access_code_exists(&self, code: &str) -> Result<bool, ApiError> {
        Ok(self.store.access_code_exists(code).await?)
    }

    /// History prune. Refused while the session is still flagged active.
    pub async fn delete(&self, id: ObjectId) -> Result<(), ApiError> {
        match self.store.delete(id).await? {
            DeleteOutcome::Deleted => Ok(()),
            DeleteOutcome::ActiveRefused => Err(ApiError::Forbidden(
                "Cannot delete an active session".to_string(),
            )),
            DeleteOutcome::NotFound => Err(ApiError::NotFound("Session not found".to_string())),
        }
    }
}

fn already_active<R: SessionRecord>() -> String {
    match R::KIND {
        SessionKind::Poll => "A poll is already active".to_string(),
        SessionKind::Attendance => "An attendance session is already active".to_string(),
    }
}

fn no_active<R: SessionRecord>() -> String {
    match R::KIND {
        SessionKind::Poll => "No active poll".to_string(),
        SessionKind::Attendance => "No active attendance session".to_string(),
    }
}

fn window_closed<R: SessionRecord>() -> String {
    match R::KIND {
        SessionKind::Poll => "Poll has ended".to_string(),
        SessionKind::Attendance => "Attendance session is not active".to_string(),
    }
}

fn duplicate<R: SessionRecord>() -> String {
    match R::KIND {
        SessionKind::Poll => "You have already voted".to_string(),
        SessionKind::Attendance => "Attendance already marked".to_string(),
    }
}

fn none_to_end<R: SessionRecord>() -> String {
    match R::KIND {
        SessionKind::Poll => "No active poll to end".to_string(),
        SessionKind::Attendance => "No active attendance session to end".to_string(),
    }
}
