use chrono::Utc;
use std::sync::Arc;

use crate::error::ApiError;
use crate::models::poll::{
    Choice, Poll, PollResults, PollSummary, StartPollRequest, VoteRecord, VoteRequest,
};
use crate::models::Student;
use crate::store::StudentStore;

use super::session_engine::SessionDirectory;
use super::parse_object_id;

/// Poll lifecycle orchestration: request validation down to domain values,
/// roster resolution, and export selection. All state changes go through
/// the directory.
pub struct PollService {
    polls: SessionDirectory<Poll>,
    students: Arc<dyn StudentStore>,
}

impl PollService {
    pub fn new(polls: SessionDirectory<Poll>, students: Arc<dyn StudentStore>) -> Self {
        Self { polls, students }
    }

    pub async fn start(&self, req: StartPollRequest, created_by: &str) -> Result<Poll, ApiError> {
        let correct = Choice::parse(&req.correct).ok_or_else(|| {
            ApiError::Validation("Correct option must be one of A, B, C, D".to_string())
        })?;

        let now = Utc::now();
        let poll = Poll::new(
            req.question.trim().to_string(),
            req.options,
            correct,
            req.duration,
            created_by,
            now,
        );
        self.polls.create(poll, now).await
    }

    pub async fn vote(&self, req: VoteRequest) -> Result<VoteRecord, ApiError> {
        let student = self.lookup_student(&req.roll_no).await?;
        let now = Utc::now();

        self.polls
            .record_response(
                None,
                |poll| {
                    let choice = Choice::parse(&req.vote)
                        .ok_or_else(|| ApiError::Validation("Invalid vote data".to_string()))?;
                    Ok(poll.vote_snapshot(&student, choice, now))
                },
                now,
            )
            .await
    }

    /// The poll a client should be looking at: the active one, or the most
    /// recent once everything has ended.
    pub async fn current(&self) -> Result<Option<Poll>, ApiError> {
        self.polls.current_or_recent().await
    }

    pub async fn end(&self) -> Result<Poll, ApiError> {
        self.polls.end_active(Utc::now()).await
    }

    pub async fn results(&self) -> Result<PollResults, ApiError> {
        Ok(self
            .polls
            .current_or_recent()
            .await?
            .map(|poll| poll.results())
            .unwrap_or_else(PollResults::empty))
    }

    /// A student's own outcome, revealed only once the window has closed.
    /// Returns the vote together with the designated correct option.
    pub async fn student_result(
        &self,
        roll_no: &str,
    ) -> Result<Option<(VoteRecord, Choice)>, ApiError> {
        let now = Utc::now();
        let roll = roll_no.trim().to_uppercase();
        Ok(self.polls.current_or_recent().await?.and_then(|poll| {
            poll.student_result(&roll, now)
                .cloned()
                .map(|vote| (vote, poll.correct))
        }))
    }

    pub async fn history(
        &self,
        limit: Option<i64>,
        skip: Option<u64>,
    ) -> Result<Vec<PollSummary>, ApiError> {
        let limit = limit.unwrap_or(10).clamp(1, 100);
        let polls = self.polls.history(limit, skip.unwrap_or(0)).await?;
        Ok(polls.iter().map(PollSummary::from).collect())
    }

    pub async fn delete(&self, id: &str) -> Result<(), ApiError> {
        self.polls.delete(parse_object_id(id)?).await
    }

    /// CSV export of one poll: an explicit id, or the most recent when the
    /// caller does not name one. Returns (filename, body).
    pub async fn export(&self, id: Option<&str>) -> Result<(String, String), ApiError> {
        let poll = match id {
            Some(raw) => self
                .polls
                .find_by_id(parse_object_id(raw)?)
                .await?
                .ok_or_else(|| ApiError::NotFound("Poll not found".to_string()))?,
            None => self
                .polls
                .most_recent()
                .await?
                .ok_or_else(|| ApiError::NotFound("No poll to export".to_string()))?,
        };

        let filename = format!("poll_results_{}.csv", poll.id.to_hex());
        Ok((filename, poll.to_csv()))
    }

    async fn lookup_student(&self, roll_no: &str) -> Result<Student, ApiError> {
        let roll = roll_no.trim().to_uppercase();
        self.students
            .find_by_roll_no(&roll)
            .await?
            .filter(|s| s.is_active)
            .ok_or_else(|| ApiError::NotFound("Unknown roll number".to_string()))
    }
}
