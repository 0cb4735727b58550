use chrono::{DateTime, Duration, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use std::fmt;
use validator::Validate;

use super::bson_datetime_as_chrono;
use super::session::{SessionKind, SessionRecord, SessionWindow};
use super::student::Student;

/// One of the four clicker buttons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Choice {
    A,
    B,
    C,
    D,
}

impl Choice {
    pub fn as_str(&self) -> &'static str {
        match self {
            Choice::A => "A",
            Choice::B => "B",
            Choice::C => "C",
            Choice::D => "D",
        }
    }

    /// Case-normalized parse; anything outside A-D is rejected.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "A" => Some(Choice::A),
            "B" => Some(Choice::B),
            "C" => Some(Choice::C),
            "D" => Some(Choice::D),
            _ => None,
        }
    }
}

impl fmt::Display for Choice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The four labeled answers shown on screen.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PollOptions {
    #[serde(rename = "A")]
    #[validate(length(min = 1, message = "Option A is required"))]
    pub a: String,
    #[serde(rename = "B")]
    #[validate(length(min = 1, message = "Option B is required"))]
    pub b: String,
    #[serde(rename = "C")]
    #[validate(length(min = 1, message = "Option C is required"))]
    pub c: String,
    #[serde(rename = "D")]
    #[validate(length(min = 1, message = "Option D is required"))]
    pub d: String,
}

/// Vote snapshot. Name and roll are copied at write time so a later roster
/// edit cannot retroactively change a poll's history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteRecord {
    pub student: ObjectId,
    #[serde(rename = "rollNo")]
    pub roll_no: String,
    #[serde(rename = "studentName")]
    pub student_name: String,
    pub answer: Choice,
    #[serde(rename = "isCorrect")]
    pub is_correct: bool,
    #[serde(with = "bson_datetime_as_chrono")]
    pub timestamp: DateTime<Utc>,
}

/// Running per-option tally. Maintained on every append and independently
/// reconstructable from the vote list (see [`Poll::recount`]).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteCount {
    #[serde(rename = "A", default)]
    pub a: i64,
    #[serde(rename = "B", default)]
    pub b: i64,
    #[serde(rename = "C", default)]
    pub c: i64,
    #[serde(rename = "D", default)]
    pub d: i64,
}

impl VoteCount {
    pub fn bump(&mut self, choice: Choice) {
        match choice {
            Choice::A => self.a += 1,
            Choice::B => self.b += 1,
            Choice::C => self.c += 1,
            Choice::D => self.d += 1,
        }
    }
}

/// A timed multiple-choice poll stored in the "polls" collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Poll {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub question: String,
    pub options: PollOptions,
    pub correct: Choice,
    /// Seconds, as entered by the instructor.
    pub duration: i64,
    pub window: SessionWindow,
    #[serde(default)]
    pub votes: Vec<VoteRecord>,
    #[serde(rename = "voteCount", default)]
    pub vote_count: VoteCount,
    #[serde(rename = "totalVotes", default)]
    pub total_votes: i64,
    #[serde(rename = "createdBy")]
    pub created_by: String,
    #[serde(rename = "createdAt", with = "bson_datetime_as_chrono")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt", with = "bson_datetime_as_chrono")]
    pub updated_at: DateTime<Utc>,
}

impl Poll {
    pub fn new(
        question: String,
        options: PollOptions,
        correct: Choice,
        duration_secs: i64,
        created_by: &str,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ObjectId::new(),
            question,
            options,
            correct,
            duration: duration_secs,
            window: SessionWindow::open_for(now, Duration::seconds(duration_secs)),
            votes: Vec::new(),
            vote_count: VoteCount::default(),
            total_votes: 0,
            created_by: created_by.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Build the vote snapshot for a student, deriving correctness.
    pub fn vote_snapshot(&self, student: &Student, answer: Choice, now: DateTime<Utc>) -> VoteRecord {
        VoteRecord {
            student: student.id,
            roll_no: student.roll_no.clone(),
            student_name: student.name.clone(),
            answer,
            is_correct: answer == self.correct,
            timestamp: now,
        }
    }

    /// Rebuild the tally from the raw vote list. Must always agree with the
    /// maintained `vote_count`; tests hold the two against each other.
    pub fn recount(&self) -> VoteCount {
        let mut count = VoteCount::default();
        for vote in &self.votes {
            count.bump(vote.answer);
        }
        count
    }

    /// Full results view: tally plus per-vote details in arrival order.
    pub fn results(&self) -> PollResults {
        PollResults {
            total_votes: self.total_votes,
            question: self.question.clone(),
            correct_answer: Some(self.correct),
            summary: self.vote_count.clone(),
            details: self
                .votes
                .iter()
                .map(|v| VoteDetail {
                    roll_no: v.roll_no.clone(),
                    name: v.student_name.clone(),
                    vote: v.answer,
                    correct: v.is_correct,
                })
                .collect(),
        }
    }

    /// A student's own outcome. `None` while the poll is still open or the
    /// student has not voted; results are only revealed once the window is
    /// closed.
    pub fn student_result(&self, roll_no: &str, now: DateTime<Utc>) -> Option<&VoteRecord> {
        if self.window.is_open(now) {
            return None;
        }
        self.votes.iter().find(|v| v.roll_no == roll_no)
    }

    /// CSV export: one row per vote in arrival order. Values are joined
    /// with plain commas; roster names are assumed comma-free.
    pub fn to_csv(&self) -> String {
        let mut csv = String::from("Roll No,Name,Vote,Correct\n");
        for vote in &self.votes {
            csv.push_str(&format!(
                "{},{},{},{}\n",
                vote.roll_no,
                vote.student_name,
                vote.answer,
                if vote.is_correct { "Yes" } else { "No" }
            ));
        }
        csv
    }
}

impl SessionRecord for Poll {
    type Response = VoteRecord;

    const KIND: SessionKind = SessionKind::Poll;

    fn id(&self) -> ObjectId {
        self.id
    }

    fn window(&self) -> &SessionWindow {
        &self.window
    }

    fn window_mut(&mut self) -> &mut SessionWindow {
        &mut self.window
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn access_code(&self) -> Option<&str> {
        // Any validated student may vote; polls carry no extra secret.
        None
    }

    fn response_roll_no(response: &VoteRecord) -> &str {
        &response.roll_no
    }

    fn has_response_from(&self, roll_no: &str) -> bool {
        self.votes.iter().any(|v| v.roll_no == roll_no)
    }

    fn apply_response(&mut self, response: VoteRecord) {
        self.vote_count.bump(response.answer);
        self.total_votes += 1;
        self.updated_at = response.timestamp;
        self.votes.push(response);
    }
}

#[derive(Debug, Serialize)]
pub struct PollResults {
    #[serde(rename = "totalVotes")]
    pub total_votes: i64,
    pub question: String,
    #[serde(rename = "correctAnswer")]
    pub correct_answer: Option<Choice>,
    pub summary: VoteCount,
    pub details: Vec<VoteDetail>,
}

impl PollResults {
    /// Empty results for when no poll has ever been run.
    pub fn empty() -> Self {
        PollResults {
            total_votes: 0,
            question: String::new(),
            correct_answer: None,
            summary: VoteCount::default(),
            details: Vec::new(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct VoteDetail {
    #[serde(rename = "rollNo")]
    pub roll_no: String,
    pub name: String,
    pub vote: Choice,
    pub correct: bool,
}

/// History summary: votes elided to keep list payloads small.
#[derive(Debug, Serialize)]
pub struct PollSummary {
    pub id: String,
    pub question: String,
    pub correct: Choice,
    pub duration: i64,
    pub active: bool,
    #[serde(rename = "startTime")]
    pub start_time: DateTime<Utc>,
    #[serde(rename = "endTime")]
    pub end_time: DateTime<Utc>,
    #[serde(rename = "totalVotes")]
    pub total_votes: i64,
}

impl From<&Poll> for PollSummary {
    fn from(p: &Poll) -> Self {
        PollSummary {
            id: p.id.to_hex(),
            question: p.question.clone(),
            correct: p.correct,
            duration: p.duration,
            active: p.window.active,
            start_time: p.window.start_time,
            end_time: p.window.end_time,
            total_votes: p.total_votes,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct StartPollRequest {
    #[validate(length(min = 5, max = 500, message = "Question must be 5-500 characters"))]
    pub question: String,

    #[validate(nested)]
    pub options: PollOptions,

    /// One of A-D; parsed case-insensitively.
    pub correct: String,

    #[validate(range(min = 10, max = 600, message = "Duration must be 10-600 seconds"))]
    pub duration: i64,
}

#[derive(Debug, Deserialize)]
pub struct VoteRequest {
    #[serde(rename = "rollNo")]
    pub roll_no: String,
    pub vote: String,
}

#[derive(Debug, Deserialize)]
pub struct StudentResultQuery {
    #[serde(rename = "rollNo")]
    pub roll_no: String,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
    pub skip: Option<u64>,
}
