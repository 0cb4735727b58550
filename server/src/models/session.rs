use chrono::{DateTime, Duration, Utc};
use mongodb::bson::oid::ObjectId;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::bson_datetime_as_chrono;

/// Alphabet shared by attendance access codes and student device codes.
/// The codes are keyed in on four-button hardware clickers, hence A-D only.
pub const CODE_ALPHABET: &[u8] = b"ABCD";

/// Retry budget for rejection-sampling a code that is not already taken.
pub const MAX_CODE_ATTEMPTS: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SessionKind {
    Poll,
    Attendance,
}

impl SessionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionKind::Poll => "poll",
            SessionKind::Attendance => "attendance",
        }
    }
}

/// Timing and intent state shared by both session kinds.
///
/// `active` records instructor intent; whether the window has actually
/// elapsed is always recomputed from `end_time` and the caller's clock.
/// There is no background timer anywhere, so nothing flips `active` on its
/// own: expiry is evaluated lazily on every read and write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionWindow {
    #[serde(rename = "startTime", with = "bson_datetime_as_chrono")]
    pub start_time: DateTime<Utc>,
    #[serde(rename = "endTime", with = "bson_datetime_as_chrono")]
    pub end_time: DateTime<Utc>,
    pub active: bool,
}

impl SessionWindow {
    /// Open a window starting at `now`. The end timestamp is computed
    /// exactly once here and never moves again, except through [`close`].
    ///
    /// [`close`]: SessionWindow::close
    pub fn open_for(now: DateTime<Utc>, duration: Duration) -> Self {
        Self {
            start_time: now,
            end_time: now + duration,
            active: true,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.end_time
    }

    /// Effective activity: the instructor has not ended the session and the
    /// window has not elapsed.
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        self.active && !self.is_expired(now)
    }

    /// Whole seconds remaining, floored, clamped at zero.
    pub fn time_left_seconds(&self, now: DateTime<Utc>) -> i64 {
        (self.end_time - now).num_seconds().max(0)
    }

    /// Explicit end: clears the intent flag and collapses any remaining
    /// duration so `end_time` records when the session really closed.
    pub fn close(&mut self, now: DateTime<Utc>) {
        self.active = false;
        self.end_time = now;
    }
}

/// Contract both session kinds implement so the lifecycle engine and the
/// stores can stay generic. Responses are snapshots: the participant's name
/// is captured at write time so later roster edits never rewrite history.
pub trait SessionRecord: Clone + Send + Sync {
    type Response: Clone + Send + Sync;

    const KIND: SessionKind;

    fn id(&self) -> ObjectId;
    fn window(&self) -> &SessionWindow;
    fn window_mut(&mut self) -> &mut SessionWindow;
    fn created_at(&self) -> DateTime<Utc>;

    /// Secret participants must present, if this kind has one.
    fn access_code(&self) -> Option<&str>;

    fn response_roll_no(response: &Self::Response) -> &str;

    fn has_response_from(&self, roll_no: &str) -> bool;

    /// Append a response and maintain the running counters. Callers have
    /// already checked the window and the duplicate rule.
    fn apply_response(&mut self, response: Self::Response);
}

/// Random fixed-length code over [`CODE_ALPHABET`].
pub fn generate_code(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn window_end_time_is_start_plus_duration() {
        let w = SessionWindow::open_for(t0(), Duration::seconds(30));
        assert_eq!(w.end_time, t0() + Duration::seconds(30));
        assert!(w.active);
    }

    #[test]
    fn expiry_is_a_pure_time_predicate() {
        let w = SessionWindow::open_for(t0(), Duration::seconds(30));
        assert!(!w.is_expired(t0() + Duration::seconds(29)));
        assert!(w.is_expired(t0() + Duration::seconds(30)));
        assert!(w.is_expired(t0() + Duration::seconds(31)));
        // The flag is untouched by the clock; only intent clears it.
        assert!(w.active);
        assert!(!w.is_open(t0() + Duration::seconds(31)));
    }

    #[test]
    fn time_left_floors_and_never_goes_negative() {
        let w = SessionWindow::open_for(t0(), Duration::seconds(30));
        assert_eq!(
            w.time_left_seconds(t0() + Duration::milliseconds(500)),
            29
        );
        let mut last = w.time_left_seconds(t0());
        for s in 1..40 {
            let left = w.time_left_seconds(t0() + Duration::seconds(s));
            assert!(left <= last, "time left must be non-increasing");
            assert!(left >= 0);
            last = left;
        }
        assert_eq!(w.time_left_seconds(t0() + Duration::seconds(100)), 0);
    }

    #[test]
    fn close_collapses_remaining_duration() {
        let mut w = SessionWindow::open_for(t0(), Duration::minutes(10));
        let ended_at = t0() + Duration::minutes(3);
        w.close(ended_at);
        assert!(!w.active);
        assert_eq!(w.end_time, ended_at);
        assert_eq!(w.time_left_seconds(ended_at), 0);
    }

    #[test]
    fn generated_codes_use_the_clicker_alphabet() {
        for _ in 0..50 {
            let code = generate_code(10);
            assert_eq!(code.len(), 10);
            assert!(code.bytes().all(|b| CODE_ALPHABET.contains(&b)));
        }
    }
}
