use chrono::{DateTime, Duration, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::bson_datetime_as_chrono;
use super::session::{SessionKind, SessionRecord, SessionWindow};
use super::student::{Section, Student};

/// Attendance access codes are 10 keypresses on the clicker.
pub const ACCESS_CODE_LEN: usize = 10;

/// Which part of the roster a session targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Cohort {
    A,
    B,
    All,
}

impl Cohort {
    pub fn as_str(&self) -> &'static str {
        match self {
            Cohort::A => "A",
            Cohort::B => "B",
            Cohort::All => "ALL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "A" => Some(Cohort::A),
            "B" => Some(Cohort::B),
            "ALL" => Some(Cohort::All),
            _ => None,
        }
    }

    pub fn includes(&self, section: Section) -> bool {
        match self {
            Cohort::All => true,
            Cohort::A => section == Section::A,
            Cohort::B => section == Section::B,
        }
    }
}

/// Attendance snapshot, captured at mark time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub student: ObjectId,
    #[serde(rename = "rollNo")]
    pub roll_no: String,
    pub name: String,
    #[serde(rename = "deviceCode", default)]
    pub device_code: String,
    #[serde(rename = "markedAt", with = "bson_datetime_as_chrono")]
    pub marked_at: DateTime<Utc>,
    #[serde(default = "default_present")]
    pub present: bool,
}

fn default_present() -> bool {
    true
}

/// A timed attendance window stored in the "attendances" collection.
///
/// Unlike polls, attendance carries its own secret: a 10-char access code
/// the instructor reads out in class. `total_expected` is a snapshot of the
/// cohort size at creation time, so late roster changes do not skew the
/// session's percentages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceSession {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub code: String,
    /// Minutes, as entered by the instructor.
    pub duration: i64,
    pub window: SessionWindow,
    #[serde(default)]
    pub records: Vec<AttendanceRecord>,
    #[serde(rename = "totalPresent", default)]
    pub total_present: i64,
    #[serde(rename = "totalExpected", default)]
    pub total_expected: i64,
    pub section: Cohort,
    #[serde(default)]
    pub notes: String,
    #[serde(rename = "createdBy")]
    pub created_by: String,
    #[serde(rename = "createdAt", with = "bson_datetime_as_chrono")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt", with = "bson_datetime_as_chrono")]
    pub updated_at: DateTime<Utc>,
}

impl AttendanceSession {
    pub fn new(
        code: String,
        duration_mins: i64,
        section: Cohort,
        notes: Option<String>,
        total_expected: i64,
        created_by: &str,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ObjectId::new(),
            code,
            duration: duration_mins,
            window: SessionWindow::open_for(now, Duration::minutes(duration_mins)),
            records: Vec::new(),
            total_present: 0,
            total_expected,
            section,
            notes: notes.unwrap_or_default(),
            created_by: created_by.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn mark_snapshot(&self, student: &Student, now: DateTime<Utc>) -> AttendanceRecord {
        AttendanceRecord {
            student: student.id,
            roll_no: student.roll_no.clone(),
            name: student.name.clone(),
            device_code: student.device_code.clone().unwrap_or_default(),
            marked_at: now,
            present: true,
        }
    }

    pub fn summary(&self, now: DateTime<Utc>) -> AttendanceSummary {
        AttendanceSummary {
            id: self.id.to_hex(),
            code: self.code.clone(),
            duration: self.duration,
            section: self.section,
            start_time: self.window.start_time,
            end_time: self.window.end_time,
            active: self.window.is_open(now),
            time_left: self.window.time_left_seconds(now),
            total_present: self.total_present,
            total_expected: self.total_expected,
            attendance_rate: self.statistics().present_percentage,
        }
    }

    /// Present/absent/expected counts. Reports 0% for an empty cohort
    /// rather than dividing by zero.
    pub fn statistics(&self) -> AttendanceStatistics {
        let present_percentage = if self.total_expected > 0 {
            let raw = self.total_present as f64 / self.total_expected as f64 * 100.0;
            (raw * 100.0).round() / 100.0
        } else {
            0.0
        };
        AttendanceStatistics {
            total_present: self.total_present,
            total_absent: self.total_expected - self.total_present,
            total_expected: self.total_expected,
            present_percentage,
        }
    }

    /// Present students in arrival order.
    pub fn present_students(&self) -> Vec<PresentStudent> {
        self.records
            .iter()
            .filter(|r| r.present)
            .map(|r| PresentStudent {
                roll_no: r.roll_no.clone(),
                name: r.name.clone(),
                marked_at: r.marked_at,
            })
            .collect()
    }

    /// CSV export: one row per record in arrival order.
    pub fn to_csv(&self) -> String {
        let mut csv = String::from("Roll No,Name,Status,Marked At\n");
        for record in &self.records {
            csv.push_str(&format!(
                "{},{},{},{}\n",
                record.roll_no,
                record.name,
                if record.present { "Present" } else { "Absent" },
                record.marked_at.to_rfc3339()
            ));
        }
        csv
    }
}

impl SessionRecord for AttendanceSession {
    type Response = AttendanceRecord;

    const KIND: SessionKind = SessionKind::Attendance;

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
        Some(&self.code)
    }

    fn response_roll_no(response: &AttendanceRecord) -> &str {
        &response.roll_no
    }

    fn has_response_from(&self, roll_no: &str) -> bool {
        self.records.iter().any(|r| r.roll_no == roll_no)
    }

    fn apply_response(&mut self, response: AttendanceRecord) {
        self.total_present += 1;
        self.updated_at = response.marked_at;
        self.records.push(response);
    }
}

#[derive(Debug, Serialize)]
pub struct AttendanceSummary {
    pub id: String,
    pub code: String,
    pub duration: i64,
    pub section: Cohort,
    #[serde(rename = "startTime")]
    pub start_time: DateTime<Utc>,
    #[serde(rename = "endTime")]
    pub end_time: DateTime<Utc>,
    pub active: bool,
    #[serde(rename = "timeLeft")]
    pub time_left: i64,
    #[serde(rename = "totalPresent")]
    pub total_present: i64,
    #[serde(rename = "totalExpected")]
    pub total_expected: i64,
    #[serde(rename = "attendanceRate")]
    pub attendance_rate: f64,
}

#[derive(Debug, Serialize)]
pub struct AttendanceStatistics {
    #[serde(rename = "totalPresent")]
    pub total_present: i64,
    #[serde(rename = "totalAbsent")]
    pub total_absent: i64,
    #[serde(rename = "totalExpected")]
    pub total_expected: i64,
    #[serde(rename = "presentPercentage")]
    pub present_percentage: f64,
}

#[derive(Debug, Serialize)]
pub struct PresentStudent {
    #[serde(rename = "rollNo")]
    pub roll_no: String,
    pub name: String,
    #[serde(rename = "markedAt")]
    pub marked_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct Absentee {
    #[serde(rename = "rollNo")]
    pub roll_no: String,
    pub name: String,
}

/// History summary: records elided to keep list payloads small.
#[derive(Debug, Serialize)]
pub struct AttendanceSessionSummary {
    pub id: String,
    pub code: String,
    pub duration: i64,
    pub section: Cohort,
    pub active: bool,
    #[serde(rename = "startTime")]
    pub start_time: DateTime<Utc>,
    #[serde(rename = "endTime")]
    pub end_time: DateTime<Utc>,
    #[serde(rename = "totalPresent")]
    pub total_present: i64,
    #[serde(rename = "totalExpected")]
    pub total_expected: i64,
}

impl From<&AttendanceSession> for AttendanceSessionSummary {
    fn from(s: &AttendanceSession) -> Self {
        AttendanceSessionSummary {
            id: s.id.to_hex(),
            code: s.code.clone(),
            duration: s.duration,
            section: s.section,
            active: s.window.active,
            start_time: s.window.start_time,
            end_time: s.window.end_time,
            total_present: s.total_present,
            total_expected: s.total_expected,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct StartAttendanceRequest {
    #[validate(range(min = 1, max = 60, message = "Duration must be 1-60 minutes"))]
    pub duration: i64,

    /// A, B, or ALL (default ALL).
    pub section: Option<String>,

    #[validate(length(max = 500, message = "Notes must be at most 500 characters"))]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MarkAttendanceRequest {
    #[serde(rename = "rollNo")]
    pub roll_no: String,
    pub code: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::student::StudentImport;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn sample_student(roll: &str, section: &str) -> Student {
        Student::new(
            StudentImport {
                sn: 1,
                name: "Someone".to_string(),
                roll_no: roll.to_string(),
                email: format!("{}@example.edu", roll.to_lowercase()),
                section: section.to_string(),
                sub_group: format!("{}1", section),
                branch: "CS".to_string(),
                language: None,
            },
            "ABCDAB".to_string(),
            t0(),
        )
        .unwrap()
    }

    fn sample_session(expected: i64) -> AttendanceSession {
        AttendanceSession::new(
            "ABCDABCDAB".to_string(),
            5,
            Cohort::All,
            None,
            expected,
            "instructor",
            t0(),
        )
    }

    #[test]
    fn statistics_with_empty_cohort_reports_zero_percent() {
        let session = sample_session(0);
        let stats = session.statistics();
        assert_eq!(stats.total_present, 0);
        assert_eq!(stats.total_absent, 0);
        assert_eq!(stats.present_percentage, 0.0);
    }

    #[test]
    fn statistics_track_present_and_absent() {
        let mut session = sample_session(3);
        let record = session.mark_snapshot(&sample_student("B24CS1001", "A"), t0());
        session.apply_response(record);

        let stats = session.statistics();
        assert_eq!(stats.total_present, 1);
        assert_eq!(stats.total_absent, 2);
        assert_eq!(stats.present_percentage, 33.33);
    }

    #[test]
    fn marking_is_tracked_per_roll_number() {
        let mut session = sample_session(2);
        let student = sample_student("B24CS1001", "A");
        assert!(!session.has_response_from(&student.roll_no));

        let record = session.mark_snapshot(&student, t0());
        session.apply_response(record);
        assert!(session.has_response_from(&student.roll_no));
        assert_eq!(session.total_present, 1);
        assert_eq!(session.present_students().len(), 1);
    }

    #[test]
    fn cohort_membership_respects_sections() {
        assert!(Cohort::All.includes(Section::A));
        assert!(Cohort::All.includes(Section::B));
        assert!(Cohort::A.includes(Section::A));
        assert!(!Cohort::A.includes(Section::B));
        assert!(!Cohort::B.includes(Section::A));
    }

    #[test]
    fn csv_lists_records_in_arrival_order() {
        let mut session = sample_session(2);
        for (i, roll) in ["B24CS1001", "B24CS1002"].iter().enumerate() {
            let record = session.mark_snapshot(
                &sample_student(roll, "A"),
                t0() + chrono::Duration::seconds(i as i64),
            );
            session.apply_response(record);
        }

        let csv = session.to_csv();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "Roll No,Name,Status,Marked At");
        assert!(lines[1].starts_with("B24CS1001,Someone,Present,"));
        assert!(lines[2].starts_with("B24CS1002,Someone,Present,"));
    }
}
