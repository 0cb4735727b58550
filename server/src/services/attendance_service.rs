use chrono::Utc;
use std::sync::Arc;

use crate::error::ApiError;
use crate::models::attendance::{
    Absentee, AttendanceRecord, AttendanceSession, AttendanceSessionSummary, AttendanceSummary,
    Cohort, MarkAttendanceRequest, PresentStudent, StartAttendanceRequest, ACCESS_CODE_LEN,
};
use crate::models::session::{generate_code, MAX_CODE_ATTEMPTS};
use crate::models::Student;
use crate::store::StudentStore;

use super::parse_object_id;
use super::session_engine::{SessionDirectory, SessionStatus};

/// Attendance lifecycle orchestration: access-code generation, cohort
/// snapshots, marking, and the derived views.
pub struct AttendanceService {
    attendance: SessionDirectory<AttendanceSession>,
    students: Arc<dyn StudentStore>,
}

impl AttendanceService {
    pub fn new(
        attendance: SessionDirectory<AttendanceSession>,
        students: Arc<dyn StudentStore>,
    ) -> Self {
        Self {
            attendance,
            students,
        }
    }

    pub async fn start(
        &self,
        req: StartAttendanceRequest,
        created_by: &str,
    ) -> Result<AttendanceSession, ApiError> {
        let cohort = match &req.section {
            None => Cohort::All,
            Some(raw) => Cohort::parse(raw)
                .ok_or_else(|| ApiError::Validation("Section must be A, B or ALL".to_string()))?,
        };

        let code = self.generate_unique_code().await?;
        // Expected headcount is snapshotted now; later roster edits must
        // not skew this session's percentages.
        let total_expected = self.students.count_active(cohort).await?;

        let now = Utc::now();
        let session = AttendanceSession::new(
            code,
            req.duration,
            cohort,
            req.notes,
            total_expected,
            created_by,
            now,
        );
        self.attendance.create(session, now).await
    }

    pub async fn mark(&self, req: MarkAttendanceRequest) -> Result<AttendanceRecord, ApiError> {
        let now = Utc::now();
        let code = req.code.trim().to_uppercase();

        // A wrong code reads the same for everyone, valid roll or not.
        self.attendance.verify_open(Some(&code), now).await?;

        let student = self.lookup_student(&req.roll_no).await?;
        self.attendance
            .record_response(
                Some(&code),
                |session| Ok(session.mark_snapshot(&student, now)),
                now,
            )
            .await
    }

    pub async fn status(&self) -> Result<SessionStatus, ApiError> {
        self.attendance.status(Utc::now()).await
    }

    pub async fn end(&self) -> Result<AttendanceSession, ApiError> {
        self.attendance.end_active(Utc::now()).await
    }

    /// The summary/records/absentees view for the current (or most recent)
    /// session. Absentees are computed against the roster as it is now,
    /// not the creation-time snapshot.
    pub async fn results(
        &self,
    ) -> Result<(AttendanceSummary, Vec<PresentStudent>, Vec<Absentee>), ApiError> {
        let session = self
            .attendance
            .current_or_recent()
            .await?
            .ok_or_else(|| ApiError::NotFound("No attendance session found".to_string()))?;

        let absentees = self.absentees(&session).await?;
        Ok((
            session.summary(Utc::now()),
            session.present_students(),
            absentees,
        ))
    }

    pub async fn absentees(&self, session: &AttendanceSession) -> Result<Vec<Absentee>, ApiError> {
        let eligible = self.students.list_active(session.section).await?;
        Ok(eligible
            .into_iter()
            .filter(|s| !session.has_response_from(&s.roll_no))
            .map(|s| Absentee {
                roll_no: s.roll_no,
                name: s.name,
            })
            .collect())
    }

    pub async fn history(
        &self,
        limit: Option<i64>,
        skip: Option<u64>,
    ) -> Result<Vec<AttendanceSessionSummary>, ApiError> {
        let limit = limit.unwrap_or(10).clamp(1, 100);
        let sessions = self.attendance.history(limit, skip.unwrap_or(0)).await?;
        Ok(sessions.iter().map(AttendanceSessionSummary::from).collect())
    }

    pub async fn delete(&self, id: &str) -> Result<(), ApiError> {
        self.attendance.delete(parse_object_id(id)?).await
    }

    /// CSV export of one session: explicit id or the most recent.
    pub async fn export(&self, id: Option<&str>) -> Result<(String, String), ApiError> {
        let session = match id {
            Some(raw) => self
                .attendance
                .find_by_id(parse_object_id(raw)?)
                .await?
                .ok_or_else(|| ApiError::NotFound("Attendance session not found".to_string()))?,
            None => self
                .attendance
                .most_recent()
                .await?
                .ok_or_else(|| ApiError::NotFound("No attendance session to export".to_string()))?,
        };

        let filename = format!("attendance_{}.csv", session.id.to_hex());
        Ok((filename, session.to_csv()))
    }

    /// Rejection-sample a code nobody has used before. The window is tiny
    /// against 4^10 possibilities, so the cap is a backstop, not a path we
    /// expect to hit.
    async fn generate_unique_code(&self) -> Result<String, ApiError> {
        for _ in 0..MAX_CODE_ATTEMPTS {
            let code = generate_code(ACCESS_CODE_LEN);
            if !self.attendance.access_code_exists(&code).await? {
                return Ok(code);
            }
        }
        Err(ApiError::CodeGeneration(MAX_CODE_ATTEMPTS))
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
