use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;

use crate::error::ApiError;
use crate::models::session::{generate_code, MAX_CODE_ATTEMPTS};
use crate::models::student::{
    ImportStudentsRequest, ImportStudentsResponse, StudentProfile, DEVICE_CODE_LEN,
};
use crate::models::Student;
use crate::store::StudentStore;

/// Participant registry: resolves login codes to identities and carries the
/// roster maintenance the seed scripts used to do.
pub struct StudentService {
    students: Arc<dyn StudentStore>,
}

impl StudentService {
    pub fn new(students: Arc<dyn StudentStore>) -> Self {
        Self { students }
    }

    /// Resolve a clicker login code. Inactive students fail exactly like
    /// unknown codes; the caller learns nothing about roster state.
    pub async fn resolve_by_device_code(&self, code: &str) -> Result<Student, ApiError> {
        let code = code.trim().to_uppercase();
        self.students
            .find_by_device_code(&code)
            .await?
            .filter(|s| s.is_active)
            .ok_or_else(|| ApiError::NotFound("Invalid code".to_string()))
    }

    pub async fn get_by_roll_no(&self, roll_no: &str) -> Result<Student, ApiError> {
        let roll = roll_no.trim().to_uppercase();
        self.students
            .find_by_roll_no(&roll)
            .await?
            .ok_or_else(|| ApiError::NotFound("Student not found".to_string()))
    }

    /// Bulk roster import. Upserts by roll number; new students get a fresh
    /// unique device code, re-imported ones keep theirs.
    pub async fn import(&self, req: ImportStudentsRequest) -> Result<ImportStudentsResponse, ApiError> {
        let now = Utc::now();
        let mut imported = 0;
        let mut updated = 0;
        // Codes handed out within this batch, so two new students cannot
        // collide before either reaches the store.
        let mut batch_codes: HashSet<String> = HashSet::new();

        for entry in req.students {
            let roll_no = entry.roll_no.clone();
            let code = self.generate_unique_device_code(&mut batch_codes).await?;
            let student = Student::new(entry, code, now).ok_or_else(|| {
                ApiError::Validation(format!("Section must be A or B for {}", roll_no))
            })?;

            if self.students.upsert(&student).await? {
                imported += 1;
            } else {
                updated += 1;
            }
        }

        tracing::info!(imported, updated, "roster import finished");
        Ok(ImportStudentsResponse {
            success: true,
            imported,
            updated,
        })
    }

    /// Issue a fresh device code for one student, invalidating the old one.
    pub async fn regenerate_device_code(&self, roll_no: &str) -> Result<String, ApiError> {
        let student = self.get_by_roll_no(roll_no).await?;

        let mut batch = HashSet::new();
        let code = self.generate_unique_device_code(&mut batch).await?;
        let now = Utc::now();
        if !self
            .students
            .set_device_code(&student.roll_no, &code, now)
            .await?
        {
            return Err(ApiError::NotFound("Student not found".to_string()));
        }

        tracing::info!(roll_no = %student.roll_no, "device code regenerated");
        Ok(code)
    }

    pub async fn search(&self, query: Option<String>) -> Result<Vec<StudentProfile>, ApiError> {
        let query = query.unwrap_or_default();
        let query = query.trim();
        if query.is_empty() {
            return Err(ApiError::Validation("Search query is required".to_string()));
        }

        let students = self.students.search(query, 20).await?;
        Ok(students.into_iter().map(StudentProfile::from).collect())
    }

    /// Paginated roster listing: (page, limit, total, pages, students).
    pub async fn list(
        &self,
        page: Option<u64>,
        limit: Option<i64>,
    ) -> Result<(u64, i64, i64, i64, Vec<StudentProfile>), ApiError> {
        let page = page.unwrap_or(1).max(1);
        let limit = limit.unwrap_or(50).clamp(1, 200);
        let skip = (page - 1) * limit as u64;

        let (total, students) = self.students.list_page(skip, limit).await?;
        let pages = (total + limit - 1) / limit;
        Ok((
            page,
            limit,
            total,
            pages,
            students.into_iter().map(StudentProfile::from).collect(),
        ))
    }

    async fn generate_unique_device_code(
        &self,
        taken: &mut HashSet<String>,
    ) -> Result<String, ApiError> {
        for _ in 0..MAX_CODE_ATTEMPTS {
            let code = generate_code(DEVICE_CODE_LEN);
            if taken.contains(&code) {
                continue;
            }
            if !self.students.device_code_exists(&code).await? {
                taken.insert(code.clone());
                return Ok(code);
            }
        }
        Err(ApiError::CodeGeneration(MAX_CODE_ATTEMPTS))
    }
}
