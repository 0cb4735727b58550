//! In-process adapters backing the integration tests and local hacking
//! without a database. Every operation holds the store's single mutex for
//! its whole duration, so the conditional writes are trivially atomic.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use std::sync::Mutex;

use crate::models::attendance::Cohort;
use crate::models::{SessionRecord, Student, User};

use super::{AppendOutcome, DeleteOutcome, SessionStore, StudentStore, UserStore};

#[derive(Default)]
pub struct MemorySessionStore<R> {
    sessions: Mutex<Vec<R>>,
}

impl<R> MemorySessionStore<R> {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl<R: SessionRecord + 'static> SessionStore<R> for MemorySessionStore<R> {
    async fn insert(&self, session: &R) -> Result<()> {
        self.sessions.lock().unwrap().push(session.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: ObjectId) -> Result<Option<R>> {
        let sessions = self.sessions.lock().unwrap();
        Ok(sessions.iter().find(|s| s.id() == id).cloned())
    }

    async fn find_active(&self) -> Result<Option<R>> {
        let sessions = self.sessions.lock().unwrap();
        Ok(sessions.iter().find(|s| s.window().active).cloned())
    }

    async fn most_recent(&self) -> Result<Option<R>> {
        let sessions = self.sessions.lock().unwrap();
        Ok(sessions.iter().max_by_key(|s| s.created_at()).cloned())
    }

    async fn history(&self, limit: i64, skip: u64) -> Result<Vec<R>> {
        let sessions = self.sessions.lock().unwrap();
        let mut all: Vec<R> = sessions.clone();
        all.sort_by_key(|s| std::cmp::Reverse(s.created_at()));
        Ok(all
            .into_iter()
            .skip(skip as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn append_response(
        &self,
        id: ObjectId,
        response: R::Response,
        now: DateTime<Utc>,
    ) -> Result<AppendOutcome> {
        let mut sessions = self.sessions.lock().unwrap();
        let Some(session) = sessions.iter_mut().find(|s| s.id() == id) else {
            return Ok(AppendOutcome::NotFound);
        };
        if !session.window().is_open(now) {
            return Ok(AppendOutcome::Closed);
        }
        if session.has_response_from(R::response_roll_no(&response)) {
            return Ok(AppendOutcome::Duplicate);
        }
        session.apply_response(response);
        Ok(AppendOutcome::Appended)
    }

    async fn end(&self, id: ObjectId, now: DateTime<Utc>) -> Result<bool> {
        let mut sessions = self.sessions.lock().unwrap();
        let Some(session) = sessions.iter_mut().find(|s| s.id() == id) else {
            return Ok(false);
        };
        if !session.window().active {
            return Ok(false);
        }
        session.window_mut().close(now);
        Ok(true)
    }

    async fn deactivate(&self, id: ObjectId) -> Result<()> {
        let mut sessions = self.sessions.lock().unwrap();
        if let Some(session) = sessions.iter_mut().find(|s| s.id() == id) {
            session.window_mut().active = false;
        }
        Ok(())
    }

    async fn access_code_exists(&self, code: &str) -> Result<bool> {
        let sessions = self.sessions.lock().unwrap();
        Ok(sessions.iter().any(|s| s.access_code() == Some(code)))
    }

    async fn delete(&self, id: ObjectId) -> Result<DeleteOutcome> {
        let mut sessions = self.sessions.lock().unwrap();
        let Some(pos) = sessions.iter().position(|s| s.id() == id) else {
            return Ok(DeleteOutcome::NotFound);
        };
        if sessions[pos].window().active {
            return Ok(DeleteOutcome::ActiveRefused);
        }
        sessions.remove(pos);
        Ok(DeleteOutcome::Deleted)
    }
}

#[derive(Default)]
pub struct MemoryStudentStore {
    students: Mutex<Vec<Student>>,
}

impl MemoryStudentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StudentStore for MemoryStudentStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn find_by_device_code(&self, code: &str) -> Result<Option<Student>> {
        let students = self.students.lock().unwrap();
        Ok(students
            .iter()
            .find(|s| s.device_code.as_deref() == Some(code))
            .cloned())
    }

    async fn find_by_roll_no(&self, roll_no: &str) -> Result<Option<Student>> {
        let students = self.students.lock().unwrap();
        Ok(students.iter().find(|s| s.roll_no == roll_no).cloned())
    }

    async fn device_code_exists(&self, code: &str) -> Result<bool> {
        Ok(self.find_by_device_code(code).await?.is_some())
    }

    async fn count_active(&self, cohort: Cohort) -> Result<i64> {
        let students = self.students.lock().unwrap();
        Ok(students
            .iter()
            .filter(|s| s.is_active && cohort.includes(s.section))
            .count() as i64)
    }

    async fn list_active(&self, cohort: Cohort) -> Result<Vec<Student>> {
        let students = self.students.lock().unwrap();
        let mut matching: Vec<Student> = students
            .iter()
            .filter(|s| s.is_active && cohort.includes(s.section))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.roll_no.cmp(&b.roll_no));
        Ok(matching)
    }

    async fn search(&self, query: &str, limit: i64) -> Result<Vec<Student>> {
        let needle = query.to_lowercase();
        let students = self.students.lock().unwrap();
        let mut matching: Vec<Student> = students
            .iter()
            .filter(|s| {
                s.is_active
                    && (s.roll_no.to_lowercase().contains(&needle)
                        || s.name.to_lowercase().contains(&needle)
                        || s.email.to_lowercase().contains(&needle))
            })
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.roll_no.cmp(&b.roll_no));
        matching.truncate(limit.max(0) as usize);
        Ok(matching)
    }

    async fn list_page(&self, skip: u64, limit: i64) -> Result<(i64, Vec<Student>)> {
        let students = self.students.lock().unwrap();
        let mut active: Vec<Student> = students.iter().filter(|s| s.is_active).cloned().collect();
        active.sort_by(|a, b| a.roll_no.cmp(&b.roll_no));
        let total = active.len() as i64;
        let page = active
            .into_iter()
            .skip(skip as usize)
            .take(limit.max(0) as usize)
            .collect();
        Ok((total, page))
    }

    async fn upsert(&self, student: &Student) -> Result<bool> {
        let mut students = self.students.lock().unwrap();
        if let Some(existing) = students.iter_mut().find(|s| s.roll_no == student.roll_no) {
            // Re-imports refresh the sheet fields; device code and creation
            // timestamp survive.
            existing.sn = student.sn;
            existing.name = student.name.clone();
            existing.email = student.email.clone();
            existing.section = student.section;
            existing.sub_group = student.sub_group.clone();
            existing.branch = student.branch.clone();
            existing.language = student.language.clone();
            existing.is_active = true;
            existing.updated_at = student.updated_at;
            Ok(false)
        } else {
            students.push(student.clone());
            Ok(true)
        }
    }

    async fn set_device_code(&self, roll_no: &str, code: &str, now: DateTime<Utc>) -> Result<bool> {
        let mut students = self.students.lock().unwrap();
        if let Some(student) = students.iter_mut().find(|s| s.roll_no == roll_no) {
            student.device_code = Some(code.to_string());
            student.updated_at = now;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

#[derive(Default)]
pub struct MemoryUserStore {
    users: Mutex<Vec<User>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_username(&self, username: &str) -> Result<Option<User>> {
        let users = self.users.lock().unwrap();
        Ok(users.iter().find(|u| u.username == username).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let users = self.users.lock().unwrap();
        Ok(users.iter().find(|u| u.email == email).cloned())
    }

    async fn insert(&self, user: &User) -> Result<()> {
        self.users.lock().unwrap().push(user.clone());
        Ok(())
    }

    async fn record_login_failure(
        &self,
        id: ObjectId,
        attempts: i32,
        lock_until: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut users = self.users.lock().unwrap();
        if let Some(user) = users.iter_mut().find(|u| u.id == id) {
            user.login_attempts = attempts;
            if lock_until.is_some() {
                user.lock_until = lock_until;
            }
        }
        Ok(())
    }

    async fn record_login_success(&self, id: ObjectId, now: DateTime<Utc>) -> Result<()> {
        let mut users = self.users.lock().unwrap();
        if let Some(user) = users.iter_mut().find(|u| u.id == id) {
            user.login_attempts = 0;
            user.lock_until = None;
            user.last_login = Some(now);
            user.updated_at = now;
        }
        Ok(())
    }
}
