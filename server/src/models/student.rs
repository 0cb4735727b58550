use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::bson_datetime_as_chrono;

/// Device login codes are 6 keypresses on the clicker.
pub const DEVICE_CODE_LEN: usize = 6;

/// Roster participant stored in the "students" collection.
///
/// Students are seeded by bulk import and never deleted; dropping someone
/// from the roster only clears `is_active`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Student {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    /// Serial number from the import sheet.
    pub sn: i64,
    pub name: String,
    #[serde(rename = "rollNo")]
    pub roll_no: String,
    pub email: String,
    pub section: Section,
    #[serde(rename = "subGroup")]
    pub sub_group: String,
    pub branch: String,
    pub language: String,
    /// 6-char login code for the classroom clickers, A-D alphabet.
    #[serde(rename = "deviceCode", skip_serializing_if = "Option::is_none")]
    pub device_code: Option<String>,
    #[serde(rename = "isActive", default = "default_active")]
    pub is_active: bool,
    #[serde(rename = "createdAt", with = "bson_datetime_as_chrono")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt", with = "bson_datetime_as_chrono")]
    pub updated_at: DateTime<Utc>,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Section {
    A,
    B,
}

impl Section {
    pub fn as_str(&self) -> &'static str {
        match self {
            Section::A => "A",
            Section::B => "B",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "A" => Some(Section::A),
            "B" => Some(Section::B),
            _ => None,
        }
    }
}

impl Student {
    pub fn new(import: StudentImport, device_code: String, now: DateTime<Utc>) -> Option<Self> {
        let section = Section::parse(&import.section)?;
        Some(Self {
            id: ObjectId::new(),
            sn: import.sn,
            name: import.name.trim().to_string(),
            roll_no: import.roll_no.trim().to_uppercase(),
            email: import.email.trim().to_lowercase(),
            section,
            sub_group: import.sub_group.trim().to_uppercase(),
            branch: import.branch.trim().to_uppercase(),
            language: import.language.unwrap_or_else(|| "English".to_string()),
            device_code: Some(device_code),
            is_active: true,
            created_at: now,
            updated_at: now,
        })
    }
}

/// One row of a bulk roster import.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct StudentImport {
    pub sn: i64,

    #[validate(length(min = 1, max = 100, message = "Name is required"))]
    pub name: String,

    #[validate(length(min = 4, max = 20, message = "Roll number is required"))]
    #[serde(rename = "rollNo")]
    pub roll_no: String,

    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    pub section: String,

    #[serde(rename = "subGroup")]
    pub sub_group: String,

    pub branch: String,

    pub language: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ImportStudentsRequest {
    #[validate(length(min = 1, message = "At least one student is required"))]
    #[validate(nested)]
    pub students: Vec<StudentImport>,
}

#[derive(Debug, Serialize)]
pub struct ImportStudentsResponse {
    pub success: bool,
    pub imported: usize,
    pub updated: usize,
}

/// Clicker login request: the only credential a student ever presents.
#[derive(Debug, Deserialize)]
pub struct ValidateCodeRequest {
    pub code: String,
}

/// Roster entry as returned to clients (no Mongo internals).
#[derive(Debug, Serialize)]
pub struct StudentProfile {
    pub sn: i64,
    pub name: String,
    #[serde(rename = "rollNo")]
    pub roll_no: String,
    pub email: String,
    pub section: Section,
    #[serde(rename = "subGroup")]
    pub sub_group: String,
    pub branch: String,
    pub language: String,
    #[serde(rename = "deviceCode", skip_serializing_if = "Option::is_none")]
    pub device_code: Option<String>,
}

impl From<Student> for StudentProfile {
    fn from(s: Student) -> Self {
        StudentProfile {
            sn: s.sn,
            name: s.name,
            roll_no: s.roll_no,
            email: s.email,
            section: s.section,
            sub_group: s.sub_group,
            branch: s.branch,
            language: s.language,
            device_code: s.device_code,
        }
    }
}

/// Query params for GET /search_students
#[derive(Debug, Deserialize)]
pub struct SearchStudentsQuery {
    pub query: Option<String>,
}

/// Query params for GET /all_students
#[derive(Debug, Deserialize)]
pub struct ListStudentsQuery {
    pub page: Option<u64>,
    pub limit: Option<i64>,
}
