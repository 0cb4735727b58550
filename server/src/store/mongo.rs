//! MongoDB adapters. Session mutation goes through conditional writes so a
//! lost race shows up as matched_count == 0 instead of a double-accept.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::bson::{self, doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use mongodb::{Collection, Database, IndexModel};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::models::attendance::{AttendanceRecord, AttendanceSession, Cohort};
use crate::models::poll::{Poll, VoteRecord};
use crate::models::{SessionRecord, Student, User};

use super::{AppendOutcome, DeleteOutcome, SessionStore, StudentStore, UserStore};

fn to_bson_dt(dt: DateTime<Utc>) -> bson::DateTime {
    bson::DateTime::from_millis(dt.timestamp_millis())
}

/// Mongo-facing side of a session kind: where it lives and how its running
/// counters are bumped inside the conditional append.
pub trait MongoSessionRecord:
    SessionRecord + Serialize + DeserializeOwned + Unpin + 'static
where
    Self::Response: Serialize,
{
    const COLLECTION: &'static str;
    const RESPONSE_ARRAY: &'static str;

    fn counter_inc(response: &Self::Response) -> Document;
}

impl MongoSessionRecord for Poll {
    const COLLECTION: &'static str = "polls";
    const RESPONSE_ARRAY: &'static str = "votes";

    fn counter_inc(response: &VoteRecord) -> Document {
        let mut inc = doc! { "totalVotes": 1_i64 };
        inc.insert(format!("voteCount.{}", response.answer.as_str()), 1_i64);
        inc
    }
}

impl MongoSessionRecord for AttendanceSession {
    const COLLECTION: &'static str = "attendances";
    const RESPONSE_ARRAY: &'static str = "records";

    fn counter_inc(_response: &AttendanceRecord) -> Document {
        doc! { "totalPresent": 1_i64 }
    }
}

pub struct MongoSessionStore<R> {
    collection: Collection<R>,
}

impl<R> MongoSessionStore<R>
where
    R: MongoSessionRecord + Send + Sync,
    R::Response: Serialize,
{
    pub fn new(db: &Database) -> Self {
        Self {
            collection: db.collection(R::COLLECTION),
        }
    }
}

#[async_trait]
impl<R> SessionStore<R> for MongoSessionStore<R>
where
    R: MongoSessionRecord + Send + Sync,
    R::Response: Serialize + Send + Sync,
{
    async fn insert(&self, session: &R) -> Result<()> {
        self.collection.insert_one(session).await?;
        Ok(())
    }

    async fn find_by_id(&self, id: ObjectId) -> Result<Option<R>> {
        Ok(self.collection.find_one(doc! { "_id": id }).await?)
    }

    async fn find_active(&self) -> Result<Option<R>> {
        Ok(self
            .collection
            .find_one(doc! { "window.active": true })
            .await?)
    }

    async fn most_recent(&self) -> Result<Option<R>> {
        Ok(self
            .collection
            .find_one(doc! {})
            .sort(doc! { "createdAt": -1 })
            .await?)
    }

    async fn history(&self, limit: i64, skip: u64) -> Result<Vec<R>> {
        let mut projection = Document::new();
        projection.insert(R::RESPONSE_ARRAY, 0);

        let cursor = self
            .collection
            .find(doc! {})
            .sort(doc! { "createdAt": -1 })
            .skip(skip)
            .limit(limit)
            .projection(projection)
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn append_response(
        &self,
        id: ObjectId,
        response: R::Response,
        now: DateTime<Utc>,
    ) -> Result<AppendOutcome> {
        let roll_no = R::response_roll_no(&response).to_string();

        // The filter carries every precondition, so the push is accepted or
        // rejected in one atomic document update.
        let mut filter = doc! {
            "_id": id,
            "window.active": true,
            "window.endTime": { "$gt": to_bson_dt(now) },
        };
        filter.insert(
            format!("{}.rollNo", R::RESPONSE_ARRAY),
            doc! { "$ne": &roll_no },
        );

        let mut push = Document::new();
        push.insert(R::RESPONSE_ARRAY, bson::to_bson(&response)?);
        let update = doc! {
            "$push": push,
            "$inc": R::counter_inc(&response),
            "$set": { "updatedAt": to_bson_dt(now) },
        };

        let result = self.collection.update_one(filter, update).await?;
        if result.matched_count == 1 {
            return Ok(AppendOutcome::Appended);
        }

        // One follow-up read to tell the caller why the write was refused.
        match self.find_by_id(id).await? {
            None => Ok(AppendOutcome::NotFound),
            Some(session) if session.has_response_from(&roll_no) => Ok(AppendOutcome::Duplicate),
            Some(_) => Ok(AppendOutcome::Closed),
        }
    }

    async fn end(&self, id: ObjectId, now: DateTime<Utc>) -> Result<bool> {
        let result = self
            .collection
            .update_one(
                doc! { "_id": id, "window.active": true },
                doc! { "$set": {
                    "window.active": false,
                    "window.endTime": to_bson_dt(now),
                    "updatedAt": to_bson_dt(now),
                } },
            )
            .await?;
        Ok(result.matched_count == 1)
    }

    async fn deactivate(&self, id: ObjectId) -> Result<()> {
        self.collection
            .update_one(
                doc! { "_id": id },
                doc! { "$set": { "window.active": false } },
            )
            .await?;
        Ok(())
    }

    async fn access_code_exists(&self, code: &str) -> Result<bool> {
        Ok(self
            .collection
            .find_one(doc! { "code": code })
            .await?
            .is_some())
    }

    async fn delete(&self, id: ObjectId) -> Result<DeleteOutcome> {
        let result = self
            .collection
            .delete_one(doc! { "_id": id, "window.active": false })
            .await?;
        if result.deleted_count == 1 {
            return Ok(DeleteOutcome::Deleted);
        }
        if self.find_by_id(id).await?.is_some() {
            Ok(DeleteOutcome::ActiveRefused)
        } else {
            Ok(DeleteOutcome::NotFound)
        }
    }
}

pub struct MongoStudentStore {
    db: Database,
    collection: Collection<Student>,
}

impl MongoStudentStore {
    pub fn new(db: &Database) -> Self {
        Self {
            db: db.clone(),
            collection: db.collection("students"),
        }
    }

    fn cohort_filter(cohort: Cohort) -> Document {
        let mut filter = doc! { "isActive": true };
        if cohort != Cohort::All {
            filter.insert("section", cohort.as_str());
        }
        filter
    }
}

#[async_trait]
impl StudentStore for MongoStudentStore {
    async fn ping(&self) -> Result<()> {
        self.db.run_command(doc! { "ping": 1 }).await?;
        Ok(())
    }

    async fn find_by_device_code(&self, code: &str) -> Result<Option<Student>> {
        Ok(self
            .collection
            .find_one(doc! { "deviceCode": code })
            .await?)
    }

    async fn find_by_roll_no(&self, roll_no: &str) -> Result<Option<Student>> {
        Ok(self.collection.find_one(doc! { "rollNo": roll_no }).await?)
    }

    async fn device_code_exists(&self, code: &str) -> Result<bool> {
        Ok(self.find_by_device_code(code).await?.is_some())
    }

    async fn count_active(&self, cohort: Cohort) -> Result<i64> {
        let count = self
            .collection
            .count_documents(Self::cohort_filter(cohort))
            .await?;
        Ok(count as i64)
    }

    async fn list_active(&self, cohort: Cohort) -> Result<Vec<Student>> {
        let cursor = self
            .collection
            .find(Self::cohort_filter(cohort))
            .sort(doc! { "rollNo": 1 })
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn search(&self, query: &str, limit: i64) -> Result<Vec<Student>> {
        let filter = doc! {
            "$or": [
                { "rollNo": { "$regex": query, "$options": "i" } },
                { "name": { "$regex": query, "$options": "i" } },
                { "email": { "$regex": query, "$options": "i" } },
            ],
            "isActive": true,
        };
        let cursor = self
            .collection
            .find(filter)
            .sort(doc! { "rollNo": 1 })
            .limit(limit)
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn list_page(&self, skip: u64, limit: i64) -> Result<(i64, Vec<Student>)> {
        let total = self
            .collection
            .count_documents(doc! { "isActive": true })
            .await? as i64;
        let cursor = self
            .collection
            .find(doc! { "isActive": true })
            .sort(doc! { "rollNo": 1 })
            .skip(skip)
            .limit(limit)
            .await?;
        Ok((total, cursor.try_collect().await?))
    }

    async fn upsert(&self, student: &Student) -> Result<bool> {
        let mut set_on_insert = doc! {
            "_id": student.id,
            "createdAt": to_bson_dt(student.created_at),
        };
        if let Some(code) = &student.device_code {
            set_on_insert.insert("deviceCode", code);
        }

        let update = doc! {
            "$set": {
                "sn": student.sn,
                "name": &student.name,
                "email": &student.email,
                "section": student.section.as_str(),
                "subGroup": &student.sub_group,
                "branch": &student.branch,
                "language": &student.language,
                "isActive": true,
                "updatedAt": to_bson_dt(student.updated_at),
            },
            "$setOnInsert": set_on_insert,
        };

        let result = self
            .collection
            .update_one(doc! { "rollNo": &student.roll_no }, update)
            .upsert(true)
            .await?;
        Ok(result.upserted_id.is_some())
    }

    async fn set_device_code(&self, roll_no: &str, code: &str, now: DateTime<Utc>) -> Result<bool> {
        let result = self
            .collection
            .update_one(
                doc! { "rollNo": roll_no },
                doc! { "$set": { "deviceCode": code, "updatedAt": to_bson_dt(now) } },
            )
            .await?;
        Ok(result.matched_count == 1)
    }
}

pub struct MongoUserStore {
    collection: Collection<User>,
}

impl MongoUserStore {
    pub fn new(db: &Database) -> Self {
        Self {
            collection: db.collection("users"),
        }
    }
}

#[async_trait]
impl UserStore for MongoUserStore {
    async fn find_by_username(&self, username: &str) -> Result<Option<User>> {
        Ok(self
            .collection
            .find_one(doc! { "username": username })
            .await?)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self.collection.find_one(doc! { "email": email }).await?)
    }

    async fn insert(&self, user: &User) -> Result<()> {
        self.collection.insert_one(user).await?;
        Ok(())
    }

    async fn record_login_failure(
        &self,
        id: ObjectId,
        attempts: i32,
        lock_until: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut set = doc! { "loginAttempts": attempts };
        if let Some(until) = lock_until {
            set.insert("lockUntil", to_bson_dt(until));
        }
        self.collection
            .update_one(doc! { "_id": id }, doc! { "$set": set })
            .await?;
        Ok(())
    }

    async fn record_login_success(&self, id: ObjectId, now: DateTime<Utc>) -> Result<()> {
        self.collection
            .update_one(
                doc! { "_id": id },
                doc! {
                    "$set": {
                        "loginAttempts": 0,
                        "lastLogin": to_bson_dt(now),
                        "updatedAt": to_bson_dt(now),
                    },
                    "$unset": { "lockUntil": 1 },
                },
            )
            .await?;
        Ok(())
    }
}

/// Index bootstrap, run once at startup. Mirrors the uniqueness rules the
/// domain relies on (roll numbers, device codes, attendance codes).
pub async fn ensure_indexes(db: &Database) -> Result<()> {
    let students = db.collection::<Student>("students");
    students
        .create_index(
            IndexModel::builder()
                .keys(doc! { "rollNo": 1 })
                .options(IndexOptions::builder().unique(true).build())
                .build(),
        )
        .await?;
    students
        .create_index(
            IndexModel::builder()
                .keys(doc! { "deviceCode": 1 })
                .options(IndexOptions::builder().unique(true).sparse(true).build())
                .build(),
        )
        .await?;

    let polls = db.collection::<Poll>("polls");
    polls
        .create_index(
            IndexModel::builder()
                .keys(doc! { "window.active": 1, "window.startTime": -1 })
                .build(),
        )
        .await?;
    polls
        .create_index(IndexModel::builder().keys(doc! { "createdAt": -1 }).build())
        .await?;

    let attendances = db.collection::<AttendanceSession>("attendances");
    attendances
        .create_index(
            IndexModel::builder()
                .keys(doc! { "code": 1 })
                .options(IndexOptions::builder().unique(true).build())
                .build(),
        )
        .await?;
    attendances
        .create_index(
            IndexModel::builder()
                .keys(doc! { "window.active": 1, "window.startTime": -1 })
                .build(),
        )
        .await?;
    attendances
        .create_index(IndexModel::builder().keys(doc! { "createdAt": -1 }).build())
        .await?;

    let users = db.collection::<User>("users");
    users
        .create_index(
            IndexModel::builder()
                .keys(doc! { "username": 1 })
                .options(IndexOptions::builder().unique(true).build())
                .build(),
        )
        .await?;
    users
        .create_index(
            IndexModel::builder()
                .keys(doc! { "email": 1 })
                .options(IndexOptions::builder().unique(true).build())
                .build(),
        )
        .await?;

    Ok(())
}
