use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// ===== Reference Data =====

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Project {
    pub id: i64,
    pub linkname: String,
    pub name: String,
    pub listid: String,
    pub listemail: String,
    pub use_tags: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct State {
    pub id: i64,
    pub name: String,
    pub ordering: i32,
    pub action_required: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Tag {
    pub id: i64,
    pub name: String,
    /// Regular expression, matched multi-line and case-insensitively.
    pub pattern: String,
    pub abbrev: String,
}

/// Auto-delegation rule: files matching `path` (a glob) go to `user_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct DelegationRule {
    pub id: i64,
    pub project_id: i64,
    pub user_id: i64,
    pub path: String,
    pub priority: i32,
}

// ===== Ingested Data =====

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Person {
    pub id: i64,
    pub email: String,
    pub name: Option<String>,
    pub user_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Patch {
    pub id: i64,
    pub project_id: i64,
    pub msgid: String,
    pub name: String,
    pub date: DateTime<Utc>,
    pub submitter_id: i64,
    pub delegate_id: Option<i64>,
    pub state_id: Option<i64>,
    pub archived: bool,
    pub headers: String,
    pub content: Option<String>,
    pub pull_url: Option<String>,
    pub hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Comment {
    pub id: i64,
    pub patch_id: i64,
    pub msgid: String,
    pub submitter_id: i64,
    pub date: DateTime<Utc>,
    pub headers: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct PatchTag {
    pub patch_id: i64,
    pub tag_id: i64,
    pub count: i32,
}

// ===== Inserts =====

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPerson {
    pub email: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPatch {
    pub project_id: i64,
    pub msgid: String,
    pub name: String,
    pub date: DateTime<Utc>,
    pub submitter_id: i64,
    pub delegate_id: Option<i64>,
    pub state_id: Option<i64>,
    pub headers: String,
    pub content: Option<String>,
    pub pull_url: Option<String>,
    pub hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewComment {
    pub patch_id: i64,
    pub msgid: String,
    pub submitter_id: i64,
    pub date: DateTime<Utc>,
    pub headers: String,
    pub content: String,
}
