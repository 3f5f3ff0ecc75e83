//! Persistence boundary for the ingester.
//!
//! [`Datastore`] is every query and write the ingestion pipeline performs,
//! expressed in terms of the crate's models. Two implementations exist:
//!
//! - [`PgStore`]: the production backend on a `sqlx` Postgres pool
//! - [`MemoryStore`]: an in-process store used for dry runs and tests
//!
//! Uniqueness of `(project, msgid)` for patches and `(patch, msgid)` for
//! comments is enforced by the store itself, and reported as
//! [`StoreError::Duplicate`] so concurrent delivery of the same message is
//! detected at insert time rather than by a racy lookup.

pub mod memory;
pub mod migration;
pub mod postgres;

use thiserror::Error;

use crate::models::{
    Comment, DelegationRule, NewComment, NewPatch, NewPerson, Patch, Person, Project, State,
    Tag, User,
};
use crate::parser::TagCounts;

pub use memory::MemoryStore;
pub use migration::run_migrations;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("message {msgid} is already stored")]
    Duplicate { msgid: String },
    #[error("{0} not found")]
    NotFound(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[allow(async_fn_in_trait)]
pub trait Datastore {
    async fn projects(&self) -> Result<Vec<Project>, StoreError>;

    async fn find_project_by_listid(&self, listid: &str) -> Result<Option<Project>, StoreError>;

    async fn find_project_by_linkname(
        &self,
        linkname: &str,
    ) -> Result<Option<Project>, StoreError>;

    /// Case-insensitive lookup.
    async fn find_person_by_email(&self, email: &str) -> Result<Option<Person>, StoreError>;

    /// Insert a person, or refresh the name of the existing person with the
    /// same (case-insensitive) address. A `None` name never clears one.
    async fn save_person(&self, person: NewPerson) -> Result<Person, StoreError>;

    /// Case-insensitive lookup.
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    /// Case-insensitive lookup.
    async fn find_state_by_name(&self, name: &str) -> Result<Option<State>, StoreError>;

    /// The state with the lowest ordering.
    async fn default_state(&self) -> Result<Option<State>, StoreError>;

    /// Tags counted for this project; empty when the project disables tags.
    async fn project_tags(&self, project: &Project) -> Result<Vec<Tag>, StoreError>;

    /// Delegation rules, highest priority first.
    async fn delegation_rules(&self, project_id: i64) -> Result<Vec<DelegationRule>, StoreError>;

    async fn find_patch_by_msgid(
        &self,
        project_id: i64,
        msgid: &str,
    ) -> Result<Option<Patch>, StoreError>;

    /// The patch owning the most recent comment with this message-id.
    async fn find_patch_for_comment_msgid(
        &self,
        project_id: i64,
        msgid: &str,
    ) -> Result<Option<Patch>, StoreError>;

    async fn comment_exists(&self, patch_id: i64, msgid: &str) -> Result<bool, StoreError>;

    async fn create_patch(&self, patch: NewPatch) -> Result<Patch, StoreError>;

    async fn create_comment(&self, comment: NewComment) -> Result<Comment, StoreError>;

    /// Insert a patch and the comment carried by the same message as one
    /// unit: either both rows exist afterwards or neither does. The comment's
    /// `patch_id` is replaced by the new patch's id.
    async fn create_patch_with_comment(
        &self,
        patch: NewPatch,
        comment: Option<NewComment>,
    ) -> Result<(Patch, Option<Comment>), StoreError>;

    /// The patch's own content (when it has any) followed by its comments,
    /// oldest first.
    async fn patch_tag_sources(&self, patch_id: i64) -> Result<Vec<String>, StoreError>;

    /// Replace all tag counts for a patch. Tags absent from `counts` are
    /// removed.
    async fn replace_patch_tags(&self, patch_id: i64, counts: &TagCounts)
    -> Result<(), StoreError>;

    async fn patch_ids(&self, project_id: Option<i64>) -> Result<Vec<i64>, StoreError>;

    /// `(id, content)` of every patch that carries a diff.
    async fn patches_for_rehash(&self) -> Result<Vec<(i64, String)>, StoreError>;

    async fn set_patch_hash(&self, patch_id: i64, hash: &str) -> Result<(), StoreError>;
}
