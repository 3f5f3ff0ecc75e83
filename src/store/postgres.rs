//! Postgres-backed [`Datastore`].
//!
//! Queries are plain `sqlx::query`/`query_as` with bound parameters. Unique
//! violations (SQLSTATE 23505) on patch and comment inserts are reported as
//! [`StoreError::Duplicate`]; every other database failure passes through as
//! [`StoreError::Database`].

use sqlx::{PgExecutor, PgPool};

use super::{Datastore, StoreError};
use crate::models::{
    Comment, DelegationRule, NewComment, NewPatch, NewPerson, Patch, Person, Project, State, Tag,
    User,
};
use crate::parser::TagCounts;

const PROJECT_COLUMNS: &str = "id, linkname, name, listid, listemail, use_tags";
const PATCH_COLUMNS: &str = "p.id, p.project_id, p.msgid, p.name, p.date, p.submitter_id, \
                             p.delegate_id, p.state_id, p.archived, p.headers, p.content, \
                             p.pull_url, p.hash";
const COMMENT_COLUMNS: &str = "id, patch_id, msgid, submitter_id, date, headers, content";

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err)
            if db_err.code().map(|code| code == "23505").unwrap_or(false)
    )
}

fn insert_error(err: sqlx::Error, msgid: &str) -> StoreError {
    if is_unique_violation(&err) {
        StoreError::Duplicate {
            msgid: msgid.to_string(),
        }
    } else {
        StoreError::Database(err)
    }
}

async fn insert_patch<'e, E>(executor: E, patch: &NewPatch) -> Result<Patch, StoreError>
where
    E: PgExecutor<'e>,
{
    let query = format!(
        r#"INSERT INTO patches AS p (
               project_id, msgid, name, date, submitter_id, delegate_id,
               state_id, headers, content, pull_url, hash
           )
           VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
           RETURNING {PATCH_COLUMNS}"#
    );
    sqlx::query_as::<_, Patch>(&query)
        .bind(patch.project_id)
        .bind(&patch.msgid)
        .bind(&patch.name)
        .bind(patch.date)
        .bind(patch.submitter_id)
        .bind(patch.delegate_id)
        .bind(patch.state_id)
        .bind(&patch.headers)
        .bind(&patch.content)
        .bind(&patch.pull_url)
        .bind(&patch.hash)
        .fetch_one(executor)
        .await
        .map_err(|err| insert_error(err, &patch.msgid))
}

async fn insert_comment<'e, E>(executor: E, comment: &NewComment) -> Result<Comment, StoreError>
where
    E: PgExecutor<'e>,
{
    let query = format!(
        r#"INSERT INTO comments (patch_id, msgid, submitter_id, date, headers, content)
           VALUES ($1, $2, $3, $4, $5, $6)
           RETURNING {COMMENT_COLUMNS}"#
    );
    sqlx::query_as::<_, Comment>(&query)
        .bind(comment.patch_id)
        .bind(&comment.msgid)
        .bind(comment.submitter_id)
        .bind(comment.date)
        .bind(&comment.headers)
        .bind(&comment.content)
        .fetch_one(executor)
        .await
        .map_err(|err| insert_error(err, &comment.msgid))
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl Datastore for PgStore {
    async fn projects(&self) -> Result<Vec<Project>, StoreError> {
        let query = format!("SELECT {PROJECT_COLUMNS} FROM projects ORDER BY linkname");
        Ok(sqlx::query_as::<_, Project>(&query)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn find_project_by_listid(&self, listid: &str) -> Result<Option<Project>, StoreError> {
        let query = format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE listid = $1");
        Ok(sqlx::query_as::<_, Project>(&query)
            .bind(listid)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_project_by_linkname(
        &self,
        linkname: &str,
    ) -> Result<Option<Project>, StoreError> {
        let query = format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE linkname = $1");
        Ok(sqlx::query_as::<_, Project>(&query)
            .bind(linkname)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_person_by_email(&self, email: &str) -> Result<Option<Person>, StoreError> {
        Ok(sqlx::query_as::<_, Person>(
            "SELECT id, email, name, user_id FROM people WHERE lower(email) = lower($1)",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn save_person(&self, person: NewPerson) -> Result<Person, StoreError> {
        Ok(sqlx::query_as::<_, Person>(
            r#"INSERT INTO people (email, name, user_id)
               VALUES ($1, $2, (SELECT id FROM users WHERE lower(email) = lower($1)))
               ON CONFLICT ((lower(email))) DO UPDATE
               SET name = COALESCE(EXCLUDED.name, people.name)
               RETURNING id, email, name, user_id"#,
        )
        .bind(&person.email)
        .bind(&person.name)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(sqlx::query_as::<_, User>(
            "SELECT id, username, email FROM users WHERE lower(email) = lower($1)",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn find_state_by_name(&self, name: &str) -> Result<Option<State>, StoreError> {
        Ok(sqlx::query_as::<_, State>(
            r#"SELECT id, name, ordering, action_required FROM states
               WHERE lower(name) = lower($1)
               ORDER BY ordering
               LIMIT 1"#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn default_state(&self) -> Result<Option<State>, StoreError> {
        Ok(sqlx::query_as::<_, State>(
            "SELECT id, name, ordering, action_required FROM states ORDER BY ordering LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn project_tags(&self, project: &Project) -> Result<Vec<Tag>, StoreError> {
        if !project.use_tags {
            return Ok(Vec::new());
        }
        Ok(sqlx::query_as::<_, Tag>(
            "SELECT id, name, pattern, abbrev FROM tags ORDER BY abbrev",
        )
        .fetch_all(&self.pool)
        .await?)
    }

    async fn delegation_rules(&self, project_id: i64) -> Result<Vec<DelegationRule>, StoreError> {
        Ok(sqlx::query_as::<_, DelegationRule>(
            r#"SELECT id, project_id, user_id, path, priority FROM delegation_rules
               WHERE project_id = $1
               ORDER BY priority DESC, id"#,
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn find_patch_by_msgid(
        &self,
        project_id: i64,
        msgid: &str,
    ) -> Result<Option<Patch>, StoreError> {
        let query = format!(
            "SELECT {PATCH_COLUMNS} FROM patches p WHERE p.project_id = $1 AND p.msgid = $2"
        );
        Ok(sqlx::query_as::<_, Patch>(&query)
            .bind(project_id)
            .bind(msgid)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_patch_for_comment_msgid(
        &self,
        project_id: i64,
        msgid: &str,
    ) -> Result<Option<Patch>, StoreError> {
        let query = format!(
            r#"SELECT {PATCH_COLUMNS}
               FROM comments c
               JOIN patches p ON p.id = c.patch_id
               WHERE p.project_id = $1 AND c.msgid = $2
               ORDER BY c.id DESC
               LIMIT 1"#
        );
        Ok(sqlx::query_as::<_, Patch>(&query)
            .bind(project_id)
            .bind(msgid)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn comment_exists(&self, patch_id: i64, msgid: &str) -> Result<bool, StoreError> {
        Ok(sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM comments WHERE patch_id = $1 AND msgid = $2)",
        )
        .bind(patch_id)
        .bind(msgid)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn create_patch(&self, patch: NewPatch) -> Result<Patch, StoreError> {
        insert_patch(&self.pool, &patch).await
    }

    async fn create_comment(&self, comment: NewComment) -> Result<Comment, StoreError> {
        insert_comment(&self.pool, &comment).await
    }

    async fn create_patch_with_comment(
        &self,
        patch: NewPatch,
        comment: Option<NewComment>,
    ) -> Result<(Patch, Option<Comment>), StoreError> {
        let mut tx = self.pool.begin().await?;

        let saved = insert_patch(&mut *tx, &patch).await?;
        let comment = match comment {
            Some(comment) => Some(
                insert_comment(
                    &mut *tx,
                    &NewComment {
                        patch_id: saved.id,
                        ..comment
                    },
                )
                .await?,
            ),
            None => None,
        };

        tx.commit().await?;
        Ok((saved, comment))
    }

    async fn patch_tag_sources(&self, patch_id: i64) -> Result<Vec<String>, StoreError> {
        let content: Option<Option<String>> =
            sqlx::query_scalar("SELECT content FROM patches WHERE id = $1")
                .bind(patch_id)
                .fetch_optional(&self.pool)
                .await?;
        let Some(content) = content else {
            return Err(StoreError::NotFound(format!("patch {patch_id}")));
        };

        let comments: Vec<String> = sqlx::query_scalar(
            "SELECT content FROM comments WHERE patch_id = $1 ORDER BY date, id",
        )
        .bind(patch_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(content.into_iter().chain(comments).collect())
    }

    async fn replace_patch_tags(
        &self,
        patch_id: i64,
        counts: &TagCounts,
    ) -> Result<(), StoreError> {
        let (tag_ids, values): (Vec<i64>, Vec<i32>) = counts.iter().unzip();

        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM patch_tags WHERE patch_id = $1")
            .bind(patch_id)
            .execute(&mut *tx)
            .await?;

        if !tag_ids.is_empty() {
            sqlx::query(
                r#"INSERT INTO patch_tags (patch_id, tag_id, count)
                   SELECT $1, tag_id, count
                   FROM UNNEST($2::bigint[], $3::int[]) AS t(tag_id, count)"#,
            )
            .bind(patch_id)
            .bind(&tag_ids)
            .bind(&values)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        log::trace!("stored {} tag counts for patch {}", tag_ids.len(), patch_id);
        Ok(())
    }

    async fn patch_ids(&self, project_id: Option<i64>) -> Result<Vec<i64>, StoreError> {
        Ok(sqlx::query_scalar::<_, i64>(
            "SELECT id FROM patches WHERE ($1::bigint IS NULL OR project_id = $1) ORDER BY id",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn patches_for_rehash(&self) -> Result<Vec<(i64, String)>, StoreError> {
        Ok(sqlx::query_as::<_, (i64, String)>(
            "SELECT id, content FROM patches WHERE content IS NOT NULL ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?)
    }

    async fn set_patch_hash(&self, patch_id: i64, hash: &str) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE patches SET hash = $2 WHERE id = $1")
            .bind(patch_id)
            .bind(hash)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("patch {patch_id}")));
        }
        Ok(())
    }
}
