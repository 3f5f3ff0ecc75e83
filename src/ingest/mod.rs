//! Mail ingestion.
//!
//! [`MailIngester::parse_mail`] takes one raw RFC 5322 message and decides
//! what it means for the project it was posted to:
//!
//! 1. **Gatekeeping**: messages without `Message-Id`, `From` or `Subject`
//!    headers, or carrying `X-Patchwork-Hint: ignore`, are ignored.
//! 2. **Project**: the list-id headers (or an explicit override) pick the
//!    project. Unknown lists are ignored.
//! 3. **Content**: the body is classified into diff, pull request and
//!    comment text (see [`crate::parser::content`]).
//! 4. **Storage**: a diff or pull request becomes a new patch, with any other
//!    text as its first comment; a reply becomes a comment on the patch it
//!    threads to. The submitter is created or refreshed only once something
//!    is actually stored.
//! 5. **Tags**: review tag counts for the affected patch are recomputed.
//!
//! Every message yields an [`Outcome`]. Re-ingesting a message is a no-op
//! reported as [`Outcome::Duplicate`]. Only datastore failures surface as
//! errors.
//!
//! # Batch import
//!
//! [`MailIngester::import_archive`] runs every message of an mbox file or a
//! Maildir through `parse_mail`, one at a time, and keeps going past
//! individual failures. A failing message is logged in full.

pub mod archive;
pub mod content;
pub mod outcome;
pub mod stats;
pub mod tags;
pub mod threading;
pub mod triage;

use std::path::Path;

use thiserror::Error;

use crate::models::{NewComment, NewPatch, NewPerson, Person, Project};
use crate::parser::{Author, MailMessage, find_author};
use crate::store::{Datastore, StoreError};
use content::{Classification, CommentDraft, CommentTarget, find_content};

pub use outcome::{DropReason, IgnoreReason, Outcome};
pub use stats::ImportStats;

/// Headers a message must carry to be considered at all.
pub const REQUIRED_HEADERS: [&str; 3] = ["Message-Id", "From", "Subject"];

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("archive error: {0}")]
    Io(#[from] std::io::Error),
}

pub struct MailIngester<S> {
    store: S,
}

impl<S: Datastore> MailIngester<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Ingest one raw message.
    ///
    /// `list_id` overrides the list-id headers when looking up the project.
    /// A failure is logged together with the full message text.
    pub async fn parse_mail(
        &self,
        raw: &[u8],
        list_id: Option<&str>,
    ) -> Result<Outcome, IngestError> {
        let result = self.ingest(raw, list_id).await;
        if let Err(err) = &result {
            log::error!(
                "failed to ingest message: {}\n== Mail\n\n{}",
                err,
                String::from_utf8_lossy(raw)
            );
        }
        result
    }

    async fn ingest(&self, raw: &[u8], list_id: Option<&str>) -> Result<Outcome, IngestError> {
        let mail = match MailMessage::parse(raw) {
            Ok(mail) => mail,
            Err(err) => {
                log::warn!("dropping message with invalid MIME structure: {}", err);
                return Ok(Outcome::Dropped(DropReason::InvalidMime(err.to_string())));
            }
        };

        for header in REQUIRED_HEADERS {
            if !mail.has_header(header) {
                log::debug!("ignoring message without {} header", header);
                return Ok(Outcome::Ignored(IgnoreReason::MissingHeader(header)));
            }
        }

        if let Some(Ok(hint)) = mail.header("X-Patchwork-Hint") {
            if hint.eq_ignore_ascii_case("ignore") {
                log::debug!("ignoring message with X-Patchwork-Hint: ignore");
                return Ok(Outcome::Ignored(IgnoreReason::IgnoreHint));
            }
        }

        let Some(project) = self.find_project(&mail, list_id).await? else {
            log::debug!("ignoring message for unknown list {:?}", mail.list_ids());
            return Ok(Outcome::Ignored(IgnoreReason::NoProject));
        };

        let msgid = match mail.message_id() {
            Ok(Some(msgid)) => msgid,
            Ok(None) => return Ok(dropped(DropReason::BrokenMessageId)),
            Err(error) => {
                return Ok(dropped(DropReason::UndecodableHeader {
                    header: "Message-Id",
                    error,
                }));
            }
        };

        let author = match find_author(&mail, &project) {
            Ok(Some(author)) => author,
            Ok(None) => return Ok(dropped(DropReason::MalformedSender)),
            Err(error) => {
                return Ok(dropped(DropReason::UndecodableHeader {
                    header: "From",
                    error,
                }));
            }
        };

        let found = match find_content(&self.store, &project, &mail).await? {
            Classification::Content(found) => found,
            Classification::Rejected(reason) => return Ok(dropped(reason)),
        };

        if found.is_empty() {
            log::debug!("nothing to store for {}", msgid);
            return Ok(Outcome::Ignored(IgnoreReason::NoContent));
        }

        // Cheap duplicate check before touching the submitter; the inserts
        // below still catch a concurrent duplicate.
        let stored_on = match (&found.patch, &found.comment) {
            (Some(_), _) => self
                .store
                .find_patch_by_msgid(project.id, &msgid)
                .await?
                .map(|patch| patch.id),
            (None, Some(comment)) => match &comment.target {
                CommentTarget::Existing(patch) => self
                    .store
                    .comment_exists(patch.id, &msgid)
                    .await?
                    .then_some(patch.id),
                CommentTarget::NewPatch => None,
            },
            (None, None) => None,
        };
        if let Some(patch_id) = stored_on {
            return self.duplicate(&project, patch_id, msgid).await;
        }

        let submitter = self.save_submitter(author).await?;

        let (patch, comment) = match found.patch {
            Some(draft) => {
                let state = triage::find_state(&self.store, &mail).await?;
                let delegate_id =
                    triage::find_delegate(&self.store, &project, &mail, &draft.filenames).await?;

                let new_patch = NewPatch {
                    project_id: project.id,
                    msgid: msgid.clone(),
                    name: draft.name,
                    date: draft.date,
                    submitter_id: submitter.id,
                    delegate_id,
                    state_id: state.map(|s| s.id),
                    headers: draft.headers,
                    content: draft.content,
                    pull_url: draft.pull_url,
                    hash: draft.hash,
                };
                let first_comment = found
                    .comment
                    .map(|draft| comment_row(0, &msgid, submitter.id, draft));

                match self
                    .store
                    .create_patch_with_comment(new_patch, first_comment)
                    .await
                {
                    Ok((patch, comment)) => (Some(patch), comment),
                    Err(StoreError::Duplicate { msgid }) => {
                        log::info!("skipping duplicate patch {}", msgid);
                        return Ok(Outcome::Duplicate { msgid });
                    }
                    Err(err) => return Err(err.into()),
                }
            }
            None => {
                let Some(draft) = found.comment else {
                    return Ok(Outcome::Ignored(IgnoreReason::NoContent));
                };
                let CommentTarget::Existing(existing) = &draft.target else {
                    return Ok(Outcome::Ignored(IgnoreReason::NoContent));
                };
                let patch_id = existing.id;

                match self
                    .store
                    .create_comment(comment_row(patch_id, &msgid, submitter.id, draft))
                    .await
                {
                    Ok(created) => (None, Some(created)),
                    Err(StoreError::Duplicate { msgid }) => {
                        return self.duplicate(&project, patch_id, msgid).await;
                    }
                    Err(err) => return Err(err.into()),
                }
            }
        };

        let tagged_patch = patch
            .as_ref()
            .map(|p| p.id)
            .or_else(|| comment.as_ref().map(|c| c.patch_id));
        if let Some(patch_id) = tagged_patch {
            tags::refresh_patch_tags(&self.store, &project, patch_id).await?;
        }

        match (&patch, &comment) {
            (Some(p), _) => log::info!("stored patch {} ({}) in {}", p.id, msgid, project.linkname),
            (None, Some(c)) => log::info!(
                "stored comment {} ({}) on patch {} in {}",
                c.id,
                msgid,
                c.patch_id,
                project.linkname
            ),
            (None, None) => {}
        }

        Ok(Outcome::Accepted { patch, comment })
    }

    /// Ingest every message of an mbox file or Maildir.
    pub async fn import_archive(
        &self,
        path: &Path,
        list_id: Option<&str>,
    ) -> Result<ImportStats, IngestError> {
        let mut stats = ImportStats::default();

        for (index, message) in archive::open_archive(path)?.enumerate() {
            let raw = match message {
                Ok(raw) => raw,
                Err(err) => {
                    log::error!("failed to read message {} of {}: {}", index, path.display(), err);
                    stats.record_error();
                    continue;
                }
            };

            match self.parse_mail(&raw, list_id).await {
                Ok(outcome) => stats.record(&outcome),
                Err(err) => {
                    log::error!("failed to ingest message {} of {}: {}", index, path.display(), err);
                    stats.record_error();
                }
            }
        }

        log::info!("{}: {}", path.display(), stats);
        Ok(stats)
    }

    async fn find_project(
        &self,
        mail: &MailMessage<'_>,
        list_id: Option<&str>,
    ) -> Result<Option<Project>, StoreError> {
        if let Some(list_id) = list_id {
            return self.store.find_project_by_listid(list_id).await;
        }

        for candidate in mail.list_ids() {
            if let Some(project) = self.store.find_project_by_listid(&candidate).await? {
                return Ok(Some(project));
            }
        }

        Ok(None)
    }

    /// Report a message that is already stored. Tag counts of its patch are
    /// recounted anyway, so redelivering a message whose earlier ingestion
    /// failed after the insert repairs them.
    async fn duplicate(
        &self,
        project: &Project,
        patch_id: i64,
        msgid: String,
    ) -> Result<Outcome, IngestError> {
        log::info!("skipping duplicate message {}", msgid);
        tags::refresh_patch_tags(&self.store, project, patch_id).await?;
        Ok(Outcome::Duplicate { msgid })
    }

    /// Create the submitter, or refresh the stored name when it changed.
    async fn save_submitter(&self, author: Author) -> Result<Person, StoreError> {
        if let Some(existing) = self.store.find_person_by_email(&author.email).await? {
            if author.name.is_none() || author.name == existing.name {
                return Ok(existing);
            }
        }

        self.store
            .save_person(NewPerson {
                email: author.email,
                name: author.name,
            })
            .await
    }
}

fn comment_row(patch_id: i64, msgid: &str, submitter_id: i64, draft: CommentDraft) -> NewComment {
    NewComment {
        patch_id,
        msgid: msgid.to_string(),
        submitter_id,
        date: draft.date,
        headers: draft.headers,
        content: draft.content,
    }
}

fn dropped(reason: DropReason) -> Outcome {
    log::warn!("dropping message: {}", reason);
    Outcome::Dropped(reason)
}
