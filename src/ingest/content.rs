//! Turning a classified message into patch and comment drafts.

use chrono::{DateTime, Utc};

use super::outcome::DropReason;
use super::threading::find_patch_for_comment;
use crate::models::{Patch, Project};
use crate::parser::{
    MailMessage, classify_parts, clean_header, clean_subject, find_filenames, hash_diff,
};
use crate::store::{Datastore, StoreError};

/// A patch about to be created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchDraft {
    pub name: String,
    pub date: DateTime<Utc>,
    pub headers: String,
    pub content: Option<String>,
    pub pull_url: Option<String>,
    pub hash: Option<String>,
    pub filenames: Vec<String>,
}

/// Where a comment will be attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommentTarget {
    /// The patch created from the same message.
    NewPatch,
    /// A patch already in the store, found by threading.
    Existing(Patch),
}

/// A comment about to be created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentDraft {
    pub content: String,
    pub date: DateTime<Utc>,
    pub headers: String,
    pub target: CommentTarget,
}

/// What a message contributes to a project. Both halves may be `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FoundContent {
    pub patch: Option<PatchDraft>,
    pub comment: Option<CommentDraft>,
}

impl FoundContent {
    pub fn is_empty(&self) -> bool {
        self.patch.is_none() && self.comment.is_none()
    }
}

pub enum Classification {
    Content(FoundContent),
    Rejected(DropReason),
}

/// Decide what a message contributes to `project`.
///
/// A diff or pull request yields a patch, with any remaining text as its
/// first comment. Otherwise the text is a comment on the patch the message
/// replies to; a reply to nothing we know of is rejected.
pub async fn find_content<S: Datastore>(
    store: &S,
    project: &Project,
    mail: &MailMessage<'_>,
) -> Result<Classification, StoreError> {
    let classified = match classify_parts(mail.parts()) {
        Ok(classified) => classified,
        Err(error) => return Ok(Classification::Rejected(DropReason::UndecodableBody(error))),
    };

    let date = mail.find_date();
    let headers = mail.find_headers();

    let mut found = FoundContent::default();

    if classified.diff.is_some() || classified.pull_url.is_some() {
        let subject = match mail.raw_header("Subject").map(|raw| clean_header(&raw)) {
            Some(Ok(subject)) => subject,
            Some(Err(error)) => {
                return Ok(Classification::Rejected(DropReason::UndecodableHeader {
                    header: "Subject",
                    error,
                }));
            }
            None => String::new(),
        };

        let (hash, filenames) = match classified.diff.as_deref() {
            Some(diff) => (Some(hash_diff(diff)), find_filenames(diff)),
            None => (None, Vec::new()),
        };

        found.patch = Some(PatchDraft {
            name: clean_subject(&subject, &[project.linkname.as_str()]),
            date,
            headers: headers.clone(),
            content: classified.diff,
            pull_url: classified.pull_url,
            hash,
            filenames,
        });
    }

    if let Some(text) = classified.comment {
        let target = if found.patch.is_some() {
            Some(CommentTarget::NewPatch)
        } else {
            find_patch_for_comment(store, project, &mail.find_references())
                .await?
                .map(CommentTarget::Existing)
        };

        let Some(target) = target else {
            log::debug!("comment does not reply to a known patch");
            return Ok(Classification::Rejected(DropReason::UnresolvedReference));
        };

        found.comment = Some(CommentDraft {
            content: text,
            date,
            headers,
            target,
        });
    }

    Ok(Classification::Content(found))
}
