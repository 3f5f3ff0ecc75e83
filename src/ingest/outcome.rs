use serde::Serialize;
use thiserror::Error;

use crate::models::{Comment, Patch};
use crate::parser::{ContentError, HeaderError};

/// Why a message was deliberately not ingested.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub enum IgnoreReason {
    #[error("missing required header {0}")]
    MissingHeader(&'static str),
    #[error("X-Patchwork-Hint: ignore")]
    IgnoreHint,
    #[error("no project matches the list id")]
    NoProject,
    #[error("nothing to store: no diff, pull request or comment")]
    NoContent,
}

/// Why a message could not be ingested.
#[derive(Debug, Error)]
pub enum DropReason {
    #[error("invalid MIME structure: {0}")]
    InvalidMime(String),
    #[error("cannot decode {header} header: {error}")]
    UndecodableHeader {
        header: &'static str,
        error: HeaderError,
    },
    #[error("{0}")]
    UndecodableBody(ContentError),
    #[error("Message-Id header is blank")]
    BrokenMessageId,
    #[error("sender has no usable address")]
    MalformedSender,
    #[error("reply to a message that is not stored")]
    UnresolvedReference,
}

/// Result of ingesting one message.
#[derive(Debug)]
pub enum Outcome {
    /// At least one record was created.
    Accepted {
        patch: Option<Patch>,
        comment: Option<Comment>,
    },
    /// The message was ingested before; nothing changed.
    Duplicate { msgid: String },
    Dropped(DropReason),
    Ignored(IgnoreReason),
}

impl Outcome {
    /// Whether this message resulted in a stored patch or comment.
    pub fn is_stored(&self) -> bool {
        matches!(self, Outcome::Accepted { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Outcome::Accepted { patch: Some(_), .. } => "patch",
            Outcome::Accepted { .. } => "comment",
            Outcome::Duplicate { .. } => "duplicate",
            Outcome::Dropped(_) => "dropped",
            Outcome::Ignored(_) => "ignored",
        }
    }
}
