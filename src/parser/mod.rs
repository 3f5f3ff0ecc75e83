//! Pure mail parsing: nothing in here touches the datastore.
//!
//! - [`header`]: RFC 2047 decoding and whitespace normalisation
//! - [`subject`]: subject prefix cleaning
//! - [`address`]: sender parsing and DMARC unmangling
//! - [`message`]: the parsed message wrapper and its header lookups
//! - [`content`]: MIME part classification and payload decoding
//! - [`diff`]: diff/pull-request detection, filenames and hashing
//! - [`tags`]: review tag counting

pub mod address;
pub mod content;
pub mod diff;
pub mod header;
pub mod message;
pub mod subject;
pub mod tags;

pub use address::{Author, find_author, split_from_header};
pub use content::{ContentError, MailContent, MimePart, classify_parts, decode_payload};
pub use diff::{clean_content, find_filenames, hash_diff, parse_patch, parse_pull_request};
pub use header::{HeaderError, clean_header, normalise_space};
pub use message::MailMessage;
pub use subject::{clean_subject, split_prefixes};
pub use tags::{TagCounts, TagPattern, compile_tags, extract_tags};
