//! Parsed mail wrapper.
//!
//! [`MailMessage`] owns the `mailparse` tree for one raw message and exposes
//! the handful of lookups the ingester needs: decoded headers, Message-Id,
//! threading references, list identifiers, the date, the stored header blob
//! and a lazy walk over the leaf MIME parts.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use mailparse::{MailHeaderMap, MailParseError, ParsedMail, parse_mail};
use regex::Regex;

use super::content::MimePart;
use super::header::{HeaderError, clean_header, raw_header_text};

/// Longest message-id we store or look up, in characters.
pub const MAX_MSGID_LEN: usize = 255;

/// Headers consulted, in order, to find the list a message was posted to.
pub const LIST_ID_HEADERS: [&str; 3] = ["List-ID", "X-Mailing-List", "X-list"];

static BRACKETED_LISTID: OnceLock<Regex> = OnceLock::new();
static BARE_LISTID: OnceLock<Regex> = OnceLock::new();

fn bracketed_listid_regex() -> &'static Regex {
    BRACKETED_LISTID
        .get_or_init(|| Regex::new(r"(?s)^.*<([^>]+)>").expect("Invalid list-id regex"))
}

fn bare_listid_regex() -> &'static Regex {
    BARE_LISTID.get_or_init(|| Regex::new(r"^(\S+)$").expect("Invalid list-id regex"))
}

/// Truncate to at most [`MAX_MSGID_LEN`] characters.
pub fn truncate_msgid(msgid: &str) -> String {
    msgid.chars().take(MAX_MSGID_LEN).collect()
}

/// Remove NUL bytes, which Postgres refuses to store in text columns.
pub fn sanitize_text(text: &str) -> String {
    text.replace('\0', "")
}

/// One parsed mail message.
pub struct MailMessage<'a> {
    parsed: ParsedMail<'a>,
}

impl<'a> MailMessage<'a> {
    pub fn parse(raw: &'a [u8]) -> Result<Self, MailParseError> {
        Ok(Self {
            parsed: parse_mail(raw)?,
        })
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.parsed.headers.get_first_header(name).is_some()
    }

    /// The raw (undecoded) text of the first header with this name.
    pub fn raw_header(&self, name: &str) -> Option<String> {
        self.parsed
            .headers
            .get_first_header(name)
            .map(|header| raw_header_text(header.get_value_raw()))
    }

    /// The decoded, whitespace-normalised first header with this name.
    pub fn header(&self, name: &str) -> Option<Result<String, HeaderError>> {
        self.raw_header(name).map(|raw| clean_header(&raw))
    }

    /// Every header with this name, decoded. Undecodable values are skipped.
    pub fn headers_named(&self, name: &str) -> Vec<String> {
        self.parsed
            .headers
            .get_all_headers(name)
            .into_iter()
            .filter_map(|header| clean_header(&raw_header_text(header.get_value_raw())).ok())
            .collect()
    }

    /// The Message-Id, angle brackets included, truncated for storage.
    ///
    /// `Ok(None)` when the header is absent or blank.
    pub fn message_id(&self) -> Result<Option<String>, HeaderError> {
        match self.header("Message-Id") {
            None => Ok(None),
            Some(value) => {
                let value = sanitize_text(&value?);
                let value = value.trim();
                if value.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(truncate_msgid(value)))
                }
            }
        }
    }

    /// Candidate parent message-ids, most specific first.
    ///
    /// In-Reply-To comes first, then the References chain newest to oldest.
    /// Duplicates keep their first position.
    pub fn find_references(&self) -> Vec<String> {
        let mut refs: Vec<String> = Vec::new();

        for value in self.headers_named("In-Reply-To") {
            let candidate = match (value.find('<'), value.find('>')) {
                (Some(start), Some(end)) if start < end => value[start..=end].to_string(),
                _ => value.trim().to_string(),
            };
            if !candidate.is_empty() {
                refs.push(truncate_msgid(&candidate));
            }
        }

        for value in self.headers_named("References") {
            let mut chain: Vec<&str> = value.split_whitespace().collect();
            chain.reverse();
            refs.extend(chain.into_iter().map(truncate_msgid));
        }

        let mut seen = std::collections::HashSet::new();
        refs.retain(|msgid| seen.insert(msgid.clone()));
        refs
    }

    /// List identifiers to try when looking up the owning project.
    pub fn list_ids(&self) -> Vec<String> {
        let mut ids = Vec::new();

        for name in LIST_ID_HEADERS {
            let Some(Ok(value)) = self.header(name) else {
                continue;
            };
            let captured = bracketed_listid_regex()
                .captures(&value)
                .or_else(|| bare_listid_regex().captures(&value))
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().trim().to_string());
            if let Some(listid) = captured.filter(|id| !id.is_empty()) {
                ids.push(listid);
            }
        }

        ids
    }

    /// Date the message was sent; the current time when missing or
    /// unparseable.
    pub fn find_date(&self) -> DateTime<Utc> {
        let Some(raw) = self.raw_header("Date") else {
            return Utc::now();
        };

        match dateparser::parse(raw.trim()) {
            Ok(date) => date,
            Err(err) => {
                log::debug!("unparseable date {:?}: {}", raw, err);
                Utc::now()
            }
        }
    }

    /// All headers as `Key: value` lines, folded values joined.
    pub fn find_headers(&self) -> String {
        self.parsed
            .headers
            .iter()
            .map(|header| {
                let value = raw_header_text(header.get_value_raw());
                format!(
                    "{}: {}",
                    header.get_key(),
                    sanitize_text(&value.replace("\r\n", "\n"))
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Walk the leaf parts of the MIME tree in document order.
    pub fn parts(&self) -> PartWalker<'_, 'a> {
        PartWalker {
            stack: vec![&self.parsed],
        }
    }
}

/// Depth-first iterator over the leaf parts of a message.
pub struct PartWalker<'m, 'a> {
    stack: Vec<&'m ParsedMail<'a>>,
}

impl Iterator for PartWalker<'_, '_> {
    type Item = Result<MimePart, MailParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(part) = self.stack.pop() {
            if part.subparts.is_empty() {
                return Some(MimePart::from_mail(part));
            }
            self.stack.extend(part.subparts.iter().rev());
        }
        None
    }
}
