//! Body classification.
//!
//! Walks the leaf MIME parts of a message and sorts their text into three
//! buckets: a patch diff, a pull-request URL and free-form comment text.
//!
//! - `text/x-patch` and `text/x-diff` parts are taken verbatim as the diff.
//!   The first such attachment wins, and it overrides any diff found inline.
//! - `text/plain` parts are decoded, scanned for an inline diff (until one is
//!   found) and for a pull request. Whatever is not diff becomes comment.
//! - Everything else (HTML, images, signatures) is ignored.

use encoding_rs::Encoding;
use mailparse::{MailParseError, ParsedMail};
use thiserror::Error;

use super::diff::{clean_content, parse_patch, parse_pull_request};
use super::message::sanitize_text;

/// Charsets tried, in order, when a part declares none or one we don't know.
pub const FALLBACK_CHARSETS: [&str; 3] = ["utf-8", "windows-1252", "iso-8859-1"];

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("invalid MIME structure: {0}")]
    Mime(#[from] MailParseError),
    #[error("cannot decode {subtype} part (charset {charset:?})")]
    Undecodable {
        subtype: String,
        charset: Option<String>,
    },
}

/// A leaf MIME part, transfer-decoded but not yet charset-decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MimePart {
    pub maintype: String,
    pub subtype: String,
    /// Charset parameter exactly as declared, lower-cased. `None` when absent.
    pub charset: Option<String>,
    pub body: Vec<u8>,
}

impl MimePart {
    pub fn from_mail(part: &ParsedMail<'_>) -> Result<Self, MailParseError> {
        let mimetype = part.ctype.mimetype.to_ascii_lowercase();
        let (maintype, subtype) = mimetype.split_once('/').unwrap_or((mimetype.as_str(), ""));

        Ok(Self {
            maintype: maintype.trim().to_string(),
            subtype: subtype.trim().to_string(),
            charset: part
                .ctype
                .params
                .get("charset")
                .map(|charset| charset.trim().to_ascii_lowercase())
                .filter(|charset| !charset.is_empty()),
            body: part.get_body_raw()?,
        })
    }

    pub fn text(subtype: &str, charset: Option<&str>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            maintype: "text".to_string(),
            subtype: subtype.to_string(),
            charset: charset.map(str::to_string),
            body: body.into(),
        }
    }

    fn is_diff_attachment(&self) -> bool {
        self.maintype == "text" && matches!(self.subtype.as_str(), "x-patch" | "x-diff")
    }

    fn is_plain_text(&self) -> bool {
        self.maintype == "text" && self.subtype == "plain"
    }
}

/// Decode a part's payload to text with `\n` line endings.
///
/// A recognised declared charset is used strictly. Otherwise each of
/// [`FALLBACK_CHARSETS`] is tried in turn.
pub fn decode_payload(part: &MimePart) -> Result<String, ContentError> {
    let declared = part
        .charset
        .as_deref()
        .and_then(|label| Encoding::for_label_no_replacement(label.as_bytes()));

    let candidates: Vec<&'static Encoding> = match declared {
        Some(encoding) => vec![encoding],
        None => FALLBACK_CHARSETS
            .iter()
            .filter_map(|label| Encoding::for_label(label.as_bytes()))
            .collect(),
    };

    for encoding in candidates {
        if let Some(text) = encoding.decode_without_bom_handling_and_without_replacement(&part.body)
        {
            return Ok(sanitize_text(&text.replace("\r\n", "\n")));
        }
    }

    Err(ContentError::Undecodable {
        subtype: part.subtype.clone(),
        charset: part.charset.clone(),
    })
}

/// What a message body was classified into.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MailContent {
    pub diff: Option<String>,
    pub pull_url: Option<String>,
    pub comment: Option<String>,
}

/// Classify a stream of leaf parts. Stops at the first part that cannot be
/// parsed or decoded.
pub fn classify_parts<I>(parts: I) -> Result<MailContent, ContentError>
where
    I: IntoIterator<Item = Result<MimePart, MailParseError>>,
{
    let mut attached: Option<String> = None;
    let mut inline: Option<String> = None;
    let mut pull_url: Option<String> = None;
    let mut commentbuf = String::new();

    for part in parts {
        let part = part?;

        if part.is_diff_attachment() {
            let text = decode_payload(&part)?;
            if attached.is_none() {
                attached = Some(text);
            }
            continue;
        }

        if !part.is_plain_text() {
            continue;
        }

        let payload = decode_payload(&part)?;

        let residual = if attached.is_none() && inline.is_none() {
            let (diff, comment) = parse_patch(&payload);
            inline = diff;
            comment
        } else {
            Some(payload.clone())
        };

        if pull_url.is_none() {
            pull_url = parse_pull_request(&payload);
        }

        if let Some(text) = residual {
            commentbuf.push_str(text.trim());
            commentbuf.push('\n');
        }
    }

    let comment = clean_content(&commentbuf);

    Ok(MailContent {
        diff: attached.or(inline),
        pull_url,
        comment: (!comment.is_empty()).then_some(comment),
    })
}
