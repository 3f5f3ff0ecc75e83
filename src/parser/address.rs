//! Sender address parsing.
//!
//! `From` headers in list traffic are far from RFC 5322 clean, so instead of
//! a full address parser this tries a short list of shapes seen in practice:
//!
//! 1. `"Name" <user@host>` / `Name <user@host>`
//! 2. `user at host (Name)` (list archives that obfuscate addresses)
//! 3. `user@host (Name)`
//! 4. anything else is taken as a bare address
//!
//! Lists that rewrite senders for DMARC (`Name via List <list@host>`) are
//! undone using `X-Original-From`, `Reply-To` or `Cc`.

use std::sync::OnceLock;

use regex::Regex;

use super::header::{HeaderError, clean_header};
use super::message::MailMessage;
use crate::models::Project;

/// Longest name or address stored for a person, in characters.
pub const MAX_ADDRESS_LEN: usize = 255;

static ANGLE_ADDRESS: OnceLock<Regex> = OnceLock::new();
static AT_ADDRESS: OnceLock<Regex> = OnceLock::new();
static PAREN_ADDRESS: OnceLock<Regex> = OnceLock::new();

fn angle_address_regex() -> &'static Regex {
    ANGLE_ADDRESS
        .get_or_init(|| Regex::new(r#"^"?(.*?)"?\s*<([^>]+)>"#).expect("Invalid address regex"))
}

fn at_address_regex() -> &'static Regex {
    AT_ADDRESS.get_or_init(|| {
        Regex::new(r"^(.*?)\sat\s(.*?)\s*\(([^\)]+)\)").expect("Invalid address regex")
    })
}

fn paren_address_regex() -> &'static Regex {
    PAREN_ADDRESS
        .get_or_init(|| Regex::new(r#"^"?(.*?)"?\s*\(([^\)]+)\)"#).expect("Invalid address regex"))
}

/// A message author as found in the headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub name: Option<String>,
    pub email: String,
}

fn limit(value: &str) -> String {
    value.trim().chars().take(MAX_ADDRESS_LEN).collect()
}

fn optional_name(value: &str) -> Option<String> {
    let name = limit(value);
    (!name.is_empty()).then_some(name)
}

/// Split a decoded `From`-style value into `(name, email)`.
pub fn split_from_header(from: &str) -> (Option<String>, String) {
    if let Some(caps) = angle_address_regex().captures(from) {
        let name = caps.get(1).map_or("", |m| m.as_str());
        let email = caps.get(2).map_or("", |m| m.as_str());
        return (optional_name(name), limit(email));
    }

    if let Some(caps) = at_address_regex().captures(from) {
        let user = caps.get(1).map_or("", |m| m.as_str());
        let host = caps.get(2).map_or("", |m| m.as_str());
        let name = caps.get(3).map_or("", |m| m.as_str());
        return (optional_name(name), limit(&format!("{user}@{host}")));
    }

    if let Some(caps) = paren_address_regex().captures(from) {
        let email = caps.get(1).map_or("", |m| m.as_str());
        let name = caps.get(2).map_or("", |m| m.as_str());
        return (optional_name(name), limit(email));
    }

    (None, limit(from))
}

/// Undo DMARC sender rewriting.
///
/// When the list has replaced the author with its own address and renamed
/// them `Name via List`, the real sender is recovered from `X-Original-From`,
/// or failing that from a `Reply-To` or `Cc` entry with the same name.
fn original_sender(mail: &MailMessage<'_>, name: Option<String>, email: String) -> Author {
    let mangled = name
        .as_deref()
        .and_then(|n| n.rfind(" via ").map(|at| n[..at].trim().to_string()));
    let Some(real_name) = mangled else {
        return Author { name, email };
    };

    if let Some(Ok(original)) = mail.header("X-Original-From") {
        let (original_name, original_email) = split_from_header(&original);
        if !original_email.is_empty() {
            return Author {
                name: original_name.or_else(|| optional_name(&real_name)),
                email: original_email,
            };
        }
    }

    for header in ["Reply-To", "Cc"] {
        for value in mail.headers_named(header) {
            for entry in value.split(',') {
                let (entry_name, entry_email) = split_from_header(entry.trim());
                if entry_name.as_deref() == Some(real_name.as_str()) && !entry_email.is_empty() {
                    return Author {
                        name: entry_name,
                        email: entry_email,
                    };
                }
            }
        }
    }

    Author {
        name: optional_name(&real_name),
        email,
    }
}

/// Find the author of a message.
///
/// `Ok(None)` when there is no `From` header or it is blank; text matching
/// no known shape is kept as the address. The project is used to recognise
/// list-rewritten senders: only mail claiming to be from the list address
/// itself is a candidate for DMARC unmangling.
pub fn find_author(
    mail: &MailMessage<'_>,
    project: &Project,
) -> Result<Option<Author>, HeaderError> {
    let Some(from) = mail.raw_header("From") else {
        return Ok(None);
    };
    let from = clean_header(&from)?;
    let (name, email) = split_from_header(&from);

    if email.is_empty() {
        return Ok(None);
    }

    let from_list = project.listemail.is_empty() || email.eq_ignore_ascii_case(&project.listemail);
    let author = if from_list {
        original_sender(mail, name, email)
    } else {
        Author { name, email }
    };

    Ok(Some(author))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project() -> Project {
        Project {
            id: 1,
            linkname: "test".to_string(),
            name: "Test".to_string(),
            listid: "test.example.com".to_string(),
            listemail: "test@example.com".to_string(),
            use_tags: true,
        }
    }

    fn author(raw: &str) -> Option<Author> {
        let mail = MailMessage::parse(raw.as_bytes()).unwrap();
        find_author(&mail, &project()).unwrap()
    }

    #[test]
    fn test_split_angle_address() {
        assert_eq!(
            split_from_header("Test User <test@example.com>"),
            (Some("Test User".to_string()), "test@example.com".to_string())
        );
        assert_eq!(
            split_from_header("\"Test User\" <test@example.com>"),
            (Some("Test User".to_string()), "test@example.com".to_string())
        );
        assert_eq!(
            split_from_header("<test@example.com>"),
            (None, "test@example.com".to_string())
        );
    }

    #[test]
    fn test_split_at_address() {
        assert_eq!(
            split_from_header("test at example.com (Test User)"),
            (Some("Test User".to_string()), "test@example.com".to_string())
        );
    }

    #[test]
    fn test_split_paren_address() {
        assert_eq!(
            split_from_header("test@example.com (Test User)"),
            (Some("Test User".to_string()), "test@example.com".to_string())
        );
    }

    #[test]
    fn test_split_bare_address() {
        assert_eq!(
            split_from_header("test@example.com"),
            (None, "test@example.com".to_string())
        );
    }

    #[test]
    fn test_encoded_sender_name() {
        let author = author(
            "From: =?utf-8?q?=C3=A9xample=20?= user <user@example.com>\n\nbody\n",
        )
        .unwrap();
        assert_eq!(author.name.as_deref(), Some("\u{e9}xample user"));
        assert_eq!(author.email, "user@example.com");
    }

    #[test]
    fn test_missing_or_broken_sender() {
        assert_eq!(author("Subject: x\n\nbody\n"), None);
        assert_eq!(author("From: \n\nbody\n"), None);
    }

    #[test]
    fn test_bare_word_sender_is_kept() {
        assert_eq!(
            author("From: Nobody\n\nbody\n"),
            Some(Author {
                name: None,
                email: "Nobody".to_string(),
            })
        );
    }

    #[test]
    fn test_dmarc_x_original_from() {
        let author = author(
            "From: Real Person via Test <test@example.com>\n\
             X-Original-From: Real Person <real@person.org>\n\
             \n\
             body\n",
        )
        .unwrap();
        assert_eq!(author.name.as_deref(), Some("Real Person"));
        assert_eq!(author.email, "real@person.org");
    }

    #[test]
    fn test_dmarc_reply_to() {
        let author = author(
            "From: Real Person via Test <test@example.com>\n\
             Reply-To: Someone Else <else@x.org>, Real Person <real@person.org>\n\
             \n\
             body\n",
        )
        .unwrap();
        assert_eq!(author.email, "real@person.org");
    }

    #[test]
    fn test_dmarc_unresolved_keeps_list_address() {
        let author = author("From: Real Person via Test <test@example.com>\n\nbody\n").unwrap();
        assert_eq!(author.name.as_deref(), Some("Real Person"));
        assert_eq!(author.email, "test@example.com");
    }

    #[test]
    fn test_via_in_name_from_real_address_is_kept() {
        let author = author("From: Travel via Rail <rail@example.org>\n\nbody\n").unwrap();
        assert_eq!(author.name.as_deref(), Some("Travel via Rail"));
        assert_eq!(author.email, "rail@example.org");
    }
}
