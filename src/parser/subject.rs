//! Subject cleaning.
//!
//! Patch subjects arrive decorated: reply markers (`Re:`, `Fwd:`), bracketed
//! prefixes (`[PATCH v2 1/3]`, `[RFC,net-next]`) and the occasional Mercurial
//! style `PATCH 1 of 3` marker. A patch is stored under its cleaned name, which
//! keeps only the interesting prefixes:
//!
//! - `"Re: [PATCH] meep"` -> `"meep"`
//! - `"[PATCH RFC 1/2] meep"` -> `"[RFC,1/2] meep"`
//! - `"[PATCH v2][netdev] meep"` -> `"[v2,netdev] meep"`
//!
//! The token `PATCH` is always dropped, case-insensitively, along with any
//! project-specific prefixes the caller asks for. Cleaning is idempotent.

use std::sync::OnceLock;

use regex::Regex;

use super::header::normalise_space;

static REPLY_MARKER: OnceLock<Regex> = OnceLock::new();
static BRACKET_PREFIX: OnceLock<Regex> = OnceLock::new();
static PREFIX_SEPARATOR: OnceLock<Regex> = OnceLock::new();
static HG_SERIES_MARKER: OnceLock<Regex> = OnceLock::new();

fn reply_marker_regex() -> &'static Regex {
    REPLY_MARKER.get_or_init(|| {
        Regex::new(r"(?i)^(re|fwd?)[:\s]\s*").expect("Invalid reply marker regex")
    })
}

fn bracket_prefix_regex() -> &'static Regex {
    BRACKET_PREFIX.get_or_init(|| {
        Regex::new(r"^\[([^\]]*)\]\s*(.*)$").expect("Invalid bracket prefix regex")
    })
}

fn prefix_separator_regex() -> &'static Regex {
    PREFIX_SEPARATOR
        .get_or_init(|| Regex::new(r"[,\s]+").expect("Invalid prefix separator regex"))
}

fn hg_series_marker_regex() -> &'static Regex {
    HG_SERIES_MARKER.get_or_init(|| {
        Regex::new(r"(?:^|[,\s])(\d+ of \d+)(?:$|[,\s])").expect("Invalid series marker regex")
    })
}

/// A subject split into its retained prefixes and the bare patch name.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SubjectParts {
    pub prefixes: Vec<String>,
    pub name: String,
}

impl SubjectParts {
    /// Reassemble as `"[p1,p2] name"`, or just the name when nothing is kept.
    pub fn render(&self) -> String {
        if self.prefixes.is_empty() {
            self.name.clone()
        } else {
            format!("[{}] {}", self.prefixes.join(","), self.name)
                .trim_end()
                .to_string()
        }
    }
}

/// Split the contents of one bracketed subject prefix into tokens.
///
/// Tokens are separated by commas and/or whitespace; empty tokens are never
/// produced. A Mercurial `n of m` marker is kept as one token wherever it
/// appears, so `"RFC,1 of 2"` splits the same way `"PATCH 1 of 2"` does.
pub fn split_prefixes(prefix: &str) -> Vec<String> {
    let split = |text: &str| -> Vec<String> {
        prefix_separator_regex()
            .split(text)
            .filter(|token| !token.is_empty())
            .map(str::to_string)
            .collect()
    };

    let Some(marker) = hg_series_marker_regex()
        .captures(prefix)
        .and_then(|caps| caps.get(1))
    else {
        return split(prefix);
    };

    let mut tokens = split(&prefix[..marker.start()]);
    tokens.push(marker.as_str().to_string());
    tokens.extend(split(&prefix[marker.end()..]));
    tokens
}

/// Split a decoded subject into retained prefixes and the bare name.
///
/// `drop_prefixes` are compared case-insensitively; `patch` is always added.
pub fn split_subject(subject: &str, drop_prefixes: &[&str]) -> SubjectParts {
    let drop: Vec<String> = drop_prefixes
        .iter()
        .map(|prefix| prefix.to_lowercase())
        .chain(std::iter::once("patch".to_string()))
        .collect();

    let mut name = normalise_space(subject);
    let mut prefixes: Vec<String> = Vec::new();

    loop {
        let stripped = reply_marker_regex().replace(&name, "");
        let mut next = normalise_space(&stripped);

        if let Some(caps) = bracket_prefix_regex().captures(&next) {
            let inner = caps.get(1).map_or("", |m| m.as_str());
            let remainder = caps.get(2).map_or("", |m| m.as_str()).to_string();
            prefixes.extend(
                split_prefixes(inner)
                    .into_iter()
                    .filter(|token| !drop.contains(&token.to_lowercase())),
            );
            next = remainder;
        }

        if next == name {
            break;
        }
        name = next;
    }

    SubjectParts { prefixes, name }
}

/// Clean a decoded subject for use as a patch name.
pub fn clean_subject(subject: &str, drop_prefixes: &[&str]) -> String {
    split_subject(subject, drop_prefixes).render()
}
