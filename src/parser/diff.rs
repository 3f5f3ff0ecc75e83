//! Diff and pull-request detection.
//!
//! [`parse_patch`] splits a plain-text body into an embedded unified diff and
//! the surrounding prose. It is a line-oriented state machine: lines that
//! look like the start of a diff are buffered until the file headers and a
//! well-formed hunk header confirm it, otherwise the buffer falls back into
//! the comment. Hunk bodies are consumed by counting the old/new line totals
//! from each `@@` header, so a following reply or signature is never mistaken
//! for patch content.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;
use sha2::{Digest, Sha256};

static HUNK_HEADER: OnceLock<Regex> = OnceLock::new();
static PULL_REQUEST: OnceLock<Regex> = OnceLock::new();
static SIGNATURE: OnceLock<Regex> = OnceLock::new();
static FILENAME_LINE: OnceLock<Regex> = OnceLock::new();

fn hunk_header_regex() -> &'static Regex {
    HUNK_HEADER.get_or_init(|| {
        Regex::new(r"^@@ -\d+(?:,(\d+))? \+\d+(?:,(\d+))? @@").expect("Invalid hunk header regex")
    })
}

fn pull_request_regex() -> &'static Regex {
    PULL_REQUEST.get_or_init(|| {
        Regex::new(
            r"(?msi)^The following changes since commit.*^are available in the git repository at:\s*\n^\s*([\w+-]+(?:://|@)[\w/.@:~-]+[\s\\]*[\w/._-]*)\s*$",
        )
        .expect("Invalid pull request regex")
    })
}

fn signature_regex() -> &'static Regex {
    SIGNATURE.get_or_init(|| Regex::new(r"(?ms)^(-- |_+)\n.*").expect("Invalid signature regex"))
}

fn filename_line_regex() -> &'static Regex {
    FILENAME_LINE.get_or_init(|| {
        Regex::new(r"(?m)^(---|\+\+\+) (\S+)").expect("Invalid filename line regex")
    })
}

/// git's extended header lines, seen between `diff --git` and `---`.
const EXTENDED_HEADERS: [&str; 11] = [
    "old mode ",
    "new mode ",
    "deleted file mode ",
    "new file mode ",
    "copy from ",
    "copy to ",
    "rename from ",
    "rename to ",
    "similarity index ",
    "dissimilarity index ",
    "index ",
];

const NO_NEWLINE_MARKER: &str = "\\ No newline at end of file";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Plain prose.
    Text,
    /// Saw `diff ` or `Index: `; waiting for `---`.
    SuspectedHeader,
    /// Saw `--- `; waiting for `+++ `.
    OldFile,
    /// Saw `+++ ` (or finished a hunk); waiting for `@@`.
    NewFile,
    /// Inside a hunk body.
    Hunk,
    /// Inside git extended headers.
    ExtendedHeader,
}

fn is_extended_header(line: &str) -> bool {
    EXTENDED_HEADERS.iter().any(|prefix| line.starts_with(prefix))
}

fn hunk_count(caps: &regex::Captures<'_>, group: usize) -> i64 {
    caps.get(group)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(1)
}

fn non_empty(buf: String) -> Option<String> {
    (!buf.is_empty()).then_some(buf)
}

/// Split text into `(diff, comment)`; either half is `None` when empty.
///
/// Every input line is kept, with a `\n` terminator, in exactly one of the
/// two halves.
pub fn parse_patch(content: &str) -> (Option<String>, Option<String>) {
    let mut patchbuf = String::new();
    let mut commentbuf = String::new();
    let mut buf = String::new();

    let mut state = State::Text;
    let mut remaining = (0i64, 0i64);
    let mut hunks = 0usize;

    for raw_line in content.split('\n') {
        let line = format!("{raw_line}\n");

        match state {
            State::Text => {
                if line.starts_with("diff ") || line.starts_with("Index: ") {
                    state = State::SuspectedHeader;
                    buf.push_str(&line);
                } else if line.starts_with("--- ") {
                    state = State::OldFile;
                    buf.push_str(&line);
                } else {
                    commentbuf.push_str(&line);
                }
            }
            State::SuspectedHeader => {
                buf.push_str(&line);
                if line.starts_with("--- ") {
                    state = State::OldFile;
                }
                if is_extended_header(&line) {
                    state = State::ExtendedHeader;
                }
            }
            State::OldFile => {
                if line.starts_with("+++ ") {
                    state = State::NewFile;
                    buf.push_str(&line);
                } else if hunks > 0 {
                    state = State::SuspectedHeader;
                    buf.push_str(&line);
                } else {
                    state = State::Text;
                    commentbuf.push_str(&buf);
                    commentbuf.push_str(&line);
                    buf.clear();
                }
            }
            State::NewFile => {
                if let Some(caps) = hunk_header_regex().captures(&line) {
                    remaining = (hunk_count(&caps, 1), hunk_count(&caps, 2));
                    state = State::Hunk;
                    patchbuf.push_str(&buf);
                    patchbuf.push_str(&line);
                    buf.clear();
                } else if line.starts_with("--- ") {
                    patchbuf.push_str(&buf);
                    patchbuf.push_str(&line);
                    buf.clear();
                    state = State::OldFile;
                } else if hunks > 0 && line.starts_with(NO_NEWLINE_MARKER) {
                    patchbuf.push_str(&line);
                } else if hunks > 0 {
                    state = State::SuspectedHeader;
                    buf.push_str(&line);
                } else {
                    state = State::Text;
                    commentbuf.push_str(&buf);
                    commentbuf.push_str(&line);
                    buf.clear();
                }
            }
            State::Hunk => {
                if line.starts_with('-') {
                    remaining.0 -= 1;
                } else if line.starts_with('+') {
                    remaining.1 -= 1;
                } else if !line.starts_with(NO_NEWLINE_MARKER) {
                    remaining.0 -= 1;
                    remaining.1 -= 1;
                }

                patchbuf.push_str(&line);

                if remaining.0 <= 0 && remaining.1 <= 0 {
                    state = State::NewFile;
                    hunks += 1;
                }
            }
            State::ExtendedHeader => {
                if is_extended_header(&line) {
                    patchbuf.push_str(&buf);
                    patchbuf.push_str(&line);
                    buf.clear();
                } else if line.starts_with("--- ") {
                    patchbuf.push_str(&buf);
                    patchbuf.push_str(&line);
                    buf.clear();
                    state = State::OldFile;
                } else {
                    buf.push_str(&line);
                    state = State::SuspectedHeader;
                }
            }
        }
    }

    commentbuf.push_str(&buf);

    (non_empty(patchbuf), non_empty(commentbuf))
}

/// Find a `git request-pull` style repository URL.
///
/// Whitespace inside the captured URL (a branch name on the same line, or a
/// backslash continuation) is collapsed to single spaces.
pub fn parse_pull_request(content: &str) -> Option<String> {
    let caps = pull_request_regex().captures(content)?;
    let url = caps.get(1)?.as_str();
    let url = url.split_whitespace().collect::<Vec<_>>().join(" ");
    (!url.is_empty()).then_some(url)
}

/// Drop signatures (`-- ` line) and list footers (a line of underscores)
/// along with everything after them, then trim.
pub fn clean_content(content: &str) -> String {
    signature_regex().replace(content, "").trim().to_string()
}

/// Files touched by a diff, without the leading `a/`/`b/` style component.
/// Sorted and unique; `/dev/null` is skipped.
pub fn find_filenames(diff: &str) -> Vec<String> {
    let mut names = BTreeSet::new();

    for caps in filename_line_regex().captures_iter(diff) {
        let Some(path) = caps.get(2).map(|m| m.as_str()) else {
            continue;
        };
        if path == "/dev/null" {
            continue;
        }
        let stripped = match path.split_once('/') {
            Some((_, rest)) if !rest.is_empty() => rest,
            _ => path,
        };
        names.insert(stripped.to_string());
    }

    names.into_iter().collect()
}

/// Content hash of a diff, insensitive to hunk offsets and path prefixes.
///
/// Only file names, hunk line counts and the `+`/`-`/context lines feed the
/// hash, so the same change rebased onto a different base hashes the same.
pub fn hash_diff(diff: &str) -> String {
    let mut hasher = Sha256::new();

    for line in diff.split('\n') {
        if line.is_empty() {
            continue;
        }

        let file_header = line
            .strip_prefix("--- ")
            .map(|rest| ("---", "a/", rest))
            .or_else(|| line.strip_prefix("+++ ").map(|rest| ("+++", "b/", rest)));

        let normalised = if let Some((marker, prefix, rest)) = file_header {
            let path = rest.split_whitespace().next().unwrap_or_default();
            match path.split_once('/') {
                _ if path == "/dev/null" => format!("{marker} {path}"),
                Some((_, stripped)) => format!("{marker} {prefix}{stripped}"),
                None => format!("{marker} {prefix}{path}"),
            }
        } else if let Some(caps) = hunk_header_regex().captures(line) {
            format!("@@ -{} +{} @@", hunk_count(&caps, 1), hunk_count(&caps, 2))
        } else if line.starts_with(['+', '-', ' ']) {
            line.to_string()
        } else {
            continue;
        };

        hasher.update(normalised.as_bytes());
        hasher.update(b"\n");
    }

    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIFF: &str = "--- a/drivers/net/foo.c\n\
                        +++ b/drivers/net/foo.c\n\
                        @@ -10,3 +10,3 @@ static int foo(void)\n\
                        \x20\tint a;\n\
                        -\tint b;\n\
                        +\tint c;\n\
                        \x20\treturn 0;\n";

    const GIT_DIFF: &str = "diff --git a/README b/README\n\
                            index 3f1a2b4..8c9d0e1 100644\n\
                            --- a/README\n\
                            +++ b/README\n\
                            @@ -1 +1 @@\n\
                            -hello\n\
                            +world\n";

    #[test]
    fn test_diff_round_trip() {
        for comment in ["", "A short description.\n", "Line one\n\nLine two\n---\n"] {
            let text = format!("{comment}{DIFF}");
            let (diff, _) = parse_patch(&text);
            assert_eq!(diff.as_deref(), Some(DIFF), "comment: {comment:?}");
        }
    }

    #[test]
    fn test_comment_only() {
        let (diff, comment) = parse_patch("Just a reply.\n\nThanks!");
        assert_eq!(diff, None);
        assert_eq!(comment.as_deref(), Some("Just a reply.\n\nThanks!\n"));
    }

    #[test]
    fn test_git_extended_headers() {
        let text = format!("Subject line body\n{GIT_DIFF}");
        let (diff, comment) = parse_patch(&text);
        assert_eq!(diff.as_deref(), Some(GIT_DIFF));
        assert_eq!(comment.as_deref(), Some("Subject line body\n\n"));
    }

    #[test]
    fn test_rename_without_hunks() {
        let text = "diff --git a/old.c b/new.c\n\
                    similarity index 100%\n\
                    rename from old.c\n\
                    rename to new.c\n";
        let (diff, _) = parse_patch(text);
        assert_eq!(diff.as_deref(), Some(text));
    }

    #[test]
    fn test_reply_after_diff_is_comment() {
        let text = format!("{DIFF}\nThis bit is a comment.\n");
        let (diff, comment) = parse_patch(&text);
        assert_eq!(diff.as_deref(), Some(DIFF));
        assert_eq!(comment.as_deref(), Some("\nThis bit is a comment.\n\n"));
    }

    #[test]
    fn test_update_note_is_not_a_diff() {
        let text = "This is a test patch\n---\nUpdate: test update\n";
        let (diff, comment) = parse_patch(text);
        assert_eq!(diff, None);
        assert_eq!(comment.as_deref(), Some("This is a test patch\n---\nUpdate: test update\n\n"));
    }

    #[test]
    fn test_dash_line_without_diff_falls_back_to_comment() {
        let text = "--- not really\nsome text\n";
        let (diff, comment) = parse_patch(text);
        assert_eq!(diff, None);
        assert_eq!(comment.as_deref(), Some("--- not really\nsome text\n\n"));
    }

    #[test]
    fn test_no_newline_marker() {
        let diff = "--- a/x\n\
                    +++ b/x\n\
                    @@ -1 +1 @@\n\
                    -a\n\
                    \\ No newline at end of file\n\
                    +b\n\
                    \\ No newline at end of file\n";
        let (parsed, _) = parse_patch(diff);
        assert_eq!(parsed.as_deref(), Some(diff));
    }

    #[test]
    fn test_multiple_files() {
        let diff = format!("{DIFF}{GIT_DIFF}");
        let (parsed, _) = parse_patch(&diff);
        assert_eq!(parsed.as_deref(), Some(diff.as_str()));
    }

    #[test]
    fn test_pull_request() {
        let text = "Hi,\n\n\
                    The following changes since commit 0123456789abcdef:\n\
                    \n\
                    \x20 Linux 4.2 (2015-08-30 11:34:09 -0700)\n\
                    \n\
                    are available in the git repository at:\n\
                    \n\
                    \x20 git://git.kernel.org/pub/scm/linux/kernel/git/foo/bar.git for-linus\n\
                    \n\
                    for you to fetch changes up to fedcba9876543210:\n";
        assert_eq!(
            parse_pull_request(text).as_deref(),
            Some("git://git.kernel.org/pub/scm/linux/kernel/git/foo/bar.git for-linus")
        );
    }

    #[test]
    fn test_pull_request_absent() {
        assert_eq!(parse_pull_request("are available in the git repository at:\n"), None);
    }

    #[test]
    fn test_clean_content() {
        assert_eq!(clean_content("Hello\n-- \nsig\n"), "Hello");
        assert_eq!(clean_content("Hello\n____\nfooter\n"), "Hello");
        assert_eq!(clean_content("  Hello --  \n"), "Hello --");
    }

    #[test]
    fn test_find_filenames() {
        let diff = format!("{DIFF}{GIT_DIFF}--- /dev/null\n+++ b/new.c\n");
        assert_eq!(find_filenames(&diff), vec!["README", "drivers/net/foo.c", "new.c"]);
    }

    #[test]
    fn test_hash_ignores_hunk_offsets() {
        let moved = DIFF.replace("@@ -10,3 +10,3 @@", "@@ -42,3 +44,3 @@");
        assert_eq!(hash_diff(DIFF), hash_diff(&moved));
        let changed = DIFF.replace("+\tint c;", "+\tint d;");
        assert_ne!(hash_diff(DIFF), hash_diff(&changed));
    }

    #[test]
    fn test_hash_ignores_path_prefixes() {
        let prefixed = DIFF
            .replace("a/drivers", "linux-old/drivers")
            .replace("b/drivers", "linux-new/drivers");
        assert_eq!(hash_diff(DIFF), hash_diff(&prefixed));
    }
}
