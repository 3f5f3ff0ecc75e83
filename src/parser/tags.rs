//! Review tag extraction (`Acked-by:`, `Reviewed-by:`, ...).

use std::collections::BTreeMap;

use regex::{Regex, RegexBuilder};
use serde::Serialize;

use crate::models::Tag;

/// A tag definition with its pattern compiled.
///
/// Patterns match line-anchored and case-insensitively, so `^Acked-by:`
/// counts `ACKED-BY: x` but not a quoted `> Acked-by: x`.
#[derive(Debug, Clone)]
pub struct TagPattern {
    pub tag_id: i64,
    pub name: String,
    regex: Regex,
}

impl TagPattern {
    pub fn compile(tag: &Tag) -> Result<Self, regex::Error> {
        let regex = RegexBuilder::new(&tag.pattern)
            .case_insensitive(true)
            .multi_line(true)
            .build()?;
        Ok(Self {
            tag_id: tag.id,
            name: tag.name.clone(),
            regex,
        })
    }

    pub fn count(&self, text: &str) -> i32 {
        i32::try_from(self.regex.find_iter(text).count()).unwrap_or(i32::MAX)
    }
}

/// Compile every tag; a tag with a broken pattern is logged and skipped.
pub fn compile_tags(tags: &[Tag]) -> Vec<TagPattern> {
    tags.iter()
        .filter_map(|tag| match TagPattern::compile(tag) {
            Ok(pattern) => Some(pattern),
            Err(err) => {
                log::warn!("ignoring tag {:?} with invalid pattern: {}", tag.name, err);
                None
            }
        })
        .collect()
}

/// Non-zero tag counts keyed by tag id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TagCounts(BTreeMap<i64, i32>);

impl TagCounts {
    pub fn get(&self, tag_id: i64) -> i32 {
        self.0.get(&tag_id).copied().unwrap_or(0)
    }

    pub fn add(&mut self, tag_id: i64, count: i32) {
        if count > 0 {
            *self.0.entry(tag_id).or_insert(0) += count;
        }
    }

    pub fn merge(&mut self, other: &TagCounts) {
        for (&tag_id, &count) in &other.0 {
            self.add(tag_id, count);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (i64, i32)> + '_ {
        self.0.iter().map(|(&tag_id, &count)| (tag_id, count))
    }
}

/// Count every tag in one piece of text. Tags that do not occur are absent.
pub fn extract_tags(text: &str, tags: &[TagPattern]) -> TagCounts {
    let mut counts = TagCounts::default();
    for tag in tags {
        counts.add(tag.tag_id, tag.count(text));
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(id: i64, name: &str, pattern: &str) -> Tag {
        Tag {
            id,
            name: name.to_string(),
            pattern: pattern.to_string(),
            abbrev: name[..1].to_string(),
        }
    }

    fn default_tags() -> Vec<TagPattern> {
        compile_tags(&[
            tag(1, "Acked-by", "^Acked-by:"),
            tag(2, "Reviewed-by", "^Reviewed-by:"),
            tag(3, "Tested-by", "^Tested-by:"),
        ])
    }

    #[test]
    fn test_no_tag() {
        assert!(extract_tags("test", &default_tags()).is_empty());
    }

    #[test]
    fn test_ack() {
        let counts = extract_tags("Acked-by: Test User <test@example.com>\n", &default_tags());
        assert_eq!(counts.get(1), 1);
        assert_eq!(counts.get(2), 0);
    }

    #[test]
    fn test_ack_is_case_insensitive() {
        let counts = extract_tags("ACKED-BY: Test User <test@example.com>\n", &default_tags());
        assert_eq!(counts.get(1), 1);
    }

    #[test]
    fn test_quoted_ack_is_ignored() {
        let counts = extract_tags("> Acked-by: Test User <test@example.com>\n", &default_tags());
        assert!(counts.is_empty());
    }

    #[test]
    fn test_multiple_tags() {
        let text = "Acked-by: A <a@x>\n\
                    Reviewed-by: B <b@x>\n\
                    Acked-by: C <c@x>\n\
                    Tested-by: D <d@x>\n";
        let counts = extract_tags(text, &default_tags());
        assert_eq!(counts.get(1), 2);
        assert_eq!(counts.get(2), 1);
        assert_eq!(counts.get(3), 1);
    }

    #[test]
    fn test_merge_sums_counts() {
        let tags = default_tags();
        let mut total = extract_tags("Acked-by: A <a@x>\n", &tags);
        total.merge(&extract_tags("Acked-by: B <b@x>\nTested-by: C <c@x>\n", &tags));
        assert_eq!(total.get(1), 2);
        assert_eq!(total.get(3), 1);
        assert_eq!(total.iter().collect::<Vec<_>>(), vec![(1, 2), (3, 1)]);
    }

    #[test]
    fn test_invalid_pattern_is_skipped() {
        let tags = compile_tags(&[tag(1, "Broken", "^(unclosed"), tag(2, "Acked-by", "^Acked-by:")]);
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].tag_id, 2);
    }
}
