//! Header decoding and whitespace normalisation.
//!
//! Mail headers reach us either as plain text or as a mix of literal text and
//! RFC 2047 "encoded words" (`=?charset?Q|B?...?=`). Everything the parser
//! looks at (From, Subject, Message-Id, list headers) is passed through
//! [`clean_header`] first, so the rest of the pipeline only ever sees
//! normalised Unicode text.
//!
//! Adjacent encoded words sharing a charset are concatenated before charset
//! decoding, since encoders routinely split a multi-byte character across two
//! words. All other fragments are joined with a single space and the result
//! has its whitespace collapsed.

use std::sync::OnceLock;

use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use encoding_rs::{Encoding, WINDOWS_1252};
use regex::Regex;
use thiserror::Error;

static ENCODED_WORD: OnceLock<Regex> = OnceLock::new();

fn encoded_word_regex() -> &'static Regex {
    ENCODED_WORD.get_or_init(|| {
        Regex::new(r"=\?([^?\s]+)\?([bBqQ])\?([^?\s]*)\?=").expect("Invalid encoded-word regex")
    })
}

/// Base64 as written by real mail clients: padding is frequently dropped.
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Errors raised while decoding an RFC 2047 header value.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HeaderError {
    #[error("unknown charset `{0}` in encoded word")]
    UnknownCharset(String),
    #[error("invalid base64 payload in encoded word `{0}`")]
    InvalidBase64(String),
}

enum Fragment {
    Text(String),
    Encoded { charset: String, bytes: Vec<u8> },
}

/// Collapse every run of whitespace (including folded header newlines) to a
/// single space and trim both ends.
pub fn normalise_space(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Convert raw header bytes to text.
///
/// Headers are supposed to be ASCII, but 8-bit headers are common in list
/// archives. UTF-8 is tried first, then windows-1252 which accepts any byte.
pub fn raw_header_text(raw: &[u8]) -> String {
    match std::str::from_utf8(raw) {
        Ok(text) => text.to_string(),
        Err(_) => WINDOWS_1252.decode_without_bom_handling(raw).0.into_owned(),
    }
}

/// Decode a (possibly RFC 2047 encoded) header value into normalised text.
///
/// Literal fragments are kept as they are. An encoded word naming a charset
/// we cannot decode, or carrying a corrupt base64 payload, fails the whole
/// header rather than being dropped silently.
pub fn clean_header(raw: &str) -> Result<String, HeaderError> {
    let mut fragments: Vec<Fragment> = Vec::new();
    let mut last = 0;

    for caps in encoded_word_regex().captures_iter(raw) {
        let (Some(whole), Some(charset), Some(encoding), Some(text)) =
            (caps.get(0), caps.get(1), caps.get(2), caps.get(3))
        else {
            continue;
        };

        let between = &raw[last..whole.start()];
        let adjacent = between.trim().is_empty();
        if !adjacent {
            fragments.push(Fragment::Text(between.to_string()));
        }

        // RFC 2231 allows a language suffix: `utf-8*en`
        let charset = charset
            .as_str()
            .split('*')
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        let bytes = decode_transfer(encoding.as_str(), text.as_str())?;

        match fragments.last_mut() {
            Some(Fragment::Encoded {
                charset: previous,
                bytes: buffer,
            }) if adjacent && *previous == charset => buffer.extend_from_slice(&bytes),
            _ => fragments.push(Fragment::Encoded { charset, bytes }),
        }

        last = whole.end();
    }

    let tail = &raw[last..];
    if !tail.trim().is_empty() {
        fragments.push(Fragment::Text(tail.to_string()));
    }

    let mut decoded = Vec::with_capacity(fragments.len());
    for fragment in fragments {
        match fragment {
            Fragment::Text(text) => decoded.push(text),
            Fragment::Encoded { charset, bytes } => decoded.push(decode_charset(&charset, &bytes)?),
        }
    }

    Ok(normalise_space(&decoded.join(" ")))
}

fn decode_transfer(encoding: &str, text: &str) -> Result<Vec<u8>, HeaderError> {
    if encoding.eq_ignore_ascii_case("b") {
        LENIENT_BASE64
            .decode(text.as_bytes())
            .map_err(|_| HeaderError::InvalidBase64(text.to_string()))
    } else {
        Ok(decode_q(text.as_bytes()))
    }
}

/// RFC 2047 "Q" encoding: `_` is a space, `=XX` a hex-escaped byte. Broken
/// escapes are kept literally.
fn decode_q(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;

    while i < input.len() {
        match input[i] {
            b'_' => {
                out.push(b' ');
                i += 1;
            }
            b'=' => {
                match (hex_value(input.get(i + 1)), hex_value(input.get(i + 2))) {
                    (Some(high), Some(low)) => {
                        out.push((high << 4) | low);
                        i += 3;
                    }
                    _ => {
                        out.push(b'=');
                        i += 1;
                    }
                }
            }
            byte => {
                out.push(byte);
                i += 1;
            }
        }
    }

    out
}

fn hex_value(byte: Option<&u8>) -> Option<u8> {
    match byte? {
        b @ b'0'..=b'9' => Some(b - b'0'),
        b @ b'a'..=b'f' => Some(b - b'a' + 10),
        b @ b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

fn decode_charset(charset: &str, bytes: &[u8]) -> Result<String, HeaderError> {
    let encoding = Encoding::for_label_no_replacement(charset.as_bytes())
        .ok_or_else(|| HeaderError::UnknownCharset(charset.to_string()))?;
    Ok(encoding.decode_without_bom_handling(bytes).0.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalise_space() {
        assert_eq!(normalise_space("  a \t b\r\n\tc  "), "a b c");
        assert_eq!(normalise_space(""), "");
    }

    #[test]
    fn test_plain_header_is_normalised() {
        assert_eq!(
            clean_header("[PATCH] fix\r\n\tfolded   subject").unwrap(),
            "[PATCH] fix folded subject"
        );
    }

    #[test]
    fn test_quoted_printable_word() {
        assert_eq!(
            clean_header("=?utf-8?q?=C3=A9xample=20user?= <user@example.com>").unwrap(),
            "\u{e9}xample user <user@example.com>"
        );
    }

    #[test]
    fn test_split_word_followed_by_text() {
        assert_eq!(
            clean_header("=?utf-8?q?=C3=A9xample=20?= user <user@example.com>").unwrap(),
            "\u{e9}xample user <user@example.com>"
        );
    }

    #[test]
    fn test_base64_word() {
        assert_eq!(
            clean_header("=?utf-8?B?w6l4YW1wbGUgdXNlcg==?= <user@example.com>").unwrap(),
            "\u{e9}xample user <user@example.com>"
        );
    }

    #[test]
    fn test_adjacent_words_share_multibyte_character() {
        // "é" split across two words: 0xC3 in the first, 0xA9 in the second
        assert_eq!(
            clean_header("=?utf-8?q?caf=C3?= =?utf-8?q?=A9?=").unwrap(),
            "caf\u{e9}"
        );
    }

    #[test]
    fn test_latin1_word() {
        assert_eq!(
            clean_header("=?ISO-8859-1?Q?Keld_J=F8rn_Simonsen?=").unwrap(),
            "Keld J\u{f8}rn Simonsen"
        );
    }

    #[test]
    fn test_unknown_charset_is_an_error() {
        assert_eq!(
            clean_header("=?x-no-such-charset?q?abc?="),
            Err(HeaderError::UnknownCharset("x-no-such-charset".to_string()))
        );
    }

    #[test]
    fn test_corrupt_base64_is_an_error() {
        assert!(matches!(
            clean_header("=?utf-8?b?!!!!?="),
            Err(HeaderError::InvalidBase64(_))
        ));
    }

    #[test]
    fn test_raw_header_text_falls_back_to_windows_1252() {
        assert_eq!(raw_header_text(b"caf\xe9"), "caf\u{e9}");
        assert_eq!(raw_header_text("caf\u{e9}".as_bytes()), "caf\u{e9}");
    }
}
