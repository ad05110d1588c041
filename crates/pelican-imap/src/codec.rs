//! Mailbox-name codec: modified UTF-7 per RFC 3501 §5.1.3.
//!
//! Mailbox names travel on the wire in "modified UTF-7": printable ASCII is
//! direct, `&` is escaped as `&-`, and everything else is carried as
//! base64-encoded UTF-16BE between `&` and `-`, with `,` standing in for
//! `/` in the base64 alphabet.
//!
//! Decoding is permissive: a malformed encoded sequence is passed through
//! unchanged rather than rejected, since the decoded name only feeds
//! user-visible session state.

use base64::engine::general_purpose::GeneralPurpose;
use base64::engine::{DecodePaddingMode, GeneralPurposeConfig};
use base64::{alphabet, Engine};

const MUTF7: GeneralPurpose = GeneralPurpose::new(
    &alphabet::IMAP_MUTF7,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// A character that may appear unencoded in a modified UTF-7 name.
const fn is_direct(byte: u8) -> bool {
    byte >= 0x20 && byte <= 0x7e && byte != b'&'
}

const fn is_base64_char(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'+' || byte == b','
}

/// Encodes a Unicode mailbox name into its modified UTF-7 wire form.
#[must_use]
pub fn encode_mailbox_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending = String::new();

    let flush = |out: &mut String, pending: &mut String| {
        if pending.is_empty() {
            return;
        }
        let mut utf16 = Vec::with_capacity(pending.len() * 2);
        for unit in pending.encode_utf16() {
            utf16.extend_from_slice(&unit.to_be_bytes());
        }
        out.push('&');
        out.push_str(&MUTF7.encode(&utf16));
        out.push('-');
        pending.clear();
    };

    for ch in name.chars() {
        if ch == '&' {
            flush(&mut out, &mut pending);
            out.push_str("&-");
        } else if ch.is_ascii() && is_direct(ch as u8) {
            flush(&mut out, &mut pending);
            out.push(ch);
        } else {
            pending.push(ch);
        }
    }
    flush(&mut out, &mut pending);
    out
}

/// Decodes a modified UTF-7 mailbox name into Unicode.
#[must_use]
pub fn decode_mailbox_name(encoded: &str) -> String {
    let bytes = encoded.as_bytes();
    let mut out = String::with_capacity(encoded.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'&' {
            // Copy the run up to the next shift-in verbatim; the shift-in
            // is a single-byte character, so the slice stays valid UTF-8.
            let start = i;
            while i < bytes.len() && bytes[i] != b'&' {
                i += 1;
            }
            out.push_str(&encoded[start..i]);
            continue;
        }

        // "&-" is a literal ampersand.
        if bytes.get(i + 1) == Some(&b'-') {
            out.push('&');
            i += 2;
            continue;
        }

        let start = i + 1;
        let mut end = start;
        while end < bytes.len() && is_base64_char(bytes[end]) {
            end += 1;
        }

        if end == start {
            // A bare shift-in with no encoded text.
            out.push('&');
            i = start;
            continue;
        }

        match MUTF7.decode(&bytes[start..end]) {
            Ok(utf16) => {
                let units: Vec<u16> = utf16
                    .chunks(2)
                    .filter(|chunk| chunk.len() == 2)
                    .map(|chunk| u16::from_be_bytes([chunk[0], chunk[1]]))
                    .collect();
                out.push_str(&String::from_utf16_lossy(&units));
            }
            Err(_) => {
                // Pass the malformed sequence through unchanged.
                out.push('&');
                out.push_str(&String::from_utf8_lossy(&bytes[start..end]));
            }
        }

        i = end;
        if bytes.get(i) == Some(&b'-') {
            i += 1;
        }
    }

    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_passthrough() {
        assert_eq!(encode_mailbox_name("INBOX"), "INBOX");
        assert_eq!(decode_mailbox_name("INBOX"), "INBOX");
        assert_eq!(encode_mailbox_name("Sent Items"), "Sent Items");
    }

    #[test]
    fn test_ampersand_escape() {
        assert_eq!(encode_mailbox_name("Lost & Found"), "Lost &- Found");
        assert_eq!(decode_mailbox_name("Lost &- Found"), "Lost & Found");
    }

    #[test]
    fn test_rfc3501_examples() {
        assert_eq!(
            encode_mailbox_name("~peter/mail/台北/日本語"),
            "~peter/mail/&U,BTFw-/&ZeVnLIqe-"
        );
        assert_eq!(
            decode_mailbox_name("~peter/mail/&U,BTFw-/&ZeVnLIqe-"),
            "~peter/mail/台北/日本語"
        );
    }

    #[test]
    fn test_non_bmp_character() {
        // Surrogate pairs survive the UTF-16 round trip.
        let name = "mail𐀀box";
        assert_eq!(decode_mailbox_name(&encode_mailbox_name(name)), name);
    }

    #[test]
    fn test_round_trip() {
        for name in ["", "INBOX", "Entwürfe", "résumé & notes", "☺!", "台北日本語"] {
            assert_eq!(decode_mailbox_name(&encode_mailbox_name(name)), name);
        }
    }

    #[test]
    fn test_permissive_decode_of_malformed_input() {
        // An unterminated shift sequence decodes to something rather than
        // failing; exact bytes are preserved when base64 decoding fails.
        assert_eq!(decode_mailbox_name("a&!b"), "a&!b");
    }

    #[test]
    fn test_decode_passes_raw_unicode_through() {
        // Some servers hand out UTF-8 names without encoding them.
        assert_eq!(decode_mailbox_name("Entwürfe"), "Entwürfe");
    }
}
