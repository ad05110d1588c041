//! Reference job implementations.
//!
//! These cover the commands the session itself has opinions about (LOGIN,
//! SELECT/EXAMINE, CLOSE, LOGOUT) plus NOOP, and double as worked examples
//! of the [`Job`](crate::job::Job) contract. Each job delivers its outcome
//! through a oneshot receiver returned at construction; exactly one value
//! arrives, or the sender is dropped when the job is cancelled.

mod login;
mod select;
mod simple;

pub use login::LoginJob;
pub use select::{SelectInfo, SelectJob};
pub use simple::{CloseJob, LogoutJob, NoopJob};

use tokio::sync::oneshot;

use crate::message::Message;
use crate::{Error, Result};

/// Quotes a value as an IMAP quoted string, escaping `"` and `\`.
///
/// The session relies on SELECT/EXAMINE arguments being quoted when it
/// extracts the upcoming mailbox name, so jobs quote unconditionally.
#[must_use]
pub fn quote_string(value: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len() + 2);
    out.push(b'"');
    for byte in value.bytes() {
        if byte == b'"' || byte == b'\\' {
            out.push(b'\\');
        }
        out.push(byte);
    }
    out.push(b'"');
    out
}

/// Maps the tagged completion for `tag` to an outcome, or `None` when the
/// response is not this job's completion line.
fn tagged_outcome(response: &Message, tag: &str) -> Option<Result<()>> {
    if tag.is_empty() || response.tag() != Some(tag.as_bytes()) {
        return None;
    }
    Some(match response.code() {
        Some(b"OK") => Ok(()),
        Some(b"NO") => Err(Error::No(response.text_from(2))),
        _ => Err(Error::Bad(response.text_from(2))),
    })
}

/// Sends a result through the slot, at most once.
fn deliver<T>(slot: &mut Option<oneshot::Sender<T>>, value: T) {
    if let Some(sender) = slot.take() {
        let _ = sender.send(value);
    }
}

fn parse_number(bytes: &[u8]) -> Option<u32> {
    std::str::from_utf8(bytes).ok()?.parse().ok()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::message::Part;

    fn response(parts: &[&str]) -> Message {
        Message {
            parts: parts
                .iter()
                .map(|p| Part::String(p.as_bytes().to_vec()))
                .collect(),
            response_code: Vec::new(),
        }
    }

    #[test]
    fn test_quote_string() {
        assert_eq!(quote_string("INBOX"), b"\"INBOX\"".to_vec());
        assert_eq!(quote_string(""), b"\"\"".to_vec());
        assert_eq!(quote_string("two words"), b"\"two words\"".to_vec());
        assert_eq!(quote_string("a\"b"), b"\"a\\\"b\"".to_vec());
        assert_eq!(quote_string("a\\b"), b"\"a\\\\b\"".to_vec());
    }

    #[test]
    fn test_tagged_outcome_matches_only_own_tag() {
        let ok = response(&["A000001", "OK", "done"]);
        assert!(tagged_outcome(&ok, "A000001").unwrap().is_ok());
        assert!(tagged_outcome(&ok, "A000002").is_none());
        assert!(tagged_outcome(&ok, "").is_none());
    }

    #[test]
    fn test_tagged_outcome_maps_status() {
        let no = response(&["A000001", "NO", "mailbox", "missing"]);
        match tagged_outcome(&no, "A000001").unwrap() {
            Err(Error::No(text)) => assert_eq!(text, "mailbox missing"),
            other => panic!("unexpected outcome: {other:?}"),
        }

        let bad = response(&["A000001", "BAD", "syntax"]);
        assert!(matches!(
            tagged_outcome(&bad, "A000001").unwrap(),
            Err(Error::Bad(_))
        ));
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number(b"172"), Some(172));
        assert_eq!(parse_number(b"abc"), None);
        assert_eq!(parse_number(b""), None);
    }
}
