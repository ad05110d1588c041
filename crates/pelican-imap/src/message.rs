//! Structured in-memory server responses.
//!
//! A [`Message`] is the parsed form of one complete IMAP response line
//! (including any literals it carried): an ordered sequence of [`Part`]s
//! plus the parts of the bracketed response code, if one was present.

/// One token of a parsed response, in wire order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Part {
    /// An atom or quoted string.
    String(Vec<u8>),
    /// A parenthesized list, flattened to its items.
    List(Vec<Vec<u8>>),
    /// A `{n}` literal.
    Literal(Vec<u8>),
}

impl Part {
    /// Returns the raw bytes of a `String` or `Literal` part.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::String(bytes) | Self::Literal(bytes) => Some(bytes),
            Self::List(_) => None,
        }
    }
}

impl std::fmt::Display for Part {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String(bytes) | Self::Literal(bytes) => {
                write!(f, "{}", String::from_utf8_lossy(bytes))
            }
            Self::List(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", String::from_utf8_lossy(item))?;
                }
                write!(f, ")")
            }
        }
    }
}

/// A complete parsed server response.
///
/// The first part of an untagged response is `*`; otherwise the first part
/// is the command tag and the second the status code (`OK`, `NO`, `BAD`,
/// `BYE`, `PREAUTH`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    /// Response content parts, in wire order.
    pub parts: Vec<Part>,
    /// Parts of the `[...]` response code, if the response carried one.
    pub response_code: Vec<Part>,
}

impl Message {
    /// Creates an empty message.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a part to the content or, when `in_response_code` is set, to
    /// the response code.
    pub fn push(&mut self, in_response_code: bool, part: Part) {
        if in_response_code {
            self.response_code.push(part);
        } else {
            self.parts.push(part);
        }
    }

    /// Returns true if this response is untagged (first part is `*`).
    #[must_use]
    pub fn is_untagged(&self) -> bool {
        self.tag() == Some(b"*")
    }

    /// Returns the tag of the response (`*` for untagged responses).
    #[must_use]
    pub fn tag(&self) -> Option<&[u8]> {
        self.parts.first().and_then(Part::as_bytes)
    }

    /// Returns the status code part (`OK`, `NO`, `BAD`, `BYE`, `PREAUTH`),
    /// i.e. the second part of the response.
    #[must_use]
    pub fn code(&self) -> Option<&[u8]> {
        self.parts.get(1).and_then(Part::as_bytes)
    }

    /// Returns the bytes of the content part at `index`, if it is a string
    /// or literal.
    #[must_use]
    pub fn part_bytes(&self, index: usize) -> Option<&[u8]> {
        self.parts.get(index).and_then(Part::as_bytes)
    }

    /// Looks up the value following `key` in the response code parts.
    ///
    /// For a response carrying `[UIDVALIDITY 857529045]` this returns the
    /// bytes `857529045` when asked for `UIDVALIDITY`.
    #[must_use]
    pub fn response_code_value(&self, key: &[u8]) -> Option<&[u8]> {
        let position = self
            .response_code
            .iter()
            .position(|part| part.as_bytes() == Some(key))?;
        self.response_code.get(position + 1).and_then(Part::as_bytes)
    }

    /// Returns true if the response code contains the bare atom `key`
    /// (e.g. `READ-ONLY`).
    #[must_use]
    pub fn has_response_code(&self, key: &[u8]) -> bool {
        self.response_code
            .iter()
            .any(|part| part.as_bytes() == Some(key))
    }

    /// Renders the content parts starting at `index` as display text,
    /// space-separated and trimmed.
    #[must_use]
    pub fn text_from(&self, index: usize) -> String {
        let mut out = String::new();
        for (i, part) in self.parts.iter().skip(index).enumerate() {
            if i > 0 {
                out.push(' ');
            }
            out.push_str(&part.to_string());
        }
        out.trim().to_string()
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, part) in self.parts.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{part}")?;
        }
        if !self.response_code.is_empty() {
            write!(f, " [")?;
            for (i, part) in self.response_code.iter().enumerate() {
                if i > 0 {
                    write!(f, " ")?;
                }
                write!(f, "{part}")?;
            }
            write!(f, "]")?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn tagged_ok() -> Message {
        Message {
            parts: vec![
                Part::String(b"A000001".to_vec()),
                Part::String(b"OK".to_vec()),
                Part::String(b"LOGIN".to_vec()),
                Part::String(b"completed".to_vec()),
            ],
            response_code: Vec::new(),
        }
    }

    #[test]
    fn test_tagged_accessors() {
        let message = tagged_ok();
        assert!(!message.is_untagged());
        assert_eq!(message.tag(), Some(b"A000001".as_ref()));
        assert_eq!(message.code(), Some(b"OK".as_ref()));
        assert_eq!(message.text_from(2), "LOGIN completed");
    }

    #[test]
    fn test_untagged() {
        let message = Message {
            parts: vec![
                Part::String(b"*".to_vec()),
                Part::String(b"5".to_vec()),
                Part::String(b"EXISTS".to_vec()),
            ],
            response_code: Vec::new(),
        };
        assert!(message.is_untagged());
        assert_eq!(message.part_bytes(1), Some(b"5".as_ref()));
    }

    #[test]
    fn test_response_code_lookup() {
        let mut message = tagged_ok();
        message.response_code = vec![
            Part::String(b"UIDVALIDITY".to_vec()),
            Part::String(b"857529045".to_vec()),
        ];
        assert_eq!(
            message.response_code_value(b"UIDVALIDITY"),
            Some(b"857529045".as_ref())
        );
        assert_eq!(message.response_code_value(b"UIDNEXT"), None);
        assert!(message.has_response_code(b"UIDVALIDITY"));
        assert!(!message.has_response_code(b"READ-ONLY"));
    }

    #[test]
    fn test_display_renders_lists_and_codes() {
        let message = Message {
            parts: vec![
                Part::String(b"*".to_vec()),
                Part::String(b"FLAGS".to_vec()),
                Part::List(vec![b"\\Seen".to_vec(), b"\\Deleted".to_vec()]),
            ],
            response_code: Vec::new(),
        };
        assert_eq!(message.to_string(), "* FLAGS (\\Seen \\Deleted)");
    }

    #[test]
    fn test_display_with_response_code() {
        let mut message = tagged_ok();
        message.response_code = vec![Part::String(b"READ-WRITE".to_vec())];
        assert_eq!(message.to_string(), "A000001 OK LOGIN completed [READ-WRITE]");
    }
}
