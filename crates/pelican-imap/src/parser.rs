//! Incremental IMAP response parser.
//!
//! The parser consumes an append-only byte stream and yields structured
//! [`Message`]s, tolerating arbitrary fragmentation: the stream may cut
//! mid-token, mid-literal, or mid-list. Readers never advance past the end
//! of a complete token; when bytes are missing they set the sticky
//! insufficient-data flag and the caller rewinds to the response boundary
//! with [`StreamParser::restore_state`] and waits for more input.
//!
//! After a response has been fully decoded, [`StreamParser::trim_buffer`]
//! drops the consumed prefix so the live buffer always starts on a response
//! boundary.

use bytes::{Buf, BytesMut};

use crate::message::{Message, Part};
use crate::{Error, Result};

/// Upper bound on a single literal, matching what a sane server sends.
const MAX_LITERAL_SIZE: usize = 100 * 1024 * 1024;

/// Incremental response tokenizer with rewindable partial-parse.
#[derive(Debug, Default)]
pub struct StreamParser {
    buffer: BytesMut,
    position: usize,
    saved_position: usize,
    insufficient: bool,
    literal_remaining: usize,
}

impl StreamParser {
    /// Creates an empty parser.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends bytes received from the transport.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Returns true if a CRLF-terminated response is (likely) available.
    ///
    /// This is a cheap pre-check; literals may still run past the CRLF this
    /// finds, in which case the readers report insufficient data.
    #[must_use]
    pub fn parse(&self) -> bool {
        self.buffer[self.position..]
            .windows(2)
            .any(|window| window == b"\r\n")
    }

    /// Checkpoints the read cursor at the current position.
    pub fn save_state(&mut self) {
        self.saved_position = self.position;
    }

    /// Rewinds the read cursor to the checkpoint and clears the
    /// insufficient-data flag and any literal progress.
    pub fn restore_state(&mut self) {
        self.position = self.saved_position;
        self.insufficient = false;
        self.literal_remaining = 0;
    }

    /// Drops the consumed prefix after a successful parse.
    pub fn trim_buffer(&mut self) {
        self.buffer.advance(self.position);
        self.position = 0;
        self.saved_position = 0;
    }

    /// Number of unconsumed bytes in the buffer.
    #[must_use]
    pub fn available_data_size(&self) -> usize {
        self.buffer.len() - self.position
    }

    /// Sticky flag set by any reader that ran out of bytes; cleared by
    /// [`restore_state`](Self::restore_state).
    #[must_use]
    pub const fn insufficient_data(&self) -> bool {
        self.insufficient
    }

    fn peek(&self, offset: usize) -> Option<u8> {
        self.buffer.get(self.position + offset).copied()
    }

    fn skip_spaces(&mut self) {
        while self.peek(0) == Some(b' ') {
            self.position += 1;
        }
    }

    fn fault(&self, message: impl Into<String>) -> Error {
        Error::Parse {
            position: self.position,
            message: message.into(),
        }
    }

    /// Returns true when the cursor sits at the terminating CRLF of the
    /// current response, consuming it. Starvation counts as the end so the
    /// decode loop can stop and rewind.
    pub fn at_command_end(&mut self) -> bool {
        let mark = self.position;
        self.skip_spaces();
        if self.available_data_size() < 2 {
            self.position = mark;
            self.insufficient = true;
            return true;
        }
        if self.peek(0) == Some(b'\r') && self.peek(1) == Some(b'\n') {
            self.position += 2;
            return true;
        }
        self.position = mark;
        false
    }

    /// Returns true if the next token is an atom or quoted string.
    pub fn has_string(&mut self) -> bool {
        let mark = self.position;
        self.skip_spaces();
        let result = match self.peek(0) {
            None => {
                self.insufficient = true;
                false
            }
            Some(byte) => !matches!(
                byte,
                b'(' | b')' | b'[' | b']' | b'{' | b'\r' | b'\n' | b' '
            ),
        };
        self.position = mark;
        result
    }

    /// Returns true if the next token opens a parenthesized list.
    pub fn has_list(&mut self) -> bool {
        let mark = self.position;
        self.skip_spaces();
        let result = match self.peek(0) {
            None => {
                self.insufficient = true;
                false
            }
            Some(byte) => byte == b'(',
        };
        self.position = mark;
        result
    }

    /// Returns true if the next token opens a `[...]` response code,
    /// consuming the opening bracket.
    pub fn has_response_code(&mut self) -> bool {
        let mark = self.position;
        self.skip_spaces();
        match self.peek(0) {
            None => {
                self.position = mark;
                self.insufficient = true;
                false
            }
            Some(b'[') => {
                self.position += 1;
                true
            }
            Some(_) => {
                self.position = mark;
                false
            }
        }
    }

    /// Returns true if the cursor sits at the closing bracket of a response
    /// code, consuming it.
    pub fn at_response_code_end(&mut self) -> bool {
        match self.peek(0) {
            None => {
                self.insufficient = true;
                false
            }
            Some(b']') => {
                self.position += 1;
                true
            }
            Some(_) => false,
        }
    }

    /// Returns true if the next token is a `{n}` literal, consuming its
    /// header and arming [`read_literal_part`](Self::read_literal_part).
    pub fn has_literal(&mut self) -> bool {
        let mark = self.position;
        self.skip_spaces();
        match self.peek(0) {
            None => {
                self.position = mark;
                self.insufficient = true;
                false
            }
            Some(b'{') => match self.literal_header() {
                Ok(Some(size)) => {
                    self.literal_remaining = size;
                    true
                }
                Ok(None) => {
                    self.position = mark;
                    self.insufficient = true;
                    false
                }
                // A malformed header falls through to the caller's
                // inconsistent-data handling.
                Err(_) => {
                    self.position = mark;
                    false
                }
            },
            Some(_) => {
                self.position = mark;
                false
            }
        }
    }

    /// Returns true when the current literal has been fully consumed.
    /// Starvation counts as the end so the read loop can stop and rewind.
    pub fn at_literal_end(&mut self) -> bool {
        if self.literal_remaining == 0 {
            return true;
        }
        if self.available_data_size() == 0 {
            self.insufficient = true;
            return true;
        }
        false
    }

    /// Reads the next available chunk of the current literal.
    pub fn read_literal_part(&mut self) -> Vec<u8> {
        let size = self.literal_remaining.min(self.available_data_size());
        if size == 0 {
            if self.literal_remaining > 0 {
                self.insufficient = true;
            }
            return Vec::new();
        }
        let chunk = self.buffer[self.position..self.position + size].to_vec();
        self.position += size;
        self.literal_remaining -= size;
        chunk
    }

    /// Reads an atom or quoted string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] on a structurally impossible token, such as
    /// an invalid escape inside a quoted string.
    pub fn read_string(&mut self) -> Result<Vec<u8>> {
        self.skip_spaces();
        match self.peek(0) {
            None => {
                self.insufficient = true;
                Ok(Vec::new())
            }
            Some(b'"') => self.read_quoted(),
            Some(_) => Ok(self.read_atom()),
        }
    }

    fn read_quoted(&mut self) -> Result<Vec<u8>> {
        let mark = self.position;
        self.position += 1; // opening quote
        let mut out = Vec::new();
        loop {
            match self.peek(0) {
                None => {
                    self.position = mark;
                    self.insufficient = true;
                    return Ok(Vec::new());
                }
                Some(b'"') => {
                    self.position += 1;
                    return Ok(out);
                }
                Some(b'\\') => match self.peek(1) {
                    None => {
                        self.position = mark;
                        self.insufficient = true;
                        return Ok(Vec::new());
                    }
                    Some(escaped @ (b'"' | b'\\')) => {
                        out.push(escaped);
                        self.position += 2;
                    }
                    Some(other) => {
                        return Err(self.fault(format!(
                            "invalid escape \\{} in quoted string",
                            char::from(other)
                        )));
                    }
                },
                Some(b'\r' | b'\n') => {
                    return Err(self.fault("unterminated quoted string"));
                }
                Some(byte) => {
                    out.push(byte);
                    self.position += 1;
                }
            }
        }
    }

    fn read_atom(&mut self) -> Vec<u8> {
        let start = self.position;
        while let Some(byte) = self.peek(0) {
            if matches!(byte, b' ' | b'(' | b')' | b'{' | b'[' | b']' | b'\r' | b'\n') {
                return self.buffer[start..self.position].to_vec();
            }
            self.position += 1;
        }
        // The atom may continue in the next packet.
        self.position = start;
        self.insufficient = true;
        Vec::new()
    }

    /// Reads a parenthesized list, flattened to a sequence of byte items.
    ///
    /// Nested parentheses are skipped rather than preserved; quoted strings
    /// and literals inside the list become plain items. Items may contain
    /// brackets (`BODY[HEADER]` is one item).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] when the list is structurally impossible,
    /// e.g. cut by a CRLF before the closing parenthesis.
    pub fn read_parenthesized_list(&mut self) -> Result<Vec<Vec<u8>>> {
        self.skip_spaces();
        let mark = self.position;
        match self.peek(0) {
            None => {
                self.insufficient = true;
                return Ok(Vec::new());
            }
            Some(b'(') => self.position += 1,
            Some(other) => {
                return Err(self.fault(format!(
                    "expected parenthesized list, found {}",
                    char::from(other)
                )));
            }
        }

        let mut items = Vec::new();
        let mut depth = 1usize;
        loop {
            self.skip_spaces();
            let Some(byte) = self.peek(0) else {
                self.position = mark;
                self.insufficient = true;
                return Ok(Vec::new());
            };
            match byte {
                b'(' => {
                    depth += 1;
                    self.position += 1;
                }
                b')' => {
                    self.position += 1;
                    depth -= 1;
                    if depth == 0 {
                        return Ok(items);
                    }
                }
                b'\r' | b'\n' => {
                    return Err(self.fault("unterminated parenthesized list"));
                }
                b'"' => {
                    let item = self.read_quoted()?;
                    if self.insufficient {
                        self.position = mark;
                        return Ok(Vec::new());
                    }
                    items.push(item);
                }
                b'{' => match self.literal_header()? {
                    None => {
                        self.position = mark;
                        self.insufficient = true;
                        return Ok(Vec::new());
                    }
                    Some(size) => {
                        if self.available_data_size() < size {
                            self.position = mark;
                            self.insufficient = true;
                            return Ok(Vec::new());
                        }
                        items.push(self.buffer[self.position..self.position + size].to_vec());
                        self.position += size;
                    }
                },
                _ => {
                    let start = self.position;
                    while let Some(next) = self.peek(0) {
                        if matches!(next, b' ' | b'(' | b')' | b'{' | b'"' | b'\r' | b'\n') {
                            break;
                        }
                        self.position += 1;
                    }
                    if self.peek(0).is_none() {
                        self.position = mark;
                        self.insufficient = true;
                        return Ok(Vec::new());
                    }
                    items.push(self.buffer[start..self.position].to_vec());
                }
            }
        }
    }

    /// Parses a `{n}` CRLF literal header at the cursor, advancing past it.
    ///
    /// Returns `Ok(None)` when the buffer ends before the header is
    /// complete (cursor unchanged).
    fn literal_header(&mut self) -> Result<Option<usize>> {
        let mut offset = 1; // past '{'
        let mut size = 0usize;
        let mut has_digits = false;
        loop {
            match self.peek(offset) {
                None => return Ok(None),
                Some(digit @ b'0'..=b'9') => {
                    size = size
                        .checked_mul(10)
                        .and_then(|s| s.checked_add(usize::from(digit - b'0')))
                        .ok_or_else(|| self.fault("literal size overflow"))?;
                    has_digits = true;
                    offset += 1;
                }
                Some(b'}') => {
                    offset += 1;
                    break;
                }
                Some(other) => {
                    return Err(self.fault(format!(
                        "invalid character {} in literal size",
                        char::from(other)
                    )));
                }
            }
        }
        if !has_digits {
            return Err(self.fault("empty literal size"));
        }
        if size > MAX_LITERAL_SIZE {
            return Err(self.fault(format!("literal too large: {size} bytes")));
        }
        match (self.peek(offset), self.peek(offset + 1)) {
            (Some(b'\r'), Some(b'\n')) => {
                self.position += offset + 2;
                Ok(Some(size))
            }
            (None, _) | (Some(b'\r'), None) => Ok(None),
            _ => Err(self.fault("expected CRLF after literal size")),
        }
    }

    /// Attempts to decode one complete response from the buffer.
    ///
    /// Returns `Ok(None)` when the buffered data does not yet form a
    /// complete response; the cursor is left on the response boundary. On
    /// success the consumed prefix is trimmed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] when the buffer contains a structurally
    /// impossible response. The connection cannot recover from this.
    pub fn next_message(&mut self) -> Result<Option<Message>> {
        if self.available_data_size() == 0 || !self.parse() {
            return Ok(None);
        }
        self.save_state();

        let mut message = Message::new();
        let mut in_response_code = false;
        loop {
            if self.insufficient_data() {
                break;
            }
            if self.at_command_end() {
                break;
            }
            if self.has_string() {
                let string = self.read_string()?;
                if !self.insufficient_data() {
                    if string == b"NIL" {
                        message.push(in_response_code, Part::List(Vec::new()));
                    } else {
                        message.push(in_response_code, Part::String(string));
                    }
                }
            } else if self.has_list() {
                let list = self.read_parenthesized_list()?;
                if !self.insufficient_data() {
                    message.push(in_response_code, Part::List(list));
                }
            } else if self.has_response_code() {
                in_response_code = true;
            } else if self.at_response_code_end() {
                in_response_code = false;
            } else if self.has_literal() {
                let mut literal = Vec::new();
                while !self.at_literal_end() {
                    literal.extend_from_slice(&self.read_literal_part());
                }
                if !self.insufficient_data() {
                    message.push(in_response_code, Part::Literal(literal));
                }
            } else {
                if !self.insufficient_data() {
                    return Err(self.fault("no token recognized"));
                }
                break;
            }
        }

        if self.insufficient_data() {
            self.restore_state();
            return Ok(None);
        }
        self.trim_buffer();
        Ok(Some(message))
    }
}
