//! Session state and the tagged-completion state machine.
//!
//! The machine owns the protocol-level view of the conversation: the
//! current [`SessionState`], the saved server greeting, the tracked tags
//! whose completion drives transitions, and the mailbox names involved in
//! SELECT/EXAMINE/CLOSE handling.

use crate::codec;
use crate::message::Message;

/// Protocol-level session state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No connection, or the greeting has not arrived yet.
    #[default]
    Disconnected,
    /// Connected, waiting for authentication.
    NotAuthenticated,
    /// Authenticated, no mailbox selected.
    Authenticated,
    /// A mailbox is selected.
    Selected {
        /// User-visible (decoded) name of the selected mailbox.
        mailbox: String,
    },
}

impl SessionState {
    /// Returns the selected mailbox name, if any.
    #[must_use]
    pub fn selected_mailbox(&self) -> Option<&str> {
        match self {
            Self::Selected { mailbox } => Some(mailbox),
            _ => None,
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::NotAuthenticated => write!(f, "NotAuthenticated"),
            Self::Authenticated => write!(f, "Authenticated"),
            Self::Selected { mailbox } => write!(f, "Selected({mailbox})"),
        }
    }
}

/// What the session must do with a response after the machine has seen it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Forward to the current job.
    Forward,
    /// A greeting, consumed here; the session stops the inactivity timer.
    Greeting,
    /// An untagged BYE; the subsequent disconnect drives the transition.
    Bye,
    /// A rejecting greeting; the session closes the transport.
    Reject,
}

/// Session state machine driven by tagged completions.
#[derive(Debug, Default)]
pub struct StateMachine {
    state: SessionState,
    greeting: String,
    auth_tag: Option<String>,
    select_tag: Option<String>,
    close_tag: Option<String>,
    upcoming_mailbox: String,
}

impl StateMachine {
    /// Creates a machine in the `Disconnected` state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> &SessionState {
        &self.state
    }

    /// The saved server greeting (empty until one arrives).
    #[must_use]
    pub fn greeting(&self) -> &str {
        &self.greeting
    }

    /// Records an outgoing command so its completion can drive a
    /// transition. For SELECT/EXAMINE the mailbox argument is unquoted and
    /// decoded into the upcoming mailbox name.
    pub fn note_command(&mut self, command: &[u8], args: &[u8], tag: &str) {
        if command == b"LOGIN" || command == b"AUTHENTICATE" {
            self.auth_tag = Some(tag.to_string());
        } else if command == b"SELECT" || command == b"EXAMINE" {
            self.select_tag = Some(tag.to_string());
            self.upcoming_mailbox = decode_select_argument(args);
        } else if command == b"CLOSE" {
            self.close_tag = Some(tag.to_string());
        }
    }

    /// Applies one server response, updating state per the transition
    /// rules, and returns what the session must do with it.
    pub fn apply(&mut self, response: &Message) -> Disposition {
        let tag = response.tag();
        let code = response.code();

        // BYE may arrive as part of a LOGOUT sequence or before the server
        // closes the connection after an error. Either way the connection
        // close that follows does the real work.
        if code == Some(b"BYE") {
            tracing::debug!(response = %response, "received BYE");
            return Disposition::Bye;
        }

        match &self.state {
            SessionState::Disconnected => {
                return match code {
                    Some(b"OK") => {
                        self.greeting = response.text_from(1);
                        self.state = SessionState::NotAuthenticated;
                        Disposition::Greeting
                    }
                    Some(b"PREAUTH") => {
                        self.greeting = response.text_from(1);
                        self.state = SessionState::Authenticated;
                        Disposition::Greeting
                    }
                    _ => Disposition::Reject,
                };
            }
            SessionState::NotAuthenticated => {
                if code == Some(b"OK") && tag_matches(tag, self.auth_tag.as_deref()) {
                    self.state = SessionState::Authenticated;
                }
            }
            SessionState::Authenticated => {
                if code == Some(b"OK") && tag_matches(tag, self.select_tag.as_deref()) {
                    self.state = SessionState::Selected {
                        mailbox: self.upcoming_mailbox.clone(),
                    };
                }
            }
            SessionState::Selected { .. } => {
                let is_ok = code == Some(b"OK");
                if (is_ok && tag_matches(tag, self.close_tag.as_deref()))
                    || (!is_ok && tag_matches(tag, self.select_tag.as_deref()))
                {
                    self.state = SessionState::Authenticated;
                } else if is_ok && tag_matches(tag, self.select_tag.as_deref()) {
                    // Re-select while a mailbox is open.
                    self.state = SessionState::Selected {
                        mailbox: self.upcoming_mailbox.clone(),
                    };
                }
            }
        }

        if tag_matches(tag, self.auth_tag.as_deref()) {
            self.auth_tag = None;
        }
        if tag_matches(tag, self.select_tag.as_deref()) {
            self.select_tag = None;
        }
        if tag_matches(tag, self.close_tag.as_deref()) {
            self.close_tag = None;
        }

        Disposition::Forward
    }

    /// Forces the state, used by the session on disconnect.
    pub fn set_state(&mut self, state: SessionState) {
        self.state = state;
    }
}

fn tag_matches(tag: Option<&[u8]>, tracked: Option<&str>) -> bool {
    match (tag, tracked) {
        (Some(tag), Some(tracked)) => tag == tracked.as_bytes(),
        _ => false,
    }
}

/// Extracts the mailbox name from a SELECT/EXAMINE argument string: strips
/// surrounding quotes and decodes modified UTF-7.
fn decode_select_argument(args: &[u8]) -> String {
    let name = if args.first() == Some(&b'"') {
        let inner = &args[1..];
        match inner.iter().position(|&b| b == b'"') {
            Some(end) => &inner[..end],
            None => inner,
        }
    } else {
        match args.iter().position(|&b| b == b' ') {
            Some(end) => &args[..end],
            None => args,
        }
    };
    codec::decode_mailbox_name(&String::from_utf8_lossy(name))
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
    fn test_ok_greeting() {
        let mut machine = StateMachine::new();
        let disposition = machine.apply(&response(&["*", "OK", "IMAP4rev1", "Service", "Ready"]));
        assert_eq!(disposition, Disposition::Greeting);
        assert_eq!(machine.state(), &SessionState::NotAuthenticated);
        assert_eq!(machine.greeting(), "OK IMAP4rev1 Service Ready");
    }

    #[test]
    fn test_preauth_greeting() {
        let mut machine = StateMachine::new();
        let disposition = machine.apply(&response(&["*", "PREAUTH", "ready"]));
        assert_eq!(disposition, Disposition::Greeting);
        assert_eq!(machine.state(), &SessionState::Authenticated);
        assert_eq!(machine.greeting(), "PREAUTH ready");
    }

    #[test]
    fn test_rejecting_greeting_closes_transport() {
        let mut machine = StateMachine::new();
        let disposition = machine.apply(&response(&["*", "NO", "try", "later"]));
        assert_eq!(disposition, Disposition::Reject);
        assert_eq!(machine.state(), &SessionState::Disconnected);
    }

    #[test]
    fn test_login_completion() {
        let mut machine = StateMachine::new();
        machine.apply(&response(&["*", "OK", "ready"]));
        machine.note_command(b"LOGIN", b"\"user\" \"pass\"", "A000001");

        // Unrelated tagged response does not transition.
        let disposition = machine.apply(&response(&["A000009", "OK", "NOOP", "completed"]));
        assert_eq!(disposition, Disposition::Forward);
        assert_eq!(machine.state(), &SessionState::NotAuthenticated);

        let disposition = machine.apply(&response(&["A000001", "OK", "LOGIN", "completed"]));
        assert_eq!(disposition, Disposition::Forward);
        assert_eq!(machine.state(), &SessionState::Authenticated);

        // The tracked tag is cleared; a replayed completion changes nothing.
        machine.apply(&response(&["A000001", "OK", "again"]));
        assert_eq!(machine.state(), &SessionState::Authenticated);
    }

    #[test]
    fn test_failed_login_stays_not_authenticated() {
        let mut machine = StateMachine::new();
        machine.apply(&response(&["*", "OK", "ready"]));
        machine.note_command(b"LOGIN", b"\"user\" \"pass\"", "A000001");
        machine.apply(&response(&["A000001", "NO", "LOGIN", "failed"]));
        assert_eq!(machine.state(), &SessionState::NotAuthenticated);
    }

    #[test]
    fn test_select_and_close() {
        let mut machine = StateMachine::new();
        machine.apply(&response(&["*", "PREAUTH", "ready"]));

        machine.note_command(b"SELECT", b"\"INBOX\"", "A000001");
        machine.apply(&response(&["A000001", "OK", "SELECT", "completed"]));
        assert_eq!(
            machine.state(),
            &SessionState::Selected {
                mailbox: "INBOX".to_string()
            }
        );

        machine.note_command(b"CLOSE", b"", "A000002");
        machine.apply(&response(&["A000002", "OK", "CLOSE", "completed"]));
        assert_eq!(machine.state(), &SessionState::Authenticated);
    }

    #[test]
    fn test_reselect_updates_mailbox() {
        let mut machine = StateMachine::new();
        machine.apply(&response(&["*", "PREAUTH", "ready"]));
        machine.note_command(b"SELECT", b"\"INBOX\"", "A000001");
        machine.apply(&response(&["A000001", "OK", "done"]));

        machine.note_command(b"SELECT", b"\"Archive\"", "A000002");
        machine.apply(&response(&["A000002", "OK", "done"]));
        assert_eq!(machine.state().selected_mailbox(), Some("Archive"));
    }

    #[test]
    fn test_failed_select_from_selected_clears_mailbox() {
        let mut machine = StateMachine::new();
        machine.apply(&response(&["*", "PREAUTH", "ready"]));
        machine.note_command(b"SELECT", b"\"INBOX\"", "A000001");
        machine.apply(&response(&["A000001", "OK", "done"]));

        machine.note_command(b"SELECT", b"\"Missing\"", "A000002");
        machine.apply(&response(&["A000002", "NO", "no", "such", "mailbox"]));
        assert_eq!(machine.state(), &SessionState::Authenticated);
        assert_eq!(machine.state().selected_mailbox(), None);
    }

    #[test]
    fn test_select_argument_is_decoded() {
        let mut machine = StateMachine::new();
        machine.apply(&response(&["*", "PREAUTH", "ready"]));
        machine.note_command(b"SELECT", b"\"Entw&APw-rfe\"", "A000001");
        machine.apply(&response(&["A000001", "OK", "done"]));
        assert_eq!(machine.state().selected_mailbox(), Some("Entw\u{fc}rfe"));
    }

    #[test]
    fn test_untagged_bye_is_ignored() {
        let mut machine = StateMachine::new();
        machine.apply(&response(&["*", "PREAUTH", "ready"]));
        let disposition = machine.apply(&response(&["*", "BYE", "shutting", "down"]));
        assert_eq!(disposition, Disposition::Bye);
        assert_eq!(machine.state(), &SessionState::Authenticated);
    }

    #[test]
    fn test_untagged_responses_are_forwarded() {
        let mut machine = StateMachine::new();
        machine.apply(&response(&["*", "PREAUTH", "ready"]));
        let disposition = machine.apply(&response(&["*", "5", "EXISTS"]));
        assert_eq!(disposition, Disposition::Forward);
        assert_eq!(machine.state(), &SessionState::Authenticated);
    }
}
