//! The SELECT/EXAMINE job.

use tokio::sync::oneshot;

use super::{deliver, parse_number, quote_string, tagged_outcome};
use crate::codec;
use crate::job::{Job, JobProgress};
use crate::message::{Message, Part};
use crate::session::SessionContext;
use crate::{Error, Result};

/// Mailbox status collected while a SELECT or EXAMINE runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectInfo {
    /// Number of messages in the mailbox.
    pub exists: u32,
    /// Number of recent messages.
    pub recent: u32,
    /// Flags defined for this mailbox.
    pub flags: Vec<String>,
    /// UIDVALIDITY value, if reported.
    pub uid_validity: Option<u32>,
    /// Predicted next UID, if reported.
    pub uid_next: Option<u32>,
    /// First unseen message sequence number, if reported.
    pub unseen: Option<u32>,
    /// Whether the mailbox was opened read-only.
    pub read_only: bool,
}

/// Opens a mailbox with SELECT, or EXAMINE for a read-only view.
pub struct SelectJob {
    mailbox: String,
    examine: bool,
    tag: String,
    info: SelectInfo,
    result: Option<oneshot::Sender<Result<SelectInfo>>>,
}

impl SelectJob {
    /// Creates a SELECT job for `mailbox` (user-visible Unicode name).
    #[must_use]
    pub fn new(mailbox: impl Into<String>) -> (Self, oneshot::Receiver<Result<SelectInfo>>) {
        Self::build(mailbox.into(), false)
    }

    /// Creates an EXAMINE job for `mailbox`.
    #[must_use]
    pub fn examine(mailbox: impl Into<String>) -> (Self, oneshot::Receiver<Result<SelectInfo>>) {
        Self::build(mailbox.into(), true)
    }

    fn build(mailbox: String, examine: bool) -> (Self, oneshot::Receiver<Result<SelectInfo>>) {
        let (sender, receiver) = oneshot::channel();
        (
            Self {
                mailbox,
                examine,
                tag: String::new(),
                info: SelectInfo::default(),
                result: Some(sender),
            },
            receiver,
        )
    }

    /// Folds one untagged response into the collected status.
    fn collect(&mut self, response: &Message) {
        match response.part_bytes(2) {
            Some(b"EXISTS") => {
                if let Some(count) = response.part_bytes(1).and_then(parse_number) {
                    self.info.exists = count;
                }
            }
            Some(b"RECENT") => {
                if let Some(count) = response.part_bytes(1).and_then(parse_number) {
                    self.info.recent = count;
                }
            }
            _ => {}
        }

        if response.part_bytes(1) == Some(b"FLAGS") {
            if let Some(Part::List(items)) = response.parts.get(2) {
                self.info.flags = items
                    .iter()
                    .map(|item| String::from_utf8_lossy(item).into_owned())
                    .collect();
            }
        }

        if let Some(value) = response.response_code_value(b"UIDVALIDITY").and_then(parse_number) {
            self.info.uid_validity = Some(value);
        }
        if let Some(value) = response.response_code_value(b"UIDNEXT").and_then(parse_number) {
            self.info.uid_next = Some(value);
        }
        if let Some(value) = response.response_code_value(b"UNSEEN").and_then(parse_number) {
            self.info.unseen = Some(value);
        }
    }
}

impl Job for SelectJob {
    fn start(&mut self, session: &mut SessionContext<'_>) -> JobProgress {
        let command: &[u8] = if self.examine { b"EXAMINE" } else { b"SELECT" };
        let args = quote_string(&codec::encode_mailbox_name(&self.mailbox));
        self.tag = session.send_command(command, &args);
        JobProgress::Continue
    }

    fn handle_response(
        &mut self,
        _session: &mut SessionContext<'_>,
        response: Message,
    ) -> JobProgress {
        if let Some(outcome) = tagged_outcome(&response, &self.tag) {
            match outcome {
                Ok(()) => {
                    if response.has_response_code(b"READ-ONLY") {
                        self.info.read_only = true;
                    } else if self.examine && !response.has_response_code(b"READ-WRITE") {
                        self.info.read_only = true;
                    }
                    let info = std::mem::take(&mut self.info);
                    deliver(&mut self.result, Ok(info));
                }
                Err(error) => deliver(&mut self.result, Err(error)),
            }
            return JobProgress::Done;
        }
        if response.is_untagged() {
            self.collect(&response);
        }
        JobProgress::Continue
    }

    fn connection_lost(&mut self) {
        deliver(
            &mut self.result,
            Err(Error::ConnectionLost(
                "connection closed before SELECT completed".to_string(),
            )),
        );
    }

    fn socket_error(&mut self, error: Error) {
        deliver(&mut self.result, Err(error));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn untagged(parts: &[&str], code: &[&str]) -> Message {
        Message {
            parts: parts
                .iter()
                .map(|p| Part::String(p.as_bytes().to_vec()))
                .collect(),
            response_code: code
                .iter()
                .map(|p| Part::String(p.as_bytes().to_vec()))
                .collect(),
        }
    }

    #[test]
    fn test_collect_counts() {
        let (mut job, _rx) = SelectJob::new("INBOX");
        job.collect(&untagged(&["*", "172", "EXISTS"], &[]));
        job.collect(&untagged(&["*", "3", "RECENT"], &[]));
        assert_eq!(job.info.exists, 172);
        assert_eq!(job.info.recent, 3);
    }

    #[test]
    fn test_collect_flags() {
        let (mut job, _rx) = SelectJob::new("INBOX");
        let mut message = untagged(&["*", "FLAGS"], &[]);
        message
            .parts
            .push(Part::List(vec![b"\\Answered".to_vec(), b"\\Seen".to_vec()]));
        job.collect(&message);
        assert_eq!(job.info.flags, vec!["\\Answered", "\\Seen"]);
    }

    #[test]
    fn test_collect_response_codes() {
        let (mut job, _rx) = SelectJob::new("INBOX");
        job.collect(&untagged(
            &["*", "OK", "UIDs", "valid"],
            &["UIDVALIDITY", "857529045"],
        ));
        job.collect(&untagged(&["*", "OK"], &["UIDNEXT", "4392"]));
        job.collect(&untagged(&["*", "OK"], &["UNSEEN", "12"]));
        assert_eq!(job.info.uid_validity, Some(857_529_045));
        assert_eq!(job.info.uid_next, Some(4392));
        assert_eq!(job.info.unseen, Some(12));
    }
}
