//! Jobs for argument-less commands: NOOP, CLOSE, LOGOUT.

use tokio::sync::oneshot;

use super::{deliver, tagged_outcome};
use crate::job::{Job, JobProgress};
use crate::message::Message;
use crate::session::SessionContext;
use crate::{Error, Result};

macro_rules! bare_command_job {
    ($(#[$doc:meta])* $name:ident, $command:literal) => {
        $(#[$doc])*
        pub struct $name {
            tag: String,
            result: Option<oneshot::Sender<Result<()>>>,
        }

        impl $name {
            /// Creates the job and the receiver its outcome arrives on.
            #[must_use]
            pub fn new() -> (Self, oneshot::Receiver<Result<()>>) {
                let (sender, receiver) = oneshot::channel();
                (
                    Self {
                        tag: String::new(),
                        result: Some(sender),
                    },
                    receiver,
                )
            }
        }

        impl Job for $name {
            fn start(&mut self, session: &mut SessionContext<'_>) -> JobProgress {
                self.tag = session.send_command($command, b"");
                JobProgress::Continue
            }

            fn handle_response(
                &mut self,
                _session: &mut SessionContext<'_>,
                response: Message,
            ) -> JobProgress {
                match tagged_outcome(&response, &self.tag) {
                    Some(outcome) => {
                        deliver(&mut self.result, outcome);
                        JobProgress::Done
                    }
                    None => JobProgress::Continue,
                }
            }

            fn connection_lost(&mut self) {
                deliver(
                    &mut self.result,
                    Err(Error::ConnectionLost(
                        "connection closed before the command completed".to_string(),
                    )),
                );
            }

            fn socket_error(&mut self, error: Error) {
                deliver(&mut self.result, Err(error));
            }
        }
    };
}

bare_command_job!(
    /// Pings the server with NOOP; also flushes pending untagged updates.
    NoopJob,
    b"NOOP"
);

bare_command_job!(
    /// Closes the selected mailbox, expunging deleted messages.
    CloseJob,
    b"CLOSE"
);

bare_command_job!(
    /// Ends the session. The server answers with an untagged BYE (handled
    /// by the session) followed by the tagged completion.
    LogoutJob,
    b"LOGOUT"
);
