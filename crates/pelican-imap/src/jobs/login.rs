//! The LOGIN job.

use tokio::sync::oneshot;

use super::{deliver, quote_string, tagged_outcome};
use crate::job::{Job, JobProgress};
use crate::message::Message;
use crate::session::SessionContext;
use crate::{Error, Result};

/// Authenticates with LOGIN. On success the session records the user name.
pub struct LoginJob {
    user: String,
    password: String,
    tag: String,
    result: Option<oneshot::Sender<Result<()>>>,
}

impl LoginJob {
    /// Creates the job and the receiver its outcome arrives on.
    #[must_use]
    pub fn new(
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> (Self, oneshot::Receiver<Result<()>>) {
        let (sender, receiver) = oneshot::channel();
        (
            Self {
                user: user.into(),
                password: password.into(),
                tag: String::new(),
                result: Some(sender),
            },
            receiver,
        )
    }
}

impl Job for LoginJob {
    fn start(&mut self, session: &mut SessionContext<'_>) -> JobProgress {
        let mut args = quote_string(&self.user);
        args.push(b' ');
        args.extend_from_slice(&quote_string(&self.password));
        self.tag = session.send_command(b"LOGIN", &args);
        JobProgress::Continue
    }

    fn handle_response(
        &mut self,
        session: &mut SessionContext<'_>,
        response: Message,
    ) -> JobProgress {
        match tagged_outcome(&response, &self.tag) {
            Some(outcome) => {
                if outcome.is_ok() {
                    session.set_user_name(&self.user);
                }
                deliver(&mut self.result, outcome);
                JobProgress::Done
            }
            // Servers often push CAPABILITY or other untagged data here.
            None => JobProgress::Continue,
        }
    }

    fn connection_lost(&mut self) {
        deliver(
            &mut self.result,
            Err(Error::ConnectionLost(
                "connection closed before LOGIN completed".to_string(),
            )),
        );
    }

    fn socket_error(&mut self, error: Error) {
        deliver(&mut self.result, Err(error));
    }
}
