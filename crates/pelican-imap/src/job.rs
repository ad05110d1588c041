//! The job contract between the session and command implementations.
//!
//! A job owns the client side of one command exchange: it formats and
//! sends the command when started, consumes the responses routed to it,
//! and reports completion by returning [`JobProgress::Done`]. The session
//! runs at most one job at a time and guarantees that exactly one of
//! completion, [`Job::socket_error`], or [`Job::connection_lost`] happens
//! per job.

use crate::message::Message;
use crate::session::SessionContext;
use crate::stream::TlsVersion;
use crate::Error;

/// Whether a job wants to keep receiving responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobProgress {
    /// The job is still waiting for its completion.
    Continue,
    /// The job is finished; the session dispatches the next one.
    Done,
}

/// A queued unit of protocol work.
///
/// Implementations are plain state machines: all callbacks run on the
/// session task, so no synchronization is needed inside a job. Deliver
/// results to the outside through a channel captured at construction.
pub trait Job: Send + 'static {
    /// Called when the job becomes current. Typically sends a command via
    /// [`SessionContext::send_command`]. Returning [`JobProgress::Done`]
    /// completes the job without waiting for any response.
    fn start(&mut self, session: &mut SessionContext<'_>) -> JobProgress;

    /// Called for every response routed to this job, in wire order.
    fn handle_response(
        &mut self,
        session: &mut SessionContext<'_>,
        response: Message,
    ) -> JobProgress;

    /// Called when the connection closed in an orderly fashion while this
    /// job was pending. The job is dropped afterwards.
    fn connection_lost(&mut self) {}

    /// Called when the transport failed while this job was pending. The
    /// job is dropped afterwards.
    fn socket_error(&mut self, error: Error) {
        let _ = error;
    }

    /// Called on the current job when a TLS negotiation it requested via
    /// [`SessionContext::start_tls`] finished.
    fn encryption_negotiated(
        &mut self,
        session: &mut SessionContext<'_>,
        success: bool,
        version: Option<TlsVersion>,
    ) -> JobProgress {
        let _ = (session, success, version);
        JobProgress::Continue
    }
}
