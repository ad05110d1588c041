//! # pelican-imap
//!
//! The client-side session core of an IMAP4rev1 (RFC 3501) protocol
//! library: one authenticated conversation with a server over TCP,
//! optionally TLS, with streaming response parsing and single-flight
//! command dispatch.
//!
//! ## What this crate is
//!
//! Three tightly coupled pieces:
//!
//! - **[`StreamParser`]** — an incremental tokenizer that turns the raw
//!   byte stream into structured [`Message`]s, tolerating arbitrary
//!   fragmentation (the stream may cut mid-token, mid-literal, mid-list)
//!   via a rewindable cursor.
//! - **A session state machine** — tagged completions drive the
//!   [`SessionState`] transitions (`Disconnected` → `NotAuthenticated` →
//!   `Authenticated` → `Selected`) and nothing else does.
//! - **[`Session`]** — the job queue and dispatch loop: commands are
//!   serialized one at a time onto the connection, each response is routed
//!   to the job that caused it, and TLS upgrades, timeouts, and
//!   mid-command disconnects flow through the same single-task event loop.
//!
//! Individual commands are [`Job`]s. The [`jobs`] module ships the ones
//! the session itself has opinions about (LOGIN, SELECT, CLOSE, LOGOUT,
//! NOOP); anything else is a small `Job` implementation away.
//!
//! ## Quick start
//!
//! ```ignore
//! use pelican_imap::jobs::{LoginJob, SelectJob};
//! use pelican_imap::Session;
//!
//! #[tokio::main]
//! async fn main() -> pelican_imap::Result<()> {
//!     let session = Session::new("imap.example.com", 143);
//!
//!     let (login, logged_in) = LoginJob::new("user@example.com", "password");
//!     session.add_job(login);
//!     logged_in.await.expect("session alive")?;
//!
//!     let (select, selected) = SelectJob::new("INBOX");
//!     session.add_job(select);
//!     let info = selected.await.expect("session alive")?;
//!     println!("{} messages", info.exists);
//!
//!     session.close();
//!     Ok(())
//! }
//! ```
//!
//! ## Concurrency model
//!
//! All mutable session state lives on one tokio task. The [`Session`]
//! handle is cheap and thread-safe: every mutation is a message to that
//! task, queries read a published snapshot, and observable changes arrive
//! as [`SessionEvent`]s on a broadcast channel. Job callbacks run on the
//! session task, one response at a time, in wire order.
//!
//! Setting the `PELICAN_IMAP_LOGFILE` environment variable captures the
//! wire traffic of each session to a numbered file once the session is
//! authenticated (never during the pre-greeting phase).

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod codec;
mod error;
pub mod job;
pub mod jobs;
mod logging;
mod message;
mod parser;
mod session;
mod state;
mod stream;
mod tag;

pub use error::{Error, Result};
pub use job::{Job, JobProgress};
pub use logging::LOGFILE_ENV;
pub use message::{Message, Part};
pub use parser::StreamParser;
pub use session::{
    JobHandle, Security, Session, SessionConfig, SessionContext, SessionEvent,
};
pub use state::SessionState;
pub use stream::{connect_plain, connect_tls, ImapStream, TlsVersion};
pub use tag::TagAllocator;
