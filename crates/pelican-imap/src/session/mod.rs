//! The session: public handle, configuration, and observable events.
//!
//! A [`Session`] owns one logical IMAP connection. All protocol state (the
//! parser buffer, the job queue, tracked tags, the state machine) lives on
//! a single tokio task; the handle funnels every mutation through a
//! command channel to that task, and reads snapshots the task publishes.
//! Dropping the handle tears the task down; jobs still pending at that
//! point are notified of the lost connection.

mod task;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{broadcast, mpsc};

use crate::job::Job;
use crate::state::SessionState;
use crate::stream::TlsVersion;

pub use task::SessionContext;

pub(crate) use task::SessionInner;

/// How the connection is established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Security {
    /// Plaintext TCP (port 143); TLS may be negotiated later via
    /// [`Session::start_tls`].
    #[default]
    Plain,
    /// TLS from the first byte (port 993).
    ImplicitTls,
}

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Server hostname.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Connection security mode.
    pub security: Security,
    /// TLS version selection for implicit TLS and STARTTLS upgrades.
    pub tls_version: TlsVersion,
    /// Inactivity timeout in seconds; negative disables the timer.
    pub timeout_secs: i64,
}

impl SessionConfig {
    /// Creates a configuration with the default plaintext transport and a
    /// 30 second inactivity timeout.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            security: Security::Plain,
            tls_version: TlsVersion::Any,
            timeout_secs: 30,
        }
    }

    /// Sets the security mode.
    #[must_use]
    pub const fn security(mut self, security: Security) -> Self {
        self.security = security;
        self
    }

    /// Sets the inactivity timeout in seconds; negative disables it.
    #[must_use]
    pub const fn timeout_secs(mut self, secs: i64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

/// Events a session publishes to subscribers.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The protocol state changed.
    StateChanged {
        /// State after the transition.
        new: SessionState,
        /// State before the transition.
        old: SessionState,
    },
    /// The number of pending jobs (queued plus current) changed.
    JobQueueSizeChanged(usize),
    /// The connection went away before the session ever left
    /// `Disconnected`.
    ConnectionFailed,
    /// A TLS handshake failed; diagnostics attached. Answer with
    /// [`Session::ssl_error_response`].
    TlsErrors(Vec<String>),
    /// A TLS negotiation concluded.
    EncryptionNegotiationResult {
        /// Whether the connection is now encrypted.
        success: bool,
        /// The negotiated protocol version, when known.
        version: Option<TlsVersion>,
    },
}

/// Commands the handle sends to the session task.
pub(crate) enum SessionCommand {
    AddJob { id: u64, job: Box<dyn Job> },
    CancelJob(u64),
    Close,
    SetTimeout(i64),
    StartTls(TlsVersion),
    SslErrorResponse(bool),
}

/// Snapshot of queryable session state, written only by the session task.
#[derive(Debug, Default)]
pub(crate) struct Shared {
    pub(crate) state: SessionState,
    pub(crate) greeting: String,
    pub(crate) user_name: String,
    pub(crate) queue_size: usize,
    pub(crate) timeout_secs: i64,
}

fn lock(shared: &Mutex<Shared>) -> std::sync::MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle to a queued job, usable to cancel it before it completes.
#[derive(Debug)]
pub struct JobHandle {
    id: u64,
    commands: mpsc::UnboundedSender<SessionCommand>,
}

impl JobHandle {
    /// Removes the job from the queue. Cancelling the currently running
    /// job clears it without dispatching the next one.
    pub fn cancel(self) {
        let _ = self.commands.send(SessionCommand::CancelJob(self.id));
    }
}

/// A single IMAP session over one connection.
///
/// Created with a host and port; the connection attempt starts
/// immediately. Must be constructed inside a tokio runtime.
pub struct Session {
    host: String,
    port: u16,
    commands: mpsc::UnboundedSender<SessionCommand>,
    shared: Arc<Mutex<Shared>>,
    events: broadcast::Sender<SessionEvent>,
    job_ids: AtomicU64,
}

impl Session {
    /// Creates a session connecting in plaintext to `host:port`.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self::with_config(SessionConfig::new(host, port))
    }

    /// Creates a session from a full configuration.
    #[must_use]
    pub fn with_config(config: SessionConfig) -> Self {
        let shared = Arc::new(Mutex::new(Shared {
            timeout_secs: config.timeout_secs,
            ..Shared::default()
        }));
        let (events, _) = broadcast::channel(64);
        let (commands, command_rx) = mpsc::unbounded_channel();

        let host = config.host.clone();
        let port = config.port;
        let inner = SessionInner::new(config, Arc::clone(&shared), events.clone(), command_rx);
        tokio::spawn(inner.run());

        Self {
            host,
            port,
            commands,
            shared,
            events,
            job_ids: AtomicU64::new(0),
        }
    }

    /// Appends a job to the queue. It starts once the connection is up and
    /// every job before it has finished.
    pub fn add_job(&self, job: impl Job) -> JobHandle {
        let id = self.job_ids.fetch_add(1, Ordering::Relaxed) + 1;
        let _ = self.commands.send(SessionCommand::AddJob {
            id,
            job: Box::new(job),
        });
        JobHandle {
            id,
            commands: self.commands.clone(),
        }
    }

    /// Subscribes to session events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Current protocol state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        lock(&self.shared).state.clone()
    }

    /// Number of pending jobs: queued plus the one currently running.
    #[must_use]
    pub fn job_queue_size(&self) -> usize {
        lock(&self.shared).queue_size
    }

    /// The server greeting, once one has arrived.
    #[must_use]
    pub fn server_greeting(&self) -> String {
        lock(&self.shared).greeting.clone()
    }

    /// The authenticated user name, once a login job has recorded it.
    #[must_use]
    pub fn user_name(&self) -> String {
        lock(&self.shared).user_name.clone()
    }

    /// The user-visible name of the selected mailbox, if any.
    #[must_use]
    pub fn selected_mailbox(&self) -> Option<String> {
        lock(&self.shared)
            .state
            .selected_mailbox()
            .map(ToString::to_string)
    }

    /// The configured host name.
    #[must_use]
    pub fn host_name(&self) -> &str {
        &self.host
    }

    /// The configured port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// The inactivity timeout in seconds; negative means disabled.
    #[must_use]
    pub fn timeout(&self) -> i64 {
        lock(&self.shared).timeout_secs
    }

    /// Changes the inactivity timeout. Negative disables the timer.
    pub fn set_timeout(&self, secs: i64) {
        lock(&self.shared).timeout_secs = secs;
        let _ = self.commands.send(SessionCommand::SetTimeout(secs));
    }

    /// Closes the connection. Idempotent; pending jobs are notified of the
    /// lost connection.
    pub fn close(&self) {
        let _ = self.commands.send(SessionCommand::Close);
    }

    /// Starts a TLS upgrade on an established plaintext connection.
    pub fn start_tls(&self, version: TlsVersion) {
        let _ = self.commands.send(SessionCommand::StartTls(version));
    }

    /// Answers a [`SessionEvent::TlsErrors`] report: `true` retries the
    /// handshake accepting the reported certificate, `false` falls back to
    /// a plaintext reconnect.
    pub fn ssl_error_response(&self, accept: bool) {
        let _ = self
            .commands
            .send(SessionCommand::SslErrorResponse(accept));
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("state", &self.state())
            .field("job_queue_size", &self.job_queue_size())
            .finish_non_exhaustive()
    }
}
