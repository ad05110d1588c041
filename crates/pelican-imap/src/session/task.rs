//! The session task: the single owner of all protocol state.
//!
//! One tokio task runs the whole conversation: it connects, drains the
//! write queue, feeds received bytes to the parser, routes parsed
//! responses through the state machine to the current job, dispatches
//! queued jobs FIFO, and arms the inactivity timer. Everything the handle
//! or a job wants done is either a command received over the channel or a
//! synchronous callback running on this task, so no protocol state is
//! ever touched from two places at once.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;

use super::{lock, Security, SessionCommand, SessionConfig, SessionEvent, Shared};
use crate::job::{Job, JobProgress};
use crate::logging::WireLogger;
use crate::message::Message;
use crate::parser::StreamParser;
use crate::state::{Disposition, SessionState, StateMachine};
use crate::stream::{self, ImapStream, TlsVersion};
use crate::tag::TagAllocator;
use crate::Error;

const TRIED_DEFAULT: u8 = 0b001;
const TRIED_TLS13: u8 = 0b010;
const TRIED_TLS12: u8 = 0b100;

struct QueuedJob {
    id: u64,
    job: Box<dyn Job>,
}

enum Wake {
    Command(Option<SessionCommand>),
    Read(io::Result<usize>),
    Timer,
}

/// What a job sees of the session while one of its callbacks runs.
///
/// All methods take effect on the session task the callback is already
/// running on; sends are queued and drained after the callback returns.
pub struct SessionContext<'a> {
    inner: &'a mut SessionInner,
}

impl SessionContext<'_> {
    /// Allocates a tag and queues `TAG SP command [SP args] CRLF` for
    /// sending. Returns the tag.
    pub fn send_command(&mut self, command: &[u8], args: &[u8]) -> String {
        self.inner.send_command(command, args)
    }

    /// Queues raw data (a literal continuation, for example) for sending.
    /// A CRLF is appended.
    pub fn send_data(&mut self, data: &[u8]) {
        self.inner.send_data(data);
    }

    /// Requests a TLS upgrade; it runs once this callback returns. The
    /// outcome arrives via [`Job::encryption_negotiated`].
    pub fn start_tls(&mut self, version: TlsVersion) {
        self.inner.pending_start_tls = Some(version);
    }

    /// Records the authenticated user name on the session.
    pub fn set_user_name(&mut self, name: &str) {
        lock(&self.inner.shared).user_name = name.to_string();
    }

    /// Current protocol state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.inner.machine.state().clone()
    }
}

pub(crate) struct SessionInner {
    config: SessionConfig,
    shared: Arc<Mutex<Shared>>,
    events: broadcast::Sender<SessionEvent>,
    commands: mpsc::UnboundedReceiver<SessionCommand>,

    socket: Option<ImapStream>,
    is_connected: bool,
    encrypted_mode: bool,
    parser: StreamParser,
    machine: StateMachine,
    tags: TagAllocator,
    logger: Option<WireLogger>,

    write_queue: VecDeque<Vec<u8>>,
    queue: VecDeque<QueuedJob>,
    current: Option<QueuedJob>,

    timeout: Option<Duration>,
    deadline: Option<Instant>,

    tried_versions: u8,
    do_fallback: bool,
    pending_tls: Option<TlsVersion>,
    pending_start_tls: Option<TlsVersion>,
}

impl SessionInner {
    pub(crate) fn new(
        config: SessionConfig,
        shared: Arc<Mutex<Shared>>,
        events: broadcast::Sender<SessionEvent>,
        commands: mpsc::UnboundedReceiver<SessionCommand>,
    ) -> Self {
        let timeout = interval_from_secs(config.timeout_secs);
        Self {
            config,
            shared,
            events,
            commands,
            socket: None,
            is_connected: false,
            encrypted_mode: false,
            parser: StreamParser::new(),
            machine: StateMachine::new(),
            tags: TagAllocator::new(),
            logger: WireLogger::from_env(),
            write_queue: VecDeque::new(),
            queue: VecDeque::new(),
            current: None,
            timeout,
            deadline: None,
            tried_versions: 0,
            do_fallback: false,
            pending_tls: None,
            pending_start_tls: None,
        }
    }

    pub(crate) async fn run(mut self) {
        self.start_timer();
        self.reconnect().await;

        let mut read_buf = vec![0u8; 8192];
        loop {
            self.flush_writes().await;
            if let Some(version) = self.pending_start_tls.take() {
                self.handle_start_tls(version).await;
                continue;
            }

            let wake = {
                let commands = &mut self.commands;
                let socket = &mut self.socket;
                let deadline = self.deadline;
                tokio::select! {
                    command = commands.recv() => Wake::Command(command),
                    result = readable(socket, &mut read_buf) => Wake::Read(result),
                    () = expired(deadline) => Wake::Timer,
                }
            };

            match wake {
                Wake::Command(None) => break,
                Wake::Command(Some(command)) => self.handle_command(command).await,
                Wake::Read(Ok(0)) => self.socket_disconnected(),
                Wake::Read(Ok(received)) => {
                    self.restart_timer();
                    self.parser.feed(&read_buf[..received]);
                    self.read_messages().await;
                }
                Wake::Read(Err(error)) => self.socket_error(error.into()).await,
                Wake::Timer => self.socket_timeout(),
            }
        }

        tracing::debug!("session handle dropped, shutting down");
        self.clear_job_queue();
        self.socket = None;
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::AddJob { id, job } => {
                self.queue.push_back(QueuedJob { id, job });
                self.publish_queue_size();
                self.start_next();
            }
            SessionCommand::CancelJob(id) => {
                self.queue.retain(|entry| entry.id != id);
                if self.current.as_ref().is_some_and(|entry| entry.id == id) {
                    // A cancelled current job does not trigger the next one.
                    self.current = None;
                }
                self.publish_queue_size();
            }
            SessionCommand::Close => self.close_socket().await,
            SessionCommand::SetTimeout(secs) => self.set_timeout(secs),
            SessionCommand::StartTls(version) => self.handle_start_tls(version).await,
            SessionCommand::SslErrorResponse(accept) => self.handle_ssl_response(accept).await,
        }
    }

    // === Connection lifecycle ===

    async fn reconnect(&mut self) {
        // Skip if already connected or connecting.
        if self.socket.is_some() {
            return;
        }
        tracing::debug!(host = %self.config.host, port = self.config.port, "connecting");
        let result = match self.config.security {
            Security::ImplicitTls => {
                stream::connect_tls(&self.config.host, self.config.port, self.config.tls_version)
                    .await
            }
            Security::Plain => stream::connect_plain(&self.config.host, self.config.port).await,
        };
        match result {
            Ok(socket) => {
                self.encrypted_mode = socket.is_tls();
                self.socket = Some(socket);
                self.socket_connected();
            }
            Err(error) => {
                tracing::warn!(%error, "connection failed");
                self.socket_disconnected();
            }
        }
    }

    fn socket_connected(&mut self) {
        tracing::debug!("socket connected");
        self.is_connected = true;
        self.start_next();
    }

    fn socket_disconnected(&mut self) {
        tracing::debug!(connected = self.is_connected, "socket disconnected");
        self.stop_timer();

        if self.post_greeting_state() {
            if let Some(logger) = self.logger.as_mut() {
                logger.disconnection();
            }
        }

        if self.machine.state() == &SessionState::Disconnected {
            let _ = self.events.send(SessionEvent::ConnectionFailed);
        } else {
            self.set_state(SessionState::Disconnected);
        }

        self.is_connected = false;
        self.socket = None;
        self.encrypted_mode = false;
        self.clear_job_queue();
    }

    async fn socket_error(&mut self, error: Error) {
        tracing::debug!(%error, "socket error");
        self.stop_timer();

        // Exactly one job learns about the failure: the current one, or
        // the first queued one promoted for the occasion.
        if let Some(mut entry) = self.current.take() {
            entry.job.socket_error(error);
        } else if let Some(mut entry) = self.queue.pop_front() {
            entry.job.socket_error(error);
        }
        self.publish_queue_size();

        if self.is_connected {
            self.close_socket().await;
        }
    }

    fn socket_timeout(&mut self) {
        tracing::warn!("inactivity timeout, aborting connection");
        self.deadline = None;
        self.abort_socket();
    }

    async fn close_socket(&mut self) {
        let Some(mut socket) = self.socket.take() else {
            return;
        };
        let _ = socket.shutdown().await;
        self.socket_disconnected();
    }

    fn abort_socket(&mut self) {
        if self.socket.take().is_some() {
            self.socket_disconnected();
        }
    }

    fn clear_job_queue(&mut self) {
        if let Some(mut entry) = self.current.take() {
            entry.job.connection_lost();
        } else if let Some(mut entry) = self.queue.pop_front() {
            entry.job.connection_lost();
        }
        self.queue.clear();
        self.publish_queue_size();
    }

    // === Writer ===

    fn send_command(&mut self, command: &[u8], args: &[u8]) -> String {
        let tag = self.tags.next();
        let mut payload = Vec::with_capacity(tag.len() + command.len() + args.len() + 2);
        payload.extend_from_slice(tag.as_bytes());
        payload.push(b' ');
        payload.extend_from_slice(command);
        if !args.is_empty() {
            payload.push(b' ');
            payload.extend_from_slice(args);
        }
        self.machine.note_command(command, args, &tag);
        self.send_data(&payload);
        tag
    }

    fn send_data(&mut self, data: &[u8]) {
        self.restart_timer();
        if self.post_greeting_state() {
            if let Some(logger) = self.logger.as_mut() {
                logger.data_sent(data);
            }
        }
        let mut framed = data.to_vec();
        framed.extend_from_slice(b"\r\n");
        self.write_queue.push_back(framed);
    }

    async fn flush_writes(&mut self) {
        while let Some(chunk) = self.write_queue.pop_front() {
            let result = match self.socket.as_mut() {
                Some(socket) => socket.write_all(&chunk).await,
                None => {
                    self.write_queue.clear();
                    return;
                }
            };
            if let Err(error) = result {
                self.write_queue.clear();
                self.socket_error(error.into()).await;
                return;
            }
            self.restart_timer();
        }
    }

    // === Reader ===

    async fn read_messages(&mut self) {
        loop {
            if self.socket.is_none() {
                return;
            }
            match self.parser.next_message() {
                Ok(Some(message)) => self.response_received(message).await,
                Ok(None) => return,
                Err(error) => {
                    tracing::warn!(%error, "inconsistent stream, aborting connection");
                    self.abort_socket();
                    return;
                }
            }
        }
    }

    async fn response_received(&mut self, message: Message) {
        if self.post_greeting_state() {
            if let Some(logger) = self.logger.as_mut() {
                logger.data_received(message.to_string().as_bytes());
            }
        }

        let old = self.machine.state().clone();
        let disposition = self.machine.apply(&message);
        let new = self.machine.state().clone();
        if new != old {
            self.publish_state(new, old);
        }
        lock(&self.shared).greeting = self.machine.greeting().to_string();

        match disposition {
            Disposition::Greeting => self.stop_timer(),
            Disposition::Reject => {
                self.stop_timer();
                self.close_socket().await;
            }
            Disposition::Bye => {}
            Disposition::Forward => {
                if let Some(mut entry) = self.current.take() {
                    self.restart_timer();
                    let progress = entry
                        .job
                        .handle_response(&mut SessionContext { inner: self }, message);
                    match progress {
                        JobProgress::Continue => self.current = Some(entry),
                        JobProgress::Done => {
                            drop(entry);
                            self.job_done();
                        }
                    }
                } else {
                    tracing::warn!(
                        response = %message,
                        "response received with no job to handle it"
                    );
                }
            }
        }
    }

    // === Job dispatch ===

    fn start_next(&mut self) {
        if self.current.is_some() || !self.is_connected {
            return;
        }
        let Some(mut entry) = self.queue.pop_front() else {
            return;
        };
        self.restart_timer();
        let progress = entry.job.start(&mut SessionContext { inner: self });
        match progress {
            JobProgress::Continue => self.current = Some(entry),
            JobProgress::Done => {
                drop(entry);
                self.job_done();
            }
        }
    }

    fn job_done(&mut self) {
        self.stop_timer();
        self.publish_queue_size();
        self.start_next();
    }

    // === Inactivity timer ===

    fn set_timeout(&mut self, secs: i64) {
        let active = self.deadline.is_some();
        self.timeout = interval_from_secs(secs);
        if active {
            self.restart_timer();
        }
    }

    fn start_timer(&mut self) {
        if let Some(interval) = self.timeout {
            self.deadline = Some(Instant::now() + interval);
        }
    }

    fn stop_timer(&mut self) {
        self.deadline = None;
    }

    fn restart_timer(&mut self) {
        self.stop_timer();
        self.start_timer();
    }

    // === TLS negotiation ===

    async fn handle_start_tls(&mut self, requested: TlsVersion) {
        if self.encrypted_mode {
            tracing::warn!("TLS negotiation requested on an already encrypted connection");
            return;
        }
        if requested == TlsVersion::Any {
            self.do_fallback = true;
        }
        loop {
            let rung = if requested == TlsVersion::Any {
                match self.next_fallback_rung() {
                    Some(rung) => rung,
                    None => {
                        // One ladder per session: after exhaustion, a
                        // single default-set attempt without fallback.
                        self.do_fallback = false;
                        TlsVersion::Any
                    }
                }
            } else {
                self.do_fallback = false;
                requested
            };

            match self.try_handshake(rung, false).await {
                Ok(()) => return,
                Err(error) => {
                    if self.do_fallback {
                        tracing::debug!(%error, version = %rung, "handshake failed, falling back");
                        if !self.reconnect_plain().await {
                            self.emit_negotiation(false, None);
                            return;
                        }
                        continue;
                    }
                    tracing::debug!(%error, version = %rung, "TLS handshake failed");
                    self.pending_tls = Some(rung);
                    let _ = self
                        .events
                        .send(SessionEvent::TlsErrors(vec![error.to_string()]));
                    return;
                }
            }
        }
    }

    fn next_fallback_rung(&mut self) -> Option<TlsVersion> {
        if self.tried_versions & TRIED_DEFAULT == 0 {
            self.tried_versions |= TRIED_DEFAULT;
            Some(TlsVersion::Any)
        } else if self.tried_versions & TRIED_TLS13 == 0 {
            self.tried_versions |= TRIED_TLS13;
            Some(TlsVersion::Tls13)
        } else if self.tried_versions & TRIED_TLS12 == 0 {
            self.tried_versions |= TRIED_TLS12;
            // Last rung; a failure here is reported instead of retried.
            self.do_fallback = false;
            Some(TlsVersion::Tls12)
        } else {
            None
        }
    }

    async fn try_handshake(&mut self, version: TlsVersion, insecure: bool) -> crate::Result<()> {
        let Some(socket) = self.socket.take() else {
            return Err(Error::InvalidState(
                "no connection for TLS negotiation".to_string(),
            ));
        };
        if socket.is_tls() {
            self.socket = Some(socket);
            return Err(Error::InvalidState(
                "stream is already encrypted".to_string(),
            ));
        }

        let upgraded = socket
            .upgrade_to_tls(&self.config.host, version, insecure)
            .await?;
        if upgraded.negotiated_cipher().is_none() {
            return Err(Error::InvalidState(
                "TLS handshake produced no usable cipher".to_string(),
            ));
        }

        let negotiated = upgraded.tls_version();
        self.socket = Some(upgraded);
        self.encrypted_mode = true;
        self.do_fallback = false;
        tracing::debug!(version = ?negotiated, "TLS negotiation done");
        self.emit_negotiation(true, negotiated);
        Ok(())
    }

    async fn handle_ssl_response(&mut self, accept: bool) {
        let pending = self.pending_tls.take();
        if accept {
            let Some(rung) = pending else {
                return;
            };
            if self.socket.is_none() && !self.reconnect_plain().await {
                self.emit_negotiation(false, None);
                return;
            }
            if let Err(error) = self.try_handshake(rung, true).await {
                tracing::warn!(%error, "handshake failed even with certificate errors accepted");
                if self.reconnect_plain().await {
                    self.emit_negotiation(false, None);
                }
            }
        } else {
            // Reconnect unencrypted so new commands can be issued.
            if self.reconnect_plain().await {
                self.emit_negotiation(false, None);
            }
        }
    }

    async fn reconnect_plain(&mut self) -> bool {
        self.socket = None;
        self.encrypted_mode = false;
        match stream::connect_plain(&self.config.host, self.config.port).await {
            Ok(socket) => {
                self.socket = Some(socket);
                self.is_connected = true;
                true
            }
            Err(error) => {
                tracing::warn!(%error, "plaintext reconnect failed");
                self.socket_disconnected();
                false
            }
        }
    }

    fn emit_negotiation(&mut self, success: bool, version: Option<TlsVersion>) {
        let _ = self
            .events
            .send(SessionEvent::EncryptionNegotiationResult { success, version });
        if let Some(mut entry) = self.current.take() {
            let progress = entry.job.encryption_negotiated(
                &mut SessionContext { inner: self },
                success,
                version,
            );
            match progress {
                JobProgress::Continue => self.current = Some(entry),
                JobProgress::Done => {
                    drop(entry);
                    self.job_done();
                }
            }
        }
    }

    // === Bookkeeping ===

    fn post_greeting_state(&self) -> bool {
        matches!(
            self.machine.state(),
            SessionState::Authenticated | SessionState::Selected { .. }
        )
    }

    fn set_state(&mut self, new: SessionState) {
        let old = self.machine.state().clone();
        if new == old {
            return;
        }
        self.machine.set_state(new.clone());
        self.publish_state(new, old);
    }

    fn publish_state(&mut self, new: SessionState, old: SessionState) {
        tracing::debug!(%new, %old, "state changed");
        lock(&self.shared).state = new.clone();
        let _ = self.events.send(SessionEvent::StateChanged { new, old });
    }

    fn publish_queue_size(&mut self) {
        let size = self.queue.len() + usize::from(self.current.is_some());
        lock(&self.shared).queue_size = size;
        let _ = self.events.send(SessionEvent::JobQueueSizeChanged(size));
    }
}

const fn interval_from_secs(secs: i64) -> Option<Duration> {
    if secs < 0 {
        None
    } else {
        Some(Duration::from_secs(secs.unsigned_abs()))
    }
}

async fn readable(socket: &mut Option<ImapStream>, buf: &mut [u8]) -> io::Result<usize> {
    match socket.as_mut() {
        Some(stream) => stream.read(buf).await,
        None => std::future::pending().await,
    }
}

async fn expired(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
