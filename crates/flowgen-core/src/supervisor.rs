//! Worker process supervision
//!
//! A worker session is one spawned process plus a dispatcher task. The
//! dispatcher owns the write half of the channel and every registry, so all
//! settlement happens on a single task. Callers talk to it through
//! `SessionCommand`s.
//!
//! The session ends on stdout EOF, process exit, a failed write, handshake
//! timeout, or disposal. Ending rejects everything still pending and moves
//! the state to `Terminated` for good; nothing is respawned.

use crate::chat::{ChatOutcome, ChatRequest};
use crate::config::{timeouts, BridgeConfig, ProbeFormat, WorkerCommandConfig};
use crate::error::{BridgeError, BridgeResult};
use crate::events::{BridgeNotification, WorkerState};
use crate::frame::FrameReader;
use crate::prober::LivenessProber;
use crate::protocol::{CorrelationId, OutboundMessage};
use crate::registry::Responder;
use crate::router::{route_line, Registries, Routed};
use crate::run::{ProgressSink, RunOutcome, RunRequest};
use async_trait::async_trait;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

const READ_CHUNK_BYTES: usize = 8 * 1024;

/// How long to keep reading stdout after the process has exited
const EXIT_DRAIN: Duration = Duration::from_millis(250);

/// Byte streams of a launched worker
pub struct WorkerIo {
    pub stdin: Box<dyn AsyncWrite + Send + Unpin>,
    pub stdout: Box<dyn AsyncRead + Send + Unpin>,
    /// Forwarded to the log, never parsed
    pub stderr: Option<Box<dyn AsyncRead + Send + Unpin>>,
    /// Present when the streams belong to a real process
    pub child: Option<Child>,
}

impl WorkerIo {
    /// Wrap a pair of streams not backed by a process
    pub fn from_streams(
        stdin: impl AsyncWrite + Send + Unpin + 'static,
        stdout: impl AsyncRead + Send + Unpin + 'static,
    ) -> Self {
        Self {
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            stderr: None,
            child: None,
        }
    }

    /// Attach a stderr stream
    pub fn with_stderr(mut self, stderr: impl AsyncRead + Send + Unpin + 'static) -> Self {
        self.stderr = Some(Box::new(stderr));
        self
    }
}

/// Starts worker processes
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    async fn launch(&self, worker: &WorkerCommandConfig) -> BridgeResult<WorkerIo>;
}

/// Launches the worker as a child process with piped stdio
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessLauncher;

/// Build the command for a worker; stdio is piped and the child is killed on drop
pub(crate) fn build_command(worker: &WorkerCommandConfig) -> Command {
    let mut cmd = Command::new(&worker.program);
    cmd.args(&worker.args)
        .envs(&worker.env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if let Some(dir) = &worker.working_dir {
        cmd.current_dir(dir);
    }
    cmd
}

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
    async fn launch(&self, worker: &WorkerCommandConfig) -> BridgeResult<WorkerIo> {
        let mut child = build_command(worker).spawn().map_err(|e| {
            BridgeError::transport(format!("Failed to spawn worker '{}': {}", worker.program, e))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BridgeError::transport("Failed to get worker stdin handle"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BridgeError::transport("Failed to get worker stdout handle"))?;
        let stderr = child.stderr.take();

        info!(
            "Spawned worker '{}' (pid {})",
            worker.program,
            child.id().map_or_else(|| "?".to_string(), |pid| pid.to_string())
        );

        let mut io = WorkerIo::from_streams(stdin, stdout);
        if let Some(stderr) = stderr {
            io = io.with_stderr(stderr);
        }
        io.child = Some(child);
        Ok(io)
    }
}

/// Requests handed to the dispatcher
pub(crate) enum SessionCommand {
    Run {
        id: CorrelationId,
        request: RunRequest,
        progress: Box<dyn ProgressSink>,
        responder: Responder<RunOutcome>,
    },
    Cancel {
        id: CorrelationId,
    },
    Probe {
        responder: Responder<()>,
    },
    Chat {
        id: CorrelationId,
        request: ChatRequest,
        responder: Responder<ChatOutcome>,
    },
}

impl SessionCommand {
    fn reject(self, error: BridgeError) {
        match self {
            Self::Run { responder, .. } => {
                let _ = responder.send(Err(error));
            }
            Self::Chat { responder, .. } => {
                let _ = responder.send(Err(error));
            }
            Self::Probe { responder } => {
                let _ = responder.send(Err(error));
            }
            Self::Cancel { .. } => {}
        }
    }
}

pub(crate) type CommandSender = mpsc::UnboundedSender<SessionCommand>;

/// Publishes lifecycle changes to watchers and subscribers
#[derive(Clone)]
pub(crate) struct Lifecycle {
    pub state: Arc<watch::Sender<WorkerState>>,
    pub notifications: broadcast::Sender<BridgeNotification>,
}

impl Lifecycle {
    pub fn current(&self) -> WorkerState {
        *self.state.borrow()
    }

    /// Move to `next`; returns `false` if already there or terminated
    pub fn set(&self, next: WorkerState) -> bool {
        let changed = self.state.send_if_modified(|current| {
            if *current == next || *current == WorkerState::Terminated {
                return false;
            }
            *current = next;
            true
        });
        if changed {
            debug!("Worker state: {}", next);
            let _ = self
                .notifications
                .send(BridgeNotification::StateChanged(next));
        }
        changed
    }

    /// Move from `from` to `to` atomically; returns `false` if the state was not `from`
    pub fn transition(&self, from: WorkerState, to: WorkerState) -> bool {
        let changed = self.state.send_if_modified(|current| {
            if *current != from {
                return false;
            }
            *current = to;
            true
        });
        if changed {
            debug!("Worker state: {} -> {}", from, to);
            let _ = self.notifications.send(BridgeNotification::StateChanged(to));
        }
        changed
    }

    pub fn notify(&self, notification: BridgeNotification) {
        // No subscribers is fine
        let _ = self.notifications.send(notification);
    }
}

/// Launch a worker and wait for its ready handshake.
///
/// On success the returned sender feeds the session's dispatcher. Every
/// failure leaves the lifecycle in `Terminated`.
pub(crate) async fn start_session(
    config: Arc<BridgeConfig>,
    launcher: &dyn WorkerLauncher,
    lifecycle: Lifecycle,
    shutdown: CancellationToken,
) -> BridgeResult<CommandSender> {
    let io = match launcher.launch(&config.worker).await {
        Ok(io) => io,
        Err(e) => {
            error!("Worker launch failed: {}", e);
            lifecycle.set(WorkerState::Terminated);
            return Err(e);
        }
    };

    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let (ready_tx, ready_rx) = oneshot::channel();

    let pid = io.child.as_ref().and_then(Child::id);
    let span = tracing::info_span!("worker_session", pid = pid.unwrap_or_default());

    let stderr_task = io
        .stderr
        .map(|stderr| spawn_stderr_forwarder(stderr, lifecycle.clone()));

    let session = Session {
        frames: FrameReader::with_max_line_bytes(config.max_line_bytes),
        registries: Registries::new(LivenessProber::new(config.probe_timeout())),
        stdin: Some(io.stdin),
        handshake: Some(Handshake {
            responder: ready_tx,
            deadline: Instant::now() + config.handshake_timeout(),
        }),
        lifecycle: lifecycle.clone(),
        config,
        stderr_task,
    };

    lifecycle.set(WorkerState::AwaitingReady);
    tokio::spawn(
        session
            .run(io.stdout, io.child, commands_rx, shutdown)
            .instrument(span),
    );

    match ready_rx.await {
        Ok(Ok(())) => Ok(commands_tx),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(BridgeError::transport(
            "worker session ended before the handshake completed",
        )),
    }
}

/// Forward stderr line by line until EOF. Bytes are never interpreted, so
/// invalid UTF-8 is replaced rather than ending the forwarder.
fn spawn_stderr_forwarder(
    stderr: Box<dyn AsyncRead + Send + Unpin>,
    lifecycle: Lifecycle,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut reader = BufReader::new(stderr);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = decode_stderr_line(&buf);
                    info!(target: "flowgen::worker::stderr", "{}", line);
                    lifecycle.notify(BridgeNotification::Stderr(line));
                }
                Err(e) => {
                    debug!("Stopped reading worker stderr: {}", e);
                    break;
                }
            }
        }
    })
}

/// Strip the line terminator and decode lossily
fn decode_stderr_line(raw: &[u8]) -> String {
    let line = raw.strip_suffix(b"\n").unwrap_or(raw);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    String::from_utf8_lossy(line).into_owned()
}

struct Handshake {
    responder: oneshot::Sender<BridgeResult<()>>,
    deadline: Instant,
}

/// State owned by the dispatcher task
struct Session {
    config: Arc<BridgeConfig>,
    frames: FrameReader,
    registries: Registries,
    stdin: Option<Box<dyn AsyncWrite + Send + Unpin>>,
    handshake: Option<Handshake>,
    lifecycle: Lifecycle,
    stderr_task: Option<JoinHandle<()>>,
}

impl Session {
    async fn run(
        mut self,
        mut stdout: Box<dyn AsyncRead + Send + Unpin>,
        mut child: Option<Child>,
        mut commands: mpsc::UnboundedReceiver<SessionCommand>,
        shutdown: CancellationToken,
    ) {
        let mut buf = vec![0u8; READ_CHUNK_BYTES];

        let reason = loop {
            let deadline = self.next_deadline();

            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Disposing worker session");
                    break BridgeError::transport("worker bridge was disposed");
                }
                command = commands.recv(), if self.handshake.is_none() => {
                    let Some(command) = command else {
                        break BridgeError::transport("worker bridge was dropped");
                    };
                    if let Err(e) = self.handle_command(command).await {
                        break e;
                    }
                }
                read = stdout.read(&mut buf) => {
                    match read {
                        Ok(0) => break BridgeError::transport("worker closed its output stream"),
                        Ok(n) => self.on_bytes(&buf[..n]),
                        Err(e) => {
                            break BridgeError::transport(format!("failed to read worker output: {}", e));
                        }
                    }
                }
                status = wait_child(&mut child) => {
                    self.drain_after_exit(&mut stdout, &mut buf).await;
                    break exit_error(status);
                }
                _ = sleep_until(deadline), if deadline.is_some() => {
                    if let Some(e) = self.on_deadline(Instant::now()) {
                        break e;
                    }
                }
            }
        };

        self.terminate(reason.clone(), child).await;

        // Anything queued after the last select is rejected too
        commands.close();
        while let Ok(command) = commands.try_recv() {
            command.reject(reason.clone());
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        let handshake = self.handshake.as_ref().map(|h| h.deadline);
        match (handshake, self.registries.prober.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn on_deadline(&mut self, now: Instant) -> Option<BridgeError> {
        if self.handshake.as_ref().is_some_and(|h| h.deadline <= now) {
            let millis = self.config.handshake_timeout_ms;
            error!("Worker did not announce readiness within {} ms", millis);
            return Some(BridgeError::HandshakeTimeout { millis });
        }
        self.registries.prober.expire(now);
        None
    }

    fn on_bytes(&mut self, chunk: &[u8]) {
        let frames: Vec<_> = self.frames.feed(chunk).collect();
        for frame in frames {
            match frame {
                Ok(line) => self.on_line(&line),
                Err(e) => warn!(target: "flowgen::worker", "{}", e),
            }
        }
    }

    fn on_line(&mut self, line: &str) {
        match route_line(line, &mut self.registries) {
            Routed::Handshake(message) => self.on_ready(message),
            Routed::RunSettled => {
                self.lifecycle.transition(WorkerState::Busy, WorkerState::Ready);
            }
            Routed::Notify(notification) => self.lifecycle.notify(notification),
            Routed::Handled | Routed::Ignored => {}
        }
    }

    fn on_ready(&mut self, message: Option<String>) {
        let Some(handshake) = self.handshake.take() else {
            debug!("Ignoring repeated ready announcement");
            return;
        };
        info!(
            "Worker ready{}",
            message.map(|m| format!(": {}", m)).unwrap_or_default()
        );
        self.lifecycle.set(WorkerState::Ready);
        let _ = handshake.responder.send(Ok(()));
    }

    async fn handle_command(&mut self, command: SessionCommand) -> BridgeResult<()> {
        match command {
            SessionCommand::Run {
                id,
                request,
                progress,
                responder,
            } => {
                let message = self.registries.run.begin(
                    id.clone(),
                    request,
                    &self.config.settings,
                    progress,
                    responder,
                );
                if let Some(message) = message {
                    info!("Starting run {}", id);
                    self.lifecycle.set(WorkerState::Busy);
                    self.write(&message).await?;
                }
            }
            SessionCommand::Cancel { id } => {
                if let Some(message) = self.registries.run.request_cancel(&id) {
                    self.write(&message).await?;
                }
            }
            SessionCommand::Probe { responder } => {
                let seq = self.registries.prober.enqueue(responder, Instant::now());
                debug!("Sending liveness probe #{}", seq);
                self.write(&OutboundMessage::Ping).await?;
            }
            SessionCommand::Chat {
                id,
                request,
                responder,
            } => {
                if let Some(message) = self.registries.chat.begin(id.clone(), request, responder) {
                    debug!("Sending chat {}", id);
                    self.write(&message).await?;
                }
            }
        }
        Ok(())
    }

    async fn write(&mut self, message: &OutboundMessage) -> BridgeResult<()> {
        let line = message.encode_line(self.probe_format())?;
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| BridgeError::transport("worker input is closed"))?;

        let result = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.flush().await
        }
        .await;

        result.map_err(|e| {
            BridgeError::transport(format!("failed to write to worker: {}", e))
                .with_context(format!("sending {}", message.kind()))
        })
    }

    fn probe_format(&self) -> ProbeFormat {
        self.config.probe_format
    }

    async fn drain_after_exit(
        &mut self,
        stdout: &mut Box<dyn AsyncRead + Send + Unpin>,
        buf: &mut [u8],
    ) {
        let until = Instant::now() + EXIT_DRAIN;
        loop {
            match tokio::time::timeout_at(until, stdout.read(buf)).await {
                Ok(Ok(n)) if n > 0 => self.on_bytes(&buf[..n]),
                _ => break,
            }
        }
    }

    async fn terminate(&mut self, reason: BridgeError, child: Option<Child>) {
        if let Some(handshake) = self.handshake.take() {
            let _ = handshake.responder.send(Err(reason.clone()));
        }

        let rejected = self.registries.abort_all(&reason);
        if rejected > 0 {
            warn!("Rejected {} pending operation(s): {}", rejected, reason);
        }

        self.frames.reset();
        self.stdin.take();

        if let Some(mut child) = child {
            let _ = child.start_kill();
            match tokio::time::timeout(timeouts::kill_grace(), child.wait()).await {
                Ok(Ok(status)) => debug!("Worker exited: {}", status),
                Ok(Err(e)) => warn!("Failed to reap worker: {}", e),
                Err(_) => warn!("Worker did not exit within the kill grace period"),
            }
        }

        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }

        self.lifecycle.set(WorkerState::Terminated);
        info!("Worker session terminated: {}", reason);
    }
}

async fn wait_child(child: &mut Option<Child>) -> std::io::Result<ExitStatus> {
    match child {
        Some(child) => child.wait().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn exit_error(status: std::io::Result<ExitStatus>) -> BridgeError {
    match status {
        Ok(status) => {
            warn!("Worker exited unexpectedly: {}", status);
            BridgeError::transport(format!("worker exited unexpectedly ({})", status))
        }
        Err(e) => BridgeError::transport(format!("failed to wait for worker: {}", e)),
    }
}
