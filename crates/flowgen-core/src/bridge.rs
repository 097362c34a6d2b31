//! Caller-facing bridge to one worker session
//!
//! The worker is launched on the first request, reused until it exits or
//! the bridge is disposed, and never relaunched. Build a new `WorkerBridge`
//! to start over.

use crate::chat::{ChatOutcome, ChatRequest};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::events::{BridgeNotification, WorkerState};
use crate::protocol::CorrelationId;
use crate::run::{ProgressSink, RunOutcome, RunRequest};
use crate::supervisor::{
    start_session, CommandSender, Lifecycle, ProcessLauncher, SessionCommand, WorkerLauncher,
};
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

const NOTIFICATION_CAPACITY: usize = 256;

type Link = Option<BridgeResult<CommandSender>>;

fn session_terminated() -> BridgeError {
    BridgeError::transport("worker session has terminated")
}

fn bridge_disposed() -> BridgeError {
    BridgeError::transport("worker bridge was disposed")
}

/// Bridge to a long-lived code-generation worker
pub struct WorkerBridge {
    config: Arc<BridgeConfig>,
    launcher: Arc<dyn WorkerLauncher>,
    /// Set once the handshake succeeded or failed
    link: Arc<watch::Sender<Link>>,
    lifecycle: Lifecycle,
    shutdown: CancellationToken,
}

impl WorkerBridge {
    /// Create a bridge that spawns the configured worker process
    pub fn new(config: BridgeConfig) -> Self {
        Self::with_launcher(config, Arc::new(ProcessLauncher))
    }

    /// Create a bridge with a custom launcher
    pub fn with_launcher(config: BridgeConfig, launcher: Arc<dyn WorkerLauncher>) -> Self {
        let (state, _) = watch::channel(WorkerState::NotStarted);
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        let (link, _) = watch::channel(None);
        Self {
            config: Arc::new(config),
            launcher,
            link: Arc::new(link),
            lifecycle: Lifecycle {
                state: Arc::new(state),
                notifications,
            },
            shutdown: CancellationToken::new(),
        }
    }

    /// Configuration the bridge was built with
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Current lifecycle state
    pub fn state(&self) -> WorkerState {
        self.lifecycle.current()
    }

    /// Watch lifecycle changes
    pub fn watch_state(&self) -> watch::Receiver<WorkerState> {
        self.lifecycle.state.subscribe()
    }

    /// Subscribe to worker logs, stray errors, stderr and state changes
    pub fn subscribe(&self) -> broadcast::Receiver<BridgeNotification> {
        self.lifecycle.notifications.subscribe()
    }

    /// Start the worker if this is the first request, then wait for the
    /// handshake outcome.
    async fn link(&self) -> BridgeResult<CommandSender> {
        if self
            .lifecycle
            .transition(WorkerState::NotStarted, WorkerState::Starting)
        {
            let config = Arc::clone(&self.config);
            let launcher = Arc::clone(&self.launcher);
            let lifecycle = self.lifecycle.clone();
            let shutdown = self.shutdown.clone();
            let link = Arc::clone(&self.link);

            // Detached so startup completes even if this caller goes away
            tokio::spawn(async move {
                let result = start_session(config, launcher.as_ref(), lifecycle, shutdown).await;
                link.send_replace(Some(result));
            });
        }

        let mut link = self.link.subscribe();
        let ready = link
            .wait_for(Option::is_some)
            .await
            .map_err(|_| session_terminated())?;
        ready
            .as_ref()
            .cloned()
            .unwrap_or_else(|| Err(session_terminated()))
    }

    /// Submit a generation run and wait for its outcome.
    ///
    /// Fails with `Busy` if another run is in flight. Cancelling `cancel`
    /// asks the worker to stop; the call still waits for the worker's own
    /// completion, which then reports `cancelled`.
    #[instrument(skip_all)]
    pub async fn submit_run(
        &self,
        request: RunRequest,
        progress: impl ProgressSink,
        cancel: CancellationToken,
    ) -> BridgeResult<RunOutcome> {
        let link = self.link().await?;
        let id = CorrelationId::generate();
        let (responder, mut outcome) = oneshot::channel();

        link.send(SessionCommand::Run {
            id: id.clone(),
            request,
            progress: Box::new(progress),
            responder,
        })
        .map_err(|_| session_terminated())?;

        let mut cancel_sent = false;
        loop {
            tokio::select! {
                result = &mut outcome => {
                    return result.unwrap_or_else(|_| Err(session_terminated()));
                }
                _ = cancel.cancelled(), if !cancel_sent => {
                    cancel_sent = true;
                    debug!("Caller cancelled run {}", id);
                    let _ = link.send(SessionCommand::Cancel { id: id.clone() });
                }
            }
        }
    }

    /// Check that the worker is responsive
    #[instrument(skip_all)]
    pub async fn probe(&self) -> BridgeResult<()> {
        let link = self.link().await?;
        let (responder, reply) = oneshot::channel();
        link.send(SessionCommand::Probe { responder })
            .map_err(|_| session_terminated())?;
        reply.await.unwrap_or_else(|_| Err(session_terminated()))
    }

    /// Send a natural-language request and wait for the reply
    #[instrument(skip_all)]
    pub async fn submit_chat(&self, request: ChatRequest) -> BridgeResult<ChatOutcome> {
        let link = self.link().await?;
        let (responder, reply) = oneshot::channel();
        link.send(SessionCommand::Chat {
            id: CorrelationId::generate(),
            request,
            responder,
        })
        .map_err(|_| session_terminated())?;
        reply.await.unwrap_or_else(|_| Err(session_terminated()))
    }

    /// Kill the worker and reject everything pending.
    ///
    /// The bridge is unusable afterwards. Returns once the session has
    /// fully terminated.
    #[instrument(skip_all)]
    pub async fn dispose(&self) {
        self.shutdown.cancel();

        if self
            .lifecycle
            .transition(WorkerState::NotStarted, WorkerState::Terminated)
        {
            self.link.send_replace(Some(Err(bridge_disposed())));
            return;
        }

        let mut state = self.lifecycle.state.subscribe();
        let _ = state
            .wait_for(|state| *state == WorkerState::Terminated)
            .await;
    }
}

impl Drop for WorkerBridge {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
