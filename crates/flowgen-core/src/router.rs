//! Inbound message routing
//!
//! Dispatches each parsed line to the run coordinator, the chat tracker or
//! the liveness prober. Lines that fail to parse are logged and skipped;
//! they never end the session.

use crate::chat::ChatTracker;
use crate::error::BridgeError;
use crate::events::BridgeNotification;
use crate::prober::LivenessProber;
use crate::protocol::{parse_line, InboundMessage, InputRequest, LogEntry, LogLevel, WorkerError};
use crate::run::RunCoordinator;
use tracing::{debug, error, info, warn};

/// Longest excerpt of an unparseable line written to the log
const LOG_EXCERPT_CHARS: usize = 200;

/// Pending operations of one worker session
pub(crate) struct Registries {
    pub run: RunCoordinator,
    pub chat: ChatTracker,
    pub prober: LivenessProber,
}

impl Registries {
    pub fn new(prober: LivenessProber) -> Self {
        Self {
            run: RunCoordinator::new(),
            chat: ChatTracker::new(),
            prober,
        }
    }

    /// Reject everything pending with a clone of `error`; returns how many
    pub fn abort_all(&mut self, error: &BridgeError) -> usize {
        self.run.abort(error) + self.chat.abort(error) + self.prober.reject_all(error)
    }
}

/// What the dispatcher should do after a message was routed
#[derive(Debug, PartialEq)]
pub(crate) enum Routed {
    /// The worker announced readiness
    Handshake(Option<String>),
    /// The run in flight was settled
    RunSettled,
    /// Publish to subscribers
    Notify(BridgeNotification),
    /// Delivered to a pending operation
    Handled,
    /// Matched nothing
    Ignored,
}

/// Parse and route one framed line
pub(crate) fn route_line(line: &str, registries: &mut Registries) -> Routed {
    match parse_line(line) {
        Ok(message) => route(message, registries),
        Err(failure) => {
            warn!(
                target: "flowgen::worker",
                "Skipping unparseable line ({}): {}",
                failure,
                excerpt(line)
            );
            Routed::Ignored
        }
    }
}

/// Route one parsed message
pub(crate) fn route(message: InboundMessage, registries: &mut Registries) -> Routed {
    match message {
        InboundMessage::Ready { message } => Routed::Handshake(message),
        InboundMessage::Pong => {
            if registries.prober.on_pong() {
                Routed::Handled
            } else {
                Routed::Ignored
            }
        }
        InboundMessage::Log(entry) => {
            emit_worker_log(&entry);
            Routed::Notify(BridgeNotification::WorkerLog {
                level: entry.level,
                message: entry.message,
                correlation_id: entry.correlation_id,
            })
        }
        InboundMessage::Progress(update) => {
            if registries.run.on_progress(update) {
                Routed::Handled
            } else {
                Routed::Ignored
            }
        }
        InboundMessage::Completion(completion) => {
            if registries.run.on_completion(completion) {
                Routed::RunSettled
            } else {
                Routed::Ignored
            }
        }
        InboundMessage::ChatResponse(response) => {
            if registries.chat.on_response(response) {
                Routed::Handled
            } else {
                Routed::Ignored
            }
        }
        InboundMessage::Error(report) => route_error(report, registries),
        InboundMessage::InputRequest(request) => route_input_request(request, registries),
    }
}

/// Settle the operation a worker error refers to.
///
/// A token naming a pending chat rejects that chat. Otherwise the error is
/// charged to the run in flight, whatever token it carries. With no run in
/// flight it becomes a notification.
fn route_error(report: WorkerError, registries: &mut Registries) -> Routed {
    if let Some(id) = &report.correlation_id {
        if registries.chat.contains(id) {
            let failure = worker_reported(&report);
            registries.chat.reject(id, failure);
            return Routed::Handled;
        }
    }

    if registries.run.is_busy() {
        let failure = worker_reported(&report);
        let settled = match &report.correlation_id {
            Some(id) if registries.run.contains(id) => registries.run.reject(id, failure),
            _ => registries.run.reject_active(failure),
        };
        if settled {
            warn!(target: "flowgen::worker", "Run failed: {}", report.message);
            return Routed::RunSettled;
        }
    }

    error!(target: "flowgen::worker", "Worker error: {}", report.message);
    Routed::Notify(BridgeNotification::WorkerError {
        message: report.message,
        code: report.code,
        details: report.details,
    })
}

/// Human input cannot be supplied over this channel, so whatever asked for
/// it fails with `UnsupportedInteraction`.
fn route_input_request(request: InputRequest, registries: &mut Registries) -> Routed {
    let failure = BridgeError::UnsupportedInteraction {
        question: request.question.clone(),
        fields: request.fields.clone(),
    };

    if registries.chat.contains(&request.correlation_id) {
        registries.chat.reject(&request.correlation_id, failure);
        return Routed::Handled;
    }

    let settled = if registries.run.contains(&request.correlation_id) {
        registries.run.reject(&request.correlation_id, failure)
    } else {
        registries.run.reject_active(failure)
    };
    if settled {
        warn!(
            target: "flowgen::worker",
            "Run rejected: worker asked for input ({})",
            request.question
        );
        return Routed::RunSettled;
    }

    Routed::Notify(BridgeNotification::InputRequested {
        correlation_id: request.correlation_id,
        question: request.question,
    })
}

fn worker_reported(report: &WorkerError) -> BridgeError {
    BridgeError::worker_reported(
        report.message.clone(),
        report.code.clone(),
        report.details.clone(),
    )
}

fn emit_worker_log(entry: &LogEntry) {
    let id = entry
        .correlation_id
        .as_ref()
        .map(|id| id.as_str())
        .unwrap_or("-");
    match entry.level {
        LogLevel::Debug => debug!(target: "flowgen::worker", correlation_id = id, "{}", entry.message),
        LogLevel::Info => info!(target: "flowgen::worker", correlation_id = id, "{}", entry.message),
        LogLevel::Warn => warn!(target: "flowgen::worker", correlation_id = id, "{}", entry.message),
        LogLevel::Error => error!(target: "flowgen::worker", correlation_id = id, "{}", entry.message),
    }
}

fn excerpt(line: &str) -> String {
    if line.chars().count() <= LOG_EXCERPT_CHARS {
        return line.to_string();
    }
    let mut cut: String = line.chars().take(LOG_EXCERPT_CHARS).collect();
    cut.push_str("...");
    cut
}
