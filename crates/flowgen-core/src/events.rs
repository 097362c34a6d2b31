//! Lifecycle states and out-of-band notifications

use crate::protocol::{CorrelationId, LogLevel};
use serde_json::Value;
use std::fmt;

/// Lifecycle of the worker process behind a bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// No request has been made yet
    NotStarted,
    /// The process is being spawned
    Starting,
    /// Spawned, waiting for the ready handshake
    AwaitingReady,
    /// Ready for requests, no run in flight
    Ready,
    /// A generation run is in flight
    Busy,
    /// Exited, failed, or disposed; the bridge cannot be reused
    Terminated,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotStarted => "not started",
            Self::Starting => "starting",
            Self::AwaitingReady => "awaiting ready",
            Self::Ready => "ready",
            Self::Busy => "busy",
            Self::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Events that are not the answer to any pending operation
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeNotification {
    /// The worker moved to a new lifecycle state
    StateChanged(WorkerState),
    /// A log entry written by the worker
    WorkerLog {
        level: LogLevel,
        message: String,
        correlation_id: Option<CorrelationId>,
    },
    /// An error the worker reported outside of any pending operation
    WorkerError {
        message: String,
        code: Option<String>,
        details: Option<Value>,
    },
    /// The worker asked for input while nothing could be rejected
    InputRequested {
        correlation_id: CorrelationId,
        question: String,
    },
    /// A line the worker wrote to stderr, verbatim
    Stderr(String),
}
