//! Generation runs
//!
//! At most one run is in flight per worker. A second request while one is
//! pending is refused with `BridgeError::Busy` before anything is written.

use crate::error::BridgeError;
use crate::protocol::{Artifact, Completion, CorrelationId, OutboundMessage, ProgressUpdate};
use crate::registry::{CorrelationRegistry, Responder};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

/// Input of a generation run
#[derive(Debug, Clone, PartialEq)]
pub struct RunRequest {
    /// Serialized graph document
    pub document: String,
    /// Per-run settings; the configured defaults are used when `None`
    pub settings: Option<Value>,
}

impl RunRequest {
    /// Create a request for `document` with the default settings
    pub fn new(document: impl Into<String>) -> Self {
        Self {
            document: document.into(),
            settings: None,
        }
    }

    /// Override the generation settings for this run
    pub fn with_settings(mut self, settings: Value) -> Self {
        self.settings = Some(settings);
        self
    }
}

/// One progress report delivered to the caller
#[derive(Debug, Clone, PartialEq)]
pub struct RunProgress {
    /// Percentage points gained since the previous report, never negative
    pub increment: f64,
    /// Percentage as reported by the worker
    pub percent: Option<f64>,
    /// Description of the current step
    pub step: Option<String>,
}

/// Receives progress for a run.
///
/// Called on the dispatcher task, so implementations should hand the value
/// off (e.g. to a channel) rather than block.
pub trait ProgressSink: Send + 'static {
    fn report(&self, progress: RunProgress);
}

impl<F> ProgressSink for F
where
    F: Fn(RunProgress) + Send + 'static,
{
    fn report(&self, progress: RunProgress) {
        self(progress)
    }
}

/// Result of a finished run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunOutcome {
    pub artifacts: Vec<Artifact>,
    pub warnings: Vec<String>,
    /// The worker stopped early because cancellation was requested
    pub cancelled: bool,
}

impl From<Completion> for RunOutcome {
    fn from(completion: Completion) -> Self {
        Self {
            artifacts: completion.files,
            warnings: completion.warnings,
            cancelled: completion.cancelled,
        }
    }
}

/// Bookkeeping for the run in flight
pub(crate) struct RunState {
    progress: Box<dyn ProgressSink>,
    last_percent: f64,
    cancel_requested: bool,
}

/// Compute the increment for a reported percentage.
///
/// The reported value is clamped to [0, 100] and the high-water mark only
/// rises, so increments are never negative and sum to at most 100.
pub(crate) fn progress_increment(last_percent: f64, reported: f64) -> (f64, f64) {
    let reported = if reported.is_nan() {
        last_percent
    } else {
        reported.clamp(0.0, 100.0)
    };
    let increment = (reported - last_percent).max(0.0);
    (increment, last_percent.max(reported))
}

/// Owner of the single-flight run slot
pub struct RunCoordinator {
    runs: CorrelationRegistry<RunOutcome, RunState>,
}

impl Default for RunCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl RunCoordinator {
    pub fn new() -> Self {
        Self {
            runs: CorrelationRegistry::new("run"),
        }
    }

    /// Whether a run is in flight
    pub fn is_busy(&self) -> bool {
        !self.runs.is_empty()
    }

    /// Token of the run in flight
    pub fn active_id(&self) -> Option<&CorrelationId> {
        self.runs.ids().next()
    }

    /// Whether `id` is the run in flight
    pub fn contains(&self, id: &CorrelationId) -> bool {
        self.runs.contains(id)
    }

    /// Accept a run, returning the request to write.
    ///
    /// Returns `None` after rejecting `responder` with `Busy` when a run is
    /// already in flight.
    pub(crate) fn begin(
        &mut self,
        id: CorrelationId,
        request: RunRequest,
        default_settings: &Value,
        progress: Box<dyn ProgressSink>,
        responder: Responder<RunOutcome>,
    ) -> Option<OutboundMessage> {
        if let Some(active) = self.active_id() {
            debug!("Refusing run {}: run {} is still in flight", id, active);
            let _ = responder.send(Err(BridgeError::Busy));
            return None;
        }

        let state = RunState {
            progress,
            last_percent: 0.0,
            cancel_requested: false,
        };
        if let Err(responder) = self.runs.register(id.clone(), responder, state) {
            let _ = responder.send(Err(BridgeError::Busy));
            return None;
        }

        Some(OutboundMessage::Run {
            correlation_id: id,
            document: request.document,
            settings: request
                .settings
                .unwrap_or_else(|| default_settings.clone()),
        })
    }

    /// Flag the run as cancelled and build the cancel request.
    ///
    /// Returns `None` if `id` is not in flight or was already cancelled.
    /// The run stays pending until the worker's own completion arrives.
    pub(crate) fn request_cancel(&mut self, id: &CorrelationId) -> Option<OutboundMessage> {
        let state = self.runs.meta_mut(id)?;
        if state.cancel_requested {
            return None;
        }
        state.cancel_requested = true;
        info!("Cancellation requested for run {}", id);
        Some(OutboundMessage::Cancel {
            correlation_id: id.clone(),
        })
    }

    /// Apply a progress report; returns `false` if it matched no run
    pub(crate) fn on_progress(&mut self, update: ProgressUpdate) -> bool {
        let Some(state) = self.runs.meta_mut(&update.correlation_id) else {
            debug!(
                "Dropping progress for unknown run {}",
                update.correlation_id
            );
            return false;
        };

        let increment = match update.percent {
            Some(percent) => {
                let (increment, high_water) = progress_increment(state.last_percent, percent);
                state.last_percent = high_water;
                increment
            }
            None => 0.0,
        };

        state.progress.report(RunProgress {
            increment,
            percent: update.percent,
            step: update.step,
        });
        true
    }

    /// Resolve the run a completion refers to; returns `false` if none
    pub(crate) fn on_completion(&mut self, completion: Completion) -> bool {
        let id = completion.correlation_id.clone();
        if !self.runs.contains(&id) {
            warn!("Dropping completion for unknown run {}", id);
            return false;
        }

        let outcome = RunOutcome::from(completion);
        info!(
            "Run {} completed with {} artifact(s){}",
            id,
            outcome.artifacts.len(),
            if outcome.cancelled { " (cancelled)" } else { "" }
        );
        self.runs.resolve(&id, outcome);
        true
    }

    /// Reject the run with token `id`; returns `false` if it is not in flight
    pub(crate) fn reject(&mut self, id: &CorrelationId, error: BridgeError) -> bool {
        self.runs.reject(id, error).is_some()
    }

    /// Reject whatever run is in flight; returns `false` if none
    pub(crate) fn reject_active(&mut self, error: BridgeError) -> bool {
        match self.active_id().cloned() {
            Some(id) => self.reject(&id, error),
            None => false,
        }
    }

    /// Reject the run in flight, if any, with a clone of `error`
    pub(crate) fn abort(&mut self, error: &BridgeError) -> usize {
        self.runs.reject_all(error)
    }
}
