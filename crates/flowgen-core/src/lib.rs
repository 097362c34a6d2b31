//! Flowgen Core Library
//!
//! Bridge between a UI host and the long-lived code-generation worker. The
//! worker speaks newline-delimited JSON over its stdin/stdout; this crate
//! frames and routes that traffic, correlates requests with responses,
//! enforces one generation run at a time, probes liveness, and supervises
//! the worker process.

pub mod bridge;
pub mod chat;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod events;
pub mod frame;
pub mod prober;
pub mod protocol;
pub mod registry;
mod router;
pub mod run;
pub mod supervisor;

// Re-export commonly used types
pub use bridge::WorkerBridge;
pub use chat::{ChatOutcome, ChatRequest};
pub use config::{load_from_file, BridgeConfig, LoggingConfig, ProbeFormat, WorkerCommandConfig};
pub use diagnostics::{check_environment, WorkerDiagnostics};
pub use error::{BridgeError, BridgeResult};
pub use events::{BridgeNotification, WorkerState};
pub use frame::{FrameError, FrameReader};
pub use protocol::{Artifact, ChatAction, CorrelationId, InboundMessage, LogLevel, OutboundMessage};
pub use run::{ProgressSink, RunOutcome, RunProgress, RunRequest};
pub use supervisor::{ProcessLauncher, WorkerIo, WorkerLauncher};
pub use tokio_util::sync::CancellationToken;
