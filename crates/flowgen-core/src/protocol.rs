//! Wire protocol between the bridge and the worker
//!
//! One JSON object per line. The `type` field carries the discriminant and
//! field names are camelCase. Inbound discriminants are matched
//! case-insensitively because early worker builds announce `READY` / `PONG`.

use crate::config::ProbeFormat;
use crate::error::BridgeResult;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Opaque token echoed by the worker on every response to a request
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Generate a fresh random token
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Borrow the token text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CorrelationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for CorrelationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

// ============================================================================
// Outbound (bridge → worker)
// ============================================================================

/// Messages written to the worker's stdin
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum OutboundMessage {
    /// Liveness probe; carries no token
    Ping,

    /// Ask the worker to stop the run with this token
    Cancel { correlation_id: CorrelationId },

    /// Start a generation run
    Run {
        correlation_id: CorrelationId,
        /// Serialized graph document
        document: String,
        /// Generation settings
        settings: Value,
    },

    /// Natural-language request
    Chat {
        correlation_id: CorrelationId,
        prompt: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        context: Option<Value>,
    },
}

impl OutboundMessage {
    /// Discriminant as written on the wire
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Cancel { .. } => "cancel",
            Self::Run { .. } => "run",
            Self::Chat { .. } => "chat",
        }
    }

    /// Encode as one newline-terminated line
    pub fn encode_line(&self, probe_format: ProbeFormat) -> BridgeResult<String> {
        if matches!(self, Self::Ping) && probe_format == ProbeFormat::Bare {
            return Ok("PING\n".to_string());
        }
        let json = serde_json::to_string(self)?;
        Ok(format!("{}\n", json))
    }
}

// ============================================================================
// Inbound (worker → bridge)
// ============================================================================

/// Severity of a worker log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    #[serde(alias = "warning")]
    Warn,
    Error,
}

/// Log line emitted by the worker
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    #[serde(default)]
    pub correlation_id: Option<CorrelationId>,
}

/// Progress report for a run
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    pub correlation_id: CorrelationId,
    #[serde(default)]
    pub step: Option<String>,
    /// Overall completion in [0, 100]
    #[serde(default)]
    pub percent: Option<f64>,
}

/// One generated file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub path: String,
    pub content: String,
}

/// Final message of a run
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Completion {
    pub correlation_id: CorrelationId,
    #[serde(default)]
    pub files: Vec<Artifact>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub cancelled: bool,
}

/// Failure reported by the worker
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerError {
    #[serde(default)]
    pub correlation_id: Option<CorrelationId>,
    pub message: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub details: Option<Value>,
}

/// The worker asking for human input
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputRequest {
    pub correlation_id: CorrelationId,
    pub question: String,
    /// Field descriptors, passed through untouched
    #[serde(default)]
    pub fields: Vec<Value>,
}

/// An action the worker wants the host to perform after a chat reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatAction {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

/// Reply to a chat request
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub correlation_id: CorrelationId,
    #[serde(default)]
    pub reply: Vec<String>,
    #[serde(default)]
    pub actions: Vec<ChatAction>,
    #[serde(default)]
    pub follow_ups: Vec<String>,
}

/// Messages read from the worker's stdout
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    /// Handshake: the worker is ready for requests
    Ready {
        #[serde(default)]
        message: Option<String>,
    },
    /// Reply to a liveness probe
    Pong,
    Log(LogEntry),
    Progress(ProgressUpdate),
    Completion(Completion),
    Error(WorkerError),
    InputRequest(InputRequest),
    ChatResponse(ChatResponse),
}

/// Every inbound discriminant this protocol version understands
pub const INBOUND_KINDS: &[&str] = &[
    "ready",
    "pong",
    "log",
    "progress",
    "completion",
    "error",
    "input_request",
    "chat_response",
];

impl InboundMessage {
    /// Discriminant as written on the wire
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ready { .. } => "ready",
            Self::Pong => "pong",
            Self::Log(_) => "log",
            Self::Progress(_) => "progress",
            Self::Completion(_) => "completion",
            Self::Error(_) => "error",
            Self::InputRequest(_) => "input_request",
            Self::ChatResponse(_) => "chat_response",
        }
    }
}

/// Why a line did not become an `InboundMessage`
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseFailure {
    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    #[error("message is not a JSON object")]
    NotAnObject,

    #[error("message has no \"type\" discriminant")]
    MissingDiscriminant,

    #[error("unrecognized message type \"{0}\"")]
    UnknownKind(String),

    #[error("invalid \"{kind}\" payload: {reason}")]
    InvalidPayload { kind: String, reason: String },
}

/// Parse one framed line
pub fn parse_line(line: &str) -> Result<InboundMessage, ParseFailure> {
    let value: Value =
        serde_json::from_str(line).map_err(|e| ParseFailure::InvalidJson(e.to_string()))?;

    let Value::Object(mut object) = value else {
        return Err(ParseFailure::NotAnObject);
    };

    let kind = object
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ParseFailure::MissingDiscriminant)?
        .to_ascii_lowercase();

    if !INBOUND_KINDS.contains(&kind.as_str()) {
        return Err(ParseFailure::UnknownKind(kind));
    }

    object.insert("type".to_string(), Value::String(kind.clone()));
    serde_json::from_value(Value::Object(object)).map_err(|e| ParseFailure::InvalidPayload {
        kind,
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outbound_run_shape() {
        let message = OutboundMessage::Run {
            correlation_id: CorrelationId::from("run-1"),
            document: "nodes: []".to_string(),
            settings: json!({"target": "react"}),
        };
        let line = message.encode_line(ProbeFormat::Json).unwrap();
        assert!(line.ends_with('\n'));

        let value: Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "run",
                "correlationId": "run-1",
                "document": "nodes: []",
                "settings": {"target": "react"}
            })
        );
    }

    #[test]
    fn test_outbound_chat_omits_missing_context() {
        let message = OutboundMessage::Chat {
            correlation_id: CorrelationId::from("c-9"),
            prompt: "add a login form".to_string(),
            context: None,
        };
        let value: Value = serde_json::to_value(&message).unwrap();
        assert_eq!(
            value,
            json!({"type": "chat", "correlationId": "c-9", "prompt": "add a login form"})
        );
    }

    #[test]
    fn test_ping_encodings() {
        assert_eq!(
            OutboundMessage::Ping.encode_line(ProbeFormat::Json).unwrap(),
            "{\"type\":\"ping\"}\n"
        );
        assert_eq!(
            OutboundMessage::Ping.encode_line(ProbeFormat::Bare).unwrap(),
            "PING\n"
        );
        let cancel = OutboundMessage::Cancel {
            correlation_id: CorrelationId::from("r"),
        };
        assert_eq!(
            cancel.encode_line(ProbeFormat::Bare).unwrap(),
            "{\"type\":\"cancel\",\"correlationId\":\"r\"}\n"
        );
    }

    #[test]
    fn test_parse_completion() {
        let message = parse_line(
            r#"{"type":"completion","correlationId":"abc","files":[{"path":"src/App.tsx","content":"export {}"}],"cancelled":true}"#,
        )
        .unwrap();

        match message {
            InboundMessage::Completion(completion) => {
                assert_eq!(completion.correlation_id.as_str(), "abc");
                assert_eq!(completion.files.len(), 1);
                assert_eq!(completion.files[0].path, "src/App.tsx");
                assert!(completion.warnings.is_empty());
                assert!(completion.cancelled);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_parse_uppercase_handshake() {
        let message = parse_line(r#"{"type":"READY","message":"Engine stub initialised"}"#).unwrap();
        assert_eq!(
            message,
            InboundMessage::Ready {
                message: Some("Engine stub initialised".to_string())
            }
        );
        assert_eq!(parse_line(r#"{"type":"PONG"}"#).unwrap(), InboundMessage::Pong);
    }

    #[test]
    fn test_parse_error_without_token() {
        let message =
            parse_line(r#"{"type":"ERROR","message":"Stub engine received an unsupported command."}"#)
                .unwrap();
        assert_eq!(message.kind(), "error");
        match message {
            InboundMessage::Error(error) => assert_eq!(error.correlation_id, None),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_parse_chat_response() {
        let message = parse_line(
            r#"{"type":"chat_response","correlationId":"c1","reply":["Added a node."],"actions":[{"type":"select_node","nodeId":"n4"}],"followUps":["Wire it to the API?"]}"#,
        )
        .unwrap();
        let InboundMessage::ChatResponse(response) = message else {
            panic!("expected chat response");
        };
        assert_eq!(response.reply, vec!["Added a node."]);
        assert_eq!(response.actions[0].kind, "select_node");
        assert_eq!(response.actions[0].params["nodeId"], "n4");
        assert_eq!(response.follow_ups, vec!["Wire it to the API?"]);
    }

    #[test]
    fn test_parse_log_warning_alias() {
        let message =
            parse_line(r#"{"type":"log","level":"warning","message":"slow node"}"#).unwrap();
        let InboundMessage::Log(entry) = message else {
            panic!("expected log");
        };
        assert_eq!(entry.level, LogLevel::Warn);
    }

    #[test]
    fn test_parse_failures() {
        assert!(matches!(
            parse_line("{not valid json}"),
            Err(ParseFailure::InvalidJson(_))
        ));
        assert_eq!(parse_line("[1,2]"), Err(ParseFailure::NotAnObject));
        assert_eq!(
            parse_line(r#"{"message":"hi"}"#),
            Err(ParseFailure::MissingDiscriminant)
        );
        assert_eq!(
            parse_line(r#"{"type":"telemetry","cpu":3}"#),
            Err(ParseFailure::UnknownKind("telemetry".to_string()))
        );
        assert!(matches!(
            parse_line(r#"{"type":"progress","percent":10}"#),
            Err(ParseFailure::InvalidPayload { kind, .. }) if kind == "progress"
        ));
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let a = CorrelationId::generate();
        let b = CorrelationId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
    }
}
