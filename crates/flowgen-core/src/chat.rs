//! Chat requests
//!
//! Unlike runs, any number of chats may be pending at once.

use crate::error::BridgeError;
use crate::protocol::{ChatAction, ChatResponse, CorrelationId, OutboundMessage};
use crate::registry::{CorrelationRegistry, Responder};
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

/// A natural-language request about the current graph
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub prompt: String,
    /// Extra context, forwarded to the worker untouched
    pub context: Option<Value>,
}

impl ChatRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }
}

/// The worker's answer to a chat request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatOutcome {
    pub reply: Vec<String>,
    pub actions: Vec<ChatAction>,
    pub follow_ups: Vec<String>,
}

impl From<ChatResponse> for ChatOutcome {
    fn from(response: ChatResponse) -> Self {
        Self {
            reply: response.reply,
            actions: response.actions,
            follow_ups: response.follow_ups,
        }
    }
}

/// Pending chat requests keyed by token
pub struct ChatTracker {
    chats: CorrelationRegistry<ChatOutcome>,
}

impl Default for ChatTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatTracker {
    pub fn new() -> Self {
        Self {
            chats: CorrelationRegistry::new("chat"),
        }
    }

    /// Register a chat and build the request to write.
    ///
    /// Returns `None` if the token is already pending; the responder is
    /// rejected in that case.
    pub(crate) fn begin(
        &mut self,
        id: CorrelationId,
        request: ChatRequest,
        responder: Responder<ChatOutcome>,
    ) -> Option<OutboundMessage> {
        if let Err(responder) = self.chats.register(id.clone(), responder, ()) {
            let _ = responder.send(Err(BridgeError::protocol(format!(
                "correlation token {} is already in use",
                id
            ))));
            return None;
        }

        Some(OutboundMessage::Chat {
            correlation_id: id,
            prompt: request.prompt,
            context: request.context,
        })
    }

    /// Resolve the chat a response refers to; returns `false` if none
    pub(crate) fn on_response(&mut self, response: ChatResponse) -> bool {
        let id = response.correlation_id.clone();
        if !self.chats.contains(&id) {
            warn!("Dropping chat response for unknown request {}", id);
            return false;
        }
        self.chats.resolve(&id, ChatOutcome::from(response));
        true
    }

    /// Reject the chat with token `id`; returns `false` if it is not pending
    pub(crate) fn reject(&mut self, id: &CorrelationId, error: BridgeError) -> bool {
        self.chats.reject(id, error).is_some()
    }

    pub fn contains(&self, id: &CorrelationId) -> bool {
        self.chats.contains(id)
    }

    pub fn len(&self) -> usize {
        self.chats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chats.is_empty()
    }

    /// Reject every pending chat with a clone of `error`
    pub(crate) fn abort(&mut self, error: &BridgeError) -> usize {
        self.chats.reject_all(error)
    }
}
