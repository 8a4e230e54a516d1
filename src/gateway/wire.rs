//! Request and response bodies for the HTTP gateway.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::{ChatError, Message, MessageId, MessageRole, Outcome, Part, ToolState};

/// Request body for `POST /api/chat`.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    /// Conversation so far, oldest first; the last entry is the new user turn.
    pub messages: Vec<IncomingMessage>,
}

/// One message as sent by the client: plain `content` or structured `parts`.
#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
    /// Client-side id; a fresh one is assigned when absent
    #[serde(default)]
    pub id: Option<String>,
    /// Author role
    pub role: MessageRole,
    /// Plain text content
    #[serde(default)]
    pub content: Option<String>,
    /// Structured parts; take precedence over `content`
    #[serde(default)]
    pub parts: Option<Vec<Part>>,
}

/// Error body returned with HTTP 500.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human-readable error message
    pub error: String,
}

/// Response body for `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayHealthResponse {
    /// Always `healthy` while the server is accepting requests
    pub status: &'static str,
    /// Names of the declared tools
    pub tools: Vec<String>,
}

/// Check the message list and turn it into finalized transcript messages.
///
/// `parts` wins over `content` when both are present. A message with neither, an empty list,
/// a list that does not end with a user turn, repeated ids, or tool invocations that break the
/// lifecycle rules are rejected.
pub fn validate_chat_request(request: &ChatRequest) -> Result<Vec<Message>, ChatError> {
    let Some(last) = request.messages.last() else {
        return Err(ChatError::RequestMalformed(
            "messages must be non-empty".to_string(),
        ));
    };
    if last.role != MessageRole::User {
        return Err(ChatError::RequestMalformed(
            "last message must come from the user".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for (index, id) in request
        .messages
        .iter()
        .enumerate()
        .filter_map(|(index, incoming)| incoming.id.as_deref().map(|id| (index, id)))
    {
        if !seen.insert(id) {
            return Err(ChatError::RequestMalformed(format!(
                "message {index} repeats id `{id}`"
            )));
        }
    }

    request
        .messages
        .iter()
        .enumerate()
        .map(|(index, incoming)| to_message(index, incoming))
        .collect()
}

fn to_message(index: usize, incoming: &IncomingMessage) -> Result<Message, ChatError> {
    let parts = match (&incoming.parts, &incoming.content) {
        (Some(parts), _) if !parts.is_empty() => parts.clone(),
        (_, Some(content)) if !content.trim().is_empty() => vec![Part::text(content.clone())],
        _ => {
            return Err(ChatError::RequestMalformed(format!(
                "message {index} has no content"
            )))
        }
    };

    check_tool_parts(index, incoming.role, &parts)?;

    let id = match &incoming.id {
        Some(id) if id.trim().is_empty() => {
            return Err(ChatError::RequestMalformed(format!(
                "message {index} has a blank id"
            )))
        }
        Some(id) => MessageId::from_string(id.clone()),
        None => MessageId::new(),
    };

    let mut message = Message::in_flight(id, incoming.role);
    message.parts = parts;
    Ok(message.finalized(Outcome::Completed))
}

// One part per call id; input from `input-available` on, output exactly at `output-available`.
fn check_tool_parts(index: usize, role: MessageRole, parts: &[Part]) -> Result<(), ChatError> {
    let malformed =
        |detail: String| ChatError::RequestMalformed(format!("message {index} {detail}"));
    let mut call_ids = HashSet::new();

    for invocation in parts.iter().filter_map(Part::as_tool_invocation) {
        let call_id = invocation.call_id.as_str();
        if role != MessageRole::Assistant {
            return Err(malformed(format!(
                "is from the {role} but carries tool call `{call_id}`"
            )));
        }
        if call_id.trim().is_empty() {
            return Err(malformed("has a tool call with a blank call id".to_string()));
        }
        if !call_ids.insert(call_id) {
            return Err(malformed(format!("repeats tool call `{call_id}`")));
        }

        let state = invocation.state;
        if state >= ToolState::InputAvailable && invocation.input.is_none() {
            return Err(malformed(format!(
                "has tool call `{call_id}` at {state} without input"
            )));
        }
        let wants_output = state == ToolState::OutputAvailable;
        if wants_output != invocation.output.is_some() {
            return Err(malformed(if wants_output {
                format!("has tool call `{call_id}` at {state} without output")
            } else {
                format!("has tool call `{call_id}` with output before output-available")
            }));
        }
    }
    Ok(())
}
