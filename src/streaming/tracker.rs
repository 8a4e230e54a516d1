//! Tool invocation lifecycle tracking.

use std::collections::HashMap;

use crate::{Part, ProtocolError, ToolInvocation, ToolState};

/// Correlates tool lifecycle events with the parts of one assistant message.
///
/// Each `callId` maps to exactly one [`Part::ToolInvocation`]; later events update that part
/// instead of appending a duplicate. Methods return `Ok(true)` when `parts` changed,
/// `Ok(false)` for an identical replay, and leave `parts` untouched on error.
#[derive(Debug, Default, Clone)]
pub struct ToolInvocationTracker {
    // call id -> index into the message's parts; parts are append-only so indices stay valid
    calls: HashMap<String, usize>,
}

impl ToolInvocationTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tool calls seen so far
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    /// True if no tool call was seen
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Current state of `call_id`, if known
    pub fn state_of(&self, parts: &[Part], call_id: &str) -> Option<ToolState> {
        self.calls
            .get(call_id)
            .and_then(|&index| parts.get(index))
            .and_then(Part::as_tool_invocation)
            .map(|invocation| invocation.state)
    }

    /// Handle `tool-input-start`: open the call in `input-streaming`.
    pub fn input_start(
        &mut self,
        parts: &mut Vec<Part>,
        call_id: &str,
        tool_name: &str,
    ) -> Result<bool, ProtocolError> {
        let Some(invocation) = self.lookup(parts, call_id) else {
            self.open(parts, call_id, tool_name, ToolState::InputStreaming, None);
            return Ok(true);
        };

        check_tool_name(invocation, tool_name)?;
        match invocation.state {
            ToolState::InputStreaming => Ok(false),
            from => Err(ProtocolError::InvalidTransition {
                call_id: call_id.to_string(),
                from,
                to: ToolState::InputStreaming,
            }),
        }
    }

    /// Handle `tool-input-available`.
    ///
    /// Opens the call if absent, upgrades it from `input-streaming`, and tolerates an
    /// identical replay.
    pub fn input_available(
        &mut self,
        parts: &mut Vec<Part>,
        call_id: &str,
        tool_name: &str,
        input: &serde_json::Value,
    ) -> Result<bool, ProtocolError> {
        let Some(invocation) = self.lookup_mut(parts, call_id) else {
            self.open(
                parts,
                call_id,
                tool_name,
                ToolState::InputAvailable,
                Some(input.clone()),
            );
            return Ok(true);
        };

        check_tool_name(invocation, tool_name)?;
        match invocation.state {
            ToolState::InputStreaming => {
                invocation.state = ToolState::InputAvailable;
                invocation.input = Some(input.clone());
                Ok(true)
            }
            ToolState::InputAvailable if invocation.input.as_ref() == Some(input) => Ok(false),
            ToolState::InputAvailable => Err(ProtocolError::ConflictingReplay {
                call_id: call_id.to_string(),
                state: ToolState::InputAvailable,
            }),
            ToolState::OutputAvailable => Err(ProtocolError::InvalidTransition {
                call_id: call_id.to_string(),
                from: ToolState::OutputAvailable,
                to: ToolState::InputAvailable,
            }),
        }
    }

    /// Handle `tool-output-available`; the call must already be `input-available`.
    pub fn output_available(
        &mut self,
        parts: &mut [Part],
        call_id: &str,
        output: &serde_json::Value,
    ) -> Result<bool, ProtocolError> {
        let invocation = self.lookup_mut(parts, call_id).ok_or_else(|| {
            ProtocolError::UnknownToolCall {
                call_id: call_id.to_string(),
            }
        })?;

        match invocation.state {
            ToolState::InputStreaming => Err(ProtocolError::InvalidTransition {
                call_id: call_id.to_string(),
                from: ToolState::InputStreaming,
                to: ToolState::OutputAvailable,
            }),
            ToolState::InputAvailable => {
                invocation.state = ToolState::OutputAvailable;
                invocation.output = Some(output.clone());
                Ok(true)
            }
            ToolState::OutputAvailable if invocation.output.as_ref() == Some(output) => Ok(false),
            ToolState::OutputAvailable => Err(ProtocolError::ConflictingReplay {
                call_id: call_id.to_string(),
                state: ToolState::OutputAvailable,
            }),
        }
    }

    fn open(
        &mut self,
        parts: &mut Vec<Part>,
        call_id: &str,
        tool_name: &str,
        state: ToolState,
        input: Option<serde_json::Value>,
    ) {
        self.calls.insert(call_id.to_string(), parts.len());
        parts.push(Part::ToolInvocation(ToolInvocation {
            tool_name: tool_name.to_string(),
            call_id: call_id.to_string(),
            state,
            input,
            output: None,
        }));
    }

    fn lookup<'a>(&self, parts: &'a [Part], call_id: &str) -> Option<&'a ToolInvocation> {
        let index = *self.calls.get(call_id)?;
        parts.get(index).and_then(Part::as_tool_invocation)
    }

    fn lookup_mut<'a>(
        &self,
        parts: &'a mut [Part],
        call_id: &str,
    ) -> Option<&'a mut ToolInvocation> {
        let index = *self.calls.get(call_id)?;
        match parts.get_mut(index) {
            Some(Part::ToolInvocation(invocation)) => Some(invocation),
            _ => None,
        }
    }
}

fn check_tool_name(invocation: &ToolInvocation, tool_name: &str) -> Result<(), ProtocolError> {
    if invocation.tool_name == tool_name {
        return Ok(());
    }
    Err(ProtocolError::ToolNameMismatch {
        call_id: invocation.call_id.clone(),
        expected: invocation.tool_name.clone(),
        found: tool_name.to_string(),
    })
}
