//! Streaming response reducer.

use std::ops::ControlFlow;
use std::sync::Arc;

use futures_util::stream::{Abortable, Stream, StreamExt};

use super::tracker::ToolInvocationTracker;
use super::types::{Applied, ChunkEvent, Completion};
use crate::{
    Message, MessageId, MessageRole, Outcome, Part, ProtocolError, StoreError, TranscriptStore,
};

/// Folds chunk events into successive immutable snapshots of one assistant message.
///
/// The message is created on the first event. Every change clones the current snapshot,
/// applies the event to the copy, and swaps the copy in, so readers holding an older
/// `Arc<Message>` keep a complete, consistent version.
#[derive(Debug)]
pub struct StreamReducer {
    id: MessageId,
    current: Option<Arc<Message>>,
    tracker: ToolInvocationTracker,
    finished: bool,
    published: bool,
}

impl StreamReducer {
    /// Create a reducer for the assistant message `id`
    pub fn new(id: MessageId) -> Self {
        Self {
            id,
            current: None,
            tracker: ToolInvocationTracker::new(),
            finished: false,
            published: false,
        }
    }

    /// Identifier of the message being built
    pub fn message_id(&self) -> &MessageId {
        &self.id
    }

    /// Latest snapshot, if any event has arrived
    pub fn snapshot(&self) -> Option<Arc<Message>> {
        self.current.clone()
    }

    /// True once `done` or `error` was applied
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Fold a single event into the in-flight message.
    ///
    /// On error the current snapshot is left exactly as it was.
    pub fn apply(&mut self, event: &ChunkEvent) -> Result<Applied, ProtocolError> {
        if self.finished {
            return Err(ProtocolError::AfterTerminal { kind: event.kind() });
        }

        let created = self.current.is_none();
        let mut next = match &self.current {
            Some(current) => Message::clone(current),
            None => Message::in_flight(self.id.clone(), MessageRole::Assistant),
        };

        let changed = match event {
            ChunkEvent::TextDelta { value } => push_text(&mut next.parts, value),
            ChunkEvent::ToolInputStart { call_id, tool_name } => {
                self.tracker
                    .input_start(&mut next.parts, call_id, tool_name)?
            }
            ChunkEvent::ToolInputAvailable {
                call_id,
                tool_name,
                input,
            } => self
                .tracker
                .input_available(&mut next.parts, call_id, tool_name, input)?,
            ChunkEvent::ToolOutputAvailable { call_id, output } => {
                self.tracker
                    .output_available(&mut next.parts, call_id, output)?
            }
            ChunkEvent::Done => return Ok(self.finish(next, created, Outcome::Completed)),
            ChunkEvent::Error { detail } => {
                let outcome = Outcome::Failed {
                    detail: detail.clone(),
                };
                return Ok(self.finish(next, created, outcome));
            }
        };

        if !changed && !created {
            return Ok(Applied::Unchanged);
        }
        Ok(Applied::Updated(self.swap(next)))
    }

    /// Consume `chunks` to completion, publishing every snapshot into `store`.
    ///
    /// `observe` sees each accepted event after its snapshot was published; returning
    /// `ControlFlow::Break` cancels the stream. The message is always finalized, and the
    /// chunk source is dropped before this returns.
    pub async fn drive<S, F>(
        mut self,
        mut chunks: Abortable<S>,
        store: &mut TranscriptStore,
        mut observe: F,
    ) -> Result<Completion, StoreError>
    where
        S: Stream<Item = ChunkEvent> + Unpin,
        F: FnMut(&ChunkEvent) -> ControlFlow<()>,
    {
        let mut violation = None;

        let outcome = loop {
            let Some(event) = chunks.next().await else {
                break if chunks.is_aborted() {
                    Outcome::Cancelled
                } else {
                    tracing::warn!(
                        message_id = %self.id,
                        "chunk stream ended without a terminal event"
                    );
                    Outcome::Truncated
                };
            };

            match self.apply(&event) {
                Ok(Applied::Updated(snapshot)) => self.publish(store, snapshot)?,
                Ok(Applied::Unchanged) => {
                    tracing::debug!(
                        message_id = %self.id,
                        kind = event.kind(),
                        "ignored identical replay"
                    );
                }
                Ok(Applied::Finished(outcome)) => {
                    let _ = observe(&event);
                    break outcome;
                }
                Err(error) => {
                    tracing::warn!(message_id = %self.id, %error, "rejected chunk event");
                    let detail = error.to_string();
                    violation = Some(error);
                    break Outcome::ProtocolViolation { detail };
                }
            }

            if observe(&event).is_break() {
                break Outcome::Cancelled;
            }
        };
        drop(chunks);

        let message = self.settle(store, outcome.clone())?;
        tracing::info!(
            message_id = %message.id,
            outcome = outcome.as_str(),
            parts = message.parts.len(),
            "assistant message finalized"
        );

        Ok(Completion {
            message,
            outcome,
            violation,
        })
    }

    fn finish(&mut self, next: Message, created: bool, outcome: Outcome) -> Applied {
        self.finished = true;
        if created {
            self.swap(next);
        }
        Applied::Finished(outcome)
    }

    fn swap(&mut self, mut next: Message) -> Arc<Message> {
        next.revision += 1;
        let snapshot = Arc::new(next);
        self.current = Some(Arc::clone(&snapshot));
        snapshot
    }

    fn publish(
        &mut self,
        store: &mut TranscriptStore,
        snapshot: Arc<Message>,
    ) -> Result<(), StoreError> {
        if self.published {
            store.replace_in_flight(snapshot)
        } else {
            store.append(snapshot)?;
            self.published = true;
            Ok(())
        }
    }

    // Make sure the message exists in the store, then freeze it.
    fn settle(
        &mut self,
        store: &mut TranscriptStore,
        outcome: Outcome,
    ) -> Result<Arc<Message>, StoreError> {
        let snapshot = match self.current.clone() {
            Some(snapshot) => snapshot,
            None => self.swap(Message::in_flight(self.id.clone(), MessageRole::Assistant)),
        };
        if !self.published {
            self.publish(store, snapshot)?;
        }
        self.finished = true;
        store.finalize(&self.id, outcome)
    }
}

// Append to the trailing text part, or open a new one after a tool part.
fn push_text(parts: &mut Vec<Part>, value: &str) -> bool {
    if value.is_empty() {
        return false;
    }
    match parts.last_mut() {
        Some(Part::Text { text }) => text.push_str(value),
        _ => parts.push(Part::text(value)),
    }
    true
}
