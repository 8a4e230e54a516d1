//! Single-writer transcript store.

use std::sync::Arc;

use tokio::sync::watch;

use crate::{Message, MessageId, MessageStatus, Outcome, StoreError};

/// An immutable, versioned view of the whole transcript.
#[derive(Debug, Clone)]
pub struct TranscriptSnapshot {
    /// Transcript version; increases by one per mutation
    pub version: u64,
    /// Messages in order
    pub messages: Arc<[Arc<Message>]>,
}

impl TranscriptSnapshot {
    /// The in-flight message, if any
    pub fn in_flight(&self) -> Option<&Arc<Message>> {
        self.messages.iter().find(|message| message.is_in_flight())
    }

    /// The last message, if any
    pub fn last(&self) -> Option<&Arc<Message>> {
        self.messages.last()
    }
}

/// Ordered messages of one conversation.
///
/// Only the reducer and the submission action write to a store; readers subscribe and
/// receive [`TranscriptSnapshot`]s. At most one message is in flight at any time, and a
/// finalized message is never removed or modified.
#[derive(Debug)]
pub struct TranscriptStore {
    messages: Vec<Arc<Message>>,
    in_flight: Option<usize>,
    version: u64,
    publisher: watch::Sender<TranscriptSnapshot>,
}

impl TranscriptStore {
    /// Create an empty store
    pub fn new() -> Self {
        let (publisher, _) = watch::channel(TranscriptSnapshot {
            version: 0,
            messages: Arc::from(Vec::new()),
        });
        Self {
            messages: Vec::new(),
            in_flight: None,
            version: 0,
            publisher,
        }
    }

    /// Create a store seeded with finalized history.
    pub fn with_history(history: impl IntoIterator<Item = Message>) -> Result<Self, StoreError> {
        let mut store = Self::new();
        for message in history {
            if message.is_in_flight() {
                return Err(StoreError::invariant(format!(
                    "history message `{}` is still in flight",
                    message.id
                )));
            }
            store.append(Arc::new(message))?;
        }
        Ok(store)
    }

    /// Add `message` at the tail.
    ///
    /// Fails if the id is already present, or if `message` is in flight while another
    /// message is.
    pub fn append(&mut self, message: Arc<Message>) -> Result<(), StoreError> {
        if self.position(&message.id).is_some() {
            return Err(StoreError::invariant(format!(
                "message id `{}` is already in the transcript",
                message.id
            )));
        }
        if message.is_in_flight() {
            if let Some(current) = self.in_flight() {
                return Err(StoreError::invariant(format!(
                    "message `{}` is already in flight",
                    current.id
                )));
            }
            self.in_flight = Some(self.messages.len());
        }

        tracing::debug!(message_id = %message.id, role = %message.role, "message appended");
        self.messages.push(message);
        self.publish();
        Ok(())
    }

    /// Swap the in-flight message for a newer snapshot of itself.
    pub fn replace_in_flight(&mut self, snapshot: Arc<Message>) -> Result<(), StoreError> {
        let index = self
            .in_flight
            .ok_or_else(|| StoreError::invariant("no message is in flight"))?;
        let current = &self.messages[index];

        if current.id != snapshot.id {
            return Err(StoreError::invariant(format!(
                "snapshot `{}` does not match in-flight message `{}`",
                snapshot.id, current.id
            )));
        }
        if snapshot.status != MessageStatus::InFlight {
            return Err(StoreError::invariant(
                "finalize a message through `finalize`, not by replacement",
            ));
        }
        if snapshot.role != current.role {
            return Err(StoreError::invariant(format!(
                "message `{}` cannot change role",
                snapshot.id
            )));
        }
        if snapshot.parts.len() < current.parts.len() {
            return Err(StoreError::invariant(format!(
                "message `{}` cannot drop parts",
                snapshot.id
            )));
        }
        if snapshot.revision <= current.revision {
            return Err(StoreError::invariant(format!(
                "stale snapshot of `{}` (revision {} after {})",
                snapshot.id, snapshot.revision, current.revision
            )));
        }

        self.messages[index] = snapshot;
        self.publish();
        Ok(())
    }

    /// Mark message `id` finalized with `outcome` and return the frozen message.
    pub fn finalize(
        &mut self,
        id: &MessageId,
        outcome: Outcome,
    ) -> Result<Arc<Message>, StoreError> {
        let index = self
            .position(id)
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })?;

        let current = &self.messages[index];
        if !current.is_in_flight() {
            return Err(StoreError::invariant(format!(
                "message `{id}` is already finalized"
            )));
        }

        let mut frozen = Message::clone(current).finalized(outcome);
        frozen.revision += 1;
        let frozen = Arc::new(frozen);
        self.messages[index] = Arc::clone(&frozen);
        if self.in_flight == Some(index) {
            self.in_flight = None;
        }
        self.publish();
        Ok(frozen)
    }

    /// All messages in order
    pub fn messages(&self) -> &[Arc<Message>] {
        &self.messages
    }

    /// Look up a message by id
    pub fn get(&self, id: &MessageId) -> Option<&Arc<Message>> {
        self.position(id).map(|index| &self.messages[index])
    }

    /// The in-flight message, if any
    pub fn in_flight(&self) -> Option<&Arc<Message>> {
        self.in_flight.map(|index| &self.messages[index])
    }

    /// Number of messages
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// True if the transcript has no messages
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Current transcript version
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Current snapshot
    pub fn snapshot(&self) -> TranscriptSnapshot {
        self.publisher.borrow().clone()
    }

    /// Subscribe to snapshot updates; the receiver starts at the current snapshot.
    pub fn subscribe(&self) -> watch::Receiver<TranscriptSnapshot> {
        self.publisher.subscribe()
    }

    fn position(&self, id: &MessageId) -> Option<usize> {
        self.messages.iter().position(|message| &message.id == id)
    }

    fn publish(&mut self) {
        self.version += 1;
        self.publisher.send_replace(TranscriptSnapshot {
            version: self.version,
            messages: Arc::from(self.messages.as_slice()),
        });
    }
}

impl Default for TranscriptStore {
    fn default() -> Self {
        Self::new()
    }
}
