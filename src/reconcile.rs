//! Message reconciliation between the history batch and the live stream.
//!
//! Single responsibility: keep one ordered, duplicate-free message sequence.
//! No knowledge of transports or connection state.

use std::collections::HashSet;

use tracing::debug;

use crate::message::{Message, MessageId, ParticipantId};

/// The reconciled message sequence for one conversation.
///
/// History is seeded once, ordered by creation time. Streamed messages are
/// appended in arrival order. A message id is only ever admitted once: the
/// first observed copy wins and redelivery is a no-op, so at-least-once
/// delivery from the broker never creates duplicate rows or reorders
/// existing ones. The sequence only ever grows.
#[derive(Debug, Default)]
pub struct MessageLog {
    entries: Vec<Message>,
    seen: HashSet<MessageId>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the log with the historical batch, ordered by `created_at`.
    ///
    /// Called once per session, before any streamed message is accepted.
    /// Duplicate ids inside the batch keep the earliest copy.
    pub fn seed(&mut self, mut history: Vec<Message>) {
        history.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        for message in history {
            if self.seen.insert(message.id.clone()) {
                self.entries.push(message);
            } else {
                debug!(id = %message.id, "Duplicate id in history batch, keeping first");
            }
        }
    }

    /// Insert a streamed message.
    ///
    /// Returns `true` if the id was new and the message was appended,
    /// `false` for a redelivered duplicate (the log is left untouched).
    pub fn ingest(&mut self, message: Message) -> bool {
        if !self.seen.insert(message.id.clone()) {
            debug!(id = %message.id, "Duplicate delivery ignored");
            return false;
        }

        self.entries.push(message);
        true
    }

    /// Snapshot of the current sequence.
    pub fn messages(&self) -> Vec<Message> {
        self.entries.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Unread messages from the other participant, for the conversation
    /// badge.
    pub fn unread_from_peer(&self, me: &ParticipantId) -> usize {
        self.entries
            .iter()
            .filter(|m| !m.is_read && !m.is_own(me))
            .count()
    }
}
