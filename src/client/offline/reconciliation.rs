//! # State Reconciliation
//!
//! Merges optimistic local entries with server-confirmed rows for one
//! conversation. Everything here is synchronous; callers hold the view behind
//! a mutex and apply each change in a single critical section.
//!
//! ## Features
//!
//! - **Sorted Insert**: Rows are kept in `created_at` order, ties in arrival
//!   order, with an append fast path for the common case
//! - **Idempotent Merge**: A row already present only upgrades its receipts
//! - **Substitution**: A provisional entry is replaced by its persisted row,
//!   never shown next to it
//! - **Echo Reconciliation**: The realtime copy of our own send replaces the
//!   oldest matching in-flight bubble when it wins the race against the
//!   send response
//!
//! ## Usage
//!
//! ```rust
//! use sponsorlink::client::offline::reconciliation::{ConversationView, MergeOutcome};
//! use sponsorlink::shared::{Message, MessageStatus};
//! use uuid::Uuid;
//!
//! let conversation = Uuid::new_v4();
//! let (me, them) = (Uuid::new_v4(), Uuid::new_v4());
//! let mut view = ConversationView::new(conversation);
//!
//! let bubble = Message::provisional(Uuid::new_v4(), conversation, me, them, "hi".into(), MessageStatus::Sending);
//! view.insert_provisional(bubble);
//! assert_eq!(view.len(), 1);
//! ```

use crate::shared::messaging::{Message, MessageId, MessageStatus};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// What a server row did to the view
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// New row inserted
    Inserted,
    /// Row replaced the in-flight provisional entry with this id
    Replaced(MessageId),
    /// Row was present; receipts moved forward
    Upgraded,
    /// Row was present and carried nothing new
    Unchanged,
}

impl MergeOutcome {
    /// Whether the view changed
    pub fn changed(&self) -> bool {
        !matches!(self, MergeOutcome::Unchanged)
    }
}

/// Read model handed to the UI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationSnapshot {
    pub conversation_id: Uuid,
    pub messages: Vec<Message>,
    pub unread_count: usize,
    pub counterpart_typing: bool,
    pub last_message_preview: Option<String>,
    /// Text restored into the composer after a rollback
    pub draft: Option<String>,
    /// Dismissible error from the last failed send
    pub send_error: Option<String>,
}

/// Ordered message list of one open conversation
#[derive(Debug, Clone)]
pub struct ConversationView {
    conversation_id: Uuid,
    messages: Vec<Message>,
    counterpart_typing: bool,
    draft: Option<String>,
    send_error: Option<String>,
}

impl ConversationView {
    pub fn new(conversation_id: Uuid) -> Self {
        Self {
            conversation_id,
            messages: Vec::new(),
            counterpart_typing: false,
            draft: None,
            send_error: None,
        }
    }

    pub fn conversation_id(&self) -> Uuid {
        self.conversation_id
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| &m.id == id)
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.position(id).is_some()
    }

    fn position(&self, id: &MessageId) -> Option<usize> {
        self.messages.iter().position(|m| &m.id == id)
    }

    /// Seed with a page of history, oldest first
    pub fn apply_history(&mut self, rows: Vec<Message>) -> usize {
        rows.into_iter()
            .map(|row| self.merge_row(row))
            .filter(|outcome| *outcome == MergeOutcome::Inserted)
            .count()
    }

    /// Merge a server row that arrived over realtime
    ///
    /// Rows from `current_user` may be the echo of a send still in flight;
    /// the oldest `Sending`/`Queued` bubble with the same body is replaced.
    pub fn merge_server(&mut self, row: Message, current_user: Uuid) -> MergeOutcome {
        if self.contains(&row.id) {
            return self.merge_row(row);
        }

        if row.sender_id == current_user {
            let echo_of = self.messages.iter().position(|m| {
                m.id.is_provisional() && m.status.is_in_flight() && m.body == row.body
            });
            if let Some(index) = echo_of {
                let provisional = self.messages.remove(index);
                self.insert_sorted(row);
                return MergeOutcome::Replaced(provisional.id);
            }
        }

        self.merge_row(row)
    }

    fn merge_row(&mut self, row: Message) -> MergeOutcome {
        match self.position(&row.id) {
            Some(index) => {
                if self.messages[index].absorb_receipts(&row) {
                    MergeOutcome::Upgraded
                } else {
                    MergeOutcome::Unchanged
                }
            }
            None => {
                self.insert_sorted(row);
                MergeOutcome::Inserted
            }
        }
    }

    fn insert_sorted(&mut self, row: Message) {
        let append = self
            .messages
            .last()
            .map_or(true, |last| last.created_at <= row.created_at);
        if append {
            self.messages.push(row);
        } else {
            // after every entry with an equal timestamp keeps arrival order
            let index = self
                .messages
                .partition_point(|m| m.created_at <= row.created_at);
            self.messages.insert(index, row);
        }
    }

    /// Append an optimistic bubble at the tail
    pub fn insert_provisional(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Put back a bubble that keeps its original timestamp
    ///
    /// Queued or failed operations shown again after a reopen land in
    /// timestamp order, after any entry with the same timestamp.
    pub fn restore_provisional(&mut self, message: Message) {
        self.insert_sorted(message);
    }

    /// Substitute the provisional entry with its persisted row
    ///
    /// Whichever of the two is already present, exactly one entry for the
    /// message remains afterwards.
    pub fn confirm(&mut self, provisional_id: &MessageId, persisted: Message) -> MergeOutcome {
        let removed = self.remove(provisional_id).is_some();
        let outcome = self.merge_row(persisted);
        match (removed, outcome) {
            (true, _) => MergeOutcome::Replaced(provisional_id.clone()),
            (false, outcome) => outcome,
        }
    }

    /// Remove an entry
    pub fn remove(&mut self, id: &MessageId) -> Option<Message> {
        let index = self.position(id)?;
        Some(self.messages.remove(index))
    }

    /// Change an entry's status; false if it is gone
    pub fn set_status(&mut self, id: &MessageId, status: MessageStatus) -> bool {
        match self.messages.iter_mut().find(|m| &m.id == id) {
            Some(message) => {
                message.status = status;
                true
            }
            None => false,
        }
    }

    /// Mark an entry as terminally failed
    pub fn mark_failed(&mut self, id: &MessageId) -> bool {
        self.set_status(id, MessageStatus::Failed)
    }

    /// Stamp `read_at` on every unread row addressed to `reader`
    pub fn mark_read_by(&mut self, reader: Uuid, at: DateTime<Utc>) -> usize {
        let mut stamped = 0;
        for message in self
            .messages
            .iter_mut()
            .filter(|m| m.recipient_id == reader && m.sender_id != reader && m.read_at.is_none())
        {
            message.mark_read_at(at);
            stamped += 1;
        }
        stamped
    }

    /// Rows addressed to `current_user` that are not read yet
    pub fn unread_count(&self, current_user: Uuid) -> usize {
        self.messages
            .iter()
            .filter(|m| {
                m.recipient_id == current_user && m.sender_id != current_user && m.read_at.is_none()
            })
            .count()
    }

    /// Preview of the newest entry
    pub fn last_message_preview(&self, max_chars: usize) -> Option<String> {
        self.messages.last().map(|m| m.preview(max_chars))
    }

    pub fn counterpart_typing(&self) -> bool {
        self.counterpart_typing
    }

    /// Returns whether the flag changed
    pub fn set_counterpart_typing(&mut self, typing: bool) -> bool {
        let changed = self.counterpart_typing != typing;
        self.counterpart_typing = typing;
        changed
    }

    pub fn draft(&self) -> Option<&str> {
        self.draft.as_deref()
    }

    pub fn restore_draft(&mut self, text: String) {
        self.draft = Some(text);
    }

    /// Hand the restored draft to the composer
    pub fn take_draft(&mut self) -> Option<String> {
        self.draft.take()
    }

    pub fn send_error(&self) -> Option<&str> {
        self.send_error.as_deref()
    }

    pub fn set_send_error(&mut self, error: impl Into<String>) {
        self.send_error = Some(error.into());
    }

    /// Returns whether there was an error to dismiss
    pub fn dismiss_error(&mut self) -> bool {
        self.send_error.take().is_some()
    }

    pub fn snapshot(&self, current_user: Uuid, preview_len: usize) -> ConversationSnapshot {
        ConversationSnapshot {
            conversation_id: self.conversation_id,
            messages: self.messages.clone(),
            unread_count: self.unread_count(current_user),
            counterpart_typing: self.counterpart_typing,
            last_message_preview: self.last_message_preview(preview_len),
            draft: self.draft.clone(),
            send_error: self.send_error.clone(),
        }
    }
}
