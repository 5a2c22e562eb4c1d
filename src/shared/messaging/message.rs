//! Chat Message Data Structure
//!
//! Represents one chat turn between a sponsor and a sponsee, whether it is a
//! server-confirmed row or a provisional entry drafted on this device.

use crate::shared::error::SharedError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Prefix that marks a locally generated id
const PROVISIONAL_PREFIX: &str = "local-";

/// Message identifier.
///
/// Either a permanent id assigned by the backend or a provisional
/// `local-<uuid>` id generated on this device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Wrap an id assigned by the backend
    pub fn server(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Provisional id derived from a local operation id
    pub fn provisional(operation_id: Uuid) -> Self {
        Self(format!("{}{}", PROVISIONAL_PREFIX, operation_id))
    }

    /// Whether this id was generated on this device
    pub fn is_provisional(&self) -> bool {
        self.0.starts_with(PROVISIONAL_PREFIX)
    }

    /// Operation id a provisional id was derived from
    pub fn operation_id(&self) -> Option<Uuid> {
        self.0
            .strip_prefix(PROVISIONAL_PREFIX)
            .and_then(|raw| Uuid::parse_str(raw).ok())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle status of a message
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Drafted online, send in flight
    Sending,
    /// Drafted offline, waiting in the offline queue
    Queued,
    /// Persisted by the backend
    Sent,
    /// Delivered to the recipient's device
    Delivered,
    /// Read by the recipient
    Read,
    /// Gave up after exhausting retries
    Failed,
}

impl MessageStatus {
    /// Whether the entry is a provisional, not yet confirmed bubble
    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::Sending | Self::Queued)
    }

    /// Ordering of confirmed receipts; in-flight and failed states rank 0
    fn receipt_rank(self) -> u8 {
        match self {
            Self::Sent => 1,
            Self::Delivered => 2,
            Self::Read => 3,
            Self::Sending | Self::Queued | Self::Failed => 0,
        }
    }
}

/// Represents a chat message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Permanent or provisional id
    pub id: MessageId,
    /// Conversation this message belongs to
    pub conversation_id: Uuid,
    /// User who wrote the message
    pub sender_id: Uuid,
    /// User the message is addressed to
    pub recipient_id: Uuid,
    /// Body text
    pub body: String,
    /// Creation time (device clock for provisional entries)
    pub created_at: DateTime<Utc>,
    /// When the recipient's device received it
    pub delivered_at: Option<DateTime<Utc>>,
    /// When the recipient read it
    pub read_at: Option<DateTime<Utc>>,
    /// Lifecycle status
    pub status: MessageStatus,
    /// Hidden from the conversation list
    #[serde(default)]
    pub archived: bool,
}

impl Message {
    /// Create a provisional message for an optimistic bubble
    pub fn provisional(
        operation_id: Uuid,
        conversation_id: Uuid,
        sender_id: Uuid,
        recipient_id: Uuid,
        body: String,
        status: MessageStatus,
    ) -> Self {
        Self {
            id: MessageId::provisional(operation_id),
            conversation_id,
            sender_id,
            recipient_id,
            body,
            created_at: Utc::now(),
            delivered_at: None,
            read_at: None,
            status,
            archived: false,
        }
    }

    /// Status implied by the receipt timestamps of a server row
    pub fn status_from_receipts(&self) -> MessageStatus {
        if self.read_at.is_some() {
            MessageStatus::Read
        } else if self.delivered_at.is_some() {
            MessageStatus::Delivered
        } else {
            MessageStatus::Sent
        }
    }

    /// `created_at <= delivered_at <= read_at`, and read implies delivered
    pub fn receipts_consistent(&self) -> bool {
        match (self.delivered_at, self.read_at) {
            (None, Some(_)) => false,
            (Some(delivered), Some(read)) => self.created_at <= delivered && delivered <= read,
            (Some(delivered), None) => self.created_at <= delivered,
            (None, None) => true,
        }
    }

    /// Stamp `read_at`, back-filling `delivered_at` if needed
    pub fn mark_read_at(&mut self, at: DateTime<Utc>) {
        let at = at.max(self.created_at);
        if self.delivered_at.is_none() {
            self.delivered_at = Some(at);
        }
        if self.read_at.is_none() {
            self.read_at = Some(at);
        }
        if !self.status.is_in_flight() && self.status != MessageStatus::Failed {
            self.status = MessageStatus::Read;
        }
    }

    /// Take receipts from a newer copy of the same row.
    ///
    /// Receipts only ever move forward; returns whether anything changed.
    /// Absorbed timestamps are clamped so `receipts_consistent` still holds.
    pub fn absorb_receipts(&mut self, newer: &Message) -> bool {
        let mut changed = false;
        if let (None, Some(delivered)) = (self.delivered_at, newer.delivered_at) {
            self.delivered_at = Some(delivered.max(self.created_at));
            changed = true;
        }
        if let (None, Some(read)) = (self.read_at, newer.read_at) {
            let read = read.max(self.created_at);
            let read = self.delivered_at.map_or(read, |delivered| read.max(delivered));
            self.delivered_at.get_or_insert(read);
            self.read_at = Some(read);
            changed = true;
        }
        if newer.status.receipt_rank() > self.status.receipt_rank() {
            self.status = newer.status;
            changed = true;
        }
        changed
    }

    /// Get a preview of the message (first N characters)
    pub fn preview(&self, max_len: usize) -> String {
        if self.body.chars().count() <= max_len {
            self.body.clone()
        } else {
            let mut preview: String = self.body.chars().take(max_len.saturating_sub(3)).collect();
            preview.push_str("...");
            preview
        }
    }
}

/// Insert request handed to the message persistence collaborator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewMessage {
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    pub body: String,
}

/// Validate a message body before any I/O.
///
/// Rejects empty or whitespace-only text and text longer than `max_len`
/// characters.
pub fn validate_body(body: &str, max_len: usize) -> Result<(), SharedError> {
    if body.trim().is_empty() {
        return Err(SharedError::validation("body", "Message text cannot be empty"));
    }
    let len = body.chars().count();
    if len > max_len {
        return Err(SharedError::validation(
            "body",
            format!("Message text is {} characters, limit is {}", len, max_len),
        ));
    }
    Ok(())
}
