//! Online send path.
//!
//! Resolves the current user, inserts the row and, once it is persisted,
//! dispatches a push notice in the background. The queue's flush uses the
//! same path, so a queued message behaves exactly like one sent online.

use crate::client::collaborators::{AuthProvider, MessageBackend, NewMessageNotice, NotificationDispatcher};
use crate::shared::error::SendError;
use crate::shared::messaging::{Message, NewMessage};
use std::sync::Arc;
use uuid::Uuid;

/// Sender name used when the profile has none
pub const DEFAULT_SENDER_NAME: &str = "Your connection";

#[derive(Clone)]
pub struct MessageSender {
    auth: Arc<dyn AuthProvider>,
    backend: Arc<dyn MessageBackend>,
    notifier: Arc<dyn NotificationDispatcher>,
    preview_len: usize,
}

impl MessageSender {
    pub fn new(
        auth: Arc<dyn AuthProvider>,
        backend: Arc<dyn MessageBackend>,
        notifier: Arc<dyn NotificationDispatcher>,
        preview_len: usize,
    ) -> Self {
        Self {
            auth,
            backend,
            notifier,
            preview_len,
        }
    }

    /// Persist a message and return the stored row
    pub async fn send(&self, conversation_id: Uuid, recipient_id: Uuid, body: &str) -> Result<Message, SendError> {
        let sender_id = self.auth.current_user_id().await?;
        let row = self
            .backend
            .insert_message(NewMessage {
                conversation_id,
                sender_id,
                recipient_id,
                body: body.to_string(),
            })
            .await?;

        tracing::debug!("[SEND] Persisted {} in conversation {}", row.id, conversation_id);
        self.notify(&row);
        Ok(row)
    }

    /// Fire-and-forget push notice; never affects the send
    fn notify(&self, row: &Message) {
        let auth = Arc::clone(&self.auth);
        let notifier = Arc::clone(&self.notifier);
        let recipient_id = row.recipient_id;
        let conversation_id = row.conversation_id;
        let preview = row.preview(self.preview_len);

        tokio::spawn(async move {
            let sender_name = auth
                .display_name()
                .await
                .unwrap_or_else(|| DEFAULT_SENDER_NAME.to_string());
            let notice = NewMessageNotice {
                recipient_id,
                sender_name,
                preview,
                conversation_id,
            };
            if let Err(e) = notifier.notify_new_message(notice).await {
                tracing::warn!("[SEND] Notification for {} failed: {}", recipient_id, e);
            }
        });
    }
}
