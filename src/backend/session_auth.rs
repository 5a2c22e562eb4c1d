//! Fixed session for tests and the demo.

use crate::client::collaborators::AuthProvider;
use crate::shared::error::SendError;
use async_trait::async_trait;
use std::sync::{Mutex, PoisonError};
use uuid::Uuid;

#[derive(Debug, Clone)]
struct Session {
    user_id: Uuid,
    display_name: Option<String>,
}

/// Auth provider holding at most one signed-in user
#[derive(Debug, Default)]
pub struct StaticAuth {
    session: Mutex<Option<Session>>,
}

impl StaticAuth {
    pub fn signed_in(user_id: Uuid, display_name: Option<&str>) -> Self {
        Self {
            session: Mutex::new(Some(Session {
                user_id,
                display_name: display_name.map(str::to_string),
            })),
        }
    }

    pub fn signed_out() -> Self {
        Self::default()
    }

    pub fn sign_out(&self) {
        self.session.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    fn current(&self) -> Option<Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl AuthProvider for StaticAuth {
    async fn current_user_id(&self) -> Result<Uuid, SendError> {
        self.current()
            .map(|session| session.user_id)
            .ok_or(SendError::Unauthenticated)
    }

    async fn display_name(&self) -> Option<String> {
        self.current().and_then(|session| session.display_name)
    }
}
