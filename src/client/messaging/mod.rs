//! # Messaging
//!
//! Realtime channels and the per-conversation reconciliation sessions built
//! on top of them.
//!
//! ## Key Components
//!
//! - `realtime.rs`: Message and typing channel subscriptions
//! - `sender.rs`: Online send path with push notice dispatch
//! - `session.rs`: One open conversation and its actions
//! - `state.rs`: `Messenger`, the map of open sessions
//! - `typing.rs`: Typing indicator with a cancellable decay timer

pub mod realtime;
pub mod sender;
pub mod session;
pub mod state;
pub mod typing;

pub use realtime::{ChannelHandle, ChannelState, RealtimeChannels};
pub use sender::MessageSender;
pub use session::ConversationSession;
pub use state::{Collaborators, FailedOperations, Messenger};
pub use typing::TypingIndicator;
