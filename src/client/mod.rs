//! Client-side messaging core
//!
//! Everything that runs on the device: connectivity tracking, the durable
//! offline queue, realtime channels and the per-conversation views.

pub mod collaborators;
pub mod config;
pub mod local_db;
pub mod messaging;
pub mod offline;
pub mod sync;

pub use config::Config;
pub use messaging::{Collaborators, ConversationSession, Messenger};
pub use offline::{ConversationSnapshot, OfflineQueue, SubmitOutcome};
pub use sync::NetworkMonitor;
