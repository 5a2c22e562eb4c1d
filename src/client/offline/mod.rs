//! # Offline Messaging System
//!
//! Offline-first sending: optimistic bubbles, a durable operation queue and
//! the merge rules that reconcile both with server state.
//!
//! ## Key Components
//!
//! - `optimistic.rs`: Provisional bubbles and failure routing
//! - `queue.rs`: Durable operation queue with ordered replay
//! - `retry.rs`: Retry policy and backoff
//! - `reconciliation.rs`: Per-conversation merge logic

pub mod optimistic;
pub mod queue;
pub mod reconciliation;
pub mod retry;

// Re-export main types
pub use optimistic::{FailureRoute, SubmitOutcome};
pub use queue::{FlushReport, OfflineQueue, QueueError, QueueEvent, QueueStats, QueuedOperation};
pub use reconciliation::{ConversationSnapshot, ConversationView, MergeOutcome};
pub use retry::{Backoff, RetryDecision, RetryPolicy};
