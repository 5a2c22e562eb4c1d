//! SponsorLink - Messaging Core
//!
//! Offline-capable realtime messaging between sponsors and sponsees.
//!
//! # Overview
//!
//! This library provides the client-side messaging subsystem:
//! - A durable offline queue that buffers messages while disconnected and
//!   replays them in order on reconnect
//! - Realtime delivery of persisted messages and ephemeral typing signals
//! - Optimistic bubbles reconciled with server rows without duplicates
//!
//! # Module Structure
//!
//! - **`shared`** - Data model, events, errors and configuration
//!   - Message, status and typing types
//!   - `SendError` and friends
//!   - `AppConfig` builder
//!
//! - **`client`** - Everything that runs on the device
//!   - Network monitor
//!   - Offline queue, retry policy, reconciliation
//!   - Realtime channels, conversation sessions, `Messenger`
//!   - SQLite-backed local storage
//!
//! - **`backend`** - In-process loopback collaborators
//!   - Message store and broadcast fan-out
//!   - Fixed auth session
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sponsorlink::backend::{LoopbackBackend, StaticAuth};
//! use sponsorlink::client::local_db::MemoryStore;
//! use sponsorlink::client::{Collaborators, Messenger, NetworkMonitor};
//! use sponsorlink::shared::AppConfig;
//! use uuid::Uuid;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = LoopbackBackend::new();
//! let me = Uuid::new_v4();
//! let messenger = Messenger::start(
//!     AppConfig::default(),
//!     Collaborators {
//!         auth: Arc::new(StaticAuth::signed_in(me, Some("Alex"))),
//!         backend: Arc::new(backend.clone()),
//!         transport: Arc::new(backend.clone()),
//!         notifier: Arc::new(backend),
//!         store: Arc::new(MemoryStore::new()),
//!     },
//!     NetworkMonitor::new(),
//! )
//! .await?;
//!
//! let session = messenger.open_conversation(Uuid::new_v4(), Uuid::new_v4()).await?;
//! session.submit("Hello").await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Thread Safety
//!
//! - In-memory state sits behind `std::sync::Mutex` and is never held across
//!   an `.await`
//! - The queue serializes storage writes through a `tokio::sync::Mutex`
//! - Handles (`Messenger`, `OfflineQueue`, `NetworkMonitor`) are cheap clones
//!   of shared state

/// Shared types and data structures
pub mod shared;

/// Client-side messaging core
pub mod client;

/// In-process loopback collaborators
pub mod backend;
