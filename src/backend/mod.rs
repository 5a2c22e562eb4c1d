//! In-process Backend
//!
//! Loopback implementations of the collaborator traits. They keep rows in
//! memory and fan events out with `tokio::sync::broadcast`, so the messaging
//! core can run end to end without a hosted backend.
//!
//! # Module Structure
//!
//! - **`loopback`** - Message persistence, realtime fan-out and push capture
//! - **`session_auth`** - A fixed signed-in (or signed-out) session

pub mod loopback;
pub mod session_auth;

pub use loopback::LoopbackBackend;
pub use session_auth::StaticAuth;
