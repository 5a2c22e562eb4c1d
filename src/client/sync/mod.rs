//! # Connectivity
//!
//! Device connectivity tracking. The monitor is the leaf of the messaging
//! core: an offline→online transition drives the offline queue's flush and
//! the realtime channels' resubscription.

pub mod network_monitor;

pub use network_monitor::{NetworkMonitor, Subscription};
