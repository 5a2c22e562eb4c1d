//! # Network Monitor
//!
//! Tracks device connectivity and publishes online/offline transitions.
//!
//! ## Features
//!
//! - **Connectivity Detection**: Last known state available synchronously
//! - **Transition Events**: Listeners fire exactly once per actual change
//! - **Fail-open**: Without a platform signal the monitor reports online and
//!   lets send failures drive queuing
//!
//! ## Usage
//!
//! ```rust
//! use sponsorlink::client::sync::NetworkMonitor;
//!
//! let monitor = NetworkMonitor::new();
//! let subscription = monitor.subscribe(|online| println!("online: {online}"));
//! monitor.set_online(false);
//! subscription.unsubscribe();
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::watch;

type Listener = Arc<dyn Fn(bool) + Send + Sync>;

struct MonitorInner {
    state: watch::Sender<bool>,
    listeners: Mutex<HashMap<u64, Listener>>,
    next_id: AtomicU64,
}

/// Connectivity monitor; clones share state
#[derive(Clone)]
pub struct NetworkMonitor {
    inner: Arc<MonitorInner>,
}

impl std::fmt::Debug for NetworkMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkMonitor")
            .field("online", &self.current())
            .finish()
    }
}

impl NetworkMonitor {
    /// Monitor without a platform signal yet; assumes online
    pub fn new() -> Self {
        Self::with_initial(true)
    }

    /// Monitor seeded with the platform's first reading
    pub fn with_initial(online: bool) -> Self {
        let (state, _) = watch::channel(online);
        Self {
            inner: Arc::new(MonitorInner {
                state,
                listeners: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Last known connectivity
    pub fn current(&self) -> bool {
        *self.inner.state.borrow()
    }

    /// Feed a platform reading; listeners run only if the state changed
    pub fn set_online(&self, online: bool) {
        let changed = self.inner.state.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if !changed {
            return;
        }

        if online {
            tracing::info!("[NETWORK] Connectivity restored");
        } else {
            tracing::info!("[NETWORK] Connectivity lost");
        }

        // call listeners outside the lock so they may subscribe or unsubscribe
        let listeners: Vec<Listener> = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for listener in listeners {
            listener(online);
        }
    }

    /// Register a transition listener
    ///
    /// The listener stays registered until the returned [`Subscription`] is
    /// dropped or unsubscribed.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::new(listener));
        Subscription {
            id,
            monitor: Arc::downgrade(&self.inner),
        }
    }

    /// Async view of the connectivity state
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.inner.state.subscribe()
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Listener registration; unsubscribes on drop
#[must_use = "dropping a Subscription unsubscribes the listener"]
pub struct Subscription {
    id: u64,
    monitor: Weak<MonitorInner>,
}

impl Subscription {
    /// Remove the listener
    pub fn unsubscribe(self) {
        // Drop does the work
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.monitor.upgrade() {
            inner
                .listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
