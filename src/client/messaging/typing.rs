//! Typing Indicator
//!
//! Counterpart typing flag with an explicit, cancellable decay timer. Every
//! incoming signal replaces the previous timer; a `true` signal arms a fresh
//! one and a `false` signal clears the flag at once.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;

type OnChange = Arc<dyn Fn(bool) + Send + Sync>;

#[derive(Default)]
struct IndicatorState {
    typing: bool,
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

/// Typing flag for one open conversation
#[derive(Clone)]
pub struct TypingIndicator {
    decay: Duration,
    state: Arc<Mutex<IndicatorState>>,
    on_change: OnChange,
}

impl std::fmt::Debug for TypingIndicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypingIndicator")
            .field("decay", &self.decay)
            .field("typing", &self.is_typing())
            .finish()
    }
}

impl TypingIndicator {
    /// `on_change` runs whenever the flag flips, outside any lock
    pub fn new<F>(decay: Duration, on_change: F) -> Self
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        Self {
            decay,
            state: Arc::new(Mutex::new(IndicatorState::default())),
            on_change: Arc::new(on_change),
        }
    }

    pub fn is_typing(&self) -> bool {
        self.lock().typing
    }

    /// Apply a typing signal from the counterpart
    pub fn apply(&self, is_typing: bool) {
        let changed = {
            let mut state = self.lock();
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
            state.generation = state.generation.wrapping_add(1);
            let changed = state.typing != is_typing;
            state.typing = is_typing;

            if is_typing {
                let generation = state.generation;
                let decay = self.decay;
                let shared = Arc::clone(&self.state);
                let on_change = Arc::clone(&self.on_change);
                state.timer = Some(tokio::spawn(async move {
                    tokio::time::sleep(decay).await;
                    let expired = {
                        let mut state = shared.lock().unwrap_or_else(PoisonError::into_inner);
                        // a newer signal owns the flag now
                        if state.generation != generation || !state.typing {
                            false
                        } else {
                            state.typing = false;
                            state.timer = None;
                            true
                        }
                    };
                    if expired {
                        tracing::debug!("[TYPING] Indicator decayed");
                        on_change(false);
                    }
                }));
            }
            changed
        };

        if changed {
            (self.on_change)(is_typing);
        }
    }

    /// Cancel the timer and clear the flag without notifying
    pub fn cancel(&self) {
        let mut state = self.lock();
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        state.generation = state.generation.wrapping_add(1);
        state.typing = false;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, IndicatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
