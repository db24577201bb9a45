use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use time::OffsetDateTime;
use tokio::task::JoinHandle;

use crate::clock::Clock;

#[derive(Default)]
struct Slot {
    generation: u64,
    armed: Option<ArmedTimer>,
}

struct ArmedTimer {
    generation: u64,
    fires_at: OffsetDateTime,
    handle: JoinHandle<()>,
}

/// Single proactive-refresh timer.
///
/// Each [`arm`](Self::arm) supersedes the previous one: at most one timer is
/// pending at any time. Every `arm` and [`cancel`](Self::cancel) bumps a
/// generation counter, which the callback receives so it can tell a stale
/// firing from the current one.
pub struct RefreshScheduler {
    skew: Duration,
    clock: Arc<dyn Clock>,
    slot: Arc<Mutex<Slot>>,
}

impl RefreshScheduler {
    #[must_use]
    pub fn new(skew: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            skew,
            clock,
            slot: Arc::new(Mutex::new(Slot::default())),
        }
    }

    #[must_use]
    pub fn skew(&self) -> Duration {
        self.skew
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Schedule `on_fire` at `expires_at - skew`, replacing any pending timer.
    ///
    /// Fires immediately if that moment has already passed. Returns the
    /// generation passed to `on_fire`.
    ///
    /// Must be called within a Tokio runtime.
    pub fn arm<F, Fut>(&self, expires_at: OffsetDateTime, on_fire: F) -> u64
    where
        F: FnOnce(u64) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let now = self.clock.now();
        // A skew reaching past the representable range means "fire now".
        let fires_at = time::Duration::try_from(self.skew)
            .ok()
            .and_then(|skew| expires_at.checked_sub(skew))
            .unwrap_or(now);
        let delay = Duration::try_from(fires_at - now).unwrap_or_default();

        // Held across the spawn so the task cannot observe the slot before it is filled.
        let mut slot = self.lock();
        slot.generation += 1;
        let generation = slot.generation;
        if let Some(previous) = slot.armed.take() {
            previous.handle.abort();
        }

        let shared = Arc::clone(&self.slot);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut slot = shared.lock().unwrap_or_else(PoisonError::into_inner);
                match &slot.armed {
                    // Detach, so a re-arm from inside on_fire does not abort this task.
                    Some(armed) if armed.generation == generation => slot.armed = None,
                    _ => return,
                }
            }
            tracing::debug!(generation, "Refresh timer fired");
            on_fire(generation).await;
        });

        tracing::debug!(generation, %fires_at, delay_secs = delay.as_secs(), "Refresh timer armed");
        slot.armed = Some(ArmedTimer {
            generation,
            fires_at,
            handle,
        });
        generation
    }

    /// Remove the pending timer, if any. Idempotent.
    pub fn cancel(&self) {
        let mut slot = self.lock();
        slot.generation += 1;
        if let Some(armed) = slot.armed.take() {
            armed.handle.abort();
            tracing::debug!(generation = armed.generation, "Refresh timer cancelled");
        }
    }

    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.lock().armed.is_some()
    }

    /// When the pending timer fires, if one is armed.
    #[must_use]
    pub fn fires_at(&self) -> Option<OffsetDateTime> {
        self.lock().armed.as_ref().map(|armed| armed.fires_at)
    }

    /// Generation of the latest `arm` or `cancel`.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        if let Some(armed) = self.lock().armed.take() {
            armed.handle.abort();
        }
    }
}
