//! Periodic refresher
//!
//! "Do X at `base + period * fraction`, cancelable." A [`PeriodicRefresher`]
//! owns at most one pending timer; arming it again cancels the previous one.
//! When the timer fires, the owner's [`PeriodicProcessor::periodic_processing`]
//! runs once on its own tokio task. Re-arming is the callback's job.
//!
//! The refresher holds only a `Weak` reference to its owner, so the usual way
//! to build one is inside `Arc::new_cyclic`:
//!
//! ```rust
//! use std::sync::{Arc, Weak};
//! use async_trait::async_trait;
//! use ims_core::refresher::{PeriodicProcessor, PeriodicRefresher};
//!
//! struct Poller {
//!     refresher: PeriodicRefresher,
//! }
//!
//! #[async_trait]
//! impl PeriodicProcessor for Poller {
//!     async fn periodic_processing(&self) {
//!         // work, then re-arm if still wanted
//!     }
//! }
//!
//! let poller = Arc::new_cyclic(|weak: &Weak<Poller>| {
//!     let processor: Weak<dyn PeriodicProcessor> = weak.clone();
//!     Poller { refresher: PeriodicRefresher::new("poller", processor) }
//! });
//! assert!(!poller.refresher.is_pending());
//! ```
//!
//! Stopping is always safe, including when nothing is pending. A callback that
//! already fired can still be running when `stop_timer` returns; callbacks
//! must re-check whatever state they act on.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Owner callback invoked when a [`PeriodicRefresher`] fires
#[async_trait]
pub trait PeriodicProcessor: Send + Sync {
    async fn periodic_processing(&self);
}

#[derive(Debug)]
struct PendingTimer {
    handle: JoinHandle<()>,
    delay: Duration,
    deadline: Instant,
}

pub struct PeriodicRefresher {
    name: String,
    processor: Weak<dyn PeriodicProcessor>,
    generation: Arc<AtomicU64>,
    pending: Arc<Mutex<Option<PendingTimer>>>,
}

impl PeriodicRefresher {
    pub fn new(name: impl Into<String>, processor: Weak<dyn PeriodicProcessor>) -> Self {
        Self {
            name: name.into(),
            processor,
            generation: Arc::new(AtomicU64::new(0)),
            pending: Arc::new(Mutex::new(None)),
        }
    }

    /// Fire once at `base + period`
    pub fn start_timer(&self, base: Instant, period: Duration) {
        self.start_timer_with_fraction(base, period, 1.0);
    }

    /// Fire once at `base + period * fraction`, replacing any pending timer
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_timer_with_fraction(&self, base: Instant, period: Duration, fraction: f64) {
        let fraction = if fraction.is_finite() && fraction > 0.0 { fraction } else { 0.0 };
        let delay = period.mul_f64(fraction);
        let deadline = base + delay;

        let mut pending = self.pending.lock();
        if let Some(previous) = pending.take() {
            previous.handle.abort();
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let slot = Arc::clone(&self.pending);
        let current = Arc::clone(&self.generation);
        let processor = self.processor.clone();
        let name = self.name.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            {
                let mut pending = slot.lock();
                if current.load(Ordering::SeqCst) != generation {
                    trace!(refresher = %name, "Stale timer fired, ignoring");
                    return;
                }
                // Detach ourselves so a re-arm from the callback doesn't abort us
                pending.take();
            }
            match processor.upgrade() {
                Some(processor) => {
                    debug!(refresher = %name, "Timer fired");
                    processor.periodic_processing().await;
                }
                None => trace!(refresher = %name, "Owner dropped before timer fired"),
            }
        });

        debug!(refresher = %self.name, delay_ms = delay.as_millis() as u64, "Timer armed");
        *pending = Some(PendingTimer {
            handle,
            delay,
            deadline,
        });
    }

    /// Cancel the pending timer, if any
    pub fn stop_timer(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(previous) = self.pending.lock().take() {
            previous.handle.abort();
            debug!(refresher = %self.name, "Timer stopped");
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.lock().is_some()
    }

    /// Delay the pending timer was armed with
    pub fn pending_delay(&self) -> Option<Duration> {
        self.pending.lock().as_ref().map(|p| p.delay)
    }

    /// Instant the pending timer fires at
    pub fn pending_deadline(&self) -> Option<Instant> {
        self.pending.lock().as_ref().map(|p| p.deadline)
    }
}

impl Drop for PeriodicRefresher {
    fn drop(&mut self) {
        self.stop_timer();
    }
}

impl std::fmt::Debug for PeriodicRefresher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeriodicRefresher")
            .field("name", &self.name)
            .field("pending", &self.pending_delay())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use tracing_test::traced_test;

    struct Counter {
        fired: AtomicU32,
        rearm: bool,
        refresher: PeriodicRefresher,
    }

    #[async_trait]
    impl PeriodicProcessor for Counter {
        async fn periodic_processing(&self) {
            let n = self.fired.fetch_add(1, Ordering::SeqCst) + 1;
            if self.rearm && n < 3 {
                self.refresher
                    .start_timer(Instant::now(), Duration::from_millis(10));
            }
        }
    }

    fn counter(rearm: bool) -> Arc<Counter> {
        Arc::new_cyclic(|weak: &Weak<Counter>| {
            let processor: Weak<dyn PeriodicProcessor> = weak.clone();
            Counter {
                fired: AtomicU32::new(0),
                rearm,
                refresher: PeriodicRefresher::new("test", processor),
            }
        })
    }

    #[tokio::test]
    async fn test_fires_once() {
        let counter = counter(false);
        counter.refresher.start_timer(Instant::now(), Duration::from_millis(20));
        assert!(counter.refresher.is_pending());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(counter.fired.load(Ordering::SeqCst), 1);
        assert!(!counter.refresher.is_pending());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_fraction_scales_delay() {
        let counter = counter(false);
        counter
            .refresher
            .start_timer_with_fraction(Instant::now(), Duration::from_secs(3600), 0.5);
        assert_eq!(counter.refresher.pending_delay(), Some(Duration::from_secs(1800)));
        assert!(logs_contain("Timer armed"));
        counter.refresher.stop_timer();
        assert!(logs_contain("Timer stopped"));
    }

    #[tokio::test]
    async fn test_restart_replaces_pending_timer() {
        let counter = counter(false);
        counter.refresher.start_timer(Instant::now(), Duration::from_millis(30));
        counter.refresher.start_timer(Instant::now(), Duration::from_millis(60));

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(counter.fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stop_prevents_firing() {
        let counter = counter(false);
        counter.refresher.stop_timer(); // nothing pending, must be a no-op
        counter.refresher.start_timer(Instant::now(), Duration::from_millis(20));
        counter.refresher.stop_timer();
        assert!(!counter.refresher.is_pending());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(counter.fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_callback_can_rearm() {
        let counter = counter(true);
        counter.refresher.start_timer(Instant::now(), Duration::from_millis(10));

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(counter.fired.load(Ordering::SeqCst), 3);
        assert!(!counter.refresher.is_pending());
    }
}
