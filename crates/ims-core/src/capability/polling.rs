//! Capability polling
//!
//! Every polling period, each known contact's snapshot is checked:
//!
//! - no snapshot: direct (OPTIONS) query
//! - clock went backwards (`now < last`): refresh
//! - expired (`now > last + window`, strict): refresh
//! - otherwise fresh, skipped
//!
//! A refresh uses presence discovery when the snapshot says the contact
//! supports it, OPTIONS otherwise. A polling period of 0 disables polling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::capability::{
    Capabilities, CapabilityRequester, CapabilitySnapshot, Clock, ContactId, ContactStore, SystemClock,
};
use crate::config::ImsSettings;
use crate::error::ImsResult;
use crate::refresher::{PeriodicProcessor, PeriodicRefresher};

/// Whether a snapshot taken at `last` (epoch ms) is stale at `now`
pub fn needs_refresh(now: i64, last: i64, expiry_window: i64) -> bool {
    now < last || now > last.saturating_add(expiry_window)
}

/// Queries issued by one scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    pub options: Vec<ContactId>,
    pub presence: Vec<ContactId>,
    pub fresh: usize,
}

pub struct CapabilityPollingManager {
    settings: Arc<ImsSettings>,
    store: Arc<dyn ContactStore>,
    requester: Arc<dyn CapabilityRequester>,
    clock: Arc<dyn Clock>,
    refresher: PeriodicRefresher,
    running: AtomicBool,
}

impl CapabilityPollingManager {
    pub fn new(
        settings: Arc<ImsSettings>,
        store: Arc<dyn ContactStore>,
        requester: Arc<dyn CapabilityRequester>,
    ) -> Arc<Self> {
        Self::with_clock(settings, store, requester, Arc::new(SystemClock))
    }

    pub fn with_clock(
        settings: Arc<ImsSettings>,
        store: Arc<dyn ContactStore>,
        requester: Arc<dyn CapabilityRequester>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let processor: Weak<dyn PeriodicProcessor> = weak.clone();
            Self {
                settings,
                store,
                requester,
                clock,
                refresher: PeriodicRefresher::new("capability_polling", processor),
                running: AtomicBool::new(false),
            }
        })
    }

    /// Arm the first scan one polling period from now
    pub fn start(&self) {
        let period = self.settings.capability_polling_period();
        if period.is_zero() {
            info!("Capability polling disabled");
            return;
        }
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("Capability polling already running");
            return;
        }
        info!(period_secs = period.as_secs(), "Starting capability polling");
        self.refresher.start_timer(Instant::now(), period);
    }

    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("Stopping capability polling");
        }
        self.refresher.stop_timer();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Check every contact and query the stale ones
    ///
    /// A failed query is logged and the scan carries on.
    pub async fn scan(&self) -> ImsResult<PollReport> {
        let now = self.clock.now_millis();
        let window = self.settings.capability_expiry_window_ms;
        let mut report = PollReport::default();

        for contact in self.store.contacts().await? {
            let snapshot = match self.store.capabilities(&contact).await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!(contact = %contact, error = %e, "Could not read capabilities");
                    continue;
                }
            };
            let presence = match snapshot {
                None => false,
                Some(s) if needs_refresh(now, s.timestamp_last_response, window) => {
                    s.capabilities.presence_discovery
                }
                Some(_) => {
                    report.fresh += 1;
                    continue;
                }
            };

            let result = if presence {
                self.requester.request_presence(&contact).await
            } else {
                self.requester.request_options(&contact).await
            };
            if let Err(e) = result {
                warn!(contact = %contact, presence, error = %e, "Capability request failed");
            }
            if presence {
                report.presence.push(contact);
            } else {
                report.options.push(contact);
            }
        }

        debug!(
            options = report.options.len(),
            presence = report.presence.len(),
            fresh = report.fresh,
            "Capability scan done"
        );
        Ok(report)
    }

    /// Store the capabilities a contact just answered with
    pub async fn record_response(&self, contact: &ContactId, capabilities: Capabilities) -> ImsResult<()> {
        let snapshot = CapabilitySnapshot::new(capabilities, self.clock.now_millis());
        self.store.set_capabilities(contact, snapshot).await
    }
}

#[async_trait]
impl PeriodicProcessor for CapabilityPollingManager {
    async fn periodic_processing(&self) {
        if !self.is_running() {
            return;
        }
        if let Err(e) = self.scan().await {
            warn!(error = %e, "Capability scan failed");
        }

        let period = self.settings.capability_polling_period();
        if self.is_running() && !period.is_zero() {
            self.refresher.start_timer(Instant::now(), period);
        }
    }
}

impl std::fmt::Debug for CapabilityPollingManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityPollingManager")
            .field("running", &self.is_running())
            .field("refresher", &self.refresher)
            .finish()
    }
}
