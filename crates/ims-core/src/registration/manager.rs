//! REGISTER state machine
//!
//! [`RegistrationManager`] owns the registration dialog and drives the
//! REGISTER / re-REGISTER / un-REGISTER exchanges. `register`,
//! `stop_registration` and `unregistration` serialize on one manager-wide
//! async mutex since they share the dialog and the failure counters.
//!
//! Response handling per REGISTER sent:
//!
//! | Status                                | Action                                      |
//! |---------------------------------------|---------------------------------------------|
//! | 200 OK                                | registered, schedule refresh                |
//! | 302                                   | retarget from Contact, resend               |
//! | 401                                   | answer challenge, resend (3rd one fails)    |
//! | 423                                   | adopt Min-Expires, resend                   |
//! | 404/408/480/500/503/504/600           | Retry-After: fail now; else resend (3 max)  |
//! | anything else, no response            | fail                                        |
//!
//! 423 to an un-REGISTER is a failure: the binding is being removed, there is
//! no interval to negotiate.
//!
//! Every terminal failure, un-REGISTER included, goes through one funnel which
//! tears the dialog down, stops the refresh timer and reports to the listener.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex as SyncMutex, RwLock};
use rvoip_sip_core::Response;
use tokio::sync::{Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::ImsSettings;
use crate::dialog::{generate_call_id, DialogPath};
use crate::error::{ImsError, ImsResult, RegistrationErrorCode};
use crate::refresher::{PeriodicProcessor, PeriodicRefresher};
use crate::registration::procedure::RegistrationProcedure;
use crate::registration::response::{refresh_delay, NatStatus, RegistrationOk, SHORT_EXPIRY_THRESHOLD_SECS};
use crate::registration::{RegistrationListener, RegistrationState};
use crate::sip::factory;
use crate::sip::headers::{self, contact_addresses};
use crate::sip::message::{status, SipMessageExt};
use crate::sip::transport::SipTransport;

/// Cap on consecutive 401 challenges within one attempt
pub const MAX_401_FAILURES: u32 = 3;

/// Cap on consecutive 4xx/5xx/6xx (without Retry-After) within one attempt
pub const MAX_4XX5XX6XX_FAILURES: u32 = 3;

/// Snapshot of what the network told us at the last successful registration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrationInfo {
    pub associated_uris: Vec<String>,
    pub public_gruu: Option<String>,
    pub temp_gruu: Option<String>,
    pub service_route: Vec<String>,
    pub nat: NatStatus,
    /// Lifetime used to schedule the current refresh
    pub effective_expiry: Option<u32>,
    /// Last Retry-After received with a 4xx/5xx/6xx
    pub retry_after: Option<Duration>,
}

#[derive(Debug, Default)]
struct RegistrationInner {
    dialog: Option<DialogPath>,
    nb_401_failures: u32,
    nb_4xx5xx6xx_failures: u32,
}

/// Registration state and the deferred un-REGISTER flag, changed together
#[derive(Debug)]
struct Control {
    state: RegistrationState,
    need_unregister: bool,
}

/// What to do after looking at one response
enum Step {
    Resend,
    Done,
    Fail(ImsError),
}

pub struct RegistrationManager {
    settings: Arc<ImsSettings>,
    transport: Arc<dyn SipTransport>,
    procedure: Arc<dyn RegistrationProcedure>,
    listener: Arc<dyn RegistrationListener>,
    refresher: PeriodicRefresher,
    inner: Mutex<RegistrationInner>,
    control: SyncMutex<Control>,
    info: RwLock<RegistrationInfo>,
    registered: AtomicBool,
    /// Expiry requested in REGISTER, adjusted by 423 responses
    expiry: AtomicU32,
    self_ref: Weak<RegistrationManager>,
}

impl RegistrationManager {
    pub fn new(
        settings: Arc<ImsSettings>,
        transport: Arc<dyn SipTransport>,
        procedure: Arc<dyn RegistrationProcedure>,
        listener: Arc<dyn RegistrationListener>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let processor: Weak<dyn PeriodicProcessor> = weak.clone();
            Self {
                expiry: AtomicU32::new(settings.registration_expiry_secs),
                settings,
                transport,
                procedure,
                listener,
                refresher: PeriodicRefresher::new("registration", processor),
                inner: Mutex::new(RegistrationInner::default()),
                control: SyncMutex::new(Control {
                    state: RegistrationState::Unregistered,
                    need_unregister: false,
                }),
                info: RwLock::new(RegistrationInfo::default()),
                registered: AtomicBool::new(false),
                self_ref: weak.clone(),
            }
        })
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> RegistrationState {
        self.control.lock().state
    }

    pub fn registration_info(&self) -> RegistrationInfo {
        self.info.read().clone()
    }

    pub fn is_behind_nat(&self) -> bool {
        self.info.read().nat.behind_nat
    }

    /// Public address/port seen by the registrar when behind NAT
    pub fn nat_public_address(&self) -> Option<(String, u16)> {
        let info = self.info.read();
        info.nat.public_address.clone().zip(info.nat.public_port)
    }

    pub fn associated_uris(&self) -> Vec<String> {
        self.info.read().associated_uris.clone()
    }

    pub fn public_gruu(&self) -> Option<String> {
        self.info.read().public_gruu.clone()
    }

    pub fn temp_gruu(&self) -> Option<String> {
        self.info.read().temp_gruu.clone()
    }

    pub fn service_route(&self) -> Vec<String> {
        self.info.read().service_route.clone()
    }

    /// Back-off the network asked for with the last failure, for the reconnection policy
    pub fn retry_after(&self) -> Option<Duration> {
        self.info.read().retry_after
    }

    /// Expiry requested in the next REGISTER
    pub fn expiry(&self) -> u32 {
        self.expiry.load(Ordering::SeqCst)
    }

    /// Delay the pending re-registration was scheduled with
    pub fn next_refresh_delay(&self) -> Option<Duration> {
        self.refresher.pending_delay()
    }

    /// `(401, 4xx/5xx/6xx)` failure counts of the current attempt
    pub async fn failure_counts(&self) -> (u32, u32) {
        let inner = self.inner.lock().await;
        (inner.nb_401_failures, inner.nb_4xx5xx6xx_failures)
    }

    /// Call-ID of the registration dialog, if one exists
    pub async fn call_id(&self) -> Option<String> {
        self.inner
            .lock()
            .await
            .dialog
            .as_ref()
            .map(|d| d.call_id().to_string())
    }

    fn set_state(&self, state: RegistrationState) {
        let mut control = self.control.lock();
        if control.state != state {
            debug!(from = %control.state, to = %state, "Registration state change");
            control.state = state;
        }
    }

    /// Flag an un-REGISTER for after the in-flight REGISTER; false when none is in flight
    fn defer_unregister(&self) -> bool {
        let mut control = self.control.lock();
        if control.state == RegistrationState::Registering {
            control.need_unregister = true;
            true
        } else {
            false
        }
    }

    fn take_deferred_unregister(&self) -> bool {
        std::mem::take(&mut self.control.lock().need_unregister)
    }

    fn new_dialog(&self) -> DialogPath {
        let local = self.transport.local_address();
        let route = vec![format!("<sip:{};lr>", self.settings.home_domain)];
        DialogPath::new(
            generate_call_id(&local.ip().to_string()),
            self.settings.home_domain_uri(),
            self.settings.public_uri.clone(),
            self.settings.public_uri.clone(),
            route,
        )
    }

    /// Register, or refresh the existing registration
    ///
    /// Returns the registered flag once the exchange completes.
    pub async fn register(&self) -> bool {
        let inner = self.inner.lock().await;
        self.register_locked(inner).await
    }

    /// Re-REGISTER if still registered once the manager lock is held
    ///
    /// A refresh racing with `stop_registration` or `unregistration` sends
    /// nothing.
    pub async fn refresh(&self) -> bool {
        let inner = self.inner.lock().await;
        if !self.is_registered() || inner.dialog.is_none() {
            debug!("Refresh skipped, no longer registered");
            return false;
        }
        debug!("Refreshing registration");
        self.register_locked(inner).await
    }

    async fn register_locked(&self, mut inner: MutexGuard<'_, RegistrationInner>) -> bool {
        self.set_state(RegistrationState::Registering);

        match inner.dialog.as_mut() {
            Some(dialog) => {
                dialog.increment_cseq();
            }
            None => {
                inner.dialog = Some(self.new_dialog());
                self.procedure.init();
            }
        }
        inner.nb_401_failures = 0;
        inner.nb_4xx5xx6xx_failures = 0;

        info!(
            call_id = inner.dialog.as_ref().map(|d| d.call_id()).unwrap_or_default(),
            expiry = self.expiry(),
            "Sending REGISTER"
        );

        if let Err(e) = self.exchange(&mut inner, false).await {
            self.handle_error(inner, e).await;
            return false;
        }
        drop(inner);

        self.listener.on_registration_successful().await;

        if self.take_deferred_unregister() {
            debug!("Performing deferred un-REGISTER");
            self.unregistration().await;
        }
        self.is_registered()
    }

    /// Drop the registration locally, without telling the network
    pub async fn stop_registration(&self) {
        let mut inner = self.inner.lock().await;
        if !self.is_registered() {
            debug!("Registration already stopped");
            return;
        }
        self.refresher.stop_timer();
        self.registered.store(false, Ordering::SeqCst);
        inner.dialog = None;
        self.set_state(RegistrationState::Unregistered);
        drop(inner);

        info!("Registration stopped");
        self.listener.on_registration_terminated().await;
    }

    /// un-REGISTER now, or as soon as an in-flight REGISTER completes
    pub async fn unregistration(&self) {
        if self.defer_unregister() {
            debug!("REGISTER in flight, deferring un-REGISTER");
            return;
        }

        let mut inner = self.inner.lock().await;
        if !self.is_registered() {
            debug!("Already unregistered");
            return;
        }
        self.set_state(RegistrationState::Unregistering);
        self.refresher.stop_timer();
        if let Some(dialog) = inner.dialog.as_mut() {
            dialog.increment_cseq();
        }
        inner.nb_401_failures = 0;
        inner.nb_4xx5xx6xx_failures = 0;

        info!("Sending un-REGISTER");
        if let Err(e) = self.exchange(&mut inner, true).await {
            self.handle_error(inner, e).await;
            return;
        }

        self.registered.store(false, Ordering::SeqCst);
        inner.dialog = None;
        self.set_state(RegistrationState::Unregistered);
        drop(inner);

        self.listener.on_registration_terminated().await;
    }

    /// Stop then register again, on a separate task
    pub fn restart(&self) -> Option<JoinHandle<()>> {
        let manager = self.self_ref.upgrade()?;
        Some(tokio::spawn(async move {
            info!("Restarting registration");
            manager.stop_registration().await;
            manager.register().await;
        }))
    }

    /// Send REGISTER (or un-REGISTER) until a terminal outcome
    async fn exchange(&self, inner: &mut RegistrationInner, unregister: bool) -> ImsResult<()> {
        loop {
            let dialog = inner
                .dialog
                .as_ref()
                .ok_or_else(|| ImsError::Internal("no registration dialog".to_string()))?;
            let expiry = if unregister { 0 } else { self.expiry() };
            let mut request = factory::create_register(
                dialog,
                self.transport.local_address(),
                expiry,
                self.settings.instance_id.as_deref(),
                &self.settings.feature_tags,
            )?;
            self.procedure.write_security_header(&mut request).map_err(|e| {
                ImsError::registration(RegistrationErrorCode::RegistrationFailed, e.to_string())
            })?;

            let timeout = self.settings.sip_transaction_timeout();
            let response = match tokio::time::timeout(timeout, self.transport.send_request(request)).await {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => {
                    return Err(ImsError::registration(
                        RegistrationErrorCode::RegistrationFailed,
                        format!("REGISTER not sent: {}", e),
                    ));
                }
                Err(_) => {
                    return Err(ImsError::registration(
                        RegistrationErrorCode::RegistrationFailed,
                        format!("no response to REGISTER within {:?}", timeout),
                    ));
                }
            };

            debug!(status = response.status_code(), cseq = response.cseq_number(), "REGISTER response");
            match self.handle_response(inner, &response, unregister) {
                Step::Resend => {
                    if let Some(dialog) = inner.dialog.as_mut() {
                        dialog.increment_cseq();
                    }
                }
                Step::Done => return Ok(()),
                Step::Fail(e) => return Err(e),
            }
        }
    }

    fn handle_response(&self, inner: &mut RegistrationInner, response: &Response, unregister: bool) -> Step {
        match response.status_code() {
            status::OK if unregister => {
                self.handle_200_ok_unregister();
                Step::Done
            }
            status::OK => {
                self.handle_200_ok(response);
                Step::Done
            }
            status::MOVED_TEMPORARILY => self.handle_302(inner, response),
            status::UNAUTHORIZED => self.handle_401(inner, response),
            status::INTERVAL_TOO_BRIEF if unregister => Step::Fail(ImsError::registration(
                RegistrationErrorCode::UnexpectedResponse,
                "423 to un-REGISTER",
            )),
            status::INTERVAL_TOO_BRIEF => self.handle_423(response),
            status::NOT_FOUND
            | status::REQUEST_TIMEOUT
            | status::TEMPORARILY_UNAVAILABLE
            | status::SERVER_INTERNAL_ERROR
            | status::SERVICE_UNAVAILABLE
            | status::SERVER_TIMEOUT
            | status::BUSY_EVERYWHERE => self.handle_4xx5xx6xx(inner, response),
            other => Step::Fail(ImsError::registration(
                RegistrationErrorCode::RegistrationFailed,
                format!("unexpected REGISTER response {} {}", other, response.reason_phrase()),
            )),
        }
    }

    fn handle_200_ok(&self, response: &Response) {
        let local = self.transport.local_address();
        let ok = RegistrationOk::from_response(response, self.settings.instance_id.as_deref(), local);

        if let Err(e) = self.procedure.read_security_header(response) {
            warn!(error = %e, "Could not read security header from 200 OK");
        }

        let expiry = ok.granted_expiry.unwrap_or_else(|| self.expiry());
        if ok.nat.behind_nat {
            info!(
                public_address = ok.nat.public_address.as_deref().unwrap_or_default(),
                public_port = ok.nat.public_port.unwrap_or_default(),
                "NAT detected"
            );
        }

        {
            let mut info = self.info.write();
            info.associated_uris = ok.associated_uris;
            info.public_gruu = ok.public_gruu;
            info.temp_gruu = ok.temp_gruu;
            info.service_route = ok.service_route;
            info.nat = ok.nat;
            info.effective_expiry = Some(expiry);
            info.retry_after = None;
        }

        self.registered.store(true, Ordering::SeqCst);
        self.set_state(RegistrationState::Registered);

        let now = Instant::now();
        let period = Duration::from_secs(expiry as u64);
        if expiry <= SHORT_EXPIRY_THRESHOLD_SECS {
            self.refresher.start_timer_with_fraction(now, period, 0.5);
        } else {
            self.refresher.start_timer(now, refresh_delay(expiry));
        }
        info!(expiry, refresh_in_secs = refresh_delay(expiry).as_secs_f64(), "Registered");
    }

    fn handle_200_ok_unregister(&self) {
        debug!("200 OK to un-REGISTER");
        let mut info = self.info.write();
        info.nat = NatStatus::default();
        info.effective_expiry = None;
    }

    fn handle_302(&self, inner: &mut RegistrationInner, response: &Response) -> Step {
        let target = contact_addresses(response.typed_headers())
            .first()
            .map(|c| c.uri.to_string());
        let Some(target) = target else {
            return Step::Fail(ImsError::registration(
                RegistrationErrorCode::UnexpectedResponse,
                "302 without Contact",
            ));
        };
        info!(uri = %target, "REGISTER redirected");
        if let Some(dialog) = inner.dialog.as_mut() {
            dialog.set_target(target);
        }
        Step::Resend
    }

    fn handle_401(&self, inner: &mut RegistrationInner, response: &Response) -> Step {
        inner.nb_401_failures += 1;
        if inner.nb_401_failures >= MAX_401_FAILURES {
            return Step::Fail(ImsError::registration(
                RegistrationErrorCode::TooMany401,
                "too many 401",
            ));
        }
        debug!(count = inner.nb_401_failures, "401 Unauthorized, answering challenge");
        match self.procedure.read_security_header(response) {
            Ok(()) => Step::Resend,
            Err(e) => Step::Fail(ImsError::registration(
                RegistrationErrorCode::UnexpectedResponse,
                format!("unusable challenge: {}", e),
            )),
        }
    }

    fn handle_423(&self, response: &Response) -> Step {
        let min_expires = response
            .header_text(headers::MIN_EXPIRES)
            .and_then(|v| headers::parse_delta_seconds(&v))
            .filter(|v| *v > 0);
        let Some(min_expires) = min_expires else {
            return Step::Fail(ImsError::registration(
                RegistrationErrorCode::UnexpectedResponse,
                "423 without Min-Expires",
            ));
        };
        info!(min_expires, "Interval too brief, adopting Min-Expires");
        self.expiry.store(min_expires, Ordering::SeqCst);
        Step::Resend
    }

    fn handle_4xx5xx6xx(&self, inner: &mut RegistrationInner, response: &Response) -> Step {
        let retry_after = response
            .header_text(headers::RETRY_AFTER)
            .and_then(|v| headers::parse_delta_seconds(&v))
            .filter(|v| *v > 0);
        if let Some(secs) = retry_after {
            let duration = Duration::from_secs(secs as u64);
            self.info.write().retry_after = Some(duration);
            return Step::Fail(ImsError::registration(
                RegistrationErrorCode::RetryAfter,
                format!("{} {}, retry after {}s", response.status_code(), response.reason_phrase(), secs),
            ));
        }

        inner.nb_4xx5xx6xx_failures += 1;
        if inner.nb_4xx5xx6xx_failures >= MAX_4XX5XX6XX_FAILURES {
            return Step::Fail(ImsError::registration(
                RegistrationErrorCode::TooMany4xx5xx6xx,
                "too many 4xx/5xx/6xx",
            ));
        }
        debug!(
            status = response.status_code(),
            count = inner.nb_4xx5xx6xx_failures,
            "REGISTER rejected, resending"
        );
        Step::Resend
    }

    /// Single funnel for terminal registration failures
    async fn handle_error(&self, mut inner: MutexGuard<'_, RegistrationInner>, error: ImsError) {
        error!(error = %error, "Registration failed");
        self.registered.store(false, Ordering::SeqCst);
        self.control.lock().need_unregister = false;
        self.refresher.stop_timer();
        inner.dialog = None;
        self.set_state(RegistrationState::Failed);
        drop(inner);

        self.listener.on_registration_failed(error).await;
    }
}

#[async_trait]
impl PeriodicProcessor for RegistrationManager {
    async fn periodic_processing(&self) {
        self.refresh().await;
    }
}

impl std::fmt::Debug for RegistrationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationManager")
            .field("state", &self.state())
            .field("expiry", &self.expiry())
            .field("refresher", &self.refresher)
            .finish()
    }
}
