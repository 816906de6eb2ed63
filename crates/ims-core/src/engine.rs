//! IMS engine
//!
//! [`ImsCore`] wires the settings, the registration manager, the per-service
//! session registries and capability polling, and starts/stops them together.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::info;

use crate::capability::{CapabilityPollingManager, CapabilityRequester, ContactStore};
use crate::config::ImsSettings;
use crate::error::{ImsError, ImsResult};
use crate::logging::{setup_logging, LoggingConfig};
use crate::registration::{procedure_for, RegistrationListener, RegistrationManager};
use crate::session::{ImsSession, SessionRegistry, SessionTracker};
use crate::sip::transport::SipTransport;

pub struct ImsCore {
    settings: Arc<ImsSettings>,
    transport: Arc<dyn SipTransport>,
    registration: Arc<RegistrationManager>,
    tracker: Arc<SessionTracker>,
    chat_sessions: SessionRegistry,
    file_transfer_sessions: SessionRegistry,
    capability_polling: Arc<CapabilityPollingManager>,
    started: AtomicBool,
}

impl ImsCore {
    /// Validate `settings` and build every component
    pub fn new(
        settings: ImsSettings,
        transport: Arc<dyn SipTransport>,
        listener: Arc<dyn RegistrationListener>,
        contacts: Arc<dyn ContactStore>,
        requester: Arc<dyn CapabilityRequester>,
    ) -> ImsResult<Self> {
        settings.validate()?;
        let settings = Arc::new(settings);
        let procedure = procedure_for(&settings)?;

        let registration = RegistrationManager::new(
            Arc::clone(&settings),
            Arc::clone(&transport),
            procedure,
            listener,
        );
        let tracker = Arc::new(SessionTracker::new());
        let chat_sessions = SessionRegistry::for_chat(&settings, Arc::clone(&tracker));
        let file_transfer_sessions = SessionRegistry::for_file_transfer(&settings, Arc::clone(&tracker));
        let capability_polling = CapabilityPollingManager::new(Arc::clone(&settings), contacts, requester);

        Ok(Self {
            settings,
            transport,
            registration,
            tracker,
            chat_sessions,
            file_transfer_sessions,
            capability_polling,
            started: AtomicBool::new(false),
        })
    }

    /// Install the global subscriber at the settings' log level and format
    ///
    /// Fails when the process already has a subscriber.
    pub fn install_logging(&self) -> ImsResult<()> {
        setup_logging(&LoggingConfig::from_settings(&self.settings)?)
    }

    /// Register, then start capability polling
    ///
    /// Returns whether the initial registration succeeded; polling starts
    /// either way so it is ready once a later registration succeeds.
    pub async fn start(&self) -> ImsResult<bool> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ImsError::Internal("IMS core already started".to_string()));
        }
        info!(home_domain = %self.settings.home_domain, "Starting IMS core");
        let registered = self.registration.register().await;
        self.capability_polling.start();
        Ok(registered)
    }

    /// Stop polling and un-REGISTER
    pub async fn stop(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("Stopping IMS core");
        self.capability_polling.stop();
        self.registration.unregistration().await;
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn settings(&self) -> &Arc<ImsSettings> {
        &self.settings
    }

    pub fn transport(&self) -> &Arc<dyn SipTransport> {
        &self.transport
    }

    pub fn registration(&self) -> &Arc<RegistrationManager> {
        &self.registration
    }

    pub fn chat_sessions(&self) -> &SessionRegistry {
        &self.chat_sessions
    }

    pub fn file_transfer_sessions(&self) -> &SessionRegistry {
        &self.file_transfer_sessions
    }

    pub fn capability_polling(&self) -> &Arc<CapabilityPollingManager> {
        &self.capability_polling
    }

    /// Session owning the dialog `call_id`, whichever service holds it
    pub fn session_by_call_id(&self, call_id: &str) -> ImsResult<Arc<dyn ImsSession>> {
        self.tracker
            .by_call_id(call_id)
            .ok_or_else(|| ImsError::SessionNotFound(call_id.to_string()))
    }
}

impl std::fmt::Debug for ImsCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImsCore")
            .field("started", &self.is_started())
            .field("registration", &self.registration)
            .field("chat_sessions", &self.chat_sessions)
            .field("file_transfer_sessions", &self.file_transfer_sessions)
            .finish()
    }
}
