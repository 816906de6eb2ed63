//! # IMS-Core - client-side IMS signaling engine
//!
//! Keeps a device registered with an IP Multimedia Subsystem network and
//! manages the sessions running over that registration:
//!
//! - [`registration`]: REGISTER / re-REGISTER / un-REGISTER with retry,
//!   back-off and NAT detection
//! - [`refresher`]: cancelable single-shot timers driving periodic work
//! - [`session`]: session lifecycle, per-service registries with capacity
//!   limits, re-INVITE renegotiation
//! - [`capability`]: periodic refresh of per-contact capabilities
//! - [`engine`]: [`ImsCore`], wiring it all together
//!
//! Sockets and transactions stay below the [`sip::SipTransport`] trait.
//! Messages are `rvoip-sip-core` values; the [`sip`] module adds the
//! builders, header lookups and Digest computation the engine needs.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ims_core::prelude::*;
//!
//! # async fn run(
//! #     transport: Arc<dyn SipTransport>,
//! #     listener: Arc<dyn RegistrationListener>,
//! #     contacts: Arc<dyn ContactStore>,
//! #     requester: Arc<dyn CapabilityRequester>,
//! # ) -> ImsResult<()> {
//! let settings = ImsSettings::new("ims.example.com", "sip:+33600000000@ims.example.com")
//!     .with_instance_id("<urn:gsma:imei:35-209900-176148-1>");
//! let core = ImsCore::new(settings, transport, listener, contacts, requester)?;
//! core.install_logging()?;
//! if core.start().await? {
//!     println!("registered, GRUU {:?}", core.registration().public_gruu());
//! }
//! core.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod capability;
pub mod config;
pub mod dialog;
pub mod engine;
pub mod error;
pub mod logging;
pub mod refresher;
pub mod registration;
pub mod session;
pub mod sip;

pub use config::ImsSettings;
pub use engine::ImsCore;
pub use error::{ImsError, ImsResult, RegistrationErrorCode, SessionErrorCode};

pub mod prelude {
    pub use crate::capability::{
        Capabilities, CapabilityPollingManager, CapabilityRequester, CapabilitySnapshot, ContactId, ContactStore,
    };
    pub use crate::config::{ImsSettings, RegistrationProcedureKind};
    pub use crate::engine::ImsCore;
    pub use crate::dialog::DialogPath;
    pub use crate::error::{ImsError, ImsResult, RegistrationErrorCode, SessionErrorCode};
    pub use crate::logging::{setup_logging, LoggingConfig};
    pub use crate::refresher::{PeriodicProcessor, PeriodicRefresher};
    pub use crate::registration::{RegistrationListener, RegistrationManager, RegistrationState};
    pub use crate::session::{
        ImsServiceSession, ImsSession, InvitationAnswer, ReInviteContext, ReInviteOutcome, SessionCategory,
        SessionKind, SessionListener, SessionRegistry, SessionState, SessionUpdateManager,
    };
    pub use crate::sip::{Request, Response, SipMessageExt, SipTransport};
}
