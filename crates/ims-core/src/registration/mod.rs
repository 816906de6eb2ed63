//! Registration with the IMS network
//!
//! - [`manager`]: the REGISTER/re-REGISTER/un-REGISTER state machine
//! - [`procedure`]: security procedures (Digest, early-IMS)
//! - [`response`]: 200 OK extraction and refresh scheduling math
//!
//! # Usage
//!
//! ```rust
//! use ims_core::error::ImsError;
//! use ims_core::registration::RegistrationListener;
//! use async_trait::async_trait;
//!
//! struct Printer;
//!
//! #[async_trait]
//! impl RegistrationListener for Printer {
//!     async fn on_registration_successful(&self) {
//!         println!("registered");
//!     }
//!
//!     async fn on_registration_failed(&self, error: ImsError) {
//!         println!("registration failed: {}", error);
//!     }
//!
//!     async fn on_registration_terminated(&self) {
//!         println!("unregistered");
//!     }
//! }
//! ```

pub mod manager;
pub mod procedure;
pub mod response;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ImsError;

pub use manager::{RegistrationInfo, RegistrationManager, MAX_401_FAILURES, MAX_4XX5XX6XX_FAILURES};
pub use procedure::{
    procedure_for, DigestRegistrationProcedure, GibaRegistrationProcedure, RegistrationProcedure,
};
pub use response::{refresh_delay, NatStatus, RegistrationOk};

/// Registration state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegistrationState {
    Unregistered,
    Registering,
    Registered,
    Unregistering,
    Failed,
}

impl fmt::Display for RegistrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RegistrationState::Unregistered => "Unregistered",
            RegistrationState::Registering => "Registering",
            RegistrationState::Registered => "Registered",
            RegistrationState::Unregistering => "Unregistering",
            RegistrationState::Failed => "Failed",
        };
        f.write_str(name)
    }
}

/// Receives registration outcomes
///
/// Called after the manager released its lock, so implementations may call
/// back into the manager.
#[async_trait]
pub trait RegistrationListener: Send + Sync {
    async fn on_registration_successful(&self);

    /// Terminal failure; the error carries a [`crate::error::RegistrationErrorCode`]
    async fn on_registration_failed(&self, error: ImsError);

    /// Registration ended by `stop_registration` or un-REGISTER
    async fn on_registration_terminated(&self);
}
