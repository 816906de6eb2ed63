//! Engine settings
//!
//! [`ImsSettings`] is the "settings" collaborator of every manager in this
//! crate. It is a plain value, usually wrapped in an `Arc` and handed to each
//! component at construction time.
//!
//! ```rust
//! use ims_core::config::{ImsSettings, RegistrationProcedureKind};
//!
//! let settings = ImsSettings::new("ims.example.com", "sip:+33600000000@ims.example.com")
//!     .with_instance_id("<urn:gsma:imei:35000000-000000-0>")
//!     .with_registration_expiry(3600)
//!     .with_credentials("+33600000000@ims.example.com", "secret")
//!     .with_procedure(RegistrationProcedureKind::Digest);
//!
//! assert_eq!(settings.registration_expiry_secs, 3600);
//! assert!(settings.validate().is_ok());
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ImsError, ImsResult};

/// How the device authenticates its REGISTER requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationProcedureKind {
    /// HTTP Digest (401 challenge / Authorization header)
    Digest,
    /// Early-IMS / GIBA: the network authenticates the bearer, no credentials
    Giba,
}

/// All tunables consumed by ims-core
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImsSettings {
    /// Home network domain, REGISTER requests target `sip:<home_domain>`
    pub home_domain: String,

    /// Public user identity (IMPU), used in From/To
    pub public_uri: String,

    /// Private user identity (IMPI), used as digest username
    pub private_id: Option<String>,

    /// Digest password
    pub password: Option<String>,

    /// Device instance id, sent as `+sip.instance` and used to match GRUUs
    pub instance_id: Option<String>,

    /// Requested registration lifetime in seconds
    pub registration_expiry_secs: u32,

    /// Upper bound on any "send and wait for response" exchange
    pub sip_transaction_timeout_ms: u64,

    /// Feature tags advertised in REGISTER Contact
    pub feature_tags: Vec<String>,

    pub procedure: RegistrationProcedureKind,

    /// Max concurrent 1-1 plus group chat sessions, 0 means unlimited
    pub max_chat_sessions: usize,

    /// Max concurrent file transfer plus upload sessions, 0 means unlimited
    pub max_file_transfer_sessions: usize,

    /// How long an invited party may take to accept or reject
    pub ringing_period_ms: u64,

    /// A capability snapshot older than this is stale
    pub capability_expiry_window_ms: i64,

    /// Interval between capability rescans, 0 disables polling
    pub capability_polling_period_ms: u64,

    /// Level for this crate's events when ims-core installs the subscriber
    pub log_level: String,

    pub log_json: bool,
}

impl Default for ImsSettings {
    fn default() -> Self {
        Self {
            home_domain: String::new(),
            public_uri: String::new(),
            private_id: None,
            password: None,
            instance_id: None,
            registration_expiry_secs: 3600,
            sip_transaction_timeout_ms: 30_000,
            feature_tags: Vec::new(),
            procedure: RegistrationProcedureKind::Giba,
            max_chat_sessions: 20,
            max_file_transfer_sessions: 10,
            ringing_period_ms: 120_000,
            capability_expiry_window_ms: 86_400_000,
            capability_polling_period_ms: 3_600_000,
            log_level: "info".to_string(),
            log_json: false,
        }
    }
}

impl ImsSettings {
    /// Settings for a home domain and public identity, everything else default
    pub fn new(home_domain: impl Into<String>, public_uri: impl Into<String>) -> Self {
        Self {
            home_domain: home_domain.into(),
            public_uri: public_uri.into(),
            ..Default::default()
        }
    }

    /// Load settings from a JSON document, missing fields take their defaults
    pub fn from_json_str(json: &str) -> ImsResult<Self> {
        let settings: ImsSettings = serde_json::from_str(json)
            .map_err(|e| ImsError::Config(format!("Invalid settings document: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn with_credentials(mut self, private_id: impl Into<String>, password: impl Into<String>) -> Self {
        self.private_id = Some(private_id.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = Some(instance_id.into());
        self
    }

    pub fn with_registration_expiry(mut self, secs: u32) -> Self {
        self.registration_expiry_secs = secs;
        self
    }

    pub fn with_sip_timeout(mut self, timeout: Duration) -> Self {
        self.sip_transaction_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_feature_tags(mut self, tags: Vec<String>) -> Self {
        self.feature_tags = tags;
        self
    }

    pub fn with_procedure(mut self, procedure: RegistrationProcedureKind) -> Self {
        self.procedure = procedure;
        self
    }

    pub fn with_max_chat_sessions(mut self, max: usize) -> Self {
        self.max_chat_sessions = max;
        self
    }

    pub fn with_max_file_transfer_sessions(mut self, max: usize) -> Self {
        self.max_file_transfer_sessions = max;
        self
    }

    pub fn with_ringing_period(mut self, period: Duration) -> Self {
        self.ringing_period_ms = period.as_millis() as u64;
        self
    }

    pub fn with_capability_expiry_window(mut self, window: Duration) -> Self {
        self.capability_expiry_window_ms = window.as_millis() as i64;
        self
    }

    pub fn with_capability_polling_period(mut self, period: Duration) -> Self {
        self.capability_polling_period_ms = period.as_millis() as u64;
        self
    }

    pub fn sip_transaction_timeout(&self) -> Duration {
        Duration::from_millis(self.sip_transaction_timeout_ms)
    }

    pub fn ringing_period(&self) -> Duration {
        Duration::from_millis(self.ringing_period_ms)
    }

    pub fn capability_polling_period(&self) -> Duration {
        Duration::from_millis(self.capability_polling_period_ms)
    }

    /// `sip:<home_domain>`, the REGISTER request target
    pub fn home_domain_uri(&self) -> String {
        format!("sip:{}", self.home_domain)
    }

    /// Check the settings are usable
    pub fn validate(&self) -> ImsResult<()> {
        if self.home_domain.trim().is_empty() {
            return Err(ImsError::Config("home_domain cannot be empty".to_string()));
        }
        if self.public_uri.trim().is_empty() {
            return Err(ImsError::Config("public_uri cannot be empty".to_string()));
        }
        if self.registration_expiry_secs == 0 {
            return Err(ImsError::Config(
                "registration_expiry_secs must be positive".to_string(),
            ));
        }
        if self.sip_transaction_timeout_ms == 0 {
            return Err(ImsError::Config(
                "sip_transaction_timeout_ms must be positive".to_string(),
            ));
        }
        if self.capability_expiry_window_ms < 0 {
            return Err(ImsError::Config(
                "capability_expiry_window_ms cannot be negative".to_string(),
            ));
        }
        crate::logging::parse_log_level(&self.log_level)?;
        if self.procedure == RegistrationProcedureKind::Digest
            && (self.private_id.is_none() || self.password.is_none())
        {
            return Err(ImsError::Config(
                "digest procedure requires private_id and password".to_string(),
            ));
        }
        Ok(())
    }
}
