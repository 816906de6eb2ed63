//! Contact capabilities
//!
//! A [`CapabilitySnapshot`] is what we last learnt about one contact's
//! features, stamped with the time of the network response. Snapshots live in
//! an external [`ContactStore`] and are always replaced whole.
//! [`CapabilityPollingManager`] rescans them periodically and queries the
//! stale ones through a [`CapabilityRequester`].

pub mod polling;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ImsResult;

pub use polling::{needs_refresh, CapabilityPollingManager, PollReport};

/// Identity of a remote contact (normalized phone number or SIP URI)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContactId(String);

impl ContactId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContactId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Features a contact's device advertised
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Capabilities {
    pub im_session: bool,
    pub file_transfer: bool,
    pub file_transfer_http: bool,
    pub image_sharing: bool,
    pub video_sharing: bool,
    pub geoloc_push: bool,
    pub ip_voice_call: bool,
    pub ip_video_call: bool,
    /// Discovery through presence instead of OPTIONS
    pub presence_discovery: bool,
    pub social_presence: bool,
}

/// Capabilities plus the time of the response they came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySnapshot {
    pub capabilities: Capabilities,
    /// Milliseconds since the Unix epoch
    pub timestamp_last_response: i64,
}

impl CapabilitySnapshot {
    pub fn new(capabilities: Capabilities, timestamp_last_response: i64) -> Self {
        Self {
            capabilities,
            timestamp_last_response,
        }
    }
}

/// Persistent contact storage
#[async_trait]
pub trait ContactStore: Send + Sync {
    async fn contacts(&self) -> ImsResult<Vec<ContactId>>;

    async fn capabilities(&self, contact: &ContactId) -> ImsResult<Option<CapabilitySnapshot>>;

    /// Replace the snapshot of `contact`
    async fn set_capabilities(&self, contact: &ContactId, snapshot: CapabilitySnapshot) -> ImsResult<()>;
}

/// Issues capability queries on the network
#[async_trait]
pub trait CapabilityRequester: Send + Sync {
    /// Direct query (SIP OPTIONS)
    async fn request_options(&self, contact: &ContactId) -> ImsResult<()>;

    /// Presence-based discovery (anonymous fetch)
    async fn request_presence(&self, contact: &ContactId) -> ImsResult<()>;
}

/// Wall clock in epoch milliseconds; injected so freshness checks are testable
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}
