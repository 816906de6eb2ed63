//! Sessions over the registration
//!
//! - [`ImsServiceSession`]: a live session with its lifecycle and dialog
//! - [`SessionRegistry`]: per-service keyed store with capacity limits
//! - [`SessionTracker`]: call-id / session-id routing for inbound traffic
//! - [`SessionUpdateManager`]: re-INVITE renegotiation of an established session

pub mod base;
pub mod registry;
pub mod tracker;
pub mod update;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{ImsError, ImsResult};

pub use base::ImsServiceSession;
pub use registry::{CapacityLimit, SessionRegistry};
pub use tracker::SessionTracker;
pub use update::{InvitationAnswer, ReInviteContext, ReInviteOutcome, SessionUpdateManager};

/// Session categories, used for capacity accounting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionCategory {
    OneToOneChat,
    GroupChat,
    FileTransfer,
    FileUpload,
    ConferenceSubscription,
}

impl fmt::Display for SessionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionCategory::OneToOneChat => "one-to-one chat",
            SessionCategory::GroupChat => "group chat",
            SessionCategory::FileTransfer => "file transfer",
            SessionCategory::FileUpload => "file upload",
            SessionCategory::ConferenceSubscription => "conference subscription",
        };
        f.write_str(name)
    }
}

/// Identity a session is registered under, tagged with its category
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionKind {
    /// Keyed by the remote contact
    OneToOneChat(String),
    /// Keyed by the chat/conversation id
    GroupChat(String),
    /// Keyed by the transfer id
    FileTransfer(String),
    /// Keyed by the upload id
    FileUpload(String),
    /// Keyed by the dialog call-id
    ConferenceSubscription(String),
}

impl SessionKind {
    pub fn category(&self) -> SessionCategory {
        match self {
            SessionKind::OneToOneChat(_) => SessionCategory::OneToOneChat,
            SessionKind::GroupChat(_) => SessionCategory::GroupChat,
            SessionKind::FileTransfer(_) => SessionCategory::FileTransfer,
            SessionKind::FileUpload(_) => SessionCategory::FileUpload,
            SessionKind::ConferenceSubscription(_) => SessionCategory::ConferenceSubscription,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            SessionKind::OneToOneChat(id)
            | SessionKind::GroupChat(id)
            | SessionKind::FileTransfer(id)
            | SessionKind::FileUpload(id)
            | SessionKind::ConferenceSubscription(id) => id,
        }
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.category(), self.id())
    }
}

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    /// Created locally, nothing sent yet
    Initiated,
    /// Incoming invitation waiting for the user
    Invited,
    /// Accepted, waiting for the far end to confirm
    Accepting,
    Started,
    /// Ended before it started
    Aborted,
    /// Ended after it started
    Terminated,
    Rejected,
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Aborted | SessionState::Terminated | SessionState::Rejected | SessionState::Failed
        )
    }

    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Initiated, Invited | Accepting | Started | Aborted | Rejected | Failed) => true,
            (Invited, Accepting | Started | Aborted | Rejected | Failed) => true,
            (Accepting, Started | Aborted | Failed) => true,
            (Started, Terminated | Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Common view of a live session, whatever its category
pub trait ImsSession: Send + Sync + fmt::Debug {
    /// Unique id of this session object
    fn session_id(&self) -> &str;

    /// Key the session is registered under
    fn kind(&self) -> &SessionKind;

    fn category(&self) -> SessionCategory {
        self.kind().category()
    }

    /// Call-id of the owned dialog; `None` for dialog-less sessions
    fn dialog_call_id(&self) -> Option<String>;

    fn state(&self) -> SessionState;
}

/// Receives session events
#[async_trait]
pub trait SessionListener: Send + Sync {
    async fn on_state_changed(&self, session_id: &str, from: SessionState, to: SessionState);

    /// Result of a re-INVITE, sent or received
    async fn on_session_updated(&self, session_id: &str, outcome: ReInviteOutcome);

    /// Failure the session owner has to turn into teardown
    async fn on_session_error(&self, _session_id: &str, _error: ImsError) {}
}

pub(crate) fn check_transition(from: SessionState, to: SessionState) -> ImsResult<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(ImsError::InvalidStateTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}
