//! Session object shared by every service

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::ImsSettings;
use crate::dialog::DialogPath;
use crate::error::{ImsError, ImsResult};
use crate::session::update::{ReInviteOutcome, SessionUpdateManager};
use crate::session::{check_transition, ImsSession, SessionKind, SessionListener, SessionState};
use crate::sip::auth::DigestAuthenticationAgent;
use crate::sip::transport::SipTransport;

/// A live session: identity, lifecycle, optional dialog and renegotiation
///
/// Built with the `with_*` methods, then shared as `Arc<ImsServiceSession>`.
pub struct ImsServiceSession {
    session_id: String,
    kind: SessionKind,
    state: RwLock<SessionState>,
    dialog: Option<Arc<Mutex<DialogPath>>>,
    proxy_auth: Option<DigestAuthenticationAgent>,
    feature_tags: Vec<String>,
    listener: Option<Arc<dyn SessionListener>>,
    update: SessionUpdateManager,
}

impl ImsServiceSession {
    pub fn new(kind: SessionKind, transport: Arc<dyn SipTransport>, settings: Arc<ImsSettings>) -> Self {
        let feature_tags = settings.feature_tags.clone();
        Self {
            session_id: Uuid::new_v4().to_string(),
            kind,
            state: RwLock::new(SessionState::Initiated),
            dialog: None,
            proxy_auth: None,
            feature_tags,
            listener: None,
            update: SessionUpdateManager::new(transport, settings),
        }
    }

    /// Session carried over a SIP dialog
    pub fn with_dialog(mut self, dialog: DialogPath) -> Self {
        self.dialog = Some(Arc::new(Mutex::new(dialog)));
        self
    }

    /// Credentials for 407 challenges from the outbound proxy
    pub fn with_proxy_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.proxy_auth = Some(DigestAuthenticationAgent::new(username, password));
        self
    }

    pub fn with_feature_tags(mut self, tags: Vec<String>) -> Self {
        self.feature_tags = tags;
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn SessionListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn dialog(&self) -> Option<&Arc<Mutex<DialogPath>>> {
        self.dialog.as_ref()
    }

    pub fn proxy_auth(&self) -> Option<&DigestAuthenticationAgent> {
        self.proxy_auth.as_ref()
    }

    pub fn feature_tags(&self) -> &[String] {
        &self.feature_tags
    }

    pub fn update_manager(&self) -> &SessionUpdateManager {
        &self.update
    }

    /// Move to `to`, notifying the listener on change
    ///
    /// Setting the current state again is a no-op.
    pub async fn set_state(&self, to: SessionState) -> ImsResult<()> {
        let from = {
            let mut state = self.state.write();
            let from = *state;
            if from == to {
                return Ok(());
            }
            check_transition(from, to)?;
            *state = to;
            from
        };
        debug!(session_id = %self.session_id, %from, %to, "Session state change");

        if matches!(to, SessionState::Terminated | SessionState::Aborted) {
            if let Some(dialog) = &self.dialog {
                dialog.lock().set_session_cancelled();
            }
        } else if to == SessionState::Started {
            if let Some(dialog) = &self.dialog {
                dialog.lock().set_session_established();
            }
        }

        if let Some(listener) = &self.listener {
            listener.on_state_changed(&self.session_id, from, to).await;
        }
        Ok(())
    }

    pub(crate) async fn notify_updated(&self, outcome: ReInviteOutcome) {
        if let Some(listener) = &self.listener {
            listener.on_session_updated(&self.session_id, outcome).await;
        }
    }

    pub(crate) async fn notify_error(&self, error: ImsError) {
        warn!(session_id = %self.session_id, error = %error, "Session error");
        if let Some(listener) = &self.listener {
            listener.on_session_error(&self.session_id, error).await;
        }
    }
}

impl ImsSession for ImsServiceSession {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    fn kind(&self) -> &SessionKind {
        &self.kind
    }

    fn dialog_call_id(&self) -> Option<String> {
        self.dialog.as_ref().map(|d| d.lock().call_id().to_string())
    }

    fn state(&self) -> SessionState {
        *self.state.read()
    }
}

impl std::fmt::Debug for ImsServiceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImsServiceSession")
            .field("session_id", &self.session_id)
            .field("kind", &self.kind)
            .field("state", &self.state())
            .field("dialog", &self.dialog_call_id())
            .finish()
    }
}
