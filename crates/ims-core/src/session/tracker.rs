//! Session tracker
//!
//! Routes inbound traffic to live sessions: dialog sessions by call-id,
//! dialog-less sessions (HTTP transfers) by session id.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::session::ImsSession;

#[derive(Debug, Default)]
pub struct SessionTracker {
    dialogs: DashMap<String, Arc<dyn ImsSession>>,
    dialogless: DashMap<String, Arc<dyn ImsSession>>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&self, session: Arc<dyn ImsSession>) {
        match session.dialog_call_id() {
            Some(call_id) => {
                debug!(call_id = %call_id, session_id = session.session_id(), "Tracking dialog session");
                self.dialogs.insert(call_id, session);
            }
            None => {
                debug!(session_id = session.session_id(), "Tracking dialog-less session");
                self.dialogless.insert(session.session_id().to_string(), session);
            }
        }
    }

    /// Forget `session`; entries since replaced by another session are kept
    pub fn untrack(&self, session: &dyn ImsSession) {
        let id = session.session_id();
        match session.dialog_call_id() {
            Some(call_id) => {
                self.dialogs.remove_if(&call_id, |_, s| s.session_id() == id);
            }
            None => {
                self.dialogless.remove(id);
            }
        }
    }

    pub fn by_call_id(&self, call_id: &str) -> Option<Arc<dyn ImsSession>> {
        self.dialogs.get(call_id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn by_session_id(&self, session_id: &str) -> Option<Arc<dyn ImsSession>> {
        self.dialogless
            .get(session_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn dialog_count(&self) -> usize {
        self.dialogs.len()
    }

    pub fn dialogless_count(&self) -> usize {
        self.dialogless.len()
    }
}
