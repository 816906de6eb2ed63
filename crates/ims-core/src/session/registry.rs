//! Per-service session registry
//!
//! One [`SessionRegistry`] per owning service (chat, file transfer). All of
//! the service's categories live behind one lock, so a limit spanning several
//! categories is checked and enforced atomically.
//!
//! Removal is deferred to a spawned task: lookups already in flight complete
//! against the entry, and the task takes the same lock before mutating.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::ImsSettings;
use crate::error::{ImsError, ImsResult};
use crate::session::tracker::SessionTracker;
use crate::session::{ImsSession, SessionCategory, SessionKind};

/// Maximum combined occupancy of a set of categories; 0 is unlimited
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapacityLimit {
    pub categories: Vec<SessionCategory>,
    pub max: usize,
}

impl CapacityLimit {
    pub fn new(categories: impl Into<Vec<SessionCategory>>, max: usize) -> Self {
        Self {
            categories: categories.into(),
            max,
        }
    }

    fn covers(&self, categories: &[SessionCategory]) -> bool {
        categories.iter().any(|c| self.categories.contains(c))
    }

    fn admits(&self, sessions: &HashMap<SessionKind, Arc<dyn ImsSession>>) -> bool {
        if self.max == 0 {
            return true;
        }
        let occupancy = sessions
            .keys()
            .filter(|k| self.categories.contains(&k.category()))
            .count();
        occupancy < self.max
    }
}

pub struct SessionRegistry {
    name: String,
    sessions: Arc<Mutex<HashMap<SessionKind, Arc<dyn ImsSession>>>>,
    limits: Vec<CapacityLimit>,
    tracker: Arc<SessionTracker>,
}

impl SessionRegistry {
    pub fn new(name: impl Into<String>, tracker: Arc<SessionTracker>) -> Self {
        Self {
            name: name.into(),
            sessions: Arc::new(Mutex::new(HashMap::new())),
            limits: Vec::new(),
            tracker,
        }
    }

    pub fn with_limit(mut self, limit: CapacityLimit) -> Self {
        self.limits.push(limit);
        self
    }

    /// Registry of the messaging service: 1-1 chat, group chat, conference subscriptions
    pub fn for_chat(settings: &ImsSettings, tracker: Arc<SessionTracker>) -> Self {
        Self::new("chat", tracker).with_limit(CapacityLimit::new(
            [SessionCategory::OneToOneChat, SessionCategory::GroupChat],
            settings.max_chat_sessions,
        ))
    }

    /// Registry of the file transfer service: transfers and HTTP uploads
    pub fn for_file_transfer(settings: &ImsSettings, tracker: Arc<SessionTracker>) -> Self {
        Self::new("file_transfer", tracker).with_limit(CapacityLimit::new(
            [SessionCategory::FileTransfer, SessionCategory::FileUpload],
            settings.max_file_transfer_sessions,
        ))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tracker(&self) -> &Arc<SessionTracker> {
        &self.tracker
    }

    /// Register `session` under its key
    pub fn add(&self, session: Arc<dyn ImsSession>) -> ImsResult<()> {
        let mut sessions = self.sessions.lock();
        self.insert(&mut sessions, session)
    }

    /// Check capacity and register in one step
    pub fn add_if_available(&self, session: Arc<dyn ImsSession>) -> ImsResult<()> {
        let mut sessions = self.sessions.lock();
        self.check_capacity(&sessions, &[session.category()])?;
        self.insert(&mut sessions, session)
    }

    fn insert(
        &self,
        sessions: &mut HashMap<SessionKind, Arc<dyn ImsSession>>,
        session: Arc<dyn ImsSession>,
    ) -> ImsResult<()> {
        let key = session.kind().clone();
        if sessions.contains_key(&key) {
            return Err(ImsError::SessionAlreadyExists(key.to_string()));
        }
        debug!(registry = %self.name, key = %key, session_id = session.session_id(), "Adding session");
        self.tracker.track(Arc::clone(&session));
        sessions.insert(key, session);
        Ok(())
    }

    /// Remove `session` on a background task
    ///
    /// Only the entry still holding this very session is removed.
    pub fn remove(&self, session: Arc<dyn ImsSession>) -> JoinHandle<()> {
        let sessions = Arc::clone(&self.sessions);
        let tracker = Arc::clone(&self.tracker);
        let name = self.name.clone();
        tokio::spawn(async move {
            let mut sessions = sessions.lock();
            let key = session.kind();
            let same = sessions
                .get(key)
                .is_some_and(|current| current.session_id() == session.session_id());
            if same {
                sessions.remove(key);
                tracker.untrack(session.as_ref());
                debug!(registry = %name, key = %key, "Removed session");
            } else {
                debug!(registry = %name, key = %key, "Session already gone");
            }
        })
    }

    pub fn get(&self, key: &SessionKind) -> Option<Arc<dyn ImsSession>> {
        self.sessions.lock().get(key).cloned()
    }

    /// Like [`get`](Self::get), with a not-found error
    pub fn session(&self, key: &SessionKind) -> ImsResult<Arc<dyn ImsSession>> {
        self.get(key)
            .ok_or_else(|| ImsError::SessionNotFound(key.to_string()))
    }

    /// Room for one more session of `categories` under every limit covering them
    pub fn is_available(&self, categories: &[SessionCategory]) -> bool {
        let sessions = self.sessions.lock();
        self.check_capacity(&sessions, categories).is_ok()
    }

    pub fn assert_available(&self, categories: &[SessionCategory]) -> ImsResult<()> {
        let sessions = self.sessions.lock();
        self.check_capacity(&sessions, categories)
    }

    fn check_capacity(
        &self,
        sessions: &HashMap<SessionKind, Arc<dyn ImsSession>>,
        categories: &[SessionCategory],
    ) -> ImsResult<()> {
        for limit in self.limits.iter().filter(|l| l.covers(categories)) {
            if !limit.admits(sessions) {
                info!(registry = %self.name, max = limit.max, "Session limit reached");
                return Err(ImsError::CapacityExceeded {
                    categories: limit.categories.clone(),
                    max: limit.max,
                });
            }
        }
        Ok(())
    }

    pub fn count(&self, category: SessionCategory) -> usize {
        self.sessions
            .lock()
            .keys()
            .filter(|k| k.category() == category)
            .count()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// Snapshot of the live sessions
    pub fn sessions(&self) -> Vec<Arc<dyn ImsSession>> {
        self.sessions.lock().values().cloned().collect()
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("name", &self.name)
            .field("sessions", &self.len())
            .field("limits", &self.limits)
            .finish()
    }
}
