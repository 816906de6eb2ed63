//! Dialog path
//!
//! A [`DialogPath`] is the state of one SIP dialog as seen from this device:
//! call identifier, local CSeq, target and parties, route set, the negotiated
//! session descriptions and two lifecycle flags. It is owned by whoever
//! created it (the registration manager, or a session) and only that owner
//! mutates it.

use rand::Rng;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialogPath {
    call_id: String,
    cseq: u32,
    target: String,
    local_party: String,
    remote_party: String,
    local_tag: String,
    remote_tag: Option<String>,
    route: Vec<String>,
    local_content: Option<String>,
    remote_content: Option<String>,
    session_established: bool,
    session_cancelled: bool,
}

impl DialogPath {
    /// New dialog with CSeq 1 and a fresh local tag
    pub fn new(
        call_id: impl Into<String>,
        target: impl Into<String>,
        local_party: impl Into<String>,
        remote_party: impl Into<String>,
        route: Vec<String>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            cseq: 1,
            target: target.into(),
            local_party: local_party.into(),
            remote_party: remote_party.into(),
            local_tag: generate_tag(),
            remote_tag: None,
            route,
            local_content: None,
            remote_content: None,
            session_established: false,
            session_cancelled: false,
        }
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn cseq(&self) -> u32 {
        self.cseq
    }

    /// Move to the next CSeq and return it
    pub fn increment_cseq(&mut self) -> u32 {
        self.cseq += 1;
        self.cseq
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn set_target(&mut self, target: impl Into<String>) {
        self.target = target.into();
    }

    pub fn local_party(&self) -> &str {
        &self.local_party
    }

    pub fn remote_party(&self) -> &str {
        &self.remote_party
    }

    pub fn local_tag(&self) -> &str {
        &self.local_tag
    }

    pub fn remote_tag(&self) -> Option<&str> {
        self.remote_tag.as_deref()
    }

    pub fn set_remote_tag(&mut self, tag: impl Into<String>) {
        self.remote_tag = Some(tag.into());
    }

    pub fn route(&self) -> &[String] {
        &self.route
    }

    pub fn set_route(&mut self, route: Vec<String>) {
        self.route = route;
    }

    pub fn local_content(&self) -> Option<&str> {
        self.local_content.as_deref()
    }

    pub fn set_local_content(&mut self, content: impl Into<String>) {
        self.local_content = Some(content.into());
    }

    pub fn remote_content(&self) -> Option<&str> {
        self.remote_content.as_deref()
    }

    pub fn set_remote_content(&mut self, content: impl Into<String>) {
        self.remote_content = Some(content.into());
    }

    pub fn is_session_established(&self) -> bool {
        self.session_established
    }

    pub fn set_session_established(&mut self) {
        self.session_established = true;
    }

    pub fn is_session_cancelled(&self) -> bool {
        self.session_cancelled
    }

    pub fn set_session_cancelled(&mut self) {
        self.session_cancelled = true;
    }
}

/// Fresh Call-ID scoped to `host`
pub fn generate_call_id(host: &str) -> String {
    format!("{}@{}", Uuid::new_v4().simple(), host)
}

/// Random From/To tag
pub fn generate_tag() -> String {
    format!("{:08x}", rand::thread_rng().r#gen::<u32>())
}

/// Random RFC 3261 branch for a new transaction
pub fn generate_branch() -> String {
    format!("z9hG4bK{}", Uuid::new_v4().simple())
}
