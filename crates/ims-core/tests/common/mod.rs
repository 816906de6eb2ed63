//! Shared fixtures: a scripted SIP transport and recording listeners

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use ims_core::capability::{CapabilityRequester, CapabilitySnapshot, ContactId, ContactStore};
use ims_core::logging::{setup_logging, LoggingConfig};
use ims_core::registration::RegistrationListener;
use ims_core::session::{ReInviteOutcome, SessionListener, SessionState};
use ims_core::sip::{Request, Response, SipTransport, StatusCode};
use ims_core::{ImsError, ImsResult, ImsSettings};
use rvoip_sip_core::TypedHeader;

pub const LOCAL_ADDR: &str = "10.0.0.2:5060";

/// How the transport answers one request
pub enum Reply {
    Response(Response),
    Delayed(Duration, Response),
    NoResponse,
    Error,
}

type Responder = Box<dyn FnOnce(&Request) -> Reply + Send>;

/// Answers requests from a queue; an empty queue answers 200 OK
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Responder>>,
    pub sent: Mutex<Vec<Request>>,
    pub responses: Mutex<Vec<Response>>,
    pub acks: Mutex<Vec<Request>>,
    ack_arrives: AtomicBool,
    pub dialog_cseq: Mutex<HashMap<String, u32>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
            responses: Mutex::new(Vec::new()),
            acks: Mutex::new(Vec::new()),
            ack_arrives: AtomicBool::new(true),
            dialog_cseq: Mutex::new(HashMap::new()),
        })
    }

    pub fn push(&self, responder: impl FnOnce(&Request) -> Reply + Send + 'static) {
        self.script.lock().push_back(Box::new(responder));
    }

    /// Queue a bare response with `code`, decorated by `decorate`
    pub fn respond_with(&self, code: u16, decorate: impl FnOnce(Response) -> Response + Send + 'static) {
        self.push(move |request| Reply::Response(decorate(response_to(request, code))));
    }

    pub fn respond(&self, code: u16) {
        self.respond_with(code, |r| r);
    }

    pub fn never_ack(&self) {
        self.ack_arrives.store(false, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Request> {
        self.sent.lock().clone()
    }

    pub fn last_sent(&self) -> Request {
        self.sent.lock().last().cloned().expect("nothing sent")
    }
}

/// Response to `request` echoing its Via, From, To, Call-ID and CSeq
pub fn response_to(request: &Request, code: u16) -> Response {
    let mut response = Response::new(StatusCode::from_u16(code).unwrap());
    response.headers = request
        .headers
        .iter()
        .filter(|h| {
            matches!(
                h,
                TypedHeader::Via(_)
                    | TypedHeader::From(_)
                    | TypedHeader::To(_)
                    | TypedHeader::CallId(_)
                    | TypedHeader::CSeq(_)
            )
        })
        .cloned()
        .collect();
    response
}

#[async_trait]
impl SipTransport for ScriptedTransport {
    fn local_address(&self) -> SocketAddr {
        LOCAL_ADDR.parse().unwrap()
    }

    async fn send_request(&self, request: Request) -> ImsResult<Response> {
        self.sent.lock().push(request.clone());
        let responder = self.script.lock().pop_front();
        let reply = match responder {
            Some(responder) => responder(&request),
            None => Reply::Response(response_to(&request, 200)),
        };
        match reply {
            Reply::Response(response) => Ok(response),
            Reply::Delayed(delay, response) => {
                tokio::time::sleep(delay).await;
                Ok(response)
            }
            Reply::NoResponse => std::future::pending().await,
            Reply::Error => Err(ImsError::transport("network unreachable")),
        }
    }

    async fn send_response(&self, response: Response) -> ImsResult<()> {
        self.responses.lock().push(response);
        Ok(())
    }

    async fn send_ack(&self, ack: Request) -> ImsResult<()> {
        self.acks.lock().push(ack);
        Ok(())
    }

    async fn wait_for_ack(&self, _call_id: &str, _cseq: u32) -> ImsResult<()> {
        if self.ack_arrives.load(Ordering::SeqCst) {
            Ok(())
        } else {
            std::future::pending().await
        }
    }

    fn dialog_sequence_number(&self, call_id: &str) -> Option<u32> {
        self.dialog_cseq.lock().get(call_id).copied()
    }

    fn advance_dialog_sequence_number(&self, call_id: &str, cseq: u32) {
        self.dialog_cseq.lock().insert(call_id.to_string(), cseq);
    }
}

#[derive(Default)]
pub struct RecordingRegistrationListener {
    pub successes: AtomicU32,
    pub failures: Mutex<Vec<ImsError>>,
    pub terminations: AtomicU32,
}

impl RecordingRegistrationListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn successes(&self) -> u32 {
        self.successes.load(Ordering::SeqCst)
    }

    pub fn terminations(&self) -> u32 {
        self.terminations.load(Ordering::SeqCst)
    }

    pub fn failures(&self) -> Vec<ImsError> {
        self.failures.lock().clone()
    }
}

#[async_trait]
impl RegistrationListener for RecordingRegistrationListener {
    async fn on_registration_successful(&self) {
        self.successes.fetch_add(1, Ordering::SeqCst);
    }

    async fn on_registration_failed(&self, error: ImsError) {
        self.failures.lock().push(error);
    }

    async fn on_registration_terminated(&self) {
        self.terminations.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct RecordingSessionListener {
    pub states: Mutex<Vec<(SessionState, SessionState)>>,
    pub updates: Mutex<Vec<ReInviteOutcome>>,
    pub errors: Mutex<Vec<ImsError>>,
}

#[async_trait]
impl SessionListener for RecordingSessionListener {
    async fn on_state_changed(&self, _session_id: &str, from: SessionState, to: SessionState) {
        self.states.lock().push((from, to));
    }

    async fn on_session_updated(&self, _session_id: &str, outcome: ReInviteOutcome) {
        self.updates.lock().push(outcome);
    }

    async fn on_session_error(&self, _session_id: &str, error: ImsError) {
        self.errors.lock().push(error);
    }
}

#[derive(Default)]
pub struct EmptyContacts;

#[async_trait]
impl ContactStore for EmptyContacts {
    async fn contacts(&self) -> ImsResult<Vec<ContactId>> {
        Ok(Vec::new())
    }

    async fn capabilities(&self, _contact: &ContactId) -> ImsResult<Option<CapabilitySnapshot>> {
        Ok(None)
    }

    async fn set_capabilities(&self, _contact: &ContactId, _snapshot: CapabilitySnapshot) -> ImsResult<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct NoopRequester;

#[async_trait]
impl CapabilityRequester for NoopRequester {
    async fn request_options(&self, _contact: &ContactId) -> ImsResult<()> {
        Ok(())
    }

    async fn request_presence(&self, _contact: &ContactId) -> ImsResult<()> {
        Ok(())
    }
}

static LOGGING: Once = Once::new();

/// Settings shared by the integration tests; installs the subscriber once
pub fn settings() -> ImsSettings {
    let mut settings = ImsSettings::new("ims.example.com", "sip:+33600000000@ims.example.com")
        .with_instance_id("<urn:gsma:imei:35-209900-176148-1>")
        .with_sip_timeout(Duration::from_millis(200));
    settings.log_level = "debug".to_string();
    LOGGING.call_once(|| {
        let config = LoggingConfig::from_settings(&settings).unwrap();
        // a subscriber installed earlier in this process keeps its place
        let _ = setup_logging(&config);
    });
    settings
}
