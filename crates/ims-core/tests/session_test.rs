//! Session registry, re-INVITE exchanges and the IMS core

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{
    settings, EmptyContacts, NoopRequester, RecordingRegistrationListener, RecordingSessionListener,
    ScriptedTransport,
};
use ims_core::dialog::DialogPath;
use ims_core::error::SessionErrorCode;
use ims_core::session::{
    ImsServiceSession, ImsSession, InvitationAnswer, ReInviteContext, ReInviteOutcome, SessionCategory,
    SessionKind, SessionRegistry, SessionTracker,
};
use ims_core::sip::factory::CONTENT_TYPE_SDP;
use ims_core::sip::headers;
use ims_core::sip::message::raw_header;
use ims_core::sip::{Method, Request, Response, SipMessageExt};
use ims_core::{ImsCore, ImsError, ImsSettings};
use rvoip_sip_core::types::param::Param;
use rvoip_sip_core::types::To;
use rvoip_sip_core::{Address, CSeq, CallId, From, TypedHeader, Uri, Via};

const OFFER: &str = "v=0\r\nm=message 9 TCP/MSRP *\r\n";
const ANSWER: &str = "v=0\r\nm=message 7394 TCP/MSRP *\r\n";

fn dialog(call_id: &str) -> DialogPath {
    DialogPath::new(
        call_id,
        "sip:+33611111111@ims.example.com",
        "sip:+33600000000@ims.example.com",
        "sip:+33611111111@ims.example.com",
        vec!["<sip:pcscf.ims.example.com;lr>".to_string()],
    )
}

fn session(
    transport: &Arc<ScriptedTransport>,
    settings: ImsSettings,
) -> (Arc<ImsServiceSession>, Arc<RecordingSessionListener>) {
    let listener = Arc::new(RecordingSessionListener::default());
    let session = ImsServiceSession::new(
        SessionKind::OneToOneChat("+33611111111".to_string()),
        transport.clone(),
        Arc::new(settings),
    )
    .with_dialog(dialog("call-1@10.0.0.2"))
    .with_proxy_credentials("+33600000000@ims.example.com", "secret")
    .with_listener(listener.clone());
    (Arc::new(session), listener)
}

fn tagged(uri: &str, tag: &str) -> Address {
    let mut address = Address::new(uri.parse::<Uri>().unwrap());
    address.params.push(Param::tag(tag));
    address
}

fn incoming_reinvite() -> Request {
    let via = Via::new(
        "SIP",
        "2.0",
        "UDP",
        "192.0.2.10",
        Some(5060),
        vec![Param::branch("z9hG4bKremote")],
    )
    .unwrap();
    Request::new(Method::Invite, "sip:10.0.0.2:5060".parse::<Uri>().unwrap())
        .with_header(TypedHeader::Via(via))
        .with_header(TypedHeader::From(From::new(tagged("sip:+33611111111@ims.example.com", "remote"))))
        .with_header(TypedHeader::To(To::new(Address::new(
            "sip:+33600000000@ims.example.com".parse::<Uri>().unwrap(),
        ))))
        .with_header(TypedHeader::CallId(CallId::new("call-1@10.0.0.2")))
        .with_header(TypedHeader::CSeq(CSeq::new(7, Method::Invite)))
        .with_header(raw_header(headers::CONTENT_TYPE, CONTENT_TYPE_SDP))
        .with_body(OFFER)
}

/// 200 from the far end: its tag in To, and an SDP answer
fn answered(mut response: Response) -> Response {
    response.headers.retain(|h| !matches!(h, TypedHeader::To(_)));
    response
        .with_header(TypedHeader::To(To::new(tagged("sip:+33611111111@ims.example.com", "far"))))
        .with_header(raw_header(headers::CONTENT_TYPE, CONTENT_TYPE_SDP))
        .with_body(ANSWER)
}

#[tokio::test]
async fn test_concurrent_add_remove_leaves_consistent_registry() {
    let tracker = Arc::new(SessionTracker::new());
    let registry = Arc::new(SessionRegistry::for_chat(&ImsSettings::default(), tracker.clone()));
    let transport = ScriptedTransport::new();

    let mut tasks = Vec::new();
    for i in 0..16 {
        let registry = registry.clone();
        let session: Arc<dyn ImsSession> = Arc::new(
            ImsServiceSession::new(
                SessionKind::OneToOneChat(format!("+3361111111{i}")),
                transport.clone(),
                Arc::new(ImsSettings::default()),
            )
            .with_dialog(dialog(&format!("call-{i}"))),
        );
        tasks.push(tokio::spawn(async move {
            registry.add(session.clone()).unwrap();
            registry.remove(session).await.unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert!(registry.is_empty());
    assert_eq!(tracker.dialog_count(), 0);
    assert!(registry.is_available(&[SessionCategory::OneToOneChat]));
}

#[tokio::test]
async fn test_lookup_during_deferred_remove_sees_whole_entry() {
    let registry = SessionRegistry::for_chat(&ImsSettings::default(), Arc::new(SessionTracker::new()));
    let transport = ScriptedTransport::new();
    let key = SessionKind::GroupChat("conv-1".to_string());
    let session: Arc<dyn ImsSession> = Arc::new(ImsServiceSession::new(
        key.clone(),
        transport,
        Arc::new(ImsSettings::default()),
    ));
    registry.add(session.clone()).unwrap();

    let removal = registry.remove(session.clone());
    if let Some(found) = registry.get(&key) {
        assert_eq!(found.session_id(), session.session_id());
    }
    removal.await.unwrap();
    assert!(registry.get(&key).is_none());
}

#[tokio::test]
async fn test_reinvite_accepted_commits_content() {
    let transport = ScriptedTransport::new();
    transport.respond_with(200, answered);
    let (session, listener) = session(&transport, settings());
    let manager = session.update_manager();

    let request = manager.create_reinvite(&session, &[], OFFER).unwrap();
    assert_eq!(request.cseq_number(), Some(2));
    assert!(!request.has_header(headers::PROXY_AUTHORIZATION));

    let outcome = manager
        .send_reinvite(session.clone(), request, ReInviteContext::AddVideo)
        .await
        .unwrap();
    assert!(outcome.is_accepted());
    assert_eq!(outcome.context(), ReInviteContext::AddVideo);

    let dialog = session.dialog().unwrap().lock().clone();
    assert_eq!(dialog.local_content(), Some(OFFER));
    assert_eq!(dialog.remote_content(), Some(ANSWER));
    assert_eq!(dialog.remote_tag(), Some("far"));
    assert_eq!(transport.acks.lock().len(), 1);
    assert_eq!(listener.updates.lock().len(), 1);
}

#[tokio::test]
async fn test_reinvite_catches_up_transport_cseq() {
    let transport = ScriptedTransport::new();
    transport.dialog_cseq.lock().insert("call-1@10.0.0.2".to_string(), 1);
    let (session, _listener) = session(&transport, settings());

    let request = session.update_manager().create_reinvite(&session, &[], OFFER).unwrap();
    assert_eq!(request.cseq_number(), Some(2));
    assert_eq!(transport.dialog_cseq.lock().get("call-1@10.0.0.2"), Some(&2));
}

#[tokio::test]
async fn test_reinvite_proxy_authentication_retry() {
    let transport = ScriptedTransport::new();
    transport.respond_with(407, |r| {
        r.with_header(raw_header(
            headers::PROXY_AUTHENTICATE,
            r#"Digest realm="ims.example.com", nonce="p1", qop="auth""#,
        ))
    });
    transport.respond(200);
    let (session, _listener) = session(&transport, settings());
    let manager = session.update_manager();

    let request = manager.create_reinvite(&session, &[], OFFER).unwrap();
    let outcome = manager
        .reinvite_exchange(&session, request, ReInviteContext::MediaUpdate)
        .await;
    assert!(outcome.is_accepted());

    let sent = transport.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1].cseq_number(), Some(3));
    assert!(sent[1]
        .header_text(headers::PROXY_AUTHORIZATION)
        .unwrap()
        .contains("nonce=\"p1\""));
}

#[tokio::test]
async fn test_reinvite_failure_outcomes() {
    let transport = ScriptedTransport::new();
    let (session, listener) = session(&transport, settings());
    let manager = session.update_manager();
    let challenge = r#"Digest realm="ims.example.com", nonce="p1""#;

    transport.respond(603);
    transport.respond(408);
    transport.respond(500);
    transport.respond_with(407, move |r| r.with_header(raw_header(headers::PROXY_AUTHENTICATE, challenge)));
    transport.respond_with(407, move |r| r.with_header(raw_header(headers::PROXY_AUTHENTICATE, challenge)));

    let mut outcomes = Vec::new();
    for _ in 0..4 {
        let request = manager.create_reinvite(&session, &[], OFFER).unwrap();
        outcomes.push(
            manager
                .reinvite_exchange(&session, request, ReInviteContext::RemoveVideo)
                .await,
        );
    }

    assert!(matches!(outcomes[0], ReInviteOutcome::Rejected { status_code: 603, .. }));
    assert!(matches!(outcomes[1], ReInviteOutcome::TimedOut { .. }));
    match &outcomes[2] {
        ReInviteOutcome::Failed { error, .. } => {
            assert_eq!(error.session_code(), Some(SessionErrorCode::MediaRenegotiationFailed))
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    match &outcomes[3] {
        ReInviteOutcome::Failed { error, .. } => {
            assert_eq!(error.session_code(), Some(SessionErrorCode::ProxyAuthenticationFailed))
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(listener.updates.lock().len(), 4);

    let errors = listener.errors.lock().clone();
    assert_eq!(errors.len(), 2);
    assert_eq!(errors[0].session_code(), Some(SessionErrorCode::MediaRenegotiationFailed));
    assert_eq!(errors[1].session_code(), Some(SessionErrorCode::ProxyAuthenticationFailed));
}

#[tokio::test]
async fn test_answering_accepted_reinvite() {
    let transport = ScriptedTransport::new();
    let (session, listener) = session(&transport, settings());

    let answering = {
        let session = session.clone();
        tokio::spawn(async move {
            session
                .update_manager()
                .wait_user_ack_and_send_reinvite_response(
                    &session,
                    &incoming_reinvite(),
                    &[],
                    ANSWER,
                    ReInviteContext::AddVideo,
                )
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;
    session.update_manager().accept_reinvite();

    assert!(answering.await.unwrap().is_accepted());
    let responses = transport.responses.lock().clone();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].status_code(), 200);
    assert_eq!(responses[0].content(), Some(ANSWER));
    assert_eq!(responses[0].cseq_number(), Some(7));

    let dialog = session.dialog().unwrap().lock().clone();
    assert_eq!(dialog.remote_content(), Some(OFFER));
    assert_eq!(dialog.local_content(), Some(ANSWER));
    assert_eq!(listener.updates.lock().len(), 1);
}

#[tokio::test]
async fn test_accept_before_wait_is_answered_at_once() {
    let transport = ScriptedTransport::new();
    let (session, _listener) = session(&transport, settings());
    let manager = session.update_manager();

    // A stale decision from an earlier re-INVITE is cleared on receipt
    manager.reject_reinvite(None);
    manager.prepare_reinvite_answer();
    manager.accept_reinvite();

    let started = tokio::time::Instant::now();
    let outcome = manager
        .wait_user_ack_and_send_reinvite_response(&session, &incoming_reinvite(), &[], ANSWER, ReInviteContext::AddVideo)
        .await;
    assert!(outcome.is_accepted());
    assert!(started.elapsed() < Duration::from_secs(1));
    let responses = transport.responses.lock().clone();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].status_code(), 200);
}

#[tokio::test]
async fn test_answering_without_decision_times_out() {
    let transport = ScriptedTransport::new();
    let (session, _listener) = session(&transport, settings().with_ringing_period(Duration::from_millis(100)));

    let started = tokio::time::Instant::now();
    let outcome = session
        .update_manager()
        .wait_user_ack_and_send_reinvite_response(&session, &incoming_reinvite(), &[], ANSWER, ReInviteContext::AddVideo)
        .await;
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert!(matches!(outcome, ReInviteOutcome::TimedOut { .. }));
    assert_eq!(transport.responses.lock()[0].status_code(), 408);
    assert_eq!(session.update_manager().invitation_answer(), InvitationAnswer::NotAnswered);
}

#[tokio::test]
async fn test_answering_rejected_reinvite() {
    let transport = ScriptedTransport::new();
    let (session, _listener) = session(&transport, settings());

    let answering = {
        let session = session.clone();
        tokio::spawn(async move {
            session
                .update_manager()
                .wait_user_ack_and_send_reinvite_response(
                    &session,
                    &incoming_reinvite(),
                    &[],
                    ANSWER,
                    ReInviteContext::AddVideo,
                )
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;
    session.update_manager().reject_reinvite(Some(486));

    assert!(matches!(
        answering.await.unwrap(),
        ReInviteOutcome::Rejected { status_code: 486, .. }
    ));
    assert_eq!(transport.responses.lock()[0].status_code(), 486);
}

#[tokio::test]
async fn test_missing_ack_is_session_error() {
    let transport = ScriptedTransport::new();
    transport.never_ack();
    let (session, listener) = session(&transport, settings());

    let result = session
        .update_manager()
        .send_200ok_reinvite_response(&session, &incoming_reinvite(), &[], ANSWER)
        .await;
    assert_eq!(result.unwrap_err().session_code(), Some(SessionErrorCode::NoAck));

    let answering = {
        let session = session.clone();
        tokio::spawn(async move {
            session
                .update_manager()
                .wait_user_ack_and_send_reinvite_response(
                    &session,
                    &incoming_reinvite(),
                    &[],
                    ANSWER,
                    ReInviteContext::MediaUpdate,
                )
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;
    session.update_manager().accept_reinvite();

    match answering.await.unwrap() {
        ReInviteOutcome::Failed { error, .. } => {
            assert_eq!(error.session_code(), Some(SessionErrorCode::NoAck))
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(listener.errors.lock().len(), 1);
}

#[tokio::test]
async fn test_core_start_and_stop() {
    let transport = ScriptedTransport::new();
    let listener = RecordingRegistrationListener::new();
    let core = ImsCore::new(
        settings(),
        transport.clone(),
        listener.clone(),
        Arc::new(EmptyContacts),
        Arc::new(NoopRequester),
    )
    .unwrap();

    // the shared fixture already installed the subscriber
    assert!(core.install_logging().is_err());

    assert!(core.start().await.unwrap());
    assert!(core.is_started());
    assert!(core.registration().is_registered());
    assert!(core.capability_polling().is_running());
    assert!(core.start().await.is_err());

    let session: Arc<dyn ImsSession> = Arc::new(
        ImsServiceSession::new(
            SessionKind::OneToOneChat("+33611111111".to_string()),
            transport.clone(),
            core.settings().clone(),
        )
        .with_dialog(dialog("call-9@10.0.0.2")),
    );
    core.chat_sessions().add_if_available(session).unwrap();
    assert!(core.session_by_call_id("call-9@10.0.0.2").is_ok());
    assert!(matches!(
        core.session_by_call_id("unknown"),
        Err(ImsError::SessionNotFound(_))
    ));

    core.stop().await;
    assert!(!core.is_started());
    assert!(!core.registration().is_registered());
    assert!(!core.capability_polling().is_running());
    assert_eq!(transport.last_sent().header_text(headers::EXPIRES).as_deref(), Some("0"));
    assert_eq!(listener.terminations(), 1);
}

#[test]
fn test_core_rejects_invalid_settings() {
    let result = ImsCore::new(
        ImsSettings::default(),
        ScriptedTransport::new(),
        RecordingRegistrationListener::new(),
        Arc::new(EmptyContacts),
        Arc::new(NoopRequester),
    );
    assert!(matches!(result, Err(ImsError::Config(_))));
}
