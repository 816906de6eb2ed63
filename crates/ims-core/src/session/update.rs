//! Session renegotiation (re-INVITE)
//!
//! Offering side: [`SessionUpdateManager::create_reinvite`] then
//! [`SessionUpdateManager::send_reinvite`]. Answering side:
//! [`SessionUpdateManager::prepare_reinvite_answer`] when the re-INVITE
//! arrives, then [`SessionUpdateManager::wait_user_ack_and_send_reinvite_response`]
//! blocks for the local decision (bounded by the ringing period) while
//! [`SessionUpdateManager::accept_reinvite`] /
//! [`SessionUpdateManager::reject_reinvite`] record it.
//!
//! The pending answer is a `watch` channel: the first decision wins and
//! later signals are ignored until the next re-INVITE resets it. A decision
//! taken before the wait starts is kept.

use std::sync::Arc;
use std::time::Duration;

use rvoip_sip_core::{Request, Response, TypedHeader};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ImsSettings;
use crate::error::{ImsError, ImsResult, SessionErrorCode};
use crate::session::base::ImsServiceSession;
use crate::session::ImsSession;
use crate::sip::factory;
use crate::sip::headers;
use crate::sip::message::{raw_header, status, SipMessageExt};
use crate::sip::transport::SipTransport;

/// Local decision on a received re-INVITE
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvitationAnswer {
    NotAnswered,
    Accepted,
    /// Rejected with the given status code
    Rejected(u16),
}

/// What a re-INVITE is for, handed back with its outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReInviteContext {
    AddVideo,
    RemoveVideo,
    MediaUpdate,
}

#[derive(Debug, Clone)]
pub enum ReInviteOutcome {
    Accepted { context: ReInviteContext },
    Rejected { context: ReInviteContext, status_code: u16 },
    /// No answer: 408 from the far end, or the local ringing period elapsed
    TimedOut { context: ReInviteContext },
    Failed { context: ReInviteContext, error: ImsError },
}

impl ReInviteOutcome {
    pub fn context(&self) -> ReInviteContext {
        match self {
            ReInviteOutcome::Accepted { context }
            | ReInviteOutcome::Rejected { context, .. }
            | ReInviteOutcome::TimedOut { context }
            | ReInviteOutcome::Failed { context, .. } => *context,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, ReInviteOutcome::Accepted { .. })
    }
}

#[derive(Clone)]
pub struct SessionUpdateManager {
    transport: Arc<dyn SipTransport>,
    settings: Arc<ImsSettings>,
    answer: Arc<watch::Sender<InvitationAnswer>>,
}

impl SessionUpdateManager {
    pub fn new(transport: Arc<dyn SipTransport>, settings: Arc<ImsSettings>) -> Self {
        let (answer, _) = watch::channel(InvitationAnswer::NotAnswered);
        Self {
            transport,
            settings,
            answer: Arc::new(answer),
        }
    }

    /// Build a re-INVITE carrying `content` on the session's dialog
    ///
    /// Bumps the dialog CSeq, catching the transport's own dialog counter up
    /// to it when it lags.
    pub fn create_reinvite(
        &self,
        session: &ImsServiceSession,
        feature_tags: &[String],
        content: &str,
    ) -> ImsResult<Request> {
        let dialog = session.dialog().ok_or_else(|| {
            ImsError::session(SessionErrorCode::UnexpectedException, "session has no dialog")
        })?;
        let mut dialog = dialog.lock();
        let cseq = dialog.increment_cseq();

        let call_id = dialog.call_id();
        if let Some(transport_cseq) = self.transport.dialog_sequence_number(call_id) {
            if transport_cseq < cseq {
                debug!(call_id, from = transport_cseq, to = cseq, "Advancing transport dialog CSeq");
                self.transport.advance_dialog_sequence_number(call_id, cseq);
            }
        }

        let mut request = factory::create_reinvite(&dialog, self.transport.local_address(), feature_tags, content)?;
        if let Some(agent) = session.proxy_auth() {
            if let Some(value) = agent.authorization(&request.method, &request.uri.to_string()) {
                request.replace_header(raw_header(headers::PROXY_AUTHORIZATION, value));
            }
        }
        Ok(request)
    }

    /// Send `request` on a background task, see [`reinvite_exchange`](Self::reinvite_exchange)
    pub fn send_reinvite(
        &self,
        session: Arc<ImsServiceSession>,
        request: Request,
        context: ReInviteContext,
    ) -> JoinHandle<ReInviteOutcome> {
        let manager = self.clone();
        tokio::spawn(async move { manager.reinvite_exchange(&session, request, context).await })
    }

    /// Send a re-INVITE and act on the answer; the session listener gets the outcome
    ///
    /// 200 commits the new content and ACKs, 603 is a rejection, 408 a
    /// timeout, 407 is retried once with proxy credentials.
    pub async fn reinvite_exchange(
        &self,
        session: &ImsServiceSession,
        request: Request,
        context: ReInviteContext,
    ) -> ReInviteOutcome {
        let outcome = match self.exchange(session, request, context).await {
            Ok(outcome) => outcome,
            Err(error) => {
                session.notify_error(error.clone()).await;
                ReInviteOutcome::Failed { context, error }
            }
        };
        info!(session_id = session.session_id(), ?outcome, "re-INVITE completed");
        session.notify_updated(outcome.clone()).await;
        outcome
    }

    async fn exchange(
        &self,
        session: &ImsServiceSession,
        mut request: Request,
        context: ReInviteContext,
    ) -> ImsResult<ReInviteOutcome> {
        let mut proxy_auth_attempted = false;
        loop {
            let response = self.send_with_timeout(request.clone()).await?;
            match response.status_code() {
                status::OK => {
                    self.commit(session, &request, &response).await;
                    return Ok(ReInviteOutcome::Accepted { context });
                }
                status::DECLINE => {
                    return Ok(ReInviteOutcome::Rejected {
                        context,
                        status_code: status::DECLINE,
                    });
                }
                status::REQUEST_TIMEOUT => return Ok(ReInviteOutcome::TimedOut { context }),
                status::PROXY_AUTHENTICATION_REQUIRED if !proxy_auth_attempted => {
                    proxy_auth_attempted = true;
                    let agent = session.proxy_auth().ok_or_else(|| {
                        ImsError::session(
                            SessionErrorCode::ProxyAuthenticationFailed,
                            "407 without proxy credentials",
                        )
                    })?;
                    agent
                        .read_challenge(&response, headers::PROXY_AUTHENTICATE)
                        .map_err(|e| ImsError::session(SessionErrorCode::ProxyAuthenticationFailed, e.to_string()))?;
                    debug!(session_id = session.session_id(), "407 on re-INVITE, retrying with credentials");
                    let content = request.content().unwrap_or_default().to_string();
                    request = self.create_reinvite(session, session.feature_tags(), &content)?;
                }
                status::PROXY_AUTHENTICATION_REQUIRED => {
                    return Err(ImsError::session(
                        SessionErrorCode::ProxyAuthenticationFailed,
                        "proxy rejected credentials",
                    ));
                }
                other => {
                    return Err(ImsError::session(
                        SessionErrorCode::MediaRenegotiationFailed,
                        format!("re-INVITE answered {} {}", other, response.reason_phrase()),
                    ));
                }
            }
        }
    }

    async fn send_with_timeout(&self, request: Request) -> ImsResult<Response> {
        let timeout = self.settings.sip_transaction_timeout();
        match tokio::time::timeout(timeout, self.transport.send_request(request)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(ImsError::session(
                SessionErrorCode::MediaRenegotiationFailed,
                format!("re-INVITE not sent: {}", e),
            )),
            Err(_) => Err(ImsError::session(
                SessionErrorCode::MediaRenegotiationFailed,
                format!("no response to re-INVITE within {:?}", timeout),
            )),
        }
    }

    async fn commit(&self, session: &ImsServiceSession, request: &Request, response: &Response) {
        let ack = match session.dialog() {
            Some(dialog) => {
                let mut dialog = dialog.lock();
                if let Some(tag) = to_tag(response) {
                    dialog.set_remote_tag(tag);
                }
                if let Some(content) = request.content() {
                    dialog.set_local_content(content);
                }
                if let Some(content) = response.content() {
                    dialog.set_remote_content(content);
                }
                factory::create_ack(&dialog, self.transport.local_address())
            }
            None => return,
        };
        let sent = match ack {
            Ok(ack) => self.transport.send_ack(ack).await,
            Err(e) => Err(e),
        };
        if let Err(e) = sent {
            warn!(session_id = session.session_id(), error = %e, "ACK to re-INVITE 200 not sent");
        }
    }

    /// Answer a received re-INVITE with 200 OK and wait for the ACK
    ///
    /// A missing ACK is a [`SessionErrorCode::NoAck`] failure; the caller tears
    /// the session down.
    pub async fn send_200ok_reinvite_response(
        &self,
        session: &ImsServiceSession,
        request: &Request,
        feature_tags: &[String],
        content: &str,
    ) -> ImsResult<()> {
        let dialog = session.dialog().ok_or_else(|| {
            ImsError::session(SessionErrorCode::UnexpectedException, "session has no dialog")
        })?;
        let (call_id, cseq) = request
            .call_id_value()
            .zip(request.cseq_number())
            .ok_or_else(|| ImsError::protocol("re-INVITE without Call-ID or CSeq"))?;
        let response = {
            let mut dialog = dialog.lock();
            if let Some(offer) = request.content() {
                dialog.set_remote_content(offer);
            }
            dialog.set_local_content(content);
            factory::create_200_ok_reinvite(request, &dialog, self.transport.local_address(), feature_tags, content)?
        };

        self.transport.send_response(response).await?;

        let timeout = self.settings.sip_transaction_timeout();
        match tokio::time::timeout(timeout, self.transport.wait_for_ack(call_id, cseq)).await {
            Ok(Ok(())) => {
                debug!(session_id = session.session_id(), "ACK received for re-INVITE 200");
                Ok(())
            }
            Ok(Err(e)) => Err(ImsError::session(SessionErrorCode::NoAck, e.to_string())),
            Err(_) => Err(ImsError::session(
                SessionErrorCode::NoAck,
                format!("no ACK within {:?}", timeout),
            )),
        }
    }

    /// Clear the previous decision; call when a re-INVITE is received
    pub fn prepare_reinvite_answer(&self) {
        self.answer.send_replace(InvitationAnswer::NotAnswered);
    }

    /// Wait for the local decision on a received re-INVITE, then answer it
    ///
    /// Accept sends 200 OK (and waits for the ACK), reject sends the chosen
    /// code, no decision within the ringing period sends 408. A decision
    /// recorded since [`prepare_reinvite_answer`](Self::prepare_reinvite_answer)
    /// is answered at once.
    pub async fn wait_user_ack_and_send_reinvite_response(
        &self,
        session: &ImsServiceSession,
        request: &Request,
        feature_tags: &[String],
        content: &str,
        context: ReInviteContext,
    ) -> ReInviteOutcome {
        let outcome = match self.wait_invitation_answer().await {
            InvitationAnswer::Accepted => {
                match self
                    .send_200ok_reinvite_response(session, request, feature_tags, content)
                    .await
                {
                    Ok(()) => ReInviteOutcome::Accepted { context },
                    Err(error) => {
                        session.notify_error(error.clone()).await;
                        ReInviteOutcome::Failed { context, error }
                    }
                }
            }
            InvitationAnswer::Rejected(code) => match self.respond(session, request, code).await {
                Ok(()) => ReInviteOutcome::Rejected {
                    context,
                    status_code: code,
                },
                Err(error) => ReInviteOutcome::Failed { context, error },
            },
            InvitationAnswer::NotAnswered => match self.respond(session, request, status::REQUEST_TIMEOUT).await {
                Ok(()) => ReInviteOutcome::TimedOut { context },
                Err(error) => ReInviteOutcome::Failed { context, error },
            },
        };
        session.notify_updated(outcome.clone()).await;
        outcome
    }

    async fn respond(&self, session: &ImsServiceSession, request: &Request, code: u16) -> ImsResult<()> {
        let dialog = session.dialog().ok_or_else(|| {
            ImsError::session(SessionErrorCode::UnexpectedException, "session has no dialog")
        })?;
        let response = factory::create_response(request, &dialog.lock(), code)?;
        self.transport.send_response(response).await
    }

    /// Record a local accept; ignored once a decision exists
    pub fn accept_reinvite(&self) {
        self.record(InvitationAnswer::Accepted);
    }

    /// Record a local reject with `code` (603 when `None`); ignored once a decision exists
    pub fn reject_reinvite(&self, code: Option<u16>) {
        self.record(InvitationAnswer::Rejected(code.unwrap_or(status::DECLINE)));
    }

    fn record(&self, decision: InvitationAnswer) {
        let recorded = self.answer.send_if_modified(|answer| {
            if *answer == InvitationAnswer::NotAnswered {
                *answer = decision;
                true
            } else {
                false
            }
        });
        if !recorded {
            debug!(?decision, "re-INVITE already answered, ignoring");
        }
    }

    /// Current decision, without waiting
    pub fn invitation_answer(&self) -> InvitationAnswer {
        *self.answer.borrow()
    }

    /// Wait up to the ringing period for a decision
    pub async fn wait_invitation_answer(&self) -> InvitationAnswer {
        self.wait_invitation_answer_for(self.settings.ringing_period()).await
    }

    /// Wait up to `period`; a decision already recorded returns at once
    pub async fn wait_invitation_answer_for(&self, period: Duration) -> InvitationAnswer {
        let mut receiver = self.answer.subscribe();
        let waited = tokio::time::timeout(
            period,
            receiver.wait_for(|answer| *answer != InvitationAnswer::NotAnswered),
        )
        .await;
        match waited {
            Ok(Ok(answer)) => *answer,
            Ok(Err(_)) | Err(_) => InvitationAnswer::NotAnswered,
        }
    }
}

fn to_tag(response: &Response) -> Option<String> {
    response.typed_headers().iter().find_map(|h| match h {
        TypedHeader::To(to) => to.tag().map(str::to_string),
        _ => None,
    })
}

impl std::fmt::Debug for SessionUpdateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionUpdateManager")
            .field("answer", &self.invitation_answer())
            .finish()
    }
}
