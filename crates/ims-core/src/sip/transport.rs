//! Transport collaborator
//!
//! The SIP stack below ims-core (parsing, transactions, sockets) is reached
//! through [`SipTransport`]. Calls are allowed to block for as long as the
//! underlying transaction runs; the managers bound every call with
//! `tokio::time::timeout` and treat an elapsed timeout as "no response".

use std::net::SocketAddr;

use async_trait::async_trait;
use rvoip_sip_core::{Request, Response};

use crate::error::ImsResult;

#[async_trait]
pub trait SipTransport: Send + Sync {
    /// Address the stack is bound to, used in Via/Contact and for NAT detection
    fn local_address(&self) -> SocketAddr;

    /// Send a request and wait for its final response
    async fn send_request(&self, request: Request) -> ImsResult<Response>;

    /// Send a response on the server transaction matching it
    async fn send_response(&self, response: Response) -> ImsResult<()>;

    /// Send an ACK for a 2xx to INVITE
    async fn send_ack(&self, ack: Request) -> ImsResult<()>;

    /// Resolve once the ACK for our 2xx (`call_id`, `cseq`) arrives
    async fn wait_for_ack(&self, call_id: &str, cseq: u32) -> ImsResult<()>;

    /// Local sequence number the stack's own dialog object holds, if it keeps one
    fn dialog_sequence_number(&self, _call_id: &str) -> Option<u32> {
        None
    }

    /// Bring the stack's dialog sequence number up to `cseq`
    fn advance_dialog_sequence_number(&self, _call_id: &str, _cseq: u32) {}
}
