//! SIP plumbing consumed by the engine
//!
//! Messages are rvoip-sip-core [`Request`]/[`Response`] values.
//!
//! - [`message`]: header lookups over those messages and status codes
//! - [`headers`]: header names and typed parameter extraction
//! - [`factory`]: builders for REGISTER, re-INVITE, ACK and responses
//! - [`auth`]: HTTP Digest authentication agent
//! - [`transport`]: the transport collaborator trait

pub mod auth;
pub mod factory;
pub mod headers;
pub mod message;
pub mod transport;

pub use auth::{DigestAuthenticationAgent, DigestChallenge};
pub use message::{status, SipMessageExt};
pub use rvoip_sip_core::{Method, Request, Response, StatusCode};
pub use transport::SipTransport;
