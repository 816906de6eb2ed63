//! HTTP Digest authentication (RFC 2617 as profiled by RFC 3261)
//!
//! One [`DigestAuthenticationAgent`] per credential set. It remembers the last
//! challenge it was given (from `WWW-Authenticate` or `Proxy-Authenticate`)
//! and produces the matching `Authorization`/`Proxy-Authorization` value for
//! each new request, bumping the nonce count as it goes.

use md5::{Digest, Md5};
use parking_lot::Mutex;
use rand::Rng;
use rvoip_sip_core::prelude::{
    Algorithm, AuthenticationInfo, AuthenticationInfoParam, Challenge, DigestParam, Qop,
    WwwAuthenticate,
};
use rvoip_sip_core::{Method, Response};
use tracing::debug;

use crate::error::{ImsError, ImsResult};
use crate::sip::message::SipMessageExt;

/// The `Digest` challenge fields the agent answers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    pub opaque: Option<String>,
    pub qop_auth: bool,
    pub stale: bool,
}

impl DigestChallenge {
    pub fn from_challenge(challenge: &Challenge) -> ImsResult<Self> {
        let Challenge::Digest { params } = challenge else {
            return Err(ImsError::protocol(format!("unsupported auth scheme in {}", challenge)));
        };

        let mut realm = None;
        let mut nonce = None;
        let mut opaque = None;
        let mut qop_auth = false;
        let mut stale = false;

        for param in params {
            match param {
                DigestParam::Realm(v) => realm = Some(v.clone()),
                DigestParam::Nonce(v) => nonce = Some(v.clone()),
                DigestParam::Opaque(v) => opaque = Some(v.clone()),
                DigestParam::Stale(v) => stale = *v,
                DigestParam::Qop(options) => qop_auth = options.iter().any(|q| matches!(q, Qop::Auth)),
                DigestParam::Algorithm(Algorithm::Md5) => {}
                DigestParam::Algorithm(other) => {
                    return Err(ImsError::protocol(format!("unsupported digest algorithm {:?}", other)));
                }
                _ => {}
            }
        }

        Ok(Self {
            realm: realm.ok_or_else(|| ImsError::protocol("challenge without realm"))?,
            nonce: nonce.ok_or_else(|| ImsError::protocol("challenge without nonce"))?,
            opaque,
            qop_auth,
            stale,
        })
    }

    /// First Digest challenge carried by header `name` of `response`
    pub fn from_response(response: &Response, name: &str) -> ImsResult<Self> {
        let value = response
            .header_text(name)
            .ok_or_else(|| ImsError::protocol(format!("{} without {}", response.status_code(), name)))?;
        let challenges = value.parse::<WwwAuthenticate>()?;
        let challenge = challenges
            .first_digest()
            .ok_or_else(|| ImsError::protocol(format!("no Digest challenge in {}", name)))?;
        Self::from_challenge(challenge)
    }
}

#[derive(Debug)]
struct DigestState {
    challenge: DigestChallenge,
    nonce_count: u32,
}

/// Holds credentials and the current challenge for one authenticated party
#[derive(Debug)]
pub struct DigestAuthenticationAgent {
    username: String,
    password: String,
    state: Mutex<Option<DigestState>>,
}

impl DigestAuthenticationAgent {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            state: Mutex::new(None),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Store the challenge carried by header `name`, resetting the nonce count
    pub fn read_challenge(&self, response: &Response, name: &str) -> ImsResult<()> {
        let challenge = DigestChallenge::from_response(response, name)?;
        debug!(realm = %challenge.realm, stale = challenge.stale, "Digest challenge received");
        *self.state.lock() = Some(DigestState {
            challenge,
            nonce_count: 0,
        });
        Ok(())
    }

    /// Apply `nextnonce` from an `Authentication-Info` header, if present
    pub fn read_authentication_info(&self, value: &str) {
        let next_nonce = match value.parse::<AuthenticationInfo>() {
            Ok(info) => info.0.into_iter().find_map(|p| match p {
                AuthenticationInfoParam::NextNonce(nonce) => Some(nonce),
                _ => None,
            }),
            Err(e) => {
                debug!(error = %e, "Ignoring unreadable Authentication-Info");
                None
            }
        };
        let Some(nonce) = next_nonce else {
            return;
        };
        let mut guard = self.state.lock();
        if let Some(state) = guard.as_mut() {
            state.challenge.nonce = nonce;
            state.nonce_count = 0;
        }
    }

    pub fn has_challenge(&self) -> bool {
        self.state.lock().is_some()
    }

    pub fn reset(&self) {
        *self.state.lock() = None;
    }

    /// Credentials header value for `method` on `uri`, `None` before any challenge
    pub fn authorization(&self, method: &Method, uri: &str) -> Option<String> {
        let mut guard = self.state.lock();
        let state = guard.as_mut()?;
        state.nonce_count += 1;

        let challenge = &state.challenge;
        let nc = format!("{:08x}", state.nonce_count);
        let cnonce = format!("{:016x}", rand::thread_rng().r#gen::<u64>());

        let response = compute_response(
            &self.username,
            &self.password,
            &challenge.realm,
            &challenge.nonce,
            &method.to_string(),
            uri,
            challenge.qop_auth.then_some((nc.as_str(), cnonce.as_str())),
        );

        let mut value = format!(
            "Digest username=\"{}\",realm=\"{}\",nonce=\"{}\",uri=\"{}\",response=\"{}\",algorithm=MD5",
            self.username, challenge.realm, challenge.nonce, uri, response
        );
        if challenge.qop_auth {
            value.push_str(&format!(",cnonce=\"{}\",nc={},qop=auth", cnonce, nc));
        }
        if let Some(opaque) = &challenge.opaque {
            value.push_str(&format!(",opaque=\"{}\"", opaque));
        }
        Some(value)
    }
}

fn md5_hex(data: &str) -> String {
    Md5::digest(data.as_bytes())
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Digest `response` value; `qop` carries `(nc, cnonce)` when qop=auth is used
fn compute_response(
    username: &str,
    password: &str,
    realm: &str,
    nonce: &str,
    method: &str,
    uri: &str,
    qop: Option<(&str, &str)>,
) -> String {
    let ha1 = md5_hex(&format!("{}:{}:{}", username, realm, password));
    let ha2 = md5_hex(&format!("{}:{}", method, uri));
    match qop {
        Some((nc, cnonce)) => md5_hex(&format!("{}:{}:{}:{}:auth:{}", ha1, nonce, nc, cnonce, ha2)),
        None => md5_hex(&format!("{}:{}:{}", ha1, nonce, ha2)),
    }
}
