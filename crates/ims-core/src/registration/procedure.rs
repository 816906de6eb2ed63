//! Registration procedures
//!
//! A procedure decides what security information goes into each REGISTER and
//! what is read back from the network's responses.

use std::sync::Arc;

use rvoip_sip_core::{Request, Response};
use tracing::debug;

use crate::config::{ImsSettings, RegistrationProcedureKind};
use crate::error::{ImsError, ImsResult};
use crate::sip::auth::DigestAuthenticationAgent;
use crate::sip::headers;
use crate::sip::message::{raw_header, status, SipMessageExt};

pub trait RegistrationProcedure: Send + Sync {
    /// Called when a fresh registration dialog is created
    fn init(&self) {}

    /// Add credentials to an outgoing REGISTER
    fn write_security_header(&self, request: &mut Request) -> ImsResult<()>;

    /// Read a challenge (401) or authentication info (200) from a response
    fn read_security_header(&self, response: &Response) -> ImsResult<()>;
}

/// Build the procedure configured in `settings`
pub fn procedure_for(settings: &ImsSettings) -> ImsResult<Arc<dyn RegistrationProcedure>> {
    match settings.procedure {
        RegistrationProcedureKind::Giba => Ok(Arc::new(GibaRegistrationProcedure)),
        RegistrationProcedureKind::Digest => {
            let (Some(username), Some(password)) = (&settings.private_id, &settings.password) else {
                return Err(ImsError::Config(
                    "digest procedure requires private_id and password".to_string(),
                ));
            };
            Ok(Arc::new(DigestRegistrationProcedure::new(
                username.clone(),
                password.clone(),
                settings.home_domain.clone(),
            )))
        }
    }
}

/// Early-IMS: the access network vouches for the subscriber
#[derive(Debug, Default)]
pub struct GibaRegistrationProcedure;

impl RegistrationProcedure for GibaRegistrationProcedure {
    fn write_security_header(&self, _request: &mut Request) -> ImsResult<()> {
        Ok(())
    }

    fn read_security_header(&self, _response: &Response) -> ImsResult<()> {
        Ok(())
    }
}

/// HTTP Digest over REGISTER
#[derive(Debug)]
pub struct DigestRegistrationProcedure {
    agent: DigestAuthenticationAgent,
    realm: String,
}

impl DigestRegistrationProcedure {
    pub fn new(username: impl Into<String>, password: impl Into<String>, realm: impl Into<String>) -> Self {
        Self {
            agent: DigestAuthenticationAgent::new(username, password),
            realm: realm.into(),
        }
    }
}

impl RegistrationProcedure for DigestRegistrationProcedure {
    fn init(&self) {
        self.agent.reset();
    }

    fn write_security_header(&self, request: &mut Request) -> ImsResult<()> {
        // Before any challenge, an empty Authorization carries the private identity
        let uri = request.uri.to_string();
        let value = match self.agent.authorization(&request.method, &uri) {
            Some(value) => value,
            None => format!(
                "Digest username=\"{}\",realm=\"{}\",nonce=\"\",uri=\"{}\",response=\"\"",
                self.agent.username(),
                self.realm,
                uri
            ),
        };
        request.replace_header(raw_header(headers::AUTHORIZATION, value));
        Ok(())
    }

    fn read_security_header(&self, response: &Response) -> ImsResult<()> {
        match response.status_code() {
            status::UNAUTHORIZED => self.agent.read_challenge(response, headers::WWW_AUTHENTICATE),
            status::OK => {
                if let Some(info) = response.header_text(headers::AUTHENTICATION_INFO) {
                    debug!("Applying Authentication-Info from 200 OK");
                    self.agent.read_authentication_info(&info);
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}
