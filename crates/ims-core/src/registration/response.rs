//! What a successful REGISTER response tells us
//!
//! Pure extraction from a 200 OK: identities, GRUUs, service route, granted
//! expiry and the NAT verdict from the top Via.

use std::net::SocketAddr;
use std::time::Duration;

use rvoip_sip_core::{Response, Via};

use crate::sip::headers::{self, address_param, contact_addresses, contact_expires, name_addr_list};
use crate::sip::message::SipMessageExt;

/// Registration lifetimes at or below this are refreshed half-way through
pub const SHORT_EXPIRY_THRESHOLD_SECS: u32 = 1200;

/// Longer lifetimes are refreshed this long before they run out
pub const REFRESH_MARGIN_SECS: u32 = 600;

/// Delay before re-registering after the network granted `expiry` seconds
///
/// `expiry * 0.5` up to 1200 s, `expiry - 600` above.
pub fn refresh_delay(expiry: u32) -> Duration {
    if expiry <= SHORT_EXPIRY_THRESHOLD_SECS {
        Duration::from_secs(expiry as u64).mul_f64(0.5)
    } else {
        Duration::from_secs((expiry - REFRESH_MARGIN_SECS) as u64)
    }
}

/// Address translation seen between us and the registrar
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NatStatus {
    pub behind_nat: bool,
    pub public_address: Option<String>,
    pub public_port: Option<u16>,
}

impl NatStatus {
    /// Compare the top Via `received`/`rport` (or sent-by) with our own address
    pub fn detect(via: &Via, local: SocketAddr) -> Self {
        let Some(top) = via.headers().first() else {
            return Self::default();
        };
        let public_address = via
            .received()
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| headers::host_text(top.host()));
        let public_port = via.rport().flatten().or(top.port()).unwrap_or(local.port());
        let behind_nat = !headers::same_host(&public_address, &local.ip().to_string())
            || public_port != local.port();
        if behind_nat {
            Self {
                behind_nat,
                public_address: Some(public_address),
                public_port: Some(public_port),
            }
        } else {
            Self::default()
        }
    }
}

/// Everything extracted from a 200 OK to REGISTER
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrationOk {
    pub associated_uris: Vec<String>,
    pub public_gruu: Option<String>,
    pub temp_gruu: Option<String>,
    pub service_route: Vec<String>,
    pub nat: NatStatus,
    /// Lifetime granted by the network, `None` if the response carries none
    pub granted_expiry: Option<u32>,
}

impl RegistrationOk {
    pub fn from_response(response: &Response, instance_id: Option<&str>, local: SocketAddr) -> Self {
        let contacts = contact_addresses(response.typed_headers());

        // Our binding is the one carrying our instance id; without one, the first
        let ours = match instance_id {
            Some(instance) => contacts.iter().copied().find(|c| {
                address_param(c, headers::PARAM_SIP_INSTANCE).as_deref() == Some(instance)
            }),
            None => contacts.first().copied(),
        };

        let contact_expiry = ours.and_then(contact_expires);
        let header_expiry = response
            .header_text(headers::EXPIRES)
            .and_then(|v| headers::parse_delta_seconds(&v));
        let granted_expiry = contact_expiry.or(header_expiry).filter(|e| *e > 0);

        let associated_uris = response
            .header_texts(headers::P_ASSOCIATED_URI)
            .iter()
            .flat_map(|v| name_addr_list(v))
            .map(|a| a.uri.to_string())
            .collect();

        let service_route = response
            .header_texts(headers::SERVICE_ROUTE)
            .iter()
            .flat_map(|v| name_addr_list(v))
            .map(|a| a.to_string())
            .collect();

        let nat = headers::top_via(response.typed_headers())
            .map(|via| NatStatus::detect(via, local))
            .unwrap_or_default();

        Self {
            associated_uris,
            public_gruu: ours.and_then(|c| address_param(c, headers::PARAM_PUB_GRUU)),
            temp_gruu: ours.and_then(|c| address_param(c, headers::PARAM_TEMP_GRUU)),
            service_route,
            nat,
            granted_expiry,
        }
    }
}
