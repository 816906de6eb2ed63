//! Header names and typed parameter extraction
//!
//! Contact, Via and the auth headers come out of rvoip-sip-core already
//! typed. The IMS extension headers (P-Associated-URI, Service-Route) are kept
//! as raw text by the parser and are read back through rvoip's `Route`
//! name-addr list grammar.

use std::net::IpAddr;

use rvoip_sip_core::types::contact::ContactValue;
use rvoip_sip_core::types::param::Param;
use rvoip_sip_core::types::route::Route;
use rvoip_sip_core::types::uri::Host;
use rvoip_sip_core::{Address, TypedHeader, Via};

pub const VIA: &str = "Via";
pub const EXPIRES: &str = "Expires";
pub const MIN_EXPIRES: &str = "Min-Expires";
pub const RETRY_AFTER: &str = "Retry-After";
pub const SUPPORTED: &str = "Supported";
pub const ACCEPT_CONTACT: &str = "Accept-Contact";
pub const CONTENT_TYPE: &str = "Content-Type";
pub const P_ASSOCIATED_URI: &str = "P-Associated-URI";
pub const SERVICE_ROUTE: &str = "Service-Route";
pub const WWW_AUTHENTICATE: &str = "WWW-Authenticate";
pub const AUTHORIZATION: &str = "Authorization";
pub const PROXY_AUTHENTICATE: &str = "Proxy-Authenticate";
pub const PROXY_AUTHORIZATION: &str = "Proxy-Authorization";
pub const AUTHENTICATION_INFO: &str = "Authentication-Info";

pub const PARAM_EXPIRES: &str = "expires";
pub const PARAM_SIP_INSTANCE: &str = "+sip.instance";
pub const PARAM_PUB_GRUU: &str = "pub-gruu";
pub const PARAM_TEMP_GRUU: &str = "temp-gruu";

/// Addresses of every Contact entry, across all Contact headers
pub fn contact_addresses(headers: &[TypedHeader]) -> Vec<&Address> {
    headers
        .iter()
        .filter_map(|h| match h {
            TypedHeader::Contact(contact) => Some(contact),
            _ => None,
        })
        .flat_map(|contact| contact.0.iter())
        .flat_map(|value| match value {
            ContactValue::Params(entries) => entries.iter().map(|e| &e.address).collect(),
            ContactValue::Star => Vec::new(),
        })
        .collect()
}

/// Value of parameter `name` on `address`, `Some("")` for a flag parameter
///
/// Header parameters win over URI parameters: an addr-spec Contact leaves
/// the boundary between the two to the parser.
pub fn address_param(address: &Address, name: &str) -> Option<String> {
    address
        .params
        .iter()
        .chain(address.uri.parameters.iter())
        .find(|p| p.key().eq_ignore_ascii_case(name))
        .map(|p| p.value().map(|v| unquote(&v).to_string()).unwrap_or_default())
}

pub fn unquote(value: &str) -> &str {
    let value = value.trim();
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

/// Registration lifetime granted to `address` by its `expires` parameter
pub fn contact_expires(address: &Address) -> Option<u32> {
    address_param(address, PARAM_EXPIRES).and_then(|v| parse_delta_seconds(&v))
}

/// Name-addr entries of a comma-separated list header (P-Associated-URI, Service-Route)
pub fn name_addr_list(value: &str) -> Vec<Address> {
    match value.parse::<Route>() {
        Ok(route) => route.0.into_iter().map(|entry| entry.0).collect(),
        Err(_) => Vec::new(),
    }
}

/// First Via header of a message
pub fn top_via(headers: &[TypedHeader]) -> Option<&Via> {
    headers.iter().find_map(|h| match h {
        TypedHeader::Via(via) => Some(via),
        _ => None,
    })
}

/// Leading delta-seconds of an Expires/Min-Expires/Retry-After value
///
/// `Retry-After: 120 (maintenance);duration=60` yields 120. Values past
/// `u32::MAX` saturate.
pub fn parse_delta_seconds(value: &str) -> Option<u32> {
    let digits: String = value
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    if digits.is_empty() {
        return None;
    }
    Some(digits.parse().unwrap_or(u32::MAX))
}

/// Host as written in a URI or Via
pub fn host_text(host: &Host) -> String {
    match host {
        Host::Domain(domain) => domain.clone(),
        Host::Address(ip) => ip.to_string(),
    }
}

/// Whether two host strings denote the same address
pub fn same_host(a: &str, b: &str) -> bool {
    match (a.parse::<IpAddr>(), b.parse::<IpAddr>()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a.eq_ignore_ascii_case(b),
    }
}
