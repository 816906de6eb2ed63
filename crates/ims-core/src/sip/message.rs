//! Accessors over rvoip-sip-core messages
//!
//! The engine exchanges [`Request`]/[`Response`] values with the transport.
//! [`SipMessageExt`] adds the lookups it needs on top of the typed header
//! list: header text by name (for the IMS extension headers rvoip keeps as
//! `TypedHeader::Other`), Call-ID, CSeq and the body.

use rvoip_sip_core::{HeaderName, HeaderValue, Request, Response, TypedHeader};

/// Status codes the engine reacts to
pub mod status {
    pub const OK: u16 = 200;
    pub const MOVED_TEMPORARILY: u16 = 302;
    pub const UNAUTHORIZED: u16 = 401;
    pub const NOT_FOUND: u16 = 404;
    pub const PROXY_AUTHENTICATION_REQUIRED: u16 = 407;
    pub const REQUEST_TIMEOUT: u16 = 408;
    pub const INTERVAL_TOO_BRIEF: u16 = 423;
    pub const TEMPORARILY_UNAVAILABLE: u16 = 480;
    pub const BUSY_HERE: u16 = 486;
    pub const SERVER_INTERNAL_ERROR: u16 = 500;
    pub const SERVICE_UNAVAILABLE: u16 = 503;
    pub const SERVER_TIMEOUT: u16 = 504;
    pub const BUSY_EVERYWHERE: u16 = 600;
    pub const DECLINE: u16 = 603;
}

/// Value part of a typed header, as it would appear on the wire
pub fn header_value_text(header: &TypedHeader) -> String {
    let line = header.to_string();
    match line.split_once(':') {
        Some((_, value)) => value.trim().to_string(),
        None => line,
    }
}

/// Extension header carried verbatim
pub fn raw_header(name: &str, value: impl Into<String>) -> TypedHeader {
    let name = name
        .parse::<HeaderName>()
        .unwrap_or_else(|_| HeaderName::Other(name.to_string()));
    TypedHeader::Other(name, HeaderValue::Raw(value.into().into_bytes()))
}

/// Header lookups shared by requests and responses
pub trait SipMessageExt {
    fn typed_headers(&self) -> &[TypedHeader];

    fn typed_headers_mut(&mut self) -> &mut Vec<TypedHeader>;

    fn body_bytes(&self) -> &[u8];

    fn call_id_value(&self) -> Option<&str> {
        self.typed_headers().iter().find_map(|h| match h {
            TypedHeader::CallId(call_id) => Some(call_id.0.as_str()),
            _ => None,
        })
    }

    fn cseq_number(&self) -> Option<u32> {
        self.typed_headers().iter().find_map(|h| match h {
            TypedHeader::CSeq(cseq) => Some(cseq.seq),
            _ => None,
        })
    }

    /// Every value of header `name` (case-insensitive), in message order
    fn header_texts(&self, name: &str) -> Vec<String> {
        self.typed_headers()
            .iter()
            .filter(|h| h.name().as_str().eq_ignore_ascii_case(name))
            .map(header_value_text)
            .collect()
    }

    fn header_text(&self, name: &str) -> Option<String> {
        self.header_texts(name).into_iter().next()
    }

    fn has_header(&self, name: &str) -> bool {
        self.typed_headers()
            .iter()
            .any(|h| h.name().as_str().eq_ignore_ascii_case(name))
    }

    /// Replace every header of the same name with `header`
    fn replace_header(&mut self, header: TypedHeader) {
        let name = header.name();
        let headers = self.typed_headers_mut();
        headers.retain(|h| h.name() != name);
        headers.push(header);
    }

    /// Body as text, `None` when empty or not UTF-8
    fn content(&self) -> Option<&str> {
        let body = self.body_bytes();
        if body.is_empty() {
            return None;
        }
        std::str::from_utf8(body).ok()
    }
}

impl SipMessageExt for Request {
    fn typed_headers(&self) -> &[TypedHeader] {
        &self.headers
    }

    fn typed_headers_mut(&mut self) -> &mut Vec<TypedHeader> {
        &mut self.headers
    }

    fn body_bytes(&self) -> &[u8] {
        &self.body
    }
}

impl SipMessageExt for Response {
    fn typed_headers(&self) -> &[TypedHeader] {
        &self.headers
    }

    fn typed_headers_mut(&mut self) -> &mut Vec<TypedHeader> {
        &mut self.headers
    }

    fn body_bytes(&self) -> &[u8] {
        &self.body
    }
}
