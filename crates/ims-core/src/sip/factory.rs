//! Request and response builders
//!
//! Builds the handful of messages the engine originates from a [`DialogPath`].

use std::net::SocketAddr;

use rvoip_sip_core::types::contact::{Contact, ContactParamInfo};
use rvoip_sip_core::types::param::{GenericValue, Param};
use rvoip_sip_core::types::route::Route;
use rvoip_sip_core::types::To;
use rvoip_sip_core::{
    Address, CSeq, CallId, Expires, From, MaxForwards, Method, Request, Response, StatusCode,
    TypedHeader, Uri, Via,
};

use crate::dialog::{generate_branch, DialogPath};
use crate::error::ImsResult;
use crate::sip::headers::{self, unquote};
use crate::sip::message::raw_header;

pub const CONTENT_TYPE_SDP: &str = "application/sdp";

fn via(local_addr: SocketAddr) -> ImsResult<TypedHeader> {
    let via = Via::new(
        "SIP",
        "2.0",
        "UDP",
        local_addr.ip().to_string(),
        Some(local_addr.port()),
        vec![Param::branch(generate_branch()), Param::Rport(None)],
    )?;
    Ok(TypedHeader::Via(via))
}

/// `name` or `name=value` feature tag as a Contact parameter
fn feature_param(tag: &str) -> Param {
    match tag.split_once('=') {
        Some((name, value)) if value.trim().starts_with('"') => Param::Other(
            name.trim().to_string(),
            Some(GenericValue::Quoted(unquote(value).to_string())),
        ),
        Some((name, value)) => Param::Other(
            name.trim().to_string(),
            Some(GenericValue::Token(value.trim().to_string())),
        ),
        None => Param::Other(tag.trim().to_string(), None),
    }
}

fn contact(local_addr: SocketAddr, instance_id: Option<&str>, feature_tags: &[String]) -> ImsResult<TypedHeader> {
    let mut address = Address::new(format!("sip:{}", local_addr).parse::<Uri>()?);
    if let Some(instance) = instance_id {
        address.params.push(Param::Other(
            headers::PARAM_SIP_INSTANCE.to_string(),
            Some(GenericValue::Quoted(instance.to_string())),
        ));
    }
    address.params.extend(feature_tags.iter().map(|t| feature_param(t)));
    Ok(TypedHeader::Contact(Contact::new_params(vec![ContactParamInfo { address }])))
}

fn party(uri: &str, tag: Option<&str>) -> ImsResult<Address> {
    let mut address = Address::new(uri.parse::<Uri>()?);
    if let Some(tag) = tag {
        address.params.push(Param::tag(tag));
    }
    Ok(address)
}

fn base_request(method: Method, dialog: &DialogPath, local_addr: SocketAddr) -> ImsResult<Request> {
    let mut request = Request::new(method.clone(), dialog.target().parse::<Uri>()?)
        .with_header(via(local_addr)?)
        .with_header(TypedHeader::MaxForwards(MaxForwards::new(70)))
        .with_header(TypedHeader::From(From::new(party(
            dialog.local_party(),
            Some(dialog.local_tag()),
        )?)))
        .with_header(TypedHeader::To(To::new(party(
            dialog.remote_party(),
            dialog.remote_tag(),
        )?)))
        .with_header(TypedHeader::CallId(CallId::new(dialog.call_id())))
        .with_header(TypedHeader::CSeq(CSeq::new(dialog.cseq(), method)));
    for route in dialog.route() {
        request = request.with_header(TypedHeader::Route(route.parse::<Route>()?));
    }
    Ok(request)
}

/// REGISTER for the dialog's current CSeq; `expiry` 0 builds an un-REGISTER
pub fn create_register(
    dialog: &DialogPath,
    local_addr: SocketAddr,
    expiry: u32,
    instance_id: Option<&str>,
    feature_tags: &[String],
) -> ImsResult<Request> {
    Ok(base_request(Method::Register, dialog, local_addr)?
        .with_header(contact(local_addr, instance_id, feature_tags)?)
        .with_header(TypedHeader::Expires(Expires(expiry)))
        .with_header(raw_header(headers::SUPPORTED, "path,gruu")))
}

/// re-INVITE carrying `content` within an established dialog
pub fn create_reinvite(
    dialog: &DialogPath,
    local_addr: SocketAddr,
    feature_tags: &[String],
    content: &str,
) -> ImsResult<Request> {
    let mut request = base_request(Method::Invite, dialog, local_addr)?
        .with_header(contact(local_addr, None, feature_tags)?)
        .with_header(raw_header(headers::CONTENT_TYPE, CONTENT_TYPE_SDP))
        .with_body(content.to_string());
    if !feature_tags.is_empty() {
        request = request.with_header(raw_header(
            headers::ACCEPT_CONTACT,
            format!("*;{}", feature_tags.join(";")),
        ));
    }
    Ok(request)
}

/// ACK for a 2xx to the dialog's last INVITE
pub fn create_ack(dialog: &DialogPath, local_addr: SocketAddr) -> ImsResult<Request> {
    base_request(Method::Ack, dialog, local_addr)
}

/// 200 OK answering a received re-INVITE
pub fn create_200_ok_reinvite(
    request: &Request,
    dialog: &DialogPath,
    local_addr: SocketAddr,
    feature_tags: &[String],
    content: &str,
) -> ImsResult<Response> {
    Ok(create_response(request, dialog, StatusCode::Ok.as_u16())?
        .with_header(contact(local_addr, None, feature_tags)?)
        .with_header(raw_header(headers::CONTENT_TYPE, CONTENT_TYPE_SDP))
        .with_body(content.to_string()))
}

/// Response to `request` carrying our tag in To
pub fn create_response(request: &Request, dialog: &DialogPath, status_code: u16) -> ImsResult<Response> {
    let mut response = Response::new(StatusCode::from_u16(status_code)?);
    for header in &request.headers {
        if matches!(
            header,
            TypedHeader::Via(_) | TypedHeader::From(_) | TypedHeader::CallId(_) | TypedHeader::CSeq(_)
        ) {
            response = response.with_header(header.clone());
        }
    }
    Ok(response.with_header(TypedHeader::To(To::new(party(
        dialog.local_party(),
        Some(dialog.local_tag()),
    )?))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sip::headers::{address_param, contact_addresses, top_via};
    use crate::sip::message::SipMessageExt;

    fn local() -> SocketAddr {
        "10.0.0.2:5060".parse().unwrap()
    }

    fn dialog() -> DialogPath {
        DialogPath::new(
            "call-1@10.0.0.2",
            "sip:ims.example.com",
            "sip:alice@ims.example.com",
            "sip:alice@ims.example.com",
            vec!["<sip:pcscf.example.com;lr>".to_string()],
        )
    }

    #[test]
    fn test_register_headers() {
        let tags = vec![
            "+g.oma.sip-im".to_string(),
            "+g.3gpp.icsi-ref=\"urn%3Aurn-7%3A3gpp-service.ims.icsi.mmtel\"".to_string(),
        ];
        let request = create_register(&dialog(), local(), 3600, Some("<urn:gsma:imei:1>"), &tags).unwrap();

        assert_eq!(request.method, Method::Register);
        assert_eq!(request.uri.to_string(), "sip:ims.example.com");
        assert_eq!(request.cseq_number(), Some(1));
        assert_eq!(request.call_id_value(), Some("call-1@10.0.0.2"));
        assert!(request.typed_headers().iter().any(|h| matches!(h, TypedHeader::Expires(e) if e.0 == 3600)));
        assert!(request.typed_headers().iter().any(|h| matches!(h, TypedHeader::Route(_))));

        let contacts = contact_addresses(request.typed_headers());
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].uri.to_string(), "sip:10.0.0.2:5060");
        assert_eq!(
            address_param(contacts[0], headers::PARAM_SIP_INSTANCE).as_deref(),
            Some("<urn:gsma:imei:1>")
        );
        assert_eq!(address_param(contacts[0], "+g.oma.sip-im").as_deref(), Some(""));
        assert_eq!(
            address_param(contacts[0], "+g.3gpp.icsi-ref").as_deref(),
            Some("urn%3Aurn-7%3A3gpp-service.ims.icsi.mmtel")
        );

        let via = top_via(request.typed_headers()).unwrap();
        assert_eq!(via.headers()[0].host().to_string(), "10.0.0.2");
        assert_eq!(via.headers()[0].port(), Some(5060));
    }

    #[test]
    fn test_unregister_has_zero_expiry() {
        let request = create_register(&dialog(), local(), 0, None, &[]).unwrap();
        assert!(request.typed_headers().iter().any(|h| matches!(h, TypedHeader::Expires(e) if e.0 == 0)));
    }

    #[test]
    fn test_reinvite_and_answer() {
        let mut dialog = dialog();
        dialog.set_remote_tag("remote-1");
        let reinvite = create_reinvite(&dialog, local(), &["+g.oma.sip-im".to_string()], "v=0").unwrap();
        assert_eq!(reinvite.method, Method::Invite);
        assert_eq!(reinvite.content(), Some("v=0"));
        assert_eq!(reinvite.header_text(headers::CONTENT_TYPE).as_deref(), Some(CONTENT_TYPE_SDP));
        assert_eq!(reinvite.to().and_then(|to| to.tag()), Some("remote-1"));
        assert_eq!(
            reinvite.header_text(headers::ACCEPT_CONTACT).as_deref(),
            Some("*;+g.oma.sip-im")
        );

        let ok = create_200_ok_reinvite(&reinvite, &dialog, local(), &[], "v=0 answer").unwrap();
        assert_eq!(ok.status_code(), StatusCode::Ok.as_u16());
        assert_eq!(ok.cseq_number(), reinvite.cseq_number());
        assert_eq!(ok.call_id_value(), reinvite.call_id_value());
        assert_eq!(ok.content(), Some("v=0 answer"));
        assert_eq!(ok.header_text(headers::VIA), reinvite.header_text(headers::VIA));
    }

    #[test]
    fn test_malformed_target_is_an_error() {
        let mut dialog = dialog();
        dialog.set_target("not a uri");
        assert!(create_ack(&dialog, local()).is_err());
    }
}
