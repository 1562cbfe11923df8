//! HTTP header negotiation.
//!
//! Two request checkpoints: [`validate_request_headers`] runs before the body
//! is decoded and can only reject with an uncorrelated `BadMessage`;
//! [`validate_request_headers_post_parse`] runs once the message id is known
//! and correlates every failure to it. Responses are checked with
//! [`validate_response_headers`] before they leave the server.

use http::{HeaderMap, HeaderName, HeaderValue, header};

use crate::{
    bindings::{SupportedBindings, VID_TAXII_SERVICES_11, protocol_for_transport},
    messages::Message,
    status::{StatusError, StatusKind},
};

pub const X_TAXII_ACCEPT: HeaderName = HeaderName::from_static("x-taxii-accept");
pub const X_TAXII_CONTENT_TYPE: HeaderName = HeaderName::from_static("x-taxii-content-type");
pub const X_TAXII_CONTENT_TYPES: HeaderName = HeaderName::from_static("x-taxii-content-types");
pub const X_TAXII_PROTOCOL: HeaderName = HeaderName::from_static("x-taxii-protocol");
pub const X_TAXII_SERVICES: HeaderName = HeaderName::from_static("x-taxii-services");

pub const CONTENT_TYPE_XML: &str = "application/xml";
pub const CONTENT_TYPE_JSON: &str = "application/json";

fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim)
}

/// Whether the `Accept` header admits `mime`. A missing header accepts
/// everything; `*/*` and `type/*` wildcards are honoured; `q=0` excludes.
pub fn accepts(headers: &HeaderMap, mime: &str) -> bool {
    let Some(accept) = header_str(headers, &header::ACCEPT) else {
        return true;
    };
    let major = mime.split('/').next().unwrap_or(mime);
    accept.split(',').any(|entry| {
        let mut parts = entry.split(';').map(str::trim);
        let range = parts.next().unwrap_or("");
        let refused = parts.any(|p| {
            p.strip_prefix("q=")
                .and_then(|q| q.parse::<f32>().ok())
                .is_some_and(|q| q <= 0.0)
        });
        if refused {
            return false;
        }
        range.eq_ignore_ascii_case(mime)
            || range == "*/*"
            || range
                .strip_suffix("/*")
                .is_some_and(|m| m.eq_ignore_ascii_case(major))
    })
}

/// Like [`accepts`] but only true when the client names `mime` explicitly.
pub fn explicitly_accepts(headers: &HeaderMap, mime: &str) -> bool {
    header_str(headers, &header::ACCEPT).is_some_and(|accept| {
        accept.split(',').any(|entry| {
            entry
                .split(';')
                .next()
                .is_some_and(|range| range.trim().eq_ignore_ascii_case(mime))
        })
    })
}

/// Checks that can run before the body is decoded.
pub fn validate_request_headers(
    headers: &HeaderMap,
    supported: &SupportedBindings,
) -> Result<(), StatusError> {
    let Some(taxii_content_type) = header_str(headers, &X_TAXII_CONTENT_TYPE) else {
        return Err(StatusError::bad_message(
            "Header X-TAXII-Content-Type was not specified",
        ));
    };
    if !supported.supports_message(taxii_content_type) {
        return Err(StatusError::bad_message(format!(
            "TAXII Content Type '{taxii_content_type}' is not supported"
        )));
    }

    let content_type = header_str(headers, &header::CONTENT_TYPE).unwrap_or("");
    if !content_type
        .to_ascii_lowercase()
        .contains(CONTENT_TYPE_XML)
    {
        return Err(StatusError::bad_message(
            "The specified value of Content-Type is not supported",
        ));
    }

    if header_str(headers, &X_TAXII_SERVICES).is_none() {
        return Err(StatusError::bad_message(
            "Header X-TAXII-Services was not specified",
        ));
    }

    Ok(())
}

/// Checks that need the decoded message. Every failure is correlated to the
/// message id.
pub fn validate_request_headers_post_parse(
    headers: &HeaderMap,
    message: &Message,
    supported: &SupportedBindings,
) -> Result<(), StatusError> {
    check_post_parse(headers, message, supported)
        .map_err(|e| e.in_response_to(message.message_id()))
}

fn check_post_parse(
    headers: &HeaderMap,
    message: &Message,
    supported: &SupportedBindings,
) -> Result<(), StatusError> {
    let services = header_str(headers, &X_TAXII_SERVICES).unwrap_or("");
    if !supported.supports_service(services) {
        return Err(StatusError::failure(
            "The value of X-TAXII-Services was not recognized",
        ));
    }

    if let Some(protocol) = header_str(headers, &X_TAXII_PROTOCOL)
        && !supported.supports_protocol(protocol)
    {
        return Err(StatusError::new(
            StatusKind::UnsupportedProtocol {
                supported: supported.protocol.clone(),
            },
            "The specified value of X-TAXII-Protocol is not supported",
        ));
    }

    if let Some(accept) = header_str(headers, &X_TAXII_ACCEPT)
        && !supported.supports_message(accept)
    {
        return Err(StatusError::new(
            StatusKind::UnsupportedMessage {
                supported: supported.message.clone(),
            },
            "The specified value of X-TAXII-Accept is not recognized",
        ));
    }

    let declared = header_str(headers, &X_TAXII_CONTENT_TYPE).unwrap_or("");
    if declared != message.message_binding() {
        return Err(StatusError::new(
            StatusKind::UnsupportedMessage {
                supported: supported.message.clone(),
            },
            format!(
                "X-TAXII-Content-Type '{declared}' does not match the message binding '{}'",
                message.message_binding()
            ),
        ));
    }

    Ok(())
}

/// Headers for a response carrying a message in `message_binding`.
pub fn response_headers(message_binding: &'static str, secure: bool) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE_XML));
    headers.insert(X_TAXII_CONTENT_TYPE, HeaderValue::from_static(message_binding));
    headers.insert(
        X_TAXII_PROTOCOL,
        HeaderValue::from_static(protocol_for_transport(secure)),
    );
    headers.insert(X_TAXII_SERVICES, HeaderValue::from_static(VID_TAXII_SERVICES_11));
    headers
}

/// Apply the request rule set to an outgoing response so the server never
/// emits something it would reject itself.
pub fn validate_response_headers(
    headers: &HeaderMap,
    supported: &SupportedBindings,
) -> Result<(), StatusError> {
    for name in [
        &header::CONTENT_TYPE,
        &X_TAXII_CONTENT_TYPE,
        &X_TAXII_PROTOCOL,
        &X_TAXII_SERVICES,
    ] {
        if header_str(headers, name).is_none() {
            return Err(StatusError::failure(format!(
                "Required response header not specified: {name}"
            )));
        }
    }
    let check = |name: &HeaderName, ok: &dyn Fn(&str) -> bool| {
        let value = header_str(headers, name).unwrap_or("");
        if ok(value) {
            Ok(())
        } else {
            Err(StatusError::failure(format!(
                "Response header {name} has unsupported value '{value}'"
            )))
        }
    };
    check(&X_TAXII_CONTENT_TYPE, &|v| supported.supports_message(v))?;
    check(&X_TAXII_PROTOCOL, &|v| supported.supports_protocol(v))?;
    check(&X_TAXII_SERVICES, &|v| supported.supports_service(v))?;
    Ok(())
}

/// Headers answering an OPTIONS request for a service.
pub fn options_headers(message_bindings: &[String]) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::ALLOW, HeaderValue::from_static("POST, OPTIONS"));
    if let Ok(value) = HeaderValue::from_str(&message_bindings.join(",")) {
        headers.insert(X_TAXII_CONTENT_TYPES, value);
    }
    headers
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    use crate::{
        XmlCodec,
        bindings::{VID_TAXII_HTTP_10, VID_TAXII_XML_10, VID_TAXII_XML_11},
        messages::DiscoveryRequest,
        status::StatusType,
    };

    fn supported() -> SupportedBindings {
        SupportedBindings::from_codec(&XmlCodec)
    }

    fn request_headers() -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/xml"));
        h.insert(header::ACCEPT, HeaderValue::from_static("application/xml"));
        h.insert(X_TAXII_CONTENT_TYPE, HeaderValue::from_static(VID_TAXII_XML_11));
        h.insert(X_TAXII_SERVICES, HeaderValue::from_static(VID_TAXII_SERVICES_11));
        h.insert(X_TAXII_PROTOCOL, HeaderValue::from_static(VID_TAXII_HTTP_10));
        h
    }

    fn discovery() -> Message {
        DiscoveryRequest {
            message_id: "req-1".into(),
        }
        .into()
    }

    #[test]
    fn pre_parse_accepts_valid_headers() {
        validate_request_headers(&request_headers(), &supported()).unwrap();
    }

    #[test]
    fn pre_parse_rejects_missing_taxii_content_type() {
        let mut h = request_headers();
        h.remove(X_TAXII_CONTENT_TYPE);
        let err = validate_request_headers(&h, &supported()).unwrap_err();
        assert_eq!(err.status_type(), StatusType::BadMessage);
        assert!(err.in_response_to.is_none());
    }

    #[test]
    fn pre_parse_rejects_unsupported_binding_and_content_type() {
        let mut h = request_headers();
        h.insert(X_TAXII_CONTENT_TYPE, HeaderValue::from_static(VID_TAXII_XML_10));
        assert_eq!(
            validate_request_headers(&h, &supported())
                .unwrap_err()
                .status_type(),
            StatusType::BadMessage
        );

        let mut h = request_headers();
        h.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        assert!(validate_request_headers(&h, &supported()).is_err());

        let mut h = request_headers();
        h.remove(X_TAXII_SERVICES);
        assert!(validate_request_headers(&h, &supported()).is_err());
    }

    #[test]
    fn post_parse_correlates_failures() {
        let mut h = request_headers();
        h.insert(X_TAXII_SERVICES, HeaderValue::from_static("urn:unknown"));
        let err = validate_request_headers_post_parse(&h, &discovery(), &supported()).unwrap_err();
        assert_eq!(err.status_type(), StatusType::Failure);
        assert_eq!(err.in_response_to.as_deref(), Some("req-1"));
    }

    #[test]
    fn post_parse_reports_supported_alternatives() {
        let mut h = request_headers();
        h.insert(X_TAXII_PROTOCOL, HeaderValue::from_static("urn:carrier-pigeon"));
        let err = validate_request_headers_post_parse(&h, &discovery(), &supported()).unwrap_err();
        assert_eq!(err.kind, StatusKind::UnsupportedProtocol {
            supported: supported().protocol
        });

        let mut h = request_headers();
        h.insert(X_TAXII_ACCEPT, HeaderValue::from_static(VID_TAXII_XML_10));
        let err = validate_request_headers_post_parse(&h, &discovery(), &supported()).unwrap_err();
        assert_eq!(err.status_type(), StatusType::UnsupportedMessage);
        assert_eq!(err.in_response_to.as_deref(), Some("req-1"));
    }

    #[test]
    fn post_parse_optional_headers_may_be_absent() {
        let mut h = request_headers();
        h.remove(X_TAXII_PROTOCOL);
        validate_request_headers_post_parse(&h, &discovery(), &supported()).unwrap();
    }

    #[test]
    fn response_headers_pass_own_validation() {
        for secure in [false, true] {
            let h = response_headers(VID_TAXII_XML_11, secure);
            validate_response_headers(&h, &supported()).unwrap();
        }
        let mut h = response_headers(VID_TAXII_XML_11, false);
        h.remove(X_TAXII_SERVICES);
        assert!(validate_response_headers(&h, &supported()).is_err());
    }

    #[test]
    fn accept_matching() {
        let mut h = HeaderMap::new();
        assert!(accepts(&h, CONTENT_TYPE_XML));
        assert!(!explicitly_accepts(&h, CONTENT_TYPE_JSON));

        h.insert(header::ACCEPT, HeaderValue::from_static("application/*;q=0.5"));
        assert!(accepts(&h, CONTENT_TYPE_XML));

        h.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        assert!(!accepts(&h, CONTENT_TYPE_XML));
        assert!(explicitly_accepts(&h, CONTENT_TYPE_JSON));

        h.insert(
            header::ACCEPT,
            HeaderValue::from_static("application/xml;q=0, */*"),
        );
        assert!(accepts(&h, CONTENT_TYPE_XML));
    }

    #[test]
    fn options_advertises_bindings() {
        let h = options_headers(&[VID_TAXII_XML_11.to_string()]);
        assert_eq!(h.get(header::ALLOW).unwrap(), "POST, OPTIONS");
        assert_eq!(h.get(X_TAXII_CONTENT_TYPES).unwrap(), VID_TAXII_XML_11);
    }
}
