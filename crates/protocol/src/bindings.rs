//! Binding identifiers used in HTTP headers and service descriptions.

// ── Constants ────────────────────────────────────────────────────────────────

pub const VID_TAXII_XML_10: &str = "urn:taxii.mitre.org:message:xml:1.0";
pub const VID_TAXII_XML_11: &str = "urn:taxii.mitre.org:message:xml:1.1";

pub const VID_TAXII_HTTP_10: &str = "urn:taxii.mitre.org:protocol:http:1.0";
pub const VID_TAXII_HTTPS_10: &str = "urn:taxii.mitre.org:protocol:https:1.0";

pub const VID_TAXII_SERVICES_10: &str = "urn:taxii.mitre.org:services:1.0";
pub const VID_TAXII_SERVICES_11: &str = "urn:taxii.mitre.org:services:1.1";

/// Protocol bindings this server can speak.
pub const PROTOCOL_BINDINGS: &[&str] = &[VID_TAXII_HTTP_10, VID_TAXII_HTTPS_10];

/// Service bindings this server can speak.
pub const SERVICE_BINDINGS: &[&str] = &[VID_TAXII_SERVICES_11];

/// URL scheme implied by a protocol binding.
pub fn scheme_for_protocol(binding: &str) -> Option<&'static str> {
    match binding {
        VID_TAXII_HTTP_10 => Some("http"),
        VID_TAXII_HTTPS_10 => Some("https"),
        _ => None,
    }
}

/// Protocol binding advertised in responses.
pub fn protocol_for_transport(secure: bool) -> &'static str {
    if secure {
        VID_TAXII_HTTPS_10
    } else {
        VID_TAXII_HTTP_10
    }
}

// ── Supported sets ───────────────────────────────────────────────────────────

/// The binding sets the header negotiator checks requests and responses
/// against. Built once at startup from the codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupportedBindings {
    pub message: Vec<String>,
    pub protocol: Vec<String>,
    pub service: Vec<String>,
}

impl SupportedBindings {
    pub fn from_codec(codec: &dyn crate::MessageCodec) -> Self {
        fn owned(values: &[&str]) -> Vec<String> {
            values.iter().map(|v| (*v).to_string()).collect()
        }
        Self {
            message: owned(codec.message_bindings()),
            protocol: owned(codec.protocol_bindings()),
            service: owned(codec.service_bindings()),
        }
    }

    pub fn supports_message(&self, binding: &str) -> bool {
        self.message.iter().any(|b| b == binding)
    }

    pub fn supports_protocol(&self, binding: &str) -> bool {
        self.protocol.iter().any(|b| b == binding)
    }

    pub fn supports_service(&self, binding: &str) -> bool {
        self.service.iter().any(|b| b == binding)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schemes() {
        assert_eq!(scheme_for_protocol(VID_TAXII_HTTP_10), Some("http"));
        assert_eq!(scheme_for_protocol(VID_TAXII_HTTPS_10), Some("https"));
        assert_eq!(scheme_for_protocol("urn:example:protocol"), None);
        assert_eq!(protocol_for_transport(true), VID_TAXII_HTTPS_10);
    }

    #[test]
    fn supported_sets_from_xml_codec() {
        let supported = SupportedBindings::from_codec(&crate::XmlCodec);
        assert!(supported.supports_message(VID_TAXII_XML_11));
        assert!(!supported.supports_message(VID_TAXII_XML_10));
        assert!(supported.supports_protocol(VID_TAXII_HTTPS_10));
        assert!(supported.supports_service(VID_TAXII_SERVICES_11));
        assert!(!supported.supports_service(VID_TAXII_SERVICES_10));
    }
}
