//! TAXII XML 1.1 message binding.

mod decode;
mod dom;
mod encode;

use crate::{
    bindings::VID_TAXII_XML_11,
    codec::MessageCodec,
    error::Result,
    messages::Message,
    status::StatusError,
};

pub const NS_TAXII_XML_11: &str = "http://taxii.mitre.org/messages/taxii_xml_binding-1.1";

const PREFIX: &str = "taxii_11";

const MESSAGE_BINDINGS: &[&str] = &[VID_TAXII_XML_11];

/// Codec for `urn:taxii.mitre.org:message:xml:1.1`.
#[derive(Debug, Clone, Copy, Default)]
pub struct XmlCodec;

impl MessageCodec for XmlCodec {
    fn message_bindings(&self) -> &'static [&'static str] {
        MESSAGE_BINDINGS
    }

    fn parse(&self, content_type: &str, body: &[u8]) -> std::result::Result<Message, StatusError> {
        if !MESSAGE_BINDINGS.contains(&content_type) {
            return Err(StatusError::bad_message(format!(
                "Message binding '{content_type}' is not supported"
            )));
        }
        let root = dom::parse_document(body)?;
        decode::decode(&root)
    }

    fn serialize(&self, message: &Message) -> Result<Vec<u8>> {
        encode::encode(message).map(String::into_bytes)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        chrono::{TimeZone, Utc},
        ctigate_common::{
            ContentBinding,
            entities::{CollectionType, PollRequestParameters, ResponseType, ServiceType, SubscriptionStatus},
        },
    };

    use super::*;
    use crate::{
        messages::*,
        status::{StatusKind, StatusType, detail},
    };

    fn parse(xml: &str) -> std::result::Result<Message, StatusError> {
        XmlCodec.parse(VID_TAXII_XML_11, xml.as_bytes())
    }

    fn reparse(message: &Message) -> Message {
        let bytes = XmlCodec.serialize(message).unwrap();
        XmlCodec.parse(VID_TAXII_XML_11, &bytes).unwrap()
    }

    #[test]
    fn parses_discovery_request() {
        let msg = parse(&format!(
            r#"<taxii_11:Discovery_Request xmlns:taxii_11="{NS_TAXII_XML_11}" message_id="42"/>"#
        ))
        .unwrap();
        assert_eq!(
            msg,
            Message::DiscoveryRequest(DiscoveryRequest {
                message_id: "42".into()
            })
        );
    }

    #[test]
    fn default_namespace_is_accepted() {
        let msg = parse(&format!(
            r#"<Collection_Information_Request xmlns="{NS_TAXII_XML_11}" message_id="7"/>"#
        ))
        .unwrap();
        assert_eq!(msg.message_type(), MessageType::CollectionInformationRequest);
    }

    #[test]
    fn parses_poll_request_with_parameters() {
        let xml = format!(
            r#"<taxii_11:Poll_Request xmlns:taxii_11="{NS_TAXII_XML_11}" message_id="1" collection_name="feed">
                <taxii_11:Exclusive_Begin_Timestamp>2014-12-19T00:00:00Z</taxii_11:Exclusive_Begin_Timestamp>
                <taxii_11:Inclusive_End_Timestamp>2014-12-20T00:00:00+00:00</taxii_11:Inclusive_End_Timestamp>
                <taxii_11:Poll_Parameters allow_asynch="false">
                    <taxii_11:Response_Type>COUNT_ONLY</taxii_11:Response_Type>
                    <taxii_11:Content_Binding binding_id="urn:stix.mitre.org:xml:1.1.1">
                        <taxii_11:Subtype subtype_id="indicators"/>
                    </taxii_11:Content_Binding>
                </taxii_11:Poll_Parameters>
            </taxii_11:Poll_Request>"#
        );
        let Message::PollRequest(req) = parse(&xml).unwrap() else {
            panic!("expected poll request");
        };
        assert_eq!(req.collection_name, "feed");
        assert_eq!(
            req.exclusive_begin_timestamp_label,
            Some(Utc.with_ymd_and_hms(2014, 12, 19, 0, 0, 0).unwrap())
        );
        let params = req.poll_parameters.unwrap();
        assert_eq!(params.response_type, ResponseType::CountOnly);
        assert_eq!(params.content_bindings, vec![ContentBinding::with_subtypes(
            "urn:stix.mitre.org:xml:1.1.1",
            ["indicators"]
        )]);
    }

    #[test]
    fn poll_request_needs_subscription_or_parameters() {
        let xml = format!(
            r#"<taxii_11:Poll_Request xmlns:taxii_11="{NS_TAXII_XML_11}" message_id="1" collection_name="feed"/>"#
        );
        assert_eq!(parse(&xml).unwrap_err().status_type(), StatusType::BadMessage);
    }

    #[test]
    fn parses_inbox_message_with_embedded_content() {
        let xml = format!(
            r#"<taxii_11:Inbox_Message xmlns:taxii_11="{NS_TAXII_XML_11}" message_id="in-1">
                <taxii_11:Destination_Collection_Name>feed</taxii_11:Destination_Collection_Name>
                <taxii_11:Content_Block>
                    <taxii_11:Content_Binding binding_id="urn:stix.mitre.org:xml:1.1.1"/>
                    <taxii_11:Content><stix:STIX_Package xmlns:stix="http://stix.mitre.org/stix-1"/></taxii_11:Content>
                    <taxii_11:Timestamp_Label>2015-01-01T10:00:00.5Z</taxii_11:Timestamp_Label>
                </taxii_11:Content_Block>
                <taxii_11:Content_Block>
                    <taxii_11:Content_Binding binding_id="urn:custom"/>
                    <taxii_11:Content>plain &amp; simple</taxii_11:Content>
                </taxii_11:Content_Block>
            </taxii_11:Inbox_Message>"#
        );
        let Message::InboxMessage(inbox) = parse(&xml).unwrap() else {
            panic!("expected inbox message");
        };
        assert_eq!(inbox.destination_collection_names, vec!["feed".to_string()]);
        assert_eq!(inbox.content_blocks.len(), 2);
        assert_eq!(
            inbox.content_blocks[0].content,
            r#"<stix:STIX_Package xmlns:stix="http://stix.mitre.org/stix-1"/>"#
        );
        assert!(inbox.content_blocks[0].timestamp_label.is_some());
        assert_eq!(inbox.content_blocks[1].content, "plain & simple");
        assert_eq!(inbox.content_blocks[1].timestamp_label, None);
    }

    #[test]
    fn rejects_bad_documents() {
        let cases = [
            "<not-closed".to_string(),
            r#"<Discovery_Request xmlns="urn:wrong" message_id="1"/>"#.to_string(),
            format!(r#"<taxii_11:Nope xmlns:taxii_11="{NS_TAXII_XML_11}" message_id="1"/>"#),
            format!(r#"<taxii_11:Discovery_Request xmlns:taxii_11="{NS_TAXII_XML_11}"/>"#),
            format!(
                r#"<taxii_11:Subscription_Management_Request xmlns:taxii_11="{NS_TAXII_XML_11}" message_id="1" collection_name="c" action="DANCE"/>"#
            ),
        ];
        for xml in cases {
            let err = parse(&xml).unwrap_err();
            assert_eq!(err.status_type(), StatusType::BadMessage, "{xml}");
            assert!(err.in_response_to.is_none());
        }
    }

    #[test]
    fn timestamps_finer_than_a_microsecond_are_rejected() {
        let poll = |begin: &str| {
            format!(
                r#"<taxii_11:Poll_Request xmlns:taxii_11="{NS_TAXII_XML_11}" message_id="p-1" collection_name="feed">
                    <taxii_11:Exclusive_Begin_Timestamp>{begin}</taxii_11:Exclusive_Begin_Timestamp>
                    <taxii_11:Poll_Parameters/>
                </taxii_11:Poll_Request>"#
            )
        };

        let err = parse(&poll("2015-01-01T10:00:00.0000001Z")).unwrap_err();
        assert_eq!(err.status_type(), StatusType::BadMessage);

        let Message::PollRequest(request) = parse(&poll("2015-01-01T10:00:00.000001Z")).unwrap()
        else {
            panic!("expected poll request");
        };
        assert_eq!(
            request.exclusive_begin_timestamp_label.unwrap().timestamp_subsec_micros(),
            1
        );
    }

    #[test]
    fn rejects_unknown_binding() {
        let err = XmlCodec
            .parse("urn:taxii.mitre.org:message:xml:1.0", b"<x/>")
            .unwrap_err();
        assert_eq!(err.status_type(), StatusType::BadMessage);
    }

    #[test]
    fn status_message_carries_details() {
        let status = StatusError::new(
            StatusKind::UnsupportedProtocol {
                supported: vec!["urn:a".into(), "urn:b".into()],
            },
            "nope",
        )
        .in_response_to("99")
        .to_status_message("m-1");
        let bytes = XmlCodec.serialize(&status.clone().into()).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("<taxii_11:Status_Message xmlns:taxii_11="));
        assert!(text.contains(r#"status_type="UNSUPPORTED_PROTOCOL""#));
        assert!(text.contains(&format!(r#"<taxii_11:Detail name="{}">"#, detail::SUPPORTED_PROTOCOL)));
        assert_eq!(reparse(&status.into()), Message::StatusMessage(StatusMessage {
            message_id: "m-1".into(),
            in_response_to: "99".into(),
            status_type: StatusType::UnsupportedProtocol,
            status_details: vec![StatusDetail::new(detail::SUPPORTED_PROTOCOL, [
                "urn:a".to_string(),
                "urn:b".to_string()
            ])],
            message: Some("nope".into()),
        }));
    }

    #[test]
    fn escapes_attributes_and_text() {
        let msg: Message = StatusMessage {
            message_id: "a\"b".into(),
            in_response_to: "<0>".into(),
            status_type: StatusType::Failure,
            status_details: Vec::new(),
            message: Some("x & y".into()),
        }
        .into();
        let text = String::from_utf8(XmlCodec.serialize(&msg).unwrap()).unwrap();
        assert!(text.contains("message_id=\"a&quot;b\""));
        assert!(text.contains("x &amp; y"));
        assert_eq!(reparse(&msg), msg);
    }

    #[test]
    fn poll_response_survives_serialization() {
        let end = Utc.with_ymd_and_hms(2020, 5, 1, 12, 0, 0).unwrap();
        let msg: Message = PollResponse {
            message_id: "r".into(),
            in_response_to: "q".into(),
            collection_name: "feed".into(),
            more: true,
            result_id: Some("rs-1".into()),
            result_part_number: 1,
            subscription_id: None,
            exclusive_begin_timestamp_label: None,
            inclusive_end_timestamp_label: end,
            record_count: Some(RecordCount {
                record_count: 12,
                partial_count: true,
            }),
            message: None,
            content_blocks: vec![
                ContentBlockPayload {
                    content_binding: ContentBinding::new("urn:stix"),
                    content: "<a><b/></a>".into(),
                    timestamp_label: Some(end),
                    message: None,
                },
                ContentBlockPayload {
                    content_binding: ContentBinding::new("urn:text"),
                    content: "<broken".into(),
                    timestamp_label: Some(end),
                    message: Some("note".into()),
                },
            ],
        }
        .into();
        assert_eq!(reparse(&msg), msg);
    }

    #[test]
    fn collection_and_discovery_responses_survive_serialization() {
        let contact = ServiceContact {
            protocol_binding: crate::bindings::VID_TAXII_HTTP_10.into(),
            address: "http://localhost/services/poll".into(),
            message_bindings: vec![VID_TAXII_XML_11.into()],
        };
        let info: Message = CollectionInformationResponse {
            message_id: "c".into(),
            in_response_to: "q".into(),
            collections: vec![CollectionInformation {
                collection_name: "set".into(),
                collection_type: CollectionType::Set,
                available: true,
                description: "A set".into(),
                collection_volume: Some(3),
                supported_contents: vec![ContentBinding::new("urn:stix")],
                polling_services: vec![contact.clone()],
                subscription_services: Vec::new(),
                receiving_inbox_services: vec![ReceivingInboxService {
                    contact: contact.clone(),
                    supported_contents: Vec::new(),
                }],
            }],
        }
        .into();
        assert_eq!(reparse(&info), info);

        let discovery: Message = DiscoveryResponse {
            message_id: "d".into(),
            in_response_to: "q".into(),
            service_instances: vec![ServiceInstance {
                service_type: ServiceType::Inbox,
                services_version: crate::bindings::VID_TAXII_SERVICES_11.into(),
                available: false,
                protocol_binding: contact.protocol_binding.clone(),
                address: contact.address.clone(),
                message_bindings: contact.message_bindings.clone(),
                inbox_service_accepted_content: vec![ContentBinding::with_subtypes("urn:stix", [
                    "x"
                ])],
                message: Some("inbox".into()),
            }],
        }
        .into();
        assert_eq!(reparse(&discovery), discovery);
    }

    #[test]
    fn subscription_response_survives_serialization() {
        let msg: Message = ManageCollectionSubscriptionResponse {
            message_id: "s".into(),
            in_response_to: "q".into(),
            collection_name: "feed".into(),
            message: None,
            subscription_instances: vec![SubscriptionInstance {
                subscription_id: "sub-1".into(),
                status: SubscriptionStatus::Paused,
                subscription_parameters: Some(PollRequestParameters {
                    response_type: ResponseType::Full,
                    content_bindings: Vec::new(),
                }),
                poll_instances: Vec::new(),
            }],
        }
        .into();
        assert_eq!(reparse(&msg), msg);
    }
}
