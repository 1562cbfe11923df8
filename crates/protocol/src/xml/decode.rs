//! Element tree to typed messages.

use {
    chrono::{DateTime, Utc},
    ctigate_common::{
        ContentBinding,
        entities::{CollectionType, PollRequestParameters, ResponseType, ServiceType, SubscriptionStatus},
    },
};

use crate::{
    messages::*,
    status::{StatusError, StatusType},
    xml::{NS_TAXII_XML_11, dom::Element},
};

type Result<T> = std::result::Result<T, StatusError>;

pub(crate) fn decode(root: &Element) -> Result<Message> {
    if root.namespace.as_deref() != Some(NS_TAXII_XML_11) {
        return Err(StatusError::bad_message(format!(
            "Message namespace is not {NS_TAXII_XML_11}"
        )));
    }
    let Some(message_type) = MessageType::from_element_name(&root.name) else {
        return Err(StatusError::bad_message(format!(
            "Unknown message type: {}",
            root.name
        )));
    };
    Ok(match message_type {
        MessageType::DiscoveryRequest => DiscoveryRequest {
            message_id: message_id(root)?,
        }
        .into(),
        MessageType::DiscoveryResponse => discovery_response(root)?.into(),
        MessageType::CollectionInformationRequest => CollectionInformationRequest {
            message_id: message_id(root)?,
        }
        .into(),
        MessageType::CollectionInformationResponse => collection_information_response(root)?.into(),
        MessageType::ManageCollectionSubscriptionRequest => subscription_request(root)?.into(),
        MessageType::ManageCollectionSubscriptionResponse => subscription_response(root)?.into(),
        MessageType::PollRequest => poll_request(root)?.into(),
        MessageType::PollResponse => poll_response(root)?.into(),
        MessageType::PollFulfillmentRequest => PollFulfillmentRequest {
            message_id: message_id(root)?,
            collection_name: root.require_attr("collection_name")?.to_string(),
            result_id: root.require_attr("result_id")?.to_string(),
            result_part_number: part_number(root, root.require_attr("result_part_number")?)?,
        }
        .into(),
        MessageType::InboxMessage => inbox_message(root)?.into(),
        MessageType::StatusMessage => status_message(root)?.into(),
    })
}

// ── Scalars ──────────────────────────────────────────────────────────────────

fn message_id(el: &Element) -> Result<String> {
    let id = el.require_attr("message_id")?;
    if id.is_empty() {
        return Err(el.invalid("message_id is empty"));
    }
    Ok(id.to_string())
}

fn in_response_to(el: &Element) -> Result<String> {
    Ok(el.require_attr("in_response_to")?.to_string())
}

fn boolean(el: &Element, value: &str) -> Result<bool> {
    match value {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        other => Err(el.invalid(format!("'{other}' is not a boolean"))),
    }
}

fn optional_bool(el: &Element, name: &str, default: bool) -> Result<bool> {
    el.attr(name).map_or(Ok(default), |v| boolean(el, v))
}

fn part_number(el: &Element, value: &str) -> Result<u32> {
    value
        .parse()
        .map_err(|_| el.invalid(format!("'{value}' is not a part number")))
}

/// Timestamp labels are stored with microsecond precision; finer labels
/// would collapse onto their neighbours and break window boundaries.
fn timestamp(el: &Element, value: &str) -> Result<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| el.invalid(format!("'{value}' is not a timestamp ({e})")))?;
    if parsed.timestamp_subsec_nanos() % 1_000 != 0 {
        return Err(el.invalid(format!("'{value}' is more precise than a microsecond")));
    }
    Ok(parsed)
}

fn optional_timestamp(el: &Element, child: &str) -> Result<Option<DateTime<Utc>>> {
    el.child_text(child)
        .filter(|v| !v.is_empty())
        .map(|v| timestamp(el, v))
        .transpose()
}

fn optional_text(el: &Element, child: &str) -> Option<String> {
    el.child_text(child).map(str::to_string)
}

// ── Shared parts ─────────────────────────────────────────────────────────────

fn content_binding(el: &Element) -> Result<ContentBinding> {
    let subtypes = el
        .children_named("Subtype")
        .map(|s| s.require_attr("subtype_id").map(str::to_string))
        .collect::<Result<Vec<_>>>()?;
    Ok(ContentBinding::with_subtypes(
        el.require_attr("binding_id")?,
        subtypes,
    ))
}

fn content_bindings(el: &Element) -> Result<Vec<ContentBinding>> {
    el.children_named("Content_Binding").map(content_binding).collect()
}

fn message_bindings(el: &Element) -> Vec<String> {
    el.children_named("Message_Binding")
        .map(|m| m.text().to_string())
        .collect()
}

fn service_contact(el: &Element) -> Result<ServiceContact> {
    Ok(ServiceContact {
        protocol_binding: el.require_child_text("Protocol_Binding")?.to_string(),
        address: el.require_child_text("Address")?.to_string(),
        message_bindings: message_bindings(el),
    })
}

fn record_count(el: &Element) -> Result<Option<RecordCount>> {
    el.child("Record_Count")
        .map(|rc| {
            let text = rc.text();
            Ok(RecordCount {
                record_count: text
                    .parse()
                    .map_err(|_| rc.invalid(format!("'{text}' is not a count")))?,
                partial_count: optional_bool(rc, "partial_count", false)?,
            })
        })
        .transpose()
}

fn content_block(el: &Element) -> Result<ContentBlockPayload> {
    Ok(ContentBlockPayload {
        content_binding: content_binding(el.require_child("Content_Binding")?)?,
        content: el.require_child_text("Content")?.to_string(),
        timestamp_label: optional_timestamp(el, "Timestamp_Label")?,
        message: optional_text(el, "Message"),
    })
}

fn content_blocks(el: &Element) -> Result<Vec<ContentBlockPayload>> {
    el.children_named("Content_Block").map(content_block).collect()
}

fn request_parameters(el: &Element) -> Result<PollRequestParameters> {
    let response_type = match el.child_text("Response_Type") {
        Some(value) => value
            .parse::<ResponseType>()
            .map_err(|e| el.invalid(e))?,
        None => ResponseType::default(),
    };
    Ok(PollRequestParameters {
        response_type,
        content_bindings: content_bindings(el)?,
    })
}

// ── Messages ─────────────────────────────────────────────────────────────────

fn discovery_response(root: &Element) -> Result<DiscoveryResponse> {
    let service_instances = root
        .children_named("Service_Instance")
        .map(|si| {
            let service_type = ServiceType::from_wire(si.require_attr("service_type")?)
                .map_err(|e| si.invalid(e))?;
            Ok(ServiceInstance {
                service_type,
                services_version: si.require_attr("service_version")?.to_string(),
                available: optional_bool(si, "available", true)?,
                protocol_binding: si.require_child_text("Protocol_Binding")?.to_string(),
                address: si.require_child_text("Address")?.to_string(),
                message_bindings: message_bindings(si),
                inbox_service_accepted_content: content_bindings(si)?,
                message: optional_text(si, "Message"),
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(DiscoveryResponse {
        message_id: message_id(root)?,
        in_response_to: in_response_to(root)?,
        service_instances,
    })
}

fn collection_information_response(root: &Element) -> Result<CollectionInformationResponse> {
    let collections = root
        .children_named("Collection")
        .map(|c| {
            let collection_type = match c.attr("collection_type") {
                Some(value) => value
                    .parse::<CollectionType>()
                    .map_err(|e| c.invalid(e))?,
                None => CollectionType::default(),
            };
            let collection_volume = c
                .child_text("Collection_Volume")
                .map(|v| {
                    v.parse::<i64>()
                        .map_err(|_| c.invalid(format!("'{v}' is not a volume")))
                })
                .transpose()?;
            Ok(CollectionInformation {
                collection_name: c.require_attr("collection_name")?.to_string(),
                collection_type,
                available: optional_bool(c, "available", true)?,
                description: c.child_text("Description").unwrap_or_default().to_string(),
                collection_volume,
                supported_contents: content_bindings(c)?,
                polling_services: c
                    .children_named("Polling_Service")
                    .map(service_contact)
                    .collect::<Result<_>>()?,
                subscription_services: c
                    .children_named("Subscription_Service")
                    .map(service_contact)
                    .collect::<Result<_>>()?,
                receiving_inbox_services: c
                    .children_named("Receiving_Inbox_Service")
                    .map(|r| {
                        Ok(ReceivingInboxService {
                            contact: service_contact(r)?,
                            supported_contents: content_bindings(r)?,
                        })
                    })
                    .collect::<Result<_>>()?,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(CollectionInformationResponse {
        message_id: message_id(root)?,
        in_response_to: in_response_to(root)?,
        collections,
    })
}

fn subscription_request(root: &Element) -> Result<ManageCollectionSubscriptionRequest> {
    let action_name = root.require_attr("action")?;
    let action = SubscriptionAction::from_wire(action_name)
        .ok_or_else(|| root.invalid(format!("unknown action '{action_name}'")))?;
    Ok(ManageCollectionSubscriptionRequest {
        message_id: message_id(root)?,
        collection_name: root.require_attr("collection_name")?.to_string(),
        action,
        subscription_id: optional_text(root, "Subscription_ID"),
        subscription_parameters: root
            .child("Subscription_Parameters")
            .map(request_parameters)
            .transpose()?,
    })
}

fn subscription_response(root: &Element) -> Result<ManageCollectionSubscriptionResponse> {
    let subscription_instances = root
        .children_named("Subscription")
        .map(|s| {
            let status = match s.attr("status") {
                Some(value) => value
                    .parse::<SubscriptionStatus>()
                    .map_err(|e| s.invalid(e))?,
                None => SubscriptionStatus::default(),
            };
            Ok(SubscriptionInstance {
                subscription_id: s.require_child_text("Subscription_ID")?.to_string(),
                status,
                subscription_parameters: s
                    .child("Subscription_Parameters")
                    .map(request_parameters)
                    .transpose()?,
                poll_instances: s
                    .children_named("Poll_Instance")
                    .map(service_contact)
                    .collect::<Result<_>>()?,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(ManageCollectionSubscriptionResponse {
        message_id: message_id(root)?,
        in_response_to: in_response_to(root)?,
        collection_name: root.require_attr("collection_name")?.to_string(),
        message: optional_text(root, "Message"),
        subscription_instances,
    })
}

fn poll_request(root: &Element) -> Result<PollRequest> {
    let subscription_id = optional_text(root, "Subscription_ID");
    let poll_parameters = root
        .child("Poll_Parameters")
        .map(|p| {
            let params = request_parameters(p)?;
            Ok(PollParameters {
                allow_asynch: optional_bool(p, "allow_asynch", false)?,
                response_type: params.response_type,
                content_bindings: params.content_bindings,
            })
        })
        .transpose()?;
    if subscription_id.is_some() == poll_parameters.is_some() {
        return Err(root.invalid("exactly one of Subscription_ID and Poll_Parameters is required"));
    }
    Ok(PollRequest {
        message_id: message_id(root)?,
        collection_name: root.require_attr("collection_name")?.to_string(),
        exclusive_begin_timestamp_label: optional_timestamp(root, "Exclusive_Begin_Timestamp")?,
        inclusive_end_timestamp_label: optional_timestamp(root, "Inclusive_End_Timestamp")?,
        subscription_id,
        poll_parameters,
    })
}

fn poll_response(root: &Element) -> Result<PollResponse> {
    let end = root.require_child_text("Inclusive_End_Timestamp")?;
    Ok(PollResponse {
        message_id: message_id(root)?,
        in_response_to: in_response_to(root)?,
        collection_name: root.require_attr("collection_name")?.to_string(),
        more: optional_bool(root, "more", false)?,
        result_id: root.attr("result_id").map(str::to_string),
        result_part_number: root
            .attr("result_part_number")
            .map_or(Ok(1), |v| part_number(root, v))?,
        subscription_id: optional_text(root, "Subscription_ID"),
        exclusive_begin_timestamp_label: optional_timestamp(root, "Exclusive_Begin_Timestamp")?,
        inclusive_end_timestamp_label: timestamp(root, end)?,
        record_count: record_count(root)?,
        message: optional_text(root, "Message"),
        content_blocks: content_blocks(root)?,
    })
}

fn inbox_message(root: &Element) -> Result<InboxMessage> {
    let source_subscription = root
        .child("Source_Subscription")
        .map(|s| {
            Ok(SourceSubscription {
                collection_name: s.require_attr("collection_name")?.to_string(),
                subscription_id: s.require_child_text("Subscription_ID")?.to_string(),
                exclusive_begin_timestamp_label: optional_timestamp(
                    s,
                    "Exclusive_Begin_Timestamp_Label",
                )?,
                inclusive_end_timestamp_label: optional_timestamp(
                    s,
                    "Inclusive_End_Timestamp_Label",
                )?,
            })
        })
        .transpose()?;
    Ok(InboxMessage {
        message_id: message_id(root)?,
        result_id: root.attr("result_id").map(str::to_string),
        destination_collection_names: root
            .children_named("Destination_Collection_Name")
            .map(|d| d.text().to_string())
            .collect(),
        message: optional_text(root, "Message"),
        source_subscription,
        record_count: record_count(root)?,
        content_blocks: content_blocks(root)?,
    })
}

fn status_message(root: &Element) -> Result<StatusMessage> {
    let type_name = root.require_attr("status_type")?;
    let status_type = StatusType::from_wire(type_name)
        .ok_or_else(|| root.invalid(format!("unknown status type '{type_name}'")))?;
    let status_details = root
        .child("Status_Detail")
        .map(|sd| {
            sd.children_named("Detail")
                .map(|d| {
                    Ok(StatusDetail::new(
                        d.require_attr("name")?,
                        d.children_named("Value").map(|v| v.text().to_string()),
                    ))
                })
                .collect::<Result<Vec<_>>>()
        })
        .transpose()?
        .unwrap_or_default();
    Ok(StatusMessage {
        message_id: message_id(root)?,
        in_response_to: in_response_to(root)?,
        status_type,
        status_details,
        message: optional_text(root, "Message"),
    })
}
