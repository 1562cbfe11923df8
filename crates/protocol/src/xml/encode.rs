//! Typed messages to TAXII XML 1.1 bytes.

use std::fmt::Write as _;

use {
    chrono::{DateTime, SecondsFormat, Utc},
    ctigate_common::{ContentBinding, entities::PollRequestParameters},
    quick_xml::escape::escape,
};

use crate::{
    error::Result,
    messages::*,
    xml::{NS_TAXII_XML_11, PREFIX},
};

pub(crate) fn encode(message: &Message) -> Result<String> {
    let mut w = XmlWriter::default();
    match message {
        Message::DiscoveryRequest(m) => {
            w.empty_root(MessageType::DiscoveryRequest, &[("message_id", m.message_id.as_str())])?;
        },
        Message::DiscoveryResponse(m) => discovery_response(&mut w, m)?,
        Message::CollectionInformationRequest(m) => {
            w.empty_root(MessageType::CollectionInformationRequest, &[(
                "message_id",
                m.message_id.as_str(),
            )])?;
        },
        Message::CollectionInformationResponse(m) => collection_information_response(&mut w, m)?,
        Message::ManageCollectionSubscriptionRequest(m) => subscription_request(&mut w, m)?,
        Message::ManageCollectionSubscriptionResponse(m) => subscription_response(&mut w, m)?,
        Message::PollRequest(m) => poll_request(&mut w, m)?,
        Message::PollResponse(m) => poll_response(&mut w, m)?,
        Message::PollFulfillmentRequest(m) => {
            let part = m.result_part_number.to_string();
            w.empty_root(MessageType::PollFulfillmentRequest, &[
                ("message_id", m.message_id.as_str()),
                ("collection_name", m.collection_name.as_str()),
                ("result_id", m.result_id.as_str()),
                ("result_part_number", part.as_str()),
            ])?;
        },
        Message::InboxMessage(m) => inbox_message(&mut w, m)?,
        Message::StatusMessage(m) => status_message(&mut w, m)?,
    }
    Ok(w.finish())
}

// ── Writer ───────────────────────────────────────────────────────────────────

#[derive(Default)]
struct XmlWriter {
    out: String,
}

fn bool_str(value: bool) -> &'static str {
    if value { "true" } else { "false" }
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

impl XmlWriter {
    fn start_tag(&mut self, name: &str, attrs: &[(&str, &str)], root: bool) -> Result<()> {
        write!(self.out, "<{PREFIX}:{name}")?;
        if root {
            write!(self.out, " xmlns:{PREFIX}=\"{NS_TAXII_XML_11}\"")?;
        }
        for (key, value) in attrs {
            write!(self.out, " {key}=\"{}\"", escape(*value))?;
        }
        Ok(())
    }

    fn open_root(&mut self, message_type: MessageType, attrs: &[(&str, &str)]) -> Result<()> {
        self.start_tag(message_type.element_name(), attrs, true)?;
        self.out.push('>');
        Ok(())
    }

    fn empty_root(&mut self, message_type: MessageType, attrs: &[(&str, &str)]) -> Result<()> {
        self.start_tag(message_type.element_name(), attrs, true)?;
        self.out.push_str("/>");
        Ok(())
    }

    fn open(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<()> {
        self.start_tag(name, attrs, false)?;
        self.out.push('>');
        Ok(())
    }

    fn empty(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<()> {
        self.start_tag(name, attrs, false)?;
        self.out.push_str("/>");
        Ok(())
    }

    fn close(&mut self, name: &str) -> Result<()> {
        write!(self.out, "</{PREFIX}:{name}>")?;
        Ok(())
    }

    fn text(&mut self, name: &str, value: &str) -> Result<()> {
        write!(self.out, "<{PREFIX}:{name}>{}</{PREFIX}:{name}>", escape(value))?;
        Ok(())
    }

    fn opt_text(&mut self, name: &str, value: Option<&str>) -> Result<()> {
        match value {
            Some(v) => self.text(name, v),
            None => Ok(()),
        }
    }

    fn opt_timestamp(&mut self, name: &str, value: Option<&DateTime<Utc>>) -> Result<()> {
        match value {
            Some(ts) => self.text(name, &format_timestamp(ts)),
            None => Ok(()),
        }
    }

    /// Embedded XML is written as-is when it is well formed; anything else is
    /// escaped or wrapped in CDATA so the envelope stays valid.
    fn content(&mut self, value: &str) -> Result<()> {
        write!(self.out, "<{PREFIX}:Content>")?;
        let trimmed = value.trim_start();
        if trimmed.starts_with('<') {
            if is_well_formed(value) {
                self.out.push_str(value);
            } else {
                self.out.push_str("<![CDATA[");
                self.out.push_str(&value.replace("]]>", "]]]]><![CDATA[>"));
                self.out.push_str("]]>");
            }
        } else {
            self.out.push_str(&escape(value));
        }
        self.close("Content")
    }

    fn finish(self) -> String {
        self.out
    }
}

fn is_well_formed(fragment: &str) -> bool {
    let mut reader = quick_xml::Reader::from_str(fragment);
    let mut depth = 0usize;
    let mut roots = 0usize;
    loop {
        match reader.read_event() {
            Ok(quick_xml::events::Event::Start(_)) => {
                if depth == 0 {
                    roots += 1;
                }
                depth += 1;
            },
            Ok(quick_xml::events::Event::Empty(_)) if depth == 0 => roots += 1,
            Ok(quick_xml::events::Event::End(_)) => depth = depth.saturating_sub(1),
            Ok(quick_xml::events::Event::Eof) => return depth == 0 && roots == 1,
            Ok(_) => {},
            Err(_) => return false,
        }
    }
}

// ── Shared parts ─────────────────────────────────────────────────────────────

fn content_binding(w: &mut XmlWriter, binding: &ContentBinding) -> Result<()> {
    if binding.subtypes.is_empty() {
        return w.empty("Content_Binding", &[("binding_id", binding.binding.as_str())]);
    }
    w.open("Content_Binding", &[("binding_id", binding.binding.as_str())])?;
    for subtype in &binding.subtypes {
        w.empty("Subtype", &[("subtype_id", subtype.as_str())])?;
    }
    w.close("Content_Binding")
}

fn content_bindings(w: &mut XmlWriter, bindings: &[ContentBinding]) -> Result<()> {
    for binding in bindings {
        content_binding(w, binding)?;
    }
    Ok(())
}

fn contact_body(w: &mut XmlWriter, contact: &ServiceContact) -> Result<()> {
    w.text("Protocol_Binding", &contact.protocol_binding)?;
    w.text("Address", &contact.address)?;
    for binding in &contact.message_bindings {
        w.text("Message_Binding", binding)?;
    }
    Ok(())
}

fn service_contact(w: &mut XmlWriter, name: &str, contact: &ServiceContact) -> Result<()> {
    w.open(name, &[])?;
    contact_body(w, contact)?;
    w.close(name)
}

fn record_count(w: &mut XmlWriter, count: Option<&RecordCount>) -> Result<()> {
    let Some(count) = count else {
        return Ok(());
    };
    w.open("Record_Count", &[("partial_count", bool_str(count.partial_count))])?;
    write!(w.out, "{}", count.record_count)?;
    w.close("Record_Count")
}

fn content_blocks(w: &mut XmlWriter, blocks: &[ContentBlockPayload]) -> Result<()> {
    for block in blocks {
        w.open("Content_Block", &[])?;
        content_binding(w, &block.content_binding)?;
        w.content(&block.content)?;
        w.opt_timestamp("Timestamp_Label", block.timestamp_label.as_ref())?;
        w.opt_text("Message", block.message.as_deref())?;
        w.close("Content_Block")?;
    }
    Ok(())
}

fn request_parameters(w: &mut XmlWriter, name: &str, params: &PollRequestParameters) -> Result<()> {
    w.open(name, &[])?;
    w.text("Response_Type", params.response_type.as_str())?;
    content_bindings(w, &params.content_bindings)?;
    w.close(name)
}

// ── Messages ─────────────────────────────────────────────────────────────────

fn discovery_response(w: &mut XmlWriter, m: &DiscoveryResponse) -> Result<()> {
    w.open_root(MessageType::DiscoveryResponse, &[
        ("message_id", m.message_id.as_str()),
        ("in_response_to", m.in_response_to.as_str()),
    ])?;
    for si in &m.service_instances {
        w.open("Service_Instance", &[
            ("service_type", si.service_type.wire_name()),
            ("service_version", si.services_version.as_str()),
            ("available", bool_str(si.available)),
        ])?;
        w.text("Protocol_Binding", &si.protocol_binding)?;
        w.text("Address", &si.address)?;
        for binding in &si.message_bindings {
            w.text("Message_Binding", binding)?;
        }
        content_bindings(w, &si.inbox_service_accepted_content)?;
        w.opt_text("Message", si.message.as_deref())?;
        w.close("Service_Instance")?;
    }
    w.close(MessageType::DiscoveryResponse.element_name())
}

fn collection_information_response(
    w: &mut XmlWriter,
    m: &CollectionInformationResponse,
) -> Result<()> {
    w.open_root(MessageType::CollectionInformationResponse, &[
        ("message_id", m.message_id.as_str()),
        ("in_response_to", m.in_response_to.as_str()),
    ])?;
    for c in &m.collections {
        w.open("Collection", &[
            ("collection_name", c.collection_name.as_str()),
            ("collection_type", c.collection_type.as_str()),
            ("available", bool_str(c.available)),
        ])?;
        w.text("Description", &c.description)?;
        content_bindings(w, &c.supported_contents)?;
        if let Some(volume) = c.collection_volume {
            w.text("Collection_Volume", &volume.to_string())?;
        }
        for contact in &c.polling_services {
            service_contact(w, "Polling_Service", contact)?;
        }
        for contact in &c.subscription_services {
            service_contact(w, "Subscription_Service", contact)?;
        }
        for inbox in &c.receiving_inbox_services {
            w.open("Receiving_Inbox_Service", &[])?;
            contact_body(w, &inbox.contact)?;
            content_bindings(w, &inbox.supported_contents)?;
            w.close("Receiving_Inbox_Service")?;
        }
        w.close("Collection")?;
    }
    w.close(MessageType::CollectionInformationResponse.element_name())
}

fn subscription_request(w: &mut XmlWriter, m: &ManageCollectionSubscriptionRequest) -> Result<()> {
    w.open_root(MessageType::ManageCollectionSubscriptionRequest, &[
        ("message_id", m.message_id.as_str()),
        ("collection_name", m.collection_name.as_str()),
        ("action", m.action.as_str()),
    ])?;
    w.opt_text("Subscription_ID", m.subscription_id.as_deref())?;
    if let Some(params) = &m.subscription_parameters {
        request_parameters(w, "Subscription_Parameters", params)?;
    }
    w.close(MessageType::ManageCollectionSubscriptionRequest.element_name())
}

fn subscription_response(w: &mut XmlWriter, m: &ManageCollectionSubscriptionResponse) -> Result<()> {
    w.open_root(MessageType::ManageCollectionSubscriptionResponse, &[
        ("message_id", m.message_id.as_str()),
        ("in_response_to", m.in_response_to.as_str()),
        ("collection_name", m.collection_name.as_str()),
    ])?;
    w.opt_text("Message", m.message.as_deref())?;
    for s in &m.subscription_instances {
        w.open("Subscription", &[("status", s.status.as_str())])?;
        w.text("Subscription_ID", &s.subscription_id)?;
        if let Some(params) = &s.subscription_parameters {
            request_parameters(w, "Subscription_Parameters", params)?;
        }
        for contact in &s.poll_instances {
            service_contact(w, "Poll_Instance", contact)?;
        }
        w.close("Subscription")?;
    }
    w.close(MessageType::ManageCollectionSubscriptionResponse.element_name())
}

fn poll_request(w: &mut XmlWriter, m: &PollRequest) -> Result<()> {
    w.open_root(MessageType::PollRequest, &[
        ("message_id", m.message_id.as_str()),
        ("collection_name", m.collection_name.as_str()),
    ])?;
    w.opt_timestamp(
        "Exclusive_Begin_Timestamp",
        m.exclusive_begin_timestamp_label.as_ref(),
    )?;
    w.opt_timestamp(
        "Inclusive_End_Timestamp",
        m.inclusive_end_timestamp_label.as_ref(),
    )?;
    w.opt_text("Subscription_ID", m.subscription_id.as_deref())?;
    if let Some(params) = &m.poll_parameters {
        w.open("Poll_Parameters", &[("allow_asynch", bool_str(params.allow_asynch))])?;
        w.text("Response_Type", params.response_type.as_str())?;
        content_bindings(w, &params.content_bindings)?;
        w.close("Poll_Parameters")?;
    }
    w.close(MessageType::PollRequest.element_name())
}

fn poll_response(w: &mut XmlWriter, m: &PollResponse) -> Result<()> {
    let part = m.result_part_number.to_string();
    let mut attrs: Vec<(&str, &str)> = vec![
        ("message_id", m.message_id.as_str()),
        ("in_response_to", m.in_response_to.as_str()),
        ("collection_name", m.collection_name.as_str()),
        ("more", bool_str(m.more)),
        ("result_part_number", part.as_str()),
    ];
    if let Some(result_id) = &m.result_id {
        attrs.push(("result_id", result_id.as_str()));
    }
    w.open_root(MessageType::PollResponse, &attrs)?;
    w.opt_text("Subscription_ID", m.subscription_id.as_deref())?;
    w.opt_timestamp(
        "Exclusive_Begin_Timestamp",
        m.exclusive_begin_timestamp_label.as_ref(),
    )?;
    w.text(
        "Inclusive_End_Timestamp",
        &format_timestamp(&m.inclusive_end_timestamp_label),
    )?;
    record_count(w, m.record_count.as_ref())?;
    w.opt_text("Message", m.message.as_deref())?;
    content_blocks(w, &m.content_blocks)?;
    w.close(MessageType::PollResponse.element_name())
}

fn inbox_message(w: &mut XmlWriter, m: &InboxMessage) -> Result<()> {
    let mut attrs: Vec<(&str, &str)> = vec![("message_id", m.message_id.as_str())];
    if let Some(result_id) = &m.result_id {
        attrs.push(("result_id", result_id.as_str()));
    }
    w.open_root(MessageType::InboxMessage, &attrs)?;
    for name in &m.destination_collection_names {
        w.text("Destination_Collection_Name", name)?;
    }
    w.opt_text("Message", m.message.as_deref())?;
    if let Some(source) = &m.source_subscription {
        w.open("Source_Subscription", &[("collection_name", source.collection_name.as_str())])?;
        w.text("Subscription_ID", &source.subscription_id)?;
        w.opt_timestamp(
            "Exclusive_Begin_Timestamp_Label",
            source.exclusive_begin_timestamp_label.as_ref(),
        )?;
        w.opt_timestamp(
            "Inclusive_End_Timestamp_Label",
            source.inclusive_end_timestamp_label.as_ref(),
        )?;
        w.close("Source_Subscription")?;
    }
    record_count(w, m.record_count.as_ref())?;
    content_blocks(w, &m.content_blocks)?;
    w.close(MessageType::InboxMessage.element_name())
}

fn status_message(w: &mut XmlWriter, m: &StatusMessage) -> Result<()> {
    w.open_root(MessageType::StatusMessage, &[
        ("message_id", m.message_id.as_str()),
        ("in_response_to", m.in_response_to.as_str()),
        ("status_type", m.status_type.as_str()),
    ])?;
    if !m.status_details.is_empty() {
        w.open("Status_Detail", &[])?;
        for detail in &m.status_details {
            w.open("Detail", &[("name", detail.name.as_str())])?;
            for value in &detail.values {
                w.text("Value", value)?;
            }
            w.close("Detail")?;
        }
        w.close("Status_Detail")?;
    }
    w.opt_text("Message", m.message.as_deref())?;
    w.close(MessageType::StatusMessage.element_name())
}
