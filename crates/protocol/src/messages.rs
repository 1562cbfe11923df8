//! Typed TAXII 1.1 messages.
//!
//! The codec turns wire bytes into a [`Message`]; the gateway dispatches on
//! [`MessageType`] and hands a `Message` back to the codec for serialization.

use {
    chrono::{DateTime, Utc},
    ctigate_common::{
        ContentBinding,
        entities::{CollectionType, PollRequestParameters, ResponseType, ServiceType, SubscriptionStatus},
    },
};

use crate::{bindings::VID_TAXII_XML_11, status::StatusType};

/// Generate a fresh message id.
pub fn generate_message_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ── Message type ─────────────────────────────────────────────────────────────

/// Dispatch key: which message a request or response is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    DiscoveryRequest,
    DiscoveryResponse,
    CollectionInformationRequest,
    CollectionInformationResponse,
    ManageCollectionSubscriptionRequest,
    ManageCollectionSubscriptionResponse,
    PollRequest,
    PollResponse,
    PollFulfillmentRequest,
    InboxMessage,
    StatusMessage,
}

impl MessageType {
    /// Root element name in the XML binding.
    pub fn element_name(self) -> &'static str {
        match self {
            Self::DiscoveryRequest => "Discovery_Request",
            Self::DiscoveryResponse => "Discovery_Response",
            Self::CollectionInformationRequest => "Collection_Information_Request",
            Self::CollectionInformationResponse => "Collection_Information_Response",
            Self::ManageCollectionSubscriptionRequest => "Subscription_Management_Request",
            Self::ManageCollectionSubscriptionResponse => "Subscription_Management_Response",
            Self::PollRequest => "Poll_Request",
            Self::PollResponse => "Poll_Response",
            Self::PollFulfillmentRequest => "Poll_Fulfillment",
            Self::InboxMessage => "Inbox_Message",
            Self::StatusMessage => "Status_Message",
        }
    }

    pub fn from_element_name(name: &str) -> Option<Self> {
        let all = [
            Self::DiscoveryRequest,
            Self::DiscoveryResponse,
            Self::CollectionInformationRequest,
            Self::CollectionInformationResponse,
            Self::ManageCollectionSubscriptionRequest,
            Self::ManageCollectionSubscriptionResponse,
            Self::PollRequest,
            Self::PollResponse,
            Self::PollFulfillmentRequest,
            Self::InboxMessage,
            Self::StatusMessage,
        ];
        all.into_iter().find(|t| t.element_name() == name)
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.element_name())
    }
}

// ── Shared parts ─────────────────────────────────────────────────────────────

/// Where a service can be reached and how to talk to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceContact {
    pub protocol_binding: String,
    pub address: String,
    pub message_bindings: Vec<String>,
}

/// One content block as carried by poll responses and inbox messages.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentBlockPayload {
    pub content_binding: ContentBinding,
    pub content: String,
    pub timestamp_label: Option<DateTime<Utc>>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordCount {
    pub record_count: i64,
    pub partial_count: bool,
}

// ── Discovery ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryRequest {
    pub message_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceInstance {
    pub service_type: ServiceType,
    pub services_version: String,
    pub available: bool,
    pub protocol_binding: String,
    pub address: String,
    pub message_bindings: Vec<String>,
    /// Only meaningful for inbox services.
    pub inbox_service_accepted_content: Vec<ContentBinding>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryResponse {
    pub message_id: String,
    pub in_response_to: String,
    pub service_instances: Vec<ServiceInstance>,
}

// ── Collection management ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct CollectionInformationRequest {
    pub message_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReceivingInboxService {
    pub contact: ServiceContact,
    pub supported_contents: Vec<ContentBinding>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollectionInformation {
    pub collection_name: String,
    pub collection_type: CollectionType,
    pub available: bool,
    pub description: String,
    pub collection_volume: Option<i64>,
    pub supported_contents: Vec<ContentBinding>,
    pub polling_services: Vec<ServiceContact>,
    pub subscription_services: Vec<ServiceContact>,
    pub receiving_inbox_services: Vec<ReceivingInboxService>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollectionInformationResponse {
    pub message_id: String,
    pub in_response_to: String,
    pub collections: Vec<CollectionInformation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionAction {
    Subscribe,
    Unsubscribe,
    Pause,
    Resume,
    Status,
}

impl SubscriptionAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Pause => "PAUSE",
            Self::Resume => "RESUME",
            Self::Status => "STATUS",
        }
    }

    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            "SUBSCRIBE" => Some(Self::Subscribe),
            "UNSUBSCRIBE" => Some(Self::Unsubscribe),
            "PAUSE" => Some(Self::Pause),
            "RESUME" => Some(Self::Resume),
            "STATUS" => Some(Self::Status),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ManageCollectionSubscriptionRequest {
    pub message_id: String,
    pub collection_name: String,
    pub action: SubscriptionAction,
    pub subscription_id: Option<String>,
    pub subscription_parameters: Option<PollRequestParameters>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionInstance {
    pub subscription_id: String,
    pub status: SubscriptionStatus,
    pub subscription_parameters: Option<PollRequestParameters>,
    pub poll_instances: Vec<ServiceContact>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ManageCollectionSubscriptionResponse {
    pub message_id: String,
    pub in_response_to: String,
    pub collection_name: String,
    pub message: Option<String>,
    pub subscription_instances: Vec<SubscriptionInstance>,
}

// ── Poll ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollParameters {
    pub allow_asynch: bool,
    pub response_type: ResponseType,
    pub content_bindings: Vec<ContentBinding>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PollRequest {
    pub message_id: String,
    pub collection_name: String,
    pub exclusive_begin_timestamp_label: Option<DateTime<Utc>>,
    pub inclusive_end_timestamp_label: Option<DateTime<Utc>>,
    pub subscription_id: Option<String>,
    pub poll_parameters: Option<PollParameters>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PollResponse {
    pub message_id: String,
    pub in_response_to: String,
    pub collection_name: String,
    pub more: bool,
    pub result_id: Option<String>,
    pub result_part_number: u32,
    pub subscription_id: Option<String>,
    pub exclusive_begin_timestamp_label: Option<DateTime<Utc>>,
    pub inclusive_end_timestamp_label: DateTime<Utc>,
    pub record_count: Option<RecordCount>,
    pub message: Option<String>,
    pub content_blocks: Vec<ContentBlockPayload>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PollFulfillmentRequest {
    pub message_id: String,
    pub collection_name: String,
    pub result_id: String,
    pub result_part_number: u32,
}

// ── Inbox ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct SourceSubscription {
    pub collection_name: String,
    pub subscription_id: String,
    pub exclusive_begin_timestamp_label: Option<DateTime<Utc>>,
    pub inclusive_end_timestamp_label: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InboxMessage {
    pub message_id: String,
    pub result_id: Option<String>,
    pub destination_collection_names: Vec<String>,
    pub message: Option<String>,
    pub source_subscription: Option<SourceSubscription>,
    pub record_count: Option<RecordCount>,
    pub content_blocks: Vec<ContentBlockPayload>,
}

// ── Status ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusDetail {
    pub name: String,
    pub values: Vec<String>,
}

impl StatusDetail {
    pub fn new(name: impl Into<String>, values: impl IntoIterator<Item = String>) -> Self {
        Self {
            name: name.into(),
            values: values.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusMessage {
    pub message_id: String,
    pub in_response_to: String,
    pub status_type: StatusType,
    pub status_details: Vec<StatusDetail>,
    pub message: Option<String>,
}

impl StatusMessage {
    pub fn success(in_response_to: impl Into<String>) -> Self {
        Self {
            message_id: generate_message_id(),
            in_response_to: in_response_to.into(),
            status_type: StatusType::Success,
            status_details: Vec::new(),
            message: None,
        }
    }
}

// ── Message ──────────────────────────────────────────────────────────────────

/// Any TAXII 1.1 message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    DiscoveryRequest(DiscoveryRequest),
    DiscoveryResponse(DiscoveryResponse),
    CollectionInformationRequest(CollectionInformationRequest),
    CollectionInformationResponse(CollectionInformationResponse),
    ManageCollectionSubscriptionRequest(ManageCollectionSubscriptionRequest),
    ManageCollectionSubscriptionResponse(ManageCollectionSubscriptionResponse),
    PollRequest(PollRequest),
    PollResponse(PollResponse),
    PollFulfillmentRequest(PollFulfillmentRequest),
    InboxMessage(InboxMessage),
    StatusMessage(StatusMessage),
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::DiscoveryRequest(_) => MessageType::DiscoveryRequest,
            Self::DiscoveryResponse(_) => MessageType::DiscoveryResponse,
            Self::CollectionInformationRequest(_) => MessageType::CollectionInformationRequest,
            Self::CollectionInformationResponse(_) => MessageType::CollectionInformationResponse,
            Self::ManageCollectionSubscriptionRequest(_) => {
                MessageType::ManageCollectionSubscriptionRequest
            },
            Self::ManageCollectionSubscriptionResponse(_) => {
                MessageType::ManageCollectionSubscriptionResponse
            },
            Self::PollRequest(_) => MessageType::PollRequest,
            Self::PollResponse(_) => MessageType::PollResponse,
            Self::PollFulfillmentRequest(_) => MessageType::PollFulfillmentRequest,
            Self::InboxMessage(_) => MessageType::InboxMessage,
            Self::StatusMessage(_) => MessageType::StatusMessage,
        }
    }

    pub fn message_id(&self) -> &str {
        match self {
            Self::DiscoveryRequest(m) => &m.message_id,
            Self::DiscoveryResponse(m) => &m.message_id,
            Self::CollectionInformationRequest(m) => &m.message_id,
            Self::CollectionInformationResponse(m) => &m.message_id,
            Self::ManageCollectionSubscriptionRequest(m) => &m.message_id,
            Self::ManageCollectionSubscriptionResponse(m) => &m.message_id,
            Self::PollRequest(m) => &m.message_id,
            Self::PollResponse(m) => &m.message_id,
            Self::PollFulfillmentRequest(m) => &m.message_id,
            Self::InboxMessage(m) => &m.message_id,
            Self::StatusMessage(m) => &m.message_id,
        }
    }

    /// Message binding this message is expressed in.
    pub fn message_binding(&self) -> &'static str {
        VID_TAXII_XML_11
    }
}

macro_rules! impl_from_message {
    ($($variant:ident),* $(,)?) => {
        $(
            impl From<$variant> for Message {
                fn from(m: $variant) -> Self {
                    Self::$variant(m)
                }
            }
        )*
    };
}

impl_from_message!(
    DiscoveryRequest,
    DiscoveryResponse,
    CollectionInformationRequest,
    CollectionInformationResponse,
    ManageCollectionSubscriptionRequest,
    ManageCollectionSubscriptionResponse,
    PollRequest,
    PollResponse,
    PollFulfillmentRequest,
    InboxMessage,
    StatusMessage,
);
