//! Persistent entities shared by the protocol handlers and the storage layer.

use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
};

use crate::{
    content_binding::{ContentBinding, is_content_supported, match_bindings},
    error::{Error, Result},
};

pub type CollectionId = i64;
pub type ContentBlockId = i64;
pub type InboxMessageId = i64;

// ── Services ────────────────────────────────────────────────────────────────

/// The four TAXII 1.x service types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    Discovery,
    Inbox,
    CollectionManagement,
    Poll,
}

impl ServiceType {
    /// Name used in configuration and storage.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Discovery => "discovery",
            Self::Inbox => "inbox",
            Self::CollectionManagement => "collection_management",
            Self::Poll => "poll",
        }
    }

    /// Name used on the wire (`service_type` attribute).
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::Discovery => "DISCOVERY",
            Self::Inbox => "INBOX",
            Self::CollectionManagement => "COLLECTION_MANAGEMENT",
            Self::Poll => "POLL",
        }
    }

    pub fn from_wire(value: &str) -> Result<Self> {
        match value {
            "DISCOVERY" => Ok(Self::Discovery),
            "INBOX" => Ok(Self::Inbox),
            "COLLECTION_MANAGEMENT" => Ok(Self::CollectionManagement),
            "POLL" => Ok(Self::Poll),
            other => Err(Error::unknown_variant("service type", other)),
        }
    }
}

impl std::fmt::Display for ServiceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_true() -> bool {
    true
}

/// Discovery service settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryProperties {
    /// Ids of the services this discovery service advertises. Resolved
    /// through the service registry on every request.
    pub advertised_services: Vec<String>,
}

/// Inbox service settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InboxProperties {
    pub accept_all_content: bool,
    pub supported_content: Vec<ContentBinding>,
    pub destination_collection_required: bool,
}

impl InboxProperties {
    pub fn is_content_supported(&self, binding: &ContentBinding) -> bool {
        self.accept_all_content || is_content_supported(&self.supported_content, binding)
    }
}

/// Poll service settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollProperties {
    /// Blocks per response part.
    pub max_result_size: u32,
    /// Upper bound on blocks reachable through one poll, across all parts.
    pub max_result_count: u32,
    pub subscription_required: bool,
}

impl Default for PollProperties {
    fn default() -> Self {
        Self {
            max_result_size: 1_000,
            max_result_count: 10_000,
            subscription_required: false,
        }
    }
}

/// Collection management service settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionManagementProperties {
    pub subscription_supported: bool,
}

impl Default for CollectionManagementProperties {
    fn default() -> Self {
        Self {
            subscription_supported: true,
        }
    }
}

/// Type-specific service settings, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServiceKind {
    Discovery(DiscoveryProperties),
    Inbox(InboxProperties),
    CollectionManagement(CollectionManagementProperties),
    Poll(PollProperties),
}

impl ServiceKind {
    pub fn service_type(&self) -> ServiceType {
        match self {
            Self::Discovery(_) => ServiceType::Discovery,
            Self::Inbox(_) => ServiceType::Inbox,
            Self::CollectionManagement(_) => ServiceType::CollectionManagement,
            Self::Poll(_) => ServiceType::Poll,
        }
    }
}

/// A configured TAXII service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDefinition {
    pub id: String,
    /// Absolute URL or absolute path the service is reachable at.
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub protocol_bindings: Vec<String>,
    #[serde(default = "default_true")]
    pub available: bool,
    #[serde(default)]
    pub authentication_required: bool,
    #[serde(flatten)]
    pub kind: ServiceKind,
}

impl ServiceDefinition {
    pub fn service_type(&self) -> ServiceType {
        self.kind.service_type()
    }

    /// Request path the service answers on: the path component of an
    /// absolute address, or the address itself.
    pub fn path(&self) -> String {
        match url::Url::parse(&self.address) {
            Ok(url) if url.has_host() => url.path().to_string(),
            _ if self.address.starts_with('/') => self.address.clone(),
            _ => format!("/{}", self.address),
        }
    }
}

// ── Collections ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollectionType {
    #[default]
    #[serde(rename = "DATA_FEED")]
    Feed,
    #[serde(rename = "DATA_SET")]
    Set,
}

impl CollectionType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Feed => "DATA_FEED",
            Self::Set => "DATA_SET",
        }
    }
}

impl std::str::FromStr for CollectionType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "DATA_FEED" => Ok(Self::Feed),
            "DATA_SET" => Ok(Self::Set),
            other => Err(Error::unknown_variant("collection type", other)),
        }
    }
}

/// Collection settings as written in configuration, before it has an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, rename = "type")]
    pub collection_type: CollectionType,
    #[serde(default = "default_true")]
    pub available: bool,
    #[serde(default)]
    pub accept_all_content: bool,
    #[serde(default)]
    pub supported_content: Vec<ContentBinding>,
    /// Services (by id) this collection is exposed through.
    #[serde(default)]
    pub service_ids: Vec<String>,
}

/// A stored collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Collection {
    pub id: CollectionId,
    pub name: String,
    pub description: Option<String>,
    pub collection_type: CollectionType,
    pub available: bool,
    pub accept_all_content: bool,
    pub supported_content: Vec<ContentBinding>,
    /// Cached content block count, recomputed by the storage layer.
    pub volume: i64,
}

impl Collection {
    /// Whether a content block with `binding` may be stored here.
    pub fn is_content_supported(&self, binding: &ContentBinding) -> bool {
        self.accept_all_content || is_content_supported(&self.supported_content, binding)
    }

    /// Narrow `requested` to what this collection can deliver.
    pub fn matching_bindings(&self, requested: &[ContentBinding]) -> Vec<ContentBinding> {
        match_bindings(&self.supported_content, requested, self.accept_all_content)
    }
}

// ── Content ─────────────────────────────────────────────────────────────────

/// A content block ready to be stored.
#[derive(Debug, Clone, PartialEq)]
pub struct NewContentBlock {
    pub content: Vec<u8>,
    pub content_binding: ContentBinding,
    pub timestamp_label: DateTime<Utc>,
    pub message: Option<String>,
    pub inbox_message_id: Option<InboxMessageId>,
}

/// A stored content block.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentBlock {
    pub id: ContentBlockId,
    pub content: Vec<u8>,
    pub content_binding: ContentBinding,
    pub timestamp_label: DateTime<Utc>,
    pub message: Option<String>,
    pub inbox_message_id: Option<InboxMessageId>,
}

/// Record of a received inbox message, kept for auditing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InboxMessageRecord {
    pub message_id: String,
    pub original_message: Vec<u8>,
    pub content_block_count: i64,
    pub service_id: String,
    pub destination_collections: Vec<String>,
    pub result_id: Option<String>,
    pub record_count: Option<i64>,
    pub partial_count: bool,
    pub subscription_collection_name: Option<String>,
    pub subscription_id: Option<String>,
    pub exclusive_begin_timestamp_label: Option<DateTime<Utc>>,
    pub inclusive_end_timestamp_label: Option<DateTime<Utc>>,
}

/// A multi-part poll result, fetched part by part via poll fulfillment.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultSet {
    pub id: String,
    pub collection_id: CollectionId,
    pub content_bindings: Vec<ContentBinding>,
    /// Exclusive begin of the window.
    pub begin_time: Option<DateTime<Utc>>,
    /// Inclusive end of the window.
    pub end_time: Option<DateTime<Utc>>,
}

// ── Subscriptions ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseType {
    #[default]
    Full,
    CountOnly,
}

impl ResponseType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "FULL",
            Self::CountOnly => "COUNT_ONLY",
        }
    }
}

impl std::str::FromStr for ResponseType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "FULL" => Ok(Self::Full),
            "COUNT_ONLY" => Ok(Self::CountOnly),
            other => Err(Error::unknown_variant("response type", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionStatus {
    #[default]
    Active,
    Paused,
    Unsubscribed,
}

impl SubscriptionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Paused => "PAUSED",
            Self::Unsubscribed => "UNSUBSCRIBED",
        }
    }
}

impl std::str::FromStr for SubscriptionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ACTIVE" => Ok(Self::Active),
            "PAUSED" => Ok(Self::Paused),
            "UNSUBSCRIBED" => Ok(Self::Unsubscribed),
            other => Err(Error::unknown_variant("subscription status", other)),
        }
    }
}

/// What a poll (or a subscription's polls) should return.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollRequestParameters {
    pub response_type: ResponseType,
    pub content_bindings: Vec<ContentBinding>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    pub subscription_id: String,
    pub service_id: String,
    pub collection_id: CollectionId,
    pub status: SubscriptionStatus,
    pub params: PollRequestParameters,
}

// ── Accounts ────────────────────────────────────────────────────────────────

/// An authenticated principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Account {
    pub id: i64,
    pub username: String,
}
