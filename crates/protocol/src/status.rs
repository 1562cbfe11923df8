//! Status taxonomy.
//!
//! Every protocol-level failure is a [`StatusError`]. It terminates the
//! request that raised it and is rendered as a `Status_Message` correlated to
//! the request when the request's message id is known.

use ctigate_common::ContentBinding;

use crate::messages::{StatusDetail, StatusMessage};

/// Placeholder `in_response_to` when the request could not be parsed.
pub const UNKNOWN_MESSAGE_ID: &str = "0";

// ── Wire status types ────────────────────────────────────────────────────────

/// The `status_type` attribute values defined by TAXII 1.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusType {
    AsynchronousPollError,
    BadMessage,
    Denied,
    DestinationCollectionError,
    Failure,
    InvalidResponsePart,
    NetworkError,
    NotFound,
    Pending,
    PollingUnsupported,
    Retry,
    Success,
    Unauthorized,
    UnsupportedMessage,
    UnsupportedContent,
    UnsupportedProtocol,
    UnsupportedQuery,
}

impl StatusType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AsynchronousPollError => "ASYNCHRONOUS_POLL_ERROR",
            Self::BadMessage => "BAD_MESSAGE",
            Self::Denied => "DENIED",
            Self::DestinationCollectionError => "DESTINATION_COLLECTION_ERROR",
            Self::Failure => "FAILURE",
            Self::InvalidResponsePart => "INVALID_RESPONSE_PART",
            Self::NetworkError => "NETWORK_ERROR",
            Self::NotFound => "NOT_FOUND",
            Self::Pending => "PENDING",
            Self::PollingUnsupported => "POLLING_UNSUPPORTED",
            Self::Retry => "RETRY",
            Self::Success => "SUCCESS",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::UnsupportedMessage => "UNSUPPORTED_MESSAGE",
            Self::UnsupportedContent => "UNSUPPORTED_CONTENT",
            Self::UnsupportedProtocol => "UNSUPPORTED_PROTOCOL",
            Self::UnsupportedQuery => "UNSUPPORTED_QUERY",
        }
    }

    pub fn from_wire(value: &str) -> Option<Self> {
        let all = [
            Self::AsynchronousPollError,
            Self::BadMessage,
            Self::Denied,
            Self::DestinationCollectionError,
            Self::Failure,
            Self::InvalidResponsePart,
            Self::NetworkError,
            Self::NotFound,
            Self::Pending,
            Self::PollingUnsupported,
            Self::Retry,
            Self::Success,
            Self::Unauthorized,
            Self::UnsupportedMessage,
            Self::UnsupportedContent,
            Self::UnsupportedProtocol,
            Self::UnsupportedQuery,
        ];
        all.into_iter().find(|t| t.as_str() == value)
    }
}

impl std::fmt::Display for StatusType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status detail names.
pub mod detail {
    pub const ACCEPTABLE_DESTINATION: &str = "ACCEPTABLE_DESTINATION";
    pub const ITEM: &str = "ITEM";
    pub const MAX_PART_NUMBER: &str = "MAX_PART_NUMBER";
    pub const SUPPORTED_BINDING: &str = "SUPPORTED_BINDING";
    pub const SUPPORTED_CONTENT: &str = "SUPPORTED_CONTENT";
    pub const SUPPORTED_PROTOCOL: &str = "SUPPORTED_PROTOCOL";
}

// ── Status kinds ─────────────────────────────────────────────────────────────

/// Failure conditions a request can terminate with, carrying the
/// kind-specific details the client needs to retry with something else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusKind {
    BadMessage,
    Unauthorized,
    Denied,
    Failure,
    NotFound { item: String },
    DestinationCollectionError { acceptable: Vec<String> },
    InvalidResponsePart { max_part_number: u32 },
    UnsupportedProtocol { supported: Vec<String> },
    UnsupportedMessage { supported: Vec<String> },
    UnsupportedContent { supported: Vec<ContentBinding> },
}

impl StatusKind {
    pub fn status_type(&self) -> StatusType {
        match self {
            Self::BadMessage => StatusType::BadMessage,
            Self::Unauthorized => StatusType::Unauthorized,
            Self::Denied => StatusType::Denied,
            Self::Failure => StatusType::Failure,
            Self::NotFound { .. } => StatusType::NotFound,
            Self::DestinationCollectionError { .. } => StatusType::DestinationCollectionError,
            Self::InvalidResponsePart { .. } => StatusType::InvalidResponsePart,
            Self::UnsupportedProtocol { .. } => StatusType::UnsupportedProtocol,
            Self::UnsupportedMessage { .. } => StatusType::UnsupportedMessage,
            Self::UnsupportedContent { .. } => StatusType::UnsupportedContent,
        }
    }

    fn details(&self) -> Vec<StatusDetail> {
        match self {
            Self::BadMessage | Self::Unauthorized | Self::Denied | Self::Failure => Vec::new(),
            Self::NotFound { item } => vec![StatusDetail::new(detail::ITEM, [item.clone()])],
            Self::DestinationCollectionError { acceptable } => vec![StatusDetail::new(
                detail::ACCEPTABLE_DESTINATION,
                acceptable.iter().cloned(),
            )],
            Self::InvalidResponsePart { max_part_number } => vec![StatusDetail::new(
                detail::MAX_PART_NUMBER,
                [max_part_number.to_string()],
            )],
            Self::UnsupportedProtocol { supported } => vec![StatusDetail::new(
                detail::SUPPORTED_PROTOCOL,
                supported.iter().cloned(),
            )],
            Self::UnsupportedMessage { supported } => vec![StatusDetail::new(
                detail::SUPPORTED_BINDING,
                supported.iter().cloned(),
            )],
            Self::UnsupportedContent { supported } => {
                let mut ids: Vec<String> = Vec::new();
                for binding in supported {
                    if !ids.contains(&binding.binding) {
                        ids.push(binding.binding.clone());
                    }
                }
                vec![StatusDetail::new(detail::SUPPORTED_CONTENT, ids)]
            },
        }
    }
}

// ── StatusError ──────────────────────────────────────────────────────────────

/// A terminal protocol failure for the current request.
#[derive(Debug, thiserror::Error)]
#[error("{}: {message}", .kind.status_type())]
pub struct StatusError {
    pub kind: StatusKind,
    pub message: String,
    pub in_response_to: Option<String>,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl StatusError {
    pub fn new(kind: StatusKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            in_response_to: None,
            source: None,
        }
    }

    pub fn bad_message(message: impl Into<String>) -> Self {
        Self::new(StatusKind::BadMessage, message)
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self::new(StatusKind::Failure, message)
    }

    pub fn unauthorized() -> Self {
        Self::new(
            StatusKind::Unauthorized,
            "Authentication is required to access this service",
        )
    }

    pub fn not_found(item: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StatusKind::NotFound { item: item.into() }, message)
    }

    pub fn destination_collection_error(
        acceptable: Vec<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(StatusKind::DestinationCollectionError { acceptable }, message)
    }

    pub fn unsupported_content(supported: Vec<ContentBinding>, message: impl Into<String>) -> Self {
        Self::new(StatusKind::UnsupportedContent { supported }, message)
    }

    /// Correlate with the request's message id, replacing any previous value.
    #[must_use]
    pub fn in_response_to(mut self, message_id: impl Into<String>) -> Self {
        self.in_response_to = Some(message_id.into());
        self
    }

    /// Correlate only if nothing has been recorded yet.
    #[must_use]
    pub fn or_in_response_to(mut self, message_id: &str) -> Self {
        if self.in_response_to.is_none() {
            self.in_response_to = Some(message_id.to_string());
        }
        self
    }

    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn status_type(&self) -> StatusType {
        self.kind.status_type()
    }

    /// Build the wire status message for this failure.
    pub fn to_status_message(&self, message_id: impl Into<String>) -> StatusMessage {
        StatusMessage {
            message_id: message_id.into(),
            in_response_to: self
                .in_response_to
                .clone()
                .unwrap_or_else(|| UNKNOWN_MESSAGE_ID.to_string()),
            status_type: self.status_type(),
            status_details: self.kind.details(),
            message: Some(self.message.clone()),
        }
    }
}
