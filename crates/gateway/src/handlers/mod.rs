//! Message handlers for the four service types.
//!
//! [`table_for`] is the registration table: each service type maps to the
//! messages it answers, with the service's typed settings captured by the
//! handler closures.

pub mod collection_management;
pub mod discovery;
pub mod inbox;
pub mod poll;

use {
    ctigate_common::entities::{Collection, ContentBlock, ServiceKind},
    ctigate_protocol::{MessageType, StatusError, messages::ContentBlockPayload},
};

use crate::{
    dispatch::{HandlerTable, handler},
    error::HandlerError,
    registry::Service,
    state::GatewayState,
};

/// Handlers a service of `kind` registers.
pub fn table_for(kind: &ServiceKind) -> HandlerTable {
    match kind {
        ServiceKind::Discovery(props) => {
            let props = props.clone();
            HandlerTable::new().with(
                MessageType::DiscoveryRequest,
                handler(move |ctx| discovery::handle_discovery_request(ctx, props.clone())),
            )
        },
        ServiceKind::Inbox(props) => {
            let props = props.clone();
            HandlerTable::new().with(
                MessageType::InboxMessage,
                handler(move |ctx| inbox::handle_inbox_message(ctx, props.clone())),
            )
        },
        ServiceKind::CollectionManagement(props) => {
            let mut table = HandlerTable::new().with(
                MessageType::CollectionInformationRequest,
                handler(collection_management::handle_collection_information_request),
            );
            if props.subscription_supported {
                table.register(
                    MessageType::ManageCollectionSubscriptionRequest,
                    handler(collection_management::handle_subscription_request),
                );
            }
            table
        },
        ServiceKind::Poll(props) => {
            let request_props = props.clone();
            let fulfillment_props = props.clone();
            HandlerTable::new()
                .with(
                    MessageType::PollRequest,
                    handler(move |ctx| poll::handle_poll_request(ctx, request_props.clone())),
                )
                .with(
                    MessageType::PollFulfillmentRequest,
                    handler(move |ctx| {
                        poll::handle_poll_fulfillment(ctx, fulfillment_props.clone())
                    }),
                )
        },
    }
}

// ── Shared helpers ───────────────────────────────────────────────────────────

fn unexpected_message(expected: MessageType, received: MessageType) -> HandlerError {
    HandlerError::internal(format!(
        "handler for {} received {}",
        expected.element_name(),
        received.element_name()
    ))
}

/// Resolve a collection by name among those attached to the current service.
async fn service_collection(
    state: &GatewayState,
    service: &Service,
    name: &str,
) -> Result<Collection, HandlerError> {
    state
        .persistence
        .get_collection_by_name(name, Some(service.id()))
        .await?
        .ok_or_else(|| {
            StatusError::not_found(name, format!("The collection {name} was not found")).into()
        })
}

fn to_payload(block: ContentBlock) -> ContentBlockPayload {
    ContentBlockPayload {
        content: String::from_utf8_lossy(&block.content).into_owned(),
        content_binding: block.content_binding,
        timestamp_label: Some(block.timestamp_label),
        message: block.message,
    }
}
