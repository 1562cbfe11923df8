use {
    chrono::Utc,
    ctigate_common::entities::{Collection, InboxMessageRecord, InboxProperties, NewContentBlock},
    ctigate_protocol::{
        Message, MessageType, StatusError,
        messages::{InboxMessage, StatusMessage},
    },
    tracing::{debug, info, warn},
};

use crate::{
    dispatch::{HandlerResult, RequestContext},
    error::HandlerError,
    registry::Service,
    state::GatewayState,
};

/// Store the blocks of an inbox message in the destination collections.
///
/// Every block is checked before anything is written, so a rejected message
/// leaves storage untouched.
pub async fn handle_inbox_message(ctx: RequestContext, props: InboxProperties) -> HandlerResult {
    let received = ctx.message.message_type();
    let Message::InboxMessage(inbox) = ctx.message else {
        return Err(super::unexpected_message(MessageType::InboxMessage, received));
    };
    let (state, service) = (ctx.state, ctx.service);

    for block in &inbox.content_blocks {
        if !props.is_content_supported(&block.content_binding) {
            warn!(
                service_id = service.id(),
                message_id = inbox.message_id,
                binding = block.content_binding.binding,
                "content binding not supported"
            );
            return Err(StatusError::unsupported_content(
                props.supported_content.clone(),
                format!(
                    "Content binding {} is not supported by this inbox service",
                    block.content_binding.binding
                ),
            )
            .into());
        }
    }

    let collections = destination_collections(&state, &service, &props, &inbox).await?;

    let record = record_for(&inbox, service.id(), &collections, &ctx.body);
    let inbox_message_id = state.persistence.create_inbox_message(&record).await?;

    let mut stored = 0usize;
    for block in &inbox.content_blocks {
        let targets: Vec<_> = collections
            .iter()
            .filter(|c| c.is_content_supported(&block.content_binding))
            .map(|c| c.id)
            .collect();
        if targets.is_empty() {
            debug!(
                message_id = inbox.message_id,
                binding = block.content_binding.binding,
                "no destination collection accepts block, skipping"
            );
            continue;
        }
        let new_block = NewContentBlock {
            content: block.content.clone().into_bytes(),
            content_binding: block.content_binding.clone(),
            timestamp_label: block.timestamp_label.unwrap_or_else(Utc::now),
            message: block.message.clone(),
            inbox_message_id: Some(inbox_message_id),
        };
        state
            .persistence
            .create_content_block(&new_block, &targets)
            .await?;
        stored += 1;
    }

    info!(
        service_id = service.id(),
        message_id = inbox.message_id,
        received = inbox.content_blocks.len(),
        stored,
        "inbox message processed"
    );

    Ok(Some(StatusMessage::success(inbox.message_id).into()))
}

async fn destination_collections(
    state: &GatewayState,
    service: &Service,
    props: &InboxProperties,
    inbox: &InboxMessage,
) -> Result<Vec<Collection>, HandlerError> {
    let available = state.persistence.get_collections(Some(service.id())).await?;
    let names = &inbox.destination_collection_names;

    if names.is_empty() {
        if props.destination_collection_required {
            return Err(StatusError::destination_collection_error(
                collection_names(&available),
                "A Destination_Collection_Name is required and none were specified",
            )
            .into());
        }
        return Ok(available);
    }

    let mut selected = Vec::with_capacity(names.len());
    for name in names {
        match available.iter().find(|c| &c.name == name) {
            Some(collection) => selected.push(collection.clone()),
            None => {
                return Err(StatusError::destination_collection_error(
                    collection_names(&available),
                    format!("The collection {name} is not a valid destination for this inbox"),
                )
                .into());
            },
        }
    }
    Ok(selected)
}

fn collection_names(collections: &[Collection]) -> Vec<String> {
    collections.iter().map(|c| c.name.clone()).collect()
}

fn record_for(
    inbox: &InboxMessage,
    service_id: &str,
    collections: &[Collection],
    body: &[u8],
) -> InboxMessageRecord {
    let subscription = inbox.source_subscription.as_ref();
    InboxMessageRecord {
        message_id: inbox.message_id.clone(),
        original_message: body.to_vec(),
        content_block_count: i64::try_from(inbox.content_blocks.len()).unwrap_or(i64::MAX),
        service_id: service_id.to_string(),
        destination_collections: collection_names(collections),
        result_id: inbox.result_id.clone(),
        record_count: inbox.record_count.map(|r| r.record_count),
        partial_count: inbox.record_count.is_some_and(|r| r.partial_count),
        subscription_collection_name: subscription.map(|s| s.collection_name.clone()),
        subscription_id: subscription.map(|s| s.subscription_id.clone()),
        exclusive_begin_timestamp_label: subscription
            .and_then(|s| s.exclusive_begin_timestamp_label),
        inclusive_end_timestamp_label: subscription.and_then(|s| s.inclusive_end_timestamp_label),
    }
}
