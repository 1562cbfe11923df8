use {
    chrono::Utc,
    ctigate_common::entities::{
        Collection, ContentBlock, PollProperties, PollRequestParameters, ResponseType,
        ResultSet, SubscriptionStatus,
    },
    ctigate_persistence::ContentQuery,
    ctigate_protocol::{
        Message, MessageType, StatusError, StatusKind, generate_message_id,
        messages::{PollFulfillmentRequest, PollRequest, PollResponse, RecordCount},
    },
    tracing::{debug, info},
};

use crate::{
    dispatch::{HandlerResult, RequestContext},
    error::HandlerError,
    state::GatewayState,
};

/// How many blocks a poll can reach and how they split into parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Paging {
    /// Matching blocks, capped at `max_result_count`.
    total: i64,
    /// More blocks matched than `max_result_count` allows.
    partial: bool,
    part_size: i64,
}

impl Paging {
    fn new(matched: i64, props: &PollProperties) -> Self {
        let cap = i64::from(props.max_result_count);
        Self {
            total: matched.min(cap),
            partial: matched > cap,
            part_size: i64::from(props.max_result_size.max(1)),
        }
    }

    /// Number of parts, at least one even for an empty result.
    fn parts(&self) -> u32 {
        let parts = (self.total + self.part_size - 1) / self.part_size;
        u32::try_from(parts.max(1)).unwrap_or(u32::MAX)
    }

    /// `(offset, limit)` of a 1-based part.
    fn window(&self, part: u32) -> (i64, i64) {
        let offset = i64::from(part.saturating_sub(1)) * self.part_size;
        let limit = self.part_size.min(self.total - offset).max(0);
        (offset, limit)
    }

    fn record_count(&self) -> RecordCount {
        RecordCount {
            record_count: self.total,
            partial_count: self.partial,
        }
    }
}

// ── Poll request ─────────────────────────────────────────────────────────────

/// Answer a poll with a count or the first part of the matching blocks.
pub async fn handle_poll_request(ctx: RequestContext, props: PollProperties) -> HandlerResult {
    let received = ctx.message.message_type();
    let Message::PollRequest(request) = ctx.message else {
        return Err(super::unexpected_message(MessageType::PollRequest, received));
    };
    let state = ctx.state;

    let collection = super::service_collection(&state, &ctx.service, &request.collection_name).await?;
    if !collection.available {
        return Err(StatusError::failure(format!(
            "The collection {} is not available",
            collection.name
        ))
        .into());
    }

    let params = poll_parameters(&state, &request, &collection, &props).await?;
    let bindings = collection.matching_bindings(&params.content_bindings);
    if !params.content_bindings.is_empty() && bindings.is_empty() {
        return Err(StatusError::unsupported_content(
            collection.supported_content.clone(),
            "None of the requested content bindings are supported by this collection",
        )
        .into());
    }

    let begin = request.exclusive_begin_timestamp_label;
    let end = request.inclusive_end_timestamp_label.unwrap_or_else(Utc::now);
    let query = ContentQuery::collection(collection.id)
        .window(begin, Some(end))
        .bindings(bindings.clone());

    let matched = state.persistence.get_content_blocks_count(&query).await?;
    let paging = Paging::new(matched, &props);

    let mut response = PollResponse {
        message_id: generate_message_id(),
        in_response_to: request.message_id.clone(),
        collection_name: collection.name.clone(),
        more: false,
        result_id: None,
        result_part_number: 1,
        subscription_id: request.subscription_id.clone(),
        exclusive_begin_timestamp_label: begin,
        inclusive_end_timestamp_label: end,
        record_count: Some(paging.record_count()),
        message: None,
        content_blocks: Vec::new(),
    };

    if params.response_type == ResponseType::CountOnly {
        debug!(collection = collection.name, count = paging.total, "count-only poll");
        return Ok(Some(response.into()));
    }

    let (offset, limit) = paging.window(1);
    let blocks = state
        .persistence
        .get_content_blocks(&query, offset, Some(limit))
        .await?;
    response.content_blocks = blocks.into_iter().map(super::to_payload).collect();

    if paging.parts() > 1 {
        let result_set = state
            .persistence
            .create_result_set(&ResultSet {
                id: generate_message_id(),
                collection_id: collection.id,
                content_bindings: bindings,
                begin_time: begin,
                end_time: Some(end),
            })
            .await?;
        response.more = true;
        response.result_id = Some(result_set.id);
    }

    info!(
        collection = collection.name,
        message_id = request.message_id,
        total = paging.total,
        returned = response.content_blocks.len(),
        more = response.more,
        "poll answered"
    );
    Ok(Some(response.into()))
}

/// Parameters from the referenced subscription or from the request itself.
async fn poll_parameters(
    state: &GatewayState,
    request: &PollRequest,
    collection: &Collection,
    props: &PollProperties,
) -> Result<PollRequestParameters, HandlerError> {
    if let Some(subscription_id) = &request.subscription_id {
        let subscription = state
            .persistence
            .get_subscription(subscription_id)
            .await?
            .filter(|s| s.collection_id == collection.id)
            .ok_or_else(|| {
                StatusError::not_found(
                    subscription_id.clone(),
                    format!("The subscription {subscription_id} was not found"),
                )
            })?;
        if subscription.status != SubscriptionStatus::Active {
            return Err(StatusError::failure(format!(
                "The subscription {subscription_id} is not active"
            ))
            .into());
        }
        return Ok(subscription.params);
    }

    if props.subscription_required {
        return Err(
            StatusError::failure("A subscription is required to poll this service").into(),
        );
    }

    Ok(request
        .poll_parameters
        .as_ref()
        .map(|p| PollRequestParameters {
            response_type: p.response_type,
            content_bindings: p.content_bindings.clone(),
        })
        .unwrap_or_default())
}

// ── Poll fulfillment ─────────────────────────────────────────────────────────

/// Return one further part of a stored multi-part result.
pub async fn handle_poll_fulfillment(ctx: RequestContext, props: PollProperties) -> HandlerResult {
    let received = ctx.message.message_type();
    let Message::PollFulfillmentRequest(request) = ctx.message else {
        return Err(super::unexpected_message(
            MessageType::PollFulfillmentRequest,
            received,
        ));
    };
    let state = ctx.state;

    let collection = super::service_collection(&state, &ctx.service, &request.collection_name).await?;
    let result_set = state
        .persistence
        .get_result_set(&request.result_id)
        .await?
        .filter(|rs| rs.collection_id == collection.id)
        .ok_or_else(|| {
            StatusError::not_found(
                request.result_id.clone(),
                format!("The result set {} was not found", request.result_id),
            )
        })?;

    let query = ContentQuery::collection(collection.id)
        .window(result_set.begin_time, result_set.end_time)
        .bindings(result_set.content_bindings.clone());
    let matched = state.persistence.get_content_blocks_count(&query).await?;
    let paging = Paging::new(matched, &props);

    let part = request.result_part_number;
    let max_part = paging.parts();
    if part == 0 || part > max_part {
        return Err(StatusError::new(
            StatusKind::InvalidResponsePart {
                max_part_number: max_part,
            },
            format!("The requested part {part} does not exist"),
        )
        .into());
    }

    let (offset, limit) = paging.window(part);
    let blocks = state
        .persistence
        .get_content_blocks(&query, offset, Some(limit))
        .await?;

    debug!(
        result_id = request.result_id,
        part,
        max_part,
        returned = blocks.len(),
        "poll fulfillment answered"
    );

    Ok(Some(
        fulfillment_response(&request, &result_set, paging, part, blocks).into(),
    ))
}

fn fulfillment_response(
    request: &PollFulfillmentRequest,
    result_set: &ResultSet,
    paging: Paging,
    part: u32,
    blocks: Vec<ContentBlock>,
) -> PollResponse {
    PollResponse {
        message_id: generate_message_id(),
        in_response_to: request.message_id.clone(),
        collection_name: request.collection_name.clone(),
        more: part < paging.parts(),
        result_id: Some(request.result_id.clone()),
        result_part_number: part,
        subscription_id: None,
        exclusive_begin_timestamp_label: result_set.begin_time,
        inclusive_end_timestamp_label: result_set.end_time.unwrap_or_else(Utc::now),
        record_count: Some(paging.record_count()),
        message: None,
        content_blocks: blocks.into_iter().map(super::to_payload).collect(),
    }
}
