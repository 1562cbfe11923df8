use {
    ctigate_common::entities::{
        Collection, PollRequestParameters, ServiceDefinition, ServiceKind, Subscription,
        SubscriptionStatus,
    },
    ctigate_protocol::{
        Message, MessageType, StatusError, generate_message_id,
        messages::{
            CollectionInformation, CollectionInformationResponse,
            ManageCollectionSubscriptionRequest, ManageCollectionSubscriptionResponse,
            ReceivingInboxService, ServiceContact, SubscriptionAction, SubscriptionInstance,
        },
    },
    tracing::info,
};

use crate::{
    dispatch::{HandlerResult, RequestContext},
    error::HandlerError,
    registry::Service,
    state::GatewayState,
};

// ── Collection information ───────────────────────────────────────────────────

/// Describe every collection attached to this service.
pub async fn handle_collection_information_request(ctx: RequestContext) -> HandlerResult {
    let received = ctx.message.message_type();
    let Message::CollectionInformationRequest(request) = ctx.message else {
        return Err(super::unexpected_message(
            MessageType::CollectionInformationRequest,
            received,
        ));
    };
    let state = ctx.state;

    let collections = state
        .persistence
        .get_collections(Some(ctx.service.id()))
        .await?;
    let mut information = Vec::with_capacity(collections.len());
    for collection in collections {
        let services = state
            .persistence
            .get_services_for_collection(collection.id)
            .await?;
        information.push(describe(&state, collection, &services));
    }

    Ok(Some(
        CollectionInformationResponse {
            message_id: generate_message_id(),
            in_response_to: request.message_id,
            collections: information,
        }
        .into(),
    ))
}

fn describe(
    state: &GatewayState,
    collection: Collection,
    services: &[ServiceDefinition],
) -> CollectionInformation {
    let bindings = state.message_bindings();
    let mut polling_services = Vec::new();
    let mut subscription_services = Vec::new();
    let mut receiving_inbox_services = Vec::new();

    for service in services {
        let contacts = state.registry.contacts_for(service, bindings);
        match &service.kind {
            ServiceKind::Poll(_) => polling_services.extend(contacts),
            ServiceKind::CollectionManagement(props) if props.subscription_supported => {
                subscription_services.extend(contacts);
            },
            ServiceKind::Inbox(props) => {
                let supported_contents = if props.accept_all_content {
                    Vec::new()
                } else {
                    props.supported_content.clone()
                };
                receiving_inbox_services.extend(contacts.into_iter().map(|contact| {
                    ReceivingInboxService {
                        contact,
                        supported_contents: supported_contents.clone(),
                    }
                }));
            },
            ServiceKind::CollectionManagement(_) | ServiceKind::Discovery(_) => {},
        }
    }

    CollectionInformation {
        collection_name: collection.name,
        collection_type: collection.collection_type,
        available: collection.available,
        description: collection.description.unwrap_or_default(),
        collection_volume: Some(collection.volume),
        supported_contents: if collection.accept_all_content {
            Vec::new()
        } else {
            collection.supported_content
        },
        polling_services,
        subscription_services,
        receiving_inbox_services,
    }
}

// ── Subscription management ──────────────────────────────────────────────────

/// Create, change or report subscriptions to one collection.
pub async fn handle_subscription_request(ctx: RequestContext) -> HandlerResult {
    let received = ctx.message.message_type();
    let Message::ManageCollectionSubscriptionRequest(request) = ctx.message else {
        return Err(super::unexpected_message(
            MessageType::ManageCollectionSubscriptionRequest,
            received,
        ));
    };
    let (state, service) = (ctx.state, ctx.service);

    let collection = super::service_collection(&state, &service, &request.collection_name).await?;

    let subscriptions = match request.action {
        SubscriptionAction::Subscribe => {
            vec![subscribe(&state, &service, &collection, &request).await?]
        },
        SubscriptionAction::Status => match &request.subscription_id {
            Some(id) => vec![owned_subscription(&state, &service, &collection, id).await?],
            None => state
                .persistence
                .get_subscriptions(service.id())
                .await?
                .into_iter()
                .filter(|s| s.collection_id == collection.id)
                .collect(),
        },
        action @ (SubscriptionAction::Unsubscribe
        | SubscriptionAction::Pause
        | SubscriptionAction::Resume) => {
            let Some(id) = &request.subscription_id else {
                return Err(StatusError::bad_message(format!(
                    "A Subscription_ID is required for {}",
                    action.as_str()
                ))
                .into());
            };
            let mut subscription = owned_subscription(&state, &service, &collection, id).await?;
            subscription.status = next_status(action, subscription.status)?;
            let updated = state.persistence.update_subscription(&subscription).await?;
            info!(
                service_id = service.id(),
                subscription_id = updated.subscription_id,
                status = updated.status.as_str(),
                "subscription updated"
            );
            vec![updated]
        },
    };

    let poll_instances = polling_contacts(&state, &collection).await?;
    let subscription_instances = subscriptions
        .into_iter()
        .map(|s| SubscriptionInstance {
            subscription_id: s.subscription_id,
            status: s.status,
            subscription_parameters: Some(s.params),
            poll_instances: poll_instances.clone(),
        })
        .collect();

    Ok(Some(
        ManageCollectionSubscriptionResponse {
            message_id: generate_message_id(),
            in_response_to: request.message_id,
            collection_name: collection.name,
            message: None,
            subscription_instances,
        }
        .into(),
    ))
}

async fn subscribe(
    state: &GatewayState,
    service: &Service,
    collection: &Collection,
    request: &ManageCollectionSubscriptionRequest,
) -> Result<Subscription, HandlerError> {
    let params = request
        .subscription_parameters
        .clone()
        .unwrap_or_else(PollRequestParameters::default);

    if !params.content_bindings.is_empty()
        && collection
            .matching_bindings(&params.content_bindings)
            .is_empty()
    {
        return Err(StatusError::unsupported_content(
            collection.supported_content.clone(),
            "None of the requested content bindings are supported by this collection",
        )
        .into());
    }

    let subscription = state
        .persistence
        .create_subscription(&Subscription {
            subscription_id: generate_message_id(),
            service_id: service.id().to_string(),
            collection_id: collection.id,
            status: SubscriptionStatus::Active,
            params,
        })
        .await?;
    info!(
        service_id = service.id(),
        collection = collection.name,
        subscription_id = subscription.subscription_id,
        "subscription created"
    );
    Ok(subscription)
}

/// A subscription of this service to `collection`, or `NotFound`.
async fn owned_subscription(
    state: &GatewayState,
    service: &Service,
    collection: &Collection,
    id: &str,
) -> Result<Subscription, HandlerError> {
    state
        .persistence
        .get_subscription(id)
        .await?
        .filter(|s| s.service_id == service.id() && s.collection_id == collection.id)
        .ok_or_else(|| {
            StatusError::not_found(id, format!("The subscription {id} was not found")).into()
        })
}

fn next_status(
    action: SubscriptionAction,
    current: SubscriptionStatus,
) -> Result<SubscriptionStatus, StatusError> {
    match (action, current) {
        (SubscriptionAction::Unsubscribe, _) => Ok(SubscriptionStatus::Unsubscribed),
        (_, SubscriptionStatus::Unsubscribed) => Err(StatusError::failure(
            "The subscription has been cancelled and cannot be changed",
        )),
        (SubscriptionAction::Pause, _) => Ok(SubscriptionStatus::Paused),
        (SubscriptionAction::Resume, _) => Ok(SubscriptionStatus::Active),
        (SubscriptionAction::Subscribe | SubscriptionAction::Status, status) => Ok(status),
    }
}

async fn polling_contacts(
    state: &GatewayState,
    collection: &Collection,
) -> Result<Vec<ServiceContact>, HandlerError> {
    let services = state
        .persistence
        .get_services_for_collection(collection.id)
        .await?;
    Ok(services
        .iter()
        .filter(|s| matches!(s.kind, ServiceKind::Poll(_)))
        .flat_map(|s| state.registry.contacts_for(s, state.message_bindings()))
        .collect())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions() {
        use {SubscriptionAction as A, SubscriptionStatus as S};

        assert_eq!(next_status(A::Pause, S::Active).unwrap(), S::Paused);
        assert_eq!(next_status(A::Resume, S::Paused).unwrap(), S::Active);
        assert_eq!(next_status(A::Unsubscribe, S::Paused).unwrap(), S::Unsubscribed);
        assert_eq!(
            next_status(A::Unsubscribe, S::Unsubscribed).unwrap(),
            S::Unsubscribed
        );
        assert!(next_status(A::Resume, S::Unsubscribed).is_err());
        assert!(next_status(A::Pause, S::Unsubscribed).is_err());
    }
}
