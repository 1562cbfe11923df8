use {
    ctigate_common::entities::{DiscoveryProperties, ServiceKind},
    ctigate_protocol::{
        Message, MessageType, generate_message_id,
        bindings::VID_TAXII_SERVICES_11,
        messages::{DiscoveryResponse, ServiceInstance},
    },
    tracing::warn,
};

use crate::{
    dispatch::{HandlerResult, RequestContext},
    registry::{Service, ServiceRegistry},
};

/// Describe every advertised service, once per protocol binding.
pub async fn handle_discovery_request(
    ctx: RequestContext,
    props: DiscoveryProperties,
) -> HandlerResult {
    let received = ctx.message.message_type();
    let Message::DiscoveryRequest(request) = ctx.message else {
        return Err(super::unexpected_message(MessageType::DiscoveryRequest, received));
    };

    let service_instances = service_instances(
        &ctx.state.registry,
        &props.advertised_services,
        ctx.state.message_bindings(),
    );

    Ok(Some(
        DiscoveryResponse {
            message_id: generate_message_id(),
            in_response_to: request.message_id,
            service_instances,
        }
        .into(),
    ))
}

fn service_instances(
    registry: &ServiceRegistry,
    advertised: &[String],
    message_bindings: &[String],
) -> Vec<ServiceInstance> {
    advertised
        .iter()
        .filter_map(|id| {
            let service = registry.get(id);
            if service.is_none() {
                warn!(service_id = id, "advertised service is not registered");
            }
            service
        })
        .flat_map(|service| instances_of(&service, message_bindings))
        .collect()
}

fn instances_of(service: &Service, message_bindings: &[String]) -> Vec<ServiceInstance> {
    let definition = service.definition();
    let accepted_content = match &definition.kind {
        ServiceKind::Inbox(props) if !props.accept_all_content => props.supported_content.clone(),
        _ => Vec::new(),
    };
    definition
        .protocol_bindings
        .iter()
        .map(|binding| ServiceInstance {
            service_type: service.service_type(),
            services_version: VID_TAXII_SERVICES_11.to_string(),
            available: service.is_available(),
            protocol_binding: binding.clone(),
            address: service.absolute_address(binding),
            message_bindings: message_bindings.to_vec(),
            inbox_service_accepted_content: accepted_content.clone(),
            message: definition.description.clone(),
        })
        .collect()
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        ctigate_common::{
            ContentBinding,
            entities::{InboxProperties, PollProperties, ServiceDefinition, ServiceType},
        },
        ctigate_protocol::bindings::{VID_TAXII_HTTP_10, VID_TAXII_HTTPS_10},
    };

    fn definition(id: &str, kind: ServiceKind, bindings: &[&str]) -> ServiceDefinition {
        ServiceDefinition {
            id: id.into(),
            address: format!("/services/{id}"),
            description: Some(format!("{id} service")),
            protocol_bindings: bindings.iter().map(|b| (*b).to_string()).collect(),
            available: true,
            authentication_required: false,
            kind,
        }
    }

    #[test]
    fn one_instance_per_advertised_binding() {
        let registry = ServiceRegistry::new(
            vec![
                definition(
                    "inbox",
                    ServiceKind::Inbox(InboxProperties {
                        supported_content: vec![ContentBinding::new("urn:stix")],
                        ..Default::default()
                    }),
                    &[VID_TAXII_HTTP_10, VID_TAXII_HTTPS_10],
                ),
                definition(
                    "poll",
                    ServiceKind::Poll(PollProperties::default()),
                    &[VID_TAXII_HTTPS_10],
                ),
            ],
            "taxii.example.com",
        );
        let bindings = vec!["urn:taxii.mitre.org:message:xml:1.1".to_string()];

        let instances = service_instances(
            &registry,
            &["poll".into(), "missing".into(), "inbox".into()],
            &bindings,
        );

        assert_eq!(instances.len(), 3);
        assert_eq!(instances[0].service_type, ServiceType::Poll);
        assert_eq!(instances[0].address, "https://taxii.example.com/services/poll");
        assert!(instances[0].inbox_service_accepted_content.is_empty());
        assert_eq!(instances[1].address, "http://taxii.example.com/services/inbox");
        assert_eq!(instances[2].protocol_binding, VID_TAXII_HTTPS_10);
        assert_eq!(instances[2].inbox_service_accepted_content.len(), 1);
        assert_eq!(instances[2].message.as_deref(), Some("inbox service"));
    }
}
