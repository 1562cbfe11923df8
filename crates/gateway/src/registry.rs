//! Service registry and path router.
//!
//! Built once at startup from the stored service definitions and immutable
//! afterwards. Lookup by path is first-match in registration order.

use std::sync::Arc;

use {
    ctigate_common::entities::{ServiceDefinition, ServiceType},
    ctigate_protocol::{MessageType, bindings::scheme_for_protocol, messages::ServiceContact},
    tracing::{debug, warn},
    url::Url,
};

use crate::{
    dispatch::{HandlerTable, MessageHandler},
    handlers,
};

// ── Service ──────────────────────────────────────────────────────────────────

/// A configured service with its handler table.
pub struct Service {
    definition: ServiceDefinition,
    path: String,
    /// `host[:port]/path`, without scheme; the scheme comes from the
    /// protocol binding an address is rendered for.
    base_address: String,
    handlers: HandlerTable,
}

impl Service {
    /// Wire up a service with the handlers its type registers.
    pub fn new(definition: ServiceDefinition, domain: &str) -> Self {
        let handlers = handlers::table_for(&definition.kind);
        Self::with_handlers(definition, domain, handlers)
    }

    pub fn with_handlers(definition: ServiceDefinition, domain: &str, handlers: HandlerTable) -> Self {
        if definition.protocol_bindings.is_empty() {
            warn!(
                service_id = definition.id,
                "no protocol bindings specified, service will be invisible"
            );
        }
        Self {
            path: definition.path(),
            base_address: base_address(&definition.address, domain),
            definition,
            handlers,
        }
    }

    pub fn id(&self) -> &str {
        &self.definition.id
    }

    pub fn definition(&self) -> &ServiceDefinition {
        &self.definition
    }

    pub fn service_type(&self) -> ServiceType {
        self.definition.service_type()
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_available(&self) -> bool {
        self.definition.available
    }

    pub fn authentication_required(&self) -> bool {
        self.definition.authentication_required
    }

    pub fn handler(&self, message_type: MessageType) -> Option<&MessageHandler> {
        self.handlers.get(message_type)
    }

    pub fn message_types(&self) -> Vec<MessageType> {
        self.handlers.message_types()
    }

    /// The address clients should use over `protocol_binding`.
    pub fn absolute_address(&self, protocol_binding: &str) -> String {
        render_address(&self.base_address, protocol_binding)
    }

    /// One contact per protocol binding the service speaks.
    pub fn contacts(&self, message_bindings: &[String]) -> Vec<ServiceContact> {
        self.definition
            .protocol_bindings
            .iter()
            .map(|binding| ServiceContact {
                protocol_binding: binding.clone(),
                address: self.absolute_address(binding),
                message_bindings: message_bindings.to_vec(),
            })
            .collect()
    }
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("id", &self.definition.id)
            .field("path", &self.path)
            .field("handlers", &self.handlers.message_types())
            .finish()
    }
}

/// Strip the scheme from an address and complete bare paths with `domain`.
fn base_address(address: &str, domain: &str) -> String {
    if let Ok(url) = Url::parse(address)
        && let Some(host) = url.host_str()
    {
        return match url.port() {
            Some(port) => format!("{host}:{port}{}", url.path()),
            None => format!("{host}{}", url.path()),
        };
    }
    let domain = domain
        .split_once("://")
        .map_or(domain, |(_, rest)| rest)
        .trim_end_matches('/');
    let path = address.trim_start_matches('/');
    format!("{domain}/{path}")
}

fn render_address(base: &str, protocol_binding: &str) -> String {
    let scheme = scheme_for_protocol(protocol_binding).unwrap_or_else(|| {
        warn!(binding = protocol_binding, address = base, "protocol binding not recognized");
        "http"
    });
    let raw = format!("{scheme}://{base}");
    Url::parse(&raw).map_or(raw, String::from)
}

// ── Registry ─────────────────────────────────────────────────────────────────

/// All services, in configuration order.
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    services: Vec<Arc<Service>>,
    domain: String,
}

impl ServiceRegistry {
    pub fn new(definitions: Vec<ServiceDefinition>, domain: impl Into<String>) -> Self {
        let domain = domain.into();
        let services = definitions
            .into_iter()
            .map(|d| Service::new(d, &domain))
            .collect();
        Self::from_services(services, domain)
    }

    pub fn from_services(services: Vec<Service>, domain: impl Into<String>) -> Self {
        let services: Vec<Arc<Service>> = services.into_iter().map(Arc::new).collect();
        for (i, service) in services.iter().enumerate() {
            if let Some(first) = services[..i].iter().find(|s| s.path == service.path) {
                warn!(
                    service_id = service.id(),
                    shadowed_by = first.id(),
                    path = service.path,
                    "duplicate service path, service is unreachable"
                );
            }
        }
        debug!(count = services.len(), "service registry built");
        Self {
            services,
            domain: domain.into(),
        }
    }

    /// First service whose path equals `path`.
    pub fn find_by_path(&self, path: &str) -> Option<Arc<Service>> {
        self.services.iter().find(|s| s.path == path).cloned()
    }

    pub fn get(&self, id: &str) -> Option<Arc<Service>> {
        self.services.iter().find(|s| s.id() == id).cloned()
    }

    pub fn services(&self) -> &[Arc<Service>] {
        &self.services
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Contacts for a stored definition, preferring the registered service.
    pub fn contacts_for(
        &self,
        definition: &ServiceDefinition,
        message_bindings: &[String],
    ) -> Vec<ServiceContact> {
        if let Some(service) = self.get(&definition.id) {
            return service.contacts(message_bindings);
        }
        let base = base_address(&definition.address, &self.domain);
        definition
            .protocol_bindings
            .iter()
            .map(|binding| ServiceContact {
                protocol_binding: binding.clone(),
                address: render_address(&base, binding),
                message_bindings: message_bindings.to_vec(),
            })
            .collect()
    }
}
