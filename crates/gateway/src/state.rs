use std::sync::Arc;

use {
    ctigate_auth::AccountStore,
    ctigate_config::CtigateConfig,
    ctigate_persistence::Persistence,
    ctigate_protocol::{MessageCodec, SupportedBindings, XmlCodec},
};

use crate::{error::Result, registry::ServiceRegistry};

/// Transport settings the request pipeline needs.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    /// Catch-all prefix, normalised to a leading slash and no trailing one.
    pub path_prefix: String,
    pub secure: bool,
    pub support_basic_auth: bool,
}

impl GatewaySettings {
    pub fn from_config(config: &CtigateConfig) -> Self {
        Self {
            path_prefix: normalize_prefix(&config.server.path_prefix),
            secure: config.server.secure,
            support_basic_auth: config.auth.support_basic_auth,
        }
    }
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self::from_config(&CtigateConfig::default())
    }
}

fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}

/// Shared, read-mostly state for every request.
pub struct GatewayState {
    pub persistence: Arc<dyn Persistence>,
    pub accounts: AccountStore,
    pub codec: Arc<dyn MessageCodec>,
    pub supported: SupportedBindings,
    pub registry: ServiceRegistry,
    pub settings: GatewaySettings,
    pub version: String,
}

impl GatewayState {
    pub fn new(
        persistence: Arc<dyn Persistence>,
        accounts: AccountStore,
        registry: ServiceRegistry,
        settings: GatewaySettings,
    ) -> Arc<Self> {
        let codec: Arc<dyn MessageCodec> = Arc::new(XmlCodec);
        let supported = SupportedBindings::from_codec(codec.as_ref());
        Arc::new(Self {
            persistence,
            accounts,
            codec,
            supported,
            registry,
            settings,
            version: env!("CARGO_PKG_VERSION").to_string(),
        })
    }

    /// Build the registry from stored services and assemble the state.
    pub async fn load(
        config: &CtigateConfig,
        persistence: Arc<dyn Persistence>,
        accounts: AccountStore,
    ) -> Result<Arc<Self>> {
        let definitions = persistence.get_services(None).await?;
        let registry = ServiceRegistry::new(definitions, config.server.domain());
        Ok(Self::new(
            persistence,
            accounts,
            registry,
            GatewaySettings::from_config(config),
        ))
    }

    /// Message bindings every service of this server speaks.
    pub fn message_bindings(&self) -> &[String] {
        &self.supported.message
    }
}
