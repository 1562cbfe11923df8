//! Config schema: server, database, auth, and the services, collections and
//! accounts applied to storage by `ctigate sync`.

use {
    ctigate_common::entities::{CollectionDefinition, ServiceDefinition},
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CtigateConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    /// Services in the order they are registered; the first service with a
    /// given path wins.
    pub services: Vec<ServiceDefinition>,
    pub collections: Vec<CollectionDefinition>,
    pub accounts: Vec<AccountConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Host used to complete service addresses that are configured as bare
    /// paths. Defaults to `bind:port`.
    pub domain: Option<String>,
    /// Catch-all prefix the TAXII services are mounted under.
    pub path_prefix: String,
    /// Advertise the HTTPS protocol binding in response headers.
    pub secure: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 9000,
            domain: None,
            path_prefix: "/services".into(),
            secure: false,
        }
    }
}

impl ServerConfig {
    /// Host (and port) used in absolute service addresses.
    pub fn domain(&self) -> String {
        self.domain
            .clone()
            .unwrap_or_else(|| format!("{}:{}", self.bind, self.port))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:ctigate.db?mode=rwc".into(),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Lifetime of tokens issued by `POST /api/auth`.
    pub token_ttl_secs: u64,
    /// Accept `Authorization: Basic` on TAXII requests.
    pub support_basic_auth: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_ttl_secs: 86_400,
            support_basic_auth: false,
        }
    }
}

/// An account created or updated by `ctigate sync`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    pub username: String,
    #[serde(serialize_with = "serialize_secret")]
    pub password: Secret<String>,
}

fn serialize_secret<S: serde::Serializer>(
    secret: &Secret<String>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose_secret())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        ctigate_common::entities::{CollectionType, ServiceKind, ServiceType},
    };

    const TOML: &str = r#"
        [server]
        port = 9100
        domain = "taxii.example.com"

        [auth]
        support_basic_auth = true

        [[services]]
        id = "discovery"
        type = "discovery"
        address = "/services/discovery"
        protocol_bindings = ["urn:taxii.mitre.org:protocol:http:1.0"]
        advertised_services = ["discovery", "poll"]

        [[services]]
        id = "poll"
        type = "poll"
        address = "/services/poll"
        max_result_size = 20

        [[collections]]
        name = "feed"
        type = "DATA_SET"
        supported_content = ["urn:stix.mitre.org:xml:1.1.1"]
        service_ids = ["poll"]

        [[accounts]]
        username = "admin"
        password = "admin"
    "#;

    #[test]
    fn parses_full_document() {
        let cfg: CtigateConfig = toml::from_str(TOML).unwrap();
        assert_eq!(cfg.server.port, 9100);
        assert_eq!(cfg.server.path_prefix, "/services");
        assert_eq!(cfg.server.domain(), "taxii.example.com");
        assert!(cfg.auth.support_basic_auth);
        assert_eq!(cfg.auth.token_ttl_secs, 86_400);

        assert_eq!(cfg.services.len(), 2);
        assert_eq!(cfg.services[0].service_type(), ServiceType::Discovery);
        let ServiceKind::Poll(poll) = &cfg.services[1].kind else {
            panic!("expected poll");
        };
        assert_eq!(poll.max_result_size, 20);
        assert_eq!(poll.max_result_count, 10_000);

        assert_eq!(cfg.collections[0].collection_type, CollectionType::Set);
        assert_eq!(cfg.accounts[0].password.expose_secret(), "admin");
    }

    #[test]
    fn defaults_when_empty() {
        let cfg: CtigateConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.server.domain(), "127.0.0.1:9000");
        assert_eq!(cfg.database.url, "sqlite:ctigate.db?mode=rwc");
        assert!(cfg.services.is_empty());
    }

    #[test]
    fn secrets_serialize_in_clear_for_round_trips() {
        let account = AccountConfig {
            username: "u".into(),
            password: Secret::new("p".into()),
        };
        let json = serde_json::to_value(&account).unwrap();
        assert_eq!(json["password"], "p");
    }
}
