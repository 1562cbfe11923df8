//! Configuration validation.
//!
//! Flags unknown (likely misspelled) keys against the schema, type errors,
//! and semantic problems in the service and collection layout.

use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
};

use ctigate_common::entities::ServiceKind;

use crate::{loader, schema::CtigateConfig};

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Info => "info",
        })
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// "syntax", "unknown-field", "type-error", "reference", "duplicate",
    /// "value" or "security".
    pub category: &'static str,
    /// Dotted path, e.g. `services[2].advertised_services`.
    pub path: String,
    pub message: String,
}

impl Diagnostic {
    fn new(
        severity: Severity,
        category: &'static str,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            category,
            path: path.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}: {}", self.severity, self.message)
        } else {
            write!(f, "{} [{}]: {}", self.severity, self.path, self.message)
        }
    }
}

/// Result of validating a configuration.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<PathBuf>,
}

impl ValidationResult {
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }
}

// ── Known keys ──────────────────────────────────────────────────────────────

enum KnownKeys {
    Struct(HashMap<&'static str, KnownKeys>),
    Array(Box<KnownKeys>),
    Leaf,
}

fn fields<const N: usize>(entries: [(&'static str, KnownKeys); N]) -> KnownKeys {
    KnownKeys::Struct(HashMap::from(entries))
}

fn leaves(names: &[&'static str]) -> KnownKeys {
    KnownKeys::Struct(names.iter().map(|n| (*n, KnownKeys::Leaf)).collect())
}

fn build_schema_map() -> KnownKeys {
    use KnownKeys::{Array, Leaf};

    // Service entries accept the union of every service type's settings;
    // the type check rejects fields that do not belong to `type`.
    let service = leaves(&[
        "id",
        "type",
        "address",
        "description",
        "protocol_bindings",
        "available",
        "authentication_required",
        "advertised_services",
        "accept_all_content",
        "supported_content",
        "destination_collection_required",
        "max_result_size",
        "max_result_count",
        "subscription_required",
        "subscription_supported",
    ]);
    let collection = leaves(&[
        "name",
        "description",
        "type",
        "available",
        "accept_all_content",
        "supported_content",
        "service_ids",
    ]);

    fields([
        (
            "server",
            leaves(&["bind", "port", "domain", "path_prefix", "secure"]),
        ),
        ("database", leaves(&["url", "max_connections"])),
        (
            "auth",
            leaves(&["token_ttl_secs", "support_basic_auth"]),
        ),
        ("services", Array(Box::new(service))),
        ("collections", Array(Box::new(collection))),
        (
            "accounts",
            Array(Box::new(fields([("username", Leaf), ("password", Leaf)]))),
        ),
    ])
}

fn levenshtein(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.chars().enumerate() {
        let mut curr = Vec::with_capacity(b.len() + 1);
        curr.push(i + 1);
        for (j, cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != *cb);
            curr.push(substitution.min(prev[j + 1] + 1).min(curr[j] + 1));
        }
        prev = curr;
    }
    prev[b.len()]
}

fn suggest<'a>(needle: &str, candidates: &[&'a str], max_distance: usize) -> Option<&'a str> {
    candidates
        .iter()
        .map(|c| (*c, levenshtein(needle, c)))
        .filter(|(_, d)| *d > 0 && *d <= max_distance)
        .min_by_key(|(_, d)| *d)
        .map(|(c, _)| c)
}

fn check_unknown_fields(
    value: &serde_json::Value,
    schema: &KnownKeys,
    prefix: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match (value, schema) {
        (serde_json::Value::Object(map), KnownKeys::Struct(known)) => {
            let mut names: Vec<&str> = known.keys().copied().collect();
            names.sort_unstable();
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                match known.get(key.as_str()) {
                    Some(child_schema) => {
                        check_unknown_fields(child, child_schema, &path, diagnostics);
                    },
                    None => {
                        let message = match suggest(key, &names, 3) {
                            Some(s) => format!("unknown field (did you mean \"{s}\"?)"),
                            None => "unknown field".to_string(),
                        };
                        diagnostics.push(Diagnostic::new(
                            Severity::Error,
                            "unknown-field",
                            path,
                            message,
                        ));
                    },
                }
            }
        },
        (serde_json::Value::Array(items), KnownKeys::Array(item_schema)) => {
            for (i, item) in items.iter().enumerate() {
                check_unknown_fields(item, item_schema, &format!("{prefix}[{i}]"), diagnostics);
            }
        },
        _ => {},
    }
}

// ── Entry points ────────────────────────────────────────────────────────────

/// Validate the config file at `path`, or the discovered one.
#[must_use]
pub fn validate(path: Option<&Path>) -> ValidationResult {
    let config_path = path.map(Path::to_path_buf).or_else(loader::find_config_file);
    let Some(config_path) = config_path else {
        return ValidationResult {
            diagnostics: vec![Diagnostic::new(
                Severity::Info,
                "syntax",
                "",
                "no config file found; using defaults",
            )],
            config_path: None,
        };
    };

    let mut diagnostics = Vec::new();
    match loader::load_config_value(&config_path) {
        Ok(value) => check_unknown_fields(&value, &build_schema_map(), "", &mut diagnostics),
        Err(e) => {
            diagnostics.push(Diagnostic::new(
                Severity::Error,
                "syntax",
                "",
                e.to_string(),
            ));
            return ValidationResult {
                diagnostics,
                config_path: Some(config_path),
            };
        },
    }

    match loader::load_config(&config_path) {
        Ok(config) => diagnostics.extend(validate_config(&config).diagnostics),
        Err(e) => diagnostics.push(Diagnostic::new(
            Severity::Error,
            "type-error",
            "",
            format!("type error: {e}"),
        )),
    }

    ValidationResult {
        diagnostics,
        config_path: Some(config_path),
    }
}

/// Semantic checks on a parsed config.
#[must_use]
pub fn validate_config(config: &CtigateConfig) -> ValidationResult {
    let mut diagnostics = Vec::new();
    check_services(config, &mut diagnostics);
    check_collections(config, &mut diagnostics);
    check_security(config, &mut diagnostics);
    ValidationResult {
        diagnostics,
        config_path: None,
    }
}

fn check_services(config: &CtigateConfig, diagnostics: &mut Vec<Diagnostic>) {
    let ids: HashSet<&str> = config.services.iter().map(|s| s.id.as_str()).collect();
    let mut seen_ids = HashSet::new();
    let mut seen_paths: HashMap<String, &str> = HashMap::new();

    for (i, service) in config.services.iter().enumerate() {
        let at = format!("services[{i}]");

        if service.id.is_empty() {
            diagnostics.push(Diagnostic::new(
                Severity::Error,
                "value",
                format!("{at}.id"),
                "service id must not be empty",
            ));
        }
        if !seen_ids.insert(service.id.as_str()) {
            diagnostics.push(Diagnostic::new(
                Severity::Error,
                "duplicate",
                format!("{at}.id"),
                format!("duplicate service id \"{}\"", service.id),
            ));
        }

        let path = service.path();
        if let Some(first) = seen_paths.get(&path) {
            diagnostics.push(Diagnostic::new(
                Severity::Warning,
                "duplicate",
                format!("{at}.address"),
                format!("path {path} is already served by \"{first}\"; this service is unreachable"),
            ));
        } else {
            seen_paths.insert(path, service.id.as_str());
        }

        if service.protocol_bindings.is_empty() {
            diagnostics.push(Diagnostic::new(
                Severity::Warning,
                "value",
                format!("{at}.protocol_bindings"),
                "no protocol bindings; the service will not be advertised",
            ));
        }

        match &service.kind {
            ServiceKind::Discovery(props) => {
                for advertised in &props.advertised_services {
                    if !ids.contains(advertised.as_str()) {
                        diagnostics.push(Diagnostic::new(
                            Severity::Error,
                            "reference",
                            format!("{at}.advertised_services"),
                            format!("unknown service id \"{advertised}\""),
                        ));
                    }
                }
            },
            ServiceKind::Poll(props) => {
                if props.max_result_size == 0 {
                    diagnostics.push(Diagnostic::new(
                        Severity::Error,
                        "value",
                        format!("{at}.max_result_size"),
                        "must be greater than zero",
                    ));
                }
                if props.max_result_count < props.max_result_size {
                    diagnostics.push(Diagnostic::new(
                        Severity::Warning,
                        "value",
                        format!("{at}.max_result_count"),
                        "smaller than max_result_size; responses are capped at max_result_count",
                    ));
                }
            },
            ServiceKind::Inbox(props) => {
                if !props.accept_all_content && props.supported_content.is_empty() {
                    diagnostics.push(Diagnostic::new(
                        Severity::Warning,
                        "value",
                        format!("{at}.supported_content"),
                        "inbox accepts no content",
                    ));
                }
            },
            ServiceKind::CollectionManagement(_) => {},
        }
    }
}

fn check_collections(config: &CtigateConfig, diagnostics: &mut Vec<Diagnostic>) {
    let ids: HashSet<&str> = config.services.iter().map(|s| s.id.as_str()).collect();
    let mut names = HashSet::new();

    for (i, collection) in config.collections.iter().enumerate() {
        let at = format!("collections[{i}]");
        if !names.insert(collection.name.as_str()) {
            diagnostics.push(Diagnostic::new(
                Severity::Error,
                "duplicate",
                format!("{at}.name"),
                format!("duplicate collection name \"{}\"", collection.name),
            ));
        }
        for service_id in &collection.service_ids {
            if !ids.contains(service_id.as_str()) {
                diagnostics.push(Diagnostic::new(
                    Severity::Error,
                    "reference",
                    format!("{at}.service_ids"),
                    format!("unknown service id \"{service_id}\""),
                ));
            }
        }
    }
}

fn check_security(config: &CtigateConfig, diagnostics: &mut Vec<Diagnostic>) {
    let is_localhost = matches!(config.server.bind.as_str(), "127.0.0.1" | "localhost" | "::1");
    if config.auth.support_basic_auth && !config.server.secure && !is_localhost {
        diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "security",
            "auth.support_basic_auth",
            format!(
                "basic auth sends passwords in clear text while binding to {} without https",
                config.server.bind
            ),
        ));
    }
}
