//! Routing entry generation and the reverse-proxy dynamic configuration
//! file format.
//!
//! One file per deployment. The first line records the owning workspace so
//! that a later publish from a different tenant can be refused.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use spotdeploy_common::{RoutingEntry, ServicePorts};
use thiserror::Error;

use super::identity::slug;

pub const ENTRY_POINT: &str = "websecure";
pub const CERT_RESOLVER: &str = "letsencrypt";
pub const SSL_HEADER_MIDDLEWARE: &str = "sslheader";

const OWNER_PREFIX: &str = "# owner: ";

#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("failed to render routing config: {0}")]
    Render(#[from] toml::ser::Error),
    #[error("failed to parse routing config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Service label used when a compose service name has no DNS-safe
/// characters.
const FALLBACK_SERVICE: &str = "svc";

/// One entry per (service, port). Services with several ports get a
/// numeric suffix starting at 1.
///
/// Router names are unique within the deployment. A derived name already
/// taken by an earlier service (in service-name order) gets a further `-2`,
/// `-3`, ... suffix.
#[must_use]
pub fn generate_entries(
    deployment: &str,
    private_ip: &str,
    ports: &ServicePorts,
    base_domain: &str,
) -> Vec<RoutingEntry> {
    let mut entries = Vec::new();
    let mut taken = BTreeSet::new();
    for (service, service_ports) in ports {
        let service = service_label(service);
        let numbered = service_ports.len() > 1;
        for (i, port) in service_ports.iter().enumerate() {
            let suffix = if numbered {
                (i + 1).to_string()
            } else {
                String::new()
            };
            let name = unique_name(&mut taken, format!("{deployment}-{service}{suffix}"));
            entries.push(RoutingEntry {
                hostname: format!("{name}.{base_domain}"),
                service_name: name,
                port: *port,
                backend: format!("{private_ip}:{port}"),
            });
        }
    }
    entries
}

fn service_label(service: &str) -> String {
    let label = slug(service);
    let label = label.trim_matches('-');
    if label.is_empty() {
        FALLBACK_SERVICE.to_string()
    } else {
        label.to_string()
    }
}

fn unique_name(taken: &mut BTreeSet<String>, base: String) -> String {
    if taken.insert(base.clone()) {
        return base;
    }
    let mut n = 2;
    loop {
        let candidate = format!("{base}-{n}");
        if taken.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct DynamicConfig {
    pub http: HttpConfig,
}

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct HttpConfig {
    #[serde(default)]
    pub routers: BTreeMap<String, Router>,
    #[serde(default)]
    pub middlewares: BTreeMap<String, Middleware>,
    #[serde(default)]
    pub services: BTreeMap<String, Service>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Router {
    pub rule: String,
    pub service: String,
    pub entry_points: Vec<String>,
    #[serde(default)]
    pub middlewares: Vec<String>,
    pub tls: Tls,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tls {
    pub cert_resolver: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Middleware {
    pub headers: Headers,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Headers {
    pub custom_request_headers: BTreeMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub load_balancer: LoadBalancer,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoadBalancer {
    pub servers: Vec<Server>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Server {
    pub url: String,
}

impl DynamicConfig {
    #[must_use]
    pub fn from_entries(entries: &[RoutingEntry]) -> Self {
        let mut http = HttpConfig::default();
        http.middlewares.insert(
            SSL_HEADER_MIDDLEWARE.to_string(),
            Middleware {
                headers: Headers {
                    custom_request_headers: BTreeMap::from([(
                        "X-Forwarded-Proto".to_string(),
                        "https".to_string(),
                    )]),
                },
            },
        );
        for entry in entries {
            http.routers.insert(
                entry.service_name.clone(),
                Router {
                    rule: format!("Host(`{}`)", entry.hostname),
                    service: entry.service_name.clone(),
                    entry_points: vec![ENTRY_POINT.to_string()],
                    middlewares: vec![SSL_HEADER_MIDDLEWARE.to_string()],
                    tls: Tls {
                        cert_resolver: CERT_RESOLVER.to_string(),
                    },
                },
            );
            http.services.insert(
                entry.service_name.clone(),
                Service {
                    load_balancer: LoadBalancer {
                        servers: vec![Server {
                            url: entry.backend_url(),
                        }],
                    },
                },
            );
        }
        Self { http }
    }

    /// Hostnames from every `Host(...)` router rule.
    #[must_use]
    pub fn hostnames(&self) -> Vec<String> {
        self.http
            .routers
            .values()
            .filter_map(|r| host_from_rule(&r.rule))
            .collect()
    }
}

fn host_from_rule(rule: &str) -> Option<String> {
    let inner = rule.strip_prefix("Host(`")?.strip_suffix("`)")?;
    Some(inner.to_string())
}

/// Render a complete routing file for `owner` (`tenant/workspace`).
pub fn render_route_file(owner: &str, entries: &[RoutingEntry]) -> Result<String, RoutingError> {
    let body = toml::to_string(&DynamicConfig::from_entries(entries))?;
    Ok(format!("{OWNER_PREFIX}{owner}\n{body}"))
}

/// Owner recorded on the first line of a routing file, if any.
#[must_use]
pub fn route_file_owner(contents: &str) -> Option<&str> {
    contents
        .lines()
        .next()
        .and_then(|line| line.strip_prefix(OWNER_PREFIX))
        .map(str::trim)
}

pub fn parse_route_file(contents: &str) -> Result<DynamicConfig, RoutingError> {
    Ok(toml::from_str(contents)?)
}

/// Hostnames present in `previous` that are not in `entries`.
#[must_use]
pub fn removed_hostnames(previous: &DynamicConfig, entries: &[RoutingEntry]) -> Vec<String> {
    previous
        .hostnames()
        .into_iter()
        .filter(|h| !entries.iter().any(|e| &e.hostname == h))
        .collect()
}
