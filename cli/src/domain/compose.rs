//! Compose file handling: discovery names, log-driver injection and the
//! published-port heuristic.

use serde_yaml::{Mapping, Value};
use spotdeploy_common::ServicePorts;
use thiserror::Error;

/// Compose file names probed in a project root, in priority order.
pub const COMPOSE_FILE_NAMES: &[&str] = &[
    "docker-compose.yml",
    "docker-compose.yaml",
    "compose.yml",
    "compose.yaml",
];

#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("invalid compose file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("compose file defines no services")]
    NoServices,
}

pub fn parse(text: &str) -> Result<Value, ComposeError> {
    Ok(serde_yaml::from_str(text)?)
}

pub fn render(doc: &Value) -> Result<String, ComposeError> {
    Ok(serde_yaml::to_string(doc)?)
}

/// Log tag identifying a tenant's workspace in the central log stream.
#[must_use]
pub fn fluentd_tag(tenant: &str, workspace: &str) -> String {
    format!("service.{tenant}.{workspace}")
}

/// Replace every service's `logging` block with the fluentd driver.
///
/// Returns the number of services rewritten.
pub fn inject_fluentd(doc: &mut Value, address: &str, tag: &str) -> Result<usize, ComposeError> {
    let services = doc
        .get_mut("services")
        .and_then(Value::as_mapping_mut)
        .filter(|m| !m.is_empty())
        .ok_or(ComposeError::NoServices)?;

    let mut options = Mapping::new();
    options.insert("fluentd-address".into(), address.into());
    options.insert("tag".into(), tag.into());
    let mut logging = Mapping::new();
    logging.insert("driver".into(), "fluentd".into());
    logging.insert("options".into(), Value::Mapping(options));

    let mut count = 0;
    for (_, service) in services.iter_mut() {
        if let Value::Null = service {
            *service = Value::Mapping(Mapping::new());
        }
        if let Some(map) = service.as_mapping_mut() {
            map.insert("logging".into(), Value::Mapping(logging.clone()));
            count += 1;
        }
    }
    Ok(count)
}

/// Host ports each service publishes on all interfaces.
///
/// Container-only ports, loopback-bound ports, UDP and port ranges are not
/// externally routable and are skipped. Services with nothing left are
/// omitted.
pub fn published_ports(doc: &Value) -> Result<ServicePorts, ComposeError> {
    let services = doc
        .get("services")
        .and_then(Value::as_mapping)
        .ok_or(ComposeError::NoServices)?;

    let mut result = ServicePorts::new();
    for (name, service) in services {
        let Some(name) = name.as_str() else { continue };
        let Some(ports) = service.get("ports").and_then(Value::as_sequence) else {
            continue;
        };
        let mut published: Vec<u16> = ports.iter().filter_map(published_port).collect();
        published.dedup();
        if !published.is_empty() {
            result.insert(name.to_string(), published);
        }
    }
    Ok(result)
}

fn published_port(spec: &Value) -> Option<u16> {
    match spec {
        Value::String(s) => short_syntax(s),
        Value::Mapping(m) => long_syntax(m),
        // a bare number is a container port with an ephemeral host port
        _ => None,
    }
}

fn short_syntax(spec: &str) -> Option<u16> {
    let (mapping, protocol) = spec.split_once('/').unwrap_or((spec, "tcp"));
    if protocol != "tcp" {
        return None;
    }
    let parts: Vec<&str> = mapping.rsplitn(3, ':').collect();
    let (host_port, host_ip) = match parts.as_slice() {
        [_container, host] => (*host, None),
        [_container, host, ip] => (*host, Some(*ip)),
        _ => return None,
    };
    if host_ip.is_some_and(is_loopback) {
        return None;
    }
    host_port.parse().ok()
}

fn long_syntax(m: &Mapping) -> Option<u16> {
    let protocol = m.get("protocol").and_then(Value::as_str).unwrap_or("tcp");
    if protocol != "tcp" {
        return None;
    }
    if m.get("host_ip").and_then(Value::as_str).is_some_and(is_loopback) {
        return None;
    }
    match m.get("published")? {
        Value::Number(n) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn is_loopback(ip: &str) -> bool {
    let ip = ip.trim_start_matches('[').trim_end_matches(']');
    ip == "localhost" || ip.starts_with("127.") || ip == "::1"
}
