//! Kernel-facing records and their content-addressed keys.
//!
//! A [`ServicePortInfo`] is materialized for every `(service, port)` pair in
//! a snapshot, an [`EndpointInfo`] for every `(service port, endpoint IP)`
//! pair. The service key is the decimal form of a 64-bit hash over every
//! content-bearing field, so any edit yields a new key and the diff store
//! reports the old record as deleted and the new one as created. There is
//! deliberately no update path.

use std::net::IpAddr;

use tracing::warn;
use xxhash_rust::xxh64::xxh64;

use crate::snapshot::{Endpoint, PortMapping, Protocol, Service, ServiceType, SessionAffinity};

/// Separator between fields in the canonical byte encoding and between the
/// service-key and IP halves of an endpoint key.
pub const KEY_DELIMITER: &str = "||";

// TODO: promote to agent flags once per-service scheduling is needed.
pub const DEFAULT_SCHEDULING_METHOD: &str = "rr";
pub const DEFAULT_WEIGHT: i32 = 1;

/// One port of one logical service, the unit of reconciliation.
#[derive(Clone, Debug, PartialEq)]
pub struct ServicePortInfo {
    pub name: String,
    pub namespace: String,
    pub service_type: ServiceType,
    pub cluster_ips: Vec<IpAddr>,
    pub load_balancer_ips: Vec<IpAddr>,
    pub external_ips: Vec<IpAddr>,
    pub port: u16,
    pub target_port: u16,
    pub target_port_name: String,
    pub node_port: u16,
    pub protocol: Protocol,
    pub scheduling_method: String,
    pub weight: i32,
    pub session_affinity: SessionAffinity,
    pub node_local_external: bool,
    pub node_local_internal: bool,
    pub filter_target_ips: Vec<IpAddr>,
    pub filter_source_ranges: Vec<String>,
}

impl ServicePortInfo {
    pub fn new(
        service: &Service,
        port: &PortMapping,
        scheduling_method: &str,
        weight: i32,
    ) -> Self {
        let (filter_target_ips, filter_source_ranges) = filter_fields(service);
        ServicePortInfo {
            name: service.name.clone(),
            namespace: service.namespace.clone(),
            service_type: service.service_type,
            cluster_ips: parse_ips(&service.cluster_ips.v4, "cluster IP", service),
            load_balancer_ips: parse_ips(&service.load_balancer_ips.v4, "load-balancer IP", service),
            external_ips: parse_ips(&service.external_ips.v4, "external IP", service),
            port: port.port,
            target_port: port.target_port,
            target_port_name: port.target_port_name.clone(),
            node_port: port.node_port,
            protocol: port.protocol,
            scheduling_method: scheduling_method.to_owned(),
            weight,
            session_affinity: service.session_affinity,
            node_local_external: service.external_traffic_to_local,
            node_local_internal: service.internal_traffic_to_local,
            filter_target_ips,
            filter_source_ranges,
        }
    }

    pub fn namespaced_name(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    /// Canonical byte encoding over every content-bearing field. Numbers are
    /// encoded as decimal text so the form is printable and stable.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = String::new();
        push_field(&mut data, &self.name);
        push_field(&mut data, &self.namespace);
        for ip in &self.cluster_ips {
            push_field(&mut data, &ip.to_string());
        }
        for ip in &self.load_balancer_ips {
            push_field(&mut data, &ip.to_string());
        }
        for ip in &self.external_ips {
            push_field(&mut data, &ip.to_string());
        }
        push_field(&mut data, &self.port.to_string());
        push_field(&mut data, &self.target_port.to_string());
        push_field(&mut data, &self.node_port.to_string());
        push_field(&mut data, self.protocol.as_str());
        push_field(&mut data, self.service_type.as_str());
        push_field(&mut data, &self.scheduling_method);
        push_field(&mut data, &self.weight.to_string());
        match self.session_affinity {
            SessionAffinity::ClientIp { timeout_secs } => {
                push_field(&mut data, &timeout_secs.to_string())
            }
            SessionAffinity::None => push_field(&mut data, "nil"),
        }
        push_field(&mut data, &self.node_local_external.to_string());
        push_field(&mut data, &self.node_local_internal.to_string());
        for ip in &self.filter_target_ips {
            push_field(&mut data, &ip.to_string());
        }
        for range in &self.filter_source_ranges {
            push_field(&mut data, range);
        }
        data.into_bytes()
    }

    pub fn content_hash(&self) -> u64 {
        xxh64(&self.to_bytes(), 0)
    }

    /// Diff-store key: decimal form of the content hash.
    pub fn key(&self) -> String {
        self.content_hash().to_string()
    }

    /// Session-affinity persistence timeout, when client-IP affinity is set.
    pub fn persistence_timeout(&self) -> Option<u32> {
        match self.session_affinity {
            SessionAffinity::ClientIp { timeout_secs } => Some(timeout_secs),
            SessionAffinity::None => None,
        }
    }
}

/// One backend IP of one service port.
#[derive(Clone, Debug, PartialEq)]
pub struct EndpointInfo {
    /// Key of the owning [`ServicePortInfo`]; resolved back to the record
    /// through the service store during plan assembly.
    pub svc_key: String,
    pub ip: IpAddr,
    pub is_local: bool,
    pub port_overrides: ahash::HashMap<String, u16>,
}

impl EndpointInfo {
    pub fn new(svc_key: &str, ip: IpAddr, endpoint: &Endpoint) -> Self {
        let port_overrides = endpoint
            .port_overrides
            .iter()
            .map(|o| (o.name.clone(), o.port))
            .collect();
        EndpointInfo {
            svc_key: svc_key.to_owned(),
            ip,
            is_local: endpoint.local,
            port_overrides,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = String::new();
        push_field(&mut data, &self.svc_key);
        push_field(&mut data, &self.ip.to_string());
        push_field(&mut data, &self.is_local.to_string());
        data.into_bytes()
    }

    pub fn content_hash(&self) -> u64 {
        xxh64(&self.to_bytes(), 0)
    }

    pub fn key(&self) -> String {
        endpoint_key(&self.svc_key, &self.ip)
    }

    /// Destination port on this backend: the service target port, unless the
    /// endpoint overrides the service's named target port.
    pub fn target_port_for(&self, sp: &ServicePortInfo) -> u16 {
        self.port_overrides
            .get(&sp.target_port_name)
            .copied()
            .unwrap_or(sp.target_port)
    }
}

/// Endpoint keys are prefixed by the owning service key, so a prefix scan
/// with `svc_key || "||"` enumerates all endpoints of one service.
pub fn endpoint_key(svc_key: &str, ip: &IpAddr) -> String {
    format!("{svc_key}{KEY_DELIMITER}{ip}")
}

fn push_field(data: &mut String, field: &str) {
    data.push_str(field);
    data.push_str(KEY_DELIMITER);
}

fn parse_ips(raw: &[String], what: &str, service: &Service) -> Vec<IpAddr> {
    raw.iter()
        .filter_map(|s| match s.parse::<IpAddr>() {
            Ok(ip) => Some(ip),
            Err(e) => {
                warn!(
                    %e,
                    "skipping unparseable {} {} on service {}",
                    what,
                    s,
                    service.namespaced_name()
                );
                None
            }
        })
        .collect()
}

fn filter_fields(service: &Service) -> (Vec<IpAddr>, Vec<String>) {
    let mut target_ips = Vec::new();
    let mut source_ranges = Vec::new();
    for filter in &service.ip_filters {
        target_ips.extend(parse_ips(&filter.target_ips.v4, "filter target IP", service));
        source_ranges.extend(filter.source_ranges.iter().cloned());
    }
    (target_ips, source_ranges)
}
