//! Full-state intake model.
//!
//! The upstream control plane delivers the complete desired state as a
//! stream of [`ServiceEndpoints`] records over a bounded channel, then
//! closes it. Everything here is a plain wire type; records are turned into
//! kernel-facing form by [`crate::record`].

use serde::{Deserialize, Serialize};

/// One logical service together with all of its backend endpoints.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceEndpoints {
    pub service: Service,
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub namespace: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub service_type: ServiceType,
    #[serde(default)]
    pub cluster_ips: AddrSet,
    #[serde(default)]
    pub external_ips: AddrSet,
    #[serde(default)]
    pub load_balancer_ips: AddrSet,
    #[serde(default)]
    pub ports: Vec<PortMapping>,
    #[serde(default)]
    pub session_affinity: SessionAffinity,
    /// Route external traffic only to node-local backends.
    #[serde(default)]
    pub external_traffic_to_local: bool,
    /// Route in-cluster traffic only to node-local backends.
    #[serde(default)]
    pub internal_traffic_to_local: bool,
    #[serde(default)]
    pub ip_filters: Vec<IpFilter>,
}

impl Service {
    pub fn namespaced_name(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// Addresses of one logical set, split by IP family. Only the v4 side is
/// consumed in this revision; the split keeps the model family-parametric.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AddrSet {
    #[serde(default)]
    pub v4: Vec<String>,
    #[serde(default)]
    pub v6: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PortMapping {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub protocol: Protocol,
    pub port: u16,
    #[serde(default)]
    pub node_port: u16,
    #[serde(default)]
    pub target_port: u16,
    #[serde(default)]
    pub target_port_name: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IpFilter {
    #[serde(default)]
    pub target_ips: AddrSet,
    #[serde(default)]
    pub source_ranges: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub ips: AddrSet,
    /// The backend runs on this node.
    #[serde(default)]
    pub local: bool,
    /// Per-endpoint overrides of named target ports.
    #[serde(default)]
    pub port_overrides: Vec<PortOverride>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PortOverride {
    pub name: String,
    pub port: u16,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
    Sctp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
            Protocol::Sctp => "SCTP",
        }
    }

    /// Lower-cased form used by packet-set entries and kernel tooling.
    pub fn lower(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Sctp => "sctp",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceType {
    #[default]
    #[serde(rename = "ClusterIP")]
    ClusterIp,
    #[serde(rename = "NodePort")]
    NodePort,
    #[serde(rename = "LoadBalancer")]
    LoadBalancer,
}

impl ServiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::ClusterIp => "ClusterIP",
            ServiceType::NodePort => "NodePort",
            ServiceType::LoadBalancer => "LoadBalancer",
        }
    }
}

impl std::fmt::Display for ServiceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionAffinity {
    #[default]
    None,
    /// Pin a client IP to one backend for the given number of seconds.
    ClientIp { timeout_secs: u32 },
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_protocol_wire_form() {
        let p: Protocol = serde_json::from_str("\"SCTP\"").unwrap();
        assert_eq!(p, Protocol::Sctp);
        assert_eq!(serde_json::to_string(&Protocol::Tcp).unwrap(), "\"TCP\"");
    }

    #[test]
    fn test_service_type_wire_form() {
        let t: ServiceType = serde_json::from_str("\"NodePort\"").unwrap();
        assert_eq!(t, ServiceType::NodePort);
        assert_eq!(ServiceType::ClusterIp.to_string(), "ClusterIP");
    }

    #[test]
    fn test_service_defaults() {
        let svc: Service =
            serde_json::from_str(r#"{"namespace":"default","name":"web"}"#).unwrap();
        assert_eq!(svc.service_type, ServiceType::ClusterIp);
        assert_eq!(svc.session_affinity, SessionAffinity::None);
        assert!(svc.ports.is_empty());
        assert_eq!(svc.namespaced_name(), "default/web");
    }
}
