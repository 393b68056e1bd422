//! Packet-set model: the named sets this node maintains, their types, and
//! typed entries with validation against the owning set.
//!
//! iptables rules installed at startup match these sets to steer traffic
//! into the virtual-server path; the reconciler only maintains membership.

pub mod entry;

use std::net::IpAddr;

use crate::snapshot::Protocol;

/// Destination IPs of cluster-internal service addresses.
pub const CLUSTER_IP_SET: &str = "SVCLB-CLUSTER-IP";
/// Destination IPs of externally advertised service addresses.
pub const EXTERNAL_IP_SET: &str = "SVCLB-EXTERNAL-IP";
/// Node-local backends, matched for loopback masquerade.
pub const LOOPBACK_SET: &str = "SVCLB-LOOP-BACK";
pub const NODE_PORT_SET_TCP: &str = "SVCLB-NODE-PORT-TCP";
pub const NODE_PORT_SET_UDP: &str = "SVCLB-NODE-PORT-UDP";
pub const NODE_PORT_SET_SCTP: &str = "SVCLB-NODE-PORT-SCTP";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SetType {
    HashIpPort,
    HashIpPortIp,
    HashIpPortNet,
    BitmapPort,
}

impl SetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SetType::HashIpPort => "hash:ip,port",
            SetType::HashIpPortIp => "hash:ip,port,ip",
            SetType::HashIpPortNet => "hash:ip,port,net",
            SetType::BitmapPort => "bitmap:port",
        }
    }
}

impl std::fmt::Display for SetType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SetSpec {
    pub name: &'static str,
    pub set_type: SetType,
    pub comment: &'static str,
}

/// Every set this node maintains, ensured to exist at startup.
pub static MAINTAINED_SETS: [SetSpec; 6] = [
    SetSpec {
        name: CLUSTER_IP_SET,
        set_type: SetType::HashIpPort,
        comment: "cluster service addresses",
    },
    SetSpec {
        name: EXTERNAL_IP_SET,
        set_type: SetType::HashIpPort,
        comment: "external service addresses",
    },
    SetSpec {
        name: LOOPBACK_SET,
        set_type: SetType::HashIpPortIp,
        comment: "node-local backends",
    },
    SetSpec {
        name: NODE_PORT_SET_TCP,
        set_type: SetType::BitmapPort,
        comment: "TCP node ports",
    },
    SetSpec {
        name: NODE_PORT_SET_UDP,
        set_type: SetType::BitmapPort,
        comment: "UDP node ports",
    },
    SetSpec {
        name: NODE_PORT_SET_SCTP,
        set_type: SetType::HashIpPort,
        comment: "SCTP node ports",
    },
];

/// Node-port set for a protocol; each protocol has a dedicated set.
pub fn node_port_set(protocol: Protocol) -> &'static str {
    match protocol {
        Protocol::Tcp => NODE_PORT_SET_TCP,
        Protocol::Udp => NODE_PORT_SET_UDP,
        Protocol::Sctp => NODE_PORT_SET_SCTP,
    }
}

pub fn spec_for(name: &str) -> Option<&'static SetSpec> {
    MAINTAINED_SETS.iter().find(|s| s.name == name)
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SetEntry {
    pub ip: Option<IpAddr>,
    pub port: u16,
    pub protocol: Protocol,
    /// Second address for `hash:ip,port,ip` sets.
    pub ip2: Option<IpAddr>,
    /// Source network for `hash:ip,port,net` sets.
    pub net: Option<String>,
    pub set_type: SetType,
}

impl SetEntry {
    /// Whether this entry can be added to a set of the given spec. Checked
    /// before any kernel command is issued; mismatches are logged and
    /// skipped rather than handed to the kernel.
    pub fn valid_for(&self, spec: &SetSpec) -> bool {
        if self.set_type != spec.set_type {
            return false;
        }
        match self.set_type {
            SetType::HashIpPort => self.ip.is_some(),
            SetType::HashIpPortIp => self.ip.is_some() && self.ip2.is_some(),
            SetType::HashIpPortNet => self.ip.is_some() && self.net.is_some(),
            SetType::BitmapPort => true,
        }
    }
}

impl std::fmt::Display for SetEntry {
    /// Renders the form the `ipset` command accepts for the entry's type.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.set_type {
            SetType::BitmapPort => write!(f, "{}", self.port),
            SetType::HashIpPort => write!(
                f,
                "{},{}:{}",
                self.ip.map(|ip| ip.to_string()).unwrap_or_default(),
                self.protocol.lower(),
                self.port
            ),
            SetType::HashIpPortIp => write!(
                f,
                "{},{}:{},{}",
                self.ip.map(|ip| ip.to_string()).unwrap_or_default(),
                self.protocol.lower(),
                self.port,
                self.ip2.map(|ip| ip.to_string()).unwrap_or_default()
            ),
            SetType::HashIpPortNet => write!(
                f,
                "{},{}:{},{}",
                self.ip.map(|ip| ip.to_string()).unwrap_or_default(),
                self.protocol.lower(),
                self.port,
                self.net.as_deref().unwrap_or_default()
            ),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_node_port_set_by_protocol() {
        assert_eq!(node_port_set(Protocol::Tcp), NODE_PORT_SET_TCP);
        assert_eq!(node_port_set(Protocol::Udp), NODE_PORT_SET_UDP);
        assert_eq!(node_port_set(Protocol::Sctp), NODE_PORT_SET_SCTP);
    }

    #[test]
    fn test_entry_rendering() {
        let entry = SetEntry {
            ip: Some("10.0.0.1".parse().unwrap()),
            port: 80,
            protocol: Protocol::Tcp,
            ip2: None,
            net: None,
            set_type: SetType::HashIpPort,
        };
        assert_eq!(entry.to_string(), "10.0.0.1,tcp:80");

        let loopback = SetEntry {
            ip: Some("10.1.0.6".parse().unwrap()),
            port: 8080,
            protocol: Protocol::Tcp,
            ip2: Some("10.1.0.6".parse().unwrap()),
            net: None,
            set_type: SetType::HashIpPortIp,
        };
        assert_eq!(loopback.to_string(), "10.1.0.6,tcp:8080,10.1.0.6");

        let node_port = SetEntry {
            ip: None,
            port: 30080,
            protocol: Protocol::Udp,
            ip2: None,
            net: None,
            set_type: SetType::BitmapPort,
        };
        assert_eq!(node_port.to_string(), "30080");
    }

    #[test]
    fn test_validation_rejects_type_mismatch() {
        let spec = spec_for(LOOPBACK_SET).unwrap();
        let wrong_type = SetEntry {
            ip: Some("10.0.0.1".parse().unwrap()),
            port: 80,
            protocol: Protocol::Tcp,
            ip2: None,
            net: None,
            set_type: SetType::HashIpPort,
        };
        assert!(!wrong_type.valid_for(spec));

        let missing_ip2 = SetEntry {
            set_type: SetType::HashIpPortIp,
            ..wrong_type.clone()
        };
        assert!(!missing_ip2.valid_for(spec));

        let complete = SetEntry {
            ip2: Some("10.0.0.1".parse().unwrap()),
            ..missing_ip2
        };
        assert!(complete.valid_for(spec));
    }
}
