//! Pure builders mapping records to packet-set entries. No state; handlers
//! call these and hand the results to the proxier.

use std::net::IpAddr;

use super::{SetEntry, SetType};
use crate::record::{EndpointInfo, ServicePortInfo};

/// One entry per cluster IP. A source network pins the entry to the
/// source-aware set variant.
pub fn cluster_ip_entries(src: Option<&str>, sp: &ServicePortInfo) -> Vec<SetEntry> {
    sp.cluster_ips
        .iter()
        .map(|ip| ip_entry(src, sp, *ip))
        .collect()
}

/// One entry per externally advertised IP.
pub fn external_ip_entries(src: Option<&str>, sp: &ServicePortInfo) -> Vec<SetEntry> {
    sp.external_ips
        .iter()
        .map(|ip| ip_entry(src, sp, *ip))
        .collect()
}

fn ip_entry(src: Option<&str>, sp: &ServicePortInfo, ip: IpAddr) -> SetEntry {
    match src {
        Some(net) => SetEntry {
            ip: Some(ip),
            port: sp.port,
            protocol: sp.protocol,
            ip2: None,
            net: Some(net.to_owned()),
            set_type: SetType::HashIpPortNet,
        },
        None => SetEntry {
            ip: Some(ip),
            port: sp.port,
            protocol: sp.protocol,
            ip2: None,
            net: None,
            set_type: SetType::HashIpPort,
        },
    }
}

/// Loopback entry for a node-local backend; both address slots carry the
/// endpoint IP.
pub fn loopback_entry(ep: &EndpointInfo, sp: &ServicePortInfo) -> SetEntry {
    SetEntry {
        ip: Some(ep.ip),
        port: sp.target_port,
        protocol: sp.protocol,
        ip2: Some(ep.ip),
        net: None,
        set_type: SetType::HashIpPortIp,
    }
}

/// Node-port entry for TCP and UDP: a single port in the protocol's bitmap
/// set.
pub fn node_port_entry(sp: &ServicePortInfo) -> SetEntry {
    SetEntry {
        ip: None,
        port: sp.node_port,
        protocol: sp.protocol,
        ip2: None,
        net: None,
        set_type: SetType::BitmapPort,
    }
}

/// Node-port entries for SCTP: the set is address-aware, so one entry per
/// node address.
pub fn node_port_sctp_entries(sp: &ServicePortInfo, node_ips: &[IpAddr]) -> Vec<SetEntry> {
    node_ips
        .iter()
        .map(|ip| SetEntry {
            ip: Some(*ip),
            port: sp.node_port,
            protocol: sp.protocol,
            ip2: None,
            net: None,
            set_type: SetType::HashIpPort,
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::record::{DEFAULT_SCHEDULING_METHOD, DEFAULT_WEIGHT};
    use crate::snapshot::{AddrSet, Endpoint, PortMapping, Protocol, Service};

    fn service_port(protocol: Protocol, cluster_ips: &[&str]) -> ServicePortInfo {
        let service = Service {
            namespace: "default".into(),
            name: "web".into(),
            cluster_ips: AddrSet {
                v4: cluster_ips.iter().map(|s| s.to_string()).collect(),
                v6: vec![],
            },
            ..Default::default()
        };
        let port = PortMapping {
            protocol,
            port: 80,
            target_port: 8080,
            node_port: 30080,
            ..Default::default()
        };
        ServicePortInfo::new(&service, &port, DEFAULT_SCHEDULING_METHOD, DEFAULT_WEIGHT)
    }

    #[test]
    fn test_cluster_ip_entries_one_per_ip() {
        let sp = service_port(Protocol::Tcp, &["10.0.0.1", "10.0.0.2"]);
        let entries = cluster_ip_entries(None, &sp);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].to_string(), "10.0.0.1,tcp:80");
        assert_eq!(entries[1].to_string(), "10.0.0.2,tcp:80");
        assert!(entries.iter().all(|e| e.set_type == SetType::HashIpPort));
    }

    #[test]
    fn test_source_network_pins_source_aware_type() {
        let sp = service_port(Protocol::Tcp, &["10.0.0.1"]);
        let entries = cluster_ip_entries(Some("192.168.0.0/16"), &sp);
        assert_eq!(entries[0].set_type, SetType::HashIpPortNet);
        assert_eq!(entries[0].net.as_deref(), Some("192.168.0.0/16"));
    }

    #[test]
    fn test_loopback_entry_doubles_endpoint_ip() {
        let sp = service_port(Protocol::Tcp, &["10.0.0.1"]);
        let ep = EndpointInfo::new(
            &sp.key(),
            "10.1.0.6".parse().unwrap(),
            &Endpoint {
                local: true,
                ..Default::default()
            },
        );
        let entry = loopback_entry(&ep, &sp);
        assert_eq!(entry.to_string(), "10.1.0.6,tcp:8080,10.1.0.6");
    }

    #[test]
    fn test_node_port_entries_by_protocol() {
        let tcp = service_port(Protocol::Tcp, &["10.0.0.1"]);
        assert_eq!(node_port_entry(&tcp).to_string(), "30080");

        let sctp = service_port(Protocol::Sctp, &["10.0.0.2"]);
        let node_ips: Vec<IpAddr> =
            vec!["192.168.1.10".parse().unwrap(), "192.168.1.11".parse().unwrap()];
        let entries = node_port_sctp_entries(&sctp, &node_ips);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].to_string(), "192.168.1.10,sctp:30080");
        assert_eq!(entries[1].to_string(), "192.168.1.11,sctp:30080");
    }
}
