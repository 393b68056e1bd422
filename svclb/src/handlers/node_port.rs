//! Handler for node-exposed services: the cluster-internal steps plus a
//! virtual server and set entry per node address.

use super::FlavorHandler;
use crate::ipset::{entry, node_port_set, CLUSTER_IP_SET, LOOPBACK_SET};
use crate::proxier::Proxier;
use crate::record::{EndpointInfo, ServicePortInfo};
use crate::snapshot::Protocol;

pub struct NodePortHandler;

fn node_port_entries(proxier: &Proxier, sp: &ServicePortInfo) -> Vec<crate::ipset::SetEntry> {
    match sp.protocol {
        Protocol::Tcp | Protocol::Udp => vec![entry::node_port_entry(sp)],
        // the SCTP set is address-aware, one entry per node address
        Protocol::Sctp => entry::node_port_sctp_entries(sp, proxier.node_ips()),
    }
}

impl FlavorHandler for NodePortHandler {
    fn create_service(&self, proxier: &mut Proxier, sp: &ServicePortInfo) {
        // cluster-internal steps 1-3
        proxier.create_cluster_ip_virtual_servers(sp);

        let entries = entry::cluster_ip_entries(None, sp);
        proxier.add_set_entries(CLUSTER_IP_SET, &entries);

        proxier.add_dummy_addresses(&sp.cluster_ips);

        // 4. virtual server on every node address, listening on the node port
        proxier.create_node_port_virtual_servers(sp);

        // 5. entries in the protocol's node-port set
        let set = node_port_set(sp.protocol);
        let entries = node_port_entries(proxier, sp);
        proxier.add_set_entries(set, &entries);
    }

    fn delete_service(&self, proxier: &mut Proxier, sp: &ServicePortInfo) {
        proxier.remove_dummy_addresses(&sp.cluster_ips);

        let entries = entry::cluster_ip_entries(None, sp);
        proxier.remove_set_entries(CLUSTER_IP_SET, &entries);

        proxier.delete_cluster_ip_virtual_servers(sp);

        let set = node_port_set(sp.protocol);
        let entries = node_port_entries(proxier, sp);
        proxier.remove_set_entries(set, &entries);

        proxier.delete_node_port_virtual_servers(sp);
    }

    fn create_endpoint(&self, proxier: &mut Proxier, ep: &EndpointInfo, sp: &ServicePortInfo) {
        proxier.add_cluster_ip_real_server(sp, ep);

        if ep.is_local {
            proxier.add_set_entry(LOOPBACK_SET, &entry::loopback_entry(ep, sp));
        }

        // backend behind every per-node virtual server
        proxier.add_node_port_real_server(sp, ep);
    }

    fn delete_endpoint(&self, proxier: &mut Proxier, ep: &EndpointInfo, sp: &ServicePortInfo) {
        if ep.is_local {
            proxier.remove_set_entry(LOOPBACK_SET, &entry::loopback_entry(ep, sp));
        }

        proxier.delete_cluster_ip_real_server(sp, ep);

        proxier.delete_node_port_real_server(sp, ep);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::record::{DEFAULT_SCHEDULING_METHOD, DEFAULT_WEIGHT};
    use crate::snapshot::{AddrSet, PortMapping, Service, ServiceType};
    use crate::testutil::FakeKernel;

    #[test]
    fn test_tcp_create_uses_bitmap_set() {
        let kernel = FakeKernel::default();
        let mut proxier = kernel.proxier(vec!["192.168.1.10".parse().unwrap()]);

        let service = Service {
            namespace: "default".into(),
            name: "web".into(),
            service_type: ServiceType::NodePort,
            cluster_ips: AddrSet {
                v4: vec!["10.0.0.1".into()],
                v6: vec![],
            },
            ..Default::default()
        };
        let port = PortMapping {
            protocol: Protocol::Tcp,
            port: 80,
            target_port: 8080,
            node_port: 30080,
            ..Default::default()
        };
        let sp = ServicePortInfo::new(&service, &port, DEFAULT_SCHEDULING_METHOD, DEFAULT_WEIGHT);

        NodePortHandler.create_service(&mut proxier, &sp);
        assert_eq!(
            kernel.calls(),
            vec![
                "add_service 10.0.0.1:80/TCP",
                "add_entry SVCLB-CLUSTER-IP 10.0.0.1,tcp:80",
                "addr_add 10.0.0.1/32",
                "add_service 192.168.1.10:30080/TCP",
                "add_entry SVCLB-NODE-PORT-TCP 30080",
            ]
        );

        kernel.clear_calls();
        NodePortHandler.delete_service(&mut proxier, &sp);
        assert_eq!(
            kernel.calls(),
            vec![
                "addr_del 10.0.0.1/32",
                "del_entry SVCLB-CLUSTER-IP 10.0.0.1,tcp:80",
                "delete_service 10.0.0.1:80/TCP",
                "del_entry SVCLB-NODE-PORT-TCP 30080",
                "delete_service 192.168.1.10:30080/TCP",
            ]
        );
    }
}
