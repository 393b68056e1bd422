//! Handler for cluster-internal services.

use super::FlavorHandler;
use crate::ipset::{entry, CLUSTER_IP_SET, EXTERNAL_IP_SET, LOOPBACK_SET};
use crate::proxier::Proxier;
use crate::record::{EndpointInfo, ServicePortInfo};

pub struct ClusterIpHandler;

impl FlavorHandler for ClusterIpHandler {
    fn create_service(&self, proxier: &mut Proxier, sp: &ServicePortInfo) {
        // 1. virtual server per cluster IP
        proxier.create_cluster_ip_virtual_servers(sp);

        // 2. cluster-IP set entries
        let entries = entry::cluster_ip_entries(None, sp);
        proxier.add_set_entries(CLUSTER_IP_SET, &entries);

        // 3. cluster IPs onto the dummy interface
        proxier.add_dummy_addresses(&sp.cluster_ips);

        if !sp.external_ips.is_empty() {
            // 4. virtual server per external IP
            proxier.create_external_ip_virtual_servers(sp);

            // 5. external-IP set entries
            let entries = entry::external_ip_entries(None, sp);
            proxier.add_set_entries(EXTERNAL_IP_SET, &entries);
        }
    }

    fn delete_service(&self, proxier: &mut Proxier, sp: &ServicePortInfo) {
        // mirror of create, resources released in reverse order
        proxier.remove_dummy_addresses(&sp.cluster_ips);

        let entries = entry::cluster_ip_entries(None, sp);
        proxier.remove_set_entries(CLUSTER_IP_SET, &entries);

        proxier.delete_cluster_ip_virtual_servers(sp);

        if !sp.external_ips.is_empty() {
            let entries = entry::external_ip_entries(None, sp);
            proxier.remove_set_entries(EXTERNAL_IP_SET, &entries);

            proxier.delete_external_ip_virtual_servers(sp);
        }
    }

    fn create_endpoint(&self, proxier: &mut Proxier, ep: &EndpointInfo, sp: &ServicePortInfo) {
        // 1. backend behind every cluster-IP virtual server
        proxier.add_cluster_ip_real_server(sp, ep);

        // 2. node-local backends are matched for loopback masquerade
        if ep.is_local {
            proxier.add_set_entry(LOOPBACK_SET, &entry::loopback_entry(ep, sp));
        }

        // 3. backend behind every external-IP virtual server
        if !sp.external_ips.is_empty() {
            proxier.add_external_ip_real_server(sp, ep);
        }
    }

    fn delete_endpoint(&self, proxier: &mut Proxier, ep: &EndpointInfo, sp: &ServicePortInfo) {
        if !sp.external_ips.is_empty() {
            proxier.delete_external_ip_real_server(sp, ep);
        }

        if ep.is_local {
            proxier.remove_set_entry(LOOPBACK_SET, &entry::loopback_entry(ep, sp));
        }

        proxier.delete_cluster_ip_real_server(sp, ep);
    }
}
