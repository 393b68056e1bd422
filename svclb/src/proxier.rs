//! Idempotent facade over the kernel shims.
//!
//! Handlers sequence calls on this facade; every call here is best-effort.
//! "Object exists" on an add is success, any other failure is logged and
//! the surrounding patch continues. The stores still reflect desired
//! state, so the next snapshot re-attempts.

use std::net::IpAddr;

use tracing::{debug, error};

use crate::ipset::{spec_for, SetEntry};
use crate::record::{EndpointInfo, ServicePortInfo};
use crate::shim::{AddressCtl, Destination, PacketSetCtl, VirtualServer, VirtualServerCtl};
use crate::{Error, Result};

pub struct Proxier {
    lb: Box<dyn VirtualServerCtl + Send>,
    sets: Box<dyn PacketSetCtl + Send>,
    link: Box<dyn AddressCtl + Send>,
    node_ips: Vec<IpAddr>,
}

impl Proxier {
    pub fn new(
        lb: Box<dyn VirtualServerCtl + Send>,
        sets: Box<dyn PacketSetCtl + Send>,
        link: Box<dyn AddressCtl + Send>,
        node_ips: Vec<IpAddr>,
    ) -> Self {
        Proxier {
            lb,
            sets,
            link,
            node_ips,
        }
    }

    pub fn node_ips(&self) -> &[IpAddr] {
        &self.node_ips
    }

    /// Make sure every maintained set exists. Startup-only; failures here
    /// propagate, unlike the per-patch calls below.
    pub fn ensure_sets(&mut self) -> Result<()> {
        for spec in &crate::ipset::MAINTAINED_SETS {
            match self.sets.create_set(spec) {
                Ok(()) | Err(Error::ObjectExists) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn virtual_server(sp: &ServicePortInfo, ip: IpAddr, port: u16) -> VirtualServer {
        VirtualServer {
            ip,
            port,
            protocol: sp.protocol,
            scheduling_method: sp.scheduling_method.clone(),
            persistence_timeout: sp.persistence_timeout(),
        }
    }

    fn destination(ep: &EndpointInfo, sp: &ServicePortInfo) -> Destination {
        Destination {
            ip: ep.ip,
            port: ep.target_port_for(sp),
            weight: sp.weight,
        }
    }

    fn add_virtual_server(&mut self, vs: VirtualServer) {
        match self.lb.add_service(&vs) {
            Ok(()) => debug!("added virtual server {vs}"),
            Err(Error::ObjectExists) => debug!("virtual server {vs} already present"),
            Err(e) => error!(%e, "failed to add virtual server {vs}"),
        }
    }

    fn delete_virtual_server(&mut self, vs: VirtualServer) {
        match self.lb.delete_service(&vs) {
            Ok(()) => debug!("deleted virtual server {vs}"),
            Err(e) => error!(%e, "failed to delete virtual server {vs}"),
        }
    }

    fn add_real_server(&mut self, vs: VirtualServer, dst: &Destination) {
        match self.lb.add_destination(&vs, dst) {
            Ok(()) => debug!("added destination {dst} to {vs}"),
            Err(Error::ObjectExists) => debug!("destination {dst} already on {vs}"),
            Err(e) => error!(%e, "failed to add destination {dst} to {vs}"),
        }
    }

    fn delete_real_server(&mut self, vs: VirtualServer, dst: &Destination) {
        match self.lb.delete_destination(&vs, dst) {
            Ok(()) => debug!("deleted destination {dst} from {vs}"),
            Err(e) => error!(%e, "failed to delete destination {dst} from {vs}"),
        }
    }

    pub fn create_cluster_ip_virtual_servers(&mut self, sp: &ServicePortInfo) {
        for ip in sp.cluster_ips.clone() {
            self.add_virtual_server(Self::virtual_server(sp, ip, sp.port));
        }
    }

    pub fn delete_cluster_ip_virtual_servers(&mut self, sp: &ServicePortInfo) {
        for ip in sp.cluster_ips.clone() {
            self.delete_virtual_server(Self::virtual_server(sp, ip, sp.port));
        }
    }

    pub fn create_external_ip_virtual_servers(&mut self, sp: &ServicePortInfo) {
        for ip in sp.external_ips.clone() {
            self.add_virtual_server(Self::virtual_server(sp, ip, sp.port));
        }
    }

    pub fn delete_external_ip_virtual_servers(&mut self, sp: &ServicePortInfo) {
        for ip in sp.external_ips.clone() {
            self.delete_virtual_server(Self::virtual_server(sp, ip, sp.port));
        }
    }

    /// Virtual servers on every node address, listening on the node port.
    pub fn create_node_port_virtual_servers(&mut self, sp: &ServicePortInfo) {
        for ip in self.node_ips.clone() {
            self.add_virtual_server(Self::virtual_server(sp, ip, sp.node_port));
        }
    }

    pub fn delete_node_port_virtual_servers(&mut self, sp: &ServicePortInfo) {
        for ip in self.node_ips.clone() {
            self.delete_virtual_server(Self::virtual_server(sp, ip, sp.node_port));
        }
    }

    pub fn add_cluster_ip_real_server(&mut self, sp: &ServicePortInfo, ep: &EndpointInfo) {
        let dst = Self::destination(ep, sp);
        for ip in sp.cluster_ips.clone() {
            self.add_real_server(Self::virtual_server(sp, ip, sp.port), &dst);
        }
    }

    pub fn delete_cluster_ip_real_server(&mut self, sp: &ServicePortInfo, ep: &EndpointInfo) {
        let dst = Self::destination(ep, sp);
        for ip in sp.cluster_ips.clone() {
            self.delete_real_server(Self::virtual_server(sp, ip, sp.port), &dst);
        }
    }

    pub fn add_external_ip_real_server(&mut self, sp: &ServicePortInfo, ep: &EndpointInfo) {
        let dst = Self::destination(ep, sp);
        for ip in sp.external_ips.clone() {
            self.add_real_server(Self::virtual_server(sp, ip, sp.port), &dst);
        }
    }

    pub fn delete_external_ip_real_server(&mut self, sp: &ServicePortInfo, ep: &EndpointInfo) {
        let dst = Self::destination(ep, sp);
        for ip in sp.external_ips.clone() {
            self.delete_real_server(Self::virtual_server(sp, ip, sp.port), &dst);
        }
    }

    pub fn add_node_port_real_server(&mut self, sp: &ServicePortInfo, ep: &EndpointInfo) {
        let dst = Self::destination(ep, sp);
        for ip in self.node_ips.clone() {
            self.add_real_server(Self::virtual_server(sp, ip, sp.node_port), &dst);
        }
    }

    pub fn delete_node_port_real_server(&mut self, sp: &ServicePortInfo, ep: &EndpointInfo) {
        let dst = Self::destination(ep, sp);
        for ip in self.node_ips.clone() {
            self.delete_real_server(Self::virtual_server(sp, ip, sp.node_port), &dst);
        }
    }

    /// Validate an entry against the set's declared type before handing it
    /// to the kernel; mismatches are logged and skipped.
    fn validated(&self, set: &str, entry: &SetEntry) -> bool {
        match spec_for(set) {
            Some(spec) if entry.valid_for(spec) => true,
            Some(_) => {
                error!("entry {entry} does not match type of set {set}; skipping");
                false
            }
            None => {
                error!("unknown packet set {set}; skipping entry {entry}");
                false
            }
        }
    }

    pub fn add_set_entry(&mut self, set: &str, entry: &SetEntry) {
        if !self.validated(set, entry) {
            return;
        }
        match self.sets.add_entry(set, entry) {
            Ok(()) => debug!("added entry {entry} to set {set}"),
            Err(Error::ObjectExists) => debug!("entry {entry} already in set {set}"),
            Err(e) => error!(%e, "failed to add entry {entry} to set {set}"),
        }
    }

    pub fn remove_set_entry(&mut self, set: &str, entry: &SetEntry) {
        if !self.validated(set, entry) {
            return;
        }
        match self.sets.del_entry(set, entry) {
            Ok(()) => debug!("removed entry {entry} from set {set}"),
            Err(e) => error!(%e, "failed to remove entry {entry} from set {set}"),
        }
    }

    pub fn add_set_entries(&mut self, set: &str, entries: &[SetEntry]) {
        for entry in entries {
            self.add_set_entry(set, entry);
        }
    }

    pub fn remove_set_entries(&mut self, set: &str, entries: &[SetEntry]) {
        for entry in entries {
            self.remove_set_entry(set, entry);
        }
    }

    /// Service addresses are held on the dummy interface as host routes so
    /// the kernel accepts them locally.
    pub fn add_dummy_addresses(&mut self, ips: &[IpAddr]) {
        for ip in ips {
            match self.link.addr_add(*ip, host_prefix(*ip)) {
                Ok(()) => debug!("added {ip} to dummy interface"),
                Err(Error::ObjectExists) => debug!("{ip} already on dummy interface"),
                Err(e) => error!(%e, "failed to add {ip} to dummy interface"),
            }
        }
    }

    pub fn remove_dummy_addresses(&mut self, ips: &[IpAddr]) {
        for ip in ips {
            match self.link.addr_del(*ip, host_prefix(*ip)) {
                Ok(()) => debug!("removed {ip} from dummy interface"),
                Err(e) => error!(%e, "failed to remove {ip} from dummy interface"),
            }
        }
    }
}

fn host_prefix(ip: IpAddr) -> u8 {
    match ip {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_host_prefix_by_family() {
        assert_eq!(host_prefix("10.0.0.1".parse().unwrap()), 32);
        assert_eq!(host_prefix("fd00::1".parse().unwrap()), 128);
    }
}
