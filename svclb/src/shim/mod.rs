//! Kernel-facing capabilities behind traits, so the core can be exercised
//! against fakes and the binding swapped without touching the pipeline.
//!
//! Three capabilities: the L4 load balancer (virtual servers and their
//! destinations), the packet-set command runner, and address management on
//! the dummy interface. The Linux implementations shell out to `ipvsadm`,
//! `ipset` and `ip`; all of them map "object exists" outcomes to
//! [`Error::ObjectExists`](crate::Error::ObjectExists) so add paths can
//! treat collisions as success.

pub mod ipset;
pub mod ipvs;
pub mod link;

use std::net::IpAddr;

use crate::ipset::{SetEntry, SetSpec};
use crate::snapshot::Protocol;
use crate::Result;

/// L4 load-balancer front-end: `(vip, port, protocol)` plus scheduling
/// parameters.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct VirtualServer {
    pub ip: IpAddr,
    pub port: u16,
    pub protocol: Protocol,
    pub scheduling_method: String,
    /// Client-IP persistence timeout in seconds, when session affinity is
    /// requested.
    pub persistence_timeout: Option<u32>,
}

impl std::fmt::Display for VirtualServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", addr_port(self.ip, self.port), self.protocol)
    }
}

/// Backend attached to a virtual server.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Destination {
    pub ip: IpAddr,
    pub port: u16,
    pub weight: i32,
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&addr_port(self.ip, self.port))
    }
}

/// `ip:port` with v6 addresses bracketed.
pub fn addr_port(ip: IpAddr, port: u16) -> String {
    match ip {
        IpAddr::V4(v4) => format!("{v4}:{port}"),
        IpAddr::V6(v6) => format!("[{v6}]:{port}"),
    }
}

pub trait VirtualServerCtl {
    fn add_service(&mut self, vs: &VirtualServer) -> Result<()>;
    fn delete_service(&mut self, vs: &VirtualServer) -> Result<()>;
    fn add_destination(&mut self, vs: &VirtualServer, dst: &Destination) -> Result<()>;
    fn delete_destination(&mut self, vs: &VirtualServer, dst: &Destination) -> Result<()>;
}

pub trait PacketSetCtl {
    fn create_set(&mut self, spec: &SetSpec) -> Result<()>;
    fn add_entry(&mut self, set: &str, entry: &SetEntry) -> Result<()>;
    fn del_entry(&mut self, set: &str, entry: &SetEntry) -> Result<()>;
}

pub trait AddressCtl {
    fn addr_add(&mut self, ip: IpAddr, prefix_len: u8) -> Result<()>;
    fn addr_del(&mut self, ip: IpAddr, prefix_len: u8) -> Result<()>;
}

/// Backends that accept every call without touching the kernel; used for
/// dry runs and stress soaks on machines that must stay untouched.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopBackend;

impl VirtualServerCtl for NoopBackend {
    fn add_service(&mut self, _vs: &VirtualServer) -> Result<()> {
        Ok(())
    }
    fn delete_service(&mut self, _vs: &VirtualServer) -> Result<()> {
        Ok(())
    }
    fn add_destination(&mut self, _vs: &VirtualServer, _dst: &Destination) -> Result<()> {
        Ok(())
    }
    fn delete_destination(&mut self, _vs: &VirtualServer, _dst: &Destination) -> Result<()> {
        Ok(())
    }
}

impl PacketSetCtl for NoopBackend {
    fn create_set(&mut self, _spec: &SetSpec) -> Result<()> {
        Ok(())
    }
    fn add_entry(&mut self, _set: &str, _entry: &SetEntry) -> Result<()> {
        Ok(())
    }
    fn del_entry(&mut self, _set: &str, _entry: &SetEntry) -> Result<()> {
        Ok(())
    }
}

impl AddressCtl for NoopBackend {
    fn addr_add(&mut self, _ip: IpAddr, _prefix_len: u8) -> Result<()> {
        Ok(())
    }
    fn addr_del(&mut self, _ip: IpAddr, _prefix_len: u8) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_addr_port_brackets_v6() {
        assert_eq!(addr_port("10.0.0.1".parse().unwrap(), 80), "10.0.0.1:80");
        assert_eq!(addr_port("fd00::1".parse().unwrap(), 80), "[fd00::1]:80");
    }

    #[test]
    fn test_virtual_server_display() {
        let vs = VirtualServer {
            ip: "10.0.0.1".parse().unwrap(),
            port: 80,
            protocol: Protocol::Tcp,
            scheduling_method: "rr".into(),
            persistence_timeout: None,
        };
        assert_eq!(vs.to_string(), "10.0.0.1:80/TCP");
    }
}
