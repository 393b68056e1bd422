//! Shared test doubles: an in-memory kernel implementing the three shim
//! traits over hash maps, recording every call in order. Clones share
//! state, so a test keeps one handle while the proxier owns the boxed
//! copies.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use crate::ipset::{SetEntry, SetSpec};
use crate::proxier::Proxier;
use crate::shim::{AddressCtl, Destination, PacketSetCtl, VirtualServer, VirtualServerCtl};
use crate::{Error, Result};

#[derive(Clone, Default)]
pub(crate) struct FakeKernel {
    calls: Arc<Mutex<Vec<String>>>,
    pub services: Arc<Mutex<HashMap<VirtualServer, HashSet<Destination>>>>,
    pub set_entries: Arc<Mutex<HashMap<String, HashSet<String>>>>,
    pub addresses: Arc<Mutex<HashSet<String>>>,
}

impl FakeKernel {
    pub fn proxier(&self, node_ips: Vec<IpAddr>) -> Proxier {
        Proxier::new(
            Box::new(self.clone()),
            Box::new(self.clone()),
            Box::new(self.clone()),
            node_ips,
        )
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    pub fn destinations_of(&self, vs: &VirtualServer) -> Option<HashSet<Destination>> {
        self.services.lock().unwrap().get(vs).cloned()
    }

    pub fn entries_of(&self, set: &str) -> HashSet<String> {
        self.set_entries
            .lock()
            .unwrap()
            .get(set)
            .cloned()
            .unwrap_or_default()
    }
}

impl VirtualServerCtl for FakeKernel {
    fn add_service(&mut self, vs: &VirtualServer) -> Result<()> {
        self.record(format!("add_service {vs}"));
        let mut services = self.services.lock().unwrap();
        if services.contains_key(vs) {
            return Err(Error::ObjectExists);
        }
        services.insert(vs.clone(), HashSet::new());
        Ok(())
    }

    fn delete_service(&mut self, vs: &VirtualServer) -> Result<()> {
        self.record(format!("delete_service {vs}"));
        match self.services.lock().unwrap().remove(vs) {
            Some(_) => Ok(()),
            None => Err(Error::CommandFailed {
                command: format!("delete_service {vs}"),
                detail: "no such service".into(),
            }),
        }
    }

    fn add_destination(&mut self, vs: &VirtualServer, dst: &Destination) -> Result<()> {
        self.record(format!("add_destination {vs} -> {dst}"));
        let mut services = self.services.lock().unwrap();
        let dsts = services.entry(vs.clone()).or_default();
        if !dsts.insert(dst.clone()) {
            return Err(Error::ObjectExists);
        }
        Ok(())
    }

    fn delete_destination(&mut self, vs: &VirtualServer, dst: &Destination) -> Result<()> {
        self.record(format!("delete_destination {vs} -> {dst}"));
        let mut services = self.services.lock().unwrap();
        match services.get_mut(vs) {
            Some(dsts) => {
                if dsts.remove(dst) {
                    Ok(())
                } else {
                    Err(Error::CommandFailed {
                        command: format!("delete_destination {vs} -> {dst}"),
                        detail: "no such destination".into(),
                    })
                }
            }
            None => Err(Error::CommandFailed {
                command: format!("delete_destination {vs} -> {dst}"),
                detail: "no such destination".into(),
            }),
        }
    }
}

impl PacketSetCtl for FakeKernel {
    fn create_set(&mut self, spec: &SetSpec) -> Result<()> {
        self.record(format!("create_set {}", spec.name));
        self.set_entries
            .lock()
            .unwrap()
            .entry(spec.name.to_owned())
            .or_default();
        Ok(())
    }

    fn add_entry(&mut self, set: &str, entry: &SetEntry) -> Result<()> {
        self.record(format!("add_entry {set} {entry}"));
        let mut sets = self.set_entries.lock().unwrap();
        if !sets.entry(set.to_owned()).or_default().insert(entry.to_string()) {
            return Err(Error::ObjectExists);
        }
        Ok(())
    }

    fn del_entry(&mut self, set: &str, entry: &SetEntry) -> Result<()> {
        self.record(format!("del_entry {set} {entry}"));
        let mut sets = self.set_entries.lock().unwrap();
        match sets.get_mut(set) {
            Some(entries) => {
                if entries.remove(&entry.to_string()) {
                    Ok(())
                } else {
                    Err(Error::CommandFailed {
                        command: format!("del_entry {set} {entry}"),
                        detail: "entry not in set".into(),
                    })
                }
            }
            None => Err(Error::CommandFailed {
                command: format!("del_entry {set} {entry}"),
                detail: "entry not in set".into(),
            }),
        }
    }
}

impl AddressCtl for FakeKernel {
    fn addr_add(&mut self, ip: IpAddr, prefix_len: u8) -> Result<()> {
        self.record(format!("addr_add {ip}/{prefix_len}"));
        if !self.addresses.lock().unwrap().insert(format!("{ip}/{prefix_len}")) {
            return Err(Error::ObjectExists);
        }
        Ok(())
    }

    fn addr_del(&mut self, ip: IpAddr, prefix_len: u8) -> Result<()> {
        self.record(format!("addr_del {ip}/{prefix_len}"));
        if !self.addresses.lock().unwrap().remove(&format!("{ip}/{prefix_len}")) {
            return Err(Error::CommandFailed {
                command: format!("addr_del {ip}/{prefix_len}"),
                detail: "address not present".into(),
            });
        }
        Ok(())
    }
}
