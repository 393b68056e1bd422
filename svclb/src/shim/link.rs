//! Address management on the dummy interface, via `ip addr`.

use std::net::IpAddr;
use std::process::Command;

use tracing::trace;

use super::AddressCtl;
use crate::{Error, Result};

const IP: &str = "ip";

/// Adds and removes service addresses on one named link. The link itself is
/// created and brought up during startup; if it has gone missing, every
/// call fails and is reported by the caller.
#[derive(Clone, Debug)]
pub struct LinkAddrCtl {
    link: String,
}

impl LinkAddrCtl {
    pub fn new(link: impl Into<String>) -> Self {
        LinkAddrCtl { link: link.into() }
    }

    pub fn link(&self) -> &str {
        &self.link
    }

    fn run(&self, verb: &str, ip: IpAddr, prefix_len: u8) -> Result<()> {
        let addr = format!("{ip}/{prefix_len}");
        trace!("{} addr {} {} dev {}", IP, verb, addr, self.link);
        let output = Command::new(IP)
            .args(["addr", verb, &addr, "dev", &self.link])
            .output()?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("File exists") {
            return Err(Error::ObjectExists);
        }
        if stderr.contains("Cannot find device") {
            return Err(Error::MissingInterface(self.link.clone()));
        }
        Err(Error::CommandFailed {
            command: format!("{IP} addr {verb} {addr} dev {}", self.link),
            detail: stderr.trim().to_owned(),
        })
    }
}

impl AddressCtl for LinkAddrCtl {
    fn addr_add(&mut self, ip: IpAddr, prefix_len: u8) -> Result<()> {
        self.run("add", ip, prefix_len)
    }

    fn addr_del(&mut self, ip: IpAddr, prefix_len: u8) -> Result<()> {
        self.run("del", ip, prefix_len)
    }
}
