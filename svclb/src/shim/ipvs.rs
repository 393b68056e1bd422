//! Virtual-server backend driving `ipvsadm`.

use std::process::Command;

use tracing::trace;

use super::{addr_port, Destination, VirtualServer, VirtualServerCtl};
use crate::snapshot::Protocol;
use crate::{Error, Result};

const IPVSADM: &str = "ipvsadm";

/// Protocol selector understood by every ipvsadm service verb.
fn service_flag(protocol: Protocol) -> &'static str {
    match protocol {
        Protocol::Tcp => "-t",
        Protocol::Udp => "-u",
        Protocol::Sctp => "--sctp-service",
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct IpvsAdm;

impl IpvsAdm {
    fn run(&self, args: &[String]) -> Result<()> {
        trace!("{} {}", IPVSADM, args.join(" "));
        let output = Command::new(IPVSADM).args(args).output()?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("already exists") || stderr.contains("File exists") {
            return Err(Error::ObjectExists);
        }
        Err(Error::CommandFailed {
            command: format!("{} {}", IPVSADM, args.join(" ")),
            detail: stderr.trim().to_owned(),
        })
    }

    fn service_args(verb: &str, vs: &VirtualServer) -> Vec<String> {
        vec![
            verb.to_owned(),
            service_flag(vs.protocol).to_owned(),
            addr_port(vs.ip, vs.port),
        ]
    }
}

impl VirtualServerCtl for IpvsAdm {
    fn add_service(&mut self, vs: &VirtualServer) -> Result<()> {
        let mut args = Self::service_args("-A", vs);
        args.push("-s".into());
        args.push(vs.scheduling_method.clone());
        if let Some(timeout) = vs.persistence_timeout {
            args.push("-p".into());
            args.push(timeout.to_string());
        }
        self.run(&args)
    }

    fn delete_service(&mut self, vs: &VirtualServer) -> Result<()> {
        self.run(&Self::service_args("-D", vs))
    }

    fn add_destination(&mut self, vs: &VirtualServer, dst: &Destination) -> Result<()> {
        let mut args = Self::service_args("-a", vs);
        args.push("-r".into());
        args.push(addr_port(dst.ip, dst.port));
        // masquerade forwarding; the packet sets and NAT rules assume it
        args.push("-m".into());
        args.push("-w".into());
        args.push(dst.weight.to_string());
        self.run(&args)
    }

    fn delete_destination(&mut self, vs: &VirtualServer, dst: &Destination) -> Result<()> {
        let mut args = Self::service_args("-d", vs);
        args.push("-r".into());
        args.push(addr_port(dst.ip, dst.port));
        self.run(&args)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_service_args_by_protocol() {
        let vs = VirtualServer {
            ip: "10.0.0.2".parse().unwrap(),
            port: 443,
            protocol: Protocol::Sctp,
            scheduling_method: "rr".into(),
            persistence_timeout: None,
        };
        assert_eq!(
            IpvsAdm::service_args("-A", &vs),
            vec!["-A", "--sctp-service", "10.0.0.2:443"]
        );
    }
}
