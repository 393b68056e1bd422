//! One-time kernel scaffolding, run at agent startup before the first
//! callback: required sysctls, the dummy interface that holds service
//! addresses, and the iptables rules that jump set-matched traffic into the
//! virtual-server path.

use std::net::IpAddr;
use std::path::PathBuf;
use std::process::Command;
use std::{fs, str};

use tracing::{info, warn};

use crate::ipset::{
    CLUSTER_IP_SET, LOOPBACK_SET, NODE_PORT_SET_SCTP, NODE_PORT_SET_TCP, NODE_PORT_SET_UDP,
};
use crate::{Error, Result};

pub const DEFAULT_DUMMY_INTERFACE: &str = "svclb0";

const SYSCTL_ROOT: &str = "/proc/sys";
const SYSCTL_BRIDGE_CALL_IPTABLES: &str = "net/bridge/bridge-nf-call-iptables";
const SYSCTL_VS_CONNTRACK: &str = "net/ipv4/vs/conntrack";
const SYSCTL_CONN_REUSE: &str = "net/ipv4/vs/conn_reuse_mode";
const SYSCTL_EXPIRE_NODEST_CONN: &str = "net/ipv4/vs/expire_nodest_conn";
const SYSCTL_EXPIRE_QUIESCENT_TEMPLATE: &str = "net/ipv4/vs/expire_quiescent_template";
const SYSCTL_IP_FORWARD: &str = "net/ipv4/ip_forward";

/// conn_reuse_mode=0 is only needed below this kernel; newer kernels carry
/// the scheduling fix and keep their default.
const CONN_REUSE_FIXED_KERNEL: (u32, u32) = (5, 9);

const NAT_CHAIN: &str = "SVCLB-SERVICES";

/// Sysctls plus dummy interface. A dummy interface that cannot be brought
/// into existence is fatal to the caller.
pub fn initialize(link: &str) -> Result<()> {
    ensure_sysctls()?;
    ensure_dummy_link(link)?;
    Ok(())
}

pub fn ensure_sysctls() -> Result<()> {
    if read_sysctl(SYSCTL_BRIDGE_CALL_IPTABLES).map_or(true, |v| v != 1) {
        info!("br-netfilter module missing or bridge-nf-call-iptables unset; bridged backends may bypass the proxy");
    }

    ensure_sysctl(SYSCTL_VS_CONNTRACK, 1)?;
    match kernel_release() {
        Ok(release) if release < CONN_REUSE_FIXED_KERNEL => {
            ensure_sysctl(SYSCTL_CONN_REUSE, 0)?;
        }
        Ok(_) => {}
        Err(e) => warn!(%e, "could not determine kernel release; leaving conn_reuse_mode as-is"),
    }
    ensure_sysctl(SYSCTL_EXPIRE_NODEST_CONN, 1)?;
    ensure_sysctl(SYSCTL_EXPIRE_QUIESCENT_TEMPLATE, 1)?;
    ensure_sysctl(SYSCTL_IP_FORWARD, 1)?;
    Ok(())
}

fn sysctl_path(name: &str) -> PathBuf {
    PathBuf::from(SYSCTL_ROOT).join(name)
}

fn read_sysctl(name: &str) -> Result<i64> {
    let raw = fs::read_to_string(sysctl_path(name))?;
    raw.trim().parse().map_err(|_| Error::Parse {
        what: "sysctl value",
        detail: format!("{name}: {raw:?}"),
    })
}

fn ensure_sysctl(name: &str, value: i64) -> Result<()> {
    if read_sysctl(name)? == value {
        return Ok(());
    }
    info!("setting sysctl {name}={value}");
    fs::write(sysctl_path(name), value.to_string())?;
    Ok(())
}

fn kernel_release() -> Result<(u32, u32)> {
    let raw = fs::read_to_string(sysctl_path("kernel/osrelease"))?;
    parse_kernel_release(raw.trim())
}

fn parse_kernel_release(raw: &str) -> Result<(u32, u32)> {
    let mut parts = raw.split(['.', '-']);
    let parse = |part: Option<&str>| {
        part.and_then(|p| p.parse().ok()).ok_or_else(|| Error::Parse {
            what: "kernel release",
            detail: raw.to_owned(),
        })
    };
    Ok((parse(parts.next())?, parse(parts.next())?))
}

/// Make sure the dummy interface exists and is up. Service addresses are
/// assigned to it so the kernel accepts them locally.
pub fn ensure_dummy_link(name: &str) -> Result<()> {
    if !link_exists(name)? {
        info!("creating dummy interface {name}");
        run_ip(&["link", "add", "name", name, "type", "dummy"])?;
    }
    run_ip(&["link", "set", name, "up"])?;
    if !link_exists(name)? {
        return Err(Error::MissingInterface(name.to_owned()));
    }
    Ok(())
}

fn link_exists(name: &str) -> Result<bool> {
    let output = Command::new("ip").args(["link", "show", "dev", name]).output()?;
    Ok(output.status.success())
}

fn run_ip(args: &[&str]) -> Result<()> {
    let output = Command::new("ip").args(args).output()?;
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    if stderr.contains("File exists") {
        return Ok(());
    }
    Err(Error::CommandFailed {
        command: format!("ip {}", args.join(" ")),
        detail: stderr.trim().to_owned(),
    })
}

/// Install the NAT rules that steer set-matched traffic into the
/// virtual-server path. Membership of the sets is the reconciler's job;
/// these rules only reference them.
pub fn install_nat_rules() -> Result<()> {
    ensure_chain("nat", NAT_CHAIN)?;
    ensure_rule("nat", "PREROUTING", &["-j", NAT_CHAIN])?;
    ensure_rule("nat", "OUTPUT", &["-j", NAT_CHAIN])?;

    ensure_rule(
        "nat",
        NAT_CHAIN,
        &[
            "-m", "set", "--match-set", CLUSTER_IP_SET, "dst,dst", "-j", "MASQUERADE",
        ],
    )?;
    ensure_rule(
        "nat",
        NAT_CHAIN,
        &[
            "-p", "tcp", "-m", "set", "--match-set", NODE_PORT_SET_TCP, "dst", "-j", "MASQUERADE",
        ],
    )?;
    ensure_rule(
        "nat",
        NAT_CHAIN,
        &[
            "-p", "udp", "-m", "set", "--match-set", NODE_PORT_SET_UDP, "dst", "-j", "MASQUERADE",
        ],
    )?;
    ensure_rule(
        "nat",
        NAT_CHAIN,
        &[
            "-p", "sctp", "-m", "set", "--match-set", NODE_PORT_SET_SCTP, "dst,dst", "-j",
            "MASQUERADE",
        ],
    )?;
    // hairpin: node-local backends reaching themselves through a service IP
    ensure_rule(
        "nat",
        "POSTROUTING",
        &[
            "-m", "set", "--match-set", LOOPBACK_SET, "dst,dst,src", "-j", "MASQUERADE",
        ],
    )?;
    Ok(())
}

fn ensure_chain(table: &str, chain: &str) -> Result<()> {
    let output = Command::new("iptables").args(["-t", table, "-N", chain]).output()?;
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    if stderr.contains("Chain already exists") {
        return Ok(());
    }
    Err(Error::CommandFailed {
        command: format!("iptables -t {table} -N {chain}"),
        detail: stderr.trim().to_owned(),
    })
}

fn ensure_rule(table: &str, chain: &str, spec: &[&str]) -> Result<()> {
    let check = Command::new("iptables")
        .args(["-t", table, "-C", chain])
        .args(spec)
        .output()?;
    if check.status.success() {
        return Ok(());
    }
    let append = Command::new("iptables")
        .args(["-t", table, "-A", chain])
        .args(spec)
        .output()?;
    if append.status.success() {
        return Ok(());
    }
    Err(Error::CommandFailed {
        command: format!("iptables -t {table} -A {chain} {}", spec.join(" ")),
        detail: String::from_utf8_lossy(&append.stderr).trim().to_owned(),
    })
}

/// Global v4 addresses of this node, excluding the dummy interface; these
/// become the node-port virtual-server fronts.
pub fn detect_node_ips(exclude_link: &str) -> Result<Vec<IpAddr>> {
    let output = Command::new("ip")
        .args(["-4", "-o", "addr", "show", "scope", "global"])
        .output()?;
    if !output.status.success() {
        return Err(Error::CommandFailed {
            command: "ip -4 -o addr show scope global".into(),
            detail: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        });
    }
    Ok(parse_addr_show(
        str::from_utf8(&output.stdout).unwrap_or_default(),
        exclude_link,
    ))
}

fn parse_addr_show(output: &str, exclude_link: &str) -> Vec<IpAddr> {
    let mut ips = Vec::new();
    for line in output.lines() {
        let mut fields = line.split_whitespace();
        let link = fields.nth(1);
        if link == Some(exclude_link) {
            continue;
        }
        let Some(addr) = fields.skip_while(|f| *f != "inet").nth(1) else {
            continue;
        };
        let Some((ip, _prefix)) = addr.split_once('/') else {
            continue;
        };
        match ip.parse() {
            Ok(ip) => ips.push(ip),
            Err(e) => warn!(%e, "skipping unparseable node address {addr}"),
        }
    }
    ips
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_kernel_release() {
        assert_eq!(parse_kernel_release("5.15.0-91-generic").unwrap(), (5, 15));
        assert_eq!(parse_kernel_release("4.19.0").unwrap(), (4, 19));
        assert_eq!(parse_kernel_release("6.1-rc3").unwrap(), (6, 1));
        assert!(parse_kernel_release("garbage").is_err());
    }

    #[test]
    fn test_conn_reuse_gate() {
        assert!((4, 19) < CONN_REUSE_FIXED_KERNEL);
        assert!((5, 8) < CONN_REUSE_FIXED_KERNEL);
        assert!((5, 9) >= CONN_REUSE_FIXED_KERNEL);
        assert!((6, 1) >= CONN_REUSE_FIXED_KERNEL);
    }

    #[test]
    fn test_parse_addr_show() {
        let output = "\
2: eth0    inet 192.168.1.10/24 brd 192.168.1.255 scope global eth0\\       valid_lft forever preferred_lft forever
3: eth1    inet 10.20.0.4/16 brd 10.20.255.255 scope global eth1\\       valid_lft forever preferred_lft forever
4: svclb0    inet 10.96.0.1/32 scope global svclb0\\       valid_lft forever preferred_lft forever
";
        let ips = parse_addr_show(output, "svclb0");
        assert_eq!(
            ips,
            vec![
                "192.168.1.10".parse::<IpAddr>().unwrap(),
                "10.20.0.4".parse::<IpAddr>().unwrap()
            ]
        );
    }
}
