//! Packet-set backend driving the `ipset` command.

use std::process::Command;

use tracing::trace;

use super::PacketSetCtl;
use crate::ipset::{SetEntry, SetSpec, SetType};
use crate::{Error, Result};

const IPSET: &str = "ipset";

/// Ports covered by the bitmap node-port sets.
const BITMAP_PORT_RANGE: &str = "0-65535";

#[derive(Clone, Copy, Debug, Default)]
pub struct IpsetCmd;

impl IpsetCmd {
    fn run(&self, args: &[String]) -> Result<()> {
        trace!("{} {}", IPSET, args.join(" "));
        let output = Command::new(IPSET).args(args).output()?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("already added") || stderr.contains("set with the same name already exists")
        {
            return Err(Error::ObjectExists);
        }
        Err(Error::CommandFailed {
            command: format!("{} {}", IPSET, args.join(" ")),
            detail: stderr.trim().to_owned(),
        })
    }
}

impl PacketSetCtl for IpsetCmd {
    fn create_set(&mut self, spec: &SetSpec) -> Result<()> {
        let mut args = vec![
            "create".to_owned(),
            spec.name.to_owned(),
            spec.set_type.as_str().to_owned(),
        ];
        match spec.set_type {
            SetType::BitmapPort => {
                args.push("range".into());
                args.push(BITMAP_PORT_RANGE.into());
            }
            _ => {
                args.push("family".into());
                args.push("inet".into());
            }
        }
        args.push("comment".into());
        // -exist makes re-creation of an identical set a no-op
        args.push("-exist".into());
        self.run(&args)
    }

    fn add_entry(&mut self, set: &str, entry: &SetEntry) -> Result<()> {
        self.run(&["add".to_owned(), set.to_owned(), entry.to_string()])
    }

    fn del_entry(&mut self, set: &str, entry: &SetEntry) -> Result<()> {
        self.run(&["del".to_owned(), set.to_owned(), entry.to_string()])
    }
}
