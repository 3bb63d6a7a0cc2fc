//! Interface enumeration, abstracted behind a trait the way the
//! teacher abstracts device/platform I/O: a concrete backend (here,
//! `if-addrs`) is the only thing that actually talks to the OS, so
//! [`crate::reactor::Reactor`] can be driven from tests with a
//! scripted interface list instead.

use std::net::Ipv4Addr;

pub trait Platform {
    /// Every local IPv4 address worth opening a gateway on, including
    /// loopback (useful for same-host testing, as the reference
    /// implementation also allows).
    fn scan_interfaces(&self) -> Vec<Ipv4Addr>;
}

#[derive(Default)]
pub struct HostPlatform;

impl Platform for HostPlatform {
    fn scan_interfaces(&self) -> Vec<Ipv4Addr> {
        let addrs = match if_addrs::get_if_addrs() {
            Ok(addrs) => addrs,
            Err(e) => {
                log::warn!("failed to enumerate network interfaces: {e}");
                return Vec::new();
            }
        };

        addrs
            .into_iter()
            .filter_map(|iface| match iface.addr {
                if_addrs::IfAddr::V4(v4) => Some(v4.ip),
                if_addrs::IfAddr::V6(_) => None,
            })
            .collect()
    }
}

#[derive(Default)]
pub struct ScriptedPlatform {
    pub addrs: Vec<Ipv4Addr>,
}

impl Platform for ScriptedPlatform {
    fn scan_interfaces(&self) -> Vec<Ipv4Addr> {
        self.addrs.clone()
    }
}
