//! Local network interfaces and their addresses

use super::socket::local_ip_for;
use pnet::datalink;
use pnet::util::MacAddr;
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};

/// Documentation address used only to ask the kernel for its default route
const ROUTE_LOOKUP_TARGET: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 1);

/// One address bound to an interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InterfaceAddress {
    pub address: IpAddr,
    pub prefix: u8,
}

impl InterfaceAddress {
    pub fn family(&self) -> &'static str {
        match self.address {
            IpAddr::V4(_) => "IPv4",
            IpAddr::V6(_) => "IPv6",
        }
    }

    /// fe80::/10
    pub fn is_link_local(&self) -> bool {
        match self.address {
            IpAddr::V4(v4) => v4.is_link_local(),
            IpAddr::V6(v6) => (v6.segments()[0] & 0xffc0) == 0xfe80,
        }
    }
}

impl std::fmt::Display for InterfaceAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkInterface {
    pub name: String,
    /// `None` for interfaces without a hardware address, such as loopback
    pub mac: Option<String>,
    pub is_up: bool,
    pub is_loopback: bool,
    pub addresses: Vec<InterfaceAddress>,
}

impl NetworkInterface {
    pub fn new(
        name: impl Into<String>,
        mac: Option<MacAddr>,
        is_up: bool,
        is_loopback: bool,
        addresses: Vec<InterfaceAddress>,
    ) -> Self {
        Self {
            name: name.into(),
            mac: mac.filter(|mac| *mac != MacAddr::zero()).map(|mac| mac.to_string()),
            is_up,
            is_loopback,
            addresses,
        }
    }

    pub fn status(&self) -> &'static str {
        if self.is_up {
            "up"
        } else {
            "down"
        }
    }
}

impl From<&datalink::NetworkInterface> for NetworkInterface {
    fn from(iface: &datalink::NetworkInterface) -> Self {
        let addresses = iface
            .ips
            .iter()
            .map(|net| InterfaceAddress {
                address: net.ip(),
                prefix: net.prefix(),
            })
            .collect();
        Self::new(iface.name.clone(), iface.mac, iface.is_up(), iface.is_loopback(), addresses)
    }
}

/// Interfaces known to the OS, sorted by name
pub fn list_interfaces(include_loopback: bool) -> Vec<NetworkInterface> {
    let mut interfaces: Vec<NetworkInterface> = datalink::interfaces()
        .iter()
        .map(NetworkInterface::from)
        .filter(|iface| include_loopback || !iface.is_loopback)
        .collect();
    interfaces.sort_by(|a, b| a.name.cmp(&b.name));
    log::debug!("Found {} network interfaces", interfaces.len());
    interfaces
}

/// Routable addresses grouped by interface name.
///
/// IPv6 link-local addresses are left out and so are interfaces with
/// nothing left to show.
pub fn address_table(interfaces: &[NetworkInterface]) -> BTreeMap<String, Vec<InterfaceAddress>> {
    interfaces
        .iter()
        .filter_map(|iface| {
            let addresses: Vec<InterfaceAddress> = iface
                .addresses
                .iter()
                .filter(|addr| !(addr.address.is_ipv6() && addr.is_link_local()))
                .copied()
                .collect();
            (!addresses.is_empty()).then(|| (iface.name.clone(), addresses))
        })
        .collect()
}

/// Source address of the default IPv4 route, if there is one
pub fn primary_ipv4() -> Option<Ipv4Addr> {
    match local_ip_for(ROUTE_LOOKUP_TARGET) {
        Ok(ip) => Some(ip),
        Err(e) => {
            log::debug!("No default IPv4 route: {}", e);
            None
        }
    }
}

/// Everything the address listing reports
#[derive(Debug, Clone, Serialize)]
pub struct AddressReport {
    pub primary: Option<Ipv4Addr>,
    pub interfaces: BTreeMap<String, Vec<InterfaceAddress>>,
}

impl AddressReport {
    pub fn collect() -> Self {
        Self {
            primary: primary_ipv4(),
            interfaces: address_table(&list_interfaces(false)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv6Addr;

    fn addr(address: &str, prefix: u8) -> InterfaceAddress {
        InterfaceAddress {
            address: address.parse().unwrap(),
            prefix,
        }
    }

    #[test]
    fn test_zero_mac_is_dropped() {
        let lo = NetworkInterface::new("lo", Some(MacAddr::zero()), true, true, vec![addr("127.0.0.1", 8)]);
        assert_eq!(lo.mac, None);
        assert_eq!(lo.status(), "up");

        let eth = NetworkInterface::new("eth0", Some(MacAddr::new(0x02, 0, 0, 0xaa, 0xbb, 0x0c)), false, false, vec![]);
        assert_eq!(eth.mac.as_deref(), Some("02:00:00:aa:bb:0c"));
        assert_eq!(eth.status(), "down");
    }

    #[test]
    fn test_address_table_skips_ipv6_link_local_and_empty() {
        let interfaces = vec![
            NetworkInterface::new(
                "eth0",
                None,
                true,
                false,
                vec![addr("192.168.1.20", 24), addr("fe80::1", 64), addr("2001:db8::20", 64)],
            ),
            NetworkInterface::new("wg0", None, true, false, vec![addr("fe80::2", 64)]),
        ];

        let table = address_table(&interfaces);
        assert_eq!(table.len(), 1);
        assert_eq!(table["eth0"], vec![addr("192.168.1.20", 24), addr("2001:db8::20", 64)]);
    }

    #[test]
    fn test_address_family_and_display() {
        let v6 = InterfaceAddress {
            address: IpAddr::V6(Ipv6Addr::LOCALHOST),
            prefix: 128,
        };
        assert_eq!(v6.family(), "IPv6");
        assert!(!v6.is_link_local());
        assert_eq!(v6.to_string(), "::1/128");
        assert!(addr("fe80::abcd", 64).is_link_local());
        assert_eq!(addr("10.1.2.3", 8).family(), "IPv4");
    }

    #[test]
    fn test_loopback_interface_is_listed_on_request() {
        let all = list_interfaces(true);
        let loopback: Vec<_> = all.iter().filter(|iface| iface.is_loopback).collect();
        if loopback.is_empty() {
            return;
        }
        assert!(loopback
            .iter()
            .flat_map(|iface| iface.addresses.iter())
            .any(|a| a.address.is_loopback()));

        assert!(list_interfaces(false).iter().all(|iface| !iface.is_loopback));
        assert!(all.windows(2).all(|w| w[0].name <= w[1].name));
    }
}
