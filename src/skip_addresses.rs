//! Disallowed IP ranges
//!
//! Hosts resolving into any of these blocks are treated as bad DNS for the
//! rest of the run. The list covers the special-use registries: RFC 5735 /
//! BCP 153, RFC 5736, RFC 5737 and RFC 5156.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

const DISALLOWED_V4: &[(Ipv4Addr, u32)] = &[
    (Ipv4Addr::new(0, 0, 0, 0), 8),            // "this" network
    (Ipv4Addr::new(10, 0, 0, 0), 8),           // RFC1918
    (Ipv4Addr::new(127, 0, 0, 0), 8),          // loopback
    (Ipv4Addr::new(169, 254, 0, 0), 16),       // link-local
    (Ipv4Addr::new(172, 16, 0, 0), 12),        // RFC1918
    (Ipv4Addr::new(192, 0, 2, 0), 24),         // TEST-NET-1
    (Ipv4Addr::new(192, 88, 99, 0), 24),       // 6to4 anycast relay
    (Ipv4Addr::new(192, 168, 0, 0), 16),       // RFC1918
    (Ipv4Addr::new(198, 18, 0, 0), 15),        // benchmarking
    (Ipv4Addr::new(198, 51, 100, 0), 24),      // TEST-NET-2
    (Ipv4Addr::new(203, 0, 113, 0), 24),       // TEST-NET-3
    (Ipv4Addr::new(224, 0, 0, 0), 4),          // class D multicast
    (Ipv4Addr::new(240, 0, 0, 0), 4),          // class E
    (Ipv4Addr::new(255, 255, 255, 255), 32),   // limited broadcast
    (Ipv4Addr::new(192, 0, 0, 0), 29),         // IANA special purpose
];

const DISALLOWED_V6: &[(Ipv6Addr, u32)] = &[
    (Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 0), 32), // documentation
    (Ipv6Addr::new(0x2001, 0x10, 0, 0, 0, 0, 0, 0), 28),  // ORCHID
    (Ipv6Addr::new(0x2002, 0xc058, 0x6301, 0, 0, 0, 0, 0), 48), // 6to4 anycast relay
    (Ipv6Addr::new(0xfc00, 0, 0, 0, 0, 0, 0, 0), 7),      // unique local unicast
    (Ipv6Addr::new(0xfe00, 0, 0, 0, 0, 0, 0, 0), 8),      // non-global scopes
    (Ipv6Addr::new(0xff00, 0, 0, 0, 0, 0, 0, 0), 8),      // multicast
    (Ipv6Addr::new(0x0100, 0, 0, 0, 0, 0, 0, 0), 64),     // discard prefix, RFC 6666
];

fn v4_in_block(ip: Ipv4Addr, net: Ipv4Addr, prefix: u32) -> bool {
    if prefix == 0 {
        return true;
    }
    (u32::from(ip) ^ u32::from(net)) >> (32 - prefix) == 0
}

fn v6_in_block(ip: Ipv6Addr, net: Ipv6Addr, prefix: u32) -> bool {
    if prefix == 0 {
        return true;
    }
    (u128::from(ip) ^ u128::from(net)) >> (128 - prefix) == 0
}

/// Whether an IP literal falls inside a disallowed block
///
/// Unparseable input is disallowed.
pub fn ip_disallowed(ipstr: &str) -> bool {
    let ip: IpAddr = match ipstr.parse() {
        Ok(ip) => ip,
        Err(_) => return true,
    };
    // IPv4-mapped IPv6 literals are judged as their IPv4 form
    let ip = match ip {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        },
        v4 => v4,
    };
    match ip {
        IpAddr::V4(v4) => DISALLOWED_V4
            .iter()
            .any(|&(net, prefix)| v4_in_block(v4, net, prefix)),
        IpAddr::V6(v6) => DISALLOWED_V6
            .iter()
            .any(|&(net, prefix)| v6_in_block(v6, net, prefix)),
    }
}
