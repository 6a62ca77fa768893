//! IP geolocation via the countries DNS zone
//!
//! An IP's country is published as a TXT record under
//! `<reverse-ip>.<countries-zone>`. IPv4 reverses the dotted quad; IPv6
//! reverses nibble by nibble, low nibble first.

use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;

use trust_dns_resolver::TokioAsyncResolver;

const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

/// A set of ISO country codes, matched case-insensitively
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CountrySet(BTreeSet<String>);

impl CountrySet {
    /// Build from a comma-separated list, e.g. `"us,nl,uk"`
    pub fn new(spec: &str) -> Self {
        let mut set = BTreeSet::new();
        for country in spec.split(',') {
            if !country.is_empty() {
                set.insert(country.to_uppercase());
            }
        }
        Self(set)
    }

    pub fn has_country(&self, country: &str) -> bool {
        self.0.contains(&country.to_uppercase())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Display for CountrySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self.0.iter().cloned().collect::<Vec<_>>().join(",");
        f.write_str(&joined)
    }
}

/// Reverse an IP literal into its DNS label sequence
pub fn reverse_ip(ipstr: &str) -> anyhow::Result<String> {
    let ip: IpAddr = ipstr
        .parse()
        .map_err(|_| anyhow::anyhow!("unrecognized address: {ipstr}"))?;
    let ip = match ip {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        },
        v4 => v4,
    };
    match ip {
        IpAddr::V4(v4) => {
            let [a, b, c, d] = v4.octets();
            Ok(format!("{d}.{c}.{b}.{a}"))
        }
        IpAddr::V6(v6) => {
            let mut out = String::with_capacity(64);
            for octet in v6.octets().iter().rev() {
                out.push(HEX_DIGITS[(octet & 0xF) as usize] as char);
                out.push('.');
                out.push(HEX_DIGITS[(octet >> 4) as usize] as char);
                out.push('.');
            }
            out.pop();
            Ok(out)
        }
    }
}

/// Look up the country code for an IP literal
///
/// Returns the first TXT record's value, uppercased.
pub async fn country_for_ip(
    resolver: &TokioAsyncResolver,
    ipstr: &str,
    zone: &str,
) -> anyhow::Result<String> {
    let reversed = reverse_ip(ipstr)?;
    let query = format!("{reversed}.{zone}");
    let lookup = resolver.txt_lookup(query.clone()).await?;
    match lookup.iter().next() {
        Some(txt) => {
            let joined: String = txt
                .txt_data()
                .iter()
                .map(|part| String::from_utf8_lossy(part).into_owned())
                .collect();
            Ok(joined.to_uppercase())
        }
        None => anyhow::bail!("no TXT records (and no error) for: {query}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_country_sets() {
        let set = CountrySet::new("us,nl,uk");
        for country in ["us", "nl", "uk", "NL", "Us", "uK"] {
            assert!(set.has_country(country), "missing country \"{country}\"");
        }
        for country in ["au", "", " ", "GB"] {
            assert!(
                !set.has_country(country),
                "unexpectedly has country \"{country}\""
            );
        }
        assert_eq!(set.to_string(), "NL,UK,US");
    }

    #[test]
    fn test_reverse_ipv4() {
        assert_eq!(reverse_ip("192.0.2.5").unwrap(), "5.2.0.192");
    }

    #[test]
    fn test_reverse_ipv6() {
        let reversed = reverse_ip("2001:db8::1").unwrap();
        assert!(
            reversed.starts_with("1.0.0.0.0.0.0.0"),
            "bad start: {reversed}"
        );
        assert!(reversed.ends_with("8.b.d.0.1.0.0.2"), "bad end: {reversed}");
        // 32 nibbles, dot separated
        assert_eq!(reversed.len(), 63);
    }

    #[test]
    fn test_reverse_rejects_garbage() {
        assert!(reverse_ip("not-an-ip").is_err());
        assert!(reverse_ip("").is_err());
    }
}
