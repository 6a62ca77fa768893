//! Host-label ordering
//!
//! Hostnames sort by their DNS labels read right to left, so all hosts in a
//! TLD group together: `x.us` sorts after `y.de`, and `a.example.com`
//! before `b.example.com`.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::types::SksNode;

/// Canonical hostname to its node record
pub type HostMap = BTreeMap<String, SksNode>;

/// Every known name (aliases and canonical alike) to the canonical name
pub type AliasMap = BTreeMap<String, String>;

/// A hostname with its labels reversed, the host-label sort key
pub fn reversed_labels(name: &str) -> String {
    let mut labels: Vec<&str> = name.split('.').collect();
    labels.reverse();
    labels.join(".")
}

/// Compare two hostnames in host-label order
pub fn host_cmp(a: &str, b: &str) -> Ordering {
    reversed_labels(a).cmp(&reversed_labels(b))
}

/// Sort a list of hostnames in host-label order
pub fn host_sort(names: &mut [String]) {
    names.sort_by_cached_key(|name| reversed_labels(name));
}

/// All hostnames of a host map, host-label sorted
pub fn generate_hostlist_sorted(host_map: &HostMap) -> Vec<String> {
    let mut names: Vec<String> = host_map.keys().cloned().collect();
    host_sort(&mut names);
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_sort_groups_by_tld() {
        let mut names = vec![
            "x.us".to_string(),
            "y.de".to_string(),
            "b.example.com".to_string(),
            "a.example.com".to_string(),
        ];
        host_sort(&mut names);
        assert_eq!(names, vec!["a.example.com", "b.example.com", "y.de", "x.us"]);
    }

    #[test]
    fn test_host_sort_involution() {
        // Reversing labels, sorting lexicographically and reversing back
        // must give the same order as the direct host-label sort.
        let mut direct = vec![
            "sks.example.org".to_string(),
            "pgp.mit.edu".to_string(),
            "keys.example.org".to_string(),
            "a.keyserver.de".to_string(),
            "z.keyserver.de".to_string(),
        ];
        let mut via_reversal: Vec<String> =
            direct.iter().map(|name| reversed_labels(name)).collect();
        via_reversal.sort();
        let via_reversal: Vec<String> = via_reversal
            .iter()
            .map(|name| reversed_labels(name))
            .collect();

        host_sort(&mut direct);
        assert_eq!(direct, via_reversal);
    }

    #[test]
    fn test_generate_hostlist_sorted() {
        let mut map = HostMap::new();
        for name in ["b.example.net", "a.example.com"] {
            map.insert(name.to_string(), SksNode::default());
        }
        assert_eq!(
            generate_hostlist_sorted(&map),
            vec!["a.example.com", "b.example.net"]
        );
    }
}
