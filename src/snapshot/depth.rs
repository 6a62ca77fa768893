//! Depth assignment and depth-ordered listing
//!
//! Depth is the shortest-path hop count from the seed across the
//! successful-fetch graph. Hosts that were named but never reached keep
//! distance -1 and are displayed after the deepest known depth.

use std::collections::{BTreeMap, HashMap, VecDeque};

use super::hostmap::{host_sort, AliasMap, HostMap};

/// Resolve a peer-as-given through the alias map, falling back to the
/// lowercased name
fn resolve(aliases: &AliasMap, name: &str) -> String {
    let lowered = name.to_lowercase();
    aliases.get(&lowered).cloned().unwrap_or(lowered)
}

/// Assign BFS distances from the seed to every reachable node
///
/// All nodes are reset to -1 first, so reloaded snapshots get consistent
/// depths for the current seed.
pub fn assign_depths(host_map: &mut HostMap, aliases: &AliasMap, seed: &str) {
    for node in host_map.values_mut() {
        node.distance = -1;
    }

    let seed_canonical = resolve(aliases, seed);
    if !host_map.contains_key(&seed_canonical) {
        return;
    }

    let mut distances: HashMap<String, i32> = HashMap::with_capacity(host_map.len());
    let mut queue = VecDeque::new();
    distances.insert(seed_canonical.clone(), 0);
    queue.push_back(seed_canonical);

    while let Some(name) = queue.pop_front() {
        let here = distances[&name];
        let peers = match host_map.get(&name) {
            Some(node) => node.gossip_peer_list.clone(),
            None => continue,
        };
        for peer in peers {
            let peer_canonical = resolve(aliases, &peer);
            if !host_map.contains_key(&peer_canonical) {
                continue;
            }
            if !distances.contains_key(&peer_canonical) {
                distances.insert(peer_canonical.clone(), here + 1);
                queue.push_back(peer_canonical);
            }
        }
    }

    for (name, distance) in distances {
        if let Some(node) = host_map.get_mut(&name) {
            node.distance = distance;
        }
    }
}

/// All hostnames ordered by distance, host-label order within a depth
///
/// The unknown-distance bucket (-1) is relocated past the deepest known
/// depth.
pub fn generate_depth_sorted(host_map: &HostMap) -> Vec<String> {
    let mut by_depth: BTreeMap<i32, Vec<String>> = BTreeMap::new();
    for (name, node) in host_map {
        by_depth
            .entry(node.distance)
            .or_default()
            .push(name.clone());
    }

    if let Some(unknown) = by_depth.remove(&-1) {
        let max = by_depth.keys().next_back().copied().unwrap_or(0);
        by_depth.entry(max + 1).or_default().extend(unknown);
    }

    let mut ordered = Vec::with_capacity(host_map.len());
    for (_, mut subrange) in by_depth {
        host_sort(&mut subrange);
        ordered.extend(subrange);
    }
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SksNode;

    fn node_at(distance: i32) -> SksNode {
        SksNode {
            distance,
            ..SksNode::default()
        }
    }

    fn canned_map() -> HostMap {
        let mut map = HostMap::new();
        map.insert("seed.example.org".to_string(), node_at(0));
        map.insert("one-b.example.net".to_string(), node_at(1));
        map.insert("one-a.example.com".to_string(), node_at(1));
        map.insert("two-b.example.org".to_string(), node_at(2));
        map.insert("two-a.example.de".to_string(), node_at(2));
        map
    }

    #[test]
    fn test_depth_sort_stability() {
        let ordered = generate_depth_sorted(&canned_map());
        assert_eq!(
            ordered,
            vec![
                "seed.example.org",
                "one-a.example.com",
                "one-b.example.net",
                "two-a.example.de",
                "two-b.example.org",
            ]
        );

        // Distances never decrease along the listing
        let map = canned_map();
        let mut last = i32::MIN;
        for name in &ordered {
            let d = map[name].distance;
            assert!(d >= last, "depth went backwards at {name}");
            last = d;
        }
    }

    #[test]
    fn test_unknown_depth_sorts_last() {
        let mut map = canned_map();
        map.insert("lost.example.org".to_string(), node_at(-1));
        let ordered = generate_depth_sorted(&map);
        assert_eq!(ordered.last().map(String::as_str), Some("lost.example.org"));
    }

    #[test]
    fn test_assign_depths_bfs() {
        let mut map = HostMap::new();
        let mut seed = SksNode::new("seed.example.org", 11371);
        seed.gossip_peer_list = vec!["mid.example.org".to_string()];
        let mut mid = SksNode::new("mid.example.org", 11371);
        mid.gossip_peer_list = vec![
            "far.example.org".to_string(),
            "seed.example.org".to_string(),
            "gone.example.org".to_string(),
        ];
        let far = SksNode::new("far.example.org", 11371);
        let orphan = SksNode::new("orphan.example.org", 11371);
        map.insert("seed.example.org".to_string(), seed);
        map.insert("mid.example.org".to_string(), mid);
        map.insert("far.example.org".to_string(), far);
        map.insert("orphan.example.org".to_string(), orphan);

        let mut aliases = AliasMap::new();
        for name in map.keys() {
            aliases.insert(name.clone(), name.clone());
        }

        assign_depths(&mut map, &aliases, "seed.example.org");
        assert_eq!(map["seed.example.org"].distance, 0);
        assert_eq!(map["mid.example.org"].distance, 1);
        assert_eq!(map["far.example.org"].distance, 2);
        assert_eq!(map["orphan.example.org"].distance, -1);
    }

    #[test]
    fn test_depth_zero_at_most_once() {
        let mut map = canned_map();
        let mut aliases = AliasMap::new();
        for name in map.keys() {
            aliases.insert(name.clone(), name.clone());
        }
        assign_depths(&mut map, &aliases, "seed.example.org");
        let zero_count = map.values().filter(|n| n.distance == 0).count();
        assert_eq!(zero_count, 1);
    }
}
