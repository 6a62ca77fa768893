//! Directed gossip-peer graph
//!
//! Two adjacency maps over canonical hostnames. Inbound entries can exist
//! with no matching outbound entry when a named peer was never reached; a
//! fixup pass gives those an empty outbound set so queries never miss.
//!
//! The mesh is cyclic, so edges are plain name keys rather than owned
//! links. All alias-map writes happen inside the builder to keep that
//! side effect in one place.

use std::collections::{BTreeMap, BTreeSet};

use tracing::warn;

use super::hostmap::{host_sort, AliasMap, HostMap};

type Adjacency = BTreeMap<String, BTreeSet<String>>;

/// The mesh as inbound and outbound adjacency over canonical hostnames
#[derive(Debug, Clone, Default)]
pub struct HostGraph {
    aliases: AliasMap,
    outbound: Adjacency,
    inbound: Adjacency,
}

impl HostGraph {
    fn add_host(&mut self, name: &str, peer_list: &[String]) {
        self.outbound.entry(name.to_string()).or_default();
        self.inbound.entry(name.to_string()).or_default();
        for peer_as_given in peer_list {
            let lowered = peer_as_given.to_lowercase();
            let peer_canonical = match self.aliases.get(&lowered) {
                Some(canon) => canon.clone(),
                None => {
                    // Peer is down and has no node, but the link still counts;
                    // register the lowered name so later queries resolve it
                    self.aliases.insert(lowered.clone(), lowered.clone());
                    if peer_as_given != &lowered {
                        self.aliases.insert(peer_as_given.clone(), lowered.clone());
                    }
                    lowered
                }
            };
            self.outbound
                .entry(name.to_string())
                .or_default()
                .insert(peer_canonical.clone());
            self.inbound
                .entry(peer_canonical)
                .or_default()
                .insert(name.to_string());
        }
    }

    fn fix_outbounds(&mut self) {
        let referenced: Vec<String> = self
            .inbound
            .values()
            .flat_map(|set| set.iter().cloned())
            .collect();
        for name in referenced {
            self.outbound.entry(name).or_default();
        }
    }

    /// Outbound peers of a host, sorted
    pub fn outbound(&self, name: &str) -> impl Iterator<Item = &str> {
        self.outbound
            .get(&name.to_lowercase())
            .into_iter()
            .flatten()
            .map(String::as_str)
    }

    /// Inbound peers of a host, sorted
    pub fn inbound(&self, name: &str) -> impl Iterator<Item = &str> {
        self.inbound
            .get(&name.to_lowercase())
            .into_iter()
            .flatten()
            .map(String::as_str)
    }

    /// Whether a gossip link `from` → `to` exists
    pub fn exists_link(&self, from: &str, to: &str) -> bool {
        let real_from = self.aliases.get(&from.to_lowercase());
        let real_to = self.aliases.get(&to.to_lowercase());
        let (real_from, real_to) = match (real_from, real_to) {
            (Some(f), Some(t)) => (f, t),
            (f, t) => {
                warn!(
                    "bad link query, internal bug: {} {} -> {} {}",
                    from,
                    f.is_some(),
                    to,
                    t.is_some()
                );
                return false;
            }
        };
        self.inbound
            .get(real_to)
            .map(|set| set.contains(real_from))
            .unwrap_or(false)
    }

    /// Union of outbound and inbound peers, host-label sorted
    pub fn all_peers_of(&self, name: &str) -> Vec<String> {
        let canon = match self.aliases.get(&name.to_lowercase()) {
            Some(canon) => canon,
            None => return Vec::new(),
        };
        let mut all: BTreeSet<String> = BTreeSet::new();
        match self.outbound.get(canon) {
            Some(set) => all.extend(set.iter().cloned()),
            None => warn!("missing hostgraph outbound for {canon:?}"),
        }
        match self.inbound.get(canon) {
            Some(set) => all.extend(set.iter().cloned()),
            None => warn!("missing hostgraph inbound for {canon:?}"),
        }
        let mut sorted: Vec<String> = all.into_iter().collect();
        host_sort(&mut sorted);
        sorted
    }

    /// "Yes"/"No"/"n/a" label for mutual peering with the seed host
    pub fn label_mutual_with_base(&self, name: &str, base: &str) -> &'static str {
        let base_canon = match self.aliases.get(&base.to_lowercase()) {
            Some(canon) => canon,
            None => {
                warn!("no known alias for start host {base:?}");
                return "No";
            }
        };
        match self.aliases.get(&name.to_lowercase()) {
            // Can't be mutual, we don't even know the name
            None => "No",
            Some(canon) if canon == base_canon => "n/a",
            Some(canon) => {
                if self.exists_link(canon, base_canon) && self.exists_link(base_canon, canon) {
                    "Yes"
                } else {
                    "No"
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.outbound.len().max(self.inbound.len())
    }

    pub fn is_empty(&self) -> bool {
        self.outbound.is_empty() && self.inbound.is_empty()
    }

    /// The alias table after construction, including self-mappings added
    /// for peers that were referenced but never reached
    pub fn aliases(&self) -> &AliasMap {
        &self.aliases
    }
}

/// Build the graph for a host map
///
/// The returned graph owns the extended alias table; read it back through
/// [`HostGraph::aliases`].
pub fn generate_graph(names: &[String], host_map: &HostMap, aliases: AliasMap) -> HostGraph {
    let mut graph = HostGraph {
        aliases,
        outbound: Adjacency::new(),
        inbound: Adjacency::new(),
    };
    for name in names {
        let lowered = name.to_lowercase();
        match host_map.get(name) {
            Some(node) => graph.add_host(&lowered, &node.gossip_peer_list),
            None => graph.add_host(&lowered, &[]),
        }
    }
    graph.fix_outbounds();
    graph
}
