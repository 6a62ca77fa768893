//! The published result of a completed spider run
//!
//! A [`PersistedHostInfo`] is immutable once installed. Readers grab the
//! current `Arc` under a shared lock and then use it lock-free; the
//! publisher swaps the pointer under the exclusive lock.

pub mod depth;
pub mod graph;
pub mod hostmap;
pub mod serialize;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};
use trust_dns_resolver::TokioAsyncResolver;

use crate::countries::country_for_ip;
use crate::spider::SpiderState;

pub use depth::{assign_depths, generate_depth_sorted};
pub use graph::{generate_graph, HostGraph};
pub use hostmap::{generate_hostlist_sorted, host_sort, AliasMap, HostMap};

/// Everything a completed run learned, in query-ready form
#[derive(Debug, Clone)]
pub struct PersistedHostInfo {
    /// Canonical hostname to node, fetched hosts only
    pub host_map: HostMap,

    /// Every known name to its canonical hostname
    pub aliases: AliasMap,

    /// IP literal to uppercase ISO country code; missing means unknown
    pub ip_country: BTreeMap<String, String>,

    /// Hostnames in host-label order
    pub sorted: Vec<String>,

    /// Hostnames in depth order
    pub depth_sorted: Vec<String>,

    /// The directed gossip graph
    pub graph: HostGraph,

    /// When this snapshot became current
    pub timestamp: DateTime<Utc>,
}

/// Shared slot holding the current snapshot
pub type CurrentSnapshot = Arc<RwLock<Option<Arc<PersistedHostInfo>>>>;

/// Fetch the current snapshot, if a scan has completed
pub async fn current(slot: &CurrentSnapshot) -> Option<Arc<PersistedHostInfo>> {
    slot.read().await.clone()
}

/// Install a snapshot as current, stamping its publication time
pub async fn publish(slot: &CurrentSnapshot, mut info: PersistedHostInfo) {
    info.timestamp = Utc::now();
    let mut guard = slot.write().await;
    *guard = Some(Arc::new(info));
}

fn finish(mut host_map: HostMap, mut aliases: AliasMap, seed: &str) -> PersistedHostInfo {
    for name in host_map.keys() {
        aliases.entry(name.clone()).or_insert_with(|| name.clone());
    }

    assign_depths(&mut host_map, &aliases, seed);
    let sorted = generate_hostlist_sorted(&host_map);
    let depth_sorted = generate_depth_sorted(&host_map);
    let graph = generate_graph(&sorted, &host_map, aliases);
    let aliases = graph.aliases().clone();

    PersistedHostInfo {
        host_map,
        aliases,
        ip_country: BTreeMap::new(),
        sorted,
        depth_sorted,
        graph,
        timestamp: Utc::now(),
    }
}

/// Materialize a snapshot from a terminated spider's working state
pub fn generate_persisted(state: SpiderState, seed: &str) -> PersistedHostInfo {
    let SpiderState {
        known_hosts,
        aliases_for_host,
        ips_for_host,
        server_infos,
        ..
    } = state;

    let mut host_map = HostMap::new();
    for (name, node) in server_infos {
        if let Some(node) = node {
            host_map.insert(name, node);
        }
    }

    for (name, node) in host_map.iter_mut() {
        node.ip_list = ips_for_host.get(name).cloned().unwrap_or_default();
        node.aliases = aliases_for_host
            .get(name)
            .map(|list| list.iter().filter(|a| *a != name).cloned().collect())
            .unwrap_or_default();
        host_sort(&mut node.gossip_peer_list);
        host_sort(&mut node.mailsync_peers);
    }

    finish(host_map, known_hosts, seed)
}

/// Materialize a snapshot from a reloaded JSON dump
pub fn generate_from_loaded(host_map: HostMap, seed: &str) -> PersistedHostInfo {
    let mut aliases = AliasMap::new();
    for (name, node) in &host_map {
        aliases.insert(name.to_lowercase(), name.clone());
        for alias in &node.aliases {
            aliases.insert(alias.to_lowercase(), name.clone());
        }
    }
    finish(host_map, aliases, seed)
}

/// Fill the IP→country map by sequential TXT lookups
///
/// Lookup failures just leave the IP out of the map.
pub async fn resolve_countries(
    info: &mut PersistedHostInfo,
    resolver: &TokioAsyncResolver,
    zone: &str,
) {
    let mut found = 0usize;
    let mut tried = 0usize;
    for node in info.host_map.values() {
        for ip in &node.ip_list {
            if info.ip_country.contains_key(ip) {
                continue;
            }
            tried += 1;
            match country_for_ip(resolver, ip, zone).await {
                Ok(country) if !country.is_empty() => {
                    info.ip_country.insert(ip.clone(), country);
                    found += 1;
                }
                Ok(_) => {}
                Err(err) => debug!("no country for [{ip}]: {err}"),
            }
        }
    }
    info!("country resolution: {found} of {tried} IPs mapped");
}
