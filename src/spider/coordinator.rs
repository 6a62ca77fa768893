//! Single-writer coordinator
//!
//! All mutable run state lives in [`SpiderState`] and is touched only by
//! the coordinator task, one event at a time. Workers are pure producers:
//! they send exactly one result record and never read state.
//!
//! The pending counter is the quiescence signal. Every enqueued hostname
//! bumps it before it lands on a channel, and any follow-on work bumps it
//! before the predecessor's decrement, so a zero reading is reliable.

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::net::IpAddr;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};
use trust_dns_resolver::TokioAsyncResolver;

use crate::config::SpiderConfig;
use crate::diagnostics::DiagRequest;
use crate::skip_addresses::ip_disallowed;
use crate::snapshot::AliasMap;
use crate::types::{DnsResult, HostResult, SksNode, BLACKLISTED_HOSTS};

use super::{dns, fetch, PendingCounter};

/// Working state of one spider run
///
/// Mutated exclusively by the coordinator and abandoned once the snapshot
/// has been generated from it.
#[derive(Debug, Default)]
pub struct SpiderState {
    /// Hosts already handed to a DNS worker
    considering: HashSet<String>,

    /// Hostnames that failed resolution or resolved into disallowed space
    bad_dns: HashSet<String>,

    /// Every known name to its canonical hostname
    pub(crate) known_hosts: AliasMap,

    /// Reverse of `known_hosts`: canonical hostname to all its names
    pub(crate) aliases_for_host: HashMap<String, Vec<String>>,

    /// IP literal to the canonical hostname owning it
    known_ips: HashMap<String, String>,

    /// Canonical hostname to its resolved IPs
    pub(crate) ips_for_host: HashMap<String, Vec<String>>,

    /// Canonical hostname to its fetched node (None while fetch pending)
    pub(crate) server_infos: HashMap<String, Option<SksNode>>,

    /// Transport failures by hostname
    pub(crate) query_errors: HashMap<String, String>,

    /// In-flight name counts, for diagnostics when a run looks hung
    pending_hosts: HashMap<String, i64>,
}

/// What the skip filters decided for an inbound hostname
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Consider {
    Skip,
    Resolve,
}

/// What a DNS result leads to
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum DnsOutcome {
    Dropped,
    Merged,
    Fetch(String),
}

/// Merge IP lists, deduplicating while preserving first-seen order
fn flatten_ips(lists: &[&[String]]) -> Vec<String> {
    let mut result: Vec<String> = Vec::with_capacity(lists.iter().map(|l| l.len()).sum());
    for list in lists {
        for ip in *list {
            if !result.contains(ip) {
                result.push(ip.clone());
            }
        }
    }
    result
}

impl SpiderState {
    /// Apply the skip filters to an inbound hostname, in order
    ///
    /// On `Resolve` the host is marked as being considered.
    pub(crate) fn consider(&mut self, hostname: &str, config: &SpiderConfig) -> Consider {
        let skip = if self.considering.contains(hostname) {
            true
        } else if BLACKLISTED_HOSTS.contains(&hostname) {
            info!("ignoring blacklisted host: \"{hostname}\"");
            true
        } else if self.bad_dns.contains(hostname) {
            true
        } else if self.known_hosts.contains_key(hostname) {
            true
        } else if !hostname.contains('.') {
            info!("ignoring unqualified hostname: {hostname}");
            true
        } else if hostname.parse::<IpAddr>().is_ok() {
            info!("ignoring IP address: [{hostname}]");
            true
        } else if hostname.contains("pool.") {
            info!("ignoring pool hostname: {hostname}");
            true
        } else if hostname.ends_with(".local") {
            info!("ignoring .local hostname: {hostname}");
            true
        } else if config.query_blacklist.iter().any(|h| h.as_str() == hostname) {
            info!("ignoring blacklisted hostname: {hostname}");
            true
        } else {
            false
        };

        if skip {
            Consider::Skip
        } else {
            self.considering.insert(hostname.to_string());
            Consider::Resolve
        }
    }

    /// Fold a DNS result into the state
    pub(crate) fn process_dns_result(&mut self, result: DnsResult) -> DnsOutcome {
        let hostname = result.hostname;
        if let Some(err) = result.error {
            warn!("DNS resolution failure for \"{hostname}\": {err}");
            self.bad_dns.insert(hostname);
            return DnsOutcome::Dropped;
        }

        let ip_list = flatten_ips(&[&result.ip_list]);
        for ip in &ip_list {
            if ip_disallowed(ip) {
                info!("disallowing host \"{hostname}\" because of IP [{ip}]");
                self.bad_dns.insert(hostname);
                return DnsOutcome::Dropped;
            }
        }

        // Dedup by IP: racing names resolving to a shared address become
        // aliases of whoever arrived first
        for ip in &ip_list {
            let canonical = match self.known_ips.get(ip) {
                Some(canonical) => canonical.clone(),
                None => continue,
            };
            self.known_hosts.insert(hostname.clone(), canonical.clone());
            for ip2 in &ip_list {
                self.known_ips.insert(ip2.clone(), canonical.clone());
            }
            let existing = self.ips_for_host.remove(&canonical).unwrap_or_default();
            self.ips_for_host
                .insert(canonical, flatten_ips(&[&existing, &ip_list]));
            return DnsOutcome::Merged;
        }

        // Shiny new host after this point
        self.known_hosts.insert(hostname.clone(), hostname.clone());
        self.aliases_for_host
            .insert(hostname.clone(), vec![hostname.clone()]);
        self.ips_for_host.insert(hostname.clone(), ip_list.clone());
        for ip in ip_list {
            self.known_ips.insert(ip, hostname.clone());
        }
        self.server_infos.insert(hostname.clone(), None);
        DnsOutcome::Fetch(hostname)
    }

    /// Fold a host result into the state; returns gossip peers to enqueue
    pub(crate) fn process_host_result(&mut self, result: HostResult) -> Vec<String> {
        let hostname = result.hostname;
        if let Some(err) = result.error {
            warn!("failure fetching \"{hostname}\": {err}");
            self.query_errors.insert(hostname, err.to_string());
            return Vec::new();
        }
        let node = match result.node {
            Some(node) => *node,
            None => return Vec::new(),
        };

        let mut canonical = hostname.clone();
        let own_hostname = node
            .settings
            .get("Hostname")
            .map(|name| name.to_lowercase());

        if let Some(own) = &own_hostname {
            if own != &hostname {
                // The server declares a different name for itself; move the
                // node and its IP/alias state under the canonical key
                canonical = own.clone();
                if let Some(Some(_)) = self.server_infos.get(&canonical) {
                    info!(
                        "duplicate fetch, got server info for \"{canonical}\" and again as \"{hostname}\""
                    );
                }
                self.server_infos.remove(&hostname);

                self.known_hosts
                    .entry(canonical.clone())
                    .or_insert_with(|| canonical.clone());

                let old_aliases = self.aliases_for_host.remove(&hostname).unwrap_or_default();
                for alias in &old_aliases {
                    self.known_hosts.insert(alias.clone(), canonical.clone());
                }
                let mut aliases = old_aliases;
                aliases.push(canonical.clone());
                self.aliases_for_host.insert(canonical.clone(), aliases);

                let old_ips = self.ips_for_host.get(&hostname).cloned().unwrap_or_default();
                for ip in &old_ips {
                    self.known_ips.insert(ip.clone(), canonical.clone());
                }
                match self.ips_for_host.get(&canonical) {
                    None => {
                        self.ips_for_host.remove(&hostname);
                        self.ips_for_host.insert(canonical.clone(), old_ips);
                    }
                    Some(existing) => {
                        let merged = flatten_ips(&[existing, &old_ips]);
                        self.ips_for_host.insert(canonical.clone(), merged);
                    }
                }
            }
        }

        if let Some(nodename) = node.settings.get("Nodename") {
            let nodename = nodename.to_lowercase();
            if nodename != canonical && Some(&nodename) != own_hostname.as_ref() {
                // Known by this name too, but it is not itself reachable
                self.known_hosts
                    .entry(nodename)
                    .or_insert_with(|| canonical.clone());
            }
        }

        let peers = node.gossip_peer_list.clone();
        self.server_infos.insert(canonical, Some(node));
        peers
    }

    fn in_flight(&self) -> Vec<(&str, i64)> {
        let mut hosts: Vec<(&str, i64)> = self
            .pending_hosts
            .iter()
            .filter(|(_, count)| **count != 0)
            .map(|(name, count)| (name.as_str(), *count))
            .collect();
        hosts.sort();
        hosts
    }
}

pub(crate) struct Coordinator {
    pub(crate) state: SpiderState,
    pub(crate) config: Arc<SpiderConfig>,
    pub(crate) resolver: Arc<TokioAsyncResolver>,
    pub(crate) client: reqwest::Client,
    pub(crate) pending: Arc<PendingCounter>,
    pub(crate) add_tx: mpsc::Sender<String>,
    pub(crate) batch_tx: mpsc::Sender<Vec<String>>,
    pub(crate) dns_tx: mpsc::Sender<DnsResult>,
    pub(crate) host_tx: mpsc::Sender<HostResult>,
}

impl Coordinator {
    fn consider_host(&mut self, hostname: String) {
        *self.state.pending_hosts.entry(hostname.clone()).or_insert(0) += 1;
        match self.state.consider(&hostname, &self.config) {
            Consider::Skip => self.finish(&hostname),
            Consider::Resolve => {
                tokio::spawn(dns::resolve_host(
                    hostname,
                    self.resolver.clone(),
                    self.dns_tx.clone(),
                ));
            }
        }
    }

    fn handle_dns_result(&mut self, result: DnsResult) {
        if let DnsOutcome::Fetch(canonical) = self.state.process_dns_result(result) {
            // Bump before the predecessor's decrement in the event loop
            self.pending.add(1);
            *self
                .state
                .pending_hosts
                .entry(canonical.clone())
                .or_insert(0) += 1;
            tokio::spawn(fetch::query_host(
                canonical,
                self.config.sks_port_hkp,
                self.client.clone(),
                self.host_tx.clone(),
            ));
        }
    }

    fn handle_host_result(&mut self, result: HostResult) {
        let peers = self.state.process_host_result(result);
        if peers.is_empty() {
            return;
        }
        // Batch-add the peer list: counter bumped by the full length before
        // any of them is considered, then processed inline so the
        // coordinator never blocks on its own channel
        self.pending.add(peers.len());
        for peer in peers {
            self.consider_host(peer.to_lowercase());
        }
    }

    fn finish(&mut self, hostname: &str) {
        if let Some(count) = self.state.pending_hosts.get_mut(hostname) {
            *count -= 1;
        }
        self.pending.done();
    }

    fn handle_diagnostic(&self, request: DiagRequest) {
        fn queued<T>(tx: &mpsc::Sender<T>) -> usize {
            tx.max_capacity() - tx.capacity()
        }
        let mut out = String::with_capacity(256);
        let _ = writeln!(
            out,
            "addHost,batchAddHost: {}, {}",
            queued(&self.add_tx),
            queued(&self.batch_tx)
        );
        let _ = writeln!(
            out,
            "dnsResult,hostResult: {}, {}",
            queued(&self.dns_tx),
            queued(&self.host_tx)
        );
        let _ = writeln!(out, "pending: {}", self.pending.current());
        let _ = writeln!(
            out,
            "considering: {}, known: {}, bad-dns: {}, errors: {}",
            self.state.considering.len(),
            self.state.known_hosts.len(),
            self.state.bad_dns.len(),
            self.state.query_errors.len()
        );
        for (name, count) in self.state.in_flight() {
            let _ = writeln!(out, "  in-flight: {name} x{count}");
        }
        let _ = request.reply.send(out);
    }
}

/// The coordinator event loop; exits on the terminate signal
pub(crate) async fn main_loop(
    mut coordinator: Coordinator,
    mut add_rx: mpsc::Receiver<String>,
    mut batch_rx: mpsc::Receiver<Vec<String>>,
    mut dns_rx: mpsc::Receiver<DnsResult>,
    mut host_rx: mpsc::Receiver<HostResult>,
    mut diag_rx: mpsc::Receiver<DiagRequest>,
    mut terminate_rx: mpsc::Receiver<()>,
) -> SpiderState {
    loop {
        tokio::select! {
            Some(hostname) = add_rx.recv() => coordinator.consider_host(hostname),
            Some(hostlist) = batch_rx.recv() => {
                for hostname in hostlist {
                    coordinator.consider_host(hostname);
                }
            }
            Some(result) = dns_rx.recv() => {
                let hostname = result.hostname.clone();
                coordinator.handle_dns_result(result);
                coordinator.finish(&hostname);
            }
            Some(result) = host_rx.recv() => {
                let hostname = result.hostname.clone();
                coordinator.handle_host_result(result);
                coordinator.finish(&hostname);
            }
            Some(request) = diag_rx.recv() => coordinator.handle_diagnostic(request),
            _ = terminate_rx.recv() => break,
        }
    }
    coordinator.state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SpiderError;

    fn test_config() -> SpiderConfig {
        SpiderConfig {
            query_blacklist: vec!["denied.example.org".to_string()],
            ..SpiderConfig::default()
        }
    }

    fn dns_ok(hostname: &str, ips: &[&str]) -> DnsResult {
        DnsResult {
            hostname: hostname.to_string(),
            ip_list: ips.iter().map(|ip| ip.to_string()).collect(),
            error: None,
        }
    }

    fn fetched(hostname: &str, settings: &[(&str, &str)], peers: &[&str]) -> HostResult {
        let mut node = SksNode::new(hostname, 11371);
        node.status = "200 OK".to_string();
        for (key, value) in settings {
            node.settings.insert(key.to_string(), value.to_string());
        }
        node.gossip_peer_list = peers.iter().map(|p| p.to_string()).collect();
        HostResult {
            hostname: hostname.to_string(),
            node: Some(Box::new(node)),
            error: None,
        }
    }

    #[test]
    fn test_skip_filters() {
        let config = test_config();
        let mut state = SpiderState::default();

        for rejected in [
            "unqualified",
            "192.0.2.7",
            "2001:db8::5",
            "subpool.example.org",
            "printer.local",
            "denied.example.org",
            "keyserver.pramberger.at",
        ] {
            assert_eq!(
                state.consider(rejected, &config),
                Consider::Skip,
                "expected skip for {rejected}"
            );
        }

        assert_eq!(
            state.consider("keys.example.org", &config),
            Consider::Resolve
        );
        // Second sight of the same name is skipped as already-considering
        assert_eq!(state.consider("keys.example.org", &config), Consider::Skip);
    }

    #[test]
    fn test_bad_dns_blacklists_for_run() {
        let config = test_config();
        let mut state = SpiderState::default();
        assert_eq!(state.consider("gone.example.org", &config), Consider::Resolve);

        let result = DnsResult {
            hostname: "gone.example.org".to_string(),
            ip_list: Vec::new(),
            error: Some("NXDOMAIN".to_string()),
        };
        assert_eq!(state.process_dns_result(result), DnsOutcome::Dropped);

        state.considering.clear();
        assert_eq!(state.consider("gone.example.org", &config), Consider::Skip);
    }

    #[test]
    fn test_disallowed_ip_drops_host() {
        let mut state = SpiderState::default();
        let outcome =
            state.process_dns_result(dns_ok("loop.example.org", &["198.51.100.1", "127.0.0.2"]));
        assert_eq!(outcome, DnsOutcome::Dropped);
        assert!(state.bad_dns.contains("loop.example.org"));
        assert!(state.known_ips.is_empty());
    }

    #[test]
    fn test_ip_dedup_merges_alias() {
        let mut state = SpiderState::default();
        let outcome = state.process_dns_result(dns_ok("keys.example.org", &["192.0.200.1"]));
        assert_eq!(outcome, DnsOutcome::Fetch("keys.example.org".to_string()));

        let outcome = state.process_dns_result(dns_ok(
            "alias.example.net",
            &["192.0.200.1", "192.0.200.2"],
        ));
        assert_eq!(outcome, DnsOutcome::Merged);
        assert_eq!(state.known_hosts["alias.example.net"], "keys.example.org");
        assert_eq!(state.known_ips["192.0.200.2"], "keys.example.org");
        assert_eq!(
            state.ips_for_host["keys.example.org"],
            vec!["192.0.200.1", "192.0.200.2"]
        );
        // Only the first arriver gets a fetch
        assert_eq!(state.server_infos.len(), 1);
    }

    #[test]
    fn test_canonicalization_moves_state() {
        let mut state = SpiderState::default();
        assert_eq!(
            state.process_dns_result(dns_ok("old-name.example.org", &["192.0.200.9"])),
            DnsOutcome::Fetch("old-name.example.org".to_string())
        );

        let peers = state.process_host_result(fetched(
            "old-name.example.org",
            &[
                ("Hostname", "Canonical.Example.ORG"),
                ("Nodename", "ks-node-7.example.org"),
            ],
            &["peer.example.net"],
        ));
        assert_eq!(peers, vec!["peer.example.net"]);

        // Node moved under the lowercased canonical key
        assert!(state.server_infos["canonical.example.org"].is_some());
        assert!(!state.server_infos.contains_key("old-name.example.org"));
        // All names resolve to the canonical
        for name in [
            "old-name.example.org",
            "canonical.example.org",
            "ks-node-7.example.org",
        ] {
            assert_eq!(state.known_hosts[name], "canonical.example.org");
        }
        // IPs follow the move
        assert_eq!(state.known_ips["192.0.200.9"], "canonical.example.org");
        assert_eq!(
            state.ips_for_host["canonical.example.org"],
            vec!["192.0.200.9"]
        );
        assert!(!state.ips_for_host.contains_key("old-name.example.org"));
        // Alias list ends with the canonical itself
        assert_eq!(
            state.aliases_for_host["canonical.example.org"],
            vec!["old-name.example.org", "canonical.example.org"]
        );
    }

    #[test]
    fn test_transport_error_recorded_without_node() {
        let mut state = SpiderState::default();
        let result = HostResult {
            hostname: "flaky.example.org".to_string(),
            node: None,
            error: Some(SpiderError::Transport("connection refused".to_string())),
        };
        assert!(state.process_host_result(result).is_empty());
        assert!(state.query_errors.contains_key("flaky.example.org"));
        assert!(!state.server_infos.contains_key("flaky.example.org"));
    }

    #[test]
    fn test_flatten_ips_dedupes_in_order() {
        let a = vec!["10.1.1.1".to_string(), "10.1.1.2".to_string()];
        let b = vec!["10.1.1.2".to_string(), "10.1.1.3".to_string()];
        assert_eq!(
            flatten_ips(&[&a, &b]),
            vec!["10.1.1.1", "10.1.1.2", "10.1.1.3"]
        );
    }
}
