//! Core types shared across the spider and the serving layer
//!
//! The central record is [`SksNode`]: everything learned about one keyserver
//! from a single stats fetch. Nodes are mutated only while a spider run owns
//! them; once published in a snapshot they are immutable.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Default SKS HKP port (stats pages are served here)
pub const DEFAULT_HKP_PORT: u16 = 11371;

/// Default SKS recon port (informational only, we never speak recon)
pub const DEFAULT_RECON_PORT: u16 = 11370;

/// User-Agent sent with every stats fetch
pub const SPIDER_USER_AGENT: &str = "sks_peers/0.2 (SKS mesh spidering)";

/// Hostnames never queried, regardless of configuration
pub const BLACKLISTED_HOSTS: &[&str] = &["keyserver.pramberger.at"];

/// Per-host failure taxonomy
///
/// Every variant is recovered inside the coordinator; none of these ever
/// terminates a run.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SpiderError {
    /// Resolution failure or disallowed IP; host is blacklisted for the run
    #[error("DNS failure: {0}")]
    BadDns(String),

    /// HTTP connection/timeout error; host retains no node record
    #[error("fetch failure: {0}")]
    Transport(String),

    /// Analysis failed after a successful fetch
    #[error("analyze failure: {0}")]
    Analyze(String),
}

/// One keyserver as learned from its stats page
///
/// Serialized attribute names match the historical JSON dumps, so snapshots
/// written by earlier generations of the daemon reload cleanly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct SksNode {
    /// Hostname the fetch was made against (not necessarily canonical)
    pub hostname: String,

    /// HKP port used for the fetch
    pub port: u16,

    /// Transport status line, e.g. "200 OK"
    pub status: String,

    /// Server response header
    pub server_header: String,

    /// Via response header (set when the server sits behind a proxy)
    pub via_header: String,

    /// Settings table from the stats page
    pub settings: BTreeMap<String, String>,

    /// Gossip peer name to the remainder of its row (typically ports)
    pub gossip_peers: BTreeMap<String, String>,

    /// Gossip peer names in presentation order
    pub gossip_peer_list: Vec<String>,

    /// Outgoing mailsync targets
    pub mailsync_peers: Vec<String>,

    /// Software name from Settings
    pub software: String,

    /// Software version from Settings
    pub version: String,

    /// Total keys; -2 on HTTP failure, -1 on unparseable count
    pub keycount: i64,

    /// IPs this host resolved to (filled when the snapshot is built)
    pub ip_list: Vec<String>,

    /// Other names this host is known by (filled when the snapshot is built)
    pub aliases: Vec<String>,

    /// Hop count from the seed; -1 means never reached
    pub distance: i32,

    /// Captured analysis error, if any
    pub analyze_error: Option<String>,

    #[serde(skip)]
    pub(crate) initialised: bool,
}

impl Default for SksNode {
    fn default() -> Self {
        Self {
            hostname: String::new(),
            port: 0,
            status: String::new(),
            server_header: String::new(),
            via_header: String::new(),
            settings: BTreeMap::new(),
            gossip_peers: BTreeMap::new(),
            gossip_peer_list: Vec::new(),
            mailsync_peers: Vec::new(),
            software: String::new(),
            version: String::new(),
            keycount: 0,
            ip_list: Vec::new(),
            aliases: Vec::new(),
            distance: -1,
            analyze_error: None,
            initialised: false,
        }
    }
}

impl SksNode {
    /// Create a fresh node for a fetch against `hostname`
    pub fn new(hostname: impl Into<String>, port: u16) -> Self {
        Self {
            hostname: hostname.into(),
            port,
            initialised: true,
            ..Self::default()
        }
    }

    /// Stats URL this node was (or would be) fetched from
    pub fn stats_url(&self) -> String {
        let port = if self.port == 0 {
            DEFAULT_HKP_PORT
        } else {
            self.port
        };
        format!(
            "http://{}:{}/pks/lookup?op=stats&options=mr",
            self.hostname, port
        )
    }

    /// Whether the fetch got a successful HTTP response
    pub fn fetch_ok(&self) -> bool {
        self.status.starts_with("200")
    }
}

/// Stats URL for a hostname that may not have a node record
pub fn node_url(name: &str, node: Option<&SksNode>, default_port: u16) -> String {
    match node {
        Some(node) => node.stats_url(),
        None => format!("http://{name}:{default_port}/pks/lookup?op=stats&options=mr"),
    }
}

/// Result of one forward DNS lookup
#[derive(Debug)]
pub struct DnsResult {
    pub hostname: String,
    pub ip_list: Vec<String>,
    pub error: Option<String>,
}

/// Result of one stats fetch + analysis
#[derive(Debug)]
pub struct HostResult {
    pub hostname: String,
    pub node: Option<Box<SksNode>>,
    pub error: Option<SpiderError>,
}
