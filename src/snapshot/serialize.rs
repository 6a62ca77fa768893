//! JSON dump and reload of a collected host map
//!
//! The dump is one object keyed by canonical hostname. Reloading is the
//! sole alternative to live spidering; loaded nodes get their private
//! initialised flag set so URL construction works without a fetch.

use std::path::Path;

use tracing::info;

use super::hostmap::HostMap;
use crate::types::{SksNode, DEFAULT_HKP_PORT};

/// Write the host map as JSON
pub fn dump_json_to_file(host_map: &HostMap, path: &Path) -> anyhow::Result<()> {
    let file = std::fs::File::create(path)?;
    serde_json::to_writer(std::io::BufWriter::new(file), host_map)?;
    info!("dumped {} hosts to {:?}", host_map.len(), path);
    Ok(())
}

/// Load a host map dumped by [`dump_json_to_file`]
pub fn load_json_from_file(path: &Path) -> anyhow::Result<HostMap> {
    let file = std::fs::File::open(path)?;
    let mut host_map: HostMap = serde_json::from_reader(std::io::BufReader::new(file))?;
    for node in host_map.values_mut() {
        node.initialised = true;
        if node.port == 0 {
            node.port = DEFAULT_HKP_PORT;
        }
    }
    info!("loaded {} hosts from {:?}", host_map.len(), path);
    Ok(host_map)
}

/// Sanity check a loaded map before trusting it as a snapshot source
pub fn looks_complete(host_map: &HostMap) -> bool {
    !host_map.is_empty() && host_map.values().any(SksNode::fetch_ok)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_map() -> HostMap {
        let mut node = SksNode::new("keys.example.org", 11371);
        node.status = "200 OK".to_string();
        node.keycount = 4_200_000;
        node.software = "SKS".to_string();
        node.version = "1.1.6".to_string();
        node.ip_list = vec!["192.0.2.5".to_string()];
        node.aliases = vec!["pgp.example.org".to_string()];
        node.distance = 1;
        node.gossip_peer_list = vec!["other.example.net".to_string()];
        let mut map = HostMap::new();
        map.insert("keys.example.org".to_string(), node);
        map
    }

    #[test]
    fn test_dump_load_round_trip() {
        let map = sample_map();
        let file = tempfile::NamedTempFile::new().unwrap();
        dump_json_to_file(&map, file.path()).unwrap();
        let reloaded = load_json_from_file(file.path()).unwrap();

        assert_eq!(reloaded.len(), map.len());
        let (orig, loaded) = (&map["keys.example.org"], &reloaded["keys.example.org"]);
        assert_eq!(loaded.hostname, orig.hostname);
        assert_eq!(loaded.keycount, orig.keycount);
        assert_eq!(loaded.ip_list, orig.ip_list);
        assert_eq!(loaded.aliases, orig.aliases);
        assert_eq!(loaded.distance, orig.distance);
        assert!(loaded.initialised);
    }

    #[test]
    fn test_looks_complete() {
        assert!(looks_complete(&sample_map()));
        assert!(!looks_complete(&HostMap::new()));
    }
}
