//! Daemon configuration
//!
//! Defaults match long-standing operational practice for the public mesh.
//! A TOML file provides the base and CLI flags override individual values.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::types::{DEFAULT_HKP_PORT, DEFAULT_RECON_PORT};

/// Main configuration for the spider daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpiderConfig {
    // === Spidering ===

    /// Hostname the spider starts from
    pub seed_host: String,

    /// Default SKS HKP port (stats pages)
    pub sks_port_hkp: u16,

    /// Default SKS recon port, shown in the UI only
    pub sks_port_recon: u16,

    /// Seconds allowed for a remote server to start answering a stats fetch
    pub stats_fetch_timeout_secs: u64,

    /// Optional hard deadline for the whole fetch; defaults to the stats
    /// timeout plus a small grace
    pub http_fetch_timeout_secs: Option<u64>,

    /// Hostnames never to query, in addition to the built-in blacklist
    pub query_blacklist: Vec<String>,

    // === Scan scheduling ===

    /// Seconds between scans
    pub scan_interval_secs: u64,

    /// Upper bound of the random addition to the scan interval; must be >= 0
    pub scan_interval_jitter_secs: i64,

    // === Zone feed ===

    /// DNS zone answering TXT country lookups for reversed IPs
    pub countries_zone: String,

    /// Minimum sane key count; below this the data is considered broken
    pub keys_sanity_min: i64,

    /// Expected day-to-day jitter in key counts
    pub keys_daily_jitter: i64,

    // === Serving ===

    /// Listen address for the HTTP frontend
    pub listen: String,

    /// Email shown as the maintainer contact in the HTML UI
    pub maintainer_email: String,

    /// Hostname this daemon presents itself as in the HTML UI
    pub display_hostname: String,

    /// SKS membership file consulted by the hostnames endpoint
    pub membership_file: PathBuf,

    // === Persistence ===

    /// Write each completed scan here as JSON
    pub json_dump: Option<PathBuf>,

    /// Serve this JSON dump instead of spidering at all
    pub json_load: Option<PathBuf>,

    /// Loaded on start if present; rewritten on the persist signal
    pub json_persist: Option<PathBuf>,

    /// Created with a greeting line once the first snapshot is served
    pub started_file: Option<PathBuf>,

    // === Logging ===

    /// Where to write the daemon log
    pub log_file: PathBuf,

    /// Log to stdout instead of the log file
    pub log_stdout: bool,
}

impl Default for SpiderConfig {
    fn default() -> Self {
        Self {
            seed_host: "sks-peer.spodhuis.org".to_string(),
            sks_port_hkp: DEFAULT_HKP_PORT,
            sks_port_recon: DEFAULT_RECON_PORT,
            stats_fetch_timeout_secs: 30,
            http_fetch_timeout_secs: None,
            query_blacklist: Vec::new(),

            scan_interval_secs: 3600 * 8,
            scan_interval_jitter_secs: 120,

            countries_zone: "zz.countries.nerd.dk.".to_string(),
            keys_sanity_min: 3_100_000,
            keys_daily_jitter: 500,

            listen: "127.0.0.1:8001".to_string(),
            maintainer_email: "webmaster@spodhuis.org".to_string(),
            display_hostname: "sks.spodhuis.org".to_string(),
            membership_file: PathBuf::from("/var/sks/membership"),

            json_dump: None,
            json_load: None,
            json_persist: None,
            started_file: None,

            log_file: PathBuf::from("sksdaemon.log"),
            log_stdout: false,
        }
    }
}

impl SpiderConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    // Builder-style methods for CLI overrides

    pub fn with_seed_host(mut self, seed: Option<String>) -> Self {
        if let Some(seed) = seed {
            self.seed_host = seed;
        }
        self
    }

    pub fn with_listen(mut self, listen: Option<String>) -> Self {
        if let Some(listen) = listen {
            self.listen = listen;
        }
        self
    }

    pub fn with_log_file(mut self, path: Option<PathBuf>) -> Self {
        if let Some(path) = path {
            self.log_file = path;
        }
        self
    }

    pub fn with_log_stdout(mut self, stdout: bool) -> Self {
        if stdout {
            self.log_stdout = true;
        }
        self
    }

    pub fn with_json_paths(
        mut self,
        dump: Option<PathBuf>,
        load: Option<PathBuf>,
        persist: Option<PathBuf>,
    ) -> Self {
        if dump.is_some() {
            self.json_dump = dump;
        }
        if load.is_some() {
            self.json_load = load;
        }
        if persist.is_some() {
            self.json_persist = persist;
        }
        self
    }

    pub fn with_membership_file(mut self, path: Option<PathBuf>) -> Self {
        if let Some(path) = path {
            self.membership_file = path;
        }
        self
    }

    pub fn with_started_file(mut self, path: Option<PathBuf>) -> Self {
        if path.is_some() {
            self.started_file = path;
        }
        self
    }

    /// Validate configuration values; errors here are fatal at startup
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.scan_interval_jitter_secs < 0 {
            anyhow::bail!(
                "scan_interval_jitter_secs ({}) must not be negative",
                self.scan_interval_jitter_secs
            );
        }
        if self.scan_interval_secs == 0 {
            anyhow::bail!("scan_interval_secs must be positive");
        }
        if self.seed_host.is_empty() {
            anyhow::bail!("seed_host must be set");
        }
        if self.keys_daily_jitter < 0 {
            anyhow::bail!(
                "keys_daily_jitter ({}) must not be negative",
                self.keys_daily_jitter
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SpiderConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sks_port_hkp, 11371);
        assert_eq!(config.scan_interval_secs, 28800);
    }

    #[test]
    fn test_negative_jitter_rejected() {
        let config = SpiderConfig {
            scan_interval_jitter_secs: -1,
            ..SpiderConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_builder_overrides() {
        let config = SpiderConfig::default()
            .with_seed_host(Some("other.example.org".to_string()))
            .with_listen(None)
            .with_log_stdout(true);
        assert_eq!(config.seed_host, "other.example.org");
        assert_eq!(config.listen, "127.0.0.1:8001");
        assert!(config.log_stdout);
    }

    #[test]
    fn test_toml_round_trip() {
        let config = SpiderConfig {
            seed_host: "seed.example.org".to_string(),
            query_blacklist: vec!["bad.example.org".to_string()],
            ..SpiderConfig::default()
        };
        let file = tempfile::NamedTempFile::new().unwrap();
        config.save(file.path()).unwrap();
        let reloaded = SpiderConfig::load(file.path()).unwrap();
        assert_eq!(reloaded.seed_host, "seed.example.org");
        assert_eq!(reloaded.query_blacklist, vec!["bad.example.org"]);
    }
}
