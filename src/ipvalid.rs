//! Serving-IP selection for the healthy-peer zone
//!
//! Statistical filter (`alg_5`) over the current snapshot: key counts are
//! bucketed, the densest bucket anchors an outlier rejection, and the
//! survivors' spread sets the acceptance threshold. Hosts skipped for
//! policy reasons (ancient version, below minimum, wrong country, not
//! proxied) are removed last, each stage with its own abort reason.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::countries::CountrySet;
use crate::snapshot::PersistedHostInfo;
use crate::versions::SksVersion;

/// Fixed width of the key-count histogram buckets
const BUCKET_WIDTH: i64 = 3000;

/// Width of the outlier acceptance band, in standard deviations
const OUTLIER_SIGMA: f64 = 5.0;

/// Version with a recon defect severe enough to exclude outright
const BROKEN_VERSION: &str = "1.0.10";

/// Server tokens meaning the host answers directly, not via a web proxy
const NATIVE_SERVER_TOKENS: &[&str] = &["sks_www", "gnuks"];

/// Tag identifying this selection algorithm in responses
pub const ALGORITHM: &str = "alg_5";

/// Caller-supplied selection parameters
#[derive(Debug, Clone, Default)]
pub struct IpValidParams {
    pub minimum_version: Option<SksVersion>,
    pub countries: Option<CountrySet>,
    pub proxies_required: bool,
    pub threshold_override: Option<i64>,
}

/// Distribution details, exposed on request
#[derive(Debug, Clone, Serialize, Default)]
pub struct IpValidStats {
    pub hosts_considered: usize,
    pub buckets: BTreeMap<i64, usize>,
    pub largest_bucket: i64,
    pub bucket_mean: f64,
    pub bucket_stddev: f64,
    pub accepted_ips: usize,
    pub accepted_mean: f64,
    pub accepted_stddev: f64,
    pub threshold: i64,
    pub skipped_broken_version: usize,
    pub skipped_minimum_version: usize,
    pub skipped_country: usize,
    pub skipped_proxy: usize,
}

/// A successful selection
#[derive(Debug, Clone)]
pub struct IpValidResult {
    pub ips: Vec<String>,
    pub count: usize,
    pub threshold: i64,
    pub params: IpValidParams,
    pub generated_at: DateTime<Utc>,
    pub stats: IpValidStats,
}

/// Selection output: a list or a tagged refusal
#[derive(Debug, Clone)]
pub enum IpValidOutcome {
    Complete(Box<IpValidResult>),
    Invalid { reason: String },
}

fn invalid(reason: impl Into<String>) -> IpValidOutcome {
    IpValidOutcome::Invalid {
        reason: reason.into(),
    }
}

fn mean_stddev(values: &[i64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().map(|v| *v as f64).sum::<f64>() / n;
    let variance = values
        .iter()
        .map(|v| {
            let d = *v as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    (mean, variance.sqrt())
}

/// Whether the Server header names software that answers natively
fn server_is_native(server_header: &str) -> bool {
    let token = server_header.split('/').next().unwrap_or_default();
    NATIVE_SERVER_TOKENS.contains(&token)
}

/// Whether any of the host's IPs is in one of the wanted countries
fn host_in_countries(
    ips: &[String],
    countries: &CountrySet,
    ip_country: &BTreeMap<String, String>,
) -> bool {
    ips.iter().any(|ip| {
        ip_country
            .get(ip)
            .map(|country| countries.has_country(country))
            .unwrap_or(false)
    })
}

/// Run the selection against a snapshot
pub fn select_valid_ips(
    info: &PersistedHostInfo,
    params: IpValidParams,
    keys_sanity_min: i64,
    keys_daily_jitter: i64,
) -> IpValidOutcome {
    let mut stats = IpValidStats::default();

    // Skip-reason buckets hold the IPs of matched hosts; they are applied
    // only after the statistical filtering
    let mut skip_broken_version: Vec<String> = Vec::new();
    let mut skip_minimum_version: Vec<String> = Vec::new();
    let mut skip_country: Vec<String> = Vec::new();
    let mut skip_proxy: Vec<String> = Vec::new();

    let mut host_counts: Vec<i64> = Vec::new();
    let mut full_ips: HashMap<String, i64> = HashMap::new();

    for node in info.host_map.values() {
        if node.keycount <= 1 {
            continue;
        }
        stats.hosts_considered += 1;

        if node.version == BROKEN_VERSION {
            skip_broken_version.extend(node.ip_list.iter().cloned());
        }
        if let Some(minimum) = &params.minimum_version {
            let at_least = SksVersion::parse(&node.version)
                .map(|version| version.is_at_least(minimum))
                .unwrap_or(false);
            if !at_least {
                skip_minimum_version.extend(node.ip_list.iter().cloned());
            }
        }
        if let Some(countries) = &params.countries {
            if !host_in_countries(&node.ip_list, countries, &info.ip_country) {
                skip_country.extend(node.ip_list.iter().cloned());
            }
        }
        if params.proxies_required && server_is_native(&node.server_header) {
            skip_proxy.extend(node.ip_list.iter().cloned());
        }

        host_counts.push(node.keycount);
        for ip in &node.ip_list {
            full_ips.insert(ip.clone(), node.keycount);
        }
    }

    if host_counts.is_empty() {
        return invalid("broken_no_buckets");
    }

    // Histogram over one-count-per-host; densest bucket anchors the band.
    // Ties break toward the lowest bucket index.
    let mut buckets: BTreeMap<i64, usize> = BTreeMap::new();
    for count in &host_counts {
        *buckets.entry(count / BUCKET_WIDTH).or_insert(0) += 1;
    }
    let (largest_bucket, _) = buckets
        .iter()
        .fold((0i64, 0usize), |(best, best_pop), (idx, pop)| {
            if *pop > best_pop {
                (*idx, *pop)
            } else {
                (best, best_pop)
            }
        });
    stats.buckets = buckets;
    stats.largest_bucket = largest_bucket;

    let in_bucket: Vec<i64> = host_counts
        .iter()
        .copied()
        .filter(|count| count / BUCKET_WIDTH == largest_bucket)
        .collect();
    let (bucket_mean, bucket_stddev) = mean_stddev(&in_bucket);
    stats.bucket_mean = bucket_mean;
    stats.bucket_stddev = bucket_stddev;

    let low = bucket_mean - OUTLIER_SIGMA * bucket_stddev;
    let high = bucket_mean + OUTLIER_SIGMA * bucket_stddev;
    let accepted: Vec<i64> = full_ips
        .values()
        .copied()
        .filter(|count| {
            let count = *count as f64;
            count >= low && count <= high
        })
        .collect();
    stats.accepted_ips = accepted.len();

    if accepted.is_empty() {
        return invalid("broken_data");
    }
    let (accepted_mean, accepted_stddev) = mean_stddev(&accepted);
    stats.accepted_mean = accepted_mean;
    stats.accepted_stddev = accepted_stddev;
    if accepted_mean < keys_sanity_min as f64 {
        debug!(
            "accepted mean {accepted_mean:.0} below sanity minimum {keys_sanity_min}, data broken"
        );
        return invalid("broken_data");
    }

    let mut ranked = accepted;
    ranked.sort_unstable_by(|a, b| b.cmp(a));
    let anchor = if ranked.len() > 1 { ranked[1] } else { ranked[0] };
    let mut threshold = anchor - (keys_daily_jitter + accepted_stddev as i64);
    match params.threshold_override {
        Some(value) if value > 0 => threshold = value,
        _ => {}
    }
    stats.threshold = threshold;

    let mut ips: Vec<String> = full_ips
        .iter()
        .filter(|(_, count)| **count >= threshold)
        .map(|(ip, _)| ip.clone())
        .collect();
    if ips.is_empty() {
        return invalid("threshold_too_high");
    }

    stats.skipped_broken_version = skip_broken_version.len();
    stats.skipped_minimum_version = skip_minimum_version.len();
    stats.skipped_country = skip_country.len();
    stats.skipped_proxy = skip_proxy.len();

    let stages: [(&[String], String); 4] = [
        (
            &skip_broken_version,
            format!("No_servers_left_after_v{BROKEN_VERSION}_filter"),
        ),
        (
            &skip_minimum_version,
            match &params.minimum_version {
                Some(minimum) => {
                    format!("No_servers_left_after_minimum_version_filter_(v{minimum})")
                }
                None => "No_servers_left_after_minimum_version_filter".to_string(),
            },
        ),
        (
            &skip_country,
            match &params.countries {
                Some(countries) => format!("No_servers_left_after_country_filter_[{countries}]"),
                None => "No_servers_left_after_country_filter".to_string(),
            },
        ),
        (
            &skip_proxy,
            "No_servers_left_after_proxies_filter".to_string(),
        ),
    ];
    for (skip_list, reason) in stages {
        if skip_list.is_empty() {
            continue;
        }
        ips.retain(|ip| !skip_list.contains(ip));
        if ips.is_empty() {
            return invalid(reason);
        }
    }

    ips.sort();
    let count = ips.len();
    IpValidOutcome::Complete(Box::new(IpValidResult {
        ips,
        count,
        threshold,
        params,
        generated_at: Utc::now(),
        stats,
    }))
}
