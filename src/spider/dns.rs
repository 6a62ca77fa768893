//! DNS worker
//!
//! One task per hostname: forward-resolve, send exactly one [`DnsResult`].
//! Workers share nothing but the result channel; the platform resolver's
//! own timeouts bound each lookup.

use std::sync::Arc;

use tokio::sync::mpsc;
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::TokioAsyncResolver;

use crate::types::DnsResult;

/// Shared resolver, from system configuration where possible
pub fn build_resolver() -> Arc<TokioAsyncResolver> {
    let resolver = TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|_| {
        TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default())
    });
    Arc::new(resolver)
}

/// Resolve one hostname, reporting on the DNS-result channel
pub async fn resolve_host(
    hostname: String,
    resolver: Arc<TokioAsyncResolver>,
    results: mpsc::Sender<DnsResult>,
) {
    let result = match resolver.lookup_ip(hostname.as_str()).await {
        Ok(lookup) => DnsResult {
            hostname,
            ip_list: lookup.iter().map(|ip| ip.to_string()).collect(),
            error: None,
        },
        Err(err) => DnsResult {
            hostname,
            ip_list: Vec::new(),
            error: Some(err.to_string()),
        },
    };
    let _ = results.send(result).await;
}
