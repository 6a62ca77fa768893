//! The mesh spider
//!
//! A run is: seed one hostname, let the coordinator fan out DNS and stats
//! fetches until the transitive closure is complete, then terminate and
//! hand the working state to the snapshot builder.
//!
//! Channel depths are bounded; producers block when full, which throttles
//! fan-out against coordinator throughput.

mod coordinator;
pub mod dns;
pub mod fetch;
pub mod parse;

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::info;
use trust_dns_resolver::TokioAsyncResolver;

use crate::config::SpiderConfig;
use crate::diagnostics::{DiagRequest, Diagnostics};

pub use coordinator::SpiderState;
pub use fetch::build_client;

const QUEUE_DEPTH: usize = 100;

/// Outstanding-work counter backing the quiescence signal
///
/// Increments must strictly precede the enqueue that could lead to the
/// matching decrement; see the coordinator for the full contract.
#[derive(Debug, Default)]
pub(crate) struct PendingCounter {
    count: AtomicI64,
    notify: Notify,
}

impl PendingCounter {
    pub(crate) fn add(&self, n: usize) {
        self.count.fetch_add(n as i64, Ordering::SeqCst);
    }

    pub(crate) fn done(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.notify.notify_waiters();
        }
    }

    pub(crate) fn current(&self) -> i64 {
        self.count.load(Ordering::SeqCst)
    }

    pub(crate) async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            if self.current() <= 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Handle to a live spider run
pub struct Spider {
    add_tx: mpsc::Sender<String>,
    batch_tx: mpsc::Sender<Vec<String>>,
    diag_tx: mpsc::Sender<DiagRequest>,
    terminate_tx: mpsc::Sender<()>,
    pending: Arc<PendingCounter>,
    handle: JoinHandle<SpiderState>,
}

impl Spider {
    /// Spawn the coordinator for a fresh run
    pub fn start(
        config: Arc<SpiderConfig>,
        resolver: Arc<TokioAsyncResolver>,
        client: reqwest::Client,
    ) -> Self {
        let (add_tx, add_rx) = mpsc::channel(QUEUE_DEPTH);
        let (batch_tx, batch_rx) = mpsc::channel(QUEUE_DEPTH);
        let (dns_tx, dns_rx) = mpsc::channel(QUEUE_DEPTH);
        let (host_tx, host_rx) = mpsc::channel(QUEUE_DEPTH);
        let (diag_tx, diag_rx) = mpsc::channel(QUEUE_DEPTH);
        let (terminate_tx, terminate_rx) = mpsc::channel(1);

        let pending = Arc::new(PendingCounter::default());
        let inner = coordinator::Coordinator {
            state: SpiderState::default(),
            config,
            resolver,
            client,
            pending: pending.clone(),
            add_tx: add_tx.clone(),
            batch_tx: batch_tx.clone(),
            dns_tx,
            host_tx,
        };
        let handle = tokio::spawn(coordinator::main_loop(
            inner,
            add_rx,
            batch_rx,
            dns_rx,
            host_rx,
            diag_rx,
            terminate_rx,
        ));

        Self {
            add_tx,
            batch_tx,
            diag_tx,
            terminate_tx,
            pending,
            handle,
        }
    }

    /// Enqueue one hostname; the counter is bumped here, before the send
    pub async fn add_host(&self, hostname: &str) {
        self.pending.add(1);
        let _ = self.add_tx.send(hostname.to_lowercase()).await;
    }

    /// Enqueue a list of hostnames, counter bumped by the full length first
    pub async fn batch_add_host(&self, hostnames: Vec<String>) {
        if hostnames.is_empty() {
            return;
        }
        self.pending.add(hostnames.len());
        let lowered = hostnames.into_iter().map(|h| h.to_lowercase()).collect();
        let _ = self.batch_tx.send(lowered).await;
    }

    /// Block until the pending counter reaches zero
    ///
    /// Call only after the initial `add_host`, or this returns at once.
    pub async fn wait(&self) {
        self.pending.wait().await;
    }

    /// Sender the diagnostics hub installs for the duration of this run
    pub fn diag_sender(&self) -> mpsc::Sender<DiagRequest> {
        self.diag_tx.clone()
    }

    /// Signal termination and collect the terminal state
    pub async fn terminate(self) -> anyhow::Result<SpiderState> {
        let _ = self.terminate_tx.send(()).await;
        Ok(self.handle.await?)
    }
}

/// One complete spider pass from the configured seed
pub async fn run_spider(
    config: Arc<SpiderConfig>,
    resolver: Arc<TokioAsyncResolver>,
    client: reqwest::Client,
    diagnostics: &Diagnostics,
) -> anyhow::Result<SpiderState> {
    let seed = config.seed_host.clone();
    info!("spider pass starting from {seed}");

    let spider = Spider::start(config, resolver, client);
    diagnostics.install(spider.diag_sender()).await;
    spider.add_host(&seed).await;
    spider.wait().await;
    let state = spider.terminate().await;
    diagnostics.clear().await;

    let state = state?;
    info!(
        "spider pass complete: {} hosts fetched, {} names known, {} query errors",
        state.server_infos.values().filter(|n| n.is_some()).count(),
        state.known_hosts.len(),
        state.query_errors.len()
    );
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pending_counter_wait() {
        let counter = Arc::new(PendingCounter::default());
        counter.add(2);

        let waiter = {
            let counter = counter.clone();
            tokio::spawn(async move { counter.wait().await })
        };

        counter.done();
        assert!(!waiter.is_finished());
        counter.done();
        waiter.await.unwrap();
        assert_eq!(counter.current(), 0);
    }

    #[tokio::test]
    async fn test_spider_quiesces_on_unresolvable_seed() {
        // ".local" names are skip-filtered before any DNS work, so the run
        // quiesces without touching the network
        let config = Arc::new(SpiderConfig::default());
        let resolver = dns::build_resolver();
        let client = build_client(&config).unwrap();

        let spider = Spider::start(config, resolver, client);
        spider.add_host("seed.local").await;
        spider.wait().await;
        let state = spider.terminate().await.unwrap();
        assert!(state.server_infos.is_empty());
    }

    #[tokio::test]
    async fn test_batch_add_skip_filters_quiesce() {
        let config = Arc::new(SpiderConfig::default());
        let resolver = dns::build_resolver();
        let client = build_client(&config).unwrap();

        let spider = Spider::start(config, resolver, client);
        spider
            .batch_add_host(vec![
                "unqualified".to_string(),
                "192.0.2.9".to_string(),
                "printer.local".to_string(),
            ])
            .await;
        spider.wait().await;
        let state = spider.terminate().await.unwrap();
        assert!(state.server_infos.is_empty());
    }
}
