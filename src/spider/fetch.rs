//! Stats fetch worker
//!
//! One task per host: GET the stats URL, record transport details, run the
//! analyzer, send exactly one [`HostResult`]. Analysis runs inside a panic
//! guard; the HTML on some servers has crashed parsers before, and one bad
//! server must not stop a run.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::debug;

use crate::config::SpiderConfig;
use crate::types::{HostResult, SksNode, SpiderError, SPIDER_USER_AGENT};

use super::parse::analyze;

/// Slack added to the configured stats timeout for the total deadline
const FETCH_GRACE_SECS: u64 = 10;

/// Build the HTTP client used by all fetch workers of a run
///
/// Keep-alives are off: every host is queried exactly once.
pub fn build_client(config: &SpiderConfig) -> anyhow::Result<reqwest::Client> {
    let total = config
        .http_fetch_timeout_secs
        .unwrap_or(config.stats_fetch_timeout_secs + FETCH_GRACE_SECS);
    let client = reqwest::Client::builder()
        .user_agent(SPIDER_USER_AGENT)
        .connect_timeout(Duration::from_secs(config.stats_fetch_timeout_secs))
        .timeout(Duration::from_secs(total))
        .pool_max_idle_per_host(0)
        .build()?;
    Ok(client)
}

async fn fetch(client: &reqwest::Client, node: &mut SksNode) -> Result<String, SpiderError> {
    let url = node.stats_url();
    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|err| SpiderError::Transport(err.to_string()))?;

    node.status = response.status().to_string();
    debug!("[{}] response status: {}", node.hostname, node.status);
    for (header, slot) in [
        (reqwest::header::SERVER, &mut node.server_header),
        (reqwest::header::VIA, &mut node.via_header),
    ] {
        if let Some(value) = response.headers().get(header) {
            *slot = String::from_utf8_lossy(value.as_bytes()).into_owned();
        }
    }

    response
        .text()
        .await
        .map_err(|err| SpiderError::Transport(err.to_string()))
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Fetch and analyze one host, reporting on the host-result channel
pub async fn query_host(
    hostname: String,
    port: u16,
    client: reqwest::Client,
    results: mpsc::Sender<HostResult>,
) {
    let mut node = SksNode::new(hostname.clone(), port);

    let body = match fetch(&client, &mut node).await {
        Ok(body) => body,
        Err(err) => {
            let _ = results
                .send(HostResult {
                    hostname,
                    node: None,
                    error: Some(err),
                })
                .await;
            return;
        }
    };

    let result = match catch_unwind(AssertUnwindSafe(|| {
        let mut analyzed = node.clone();
        analyze(&mut analyzed, &body);
        analyzed
    })) {
        Ok(analyzed) => HostResult {
            hostname,
            node: Some(Box::new(analyzed)),
            error: None,
        },
        Err(payload) => {
            let message = format!("analyze panic: {}", panic_message(payload));
            node.analyze_error = Some(message.clone());
            HostResult {
                hostname,
                node: Some(Box::new(node)),
                error: Some(SpiderError::Analyze(message)),
            }
        }
    };
    let _ = results.send(result).await;
}
