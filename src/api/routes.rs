//! Router and machine-readable endpoints

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{header, StatusCode, Uri};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::countries::CountrySet;
use crate::ipvalid::{select_valid_ips, IpValidOutcome, IpValidParams, IpValidResult, ALGORITHM};
use crate::membership::membership_hosts;
use crate::snapshot;
use crate::versions::SksVersion;

use super::pages::bad_user;
use super::{graphdot, pages, ApiState, SERVE_PREFIX};

/// Run the HTTP frontend
pub async fn run_api_server(state: Arc<ApiState>) -> anyhow::Result<()> {
    let listen = state.config.listen.clone();

    let app = Router::new()
        .route(SERVE_PREFIX, get(pages::peers_page))
        .route(
            &format!("{SERVE_PREFIX}/peer-info"),
            get(pages::peer_info_page),
        )
        .route(&format!("{SERVE_PREFIX}/ip-valid"), get(ip_valid))
        .route(
            &format!("{SERVE_PREFIX}/ip-valid-stats"),
            get(ip_valid_stats),
        )
        .route(
            &format!("{SERVE_PREFIX}/hostnames-json"),
            get(hostnames_json),
        )
        .route(&format!("{SERVE_PREFIX}/graph-dot"), get(graphdot::graph_dot))
        .route("/helpz", get(helpz))
        .route("/internalz", get(internalz))
        .fallback(oops)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!("HTTP frontend listening on {listen}");
    let listener = tokio::net::TcpListener::bind(&listen).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// GET /helpz
async fn helpz() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; charset=UTF-8")],
        format!(
            "Pages under {SERVE_PREFIX}: (none), peer-info, ip-valid, ip-valid-stats, hostnames-json, graph-dot\n"
        ),
    )
}

/// GET /internalz - coordinator diagnostics
async fn internalz(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; charset=UTF-8")],
        state.diagnostics.dump().await,
    )
}

/// Anything unrouted: the root gets a shrug, the rest a 404
async fn oops(uri: Uri) -> impl IntoResponse {
    if uri.path().len() > 1 {
        return (StatusCode::NOT_FOUND, "404 page not found\n");
    }
    (
        StatusCode::OK,
        "You shouldn't see this top level.  Err, oops?\n",
    )
}

/// GET /sks-peers/hostnames-json
///
/// Membership-file hosts by default; the full current mesh with `all` or
/// `mesh`.
async fn hostnames_json(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<HashMap<String, String>>,
) -> axum::response::Response {
    let all = params.contains_key("all") || params.contains_key("mesh");

    let host_list: Vec<String> = if all {
        match snapshot::current(&state.snapshot).await {
            Some(info) => info.host_map.keys().cloned().collect(),
            None => {
                warn!("request for current hosts, none loaded yet");
                return (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Still waiting for data collection\n",
                )
                    .into_response();
            }
        }
    } else {
        match membership_hosts(&state.config.membership_file) {
            Ok(hosts) => hosts,
            Err(err) => {
                warn!("failed to load membership: {err}");
                return (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Problem loading membership file\n",
                )
                    .into_response();
            }
        }
    };

    let content_type = if params.contains_key("textplain") {
        "text/plain; charset=UTF-8"
    } else {
        "application/json"
    };
    let body = match serde_json::to_string(&serde_json::json!({ "hostnames": host_list })) {
        Ok(body) => body + "\n",
        Err(err) => {
            warn!("failed to marshal hostlist to JSON: {err}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "JSON encoding glitch\n")
                .into_response();
        }
    };
    ([(header::CONTENT_TYPE, content_type)], body).into_response()
}

enum ParsedParams {
    Ok(IpValidParams),
    Bad(String),
}

fn parse_ip_valid_params(params: &HashMap<String, String>) -> ParsedParams {
    let mut parsed = IpValidParams {
        proxies_required: params.contains_key("proxies"),
        ..IpValidParams::default()
    };
    if let Some(spec) = params.get("countries") {
        let set = CountrySet::new(spec);
        if set.is_empty() {
            return ParsedParams::Bad(format!("unusable countries list: {spec:?}"));
        }
        parsed.countries = Some(set);
    }
    if let Some(spec) = params.get("minimum_version") {
        match SksVersion::parse(spec) {
            Some(version) => parsed.minimum_version = Some(version),
            None => return ParsedParams::Bad(format!("unparseable minimum_version: {spec:?}")),
        }
    }
    if let Some(spec) = params.get("threshold") {
        match spec.parse::<i64>() {
            // Non-positive overrides are ignored, not an error
            Ok(value) => parsed.threshold_override = Some(value),
            Err(_) => return ParsedParams::Bad(format!("unparseable threshold: {spec:?}")),
        }
    }
    ParsedParams::Ok(parsed)
}

fn plaintext_complete(result: &IpValidResult, with_stats: bool) -> String {
    let mut header = format!(
        "IP-Gen/1.1: status=COMPLETE count={} threshold={} algorithm={ALGORITHM}",
        result.count, result.threshold
    );
    if let Some(minimum) = &result.params.minimum_version {
        let _ = write!(header, " minimum_version={minimum}");
    }
    if let Some(countries) = &result.params.countries {
        let _ = write!(header, " countries={countries}");
    }
    if result.params.proxies_required {
        header.push_str(" proxies=true");
    }
    let _ = write!(
        header,
        " generated={}",
        result.generated_at.format("%Y-%m-%dT%H:%M:%SZ")
    );
    let mut out = header;
    out.push('\n');
    for ip in &result.ips {
        out.push_str(ip);
        out.push('\n');
    }
    if with_stats {
        let _ = writeln!(
            out,
            "# stats: {}",
            serde_json::to_string(&result.stats).unwrap_or_default()
        );
    }
    out.push_str(".\n");
    out
}

fn plaintext_invalid(reason: &str) -> String {
    format!("IP-Gen/1.1: status=INVALID reason={reason} algorithm={ALGORITHM}\n.\n")
}

fn render_ip_valid(outcome: IpValidOutcome, as_json: bool, with_stats: bool) -> axum::response::Response {
    match outcome {
        IpValidOutcome::Complete(result) => {
            if as_json {
                let mut body = serde_json::json!({
                    "status": "COMPLETE",
                    "ips": result.ips,
                    "count": result.count,
                    "threshold": result.threshold,
                    "algorithm": ALGORITHM,
                    "generated": result.generated_at.to_rfc3339(),
                });
                if with_stats {
                    body["stats"] = serde_json::to_value(&result.stats)
                        .unwrap_or(serde_json::Value::Null);
                }
                Json(body).into_response()
            } else {
                (
                    [(header::CONTENT_TYPE, "text/plain; charset=UTF-8")],
                    plaintext_complete(&result, with_stats),
                )
                    .into_response()
            }
        }
        IpValidOutcome::Invalid { reason } => {
            if as_json {
                Json(serde_json::json!({
                    "status": "INVALID",
                    "reason": reason,
                    "algorithm": ALGORITHM,
                }))
                .into_response()
            } else {
                (
                    [(header::CONTENT_TYPE, "text/plain; charset=UTF-8")],
                    plaintext_invalid(&reason),
                )
                    .into_response()
            }
        }
    }
}

/// GET /sks-peers/ip-valid - the healthy-server IP feed
async fn ip_valid(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<HashMap<String, String>>,
) -> axum::response::Response {
    let as_json = params.contains_key("json");
    let with_stats = params.contains_key("stats");
    let parsed = match parse_ip_valid_params(&params) {
        ParsedParams::Ok(parsed) => parsed,
        ParsedParams::Bad(error) => {
            return bad_user(&state.config.maintainer_email, "Bad request", &error)
                .into_response()
        }
    };

    let outcome = match snapshot::current(&state.snapshot).await {
        Some(info) => select_valid_ips(
            info.as_ref(),
            parsed,
            state.config.keys_sanity_min,
            state.config.keys_daily_jitter,
        ),
        None => IpValidOutcome::Invalid {
            reason: "first_scan".to_string(),
        },
    };
    render_ip_valid(outcome, as_json, with_stats)
}

/// GET /sks-peers/ip-valid-stats - distribution details as JSON
async fn ip_valid_stats(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<HashMap<String, String>>,
) -> axum::response::Response {
    let parsed = match parse_ip_valid_params(&params) {
        ParsedParams::Ok(parsed) => parsed,
        ParsedParams::Bad(error) => {
            return bad_user(&state.config.maintainer_email, "Bad request", &error)
                .into_response()
        }
    };
    let outcome = match snapshot::current(&state.snapshot).await {
        Some(info) => select_valid_ips(
            info.as_ref(),
            parsed,
            state.config.keys_sanity_min,
            state.config.keys_daily_jitter,
        ),
        None => IpValidOutcome::Invalid {
            reason: "first_scan".to_string(),
        },
    };
    match outcome {
        IpValidOutcome::Complete(result) => Json(serde_json::json!({
            "status": "COMPLETE",
            "stats": result.stats,
            "threshold": result.threshold,
            "count": result.count,
            "algorithm": ALGORITHM,
        }))
        .into_response(),
        IpValidOutcome::Invalid { reason } => Json(serde_json::json!({
            "status": "INVALID",
            "reason": reason,
            "algorithm": ALGORITHM,
        }))
        .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipvalid::IpValidStats;
    use chrono::TimeZone;

    #[test]
    fn test_parse_ip_valid_params() {
        let mut params = HashMap::new();
        params.insert("proxies".to_string(), String::new());
        params.insert("countries".to_string(), "us,nl".to_string());
        params.insert("minimum_version".to_string(), "1.1.6".to_string());
        params.insert("threshold".to_string(), "-5".to_string());

        let parsed = match parse_ip_valid_params(&params) {
            ParsedParams::Ok(parsed) => parsed,
            ParsedParams::Bad(error) => panic!("unexpected parse failure: {error}"),
        };
        assert!(parsed.proxies_required);
        assert_eq!(parsed.countries.as_ref().map(|c| c.to_string()).as_deref(), Some("NL,US"));
        assert_eq!(parsed.minimum_version.as_ref().map(|v| v.to_string()).as_deref(), Some("1.1.6"));
        assert_eq!(parsed.threshold_override, Some(-5));

        params.insert("minimum_version".to_string(), "banana".to_string());
        assert!(matches!(
            parse_ip_valid_params(&params),
            ParsedParams::Bad(_)
        ));
    }

    #[test]
    fn test_plaintext_record_shape() {
        let result = IpValidResult {
            ips: vec!["192.0.200.1".to_string(), "192.0.200.2".to_string()],
            count: 2,
            threshold: 4_200_000,
            params: IpValidParams::default(),
            generated_at: chrono::Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            stats: IpValidStats::default(),
        };
        let body = plaintext_complete(&result, false);
        let lines: Vec<&str> = body.lines().collect();
        assert!(lines[0].starts_with("IP-Gen/1.1: status=COMPLETE count=2 threshold=4200000"));
        assert_eq!(lines[1], "192.0.200.1");
        assert_eq!(lines[2], "192.0.200.2");
        assert_eq!(lines[3], ".");

        assert_eq!(
            plaintext_invalid("broken_data"),
            "IP-Gen/1.1: status=INVALID reason=broken_data algorithm=alg_5\n.\n"
        );
    }
}
