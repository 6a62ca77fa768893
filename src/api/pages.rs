//! Operator-facing HTML pages
//!
//! Straight string templates, the way the stats pages themselves are
//! built; the UI is two pages and does not warrant a template engine.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse};

use crate::snapshot::{self, PersistedHostInfo};
use crate::types::{node_url, SksNode};

use super::{ApiState, SERVE_PREFIX};

/// Minimal entity escaping for text interpolated into HTML
pub fn html_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

fn page_head(title: &str, maintainer: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
 <head>
  <meta charset="UTF-8">
  <link rev="made" href="mailto:{maintainer}">
  <title>{title}</title>
 </head>
 <body>
  <h1>{title}</h1>
"#,
        maintainer = html_escape(maintainer),
        title = html_escape(title),
    )
}

/// Error page for bad requests
pub fn bad_user(maintainer: &str, summary: &str, error: &str) -> impl IntoResponse {
    let mut page = page_head(summary, maintainer);
    page.push_str(&format!(
        "  <div class=\"usererror\">{}</div>\n </body>\n</html>\n",
        html_escape(error)
    ));
    (StatusCode::BAD_REQUEST, Html(page))
}

fn still_waiting() -> axum::response::Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        "Still waiting for data collection\n",
    )
        .into_response()
}

fn host_row(
    info: &PersistedHostInfo,
    seed: &str,
    hostname: &str,
    node: &SksNode,
    default_port: u16,
) -> String {
    let info_page = format!(
        "{SERVE_PREFIX}/peer-info?peer={}",
        html_escape(hostname)
    );
    if let Some(error) = &node.analyze_error {
        return format!(
            r#"   <tr class="peer host failure">
    <td class="hostname">{hostname}</td>
    <td class="morelink"><a href="{info_page}">&dagger;</a></td>
    <td class="exception" colspan="5">Error: {error}</td>
    <td class="peer_distance">{distance}</td>
    <td colspan="2"></td>
   </tr>
"#,
            hostname = html_escape(hostname),
            error = html_escape(error),
            distance = node.distance,
        );
    }

    let rowspan = if node.ip_list.len() > 1 {
        format!(" rowspan=\"{}\"", node.ip_list.len())
    } else {
        String::new()
    };
    let geo_of = |ip: &str| {
        info.ip_country
            .get(ip)
            .cloned()
            .unwrap_or_else(|| "??".to_string())
    };
    let first_ip = node.ip_list.first().map(String::as_str).unwrap_or("");
    let aliases_text = if node.aliases.is_empty() {
        String::new()
    } else {
        format!(" (aka: {})", html_escape(&node.aliases.join(", ")))
    };

    let mut row = format!(
        r#"   <tr class="peer host">
    <td class="hostname"{rowspan}><a href="{stats}">{hostname}</a>{aliases_text}</td>
    <td class="morelink"{rowspan}><a href="{info_page}">&dagger;</a></td>
    <td class="ipaddr">{ip}</td>
    <td class="location">{geo}</td>
    <td class="mutual"{rowspan}>{mutual}</td>
    <td class="version"{rowspan}>{version}</td>
    <td class="keys"{rowspan}>{keycount}</td>
    <td class="peer_distance"{rowspan}>{distance}</td>
    <td class="web_server"{rowspan}>{server}</td>
    <td class="via_proxy"{rowspan}>{via}</td>
   </tr>
"#,
        stats = html_escape(&node_url(hostname, Some(node), default_port)),
        hostname = html_escape(hostname),
        ip = html_escape(first_ip),
        geo = html_escape(&geo_of(first_ip)),
        mutual = info.graph.label_mutual_with_base(hostname, seed),
        version = html_escape(&node.version),
        keycount = node.keycount,
        distance = node.distance,
        server = html_escape(&node.server_header),
        via = html_escape(&node.via_header),
    );
    for ip in node.ip_list.iter().skip(1) {
        row.push_str(&format!(
            r#"   <tr class="peer more">
    <td class="ipaddr">{ip}</td><td class="location">{geo}</td>
   </tr>
"#,
            ip = html_escape(ip),
            geo = html_escape(&geo_of(ip)),
        ));
    }
    row
}

/// GET /sks-peers - mesh summary in depth order
pub async fn peers_page(State(state): State<Arc<ApiState>>) -> axum::response::Response {
    let info = match snapshot::current(&state.snapshot).await {
        Some(info) => info,
        None => return still_waiting(),
    };
    let config = &state.config;
    let seed = &config.seed_host;

    let mut page = page_head("SKS Peer Mesh", &config.maintainer_email);
    if state.scanning.load(Ordering::Relaxed) {
        page.push_str("  <div class=\"scanning\">Mesh scan in progress.</div>\n");
    }
    page.push_str(&format!(
        r#"  <div class="explain">
   Entries at depth 1 are direct peers of <span class="hostname">{seed}</span>.
   Others are seen by spidering the peers.
  </div>
  <table class="sks peertable">
   <thead><tr><th>Host</th><th>Info</th><th>IP</th><th>Geo</th><th>Mutual</th><th>Version</th><th>Keys</th><th>Distance</th><th>WebServer</th><th>Proxy/via</th></tr></thead>
   <tbody>
"#,
        seed = html_escape(seed),
    ));

    for hostname in &info.depth_sorted {
        if let Some(node) = info.host_map.get(hostname) {
            page.push_str(&host_row(
                info.as_ref(),
                seed,
                hostname,
                node,
                config.sks_port_hkp,
            ));
        }
    }

    let peer_count = info.graph.all_peers_of(seed).len();
    page.push_str(&format!(
        r#"   </tbody>
   <caption>SKS has {peer_count} peers of {mesh_count} visible</caption>
  </table>
  <div class="lastupdate">Last scan completed at: {timestamp}</div>
  <div class="servedby">Served by {served_by}</div>
 </body>
</html>
"#,
        mesh_count = info.host_map.len(),
        timestamp = info.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
        served_by = html_escape(&config.display_hostname),
    ));

    Html(page).into_response()
}

/// GET /sks-peers/peer-info?peer=<hostname> - one peer in detail
pub async fn peer_info_page(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<HashMap<String, String>>,
) -> axum::response::Response {
    let config = &state.config;
    let peer = match params.get("peer") {
        Some(peer) if !peer.is_empty() => peer.clone(),
        _ => {
            return bad_user(
                &config.maintainer_email,
                "Bad request",
                "need a peer=<hostname> parameter",
            )
            .into_response()
        }
    };
    let info = match snapshot::current(&state.snapshot).await {
        Some(info) => info,
        None => return still_waiting(),
    };

    let canonical = match info.aliases.get(&peer.to_lowercase()) {
        Some(canonical) => canonical.clone(),
        None => peer.to_lowercase(),
    };
    let node = match info.host_map.get(&canonical) {
        Some(node) => node,
        None => {
            return bad_user(
                &config.maintainer_email,
                "Unknown peer",
                &format!("no such peer in the current mesh: {peer}"),
            )
            .into_response()
        }
    };

    let title = format!("Peer stats {canonical}");
    let mut page = page_head(&title, &config.maintainer_email);
    page.push_str(&format!(
        r#"  <table class="peer_info">
   <tr><td>Name</td><td><a href="{stats}">{name}</a></td></tr>
   <tr><td>IPs</td><td>{ips}</td></tr>
   <tr><td>Software</td><td>{software}</td></tr>
   <tr><td>Software Version</td><td>{version}</td></tr>
   <tr><td>Web Server</td><td>{server}</td></tr>
   <tr><td>Proxy / via</td><td>{via}</td></tr>
   <tr><td>Key count</td><td>{keycount}</td></tr>
"#,
        stats = html_escape(&node_url(&canonical, Some(node), config.sks_port_hkp)),
        name = html_escape(&canonical),
        ips = html_escape(&node.ip_list.join(", ")),
        software = html_escape(&node.software),
        version = html_escape(&node.version),
        server = html_escape(&node.server_header),
        via = html_escape(&node.via_header),
        keycount = node.keycount,
    ));
    if node.mailsync_peers.is_empty() {
        page.push_str("   <tr><td>Mailsync</td><td><em>None</em></td></tr>\n");
    } else {
        for (n, target) in node.mailsync_peers.iter().enumerate() {
            let label = if n == 0 { "Mailsync" } else { "" };
            page.push_str(&format!(
                "   <tr><td>{label}</td><td>{}</td></tr>\n",
                html_escape(target)
            ));
        }
    }
    page.push_str("  </table>\n");

    if !node.settings.is_empty() {
        page.push_str("  <table class=\"settings\">\n   <caption>Settings</caption>\n");
        for (key, value) in &node.settings {
            page.push_str(&format!(
                "   <tr><td>{}</td><td>{}</td></tr>\n",
                html_escape(key),
                html_escape(value)
            ));
        }
        page.push_str("  </table>\n");
    }

    page.push_str(&format!(
        r#"  <table class="peers">
   <caption>Peers of <span class="hostname">{name}</span></caption>
   <tr><th>Name</th><th>Common</th><th>Outbound</th><th>Inbound</th></tr>
"#,
        name = html_escape(&canonical),
    ));
    for other in info.graph.all_peers_of(&canonical) {
        let out = info.graph.exists_link(&canonical, &other);
        let inbound = info.graph.exists_link(&other, &canonical);
        let mark = |yes: bool| if yes { "Yes" } else { "" };
        page.push_str(&format!(
            r#"   <tr><td><a href="{SERVE_PREFIX}/peer-info?peer={link}">{name}</a></td><td>{common}</td><td>{out}</td><td>{inbound}</td></tr>
"#,
            link = html_escape(&other),
            name = html_escape(&other),
            common = mark(out && inbound),
            out = mark(out),
            inbound = mark(inbound),
        ));
    }
    page.push_str("  </table>\n </body>\n</html>\n");

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/html; charset=UTF-8")],
        page,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_escape() {
        assert_eq!(
            html_escape(r#"<a b="c">&d</a>"#),
            "&lt;a b=&quot;c&quot;&gt;&amp;d&lt;/a&gt;"
        );
        assert_eq!(html_escape("plain.example.org"), "plain.example.org");
    }
}
