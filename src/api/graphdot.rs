//! Graphviz export of the mesh
//!
//! One-shot download of `digraph sks { ... }`. Mutual links are coalesced
//! into a single `dir=both` edge.

use std::fmt::Write as _;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use chrono::Utc;

use crate::snapshot::{self, PersistedHostInfo};

use super::ApiState;

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

fn node_attributes(info: &PersistedHostInfo, hostname: &str) -> String {
    let node = match info.host_map.get(hostname) {
        Some(node) => node,
        None => return String::new(),
    };
    let mut attributes = vec![format!("depth={}", node.distance)];
    match &node.analyze_error {
        Some(error) => attributes.push(format!("error={}", quote(error))),
        None => {
            attributes.push(format!("software={}", quote(&node.software)));
            attributes.push(format!("version={}", quote(&node.version)));
            attributes.push(format!("keycount={}", node.keycount));
        }
    }
    for (n, ip) in node.ip_list.iter().enumerate() {
        attributes.push(format!("ip{n}={}", quote(ip)));
    }
    attributes.join(", ")
}

/// Render the whole mesh as a Graphviz digraph
pub fn render_dot(info: &PersistedHostInfo) -> String {
    let mut out = String::with_capacity(64 * 1024);
    out.push_str("digraph sks {\n");
    for hostname in &info.sorted {
        let _ = writeln!(
            out,
            "\t{} [{}];",
            quote(hostname),
            node_attributes(info, hostname)
        );
    }
    for hostname in &info.sorted {
        for peer in info.graph.outbound(hostname) {
            let mutual = info.graph.exists_link(peer, hostname);
            if mutual {
                // Emit each mutual pair once
                if hostname.as_str() < peer {
                    let _ = writeln!(
                        out,
                        "\t{} -> {} [dir=both];",
                        quote(hostname),
                        quote(peer)
                    );
                }
            } else {
                let _ = writeln!(out, "\t{} -> {};", quote(hostname), quote(peer));
            }
        }
    }
    out.push_str("}\n");
    out
}

/// GET /sks-peers/graph-dot
pub async fn graph_dot(State(state): State<Arc<ApiState>>) -> axum::response::Response {
    let info = match snapshot::current(&state.snapshot).await {
        Some(info) => info,
        None => {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                "Still awaiting data collection\n",
            )
                .into_response()
        }
    };
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let filename = format!("sks-peers-{timestamp}Z.dot");
    (
        StatusCode::OK,
        [
            (
                header::CONTENT_TYPE,
                "text/x-graphviz; charset=UTF-8".to_string(),
            ),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        render_dot(info.as_ref()),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{generate_from_loaded, HostMap};
    use crate::types::SksNode;

    #[test]
    fn test_render_dot_coalesces_mutual_edges() {
        let mut map = HostMap::new();
        let mut a = SksNode::new("a.example.org", 11371);
        a.status = "200 OK".to_string();
        a.gossip_peer_list = vec!["b.example.org".to_string(), "c.example.org".to_string()];
        let mut b = SksNode::new("b.example.org", 11371);
        b.status = "200 OK".to_string();
        b.gossip_peer_list = vec!["a.example.org".to_string()];
        map.insert("a.example.org".to_string(), a);
        map.insert("b.example.org".to_string(), b);
        let info = generate_from_loaded(map, "a.example.org");

        let dot = render_dot(&info);
        assert!(dot.starts_with("digraph sks {"));
        assert!(dot.contains("\"a.example.org\" -> \"b.example.org\" [dir=both];"));
        assert!(!dot.contains("\"b.example.org\" -> \"a.example.org\""));
        assert!(dot.contains("\"a.example.org\" -> \"c.example.org\";"));
        assert!(dot.contains("depth=0"));
    }
}
