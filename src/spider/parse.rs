//! Stats-page analysis
//!
//! A server's stats body is either JSON (newer software, preferred) or the
//! classic HTML page with tables introduced by text headings. Analysis
//! never fails the fetch: whatever could be extracted stays on the node and
//! problems land in `analyze_error`.

use std::collections::BTreeMap;

use scraper::{ElementRef, Html, Selector};
use serde_json::Value;

use crate::types::SksNode;

/// Analyze a fetched stats body into the node
///
/// Non-2xx responses set keycount to -2 and an analyze error without
/// looking at the body.
pub fn analyze(node: &mut SksNode, body: &str) {
    if !node.fetch_ok() {
        node.keycount = -2;
        node.analyze_error = Some(format!("HTTP GET failure: {}", node.status));
        return;
    }

    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(obj)) => analyze_json(node, &obj),
        _ => analyze_html(node, body),
    }

    node.version = node.settings.get("Version").cloned().unwrap_or_default();
    node.software = node.settings.get("Software").cloned().unwrap_or_default();
}

/// Uppercase the first character, as the JSON stats keys are lowercased
/// versions of the HTML settings labels
fn title_case(key: &str) -> String {
    let mut chars = key.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

fn analyze_json(node: &mut SksNode, obj: &serde_json::Map<String, Value>) {
    for (key, value) in obj {
        let rendered = match value {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => continue,
        };
        node.settings.insert(title_case(key), rendered);
    }

    if let Some(Value::Array(peers)) = obj.get("peers") {
        for peer in peers {
            let recon = match peer.get("reconAddr").and_then(Value::as_str) {
                Some(recon) => recon,
                None => continue,
            };
            let mut fields = recon
                .split(|c: char| c.is_whitespace() || c == ':')
                .filter(|field| !field.is_empty());
            let peer_host = match fields.next() {
                Some(host) => host.to_string(),
                None => continue,
            };
            let port = fields.next().unwrap_or_default().to_string();
            node.gossip_peer_list.push(peer_host.clone());
            node.gossip_peers.insert(peer_host, port);
        }
    }

    let count = node
        .settings
        .get("Numkeys")
        .or_else(|| node.settings.get("Total"));
    if let Some(count) = count {
        node.keycount = parse_keycount(count);
    }
}

fn parse_keycount(text: &str) -> i64 {
    // JSON numbers may render fractionally; take the integer part
    match text.split('.').next().unwrap_or(text).parse() {
        Ok(count) => count,
        Err(_) => -1,
    }
}

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("static selector")
}

/// Find the first `<table>` sibling after the element whose text equals
/// `search`
fn table_following<'a>(doc: &'a Html, search: &str) -> Option<ElementRef<'a>> {
    for el in doc.root_element().descendants().filter_map(ElementRef::wrap) {
        if el.value().name() == "table" {
            continue;
        }
        let text: String = el.text().collect();
        if text.trim() != search {
            continue;
        }
        for sibling in el.next_siblings() {
            if let Some(sib) = ElementRef::wrap(sibling) {
                if sib.value().name() == "table" {
                    return Some(sib);
                }
            }
        }
    }
    None
}

/// All `<td>` texts of the table following `search`, trimmed
fn plain_rows_of(doc: &Html, search: &str) -> Option<Vec<String>> {
    let table = table_following(doc, search)?;
    let td = selector("td");
    Some(
        table
            .select(&td)
            .map(|cell| cell.text().collect::<String>().trim().to_string())
            .collect(),
    )
}

/// Key-value map from the two-column table following `search`
fn kvdict_from_table(doc: &Html, search: &str) -> Option<BTreeMap<String, String>> {
    let table = table_following(doc, search)?;
    let tr = selector("tr");
    let td = selector("td");
    let mut dict = BTreeMap::new();
    for row in table.select(&tr) {
        let columns: Vec<ElementRef> = row.select(&td).collect();
        if columns.len() < 2 {
            continue;
        }
        let key = columns[0].text().collect::<String>();
        let value = columns[1].text().collect::<String>();
        dict.insert(
            key.trim().trim_end_matches(':').to_string(),
            value.trim().to_string(),
        );
    }
    Some(dict)
}

/// Keycount from the text following the `<h2>Statistics</h2>` heading
fn statistics_keycount(doc: &Html) -> Option<i64> {
    let h2 = selector("h2");
    for heading in doc.select(&h2) {
        if heading.text().collect::<String>().trim() != "Statistics" {
            continue;
        }
        for sibling in heading.next_siblings() {
            let text = match ElementRef::wrap(sibling) {
                Some(el) => el.text().collect::<String>(),
                None => sibling
                    .value()
                    .as_text()
                    .map(|t| t.to_string())
                    .unwrap_or_default(),
            };
            let text = text.trim();
            if text.is_empty() {
                continue;
            }
            if let Some(rest) = text.strip_prefix("Total number of keys") {
                let count = rest.split_once(':').map(|(_, v)| v.trim()).unwrap_or("");
                return Some(parse_keycount(count));
            }
            break;
        }
    }
    None
}

fn analyze_html(node: &mut SksNode, body: &str) {
    let doc = Html::parse_document(body);

    if let Some(mailsync) = plain_rows_of(&doc, "Outgoing Mailsync Peers") {
        node.mailsync_peers = mailsync;
    }
    if let Some(settings) = kvdict_from_table(&doc, "Settings") {
        node.settings = settings;
    }
    if let Some(keycount) = statistics_keycount(&doc) {
        node.keycount = keycount;
    }

    if let Some(rows) = plain_rows_of(&doc, "Gossip Peers") {
        for row in rows {
            let mut fields = row.split_whitespace();
            let peer = match fields.next() {
                Some(peer) => peer.to_string(),
                None => continue,
            };
            // Trailing tokens beyond the first are discarded
            let value = fields.next().unwrap_or_default().to_string();
            node.gossip_peer_list.push(peer.clone());
            node.gossip_peers.insert(peer, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HTML_STATS: &str = r#"<!DOCTYPE html>
<html><head><title>SKS OpenPGP Keyserver statistics</title></head><body>
<h2>Settings</h2>
<table summary="Keyserver Settings">
<tr><td>Hostname:</td><td>keys.example.org</td></tr>
<tr><td>Nodename:</td><td>ks-node-1</td></tr>
<tr><td>Version:</td><td>1.1.6</td></tr>
<tr><td>Software:</td><td>SKS</td></tr>
<tr><td>Server contact:</td><td>0xDECAFBAD</td></tr>
</table>
<h2>Gossip Peers</h2>
<table summary="Gossip Peers">
<tr><td>peer-a.example.net 11370</td></tr>
<tr><td>peer-b.example.de 11370 11371</td></tr>
</table>
<h2>Outgoing Mailsync Peers</h2>
<table summary="Mailsync">
<tr><td>pks-control@mail.example.org</td></tr>
</table>
<h2>Statistics</h2>
<p>Total number of keys: 4216830</p>
</body></html>"#;

    fn analyzed(body: &str) -> SksNode {
        let mut node = SksNode::new("keys.example.org", 11371);
        node.status = "200 OK".to_string();
        analyze(&mut node, body);
        node
    }

    #[test]
    fn test_html_settings_and_peers() {
        let node = analyzed(HTML_STATS);
        assert_eq!(node.settings["Hostname"], "keys.example.org");
        assert_eq!(node.settings["Nodename"], "ks-node-1");
        assert_eq!(node.version, "1.1.6");
        assert_eq!(node.software, "SKS");
        assert_eq!(
            node.gossip_peer_list,
            vec!["peer-a.example.net", "peer-b.example.de"]
        );
        assert_eq!(node.gossip_peers["peer-a.example.net"], "11370");
        assert_eq!(node.gossip_peers["peer-b.example.de"], "11370");
        assert_eq!(node.mailsync_peers, vec!["pks-control@mail.example.org"]);
        assert_eq!(node.keycount, 4_216_830);
        assert!(node.analyze_error.is_none());
    }

    #[test]
    fn test_html_bad_keycount_is_minus_one() {
        let body = HTML_STATS.replace("4216830", "not-a-number");
        let node = analyzed(&body);
        assert_eq!(node.keycount, -1);
    }

    #[test]
    fn test_json_variant() {
        let body = r#"{
            "hostname": "keys.example.org",
            "nodename": "ks-node-1",
            "software": "Hockeypuck",
            "version": "2.1.0",
            "numkeys": 4216830,
            "peers": [
                {"reconAddr": "peer-a.example.net:11370"},
                {"reconAddr": "peer-b.example.de 11370"},
                {"reconAddr": ""}
            ]
        }"#;
        let node = analyzed(body);
        assert_eq!(node.settings["Hostname"], "keys.example.org");
        assert_eq!(node.software, "Hockeypuck");
        assert_eq!(node.version, "2.1.0");
        assert_eq!(node.keycount, 4_216_830);
        assert_eq!(
            node.gossip_peer_list,
            vec!["peer-a.example.net", "peer-b.example.de"]
        );
        assert_eq!(node.gossip_peers["peer-a.example.net"], "11370");
    }

    #[test]
    fn test_json_total_fallback() {
        let body = r#"{"Total": 1234, "version": "1.1.5"}"#;
        let node = analyzed(body);
        assert_eq!(node.keycount, 1234);
    }

    #[test]
    fn test_non_2xx_short_circuits() {
        let mut node = SksNode::new("keys.example.org", 11371);
        node.status = "503 Service Unavailable".to_string();
        analyze(&mut node, HTML_STATS);
        assert_eq!(node.keycount, -2);
        let err = node.analyze_error.as_deref().unwrap_or_default();
        assert!(err.contains("HTTP GET failure"), "got: {err}");
        assert!(node.settings.is_empty());
    }

    #[test]
    fn test_garbage_body_yields_empty_node() {
        let node = analyzed("<<<< not really html and not json");
        assert!(node.gossip_peer_list.is_empty());
        assert!(node.settings.is_empty());
        assert_eq!(node.keycount, 0);
    }
}
