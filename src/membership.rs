//! SKS membership file reader
//!
//! Newline-delimited; `#` starts a comment; an active line is
//! `hostname port [port...]` and only the hostname is kept.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

fn line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([A-Za-z0-9]\S+)\s+\d").expect("membership regex"))
}

/// Hostnames listed in a membership file
pub fn membership_hosts(path: &Path) -> anyhow::Result<Vec<String>> {
    let content = std::fs::read_to_string(path)?;
    let mut hosts = Vec::with_capacity(100);
    for line in content.lines() {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(caps) = line_regex().captures(line) {
            hosts.push(caps[1].to_string());
        }
    }
    Ok(hosts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_membership_parse() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# comment line").unwrap();
        writeln!(file, "keys.example.org 11370 11371").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "other.example.net\t11370").unwrap();
        writeln!(file, "-leading.example.org 11370").unwrap();
        writeln!(file, "noports.example.org").unwrap();
        file.flush().unwrap();

        let hosts = membership_hosts(file.path()).unwrap();
        assert_eq!(hosts, vec!["keys.example.org", "other.example.net"]);
    }

    #[test]
    fn test_membership_missing_file() {
        assert!(membership_hosts(Path::new("/nonexistent/membership")).is_err());
    }
}
