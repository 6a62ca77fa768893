//! SKS software version parsing and ordering
//!
//! Versions look like `1.1.6` with an optional trailing `+` marking a
//! patched build. A bare version is not at-least the `+` variant of the
//! same triple.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

fn version_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d+)\.(\d+)\.(\d+)(\+?)$").expect("version regex"))
}

/// A parsed SKS version string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SksVersion {
    pub major: u32,
    pub minor: u32,
    pub release: u32,
    pub tag: String,
}

impl SksVersion {
    /// Parse a version string; `None` when it does not look like a version
    pub fn parse(s: &str) -> Option<Self> {
        let caps = version_regex().captures(s)?;
        Some(Self {
            major: caps[1].parse().ok()?,
            minor: caps[2].parse().ok()?,
            release: caps[3].parse().ok()?,
            tag: caps[4].to_string(),
        })
    }

    /// Whether this version satisfies a minimum
    pub fn is_at_least(&self, min: &SksVersion) -> bool {
        if self.major != min.major {
            return self.major > min.major;
        }
        if self.minor != min.minor {
            return self.minor > min.minor;
        }
        if self.release != min.release {
            return self.release > min.release;
        }
        // Equal triples: a plus-tagged minimum is only met by a plus build
        !(!min.tag.is_empty() && self.tag.is_empty())
    }
}

impl fmt::Display for SksVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}{}", self.major, self.minor, self.release, self.tag)
    }
}
