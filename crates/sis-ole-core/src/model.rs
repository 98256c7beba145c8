use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Closed set of tag types emitted by the analysis.
///
/// The wire format is the dotted string namespace (`network.static.uri`,
/// `file.name.extracted`, ...); `as_str` is the projection used for external
/// reports and safelist tables.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum TagKind {
    NetworkUri,
    NetworkDomain,
    NetworkIp,
    NetworkEmail,
    FileNameExtracted,
    FileStringApi,
    FileStringBlacklisted,
    FileMacroSha256,
    AttributionExploit,
    TechniqueMacro,
    TechniqueObfuscation,
}

impl TagKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TagKind::NetworkUri => "network.static.uri",
            TagKind::NetworkDomain => "network.static.domain",
            TagKind::NetworkIp => "network.static.ip",
            TagKind::NetworkEmail => "network.email.address",
            TagKind::FileNameExtracted => "file.name.extracted",
            TagKind::FileStringApi => "file.string.api",
            TagKind::FileStringBlacklisted => "file.string.blacklisted",
            TagKind::FileMacroSha256 => "file.ole.macro.sha256",
            TagKind::AttributionExploit => "attribution.exploit",
            TagKind::TechniqueMacro => "technique.macro",
            TagKind::TechniqueObfuscation => "technique.obfuscation",
        }
    }

    pub fn from_wire(s: &str) -> Option<TagKind> {
        Some(match s {
            "network.static.uri" => TagKind::NetworkUri,
            "network.static.domain" => TagKind::NetworkDomain,
            "network.static.ip" => TagKind::NetworkIp,
            "network.email.address" => TagKind::NetworkEmail,
            "file.name.extracted" => TagKind::FileNameExtracted,
            "file.string.api" => TagKind::FileStringApi,
            "file.string.blacklisted" => TagKind::FileStringBlacklisted,
            "file.ole.macro.sha256" => TagKind::FileMacroSha256,
            "attribution.exploit" => TagKind::AttributionExploit,
            "technique.macro" => TagKind::TechniqueMacro,
            "technique.obfuscation" => TagKind::TechniqueObfuscation,
            _ => return None,
        })
    }
}

impl fmt::Display for TagKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tag values grouped by kind with set semantics.
///
/// Ordered containers keep repeated runs over the same input byte-identical,
/// so callers can compare bags directly in tests and reports.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TagBag {
    tags: BTreeMap<TagKind, BTreeSet<String>>,
}

impl TagBag {
    pub fn new() -> Self {
        TagBag::default()
    }

    pub fn insert(&mut self, kind: TagKind, value: impl Into<String>) {
        let value = value.into();
        if value.is_empty() {
            return;
        }
        self.tags.entry(kind).or_default().insert(value);
    }

    /// Set union per kind. Commutative, so merge order never affects the
    /// final bag.
    pub fn merge(&mut self, other: TagBag) {
        for (kind, values) in other.tags {
            self.tags.entry(kind).or_default().extend(values);
        }
    }

    pub fn get(&self, kind: TagKind) -> impl Iterator<Item = &str> {
        self.tags.get(&kind).into_iter().flatten().map(String::as_str)
    }

    pub fn contains(&self, kind: TagKind, value: &str) -> bool {
        self.tags.get(&kind).map(|v| v.contains(value)).unwrap_or(false)
    }

    pub fn iter(&self) -> impl Iterator<Item = (TagKind, &BTreeSet<String>)> {
        self.tags.iter().map(|(k, v)| (*k, v))
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Total number of values across all kinds.
    pub fn value_count(&self) -> usize {
        self.tags.values().map(BTreeSet::len).sum()
    }
}

impl FromIterator<(TagKind, String)> for TagBag {
    fn from_iter<T: IntoIterator<Item = (TagKind, String)>>(iter: T) -> Self {
        let mut bag = TagBag::new();
        for (kind, value) in iter {
            bag.insert(kind, value);
        }
        bag
    }
}

/// Lossy projection of raw bytes into a printable tag value.
///
/// Non-UTF-8 input degrades per byte instead of dropping the whole value;
/// control characters are escaped so values stay single-line.
pub fn safe_tag_value(raw: &[u8]) -> String {
    let mut out = String::with_capacity(raw.len());
    for &b in raw {
        match b {
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            0x20..=0x7e => out.push(b as char),
            _ => out.push_str(&format!("\\x{b:02x}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_is_set_union() {
        let mut a = TagBag::new();
        a.insert(TagKind::NetworkDomain, "example.com");
        let mut b = TagBag::new();
        b.insert(TagKind::NetworkDomain, "example.com");
        b.insert(TagKind::NetworkIp, "192.0.2.1");
        a.merge(b);
        assert_eq!(a.get(TagKind::NetworkDomain).count(), 1);
        assert!(a.contains(TagKind::NetworkIp, "192.0.2.1"));
        assert_eq!(a.value_count(), 2);
    }

    #[test]
    fn empty_values_are_ignored() {
        let mut bag = TagBag::new();
        bag.insert(TagKind::NetworkUri, "");
        assert!(bag.is_empty());
    }

    #[test]
    fn wire_round_trip() {
        for kind in [
            TagKind::NetworkUri,
            TagKind::FileNameExtracted,
            TagKind::AttributionExploit,
        ] {
            assert_eq!(TagKind::from_wire(kind.as_str()), Some(kind));
        }
        assert_eq!(TagKind::from_wire("no.such.tag"), None);
    }

    #[test]
    fn safe_tag_value_escapes_non_printable() {
        assert_eq!(safe_tag_value(b"cmd.exe"), "cmd.exe");
        assert_eq!(safe_tag_value(b"a\x00b"), "a\\x00b");
        assert_eq!(safe_tag_value(b"a\nb"), "a\\nb");
    }
}
