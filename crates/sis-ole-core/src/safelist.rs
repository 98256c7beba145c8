use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;
use tracing::warn;

use crate::config::EngineConfig;
use crate::model::TagKind;

// Substrings of URIs that framework boilerplate references constantly.
const URI_SAFELIST: &[&str] = &[
    "http://purl.org/",
    "http://xml.org/",
    ".openxmlformats.org",
    ".oasis-open.org",
    ".xmlsoap.org",
    ".microsoft.com",
    ".w3.org",
    ".gc.ca",
    ".mil.ca",
    "dublincore.org",
];

// Exact tag values that show up in benign documents.
const TAG_SAFELIST: &[&str] = &["management", "manager", "microsoft.com"];

const MAX_PROFILE_BYTES: u64 = 1024 * 1024;

/// Externally supplied safelist profile, keyed by wire tag type.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SafelistProfile {
    /// Exact matches (case-insensitive) per tag type.
    #[serde(default, rename = "match")]
    pub matches: HashMap<String, Vec<String>>,
    /// Regex patterns (case-insensitive, anchored at the start) per tag type.
    #[serde(default)]
    pub regex: HashMap<String, Vec<String>>,
}

impl SafelistProfile {
    pub fn from_toml_str(data: &str) -> Result<SafelistProfile> {
        toml::from_str(data).context("parsing safelist profile")
    }

    pub fn load(path: &Path) -> Result<SafelistProfile> {
        let meta = fs::metadata(path)
            .with_context(|| format!("reading safelist profile {}", path.display()))?;
        if meta.len() > MAX_PROFILE_BYTES {
            anyhow::bail!("safelist profile {} exceeds {} bytes", path.display(), MAX_PROFILE_BYTES);
        }
        let data = fs::read_to_string(path)?;
        SafelistProfile::from_toml_str(&data)
    }
}

/// Known-benign suppression tables.
///
/// Two layers: the built-in minimal profile (always active) and
/// caller-supplied exclusions (active only outside deep-scan mode, where the
/// strict variant keeps suppression to a minimum). The merged exact/regex
/// tables come from the external profile and apply in both modes.
#[derive(Debug, Default)]
pub struct Safelist {
    uri_substrings: Vec<String>,
    exact_tags: Vec<String>,
    extra_uri_substrings: Vec<String>,
    extra_exact_tags: Vec<String>,
    matches: HashMap<String, Vec<String>>,
    regexes: HashMap<String, Vec<Regex>>,
}

impl Safelist {
    /// The minimal built-in profile.
    pub fn builtin() -> Safelist {
        Safelist {
            uri_substrings: URI_SAFELIST.iter().map(|s| s.to_string()).collect(),
            exact_tags: TAG_SAFELIST.iter().map(|s| s.to_string()).collect(),
            ..Safelist::default()
        }
    }

    /// Built-in profile plus the config's scan exclusions.
    pub fn from_config(config: &EngineConfig) -> Safelist {
        let mut safelist = Safelist::builtin();
        safelist
            .add_scan_exclusions(&config.ioc_pattern_safelist, &config.ioc_exact_safelist);
        safelist
    }

    /// Built-in profile merged with an external one. Regex compilation
    /// failures surface here, at load time, never during matching.
    pub fn with_profile(profile: SafelistProfile) -> Result<Safelist> {
        let mut safelist = Safelist::builtin();
        safelist.merge_profile(profile)?;
        Ok(safelist)
    }

    pub fn merge_profile(&mut self, profile: SafelistProfile) -> Result<()> {
        for (tag_type, values) in profile.matches {
            if TagKind::from_wire(&tag_type).is_none() {
                warn!(tag_type, "safelist match entry for unknown tag type");
            }
            let entry = self.matches.entry(tag_type).or_default();
            entry.extend(values.into_iter().map(|v| v.to_lowercase()));
        }
        for (tag_type, patterns) in profile.regex {
            if TagKind::from_wire(&tag_type).is_none() {
                warn!(tag_type, "safelist regex entry for unknown tag type");
            }
            let entry = self.regexes.entry(tag_type).or_default();
            for pattern in patterns {
                let compiled = regex::RegexBuilder::new(&format!("^(?:{pattern})"))
                    .case_insensitive(true)
                    .build()
                    .with_context(|| format!("compiling safelist regex {pattern:?}"))?;
                entry.push(compiled);
            }
        }
        Ok(())
    }

    /// Caller-supplied exclusions, applied only outside deep-scan mode.
    pub fn add_scan_exclusions(&mut self, uri_substrings: &[String], exact_tags: &[String]) {
        self.extra_uri_substrings.extend(uri_substrings.iter().cloned());
        self.extra_exact_tags.extend(exact_tags.iter().map(|t| t.to_lowercase()));
    }

    /// Pure predicate: is `value` a known-benign instance of `kind`?
    pub fn is_safelisted(&self, kind: TagKind, value: &str, deep_scan: bool) -> bool {
        if self.uri_substrings.iter().any(|s| value.contains(s.as_str())) {
            return true;
        }
        let lowered = value.to_lowercase();
        if self.exact_tags.iter().any(|t| *t == lowered) {
            return true;
        }
        if !deep_scan {
            if self.extra_uri_substrings.iter().any(|s| value.contains(s.as_str())) {
                return true;
            }
            if self.extra_exact_tags.iter().any(|t| *t == lowered) {
                return true;
            }
        }
        let tag_type = kind.as_str();
        if let Some(values) = self.matches.get(tag_type) {
            if values.iter().any(|v| *v == lowered) {
                return true;
            }
        }
        if let Some(patterns) = self.regexes.get(tag_type) {
            if patterns.iter().any(|p| p.is_match(value)) {
                return true;
            }
        }
        false
    }
}
