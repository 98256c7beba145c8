use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::warn;

const MAX_CONFIG_BYTES: u64 = 1024 * 1024;
const MAX_SCAN_BYTES_CEILING: usize = 16 * 1024 * 1024;
const MAX_BASE64_BYTES_CEILING: usize = 64 * 1024 * 1024;

/// Engine configuration. Loaded once at startup; read-only during analysis.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Skip the randomness score above this many bytes of macro text.
    pub macro_score_max_file_size: Option<usize>,
    /// Alert threshold for the randomness score; text scoring below it is
    /// flagged as obfuscated.
    pub macro_score_min_alert: f64,
    /// Upper bound on decoded base64 payload size.
    pub max_base64_bytes: usize,
    /// Decoded base64 payloads at or below this size are treated as text.
    pub max_stringdump_bytes: usize,
    /// Pattern scans see at most this many bytes of any one buffer.
    pub max_scan_bytes: usize,
    /// URI substrings suppressed outside deep-scan mode.
    pub ioc_pattern_safelist: Vec<String>,
    /// Exact tag values suppressed outside deep-scan mode.
    pub ioc_exact_safelist: Vec<String>,
    /// Word-chain table location (`.json` or `.json.gz`).
    pub word_chains_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            macro_score_max_file_size: None,
            macro_score_min_alert: 0.6,
            max_base64_bytes: 8_000_000,
            max_stringdump_bytes: 500,
            max_scan_bytes: 500_000,
            ioc_pattern_safelist: Vec::new(),
            ioc_exact_safelist: Vec::new(),
            word_chains_path: None,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(data: &str) -> Result<EngineConfig> {
        let mut config: EngineConfig = toml::from_str(data).context("parsing engine config")?;
        config.clamp();
        Ok(config)
    }

    /// Loads from a TOML file; a missing file falls back to defaults.
    pub fn load(path: &Path) -> Result<EngineConfig> {
        if !path.exists() {
            warn!(path = %path.display(), "engine config not found, using defaults");
            return Ok(EngineConfig::default());
        }
        let meta = fs::metadata(path)
            .with_context(|| format!("reading engine config {}", path.display()))?;
        if meta.len() > MAX_CONFIG_BYTES {
            anyhow::bail!("engine config {} exceeds {} bytes", path.display(), MAX_CONFIG_BYTES);
        }
        let data = fs::read_to_string(path)?;
        EngineConfig::from_toml_str(&data)
    }

    fn clamp(&mut self) {
        if self.max_scan_bytes > MAX_SCAN_BYTES_CEILING {
            warn!(
                requested = self.max_scan_bytes,
                ceiling = MAX_SCAN_BYTES_CEILING,
                "max_scan_bytes clamped"
            );
            self.max_scan_bytes = MAX_SCAN_BYTES_CEILING;
        }
        if self.max_base64_bytes > MAX_BASE64_BYTES_CEILING {
            warn!(
                requested = self.max_base64_bytes,
                ceiling = MAX_BASE64_BYTES_CEILING,
                "max_base64_bytes clamped"
            );
            self.max_base64_bytes = MAX_BASE64_BYTES_CEILING;
        }
        if !(0.0..=1.0).contains(&self.macro_score_min_alert) {
            warn!(
                requested = self.macro_score_min_alert,
                "macro_score_min_alert outside [0, 1], using default"
            );
            self.macro_score_min_alert = 0.6;
        }
    }
}
