use sis_ole_core::model::{TagBag, TagKind};
use sis_ole_core::safelist::Safelist;

use crate::patterns::{
    find_iocs, BENIGN_SUFFIXES, BLACKLIST_IGNORE, EXCEL_BIN_RE, FILES_OF_INTEREST,
};

/// Result of one IOC pass over a buffer: surviving tags plus whether any hit
/// was suspicious enough to extract the buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IocMatch {
    pub tags: TagBag,
    pub extract: bool,
}

/// IOC pattern matcher bound to the process-wide safelist and the
/// submission's scan mode.
///
/// `include_fpos` (deep scan) widens the output: low-confidence hits like
/// numbered Excel parts are kept and only minimal extraction filtering is
/// applied. Output is deterministic for a given buffer and safelist state.
pub struct IocScanner<'a> {
    safelist: &'a Safelist,
    include_fpos: bool,
    max_scan_bytes: usize,
}

impl<'a> IocScanner<'a> {
    pub fn new(safelist: &'a Safelist, include_fpos: bool, max_scan_bytes: usize) -> Self {
        IocScanner { safelist, include_fpos, max_scan_bytes }
    }

    pub fn scan(&self, data: &[u8]) -> IocMatch {
        let data = &data[..data.len().min(self.max_scan_bytes)];
        let mut result = IocMatch::default();
        for (kind, value) in find_iocs(data) {
            if BENIGN_SUFFIXES.iter().any(|suffix| value.ends_with(suffix)) {
                continue;
            }
            if self.safelist.is_safelisted(kind, &value, self.include_fpos) {
                continue;
            }
            if !self.include_fpos
                && kind == TagKind::FileNameExtracted
                && EXCEL_BIN_RE.is_match(value.as_bytes())
            {
                continue;
            }
            result.extract = result.extract || self.decide_extract(kind, &value);
            result.tags.insert(kind, value);
        }
        result
    }

    /// Extraction-worthiness of a single surviving hit.
    fn decide_extract(&self, kind: TagKind, value: &str) -> bool {
        if kind == TagKind::FileNameExtracted {
            if value.starts_with("oleObject") {
                return false;
            }
            if let Some(dot) = value.rfind('.') {
                let ext = value[dot..].to_uppercase();
                if !ext.is_empty() && !FILES_OF_INTEREST.contains(&ext.as_str()) {
                    return false;
                }
            }
        }
        let lowered = value.to_lowercase();
        if kind == TagKind::FileStringBlacklisted && value == "http" {
            return false;
        }
        if !self.include_fpos {
            // Common false positives, suppressed outside deep scan.
            if kind == TagKind::NetworkEmail {
                return false;
            }
            if kind == TagKind::FileStringApi && lowered == "connect" {
                return false;
            }
            if kind == TagKind::FileStringBlacklisted
                && BLACKLIST_IGNORE.contains(&lowered.as_str())
            {
                return false;
            }
        }
        true
    }
}
