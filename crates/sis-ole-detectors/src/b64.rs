use std::collections::HashSet;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use once_cell::sync::Lazy;
use regex::bytes::Regex;
use sha2::{Digest, Sha256};
use tracing::debug;

use sis_ole_core::extract::{ArtifactStore, ExtractionSink, TypeIdentifier};
use sis_ole_core::heuristic::{Heuristic, HeuristicKind};
use sis_ole_core::model::TagBag;

use crate::ioc::IocScanner;

// Runs of at least 24 base64 alphabet characters, optionally padded. Short
// runs are indistinguishable from ordinary identifiers.
static BASE64_RUN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?-u)(?:[A-Za-z0-9+/]{4}){6,}(?:[A-Za-z0-9+/]{2}==|[A-Za-z0-9+/]{3}=)?")
        .unwrap()
});

/// One located base64 run, already decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Base64Hit {
    pub decoded: Vec<u8>,
    pub start: usize,
    pub end: usize,
}

/// Finds base64-encoded runs in a buffer. The builtin [`RegexLocator`]
/// handles the plain standard-alphabet case.
pub trait Base64Locator {
    fn find(&self, data: &[u8]) -> Vec<Base64Hit>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RegexLocator;

impl Base64Locator for RegexLocator {
    fn find(&self, data: &[u8]) -> Vec<Base64Hit> {
        BASE64_RUN_RE
            .find_iter(data)
            .filter_map(|m| {
                let decoded = STANDARD.decode(m.as_bytes()).ok()?;
                Some(Base64Hit { decoded, start: m.start(), end: m.end() })
            })
            .collect()
    }
}

/// One accepted base64 payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Base64Result {
    /// SHA-256 of the decoded payload.
    pub sha256: String,
    /// Length of the encoded run in the source buffer.
    pub encoded_len: usize,
    /// First bytes of the encoded run, for the report.
    pub preview: String,
    /// Artifact name when the payload was persisted as a file.
    pub extracted_name: Option<String>,
}

/// Outcome of one base64 pass over a buffer.
#[derive(Debug, Clone)]
pub struct Base64Report {
    pub heuristic: Heuristic,
    pub tags: TagBag,
    pub results: Vec<Base64Result>,
}

const MIN_DECODED_BYTES: usize = 30;
const PREVIEW_BYTES: usize = 50;

/// Recovers base64-encoded content from a buffer.
///
/// Each unique decoded payload between the size bounds is either persisted
/// as a binary artifact (large payloads that classify as octet-stream) or
/// kept as printable text when it has enough distinct content to be worth
/// reporting. Decoded bytes get a fresh IOC pass; accepted text dumps are
/// persisted together at the end.
#[allow(clippy::too_many_arguments)]
pub fn check_base64(
    data: &[u8],
    locator: &dyn Base64Locator,
    ioc: &IocScanner,
    identifier: &dyn TypeIdentifier,
    sink: &mut ExtractionSink,
    store: &mut dyn ArtifactStore,
    max_base64_bytes: usize,
    max_stringdump_bytes: usize,
) -> Option<Base64Report> {
    let mut seen: HashSet<Vec<u8>> = HashSet::new();
    let mut tags = TagBag::new();
    let mut results = Vec::new();
    let mut ascii_content: Vec<Vec<u8>> = Vec::new();

    for hit in locator.find(data) {
        if seen.contains(&hit.decoded)
            || hit.decoded.len() <= MIN_DECODED_BYTES
            || hit.decoded.len() >= max_base64_bytes
        {
            continue;
        }
        seen.insert(hit.decoded.clone());

        let sha256 = format!("{:x}", Sha256::digest(&hit.decoded));
        let mut extracted_name = None;
        if hit.decoded.len() > max_stringdump_bytes {
            let ftype = identifier.classify(&hit.decoded);
            if !ftype.contains("octet-stream") {
                debug!(%sha256, %ftype, "skipping identified base64 payload");
                continue;
            }
            extracted_name = sink.offer(
                store,
                &hit.decoded,
                "_b64_decoded",
                "Extracted base64-decoded file",
            );
        } else {
            let printable: Vec<u8> =
                hit.decoded.iter().copied().filter(|&b| b > 31 && b < 127).collect();
            let unique: HashSet<u8> = printable.iter().copied().collect();
            let non_space = printable.iter().filter(|&&b| b != b' ').count();
            if unique.len() <= 6 || non_space <= 14 {
                continue;
            }
            ascii_content.push(printable);
        }

        let preview_end = hit.start + PREVIEW_BYTES.min(hit.end - hit.start);
        results.push(Base64Result {
            sha256,
            encoded_len: hit.end - hit.start,
            preview: String::from_utf8_lossy(&data[hit.start..preview_end]).into_owned(),
            extracted_name,
        });
        tags.merge(ioc.scan(&hit.decoded).tags);
    }

    if !ascii_content.is_empty() {
        sink.offer(store, &ascii_content.join(&b'\n'), "_b64.txt", "Decoded base64 text");
    }
    if results.is_empty() {
        return None;
    }
    Some(Base64Report { heuristic: Heuristic::new(HeuristicKind::Base64Content), tags, results })
}
