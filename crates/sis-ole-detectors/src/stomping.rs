use once_cell::sync::Lazy;
use regex::Regex;

use sis_ole_core::context::SubmissionContext;

// Event handlers and document hooks that run a macro without user action.
pub(crate) static AUTOEXEC_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?i)\b(?:Auto(?:Exec|_?Open|_?Close|Exit|New)",
        r"|Document(?:_?Open|_Close|_?BeforeClose|Change|_New)",
        r"|NewDocument",
        r"|Workbook(?:_Open|_Activate|_BeforeClose|_Close)",
        r"|\w+_(?:GotFocus|LostFocus|MouseHover|Layout|Click|Change|Resize",
        r"|DocumentComplete|DownloadBegin|DownloadComplete|FileDownload",
        r"|NavigateComplete2|NavigateError|ProgressChange|PropertyChange",
        r"|TitleChange|MouseMove|MouseEnter|MouseLeave))\b",
        r"|\w+\.OnAction\b",
    ))
    .unwrap()
});

// Filesystem and memory writes.
pub(crate) static WRITE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?i)\b(?:FileCopy|CopyFile|Kill|CreateTextFile|VirtualAlloc|RtlMoveMemory",
        r"|URLDownloadToFileA?|AltStartupPath|WriteProcessMemory|ADODB\.Stream|WriteText",
        r"|SaveToFile|SaveAs|SaveAsRTF|FileSaveAs|MkDir|RmDir|SaveSetting|SetAttr)\b",
    ))
    .unwrap()
});

// Code execution, direct or through automation objects.
pub(crate) static EXECUTE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?i)\b(?:Shell|CreateObject|GetObject|SendKeys|MacScript|FollowHyperlink",
        r"|CreateThread|ShellExecuteA?|shell32)\b",
        r"|\w+\.(?:Run|Exec)\b",
    ))
    .unwrap()
});

static PASSWORD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"PasswordDocument:="([^"]+)""#).unwrap());

/// Outcome of a suspicion scan over one combined macro dump.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SuspicionReport {
    /// Auto-execution combined with a write or execute capability.
    pub suspicious: bool,
    pub matches: Vec<String>,
}

/// Scans a combined macro dump for suspicious capability patterns. The
/// builtin [`RaptorScanner`] covers the common VBA shapes; a caller with a
/// richer engine can plug its own in.
pub trait MacroSuspicionScanner {
    fn scan(&self, combined: &str) -> SuspicionReport;
}

/// Capability-pattern scanner over raw macro text.
#[derive(Debug, Default, Clone, Copy)]
pub struct RaptorScanner;

impl MacroSuspicionScanner for RaptorScanner {
    fn scan(&self, combined: &str) -> SuspicionReport {
        let autoexec: Vec<String> =
            AUTOEXEC_RE.find_iter(combined).map(|m| m.as_str().to_string()).collect();
        let write: Vec<String> =
            WRITE_RE.find_iter(combined).map(|m| m.as_str().to_string()).collect();
        let execute: Vec<String> =
            EXECUTE_RE.find_iter(combined).map(|m| m.as_str().to_string()).collect();
        let suspicious = !autoexec.is_empty() && (!write.is_empty() || !execute.is_empty());
        let mut matches = autoexec;
        matches.extend(write);
        matches.extend(execute);
        SuspicionReport { suspicious, matches }
    }
}

/// Harvests document passwords a macro sets on itself, so downstream
/// analysis of the submission can try them.
pub fn capture_passwords(combined: &str, context: &mut SubmissionContext) {
    let passwords: Vec<String> =
        PASSWORD_RE.captures_iter(combined).map(|caps| caps[1].to_string()).collect();
    context.add_passwords(passwords);
}

/// Stomping verdict: suspicious p-code with benign-looking source, or a
/// structural mismatch reported by the parser.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StompingReport {
    pub stomped: bool,
    /// Suspicious p-code matches with no counterpart in the macro source.
    pub pcode_only_matches: Vec<String>,
    pub vba_matches: Vec<String>,
}

/// Compares the macro-source scan against the p-code scan.
///
/// `structural_flag` is the parser's own stomping signal (source/compiled
/// mismatch); independently, p-code that scans suspicious while the source
/// does not means the source was overwritten after compilation.
pub fn detect_stomping(
    structural_flag: bool,
    vba: &SuspicionReport,
    pcode: &SuspicionReport,
) -> StompingReport {
    let stomped =
        structural_flag || (!pcode.matches.is_empty() && pcode.suspicious && !vba.suspicious);
    if !stomped {
        return StompingReport::default();
    }
    let pcode_only_matches: Vec<String> = pcode
        .matches
        .iter()
        .filter(|m| !vba.matches.contains(m))
        .cloned()
        .collect();
    StompingReport { stomped, pcode_only_matches, vba_matches: vba.matches.clone() }
}
