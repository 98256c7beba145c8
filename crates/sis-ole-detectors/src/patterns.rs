use once_cell::sync::Lazy;
use regex::bytes::Regex;

use sis_ole_core::model::{safe_tag_value, TagKind};

use crate::net::{is_reserved_ipv4, parse_ipv4};

/// Extensions worth pulling out of a document.
pub const FILES_OF_INTEREST: &[&str] = &[
    ".APK", ".APP", ".BAT", ".BIN", ".CLASS", ".CMD", ".DAT", ".DLL", ".EPS", ".EXE", ".JAR",
    ".JS", ".JSE", ".LNK", ".MSI", ".OSX", ".PAF", ".PS1", ".RAR", ".SCR", ".SCT", ".SWF",
    ".SYS", ".TMP", ".VBE", ".VBS", ".WSF", ".WSH", ".ZIP",
];

/// Extensions Windows will execute from a link.
pub const EXECUTABLE_EXTENSIONS: &[&str] = &[
    ".bat", ".class", ".cmd", ".com", ".cpl", ".dll", ".exe", ".gadget", ".hta", ".inf", ".jar",
    ".js", ".jse", ".lnk", ".msc", ".msi", ".msp", ".pif", ".ps1", ".ps1xml", ".ps2", ".ps2xml",
    ".psc1", ".psc2", ".reg", ".scf", ".scr", ".sct", ".vb", ".vbe", ".vbs", ".ws", ".wsc",
    ".wsf", ".wsh",
];

/// IoC values ending in framework boilerplate names are noise.
pub const BENIGN_SUFFIXES: &[&str] =
    &["themeManager.xml", "MSO.DLL", "stdole2.tlb", "vbaProject.bin", "VBE6.DLL", "VBE7.DLL"];

/// Blacklist hits that are common benign words.
pub const BLACKLIST_IGNORE: &[&str] =
    &["connect", "protect", "background", "enterprise", "account", "waiting", "request"];

// TLDs accepted for bare domain hits. Bare-domain matching over arbitrary
// binary streams is noisy; a fixed TLD set keeps it useful.
const DOMAIN_TLDS: &[&str] = &[
    "com", "net", "org", "info", "biz", "io", "co", "us", "ca", "uk", "de", "fr", "it", "nl",
    "eu", "ru", "cn", "in", "br", "au", "jp", "kr", "gov", "edu", "mil", "xyz", "top", "site",
    "online", "club", "pw", "cc", "ws", "tk", "ml", "ga", "cf",
];

static URI_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i-u)\b(?:https?|ftp)://[a-z0-9.-]{4,253}(?::\d{1,5})?(?:/[a-z0-9/\-._~%!$&'()*+,;=:@?#]{0,2000})?",
    )
    .unwrap()
});

static DOMAIN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i-u)\b(?:[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?\.){1,8}[a-z]{2,12}\b").unwrap()
});

static IP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?-u)\b(?:\d{1,3}\.){3}\d{1,3}\b").unwrap());

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i-u)\b[a-z0-9._%+-]{1,64}@[a-z0-9-]{1,63}(?:\.[a-z0-9-]{1,63}){1,4}\b").unwrap()
});

static FILE_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i-u)\b[a-z0-9_][a-z0-9_\-.]{0,79}\.(?:apk|app|bat|bin|class|cmd|dat|dll|doc|docm|docx|eps|exe|hta|jar|jse?|lnk|msi|osx|paf|ppt|pptx|ps1|rar|rtf|scr|sct|swf|sys|tmp|vbe|vbs|wsf|wsh|xls|xlsm|xlsx|zip)\b",
    )
    .unwrap()
});

static API_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?-u)\b(?:CloseHandle|Connect|CreateFile|CreateObject|CreateRemoteThread|GetObject|GetProcAddr(?:ess)?|GetSystemDirectory|GetTempPath|GetWindowsDirectory|LoadLibrary[AW]?|ReadFile|SetFilePointer|ShellExecute[AW]?|URLDownloadToFile[AW]?|VirtualAlloc(?:Ex)?|WinExec|WinHttpRequest|WriteFile|WriteProcessMemory)\b",
    )
    .unwrap()
});

static BLACKLIST_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i-u)\b(?:http|ftp|powershell|cmd\.exe|rundll32|regsvr32|mshta|wscript|cscript|bitsadmin|certutil|schtasks|shellcode|downloadstring|webclient|invoke-expression|frombase64string|connect|protect|background|enterprise|account|waiting|request)\b",
    )
    .unwrap()
});

/// Runs the typed indicator library over a buffer. Reserved IPv4 addresses
/// are filtered here; everything else is raw hits for the matcher's
/// safelist and noise filters.
pub fn find_iocs(data: &[u8]) -> Vec<(TagKind, String)> {
    let mut hits = Vec::new();
    for m in URI_RE.find_iter(data) {
        hits.push((TagKind::NetworkUri, safe_tag_value(m.as_bytes())));
    }
    for m in IP_RE.find_iter(data) {
        let value = safe_tag_value(m.as_bytes());
        match parse_ipv4(&value) {
            Some(addr) if !is_reserved_ipv4(addr) => hits.push((TagKind::NetworkIp, value)),
            _ => {}
        }
    }
    for m in EMAIL_RE.find_iter(data) {
        hits.push((TagKind::NetworkEmail, safe_tag_value(m.as_bytes())));
    }
    for m in DOMAIN_RE.find_iter(data) {
        let value = safe_tag_value(m.as_bytes());
        if !crate::net::is_valid_domain(&value) {
            continue;
        }
        let tld = value.rsplit('.').next().unwrap_or("").to_lowercase();
        if !DOMAIN_TLDS.contains(&tld.as_str()) {
            continue;
        }
        // Domain hits that are really file names are reported as such by
        // the file-name pattern.
        if FILE_NAME_RE.is_match(m.as_bytes()) {
            continue;
        }
        hits.push((TagKind::NetworkDomain, value));
    }
    for m in FILE_NAME_RE.find_iter(data) {
        hits.push((TagKind::FileNameExtracted, safe_tag_value(m.as_bytes())));
    }
    for m in API_RE.find_iter(data) {
        hits.push((TagKind::FileStringApi, safe_tag_value(m.as_bytes())));
    }
    for m in BLACKLIST_RE.find_iter(data) {
        hits.push((TagKind::FileStringBlacklisted, safe_tag_value(m.as_bytes())));
    }
    hits
}

/// Numbered Excel part names (`sheet12.bin`) are expected in ordinary
/// workbooks.
pub static EXCEL_BIN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?-u)^(?:sheet|printerSettings|queryTable|binaryIndex|table)\d{1,12}\.bin$")
        .unwrap()
});

/// One maldoc-style suspicious content hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuspiciousMatch {
    pub description: &'static str,
    pub excerpt: String,
}

struct SuspiciousPattern {
    regex: Lazy<Regex>,
    description: &'static str,
}

static SUSPICIOUS_PATTERNS: [SuspiciousPattern; 6] = [
    SuspiciousPattern {
        regex: Lazy::new(|| {
            Regex::new(
                r"(?-u)(?:CloseHandle|CreateFile|GetProcAddr|GetSystemDirectory|GetTempPath|GetWindowsDirectory|IsBadReadPtr|IsBadWritePtr|LoadLibrary|ReadFile|SetFilePointer|ShellExecute|URLDownloadToFile|VirtualAlloc|WinExec|WriteFile)",
            )
            .unwrap()
        }),
        description: "use of suspicious system function",
    },
    SuspiciousPattern {
        regex: Lazy::new(|| Regex::new(r"(?-u)This program cannot be run in DOS mode").unwrap()),
        description: "embedded executable",
    },
    SuspiciousPattern {
        regex: Lazy::new(|| Regex::new(r"(?s-u)MZ.{32,1024}PE\x00\x00").unwrap()),
        description: "embedded executable",
    },
    SuspiciousPattern {
        regex: Lazy::new(|| {
            Regex::new(
                r#"(?-u)(?:function\(|\beval[ \t]*\(|new[ \t]+ActiveXObject\(|xfa\.(?:(?:resolve|create)Node|datasets|form)|\.oneOfChild)"#,
            )
            .unwrap()
        }),
        description: "embedded javascript",
    },
    SuspiciousPattern {
        regex: Lazy::new(|| Regex::new(r"(?-u)(?:unescape\(|document\.write)").unwrap()),
        description: "embedded javascript",
    },
    SuspiciousPattern {
        regex: Lazy::new(|| {
            Regex::new(
                r"(?-u)(?:%28%22%45%6E%61%62%6C%65%20%65%64%69%74%69%6E%67%22%29|Enable editing|\\objhtml|\\objdata|\\bin|\\objautlink|No\: 20724414|%4E%6F%3A%20%32%30%37%32%34%34%31%34|passwordhash)",
            )
            .unwrap()
        }),
        description: "suspicious rtf code",
    },
];

/// Maldoc-style sweep for content that should never appear in a clean
/// document: system-function names, embedded executables, script fragments,
/// hostile RTF control words. First hit per pattern only.
pub fn scan_suspicious_strings(data: &[u8]) -> Vec<SuspiciousMatch> {
    let mut matches = Vec::new();
    for pattern in &SUSPICIOUS_PATTERNS {
        if let Some(m) = pattern.regex.find(data) {
            let excerpt = safe_tag_value(&m.as_bytes()[..m.as_bytes().len().min(64)]);
            matches.push(SuspiciousMatch { description: pattern.description, excerpt });
        }
    }
    matches
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_typed_hits() {
        let data = b"GET http://evil.example.com/drop.exe from 203.0.113.9 via ShellExecute";
        let hits = find_iocs(data);
        assert!(hits.iter().any(|(k, v)| *k == TagKind::NetworkUri && v.contains("drop.exe")));
        assert!(hits.iter().any(|(k, v)| *k == TagKind::NetworkIp && v == "203.0.113.9"));
        assert!(hits.iter().any(|(k, v)| *k == TagKind::NetworkDomain && v == "evil.example.com"));
        assert!(hits.iter().any(|(k, v)| *k == TagKind::FileNameExtracted && v == "drop.exe"));
        assert!(hits.iter().any(|(k, v)| *k == TagKind::FileStringApi && v == "ShellExecute"));
    }

    #[test]
    fn reserved_ips_are_not_reported() {
        let hits = find_iocs(b"connecting to 192.168.1.10 and 127.0.0.1 now");
        assert!(!hits.iter().any(|(k, _)| *k == TagKind::NetworkIp));
    }

    #[test]
    fn unknown_tld_is_not_a_domain() {
        let hits = find_iocs(b"see NormalTemplate.dotm marker");
        assert!(!hits.iter().any(|(k, _)| *k == TagKind::NetworkDomain));
    }

    #[test]
    fn excel_bin_shape() {
        assert!(EXCEL_BIN_RE.is_match(b"sheet12.bin"));
        assert!(EXCEL_BIN_RE.is_match(b"printerSettings1.bin"));
        assert!(!EXCEL_BIN_RE.is_match(b"payload.bin"));
    }

    #[test]
    fn suspicious_sweep_reports_each_category_once() {
        let mut exe = b"MZ".to_vec();
        exe.extend(std::iter::repeat(0u8).take(64));
        exe.extend(b"PE\x00\x00 This program cannot be run in DOS mode");
        let matches = scan_suspicious_strings(&exe);
        assert_eq!(
            matches.iter().filter(|m| m.description == "embedded executable").count(),
            2
        );

        let js = scan_suspicious_strings(b"x = unescape(\"%41\");");
        assert_eq!(js.len(), 1);
        assert_eq!(js[0].description, "embedded javascript");
    }
}
