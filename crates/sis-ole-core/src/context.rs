use std::collections::HashSet;

/// Mutable state scoped to one submitted document.
///
/// Created at the start of a document's analysis, discarded at the end;
/// nothing here survives across submissions. The safelist and word-chain
/// tables are deliberately not part of this struct: they are process-wide
/// and read-only.
#[derive(Debug, Default)]
pub struct SubmissionContext {
    deep_scan: bool,
    seen_clsids: HashSet<String>,
    passwords: Vec<String>,
}

impl SubmissionContext {
    pub fn new(deep_scan: bool) -> SubmissionContext {
        SubmissionContext { deep_scan, ..SubmissionContext::default() }
    }

    pub fn deep_scan(&self) -> bool {
        self.deep_scan
    }

    /// Records a CLSID; returns true the first time it is seen.
    pub fn note_clsid(&mut self, clsid: &str) -> bool {
        if clsid.is_empty() {
            return false;
        }
        self.seen_clsids.insert(clsid.to_string())
    }

    /// Document passwords recovered from macro content, for downstream
    /// decryption attempts.
    pub fn add_passwords(&mut self, passwords: impl IntoIterator<Item = String>) {
        for password in passwords {
            if !self.passwords.contains(&password) {
                self.passwords.push(password);
            }
        }
    }

    pub fn passwords(&self) -> &[String] {
        &self.passwords
    }
}
