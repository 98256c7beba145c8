use once_cell::sync::Lazy;
use regex::Regex;

use sis_ole_core::wordchains::WordChains;

static MACRO_WORDS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[a-z]{3,}").unwrap());

// Keywords and stock identifiers common in any macro, obfuscated or not.
// They still count toward the word and byte totals but contribute no
// trigraph score either way, so they are skipped.
const MACRO_SKIP_WORDS: &[&str] = &[
    "var",
    "unescape",
    "exec",
    "for",
    "while",
    "array",
    "object",
    "length",
    "len",
    "substr",
    "substring",
    "new",
    "unicode",
    "name",
    "base",
    "dim",
    "set",
    "public",
    "end",
    "getobject",
    "createobject",
    "content",
    "regexp",
    "date",
    "false",
    "true",
    "break",
    "continue",
    "ubound",
    "none",
    "undefined",
    "activexobject",
    "document",
    "attribute",
    "shell",
    "thisdocument",
    "rem",
    "string",
    "byte",
    "integer",
    "int",
    "function",
    "text",
    "next",
    "private",
    "click",
    "change",
    "createtextfile",
    "savetofile",
    "responsebody",
    "opentextfile",
    "resume",
    "open",
    "environment",
    "write",
    "close",
    "error",
    "else",
    "number",
    "chr",
    "sub",
    "loop",
];

// Minimums below which the trigraph score is statistical noise.
const MIN_BYTE_COUNT: usize = 128;
const MIN_WORD_COUNT: usize = 32;

/// Flags macro text whose identifiers look randomly generated.
///
/// Each lowercase word of three or more letters is scored by the fraction of
/// its two-character windows that are plausible English trigraph
/// continuations. A low average across the macro means the identifiers do not
/// look like words. Returns false for text too short to judge, or longer than
/// `max_file_size` when one is set.
pub fn flag_macro(
    macro_text: &str,
    chains: &WordChains,
    max_file_size: Option<usize>,
    min_alert: f64,
) -> bool {
    if let Some(limit) = max_file_size {
        if macro_text.len() > limit {
            return false;
        }
    }
    let lowered = macro_text.to_lowercase();
    let mut score = 0.0;
    let mut word_count = 0usize;
    let mut byte_count = 0usize;

    for hit in MACRO_WORDS_RE.find_iter(&lowered) {
        let word = hit.as_str();
        word_count += 1;
        byte_count += word.len();
        if MACRO_SKIP_WORDS.contains(&word) {
            continue;
        }
        let bytes = word.as_bytes();
        let mut prefix = bytes[0] as char;
        let mut tri_count = 0usize;
        for i in 1..word.len() - 1 {
            let window = &word[i..i + 2];
            if chains.contains(prefix, window) {
                tri_count += 1;
            }
            prefix = bytes[i] as char;
        }
        score += tri_count as f64 / (word.len() - 2) as f64;
    }

    if byte_count < MIN_BYTE_COUNT || word_count < MIN_WORD_COUNT {
        return false;
    }
    (score / word_count as f64) < min_alert
}
