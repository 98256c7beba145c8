use once_cell::sync::Lazy;
use regex::{Captures, Regex};

// Repeated chr(x + y) chains are a common string-building obfuscation in
// macro droppers; the subtraction and bare forms follow the same shape.
static CHR_ADD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)chr[$]?\((\d+) \+ (\d+)\)").unwrap());
static CHRW_ADD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)chrw[$]?\((\d+) \+ (\d+)\)").unwrap());
static CHR_SUB_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)chr[$]?\((\d+) - (\d+)\)").unwrap());
static CHRW_SUB_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)chrw[$]?\((\d+) - (\d+)\)").unwrap());
static CHR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)chr[$]?\((\d+)\)").unwrap());
static CHRW_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)chrw[$]?\((\d+)\)").unwrap());

const WIDE_MAX: i64 = 0x10FFFF;

fn arg(caps: &Captures, idx: usize) -> Option<i64> {
    caps.get(idx)?.as_str().parse().ok()
}

fn binary_arg(caps: &Captures, op: fn(i64, i64) -> Option<i64>) -> Option<i64> {
    op(arg(caps, 1)?, arg(caps, 2)?)
}

/// Quoted replacement so the final concatenation collapse can join adjacent
/// decoded characters.
fn quoted(i: i64) -> Option<String> {
    let c = u32::try_from(i).ok().and_then(char::from_u32)?;
    Some(format!("\"{c}\""))
}

/// Folds `Chr`/`ChrW` character-building calls down to their literal strings
/// and collapses the resulting `" & "` concatenations.
///
/// Narrow calls outside `[0, 255]` are dropped; wide additions that overflow
/// the Unicode range keep their original text, wide subtractions and bare
/// wide calls drop like the narrow forms. The pass never fails; text it does
/// not recognize comes through untouched.
pub fn deobfuscate(text: &str) -> String {
    let deobf = CHR_ADD_RE.replace_all(text, |caps: &Captures| {
        match binary_arg(caps, i64::checked_add) {
            Some(i) if (0..=255).contains(&i) => quoted(i).unwrap_or_default(),
            _ => String::new(),
        }
    });
    let deobf = CHRW_ADD_RE.replace_all(&deobf, |caps: &Captures| {
        match binary_arg(caps, i64::checked_add) {
            Some(i) if (0..=WIDE_MAX).contains(&i) => {
                quoted(i).unwrap_or_else(|| caps[0].to_string())
            }
            _ => caps[0].to_string(),
        }
    });
    let deobf = CHR_SUB_RE.replace_all(&deobf, |caps: &Captures| {
        match binary_arg(caps, i64::checked_sub) {
            Some(i) if (0..=255).contains(&i) => quoted(i).unwrap_or_default(),
            _ => String::new(),
        }
    });
    let deobf = CHRW_SUB_RE.replace_all(&deobf, |caps: &Captures| {
        match binary_arg(caps, i64::checked_sub) {
            Some(i) if (0..=WIDE_MAX).contains(&i) => quoted(i).unwrap_or_default(),
            _ => String::new(),
        }
    });
    let deobf = CHR_RE.replace_all(&deobf, |caps: &Captures| match arg(caps, 1) {
        Some(i) if (0..=255).contains(&i) => quoted(i).unwrap_or_default(),
        _ => String::new(),
    });
    let deobf = CHRW_RE.replace_all(&deobf, |caps: &Captures| match arg(caps, 1) {
        Some(i) if (0..=WIDE_MAX).contains(&i) => quoted(i).unwrap_or_default(),
        _ => String::new(),
    });
    deobf.replace("\" & \"", "")
}
