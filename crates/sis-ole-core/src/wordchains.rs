use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use flate2::read::GzDecoder;

/// Per-starting-letter sets of plausible two-character continuations,
/// precomputed from an English corpus. Loaded once at startup and never
/// mutated during analysis.
///
/// For a word `w`, the window `w[i..i+2]` is plausible when it appears in the
/// set keyed by the letter preceding it.
#[derive(Debug, Default, Clone)]
pub struct WordChains {
    chains: HashMap<char, HashSet<String>>,
}

impl WordChains {
    pub fn from_json_str(data: &str) -> Result<WordChains> {
        let raw: HashMap<String, Vec<String>> =
            serde_json::from_str(data).context("parsing word-chain table")?;
        let mut chains: HashMap<char, HashSet<String>> = HashMap::new();
        for (prefix, windows) in raw {
            let Some(letter) = prefix.chars().next() else { continue };
            chains.entry(letter).or_default().extend(windows);
        }
        Ok(WordChains { chains })
    }

    pub fn from_reader(mut reader: impl Read) -> Result<WordChains> {
        let mut data = String::new();
        reader.read_to_string(&mut data).context("reading word-chain table")?;
        WordChains::from_json_str(&data)
    }

    /// Loads `.json` or gzipped `.json.gz` tables.
    pub fn load(path: &Path) -> Result<WordChains> {
        let file = File::open(path)
            .with_context(|| format!("opening word-chain table {}", path.display()))?;
        if path.extension().map(|e| e == "gz").unwrap_or(false) {
            WordChains::from_reader(GzDecoder::new(file))
        } else {
            WordChains::from_reader(file)
        }
    }

    /// Builds a table directly from a word corpus. Used for tests and for
    /// deployments without a precomputed table.
    pub fn from_words<'a>(words: impl IntoIterator<Item = &'a str>) -> WordChains {
        let mut chains: HashMap<char, HashSet<String>> = HashMap::new();
        for word in words {
            let word: Vec<char> = word.to_lowercase().chars().collect();
            if word.len() < 3 || !word.iter().all(|c| c.is_ascii_lowercase()) {
                continue;
            }
            for i in 1..word.len() - 1 {
                let window: String = word[i..i + 2].iter().collect();
                chains.entry(word[i - 1]).or_default().insert(window);
            }
        }
        WordChains { chains }
    }

    pub fn contains(&self, prefix: char, window: &str) -> bool {
        self.chains.get(&prefix).map(|set| set.contains(window)).unwrap_or(false)
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_words_records_overlapping_windows() {
        let chains = WordChains::from_words(["download"]);
        // d-ow, o-wn, w-nl, n-lo, l-oa, o-ad
        assert!(chains.contains('d', "ow"));
        assert!(chains.contains('o', "wn"));
        assert!(chains.contains('o', "ad"));
        assert!(!chains.contains('d', "zz"));
    }

    #[test]
    fn json_table_round_trip() {
        let chains = WordChains::from_json_str(r#"{"d": ["ow", "oc"], "o": ["wn"]}"#).unwrap();
        assert!(chains.contains('d', "ow"));
        assert!(chains.contains('o', "wn"));
        assert!(!chains.contains('x', "yz"));
    }

    #[test]
    fn short_and_non_alpha_words_are_skipped() {
        let chains = WordChains::from_words(["ab", "x1y2z3"]);
        assert!(chains.is_empty());
    }
}
