use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

/// Verdict tier derived from a heuristic score.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum Verdict {
    Malicious,
    Suspicious,
    Informative,
}

impl Verdict {
    pub fn from_score(score: i32) -> Verdict {
        if score >= 1000 {
            Verdict::Malicious
        } else if score >= 500 {
            Verdict::Suspicious
        } else {
            Verdict::Informative
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Malicious => "malicious",
            Verdict::Suspicious => "suspicious",
            Verdict::Informative => "informative",
        }
    }
}

/// Identifies a scoring rule. Each kind carries a static definition: base
/// score, per-signature scores, and the cap.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum HeuristicKind {
    /// External relationship link analysis.
    ExternalRelationship,
    /// Host or network IOCs mined from macro content; counts hits.
    NetworkIoc,
    /// Macro identifiers look packed or obfuscated.
    MacroObfuscation,
    /// Suspicious string patterns in stream content; counts hits.
    SuspiciousStrings,
    /// Base64-encoded content recovered from a buffer.
    Base64Content,
    /// Macro source does not match compiled p-code.
    VbaStomping,
}

pub struct HeuristicDef {
    pub name: &'static str,
    /// Base score, multiplied by the frequency counter.
    pub score: i32,
    pub max_score: Option<i32>,
    /// Score contributed by each known signature when triggered.
    pub signature_scores: &'static [(&'static str, i32)],
    /// Score for signatures absent from the table.
    pub default_signature_score: i32,
    /// Counting heuristics start at frequency 0 and are suppressed until a
    /// positive hit increments them.
    pub counting: bool,
}

// Score table for external relationship links. The tiers are the observable
// contract: script-execution shapes reach 1000 on their own, secondary
// signals are 500 so any two combine to a malicious verdict.
const EXTERNAL_RELATIONSHIP_SIGNATURES: &[(&str, i32)] = &[
    ("mshta", 1000),
    ("embedded_powershell", 1000),
    ("msdt_exploit", 1000),
    ("oleobject", 500),
    ("attachedtemplate", 500),
    ("unc_path", 500),
    ("external_link_ip", 500),
    ("link_to_executable", 500),
    ("mhtml_link", 500),
    ("relative_path", 100),
    ("hyperlink", 0),
];

static EXTERNAL_RELATIONSHIP_DEF: HeuristicDef = HeuristicDef {
    name: "external_relationship",
    score: 0,
    max_score: Some(2000),
    signature_scores: EXTERNAL_RELATIONSHIP_SIGNATURES,
    default_signature_score: 0,
    counting: false,
};

static NETWORK_IOC_DEF: HeuristicDef = HeuristicDef {
    name: "network_ioc",
    score: 50,
    max_score: Some(500),
    signature_scores: &[],
    default_signature_score: 0,
    counting: true,
};

static MACRO_OBFUSCATION_DEF: HeuristicDef = HeuristicDef {
    name: "macro_obfuscation",
    score: 500,
    max_score: Some(500),
    signature_scores: &[],
    default_signature_score: 0,
    counting: false,
};

static SUSPICIOUS_STRINGS_DEF: HeuristicDef = HeuristicDef {
    name: "suspicious_strings",
    score: 50,
    max_score: Some(500),
    signature_scores: &[],
    default_signature_score: 0,
    counting: true,
};

static BASE64_CONTENT_DEF: HeuristicDef = HeuristicDef {
    name: "base64_content",
    score: 100,
    max_score: Some(500),
    signature_scores: &[],
    default_signature_score: 0,
    counting: false,
};

static VBA_STOMPING_DEF: HeuristicDef = HeuristicDef {
    name: "vba_stomping",
    score: 500,
    max_score: Some(1000),
    signature_scores: &[("suspicious_vba_stomped", 0)],
    default_signature_score: 0,
    counting: true,
};

impl HeuristicKind {
    pub fn def(&self) -> &'static HeuristicDef {
        match self {
            HeuristicKind::ExternalRelationship => &EXTERNAL_RELATIONSHIP_DEF,
            HeuristicKind::NetworkIoc => &NETWORK_IOC_DEF,
            HeuristicKind::MacroObfuscation => &MACRO_OBFUSCATION_DEF,
            HeuristicKind::SuspiciousStrings => &SUSPICIOUS_STRINGS_DEF,
            HeuristicKind::Base64Content => &BASE64_CONTENT_DEF,
            HeuristicKind::VbaStomping => &VBA_STOMPING_DEF,
        }
    }
}

/// A scoring rule instance for one analysis.
///
/// Signatures record which sub-rules triggered; the frequency counter tracks
/// positive hits for counting heuristics; score overrides let a caller zero
/// out contributions (safelisted links) without dropping the signature or its
/// tags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heuristic {
    kind: HeuristicKind,
    frequency: u32,
    signatures: BTreeSet<String>,
    score_overrides: HashMap<String, i32>,
    attack_ids: BTreeSet<String>,
}

impl Heuristic {
    pub fn new(kind: HeuristicKind) -> Heuristic {
        let frequency = if kind.def().counting { 0 } else { 1 };
        Heuristic {
            kind,
            frequency,
            signatures: BTreeSet::new(),
            score_overrides: HashMap::new(),
            attack_ids: BTreeSet::new(),
        }
    }

    pub fn kind(&self) -> HeuristicKind {
        self.kind
    }

    pub fn add_signature(&mut self, id: impl Into<String>) {
        self.signatures.insert(id.into());
    }

    pub fn add_signature_with_score(&mut self, id: impl Into<String>, score: i32) {
        let id = id.into();
        self.score_overrides.insert(id.clone(), score);
        self.signatures.insert(id);
    }

    /// Overrides the contribution of a signature without adding or removing
    /// it from the triggered set.
    pub fn set_signature_score(&mut self, id: impl Into<String>, score: i32) {
        self.score_overrides.insert(id.into(), score);
    }

    pub fn add_attack_id(&mut self, id: impl Into<String>) {
        self.attack_ids.insert(id.into());
    }

    pub fn increment_frequency(&mut self, by: u32) {
        self.frequency = self.frequency.saturating_add(by);
    }

    pub fn frequency(&self) -> u32 {
        self.frequency
    }

    pub fn signatures(&self) -> impl Iterator<Item = &str> {
        self.signatures.iter().map(String::as_str)
    }

    pub fn has_signature(&self, id: &str) -> bool {
        self.signatures.contains(id)
    }

    pub fn attack_ids(&self) -> impl Iterator<Item = &str> {
        self.attack_ids.iter().map(String::as_str)
    }

    /// A counting heuristic with no positive hits is suppressed at
    /// finalization; other heuristics trigger once any signature is set or
    /// they were constructed at all.
    pub fn is_triggered(&self) -> bool {
        if self.kind.def().counting {
            self.frequency > 0
        } else {
            true
        }
    }

    /// Effective score: base score times frequency, plus the scores of all
    /// triggered signatures, capped by the definition's maximum.
    pub fn score(&self) -> i32 {
        let def = self.kind.def();
        if def.counting && self.frequency == 0 {
            return 0;
        }
        let mut total = def.score.saturating_mul(self.frequency.max(1) as i32);
        for sig in &self.signatures {
            let contribution = self
                .score_overrides
                .get(sig)
                .copied()
                .or_else(|| {
                    def.signature_scores
                        .iter()
                        .find(|(name, _)| name == sig)
                        .map(|(_, score)| *score)
                })
                .unwrap_or(def.default_signature_score);
            total = total.saturating_add(contribution);
        }
        match def.max_score {
            Some(cap) => total.min(cap),
            None => total,
        }
    }

    pub fn verdict(&self) -> Verdict {
        Verdict::from_score(self.score())
    }
}
