use std::collections::HashSet;

use anyhow::Result;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

/// Outcome reported by the persistence collaborator for one artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    Stored,
    /// The collaborator could not identify the content type; the artifact is
    /// not worth keeping.
    UnknownType,
}

/// External persistence collaborator. The engine never touches the
/// filesystem itself.
pub trait ArtifactStore {
    fn persist(&mut self, name: &str, payload: &[u8], description: &str) -> Result<StoreOutcome>;
}

/// External MIME/type identification collaborator.
pub trait TypeIdentifier {
    /// Returns a type label such as `application/octet-stream`.
    fn classify(&self, data: &[u8]) -> String;
}

/// A file handed to the persistence collaborator, as reported to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionCandidate {
    /// `<8-hex-hash-prefix><suffix>` — exact external naming contract.
    pub name: String,
    pub sha256: String,
    pub description: String,
}

/// Content-addressed dedup gate in front of the persistence collaborator.
///
/// Scoped to one submission: identical payload bytes offered twice under the
/// same suffix persist exactly once.
#[derive(Debug, Default)]
pub struct ExtractionSink {
    seen: HashSet<String>,
    extracted: Vec<ExtractionCandidate>,
}

impl ExtractionSink {
    pub fn new() -> ExtractionSink {
        ExtractionSink::default()
    }

    /// Offers a payload for extraction. Returns the generated artifact name
    /// on first persistence, `None` for duplicates, unidentifiable content,
    /// and collaborator failures.
    pub fn offer(
        &mut self,
        store: &mut dyn ArtifactStore,
        payload: &[u8],
        suffix: &str,
        description: &str,
    ) -> Option<String> {
        let digest = Sha256::digest(payload);
        let sha256 = format!("{digest:x}");
        let name = format!("{}{}", &sha256[..8], suffix);
        if self.seen.contains(&name) {
            return None;
        }
        match store.persist(&name, payload, description) {
            Ok(StoreOutcome::Stored) => {
                self.seen.insert(name.clone());
                self.extracted.push(ExtractionCandidate {
                    name: name.clone(),
                    sha256,
                    description: description.to_string(),
                });
                Some(name)
            }
            Ok(StoreOutcome::UnknownType) => {
                // Still counts as seen so the same bytes are not re-offered.
                debug!(%name, "skipping extraction, content type unknown");
                self.seen.insert(name);
                None
            }
            Err(error) => {
                warn!(%name, %error, "failed to persist artifact");
                None
            }
        }
    }

    /// Artifacts persisted so far in this submission, in offer order.
    pub fn extracted(&self) -> &[ExtractionCandidate] {
        &self.extracted
    }
}
