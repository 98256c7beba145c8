use anyhow::Result;
use sis_ole_core::extract::{ArtifactStore, StoreOutcome, TypeIdentifier};

/// In-memory artifact store for end-to-end assertions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    pub files: Vec<(String, Vec<u8>, String)>,
}

impl ArtifactStore for MemoryStore {
    fn persist(&mut self, name: &str, payload: &[u8], description: &str) -> Result<StoreOutcome> {
        self.files.push((name.to_string(), payload.to_vec(), description.to_string()));
        Ok(StoreOutcome::Stored)
    }
}

impl MemoryStore {
    pub fn names(&self) -> Vec<&str> {
        self.files.iter().map(|(name, _, _)| name.as_str()).collect()
    }
}

/// Identifier that labels everything an octet stream, the label that lets
/// large base64 payloads through.
pub struct OctetStreamIdentifier;

impl TypeIdentifier for OctetStreamIdentifier {
    fn classify(&self, _data: &[u8]) -> String {
        "application/octet-stream".to_string()
    }
}
