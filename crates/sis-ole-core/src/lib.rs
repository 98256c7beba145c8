//! Core data model for post-parse office-document threat analysis.
//!
//! This crate owns the pieces shared by every detector: typed tags and tag
//! bags, heuristic scoring, safelisting, per-submission state, engine
//! configuration, the word-chain language table, and the content-addressed
//! extraction sink. Container parsing is a collaborator concern; everything
//! here operates on byte buffers and strings the parser already separated
//! out.

pub mod config;
pub mod context;
pub mod extract;
pub mod heuristic;
pub mod model;
pub mod safelist;
pub mod wordchains;

pub use config::EngineConfig;
pub use context::SubmissionContext;
pub use extract::{ArtifactStore, ExtractionSink, StoreOutcome, TypeIdentifier};
pub use heuristic::{Heuristic, HeuristicKind, Verdict};
pub use model::{TagBag, TagKind};
pub use safelist::Safelist;
pub use wordchains::WordChains;
