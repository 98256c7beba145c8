//! Detectors over parser-separated office-document artifacts.
//!
//! Each module is a self-contained analysis over one artifact class: byte
//! buffers (IOC patterns, base64 recovery, suspicious strings), link strings
//! (URI classification and scoring), and macro batches (deobfuscation,
//! randomness scoring, stomping detection). Detectors share only the
//! read-only safelist and the per-submission context; their outputs merge
//! commutatively.

pub mod b64;
pub mod deobfuscate;
pub mod ioc;
pub mod links;
pub mod macros;
pub mod net;
pub mod patterns;
pub mod randomness;
pub mod stomping;
