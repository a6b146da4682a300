//! # Protean
//!
//! A UDP datagram shaping pipeline: composable, invertible byte
//! transforms that rewrite the wire shape of individual packets so that
//! statistical classifiers and protocol fingerprinting cannot recognize
//! the underlying traffic.
//!
//! ## Architecture Overview
//!
//! ```text
//! outbound (transform)                      inbound (restore)
//! ┌──────────────────────────┐              ┌──────────────────────────┐
//! │ payload                  │              │ wire datagrams           │
//! │   │ fragment             │              │   │ strip decoys         │
//! │   │ encrypt (AES-CBC)    │              │   │ strip header         │
//! │   │ entropy-shape        │              │   │ entropy-restore      │
//! │   │ add header           │              │   │ decrypt              │
//! │   │ inject decoys        │              │   │ defragment           │
//! │   ▼ wire datagrams       │              │   ▼ payload              │
//! └──────────────────────────┘              └──────────────────────────┘
//! ```
//!
//! Each stage implements the [`Shaper`](shaper::Shaper) contract:
//! `transform` maps one datagram to zero or more wire datagrams and
//! `restore` is its exact inverse over the stream. The composite
//! [`ProteanShaper`](shaper::ProteanShaper) chains all five stages with
//! inverse ordering on the return path.
//!
//! ## Scope
//!
//! Best-effort UDP shaping only. There is no authentication, replay
//! protection, congestion control, or retransmission; transport I/O and
//! key management belong to the caller.

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod coder;
pub mod error;
pub mod fragment;
pub mod random;
pub mod shaper;

pub use error::{Error, Result};
pub use shaper::{ProteanConfig, ProteanShaper, Shaper};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_pipeline_constructs() {
        let shaper = ProteanShaper::new(ProteanConfig::sample());
        assert!(shaper.is_ok());
    }

    #[test]
    fn test_sample_config_serializes() {
        let json = serde_json::to_string(&ProteanConfig::sample()).unwrap();
        for section in [
            "decompression",
            "encryption",
            "fragmentation",
            "injection",
            "header_injection",
        ] {
            assert!(json.contains(section), "missing section {section}");
        }
    }
}
