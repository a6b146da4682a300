//! Packet shapers: the transform/restore contract and its implementations.
//!
//! A shaper rewrites the byte-level shape of individual datagrams so
//! that statistical classifiers cannot recognize the underlying
//! traffic. Five concrete shapers are provided:
//!
//! 1. **Fragmentation**: split oversized datagrams, reassemble on restore
//! 2. **Encryption**: AES-CBC with a fresh IV per packet
//! 3. **Decompression**: inverse-entropy shaping via the range coder
//! 4. **Header**: prepend/strip a fixed byte prefix
//! 5. **Sequence**: inject/remove decoy packets at fixed stream positions
//!
//! [`ProteanShaper`] chains all five with exact inverse ordering.

mod encryption;
mod entropy;
mod fragmentation;
mod header;
mod protean;
mod sequence;

pub use encryption::{EncryptionConfig, EncryptionShaper};
pub use entropy::{DecompressionConfig, DecompressionShaper};
pub use fragmentation::{FragmentationConfig, FragmentationShaper};
pub use header::{HeaderConfig, HeaderShaper};
pub use protean::{ProteanConfig, ProteanShaper};
pub use sequence::{ByteSequenceShaper, SequenceConfig, SequenceModelConfig};

use bytes::Bytes;

use crate::error::Result;

/// The uniform contract every shaper implements.
///
/// `transform` and `restore` are exact inverses over a stream: feeding
/// every transformed datagram back through `restore`, in order,
/// reproduces the original datagrams. Either direction may emit zero,
/// one, or many datagrams for one input.
pub trait Shaper {
    /// Set the session key for this shaper. Reserved by the contract;
    /// none of the current shapers use it.
    fn set_key(&mut self, _key: &[u8]) {}

    /// Reconfigure from a serialized (JSON) configuration record.
    /// Invalid configuration is a hard failure: the error is returned
    /// and the previous configuration stays in effect.
    fn configure(&mut self, config: &str) -> Result<()>;

    /// Obfuscate one datagram into zero or more wire datagrams.
    fn transform(&mut self, buffer: Bytes) -> Result<Vec<Bytes>>;

    /// Invert [`Shaper::transform`] for one wire datagram. An empty
    /// result is normal (a partial fragment, a consumed decoy).
    fn restore(&mut self, buffer: Bytes) -> Result<Vec<Bytes>>;

    /// Release owned resources and buffered state. Must be the last
    /// call on the shaper.
    fn dispose(&mut self);
}

/// A concrete shaper, tagged by kind.
///
/// The composite pipeline holds an ordered list of these and walks it
/// forward on transform, backward on restore.
pub enum Stage {
    /// Fragmentation / reassembly
    Fragmentation(FragmentationShaper),
    /// AES-CBC per-packet randomization
    Encryption(EncryptionShaper),
    /// Inverse-entropy shaping
    Decompression(DecompressionShaper),
    /// Fixed header prefix
    Header(HeaderShaper),
    /// Decoy packet injection
    Sequence(ByteSequenceShaper),
}

impl Shaper for Stage {
    fn configure(&mut self, config: &str) -> Result<()> {
        match self {
            Stage::Fragmentation(shaper) => shaper.configure(config),
            Stage::Encryption(shaper) => shaper.configure(config),
            Stage::Decompression(shaper) => shaper.configure(config),
            Stage::Header(shaper) => shaper.configure(config),
            Stage::Sequence(shaper) => shaper.configure(config),
        }
    }

    fn transform(&mut self, buffer: Bytes) -> Result<Vec<Bytes>> {
        match self {
            Stage::Fragmentation(shaper) => shaper.transform(buffer),
            Stage::Encryption(shaper) => shaper.transform(buffer),
            Stage::Decompression(shaper) => shaper.transform(buffer),
            Stage::Header(shaper) => shaper.transform(buffer),
            Stage::Sequence(shaper) => shaper.transform(buffer),
        }
    }

    fn restore(&mut self, buffer: Bytes) -> Result<Vec<Bytes>> {
        match self {
            Stage::Fragmentation(shaper) => shaper.restore(buffer),
            Stage::Encryption(shaper) => shaper.restore(buffer),
            Stage::Decompression(shaper) => shaper.restore(buffer),
            Stage::Header(shaper) => shaper.restore(buffer),
            Stage::Sequence(shaper) => shaper.restore(buffer),
        }
    }

    fn dispose(&mut self) {
        match self {
            Stage::Fragmentation(shaper) => shaper.dispose(),
            Stage::Encryption(shaper) => shaper.dispose(),
            Stage::Decompression(shaper) => shaper.dispose(),
            Stage::Header(shaper) => shaper.dispose(),
            Stage::Sequence(shaper) => shaper.dispose(),
        }
    }
}

/// Apply `f` to each datagram and concatenate the outputs in order.
///
/// A datagram whose mapping fails is dropped from the downstream
/// pipeline; data-path errors never propagate past this point.
pub(crate) fn flat_map<F>(inputs: Vec<Bytes>, mut f: F) -> Vec<Bytes>
where
    F: FnMut(Bytes) -> Result<Vec<Bytes>>,
{
    let mut accum = Vec::new();
    for item in inputs {
        match f(item) {
            Ok(mapped) => accum.extend(mapped),
            Err(err) => tracing::debug!("datagram dropped: {err}"),
        }
    }
    accum
}
