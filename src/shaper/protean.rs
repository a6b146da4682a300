//! The composite shaper: every transform chained in a fixed order.
//!
//! Outbound, a datagram is fragmented, encrypted, entropy-shaped,
//! headered, and finally interleaved with decoys. Inbound runs the
//! exact inverse order. Each stage maps one datagram to zero or more,
//! and the stages are flat-mapped over the running datagram list; a
//! datagram that any stage rejects is dropped from the pipeline.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::shaper::{
    flat_map, ByteSequenceShaper, DecompressionConfig, DecompressionShaper, EncryptionConfig,
    EncryptionShaper, FragmentationConfig, FragmentationShaper, HeaderConfig, HeaderShaper,
    SequenceConfig, Shaper, Stage,
};

/// Configuration for [`ProteanShaper`]: one record per stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProteanConfig {
    /// Frequency table for the entropy-shaping stage.
    pub decompression: DecompressionConfig,
    /// Key for the encryption stage.
    pub encryption: EncryptionConfig,
    /// Packet-size limit for the fragmentation stage.
    pub fragmentation: FragmentationConfig,
    /// Decoy schedule for the injection stage.
    pub injection: SequenceConfig,
    /// Prefixes for the header stage.
    pub header_injection: HeaderConfig,
}

impl ProteanConfig {
    /// Sample defaults for every stage, suitable for tests.
    pub fn sample() -> Self {
        Self {
            decompression: DecompressionConfig::sample(),
            encryption: EncryptionConfig::sample(),
            fragmentation: FragmentationConfig::sample(),
            injection: SequenceConfig::sample(),
            header_injection: HeaderConfig::sample(),
        }
    }
}

/// A packet shaper composing all five transforms.
pub struct ProteanShaper {
    /// Stages in transform order; restore walks them backward.
    stages: Vec<Stage>,
}

impl ProteanShaper {
    /// Build the full pipeline from a parsed configuration.
    pub fn new(config: ProteanConfig) -> Result<Self> {
        let stages = vec![
            Stage::Fragmentation(FragmentationShaper::new(config.fragmentation)?),
            Stage::Encryption(EncryptionShaper::new(config.encryption)?),
            Stage::Decompression(DecompressionShaper::new(config.decompression)?),
            Stage::Header(HeaderShaper::new(config.header_injection)?),
            Stage::Sequence(ByteSequenceShaper::new(config.injection)?),
        ];
        Ok(Self { stages })
    }

    /// Apply a parsed configuration record, rebuilding every stage.
    pub fn configure_struct(&mut self, config: ProteanConfig) -> Result<()> {
        *self = Self::new(config)?;
        Ok(())
    }
}

impl Shaper for ProteanShaper {
    fn configure(&mut self, config: &str) -> Result<()> {
        let config: ProteanConfig = serde_json::from_str(config)
            .map_err(|err| Error::config(format!("bad pipeline config: {err}")))?;
        self.configure_struct(config)
    }

    fn transform(&mut self, buffer: Bytes) -> Result<Vec<Bytes>> {
        let mut datagrams = vec![buffer];
        for stage in self.stages.iter_mut() {
            datagrams = flat_map(datagrams, |datagram| stage.transform(datagram));
        }
        Ok(datagrams)
    }

    fn restore(&mut self, buffer: Bytes) -> Result<Vec<Bytes>> {
        let mut datagrams = vec![buffer];
        for stage in self.stages.iter_mut().rev() {
            datagrams = flat_map(datagrams, |datagram| stage.restore(datagram));
        }
        Ok(datagrams)
    }

    fn dispose(&mut self) {
        for stage in self.stages.iter_mut() {
            stage.dispose();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (ProteanShaper, ProteanShaper) {
        (
            ProteanShaper::new(ProteanConfig::sample()).unwrap(),
            ProteanShaper::new(ProteanConfig::sample()).unwrap(),
        )
    }

    fn restore_all(receiver: &mut ProteanShaper, datagrams: Vec<Bytes>) -> Vec<Bytes> {
        let mut restored = Vec::new();
        for datagram in datagrams {
            restored.extend(receiver.restore(datagram).unwrap());
        }
        restored
    }

    #[test]
    fn test_single_fragment_round_trip() {
        let (mut sender, mut receiver) = pair();
        let payload = Bytes::from(vec![0x42; 100]);

        let datagrams = sender.transform(payload.clone()).unwrap();
        // One real packet plus the decoy scheduled at stream position 0.
        assert_eq!(datagrams.len(), 2);

        assert_eq!(restore_all(&mut receiver, datagrams), vec![payload]);
    }

    #[test]
    fn test_wire_packets_carry_header() {
        let (mut sender, _) = pair();
        let datagrams = sender.transform(Bytes::from(vec![0x42; 100])).unwrap();

        // The real packet (after the decoy) starts with the configured
        // header; a decoy is raw filler around its signature.
        assert_eq!(&datagrams[1][..2], &[0x41, 0x02]);
        assert_eq!(&datagrams[0][..8], b"OH HELLO");
    }

    #[test]
    fn test_multi_fragment_round_trip() {
        let (mut sender, mut receiver) = pair();
        let payload = Bytes::from((0..3000u32).map(|i| (i % 251) as u8).collect::<Vec<u8>>());

        let datagrams = sender.transform(payload.clone()).unwrap();
        // Three fragments plus one decoy.
        assert_eq!(datagrams.len(), 4);

        assert_eq!(restore_all(&mut receiver, datagrams), vec![payload]);
    }

    #[test]
    fn test_sequential_datagrams() {
        let (mut sender, mut receiver) = pair();
        let first = Bytes::from(vec![1u8; 64]);
        let second = Bytes::from(vec![2u8; 64]);

        let mut wire = sender.transform(first.clone()).unwrap();
        wire.extend(sender.transform(second.clone()).unwrap());

        assert_eq!(restore_all(&mut receiver, wire), vec![first, second]);
    }

    #[test]
    fn test_fragment_reordering_tolerated() {
        let (mut sender, mut receiver) = pair();
        let payload = Bytes::from(vec![0x5A; 3000]);

        let mut datagrams = sender.transform(payload.clone()).unwrap();
        // Keep the decoy first (the receiver consumes its signature),
        // but feed the fragments in reverse arrival order.
        let decoy = datagrams.remove(0);
        datagrams.reverse();
        datagrams.insert(0, decoy);

        assert_eq!(restore_all(&mut receiver, datagrams), vec![payload]);
    }

    #[test]
    fn test_garbage_datagram_dropped() {
        let (_, mut receiver) = pair();
        // Too short for any stage to make sense of; the pipeline drops
        // it rather than erroring.
        let restored = receiver.restore(Bytes::from_static(&[9, 9, 9])).unwrap();
        assert!(restored.is_empty());
    }

    #[test]
    fn test_configure_from_json() {
        let (mut sender, mut receiver) = pair();
        let json = serde_json::to_string(&ProteanConfig::sample()).unwrap();
        sender.configure(&json).unwrap();
        receiver.configure(&json).unwrap();

        let payload = Bytes::from(vec![0x10; 200]);
        let datagrams = sender.transform(payload.clone()).unwrap();
        assert_eq!(restore_all(&mut receiver, datagrams), vec![payload]);
    }

    #[test]
    fn test_rejects_bad_stage_config() {
        let mut config = ProteanConfig::sample();
        config.encryption.key = "zz".into();
        assert!(ProteanShaper::new(config).is_err());
    }

    #[test]
    fn test_dispose() {
        let (mut sender, _) = pair();
        sender.transform(Bytes::from(vec![0u8; 50])).unwrap();
        sender.dispose();
    }
}
