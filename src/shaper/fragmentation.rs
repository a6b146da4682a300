//! Fragmentation shaper: enforces a maximum packet length.
//!
//! Datagrams that would exceed the limit once the downstream layers add
//! their overhead are split into fragments sharing one random id; the
//! restore path feeds fragments to a [`Defragmenter`] and yields each
//! datagram once all of its pieces have arrived.

use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::fragment::{make_random_id, Defragmenter, Fragment, HEADER_SIZE};
use crate::random::random_padding;
use crate::shaper::encryption::{CHUNK_SIZE, IV_SIZE};
use crate::shaper::Shaper;

/// Overhead the fragment header and the encryption layer's IV add to
/// each piece; size budgeting accounts for it up front.
const OVERHEAD: usize = HEADER_SIZE + IV_SIZE;

/// Configuration for [`FragmentationShaper`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FragmentationConfig {
    /// Upper bound on the size of an emitted packet, fill included.
    pub max_length: u16,
}

impl FragmentationConfig {
    /// The standard MTU-shaped limit, suitable for tests.
    pub fn sample() -> Self {
        Self { max_length: 1440 }
    }
}

/// A packet shaper that splits and reassembles oversized datagrams.
pub struct FragmentationShaper {
    max_length: u16,
    defrag: Arc<Defragmenter>,
}

impl FragmentationShaper {
    /// Build a shaper from a parsed configuration.
    pub fn new(config: FragmentationConfig) -> Result<Self> {
        let mut shaper = Self {
            max_length: 0,
            defrag: Arc::new(Defragmenter::new()),
        };
        shaper.configure_struct(config)?;
        Ok(shaper)
    }

    /// Apply a parsed configuration record. Resets reassembly state.
    pub fn configure_struct(&mut self, config: FragmentationConfig) -> Result<()> {
        if (config.max_length as usize) <= OVERHEAD + CHUNK_SIZE {
            return Err(Error::config(format!(
                "max_length {} leaves no room for payload (overhead is {})",
                config.max_length,
                OVERHEAD + CHUNK_SIZE
            )));
        }

        self.max_length = config.max_length;
        self.defrag = Arc::new(Defragmenter::new());
        Ok(())
    }

    /// The reassembly buffer, shared so a caller can run its expiration
    /// sweeper on a separate task.
    pub fn defragmenter(&self) -> Arc<Defragmenter> {
        Arc::clone(&self.defrag)
    }

    /// Break a datagram into fragments, each sized so that its fill and
    /// the downstream IV land it within the limit.
    fn make_fragments(&self, buffer: Bytes) -> Result<Vec<Fragment>> {
        let max_length = self.max_length as usize;
        let mut fragments = Vec::new();
        let mut rest = buffer;

        loop {
            let payload_size = rest.len() + OVERHEAD;
            let fill_size = CHUNK_SIZE - payload_size % CHUNK_SIZE;
            let packet_size = payload_size + fill_size;

            if packet_size <= max_length {
                fragments.push(make_piece(rest, fill_size));
                break;
            }

            // Cut the head so that, with its own fill, it lands on the
            // limit; only the tail needs further splitting.
            let head_len = max_length - (OVERHEAD + fill_size);
            let head = rest.split_to(head_len);
            let head_fill = CHUNK_SIZE - (head.len() + OVERHEAD) % CHUNK_SIZE;
            fragments.push(make_piece(head, head_fill));
        }

        if fragments.len() > u8::MAX as usize {
            return Err(Error::invalid(format!(
                "datagram needs {} fragments, wire limit is {}",
                fragments.len(),
                u8::MAX
            )));
        }

        Ok(fix_fragments(fragments))
    }
}

/// Build a standalone fragment for one piece of payload. Identity and
/// ordinals are rewritten by [`fix_fragments`] once the split is known.
fn make_piece(payload: Bytes, fill_size: usize) -> Fragment {
    Fragment {
        length: payload.len() as u16,
        id: make_random_id(),
        index: 0,
        count: 1,
        payload,
        padding: Bytes::from(random_padding(fill_size)),
    }
}

/// Rewrite a fragment list so all pieces share the first piece's id and
/// carry sequential indexes and the common count.
fn fix_fragments(mut fragments: Vec<Fragment>) -> Vec<Fragment> {
    let id = fragments[0].id;
    let count = fragments.len() as u8;

    for (index, fragment) in fragments.iter_mut().enumerate() {
        fragment.id = id;
        fragment.index = index as u8;
        fragment.count = count;
    }

    fragments
}

impl Shaper for FragmentationShaper {
    fn configure(&mut self, config: &str) -> Result<()> {
        let config: FragmentationConfig = serde_json::from_str(config)
            .map_err(|err| Error::config(format!("bad fragmentation config: {err}")))?;
        self.configure_struct(config)
    }

    fn transform(&mut self, buffer: Bytes) -> Result<Vec<Bytes>> {
        let fragments = self.make_fragments(buffer)?;
        Ok(fragments.iter().map(Fragment::encode).collect())
    }

    fn restore(&mut self, buffer: Bytes) -> Result<Vec<Bytes>> {
        let fragment = Fragment::decode(buffer)?;
        self.defrag.add_fragment(fragment)?;

        if self.defrag.complete_count() > 0 {
            Ok(self.defrag.get_complete())
        } else {
            Ok(Vec::new())
        }
    }

    fn dispose(&mut self) {
        self.defrag.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_shaper() -> FragmentationShaper {
        FragmentationShaper::new(FragmentationConfig::sample()).unwrap()
    }

    #[test]
    fn test_small_payload_single_fragment() {
        let mut shaper = sample_shaper();
        let payload = Bytes::from(vec![0x11; 100]);

        let datagrams = shaper.transform(payload.clone()).unwrap();
        assert_eq!(datagrams.len(), 1);

        // Fill rounds the record so that wire size plus the downstream
        // IV is a whole number of cipher blocks.
        assert_eq!((datagrams[0].len() + IV_SIZE) % CHUNK_SIZE, 0);

        let fragment = Fragment::decode(datagrams[0].clone()).unwrap();
        assert_eq!(fragment.index, 0);
        assert_eq!(fragment.count, 1);
        assert_eq!(fragment.payload, payload);
    }

    #[test]
    fn test_fill_is_always_present() {
        // A payload that aligns the record exactly still gets a whole
        // block of fill.
        let mut shaper = sample_shaper();
        let aligned = CHUNK_SIZE * 4 - (OVERHEAD % CHUNK_SIZE);
        let datagrams = shaper.transform(Bytes::from(vec![0u8; aligned])).unwrap();

        let fragment = Fragment::decode(datagrams[0].clone()).unwrap();
        assert!(!fragment.padding.is_empty());
        assert!(fragment.padding.len() <= CHUNK_SIZE);
    }

    #[test]
    fn test_large_payload_splits() {
        let mut shaper = sample_shaper();
        let payload = Bytes::from((0..3000u32).map(|i| i as u8).collect::<Vec<u8>>());

        let datagrams = shaper.transform(payload.clone()).unwrap();
        assert!(datagrams.len() >= 3);

        let fragments: Vec<Fragment> = datagrams
            .iter()
            .map(|d| Fragment::decode(d.clone()).unwrap())
            .collect();

        let id = fragments[0].id;
        let count = fragments.len() as u8;
        for (index, fragment) in fragments.iter().enumerate() {
            assert_eq!(fragment.id, id);
            assert_eq!(fragment.index, index as u8);
            assert_eq!(fragment.count, count);
            assert!(fragment.wire_size() + IV_SIZE <= 1440);
            assert_eq!((fragment.wire_size() + IV_SIZE) % CHUNK_SIZE, 0);
        }

        // Pieces concatenate back to the original payload.
        let rejoined: Vec<u8> = fragments
            .iter()
            .flat_map(|f| f.payload.to_vec())
            .collect();
        assert_eq!(rejoined, payload);
    }

    #[test]
    fn test_round_trip_in_order() {
        let mut shaper = sample_shaper();
        let payload = Bytes::from(vec![0xA5; 4000]);

        let datagrams = shaper.transform(payload.clone()).unwrap();
        let mut restored = Vec::new();
        for datagram in datagrams {
            restored.extend(shaper.restore(datagram).unwrap());
        }
        assert_eq!(restored, vec![payload]);
    }

    #[test]
    fn test_round_trip_reversed_order() {
        let mut shaper = sample_shaper();
        let payload = Bytes::from(vec![0x3C; 4000]);

        let mut datagrams = shaper.transform(payload.clone()).unwrap();
        datagrams.reverse();

        let mut restored = Vec::new();
        for datagram in datagrams {
            restored.extend(shaper.restore(datagram).unwrap());
        }
        assert_eq!(restored, vec![payload]);
    }

    #[test]
    fn test_duplicates_do_not_corrupt() {
        let mut shaper = sample_shaper();
        let payload = Bytes::from(vec![0x77; 3000]);

        let datagrams = shaper.transform(payload.clone()).unwrap();
        let mut restored = Vec::new();
        for datagram in &datagrams {
            restored.extend(shaper.restore(datagram.clone()).unwrap());
            // Replay every fragment once.
            restored.extend(shaper.restore(datagram.clone()).unwrap());
        }
        assert_eq!(restored, vec![payload]);
    }

    #[test]
    fn test_partial_fragment_yields_nothing() {
        let mut shaper = sample_shaper();
        let payload = Bytes::from(vec![0x42; 3000]);

        let datagrams = shaper.transform(payload).unwrap();
        assert!(shaper.restore(datagrams[0].clone()).unwrap().is_empty());
    }

    #[test]
    fn test_oversplit_rejected() {
        // A tiny limit forces more than 255 pieces.
        let mut shaper =
            FragmentationShaper::new(FragmentationConfig { max_length: 96 }).unwrap();
        let payload = Bytes::from(vec![0u8; 20_000]);
        assert!(shaper.transform(payload).is_err());
    }

    #[test]
    fn test_configure_rejects_tiny_limit() {
        assert!(FragmentationShaper::new(FragmentationConfig { max_length: 68 }).is_err());
        assert!(FragmentationShaper::new(FragmentationConfig { max_length: 96 }).is_ok());
    }

    #[test]
    fn test_restore_rejects_garbage() {
        let mut shaper = sample_shaper();
        assert!(shaper.restore(Bytes::from_static(&[1, 2, 3])).is_err());
    }
}
