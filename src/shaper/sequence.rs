//! Byte-sequence injection: decoy packets at fixed stream positions.
//!
//! The injector is a monotonic counter machine over the output stream.
//! It has three phases: before the first scheduled position it only
//! counts, inside the injection window it synthesizes decoy packets
//! wherever a schedule entry matches the counter, and past the last
//! position it takes a fast path and leaves packets untouched. Every
//! emitted packet, real or decoy, advances the counter by one.
//!
//! On the return path a decoy is recognized by its signature bytes at a
//! fixed offset and consumed; each remove entry matches at most once.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::random::random_padding;
use crate::shaper::Shaper;

/// One scheduled decoy, with its signature hex-encoded for transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceModelConfig {
    /// Output-stream position at which to inject the decoy.
    pub index: i8,
    /// Position of the signature bytes inside the decoy packet.
    pub offset: i16,
    /// Hex-encoded signature bytes.
    pub sequence: String,
    /// Total decoy packet size.
    pub length: i16,
}

/// Configuration for [`ByteSequenceShaper`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceConfig {
    /// Decoys to add to the outgoing packet stream.
    pub add_sequences: Vec<SequenceModelConfig>,
    /// Signatures to match and remove from the incoming stream.
    pub remove_sequences: Vec<SequenceModelConfig>,
}

impl SequenceConfig {
    /// One greeting decoy at stream position zero, suitable for tests.
    pub fn sample() -> Self {
        let model = SequenceModelConfig {
            index: 0,
            offset: 0,
            sequence: hex::encode(b"OH HELLO"),
            length: 256,
        };
        Self {
            add_sequences: vec![model.clone()],
            remove_sequences: vec![model],
        }
    }
}

/// A schedule entry with its signature decoded.
#[derive(Debug, Clone)]
struct SequenceModel {
    index: i64,
    offset: usize,
    sequence: Bytes,
    length: usize,
}

impl SequenceModel {
    fn parse(config: &SequenceModelConfig) -> Result<Self> {
        let sequence = hex::decode(&config.sequence)
            .map_err(|err| Error::config(format!("sequence is not valid hex: {err}")))?;

        if config.offset < 0 || config.length < 0 {
            return Err(Error::config(format!(
                "sequence offset {} and length {} must be non-negative",
                config.offset, config.length
            )));
        }

        let offset = config.offset as usize;
        let length = config.length as usize;
        if offset + sequence.len() > length {
            return Err(Error::config(format!(
                "signature of {} bytes at offset {offset} does not fit in a {length}-byte packet",
                sequence.len()
            )));
        }

        Ok(Self {
            index: i64::from(config.index),
            offset,
            sequence: Bytes::from(sequence),
            length,
        })
    }
}

/// A packet shaper that interleaves decoy packets into the stream.
pub struct ByteSequenceShaper {
    add_sequences: Vec<SequenceModel>,
    remove_sequences: Vec<SequenceModel>,
    /// First and last scheduled positions, bounding the injection window.
    first_index: i64,
    last_index: i64,
    /// Position in the output stream; advances once per emitted packet.
    output_index: i64,
}

impl ByteSequenceShaper {
    /// Build a shaper from a parsed configuration.
    pub fn new(config: SequenceConfig) -> Result<Self> {
        let mut shaper = Self {
            add_sequences: Vec::new(),
            remove_sequences: Vec::new(),
            first_index: 0,
            last_index: 0,
            output_index: 0,
        };
        shaper.configure_struct(config)?;
        Ok(shaper)
    }

    /// Apply a parsed configuration record. Resets the stream position.
    pub fn configure_struct(&mut self, config: SequenceConfig) -> Result<()> {
        if config.add_sequences.is_empty() {
            return Err(Error::config("add_sequences must not be empty"));
        }

        let adds = config
            .add_sequences
            .iter()
            .map(SequenceModel::parse)
            .collect::<Result<Vec<_>>>()?;
        let removes = config
            .remove_sequences
            .iter()
            .map(SequenceModel::parse)
            .collect::<Result<Vec<_>>>()?;

        // add_sequences is non-empty, so both bounds exist.
        self.first_index = adds.iter().map(|m| m.index).min().unwrap_or(0);
        self.last_index = adds.iter().map(|m| m.index).max().unwrap_or(0);
        self.add_sequences = adds;
        self.remove_sequences = removes;
        self.output_index = 0;
        Ok(())
    }

    /// Emit a packet and advance the stream position.
    fn emit(&mut self, results: &mut Vec<Bytes>, packet: Bytes) {
        results.push(packet);
        self.output_index += 1;
    }

    /// Emit decoys for every schedule entry matching the current
    /// position, until no entry matches.
    fn inject(&mut self, results: &mut Vec<Bytes>) {
        while let Some(model) = self
            .add_sequences
            .iter()
            .find(|m| m.index == self.output_index)
            .cloned()
        {
            let decoy = make_decoy(&model);
            self.emit(results, decoy);
        }
    }
}

/// Synthesize a decoy packet: random bytes up to the offset, the
/// signature, then random filler out to the target length.
fn make_decoy(model: &SequenceModel) -> Bytes {
    let mut packet = BytesMut::with_capacity(model.length);
    packet.put_slice(&random_padding(model.offset));
    packet.put_slice(&model.sequence);
    packet.put_slice(&random_padding(
        model.length - model.offset - model.sequence.len(),
    ));
    packet.freeze()
}

impl Shaper for ByteSequenceShaper {
    fn configure(&mut self, config: &str) -> Result<()> {
        let config: SequenceConfig = serde_json::from_str(config)
            .map_err(|err| Error::config(format!("bad sequence config: {err}")))?;
        self.configure_struct(config)
    }

    fn transform(&mut self, buffer: Bytes) -> Result<Vec<Bytes>> {
        if self.output_index > self.last_index {
            // Injection finished for good; leave the stream alone.
            return Ok(vec![buffer]);
        }

        let mut results = Vec::new();
        if self.output_index >= self.first_index {
            // Inside the window: decoys may be scheduled immediately
            // before and immediately after the real packet.
            self.inject(&mut results);
            self.emit(&mut results, buffer);
            self.inject(&mut results);
        } else {
            self.emit(&mut results, buffer);
        }
        Ok(results)
    }

    fn restore(&mut self, buffer: Bytes) -> Result<Vec<Bytes>> {
        let matched = self.remove_sequences.iter().position(|model| {
            let end = model.offset + model.sequence.len();
            buffer.len() >= end && buffer[model.offset..end] == model.sequence[..]
        });

        match matched {
            Some(position) => {
                // Each signature is consumed once so a later real packet
                // that happens to carry it is left alone.
                self.remove_sequences.remove(position);
                Ok(Vec::new())
            }
            None => Ok(vec![buffer]),
        }
    }

    fn dispose(&mut self) {}
}
