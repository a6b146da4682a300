//! Inverse-entropy shaping via the range coder.
//!
//! Compression run in reverse: the transform direction *decodes*
//! arbitrary high-entropy bytes against a target frequency table,
//! synthesizing output whose per-byte distribution approaches that
//! table; the restore direction *encodes* to recover the original. The
//! technique follows the reverse-Huffman idea from Wayner's
//! "Disappearing Cryptography" (ch. 6.2), with a range coder in place
//! of Huffman so the mimicked distribution is not limited to
//! power-of-two probabilities.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::coder::{Decoder, Encoder, FrequencyTable, ALPHABET_SIZE};
use crate::error::{Error, Result};
use crate::shaper::Shaper;

/// Framing added around a payload before it is run through the decoder:
/// one header byte, two footer bytes, two length bytes.
const FRAME_OVERHEAD: usize = 5;

/// Configuration for [`DecompressionShaper`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecompressionConfig {
    /// Target byte-frequency counts, one per byte value.
    pub frequencies: Vec<u32>,
}

impl DecompressionConfig {
    /// A uniform distribution, suitable for tests.
    pub fn sample() -> Self {
        Self {
            frequencies: vec![1; ALPHABET_SIZE],
        }
    }
}

/// A packet shaper that reshapes byte entropy with an inverted
/// arithmetic coder.
pub struct DecompressionShaper {
    encoder: Encoder,
    decoder: Decoder,
}

impl DecompressionShaper {
    /// Build a shaper from a parsed configuration.
    pub fn new(config: DecompressionConfig) -> Result<Self> {
        let table = FrequencyTable::new(&config.frequencies)?;
        Ok(Self {
            encoder: Encoder::new(table.clone()),
            decoder: Decoder::new(table),
        })
    }

    /// Apply a parsed configuration record.
    pub fn configure_struct(&mut self, config: DecompressionConfig) -> Result<()> {
        *self = Self::new(config)?;
        Ok(())
    }
}

impl Shaper for DecompressionShaper {
    fn configure(&mut self, config: &str) -> Result<()> {
        let config: DecompressionConfig = serde_json::from_str(config)
            .map_err(|err| Error::config(format!("bad decompression config: {err}")))?;
        self.configure_struct(config)
    }

    /// Shape a datagram toward the target distribution.
    ///
    /// The payload is framed the way the decoder expects coded input
    /// (header byte, two zero footer bytes, little-endian length) and
    /// run through the decoder; the decode picks up two trailing bytes
    /// of drained register state, which are sliced off.
    fn transform(&mut self, buffer: Bytes) -> Result<Vec<Bytes>> {
        if buffer.len() > u16::MAX as usize {
            return Err(Error::invalid(format!(
                "payload of {} bytes overflows the frame length field",
                buffer.len()
            )));
        }

        let mut frame = BytesMut::with_capacity(buffer.len() + FRAME_OVERHEAD);
        frame.put_u8(crate::coder::FRAME_HEADER);
        frame.put_slice(&buffer);
        frame.put_slice(&[0, 0]);
        frame.put_u16_le(buffer.len() as u16);

        let mut shaped = self.decoder.decode(&frame)?;
        if shaped.len() < 2 {
            return Err(Error::invalid("decoder produced no trailing state"));
        }
        shaped.truncate(shaped.len() - 2);

        Ok(vec![Bytes::from(shaped)])
    }

    /// Recover the original datagram by re-encoding the shaped bytes
    /// and slicing the frame header and trailer off the result.
    fn restore(&mut self, buffer: Bytes) -> Result<Vec<Bytes>> {
        let encoded = self.encoder.encode(&buffer);
        // One header byte up front; two state and two length bytes at
        // the back. Always present, even for empty input.
        let body = Bytes::copy_from_slice(&encoded[1..encoded.len() - 4]);
        Ok(vec![body])
    }

    fn dispose(&mut self) {}
}
