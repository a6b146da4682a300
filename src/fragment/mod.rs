//! Fragment records and their wire codec.
//!
//! An oversized datagram is carried as several fragments sharing one
//! random identifier; the receiver reassembles them with the
//! [`Defragmenter`].
//!
//! Wire format:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Length (2 LE) │ Id (32) │ Index (1) │ Count (1)              │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Payload (Length bytes)  │ Padding (whatever remains)         │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Padding rounds the record out so that, once the encryption layer
//! prepends its IV, the datagram is a whole number of cipher blocks.

mod defrag;

pub use defrag::{Defragmenter, CACHE_EXPIRATION};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::random::SecureRandom;

/// Size of the random fragment identifier in bytes. Chosen as a common
/// hash output size; collisions break reassembly, so it is generous.
pub const ID_SIZE: usize = 32;

/// Fixed header size: length + id + index + count.
pub const HEADER_SIZE: usize = 2 + ID_SIZE + 1 + 1;

/// One piece of a fragmented datagram.
#[derive(Debug, Clone)]
pub struct Fragment {
    /// Payload byte count.
    pub length: u16,
    /// Random identifier shared by all fragments of one datagram.
    pub id: [u8; ID_SIZE],
    /// Ordinal of this fragment, in `[0, count)`.
    pub index: u8,
    /// Total number of fragments for this id.
    pub count: u8,
    /// The carried slice of the original datagram.
    pub payload: Bytes,
    /// Random fill rounding the record to the target size.
    pub padding: Bytes,
}

/// Make a random identifier for a fragmented datagram. Uniqueness is
/// probabilistic; reassembly breaks if two live datagrams collide.
pub(crate) fn make_random_id() -> [u8; ID_SIZE] {
    SecureRandom::bytes()
}

impl Fragment {
    /// Serialize the fragment for the wire.
    pub fn encode(&self) -> Bytes {
        let mut buf =
            BytesMut::with_capacity(HEADER_SIZE + self.payload.len() + self.padding.len());

        buf.put_u16_le(self.length);
        buf.put_slice(&self.id);
        buf.put_u8(self.index);
        buf.put_u8(self.count);
        buf.put_slice(&self.payload);
        buf.put_slice(&self.padding);

        buf.freeze()
    }

    /// Deserialize a fragment from the wire.
    ///
    /// Fails when the buffer is shorter than the fixed header, when the
    /// remainder is shorter than the declared payload length, or when
    /// the index/count pair is inconsistent.
    pub fn decode(mut data: Bytes) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(Error::Buffer {
                expected: HEADER_SIZE,
                actual: data.len(),
            });
        }

        let length = data.get_u16_le();
        let mut id = [0u8; ID_SIZE];
        data.copy_to_slice(&mut id);
        let index = data.get_u8();
        let count = data.get_u8();

        if count == 0 || index >= count {
            return Err(Error::invalid(format!(
                "fragment index {index} out of range for count {count}"
            )));
        }

        if data.len() < length as usize {
            return Err(Error::Buffer {
                expected: length as usize,
                actual: data.len(),
            });
        }

        let payload = data.split_to(length as usize);

        Ok(Self {
            length,
            id,
            index,
            count,
            payload,
            padding: data,
        })
    }

    /// Total serialized size of this fragment.
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len() + self.padding.len()
    }
}
