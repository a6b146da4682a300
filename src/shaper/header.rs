//! Fixed-header shaper.
//!
//! Prepends a known byte prefix to every outgoing datagram and strips
//! it from incoming ones. A datagram that does not carry the expected
//! prefix passes through unchanged; a missing header is not an error.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::shaper::Shaper;

/// Configuration for [`HeaderShaper`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeaderConfig {
    /// Hex-encoded prefix added to each outgoing datagram.
    pub add_header: String,
    /// Hex-encoded prefix stripped from each incoming datagram.
    pub remove_header: String,
}

impl HeaderConfig {
    /// A fixed two-byte header, suitable for tests.
    pub fn sample() -> Self {
        let header = hex::encode([0x41, 0x02]);
        Self {
            add_header: header.clone(),
            remove_header: header,
        }
    }
}

/// A packet shaper that injects and strips a fixed prefix.
pub struct HeaderShaper {
    add_header: Bytes,
    remove_header: Bytes,
}

impl HeaderShaper {
    /// Build a shaper from a parsed configuration.
    pub fn new(config: HeaderConfig) -> Result<Self> {
        let mut shaper = Self {
            add_header: Bytes::new(),
            remove_header: Bytes::new(),
        };
        shaper.configure_struct(config)?;
        Ok(shaper)
    }

    /// Apply a parsed configuration record.
    pub fn configure_struct(&mut self, config: HeaderConfig) -> Result<()> {
        let add = hex::decode(&config.add_header)
            .map_err(|err| Error::config(format!("add_header is not valid hex: {err}")))?;
        let remove = hex::decode(&config.remove_header)
            .map_err(|err| Error::config(format!("remove_header is not valid hex: {err}")))?;

        self.add_header = Bytes::from(add);
        self.remove_header = Bytes::from(remove);
        Ok(())
    }
}

impl Shaper for HeaderShaper {
    fn configure(&mut self, config: &str) -> Result<()> {
        let config: HeaderConfig = serde_json::from_str(config)
            .map_err(|err| Error::config(format!("bad header config: {err}")))?;
        self.configure_struct(config)
    }

    fn transform(&mut self, buffer: Bytes) -> Result<Vec<Bytes>> {
        let mut datagram = BytesMut::with_capacity(self.add_header.len() + buffer.len());
        datagram.put_slice(&self.add_header);
        datagram.put_slice(&buffer);
        Ok(vec![datagram.freeze()])
    }

    fn restore(&mut self, buffer: Bytes) -> Result<Vec<Bytes>> {
        if buffer.starts_with(&self.remove_header) {
            Ok(vec![buffer.slice(self.remove_header.len()..)])
        } else {
            Ok(vec![buffer])
        }
    }

    fn dispose(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_shaper() -> HeaderShaper {
        HeaderShaper::new(HeaderConfig::sample()).unwrap()
    }

    #[test]
    fn test_round_trip() {
        let mut shaper = sample_shaper();
        let payload = Bytes::from_static(b"behind the header");

        let datagrams = shaper.transform(payload.clone()).unwrap();
        assert_eq!(datagrams.len(), 1);
        assert_eq!(&datagrams[0][..2], &[0x41, 0x02]);
        assert_eq!(&datagrams[0][2..], payload.as_ref());

        assert_eq!(shaper.restore(datagrams[0].clone()).unwrap(), vec![payload]);
    }

    #[test]
    fn test_restore_passes_through_unheadered() {
        let mut shaper = sample_shaper();
        let datagram = Bytes::from_static(b"\x99\x99no header here");
        assert_eq!(
            shaper.restore(datagram.clone()).unwrap(),
            vec![datagram]
        );
    }

    #[test]
    fn test_restore_short_buffer_passes_through() {
        let mut shaper = sample_shaper();
        let datagram = Bytes::from_static(&[0x41]);
        assert_eq!(
            shaper.restore(datagram.clone()).unwrap(),
            vec![datagram]
        );
    }

    #[test]
    fn test_empty_payload() {
        let mut shaper = sample_shaper();
        let datagrams = shaper.transform(Bytes::new()).unwrap();
        assert_eq!(datagrams[0].as_ref(), &[0x41, 0x02]);

        let restored = shaper.restore(datagrams[0].clone()).unwrap();
        assert!(restored[0].is_empty());
    }

    #[test]
    fn test_rejects_bad_hex() {
        assert!(HeaderShaper::new(HeaderConfig {
            add_header: "41".into(),
            remove_header: "not hex".into(),
        })
        .is_err());
    }

    #[test]
    fn test_asymmetric_headers() {
        let mut shaper = HeaderShaper::new(HeaderConfig {
            add_header: hex::encode(b"out"),
            remove_header: hex::encode(b"in"),
        })
        .unwrap();

        let datagram = shaper.transform(Bytes::from_static(b"X")).unwrap().remove(0);
        assert_eq!(datagram.as_ref(), b"outX");

        let restored = shaper.restore(Bytes::from_static(b"inY")).unwrap();
        assert_eq!(restored[0].as_ref(), b"Y");
    }
}
