//! Per-packet randomization with AES-CBC.
//!
//! Every datagram is encrypted under a fresh random IV, so identical
//! payloads produce unrelated ciphertexts. The plaintext carries a
//! two-byte length prefix and random padding out to the next block
//! boundary, hiding the true payload length.
//!
//! Wire format: `IV(16) ∥ CBC(key, IV, len(2 LE) ∥ data ∥ random_pad)`.

use aes::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes::{Aes128, Aes192, Aes256};
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Error, Result};
use crate::random::{random_padding, SecureRandom};
use crate::shaper::Shaper;

/// Cipher block size in bytes.
pub const CHUNK_SIZE: usize = 16;

/// Size of the per-packet initialization vector.
pub const IV_SIZE: usize = 16;

/// Configuration for [`EncryptionShaper`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionConfig {
    /// Hex-encoded AES key (16, 24, or 32 bytes once decoded).
    pub key: String,
}

impl EncryptionConfig {
    /// A fixed all-zero 16-byte key, suitable for tests.
    pub fn sample() -> Self {
        Self {
            key: hex::encode([0u8; 16]),
        }
    }
}

/// Symmetric key material, wiped from memory on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
struct CipherKey(Vec<u8>);

/// A packet shaper that encrypts each datagram with AES-CBC.
pub struct EncryptionShaper {
    key: CipherKey,
}

impl EncryptionShaper {
    /// Build a shaper from a parsed configuration.
    pub fn new(config: EncryptionConfig) -> Result<Self> {
        let mut shaper = Self {
            key: CipherKey(Vec::new()),
        };
        shaper.configure_struct(config)?;
        Ok(shaper)
    }

    /// Apply a parsed configuration record.
    pub fn configure_struct(&mut self, config: EncryptionConfig) -> Result<()> {
        let key = hex::decode(&config.key)
            .map_err(|err| Error::config(format!("encryption key is not valid hex: {err}")))?;

        if !matches!(key.len(), 16 | 24 | 32) {
            return Err(Error::config(format!(
                "AES key must be 16, 24, or 32 bytes, got {}",
                key.len()
            )));
        }

        self.key = CipherKey(key);
        Ok(())
    }

    /// Length-prefix and pad the payload, then encrypt it.
    ///
    /// Padding always lands strictly past the prefixed data (an aligned
    /// plaintext gains one whole random block), so ciphertext length
    /// never reveals the exact payload length.
    fn seal(&self, iv: &[u8; IV_SIZE], buffer: &[u8]) -> Result<Vec<u8>> {
        if buffer.len() > u16::MAX as usize {
            return Err(Error::invalid(format!(
                "payload of {} bytes overflows the length prefix",
                buffer.len()
            )));
        }

        let mut plaintext = BytesMut::with_capacity(2 + buffer.len() + CHUNK_SIZE);
        plaintext.put_u16_le(buffer.len() as u16);
        plaintext.put_slice(buffer);
        let pad = CHUNK_SIZE - plaintext.len() % CHUNK_SIZE;
        plaintext.put_slice(&random_padding(pad));

        cbc_encrypt(&self.key.0, iv, &plaintext)
    }

    /// Decrypt and strip the length prefix and padding.
    fn open(&self, iv: &[u8], ciphertext: &[u8]) -> Result<Bytes> {
        if ciphertext.len() % CHUNK_SIZE != 0 {
            return Err(Error::invalid(format!(
                "ciphertext of {} bytes is not a whole number of blocks",
                ciphertext.len()
            )));
        }

        let plaintext = cbc_decrypt(&self.key.0, iv, ciphertext)?;
        let length = u16::from_le_bytes([plaintext[0], plaintext[1]]) as usize;
        let rest = &plaintext[2..];

        // A length that overruns the buffer yields whatever is present.
        if rest.len() > length {
            Ok(Bytes::copy_from_slice(&rest[..length]))
        } else {
            Ok(Bytes::copy_from_slice(rest))
        }
    }
}

impl Shaper for EncryptionShaper {
    fn configure(&mut self, config: &str) -> Result<()> {
        let config: EncryptionConfig = serde_json::from_str(config)
            .map_err(|err| Error::config(format!("bad encryption config: {err}")))?;
        self.configure_struct(config)
    }

    fn transform(&mut self, buffer: Bytes) -> Result<Vec<Bytes>> {
        let iv: [u8; IV_SIZE] = SecureRandom::bytes();
        let ciphertext = self.seal(&iv, &buffer)?;

        let mut datagram = BytesMut::with_capacity(IV_SIZE + ciphertext.len());
        datagram.put_slice(&iv);
        datagram.put_slice(&ciphertext);
        Ok(vec![datagram.freeze()])
    }

    fn restore(&mut self, mut buffer: Bytes) -> Result<Vec<Bytes>> {
        // At minimum an IV and the one block holding the length prefix.
        if buffer.len() < IV_SIZE + CHUNK_SIZE {
            return Err(Error::Buffer {
                expected: IV_SIZE + CHUNK_SIZE,
                actual: buffer.len(),
            });
        }

        let iv = buffer.split_to(IV_SIZE);
        Ok(vec![self.open(&iv, &buffer)?])
    }

    fn dispose(&mut self) {
        self.key.zeroize();
    }
}

fn cbc_encrypt(key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher_err = |err: aes::cipher::InvalidLength| Error::Cipher(err.to_string());
    Ok(match key.len() {
        16 => cbc::Encryptor::<Aes128>::new_from_slices(key, iv)
            .map_err(cipher_err)?
            .encrypt_padded_vec_mut::<NoPadding>(plaintext),
        24 => cbc::Encryptor::<Aes192>::new_from_slices(key, iv)
            .map_err(cipher_err)?
            .encrypt_padded_vec_mut::<NoPadding>(plaintext),
        32 => cbc::Encryptor::<Aes256>::new_from_slices(key, iv)
            .map_err(cipher_err)?
            .encrypt_padded_vec_mut::<NoPadding>(plaintext),
        n => return Err(Error::Cipher(format!("unsupported key length {n}"))),
    })
}

fn cbc_decrypt(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    let cipher_err = |err: aes::cipher::InvalidLength| Error::Cipher(err.to_string());
    let unpad_err = |_| Error::Cipher("block decryption failed".to_string());
    Ok(match key.len() {
        16 => cbc::Decryptor::<Aes128>::new_from_slices(key, iv)
            .map_err(cipher_err)?
            .decrypt_padded_vec_mut::<NoPadding>(ciphertext)
            .map_err(unpad_err)?,
        24 => cbc::Decryptor::<Aes192>::new_from_slices(key, iv)
            .map_err(cipher_err)?
            .decrypt_padded_vec_mut::<NoPadding>(ciphertext)
            .map_err(unpad_err)?,
        32 => cbc::Decryptor::<Aes256>::new_from_slices(key, iv)
            .map_err(cipher_err)?
            .decrypt_padded_vec_mut::<NoPadding>(ciphertext)
            .map_err(unpad_err)?,
        n => return Err(Error::Cipher(format!("unsupported key length {n}"))),
    })
}
