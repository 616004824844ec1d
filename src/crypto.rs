//! Decryption seam for AES-encrypted MSR payloads.
//!
//! The library never implements AES itself. Hosts plug a [`Decryptor`] into
//! the reader configuration; encrypted swipes without one are delivered
//! with `status == false`.

use serde::{Deserialize, Serialize};

use crate::error::CryptoError;

/// AES key length configured on the reader.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum AesKeyLength {
    #[default]
    Aes128 = 0,
    Aes192 = 1,
    Aes256 = 2,
}

impl AesKeyLength {
    /// Parses the key length byte of an MSR frame.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Aes128),
            1 => Some(Self::Aes192),
            2 => Some(Self::Aes256),
            _ => None,
        }
    }

    /// Key size in bits.
    #[must_use]
    pub const fn bits(self) -> u16 {
        match self {
            Self::Aes128 => 128,
            Self::Aes192 => 192,
            Self::Aes256 => 256,
        }
    }
}

/// External AES decryption collaborator.
pub trait Decryptor: Send + Sync {
    /// Decrypts an MSR payload.
    fn decrypt(&self, cipher: &[u8], key_length: AesKeyLength) -> Result<Vec<u8>, CryptoError>;
}

impl<F> Decryptor for F
where
    F: Fn(&[u8], AesKeyLength) -> Result<Vec<u8>, CryptoError> + Send + Sync,
{
    fn decrypt(&self, cipher: &[u8], key_length: AesKeyLength) -> Result<Vec<u8>, CryptoError> {
        self(cipher, key_length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_length_from_byte() {
        assert_eq!(AesKeyLength::from_byte(2), Some(AesKeyLength::Aes256));
        assert_eq!(AesKeyLength::from_byte(3), None);
        assert_eq!(AesKeyLength::Aes192.bits(), 192);
    }

    #[test]
    fn test_closure_decryptor() {
        let xor = |cipher: &[u8], _: AesKeyLength| -> Result<Vec<u8>, CryptoError> {
            Ok(cipher.iter().map(|b| b ^ 0xFF).collect())
        };
        let plain = xor.decrypt(&[0x00, 0xFE], AesKeyLength::Aes128).unwrap();
        assert_eq!(plain, vec![0xFF, 0x01]);
    }
}
