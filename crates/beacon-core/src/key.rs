//! Master key decoding
//!
//! The provisioned master key is embedded in the firmware image as standard
//! base64 text. Decoding is length-checked against the configured key size
//! before a single byte is written, and a [`MasterKey`] only exists once a
//! decode fully succeeded.

use core::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use log::error;
use thiserror_no_std::Error;
use zeroize::Zeroize;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyError {
    /// The decoded length implied by the text does not match the key size.
    #[error("Key size mismatch (expected {expected} bytes, encoding holds {actual})")]
    SizeMismatch { expected: usize, actual: usize },
    /// Invalid characters or malformed padding.
    #[error("Malformed base64 key text")]
    Decode,
}

/// Number of bytes the base64 text decodes to.
///
/// Every four characters carry three bytes and each trailing `=` removes one.
pub fn decoded_size(encoded: &str) -> usize {
    let padding = encoded.bytes().rev().take_while(|&b| b == b'=').count();
    (encoded.len() / 4 * 3).saturating_sub(padding)
}

/// Decode `encoded` into `dest`.
///
/// On [`KeyError::SizeMismatch`] `dest` is left untouched. On
/// [`KeyError::Decode`] `dest` is wiped, callers must not use it either way.
pub fn decode_into<const N: usize>(encoded: &str, dest: &mut [u8; N]) -> Result<(), KeyError> {
    let actual = decoded_size(encoded);
    if actual != N {
        return Err(KeyError::SizeMismatch {
            expected: N,
            actual,
        });
    }

    match STANDARD.decode_slice(encoded, dest) {
        Ok(written) if written == N => Ok(()),
        Ok(written) => {
            error!("Key decoded to {} bytes, expected {}", written, N);
            dest.zeroize();
            Err(KeyError::Decode)
        }
        Err(e) => {
            error!("Key decode failed: {:?}", e);
            dest.zeroize();
            Err(KeyError::Decode)
        }
    }
}

/// Fixed-size secret key material.
///
/// Only constructed from a successful decode. Contents never show up in
/// `Debug` output and are wiped on drop.
pub struct MasterKey<const N: usize> {
    bytes: [u8; N],
}

impl<const N: usize> MasterKey<N> {
    /// Decode a master key from its base64 text.
    pub fn decode(encoded: &str) -> Result<Self, KeyError> {
        const { assert!(N > 0, "master key size must be non-zero") };

        let mut scratch = Self { bytes: [0u8; N] };
        decode_into(encoded, &mut scratch.bytes)?;
        Ok(scratch)
    }

    /// Borrow the raw key bytes.
    pub fn expose(&self) -> &[u8; N] {
        &self.bytes
    }

    pub const fn len(&self) -> usize {
        N
    }

    pub const fn is_empty(&self) -> bool {
        N == 0
    }
}

impl<const N: usize> Zeroize for MasterKey<N> {
    fn zeroize(&mut self) {
        self.bytes.zeroize();
    }
}

impl<const N: usize> Drop for MasterKey<N> {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl<const N: usize> fmt::Debug for MasterKey<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MasterKey<{}>([REDACTED])", N)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 32 bytes 0x00..=0x1f
    const KEY_32: &str = "AAECAwQFBgcICQoLDA0ODxAREhMUFRYXGBkaGxwdHh8=";
    // 16 bytes 0x00..=0x0f
    const KEY_16: &str = "AAECAwQFBgcICQoLDA0ODw==";

    fn sequential<const N: usize>() -> [u8; N] {
        core::array::from_fn(|i| i as u8)
    }

    #[test]
    fn test_decoded_size_accounts_for_padding() {
        assert_eq!(decoded_size(""), 0);
        assert_eq!(decoded_size("QQ=="), 1);
        assert_eq!(decoded_size("QUI="), 2);
        assert_eq!(decoded_size("QUJD"), 3);
        assert_eq!(decoded_size(KEY_16), 16);
        assert_eq!(decoded_size(KEY_32), 32);
    }

    #[test]
    fn test_decode_valid_key() {
        let mut dest = [0u8; 32];
        decode_into(KEY_32, &mut dest).unwrap();
        assert_eq!(dest, sequential::<32>());
    }

    #[test]
    fn test_size_mismatch_leaves_destination_untouched() {
        let mut dest = [0xAAu8; 32];
        let err = decode_into(KEY_16, &mut dest).unwrap_err();
        assert_eq!(
            err,
            KeyError::SizeMismatch {
                expected: 32,
                actual: 16
            }
        );
        assert_eq!(dest, [0xAAu8; 32]);
    }

    #[test]
    fn test_empty_and_truncated_input() {
        let mut dest = [0x55u8; 16];
        assert!(matches!(
            decode_into("", &mut dest),
            Err(KeyError::SizeMismatch { actual: 0, .. })
        ));
        // Drop the final quad of the 16-byte key
        assert!(matches!(
            decode_into(&KEY_16[..KEY_16.len() - 4], &mut dest),
            Err(KeyError::SizeMismatch { actual: 15, .. })
        ));
        assert_eq!(dest, [0x55u8; 16]);
    }

    #[test]
    fn test_invalid_characters_are_decode_errors() {
        // Same length as a valid 16-byte key, one character outside the alphabet
        let mut dest = [0u8; 16];
        assert_eq!(
            decode_into("AAECAwQFBgcI*QoLDA0ODw==", &mut dest),
            Err(KeyError::Decode)
        );
        assert_eq!(dest, [0u8; 16]);
    }

    #[test]
    fn test_misplaced_padding_is_a_decode_error() {
        let mut dest = [0u8; 2];
        assert_eq!(decode_into("Q=I=", &mut dest), Err(KeyError::Decode));
    }

    #[test]
    fn test_master_key_decode() {
        let key = MasterKey::<16>::decode(KEY_16).unwrap();
        assert_eq!(key.expose(), &sequential::<16>());
        assert_eq!(key.len(), 16);
    }

    #[test]
    fn test_master_key_zeroize() {
        let mut key = MasterKey::<16>::decode(KEY_16).unwrap();
        key.zeroize();
        assert_eq!(key.expose(), &[0u8; 16]);
    }

    #[test]
    fn test_master_key_debug_is_redacted() {
        use core::fmt::Write;

        let key = MasterKey::<16>::decode(KEY_16).unwrap();
        let mut out = heapless::String::<64>::new();
        write!(out, "{:?}", key).unwrap();
        assert_eq!(out.as_str(), "MasterKey<16>([REDACTED])");
    }
}
