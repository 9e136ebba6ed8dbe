//! Deterministic per-cell encryption.
//!
//! AES-256-CBC with a **fixed IV derived from the first 16 bytes of the
//! key**. This makes the cipher deterministic: identical plaintext always
//! yields identical ciphertext under the same key, which is what allows
//! encrypted cells to be matched by equality without ever decrypting the
//! stored corpus. The cost is that equality of repeated plaintexts leaks
//! across the whole corpus — callers must not assume IND-CPA security here.
//! That trade-off is deliberate; changing it would break search.

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use thiserror::Error;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Errors surfaced by [`CellCipher::decrypt`]. `encrypt` never fails on
/// well-formed input.
#[derive(Debug, Error)]
pub enum CipherError {
    #[error("ciphertext is not valid hex: {0}")]
    BadHex(#[from] hex::FromHexError),

    #[error("decryption failed")]
    DecryptFailed,

    #[error("decrypted data is not valid UTF-8")]
    BadUtf8,
}

/// Encrypts and decrypts individual cell values.
///
/// The key is process-wide immutable configuration, injected once at
/// construction — see [`crate::config::EncryptionConfig::key_bytes`].
pub struct CellCipher {
    key: [u8; 32],
    iv: [u8; 16],
}

impl CellCipher {
    pub fn new(key: [u8; 32]) -> Self {
        let mut iv = [0u8; 16];
        iv.copy_from_slice(&key[..16]);
        Self { key, iv }
    }

    /// Encrypts a string, returning lowercase hex.
    ///
    /// PKCS#7 padding to the 16-byte block size; deterministic for a fixed
    /// key (see module docs).
    pub fn encrypt(&self, plaintext: &str) -> String {
        let ciphertext = Aes256CbcEnc::new(&self.key.into(), &self.iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());
        hex::encode(ciphertext)
    }

    /// Decrypts a lowercase-hex ciphertext produced by [`Self::encrypt`].
    ///
    /// Invalid hex, corrupt padding, and non-UTF-8 plaintext all surface as
    /// a [`CipherError`] — never silently returned garbage.
    pub fn decrypt(&self, ciphertext_hex: &str) -> Result<String, CipherError> {
        let ciphertext = hex::decode(ciphertext_hex)?;
        let plaintext = Aes256CbcDec::new(&self.key.into(), &self.iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
            .map_err(|_| CipherError::DecryptFailed)?;
        String::from_utf8(plaintext).map_err(|_| CipherError::BadUtf8)
    }
}
