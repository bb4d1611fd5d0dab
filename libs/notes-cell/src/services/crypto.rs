// libs/notes-cell/src/services/crypto.rs
//
// Symmetric encryption of clinical note text. The rest of the crate treats
// this as a black box: plaintext in, opaque string out, and an error (not
// garbage) for anything tampered or malformed.

use base64::{engine::general_purpose::STANDARD, Engine};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Invalid encryption key")]
    InvalidKey,

    #[error("Encryption failed")]
    EncryptFailed,

    #[error("Could not decrypt content")]
    DecryptFailed,
}

pub struct NoteCrypto {
    key: LessSafeKey,
    rng: SystemRandom,
}

impl std::fmt::Debug for NoteCrypto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NoteCrypto").finish_non_exhaustive()
    }
}

impl NoteCrypto {
    /// Build from a base64-encoded 256-bit key.
    pub fn new(key_b64: &str) -> Result<Self, CryptoError> {
        let key_bytes = STANDARD.decode(key_b64).map_err(|_| CryptoError::InvalidKey)?;
        let unbound = UnboundKey::new(&AES_256_GCM, &key_bytes).map_err(|_| CryptoError::InvalidKey)?;

        Ok(Self {
            key: LessSafeKey::new(unbound),
            rng: SystemRandom::new(),
        })
    }

    /// AES-256-GCM with a fresh random nonce per note; the opaque output is
    /// base64(nonce || ciphertext || tag).
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng.fill(&mut nonce_bytes).map_err(|_| CryptoError::EncryptFailed)?;

        let nonce = Nonce::assume_unique_for_key(nonce_bytes);
        let mut in_out = plaintext.as_bytes().to_vec();
        self.key
            .seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| CryptoError::EncryptFailed)?;

        let mut combined = nonce_bytes.to_vec();
        combined.extend_from_slice(&in_out);
        Ok(STANDARD.encode(combined))
    }

    pub fn decrypt(&self, opaque: &str) -> Result<String, CryptoError> {
        let combined = STANDARD.decode(opaque).map_err(|_| CryptoError::DecryptFailed)?;
        if combined.len() <= NONCE_LEN {
            return Err(CryptoError::DecryptFailed);
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
        let nonce =
            Nonce::try_assume_unique_for_key(nonce_bytes).map_err(|_| CryptoError::DecryptFailed)?;

        let mut in_out = ciphertext.to_vec();
        let plaintext = self
            .key
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| CryptoError::DecryptFailed)?;

        String::from_utf8(plaintext.to_vec()).map_err(|_| CryptoError::DecryptFailed)
    }
}
