use base64::{Engine as _, engine::general_purpose::STANDARD};
use chacha20poly1305::{
    ChaCha20Poly1305, Key, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};
use thiserror::Error;

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum SecretsError {
    #[error("Invalid encoding: {0}")]
    Encoding(#[from] base64::DecodeError),
    #[error("Master key must be {KEY_LEN} bytes")]
    InvalidKey,
    #[error("Sealed value is truncated")]
    Truncated,
    #[error("Failed to encrypt or decrypt value")]
    Crypto,
    #[error("Decrypted value is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Decrypts stored registry credentials.
pub trait SecretsService: Send + Sync {
    /// Seal `plaintext`, returning `(encrypted_key, encrypted_value)`.
    fn encrypt(&self, plaintext: &str) -> Result<(String, String), SecretsError>;

    fn decrypt(&self, encrypted_key: &str, encrypted_value: &str) -> Result<String, SecretsError>;
}

/// Envelope encryption: a fresh data key per secret, itself sealed by the
/// master key. Sealed values are base64 of `nonce || ciphertext`.
pub struct EnvelopeSecrets {
    master: ChaCha20Poly1305,
}

impl EnvelopeSecrets {
    pub fn new(master_key: &[u8]) -> Result<Self, SecretsError> {
        if master_key.len() != KEY_LEN {
            return Err(SecretsError::InvalidKey);
        }
        Ok(Self {
            master: ChaCha20Poly1305::new(Key::from_slice(master_key)),
        })
    }

    pub fn from_base64(master_key: &str) -> Result<Self, SecretsError> {
        Self::new(&STANDARD.decode(master_key.trim())?)
    }
}

fn seal(cipher: &ChaCha20Poly1305, plaintext: &[u8]) -> Result<String, SecretsError> {
    let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| SecretsError::Crypto)?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    Ok(STANDARD.encode(sealed))
}

fn open(cipher: &ChaCha20Poly1305, sealed: &str) -> Result<Vec<u8>, SecretsError> {
    let sealed = STANDARD.decode(sealed.trim())?;
    if sealed.len() < NONCE_LEN {
        return Err(SecretsError::Truncated);
    }

    let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| SecretsError::Crypto)
}

impl SecretsService for EnvelopeSecrets {
    fn encrypt(&self, plaintext: &str) -> Result<(String, String), SecretsError> {
        let data_key = ChaCha20Poly1305::generate_key(&mut OsRng);
        let encrypted_key = seal(&self.master, &data_key)?;
        let encrypted_value = seal(&ChaCha20Poly1305::new(&data_key), plaintext.as_bytes())?;
        Ok((encrypted_key, encrypted_value))
    }

    fn decrypt(&self, encrypted_key: &str, encrypted_value: &str) -> Result<String, SecretsError> {
        let data_key = open(&self.master, encrypted_key)?;
        if data_key.len() != KEY_LEN {
            return Err(SecretsError::InvalidKey);
        }

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&data_key));
        Ok(String::from_utf8(open(&cipher, encrypted_value)?)?)
    }
}
