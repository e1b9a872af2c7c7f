//! Encrypted storage of users' bank tokens.
//!
//! Tokens are only ever stored encrypted. Callers go through [set_bank_token]
//! and [get_bank_token], which encrypt and decrypt with a [TokenCipher].

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};
use rusqlite::{Connection, OptionalExtension};
use sha2::{Digest, Sha256};

use crate::{Error, user::UserID};

const NONCE_LENGTH: usize = 12;

/// Encrypts tokens before they are stored and decrypts them after they are read.
pub trait TokenCipher: Send + Sync {
    /// Encrypt `token` into text that can be stored.
    fn encrypt(&self, token: &str) -> Result<String, Error>;

    /// Decrypt text produced by [TokenCipher::encrypt].
    fn decrypt(&self, stored: &str) -> Result<String, Error>;
}

/// AES-256-GCM with a key derived from a secret.
///
/// Stored tokens are the hex encoding of a random 12 byte nonce followed by the ciphertext.
#[derive(Clone)]
pub struct AesGcmCipher {
    cipher: Aes256Gcm,
}

impl AesGcmCipher {
    /// Create a cipher whose key is the SHA-256 digest of `secret`.
    pub fn new(secret: &str) -> Self {
        let digest = Sha256::digest(secret.as_bytes());
        let key = Key::<Aes256Gcm>::from_slice(digest.as_slice());

        Self {
            cipher: Aes256Gcm::new(key),
        }
    }
}

impl std::fmt::Debug for AesGcmCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AesGcmCipher { .. }")
    }
}

impl TokenCipher for AesGcmCipher {
    fn encrypt(&self, token: &str) -> Result<String, Error> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, token.as_bytes())
            .map_err(|_| Error::CredentialError("encryption failed".to_owned()))?;

        let mut data = Vec::with_capacity(NONCE_LENGTH + ciphertext.len());
        data.extend_from_slice(&nonce);
        data.extend_from_slice(&ciphertext);

        Ok(hex::encode(data))
    }

    fn decrypt(&self, stored: &str) -> Result<String, Error> {
        let data = hex::decode(stored)
            .map_err(|error| Error::CredentialError(format!("stored token is not hex: {error}")))?;

        if data.len() <= NONCE_LENGTH {
            return Err(Error::CredentialError("stored token is too short".to_owned()));
        }

        let nonce = Nonce::from_slice(&data[..NONCE_LENGTH]);
        let plaintext = self
            .cipher
            .decrypt(nonce, &data[NONCE_LENGTH..])
            .map_err(|_| {
                Error::CredentialError("stored token could not be decrypted".to_owned())
            })?;

        String::from_utf8(plaintext)
            .map_err(|_| Error::CredentialError("stored token is not UTF-8".to_owned()))
    }
}

/// Store `token` for the user, encrypted with `cipher`, or clear it with `None`.
///
/// # Errors
/// Returns [Error::NotFound] if the user does not exist.
pub fn set_bank_token(
    user_id: UserID,
    token: Option<&str>,
    cipher: &dyn TokenCipher,
    connection: &Connection,
) -> Result<(), Error> {
    let stored = token.map(|token| cipher.encrypt(token)).transpose()?;

    let rows = connection.execute(
        "UPDATE user SET bank_token = ?1 WHERE id = ?2",
        (stored, user_id.as_i64()),
    )?;

    if rows == 0 {
        return Err(Error::NotFound);
    }

    Ok(())
}

/// Read and decrypt the user's token, `None` if they have not connected a bank.
///
/// # Errors
/// Returns [Error::NotFound] if the user does not exist, or
/// [Error::CredentialError] if the stored token cannot be decrypted.
pub fn get_bank_token(
    user_id: UserID,
    cipher: &dyn TokenCipher,
    connection: &Connection,
) -> Result<Option<String>, Error> {
    let stored: Option<String> = connection
        .query_row(
            "SELECT bank_token FROM user WHERE id = ?1",
            (user_id.as_i64(),),
            |row| row.get(0),
        )
        .optional()?
        .ok_or(Error::NotFound)?;

    stored.map(|stored| cipher.decrypt(&stored)).transpose()
}
