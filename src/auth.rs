/// Admin password handling
/// Passwords are stored as lowercase hex SHA-256 digests.
///
/// Uses the sha2 crate through the digest trait - no custom crypto implementation.

use digest::Digest;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

/// Minimum length for a new password
pub const MIN_PASSWORD_LENGTH: usize = 6;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Current password is required")]
    CurrentPasswordMissing,

    #[error("New password is required")]
    NewPasswordMissing,

    #[error("New password must be at least {MIN_PASSWORD_LENGTH} characters")]
    PasswordTooShort,

    #[error("New password and confirmation do not match")]
    ConfirmationMismatch,

    #[error("Current password is incorrect")]
    IncorrectPassword,
}

/// Persisted credential
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthState {
    pub password_hash: String,
}

impl AuthState {
    pub fn from_password(plaintext: &str) -> Self {
        Self {
            password_hash: hash_password(plaintext),
        }
    }

    pub fn verify(&self, plaintext: &str) -> bool {
        verify_password(plaintext, &self.password_hash)
    }
}

/// SHA-256 of the password as lowercase hex
pub fn hash_password(plaintext: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(plaintext.as_bytes());
    hex::encode(hasher.finalize())
}

/// Compare a candidate password with a stored hash without short-circuiting on the first differing byte
pub fn verify_password(plaintext: &str, hash: &str) -> bool {
    let computed = hash_password(plaintext);
    let expected = hash.trim().to_ascii_lowercase();
    if computed.len() != expected.len() {
        return false;
    }
    computed
        .bytes()
        .zip(expected.bytes())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

/// Validate a password change and return the new credential.
/// Checks run in order: both fields present, length, confirmation, then the current password.
pub fn change_password(
    state: &AuthState,
    current: &str,
    new: &str,
    confirm: &str,
) -> Result<AuthState, AuthError> {
    if current.is_empty() {
        return Err(AuthError::CurrentPasswordMissing);
    }
    if new.is_empty() {
        return Err(AuthError::NewPasswordMissing);
    }
    if new.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(AuthError::PasswordTooShort);
    }
    if new != confirm {
        return Err(AuthError::ConfirmationMismatch);
    }
    if !state.verify(current) {
        return Err(AuthError::IncorrectPassword);
    }
    Ok(AuthState::from_password(new))
}

/// Hex encoding for digest output
mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{:02x}", b)).collect()
    }
}
