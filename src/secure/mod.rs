//! KNXnet/IP Secure.
//!
//! The secure overlay in three pieces: [`crypto`] holds the
//! protocol-prescribed primitives (PBKDF2 hashes, X25519 agreement, the
//! AES-CCM MAC and counter-mode construction), [`frames`] the secure
//! service frame grammars, and [`session`] the session state machine with
//! its async driver plus the multicast [`session::GroupTimer`].
//! [`keyring`] unwraps values stored in ETS keyring files.
//!
//! The cryptography backend sits behind the `secure` feature. Without it
//! the rest of the stack still runs plain KNXnet/IP; the secure entry
//! points remain callable and report `CryptoUnavailable` at runtime.
//! [`supports_cryptography`] tells the two builds apart.

#[cfg(feature = "secure")]
pub mod crypto;
#[cfg(feature = "secure")]
pub mod frames;
#[cfg(feature = "secure")]
pub mod keyring;
#[cfg(feature = "secure")]
pub mod session;

/// Whether the cryptography backend is compiled in.
pub const fn supports_cryptography() -> bool {
    cfg!(feature = "secure")
}

/// Password hashing and payload decryption without a backend: every
/// function is present and fails with `CryptoUnavailable`.
#[cfg(not(feature = "secure"))]
pub mod crypto {
    use crate::bytes::MAX_FRAME_SIZE;
    use crate::error::{KnxError, Result};
    use heapless::Vec;

    /// Buffer type for encrypted/decrypted payloads.
    pub type PayloadBuffer = Vec<u8, MAX_FRAME_SIZE>;

    /// Hash of a user password, the key for SESSION_AUTHENTICATE MACs.
    pub fn user_password_hash(_password: &[u8]) -> Result<[u8; 16]> {
        Err(KnxError::crypto_unavailable())
    }

    /// Hash of a device authentication code, the key for SESSION_RESPONSE
    /// MACs.
    pub fn device_authentication_code_hash(_password: &[u8]) -> Result<[u8; 16]> {
        Err(KnxError::crypto_unavailable())
    }

    /// Hash of an ETS keyring password, the key unwrapping stored values.
    pub fn keyring_password_hash(_password: &[u8]) -> Result<[u8; 16]> {
        Err(KnxError::crypto_unavailable())
    }
}

/// Secure session credentials without a backend: derivation is the first
/// step of every session and fails with `CryptoUnavailable`.
#[cfg(not(feature = "secure"))]
pub mod session {
    use crate::error::{KnxError, Result};

    /// Credentials for one secure session.
    pub struct SecureCredentials {
        _private: (),
    }

    impl SecureCredentials {
        /// Derive both hashes from the plaintext secrets.
        pub fn derive(_user_id: u8, _user_password: &[u8], _device_code: &[u8]) -> Result<Self> {
            Err(KnxError::crypto_unavailable())
        }
    }
}

/// Keyring unwrapping without a backend: both decrypt entry points fail
/// with `CryptoUnavailable`.
#[cfg(not(feature = "secure"))]
pub mod keyring {
    use crate::error::{KnxError, Result};
    use crate::secure::crypto::PayloadBuffer;

    /// Decode and decrypt a stored tool key.
    pub fn decrypt_tool_key(
        _password_hash: &[u8; 16],
        _iv: &[u8; 16],
        _stored: &str,
    ) -> Result<PayloadBuffer> {
        Err(KnxError::crypto_unavailable())
    }

    /// Decode and decrypt a stored password.
    pub fn decrypt_password(
        _password_hash: &[u8; 16],
        _iv: &[u8; 16],
        _stored: &str,
    ) -> Result<PayloadBuffer> {
        Err(KnxError::crypto_unavailable())
    }
}
