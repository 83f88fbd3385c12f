//! ETS keyring decryption primitive.
//!
//! Keyring (`*.knxkeys`) files store tool keys and passwords base64-encoded
//! and AES-128-CBC-encrypted under the keyring password hash, with the hash
//! of the keyring's creation timestamp as the IV. This module unwraps one
//! stored value; parsing the surrounding XML and persisting anything is the
//! caller's concern.

use crate::error::{KnxError, Result};
use crate::secure::crypto::{cbc_decrypt, PayloadBuffer};
use base64ct::{Base64, Encoding};
use sha2::{Digest, Sha256};

/// Stored passwords carry an 8-octet random prefix before the value.
const PASSWORD_PREFIX: usize = 8;

/// The CBC IV for a keyring: the first half of SHA-256 over the keyring's
/// `Created` attribute bytes.
pub fn keyring_iv(created: &[u8]) -> [u8; 16] {
    let digest = Sha256::digest(created);
    let mut iv = [0u8; 16];
    iv.copy_from_slice(&digest[..16]);
    iv
}

/// Decode and decrypt a stored tool key.
///
/// `password_hash` is the [`keyring_password_hash`]
/// (crate::secure::crypto::keyring_password_hash) of the keyring password,
/// `iv` comes from [`keyring_iv`]. Returns the raw key bytes.
pub fn decrypt_tool_key(
    password_hash: &[u8; 16],
    iv: &[u8; 16],
    stored: &str,
) -> Result<PayloadBuffer> {
    let mut buffer = [0u8; 256];
    let decoded = Base64::decode(stored.as_bytes(), &mut buffer)
        .map_err(|_| KnxError::unknown_code())?;
    cbc_decrypt(password_hash, iv, decoded)
}

/// Decode and decrypt a stored password.
///
/// Stored passwords additionally carry an 8-octet random prefix and a
/// PKCS-style pad whose length sits in the final octet; both are stripped.
pub fn decrypt_password(
    password_hash: &[u8; 16],
    iv: &[u8; 16],
    stored: &str,
) -> Result<PayloadBuffer> {
    let decrypted = decrypt_tool_key(password_hash, iv, stored)?;
    let total = decrypted.len();
    if total < PASSWORD_PREFIX + 1 {
        return Err(KnxError::length_mismatch());
    }
    let pad = decrypted.as_slice()[total - 1] as usize;
    let end = total
        .checked_sub(pad)
        .filter(|end| *end >= PASSWORD_PREFIX)
        .ok_or_else(KnxError::length_mismatch)?;
    PayloadBuffer::from_slice(&decrypted.as_slice()[PASSWORD_PREFIX..end])
        .map_err(|_| KnxError::out_of_resource())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secure::crypto::keyring_password_hash;
    use aes::cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit};
    use aes::Aes128;

    /// CBC-encrypt test fixture data the way ETS would store it.
    fn encrypt_fixture(key: &[u8; 16], iv: &[u8; 16], plaintext: &[u8]) -> std::string::String {
        assert_eq!(plaintext.len() % 16, 0);
        let cipher = Aes128::new(GenericArray::from_slice(key));
        let mut previous = *iv;
        let mut out = std::vec::Vec::new();
        for chunk in plaintext.chunks(16) {
            let mut block = [0u8; 16];
            for i in 0..16 {
                block[i] = chunk[i] ^ previous[i];
            }
            let mut ga = GenericArray::from(block);
            cipher.encrypt_block(&mut ga);
            out.extend_from_slice(&ga);
            previous.copy_from_slice(&ga);
        }
        let mut encoded = [0u8; 512];
        std::string::String::from(Base64::encode(&out, &mut encoded).unwrap())
    }

    #[test]
    fn tool_key_round_trip() {
        let key = keyring_password_hash(b"keyring-pw").unwrap();
        let iv = keyring_iv(b"2021-03-04T16:23:admin");
        let tool_key = [0xA5u8; 16];
        let stored = encrypt_fixture(&key, &iv, &tool_key);

        let unwrapped = decrypt_tool_key(&key, &iv, &stored).unwrap();
        assert_eq!(unwrapped.as_slice(), &tool_key);
    }

    #[test]
    fn password_strips_prefix_and_padding() {
        let key = keyring_password_hash(b"keyring-pw").unwrap();
        let iv = keyring_iv(b"created");

        // 8-octet prefix + "secret" + 18 octets of padding, count in the
        // final octet.
        let mut plaintext = std::vec::Vec::new();
        plaintext.extend_from_slice(&[0x10; 8]);
        plaintext.extend_from_slice(b"secret");
        let pad = 32 - plaintext.len();
        for _ in 0..pad {
            plaintext.push(pad as u8);
        }
        let stored = encrypt_fixture(&key, &iv, &plaintext);

        let password = decrypt_password(&key, &iv, &stored).unwrap();
        assert_eq!(password.as_slice(), b"secret");
    }

    #[test]
    fn invalid_base64_is_rejected() {
        let key = [0u8; 16];
        let iv = [0u8; 16];
        assert!(decrypt_tool_key(&key, &iv, "!!not-base64!!").is_err());
    }

    #[test]
    fn nonsense_padding_is_rejected() {
        let key = keyring_password_hash(b"pw").unwrap();
        let iv = keyring_iv(b"x");
        // Decrypting garbage will produce an implausible pad count more
        // often than not; force the short-input path deterministically.
        let short = encrypt_fixture(&key, &iv, &[0u8; 16]);
        // pad byte 0 -> end == total, prefix rule still applies
        let result = decrypt_password(&key, &iv, &short);
        // Either rejected outright or stripped to at most 8 octets fewer.
        if let Ok(p) = result {
            assert!(p.len() <= 8);
        }
    }

    #[test]
    fn iv_is_half_of_sha256() {
        let iv = keyring_iv(b"created");
        let digest = Sha256::digest(b"created");
        assert_eq!(&iv[..], &digest[..16]);
    }
}
