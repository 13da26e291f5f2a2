//! The crypto provider boundary: HKDF, AES-CCM AEAD, ECDH, and signature
//! verification are all external collaborators. This crate only calls
//! through this trait; it never implements a primitive itself.

use async_trait::async_trait;

use crate::error::Result;

/// A symmetric AEAD key, as produced by HKDF and consumed by
/// `SecureSession`.
pub type AeadKey = [u8; 16];

/// A 13-byte AES-CCM nonce: `security_flags || message_id_le || source_node_id_le`.
pub type Nonce = [u8; 13];

#[async_trait]
pub trait CryptoProvider: Send + Sync {
    /// `HKDF(ikm, salt, info, len)`.
    async fn hkdf(&self, ikm: &[u8], salt: &[u8], info: &[u8], len: usize) -> Result<Vec<u8>>;

    /// AEAD-encrypt `plaintext` under `key`, authenticating `aad`.
    async fn aead_encrypt(&self, key: &AeadKey, nonce: &Nonce, aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>>;

    /// AEAD-decrypt `ciphertext` under `key`, authenticating `aad`. Fails
    /// on a bad tag; callers must not treat this as session-fatal.
    async fn aead_decrypt(&self, key: &AeadKey, nonce: &Nonce, aad: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>>;

    /// Perform an ECDH key agreement, producing the shared secret used as
    /// HKDF input keying material during CASE.
    async fn ecdh(&self, our_private_key: &[u8], peer_public_key: &[u8]) -> Result<Vec<u8>>;

    /// Verify a peer's signature over CASE transcript data against their
    /// certified public key.
    async fn verify_signature(&self, public_key: &[u8], message: &[u8], signature: &[u8]) -> Result<()>;
}

/// Derive the nonce for a single AEAD call, per the fixed wire format:
/// `u8(security_flags) || u32_le(message_id) || u64_le(source_node_id)`.
pub fn derive_nonce(security_flags: u8, message_id: u32, source_node_id: u64) -> Nonce {
    let mut nonce = [0u8; 13];
    nonce[0] = security_flags;
    nonce[1..5].copy_from_slice(&message_id.to_le_bytes());
    nonce[5..13].copy_from_slice(&source_node_id.to_le_bytes());
    nonce
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonce_layout_matches_the_wire_format() {
        let nonce = derive_nonce(0xAB, 0x0102_0304, 0x1122_3344_5566_7788);
        assert_eq!(nonce[0], 0xAB);
        assert_eq!(&nonce[1..5], &0x0102_0304u32.to_le_bytes());
        assert_eq!(&nonce[5..13], &0x1122_3344_5566_7788u64.to_le_bytes());
    }
}
