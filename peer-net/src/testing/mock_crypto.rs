//! A deterministic, non-cryptographic stand-in for `CryptoProvider`, used
//! only in tests. It is intentionally not secure: a real implementation
//! belongs to the crypto provider this crate calls through, never here.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use async_trait::async_trait;

use crate::crypto::{AeadKey, CryptoProvider, Nonce};
use crate::error::{Error, Result};

fn keystream(key: &[u8], nonce: &[u8], aad: &[u8], len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    let mut block: u64 = 0;
    while out.len() < len {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        nonce.hash(&mut hasher);
        aad.hash(&mut hasher);
        block.hash(&mut hasher);
        out.extend_from_slice(&hasher.finish().to_le_bytes());
        block += 1;
    }
    out.truncate(len);
    out
}

fn tag(key: &[u8], nonce: &[u8], aad: &[u8], plaintext: &[u8]) -> [u8; 4] {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    nonce.hash(&mut hasher);
    aad.hash(&mut hasher);
    plaintext.hash(&mut hasher);
    let digest = hasher.finish().to_le_bytes();
    [digest[0], digest[1], digest[2], digest[3]]
}

pub struct MockCrypto;

impl MockCrypto {
    pub fn new() -> Self {
        MockCrypto
    }
}

impl Default for MockCrypto {
    fn default() -> Self {
        MockCrypto::new()
    }
}

#[async_trait]
impl CryptoProvider for MockCrypto {
    async fn hkdf(&self, ikm: &[u8], salt: &[u8], info: &[u8], len: usize) -> Result<Vec<u8>> {
        Ok(keystream(ikm, salt, info, len))
    }

    async fn aead_encrypt(&self, key: &AeadKey, nonce: &Nonce, aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        let stream = keystream(key, nonce, aad, plaintext.len());
        let mut ciphertext: Vec<u8> = plaintext
            .iter()
            .zip(stream.iter())
            .map(|(p, s)| p ^ s)
            .collect();
        ciphertext.extend_from_slice(&tag(key, nonce, aad, plaintext));
        Ok(ciphertext)
    }

    async fn aead_decrypt(&self, key: &AeadKey, nonce: &Nonce, aad: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.len() < 4 {
            return Err(Error::Crypto("ciphertext too short".into()));
        }
        let (body, received_tag) = ciphertext.split_at(ciphertext.len() - 4);
        let stream = keystream(key, nonce, aad, body.len());
        let plaintext: Vec<u8> = body.iter().zip(stream.iter()).map(|(c, s)| c ^ s).collect();
        let expected_tag = tag(key, nonce, aad, &plaintext);
        if expected_tag != received_tag {
            return Err(Error::Crypto("authentication tag mismatch".into()));
        }
        Ok(plaintext)
    }

    async fn ecdh(&self, our_private_key: &[u8], peer_public_key: &[u8]) -> Result<Vec<u8>> {
        Ok(keystream(our_private_key, peer_public_key, b"ecdh", 32))
    }

    async fn verify_signature(&self, _public_key: &[u8], _message: &[u8], signature: &[u8]) -> Result<()> {
        if signature == b"invalid" {
            return Err(Error::Crypto("bad signature".into()));
        }
        Ok(())
    }
}
