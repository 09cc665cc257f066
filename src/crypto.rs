//! Signing primitives used for attestations.
//!
//! Two key types are supported, matching the observed chains: secp256k1
//! (ECDSA over the SHA-512-half digest, DER signatures) and ed25519 (raw
//! message, 64-byte signatures). Public keys use the chain's 33-byte
//! layout: SEC1 compressed for secp256k1, 0xED-prefixed for ed25519.

use std::fmt::{self, Display, Formatter};

use anyhow::{anyhow, Result};
use ed25519_dalek::Verifier;
use k256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use rand::RngCore;
use ripemd::Ripemd160;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};

use crate::types::AccountId;

const ED25519_PREFIX: u8 = 0xED;

/// First half of a SHA-512 digest, the chain's signing digest for secp256k1.
pub fn sha512_half(data: &[u8]) -> [u8; 32] {
    let digest = Sha512::digest(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest[..32]);
    out
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    #[default]
    Secp256k1,
    Ed25519,
}

#[derive(Clone)]
pub enum SecretKey {
    Secp256k1(k256::ecdsa::SigningKey),
    Ed25519(ed25519_dalek::SigningKey),
}

impl SecretKey {
    pub fn from_bytes(key_type: KeyType, bytes: &[u8; 32]) -> Result<SecretKey> {
        match key_type {
            KeyType::Secp256k1 => Ok(SecretKey::Secp256k1(
                k256::ecdsa::SigningKey::from_slice(bytes)
                    .map_err(|e| anyhow!("invalid secp256k1 secret key: {e}"))?,
            )),
            KeyType::Ed25519 => Ok(SecretKey::Ed25519(ed25519_dalek::SigningKey::from_bytes(
                bytes,
            ))),
        }
    }

    pub fn from_hex(key_type: KeyType, s: &str) -> Result<SecretKey> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s.trim(), &mut bytes)
            .map_err(|_| anyhow!("secret key must be 32 hex-encoded bytes"))?;
        SecretKey::from_bytes(key_type, &bytes)
    }

    pub fn random(key_type: KeyType) -> SecretKey {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        // A random 32-byte string is astronomically unlikely to be outside
        // the secp256k1 scalar field, but handle it anyway.
        loop {
            match SecretKey::from_bytes(key_type, &bytes) {
                Ok(key) => return key,
                Err(_) => rand::thread_rng().fill_bytes(&mut bytes),
            }
        }
    }

    pub fn to_hex(&self) -> String {
        match self {
            SecretKey::Secp256k1(key) => hex::encode(key.to_bytes()),
            SecretKey::Ed25519(key) => hex::encode(key.to_bytes()),
        }
    }

    pub fn public_key(&self) -> PublicKey {
        match self {
            SecretKey::Secp256k1(key) => {
                let point = key.verifying_key().to_encoded_point(true);
                let mut bytes = [0u8; 33];
                bytes.copy_from_slice(point.as_bytes());
                PublicKey(bytes)
            }
            SecretKey::Ed25519(key) => {
                let mut bytes = [0u8; 33];
                bytes[0] = ED25519_PREFIX;
                bytes[1..].copy_from_slice(key.verifying_key().as_bytes());
                PublicKey(bytes)
            }
        }
    }

    pub fn sign(&self, message: &[u8]) -> Result<SignatureBytes> {
        match self {
            SecretKey::Secp256k1(key) => {
                let digest = sha512_half(message);
                let signature: k256::ecdsa::Signature = key
                    .sign_prehash(&digest)
                    .map_err(|e| anyhow!("secp256k1 signing failed: {e}"))?;
                Ok(SignatureBytes(signature.to_der().as_bytes().to_vec()))
            }
            SecretKey::Ed25519(key) => {
                use ed25519_dalek::Signer;
                let signature = key.sign(message);
                Ok(SignatureBytes(signature.to_bytes().to_vec()))
            }
        }
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            SecretKey::Secp256k1(_) => write!(f, "SecretKey(secp256k1)"),
            SecretKey::Ed25519(_) => write!(f, "SecretKey(ed25519)"),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey(pub [u8; 33]);

impl PublicKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<PublicKey> {
        let bytes: [u8; 33] = bytes
            .try_into()
            .map_err(|_| anyhow!("public key must be 33 bytes"))?;
        Ok(PublicKey(bytes))
    }

    pub fn key_type(&self) -> KeyType {
        if self.0[0] == ED25519_PREFIX {
            KeyType::Ed25519
        } else {
            KeyType::Secp256k1
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The account that pays fees when this key submits transactions:
    /// ripemd160(sha256(key)).
    pub fn account_id(&self) -> AccountId {
        let sha = Sha256::digest(self.0);
        let ripe = Ripemd160::digest(sha);
        let mut id = [0u8; 20];
        id.copy_from_slice(&ripe);
        AccountId(id)
    }

    pub fn verify(&self, message: &[u8], signature: &SignatureBytes) -> bool {
        match self.key_type() {
            KeyType::Secp256k1 => {
                let Ok(key) = k256::ecdsa::VerifyingKey::from_sec1_bytes(&self.0) else {
                    return false;
                };
                let Ok(sig) = k256::ecdsa::Signature::from_der(&signature.0) else {
                    return false;
                };
                key.verify_prehash(&sha512_half(message), &sig).is_ok()
            }
            KeyType::Ed25519 => {
                let Ok(raw) = <[u8; 32]>::try_from(&self.0[1..]) else {
                    return false;
                };
                let Ok(key) = ed25519_dalek::VerifyingKey::from_bytes(&raw) else {
                    return false;
                };
                let Ok(raw_sig) = <[u8; 64]>::try_from(signature.0.as_slice()) else {
                    return false;
                };
                key.verify(message, &ed25519_dalek::Signature::from_bytes(&raw_sig))
                    .is_ok()
            }
        }
    }
}

impl Display for PublicKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode_upper(self.0))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({self})")
    }
}

/// An opaque signature blob: DER for secp256k1, 64 raw bytes for ed25519.
#[derive(Clone, PartialEq, Eq)]
pub struct SignatureBytes(pub Vec<u8>);

impl SignatureBytes {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Display for SignatureBytes {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode_upper(&self.0))
    }
}

impl fmt::Debug for SignatureBytes {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "SignatureBytes({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secp256k1_sign_verify() {
        let key = SecretKey::random(KeyType::Secp256k1);
        let pk = key.public_key();
        assert_eq!(pk.key_type(), KeyType::Secp256k1);

        let sig = key.sign(b"a message").unwrap();
        assert!(pk.verify(b"a message", &sig));
        assert!(!pk.verify(b"another message", &sig));
    }

    #[test]
    fn ed25519_sign_verify() {
        let key = SecretKey::random(KeyType::Ed25519);
        let pk = key.public_key();
        assert_eq!(pk.key_type(), KeyType::Ed25519);
        assert_eq!(pk.as_bytes()[0], 0xED);

        let sig = key.sign(b"a message").unwrap();
        assert_eq!(sig.0.len(), 64);
        assert!(pk.verify(b"a message", &sig));
        assert!(!pk.verify(b"tampered", &sig));
    }

    #[test]
    fn wrong_key_rejects() {
        let key = SecretKey::random(KeyType::Secp256k1);
        let other = SecretKey::random(KeyType::Secp256k1);
        let sig = key.sign(b"msg").unwrap();
        assert!(!other.public_key().verify(b"msg", &sig));
    }

    #[test]
    fn secret_key_hex_round_trip() {
        let key = SecretKey::random(KeyType::Ed25519);
        let restored = SecretKey::from_hex(KeyType::Ed25519, &key.to_hex()).unwrap();
        assert_eq!(restored.public_key(), key.public_key());
    }

    #[test]
    fn account_id_is_deterministic() {
        let key = SecretKey::random(KeyType::Secp256k1);
        let pk = key.public_key();
        assert_eq!(pk.account_id(), pk.account_id());
    }
}
