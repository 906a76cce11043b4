use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};

use crate::error::ProtocolError;

/// Hex-encoded verifying key, used as publisher and broker identity.
pub fn public_id(key: &SigningKey) -> String {
    hex::encode(key.verifying_key().to_bytes())
}

pub fn sign_hex(key: &SigningKey, payload: &[u8]) -> String {
    hex::encode(key.sign(payload).to_bytes())
}

/// Verifies a hex signature against a hex publisher key.
pub fn verify_hex(publisher: &str, payload: &[u8], signature: &str) -> Result<(), ProtocolError> {
    let key_bytes: [u8; 32] = hex::decode(publisher)
        .map_err(|e| ProtocolError::InvalidPublisher(e.to_string()))?
        .try_into()
        .map_err(|_| ProtocolError::InvalidPublisher(publisher.to_string()))?;
    let verifying_key = VerifyingKey::from_bytes(&key_bytes)
        .map_err(|e| ProtocolError::InvalidPublisher(e.to_string()))?;

    let sig_bytes = hex::decode(signature).map_err(|_| ProtocolError::InvalidSignature)?;
    let signature =
        Signature::from_slice(&sig_bytes).map_err(|_| ProtocolError::InvalidSignature)?;

    verifying_key
        .verify(payload, &signature)
        .map_err(|_| ProtocolError::InvalidSignature)
}

pub fn sha256_hex(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

pub fn generate_key() -> SigningKey {
    SigningKey::from_bytes(&rand::random::<[u8; 32]>())
}
