use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::record::signing::{generate_key, public_id, sign_hex};

/// Broker identity on the system stream: the hex-encoded verifying key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Full keys are noisy in logs
        let short = self.0.get(..12).unwrap_or(&self.0);
        f.write_str(short)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// The local broker's signing key plus the id derived from it.
#[derive(Clone)]
pub struct BrokerIdentity {
    signing_key: SigningKey,
    pub id: NodeId,
}

impl BrokerIdentity {
    pub fn generate() -> Self {
        Self::from_key(generate_key())
    }

    pub fn from_key(signing_key: SigningKey) -> Self {
        let id = NodeId(public_id(&signing_key));
        Self { signing_key, id }
    }

    /// Restores an identity from a 32-byte hex secret.
    pub fn from_hex(secret: &str) -> anyhow::Result<Self> {
        let bytes: [u8; 32] = hex::decode(secret.trim())?
            .try_into()
            .map_err(|_| anyhow::anyhow!("private key must be 32 bytes"))?;
        Ok(Self::from_key(SigningKey::from_bytes(&bytes)))
    }

    pub fn sign(&self, payload: &[u8]) -> String {
        sign_hex(&self.signing_key, payload)
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }
}

impl fmt::Debug for BrokerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerIdentity").field("id", &self.id).finish()
    }
}

/// Source of the current set of online peers.
///
/// Implemented by the heartbeat; tests plug in fixed sets.
pub trait OnlineBrokers: Send + Sync {
    fn online_brokers(&self) -> Vec<NodeId>;
}
