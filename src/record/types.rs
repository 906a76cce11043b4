use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::signing::{public_id, sha256_hex, sign_hex, verify_hex};
use crate::error::ProtocolError;

/// Full identity of a stored record.
///
/// The string form is a JSON array, e.g. `["stream",0,1000,0,"ab12..","chain"]`.
/// It is used as the key in query hash maps and propagate payloads.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId {
    pub stream_id: String,
    pub partition: u32,
    pub timestamp: u64,
    pub sequence_number: u32,
    pub publisher_id: String,
    pub msg_chain_id: String,
}

impl MessageId {
    pub fn new(
        stream_id: impl Into<String>,
        partition: u32,
        timestamp: u64,
        sequence_number: u32,
        publisher_id: impl Into<String>,
        msg_chain_id: impl Into<String>,
    ) -> Self {
        Self {
            stream_id: stream_id.into(),
            partition,
            timestamp,
            sequence_number,
            publisher_id: publisher_id.into(),
            msg_chain_id: msg_chain_id.into(),
        }
    }

    pub fn to_ref(&self) -> MessageRef {
        MessageRef {
            timestamp: self.timestamp,
            sequence_number: self.sequence_number,
        }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tuple = (
            &self.stream_id,
            self.partition,
            self.timestamp,
            self.sequence_number,
            &self.publisher_id,
            &self.msg_chain_id,
        );
        match serde_json::to_string(&tuple) {
            Ok(s) => f.write_str(&s),
            Err(_) => Err(fmt::Error),
        }
    }
}

impl FromStr for MessageId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (stream_id, partition, timestamp, sequence_number, publisher_id, msg_chain_id): (
            String,
            u32,
            u64,
            u32,
            String,
            String,
        ) = serde_json::from_str(s).map_err(|e| ProtocolError::InvalidMessageId(e.to_string()))?;

        Ok(Self {
            stream_id,
            partition,
            timestamp,
            sequence_number,
            publisher_id,
            msg_chain_id,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageRef {
    pub timestamp: u64,
    pub sequence_number: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EncryptionType {
    #[default]
    None,
    Rsa,
    Aes,
}

impl EncryptionType {
    fn tag(self) -> char {
        match self {
            EncryptionType::None => 'n',
            EncryptionType::Rsa => 'r',
            EncryptionType::Aes => 'a',
        }
    }
}

/// A signed record as published to a stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamMessage {
    pub message_id: MessageId,
    pub prev_msg_ref: Option<MessageRef>,
    pub content: String,
    pub encryption_type: EncryptionType,
    pub group_key_id: Option<String>,
    pub signature: String,
}

impl StreamMessage {
    /// Builds a record and signs it with `key`. The key's public id overrides
    /// whatever publisher the caller put in `message_id`.
    pub fn signed(
        mut message_id: MessageId,
        prev_msg_ref: Option<MessageRef>,
        content: impl Into<String>,
        key: &SigningKey,
    ) -> Self {
        message_id.publisher_id = public_id(key);
        let mut msg = Self {
            message_id,
            prev_msg_ref,
            content: content.into(),
            encryption_type: EncryptionType::None,
            group_key_id: None,
            signature: String::new(),
        };
        msg.signature = sign_hex(key, &msg.signature_payload());
        msg
    }

    /// Marks the content as encrypted under `group_key_id` and signs again.
    pub fn with_group_key(
        mut self,
        encryption_type: EncryptionType,
        group_key_id: impl Into<String>,
        key: &SigningKey,
    ) -> Self {
        self.encryption_type = encryption_type;
        self.group_key_id = Some(group_key_id.into());
        self.signature = sign_hex(key, &self.signature_payload());
        self
    }

    /// Id, previous ref, encryption metadata, then the content. The group key id is
    /// length-prefixed so it cannot bleed into the content.
    pub fn signature_payload(&self) -> Vec<u8> {
        let mut payload = self.message_id.to_string();
        if let Some(prev) = &self.prev_msg_ref {
            payload.push_str(&format!("{}{}", prev.timestamp, prev.sequence_number));
        }
        payload.push(self.encryption_type.tag());
        match &self.group_key_id {
            Some(group_key_id) => payload.push_str(&format!("{}:{}", group_key_id.len(), group_key_id)),
            None => payload.push('-'),
        }
        payload.push_str(&self.content);
        payload.into_bytes()
    }

    /// Hash used to compare replicas of the same record across brokers.
    pub fn content_hash(&self) -> String {
        sha256_hex(&self.signature_payload())
    }

    pub fn verify(&self) -> Result<(), ProtocolError> {
        verify_hex(
            &self.message_id.publisher_id,
            &self.signature_payload(),
            &self.signature,
        )
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    pub fn from_json(raw: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(raw).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    pub fn timestamp(&self) -> u64 {
        self.message_id.timestamp
    }

    pub fn sequence_number(&self) -> u32 {
        self.message_id.sequence_number
    }
}
