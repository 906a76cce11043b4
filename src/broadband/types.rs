use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::ProtocolError;
use crate::protocol::{MessageMetadata, SystemMessage};
use crate::record::signing::verify_hex;

/// Stream of decoded system messages handed to a component.
pub type Inbound = mpsc::Receiver<(SystemMessage, MessageMetadata)>;

/// A framed system message plus the metadata and signature of whoever published it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub metadata: MessageMetadata,
    pub content: Vec<u8>,
    pub signature: String,
}

impl Envelope {
    pub fn signing_payload(
        metadata: &MessageMetadata,
        content: &[u8],
    ) -> Result<Vec<u8>, ProtocolError> {
        let mut payload =
            bincode::serialize(metadata).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        payload.extend_from_slice(content);
        Ok(payload)
    }

    pub fn verify(&self) -> Result<(), ProtocolError> {
        let payload = Self::signing_payload(&self.metadata, &self.content)?;
        verify_hex(self.metadata.publisher_id.as_str(), &payload, &self.signature)
    }
}
