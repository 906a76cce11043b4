use super::types::{PROTOCOL_VERSION, SystemMessage};
use crate::error::ProtocolError;

/// Frames a message as `[version][bincode body]`.
pub fn encode(msg: &SystemMessage) -> Result<Vec<u8>, ProtocolError> {
    let body = bincode::serialize(msg).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    let mut frame = Vec::with_capacity(body.len() + 1);
    frame.push(msg.version);
    frame.extend_from_slice(&body);
    Ok(frame)
}

pub fn decode(frame: &[u8]) -> Result<SystemMessage, ProtocolError> {
    let (&version, body) = frame.split_first().ok_or(ProtocolError::EmptyFrame)?;
    if version != PROTOCOL_VERSION {
        return Err(ProtocolError::UnsupportedVersion(version));
    }

    let msg: SystemMessage =
        bincode::deserialize(body).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    if msg.version != version {
        return Err(ProtocolError::UnsupportedVersion(msg.version));
    }

    Ok(msg)
}
