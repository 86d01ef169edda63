//! Codec for encoding and decoding signaling channel messages.

use crate::messages::{ChannelMsg, MsgType, MuteMsg, SdpMsg};
use serde::{Deserialize, Serialize};

/// Error type for codec operations
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The envelope or its payload is not valid JSON for the declared type
    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The `type` field carries a value outside the protocol
    #[error("Unknown message type: {0}")]
    UnknownMessageType(u8),
}

/// The wire envelope.
///
/// Declaration order is the serialization order: `{"id":...,"data":...,
/// "type":...}`. Reordering the fields breaks byte-for-byte interop with
/// remote instances.
#[derive(Serialize)]
struct Envelope<'a, T> {
    id: u32,
    data: &'a T,
    #[serde(rename = "type")]
    msg_type: MsgType,
}

#[derive(Deserialize)]
struct RawEnvelope {
    id: u32,
    data: serde_json::Value,
    #[serde(rename = "type")]
    msg_type: u8,
}

/// Encode a channel message to its wire bytes
///
/// # Errors
///
/// Returns `CodecError::Malformed` if serialization fails
pub fn encode(msg: &ChannelMsg) -> Result<Vec<u8>, CodecError> {
    let bytes = match msg {
        ChannelMsg::Offer { id, sdp } => serde_json::to_vec(&Envelope {
            id: *id,
            data: sdp,
            msg_type: MsgType::Offer,
        })?,
        ChannelMsg::Answer { id, sdp } => serde_json::to_vec(&Envelope {
            id: *id,
            data: sdp,
            msg_type: MsgType::Answer,
        })?,
        ChannelMsg::Mute { id, mute } => serde_json::to_vec(&Envelope {
            id: *id,
            data: mute,
            msg_type: MsgType::Mute,
        })?,
    };
    Ok(bytes)
}

/// Decode a channel message from its wire bytes
///
/// # Errors
///
/// Returns `CodecError::UnknownMessageType` for a `type` value outside the
/// protocol, `CodecError::Malformed` for anything else that fails to parse
pub fn decode(data: &[u8]) -> Result<ChannelMsg, CodecError> {
    let raw: RawEnvelope = serde_json::from_slice(data)?;
    let msg_type =
        MsgType::try_from(raw.msg_type).map_err(|e| CodecError::UnknownMessageType(e.0))?;

    let msg = match msg_type {
        MsgType::Offer => ChannelMsg::Offer {
            id: raw.id,
            sdp: serde_json::from_value::<SdpMsg>(raw.data)?,
        },
        MsgType::Answer => ChannelMsg::Answer {
            id: raw.id,
            sdp: serde_json::from_value::<SdpMsg>(raw.data)?,
        },
        MsgType::Mute => ChannelMsg::Mute {
            id: raw.id,
            mute: serde_json::from_value::<MuteMsg>(raw.data)?,
        },
    };
    Ok(msg)
}
