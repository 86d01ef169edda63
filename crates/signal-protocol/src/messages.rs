//! Typed control messages carried on the signaling data channel.

use common::types::SessionDescription;
use serde::{Deserialize, Serialize};

/// Control message discriminator.
///
/// Encoded as a bare integer in the `type` field of the envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum MsgType {
    /// SDP offer requesting (re)negotiation
    Offer = 1,
    /// SDP answer completing a negotiation round
    Answer = 2,
    /// Track mute flag change
    Mute = 3,
}

impl From<MsgType> for u8 {
    fn from(value: MsgType) -> Self {
        value as u8
    }
}

impl TryFrom<u8> for MsgType {
    type Error = UnknownMsgType;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(MsgType::Offer),
            2 => Ok(MsgType::Answer),
            3 => Ok(MsgType::Mute),
            other => Err(UnknownMsgType(other)),
        }
    }
}

/// Raised when the `type` field carries a value outside the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("unknown message type: {0}")]
pub struct UnknownMsgType(pub u8);

/// SDP payload of an offer or answer message.
///
/// `number` is the per-offer sequence number used to reject stale answers;
/// it is distinct from the envelope's correlation id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdpMsg {
    /// Offer sequence number
    pub number: u32,
    /// The session description itself
    pub sdp: SessionDescription,
}

/// Mute payload flagging a single transceiver mid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MuteMsg {
    /// The transceiver mid the flag applies to
    pub mid: String,
    /// Whether the track is muted
    pub mute: bool,
}

/// A decoded control message.
///
/// `id` is the envelope correlation id: an answer echoes the id of the offer
/// it responds to so the remote side can route it back to the right context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelMsg {
    /// An incoming or outgoing offer
    Offer {
        /// Correlation id
        id: u32,
        /// Offer payload
        sdp: SdpMsg,
    },
    /// An incoming or outgoing answer
    Answer {
        /// Correlation id, echoing the offer's
        id: u32,
        /// Answer payload
        sdp: SdpMsg,
    },
    /// A mute flag change
    Mute {
        /// Correlation id (unused for mute, always 0 on send)
        id: u32,
        /// Mute payload
        mute: MuteMsg,
    },
}

impl ChannelMsg {
    /// The envelope correlation id.
    #[must_use]
    pub fn id(&self) -> u32 {
        match self {
            ChannelMsg::Offer { id, .. }
            | ChannelMsg::Answer { id, .. }
            | ChannelMsg::Mute { id, .. } => *id,
        }
    }

    /// The envelope discriminator.
    #[must_use]
    pub fn msg_type(&self) -> MsgType {
        match self {
            ChannelMsg::Offer { .. } => MsgType::Offer,
            ChannelMsg::Answer { .. } => MsgType::Answer,
            ChannelMsg::Mute { .. } => MsgType::Mute,
        }
    }
}
