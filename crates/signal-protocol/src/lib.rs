//! Control-message wire format for the Streamhub signaling data channel.
//!
//! Offer/answer/mute envelopes exchanged between an instance and its peers
//! are JSON and must round-trip byte-for-byte, since remote instances run
//! independent implementations of the same protocol.

#![warn(clippy::pedantic)]

pub mod codec;
pub mod messages;

pub use codec::{decode, encode, CodecError};
pub use messages::{ChannelMsg, MsgType, MuteMsg, SdpMsg};
