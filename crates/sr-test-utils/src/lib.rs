//! # Stream Router Test Utilities
//!
//! Shared test utilities for the stream-router crate: mock implementations
//! of the consumed RTP boundary so routing and negotiation can be tested
//! without real media transport.
//!
//! ## Modules
//!
//! - `mock_engine` - scripted `RtpEngine` + recording `Endpoint`
//! - `mock_channel` - in-memory signaling transport with manual open and
//!   message injection
//! - `mock_sender` - counting `LiveStreamSender`
//! - `fixtures` - track handles and SDP fixtures

pub mod fixtures;
pub mod mock_channel;
pub mod mock_engine;
pub mod mock_sender;

pub use fixtures::*;
pub use mock_channel::*;
pub use mock_engine::*;
pub use mock_sender::*;
