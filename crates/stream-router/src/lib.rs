//! Streamhub Stream Router Library
//!
//! This library provides the core of the Streamhub SFU - the per-live-stream
//! track router and the signaling negotiation engine:
//!
//! - Per-live-stream track routing with fan-out to every interested session
//! - Per-participant connection lifecycle (ingress/egress/pipe endpoints)
//! - Offer/answer renegotiation over an out-of-band data channel, safe
//!   against reordered and stale answers
//! - Federation with remote instances hosting a live stream this instance
//!   does not own
//!
//! # Architecture
//!
//! ```text
//! LiveLobby (one per live stream)
//! ├── Hub (actor, single owner of the published-track table)
//! │   └── fans out add/remove/mute to every other session's egress
//! ├── SessionRepository (id + user lookup, one lock)
//! └── Session (one per participant or instance link)
//!     ├── ingress endpoint  (passive, never renegotiates)
//!     ├── egress endpoint   (active, renegotiates on track changes)
//!     ├── pipe endpoint     (instance-to-instance signaling link)
//!     └── Signal + Messenger (offer/answer over the data channel)
//! ```
//!
//! # Key Design Decisions
//!
//! - **Actor-owned track table**: all Hub state mutates inside one event
//!   loop; no callback from the loop may block on a gathering session
//! - **Sequence-numbered offers**: an answer is applied only if it matches
//!   the most recently sent offer; superseded answers are discarded
//! - **Fire-and-forget dispatch**: routing events degrade to dropped
//!   notifications under backpressure, never to blocked producers
//! - **Terminal cancellation**: a cancelled session fails every subsequent
//!   operation fast, before any network action
//!
//! # Modules
//!
//! - [`hub`] - per-live-stream routing actor
//! - [`sessions`] - session lifecycle, signal, messenger, repository
//! - [`commands`] - request objects bridging callers to session operations
//! - [`federation`] - connector and HTTP client toward remote instances
//! - [`lobby`] - per-live-stream orchestration (join/leave/command)
//! - [`rtp`] - consumed media-transport boundary (engine, endpoints, tracks)
//! - [`config`] - timeout configuration from environment
//! - [`errors`] - error types, one sentinel per failure cause

pub mod commands;
pub mod config;
pub mod errors;
pub mod federation;
pub mod hub;
pub mod lobby;
pub mod rtp;
pub mod sessions;
