//! Consumed media-transport boundary.
//!
//! The actual ICE/DTLS/SRTP stack lives behind [`RtpEngine`]: the router
//! only negotiates SDP and routes track metadata. An engine implementation
//! establishes live endpoints from an offer and drives the hooks in
//! [`EndpointOptions`] as transport events occur.
//!
//! Contract for engine implementations: an ingress endpoint that tears down
//! must dispatch remove-track for every track it published, through the
//! [`TrackDispatcher`] it was created with. The router relies on this for
//! table cleanup on session destruction.

use crate::errors::RouterError;
use async_trait::async_trait;
use common::types::{LiveStreamId, SessionId, SessionDescription};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Classification of a published track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackPurpose {
    /// The primary live feed, included in the outbound broadcast sink
    Main,
    /// A secondary feed, e.g. a screen share
    Secondary,
}

impl TrackPurpose {
    /// Metric/log label for the purpose.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            TrackPurpose::Main => "main",
            TrackPurpose::Secondary => "secondary",
        }
    }
}

/// Media kind of a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

/// Endpoint side, used for metric labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointKind {
    Ingress,
    Egress,
}

impl EndpointKind {
    /// Metric/log label for the endpoint side.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            EndpointKind::Ingress => "ingress",
            EndpointKind::Egress => "egress",
        }
    }
}

/// Handle to an underlying media track owned by the engine.
pub trait MediaTrack: Send + Sync {
    /// Stable track identifier within the live stream
    fn id(&self) -> &str;
    /// Identifier of the media stream the track belongs to
    fn stream_id(&self) -> &str;
    /// Audio or video
    fn kind(&self) -> TrackKind;
}

/// Metadata for one published track.
///
/// Owned by the hub once published; sessions that forward the track hold
/// clones referencing the same underlying handle.
#[derive(Clone)]
pub struct TrackInfo {
    /// The underlying media track handle
    pub track: Arc<dyn MediaTrack>,
    /// Session that published the track
    pub session_id: SessionId,
    /// Primary or secondary feed
    pub purpose: TrackPurpose,
    /// Whether the publisher has muted the track
    pub mute: bool,
}

impl TrackInfo {
    #[must_use]
    pub fn new(track: Arc<dyn MediaTrack>, session_id: SessionId, purpose: TrackPurpose) -> Self {
        Self {
            track,
            session_id,
            purpose,
            mute: false,
        }
    }

    /// Stable identifier of the underlying track.
    #[must_use]
    pub fn id(&self) -> &str {
        self.track.id()
    }
}

impl fmt::Debug for TrackInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackInfo")
            .field("track_id", &self.track.id())
            .field("stream_id", &self.track.stream_id())
            .field("session_id", &self.session_id)
            .field("purpose", &self.purpose)
            .field("mute", &self.mute)
            .finish()
    }
}

/// Egress-side mute state for a forwarded track, keyed by transceiver mid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EgressMuteState {
    /// The mid the remote side knows the track by
    pub mid: String,
    /// Whether the track is muted
    pub mute: bool,
}

/// The outbound broadcast/mixing sink for Main-purpose tracks.
pub trait LiveStreamSender: Send + Sync {
    fn add_track(&self, track: Arc<dyn MediaTrack>);
    fn remove_track(&self, track: Arc<dyn MediaTrack>);
}

/// Sink for track events discovered by an ingress endpoint.
///
/// Implemented by the hub handle; dispatch is fire-and-forget.
#[async_trait]
pub trait TrackDispatcher: Send + Sync {
    async fn dispatch_add_track(&self, track: TrackInfo);
    async fn dispatch_remove_track(&self, track: TrackInfo);
    async fn dispatch_mute_track(&self, track: TrackInfo);
}

/// A bidirectional signaling transport, usually a WebRTC data channel.
pub trait SignalChannel: Send + Sync {
    /// Label of the underlying channel
    fn label(&self) -> String;

    /// Send one message; fails if the transport is closed
    ///
    /// # Errors
    ///
    /// Returns `RouterError::ChannelClosed` if the transport is gone.
    fn send(&self, data: &[u8]) -> Result<(), RouterError>;

    /// Install the inbound message handler
    fn on_message(&self, handler: Box<dyn Fn(Vec<u8>) + Send + Sync>);

    /// Install the open handler; invoked once the transport is usable
    fn on_open(&self, handler: Box<dyn Fn() + Send + Sync>);
}

/// One live peer connection established by the engine.
#[async_trait]
pub trait Endpoint: Send + Sync {
    /// The local description, available once ICE gathering completes.
    ///
    /// # Errors
    ///
    /// Returns `RouterError::IceGatheringInterrupted` if gathering was
    /// aborted by the engine, `RouterError::Engine` for transport failures.
    async fn local_description(&self) -> Result<SessionDescription, RouterError>;

    /// Apply the remote answer to this endpoint's current offer.
    ///
    /// # Errors
    ///
    /// Returns `RouterError::Engine` if the description is rejected.
    async fn set_answer(&self, sdp: SessionDescription) -> Result<(), RouterError>;

    /// Apply a new remote offer and produce the local answer.
    ///
    /// # Errors
    ///
    /// Returns `RouterError::Engine` if the description is rejected.
    async fn set_new_offer(
        &self,
        sdp: SessionDescription,
    ) -> Result<SessionDescription, RouterError>;

    /// Mark initial negotiation as finished.
    fn set_init_complete(&self);

    /// Whether initial negotiation (including ICE gathering) has finished.
    fn init_complete(&self) -> bool;

    /// Start forwarding a track on this (egress) endpoint; triggers
    /// renegotiation through the negotiation-needed hook.
    async fn add_track(&self, track: TrackInfo);

    /// Stop forwarding a track on this (egress) endpoint.
    async fn remove_track(&self, track: TrackInfo);

    /// Flag an incoming transceiver mid as muted; returns the affected
    /// track's info when the mid is known.
    async fn set_ingress_mute(&self, mid: &str, mute: bool) -> Option<TrackInfo>;

    /// Flag a forwarded track as muted; returns the egress-side mid state
    /// when the track is being forwarded here.
    async fn set_egress_mute(&self, track_id: &str, mute: bool) -> Option<EgressMuteState>;
}

/// Hook invoked when the engine surfaces a signaling data channel.
pub type DataChannelHook = Box<dyn Fn(Arc<dyn SignalChannel>) + Send + Sync>;

/// Hook invoked when an egress endpoint wants to renegotiate.
pub type NegotiationNeededHook = Box<dyn Fn(SessionDescription) + Send + Sync>;

/// Hook invoked when the peer connection is lost.
pub type LostConnectionHook = Box<dyn Fn() + Send + Sync>;

/// Future returned by the current-tracks seeding hook.
pub type CurrentTracksFuture =
    Pin<Box<dyn Future<Output = Result<Vec<TrackInfo>, RouterError>> + Send>>;

/// Hook invoked once when an egress endpoint becomes ready, to seed its
/// initial forwarding set.
pub type CurrentTracksHook = Box<dyn Fn(SessionId) -> CurrentTracksFuture + Send + Sync>;

/// Per-endpoint wiring passed to the engine at establish time.
///
/// The engine invokes whichever hooks are present; absent hooks mean the
/// endpoint does not participate in that concern (e.g. a static egress has
/// no negotiation hook).
#[derive(Default)]
pub struct EndpointOptions {
    /// Receives the signaling data channel when the peer opens one
    pub on_data_channel: Option<DataChannelHook>,
    /// Receives locally created offers when track changes require it
    pub on_negotiation_needed: Option<NegotiationNeededHook>,
    /// Signals loss of the peer connection
    pub on_lost_connection: Option<LostConnectionHook>,
    /// Seeds the initial forwarding set of an egress endpoint
    pub current_tracks: Option<CurrentTracksHook>,
    /// Receives tracks discovered on an ingress endpoint
    pub track_dispatcher: Option<Arc<dyn TrackDispatcher>>,
}

impl EndpointOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl fmt::Debug for EndpointOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointOptions")
            .field("on_data_channel", &self.on_data_channel.is_some())
            .field(
                "on_negotiation_needed",
                &self.on_negotiation_needed.is_some(),
            )
            .field("on_lost_connection", &self.on_lost_connection.is_some())
            .field("current_tracks", &self.current_tracks.is_some())
            .field("track_dispatcher", &self.track_dispatcher.is_some())
            .finish()
    }
}

/// The media engine capability consumed by the router.
///
/// `establish_ingress_endpoint` answers a remote offer (passive side);
/// `establish_egress_endpoint` produces the local offer (initiating side);
/// `establish_static_egress_endpoint` answers a remote offer for an egress
/// that will never renegotiate.
#[async_trait]
pub trait RtpEngine: Send + Sync {
    /// # Errors
    ///
    /// Returns `RouterError::Engine` if the connection cannot be created.
    async fn establish_ingress_endpoint(
        &self,
        session_id: SessionId,
        live_stream: LiveStreamId,
        offer: SessionDescription,
        options: EndpointOptions,
    ) -> Result<Arc<dyn Endpoint>, RouterError>;

    /// # Errors
    ///
    /// Returns `RouterError::Engine` if the connection cannot be created.
    async fn establish_egress_endpoint(
        &self,
        session_id: SessionId,
        live_stream: LiveStreamId,
        options: EndpointOptions,
    ) -> Result<Arc<dyn Endpoint>, RouterError>;

    /// # Errors
    ///
    /// Returns `RouterError::Engine` if the connection cannot be created.
    async fn establish_static_egress_endpoint(
        &self,
        session_id: SessionId,
        live_stream: LiveStreamId,
        offer: SessionDescription,
        options: EndpointOptions,
    ) -> Result<Arc<dyn Endpoint>, RouterError>;
}
