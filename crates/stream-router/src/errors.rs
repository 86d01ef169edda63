//! Stream Router error types.
//!
//! Every failure cause gets its own variant so callers (and tests) branch on
//! cause, never on message strings. The HTTP/WHIP boundary maps these onto
//! status codes outside this crate.

use signal_protocol::CodecError;
use thiserror::Error;

/// Stream Router error type.
#[derive(Debug, Error)]
pub enum RouterError {
    /// The session's context was cancelled; terminal, callers must create a
    /// new session.
    #[error("session was already closed")]
    SessionClosed,

    /// A session operation could not be accepted before its deadline.
    #[error("session request timeout")]
    SessionRequestTimeout,

    /// An ingress endpoint already exists in this session.
    #[error("ingress endpoint already exists in session")]
    IngressAlreadyExists,

    /// An egress endpoint already exists in this session.
    #[error("egress endpoint already exists in session")]
    EgressAlreadyExists,

    /// A pipe endpoint already exists in this session.
    #[error("pipe endpoint already exists in session")]
    PipeAlreadyExists,

    /// A renegotiation step was invoked before an ingress endpoint existed.
    #[error("no ingress endpoint in session")]
    NoIngressInSession,

    /// A renegotiation step was invoked before an egress endpoint existed.
    #[error("no egress endpoint in session")]
    NoEgressInSession,

    /// A renegotiation step was invoked before a pipe endpoint existed.
    #[error("no pipe endpoint in session")]
    NoPipeInSession,

    /// ICE gathering did not complete within its window; surfaced to the
    /// caller, not retried.
    #[error("ice gathering interrupted: {0}")]
    IceGatheringInterrupted(String),

    /// The data channel never opened within the waiting window.
    #[error("timeout waiting for messenger")]
    MessengerSetupTimeout,

    /// The hub was already shut down.
    #[error("hub was already closed")]
    HubClosed,

    /// A hub query could not be accepted before the dispatch timeout.
    #[error("hub dispatch timeout")]
    HubDispatchTimeout,

    /// No session registered for the given user.
    #[error("no session for user {0}")]
    SessionNotFound(common::types::UserId),

    /// The user already has an active session in this lobby.
    #[error("user already joined")]
    UserAlreadyJoined,

    /// The lobby was already stopped.
    #[error("lobby was already closed")]
    LobbyClosed,

    /// Login to a remote instance failed.
    #[error("login to remote instance failed: {0}")]
    RemoteLogin(String),

    /// A remote instance rejected or failed an offer exchange.
    #[error("remote offer request failed: {0}")]
    RemoteOffer(String),

    /// The federation HTTP client could not be built or used.
    #[error("federation http client error: {0}")]
    HttpClient(String),

    /// The underlying RTP engine failed to establish or drive an endpoint.
    #[error("rtp engine error: {0}")]
    Engine(String),

    /// The signaling transport is closed.
    #[error("signaling channel closed")]
    ChannelClosed,

    /// A control message could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}
