//! Session lifecycle: per-participant endpoints, signaling and registry.

pub mod messenger;
pub mod repository;
pub mod session;
pub mod signal;

pub use messenger::{MessageObserver, Messenger};
pub use repository::SessionRepository;
pub use session::Session;
pub use signal::Signal;

/// Kind of a session within a lobby.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    /// A user directly connected to this instance
    UserSession,
    /// The connection to the instance hosting the live stream. When the
    /// live stream belongs to another instance, this instance connects to
    /// that remote instance.
    InstanceSession,
    /// The connection of another instance into this one
    RemoteInstanceSession,
}

impl SessionKind {
    /// Log label for the session kind.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            SessionKind::UserSession => "user",
            SessionKind::InstanceSession => "instance",
            SessionKind::RemoteInstanceSession => "remote-instance",
        }
    }
}
