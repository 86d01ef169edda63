//! Per-live-stream orchestration.
//!
//! A `LiveLobby` ties together the hub, the session repository and the RTP
//! engine for one live stream. It creates sessions on join (one active
//! session per user), resolves sessions for command execution, and garbage
//! collects sessions that report a lost connection.

use crate::commands::LobbyCommand;
use crate::config::RouterConfig;
use crate::errors::RouterError;
use crate::hub::{Hub, HubHandle};
use crate::rtp::{LiveStreamSender, RtpEngine};
use crate::sessions::{Session, SessionKind, SessionRepository};
use common::types::{LiveStreamId, UserId};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Orchestration for one live stream.
pub struct LiveLobby {
    /// The live stream this lobby serves
    pub id: LiveStreamId,
    cancel: CancellationToken,
    hub: HubHandle,
    sessions: Arc<SessionRepository>,
    engine: Arc<dyn RtpEngine>,
    config: RouterConfig,
    garbage_tx: mpsc::Sender<UserId>,
}

impl LiveLobby {
    /// Create the lobby, spawning the hub loop and the garbage-collection
    /// task. Everything shuts down when `cancel` fires.
    #[must_use]
    pub fn new(
        cancel: CancellationToken,
        live_stream: LiveStreamId,
        engine: Arc<dyn RtpEngine>,
        sender: Arc<dyn LiveStreamSender>,
        config: RouterConfig,
    ) -> Self {
        let sessions = Arc::new(SessionRepository::new());
        let (hub, _hub_task) = Hub::spawn(
            cancel.child_token(),
            live_stream,
            Arc::clone(&sessions),
            sender,
            config.hub_dispatch_timeout,
        );

        let (garbage_tx, mut garbage_rx) = mpsc::channel::<UserId>(1);
        let gc_sessions = Arc::clone(&sessions);
        let gc_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = gc_cancel.cancelled() => return,
                    user = garbage_rx.recv() => {
                        let Some(user) = user else { return };
                        if let Some(session) = gc_sessions.delete_by_user(user).await {
                            session.stop();
                            info!(
                                target: "sr.lobby",
                                live_stream = %live_stream,
                                session_id = %session.id,
                                user_id = %user,
                                "collected session after lost connection"
                            );
                        }
                    }
                }
            }
        });

        info!(target: "sr.lobby", live_stream = %live_stream, "lobby started");
        Self {
            id: live_stream,
            cancel,
            hub,
            sessions,
            engine,
            config,
            garbage_tx,
        }
    }

    /// The lobby's hub handle.
    #[must_use]
    pub fn hub(&self) -> HubHandle {
        self.hub.clone()
    }

    /// The lobby's session registry.
    #[must_use]
    pub fn sessions(&self) -> Arc<SessionRepository> {
        Arc::clone(&self.sessions)
    }

    /// Create a session for a joining user or instance.
    ///
    /// # Errors
    ///
    /// Returns `RouterError::LobbyClosed` after shutdown and
    /// `RouterError::UserAlreadyJoined` when the user has an active session.
    pub async fn join(
        &self,
        user_id: UserId,
        kind: SessionKind,
    ) -> Result<Arc<Session>, RouterError> {
        if self.cancel.is_cancelled() {
            return Err(RouterError::LobbyClosed);
        }
        debug!(target: "sr.lobby", live_stream = %self.id, user_id = %user_id, "join");

        let session = Session::new(
            &self.cancel,
            user_id,
            kind,
            self.hub.clone(),
            Arc::clone(&self.engine),
            &self.config,
            self.garbage_tx.clone(),
        );
        if !self.sessions.add_new_user(Arc::clone(&session)).await {
            session.stop();
            return Err(RouterError::UserAlreadyJoined);
        }
        Ok(session)
    }

    /// Resolve the user's session and run a command against it.
    ///
    /// # Errors
    ///
    /// Returns `RouterError::SessionNotFound` for an unknown user,
    /// otherwise the command's own error.
    pub async fn run_command(
        &self,
        user_id: UserId,
        command: &mut dyn LobbyCommand,
    ) -> Result<(), RouterError> {
        if self.cancel.is_cancelled() {
            return Err(RouterError::LobbyClosed);
        }
        let session = self
            .sessions
            .find_by_user_id(user_id)
            .await
            .ok_or(RouterError::SessionNotFound(user_id))?;
        command.execute(&session).await
    }

    /// Close a user's session and remove it from the registry. Removing a
    /// session implies its published tracks leave the hub: the engine
    /// dispatches the remove events on endpoint teardown.
    ///
    /// # Errors
    ///
    /// Returns `RouterError::SessionNotFound` for an unknown user.
    pub async fn leave(&self, user_id: UserId) -> Result<(), RouterError> {
        debug!(target: "sr.lobby", live_stream = %self.id, user_id = %user_id, "leave");
        let session = self
            .sessions
            .delete_by_user(user_id)
            .await
            .ok_or(RouterError::SessionNotFound(user_id))?;
        session.stop();
        Ok(())
    }

    /// Shut the lobby down: hub, garbage collection and every session.
    pub fn stop(&self) {
        info!(target: "sr.lobby", live_stream = %self.id, "lobby stopping");
        self.cancel.cancel();
    }

    /// Whether the lobby has been shut down.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
