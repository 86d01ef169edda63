//! Request objects bridging the WHIP/WHEP boundary and federation to
//! session operations.
//!
//! A command packages a caller's intent; executing it delegates to the
//! session and stores the negotiated resource. Nothing here contains
//! negotiation logic of its own.

use crate::errors::RouterError;
use crate::sessions::Session;
use async_trait::async_trait;
use common::types::{SessionDescription, SessionId};
use std::sync::Arc;

/// A negotiated WebRTC resource handed back to the caller.
#[derive(Debug, Clone)]
pub struct WebRtcResource {
    /// The session the resource belongs to
    pub id: SessionId,
    /// The negotiated local description
    pub sdp: SessionDescription,
}

/// A request executed against a session.
#[async_trait]
pub trait LobbyCommand: Send {
    /// Run the command against the resolved session.
    ///
    /// # Errors
    ///
    /// Propagates the session operation's error unchanged so callers can
    /// branch on cause.
    async fn execute(&mut self, session: &Arc<Session>) -> Result<(), RouterError>;
}

/// Remote endpoint accepting WHEP offers (we want to receive media).
#[async_trait]
pub trait WhepApi: Send + Sync {
    /// # Errors
    ///
    /// Returns `RouterError::RemoteOffer` when the remote instance rejects
    /// or fails the exchange.
    async fn post_whep_offer(
        &self,
        offer: &SessionDescription,
    ) -> Result<SessionDescription, RouterError>;
}

/// Remote endpoint accepting WHIP offers (we want to send media).
#[async_trait]
pub trait WhipApi: Send + Sync {
    /// # Errors
    ///
    /// Returns `RouterError::RemoteOffer` when the remote instance rejects
    /// or fails the exchange.
    async fn post_whip_offer(
        &self,
        offer: &SessionDescription,
    ) -> Result<SessionDescription, RouterError>;
}

/// Establish the ingress endpoint from a participant's offer.
pub struct CreateIngress {
    offer: SessionDescription,
    /// Set on success
    pub response: Option<WebRtcResource>,
}

impl CreateIngress {
    #[must_use]
    pub fn new(offer: SessionDescription) -> Self {
        Self {
            offer,
            response: None,
        }
    }
}

#[async_trait]
impl LobbyCommand for CreateIngress {
    async fn execute(&mut self, session: &Arc<Session>) -> Result<(), RouterError> {
        let answer = session.create_ingress_endpoint(self.offer.clone()).await?;
        self.response = Some(WebRtcResource {
            id: session.id,
            sdp: answer,
        });
        Ok(())
    }
}

/// Establish the egress endpoint from a participant's offer.
pub struct CreateEgress {
    offer: SessionDescription,
    /// Set on success
    pub response: Option<WebRtcResource>,
}

impl CreateEgress {
    #[must_use]
    pub fn new(offer: SessionDescription) -> Self {
        Self {
            offer,
            response: None,
        }
    }
}

#[async_trait]
impl LobbyCommand for CreateEgress {
    async fn execute(&mut self, session: &Arc<Session>) -> Result<(), RouterError> {
        let answer = session.create_egress_endpoint(self.offer.clone()).await?;
        self.response = Some(WebRtcResource {
            id: session.id,
            sdp: answer,
        });
        Ok(())
    }
}

/// Apply a participant's answer to the current egress offer.
pub struct AnswerEgress {
    answer: SessionDescription,
}

impl AnswerEgress {
    #[must_use]
    pub fn new(answer: SessionDescription) -> Self {
        Self { answer }
    }
}

#[async_trait]
impl LobbyCommand for AnswerEgress {
    async fn execute(&mut self, session: &Arc<Session>) -> Result<(), RouterError> {
        session.answer_egress(self.answer.clone()).await
    }
}

/// Answer a remote instance's ingress offer (the remote publishes into us).
pub struct AnswerInstanceIngress {
    offer: SessionDescription,
    /// Set on success
    pub response: Option<WebRtcResource>,
}

impl AnswerInstanceIngress {
    #[must_use]
    pub fn new(offer: SessionDescription) -> Self {
        Self {
            offer,
            response: None,
        }
    }
}

#[async_trait]
impl LobbyCommand for AnswerInstanceIngress {
    async fn execute(&mut self, session: &Arc<Session>) -> Result<(), RouterError> {
        let answer = session.create_ingress_endpoint(self.offer.clone()).await?;
        self.response = Some(WebRtcResource {
            id: session.id,
            sdp: answer,
        });
        Ok(())
    }
}

/// Pull a remote live stream: offer an ingress, post it to the remote WHEP
/// endpoint and apply the returned answer.
pub struct OfferIngress {
    api: Arc<dyn WhepApi>,
}

impl OfferIngress {
    #[must_use]
    pub fn new(api: Arc<dyn WhepApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl LobbyCommand for OfferIngress {
    async fn execute(&mut self, session: &Arc<Session>) -> Result<(), RouterError> {
        let offer = session.offer_ingress_endpoint().await?;
        let answer = self.api.post_whep_offer(&offer).await?;
        session.set_ingress_answer(answer).await
    }
}

/// Push our live stream to a remote host: offer an egress, post it to the
/// remote WHIP endpoint and apply the returned answer.
pub struct OfferEgress {
    api: Arc<dyn WhipApi>,
}

impl OfferEgress {
    #[must_use]
    pub fn new(api: Arc<dyn WhipApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl LobbyCommand for OfferEgress {
    async fn execute(&mut self, session: &Arc<Session>) -> Result<(), RouterError> {
        let offer = session.offer_instance_egress().await?;
        let answer = self.api.post_whip_offer(&offer).await?;
        session.answer_instance_egress(answer).await
    }
}
