//! Connector toward the instance hosting a live stream.

use crate::commands::{OfferEgress, OfferIngress, WhepApi, WhipApi};
use crate::errors::RouterError;
use crate::federation::InstanceApiClient;
use common::types::UserId;
use std::sync::Arc;
use tracing::debug;

/// Builds the federation commands for a live stream hosted elsewhere.
pub struct Connector {
    home_url: String,
    host_url: String,
    api: Arc<InstanceApiClient>,
}

impl Connector {
    /// Create a connector toward `host_url`.
    ///
    /// # Errors
    ///
    /// Returns `RouterError::HttpClient` if the API client cannot be built.
    pub fn new(
        home_url: impl Into<String>,
        host_url: impl Into<String>,
        instance_id: UserId,
        actor: impl Into<String>,
        token: impl Into<String>,
        space: impl Into<String>,
        stream: impl Into<String>,
    ) -> Result<Self, RouterError> {
        let host_url = host_url.into();
        let api = Arc::new(InstanceApiClient::new(
            host_url.clone(),
            instance_id,
            actor,
            token,
            space,
            stream,
        )?);
        Ok(Self {
            home_url: home_url.into(),
            host_url,
            api,
        })
    }

    /// Log in and build the command that pulls the remote live stream into
    /// this instance.
    ///
    /// # Errors
    ///
    /// Returns `RouterError::RemoteLogin` when authentication fails.
    pub async fn build_ingress(&self) -> Result<OfferIngress, RouterError> {
        debug!(
            target: "sr.federation",
            instance_id = %self.api.instance_id(),
            "connecting to live stream host instance"
        );
        self.api.login().await?;
        Ok(OfferIngress::new(Arc::clone(&self.api) as Arc<dyn WhepApi>))
    }

    /// Log in and build the command that pushes this instance's stream to
    /// the remote host.
    ///
    /// # Errors
    ///
    /// Returns `RouterError::RemoteLogin` when authentication fails.
    pub async fn build_egress(&self) -> Result<OfferEgress, RouterError> {
        debug!(
            target: "sr.federation",
            instance_id = %self.api.instance_id(),
            "connecting to live stream host instance"
        );
        self.api.login().await?;
        Ok(OfferEgress::new(Arc::clone(&self.api) as Arc<dyn WhipApi>))
    }

    /// Whether this instance is itself the live stream host (no federation
    /// link needed).
    #[must_use]
    pub fn is_live_stream_host(&self) -> bool {
        self.home_url == self.host_url
    }

    /// The remote instance's id.
    #[must_use]
    pub fn instance_id(&self) -> UserId {
        self.api.instance_id()
    }
}
