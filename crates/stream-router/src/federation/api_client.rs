//! HTTP client for a remote instance's federation endpoints.
//!
//! # Security
//!
//! - Login exchanges the registration token for a short-lived JWT, used as
//!   a Bearer token on the offer endpoints
//! - Timeouts prevent hanging connections

use crate::commands::{WhepApi, WhipApi};
use crate::errors::RouterError;
use async_trait::async_trait;
use common::types::{SessionDescription, UserId};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use tracing::{instrument, warn};

/// Default timeout for federation requests in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Login payload posted to `{base}/authenticate`.
#[derive(Debug, Clone, Serialize)]
struct InstanceUser {
    #[serde(rename = "userId")]
    user_id: String,
    token: String,
}

/// Login response carrying the session JWT.
#[derive(Debug, Clone, Deserialize)]
struct AuthToken {
    #[serde(rename = "JWT")]
    jwt: String,
}

/// HTTP client bound to one remote instance and one live stream.
pub struct InstanceApiClient {
    client: Client,
    base_url: String,
    instance_id: UserId,
    actor: String,
    token: String,
    space: String,
    stream: String,
    bearer: RwLock<Option<String>>,
}

impl InstanceApiClient {
    /// Create a client for a remote instance.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Base URL of the remote instance (no trailing slash)
    /// * `instance_id` - The remote instance's id, used as the session user
    /// * `actor` - This instance's actor name, sent at login
    /// * `token` - Registration token exchanged for a JWT at login
    /// * `space` / `stream` - The live stream addressed by offer posts
    ///
    /// # Errors
    ///
    /// Returns `RouterError::HttpClient` if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        instance_id: UserId,
        actor: impl Into<String>,
        token: impl Into<String>,
        space: impl Into<String>,
        stream: impl Into<String>,
    ) -> Result<Self, RouterError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| RouterError::HttpClient(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            instance_id,
            actor: actor.into(),
            token: token.into(),
            space: space.into(),
            stream: stream.into(),
            bearer: RwLock::new(None),
        })
    }

    /// The remote instance's id.
    #[must_use]
    pub fn instance_id(&self) -> UserId {
        self.instance_id
    }

    /// Authenticate against the remote instance and store the JWT for
    /// subsequent offer posts.
    ///
    /// # Errors
    ///
    /// Returns `RouterError::RemoteLogin` when the instance is unreachable
    /// or rejects the credentials.
    #[instrument(skip(self), fields(instance_id = %self.instance_id))]
    pub async fn login(&self) -> Result<(), RouterError> {
        let url = format!("{}/authenticate", self.base_url);
        let user = InstanceUser {
            user_id: self.actor.clone(),
            token: self.token.clone(),
        };

        let response = self
            .client
            .post(&url)
            .header("Accept", "application/json")
            .json(&user)
            .send()
            .await
            .map_err(|e| {
                warn!(target: "sr.federation", error = %e, "login request failed");
                RouterError::RemoteLogin(e.to_string())
            })?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(RouterError::RemoteLogin(format!(
                "server answered with status {}",
                response.status()
            )));
        }

        let token: AuthToken = response
            .json()
            .await
            .map_err(|e| RouterError::RemoteLogin(e.to_string()))?;
        *self.bearer.write().unwrap_or_else(PoisonError::into_inner) = Some(token.jwt);
        Ok(())
    }

    async fn post_offer(
        &self,
        kind: &str,
        offer: &SessionDescription,
    ) -> Result<SessionDescription, RouterError> {
        let bearer = self
            .bearer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| RouterError::RemoteOffer("not logged in".to_string()))?;

        let url = format!(
            "{}/fed/space/{}/stream/{}/{}",
            self.base_url, self.space, self.stream, kind
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {bearer}"))
            .header("Content-Type", "application/sdp")
            .body(offer.sdp.clone())
            .send()
            .await
            .map_err(|e| {
                warn!(target: "sr.federation", error = %e, kind, "offer request failed");
                RouterError::RemoteOffer(e.to_string())
            })?;

        if response.status() != reqwest::StatusCode::CREATED {
            return Err(RouterError::RemoteOffer(format!(
                "server answered with status {}",
                response.status()
            )));
        }

        let sdp = response
            .text()
            .await
            .map_err(|e| RouterError::RemoteOffer(e.to_string()))?;
        Ok(SessionDescription::answer(sdp))
    }
}

#[async_trait]
impl WhipApi for InstanceApiClient {
    async fn post_whip_offer(
        &self,
        offer: &SessionDescription,
    ) -> Result<SessionDescription, RouterError> {
        self.post_offer("whip", offer).await
    }
}

#[async_trait]
impl WhepApi for InstanceApiClient {
    async fn post_whep_offer(
        &self,
        offer: &SessionDescription,
    ) -> Result<SessionDescription, RouterError> {
        self.post_offer("whep", offer).await
    }
}
