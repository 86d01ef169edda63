//! Per-live-stream track routing actor.
//!
//! The hub is the single authoritative owner of "which tracks currently
//! exist for this live stream". All mutations of the track table happen
//! inside one event loop reading from one request channel, so the table
//! itself needs no lock. No callback made from the loop may block on a
//! session that is still gathering ICE, which is why fan-out skips sessions
//! whose initialization has not completed.
//!
//! Dispatch is fire-and-forget: under backpressure a routing event degrades
//! to a dropped, logged notification rather than a blocked producer.

mod metrics;

pub use metrics::{NodeStats, RoutingMetrics};

use crate::errors::RouterError;
use crate::rtp::{EndpointKind, LiveStreamSender, TrackDispatcher, TrackInfo, TrackPurpose};
use crate::sessions::SessionRepository;
use async_trait::async_trait;
use common::types::{LiveStreamId, SessionId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Predicate deciding whether a track is included in a track-list query.
pub type TrackFilter = Box<dyn Fn(&TrackInfo) -> bool + Send + Sync>;

/// Exclude tracks owned by the given session (no self-forwarding).
#[must_use]
pub fn filter_for_session(session_id: SessionId) -> TrackFilter {
    Box::new(move |track| track.session_id != session_id)
}

/// Exclude Main-purpose tracks.
#[must_use]
pub fn filter_not_main() -> TrackFilter {
    Box::new(|track| track.purpose != TrackPurpose::Main)
}

enum HubRequest {
    AddTrack(TrackInfo),
    RemoveTrack(TrackInfo),
    MuteTrack(TrackInfo),
    TrackList {
        respond_to: oneshot::Sender<Vec<TrackInfo>>,
    },
}

/// Handle to a hub.
#[derive(Clone)]
pub struct HubHandle {
    sender: mpsc::Sender<HubRequest>,
    cancel: CancellationToken,
    live_stream_id: LiveStreamId,
    dispatch_timeout: Duration,
    metrics: Arc<RoutingMetrics>,
}

impl HubHandle {
    /// The live stream this hub routes.
    #[must_use]
    pub fn live_stream_id(&self) -> LiveStreamId {
        self.live_stream_id
    }

    /// The hub's routing counters.
    #[must_use]
    pub fn metrics(&self) -> Arc<RoutingMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Whether the hub has been shut down.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    async fn dispatch(&self, request: HubRequest, what: &'static str) {
        tokio::select! {
            res = self.sender.send(request) => {
                if res.is_err() {
                    warn!(target: "sr.hub", live_stream = %self.live_stream_id, what, "dispatch on closed hub");
                } else {
                    debug!(target: "sr.hub", live_stream = %self.live_stream_id, what, "dispatched");
                }
            }
            () = self.cancel.cancelled() => {
                warn!(target: "sr.hub", live_stream = %self.live_stream_id, what, "dispatch on closed hub");
            }
            () = tokio::time::sleep(self.dispatch_timeout) => {
                error!(target: "sr.hub", live_stream = %self.live_stream_id, what, "dispatch interrupted by timeout");
            }
        }
    }

    /// Every currently published track minus those excluded by `filters`.
    ///
    /// Invoked once when a session's egress endpoint becomes ready, to seed
    /// its initial forwarding set.
    ///
    /// # Errors
    ///
    /// Returns `RouterError::HubClosed` or `RouterError::HubDispatchTimeout`
    /// when the query cannot reach the loop or the loop does not respond in
    /// time.
    pub async fn track_list(
        &self,
        session_id: SessionId,
        filters: Vec<TrackFilter>,
    ) -> Result<Vec<TrackInfo>, RouterError> {
        let (respond_to, response) = oneshot::channel();

        tokio::select! {
            res = self.sender.send(HubRequest::TrackList { respond_to }) => {
                if res.is_err() {
                    warn!(target: "sr.hub", live_stream = %self.live_stream_id, "track list on closed hub");
                    return Err(RouterError::HubClosed);
                }
            }
            () = self.cancel.cancelled() => {
                warn!(target: "sr.hub", live_stream = %self.live_stream_id, "track list on closed hub");
                return Err(RouterError::HubClosed);
            }
            () = tokio::time::sleep(self.dispatch_timeout) => {
                error!(target: "sr.hub", live_stream = %self.live_stream_id, "track list interrupted by dispatch timeout");
                return Err(RouterError::HubDispatchTimeout);
            }
        }

        let all = tokio::select! {
            res = response => res.map_err(|_| RouterError::HubClosed)?,
            () = self.cancel.cancelled() => return Err(RouterError::HubClosed),
            () = tokio::time::sleep(self.dispatch_timeout) => {
                return Err(RouterError::HubDispatchTimeout);
            }
        };

        let mut list = Vec::with_capacity(all.len());
        for track in all {
            if filters.iter().all(|filter| filter(&track)) {
                self.metrics
                    .increase_node(EndpointKind::Egress, session_id, track.purpose);
                list.push(track);
            }
        }
        Ok(list)
    }
}

#[async_trait]
impl TrackDispatcher for HubHandle {
    async fn dispatch_add_track(&self, track: TrackInfo) {
        self.dispatch(HubRequest::AddTrack(track), "add track").await;
    }

    async fn dispatch_remove_track(&self, track: TrackInfo) {
        self.dispatch(HubRequest::RemoveTrack(track), "remove track")
            .await;
    }

    async fn dispatch_mute_track(&self, track: TrackInfo) {
        self.dispatch(HubRequest::MuteTrack(track), "mute track")
            .await;
    }
}

/// The hub actor.
pub struct Hub {
    live_stream_id: LiveStreamId,
    receiver: mpsc::Receiver<HubRequest>,
    cancel: CancellationToken,
    session_repo: Arc<SessionRepository>,
    sender: Arc<dyn LiveStreamSender>,
    tracks: HashMap<String, TrackInfo>,
    metrics: Arc<RoutingMetrics>,
}

impl Hub {
    /// Spawn the hub for a live stream.
    ///
    /// Returns a handle and the loop's join handle. The hub shuts down when
    /// `cancel` fires.
    #[must_use]
    pub fn spawn(
        cancel: CancellationToken,
        live_stream_id: LiveStreamId,
        session_repo: Arc<SessionRepository>,
        sender: Arc<dyn LiveStreamSender>,
        dispatch_timeout: Duration,
    ) -> (HubHandle, JoinHandle<()>) {
        // Rendezvous-style mailbox: dispatchers block (bounded by the
        // dispatch timeout) until the loop accepts the event.
        let (tx, receiver) = mpsc::channel(1);
        let metrics = Arc::new(RoutingMetrics::new(live_stream_id));

        let hub = Self {
            live_stream_id,
            receiver,
            cancel: cancel.clone(),
            session_repo,
            sender,
            tracks: HashMap::new(),
            metrics: Arc::clone(&metrics),
        };

        let task_handle = tokio::spawn(hub.run());

        let handle = HubHandle {
            sender: tx,
            cancel,
            live_stream_id,
            dispatch_timeout,
            metrics,
        };

        (handle, task_handle)
    }

    async fn run(mut self) {
        info!(target: "sr.hub", live_stream = %self.live_stream_id, "hub started");
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    self.metrics.clear();
                    info!(target: "sr.hub", live_stream = %self.live_stream_id, "hub closed");
                    return;
                }
                request = self.receiver.recv() => {
                    match request {
                        Some(HubRequest::AddTrack(track)) => self.on_add_track(track).await,
                        Some(HubRequest::RemoveTrack(track)) => self.on_remove_track(track).await,
                        Some(HubRequest::MuteTrack(track)) => self.on_mute_track(track).await,
                        Some(HubRequest::TrackList { respond_to }) => {
                            self.on_track_list(respond_to);
                        }
                        None => {
                            info!(target: "sr.hub", live_stream = %self.live_stream_id, "hub channel closed, exiting");
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn on_add_track(&mut self, track: TrackInfo) {
        debug!(
            target: "sr.hub",
            source_session = %track.session_id,
            track = %track.id(),
            purpose = track.purpose.as_str(),
            "add track"
        );

        self.metrics
            .increase_node(EndpointKind::Ingress, track.session_id, track.purpose);
        self.metrics.hub_increase(track.purpose);

        if track.purpose == TrackPurpose::Main {
            self.sender.add_track(Arc::clone(&track.track));
        }

        self.tracks.insert(track.id().to_string(), track.clone());

        for session in self.session_repo.sessions().await {
            // A session that has just been created can block this call for
            // seconds while ICE gathering finishes. Never from inside the
            // loop: skip it for this event.
            if !session.init_complete() {
                continue;
            }
            if session.id == track.session_id {
                continue;
            }
            debug!(
                target: "sr.hub",
                session_id = %session.id,
                source_session = %track.session_id,
                track = %track.id(),
                "add egress track to session"
            );
            session.add_track(track.clone()).await;
        }
    }

    async fn on_remove_track(&mut self, track: TrackInfo) {
        debug!(
            target: "sr.hub",
            source_session = %track.session_id,
            track = %track.id(),
            purpose = track.purpose.as_str(),
            "remove track"
        );

        self.metrics.hub_decrease(track.purpose);
        self.metrics
            .decrease_node(EndpointKind::Ingress, track.session_id, track.purpose);

        if track.purpose == TrackPurpose::Main {
            self.sender.remove_track(Arc::clone(&track.track));
        }

        self.tracks.remove(track.id());

        for session in self.session_repo.sessions().await {
            // Same rule as add: a gathering session must not block the loop.
            if !session.init_complete() {
                continue;
            }
            if session.id == track.session_id {
                continue;
            }
            debug!(
                target: "sr.hub",
                session_id = %session.id,
                source_session = %track.session_id,
                track = %track.id(),
                "remove egress track from session"
            );
            session.remove_track(track.clone()).await;
            self.metrics
                .decrease_node(EndpointKind::Egress, session.id, track.purpose);
        }
    }

    async fn on_mute_track(&mut self, track: TrackInfo) {
        debug!(
            target: "sr.hub",
            source_session = %track.session_id,
            track = %track.id(),
            mute = track.mute,
            "mute track"
        );

        // Mute only flags the track, it stays in the table.
        if let Some(entry) = self.tracks.get_mut(track.id()) {
            entry.mute = track.mute;
        }

        for session in self.session_repo.sessions().await {
            if session.id == track.session_id {
                continue;
            }
            // Mute fan-out runs off-loop, one task per session, so a slow
            // session cannot stall the others' notifications.
            let track = track.clone();
            tokio::spawn(async move {
                session.send_mute_track(&track).await;
            });
        }
    }

    fn on_track_list(&self, respond_to: oneshot::Sender<Vec<TrackInfo>>) {
        let list: Vec<TrackInfo> = self.tracks.values().cloned().collect();
        if respond_to.send(list).is_err() {
            warn!(target: "sr.hub", live_stream = %self.live_stream_id, "track list requester went away");
        }
    }
}
