//! Scripted RTP engine and recording endpoints.

use async_trait::async_trait;
use common::types::{LiveStreamId, SessionDescription, SessionId};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use stream_router::errors::RouterError;
use stream_router::rtp::{
    EgressMuteState, Endpoint, EndpointOptions, RtpEngine, TrackInfo,
};

/// Which engine constructor produced an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstablishKind {
    Ingress,
    Egress,
    StaticEgress,
}

/// Record of one establish call, including the hook bundle so tests can
/// drive transport events (data channel arrival, negotiation needed, lost
/// connection) by hand.
pub struct EstablishedCall {
    pub kind: EstablishKind,
    pub session_id: SessionId,
    pub live_stream: LiveStreamId,
    pub offer: Option<SessionDescription>,
    pub endpoint: Arc<MockEndpoint>,
    pub options: EndpointOptions,
}

/// An endpoint that records everything applied to it.
pub struct MockEndpoint {
    local: Mutex<SessionDescription>,
    new_offer_answer: Mutex<SessionDescription>,
    gather_forever: AtomicBool,
    init_complete: AtomicBool,
    answers: Mutex<Vec<SessionDescription>>,
    new_offers: Mutex<Vec<SessionDescription>>,
    added_tracks: Mutex<Vec<TrackInfo>>,
    removed_tracks: Mutex<Vec<TrackInfo>>,
    egress_mutes: Mutex<Vec<(String, bool)>>,
    ingress_mute_response: Mutex<Option<TrackInfo>>,
    egress_mute_response: Mutex<Option<EgressMuteState>>,
}

impl MockEndpoint {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            local: Mutex::new(SessionDescription::answer("--mock-answer--")),
            new_offer_answer: Mutex::new(SessionDescription::answer("--a--")),
            gather_forever: AtomicBool::new(false),
            init_complete: AtomicBool::new(false),
            answers: Mutex::new(Vec::new()),
            new_offers: Mutex::new(Vec::new()),
            added_tracks: Mutex::new(Vec::new()),
            removed_tracks: Mutex::new(Vec::new()),
            egress_mutes: Mutex::new(Vec::new()),
            ingress_mute_response: Mutex::new(None),
            egress_mute_response: Mutex::new(None),
        })
    }

    /// What `local_description` resolves to.
    pub fn set_local_description(&self, sdp: SessionDescription) {
        *self.local.lock().unwrap() = sdp;
    }

    /// Make `local_description` pend forever (ICE gathering never finishes).
    pub fn set_gather_forever(&self) {
        self.gather_forever.store(true, Ordering::SeqCst);
    }

    /// Pretend initial negotiation already finished.
    pub fn mark_init_complete(&self) {
        self.init_complete.store(true, Ordering::SeqCst);
    }

    /// What `set_ingress_mute` reports back.
    pub fn set_ingress_mute_response(&self, track: TrackInfo) {
        *self.ingress_mute_response.lock().unwrap() = Some(track);
    }

    /// What `set_egress_mute` reports back.
    pub fn set_egress_mute_response(&self, state: EgressMuteState) {
        *self.egress_mute_response.lock().unwrap() = Some(state);
    }

    pub fn answers(&self) -> Vec<SessionDescription> {
        self.answers.lock().unwrap().clone()
    }

    pub fn new_offers(&self) -> Vec<SessionDescription> {
        self.new_offers.lock().unwrap().clone()
    }

    pub fn added_tracks(&self) -> Vec<TrackInfo> {
        self.added_tracks.lock().unwrap().clone()
    }

    pub fn removed_tracks(&self) -> Vec<TrackInfo> {
        self.removed_tracks.lock().unwrap().clone()
    }

    pub fn egress_mutes(&self) -> Vec<(String, bool)> {
        self.egress_mutes.lock().unwrap().clone()
    }

    /// Wait until `count` tracks were added, panicking after `timeout`.
    pub async fn wait_added_tracks(&self, count: usize, timeout: Duration) -> Vec<TrackInfo> {
        wait_until(timeout, || {
            let tracks = self.added_tracks();
            (tracks.len() >= count).then_some(tracks)
        })
        .await
        .unwrap_or_else(|| {
            panic!(
                "timed out waiting for {count} added tracks, got {}",
                self.added_tracks().len()
            )
        })
    }

    /// Wait until `count` egress mutes were flagged, panicking after
    /// `timeout`.
    pub async fn wait_egress_mutes(&self, count: usize, timeout: Duration) -> Vec<(String, bool)> {
        wait_until(timeout, || {
            let mutes = self.egress_mutes();
            (mutes.len() >= count).then_some(mutes)
        })
        .await
        .unwrap_or_else(|| {
            panic!(
                "timed out waiting for {count} egress mutes, got {}",
                self.egress_mutes().len()
            )
        })
    }
}

async fn wait_until<T>(timeout: Duration, check: impl Fn() -> Option<T>) -> Option<T> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(value) = check() {
            return Some(value);
        }
        if tokio::time::Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[async_trait]
impl Endpoint for MockEndpoint {
    async fn local_description(&self) -> Result<SessionDescription, RouterError> {
        if self.gather_forever.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(self.local.lock().unwrap().clone())
    }

    async fn set_answer(&self, sdp: SessionDescription) -> Result<(), RouterError> {
        self.answers.lock().unwrap().push(sdp);
        Ok(())
    }

    async fn set_new_offer(
        &self,
        sdp: SessionDescription,
    ) -> Result<SessionDescription, RouterError> {
        self.new_offers.lock().unwrap().push(sdp);
        Ok(self.new_offer_answer.lock().unwrap().clone())
    }

    fn set_init_complete(&self) {
        self.init_complete.store(true, Ordering::SeqCst);
    }

    fn init_complete(&self) -> bool {
        self.init_complete.load(Ordering::SeqCst)
    }

    async fn add_track(&self, track: TrackInfo) {
        self.added_tracks.lock().unwrap().push(track);
    }

    async fn remove_track(&self, track: TrackInfo) {
        self.removed_tracks.lock().unwrap().push(track);
    }

    async fn set_ingress_mute(&self, _mid: &str, mute: bool) -> Option<TrackInfo> {
        self.ingress_mute_response.lock().unwrap().clone().map(|mut track| {
            track.mute = mute;
            track
        })
    }

    async fn set_egress_mute(&self, track_id: &str, mute: bool) -> Option<EgressMuteState> {
        self.egress_mutes
            .lock()
            .unwrap()
            .push((track_id.to_string(), mute));
        self.egress_mute_response.lock().unwrap().clone()
    }
}

/// An engine handing out scripted endpoints and recording every call.
#[derive(Default)]
pub struct MockRtpEngine {
    scripted: Mutex<VecDeque<Arc<MockEndpoint>>>,
    calls: Mutex<Vec<Arc<EstablishedCall>>>,
    fail_next: Mutex<Option<String>>,
}

impl MockRtpEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue the endpoint the next establish call returns. Without a
    /// scripted endpoint a fresh default one is created.
    pub fn push_endpoint(&self, endpoint: Arc<MockEndpoint>) {
        self.scripted.lock().unwrap().push_back(endpoint);
    }

    /// Make the next establish call fail with an engine error.
    pub fn fail_next(&self, message: impl Into<String>) {
        *self.fail_next.lock().unwrap() = Some(message.into());
    }

    pub fn calls(&self) -> Vec<Arc<EstablishedCall>> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// The most recent establish call.
    pub fn last_call(&self) -> Arc<EstablishedCall> {
        self.calls
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no establish call recorded")
    }

    fn establish(
        &self,
        kind: EstablishKind,
        session_id: SessionId,
        live_stream: LiveStreamId,
        offer: Option<SessionDescription>,
        options: EndpointOptions,
    ) -> Result<Arc<dyn Endpoint>, RouterError> {
        if let Some(message) = self.fail_next.lock().unwrap().take() {
            return Err(RouterError::Engine(message));
        }
        let endpoint = self
            .scripted
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(MockEndpoint::new);
        self.calls.lock().unwrap().push(Arc::new(EstablishedCall {
            kind,
            session_id,
            live_stream,
            offer,
            endpoint: Arc::clone(&endpoint),
            options,
        }));
        Ok(endpoint)
    }
}

#[async_trait]
impl RtpEngine for MockRtpEngine {
    async fn establish_ingress_endpoint(
        &self,
        session_id: SessionId,
        live_stream: LiveStreamId,
        offer: SessionDescription,
        options: EndpointOptions,
    ) -> Result<Arc<dyn Endpoint>, RouterError> {
        self.establish(
            EstablishKind::Ingress,
            session_id,
            live_stream,
            Some(offer),
            options,
        )
    }

    async fn establish_egress_endpoint(
        &self,
        session_id: SessionId,
        live_stream: LiveStreamId,
        options: EndpointOptions,
    ) -> Result<Arc<dyn Endpoint>, RouterError> {
        self.establish(EstablishKind::Egress, session_id, live_stream, None, options)
    }

    async fn establish_static_egress_endpoint(
        &self,
        session_id: SessionId,
        live_stream: LiveStreamId,
        offer: SessionDescription,
        options: EndpointOptions,
    ) -> Result<Arc<dyn Endpoint>, RouterError> {
        self.establish(
            EstablishKind::StaticEgress,
            session_id,
            live_stream,
            Some(offer),
            options,
        )
    }
}
