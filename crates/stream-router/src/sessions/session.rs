//! Per-participant connection lifecycle.
//!
//! A session owns up to three endpoints - ingress (passive, never
//! renegotiates), egress (active, renegotiates on track changes) and pipe
//! (instance-to-instance signaling link) - plus the signal that pairs
//! offers with answers. Each endpoint slot moves
//! `absent -> negotiating -> established`; a second create while the slot
//! is not absent is rejected, never merged. Once the session's token is
//! cancelled every operation fails fast, before any network action.

use crate::config::RouterConfig;
use crate::errors::RouterError;
use crate::hub::{filter_for_session, HubHandle};
use crate::rtp::{
    DataChannelHook, Endpoint, EndpointOptions, LostConnectionHook, RtpEngine, TrackDispatcher,
    TrackInfo,
};
use crate::sessions::signal::Signal;
use crate::sessions::SessionKind;
use common::types::{SessionDescription, SessionId, UserId};
use signal_protocol::MuteMsg;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Lifecycle of one endpoint slot.
enum EndpointSlot {
    Absent,
    Negotiating,
    Established(Arc<dyn Endpoint>),
}

impl EndpointSlot {
    fn endpoint(&self) -> Option<Arc<dyn Endpoint>> {
        match self {
            EndpointSlot::Established(endpoint) => Some(Arc::clone(endpoint)),
            _ => None,
        }
    }
}

fn claim(slot: &RwLock<EndpointSlot>, exists: RouterError) -> Result<(), RouterError> {
    let mut guard = slot.write().unwrap_or_else(PoisonError::into_inner);
    match *guard {
        EndpointSlot::Absent => {
            *guard = EndpointSlot::Negotiating;
            Ok(())
        }
        _ => Err(exists),
    }
}

fn install(slot: &RwLock<EndpointSlot>, endpoint: Arc<dyn Endpoint>) {
    let mut guard = slot.write().unwrap_or_else(PoisonError::into_inner);
    *guard = EndpointSlot::Established(endpoint);
}

fn release(slot: &RwLock<EndpointSlot>) {
    let mut guard = slot.write().unwrap_or_else(PoisonError::into_inner);
    if matches!(*guard, EndpointSlot::Negotiating) {
        *guard = EndpointSlot::Absent;
    }
}

fn established(slot: &RwLock<EndpointSlot>) -> Option<Arc<dyn Endpoint>> {
    slot.read()
        .unwrap_or_else(PoisonError::into_inner)
        .endpoint()
}

/// One participant's (or instance link's) connection state.
pub struct Session {
    /// Session-scoped id, distinct from the user id
    pub id: SessionId,
    /// Owning user or instance
    pub user_id: UserId,
    kind: SessionKind,
    cancel: CancellationToken,
    engine: Arc<dyn RtpEngine>,
    hub: HubHandle,
    signal: Arc<Signal>,
    ingress: RwLock<EndpointSlot>,
    egress: RwLock<EndpointSlot>,
    pipe: RwLock<EndpointSlot>,
    ice_gathering_timeout: Duration,
    request_timeout: Duration,
    garbage: mpsc::Sender<UserId>,
}

impl Session {
    /// Create a session for a participant or instance link.
    ///
    /// The session owns a child of `parent`; cancelling either closes it.
    #[must_use]
    pub fn new(
        parent: &CancellationToken,
        user_id: UserId,
        kind: SessionKind,
        hub: HubHandle,
        engine: Arc<dyn RtpEngine>,
        config: &RouterConfig,
        garbage: mpsc::Sender<UserId>,
    ) -> Arc<Self> {
        let cancel = parent.child_token();
        let id = SessionId::new();
        let signal = Signal::new(cancel.clone(), id, user_id, config.messenger_wait_timeout);

        let session = Arc::new(Self {
            id,
            user_id,
            kind,
            cancel,
            engine,
            hub,
            signal,
            ingress: RwLock::new(EndpointSlot::Absent),
            egress: RwLock::new(EndpointSlot::Absent),
            pipe: RwLock::new(EndpointSlot::Absent),
            ice_gathering_timeout: config.ice_gathering_timeout,
            request_timeout: config.session_request_timeout,
            garbage,
        });

        // Inbound mute flags route back through the session: flag the
        // ingress mid, then re-dispatch so the hub fans the flag out.
        let weak = Arc::downgrade(&session);
        session.signal.set_on_mute(Box::new(move |mute| {
            if let Some(session) = weak.upgrade() {
                tokio::spawn(async move {
                    session.on_mute_track(mute).await;
                });
            }
        }));

        session
    }

    /// The session kind gates which endpoint operations callers use.
    #[must_use]
    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    /// The session's negotiation state machine.
    #[must_use]
    pub fn signal(&self) -> Arc<Signal> {
        Arc::clone(&self.signal)
    }

    /// Close the session. Terminal: subsequent operations fail fast.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Whether the session has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Establish the single, passive ingress endpoint from a participant's
    /// offer and return the answer.
    ///
    /// # Errors
    ///
    /// `SessionClosed`, `IngressAlreadyExists`, `IceGatheringInterrupted`,
    /// or the engine's establishment error.
    pub async fn create_ingress_endpoint(
        self: &Arc<Self>,
        offer: SessionDescription,
    ) -> Result<SessionDescription, RouterError> {
        self.ensure_open()?;
        claim(&self.ingress, RouterError::IngressAlreadyExists)?;

        let mut options = EndpointOptions::new();
        options.on_data_channel = Some(self.ingress_channel_hook());
        options.on_lost_connection = Some(self.lost_connection_hook());
        options.track_dispatcher = Some(self.dispatcher());

        let endpoint = match self
            .engine
            .establish_ingress_endpoint(self.id, self.hub.live_stream_id(), offer, options)
            .await
        {
            Ok(endpoint) => endpoint,
            Err(err) => {
                release(&self.ingress);
                return Err(err);
            }
        };
        install(&self.ingress, Arc::clone(&endpoint));

        self.local_description(&endpoint).await
    }

    /// Establish an ingress endpoint in offering mode, used by an instance
    /// session pulling a remote live stream. The answer arrives later via
    /// [`Session::set_ingress_answer`]; remote renegotiation offers are
    /// answered by this endpoint once the messenger is up.
    ///
    /// # Errors
    ///
    /// `SessionClosed`, `IngressAlreadyExists`, `IceGatheringInterrupted`,
    /// or the engine's establishment error.
    pub async fn offer_ingress_endpoint(
        self: &Arc<Self>,
    ) -> Result<SessionDescription, RouterError> {
        self.ensure_open()?;
        claim(&self.ingress, RouterError::IngressAlreadyExists)?;

        let mut options = EndpointOptions::new();
        options.on_data_channel = Some(self.ingress_channel_hook());
        options.on_lost_connection = Some(self.lost_connection_hook());
        options.track_dispatcher = Some(self.dispatcher());

        let endpoint = match self
            .engine
            .establish_egress_endpoint(self.id, self.hub.live_stream_id(), options)
            .await
        {
            Ok(endpoint) => endpoint,
            Err(err) => {
                release(&self.ingress);
                return Err(err);
            }
        };
        install(&self.ingress, Arc::clone(&endpoint));
        self.register_answerer_when_ready(Arc::clone(&endpoint));

        self.local_description(&endpoint).await
    }

    /// Apply the remote answer to a pending ingress offer.
    ///
    /// # Errors
    ///
    /// `SessionClosed`, `NoIngressInSession`, or the engine's error.
    pub async fn set_ingress_answer(
        &self,
        answer: SessionDescription,
    ) -> Result<(), RouterError> {
        self.ensure_open()?;
        let Some(endpoint) = established(&self.ingress) else {
            return Err(RouterError::NoIngressInSession);
        };
        endpoint.set_answer(answer).await?;
        endpoint.set_init_complete();
        Ok(())
    }

    /// Establish the single egress endpoint from a participant's offer and
    /// return the answer. Waits for the signaling messenger first: track
    /// fan-out cannot be delivered before the data channel opens.
    ///
    /// # Errors
    ///
    /// `SessionClosed`, `EgressAlreadyExists`, `MessengerSetupTimeout`,
    /// `SessionRequestTimeout`, `IceGatheringInterrupted`, or the engine's
    /// establishment error.
    pub async fn create_egress_endpoint(
        self: &Arc<Self>,
        offer: SessionDescription,
    ) -> Result<SessionDescription, RouterError> {
        self.ensure_open()?;
        claim(&self.egress, RouterError::EgressAlreadyExists)?;

        if let Err(err) = self.wait_for_messenger().await {
            release(&self.egress);
            return Err(err);
        }

        let mut options = EndpointOptions::new();
        options.current_tracks = Some(self.current_tracks_hook());
        options.on_data_channel = Some(self.empty_channel_hook());
        options.on_negotiation_needed = Some(self.negotiation_hook());
        options.on_lost_connection = Some(self.lost_connection_hook());

        let endpoint = match self
            .engine
            .establish_static_egress_endpoint(self.id, self.hub.live_stream_id(), offer, options)
            .await
        {
            Ok(endpoint) => endpoint,
            Err(err) => {
                release(&self.egress);
                return Err(err);
            }
        };
        install(&self.egress, Arc::clone(&endpoint));
        self.signal.set_offerer(Arc::clone(&endpoint));

        self.local_description(&endpoint).await
    }

    /// Establish the egress endpoint in offering mode and return the offer.
    /// Requires an ingress (nothing to forward to a session that publishes
    /// nothing and has no channel) and a ready messenger.
    ///
    /// # Errors
    ///
    /// `SessionClosed`, `EgressAlreadyExists`, `NoIngressInSession`,
    /// `MessengerSetupTimeout`, `SessionRequestTimeout`,
    /// `IceGatheringInterrupted`, or the engine's establishment error.
    pub async fn offer_egress_endpoint(
        self: &Arc<Self>,
    ) -> Result<SessionDescription, RouterError> {
        self.ensure_open()?;
        claim(&self.egress, RouterError::EgressAlreadyExists)?;

        if established(&self.ingress).is_none() {
            release(&self.egress);
            return Err(RouterError::NoIngressInSession);
        }

        if let Err(err) = self.wait_for_messenger().await {
            release(&self.egress);
            return Err(err);
        }

        let mut options = EndpointOptions::new();
        options.current_tracks = Some(self.current_tracks_hook());
        options.on_data_channel = Some(self.empty_channel_hook());
        options.on_negotiation_needed = Some(self.negotiation_hook());
        options.on_lost_connection = Some(self.lost_connection_hook());

        let endpoint = match self
            .engine
            .establish_egress_endpoint(self.id, self.hub.live_stream_id(), options)
            .await
        {
            Ok(endpoint) => endpoint,
            Err(err) => {
                release(&self.egress);
                return Err(err);
            }
        };
        install(&self.egress, Arc::clone(&endpoint));
        self.signal.set_offerer(Arc::clone(&endpoint));

        self.local_description(&endpoint).await
    }

    /// Apply a participant's answer to the egress endpoint's current offer.
    ///
    /// # Errors
    ///
    /// `SessionClosed` or `NoEgressInSession`.
    pub async fn answer_egress(&self, answer: SessionDescription) -> Result<(), RouterError> {
        self.ensure_open()?;
        if established(&self.egress).is_none() || self.signal.offerer().is_none() {
            return Err(RouterError::NoEgressInSession);
        }
        self.signal.apply_answer(answer, 0).await;
        Ok(())
    }

    /// Establish a placeholder egress from an offer, without a message
    /// handler. The endpoint never renegotiates; it only seeds itself from
    /// the current track list.
    ///
    /// # Errors
    ///
    /// `SessionClosed`, `EgressAlreadyExists`, `IceGatheringInterrupted`,
    /// or the engine's establishment error.
    pub async fn create_static_egress_endpoint(
        self: &Arc<Self>,
        offer: SessionDescription,
    ) -> Result<SessionDescription, RouterError> {
        self.ensure_open()?;
        claim(&self.egress, RouterError::EgressAlreadyExists)?;

        let mut options = EndpointOptions::new();
        options.current_tracks = Some(self.current_tracks_hook());

        let endpoint = match self
            .engine
            .establish_static_egress_endpoint(self.id, self.hub.live_stream_id(), offer, options)
            .await
        {
            Ok(endpoint) => endpoint,
            Err(err) => {
                release(&self.egress);
                return Err(err);
            }
        };
        install(&self.egress, Arc::clone(&endpoint));

        self.local_description(&endpoint).await
    }

    /// Answer a remote instance's pipe offer (the receiving end of an
    /// instance-to-instance signaling link).
    ///
    /// # Errors
    ///
    /// `SessionClosed`, `PipeAlreadyExists`, `IceGatheringInterrupted`, or
    /// the engine's establishment error.
    pub async fn create_pipe_endpoint(
        self: &Arc<Self>,
        offer: SessionDescription,
    ) -> Result<SessionDescription, RouterError> {
        self.ensure_open()?;
        debug!(target: "sr.session", session_id = %self.id, instance_id = %self.user_id, "create pipe endpoint");
        claim(&self.pipe, RouterError::PipeAlreadyExists)?;

        let mut options = EndpointOptions::new();
        options.on_data_channel = Some(self.ingress_channel_hook());
        options.on_lost_connection = Some(self.lost_connection_hook());
        options.track_dispatcher = Some(self.dispatcher());

        let endpoint = match self
            .engine
            .establish_ingress_endpoint(self.id, self.hub.live_stream_id(), offer, options)
            .await
        {
            Ok(endpoint) => endpoint,
            Err(err) => {
                release(&self.pipe);
                return Err(err);
            }
        };
        install(&self.pipe, Arc::clone(&endpoint));

        self.local_description(&endpoint).await
    }

    /// Initiate a pipe toward the instance hosting the live stream and
    /// return the offer.
    ///
    /// # Errors
    ///
    /// `SessionClosed`, `PipeAlreadyExists`, `IceGatheringInterrupted`, or
    /// the engine's establishment error.
    pub async fn offer_pipe_endpoint(self: &Arc<Self>) -> Result<SessionDescription, RouterError> {
        self.ensure_open()?;
        debug!(target: "sr.session", session_id = %self.id, instance_id = %self.user_id, "offer pipe endpoint");
        claim(&self.pipe, RouterError::PipeAlreadyExists)?;

        let mut options = EndpointOptions::new();
        options.on_data_channel = Some(self.pipe_channel_hook());
        options.on_lost_connection = Some(self.lost_connection_hook());

        let endpoint = match self
            .engine
            .establish_egress_endpoint(self.id, self.hub.live_stream_id(), options)
            .await
        {
            Ok(endpoint) => endpoint,
            Err(err) => {
                release(&self.pipe);
                return Err(err);
            }
        };
        install(&self.pipe, Arc::clone(&endpoint));

        self.local_description(&endpoint).await
    }

    /// Apply the remote instance's answer to a pending pipe offer.
    ///
    /// # Errors
    ///
    /// `SessionClosed`, `NoPipeInSession`, or the engine's error.
    pub async fn answer_pipe(&self, answer: SessionDescription) -> Result<(), RouterError> {
        self.ensure_open()?;
        debug!(target: "sr.session", session_id = %self.id, instance_id = %self.user_id, "answer pipe");
        let Some(endpoint) = established(&self.pipe) else {
            return Err(RouterError::NoPipeInSession);
        };
        endpoint.set_answer(answer).await?;
        Ok(())
    }

    /// Establish an egress toward a remote instance and return the offer.
    /// Unlike [`Session::offer_egress_endpoint`] there is no upfront
    /// messenger wait: the signal registers the offerer as soon as the pipe
    /// messenger comes up.
    ///
    /// # Errors
    ///
    /// `SessionClosed`, `EgressAlreadyExists`, `IceGatheringInterrupted`,
    /// or the engine's establishment error.
    pub async fn offer_instance_egress(
        self: &Arc<Self>,
    ) -> Result<SessionDescription, RouterError> {
        self.ensure_open()?;
        debug!(target: "sr.session", session_id = %self.id, instance_id = %self.user_id, "offer instance egress");
        claim(&self.egress, RouterError::EgressAlreadyExists)?;

        let mut options = EndpointOptions::new();
        options.current_tracks = Some(self.current_tracks_hook());
        options.on_data_channel = Some(self.empty_channel_hook());
        options.on_negotiation_needed = Some(self.negotiation_hook());
        options.on_lost_connection = Some(self.lost_connection_hook());

        let endpoint = match self
            .engine
            .establish_egress_endpoint(self.id, self.hub.live_stream_id(), options)
            .await
        {
            Ok(endpoint) => endpoint,
            Err(err) => {
                release(&self.egress);
                return Err(err);
            }
        };
        install(&self.egress, Arc::clone(&endpoint));
        self.register_offerer_when_ready(Arc::clone(&endpoint));

        self.local_description(&endpoint).await
    }

    /// Apply a remote instance's answer to a pending instance-egress offer.
    ///
    /// # Errors
    ///
    /// `SessionClosed` or `NoEgressInSession` (also when the pipe messenger
    /// has not registered the offerer yet).
    pub async fn answer_instance_egress(
        &self,
        answer: SessionDescription,
    ) -> Result<(), RouterError> {
        self.ensure_open()?;
        self.answer_egress(answer).await
    }

    // ---- hub-facing operations ----

    /// Forward a newly published track over this session's egress.
    pub(crate) async fn add_track(&self, track: TrackInfo) {
        debug!(
            target: "sr.session",
            track = %track.id(),
            session_id = %self.id,
            user_id = %self.user_id,
            "add track"
        );
        if let Some(egress) = established(&self.egress) {
            egress.add_track(track).await;
        }
    }

    /// Stop forwarding a track over this session's egress.
    pub(crate) async fn remove_track(&self, track: TrackInfo) {
        debug!(
            target: "sr.session",
            track = %track.id(),
            session_id = %self.id,
            user_id = %self.user_id,
            "remove track"
        );
        if let Some(egress) = established(&self.egress) {
            egress.remove_track(track).await;
        }
    }

    /// Flag a forwarded track and tell the receiving side about it.
    pub(crate) async fn send_mute_track(&self, track: &TrackInfo) {
        let Some(egress) = established(&self.egress) else {
            return;
        };
        let Some(state) = egress.set_egress_mute(track.id(), track.mute).await else {
            return;
        };
        let Some(messenger) = self.signal.messenger() else {
            return;
        };
        if let Err(err) = messenger
            .send_mute(&MuteMsg {
                mid: state.mid,
                mute: state.mute,
            })
            .await
        {
            error!(
                target: "sr.session",
                error = %err,
                session_id = %self.id,
                "sending mute failed"
            );
        }
    }

    /// Whether fan-out may touch this session: the egress exists and its
    /// initial negotiation (including ICE gathering) has finished.
    pub(crate) fn init_complete(&self) -> bool {
        established(&self.egress).is_some_and(|endpoint| endpoint.init_complete())
    }

    // ---- internals ----

    fn ensure_open(&self) -> Result<(), RouterError> {
        if self.cancel.is_cancelled() {
            return Err(RouterError::SessionClosed);
        }
        Ok(())
    }

    async fn wait_for_messenger(&self) -> Result<(), RouterError> {
        tokio::select! {
            res = self.signal.wait_for_messenger_setup() => res,
            () = self.cancel.cancelled() => Err(RouterError::SessionClosed),
            () = tokio::time::sleep(self.request_timeout) => Err(RouterError::SessionRequestTimeout),
        }
    }

    async fn local_description(
        &self,
        endpoint: &Arc<dyn Endpoint>,
    ) -> Result<SessionDescription, RouterError> {
        match tokio::time::timeout(self.ice_gathering_timeout, endpoint.local_description()).await
        {
            Ok(result) => result,
            Err(_) => Err(RouterError::IceGatheringInterrupted(
                "gathering did not complete in time".to_string(),
            )),
        }
    }

    /// A mute arrived over the data channel: flag the ingress mid and
    /// re-dispatch so the hub fans it out to the other sessions.
    async fn on_mute_track(&self, mute: MuteMsg) {
        let Some(ingress) = established(&self.ingress) else {
            return;
        };
        if let Some(track) = ingress.set_ingress_mute(&mute.mid, mute.mute).await {
            self.hub.dispatch_mute_track(track).await;
        }
    }

    async fn on_lost_connection(&self) {
        warn!(
            target: "sr.session",
            session_id = %self.id,
            user_id = %self.user_id,
            "endpoint lost connection"
        );
        if self.cancel.is_cancelled() {
            debug!(
                target: "sr.session",
                session_id = %self.id,
                "skip lost-connection report, session already closed"
            );
            return;
        }
        tokio::select! {
            res = self.garbage.send(self.user_id) => {
                if res.is_err() {
                    debug!(
                        target: "sr.session",
                        session_id = %self.id,
                        "garbage collector gone, dropping lost-connection report"
                    );
                }
            }
            () = self.cancel.cancelled() => {
                debug!(
                    target: "sr.session",
                    session_id = %self.id,
                    "lost-connection report interrupted, session already closed"
                );
            }
        }
    }

    fn dispatcher(&self) -> Arc<dyn TrackDispatcher> {
        Arc::new(self.hub.clone())
    }

    fn ingress_channel_hook(&self) -> DataChannelHook {
        let signal = Arc::clone(&self.signal);
        Box::new(move |channel| signal.on_ingress_channel(channel))
    }

    fn pipe_channel_hook(&self) -> DataChannelHook {
        let signal = Arc::clone(&self.signal);
        Box::new(move |channel| signal.on_pipe_channel(channel))
    }

    fn empty_channel_hook(&self) -> DataChannelHook {
        let signal = Arc::clone(&self.signal);
        Box::new(move |channel| signal.on_empty_channel(channel))
    }

    fn negotiation_hook(&self) -> crate::rtp::NegotiationNeededHook {
        let signal = Arc::clone(&self.signal);
        Box::new(move |offer| {
            let signal = Arc::clone(&signal);
            tokio::spawn(async move {
                signal.on_negotiation_needed(offer).await;
            });
        })
    }

    fn lost_connection_hook(self: &Arc<Self>) -> LostConnectionHook {
        let weak = Arc::downgrade(self);
        Box::new(move || {
            if let Some(session) = weak.upgrade() {
                tokio::spawn(async move {
                    session.on_lost_connection().await;
                });
            }
        })
    }

    fn current_tracks_hook(&self) -> crate::rtp::CurrentTracksHook {
        let hub = self.hub.clone();
        Box::new(move |session_id| {
            let hub = hub.clone();
            Box::pin(async move {
                hub.track_list(session_id, vec![filter_for_session(session_id)])
                    .await
            })
        })
    }

    fn register_answerer_when_ready(self: &Arc<Self>, endpoint: Arc<dyn Endpoint>) {
        let signal = Arc::clone(&self.signal);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = signal.messenger_attached() => signal.set_answerer(endpoint),
                () = cancel.cancelled() => {}
            }
        });
    }

    fn register_offerer_when_ready(self: &Arc<Self>, endpoint: Arc<dyn Endpoint>) {
        let signal = Arc::clone(&self.signal);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = signal.messenger_attached() => signal.set_offerer(endpoint),
                () = cancel.cancelled() => {}
            }
        });
    }
}
