//! Per-session negotiation state machine.
//!
//! A signal owns at most one offering endpoint (always the egress side,
//! the only side that renegotiates) and one answering endpoint (always
//! ingress). Outgoing offers are tagged with a monotonically increasing
//! sequence number; an answer is applied only if its number matches the
//! most recently sent offer, which lets rapid successive track changes
//! proceed without serializing on each round trip.

use crate::errors::RouterError;
use crate::rtp::{Endpoint, SignalChannel};
use crate::sessions::messenger::{MessageObserver, Messenger};
use common::types::{SessionDescription, SessionId, UserId};
use signal_protocol::MuteMsg;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Callback invoked for inbound mute messages.
pub type MuteCallback = Box<dyn Fn(MuteMsg) + Send + Sync>;

/// Negotiation state for one session.
pub struct Signal {
    id: uuid::Uuid,
    session_id: SessionId,
    user_id: UserId,
    session_cancel: CancellationToken,
    waiting_timeout: Duration,
    offerer: RwLock<Option<Arc<dyn Endpoint>>>,
    answerer: RwLock<Option<Arc<dyn Endpoint>>>,
    messenger: RwLock<Option<Messenger>>,
    offer_number: AtomicU32,
    ready_tx: watch::Sender<bool>,
    on_mute: RwLock<Option<MuteCallback>>,
}

impl Signal {
    /// Create the signal for a session.
    ///
    /// `session_cancel` is the owning session's token: waiting for the
    /// messenger aborts when the session closes.
    #[must_use]
    pub fn new(
        session_cancel: CancellationToken,
        session_id: SessionId,
        user_id: UserId,
        waiting_timeout: Duration,
    ) -> Arc<Self> {
        let (ready_tx, _) = watch::channel(false);
        Arc::new(Self {
            id: uuid::Uuid::new_v4(),
            session_id,
            user_id,
            session_cancel,
            waiting_timeout,
            offerer: RwLock::new(None),
            answerer: RwLock::new(None),
            messenger: RwLock::new(None),
            offer_number: AtomicU32::new(0),
            ready_tx,
            on_mute: RwLock::new(None),
        })
    }

    /// The signaling data channel of an ingress endpoint arrived: create
    /// the messenger and release anyone waiting for setup.
    pub fn on_ingress_channel(self: &Arc<Self>, channel: Arc<dyn SignalChannel>) {
        debug!(
            target: "sr.signal",
            session_id = %self.session_id,
            user_id = %self.user_id,
            "ingress data channel arrived, creating messenger"
        );
        self.attach_messenger(channel);
    }

    /// The signaling data channel of an instance pipe arrived.
    pub fn on_pipe_channel(self: &Arc<Self>, channel: Arc<dyn SignalChannel>) {
        debug!(
            target: "sr.signal",
            session_id = %self.session_id,
            user_id = %self.user_id,
            "pipe data channel arrived, creating messenger"
        );
        self.attach_messenger(channel);
    }

    /// Egress endpoints open a data channel only to avoid munging the SDP
    /// when no tracks are attached yet; nothing listens on it.
    pub fn on_empty_channel(self: &Arc<Self>, _channel: Arc<dyn SignalChannel>) {}

    fn attach_messenger(self: &Arc<Self>, channel: Arc<dyn SignalChannel>) {
        let messenger = Messenger::new(channel);
        messenger.register(Arc::clone(self) as Arc<dyn MessageObserver>);
        *self
            .messenger
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(messenger);
        self.ready_tx.send_replace(true);
    }

    /// Install the offering (egress) endpoint and reset the offer sequence.
    pub fn set_offerer(&self, endpoint: Arc<dyn Endpoint>) {
        *self.offerer.write().unwrap_or_else(PoisonError::into_inner) = Some(endpoint);
        self.offer_number.store(0, Ordering::SeqCst);
    }

    /// Install the answering (ingress) endpoint.
    pub fn set_answerer(&self, endpoint: Arc<dyn Endpoint>) {
        *self
            .answerer
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(endpoint);
    }

    /// Install the callback for inbound mute messages.
    pub fn set_on_mute(&self, callback: MuteCallback) {
        *self.on_mute.write().unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    /// The egress endpoint wants to renegotiate: number the offer and send
    /// it through the messenger.
    pub async fn on_negotiation_needed(&self, offer: SessionDescription) {
        let number = self.next_offer();
        let Some(messenger) = self.messenger() else {
            warn!(
                target: "sr.signal",
                session_id = %self.session_id,
                user_id = %self.user_id,
                number,
                "negotiation needed but no messenger attached"
            );
            return;
        };
        if let Err(err) = messenger.send_offer(offer, number).await {
            error!(
                target: "sr.signal",
                error = %err,
                session_id = %self.session_id,
                user_id = %self.user_id,
                "on negotiation needed was triggered with error"
            );
        }
    }

    /// Wait until the messenger is attached.
    ///
    /// # Errors
    ///
    /// Returns `RouterError::SessionClosed` when the session closes first,
    /// `RouterError::MessengerSetupTimeout` when the data channel never
    /// opens within the waiting window.
    pub async fn wait_for_messenger_setup(&self) -> Result<(), RouterError> {
        let mut ready_rx = self.ready_tx.subscribe();
        if *ready_rx.borrow() {
            return Ok(());
        }
        tokio::select! {
            res = ready_rx.wait_for(|ready| *ready) => {
                res.map(|_| ()).map_err(|_| RouterError::SessionClosed)
            }
            () = self.session_cancel.cancelled() => Err(RouterError::SessionClosed),
            () = tokio::time::sleep(self.waiting_timeout) => {
                Err(RouterError::MessengerSetupTimeout)
            }
        }
    }

    /// Wait, unbounded, until the messenger is attached. Used for deferred
    /// offerer/answerer registration on instance links; callers race this
    /// against the session's cancellation.
    pub(crate) async fn messenger_attached(&self) {
        let mut ready_rx = self.ready_tx.subscribe();
        let _ = ready_rx.wait_for(|ready| *ready).await;
    }

    /// The messenger, if the data channel already opened.
    #[must_use]
    pub fn messenger(&self) -> Option<Messenger> {
        self.messenger
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Current offerer, if an egress endpoint is installed.
    #[must_use]
    pub fn offerer(&self) -> Option<Arc<dyn Endpoint>> {
        self.offerer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn answerer(&self) -> Option<Arc<dyn Endpoint>> {
        self.answerer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn next_offer(&self) -> u32 {
        self.offer_number.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn current_offer(&self) -> u32 {
        self.offer_number.load(Ordering::SeqCst)
    }

    /// Apply an answer received out-of-band (REST instead of the data
    /// channel), under the same staleness rule as channel answers.
    pub async fn apply_answer(&self, sdp: SessionDescription, number: u32) {
        self.handle_answer(sdp, number).await;
    }

    async fn handle_answer(&self, sdp: SessionDescription, number: u32) {
        let Some(offerer) = self.offerer() else {
            warn!(
                target: "sr.signal",
                number,
                session_id = %self.session_id,
                user_id = %self.user_id,
                "no offerer exists to take this answer"
            );
            return;
        };

        // Ignore answers to offers that have since been superseded.
        let current = self.current_offer();
        if current != number {
            debug!(
                target: "sr.signal",
                number,
                current,
                session_id = %self.session_id,
                user_id = %self.user_id,
                "ignoring stale answer"
            );
            return;
        }

        debug!(
            target: "sr.signal",
            number,
            session_id = %self.session_id,
            user_id = %self.user_id,
            "applying answer"
        );
        if let Err(err) = offerer.set_answer(sdp).await {
            error!(
                target: "sr.signal",
                error = %err,
                session_id = %self.session_id,
                user_id = %self.user_id,
                "applying answer failed"
            );
        }
        offerer.set_init_complete();
    }
}

#[async_trait::async_trait]
impl MessageObserver for Signal {
    fn observer_id(&self) -> uuid::Uuid {
        self.id
    }

    async fn on_answer(&self, sdp: SessionDescription, number: u32) {
        self.handle_answer(sdp, number).await;
    }

    async fn on_offer(&self, sdp: SessionDescription, response_id: u32, number: u32) {
        debug!(
            target: "sr.signal",
            number,
            session_id = %self.session_id,
            user_id = %self.user_id,
            "applying offer"
        );
        let Some(answerer) = self.answerer() else {
            warn!(
                target: "sr.signal",
                number,
                session_id = %self.session_id,
                user_id = %self.user_id,
                "no answerer exists to answer this offer"
            );
            return;
        };

        let answer = match answerer.set_new_offer(sdp).await {
            Ok(answer) => answer,
            Err(err) => {
                error!(
                    target: "sr.signal",
                    error = %err,
                    session_id = %self.session_id,
                    user_id = %self.user_id,
                    "applying offer failed"
                );
                return;
            }
        };

        let Some(messenger) = self.messenger() else {
            warn!(
                target: "sr.signal",
                session_id = %self.session_id,
                "no messenger to return the answer on"
            );
            return;
        };
        if let Err(err) = messenger.send_answer(answer, response_id, number).await {
            error!(
                target: "sr.signal",
                error = %err,
                session_id = %self.session_id,
                user_id = %self.user_id,
                "returning answer failed"
            );
        }
    }

    async fn on_mute(&self, mute: MuteMsg) {
        let callback = self.on_mute.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(callback) = callback.as_ref() {
            callback(mute);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::rtp::{EgressMuteState, TrackInfo};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;
    use std::sync::Mutex as StdMutex;

    /// Endpoint recording applied descriptions.
    #[derive(Default)]
    struct EndpointMock {
        answers: StdMutex<Vec<SessionDescription>>,
        init_complete: AtomicBool,
    }

    #[async_trait]
    impl Endpoint for EndpointMock {
        async fn local_description(&self) -> Result<SessionDescription, RouterError> {
            Ok(SessionDescription::offer("--local--"))
        }

        async fn set_answer(&self, sdp: SessionDescription) -> Result<(), RouterError> {
            self.answers.lock().unwrap().push(sdp);
            Ok(())
        }

        async fn set_new_offer(
            &self,
            _sdp: SessionDescription,
        ) -> Result<SessionDescription, RouterError> {
            Ok(SessionDescription::answer("--a--"))
        }

        fn set_init_complete(&self) {
            self.init_complete.store(true, Ordering::SeqCst);
        }

        fn init_complete(&self) -> bool {
            self.init_complete.load(Ordering::SeqCst)
        }

        async fn add_track(&self, _track: TrackInfo) {}

        async fn remove_track(&self, _track: TrackInfo) {}

        async fn set_ingress_mute(&self, _mid: &str, _mute: bool) -> Option<TrackInfo> {
            None
        }

        async fn set_egress_mute(&self, _track_id: &str, _mute: bool) -> Option<EgressMuteState> {
            None
        }
    }

    fn test_signal(waiting_timeout: Duration) -> (Arc<Signal>, CancellationToken) {
        let cancel = CancellationToken::new();
        let signal = Signal::new(
            cancel.clone(),
            SessionId::new(),
            UserId::new(),
            waiting_timeout,
        );
        (signal, cancel)
    }

    #[tokio::test]
    async fn test_stale_answer_is_discarded() {
        let (signal, _cancel) = test_signal(Duration::from_secs(1));
        let endpoint = Arc::new(EndpointMock::default());
        signal.set_offerer(Arc::clone(&endpoint) as Arc<dyn Endpoint>);

        // Offers 1, 2, 3 go out in order (no messenger attached; numbering
        // still advances).
        for _ in 0..3 {
            signal
                .on_negotiation_needed(SessionDescription::offer("--o--"))
                .await;
        }

        // Answers to superseded offers must not mutate the offerer.
        signal
            .on_answer(SessionDescription::answer("--stale-1--"), 1)
            .await;
        signal
            .on_answer(SessionDescription::answer("--stale-2--"), 2)
            .await;
        assert!(endpoint.answers.lock().unwrap().is_empty());
        assert!(!endpoint.init_complete());

        // The current answer is applied.
        signal
            .on_answer(SessionDescription::answer("--a-3--"), 3)
            .await;
        let answers = endpoint.answers.lock().unwrap();
        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0], SessionDescription::answer("--a-3--"));
        drop(answers);
        assert!(endpoint.init_complete());
    }

    #[tokio::test]
    async fn test_answer_without_offerer_is_dropped() {
        let (signal, _cancel) = test_signal(Duration::from_secs(1));
        // Must not panic, must stay a no-op.
        signal
            .on_answer(SessionDescription::answer("--a--"), 0)
            .await;
    }

    #[tokio::test]
    async fn test_installing_offerer_resets_sequence() {
        let (signal, _cancel) = test_signal(Duration::from_secs(1));
        let first = Arc::new(EndpointMock::default());
        signal.set_offerer(Arc::clone(&first) as Arc<dyn Endpoint>);
        signal
            .on_negotiation_needed(SessionDescription::offer("--o--"))
            .await;
        assert_eq!(signal.current_offer(), 1);

        let second = Arc::new(EndpointMock::default());
        signal.set_offerer(second as Arc<dyn Endpoint>);
        assert_eq!(signal.current_offer(), 0);
    }

    #[tokio::test]
    async fn test_wait_for_messenger_times_out() {
        let (signal, _cancel) = test_signal(Duration::ZERO);
        let result = signal.wait_for_messenger_setup().await;
        assert!(matches!(result, Err(RouterError::MessengerSetupTimeout)));
    }

    #[tokio::test]
    async fn test_wait_for_messenger_aborts_on_session_close() {
        let (signal, cancel) = test_signal(Duration::from_secs(60));
        cancel.cancel();
        let result = signal.wait_for_messenger_setup().await;
        assert!(matches!(result, Err(RouterError::SessionClosed)));
    }

    #[tokio::test]
    async fn test_mute_without_callback_is_dropped() {
        let (signal, _cancel) = test_signal(Duration::from_secs(1));
        signal
            .on_mute(MuteMsg {
                mid: "0".to_string(),
                mute: true,
            })
            .await;
    }

    #[tokio::test]
    async fn test_mute_forwards_to_callback() {
        let (signal, _cancel) = test_signal(Duration::from_secs(1));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        signal.set_on_mute(Box::new(move |mute| {
            let _ = tx.send(mute);
        }));

        signal
            .on_mute(MuteMsg {
                mid: "2".to_string(),
                mute: true,
            })
            .await;

        let mute = rx.recv().await.unwrap();
        assert_eq!(mute.mid, "2");
        assert!(mute.mute);
    }
}
