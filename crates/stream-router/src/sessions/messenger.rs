//! Per-data-channel control message multiplexer.
//!
//! One `Messenger` is bound 1:1 to one signaling transport and therefore
//! 1:1 to one [`Signal`](super::signal::Signal). Outgoing messages are
//! store-and-forward: they queue until the transport signals open and the
//! send worker starts draining. Incoming bytes are decoded and dispatched
//! by type to every registered observer.

use crate::errors::RouterError;
use crate::rtp::SignalChannel;
use common::types::SessionDescription;
use signal_protocol::{ChannelMsg, CodecError, MuteMsg, SdpMsg};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Observer for decoded control messages.
#[async_trait::async_trait]
pub trait MessageObserver: Send + Sync {
    /// Registry key; one registration per id.
    fn observer_id(&self) -> uuid::Uuid;

    /// An answer to a previously sent offer arrived.
    async fn on_answer(&self, sdp: SessionDescription, number: u32);

    /// A remote offer arrived; `response_id` must be echoed on the answer.
    async fn on_offer(&self, sdp: SessionDescription, response_id: u32, number: u32);

    /// A mute flag change arrived.
    async fn on_mute(&self, mute: MuteMsg);
}

struct MessengerInner {
    channel: Arc<dyn SignalChannel>,
    observers: RwLock<HashMap<uuid::Uuid, Arc<dyn MessageObserver>>>,
    // Rendezvous-style queue: senders block until the worker drains,
    // bounded only by the surrounding request's own timeout.
    queue_tx: mpsc::Sender<Vec<u8>>,
    queue_rx: Mutex<Option<mpsc::Receiver<Vec<u8>>>>,
    counter: AtomicU32,
    quit: CancellationToken,
}

/// Handle to a messenger bound to one signaling transport.
#[derive(Clone)]
pub struct Messenger {
    inner: Arc<MessengerInner>,
}

impl Messenger {
    /// Bind a messenger to a transport.
    ///
    /// The send worker starts only once the transport reports open; until
    /// then every send parks on the queue.
    #[must_use]
    pub fn new(channel: Arc<dyn SignalChannel>) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(1);
        let inner = Arc::new(MessengerInner {
            channel: Arc::clone(&channel),
            observers: RwLock::new(HashMap::new()),
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
            counter: AtomicU32::new(0),
            quit: CancellationToken::new(),
        });

        let on_message = Arc::clone(&inner);
        channel.on_message(Box::new(move |data| {
            match signal_protocol::decode(&data) {
                Ok(msg) => {
                    let inner = Arc::clone(&on_message);
                    tokio::spawn(async move {
                        inner.notify_all(msg).await;
                    });
                }
                Err(CodecError::UnknownMessageType(t)) => {
                    error!(
                        target: "sr.messenger",
                        channel = %on_message.channel.label(),
                        msg_type = t,
                        "unknown msg type"
                    );
                }
                Err(err) => {
                    error!(
                        target: "sr.messenger",
                        channel = %on_message.channel.label(),
                        error = %err,
                        length = data.len(),
                        "unmarshal message"
                    );
                }
            }
        }));

        let on_open = Arc::clone(&inner);
        channel.on_open(Box::new(move || {
            debug!(target: "sr.messenger", "transport is open, starting send worker");
            let receiver = on_open
                .queue_rx
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .take();
            let Some(mut receiver) = receiver else {
                // A second open event; the worker is already running.
                return;
            };
            let worker = Arc::clone(&on_open);
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        () = worker.quit.cancelled() => {
                            debug!(target: "sr.messenger", "send worker closed");
                            return;
                        }
                        msg = receiver.recv() => {
                            match msg {
                                Some(bytes) => {
                                    if let Err(err) = worker.channel.send(&bytes) {
                                        error!(target: "sr.messenger", error = %err, "send message");
                                    }
                                }
                                None => return,
                            }
                        }
                    }
                }
            });
        }));

        Self { inner }
    }

    /// Send an offer with the given sequence number; returns the assigned
    /// correlation id.
    ///
    /// # Errors
    ///
    /// Returns `RouterError::Codec` if the message cannot be encoded. A
    /// closed messenger drops the message without error.
    pub async fn send_offer(
        &self,
        sdp: SessionDescription,
        number: u32,
    ) -> Result<u32, RouterError> {
        debug!(target: "sr.messenger", number, "start to send offer");
        let id = self.inner.counter.fetch_add(1, Ordering::Relaxed);
        let msg = ChannelMsg::Offer {
            id,
            sdp: SdpMsg { number, sdp },
        };
        self.inner.enqueue(signal_protocol::encode(&msg)?).await;
        Ok(id)
    }

    /// Send an answer, echoing the offer's correlation id and number.
    ///
    /// # Errors
    ///
    /// Returns `RouterError::Codec` if the message cannot be encoded.
    pub async fn send_answer(
        &self,
        sdp: SessionDescription,
        id: u32,
        number: u32,
    ) -> Result<u32, RouterError> {
        debug!(target: "sr.messenger", number, "start to send answer");
        let msg = ChannelMsg::Answer {
            id,
            sdp: SdpMsg { number, sdp },
        };
        self.inner.enqueue(signal_protocol::encode(&msg)?).await;
        Ok(id)
    }

    /// Send a mute flag change.
    ///
    /// # Errors
    ///
    /// Returns `RouterError::Codec` if the message cannot be encoded.
    pub async fn send_mute(&self, mute: &MuteMsg) -> Result<(), RouterError> {
        let msg = ChannelMsg::Mute {
            id: 0,
            mute: mute.clone(),
        };
        self.inner.enqueue(signal_protocol::encode(&msg)?).await;
        Ok(())
    }

    /// Register an observer for inbound messages.
    pub fn register(&self, observer: Arc<dyn MessageObserver>) {
        let mut observers = self
            .inner
            .observers
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        observers.entry(observer.observer_id()).or_insert(observer);
    }

    /// Remove an observer.
    pub fn deregister(&self, id: uuid::Uuid) {
        let mut observers = self
            .inner
            .observers
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        observers.remove(&id);
    }

    /// Shut the messenger down. Idempotent; parked senders unblock and
    /// their messages are dropped.
    pub fn close(&self) {
        self.inner.quit.cancel();
    }

    /// Whether the messenger has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.quit.is_cancelled()
    }
}

impl MessengerInner {
    async fn enqueue(&self, bytes: Vec<u8>) {
        if self.quit.is_cancelled() {
            return;
        }
        tokio::select! {
            () = self.quit.cancelled() => {}
            res = self.queue_tx.send(bytes) => {
                if res.is_err() {
                    warn!(target: "sr.messenger", "send queue dropped");
                }
            }
        }
    }

    async fn notify_all(&self, msg: ChannelMsg) {
        let observers: Vec<Arc<dyn MessageObserver>> = {
            let guard = self
                .observers
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            guard.values().cloned().collect()
        };

        match msg {
            ChannelMsg::Answer { sdp, .. } => {
                for observer in observers {
                    observer.on_answer(sdp.sdp.clone(), sdp.number).await;
                }
            }
            ChannelMsg::Offer { id, sdp } => {
                for observer in observers {
                    observer.on_offer(sdp.sdp.clone(), id, sdp.number).await;
                }
            }
            ChannelMsg::Mute { mute, .. } => {
                debug!(target: "sr.messenger", mid = %mute.mid, mute.mute, "handle incoming mute");
                for observer in observers {
                    observer.on_mute(mute.clone()).await;
                }
            }
        }
    }
}
