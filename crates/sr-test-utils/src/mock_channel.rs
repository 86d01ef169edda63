//! In-memory signaling transport.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use stream_router::errors::RouterError;
use stream_router::rtp::SignalChannel;

type MessageHandler = Box<dyn Fn(Vec<u8>) + Send + Sync>;
type OpenHandler = Box<dyn Fn() + Send + Sync>;

/// A signaling channel under full test control: tests decide when the
/// transport opens and what bytes arrive.
pub struct MockSignalChannel {
    label: String,
    sent: Mutex<Vec<Vec<u8>>>,
    closed: Mutex<bool>,
    on_message: Mutex<Option<MessageHandler>>,
    on_open: Mutex<Option<OpenHandler>>,
}

impl MockSignalChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            label: "mock-channel".to_string(),
            sent: Mutex::new(Vec::new()),
            closed: Mutex::new(false),
            on_message: Mutex::new(None),
            on_open: Mutex::new(None),
        })
    }

    /// Signal the transport open; starts the messenger's send worker.
    pub fn open(&self) {
        if let Some(handler) = self.on_open.lock().unwrap().as_ref() {
            handler();
        }
    }

    /// Inject inbound bytes as if the peer had sent them.
    pub fn receive(&self, data: &[u8]) {
        if let Some(handler) = self.on_message.lock().unwrap().as_ref() {
            handler(data.to_vec());
        }
    }

    /// Snapshot of everything sent so far.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().unwrap().clone()
    }

    /// Wait until at least `count` messages were sent, panicking after
    /// `timeout`.
    pub async fn wait_sent(&self, count: usize, timeout: Duration) -> Vec<Vec<u8>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let sent = self.sent();
            if sent.len() >= count {
                return sent;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for {count} sent messages, got {}",
                sent.len()
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Make subsequent sends fail.
    pub fn close(&self) {
        *self.closed.lock().unwrap() = true;
    }
}

impl SignalChannel for MockSignalChannel {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn send(&self, data: &[u8]) -> Result<(), RouterError> {
        if *self.closed.lock().unwrap() {
            return Err(RouterError::ChannelClosed);
        }
        self.sent.lock().unwrap().push(data.to_vec());
        Ok(())
    }

    fn on_message(&self, handler: MessageHandler) {
        *self.on_message.lock().unwrap() = Some(handler);
    }

    fn on_open(&self, handler: OpenHandler) {
        *self.on_open.lock().unwrap() = Some(handler);
    }
}
