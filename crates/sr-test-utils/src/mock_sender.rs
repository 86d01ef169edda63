//! Counting live-stream sender.

use std::sync::{Arc, Mutex};
use stream_router::rtp::{LiveStreamSender, MediaTrack};

/// Records which tracks were handed to the outbound broadcast sink.
#[derive(Default)]
pub struct MockLiveStreamSender {
    added: Mutex<Vec<String>>,
    removed: Mutex<Vec<String>>,
}

impl MockLiveStreamSender {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn added(&self) -> Vec<String> {
        self.added.lock().unwrap().clone()
    }

    pub fn removed(&self) -> Vec<String> {
        self.removed.lock().unwrap().clone()
    }
}

impl LiveStreamSender for MockLiveStreamSender {
    fn add_track(&self, track: Arc<dyn MediaTrack>) {
        self.added.lock().unwrap().push(track.id().to_string());
    }

    fn remove_track(&self, track: Arc<dyn MediaTrack>) {
        self.removed.lock().unwrap().push(track.id().to_string());
    }
}
