//! Pre-configured test data.

use common::types::{SessionDescription, SessionId};
use std::sync::Arc;
use stream_router::rtp::{MediaTrack, TrackInfo, TrackKind, TrackPurpose};

/// A plain in-memory media track handle.
pub struct TestTrack {
    id: String,
    stream_id: String,
    kind: TrackKind,
}

impl TestTrack {
    pub fn new(id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            stream_id: "test-stream".to_string(),
            kind: TrackKind::Video,
        })
    }

    pub fn audio(id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            stream_id: "test-stream".to_string(),
            kind: TrackKind::Audio,
        })
    }
}

impl MediaTrack for TestTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn stream_id(&self) -> &str {
        &self.stream_id
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }
}

/// A track info owned by `session_id`.
pub fn test_track(id: &str, session_id: SessionId, purpose: TrackPurpose) -> TrackInfo {
    TrackInfo::new(TestTrack::new(id), session_id, purpose)
}

/// The offer every test client sends.
pub fn test_offer() -> SessionDescription {
    SessionDescription::offer("--o--")
}

/// The answer every test client returns.
pub fn test_answer() -> SessionDescription {
    SessionDescription::answer("--a--")
}
