//! Routing counters for one hub.
//!
//! A node graph in miniature: one stats node per (endpoint side, session)
//! edge plus a hub-level total. Edges retire when their counters reach
//! zero; the whole graph is dropped when the hub shuts down.

use crate::rtp::{EndpointKind, TrackPurpose};
use common::types::{LiveStreamId, SessionId};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// Counters for one node of the routing graph.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NodeStats {
    /// Secondary-purpose tracks routed over this edge
    pub tracks: u64,
    /// Main-purpose tracks routed over this edge
    pub main_tracks: u64,
}

impl NodeStats {
    fn increase(&mut self, purpose: TrackPurpose) {
        match purpose {
            TrackPurpose::Main => self.main_tracks += 1,
            TrackPurpose::Secondary => self.tracks += 1,
        }
    }

    fn decrease(&mut self, purpose: TrackPurpose) {
        match purpose {
            TrackPurpose::Main => self.main_tracks = self.main_tracks.saturating_sub(1),
            TrackPurpose::Secondary => self.tracks = self.tracks.saturating_sub(1),
        }
    }

    fn is_zero(self) -> bool {
        self.tracks == 0 && self.main_tracks == 0
    }
}

/// Routing observability counters for one live stream.
#[derive(Debug)]
pub struct RoutingMetrics {
    live_stream: LiveStreamId,
    hub_node: Mutex<NodeStats>,
    nodes: Mutex<HashMap<(EndpointKind, SessionId), NodeStats>>,
}

impl RoutingMetrics {
    #[must_use]
    pub fn new(live_stream: LiveStreamId) -> Self {
        Self {
            live_stream,
            hub_node: Mutex::new(NodeStats::default()),
            nodes: Mutex::new(HashMap::new()),
        }
    }

    /// The live stream this graph belongs to.
    #[must_use]
    pub fn live_stream(&self) -> LiveStreamId {
        self.live_stream
    }

    pub(crate) fn hub_increase(&self, purpose: TrackPurpose) {
        self.hub_node
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .increase(purpose);
    }

    pub(crate) fn hub_decrease(&self, purpose: TrackPurpose) {
        self.hub_node
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .decrease(purpose);
    }

    /// Count one more track routed over the (kind, session) edge, creating
    /// the edge if it does not exist yet.
    pub(crate) fn increase_node(
        &self,
        kind: EndpointKind,
        session_id: SessionId,
        purpose: TrackPurpose,
    ) {
        let mut nodes = self.nodes.lock().unwrap_or_else(PoisonError::into_inner);
        nodes
            .entry((kind, session_id))
            .or_default()
            .increase(purpose);
    }

    /// Count one track less over the edge; the edge is retired once both
    /// counters reach zero.
    pub(crate) fn decrease_node(
        &self,
        kind: EndpointKind,
        session_id: SessionId,
        purpose: TrackPurpose,
    ) {
        let mut nodes = self.nodes.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(stats) = nodes.get_mut(&(kind, session_id)) {
            stats.decrease(purpose);
            if stats.is_zero() {
                nodes.remove(&(kind, session_id));
            }
        }
    }

    /// Stats for one edge, if it exists.
    #[must_use]
    pub fn node(&self, kind: EndpointKind, session_id: SessionId) -> Option<NodeStats> {
        let nodes = self.nodes.lock().unwrap_or_else(PoisonError::into_inner);
        nodes.get(&(kind, session_id)).copied()
    }

    /// Hub-level totals.
    #[must_use]
    pub fn hub_node(&self) -> NodeStats {
        *self.hub_node.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop the whole graph; called when the hub shuts down.
    pub(crate) fn clear(&self) {
        self.nodes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        *self.hub_node.lock().unwrap_or_else(PoisonError::into_inner) = NodeStats::default();
    }
}
