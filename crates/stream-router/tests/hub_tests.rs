//! Hub fan-out and track-table tests with mocked sessions and engine.

use common::types::{LiveStreamId, UserId};
use sr_test_utils::{
    test_offer, test_track, MockEndpoint, MockLiveStreamSender, MockRtpEngine, MockSignalChannel,
};
use std::sync::Arc;
use std::time::Duration;
use stream_router::config::RouterConfig;
use stream_router::errors::RouterError;
use stream_router::hub::filter_for_session;
use stream_router::lobby::LiveLobby;
use stream_router::rtp::{
    EgressMuteState, EndpointKind, SignalChannel, TrackDispatcher, TrackPurpose,
};
use stream_router::sessions::{Session, SessionKind};
use tokio_util::sync::CancellationToken;

fn test_config() -> RouterConfig {
    RouterConfig {
        ice_gathering_timeout: Duration::from_secs(1),
        messenger_wait_timeout: Duration::from_secs(1),
        hub_dispatch_timeout: Duration::from_secs(1),
        session_request_timeout: Duration::from_secs(1),
    }
}

struct Setup {
    lobby: LiveLobby,
    engine: Arc<MockRtpEngine>,
    sender: Arc<MockLiveStreamSender>,
    cancel: CancellationToken,
}

fn setup() -> Setup {
    let cancel = CancellationToken::new();
    let engine = MockRtpEngine::new();
    let sender = MockLiveStreamSender::new();
    let lobby = LiveLobby::new(
        cancel.clone(),
        LiveStreamId::new(),
        Arc::clone(&engine) as Arc<dyn stream_router::rtp::RtpEngine>,
        Arc::clone(&sender) as Arc<dyn stream_router::rtp::LiveStreamSender>,
        test_config(),
    );
    Setup {
        lobby,
        engine,
        sender,
        cancel,
    }
}

/// A session whose egress is established and fully initialized, i.e. a
/// session the hub fans out to.
async fn forwarding_session(
    setup: &Setup,
    init_complete: bool,
) -> (Arc<Session>, Arc<MockEndpoint>, Arc<MockSignalChannel>) {
    let session = setup
        .lobby
        .join(UserId::new(), SessionKind::UserSession)
        .await
        .expect("join should succeed");

    session
        .create_ingress_endpoint(test_offer())
        .await
        .expect("ingress should succeed");

    let ingress_call = setup.engine.last_call();
    let channel = MockSignalChannel::new();
    let hook = ingress_call
        .options
        .on_data_channel
        .as_ref()
        .expect("ingress should carry a data channel hook");
    let transport: Arc<dyn SignalChannel> = channel.clone();
    hook(transport);
    channel.open();

    let egress = MockEndpoint::new();
    if init_complete {
        egress.mark_init_complete();
    }
    setup.engine.push_endpoint(Arc::clone(&egress));
    session
        .create_egress_endpoint(test_offer())
        .await
        .expect("egress should succeed");

    (session, egress, channel)
}

#[tokio::test]
async fn test_main_track_fans_out_to_every_other_session() {
    let setup = setup();
    let (a, a_egress, _) = forwarding_session(&setup, true).await;
    let (_b, b_egress, _) = forwarding_session(&setup, true).await;
    let (_c, c_egress, _) = forwarding_session(&setup, true).await;

    let track = test_track("track-a", a.id, TrackPurpose::Main);
    setup.lobby.hub().dispatch_add_track(track).await;

    let b_tracks = b_egress.wait_added_tracks(1, Duration::from_secs(1)).await;
    assert_eq!(b_tracks.len(), 1);
    assert_eq!(b_tracks.first().map(|t| t.id()), Some("track-a"));
    let c_tracks = c_egress.wait_added_tracks(1, Duration::from_secs(1)).await;
    assert_eq!(c_tracks.len(), 1);

    // The publisher itself is skipped; the outbound sender got the Main
    // track exactly once.
    assert!(a_egress.added_tracks().is_empty());
    assert_eq!(setup.sender.added(), vec!["track-a".to_string()]);
}

#[tokio::test]
async fn test_secondary_track_skips_the_live_sender() {
    let setup = setup();
    let (a, _, _) = forwarding_session(&setup, true).await;
    let (_b, b_egress, _) = forwarding_session(&setup, true).await;

    let track = test_track("screen-a", a.id, TrackPurpose::Secondary);
    setup.lobby.hub().dispatch_add_track(track).await;

    b_egress.wait_added_tracks(1, Duration::from_secs(1)).await;
    assert!(setup.sender.added().is_empty());
}

#[tokio::test]
async fn test_gathering_session_is_skipped_without_blocking_the_loop() {
    let setup = setup();
    let (a, _, _) = forwarding_session(&setup, true).await;
    let (_b, b_egress, _) = forwarding_session(&setup, true).await;
    // D's egress exists but ICE gathering has not completed.
    let (_d, d_egress, _) = forwarding_session(&setup, false).await;

    let track = test_track("track-a", a.id, TrackPurpose::Main);
    setup.lobby.hub().dispatch_add_track(track).await;
    b_egress.wait_added_tracks(1, Duration::from_secs(1)).await;

    // The loop stayed responsive and D saw nothing.
    let second = test_track("track-a2", a.id, TrackPurpose::Secondary);
    setup.lobby.hub().dispatch_add_track(second).await;
    b_egress.wait_added_tracks(2, Duration::from_secs(1)).await;
    assert!(d_egress.added_tracks().is_empty());
}

#[tokio::test]
async fn test_track_list_excludes_own_tracks() {
    let setup = setup();
    let (a, _, _) = forwarding_session(&setup, true).await;
    let (b, b_egress, _) = forwarding_session(&setup, true).await;

    let track = test_track("track-a", a.id, TrackPurpose::Main);
    setup.lobby.hub().dispatch_add_track(track).await;
    b_egress.wait_added_tracks(1, Duration::from_secs(1)).await;

    let hub = setup.lobby.hub();
    let for_b = hub
        .track_list(b.id, vec![filter_for_session(b.id)])
        .await
        .expect("track list should succeed");
    assert_eq!(for_b.len(), 1);

    let for_a = hub
        .track_list(a.id, vec![filter_for_session(a.id)])
        .await
        .expect("track list should succeed");
    assert!(for_a.is_empty());
}

#[tokio::test]
async fn test_remove_track_tears_down_the_routing_edge() {
    let setup = setup();
    let (a, _, _) = forwarding_session(&setup, true).await;
    let (b, b_egress, _) = forwarding_session(&setup, true).await;

    let track = test_track("track-a", a.id, TrackPurpose::Main);
    setup.lobby.hub().dispatch_add_track(track.clone()).await;
    b_egress.wait_added_tracks(1, Duration::from_secs(1)).await;

    setup.lobby.hub().dispatch_remove_track(track).await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    while b_egress.removed_tracks().is_empty() {
        assert!(tokio::time::Instant::now() < deadline, "remove never fanned out");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(setup.sender.removed(), vec!["track-a".to_string()]);

    let metrics = setup.lobby.hub().metrics();
    assert_eq!(metrics.hub_node().main_tracks, 0);
    assert!(metrics.node(EndpointKind::Ingress, a.id).is_none());

    let list = setup
        .lobby
        .hub()
        .track_list(b.id, vec![filter_for_session(b.id)])
        .await
        .expect("track list should succeed");
    assert!(list.is_empty());
}

#[tokio::test]
async fn test_mute_fans_out_asynchronously() {
    let setup = setup();
    let (a, _, _) = forwarding_session(&setup, true).await;
    let (_b, b_egress, b_channel) = forwarding_session(&setup, true).await;
    b_egress.set_egress_mute_response(EgressMuteState {
        mid: "3".to_string(),
        mute: true,
    });

    let mut track = test_track("track-a", a.id, TrackPurpose::Main);
    setup.lobby.hub().dispatch_add_track(track.clone()).await;
    b_egress.wait_added_tracks(1, Duration::from_secs(1)).await;

    track.mute = true;
    setup.lobby.hub().dispatch_mute_track(track).await;

    // Mute fan-out runs on a spawned task per session (unlike add/remove,
    // which are serialized in the loop), so delivery is awaited, not
    // observed synchronously.
    let mutes = b_egress.wait_egress_mutes(1, Duration::from_secs(1)).await;
    assert_eq!(mutes, vec![("track-a".to_string(), true)]);

    // The mute also went out over B's data channel.
    let sent = b_channel.wait_sent(1, Duration::from_secs(1)).await;
    let msg = signal_protocol::decode(sent.first().expect("one message")).expect("valid message");
    match msg {
        signal_protocol::ChannelMsg::Mute { mute, .. } => {
            assert_eq!(mute.mid, "3");
            assert!(mute.mute);
        }
        other => panic!("expected mute message, got {other:?}"),
    }
}

#[tokio::test]
async fn test_dispatch_on_closed_hub_is_dropped_silently() {
    let setup = setup();
    let (a, _, _) = forwarding_session(&setup, true).await;
    let track = test_track("track-a", a.id, TrackPurpose::Main);

    setup.cancel.cancel();
    tokio::time::sleep(Duration::from_millis(10)).await;

    // Fire-and-forget: no panic, no error.
    setup.lobby.hub().dispatch_add_track(track).await;

    let result = setup.lobby.hub().track_list(a.id, Vec::new()).await;
    assert!(matches!(
        result,
        Err(RouterError::HubClosed) | Err(RouterError::HubDispatchTimeout)
    ));
}

#[tokio::test]
async fn test_metrics_count_published_tracks() {
    let setup = setup();
    let (a, _, _) = forwarding_session(&setup, true).await;
    let (_b, b_egress, _) = forwarding_session(&setup, true).await;

    let track = test_track("track-a", a.id, TrackPurpose::Main);
    setup.lobby.hub().dispatch_add_track(track).await;
    b_egress.wait_added_tracks(1, Duration::from_secs(1)).await;

    let metrics = setup.lobby.hub().metrics();
    assert_eq!(metrics.hub_node().main_tracks, 1);
    let ingress = metrics
        .node(EndpointKind::Ingress, a.id)
        .expect("publisher edge should exist");
    assert_eq!(ingress.main_tracks, 1);
}
