//! End-to-end negotiation scenarios across hub, session, signal and
//! messenger, with the wire bytes of the data channel in the loop.

use common::types::{LiveStreamId, SdpType, SessionDescription, UserId};
use signal_protocol::ChannelMsg;
use sr_test_utils::{
    test_offer, test_track, MockEndpoint, MockLiveStreamSender, MockRtpEngine, MockSignalChannel,
};
use std::sync::Arc;
use std::time::Duration;
use stream_router::config::RouterConfig;
use stream_router::lobby::LiveLobby;
use stream_router::rtp::{SignalChannel, TrackDispatcher, TrackPurpose};
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
    _cancel: CancellationToken,
}

fn setup() -> Setup {
    let cancel = CancellationToken::new();
    let engine = MockRtpEngine::new();
    let lobby = LiveLobby::new(
        cancel.clone(),
        LiveStreamId::new(),
        Arc::clone(&engine) as Arc<dyn stream_router::rtp::RtpEngine>,
        MockLiveStreamSender::new(),
        test_config(),
    );
    Setup {
        lobby,
        engine,
        _cancel: cancel,
    }
}

async fn forwarding_session(
    setup: &Setup,
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

    let channel = MockSignalChannel::new();
    let call = setup.engine.last_call();
    let hook = call
        .options
        .on_data_channel
        .as_ref()
        .expect("ingress should carry a data channel hook");
    let transport: Arc<dyn SignalChannel> = channel.clone();
    hook(transport);
    channel.open();

    let egress = MockEndpoint::new();
    egress.mark_init_complete();
    setup.engine.push_endpoint(Arc::clone(&egress));
    session
        .create_egress_endpoint(test_offer())
        .await
        .expect("egress should succeed");

    (session, egress, channel)
}

fn decode_sdp_msg(bytes: &[u8]) -> (u32, u32, SessionDescription) {
    match signal_protocol::decode(bytes).expect("valid wire message") {
        ChannelMsg::Offer { id, sdp } | ChannelMsg::Answer { id, sdp } => {
            (id, sdp.number, sdp.sdp)
        }
        other => panic!("expected sdp message, got {other:?}"),
    }
}

#[tokio::test]
async fn test_track_change_renegotiates_over_the_data_channel() {
    let setup = setup();
    let (publisher, _, _) = forwarding_session(&setup).await;
    let (_b, b_egress, b_channel) = forwarding_session(&setup).await;

    // A publishes: the hub fans the track out to B's egress.
    let track = test_track("track-a", publisher.id, TrackPurpose::Main);
    setup.lobby.hub().dispatch_add_track(track).await;
    b_egress.wait_added_tracks(1, Duration::from_secs(1)).await;

    // The egress reacts with three quick renegotiation rounds.
    let egress_call = setup.engine.last_call();
    let negotiate = egress_call
        .options
        .on_negotiation_needed
        .as_ref()
        .expect("egress should carry a negotiation hook");
    negotiate(SessionDescription::offer("--r1--"));
    negotiate(SessionDescription::offer("--r2--"));
    negotiate(SessionDescription::offer("--r3--"));

    // Sends are decoupled from application-level causality: the wire order
    // may interleave, but every round got its own number.
    let sent = b_channel.wait_sent(3, Duration::from_secs(1)).await;
    let mut numbers: Vec<u32> = sent.iter().map(|bytes| decode_sdp_msg(bytes).1).collect();
    numbers.sort_unstable();
    assert_eq!(numbers, vec![1, 2, 3]);

    // A late answer to round 2 is stale and must not touch the endpoint.
    let stale = ChannelMsg::Answer {
        id: 1,
        sdp: signal_protocol::SdpMsg {
            number: 2,
            sdp: SessionDescription::answer("--stale--"),
        },
    };
    b_channel.receive(&signal_protocol::encode(&stale).expect("encodable"));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(b_egress.answers().is_empty());

    // The answer to round 3 applies.
    let current = ChannelMsg::Answer {
        id: 2,
        sdp: signal_protocol::SdpMsg {
            number: 3,
            sdp: SessionDescription::answer("--r3-answer--"),
        },
    };
    b_channel.receive(&signal_protocol::encode(&current).expect("encodable"));

    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    while b_egress.answers().is_empty() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "current answer was never applied"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(
        b_egress.answers(),
        vec![SessionDescription::answer("--r3-answer--")]
    );
}

#[tokio::test]
async fn test_remote_offer_is_answered_with_echoed_correlation() {
    let setup = setup();
    let session = setup
        .lobby
        .join(UserId::new(), SessionKind::InstanceSession)
        .await
        .expect("join should succeed");

    // Pull endpoint toward the live stream host.
    let endpoint = MockEndpoint::new();
    endpoint.set_local_description(SessionDescription::offer("--pull--"));
    setup.engine.push_endpoint(Arc::clone(&endpoint));

    let offer = session
        .offer_ingress_endpoint()
        .await
        .expect("ingress offer should succeed");
    assert_eq!(offer.sdp_type, SdpType::Offer);

    // The host's data channel opens; the ingress registers as answerer.
    let channel = MockSignalChannel::new();
    let call = setup.engine.last_call();
    let hook = call
        .options
        .on_data_channel
        .as_ref()
        .expect("pull ingress should carry a data channel hook");
    let transport: Arc<dyn SignalChannel> = channel.clone();
    hook(transport);
    channel.open();
    tokio::time::sleep(Duration::from_millis(20)).await;

    // The host renegotiates: its offer must be answered with the same
    // correlation id and sequence number.
    let remote_offer = ChannelMsg::Offer {
        id: 9,
        sdp: signal_protocol::SdpMsg {
            number: 5,
            sdp: SessionDescription::offer("--host-o5--"),
        },
    };
    channel.receive(&signal_protocol::encode(&remote_offer).expect("encodable"));

    let sent = channel.wait_sent(1, Duration::from_secs(1)).await;
    let (id, number, sdp) = decode_sdp_msg(sent.first().expect("one sent message"));
    assert_eq!(id, 9);
    assert_eq!(number, 5);
    assert_eq!(sdp, SessionDescription::answer("--a--"));
    assert_eq!(
        endpoint.new_offers(),
        vec![SessionDescription::offer("--host-o5--")]
    );
}
