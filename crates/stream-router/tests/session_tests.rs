//! Session endpoint lifecycle tests against a mocked RTP engine.

use common::types::{SessionDescription, UserId};
use sr_test_utils::{test_offer, MockEndpoint, MockLiveStreamSender, MockRtpEngine, MockSignalChannel};
use std::sync::Arc;
use std::time::Duration;
use stream_router::config::RouterConfig;
use stream_router::errors::RouterError;
use stream_router::lobby::LiveLobby;
use stream_router::rtp::{Endpoint, SignalChannel};
use stream_router::sessions::{Session, SessionKind};
use tokio_util::sync::CancellationToken;

fn test_config() -> RouterConfig {
    RouterConfig {
        ice_gathering_timeout: Duration::from_secs(1),
        messenger_wait_timeout: Duration::from_millis(200),
        hub_dispatch_timeout: Duration::from_secs(1),
        session_request_timeout: Duration::from_secs(1),
    }
}

struct Setup {
    lobby: LiveLobby,
    engine: Arc<MockRtpEngine>,
    _cancel: CancellationToken,
}

fn setup_with(config: RouterConfig) -> Setup {
    let cancel = CancellationToken::new();
    let engine = MockRtpEngine::new();
    let lobby = LiveLobby::new(
        cancel.clone(),
        common::types::LiveStreamId::new(),
        Arc::clone(&engine) as Arc<dyn stream_router::rtp::RtpEngine>,
        MockLiveStreamSender::new(),
        config,
    );
    Setup {
        lobby,
        engine,
        _cancel: cancel,
    }
}

fn setup() -> Setup {
    setup_with(test_config())
}

async fn join(setup: &Setup) -> Arc<Session> {
    setup
        .lobby
        .join(UserId::new(), SessionKind::UserSession)
        .await
        .expect("join should succeed")
}

/// Attach and open the signaling channel of the session's most recently
/// established endpoint.
fn attach_messenger(engine: &MockRtpEngine) -> Arc<MockSignalChannel> {
    let call = engine.last_call();
    let channel = MockSignalChannel::new();
    let hook = call
        .options
        .on_data_channel
        .as_ref()
        .expect("endpoint should carry a data channel hook");
    let transport: Arc<dyn SignalChannel> = channel.clone();
    hook(transport);
    channel.open();
    channel
}

#[tokio::test]
async fn test_create_ingress_returns_engine_answer() {
    let setup = setup();
    let session = join(&setup).await;

    let endpoint = MockEndpoint::new();
    endpoint.set_local_description(SessionDescription::answer("--ingress-answer--"));
    setup.engine.push_endpoint(endpoint);

    let answer = session
        .create_ingress_endpoint(test_offer())
        .await
        .expect("negotiation should succeed");
    assert_eq!(answer, SessionDescription::answer("--ingress-answer--"));
}

#[tokio::test]
async fn test_second_ingress_fails_with_already_exists() {
    let setup = setup();
    let session = join(&setup).await;

    session
        .create_ingress_endpoint(test_offer())
        .await
        .expect("first ingress should succeed");

    let result = session.create_ingress_endpoint(test_offer()).await;
    assert!(matches!(result, Err(RouterError::IngressAlreadyExists)));

    // Still taken on the next attempt; neither retry reached the engine.
    let result = session.create_ingress_endpoint(test_offer()).await;
    assert!(matches!(result, Err(RouterError::IngressAlreadyExists)));
    assert_eq!(setup.engine.call_count(), 1);
}

#[tokio::test]
async fn test_second_create_fails_while_first_still_negotiating() {
    let setup = setup();
    let session = join(&setup).await;

    let endpoint = MockEndpoint::new();
    endpoint.set_gather_forever();
    setup.engine.push_endpoint(endpoint);

    let first = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.create_ingress_endpoint(test_offer()).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Regardless of interleaving, the slot is taken.
    let result = session.create_ingress_endpoint(test_offer()).await;
    assert!(matches!(result, Err(RouterError::IngressAlreadyExists)));
    first.abort();
}

#[tokio::test]
async fn test_ice_gathering_timeout_is_surfaced() {
    let setup = setup();
    let session = join(&setup).await;

    let endpoint = MockEndpoint::new();
    endpoint.set_gather_forever();
    setup.engine.push_endpoint(endpoint);

    let result = session.create_ingress_endpoint(test_offer()).await;
    assert!(matches!(
        result,
        Err(RouterError::IceGatheringInterrupted(_))
    ));
}

#[tokio::test]
async fn test_closed_session_rejects_every_operation_without_network() {
    let setup = setup();
    let session = join(&setup).await;
    session.stop();

    assert!(matches!(
        session.create_ingress_endpoint(test_offer()).await,
        Err(RouterError::SessionClosed)
    ));
    assert!(matches!(
        session.create_egress_endpoint(test_offer()).await,
        Err(RouterError::SessionClosed)
    ));
    assert!(matches!(
        session.offer_egress_endpoint().await,
        Err(RouterError::SessionClosed)
    ));
    assert!(matches!(
        session
            .answer_egress(SessionDescription::answer("--a--"))
            .await,
        Err(RouterError::SessionClosed)
    ));
    assert!(matches!(
        session.create_pipe_endpoint(test_offer()).await,
        Err(RouterError::SessionClosed)
    ));
    assert!(matches!(
        session.offer_pipe_endpoint().await,
        Err(RouterError::SessionClosed)
    ));
    assert!(matches!(
        session.offer_instance_egress().await,
        Err(RouterError::SessionClosed)
    ));

    // No operation may attempt a network call on a closed session.
    assert_eq!(setup.engine.call_count(), 0);
}

#[tokio::test]
async fn test_egress_times_out_when_messenger_never_attaches() {
    let mut config = test_config();
    config.messenger_wait_timeout = Duration::ZERO;
    let setup = setup_with(config);
    let session = join(&setup).await;

    // Bounded and deterministic: the zero waiting window fails right away.
    let result = tokio::time::timeout(
        Duration::from_secs(1),
        session.create_egress_endpoint(test_offer()),
    )
    .await
    .expect("egress creation must fail within a bounded time");
    assert!(matches!(result, Err(RouterError::MessengerSetupTimeout)));

    // The failure released the slot: the retry fails the same way, not
    // with EgressAlreadyExists.
    let retry = session.create_egress_endpoint(test_offer()).await;
    assert!(matches!(retry, Err(RouterError::MessengerSetupTimeout)));
}

#[tokio::test]
async fn test_egress_after_messenger_attach() {
    let setup = setup();
    let session = join(&setup).await;

    session
        .create_ingress_endpoint(test_offer())
        .await
        .expect("ingress should succeed");
    attach_messenger(&setup.engine);

    let egress = MockEndpoint::new();
    egress.set_local_description(SessionDescription::answer("--egress-answer--"));
    setup.engine.push_endpoint(egress);

    let answer = session
        .create_egress_endpoint(test_offer())
        .await
        .expect("egress should succeed once the messenger is up");
    assert_eq!(answer, SessionDescription::answer("--egress-answer--"));

    // The egress endpoint became the signal's offerer.
    assert!(session.signal().offerer().is_some());
}

#[tokio::test]
async fn test_offer_egress_requires_ingress() {
    let setup = setup();
    let session = join(&setup).await;

    let result = session.offer_egress_endpoint().await;
    assert!(matches!(result, Err(RouterError::NoIngressInSession)));
}

#[tokio::test]
async fn test_answer_egress_without_egress() {
    let setup = setup();
    let session = join(&setup).await;

    let result = session
        .answer_egress(SessionDescription::answer("--a--"))
        .await;
    assert!(matches!(result, Err(RouterError::NoEgressInSession)));
}

#[tokio::test]
async fn test_engine_failure_releases_the_slot() {
    let setup = setup();
    let session = join(&setup).await;

    setup.engine.fail_next("no ports left");
    let result = session.create_ingress_endpoint(test_offer()).await;
    assert!(matches!(result, Err(RouterError::Engine(_))));

    // The slot is free again.
    session
        .create_ingress_endpoint(test_offer())
        .await
        .expect("retry after engine failure should succeed");
}

#[tokio::test]
async fn test_pipe_lifecycle() {
    let setup = setup();
    let session = join(&setup).await;

    assert!(matches!(
        session
            .answer_pipe(SessionDescription::answer("--a--"))
            .await,
        Err(RouterError::NoPipeInSession)
    ));

    let endpoint = MockEndpoint::new();
    endpoint.set_local_description(SessionDescription::offer("--pipe-offer--"));
    setup.engine.push_endpoint(Arc::clone(&endpoint));

    let offer = session
        .offer_pipe_endpoint()
        .await
        .expect("pipe offer should succeed");
    assert_eq!(offer, SessionDescription::offer("--pipe-offer--"));

    assert!(matches!(
        session.offer_pipe_endpoint().await,
        Err(RouterError::PipeAlreadyExists)
    ));

    session
        .answer_pipe(SessionDescription::answer("--pipe-answer--"))
        .await
        .expect("pipe answer should apply");
    assert_eq!(
        endpoint.answers(),
        vec![SessionDescription::answer("--pipe-answer--")]
    );
}

#[tokio::test]
async fn test_create_static_egress_does_not_wait_for_messenger() {
    let setup = setup();
    let session = join(&setup).await;

    // No ingress, no messenger: the placeholder egress still negotiates.
    let answer = tokio::time::timeout(
        Duration::from_millis(100),
        session.create_static_egress_endpoint(test_offer()),
    )
    .await
    .expect("static egress must not wait for the messenger")
    .expect("static egress should succeed");
    assert_eq!(answer, SessionDescription::answer("--mock-answer--"));
}

#[tokio::test]
async fn test_offer_ingress_and_answer_flow() {
    let setup = setup();
    let session = join(&setup).await;

    let endpoint = MockEndpoint::new();
    endpoint.set_local_description(SessionDescription::offer("--pull-offer--"));
    setup.engine.push_endpoint(Arc::clone(&endpoint));

    let offer = session
        .offer_ingress_endpoint()
        .await
        .expect("ingress offer should succeed");
    assert_eq!(offer, SessionDescription::offer("--pull-offer--"));

    session
        .set_ingress_answer(SessionDescription::answer("--remote-answer--"))
        .await
        .expect("remote answer should apply");
    assert_eq!(
        endpoint.answers(),
        vec![SessionDescription::answer("--remote-answer--")]
    );
    assert!(endpoint.init_complete());
}
