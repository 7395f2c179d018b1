//! End-to-end session behaviour against a scripted transport.

mod common;

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use pretty_assertions::assert_eq;

use common::{fast_config, FakeTransport, LICENSE_KEY};
use kgiton_ble::ble::uuids::{BUZZER_CHARACTERISTIC_UUID, CONTROL_CHARACTERISTIC_UUID};
use kgiton_ble::{
    BuzzerCommand, ConnectOptions, ConnectionState, ControlCode, Error, ErrorKind, EventReceiver,
    MemoryStore, ScaleSession, SessionEvent,
};

fn drain(rx: &mut EventReceiver) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn states(events: &[SessionEvent]) -> Vec<ConnectionState> {
    events
        .iter()
        .filter_map(|event| match event {
            SessionEvent::StateChanged(change) => Some(change.current.clone()),
            _ => None,
        })
        .collect()
}

async fn authenticated(fake: &FakeTransport) -> ScaleSession<FakeTransport> {
    let session = ScaleSession::with_config(fake.clone(), fast_config());
    session
        .connect_with_license_key("p1", LICENSE_KEY)
        .await
        .unwrap();
    session
}

async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn test_scan_authenticate_and_stream_weight() {
    let fake = FakeTransport::new()
        .with_advert("p1", "KGiTON-01", -55)
        .holding_scan_open()
        .accepting_key();
    let session = ScaleSession::with_config(fake.clone(), fast_config());
    let mut events = session.subscribe();

    let mut scan = session
        .scan_for_devices(Duration::from_secs(5))
        .await
        .unwrap();
    let scale = scan.next().await.unwrap();
    assert_eq!(scale.id, "p1");
    assert_eq!(scale.rssi, -55);

    session
        .connect_with_license_key(&scale.id, LICENSE_KEY)
        .await
        .unwrap();
    assert_eq!(session.state(), ConnectionState::Authenticated);
    assert_eq!(session.connected_peripheral().as_deref(), Some("p1"));
    assert_eq!(fake.stop_scans(), 1);
    assert_eq!(fake.writes_to(CONTROL_CHARACTERISTIC_UUID), vec![LICENSE_KEY]);

    // The scan was taken over by the connection.
    assert!(scan.next().await.is_none());
    drop(scan);
    assert_eq!(session.state(), ConnectionState::Authenticated);

    let mut weights = session.weight_stream().unwrap();
    fake.push_data("72.350");
    let sample = weights.next().await.unwrap();
    assert_eq!(sample.value(), 72.35);
    assert_eq!(sample.unit(), "kg");

    let events = drain(&mut events);
    assert_eq!(
        states(&events),
        vec![
            ConnectionState::Scanning,
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Authenticated,
        ]
    );
    assert!(events.iter().any(|event| matches!(
        event,
        SessionEvent::CommandResult(outcome) if outcome.code == ControlCode::Connected
    )));
    assert!(events
        .iter()
        .any(|event| matches!(event, SessionEvent::Weight(sample) if sample.value() == 72.35)));
}

#[tokio::test]
async fn test_rejected_key_moves_to_error_and_disconnects() {
    let fake = FakeTransport::new().answering_auth("ERROR:INVALID_KEY");
    let session = ScaleSession::with_config(fake.clone(), fast_config());
    let mut events = session.subscribe();

    let err = session
        .connect_with_license_key("p1", LICENSE_KEY)
        .await
        .unwrap_err();

    match err {
        Error::Authentication { message } => assert_eq!(message, "Invalid license key"),
        other => panic!("expected authentication error, got {other:?}"),
    }
    assert!(session.state().is_error());
    assert_eq!(fake.disconnects(), 1);

    let events = drain(&mut events);
    assert!(events.iter().any(|event| matches!(
        event,
        SessionEvent::Error {
            kind: ErrorKind::Authentication,
            ..
        }
    )));
    assert!(events.iter().any(|event| matches!(
        event,
        SessionEvent::CommandResult(outcome) if !outcome.success
    )));
}

#[tokio::test(start_paused = true)]
async fn test_silent_scale_times_out() {
    let fake = FakeTransport::new();
    let session = ScaleSession::with_config(fake.clone(), fast_config());

    let err = session
        .connect_with_license_key("p1", LICENSE_KEY)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(session.state().is_error());
    assert_eq!(fake.disconnects(), 1);
}

#[tokio::test]
async fn test_malformed_key_never_reaches_radio() {
    let fake = FakeTransport::new().accepting_key();
    let session = ScaleSession::with_config(fake.clone(), fast_config());

    for key in ["ABCDE-FGHIJ-KLMNO-PQRST", "ABCDE_FGHIJ_KLMNO_PQRST_UVWXY", ""] {
        let err = session.connect_with_license_key("p1", key).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LicenseFormat);
    }

    assert_eq!(fake.connect_calls(), 0);
    assert_eq!(session.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_overlapping_calls_are_rejected() {
    let fake = FakeTransport::new()
        .with_connect_delay(Duration::from_secs(1))
        .accepting_key();
    let session = ScaleSession::with_config(fake.clone(), fast_config());

    let pending = {
        let session = session.clone();
        tokio::spawn(async move { session.connect_with_license_key("p1", LICENSE_KEY).await })
    };
    while session.state() != ConnectionState::Connecting {
        tokio::task::yield_now().await;
    }

    let busy = session.connect_with_license_key("p1", LICENSE_KEY).await;
    assert!(matches!(
        busy,
        Err(Error::State {
            state: ConnectionState::Connecting,
            ..
        })
    ));
    assert!(matches!(
        session.scan_for_devices(Duration::from_secs(1)).await,
        Err(Error::State { .. })
    ));

    pending.await.unwrap().unwrap();
    assert_eq!(session.state(), ConnectionState::Authenticated);
    assert_eq!(fake.connect_calls(), 1);

    let again = session.connect_with_license_key("p1", LICENSE_KEY).await;
    assert!(matches!(again, Err(Error::State { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_cancels_connect_in_flight() {
    let fake = FakeTransport::new()
        .with_connect_delay(Duration::from_secs(1))
        .accepting_key();
    let session = ScaleSession::with_config(fake.clone(), fast_config());

    let pending = {
        let session = session.clone();
        tokio::spawn(async move { session.connect_with_license_key("p1", LICENSE_KEY).await })
    };
    while session.state() != ConnectionState::Connecting {
        tokio::task::yield_now().await;
    }

    session.disconnect().await.unwrap();
    assert_eq!(session.state(), ConnectionState::Disconnected);

    assert!(matches!(pending.await.unwrap(), Err(Error::State { .. })));
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert_eq!(fake.disconnects(), 1);
    assert!(fake.writes().is_empty());
}

#[tokio::test]
async fn test_buzzer_requires_authentication() {
    let fake = FakeTransport::new();
    let session = ScaleSession::with_config(fake.clone(), fast_config());

    let err = session
        .send_buzzer_command(BuzzerCommand::Beep)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::State {
            state: ConnectionState::Disconnected,
            ..
        }
    ));
    assert!(fake.writes().is_empty());
}

#[tokio::test]
async fn test_buzzer_round_trip() {
    let fake = FakeTransport::new()
        .accepting_key()
        .answering_buzzer("ERROR:UNKNOWN_COMMAND");
    let session = authenticated(&fake).await;
    let mut events = session.subscribe();

    // A stale notification must not be mistaken for the reply.
    fake.push_control("ALREADY_CONNECTED");
    settle().await;

    let outcome = session
        .send_buzzer_command(BuzzerCommand::Long)
        .await
        .unwrap();
    assert!(!outcome.success);
    assert_eq!(outcome.message, "Unknown command");
    assert_eq!(fake.writes_to(BUZZER_CHARACTERISTIC_UUID), vec!["LONG"]);
    assert_eq!(session.state(), ConnectionState::Authenticated);

    let events = drain(&mut events);
    assert!(events.iter().any(|event| matches!(
        event,
        SessionEvent::CommandResult(outcome) if outcome.message == "Unknown command"
    )));
}

#[tokio::test(start_paused = true)]
async fn test_buzzer_timeout_tears_down_link() {
    let fake = FakeTransport::new().accepting_key();
    let session = authenticated(&fake).await;
    let mut weights = session.weight_stream().unwrap();

    let err = session
        .send_buzzer_command(BuzzerCommand::Beep)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(session.state().is_error());
    assert_eq!(fake.disconnects(), 1);
    assert!(weights.next().await.is_none());
    assert_eq!(
        session.metrics_for("p1").unwrap().disconnection_count,
        1
    );
}

#[tokio::test]
async fn test_disconnect_is_idempotent() {
    let fake = FakeTransport::new().accepting_key();
    let session = authenticated(&fake).await;
    let mut weights = session.weight_stream().unwrap();

    session.disconnect().await.unwrap();
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert_eq!(
        fake.writes_to(CONTROL_CHARACTERISTIC_UUID),
        vec![LICENSE_KEY, "DISCONNECT"]
    );
    assert_eq!(fake.disconnects(), 1);
    assert!(weights.next().await.is_none());
    assert!(session.weight_stream().is_err());

    session.disconnect().await.unwrap();
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert_eq!(fake.disconnects(), 1);
    assert_eq!(
        session.metrics_for("p1").unwrap().disconnection_count,
        1
    );
}

#[tokio::test]
async fn test_link_loss_ends_weight_stream() {
    let fake = FakeTransport::new().accepting_key();
    let session = authenticated(&fake).await;
    let mut weights = session.weight_stream().unwrap();

    fake.push_data("1.250");
    assert_eq!(weights.next().await.map(|s| s.value()), Some(1.25));

    fake.drop_link();
    assert!(weights.next().await.is_none());
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert_eq!(session.connected_peripheral(), None);
    assert_eq!(
        session.metrics_for("p1").unwrap().disconnection_count,
        1
    );

    // The session can be reused.
    session
        .connect_with_license_key("p1", LICENSE_KEY)
        .await
        .unwrap();
    assert_eq!(session.state(), ConnectionState::Authenticated);
}

#[tokio::test]
async fn test_malformed_weights_are_dropped() {
    let fake = FakeTransport::new().accepting_key();
    let session = authenticated(&fake).await;
    let mut weights = session.weight_stream().unwrap();

    for payload in ["", "abc", "9999", "-0.001", "NaN", " 12.5\0\0"] {
        fake.push_data(payload);
    }

    let sample = weights.next().await.unwrap();
    assert_eq!(sample.value(), 12.5);
    assert_eq!(session.state(), ConnectionState::Authenticated);
}

#[tokio::test(start_paused = true)]
async fn test_data_throttle() {
    let fake = FakeTransport::new().accepting_key();
    let session = ScaleSession::with_config(
        fake.clone(),
        fast_config().with_data_throttle(Duration::from_secs(1)),
    );
    session
        .connect_with_license_key("p1", LICENSE_KEY)
        .await
        .unwrap();
    let mut weights = session.weight_stream().unwrap();

    fake.push_data("1.0");
    fake.push_data("2.0");
    assert_eq!(weights.next().await.map(|s| s.value()), Some(1.0));

    tokio::time::advance(Duration::from_secs(1)).await;
    fake.push_data("3.0");
    assert_eq!(weights.next().await.map(|s| s.value()), Some(3.0));
}

#[tokio::test(start_paused = true)]
async fn test_connect_retries_then_succeeds() {
    let fake = FakeTransport::new().failing_connects(2).accepting_key();
    let session = ScaleSession::with_config(fake.clone(), fast_config());

    session
        .connect_with_license_key("p1", LICENSE_KEY)
        .await
        .unwrap();
    assert_eq!(fake.connect_calls(), 3);
    assert_eq!(session.state(), ConnectionState::Authenticated);
}

#[tokio::test(start_paused = true)]
async fn test_connect_options_override_retries() {
    let fake = FakeTransport::new().failing_connects(5).accepting_key();
    let session = ScaleSession::with_config(fake.clone(), fast_config());

    let err = session
        .connect_with_options(
            "p1",
            LICENSE_KEY,
            ConnectOptions {
                max_retry_attempts: Some(2),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Transport);
    assert_eq!(fake.connect_calls(), 2);
    assert!(session.state().is_error());
}

#[tokio::test]
async fn test_scan_filters_and_deduplicates() {
    let fake = FakeTransport::new()
        .with_advert("p1", "KGiTON-01", -70)
        .with_advert("p2", "Heart Rate", -40)
        .with_advert("p1", "KGiTON-01", -50)
        .with_advert("p3", "KGiTON-02", -60)
        .with_advert("p4", "kgiton-03", -45);
    let session = ScaleSession::with_config(fake.clone(), fast_config());

    let mut scan = session
        .scan_for_devices(Duration::from_secs(5))
        .await
        .unwrap();

    let mut yielded = Vec::new();
    while let Some(scale) = scan.next().await {
        yielded.push(scale.id);
    }
    assert_eq!(yielded, vec!["p1", "p3"]);

    let discovered: Vec<(String, i16)> = scan
        .discovered()
        .into_iter()
        .map(|p| (p.id, p.rssi))
        .collect();
    assert_eq!(
        discovered,
        vec![("p1".to_string(), -50), ("p3".to_string(), -60)]
    );

    assert!(scan.is_finished());
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert_eq!(fake.stop_scans(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_scan_ends_at_timeout() {
    let fake = FakeTransport::new()
        .with_advert("p1", "KGiTON-01", -50)
        .holding_scan_open();
    let session = ScaleSession::with_config(fake.clone(), fast_config());

    let scales = session
        .scan_for_devices(Duration::from_secs(3))
        .await
        .unwrap()
        .collect_all()
        .await;

    assert_eq!(scales.len(), 1);
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert_eq!(fake.stop_scans(), 1);
}

#[tokio::test]
async fn test_dropping_scan_releases_radio() {
    let fake = FakeTransport::new()
        .with_advert("p1", "KGiTON-01", -50)
        .holding_scan_open();
    let session = ScaleSession::with_config(fake.clone(), fast_config());

    let mut scan = session
        .scan_for_devices(Duration::from_secs(30))
        .await
        .unwrap();
    assert!(scan.next().await.is_some());
    drop(scan);

    assert_eq!(session.state(), ConnectionState::Disconnected);
    settle().await;
    assert_eq!(fake.stop_scans(), 1);
}

#[tokio::test]
async fn test_new_scan_replaces_running_scan() {
    let fake = FakeTransport::new()
        .with_advert("p1", "KGiTON-01", -50)
        .holding_scan_open();
    let session = ScaleSession::with_config(fake.clone(), fast_config());

    let mut first = session
        .scan_for_devices(Duration::from_secs(30))
        .await
        .unwrap();
    let mut second = session
        .scan_for_devices(Duration::from_secs(30))
        .await
        .unwrap();

    assert!(first.next().await.is_none());
    assert_eq!(fake.stop_scans(), 1);
    assert_eq!(session.state(), ConnectionState::Scanning);
    assert!(second.next().await.is_some());

    session.stop_scan().await.unwrap();
    assert!(second.next().await.is_none());
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert_eq!(fake.stop_scans(), 2);
}

#[tokio::test]
async fn test_license_key_is_cached() {
    let fake = FakeTransport::new().accepting_key();
    let session = ScaleSession::with_config(fake.clone(), fast_config())
        .with_key_store(Arc::new(MemoryStore::new()));

    session
        .connect_with_license_key("p1", &LICENSE_KEY.to_lowercase())
        .await
        .unwrap();
    let cached = session.last_license_key().await.unwrap().unwrap();
    assert_eq!(cached.as_str(), LICENSE_KEY);

    session.disconnect().await.unwrap();
    session.connect_with_cached_key("p1").await.unwrap();
    assert_eq!(session.state(), ConnectionState::Authenticated);

    session.forget_license_key().await.unwrap();
    assert_eq!(session.last_license_key().await.unwrap(), None);
}

#[tokio::test]
async fn test_fresh_store_has_no_cached_key() {
    let fake = FakeTransport::new().accepting_key();
    let session = ScaleSession::with_config(fake.clone(), fast_config())
        .with_key_store(Arc::new(MemoryStore::new()));

    let err = session.connect_with_cached_key("p1").await.unwrap_err();
    assert!(matches!(err, Error::Storage(_)));
    assert!(!err.is_retryable());
    assert_eq!(fake.connect_calls(), 0);
    assert_eq!(session.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_signal_metrics_feed_stability() {
    let fake = FakeTransport::new()
        .with_advert("p1", "KGiTON-01", -55)
        .accepting_key()
        .with_rssi(-65);
    let session = ScaleSession::with_config(fake.clone(), fast_config());

    session
        .scan_for_devices(Duration::from_secs(1))
        .await
        .unwrap()
        .collect_all()
        .await;
    session
        .connect_with_license_key("p1", LICENSE_KEY)
        .await
        .unwrap();

    let metrics = session.connection_metrics().unwrap();
    assert_eq!(metrics.average_signal(), Some(-55.0));
    assert!(!session.is_connection_stable());

    tokio::time::sleep(Duration::from_secs(6)).await;

    let metrics = session.connection_metrics().unwrap();
    assert_eq!(metrics.signal_samples().collect::<Vec<_>>(), vec![-55, -65]);
    assert_eq!(metrics.average_signal(), Some(-60.0));
    assert!(session.is_connection_stable());
}

#[tokio::test]
async fn test_callbacks_receive_transitions() {
    let fake = FakeTransport::new().accepting_key();
    let session = ScaleSession::with_config(fake.clone(), fast_config());

    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = seen.clone();
    let handle = session.on_state_changed(move |change| sink.lock().push(change.current));

    session
        .connect_with_license_key("p1", LICENSE_KEY)
        .await
        .unwrap();
    settle().await;

    assert_eq!(
        *seen.lock(),
        vec![
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Authenticated,
        ]
    );

    handle.unregister();
    session.disconnect().await.unwrap();
    settle().await;
    assert_eq!(seen.lock().len(), 3);
}

#[tokio::test]
async fn test_weight_burst_keeps_every_transition() {
    let fake = FakeTransport::new().accepting_key();
    let session = ScaleSession::with_config(fake.clone(), fast_config());
    let mut events = session.subscribe();

    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = seen.clone();
    let _handle = session.on_state_changed(move |change| sink.lock().push(change.current));

    session
        .connect_with_license_key("p1", LICENSE_KEY)
        .await
        .unwrap();
    let mut weights = session.weight_stream().unwrap();

    for _ in 0..300 {
        fake.push_data("1.0");
    }
    fake.push_data("2.0");
    while let Some(sample) = weights.next().await {
        if sample.value() == 2.0 {
            break;
        }
    }

    session.disconnect().await.unwrap();
    for _ in 0..100 {
        if seen.lock().len() == 4 {
            break;
        }
        tokio::task::yield_now().await;
    }

    let events = drain(&mut events);
    let expected = vec![
        ConnectionState::Connecting,
        ConnectionState::Connected,
        ConnectionState::Authenticated,
        ConnectionState::Disconnected,
    ];
    assert_eq!(states(&events), expected);
    assert_eq!(*seen.lock(), expected);

    let delivered = events
        .iter()
        .filter(|event| matches!(event, SessionEvent::Weight(_)))
        .count();
    assert_eq!(delivered, kgiton_ble::events::WEIGHT_BACKLOG);
}
