//! Session lifecycle, backlog and back-pressure tests.

use gridwatch::{
    ChannelConfig, CloseReason, HubEvent, SessionError, SessionState, TelemetryConfig,
    TelemetryService, Timestamp,
};
use proptest::prelude::*;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn two_channels(queue_capacity: usize) -> TelemetryConfig {
    TelemetryConfig {
        channels: vec![
            ChannelConfig::new("voltage", "sensor/tegangan1", "V", 0.0, 500.0),
            ChannelConfig::new("current", "sensor/arus1", "A", 0.0, 100.0).with_warn_above(3.0),
        ],
        queue_capacity,
        idle_timeout_secs: 10,
        ..Default::default()
    }
}

fn values(events: &[HubEvent]) -> Vec<Option<f64>> {
    events
        .iter()
        .map(|e| e.snapshot().and_then(|s| s.value))
        .collect()
}

// --- Backlog ---

#[test]
fn test_backlog_one_per_channel_before_live() {
    let service = TelemetryService::new(TelemetryConfig::default()).unwrap();
    service.ingest("sensor/tegangan1", b"221.0").unwrap();
    service.ingest("sensor/arus1", b"1.5").unwrap();

    let session = service.connect();
    service.ingest("sensor/arus1", b"2.0").unwrap();

    let events = session.drain();
    assert_eq!(events.len(), 8);

    let names: Vec<_> = events[..7]
        .iter()
        .map(|e| match e {
            HubEvent::Backlog { snapshot } => snapshot.channel.clone(),
            other => panic!("Expected Backlog, got {:?}", other),
        })
        .collect();
    let configured: Vec<_> = service
        .registry()
        .all_channels()
        .iter()
        .map(|c| c.name.clone())
        .collect();
    assert_eq!(names, configured);

    assert_eq!(events[0].snapshot().unwrap().value, Some(221.0));
    assert_eq!(events[1].snapshot().unwrap().value, Some(1.5));
    assert_eq!(events[2].snapshot().unwrap().value, None);

    match &events[7] {
        HubEvent::Update { snapshot } => assert_eq!(snapshot.value, Some(2.0)),
        other => panic!("Expected Update, got {:?}", other),
    }
}

#[test]
fn test_backlog_under_concurrent_ingest() {
    // Large enough that no backlog entry is ever evicted.
    let service = Arc::new(TelemetryService::new(two_channels(1024)).unwrap());

    let writer = {
        let service = Arc::clone(&service);
        thread::spawn(move || {
            for i in 0..200 {
                let payload = format!("{}", i % 100);
                service.ingest("sensor/arus1", payload.as_bytes()).unwrap();
            }
        })
    };

    for _ in 0..20 {
        let session = service.connect();
        let events = session.drain();
        assert!(matches!(events[0], HubEvent::Backlog { .. }));
        assert!(matches!(events[1], HubEvent::Backlog { .. }));
        assert!(events[2..]
            .iter()
            .all(|e| matches!(e, HubEvent::Update { .. })));
    }

    writer.join().unwrap();
}

// --- Back-pressure ---

#[test]
fn test_slow_consumer_does_not_stall_others() {
    let service = TelemetryService::new(two_channels(4)).unwrap();
    let slow = service.connect();
    let fast = service.connect();

    for i in 0..50 {
        service
            .ingest("sensor/arus1", format!("{}", i).as_bytes())
            .unwrap();
        let latest = fast.drain().pop().unwrap();
        assert_eq!(latest.snapshot().unwrap().value, Some(i as f64));
    }

    assert_eq!(slow.pending(), 4);
    assert_eq!(
        values(&slow.drain()),
        vec![Some(46.0), Some(47.0), Some(48.0), Some(49.0)]
    );
    assert_eq!(slow.state(), SessionState::Active);
}

proptest! {
    #[test]
    fn prop_drop_oldest_keeps_most_recent(capacity in 2usize..16, extra in 1usize..40) {
        let service = TelemetryService::new(two_channels(capacity)).unwrap();
        let session = service.connect();
        session.drain();

        let total = capacity + extra;
        for i in 0..total {
            service.ingest("sensor/arus1", format!("{}", i % 100).as_bytes()).unwrap();
        }

        let events = session.drain();
        prop_assert_eq!(events.len(), capacity);
        let expected: Vec<_> = (total - capacity..total)
            .map(|i| Some((i % 100) as f64))
            .collect();
        prop_assert_eq!(values(&events), expected);
        prop_assert_eq!(session.stats().evicted, extra as u64);
    }
}

// --- Lifecycle ---

#[test]
fn test_idle_session_leaves_fanout() {
    let service = TelemetryService::new(two_channels(8)).unwrap();
    let start = Timestamp::now();
    let idle = service.connect_at(start);
    let active = service.connect_at(start);
    idle.drain();
    active.drain();

    service
        .sessions()
        .touch(active.id(), start.plus(Duration::from_secs(9)))
        .unwrap();

    let closed = service.idle_tick(start.plus(Duration::from_secs(11)));
    assert_eq!(closed, vec![idle.id()]);
    assert_eq!(idle.state(), SessionState::Closed);
    assert_eq!(service.hub().session_count(), 1);

    service.ingest("sensor/arus1", b"1.0").unwrap();
    assert_eq!(
        idle.drain(),
        vec![HubEvent::Closed {
            reason: CloseReason::IdleTimeout
        }]
    );
    assert_eq!(active.drain().len(), 1);
}

#[test]
fn test_every_connect_path_is_swept() {
    let service = TelemetryService::new(two_channels(8)).unwrap();
    let start = Timestamp::now();
    let via_service = service.connect_at(start);
    let via_manager = service.sessions().on_connect_at(start);
    assert_eq!(service.session_count(), 2);
    assert_eq!(service.hub().session_count(), 2);

    let mut closed = service.idle_tick(start.plus(Duration::from_secs(3600)));
    closed.sort_by_key(|id| id.0);
    assert_eq!(closed, vec![via_service.id(), via_manager.id()]);
    assert_eq!(service.session_count(), 0);
    assert_eq!(service.hub().session_count(), 0);

    service.ingest("sensor/arus1", b"1.0").unwrap();
    for handle in [&via_service, &via_manager] {
        assert_eq!(handle.state(), SessionState::Closed);
        let events = handle.drain();
        assert!(events.iter().all(|e| !matches!(e, HubEvent::Update { .. })));
        assert_eq!(
            events.last(),
            Some(&HubEvent::Closed {
                reason: CloseReason::IdleTimeout
            })
        );
    }
}

#[test]
fn test_disconnect_and_drain() {
    let service = TelemetryService::new(two_channels(8)).unwrap();
    let session = service.connect();
    service.ingest("sensor/arus1", b"1.0").unwrap();

    service.disconnect(&session).unwrap();
    assert_eq!(session.state(), SessionState::Closed);

    // What was queued before the close is still readable, then the end.
    let events = session.drain();
    assert_eq!(events.len(), 4);
    assert_eq!(
        events.last(),
        Some(&HubEvent::Closed {
            reason: CloseReason::Disconnected
        })
    );
    assert_eq!(session.try_recv(), Err(SessionError::Closed(session.id())));
}

#[test]
fn test_transport_failure_closes_session_only() {
    let service = TelemetryService::new(two_channels(8)).unwrap();
    let broken = service.connect();
    let healthy = service.connect();
    broken.drain();
    healthy.drain();

    broken.fail("connection reset");
    assert_eq!(broken.state(), SessionState::Closed);

    service.ingest("sensor/arus1", b"3.5").unwrap();
    assert_eq!(healthy.drain().len(), 1);
    assert_eq!(
        broken.drain(),
        vec![HubEvent::Closed {
            reason: CloseReason::Transport("connection reset".into())
        }]
    );

    // The next sweep forgets it.
    service.idle_tick(Timestamp::now());
    assert_eq!(service.session_count(), 1);
}

#[test]
fn test_close_races_publish() {
    let service = Arc::new(TelemetryService::new(two_channels(16)).unwrap());
    let sessions: Vec<_> = (0..16).map(|_| service.connect()).collect();

    let writer = {
        let service = Arc::clone(&service);
        thread::spawn(move || {
            for i in 0..500 {
                service
                    .ingest("sensor/tegangan1", format!("{}", i % 400).as_bytes())
                    .unwrap();
            }
        })
    };

    for session in &sessions {
        service.disconnect(session).unwrap();
        // Closing twice is harmless.
        session.fail("late");
    }
    writer.join().unwrap();

    assert_eq!(service.session_count(), 0);
    assert_eq!(service.hub().session_count(), 0);
    for session in &sessions {
        assert_eq!(session.state(), SessionState::Closed);
        let last = session.drain().pop();
        assert_eq!(
            last,
            Some(HubEvent::Closed {
                reason: CloseReason::Disconnected
            })
        );
    }
}

#[test]
fn test_blocking_recv_wakes_on_update() {
    let service = Arc::new(TelemetryService::new(two_channels(8)).unwrap());
    let session = service.connect();
    session.drain();

    let writer = {
        let service = Arc::clone(&service);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            service.ingest("sensor/arus1", b"7.25").unwrap();
        })
    };

    let event = session
        .recv_timeout(Duration::from_secs(5))
        .unwrap()
        .unwrap();
    assert_eq!(event.snapshot().unwrap().value, Some(7.25));
    writer.join().unwrap();
}
