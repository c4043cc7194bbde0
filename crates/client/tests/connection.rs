//! End-to-end behavior of the connection manager over a scripted transport,
//! on a paused clock.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chatwire_client::ws::{
    CloseFrame, ConnectionManager, Event, EventKind, PolicyState, ReadyState, ReconnectConfig,
    ScriptedTransport, Subscription,
};
use chatwire_client::{ClientConfig, TransportKind};
use chatwire_shared::{
    ChatMessage, ConnectError, HeartbeatAck, ServerEvent, CLOSE_ABNORMAL, CLOSE_NORMAL,
    CLOSE_STALE,
};

type EventLog = Arc<Mutex<Vec<Event>>>;

fn setup(config: ClientConfig) -> (ConnectionManager, ScriptedTransport) {
    let transport = ScriptedTransport::new();
    let manager = ConnectionManager::new(config, Arc::new(transport.clone()));
    (manager, transport)
}

fn record_all(manager: &ConnectionManager) -> (EventLog, Vec<Subscription>) {
    let log: EventLog = Arc::new(Mutex::new(Vec::new()));
    let subs = EventKind::ALL
        .iter()
        .map(|&kind| {
            let log = log.clone();
            manager.on_fn(kind, move |event| log.lock().unwrap().push(event.clone()))
        })
        .collect();
    (log, subs)
}

fn kinds(log: &EventLog) -> Vec<EventKind> {
    log.lock().unwrap().iter().map(Event::kind).collect()
}

/// Let spawned tasks run without moving the clock meaningfully.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

fn message(id: i64, text: &str) -> ServerEvent {
    ServerEvent::Message(ChatMessage {
        id: Some(id.into()),
        room_id: "general".into(),
        text: text.to_string(),
        sender: None,
        timestamp: None,
        message_type: None,
        extra: Default::default(),
    })
}

fn message_texts(log: &EventLog) -> Vec<String> {
    log.lock()
        .unwrap()
        .iter()
        .filter_map(|event| match event {
            Event::Message(m) => Some(m.text.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn connect_send_and_receive() {
    let (manager, transport) = setup(ClientConfig::default());
    let (log, _subs) = record_all(&manager);

    assert!(!manager.send_message("general", "too early", "text"));

    manager.connect("u1", "secret").await.unwrap();
    assert!(manager.is_connected());
    assert_eq!(manager.state().ready_state, ReadyState::Open);

    let url = &transport.urls()[0];
    let query: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    assert_eq!(
        query,
        vec![
            ("userId".to_string(), "u1".to_string()),
            ("token".to_string(), "secret".to_string())
        ]
    );

    assert!(manager.send_message("general", "hi", "text"));
    assert!(manager.join_room("general"));
    let peer = transport.last_peer().unwrap();
    let sent = peer.sent_of_type("send_message");
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["payload"]["roomId"], "general");
    assert_eq!(sent[0]["payload"]["message"], "hi");
    assert_eq!(peer.sent_of_type("join_room").len(), 1);

    peer.push_event(&message(1, "first"));
    peer.push_event(&message(2, "second"));
    peer.push_event(&message(3, "third"));
    settle().await;

    assert_eq!(kinds(&log)[0], EventKind::Connected);
    assert_eq!(message_texts(&log), vec!["first", "second", "third"]);
}

#[tokio::test(start_paused = true)]
async fn concurrent_connects_share_one_open() {
    let (manager, transport) = setup(ClientConfig::default());
    transport.set_open_delay(Duration::from_millis(50));

    let (a, b) = tokio::join!(manager.connect("u1", "t"), manager.connect("u1", "t"));
    a.unwrap();
    b.unwrap();
    assert_eq!(transport.open_count(), 1);

    // Already connected: no new open
    manager.connect("u1", "t").await.unwrap();
    assert_eq!(transport.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn concurrent_connects_share_one_failure() {
    let (manager, transport) = setup(ClientConfig::default());
    transport.set_open_delay(Duration::from_millis(50));
    transport.fail_next("refused");

    let (a, b) = tokio::join!(manager.connect("u1", "t"), manager.connect("u1", "t"));
    let refused = Err(ConnectError::Transport("refused".to_string()));
    assert_eq!(a, refused);
    assert_eq!(b, refused);
    assert_eq!(transport.open_count(), 1);
    assert!(!manager.is_connected());
}

#[tokio::test(start_paused = true)]
async fn configured_scripted_transport_runs_offline() {
    let config = ClientConfig {
        transport: TransportKind::Scripted,
        ..ClientConfig::default()
    };
    let manager = ConnectionManager::from_config(config);
    let (log, _subs) = record_all(&manager);

    manager.connect("u1", "t").await.unwrap();
    assert!(manager.send_message("general", "hi", "text"));
    assert!(manager.create_room("lobby", false, vec![]));

    // Several heartbeat periods and past the staleness threshold
    tokio::time::sleep(Duration::from_secs(125)).await;

    assert!(manager.is_connected());
    let seen = kinds(&log);
    assert!(!seen.contains(&EventKind::Disconnected));
    assert_eq!(seen.iter().filter(|&&k| k == EventKind::Connected).count(), 1);
    assert_eq!(message_texts(&log), vec!["hi"]);
    let created: Vec<String> = log
        .lock()
        .unwrap()
        .iter()
        .filter_map(|event| match event {
            Event::RoomCreated(room) => Some(room.name.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(created, vec!["lobby"]);
}

#[tokio::test(start_paused = true)]
async fn abnormal_close_backs_off_and_resets_after_reopen() {
    let (manager, transport) = setup(ClientConfig::default());
    let (log, _subs) = record_all(&manager);
    manager.connect("u1", "t").await.unwrap();

    transport.fail_next("refused");
    transport.peer(0).unwrap().close(CLOSE_ABNORMAL, "");
    settle().await;
    assert!(!manager.is_connected());
    assert_eq!(manager.state().reconnect_attempts, 1);
    assert_eq!(manager.state().policy, PolicyState::Reconnecting);

    // First reopen after 1000ms, which fails
    tokio::time::sleep(Duration::from_millis(998)).await;
    assert_eq!(transport.open_count(), 1);
    tokio::time::sleep(Duration::from_millis(2)).await;
    assert_eq!(transport.open_count(), 2);
    assert_eq!(manager.state().reconnect_attempts, 2);

    // Second reopen 2000ms after that, which succeeds
    tokio::time::sleep(Duration::from_millis(1998)).await;
    assert_eq!(transport.open_count(), 2);
    tokio::time::sleep(Duration::from_millis(2)).await;
    assert_eq!(transport.open_count(), 3);
    assert!(manager.is_connected());
    assert_eq!(manager.state().reconnect_attempts, 0);

    let events = log.lock().unwrap().clone();
    assert_eq!(
        events.iter().map(Event::kind).collect::<Vec<_>>(),
        vec![
            EventKind::Connected,
            EventKind::Disconnected,
            EventKind::Reconnecting,
            EventKind::Error,
            EventKind::Reconnecting,
            EventKind::Connected,
        ]
    );
    assert_eq!(
        events[2],
        Event::Reconnecting {
            attempt: 1,
            delay: Duration::from_millis(1000)
        }
    );
    assert_eq!(
        events[4],
        Event::Reconnecting {
            attempt: 2,
            delay: Duration::from_millis(2000)
        }
    );
}

#[tokio::test(start_paused = true)]
async fn gives_up_after_attempt_ceiling() {
    let mut config = ClientConfig::default();
    config.reconnect = ReconnectConfig {
        max_attempts: 2,
        base_delay: Duration::from_millis(100),
    };
    let (manager, transport) = setup(config);
    let (log, _subs) = record_all(&manager);
    manager.connect("u1", "t").await.unwrap();

    transport.fail_times(2, "refused");
    transport.peer(0).unwrap().close(CLOSE_ABNORMAL, "");
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(transport.open_count(), 3);
    assert_eq!(manager.state().policy, PolicyState::Exhausted);
    let events = log.lock().unwrap().clone();
    assert_eq!(
        events.last(),
        Some(&Event::MaxReconnectAttemptsReached { attempts: 2 })
    );
    assert_eq!(
        kinds(&log)
            .iter()
            .filter(|k| **k == EventKind::Reconnecting)
            .count(),
        2
    );

    // Nothing further is scheduled
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(transport.open_count(), 3);

    // An explicit connect starts over
    manager.connect("u1", "t").await.unwrap();
    assert!(manager.is_connected());
    assert_eq!(manager.state().policy, PolicyState::Connected);
}

#[tokio::test(start_paused = true)]
async fn normal_close_does_not_reconnect() {
    let (manager, transport) = setup(ClientConfig::default());
    let (log, _subs) = record_all(&manager);
    manager.connect("u1", "t").await.unwrap();

    transport.peer(0).unwrap().close(CLOSE_NORMAL, "bye");
    settle().await;
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(transport.open_count(), 1);
    assert_eq!(
        log.lock().unwrap().last(),
        Some(&Event::Disconnected {
            code: CLOSE_NORMAL,
            reason: "bye".to_string()
        })
    );
    assert!(!kinds(&log).contains(&EventKind::Reconnecting));
    assert_eq!(manager.state().policy, PolicyState::Idle);
}

#[tokio::test(start_paused = true)]
async fn disconnect_closes_normally_and_cancels_reopen() {
    let (manager, transport) = setup(ClientConfig::default());
    let (log, _subs) = record_all(&manager);
    manager.connect("u1", "t").await.unwrap();

    manager.disconnect();
    let peer = transport.peer(0).unwrap();
    assert_eq!(
        peer.closed_by_client(),
        Some(CloseFrame::new(CLOSE_NORMAL, "Client disconnecting"))
    );
    assert_eq!(kinds(&log), vec![EventKind::Connected, EventKind::Disconnected]);
    assert!(!manager.send_message("general", "late", "text"));

    // Reconnect, drop abnormally, then disconnect before the timer fires
    manager.connect("u1", "t").await.unwrap();
    transport.peer(1).unwrap().close(CLOSE_ABNORMAL, "");
    settle().await;
    manager.disconnect();
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(transport.open_count(), 2);
    assert_eq!(manager.state().policy, PolicyState::Idle);
    assert_eq!(manager.state().ready_state, ReadyState::Closed);

    // Safe to repeat
    manager.disconnect();
}

#[tokio::test(start_paused = true)]
async fn disconnect_during_open_cancels_it() {
    let (manager, transport) = setup(ClientConfig::default());
    transport.set_open_delay(Duration::from_millis(100));

    let pending = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.connect("u1", "t").await })
    };
    settle().await;
    assert_eq!(manager.state().ready_state, ReadyState::Connecting);

    manager.disconnect();
    assert_eq!(pending.await.unwrap(), Err(ConnectError::Cancelled));
    assert!(!manager.is_connected());
    assert_eq!(
        transport.peer(0).and_then(|p| p.closed_by_client()).map(|c| c.code),
        Some(CLOSE_NORMAL)
    );
}

#[tokio::test(start_paused = true)]
async fn failed_initial_connect_is_not_retried() {
    let (manager, transport) = setup(ClientConfig::default());
    let (log, _subs) = record_all(&manager);
    transport.fail_next("refused");

    let err = manager.connect("u1", "t").await.unwrap_err();
    assert!(matches!(err, ConnectError::Transport(_)));
    assert_eq!(kinds(&log), vec![EventKind::Error]);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(transport.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn invalid_endpoint_is_rejected_before_opening() {
    let mut config = ClientConfig::default();
    config.ws_url = "http://localhost:3001".to_string();
    let (manager, transport) = setup(config);

    let err = manager.connect("u1", "t").await.unwrap_err();
    assert!(matches!(err, ConnectError::InvalidUrl(_)));
    assert_eq!(transport.open_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn silent_server_is_closed_as_stale_and_reopened() {
    let (manager, transport) = setup(ClientConfig::default());
    let (log, _subs) = record_all(&manager);
    manager.connect("u1", "t").await.unwrap();
    let peer = transport.peer(0).unwrap();

    // Ticks at 10s, 20s and 30s send heartbeats; at 40s the silence exceeds 30s
    tokio::time::sleep(Duration::from_secs(40) + Duration::from_millis(1)).await;
    assert_eq!(peer.sent_of_type("heartbeat").len(), 3);
    assert_eq!(
        peer.closed_by_client(),
        Some(CloseFrame::new(CLOSE_STALE, "Heartbeat timeout"))
    );
    assert!(log.lock().unwrap().contains(&Event::Disconnected {
        code: CLOSE_STALE,
        reason: "Heartbeat timeout".to_string()
    }));

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(transport.peer_count(), 2);
    assert!(manager.is_connected());
}

#[tokio::test(start_paused = true)]
async fn inbound_heartbeats_keep_the_connection_alive() {
    let (manager, transport) = setup(ClientConfig::default());
    manager.connect("u1", "t").await.unwrap();
    let peer = transport.peer(0).unwrap();

    for _ in 0..10 {
        tokio::time::sleep(Duration::from_secs(10)).await;
        peer.push_event(&ServerEvent::Heartbeat(HeartbeatAck::default()));
    }
    settle().await;

    assert!(manager.is_connected());
    assert_eq!(peer.closed_by_client(), None);
    assert_eq!(transport.open_count(), 1);
    assert!(peer.sent_of_type("heartbeat").len() >= 9);
}

#[tokio::test(start_paused = true)]
async fn undecodable_frames_are_dropped() {
    let (manager, transport) = setup(ClientConfig::default());
    let (log, _subs) = record_all(&manager);
    manager.connect("u1", "t").await.unwrap();
    let peer = transport.peer(0).unwrap();

    peer.push_frame("not json");
    peer.push_frame(r#"{"payload":{}}"#);
    peer.push_frame(r#"{"type":"reaction_added","payload":{"emoji":"+1"}}"#);
    peer.push_frame(r#"{"type":"message","payload":{"text":"no room"}}"#);
    peer.push_event(&message(1, "valid"));
    settle().await;

    assert_eq!(kinds(&log), vec![EventKind::Connected, EventKind::Message]);
    assert_eq!(message_texts(&log), vec!["valid"]);
    assert!(manager.is_connected());
}

#[tokio::test(start_paused = true)]
async fn panicking_subscriber_is_isolated() {
    let (manager, transport) = setup(ClientConfig::default());
    let _boom = manager.on_fn(EventKind::Message, |_| panic!("subscriber bug"));
    let (log, _subs) = record_all(&manager);
    manager.connect("u1", "t").await.unwrap();

    let peer = transport.peer(0).unwrap();
    peer.push_event(&message(1, "one"));
    peer.push_event(&message(2, "two"));
    settle().await;

    assert_eq!(message_texts(&log), vec!["one", "two"]);
    assert!(manager.is_connected());
}

#[tokio::test(start_paused = true)]
async fn frames_from_a_closed_session_are_not_dispatched() {
    let (manager, transport) = setup(ClientConfig::default());
    let (log, _subs) = record_all(&manager);
    manager.connect("u1", "t").await.unwrap();
    let old_peer = transport.peer(0).unwrap();

    manager.disconnect();
    manager.connect("u1", "t").await.unwrap();
    old_peer.push_event(&message(1, "stale"));
    transport.peer(1).unwrap().push_event(&message(2, "fresh"));
    settle().await;

    assert_eq!(message_texts(&log), vec!["fresh"]);
}

#[tokio::test(start_paused = true)]
async fn transport_errors_are_published_without_closing() {
    let (manager, transport) = setup(ClientConfig::default());
    let (log, _subs) = record_all(&manager);
    manager.connect("u1", "t").await.unwrap();

    transport.peer(0).unwrap().push_error("socket hiccup");
    settle().await;

    assert!(log.lock().unwrap().contains(&Event::Error {
        message: "socket hiccup".to_string()
    }));
    assert!(manager.is_connected());
}

#[tokio::test(start_paused = true)]
async fn unsubscribed_handlers_stop_receiving() {
    let (manager, transport) = setup(ClientConfig::default());
    let count = Arc::new(Mutex::new(0));
    let handler: chatwire_client::ws::Handler = {
        let count = count.clone();
        Arc::new(move |_: &Event| *count.lock().unwrap() += 1)
    };
    let _sub = manager.on(EventKind::Message, handler.clone());
    let other = manager.on_fn(EventKind::Message, |_| {});
    manager.connect("u1", "t").await.unwrap();
    let peer = transport.peer(0).unwrap();

    peer.push_event(&message(1, "a"));
    settle().await;
    assert!(manager.off(EventKind::Message, &handler));
    assert!(!manager.off(EventKind::Message, &handler));
    assert!(other.unsubscribe());
    peer.push_event(&message(2, "b"));
    settle().await;

    assert_eq!(*count.lock().unwrap(), 1);
    assert_eq!(manager.subscriber_count(EventKind::Message), 0);
}

#[tokio::test(start_paused = true)]
async fn shutdown_drops_subscribers() {
    let (manager, _transport) = setup(ClientConfig::default());
    let (_log, _subs) = record_all(&manager);
    manager.connect("u1", "t").await.unwrap();

    manager.shutdown();
    assert!(!manager.is_connected());
    for kind in EventKind::ALL {
        assert_eq!(manager.subscriber_count(kind), 0);
    }
}
