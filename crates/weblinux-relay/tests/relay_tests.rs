//! Relay client integration tests against a recording mock channel.

use std::cell::RefCell;
use std::rc::Rc;

use weblinux_abi::poll;
use weblinux_relay::{
    ChannelState, Frame, FrameTag, RelayChannel, RelayClient, RelayConfig, RelayError, RelayEvent,
};

#[derive(Clone, Default)]
struct MockChannel {
    sent: Rc<RefCell<Vec<String>>>,
}

impl RelayChannel for MockChannel {
    fn send(&mut self, text: &str) -> Result<(), RelayError> {
        self.sent.borrow_mut().push(text.to_string());
        Ok(())
    }
}

fn data_frame(id: u32, data: &[u8]) -> String {
    let mut frame = Frame::write(id, data);
    frame.tag = FrameTag::Data;
    frame.encode()
}

fn connected_client(cfg: RelayConfig) -> (RelayClient<MockChannel>, Rc<RefCell<Vec<String>>>) {
    let channel = MockChannel::default();
    let sent = channel.sent.clone();
    let mut client = RelayClient::new(cfg);
    assert!(client.begin_connect());
    client.channel_ready(channel);
    (client, sent)
}

fn open_conn(client: &mut RelayClient<MockChannel>) -> u32 {
    let id = client.open("example.com", 80, 0).unwrap();
    let event = client
        .handle_frame(&format!(r#"{{"t":"O","id":{}}}"#, id))
        .unwrap();
    assert!(matches!(
        event,
        Some(RelayEvent::OpenCompleted { result: Ok(()), .. })
    ));
    id
}

#[test]
fn open_sends_frame_and_opened_completes() {
    let (mut client, sent) = connected_client(RelayConfig::default());
    let id = client.open("example.com", 8080, 100).unwrap();
    assert_eq!(client.pending_count(), 1);

    let frame = Frame::decode(&sent.borrow()[0]).unwrap();
    assert_eq!(frame.tag, FrameTag::Open);
    assert_eq!(frame.id, id);
    assert_eq!(frame.host.as_deref(), Some("example.com"));
    assert_eq!(frame.port, Some(8080));

    let event = client
        .handle_frame(&format!(r#"{{"t":"O","id":{}}}"#, id))
        .unwrap();
    assert!(matches!(
        event,
        Some(RelayEvent::OpenCompleted { result: Ok(()), .. })
    ));
    // Pending → open atomically: the id lives in exactly one table.
    assert_eq!(client.pending_count(), 0);
    assert_eq!(client.connection_count(), 1);
    assert!(!client.is_closed(id));
}

#[test]
fn error_against_pending_rejects_the_open() {
    let (mut client, _) = connected_client(RelayConfig::default());
    let id = client.open("example.com", 443, 0).unwrap();

    let event = client
        .handle_frame(&format!(r#"{{"t":"e","id":{},"msg":"refused"}}"#, id))
        .unwrap();
    match event {
        Some(RelayEvent::OpenCompleted {
            id: eid,
            result: Err(msg),
        }) => {
            assert_eq!(eid, id);
            assert_eq!(msg, "refused");
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(client.pending_count(), 0);
    assert_eq!(client.connection_count(), 0);
}

#[test]
fn error_against_open_marks_but_keeps_the_record() {
    let (mut client, _) = connected_client(RelayConfig::default());
    let id = open_conn(&mut client);

    let errors = Rc::new(RefCell::new(Vec::new()));
    let sink = errors.clone();
    client
        .on_error(
            id,
            Box::new(move |msg| sink.borrow_mut().push(msg.to_string())),
        )
        .unwrap();

    client
        .handle_frame(&format!(r#"{{"t":"e","id":{},"msg":"reset"}}"#, id))
        .unwrap();
    assert_eq!(errors.borrow().as_slice(), &["reset".to_string()]);
    // The record survives so consumers can still observe it.
    assert_eq!(client.connection_count(), 1);
    assert_eq!(client.poll(id), poll::ERROR);
}

#[test]
fn data_ropes_until_handler_then_flows_through() {
    let (mut client, _) = connected_client(RelayConfig::default());
    let id = open_conn(&mut client);

    client
        .handle_frame(&data_frame(id, b"hello "))
        .unwrap();
    client
        .handle_frame(&data_frame(id, b"world"))
        .unwrap();
    assert_eq!(client.poll(id), poll::HAS_DATA);

    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    client
        .on_data(id, Box::new(move |b| sink.borrow_mut().extend_from_slice(b)))
        .unwrap();
    assert_eq!(seen.borrow().as_slice(), b"hello world");

    client
        .handle_frame(&data_frame(id, b"!"))
        .unwrap();
    assert_eq!(seen.borrow().as_slice(), b"hello world!");
}

#[test]
fn read_drains_rope_in_order() {
    let (mut client, _) = connected_client(RelayConfig::default());
    let id = open_conn(&mut client);

    client
        .handle_frame(&data_frame(id, b"abcdef"))
        .unwrap();
    assert_eq!(client.read(id, 4).unwrap(), b"abcd");
    assert_eq!(client.read(id, 4).unwrap(), b"ef");
    assert_eq!(client.read(id, 4).unwrap(), b"");
    assert_eq!(client.poll(id), poll::NO_DATA);
}

#[test]
fn write_round_trips_payload_bytes() {
    let (mut client, sent) = connected_client(RelayConfig::default());
    let id = open_conn(&mut client);

    let payload: Vec<u8> = (0u8..64).collect();
    assert_eq!(client.write(id, &payload).unwrap(), 64);

    let frame = Frame::decode(sent.borrow().last().unwrap()).unwrap();
    assert_eq!(frame.tag, FrameTag::Write);
    assert_eq!(frame.payload_bytes().unwrap(), payload);
}

#[test]
fn local_close_removes_the_record() {
    let (mut client, sent) = connected_client(RelayConfig::default());
    let id = open_conn(&mut client);

    client.close(id).unwrap();
    assert_eq!(client.connection_count(), 0);
    assert!(client.is_closed(id));
    let frame = Frame::decode(sent.borrow().last().unwrap()).unwrap();
    assert_eq!(frame.tag, FrameTag::Close);
    assert!(matches!(
        client.write(id, b"x"),
        Err(RelayError::UnknownConnection(_))
    ));
}

#[test]
fn remote_close_keeps_buffered_bytes_readable() {
    let (mut client, _) = connected_client(RelayConfig::default());
    let id = open_conn(&mut client);

    client
        .handle_frame(&data_frame(id, b"tail"))
        .unwrap();
    client
        .handle_frame(&format!(r#"{{"t":"C","id":{}}}"#, id))
        .unwrap();

    assert_eq!(client.poll(id), poll::HAS_DATA);
    assert_eq!(client.read(id, 16).unwrap(), b"tail");
    assert_eq!(client.poll(id), poll::CLOSED);
    assert!(matches!(
        client.read(id, 16),
        Err(RelayError::ConnectionClosed(_))
    ));
    assert!(matches!(
        client.write(id, b"x"),
        Err(RelayError::ConnectionClosed(_))
    ));
}

#[test]
fn channel_loss_fans_out_exactly_once() {
    let (mut client, _) = connected_client(RelayConfig::default());
    let id7 = open_conn(&mut client);
    let id8 = open_conn(&mut client);
    let pending = client.open("slow.example", 1, 0).unwrap();

    let fired = Rc::new(RefCell::new(Vec::new()));
    for id in [id7, id8] {
        let sink = fired.clone();
        client
            .on_close(id, Box::new(move || sink.borrow_mut().push(id)))
            .unwrap();
    }

    let events = client.channel_lost();

    // Both close handlers fired exactly once, the pending open rejected.
    let mut fired = fired.borrow().clone();
    fired.sort_unstable();
    assert_eq!(fired, vec![id7.min(id8), id7.max(id8)]);
    assert!(events.iter().any(|e| matches!(
        e,
        RelayEvent::OpenCompleted { id, result: Err(_) } if *id == pending
    )));
    assert!(client.is_closed(id7));
    assert!(client.is_closed(id8));
    assert!(matches!(
        client.write(id7, b"x"),
        Err(RelayError::ConnectionClosed(_))
    ));

    // A second loss is a no-op for the handlers.
    let events = client.channel_lost();
    assert!(events.is_empty());
}

#[test]
fn pending_open_times_out() {
    let cfg = RelayConfig {
        open_timeout_ms: 5_000,
        ..RelayConfig::default()
    };
    let (mut client, _) = connected_client(cfg);
    let id = client.open("example.com", 80, 1_000).unwrap();

    assert!(client.expire_pending(3_000).is_empty());
    let events = client.expire_pending(6_000);
    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        RelayEvent::OpenCompleted { id: eid, result: Err(_) } if *eid == id
    ));
    assert_eq!(client.pending_count(), 0);

    // A late `opened` for the expired id is a protocol error, not a ghost
    // connection.
    assert!(client
        .handle_frame(&format!(r#"{{"t":"O","id":{}}}"#, id))
        .is_err());
    assert_eq!(client.connection_count(), 0);
}

#[test]
fn reconnect_is_single_flight() {
    let mut client: RelayClient<MockChannel> = RelayClient::new(RelayConfig::default());
    assert_eq!(client.state(), ChannelState::Down);
    assert!(client.begin_connect());
    // A concurrent attempt shares the in-flight dial.
    assert!(!client.begin_connect());
    client.connect_failed();
    assert!(client.begin_connect());
    client.channel_ready(MockChannel::default());
    assert!(!client.begin_connect());
    assert!(client.is_connected());
}

#[test]
fn open_without_channel_fails() {
    let mut client: RelayClient<MockChannel> = RelayClient::new(RelayConfig::default());
    assert!(matches!(
        client.open("example.com", 80, 0),
        Err(RelayError::ChannelDown)
    ));
}

#[test]
fn connection_cap_is_enforced() {
    let cfg = RelayConfig {
        max_connections: 2,
        ..RelayConfig::default()
    };
    let (mut client, _) = connected_client(cfg);
    client.open("a", 1, 0).unwrap();
    client.open("b", 2, 0).unwrap();
    assert!(matches!(
        client.open("c", 3, 0),
        Err(RelayError::TooManyConnections(2))
    ));
}

#[test]
fn unparseable_frame_is_reported_not_fatal() {
    let (mut client, _) = connected_client(RelayConfig::default());
    let id = open_conn(&mut client);

    assert!(client.handle_frame("{{{").is_err());
    // The channel and the connection table are untouched.
    assert!(client.is_connected());
    assert!(!client.is_closed(id));
}

#[test]
fn auth_token_rides_the_url() {
    let cfg = RelayConfig {
        url: "wss://relay.example/ws".to_string(),
        token: Some("s3cret".to_string()),
        ..RelayConfig::default()
    };
    let client: RelayClient<MockChannel> = RelayClient::new(cfg);
    assert_eq!(client.channel_url(), "wss://relay.example/ws?token=s3cret");

    let cfg = RelayConfig {
        url: "wss://relay.example/ws?v=2".to_string(),
        token: Some("t".to_string()),
        ..RelayConfig::default()
    };
    let client: RelayClient<MockChannel> = RelayClient::new(cfg);
    assert_eq!(client.channel_url(), "wss://relay.example/ws?v=2&token=t");
}
