//! Subscriptions against a scripted broker: confirmation, routing,
//! de-duplication, acknowledgement and rollback.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use common::{BrokerConn, MockBroker};
use futures::StreamExt;
use stomp_transport::{
    AckMode, Command, Connection, Frame, Message, MessageFactory, StompError, Transport,
};

const WAIT: Duration = Duration::from_secs(2);

fn message(subscription: &str, message_id: &str, body: &str) -> Frame {
    Frame::new(Command::Message)
        .header("destination", "/queue/a")
        .header("message-id", message_id)
        .header("subscription", subscription)
        .set_body(body.as_bytes().to_vec())
}

/// Read SUBSCRIBE, confirm it and return its id.
fn confirm_subscribe(conn: &mut BrokerConn) -> (String, Frame) {
    let subscribe = conn.expect(Command::Subscribe);
    conn.receipt_for(&subscribe);
    let id = subscribe.get_header("id").unwrap().to_string();
    (id, subscribe)
}

#[tokio::test]
async fn messages_are_routed_and_deduplicated() {
    let broker = MockBroker::start(|conn| {
        conn.handshake();
        let (id, subscribe) = confirm_subscribe(conn);
        conn.send(
            &message(&id, "m1", "one")
                .header("ack", "a1")
                .header("content-type", "text/plain"),
        );
        conn.send(&message(&id, "m1", "one").header("ack", "a1"));
        conn.send(
            &Frame::new(Command::Message)
                .header("destination", "/queue/a,/queue/b")
                .header("message-id", "m2")
                .header("subscription", id.as_str())
                .header("ack", "a2")
                .set_body(b"two".to_vec()),
        );
        let ack = conn.expect(Command::Ack);
        conn.receipt_for(&ack);
        let nack = conn.expect(Command::Nack);
        conn.receipt_for(&nack);
        let rest = conn.drain_until_disconnect();
        (subscribe, ack, nack, rest)
    });

    let transport = Transport::connect(broker.settings()).await.unwrap();
    let sub = transport
        .subscribe(vec!["/queue/a", "/queue/b"], Some(AckMode::Client))
        .await
        .unwrap();
    assert_eq!(sub.destinations(), ["/queue/a", "/queue/b"]);
    assert_eq!(transport.session().subscriptions().len(), 1);
    assert!(sub.is_confirmed());
    assert_eq!(transport.session().subscriptions().list().len(), 1);

    let first = sub.next(WAIT).await.expect("first message");
    assert_eq!(first.message_id(), "m1");
    assert_eq!(first.text(), "one");
    assert_eq!(first.content_type(), Some("text/plain"));
    assert_eq!(first.content_length(), Some(3));
    assert_eq!(first.subscription(), sub.id());

    let second = sub.next(WAIT).await.expect("second message");
    assert_eq!(second.message_id(), "m2");
    assert_eq!(second.destinations(), ["/queue/a", "/queue/b"]);

    // the duplicate m1 was seen but never queued
    assert_eq!(sub.frame_count(), 3);
    assert_eq!(sub.message_count(), 2);
    assert_eq!(sub.pending(), 0);
    assert!(transport.connection().try_recv_frame().unwrap().is_none());

    first.accept().await.unwrap();
    second.reject().await.unwrap();
    transport.close().await.unwrap();

    let (subscribe, ack, nack, rest) = broker.join();
    assert_eq!(subscribe.get_header("destination"), Some("/queue/a,/queue/b"));
    assert_eq!(subscribe.get_header("ack"), Some("client"));
    assert!(subscribe.get_header("id").unwrap().starts_with("sub-"));
    assert!(subscribe.expects_receipt());
    assert_eq!(ack.get_header("id"), Some("a1"));
    assert!(ack.expects_receipt());
    assert_eq!(nack.get_header("id"), Some("a2"));
    assert_eq!(rest.len(), 1);
}

#[tokio::test]
async fn error_reply_rolls_back_subscription() {
    let broker = MockBroker::start(|conn| {
        conn.handshake();
        let subscribe = conn.expect(Command::Subscribe);
        let receipt = subscribe.get_header("receipt").unwrap().to_string();
        conn.send(
            &Frame::new(Command::Error)
                .header("message", "no such destination")
                .header("receipt-id", receipt.as_str()),
        );
        let after = conn.read_frame();
        (receipt, after)
    });

    let transport = Transport::connect(broker.settings()).await.unwrap();
    let err = transport
        .subscribe("/queue/missing", None)
        .await
        .unwrap_err();
    let (receipt, after) = broker.join();

    match err {
        StompError::Protocol(server) => {
            assert_eq!(server.message, "no such destination");
            assert_eq!(server.receipt_id.as_deref(), Some(receipt.as_str()));
        }
        other => panic!("expected Protocol, got {:?}", other),
    }
    assert!(transport.session().subscriptions().is_empty());
    assert!(transport.connection().is_closed());
    assert!(after.is_none());
}

#[tokio::test]
async fn unconfirmed_subscribe_rolls_back() {
    let broker = MockBroker::start(|conn| {
        conn.handshake();
        let ignored = conn.expect(Command::Subscribe);
        let (_, confirmed) = confirm_subscribe(conn);
        conn.drain_until_disconnect();
        (ignored, confirmed)
    });

    let settings = broker
        .settings()
        .receipt_timeout(Duration::from_millis(50))
        .max_retries(0);
    let transport = Transport::connect(settings).await.unwrap();
    let session = transport.session();

    let err = session
        .subscribe_with_id("fixed", "/queue/a", None, Vec::new())
        .await
        .unwrap_err();
    assert!(matches!(err, StompError::ReceiptTimeout(_)), "{:?}", err);
    assert!(session.subscriptions().get("fixed").is_none());

    // the id is free again
    let sub = session
        .subscribe_with_id("fixed", "/queue/a", None, Vec::new())
        .await
        .unwrap();
    assert_eq!(sub.id(), "fixed");
    transport.close().await.unwrap();

    let (ignored, confirmed) = broker.join();
    assert_eq!(ignored.get_header("id"), Some("fixed"));
    assert_eq!(confirmed.get_header("id"), Some("fixed"));
    assert_ne!(ignored.get_header("receipt"), confirmed.get_header("receipt"));
}

#[tokio::test]
async fn explicit_id_and_extra_headers() {
    let broker = MockBroker::start(|conn| {
        conn.handshake();
        let (id, subscribe) = confirm_subscribe(conn);
        // automatic acknowledgement: no ack header
        conn.send(&message(&id, "m1", "hi"));
        let rest = conn.drain_until_disconnect();
        (subscribe, rest)
    });

    let transport = Transport::connect(broker.settings()).await.unwrap();
    let session = transport.session();
    let sub = session
        .subscribe_with_id(
            "mine",
            "/queue/a",
            None,
            vec![
                ("selector".to_string(), "x = 1".to_string()),
                ("id".to_string(), "ignored".to_string()),
                ("destination".to_string(), "/queue/ignored".to_string()),
            ],
        )
        .await
        .unwrap();

    let err = session
        .subscribe_with_id("mine", "/queue/b", None, Vec::new())
        .await
        .unwrap_err();
    assert!(matches!(err, StompError::DuplicateSubscription(ref id) if id == "mine"));
    assert!(!err.is_retryable());

    let msg = sub.next(WAIT).await.expect("message");
    // nothing to acknowledge, nothing sent
    msg.accept().await.unwrap();
    transport.close().await.unwrap();

    let (subscribe, rest) = broker.join();
    let keys: Vec<&str> = subscribe.headers.iter().map(|(k, _)| k.as_str()).collect();
    assert_eq!(keys, ["selector", "id", "destination", "receipt"]);
    assert_eq!(subscribe.get_header("id"), Some("mine"));
    assert_eq!(subscribe.get_header("destination"), Some("/queue/a"));
    assert_eq!(subscribe.get_header("selector"), Some("x = 1"));
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].command, Command::Disconnect);
}

#[tokio::test]
async fn unsubscribe_closes_stream() {
    let broker = MockBroker::start(|conn| {
        conn.handshake();
        let (id, _) = confirm_subscribe(conn);
        conn.send(&message(&id, "m1", "streamed"));
        let unsubscribe = conn.expect(Command::Unsubscribe);
        conn.receipt_for(&unsubscribe);
        conn.drain_until_disconnect();
        (id, unsubscribe)
    });

    let transport = Transport::connect(broker.settings()).await.unwrap();
    let sub = transport.subscribe("/topic/t", None).await.unwrap();
    let mut stream = Box::pin(sub.stream());

    let msg = stream.next().await.expect("streamed message");
    assert_eq!(msg.text(), "streamed");

    transport.unsubscribe(&sub).await.unwrap();
    assert!(sub.is_closed());
    assert!(transport.session().subscriptions().is_empty());
    assert!(stream.next().await.is_none());
    assert!(sub.next(Duration::from_millis(10)).await.is_none());

    // a second unsubscribe is a no-op
    transport.unsubscribe(&sub).await.unwrap();
    transport.close().await.unwrap();

    let (id, unsubscribe) = broker.join();
    assert_eq!(unsubscribe.get_header("id"), Some(id.as_str()));
    assert!(unsubscribe.expects_receipt());
}

#[tokio::test]
async fn drain_all_then_unsubscribe_all() {
    let broker = MockBroker::start(|conn| {
        conn.handshake();
        let (a, _) = confirm_subscribe(conn);
        let (b, _) = confirm_subscribe(conn);
        conn.send(&message(&a, "1", "for a"));
        conn.send(&message(&b, "2", "for b"));
        let mut unsubscribed = Vec::new();
        for _ in 0..2 {
            let unsubscribe = conn.expect(Command::Unsubscribe);
            conn.receipt_for(&unsubscribe);
            unsubscribed.push(unsubscribe.get_header("id").unwrap().to_string());
        }
        conn.drain_until_disconnect();
        unsubscribed.sort();
        let mut ids = vec![a, b];
        ids.sort();
        (ids, unsubscribed)
    });

    let transport = Transport::connect(broker.settings()).await.unwrap();
    let a = transport.subscribe("/queue/a", None).await.unwrap();
    let b = transport.subscribe("/queue/b", None).await.unwrap();
    assert!(a.wait(WAIT).await);
    assert!(b.wait(WAIT).await);

    let mut bodies: Vec<String> = transport.messages().iter().map(Message::text).collect();
    bodies.sort();
    assert_eq!(bodies, ["for a", "for b"]);
    assert!(transport.messages().is_empty());

    transport.unsubscribe_all().await.unwrap();
    assert!(a.is_closed());
    assert!(b.is_closed());
    transport.close().await.unwrap();

    let (ids, unsubscribed) = broker.join();
    assert_eq!(ids, unsubscribed);
}

#[tokio::test]
async fn unroutable_messages_reach_generic_queue() {
    let broker = MockBroker::start(|conn| {
        conn.handshake();
        conn.send(&message("nobody", "1", "lost"));
        // no message-id: cannot become a Message
        conn.send_raw(b"MESSAGE\ndestination:/queue/a\nsubscription:sub-x\n\nbroken\0");
        conn.drain_until_disconnect();
    });

    let (connection, _session) = Connection::connect(broker.settings()).await.unwrap();
    let first = connection.recv_frame(WAIT).await.unwrap();
    assert_eq!(first.command, Command::Message);
    assert_eq!(first.get_header("subscription"), Some("nobody"));

    let second = connection.recv_frame(WAIT).await.unwrap();
    assert_eq!(second.command, Command::Message);
    assert!(!second.has_header("message-id"));

    connection.close().await.unwrap();
    broker.join();
}

#[tokio::test]
async fn custom_message_factory() {
    let broker = MockBroker::start(|conn| {
        conn.handshake();
        let (id, _) = confirm_subscribe(conn);
        conn.send(&message(&id, "1", "dropped").header("x-drop", "yes"));
        conn.send(&message(&id, "2", "kept"));
        conn.drain_until_disconnect();
    });

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let factory: MessageFactory = Arc::new(move |conn: &Connection, frame: Frame| {
        counter.fetch_add(1, Ordering::SeqCst);
        if frame.has_header("x-drop") {
            return Err(StompError::MalformedFrame("rejected by factory".to_string()));
        }
        Message::from_frame(conn, frame)
    });

    let settings = broker.settings().message_factory(factory);
    let transport = Transport::connect(settings).await.unwrap();
    let sub = transport.subscribe("/queue/a", None).await.unwrap();

    let kept = sub.next(WAIT).await.expect("kept message");
    assert_eq!(kept.text(), "kept");
    let dropped = transport.connection().recv_frame(WAIT).await.unwrap();
    assert_eq!(dropped.get_header("x-drop"), Some("yes"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(sub.frame_count(), 1);

    transport.close().await.unwrap();
    broker.join();
}

#[tokio::test]
async fn message_outlives_connection() {
    let broker = MockBroker::start(|conn| {
        conn.handshake();
        let (id, _) = confirm_subscribe(conn);
        conn.send(&message(&id, "1", "late").header("ack", "a1"));
        conn.drain_until_disconnect();
    });

    let transport = Transport::connect(broker.settings()).await.unwrap();
    let sub = transport
        .subscribe("/queue/a", Some(AckMode::ClientIndividual))
        .await
        .unwrap();
    let msg = sub.next(WAIT).await.expect("message");
    transport.close().await.unwrap();
    broker.join();

    let err = msg.accept().await.unwrap_err();
    assert!(matches!(err, StompError::ConnectionClosed(_)), "{:?}", err);
}
