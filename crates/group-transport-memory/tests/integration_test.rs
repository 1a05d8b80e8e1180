//! Integration tests for the in-memory group transport

use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use proven_group_transport::{GroupTransport, ServiceType, TransportEvent, TransportEventStream};
use proven_group_transport_memory::{Error, MemoryGroupNetwork};
use tokio::time::timeout;

async fn next_event(events: &mut TransportEventStream<Error>) -> Result<TransportEvent, Error> {
    timeout(Duration::from_secs(1), events.next())
        .await
        .expect("Timeout")
        .expect("Stream ended")
}

#[tokio::test]
async fn test_join_reports_membership_to_everyone() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let network = MemoryGroupNetwork::new();
    let a = network.connect();
    let b = network.connect();
    let mut a_events = a.events();
    let mut b_events = b.events();

    a.join("cluster").await.unwrap();
    assert_eq!(
        next_event(&mut a_events).await.unwrap(),
        TransportEvent::MembershipChange {
            group: "cluster".to_string(),
            total: vec![a.member()],
            left: vec![],
            joined: vec![a.member()],
        }
    );

    b.join("cluster").await.unwrap();
    let expected = TransportEvent::MembershipChange {
        group: "cluster".to_string(),
        total: vec![a.member(), b.member()],
        left: vec![],
        joined: vec![b.member()],
    };
    assert_eq!(next_event(&mut a_events).await.unwrap(), expected);
    assert_eq!(next_event(&mut b_events).await.unwrap(), expected);
    assert_eq!(network.members("cluster"), vec![a.member(), b.member()]);
}

#[tokio::test]
async fn test_multicast_is_delivered_to_sender_and_peers() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let network = MemoryGroupNetwork::new();
    let a = network.connect();
    let b = network.connect();
    let mut a_events = a.events();
    let mut b_events = b.events();

    a.join("cluster").await.unwrap();
    b.join("cluster").await.unwrap();
    next_event(&mut a_events).await.unwrap();
    next_event(&mut a_events).await.unwrap();
    next_event(&mut b_events).await.unwrap();

    a.multicast("cluster", ServiceType::Safe, Bytes::from("hello"))
        .await
        .unwrap();

    for events in [&mut a_events, &mut b_events] {
        assert_eq!(
            next_event(events).await.unwrap(),
            TransportEvent::Deliver {
                group: "cluster".to_string(),
                sender: a.member(),
                service: ServiceType::Safe,
                payload: Bytes::from("hello"),
            }
        );
    }
}

#[tokio::test]
async fn test_leave_notifies_leaver_and_remaining_members() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let network = MemoryGroupNetwork::new();
    let a = network.connect();
    let b = network.connect();
    let mut a_events = a.events();
    let mut b_events = b.events();

    a.join("cluster").await.unwrap();
    b.join("cluster").await.unwrap();
    next_event(&mut a_events).await.unwrap();
    next_event(&mut a_events).await.unwrap();
    next_event(&mut b_events).await.unwrap();

    b.leave("cluster").await.unwrap();

    let expected = TransportEvent::MembershipChange {
        group: "cluster".to_string(),
        total: vec![a.member()],
        left: vec![b.member()],
        joined: vec![],
    };
    assert_eq!(next_event(&mut a_events).await.unwrap(), expected);
    assert_eq!(next_event(&mut b_events).await.unwrap(), expected);
}

#[tokio::test]
async fn test_disconnect_ends_own_stream_with_error() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let network = MemoryGroupNetwork::new();
    let a = network.connect();
    let b = network.connect();
    let mut a_events = a.events();
    let mut b_events = b.events();

    a.join("cluster").await.unwrap();
    b.join("cluster").await.unwrap();
    next_event(&mut a_events).await.unwrap();
    next_event(&mut a_events).await.unwrap();
    next_event(&mut b_events).await.unwrap();

    b.disconnect();

    assert_eq!(
        next_event(&mut a_events).await.unwrap(),
        TransportEvent::MembershipChange {
            group: "cluster".to_string(),
            total: vec![a.member()],
            left: vec![b.member()],
            joined: vec![],
        }
    );
    assert_eq!(next_event(&mut b_events).await, Err(Error::NotConnected));
}
