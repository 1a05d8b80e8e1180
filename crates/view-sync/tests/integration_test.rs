//! End-to-end view agreement over the in-memory group transport

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use proven_group_transport_memory::{MemoryGroupNetwork, MemoryGroupTransport};
use proven_view_sync::{
    ControllerState, DeliveryGuarantee, GroupHandle, ListenerError, MemberId, Message, View,
    ViewSyncBinding, ViewSyncConfig,
};
use tokio::time::{sleep, timeout};

type Handle = GroupHandle<MemoryGroupTransport>;

fn start_node(network: &MemoryGroupNetwork) -> (ViewSyncBinding<MemoryGroupTransport>, MemberId) {
    let transport = network.connect();
    let member = MemberId::from(transport.member());
    let config = ViewSyncConfig::default()
        .with_retry(3, Duration::from_millis(5))
        .with_local_id_retry(3, Duration::from_millis(5))
        .with_shutdown_timeout(Duration::from_secs(1));

    let binding = ViewSyncBinding::new(transport, config).unwrap();
    binding.start().unwrap();
    (binding, member)
}

async fn wait_for_view<F>(handle: &Handle, predicate: F) -> Arc<View>
where
    F: Fn(&View) -> bool,
{
    timeout(Duration::from_secs(5), async {
        loop {
            if let Some(view) = handle.controller().current_view().await {
                if predicate(&view) {
                    return view;
                }
            }
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("Timed out waiting for view")
}

#[tokio::test]
async fn test_founding_member_gets_first_view() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let network = MemoryGroupNetwork::new();
    let (binding, a) = start_node(&network);
    let group = binding.group("cluster").unwrap();

    group.controller().join().await.unwrap();

    let view = wait_for_view(&group, |v| v.contains(&a)).await;
    assert_eq!(view.view_id().monotonic_part(), 1);
    assert_eq!(view.members(), &[a.clone()]);
    assert_eq!(group.controller().state(), ControllerState::Joined);
    assert_eq!(group.controller().local_member(), Some(a));

    binding.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_members_agree_on_views() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let network = MemoryGroupNetwork::new();
    let (binding_a, a) = start_node(&network);
    let (binding_b, b) = start_node(&network);
    let group_a = binding_a.group("cluster").unwrap();
    let group_b = binding_b.group("cluster").unwrap();

    group_a.controller().join().await.unwrap();
    let first = wait_for_view(&group_a, |v| v.contains(&a)).await;

    group_b.controller().join().await.unwrap();
    let view_a = wait_for_view(&group_a, |v| v.len() == 2).await;
    let view_b = wait_for_view(&group_b, |v| v.len() == 2).await;

    assert_eq!(view_a, view_b);
    assert_eq!(view_a.view_id(), first.view_id().increment());
    assert_eq!(view_a.joined(), &[b.clone()]);
    assert!(group_b.controller().belongs_to_group());

    binding_a.shutdown().await.unwrap();
    binding_b.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_leave_installs_views_on_both_sides() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let network = MemoryGroupNetwork::new();
    let (binding_a, a) = start_node(&network);
    let (binding_b, b) = start_node(&network);
    let group_a = binding_a.group("cluster").unwrap();
    let group_b = binding_b.group("cluster").unwrap();

    group_a.controller().join().await.unwrap();
    wait_for_view(&group_a, |v| v.contains(&a)).await;
    group_b.controller().join().await.unwrap();
    let pair = wait_for_view(&group_b, |v| v.len() == 2).await;

    group_b.controller().leave().await.unwrap();

    let view_a = wait_for_view(&group_a, |v| !v.contains(&b)).await;
    assert_eq!(view_a.members(), &[a.clone()]);
    assert_eq!(view_a.left(), &[b.clone()]);
    assert_eq!(view_a.view_id(), pair.view_id().increment());

    let view_b = wait_for_view(&group_b, |v| !v.contains(&b)).await;
    assert_eq!(view_b.view_id(), pair.view_id().increment());
    assert_eq!(group_b.controller().state(), ControllerState::Left);
    assert!(!group_b.controller().belongs_to_group());

    binding_a.shutdown().await.unwrap();
    binding_b.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_application_messages_reach_every_member() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let network = MemoryGroupNetwork::new();
    let (binding_a, a) = start_node(&network);
    let (binding_b, _) = start_node(&network);
    let group_a = binding_a.group("cluster").unwrap();
    let group_b = binding_b.group("cluster").unwrap();

    let received = Arc::new(Mutex::new(Vec::new()));
    {
        let received = received.clone();
        group_b
            .channel()
            .add_event_listener(Arc::new(move |message: Message| received.lock().push(message)));
    }

    group_a.controller().join().await.unwrap();
    group_b.controller().join().await.unwrap();
    wait_for_view(&group_a, |v| v.len() == 2).await;
    wait_for_view(&group_b, |v| v.len() == 2).await;

    let message = Message::new("cluster", DeliveryGuarantee::Uniform, "greeting", "hello b");
    group_a.channel().send_message(&message).await.unwrap();

    timeout(Duration::from_secs(5), async {
        while received.lock().is_empty() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    let received = received.lock();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].origin(), Some(&a));
    assert_eq!(received[0].header(), &Bytes::from("greeting"));
    assert_eq!(received[0].payload(), &Bytes::from("hello b"));
    assert_eq!(received[0].delivery_guarantee(), DeliveryGuarantee::Uniform);

    let sent = group_a.statistics().snapshot();
    assert_eq!(sent.messages_sent, 1);
    assert_eq!(sent.bytes_sent, message.encoded_len() as u64);
    assert!(group_b.statistics().messages_received() >= 1);

    drop(received);
    binding_a.shutdown().await.unwrap();
    binding_b.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_exchange_data_is_delivered_during_join() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let network = MemoryGroupNetwork::new();
    let (binding_a, a) = start_node(&network);
    let (binding_b, b) = start_node(&network);
    let group_a = binding_a.group("cluster").unwrap();
    let group_b = binding_b.group("cluster").unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    {
        let seen = seen.clone();
        group_a.controller().add_data_listener(Arc::new(
            move |origin: &MemberId, data: Bytes| -> Result<(), ListenerError> {
                seen.lock().push((origin.clone(), data));
                Ok(())
            },
        ));
    }

    group_a.controller().join().await.unwrap();
    wait_for_view(&group_a, |v| v.contains(&a)).await;

    group_b
        .controller()
        .set_exchange_data(Some(Bytes::from("region=eu")));
    group_b.controller().join().await.unwrap();
    wait_for_view(&group_a, |v| v.contains(&b)).await;

    assert_eq!(*seen.lock(), vec![(b, Bytes::from("region=eu"))]);

    binding_a.shutdown().await.unwrap();
    binding_b.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_connection_loss_stops_dispatch() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let network = MemoryGroupNetwork::new();
    let (binding_a, a) = start_node(&network);
    let (binding_b, b) = start_node(&network);
    let group_a = binding_a.group("cluster").unwrap();
    let group_b = binding_b.group("cluster").unwrap();

    group_a.controller().join().await.unwrap();
    group_b.controller().join().await.unwrap();
    wait_for_view(&group_a, |v| v.len() == 2).await;
    wait_for_view(&group_b, |v| v.len() == 2).await;

    binding_b.transport().disconnect();

    let view_a = wait_for_view(&group_a, |v| !v.contains(&b)).await;
    assert_eq!(view_a.members(), &[a]);

    timeout(Duration::from_secs(5), async {
        while !binding_b.is_stopped() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    timeout(Duration::from_secs(5), async {
        while group_b.controller().state() != ControllerState::NotJoined {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert!(group_b.controller().current_view().await.is_none());
    assert!(binding_b.group("other").is_err());

    binding_a.shutdown().await.unwrap();
    binding_b.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_groups_are_independent() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let network = MemoryGroupNetwork::new();
    let (binding_a, a) = start_node(&network);
    let (binding_b, b) = start_node(&network);

    let shared_a = binding_a.group("shared").unwrap();
    let shared_b = binding_b.group("shared").unwrap();
    let solo = binding_a.group("solo").unwrap();

    solo.controller().join().await.unwrap();
    shared_a.controller().join().await.unwrap();
    shared_b.controller().join().await.unwrap();

    let solo_view = wait_for_view(&solo, |v| v.contains(&a)).await;
    let shared_view = wait_for_view(&shared_a, |v| v.contains(&b)).await;

    assert_eq!(solo_view.members(), &[a.clone()]);
    assert_eq!(shared_view.members(), &[a, b]);
    assert_eq!(binding_a.groups().len(), 2);

    binding_a.shutdown().await.unwrap();
    binding_b.shutdown().await.unwrap();
}
