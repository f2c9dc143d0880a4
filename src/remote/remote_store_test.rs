use std::collections::BTreeSet;

use tonic::Code;
use tonic::Status;

use super::*;
use crate::model::SnapshotVersion;
use crate::model::TargetId;
use crate::test_utils::doc;
use crate::test_utils::doc_change;
use crate::test_utils::existence_filter;
use crate::test_utils::doc_delete;
use crate::test_utils::query_data;
use crate::test_utils::target_added;
use crate::test_utils::target_current;
use crate::test_utils::target_removed_with_cause;
use crate::test_utils::Fixture;
use crate::test_utils::TransportCall;
use crate::Error;
use crate::ListenError;

/// Enables the network, listens to the given targets, opens the stream and
/// consumes the replay requests.
async fn open_with_targets(
    fixture: &mut Fixture,
    target_ids: &[TargetId],
) {
    fixture.handle.enable_network().await.expect("should succeed");
    for (i, &target_id) in target_ids.iter().enumerate() {
        fixture
            .handle
            .listen_to_target(query_data(target_id))
            .await
            .expect("should succeed");
        if i == 0 {
            // The first listen arms the transport
            assert_eq!(fixture.next_transport_call().await, TransportCall::Start);
        }
    }

    fixture.send_signal(StreamSignal::Opened).await;
    let mut replayed = Vec::new();
    for _ in target_ids {
        match fixture.next_transport_call().await {
            TransportCall::Send(WatchRequest::Watch(query_data)) => {
                replayed.push(query_data.target_id);
            }
            other => panic!("expected a watch request, got {:?}", other),
        }
    }
    let mut expected = target_ids.to_vec();
    expected.sort_unstable();
    assert_eq!(replayed, expected);
}

/// # Case 1: Opening the stream replays exactly the registry snapshot, in
/// ascending target-id order
#[tokio::test]
async fn test_open_replays_registry_in_order() {
    let mut fixture = Fixture::new().await;
    open_with_targets(&mut fixture, &[2, 1, 5]).await;
}

/// # Case 2: Registering the same target twice fails with AlreadyRegistered
#[tokio::test]
async fn test_listen_rejects_duplicate_target() {
    let fixture = Fixture::new().await;
    fixture.handle.enable_network().await.expect("should succeed");
    fixture
        .handle
        .listen_to_target(query_data(1))
        .await
        .expect("should succeed");

    match fixture.handle.listen_to_target(query_data(1)).await {
        Err(Error::Listen(ListenError::AlreadyRegistered(1))) => {}
        other => panic!("expected AlreadyRegistered, got {:?}", other),
    }
}

/// # Case 3: Targets marked current with accumulated keys flush into one
/// remote event when the snapshot marker arrives
#[tokio::test]
async fn test_snapshot_marker_raises_one_remote_event() {
    let mut fixture = Fixture::new().await;
    open_with_targets(&mut fixture, &[1, 2]).await;

    fixture.send_change(target_added(&[1])).await;
    fixture.send_change(target_added(&[2])).await;
    fixture.send_change(doc_change("rooms/a", &[1], &[])).await;
    fixture.send_change(doc_change("rooms/b", &[2], &[])).await;
    fixture.send_change(target_current(&[1])).await;
    fixture.send_change(target_current(&[2])).await;
    fixture.send_marker(5).await;

    let event = fixture.next_applied_event().await;
    assert_eq!(event.snapshot_version, SnapshotVersion::new(5));
    assert_eq!(event.target_changes.len(), 2);
    assert!(event.target_resets.is_empty());

    let first = &event.target_changes[&1];
    assert!(first.current);
    assert_eq!(first.added_documents, BTreeSet::from([doc("rooms/a")]));

    let second = &event.target_changes[&2];
    assert!(second.current);
    assert_eq!(second.added_documents, BTreeSet::from([doc("rooms/b")]));

    fixture.assert_no_applied_event();
}

/// # Case 4: A transport error before any marker emits nothing, keeps the
/// registry intact, and the reopened stream replays every target
#[tokio::test]
async fn test_transport_error_is_invisible_to_the_caller() {
    let mut fixture = Fixture::new().await;
    open_with_targets(&mut fixture, &[1, 2]).await;

    fixture.send_change(doc_change("rooms/a", &[1], &[])).await;
    fixture.send_change(target_current(&[1])).await;
    fixture
        .send_signal(StreamSignal::Errored {
            status: Status::unavailable("connection reset"),
        })
        .await;

    // The controller re-arms the transport; no event was emitted
    assert_eq!(fixture.next_transport_call().await, TransportCall::Start);
    fixture.assert_no_applied_event();

    // The reopen replays both targets: transient errors never evict
    fixture.send_signal(StreamSignal::Opened).await;
    for expected in [1, 2] {
        match fixture.next_transport_call().await {
            TransportCall::Send(WatchRequest::Watch(query_data)) => {
                assert_eq!(query_data.target_id, expected);
            }
            other => panic!("expected a watch request, got {:?}", other),
        }
    }
}

/// # Case 5: A target error evicts exactly that target, rejects it exactly
/// once, and never restarts the transport
#[tokio::test]
async fn test_target_error_evicts_and_rejects_once() {
    let mut fixture = Fixture::new().await;
    open_with_targets(&mut fixture, &[1, 2]).await;

    fixture
        .send_change(target_removed_with_cause(
            &[2],
            Status::permission_denied("listen denied"),
        ))
        .await;

    let (target_id, status) = fixture.next_rejection().await;
    assert_eq!(target_id, 2);
    assert_eq!(status.code(), Code::PermissionDenied);

    // No stop, start or unwatch followed the rejection
    fixture.assert_no_transport_call();

    // Target 1 is untouched: it still flushes into the next snapshot
    fixture.send_change(target_added(&[1])).await;
    fixture.send_change(target_current(&[1])).await;
    fixture.send_marker(5).await;

    let event = fixture.next_applied_event().await;
    assert_eq!(event.target_changes.len(), 1);
    assert!(event.target_changes.contains_key(&1));
}

/// # Case 6: Rejection of the last target tears the stream down
#[tokio::test]
async fn test_rejecting_last_target_stops_stream() {
    let mut fixture = Fixture::new().await;
    open_with_targets(&mut fixture, &[1]).await;

    fixture
        .send_change(target_removed_with_cause(
            &[1],
            Status::permission_denied("listen denied"),
        ))
        .await;

    let (target_id, _) = fixture.next_rejection().await;
    assert_eq!(target_id, 1);
    assert_eq!(fixture.next_transport_call().await, TransportCall::Stop);
}

/// # Case 7: Disabling the network stops everything and reports Offline;
/// re-enabling reopens and reports Online again
#[tokio::test]
async fn test_disable_network_forces_stopped_and_offline() {
    let mut fixture = Fixture::new().await;
    open_with_targets(&mut fixture, &[1]).await;
    let mut online_watcher = fixture.handle.online_state_watcher();

    fixture.handle.disable_network().await.expect("should succeed");
    assert_eq!(fixture.next_transport_call().await, TransportCall::Stop);
    online_watcher
        .wait_for(|state| *state == OnlineState::Offline)
        .await
        .expect("tracker alive");
    assert!(!fixture.handle.can_use_network());

    // Changes from the dead session are ignored
    fixture.send_change(target_current(&[1])).await;
    fixture.send_marker(5).await;
    fixture.assert_no_applied_event();

    // Re-enable: the registry is still populated, so the stream restarts
    fixture.handle.enable_network().await.expect("should succeed");
    assert_eq!(fixture.next_transport_call().await, TransportCall::Start);
    assert!(fixture.handle.can_use_network());

    fixture.send_signal(StreamSignal::Opened).await;
    assert!(matches!(
        fixture.next_transport_call().await,
        TransportCall::Send(WatchRequest::Watch(_))
    ));
    online_watcher
        .wait_for(|state| *state == OnlineState::Online)
        .await
        .expect("tracker alive");
}

/// # Case 8: Removing the last target unwatches it and stops the stream
#[tokio::test]
async fn test_stop_listening_last_target_stops_stream() {
    let mut fixture = Fixture::new().await;
    open_with_targets(&mut fixture, &[1]).await;

    fixture.handle.stop_listening(1).await.expect("should succeed");

    assert_eq!(
        fixture.next_transport_call().await,
        TransportCall::Send(WatchRequest::Unwatch(1))
    );
    assert_eq!(fixture.next_transport_call().await, TransportCall::Stop);
}

/// # Case 9: A target removed before the reopen is never replayed
#[tokio::test]
async fn test_reopen_never_replays_removed_targets() {
    let mut fixture = Fixture::new().await;
    open_with_targets(&mut fixture, &[1, 2]).await;

    fixture.handle.stop_listening(2).await.expect("should succeed");
    assert_eq!(
        fixture.next_transport_call().await,
        TransportCall::Send(WatchRequest::Unwatch(2))
    );

    fixture
        .send_signal(StreamSignal::Errored {
            status: Status::unavailable("connection reset"),
        })
        .await;
    assert_eq!(fixture.next_transport_call().await, TransportCall::Start);

    fixture.send_signal(StreamSignal::Opened).await;
    match fixture.next_transport_call().await {
        TransportCall::Send(WatchRequest::Watch(query_data)) => {
            assert_eq!(query_data.target_id, 1);
        }
        other => panic!("expected a watch request, got {:?}", other),
    }
    fixture.assert_no_transport_call();
}

/// # Case 10: Snapshot versions must move strictly forward; a stale marker
/// forces a session restart instead of an event
#[tokio::test]
async fn test_non_monotonic_marker_restarts_session() {
    let mut fixture = Fixture::new().await;
    open_with_targets(&mut fixture, &[1]).await;

    fixture.send_change(target_added(&[1])).await;
    fixture.send_change(target_current(&[1])).await;
    fixture.send_marker(5).await;
    let event = fixture.next_applied_event().await;
    assert_eq!(event.snapshot_version, SnapshotVersion::new(5));

    // The same version again violates the protocol
    fixture.send_marker(5).await;
    assert_eq!(fixture.next_transport_call().await, TransportCall::Stop);
    assert_eq!(fixture.next_transport_call().await, TransportCall::Start);
    fixture.assert_no_applied_event();
}

/// # Case 11: An existence-filter mismatch invalidates the local cache and
/// queues the target for a full reset
#[tokio::test]
async fn test_existence_filter_mismatch_routes_to_local_store() {
    let mut fixture = Fixture::with_remote_keys(BTreeSet::from([doc("rooms/a")])).await;
    open_with_targets(&mut fixture, &[1]).await;

    fixture.send_change(target_added(&[1])).await;
    // The client tracks one document; the server claims five
    fixture.send_change(existence_filter(1, 5)).await;

    assert_eq!(fixture.next_filter_reset().await, 1);

    fixture.send_change(target_current(&[1])).await;
    fixture.send_marker(3).await;
    let event = fixture.next_applied_event().await;
    assert_eq!(event.target_resets, BTreeSet::from([1]));
}

/// # Case 12: A matching existence filter changes nothing
#[tokio::test]
async fn test_existence_filter_match_is_a_noop() {
    let mut fixture = Fixture::with_remote_keys(BTreeSet::from([doc("rooms/a")])).await;
    open_with_targets(&mut fixture, &[1]).await;

    fixture.send_change(target_added(&[1])).await;
    fixture.send_change(existence_filter(1, 1)).await;
    fixture.send_change(target_current(&[1])).await;
    fixture.send_marker(3).await;

    let event = fixture.next_applied_event().await;
    assert!(event.target_resets.is_empty());
    assert!(matches!(
        fixture.filter_resets.try_recv(),
        Err(tokio::sync::mpsc::error::TryRecvError::Empty)
    ));
}

/// # Case 13: Repeated open failures cross the threshold into Offline
#[tokio::test]
async fn test_repeated_failures_report_offline() {
    let mut fixture = Fixture::new().await;
    let mut online_watcher = fixture.handle.online_state_watcher();
    fixture.handle.enable_network().await.expect("should succeed");
    fixture
        .handle
        .listen_to_target(query_data(1))
        .await
        .expect("should succeed");
    assert_eq!(fixture.next_transport_call().await, TransportCall::Start);

    fixture
        .send_signal(StreamSignal::Errored {
            status: Status::unavailable("no route"),
        })
        .await;
    assert_eq!(fixture.next_transport_call().await, TransportCall::Start);
    assert_eq!(fixture.handle.online_state(), OnlineState::Unknown);

    fixture
        .send_signal(StreamSignal::Errored {
            status: Status::unavailable("no route"),
        })
        .await;
    assert_eq!(fixture.next_transport_call().await, TransportCall::Start);
    online_watcher
        .wait_for(|state| *state == OnlineState::Offline)
        .await
        .expect("tracker alive");
}

/// # Case 14: Without network enablement nothing reaches the transport
#[tokio::test]
async fn test_listen_without_network_stays_idle() {
    let mut fixture = Fixture::new().await;
    fixture
        .handle
        .listen_to_target(query_data(1))
        .await
        .expect("should succeed");

    assert!(!fixture.handle.can_use_network());
    fixture.assert_no_transport_call();

    // Stray signals from a never-started transport are ignored
    fixture.send_signal(StreamSignal::Opened).await;
    fixture.send_change(target_current(&[1])).await;
    fixture.send_marker(5).await;
    fixture.assert_no_applied_event();
}

/// # Case 15: Listening while the stream is open sends an incremental
/// watch request instead of restarting
#[tokio::test]
async fn test_listen_while_open_sends_watch_request() {
    let mut fixture = Fixture::new().await;
    open_with_targets(&mut fixture, &[1]).await;

    fixture
        .handle
        .listen_to_target(query_data(2))
        .await
        .expect("should succeed");

    match fixture.next_transport_call().await {
        TransportCall::Send(WatchRequest::Watch(query_data)) => {
            assert_eq!(query_data.target_id, 2);
        }
        other => panic!("expected a watch request, got {:?}", other),
    }
    fixture.assert_no_transport_call();
}

/// # Case 16: Deleting a document the server had assigned surfaces it as
/// removed in the next snapshot
#[tokio::test]
async fn test_document_delete_flushes_as_removed() {
    let mut fixture = Fixture::with_remote_keys(BTreeSet::from([doc("rooms/a")])).await;
    open_with_targets(&mut fixture, &[1]).await;

    fixture.send_change(target_added(&[1])).await;
    fixture.send_change(doc_delete("rooms/a", &[1])).await;
    fixture.send_change(target_current(&[1])).await;
    fixture.send_marker(4).await;

    let event = fixture.next_applied_event().await;
    let change = &event.target_changes[&1];
    assert_eq!(change.removed_documents, BTreeSet::from([doc("rooms/a")]));
    assert!(change.added_documents.is_empty());
}

/// # Case 17: Resume tokens raised with a snapshot are replayed after a
/// reconnect
#[tokio::test]
async fn test_resume_token_survives_reconnect() {
    let mut fixture = Fixture::new().await;
    open_with_targets(&mut fixture, &[1]).await;

    fixture.send_change(target_added(&[1])).await;
    fixture
        .send_change(WatchChange::TargetChange(
            WatchTargetChange::new(WatchTargetChangeState::Current, vec![1])
                .with_resume_token(vec![0xCA, 0xFE]),
        ))
        .await;
    fixture.send_marker(5).await;
    let event = fixture.next_applied_event().await;
    assert_eq!(event.target_changes[&1].resume_token, vec![0xCA, 0xFE]);

    fixture
        .send_signal(StreamSignal::Errored {
            status: Status::unavailable("connection reset"),
        })
        .await;
    assert_eq!(fixture.next_transport_call().await, TransportCall::Start);
    fixture.send_signal(StreamSignal::Opened).await;

    match fixture.next_transport_call().await {
        TransportCall::Send(WatchRequest::Watch(query_data)) => {
            assert_eq!(query_data.target_id, 1);
            assert_eq!(query_data.resume_token, vec![0xCA, 0xFE]);
            assert_eq!(query_data.snapshot_version, SnapshotVersion::new(5));
        }
        other => panic!("expected a watch request, got {:?}", other),
    }
}
