//! Shared fixtures for watch orchestration tests: change/query builders and
//! a harness that wires mock collaborators into a running controller task.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tonic::Status;

use crate::model::DocumentKey;
use crate::model::QueryData;
use crate::model::SnapshotVersion;
use crate::model::TargetId;
use crate::remote::MockLocalStore;
use crate::remote::MockRemoteSyncer;
use crate::remote::MockWatchTransport;
use crate::DocumentChange;
use crate::DocumentDelete;
use crate::ExistenceFilterChange;
use crate::RemoteEvent;
use crate::RemoteStore;
use crate::RemoteStoreHandle;
use crate::StreamSignal;
use crate::WatchChange;
use crate::WatchRequest;
use crate::WatchSettings;
use crate::WatchTargetChange;
use crate::WatchTargetChangeState;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

// Builders
// -----------------------------------------------------------------------------

pub(crate) fn query_data(target_id: TargetId) -> QueryData {
    QueryData::new(target_id, format!("collection/c{}", target_id))
}

pub(crate) fn doc(path: &str) -> DocumentKey {
    DocumentKey::new(path)
}

pub(crate) fn target_added(target_ids: &[TargetId]) -> WatchChange {
    WatchChange::TargetChange(WatchTargetChange::new(
        WatchTargetChangeState::Added,
        target_ids.to_vec(),
    ))
}

pub(crate) fn target_current(target_ids: &[TargetId]) -> WatchChange {
    WatchChange::TargetChange(WatchTargetChange::new(
        WatchTargetChangeState::Current,
        target_ids.to_vec(),
    ))
}

pub(crate) fn target_removed_with_cause(
    target_ids: &[TargetId],
    status: Status,
) -> WatchChange {
    WatchChange::TargetChange(
        WatchTargetChange::new(WatchTargetChangeState::Removed, target_ids.to_vec())
            .with_cause(status),
    )
}

/// The server's snapshot boundary: a global no-change.
pub(crate) fn snapshot_marker() -> WatchChange {
    WatchChange::TargetChange(WatchTargetChange::new(
        WatchTargetChangeState::NoChange,
        Vec::new(),
    ))
}

pub(crate) fn doc_change(
    path: &str,
    updated: &[TargetId],
    removed: &[TargetId],
) -> WatchChange {
    WatchChange::DocumentChange(DocumentChange {
        updated_target_ids: updated.to_vec(),
        removed_target_ids: removed.to_vec(),
        key: doc(path),
    })
}

pub(crate) fn doc_delete(
    path: &str,
    removed: &[TargetId],
) -> WatchChange {
    WatchChange::DocumentDelete(DocumentDelete {
        removed_target_ids: removed.to_vec(),
        key: doc(path),
    })
}

pub(crate) fn existence_filter(
    target_id: TargetId,
    count: u32,
) -> WatchChange {
    WatchChange::ExistenceFilter(ExistenceFilterChange { target_id, count })
}

/// A sync engine mock that only answers remote-key lookups.
pub(crate) fn syncer_with_remote_keys(remote_keys: BTreeSet<DocumentKey>) -> MockRemoteSyncer {
    let mut syncer = MockRemoteSyncer::new();
    syncer
        .expect_remote_keys_for_target()
        .returning(move |_| remote_keys.clone());
    syncer
}

// Controller harness
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TransportCall {
    Start,
    Stop,
    Send(WatchRequest),
}

/// A controller loop running on its own task, with every collaborator
/// replaced by a mock that forwards into a probe channel.
pub(crate) struct Fixture {
    pub(crate) handle: RemoteStoreHandle,
    pub(crate) signal_tx: mpsc::Sender<StreamSignal>,
    pub(crate) applied_events: mpsc::UnboundedReceiver<RemoteEvent>,
    pub(crate) rejections: mpsc::UnboundedReceiver<(TargetId, Status)>,
    pub(crate) filter_resets: mpsc::UnboundedReceiver<TargetId>,
    pub(crate) transport_calls: mpsc::UnboundedReceiver<TransportCall>,
    _shutdown_tx: watch::Sender<()>,
    task: JoinHandle<crate::Result<()>>,
}

impl Fixture {
    pub(crate) async fn new() -> Self {
        Self::with_remote_keys(BTreeSet::new()).await
    }

    pub(crate) async fn with_remote_keys(remote_keys: BTreeSet<DocumentKey>) -> Self {
        let (applied_tx, applied_events) = mpsc::unbounded_channel();
        let (reject_tx, rejections) = mpsc::unbounded_channel();
        let (reset_tx, filter_resets) = mpsc::unbounded_channel();
        let (call_tx, transport_calls) = mpsc::unbounded_channel();

        let mut sync_engine = syncer_with_remote_keys(remote_keys);
        sync_engine.expect_apply_remote_event().returning(move |event| {
            let _ = applied_tx.send(event);
        });
        sync_engine
            .expect_reject_listen()
            .returning(move |target_id, status| {
                let _ = reject_tx.send((target_id, status));
            });

        let mut local_store = MockLocalStore::new();
        local_store
            .expect_resolve_existence_filter_mismatch()
            .returning(move |target_id| {
                let _ = reset_tx.send(target_id);
            });

        let mut transport = MockWatchTransport::new();
        let start_tx = call_tx.clone();
        transport.expect_start().returning(move || {
            let _ = start_tx.send(TransportCall::Start);
        });
        let stop_tx = call_tx.clone();
        transport.expect_stop().returning(move || {
            let _ = stop_tx.send(TransportCall::Stop);
        });
        transport.expect_send().returning(move |request| {
            let _ = call_tx.send(TransportCall::Send(request));
            Ok(())
        });

        let settings = WatchSettings::default();
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let (mut store, handle, signal_tx) = RemoteStore::new(
            &settings,
            Arc::new(sync_engine),
            Arc::new(local_store),
            Arc::new(transport),
            shutdown_rx,
        );
        let task = tokio::spawn(async move { store.run().await });

        Fixture {
            handle,
            signal_tx,
            applied_events,
            rejections,
            filter_resets,
            transport_calls,
            _shutdown_tx: shutdown_tx,
            task,
        }
    }

    pub(crate) async fn send_signal(
        &self,
        signal: StreamSignal,
    ) {
        self.signal_tx
            .send(signal)
            .await
            .expect("controller should be running");
    }

    pub(crate) async fn send_change(
        &self,
        change: WatchChange,
    ) {
        self.send_signal(StreamSignal::Change {
            change,
            snapshot_version: SnapshotVersion::NONE,
        })
        .await;
    }

    pub(crate) async fn send_marker(
        &self,
        version: u64,
    ) {
        self.send_signal(StreamSignal::Change {
            change: snapshot_marker(),
            snapshot_version: SnapshotVersion::new(version),
        })
        .await;
    }

    pub(crate) async fn next_transport_call(&mut self) -> TransportCall {
        timeout(PROBE_TIMEOUT, self.transport_calls.recv())
            .await
            .expect("timed out waiting for a transport call")
            .expect("transport probe closed")
    }

    pub(crate) async fn next_applied_event(&mut self) -> RemoteEvent {
        timeout(PROBE_TIMEOUT, self.applied_events.recv())
            .await
            .expect("timed out waiting for a remote event")
            .expect("sync engine probe closed")
    }

    pub(crate) async fn next_rejection(&mut self) -> (TargetId, Status) {
        timeout(PROBE_TIMEOUT, self.rejections.recv())
            .await
            .expect("timed out waiting for a rejection")
            .expect("sync engine probe closed")
    }

    pub(crate) async fn next_filter_reset(&mut self) -> TargetId {
        timeout(PROBE_TIMEOUT, self.filter_resets.recv())
            .await
            .expect("timed out waiting for a filter reset")
            .expect("local store probe closed")
    }

    pub(crate) fn assert_no_applied_event(&mut self) {
        assert!(matches!(
            self.applied_events.try_recv(),
            Err(TryRecvError::Empty)
        ));
    }

    pub(crate) fn assert_no_transport_call(&mut self) {
        assert!(matches!(
            self.transport_calls.try_recv(),
            Err(TryRecvError::Empty)
        ));
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        self.task.abort();
    }
}
