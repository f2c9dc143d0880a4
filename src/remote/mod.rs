//! Watch-channel orchestration: the target registry, the stream lifecycle
//! controller, the online-state classifier and the network gate, plus the
//! collaborator seams they drive.
//!
//! All collaborators are injected at construction. The transport owns
//! connection establishment and retry/backoff timing; this module only
//! decides when the stream starts and stops, and what its signals mean.

mod aggregator;
mod event;
mod network_gate;
mod online_state;
mod remote_event;
mod remote_store;
mod target_registry;
mod watch_change;

pub(crate) use aggregator::*;
pub(crate) use event::StoreCommand;
pub use event::StreamSignal;
pub use event::WatchRequest;
pub(crate) use network_gate::*;
pub use online_state::OnlineState;
pub(crate) use online_state::OnlineStateTracker;
pub use remote_event::*;
pub use remote_store::RemoteStore;
pub use remote_store::RemoteStoreHandle;
pub(crate) use target_registry::*;
pub use watch_change::*;

#[cfg(test)]
mod network_gate_test;
#[cfg(test)]
mod remote_store_test;

// Trait definitions of the current module
// -----------------------------------------------------------------------------
// Collaborator contracts: sync engine, local store, stream transport
//

use std::collections::BTreeSet;

#[cfg(test)]
use mockall::automock;
use tonic::async_trait;
use tonic::Status;

use crate::model::BatchId;
use crate::model::DocumentKey;
use crate::model::MutationBatchResult;
use crate::model::TargetId;
use crate::Result;

/// Actions the remote store needs a cooperating synchronization engine to
/// perform.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RemoteSyncer: Send + Sync + 'static {
    /// Applies one remote event to the sync engine, notifying any views of
    /// the changes and releasing any pending mutation batches that become
    /// visible at the event's snapshot version.
    async fn apply_remote_event(
        &self,
        event: RemoteEvent,
    );

    /// Rejects the listen for the given target. The backend can trigger
    /// this for any active target, nearly always because the user is no
    /// longer authorized to see the data matching it. The caller must issue
    /// a fresh listen if it still wants the target.
    async fn reject_listen(
        &self,
        target_id: TargetId,
        status: Status,
    );

    /// Applies the result of a successful mutation-batch write, emitting
    /// snapshots in any views the batch applies to. Write-pipeline
    /// contract; the watch core never calls it.
    async fn apply_successful_write(
        &self,
        result: MutationBatchResult,
    );

    /// Rejects a failed mutation batch, reverting its local effects.
    /// Write-pipeline contract; the watch core never calls it.
    async fn reject_failed_write(
        &self,
        batch_id: BatchId,
        status: Status,
    );

    /// The set of document keys assigned to the target as of the last
    /// applied snapshot. Seeds existence-filter comparisons and the
    /// added/modified classification when a snapshot is raised.
    fn remote_keys_for_target(
        &self,
        target_id: TargetId,
    ) -> BTreeSet<DocumentKey>;
}

/// Local cache operations the remote store needs during recovery.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LocalStore: Send + Sync + 'static {
    /// Invalidates the locally cached view of a target whose existence
    /// filter did not match. The target is refetched from scratch
    /// afterwards, as if newly added.
    async fn resolve_existence_filter_mismatch(
        &self,
        target_id: TargetId,
    );
}

/// The bidirectional watch stream.
///
/// Implementations own connection establishment, framing and retry/backoff
/// timing. Lifecycle is reported through the controller's signal channel as
/// [`StreamSignal`] values: `Opened` once per successful (re)connect,
/// `Errored` once per broken session. After `Errored`, the transport waits
/// for the next `start` call before attempting to reconnect.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait WatchTransport: Send + Sync + 'static {
    /// Begin a connection attempt, or re-begin one after backoff.
    async fn start(&self);

    /// Tear the stream down. No further signals may be delivered until the
    /// next `start`.
    async fn stop(&self);

    /// Send one request over the open stream.
    async fn send(
        &self,
        request: WatchRequest,
    ) -> Result<()>;
}
