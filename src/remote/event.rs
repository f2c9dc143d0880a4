use tokio::sync::oneshot;
use tonic::Status;

use super::WatchChange;
use crate::model::QueryData;
use crate::model::SnapshotVersion;
use crate::model::TargetId;
use crate::Result;

/// Public-API calls, marshaled onto the controller task so all registry and
/// state-machine mutation stays single-writer.
#[derive(Debug)]
pub(crate) enum StoreCommand {
    Listen {
        query_data: QueryData,
        reply: oneshot::Sender<Result<()>>,
    },

    StopListening {
        target_id: TargetId,
    },

    EnableNetwork,

    DisableNetwork,
}

/// Transport lifecycle signals, marshaled onto the controller task in
/// arrival order. The transport emits `Opened` once per successful
/// (re)connect and `Errored` once per broken session.
#[derive(Debug)]
pub enum StreamSignal {
    Opened,

    Change {
        change: WatchChange,
        snapshot_version: SnapshotVersion,
    },

    Errored {
        status: Status,
    },
}

/// One request written to the open watch stream.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchRequest {
    /// Subscribe to a target.
    Watch(QueryData),
    /// Drop a subscription. Effective immediately on the client side; the
    /// server acknowledges with a `Removed` target change.
    Unwatch(TargetId),
}
