use crate::model::BatchId;
use crate::model::SnapshotVersion;

/// Result of a successfully committed mutation batch.
///
/// The watch core never produces or consumes this; it exists so the sync
/// engine contract covers the write pipeline it also serves.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationBatchResult {
    pub batch_id: BatchId,
    /// The version at which the server committed the batch.
    pub commit_version: SnapshotVersion,
    /// Opaque token to attach to the next write request.
    pub stream_token: Vec<u8>,
}
