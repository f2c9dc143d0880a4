use std::collections::BTreeMap;
use std::collections::BTreeSet;

use crate::model::DocumentKey;
use crate::model::SnapshotVersion;
use crate::model::TargetId;

/// A consistent, point-in-time bundle of per-target deltas, produced once
/// per aggregator flush. Ownership transfers to the sync engine on
/// emission.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteEvent {
    pub snapshot_version: SnapshotVersion,
    /// Targets with accumulated changes since the last flush.
    pub target_changes: BTreeMap<TargetId, TargetChange>,
    /// Targets whose local cache must be discarded and rebuilt because the
    /// server's existence filter disagreed with the client's count.
    pub target_resets: BTreeSet<TargetId>,
}

/// The delta for one target within a [`RemoteEvent`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TargetChange {
    /// Continuation token as of this snapshot; empty if the server sent
    /// none this session.
    pub resume_token: Vec<u8>,
    /// Whether the server marked the target complete and no watch requests
    /// are outstanding for it.
    pub current: bool,
    /// Keys the server assigned to the target that it had not assigned
    /// before.
    pub added_documents: BTreeSet<DocumentKey>,
    /// Keys already assigned to the target whose content changed.
    pub modified_documents: BTreeSet<DocumentKey>,
    /// Keys the server removed from the target.
    pub removed_documents: BTreeSet<DocumentKey>,
}

impl TargetChange {
    /// Whether the delta carries any document membership change.
    pub fn has_document_changes(&self) -> bool {
        !self.added_documents.is_empty()
            || !self.modified_documents.is_empty()
            || !self.removed_documents.is_empty()
    }
}
