use tonic::Status;

use crate::model::DocumentKey;
use crate::model::TargetId;

/// One incremental notification from the server about a target's membership
/// or a document's content. Individually not actionable; only meaningful as
/// part of the batch accumulated since the last snapshot.
#[derive(Debug, Clone)]
pub enum WatchChange {
    /// A document entered or changed within some targets, possibly leaving
    /// others.
    DocumentChange(DocumentChange),
    /// A document was deleted.
    DocumentDelete(DocumentDelete),
    /// The server updated the state of one or more targets.
    TargetChange(WatchTargetChange),
    /// The server reports how many documents it believes a target holds.
    ExistenceFilter(ExistenceFilterChange),
}

impl WatchChange {
    /// A global no-change target change is the server's snapshot marker:
    /// everything sent so far is consistent at the accompanying version.
    pub fn is_snapshot_marker(&self) -> bool {
        matches!(
            self,
            WatchChange::TargetChange(change)
                if change.state == WatchTargetChangeState::NoChange && change.is_global()
        )
    }
}

#[derive(Debug, Clone)]
pub struct DocumentChange {
    /// Targets the document now matches.
    pub updated_target_ids: Vec<TargetId>,
    /// Targets the document no longer matches.
    pub removed_target_ids: Vec<TargetId>,
    pub key: DocumentKey,
}

#[derive(Debug, Clone)]
pub struct DocumentDelete {
    /// Targets the document is removed from by the deletion.
    pub removed_target_ids: Vec<TargetId>,
    pub key: DocumentKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchTargetChangeState {
    /// Heartbeat / snapshot boundary; no membership change.
    NoChange,
    /// The server acknowledged a watch request.
    Added,
    /// The server dropped the target, either acknowledging an unwatch or,
    /// when a cause is attached, rejecting the listen outright.
    Removed,
    /// The target's result set is complete as of the current version.
    Current,
    /// The server discarded its accumulated state for the target; the
    /// client must treat the next updates as a full refetch.
    Reset,
}

#[derive(Debug, Clone)]
pub struct WatchTargetChange {
    pub state: WatchTargetChangeState,
    /// Affected targets. Empty addresses every active target.
    pub target_ids: Vec<TargetId>,
    /// Opaque continuation token, updated when non-empty.
    pub resume_token: Vec<u8>,
    /// Set only on `Removed` changes that reject the listed targets.
    pub cause: Option<Status>,
}

impl WatchTargetChange {
    pub fn new(
        state: WatchTargetChangeState,
        target_ids: Vec<TargetId>,
    ) -> Self {
        WatchTargetChange {
            state,
            target_ids,
            resume_token: Vec::new(),
            cause: None,
        }
    }

    pub fn with_resume_token(
        mut self,
        resume_token: Vec<u8>,
    ) -> Self {
        self.resume_token = resume_token;
        self
    }

    pub fn with_cause(
        mut self,
        cause: Status,
    ) -> Self {
        self.cause = Some(cause);
        self
    }

    /// Whether this change addresses every active target.
    pub fn is_global(&self) -> bool {
        self.target_ids.is_empty()
    }
}

/// The server-reported expected document count for a target, used to detect
/// missed updates.
#[derive(Debug, Clone, Copy)]
pub struct ExistenceFilterChange {
    pub target_id: TargetId,
    pub count: u32,
}
